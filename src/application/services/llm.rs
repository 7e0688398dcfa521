use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::instrument;

use crate::domain::ports::{
    ChatMessage, ChatModel, EmbeddingModel, Entity, GenConf, ModelProvider, ModelSpec,
    Repositories, RerankModel,
};
use crate::domain::{
    split_model_id, CatalogLlm, DomainError, Llm, LlmFactory, LlmType, StatusEnum, TenantLlm,
};

/// Factories whose models run inside the deployment and need no key.
const SELF_DEPLOYED: [&str; 8] = [
    "Youdao",
    "FastEmbed",
    "BAAI",
    "Ollama",
    "Xinference",
    "LocalAI",
    "LM-Studio",
    "GPUStack",
];

/// Bundled lightweight factories, hidden from the factory list and, in
/// lighten mode, from the model list.
const LIGHTWEIGHT: [&str; 3] = ["Youdao", "FastEmbed", "BAAI"];

const PLACEHOLDER_KEY: &str = "xxxxxxxxxxxxxxx";
const PROBE_SENTENCE: &str = "Test if the api key is available";
const PROBE_GREETING: &str = "Hello! How are you doing!";

fn field<'a>(req: &'a Map<String, Value>, key: &str) -> &'a str {
    req.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Packs several request fields into one JSON-encoded key.
fn packed_key(req: &Map<String, Value>, keys: &[&str]) -> String {
    let packed: Map<String, Value> = keys
        .iter()
        .map(|k| (k.to_string(), Value::String(field(req, k).to_string())))
        .collect();
    Value::Object(packed).to_string()
}

/// Model catalog, tenant model credentials, and resolution of model ids to
/// clients.
pub struct LlmService {
    repos: Repositories,
    models: Arc<dyn ModelProvider>,
    builtin_factory: String,
    lighten: bool,
}

impl LlmService {
    pub fn new(
        repos: Repositories,
        models: Arc<dyn ModelProvider>,
        builtin_factory: String,
        lighten: bool,
    ) -> Self {
        Self {
            repos,
            models,
            builtin_factory,
            lighten,
        }
    }

    /// Loads the factory and model catalog, replacing rows with the same key.
    #[instrument(skip_all, fields(factories = factories.len(), models = llms.len()))]
    pub async fn seed_catalog(&self, factories: &[LlmFactory], llms: &[Llm]) -> Result<(), DomainError> {
        for factory in factories {
            self.repos.llm_factories.save(factory).await?;
        }
        for llm in llms {
            self.repos.llms.save(&CatalogLlm::from(llm.clone())).await?;
        }
        tracing::info!("model catalog seeded");
        Ok(())
    }

    async fn catalog_of(&self, factory: &str) -> Result<Vec<Llm>, DomainError> {
        let fid = factory.to_string();
        Ok(self
            .repos
            .llms
            .find(&|m: &CatalogLlm| m.llm.fid == fid)
            .await?
            .into_iter()
            .map(|m| m.llm)
            .collect())
    }

    async fn tenant_rows(&self, tenant_id: &str) -> Result<Vec<TenantLlm>, DomainError> {
        let tenant = tenant_id.to_string();
        self.repos
            .tenant_llms
            .find(&|r: &TenantLlm| r.tenant_id == tenant)
            .await
    }

    pub async fn factories(&self) -> Result<Vec<Value>, DomainError> {
        let mut types: BTreeMap<String, BTreeSet<LlmType>> = BTreeMap::new();
        for m in self.repos.llms.list().await? {
            if m.llm.status != StatusEnum::Valid {
                continue;
            }
            types.entry(m.llm.fid.clone()).or_default().insert(m.llm.model_type);
        }

        let mut factories = self.repos.llm_factories.list().await?;
        factories.retain(|f| !LIGHTWEIGHT.contains(&f.name.as_str()));
        factories.sort_by(|a, b| a.name.cmp(&b.name));

        factories
            .into_iter()
            .map(|f| {
                let model_types: Vec<LlmType> = match types.get(&f.name) {
                    Some(set) => set.iter().copied().collect(),
                    None => LlmType::ALL.to_vec(),
                };
                let mut row = serde_json::to_value(&f)?;
                row["model_types"] = json!(model_types);
                Ok(row)
            })
            .collect()
    }

    async fn probe_embedding(&self, spec: &ModelSpec) -> Result<(), DomainError> {
        let model = self.models.embedding(spec)?;
        let (vectors, _) = model.encode(&[PROBE_SENTENCE.to_string()]).await?;
        if vectors.first().is_none_or(|v| v.is_empty()) {
            return Err(DomainError::external("Fail"));
        }
        Ok(())
    }

    /// A reply carrying `**ERROR**` fails the probe; `lenient` lets it pass
    /// when the model still reported token usage.
    async fn probe_chat(
        &self,
        spec: &ModelSpec,
        max_tokens: Option<u32>,
        lenient: bool,
    ) -> Result<(), DomainError> {
        let model = self.models.chat(spec)?;
        let conf = GenConf {
            temperature: Some(0.9),
            max_tokens,
        };
        let (answer, tokens) = model
            .chat(None, &[ChatMessage::user(PROBE_GREETING)], &conf)
            .await?;
        if answer.contains("**ERROR**") && !(lenient && tokens > 0) {
            return Err(DomainError::external(answer));
        }
        Ok(())
    }

    async fn probe_rerank(&self, spec: &ModelSpec, texts: &[&str], need_tokens: bool) -> Result<(), DomainError> {
        let model = self.models.rerank(spec)?;
        let texts: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let (scores, tokens) = model.similarity("What's the weather?", &texts).await?;
        if scores.is_empty() || (need_tokens && tokens == 0) {
            return Err(DomainError::external("Fail"));
        }
        Ok(())
    }

    /// Saves a credential row, keeping the usage counter of any row it replaces.
    async fn upsert_row(&self, mut row: TenantLlm) -> Result<(), DomainError> {
        let key = TenantLlm::row_key(&row.tenant_id, &row.llm_factory, &row.llm_name);
        if let Some(existing) = self.repos.tenant_llms.get(&key).await? {
            row.used_tokens = existing.used_tokens;
            row.stamp = existing.stamp;
        }
        self.repos.tenant_llms.save(&row).await
    }

    /// Verifies a factory key against its catalog models, then stores it
    /// for every one of them.
    #[instrument(skip(self, api_key))]
    pub async fn set_api_key(
        &self,
        tenant_id: &str,
        factory: &str,
        api_key: &str,
        base_url: Option<&str>,
    ) -> Result<(), DomainError> {
        let catalog = self.catalog_of(factory).await?;
        let base = base_url.unwrap_or_default();
        let (mut chat_ok, mut embd_ok, mut rerank_ok) = (false, false, false);
        let mut msg = String::new();

        for llm in &catalog {
            let spec = ModelSpec::new(factory, &llm.llm_name, api_key, base_url.map(str::to_string));
            match llm.model_type {
                LlmType::Embedding if !embd_ok => match self.probe_embedding(&spec).await {
                    Ok(()) => embd_ok = true,
                    Err(e) => msg.push_str(&format!(
                        "\nFail to access embedding model({}) using this api key.{e}",
                        llm.llm_name
                    )),
                },
                LlmType::Chat if !chat_ok => match self.probe_chat(&spec, Some(50), false).await {
                    Ok(()) => chat_ok = true,
                    Err(e) => msg.push_str(&format!(
                        "\nFail to access model({}) using this api key.{e}",
                        llm.llm_name
                    )),
                },
                LlmType::Rerank if !rerank_ok => {
                    match self.probe_rerank(&spec, &["Is it sunny today?"], true).await {
                        Ok(()) => rerank_ok = true,
                        Err(e) => msg.push_str(&format!(
                            "\nFail to access model({}) using this api key.{e}",
                            llm.llm_name
                        )),
                    }
                }
                _ => {}
            }
            if chat_ok || embd_ok || rerank_ok {
                msg.clear();
                break;
            }
        }
        if !msg.is_empty() {
            return Err(DomainError::validation(msg));
        }

        for llm in &catalog {
            let mut row = TenantLlm::new(tenant_id, factory, &llm.llm_name, llm.model_type);
            row.api_key = Some(api_key.to_string());
            row.api_base = Some(base.to_string());
            row.max_tokens = Some(llm.max_tokens);
            self.upsert_row(row).await?;
        }
        tracing::info!(tenant_id, factory, models = catalog.len(), "factory key stored");
        Ok(())
    }

    /// Registers one model with factory-specific credentials after probing it.
    #[instrument(skip(self, req))]
    pub async fn add_llm(&self, tenant_id: &str, req: &Map<String, Value>) -> Result<(), DomainError> {
        let factory = field(req, "llm_factory");
        let name = field(req, "llm_name");
        let model_type_raw = field(req, "model_type");
        let or_placeholder = |key: &str| {
            req.get(key)
                .and_then(Value::as_str)
                .map_or_else(|| PLACEHOLDER_KEY.to_string(), str::to_string)
        };

        let (llm_name, api_key) = match factory {
            "Tencent Hunyuan" => {
                let key = packed_key(req, &["hunyuan_sid", "hunyuan_sk"]);
                return self
                    .set_api_key(tenant_id, factory, &key, req.get("base_url").and_then(Value::as_str))
                    .await;
            }
            "Tencent Cloud" => {
                let key = packed_key(req, &["tencent_cloud_sid", "tencent_cloud_sk"]);
                return self
                    .set_api_key(tenant_id, factory, &key, req.get("base_url").and_then(Value::as_str))
                    .await;
            }
            "VolcEngine" => (name.to_string(), packed_key(req, &["ark_api_key", "endpoint_id"])),
            "Bedrock" => (
                name.to_string(),
                packed_key(req, &["bedrock_ak", "bedrock_sk", "bedrock_region"]),
            ),
            "LocalAI" => (format!("{name}___LocalAI"), PLACEHOLDER_KEY.to_string()),
            "HuggingFace" => (format!("{name}___HuggingFace"), PLACEHOLDER_KEY.to_string()),
            "OpenAI-API-Compatible" => (format!("{name}___OpenAI-API"), or_placeholder("api_key")),
            "VLLM" => (format!("{name}___VLLM"), or_placeholder("api_key")),
            "XunFei Spark" => match model_type_raw {
                "tts" => (
                    name.to_string(),
                    packed_key(req, &["spark_app_id", "spark_api_secret", "spark_api_key"]),
                ),
                _ => (name.to_string(), or_placeholder("spark_api_password")),
            },
            "BaiduYiyan" => (name.to_string(), packed_key(req, &["yiyan_ak", "yiyan_sk"])),
            "Fish Audio" => (
                name.to_string(),
                packed_key(req, &["fish_audio_ak", "fish_audio_refid"]),
            ),
            "Google Cloud" => (
                name.to_string(),
                packed_key(
                    req,
                    &["google_project_id", "google_region", "google_service_account_key"],
                ),
            ),
            "Azure-OpenAI" => (name.to_string(), packed_key(req, &["api_key", "api_version"])),
            _ => (name.to_string(), or_placeholder("api_key")),
        };

        let model_type: LlmType = serde_json::from_value(Value::String(model_type_raw.to_string()))
            .map_err(|_| DomainError::invalid_argument(format!("Unknown model type: {model_type_raw}")))?;
        let api_base = field(req, "api_base");
        let max_tokens = req.get("max_tokens").and_then(Value::as_i64);

        let probe_name = llm_name.split("___").next().unwrap_or_default();
        let base = Some(api_base.to_string());
        let spec = ModelSpec::new(factory, probe_name, &api_key, base);
        let failure = match model_type {
            LlmType::Embedding => self
                .probe_embedding(&spec)
                .await
                .err()
                .map(|e| format!("\nFail to access embedding model({probe_name}).{e}")),
            LlmType::Chat => self
                .probe_chat(&spec, None, true)
                .await
                .err()
                .map(|e| format!("\nFail to access model({probe_name}).{e}")),
            LlmType::Rerank if !self.models.supports(factory, LlmType::Rerank) => {
                Some(format!("{factory} dose not support this model({probe_name})"))
            }
            LlmType::Rerank => self
                .probe_rerank(&spec, &["Hi, there!", "Ohh, my friend!"], false)
                .await
                .err()
                .map(|e| format!("\nFail to access model({probe_name}).{e}")),
            LlmType::Image2text | LlmType::Tts | LlmType::Speech2text => None,
        };
        if let Some(msg) = failure {
            return Err(DomainError::validation(msg));
        }

        let mut row = TenantLlm::new(tenant_id, factory, &llm_name, model_type);
        row.api_key = Some(api_key);
        row.api_base = Some(api_base.to_string());
        row.max_tokens = max_tokens;
        self.upsert_row(row).await?;
        tracing::info!(tenant_id, factory, llm_name = %llm_name, "model added");
        Ok(())
    }

    pub async fn delete_llm(&self, tenant_id: &str, factory: &str, llm_name: &str) -> Result<(), DomainError> {
        self.repos
            .tenant_llms
            .delete(&TenantLlm::row_key(tenant_id, factory, llm_name))
            .await?;
        Ok(())
    }

    pub async fn delete_factory(&self, tenant_id: &str, factory: &str) -> Result<(), DomainError> {
        let (tenant, factory) = (tenant_id.to_string(), factory.to_string());
        self.repos
            .tenant_llms
            .delete_where(&|r: &TenantLlm| r.tenant_id == tenant && r.llm_factory == factory)
            .await?;
        Ok(())
    }

    /// The tenant's keyed models grouped by factory.
    pub async fn my_llms(&self, tenant_id: &str) -> Result<Value, DomainError> {
        let mut out: BTreeMap<String, Value> = BTreeMap::new();
        for row in self.tenant_rows(tenant_id).await? {
            if row.api_key.is_none() {
                continue;
            }
            if !out.contains_key(&row.llm_factory) {
                let tags = self
                    .repos
                    .llm_factories
                    .get(&row.llm_factory)
                    .await?
                    .map(|f| f.tags)
                    .unwrap_or_default();
                out.insert(row.llm_factory.clone(), json!({ "tags": tags, "llm": [] }));
            }
            if let Some(Value::Array(llms)) = out
                .get_mut(&row.llm_factory)
                .and_then(|entry| entry.get_mut("llm"))
            {
                llms.push(json!({
                    "type": row.model_type,
                    "name": row.llm_name,
                    "used_token": row.used_tokens,
                }));
            }
        }
        Ok(json!(out))
    }

    /// Catalog models with availability for the tenant, grouped by factory.
    pub async fn list(&self, tenant_id: &str, model_type: Option<&str>) -> Result<Value, DomainError> {
        let rows = self.tenant_rows(tenant_id).await?;
        let keyed: HashSet<&str> = rows
            .iter()
            .filter(|r| r.has_api_key())
            .map(|r| r.llm_factory.as_str())
            .collect();

        let mut models: Vec<Value> = Vec::new();
        let mut seen = HashSet::new();
        for m in self.repos.llms.list().await? {
            let llm = m.llm;
            if llm.status != StatusEnum::Valid
                || (self.lighten && LIGHTWEIGHT.contains(&llm.fid.as_str()))
            {
                continue;
            }
            let available = keyed.contains(llm.fid.as_str())
                || llm.llm_name.eq_ignore_ascii_case("flag-embedding")
                || SELF_DEPLOYED.contains(&llm.fid.as_str());
            seen.insert(llm.key());
            let mut row = serde_json::to_value(&llm)?;
            row["available"] = json!(available);
            models.push(row);
        }
        for r in rows.iter().filter(|r| r.has_api_key()) {
            if seen.contains(&format!("{}@{}", r.llm_name, r.llm_factory)) {
                continue;
            }
            models.push(json!({
                "llm_name": r.llm_name,
                "model_type": r.model_type,
                "fid": r.llm_factory,
                "available": true,
            }));
        }

        let wanted = model_type.filter(|t| !t.is_empty());
        let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for m in models {
            let kind = m["model_type"].as_str().unwrap_or_default();
            if wanted.is_some_and(|w| !kind.contains(w)) {
                continue;
            }
            let fid = m["fid"].as_str().unwrap_or_default().to_string();
            grouped.entry(fid).or_default().push(m);
        }
        for group in grouped.values_mut() {
            group.sort_by(|a, b| {
                a["llm_name"]
                    .as_str()
                    .unwrap_or_default()
                    .cmp(b["llm_name"].as_str().unwrap_or_default())
            });
        }
        Ok(json!(grouped))
    }

    /// Credentials for `name@factory` (or a bare name) within a tenant.
    /// Models of the built-in factory need no tenant row.
    async fn spec_for(&self, tenant_id: &str, model_id: &str, kind: LlmType) -> Result<ModelSpec, DomainError> {
        if model_id.is_empty() {
            return Err(DomainError::validation(format!("Type of {kind} model is not set.")));
        }
        let (name, factory) = split_model_id(model_id);
        let (tenant, wanted, fac) = (
            tenant_id.to_string(),
            name.to_string(),
            factory.map(str::to_string),
        );
        let row = self
            .repos
            .tenant_llms
            .find_one(&|r: &TenantLlm| {
                r.tenant_id == tenant
                    && r.llm_name == wanted
                    && fac.as_ref().is_none_or(|f| *f == r.llm_factory)
            })
            .await?;

        match row {
            Some(row) => Ok(ModelSpec::new(
                row.llm_factory,
                row.llm_name,
                row.api_key.unwrap_or_default(),
                row.api_base,
            )),
            None if factory.is_none_or(|f| f == self.builtin_factory) => {
                Ok(ModelSpec::new(&self.builtin_factory, name, "", None))
            }
            None => Err(DomainError::validation(format!("Model({model_id}) not authorized"))),
        }
    }

    pub async fn embedding_model(
        &self,
        tenant_id: &str,
        model_id: &str,
    ) -> Result<Arc<dyn EmbeddingModel>, DomainError> {
        let spec = self.spec_for(tenant_id, model_id, LlmType::Embedding).await?;
        self.models.embedding(&spec)
    }

    pub async fn chat_model(&self, tenant_id: &str, model_id: &str) -> Result<Arc<dyn ChatModel>, DomainError> {
        let spec = self.spec_for(tenant_id, model_id, LlmType::Chat).await?;
        self.models.chat(&spec)
    }

    pub async fn rerank_model(&self, tenant_id: &str, model_id: &str) -> Result<Arc<dyn RerankModel>, DomainError> {
        let spec = self.spec_for(tenant_id, model_id, LlmType::Rerank).await?;
        self.models.rerank(&spec)
    }

    /// Adds spent tokens to the tenant's row for the model, if it has one.
    pub async fn record_usage(&self, tenant_id: &str, model_id: &str, tokens: u64) -> Result<(), DomainError> {
        let (name, factory) = split_model_id(model_id);
        let (tenant, wanted, fac) = (
            tenant_id.to_string(),
            name.to_string(),
            factory.map(str::to_string),
        );
        let row = self
            .repos
            .tenant_llms
            .find_one(&|r: &TenantLlm| {
                r.tenant_id == tenant
                    && r.llm_name == wanted
                    && fac.as_ref().is_none_or(|f| *f == r.llm_factory)
            })
            .await?;
        if let Some(row) = row {
            let tokens = i64::try_from(tokens).unwrap_or(i64::MAX);
            self.repos
                .tenant_llms
                .update(row.id(), &|r: &mut TenantLlm| {
                    r.used_tokens = r.used_tokens.saturating_add(tokens);
                })
                .await?;
        }
        Ok(())
    }
}
