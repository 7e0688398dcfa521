use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::domain::{DomainError, Llm, LlmFactory};

pub const DEFAULT_CONFIG_PATH: &str = "config/ragflow.yaml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub metadata: MetadataConfig,
    pub storage: StorageConfig,
    pub doc_engine: DocEngineConfig,
    pub auth: AuthConfig,
    pub worker: WorkerConfig,
    pub progress: ProgressConfig,
    pub cors: CorsConfig,
    pub default_llm: DefaultLlmConfig,
    pub logging: LoggingConfig,
    pub limits: LimitsConfig,
    pub llm_catalog_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    /// Largest accepted request body, in bytes.
    pub max_content_length: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub backend: Backend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub root: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocEngine {
    Qdrant,
    Memory,
    Infinity,
}

impl DocEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qdrant => "qdrant",
            Self::Memory => "memory",
            Self::Infinity => "infinity",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocEngineConfig {
    pub kind: DocEngine,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub queue_name: String,
    pub heartbeat_interval_seconds: u64,
    pub embedding_batch_size: usize,
    pub default_chunk_token_num: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

/// Models a new tenant starts with, plus the server-side credentials used
/// for the built-in factory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DefaultLlmConfig {
    pub factory: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub rerank_model: String,
    pub asr_model: String,
    pub image2text_model: String,
    pub api_key: String,
    pub base_url: String,
}

/// Per-deployment caps. Zero means unlimited.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_file_num_per_user: usize,
    /// Hides the heavyweight local embedding/rerank models from `/llm/list`.
    pub lighten: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            redis: RedisConfig::default(),
            metadata: MetadataConfig::default(),
            storage: StorageConfig::default(),
            doc_engine: DocEngineConfig::default(),
            auth: AuthConfig::default(),
            worker: WorkerConfig::default(),
            progress: ProgressConfig::default(),
            cors: CorsConfig::default(),
            default_llm: DefaultLlmConfig::default(),
            logging: LoggingConfig::default(),
            limits: LimitsConfig::default(),
            llm_catalog_path: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9380,
            debug: false,
            max_content_length: 128 * 1024 * 1024,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Redis,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            root: PathBuf::from("data/storage"),
        }
    }
}

impl Default for DocEngineConfig {
    fn default() -> Self {
        Self {
            kind: DocEngine::Qdrant,
            url: "http://localhost:6334".to_string(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dev-secret-key".to_string(),
            token_ttl_hours: 24 * 7,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queue_name: super::queue::queues::TASK_QUEUE.to_string(),
            heartbeat_interval_seconds: 30,
            embedding_batch_size: 16,
            default_chunk_token_num: 128,
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 6,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
        }
    }
}

impl Default for DefaultLlmConfig {
    fn default() -> Self {
        Self {
            factory: "OpenAI".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            rerank_model: String::new(),
            asr_model: "whisper-1".to_string(),
            image2text_model: "gpt-4o-mini".to_string(),
            api_key: String::new(),
            base_url: String::new(),
        }
    }
}

impl DefaultLlmConfig {
    fn model_id(&self, name: &str) -> String {
        if name.is_empty() {
            String::new()
        } else {
            format!("{}@{}", name, self.factory)
        }
    }

    pub fn chat_id(&self) -> String {
        self.model_id(&self.chat_model)
    }

    pub fn embedding_id(&self) -> String {
        self.model_id(&self.embedding_model)
    }

    pub fn rerank_id(&self) -> String {
        self.model_id(&self.rerank_model)
    }

    pub fn asr_id(&self) -> String {
        self.model_id(&self.asr_model)
    }

    pub fn image2text_id(&self) -> String {
        self.model_id(&self.image2text_model)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            filter: "ragflow=info,api=info,worker=info,tower_http=info".to_string(),
        }
    }
}

/// Factories and models seeded into the catalog tables at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmCatalog {
    #[serde(default)]
    pub factories: Vec<CatalogFactory>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogFactory {
    #[serde(flatten)]
    pub factory: LlmFactory,
    #[serde(default)]
    pub llm: Vec<CatalogModel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogModel {
    pub llm_name: String,
    pub model_type: crate::domain::LlmType,
    #[serde(default)]
    pub max_tokens: Option<i64>,
    #[serde(default)]
    pub tags: String,
}

impl LlmCatalog {
    pub fn models(&self) -> Vec<Llm> {
        self.factories
            .iter()
            .flat_map(|f| {
                f.llm.iter().map(move |m| Llm {
                    llm_name: m.llm_name.clone(),
                    model_type: m.model_type,
                    fid: f.factory.name.clone(),
                    max_tokens: m.max_tokens.unwrap_or(8192),
                    tags: m.tags.clone(),
                    status: crate::domain::StatusEnum::Valid,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub config: Config,
    pub llm_catalog: LlmCatalog,
}

impl AppConfig {
    /// Reads the YAML config (missing file means defaults), applies
    /// environment overrides, then loads the model catalog.
    pub fn load() -> Result<Self, DomainError> {
        let path = std::env::var("RAGFLOW_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self, DomainError> {
        let mut config: Config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| DomainError::internal(format!("read {}: {e}", path.display())))?;
            serde_yaml::from_str(&raw)
                .map_err(|e| DomainError::validation(format!("parse {}: {e}", path.display())))?
        } else {
            Config::default()
        };
        config.apply_env();

        let catalog_path = config.llm_catalog_path.clone().unwrap_or_else(|| {
            path.parent()
                .unwrap_or_else(|| Path::new("."))
                .join("llm_factories.yaml")
        });
        let llm_catalog = if catalog_path.exists() {
            let raw = std::fs::read_to_string(&catalog_path).map_err(|e| {
                DomainError::internal(format!("read {}: {e}", catalog_path.display()))
            })?;
            serde_yaml::from_str(&raw).map_err(|e| {
                DomainError::validation(format!("parse {}: {e}", catalog_path.display()))
            })?
        } else {
            tracing::warn!(path = %catalog_path.display(), "LLM catalog not found, starting empty");
            LlmCatalog::default()
        };

        Ok(Self {
            config,
            llm_catalog,
        })
    }
}

impl Config {
    fn apply_env(&mut self) {
        let var = |k: &str| std::env::var(k).ok().filter(|v| !v.is_empty());

        if let Some(v) = var("REDIS_URL") {
            self.redis.url = v;
        }
        if let Some(v) = var("QDRANT_URL") {
            self.doc_engine.url = v;
        }
        if let Some(v) = var("DOC_ENGINE") {
            match v.to_lowercase().as_str() {
                "qdrant" => self.doc_engine.kind = DocEngine::Qdrant,
                "memory" => self.doc_engine.kind = DocEngine::Memory,
                "infinity" => self.doc_engine.kind = DocEngine::Infinity,
                other => tracing::warn!(value = other, "ignoring unknown DOC_ENGINE"),
            }
        }
        if let Some(v) = var("METADATA_BACKEND") {
            match v.to_lowercase().as_str() {
                "redis" => self.metadata.backend = Backend::Redis,
                "memory" => self.metadata.backend = Backend::Memory,
                other => tracing::warn!(value = other, "ignoring unknown METADATA_BACKEND"),
            }
        }
        if let Some(v) = var("SERVER_HOST") {
            self.server.host = v;
        }
        if let Some(port) = var("SERVER_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(n) = var("MAX_CONTENT_LENGTH").and_then(|v| v.parse().ok()) {
            self.server.max_content_length = n;
        }
        if let Some(v) = var("JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        if let Some(v) = var("STORAGE_ROOT") {
            self.storage.root = PathBuf::from(v);
        }
        if let Some(n) = var("WORKER_CONCURRENCY").and_then(|v| v.parse().ok()) {
            self.worker.concurrency = n;
        }
        if let Some(v) = var("LOG_FORMAT") {
            self.logging.format = if v.eq_ignore_ascii_case("json") {
                LogFormat::Json
            } else {
                LogFormat::Text
            };
        }
        if let Some(n) = var("MAX_FILE_NUM_PER_USER").and_then(|v| v.parse().ok()) {
            self.limits.max_file_num_per_user = n;
        }
        if let Some(v) = var("LIGHTEN") {
            self.limits.lighten = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = var("DEFAULT_LLM_API_KEY") {
            self.default_llm.api_key = v;
        }
    }
}
