use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

use super::common::{merge_fields, order_and_page, PageQuery};
use super::document::{DocumentService, KB_NOT_FOUND, OWNER_ONLY};
use super::file::FileService;
use super::llm::LlmService;
use super::tenant::{TenantService, NO_AUTHORIZATION};
use crate::domain::naming::duplicate_name;
use crate::domain::ports::{index_name, ChunkFilter, ChunkStore, ChunkUpdate, Repositories};
use crate::domain::{
    trim_graph, DomainError, File, FileSource, Knowledgebase, ParserType, Permission,
    DATASET_NAME_LIMIT,
};

/// Upper bound on chunks scanned when aggregating tags.
const TAG_SCAN_LIMIT: usize = 10_000;

/// Request keys that never overwrite stored knowledge-base fields. The
/// totals are kept by the counters.
const PROTECTED_FIELDS: [&str; 6] = ["id", "tenant_id", "created_by", "doc_num", "token_num", "chunk_num"];

pub struct KnowledgebaseService {
    repos: Repositories,
    chunks: Arc<dyn ChunkStore>,
    documents: Arc<DocumentService>,
    files: Arc<FileService>,
    tenants: Arc<TenantService>,
    llms: Arc<LlmService>,
    doc_engine: String,
}

impl KnowledgebaseService {
    pub fn new(
        repos: Repositories,
        chunks: Arc<dyn ChunkStore>,
        documents: Arc<DocumentService>,
        files: Arc<FileService>,
        tenants: Arc<TenantService>,
        llms: Arc<LlmService>,
        doc_engine: String,
    ) -> Self {
        Self {
            repos,
            chunks,
            documents,
            files,
            tenants,
            llms,
            doc_engine,
        }
    }

    pub async fn get(&self, kb_id: &str) -> Result<Option<Knowledgebase>, DomainError> {
        self.repos.knowledgebases.get(kb_id).await
    }

    async fn valid_in_tenant(&self, tenant_id: &str) -> Result<Vec<Knowledgebase>, DomainError> {
        let tenant = tenant_id.to_string();
        self.repos
            .knowledgebases
            .find(&|kb: &Knowledgebase| kb.tenant_id == tenant && kb.is_valid())
            .await
    }

    /// Members of the owning tenant may read the knowledge base.
    pub async fn accessible(&self, kb_id: &str, user_id: &str) -> Result<bool, DomainError> {
        match self.get(kb_id).await? {
            Some(kb) => self.tenants.is_member(user_id, &kb.tenant_id).await,
            None => Ok(false),
        }
    }

    /// Only the creator may change or delete it.
    async fn owned(&self, kb_id: &str, user_id: &str) -> Result<Knowledgebase, DomainError> {
        let kb = self
            .get(kb_id)
            .await?
            .filter(|kb| kb.created_by == user_id)
            .ok_or_else(|| DomainError::unauthorized(NO_AUTHORIZATION))?;
        Ok(kb)
    }

    fn validated_name(fields: &Map<String, Value>) -> Result<String, DomainError> {
        let name = fields
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| DomainError::validation("Dataset name must be string."))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("Dataset name can't be empty."));
        }
        let len = name.chars().count();
        if len >= DATASET_NAME_LIMIT {
            return Err(DomainError::validation(format!(
                "Dataset name length is {len} which is large than {DATASET_NAME_LIMIT}"
            )));
        }
        Ok(name.to_string())
    }

    /// An embedding model the tenant can resolve. Stored vectors pin the
    /// model once the knowledge base has chunks.
    async fn validated_embd_id(&self, kb: &Knowledgebase, value: &Value) -> Result<String, DomainError> {
        let embd_id = value.as_str().map(str::trim).unwrap_or_default();
        if embd_id.is_empty() {
            return Err(DomainError::invalid_argument(
                "Embedding model identifier must be a non-empty string.",
            ));
        }
        if embd_id == kb.embd_id {
            return Ok(embd_id.to_string());
        }
        if kb.chunk_num > 0 {
            return Err(DomainError::validation(
                "If chunk count is not 0, embedding model can't be changed.",
            ));
        }
        self.llms.embedding_model(&kb.tenant_id, embd_id).await?;
        Ok(embd_id.to_string())
    }

    fn without_protected(fields: &Map<String, Value>, extra: &[&str]) -> Map<String, Value> {
        fields
            .iter()
            .filter(|(k, _)| !PROTECTED_FIELDS.contains(&k.as_str()) && !extra.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Creates a knowledge base in the user's own tenant. Returns its id.
    #[instrument(skip(self, fields))]
    pub async fn create(&self, user_id: &str, fields: &Map<String, Value>) -> Result<String, DomainError> {
        let name = Self::validated_name(fields)?;
        let taken: Vec<String> = self
            .valid_in_tenant(user_id)
            .await?
            .into_iter()
            .map(|kb| kb.name)
            .collect();
        let name = duplicate_name(&name, |n| taken.iter().any(|t| t == n));

        let tenant = self
            .repos
            .tenants
            .get(user_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Tenant not found."))?;

        let rest = Self::without_protected(fields, &["name", "embd_id"]);
        let mut kb: Knowledgebase = merge_fields(
            &Knowledgebase::new(user_id, &name, &tenant.embd_id, user_id),
            &rest,
        )?;
        kb.name = name;
        self.repos.knowledgebases.save(&kb).await?;

        tracing::info!(kb_id = %kb.id, tenant_id = user_id, "knowledge base created");
        Ok(kb.id)
    }

    #[instrument(skip(self, fields))]
    pub async fn update(
        &self,
        user_id: &str,
        kb_id: &str,
        fields: &Map<String, Value>,
    ) -> Result<Value, DomainError> {
        let kb = self
            .get(kb_id)
            .await?
            .filter(|kb| kb.created_by == user_id)
            .ok_or_else(|| DomainError::unauthorized(NO_AUTHORIZATION))?;
        if kb.tenant_id != user_id {
            return Err(DomainError::not_permitted(OWNER_ONLY));
        }

        let mut fields = Self::without_protected(fields, &["kb_id"]);
        if let Some(Value::String(name)) = fields.get("name") {
            let trimmed = name.trim().to_string();
            fields.insert("name".to_string(), Value::String(trimmed));
        }

        if let Some(embd_id) = fields.get("embd_id") {
            let embd_id = self.validated_embd_id(&kb, embd_id).await?;
            fields.insert("embd_id".to_string(), Value::String(embd_id));
        }

        let parser_id = fields.get("parser_id").and_then(Value::as_str).unwrap_or_default();
        if parser_id == ParserType::Tag.as_str() && self.doc_engine == "infinity" {
            return Err(DomainError::not_permitted(
                "The chunk method Tag has not been supported by Infinity yet.",
            ));
        }

        if let Some(name) = fields.get("name").and_then(Value::as_str) {
            if name.to_lowercase() != kb.name.to_lowercase() {
                let clashes = self
                    .valid_in_tenant(user_id)
                    .await?
                    .iter()
                    .filter(|other| other.name == name)
                    .count();
                if clashes > 1 {
                    return Err(DomainError::conflict("Duplicated knowledgebase name."));
                }
            }
        }

        merge_fields(&kb, &fields)?;
        let updated = self
            .repos
            .knowledgebases
            .update(kb_id, &|row: &mut Knowledgebase| {
                if let Ok(merged) = merge_fields(&*row, &fields) {
                    *row = merged;
                }
            })
            .await?
            .ok_or_else(|| DomainError::not_found(KB_NOT_FOUND))?;

        if updated.pagerank != kb.pagerank {
            let index = index_name(&kb.tenant_id);
            if updated.pagerank > 0 {
                self.chunks
                    .update(&index, &ChunkFilter::kb(&kb.id), &ChunkUpdate::SetPagerank(updated.pagerank))
                    .await?;
            } else {
                self.chunks
                    .update(
                        &index,
                        &ChunkFilter::kb(&kb.id).with_pagerank(),
                        &ChunkUpdate::RemovePagerank,
                    )
                    .await?;
            }
        }

        let mut out = serde_json::to_value(&updated)?;
        if let Some(obj) = out.as_object_mut() {
            for (k, v) in fields {
                obj.entry(k).or_insert(v);
            }
        }
        Ok(out)
    }

    pub async fn detail(&self, user_id: &str, kb_id: &str) -> Result<Value, DomainError> {
        let kb = self.get(kb_id).await?;
        let visible = match &kb {
            Some(kb) => self.tenants.is_member(user_id, &kb.tenant_id).await?,
            None => false,
        };
        if !visible {
            return Err(DomainError::not_permitted(OWNER_ONLY));
        }
        let kb = kb.ok_or_else(|| DomainError::not_found(KB_NOT_FOUND))?;
        Ok(serde_json::to_value(kb)?)
    }

    /// Knowledge bases of the user's own tenant plus team-shared ones of
    /// tenants they joined.
    pub async fn list(
        &self,
        user_id: &str,
        keywords: &str,
        parser_id: Option<&str>,
        query: &PageQuery,
    ) -> Result<Value, DomainError> {
        let joined = self.tenants.member_tenant_ids(user_id).await?;
        let user = user_id.to_string();
        let keywords = keywords.to_lowercase();
        let parser = parser_id.filter(|p| !p.is_empty()).map(str::to_string);

        let kbs = self
            .repos
            .knowledgebases
            .find(&|kb: &Knowledgebase| {
                let visible = kb.tenant_id == user
                    || (joined.contains(&kb.tenant_id) && kb.permission == Permission::Team);
                visible
                    && kb.is_valid()
                    && (keywords.is_empty() || kb.name.to_lowercase().contains(&keywords))
                    && parser.as_ref().is_none_or(|p| *p == kb.parser_id)
            })
            .await?;

        let mut rows = Vec::with_capacity(kbs.len());
        for kb in kbs {
            let owner = self.repos.users.get(&kb.tenant_id).await?;
            let mut row = serde_json::to_value(&kb)?;
            if let Some(obj) = row.as_object_mut() {
                obj.insert("nickname".into(), json!(owner.as_ref().map(|u| &u.nickname)));
                obj.insert(
                    "tenant_avatar".into(),
                    json!(owner.as_ref().and_then(|u| u.avatar.as_ref())),
                );
            }
            rows.push(row);
        }
        let total = rows.len();
        Ok(json!({ "kbs": order_and_page(rows, query), "total": total }))
    }

    /// Deletes a knowledge base with every document, mirror entry and chunk.
    #[instrument(skip(self))]
    pub async fn rm(&self, user_id: &str, kb_id: &str) -> Result<(), DomainError> {
        let kb = self.owned(kb_id, user_id).await?;
        if kb.tenant_id != user_id {
            return Err(DomainError::not_permitted(OWNER_ONLY));
        }

        for doc in self.documents.in_kb(&kb.id).await? {
            self.documents
                .remove_document(&doc, &kb.tenant_id)
                .await
                .map_err(|e| DomainError::internal(format!("Database error (Document removal)! {e}")))?;
            self.files.unlink_document(&doc.id).await?;
        }

        let (tenant, name) = (kb.tenant_id.clone(), kb.name.clone());
        self.repos
            .files
            .delete_where(&|f: &File| {
                f.tenant_id == tenant
                    && f.name == name
                    && f.is_folder()
                    && f.source_type == FileSource::Knowledgebase
            })
            .await?;

        if !self.repos.knowledgebases.delete(&kb.id).await? {
            return Err(DomainError::internal("Database error (Knowledgebase removal)!"));
        }

        let index = index_name(&kb.tenant_id);
        self.chunks.delete(&index, &ChunkFilter::kb(&kb.id)).await?;
        self.chunks.delete_index(&index, &kb.id).await?;

        tracing::info!(kb_id = %kb.id, "knowledge base removed");
        Ok(())
    }

    /// Tag frequencies over the chunks of the given knowledge bases.
    pub async fn tags(
        &self,
        user_id: &str,
        kb_ids: &[String],
    ) -> Result<BTreeMap<String, u64>, DomainError> {
        let mut counts = BTreeMap::new();
        for kb_id in kb_ids {
            if !self.accessible(kb_id, user_id).await? {
                return Err(DomainError::unauthorized(NO_AUTHORIZATION));
            }
            let Some(kb) = self.get(kb_id).await? else {
                continue;
            };
            let hits = self
                .chunks
                .search(&index_name(&kb.tenant_id), None, &ChunkFilter::kb(kb_id), TAG_SCAN_LIMIT)
                .await?;
            for hit in hits {
                for tag in hit.chunk.tag_kwd {
                    *counts.entry(tag).or_insert(0) += 1;
                }
            }
        }
        Ok(counts)
    }

    async fn accessible_kb(&self, user_id: &str, kb_id: &str) -> Result<Knowledgebase, DomainError> {
        if !self.accessible(kb_id, user_id).await? {
            return Err(DomainError::unauthorized(NO_AUTHORIZATION));
        }
        self.get(kb_id)
            .await?
            .ok_or_else(|| DomainError::not_found(KB_NOT_FOUND))
    }

    #[instrument(skip(self))]
    pub async fn rm_tags(&self, user_id: &str, kb_id: &str, tags: &[String]) -> Result<(), DomainError> {
        let kb = self.accessible_kb(user_id, kb_id).await?;
        let index = index_name(&kb.tenant_id);
        for tag in tags {
            self.chunks
                .update(
                    &index,
                    &ChunkFilter::kb(kb_id).with_tag(tag),
                    &ChunkUpdate::RemoveTag(tag.clone()),
                )
                .await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn rename_tag(
        &self,
        user_id: &str,
        kb_id: &str,
        from: &str,
        to: &str,
    ) -> Result<(), DomainError> {
        let kb = self.accessible_kb(user_id, kb_id).await?;
        let from = from.trim();
        self.chunks
            .update(
                &index_name(&kb.tenant_id),
                &ChunkFilter::kb(kb_id).with_tag(from),
                &ChunkUpdate::RenameTag {
                    from: from.to_string(),
                    to: to.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    /// The stored knowledge graph, trimmed for display.
    pub async fn knowledge_graph(&self, user_id: &str, kb_id: &str) -> Result<Value, DomainError> {
        let kb = self.accessible_kb(user_id, kb_id).await?;
        let mut out = json!({ "graph": {}, "mind_map": {} });

        let index = index_name(&kb.tenant_id);
        if !self.chunks.index_exists(&index).await? {
            return Ok(out);
        }
        let hits = self
            .chunks
            .search(&index, None, &ChunkFilter::kb(kb_id).with_graph("graph"), 1)
            .await?;
        let Some(hit) = hits.into_iter().next() else {
            return Ok(out);
        };

        match serde_json::from_str::<Value>(&hit.chunk.content_with_weight) {
            Ok(mut graph) => {
                trim_graph(&mut graph);
                out["graph"] = graph;
            }
            Err(e) => tracing::warn!(kb_id, error = %e, "stored graph is not valid JSON"),
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::testing;
    use crate::application::{Backends, Services, Settings};
    use crate::domain::{DocumentChunk, Embedding, UserTenantRole};
    use crate::application::UploadedFile;

    fn services(b: &Backends) -> Services {
        Services::new(b.clone(), Settings::default())
    }

    fn fields(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_create_validates_and_dedups_name() {
        let b = testing::backends();
        let s = services(&b);
        testing::owner(&b, "t1").await;

        let err = s.knowledgebases.create("t1", &fields(json!({"name": 3}))).await.unwrap_err();
        assert_eq!(err.to_string(), "Dataset name must be string.");
        let err = s.knowledgebases.create("t1", &fields(json!({"name": "  "}))).await.unwrap_err();
        assert_eq!(err.to_string(), "Dataset name can't be empty.");
        let long = "x".repeat(130);
        let err = s.knowledgebases.create("t1", &fields(json!({"name": long}))).await.unwrap_err();
        assert_eq!(err.to_string(), "Dataset name length is 130 which is large than 128");

        let first = s
            .knowledgebases
            .create("t1", &fields(json!({"name": " docs ", "description": "d"})))
            .await
            .unwrap();
        let second = s
            .knowledgebases
            .create("t1", &fields(json!({"name": "docs"})))
            .await
            .unwrap();

        let first = s.knowledgebases.get(&first).await.unwrap().unwrap();
        let second = s.knowledgebases.get(&second).await.unwrap().unwrap();
        assert_eq!(first.name, "docs");
        assert_eq!(first.description.as_deref(), Some("d"));
        assert_eq!(first.embd_id, "embed@Test");
        assert_eq!(second.name, "docs(1)");
    }

    #[tokio::test]
    async fn test_create_without_tenant() {
        let b = testing::backends();
        let s = services(&b);
        let err = s
            .knowledgebases
            .create("ghost", &fields(json!({"name": "kb"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Tenant not found.");
    }

    #[tokio::test]
    async fn test_update_checks_owner_and_pagerank() {
        let b = testing::backends();
        let s = services(&b);
        let kb = testing::knowledgebase(&b, "t1", "kb").await;
        testing::owner(&b, "t2").await;
        let doc = crate::domain::Document::new(&kb.id, "a.txt", crate::domain::FileType::Doc, "t1");
        b.chunks
            .upsert(
                &index_name("t1"),
                &[(DocumentChunk::new(&doc, "text", 0), Embedding::new(vec![1.0]))],
            )
            .await
            .unwrap();

        let err = s
            .knowledgebases
            .update("t2", &kb.id, &fields(json!({"name": "x"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), NO_AUTHORIZATION);

        let out = s
            .knowledgebases
            .update("t1", &kb.id, &fields(json!({"kb_id": kb.id, "name": " renamed ", "pagerank": 7})))
            .await
            .unwrap();
        assert_eq!(out["name"], "renamed");
        let hits = b
            .chunks
            .search(&index_name("t1"), None, &ChunkFilter::kb(&kb.id).with_pagerank(), 10)
            .await
            .unwrap();
        assert_eq!(hits[0].chunk.pagerank_fea, Some(7));

        s.knowledgebases
            .update("t1", &kb.id, &fields(json!({"pagerank": 0})))
            .await
            .unwrap();
        let hits = b
            .chunks
            .search(&index_name("t1"), None, &ChunkFilter::kb(&kb.id).with_pagerank(), 10)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_update_switches_embedding_model() {
        let b = testing::backends();
        let s = services(&b);
        let kb = testing::knowledgebase(&b, "t1", "kb").await;
        let mut large = crate::domain::TenantLlm::new("t1", "Test", "embed-large", crate::domain::LlmType::Embedding);
        large.api_key = Some("test-key".to_string());
        b.repos.tenant_llms.save(&large).await.unwrap();

        let err = s
            .knowledgebases
            .update("t1", &kb.id, &fields(json!({"embd_id": ""})))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(_)));
        let err = s
            .knowledgebases
            .update("t1", &kb.id, &fields(json!({"embd_id": "ghost@Elsewhere"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Model(ghost@Elsewhere) not authorized");

        let out = s
            .knowledgebases
            .update("t1", &kb.id, &fields(json!({"embd_id": "embed-large@Test"})))
            .await
            .unwrap();
        assert_eq!(out["embd_id"], "embed-large@Test");
        let stored = s.knowledgebases.get(&kb.id).await.unwrap().unwrap();
        assert_eq!(stored.embd_id, "embed-large@Test");

        b.repos
            .knowledgebases
            .update(&kb.id, &|kb: &mut Knowledgebase| kb.chunk_num = 3)
            .await
            .unwrap();
        let err = s
            .knowledgebases
            .update("t1", &kb.id, &fields(json!({"embd_id": "embed@Test"})))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "If chunk count is not 0, embedding model can't be changed.");
    }

    #[tokio::test]
    async fn test_update_leaves_counters_alone() {
        let b = testing::backends();
        let s = services(&b);
        let kb = testing::knowledgebase(&b, "t1", "kb").await;
        b.repos
            .knowledgebases
            .update(&kb.id, &|kb: &mut Knowledgebase| {
                kb.doc_num = 2;
                kb.chunk_num = 9;
            })
            .await
            .unwrap();

        s.knowledgebases
            .update("t1", &kb.id, &fields(json!({"description": "d", "chunk_num": 0, "doc_num": 0})))
            .await
            .unwrap();
        let stored = s.knowledgebases.get(&kb.id).await.unwrap().unwrap();
        assert_eq!(stored.description.as_deref(), Some("d"));
        assert_eq!((stored.doc_num, stored.chunk_num), (2, 9));
    }

    #[tokio::test]
    async fn test_update_rejects_tag_on_infinity() {
        let b = testing::backends();
        let settings = Settings {
            doc_engine: "infinity".to_string(),
            ..Settings::default()
        };
        let s = Services::new(b.clone(), settings);
        let kb = testing::knowledgebase(&b, "t1", "kb").await;

        let err = s
            .knowledgebases
            .update("t1", &kb.id, &fields(json!({"parser_id": "tag"})))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotPermitted(_)));
    }

    #[tokio::test]
    async fn test_list_shows_own_and_team_kbs() {
        let b = testing::backends();
        let s = services(&b);
        testing::knowledgebase(&b, "bob", "bob-private").await;
        let mut shared = testing::knowledgebase(&b, "bob", "bob-team").await;
        shared.permission = Permission::Team;
        b.repos.knowledgebases.save(&shared).await.unwrap();
        testing::knowledgebase(&b, "alice", "alice-own").await;
        testing::join(&b, "alice", "bob", UserTenantRole::Normal).await;

        let query = PageQuery::new(1, 150, "create_time", true);
        let listed = s.knowledgebases.list("alice", "", None, &query).await.unwrap();
        assert_eq!(listed["total"], 2);
        let names: Vec<&str> = listed["kbs"]
            .as_array()
            .unwrap()
            .iter()
            .map(|k| k["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"bob-team"));
        assert!(!names.contains(&"bob-private"));

        let team = listed["kbs"].as_array().unwrap().iter().find(|k| k["name"] == "bob-team").unwrap();
        assert_eq!(team["nickname"], "bob");

        let filtered = s.knowledgebases.list("alice", "ALICE", None, &query).await.unwrap();
        assert_eq!(filtered["total"], 1);
    }

    #[tokio::test]
    async fn test_detail_requires_membership() {
        let b = testing::backends();
        let s = services(&b);
        let kb = testing::knowledgebase(&b, "t1", "kb").await;
        testing::owner(&b, "t2").await;

        assert_eq!(s.knowledgebases.detail("t1", &kb.id).await.unwrap()["name"], "kb");
        let err = s.knowledgebases.detail("t2", &kb.id).await.unwrap_err();
        assert_eq!(err.to_string(), OWNER_ONLY);
    }

    #[tokio::test]
    async fn test_rm_removes_documents_and_folder() {
        let b = testing::backends();
        let s = services(&b);
        let kb = testing::knowledgebase(&b, "t1", "kb").await;
        s.documents
            .upload("t1", &kb.id, &[UploadedFile::new("a.txt", "hello")])
            .await
            .unwrap();

        s.knowledgebases.rm("t1", &kb.id).await.unwrap();

        assert!(s.knowledgebases.get(&kb.id).await.unwrap().is_none());
        assert!(b.repos.documents.list().await.unwrap().is_empty());
        let files = b.repos.files.list().await.unwrap();
        assert!(files.iter().all(|f| f.name != "kb" && f.name != "a.txt"));
    }

    #[tokio::test]
    async fn test_tags_and_rename() {
        let b = testing::backends();
        let s = services(&b);
        let kb = testing::knowledgebase(&b, "t1", "kb").await;
        let doc = crate::domain::Document::new(&kb.id, "a.txt", crate::domain::FileType::Doc, "t1");
        let mut one = DocumentChunk::new(&doc, "one", 0);
        one.tag_kwd = vec!["rust".into(), "db".into()];
        let mut two = DocumentChunk::new(&doc, "two", 1);
        two.tag_kwd = vec!["rust".into()];
        b.chunks
            .upsert(
                &index_name("t1"),
                &[(one, Embedding::new(vec![1.0])), (two, Embedding::new(vec![1.0]))],
            )
            .await
            .unwrap();

        let tags = s.knowledgebases.tags("t1", &[kb.id.clone()]).await.unwrap();
        assert_eq!(tags.get("rust"), Some(&2));
        assert_eq!(tags.get("db"), Some(&1));

        s.knowledgebases.rename_tag("t1", &kb.id, " rust ", "lang").await.unwrap();
        s.knowledgebases.rm_tags("t1", &kb.id, &["db".to_string()]).await.unwrap();
        let tags = s.knowledgebases.tags("t1", &[kb.id.clone()]).await.unwrap();
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec![("lang".to_string(), 2)]);

        testing::owner(&b, "t2").await;
        let err = s.knowledgebases.tags("t2", &[kb.id]).await.unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_knowledge_graph_empty_and_stored() {
        let b = testing::backends();
        let s = services(&b);
        let kb = testing::knowledgebase(&b, "t1", "kb").await;

        let empty = s.knowledgebases.knowledge_graph("t1", &kb.id).await.unwrap();
        assert_eq!(empty, json!({"graph": {}, "mind_map": {}}));

        let doc = crate::domain::Document::new(&kb.id, "g", crate::domain::FileType::Virtual, "t1");
        let graph = json!({
            "nodes": [{"id": "a", "pagerank": 0.2}, {"id": "b", "pagerank": 0.9}],
            "edges": [
                {"source": "a", "target": "b", "weight": 1.0},
                {"source": "a", "target": "a", "weight": 5.0}
            ]
        });
        let mut chunk = DocumentChunk::new(&doc, graph.to_string(), 0);
        chunk.knowledge_graph_kwd = Some("graph".into());
        b.chunks
            .upsert(&index_name("t1"), &[(chunk, Embedding::new(vec![1.0]))])
            .await
            .unwrap();

        let out = s.knowledgebases.knowledge_graph("t1", &kb.id).await.unwrap();
        assert_eq!(out["graph"]["nodes"][0]["id"], "b");
        assert_eq!(out["graph"]["edges"].as_array().unwrap().len(), 1);
    }
}
