use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

use super::common::{deep_merge, order_and_page, PageQuery};
use super::counters;
use super::file::{FileService, UploadedFile};
use super::task::TaskService;
use super::tenant::{TenantService, NO_AUTHORIZATION};
use crate::domain::naming::{extension, is_presentation, is_valid_url};
use crate::domain::ports::{
    index_name, BlobStore, ChunkFilter, ChunkStore, ChunkUpdate, PageFetcher, Repositories,
};
use crate::domain::{
    Document, DomainError, File, File2Document, FileType, Knowledgebase, ParserType, StatusEnum, TaskStatus,
    UserTenantRole,
};
use crate::infrastructure::parser;

pub const KB_NOT_FOUND: &str = "Can't find this knowledgebase!";
pub const DOC_NOT_FOUND: &str = "Document not found!";
pub const OWNER_ONLY: &str = "Only owner of knowledgebase authorized for this operation.";
pub const INVALID_URL: &str = "The URL format is invalid";

/// A blob with the content type it should be served as.
#[derive(Debug, Clone)]
pub struct Download {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Documents inside knowledge bases: upload, listing, parsing control and
/// removal, keeping chunks, counters, file mirrors and blobs consistent.
pub struct DocumentService {
    repos: Repositories,
    blobs: Arc<dyn BlobStore>,
    chunks: Arc<dyn ChunkStore>,
    files: Arc<FileService>,
    tasks: Arc<TaskService>,
    tenants: Arc<TenantService>,
    fetcher: Arc<dyn PageFetcher>,
}

impl DocumentService {
    pub fn new(
        repos: Repositories,
        blobs: Arc<dyn BlobStore>,
        chunks: Arc<dyn ChunkStore>,
        files: Arc<FileService>,
        tasks: Arc<TaskService>,
        tenants: Arc<TenantService>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        Self {
            repos,
            blobs,
            chunks,
            files,
            tasks,
            tenants,
            fetcher,
        }
    }

    pub async fn get(&self, doc_id: &str) -> Result<Document, DomainError> {
        self.repos
            .documents
            .get(doc_id)
            .await?
            .ok_or_else(|| DomainError::not_found(DOC_NOT_FOUND))
    }

    /// Rewrites only the fields `apply` touches on the stored row.
    async fn modify(
        &self,
        doc_id: &str,
        apply: &(dyn for<'a> Fn(&'a mut Document) + Send + Sync),
    ) -> Result<Document, DomainError> {
        self.repos
            .documents
            .update(doc_id, apply)
            .await?
            .ok_or_else(|| DomainError::not_found(DOC_NOT_FOUND))
    }

    async fn knowledgebase(&self, kb_id: &str) -> Result<Knowledgebase, DomainError> {
        self.repos
            .knowledgebases
            .get(kb_id)
            .await?
            .ok_or_else(|| DomainError::not_found(KB_NOT_FOUND))
    }

    pub async fn in_kb(&self, kb_id: &str) -> Result<Vec<Document>, DomainError> {
        let kb = kb_id.to_string();
        self.repos
            .documents
            .find(&|d: &Document| d.kb_id == kb)
            .await
    }

    pub async fn tenant_id(&self, doc: &Document) -> Result<String, DomainError> {
        self.repos
            .knowledgebases
            .get(&doc.kb_id)
            .await?
            .map(|kb| kb.tenant_id)
            .ok_or_else(|| DomainError::not_found("Tenant not found!"))
    }

    /// The user works in the tenant owning the document's knowledge base.
    pub async fn accessible(&self, doc_id: &str, user_id: &str) -> Result<bool, DomainError> {
        let Some(doc) = self.repos.documents.get(doc_id).await? else {
            return Ok(false);
        };
        let Some(kb) = self.repos.knowledgebases.get(&doc.kb_id).await? else {
            return Ok(false);
        };
        self.tenants.is_member(user_id, &kb.tenant_id).await
    }

    /// The user is the owner or a normal member of the tenant of whoever
    /// created the document's knowledge base.
    pub async fn accessible_for_deletion(
        &self,
        doc_id: &str,
        user_id: &str,
    ) -> Result<bool, DomainError> {
        let Some(doc) = self.repos.documents.get(doc_id).await? else {
            return Ok(false);
        };
        let Some(kb) = self.repos.knowledgebases.get(&doc.kb_id).await? else {
            return Ok(false);
        };
        Ok(self
            .tenants
            .membership(user_id, &kb.created_by)
            .await?
            .is_some_and(|ut| matches!(ut.role, UserTenantRole::Owner | UserTenantRole::Normal)))
    }

    async fn ensure_accessible(&self, doc_id: &str, user_id: &str) -> Result<(), DomainError> {
        if !self.accessible(doc_id, user_id).await? {
            return Err(DomainError::unauthorized(NO_AUTHORIZATION));
        }
        Ok(())
    }

    /// Deletes a document's chunks and row and takes it off the KB counters.
    #[instrument(skip(self, doc), fields(doc_id = %doc.id))]
    pub async fn remove_document(&self, doc: &Document, tenant_id: &str) -> Result<(), DomainError> {
        self.chunks
            .delete(&index_name(tenant_id), &ChunkFilter::doc(&doc.kb_id, &doc.id))
            .await?;
        counters::clear_chunk_num(&self.repos, doc).await?;
        self.repos.documents.delete(&doc.id).await?;
        Ok(())
    }

    /// Returns one error line per file that could not be stored.
    #[instrument(skip(self, files), fields(count = files.len()))]
    pub async fn upload(
        &self,
        user_id: &str,
        kb_id: &str,
        files: &[UploadedFile],
    ) -> Result<Vec<String>, DomainError> {
        let kb = self
            .repos
            .knowledgebases
            .get(kb_id)
            .await?
            .ok_or_else(|| DomainError::internal(KB_NOT_FOUND))?;
        let (errors, _) = self.files.upload_document(&kb, files, user_id).await?;
        Ok(errors)
    }

    /// Fetches a page and stores it as an HTML document.
    #[instrument(skip(self))]
    pub async fn web_crawl(
        &self,
        user_id: &str,
        kb_id: &str,
        name: &str,
        url: &str,
    ) -> Result<Document, DomainError> {
        if !is_valid_url(url) {
            return Err(DomainError::invalid_argument(INVALID_URL));
        }
        let kb = self
            .repos
            .knowledgebases
            .get(kb_id)
            .await?
            .ok_or_else(|| DomainError::internal(KB_NOT_FOUND))?;

        let page = self.fetcher.fetch(url).await.map_err(|e| {
            tracing::warn!(url, error = %e, "crawl fetch failed");
            DomainError::external("Download failure.")
        })?;
        if page.body.is_empty() {
            return Err(DomainError::external("Download failure."));
        }

        let kb_root = self.files.kb_root_folder(user_id).await?;
        let kb_folder = self.files.folder_in(&kb.tenant_id, &kb.name, &kb_root.id).await?;
        self.files
            .store_kb_document(&kb, &kb_folder.id, &format!("{name}.html"), &page.body, user_id)
            .await
    }

    /// Creates an empty virtual document.
    #[instrument(skip(self))]
    pub async fn create(&self, user_id: &str, kb_id: &str, name: &str) -> Result<Document, DomainError> {
        let kb = self.knowledgebase(kb_id).await?;
        let exists = self
            .in_kb(kb_id)
            .await?
            .into_iter()
            .any(|d| d.name == name);
        if exists {
            return Err(DomainError::conflict(
                "Duplicated document name in the same knowledgebase.",
            ));
        }

        let doc = Document::new(kb_id, name, FileType::Virtual, user_id)
            .with_parser(kb.parser_id.clone(), kb.parser_config.clone());
        counters::insert_document(&self.repos, &doc).await?;
        Ok(doc)
    }

    pub async fn list(
        &self,
        user_id: &str,
        kb_id: &str,
        keywords: &str,
        query: &PageQuery,
    ) -> Result<Value, DomainError> {
        let kb = self.repos.knowledgebases.get(kb_id).await?;
        let visible = match &kb {
            Some(kb) => self.tenants.is_member(user_id, &kb.tenant_id).await?,
            None => false,
        };
        if !visible {
            return Err(DomainError::not_permitted(OWNER_ONLY));
        }

        let keywords = keywords.to_lowercase();
        let rows: Vec<Value> = self
            .in_kb(kb_id)
            .await?
            .iter()
            .filter(|d| keywords.is_empty() || d.name.to_lowercase().contains(&keywords))
            .map(Document::to_json_with_thumbnail)
            .collect();
        let total = rows.len();

        Ok(json!({ "total": total, "docs": order_and_page(rows, query) }))
    }

    pub async fn infos(&self, user_id: &str, doc_ids: &[String]) -> Result<Vec<Value>, DomainError> {
        for doc_id in doc_ids {
            self.ensure_accessible(doc_id, user_id).await?;
        }
        let mut docs = Vec::with_capacity(doc_ids.len());
        for doc_id in doc_ids {
            if let Some(doc) = self.repos.documents.get(doc_id).await? {
                docs.push(doc.to_json_with_thumbnail());
            }
        }
        Ok(docs)
    }

    pub async fn thumbnails(
        &self,
        doc_ids: &[String],
    ) -> Result<BTreeMap<String, Option<String>>, DomainError> {
        let mut out = BTreeMap::new();
        for doc_id in doc_ids {
            if let Some(doc) = self.repos.documents.get(doc_id).await? {
                out.insert(doc.id.clone(), doc.thumbnail_url());
            }
        }
        Ok(out)
    }

    /// Enables or disables a document and its chunks in retrieval.
    #[instrument(skip(self))]
    pub async fn change_status(
        &self,
        user_id: &str,
        doc_id: &str,
        status: &str,
    ) -> Result<(), DomainError> {
        let enabled = match status {
            "1" => true,
            "0" => false,
            _ => {
                return Err(DomainError::invalid_argument(
                    "\"Status\" must be either 0 or 1!",
                ))
            }
        };
        self.ensure_accessible(doc_id, user_id).await?;
        let doc = self.get(doc_id).await?;
        let kb = self.knowledgebase(&doc.kb_id).await?;

        let status = if enabled {
            StatusEnum::Valid
        } else {
            StatusEnum::Invalid
        };
        self.modify(doc_id, &|doc: &mut Document| doc.status = status)
            .await?;
        self.chunks
            .update(
                &index_name(&kb.tenant_id),
                &ChunkFilter::doc(&doc.kb_id, &doc.id),
                &ChunkUpdate::SetAvailable(enabled),
            )
            .await?;
        Ok(())
    }

    /// Removes documents with their tasks, chunks, mirrors and blobs.
    /// Failures after a document was found are collected, not returned.
    #[instrument(skip(self))]
    pub async fn remove(&self, user_id: &str, doc_ids: &[String]) -> Result<Vec<String>, DomainError> {
        for doc_id in doc_ids {
            if !self.accessible_for_deletion(doc_id, user_id).await? {
                return Err(DomainError::unauthorized(NO_AUTHORIZATION));
            }
        }
        let root = self.files.root_folder(user_id).await?;
        self.files.init_knowledgebase_docs(&root.id, user_id).await?;

        let mut errors = Vec::new();
        for doc_id in doc_ids {
            let doc = self.get(doc_id).await?;
            let tenant_id = self.tenant_id(&doc).await?;
            if let Err(e) = self.purge(&doc, &tenant_id).await {
                tracing::warn!(doc_id = %doc.id, error = %e, "document removal failed");
                errors.push(e.to_string());
            }
        }
        Ok(errors)
    }

    async fn purge(&self, doc: &Document, tenant_id: &str) -> Result<(), DomainError> {
        let (bucket, name) = self.files.storage_address(doc).await?;
        self.tasks.delete_for_document(&doc.id).await?;
        self.remove_document(doc, tenant_id).await?;
        self.files.unlink_document(&doc.id).await?;
        if !name.is_empty() && self.blobs.exists(&bucket, &name).await? {
            self.blobs.remove(&bucket, &name).await?;
        }
        Ok(())
    }

    /// Starts, restarts or cancels parsing.
    #[instrument(skip(self))]
    pub async fn run(
        &self,
        user_id: &str,
        doc_ids: &[String],
        run: TaskStatus,
        delete: bool,
    ) -> Result<(), DomainError> {
        for doc_id in doc_ids {
            self.ensure_accessible(doc_id, user_id).await?;
        }

        for doc_id in doc_ids {
            let doc = self.get(doc_id).await?;
            let tenant_id = self.tenant_id(&doc).await?;

            if delete {
                self.tasks.delete_for_document(&doc.id).await?;
                let index = index_name(&tenant_id);
                if self.chunks.index_exists(&index).await? {
                    self.chunks
                        .delete(&index, &ChunkFilter::doc(&doc.kb_id, &doc.id))
                        .await?;
                }
                if doc.chunk_num != 0 || doc.token_num != 0 {
                    counters::increment_chunk_num(
                        &self.repos,
                        &doc.id,
                        &doc.kb_id,
                        -doc.token_num,
                        -doc.chunk_num,
                        0.0,
                    )
                    .await?;
                }
            }

            let doc = self
                .modify(doc_id, &|doc: &mut Document| {
                    doc.run = run;
                    doc.progress = 0.0;
                    if run == TaskStatus::Running && delete {
                        doc.progress_msg.clear();
                        doc.chunk_num = 0;
                        doc.token_num = 0;
                    }
                })
                .await?;

            if run == TaskStatus::Running {
                let kb = self.knowledgebase(&doc.kb_id).await?;
                let (bucket, name) = self.files.storage_address(&doc).await?;
                self.tasks.queue_tasks(&doc, &kb, &bucket, &name).await?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn rename(&self, user_id: &str, doc_id: &str, name: &str) -> Result<(), DomainError> {
        self.ensure_accessible(doc_id, user_id).await?;
        let doc = self.get(doc_id).await?;

        if extension(&name.to_lowercase()) != extension(&doc.name.to_lowercase()) {
            return Err(DomainError::invalid_argument(
                "The extension of file can't be changed",
            ));
        }
        if self.in_kb(&doc.kb_id).await?.iter().any(|d| d.name == name) {
            return Err(DomainError::conflict(
                "Duplicated document name in the same knowledgebase.",
            ));
        }

        self.modify(doc_id, &|doc: &mut Document| doc.name = name.to_string())
            .await?;

        let doc_id = doc.id.clone();
        let link = self
            .repos
            .file2documents
            .find_one(&|l: &File2Document| l.document_id == doc_id)
            .await?;
        if let Some(link) = link {
            self.repos
                .files
                .update(&link.file_id, &|file: &mut File| file.name = name.to_string())
                .await?;
        }
        Ok(())
    }

    pub async fn download(&self, doc_id: &str) -> Result<Download, DomainError> {
        let doc = self.get(doc_id).await?;
        let (bucket, name) = self.files.storage_address(&doc).await?;
        let data = self.blobs.get(&bucket, &name).await?;

        let ext = extension(&doc.name).trim_start_matches('.');
        let content_type = match (ext.is_empty(), doc.file_type) {
            (true, _) => "application/octet-stream".to_string(),
            (false, FileType::Visual) => format!("image/{ext}"),
            (false, _) => format!("application/{ext}"),
        };
        Ok(Download { content_type, data })
    }

    /// Switches the chunking method, dropping chunks built with the old one.
    #[instrument(skip(self, parser_config))]
    pub async fn change_parser(
        &self,
        user_id: &str,
        doc_id: &str,
        parser_id: &str,
        parser_config: Option<&Value>,
    ) -> Result<(), DomainError> {
        self.ensure_accessible(doc_id, user_id).await?;
        let doc = self.get(doc_id).await?;

        if doc.parser_id.eq_ignore_ascii_case(parser_id)
            && parser_config.is_none_or(|c| *c == doc.parser_config)
        {
            return Ok(());
        }

        let picture_only =
            doc.file_type == FileType::Visual && parser_id != ParserType::Picture.as_str();
        let presentation_only =
            is_presentation(&doc.name) && parser_id != ParserType::Presentation.as_str();
        if picture_only || presentation_only {
            return Err(DomainError::validation("Not supported yet!"));
        }

        self.modify(doc_id, &|updated: &mut Document| {
            updated.parser_id = parser_id.to_string();
            updated.progress = 0.0;
            updated.progress_msg.clear();
            updated.run = TaskStatus::Unstart;
            if let Some(config) = parser_config {
                deep_merge(&mut updated.parser_config, config);
            }
        })
        .await?;

        if doc.token_num > 0 {
            counters::increment_chunk_num(
                &self.repos,
                &doc.id,
                &doc.kb_id,
                -doc.token_num,
                -doc.chunk_num,
                -doc.process_duation,
            )
            .await?;
            let tenant_id = self.tenant_id(&doc).await?;
            let index = index_name(&tenant_id);
            if self.chunks.index_exists(&index).await? {
                self.chunks
                    .delete(&index, &ChunkFilter::doc(&doc.kb_id, &doc.id))
                    .await?;
            }
        }
        Ok(())
    }

    /// Serves `<bucket>-<name>` image ids.
    pub async fn image(&self, image_id: &str) -> Result<Download, DomainError> {
        let parts: Vec<&str> = image_id.split('-').collect();
        let [bucket, name] = parts.as_slice() else {
            return Err(DomainError::not_found("Image not found."));
        };
        let data = self.blobs.get(bucket, name).await?;
        Ok(Download {
            content_type: "image/JPEG".to_string(),
            data,
        })
    }

    /// Fetches a page and returns its text.
    pub async fn parse_url(&self, url: &str) -> Result<String, DomainError> {
        if !is_valid_url(url) {
            return Err(DomainError::invalid_argument(INVALID_URL));
        }
        let page = self.fetcher.fetch(url).await?;
        let body = String::from_utf8_lossy(&page.body);
        if page.is_html() {
            Ok(parser::html_to_text(&body))
        } else {
            Ok(body.into_owned())
        }
    }

    pub fn parse_files(&self, files: &[UploadedFile]) -> Result<String, DomainError> {
        self.files.parse_docs(files)
    }

    #[instrument(skip(self, meta))]
    pub async fn set_meta(&self, user_id: &str, doc_id: &str, meta: &str) -> Result<(), DomainError> {
        self.ensure_accessible(doc_id, user_id).await?;
        let meta: Value = serde_json::from_str(meta)
            .map_err(|e| DomainError::invalid_argument(format!("Json syntax error: {e}")))?;
        if !meta.is_object() {
            return Err(DomainError::invalid_argument(
                r#"Meta data should be in Json map format, like {"key": "value"}"#,
            ));
        }

        self.modify(doc_id, &|doc: &mut Document| doc.meta_fields = meta.clone())
            .await?;
        Ok(())
    }
}
