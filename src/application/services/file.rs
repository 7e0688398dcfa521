use serde_json::{json, Value};
use std::sync::Arc;
use tracing::instrument;

use super::common::{order_and_page, PageQuery};
use super::counters;
use crate::domain::naming::{duplicate_name, filename_type, parser_for};
use crate::domain::ports::{BlobStore, Repositories};
use crate::domain::{
    Document, DomainError, File, File2Document, FileSource, FileType, Knowledgebase,
    KNOWLEDGEBASE_FOLDER_NAME, ROOT_FOLDER_NAME,
};
use crate::infrastructure::parser;

/// One part of a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }
}

/// The per-tenant file manager tree and its bridge to knowledge bases.
///
/// Every tenant has a root folder `/`. Documents living in a knowledge base
/// are mirrored as entries under `/.knowledgebase/<kb name>/`.
pub struct FileService {
    repos: Repositories,
    blobs: Arc<dyn BlobStore>,
    max_file_num_per_user: usize,
}

impl FileService {
    pub fn new(repos: Repositories, blobs: Arc<dyn BlobStore>, max_file_num_per_user: usize) -> Self {
        Self {
            repos,
            blobs,
            max_file_num_per_user,
        }
    }

    pub async fn get(&self, file_id: &str) -> Result<Option<File>, DomainError> {
        self.repos.files.get(file_id).await
    }

    #[instrument(skip(self))]
    pub async fn root_folder(&self, tenant_id: &str) -> Result<File, DomainError> {
        let tenant = tenant_id.to_string();
        if let Some(root) = self
            .repos
            .files
            .find_one(&|f: &File| f.tenant_id == tenant && f.is_root())
            .await?
        {
            return Ok(root);
        }

        let root = File::folder(None, tenant_id, ROOT_FOLDER_NAME, FileSource::Local);
        self.repos.files.save(&root).await?;
        tracing::info!(tenant_id, folder_id = %root.id, "root folder created");
        Ok(root)
    }

    async fn child_named(&self, parent_id: &str, name: &str) -> Result<Option<File>, DomainError> {
        let (parent, name) = (parent_id.to_string(), name.to_string());
        self.repos
            .files
            .find_one(&|f: &File| f.parent_id == parent && f.name == name && f.id != parent)
            .await
    }

    pub async fn children(&self, parent_id: &str) -> Result<Vec<File>, DomainError> {
        let parent = parent_id.to_string();
        self.repos
            .files
            .find(&|f: &File| f.parent_id == parent && f.id != parent)
            .await
    }

    /// Folder `name` under `parent_id`, created with knowledge-base source
    /// when missing.
    pub async fn folder_in(
        &self,
        tenant_id: &str,
        name: &str,
        parent_id: &str,
    ) -> Result<File, DomainError> {
        if let Some(folder) = self.child_named(parent_id, name).await? {
            return Ok(folder);
        }
        let folder = File::folder(Some(parent_id), tenant_id, name, FileSource::Knowledgebase);
        self.repos.files.save(&folder).await?;
        Ok(folder)
    }

    /// Creates `/.knowledgebase` on first use and mirrors every existing
    /// knowledge base document into it.
    #[instrument(skip(self))]
    pub async fn init_knowledgebase_docs(
        &self,
        root_id: &str,
        tenant_id: &str,
    ) -> Result<(), DomainError> {
        if self.child_named(root_id, KNOWLEDGEBASE_FOLDER_NAME).await?.is_some() {
            return Ok(());
        }

        let kb_root = self
            .folder_in(tenant_id, KNOWLEDGEBASE_FOLDER_NAME, root_id)
            .await?;
        let tenant = tenant_id.to_string();
        let kbs = self
            .repos
            .knowledgebases
            .find(&|kb: &Knowledgebase| kb.tenant_id == tenant && kb.is_valid())
            .await?;
        for kb in kbs {
            let kb_folder = self.folder_in(tenant_id, &kb.name, &kb_root.id).await?;
            let kb_id = kb.id.clone();
            let docs = self
                .repos
                .documents
                .find(&|d: &Document| d.kb_id == kb_id)
                .await?;
            for doc in docs {
                self.add_file_from_kb(&doc, &kb_folder.id, tenant_id).await?;
            }
        }
        Ok(())
    }

    pub async fn kb_root_folder(&self, tenant_id: &str) -> Result<File, DomainError> {
        let root = self.root_folder(tenant_id).await?;
        self.init_knowledgebase_docs(&root.id, tenant_id).await?;
        self.child_named(&root.id, KNOWLEDGEBASE_FOLDER_NAME)
            .await?
            .ok_or_else(|| DomainError::internal("knowledge base folder missing"))
    }

    /// Mirrors `doc` as a file entry unless it is already linked.
    pub async fn add_file_from_kb(
        &self,
        doc: &Document,
        kb_folder_id: &str,
        tenant_id: &str,
    ) -> Result<(), DomainError> {
        let doc_id = doc.id.clone();
        if self
            .repos
            .file2documents
            .find_one(&|l: &File2Document| l.document_id == doc_id)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let mut file = File::folder(Some(kb_folder_id), tenant_id, doc.name.clone(), FileSource::Knowledgebase);
        file.file_type = doc.file_type;
        file.size = doc.size;
        file.location = Some(doc.location.clone());
        self.repos.files.save(&file).await?;
        self.repos
            .file2documents
            .save(&File2Document::new(file.id, doc.id.clone()))
            .await
    }

    /// Removes the knowledge-base mirror entries and links of a document.
    pub async fn unlink_document(&self, doc_id: &str) -> Result<(), DomainError> {
        let doc = doc_id.to_string();
        let links = self
            .repos
            .file2documents
            .find(&|l: &File2Document| l.document_id == doc)
            .await?;
        for link in &links {
            if let Some(file) = self.repos.files.get(&link.file_id).await? {
                if file.source_type == FileSource::Knowledgebase {
                    self.repos.files.delete(&file.id).await?;
                }
            }
            self.repos.file2documents.delete(&link.id).await?;
        }
        Ok(())
    }

    /// Stores `blob` in the knowledge base's bucket and records it as a
    /// document plus its mirror entry.
    pub async fn store_kb_document(
        &self,
        kb: &Knowledgebase,
        kb_folder_id: &str,
        name: &str,
        blob: &[u8],
        user_id: &str,
    ) -> Result<Document, DomainError> {
        let kb_id = kb.id.clone();
        let taken: Vec<String> = self
            .repos
            .documents
            .find(&|d: &Document| d.kb_id == kb_id)
            .await?
            .into_iter()
            .map(|d| d.name)
            .collect();
        let filename = duplicate_name(name, |n| taken.iter().any(|t| t == n));
        let file_type = filename_type(&filename);
        if file_type == FileType::Other {
            return Err(DomainError::validation(
                "This type of file has not been supported yet!",
            ));
        }

        let mut location = filename.clone();
        while self.blobs.exists(&kb.id, &location).await? {
            location.push('_');
        }
        self.blobs.put(&kb.id, &location, blob).await?;

        let doc = Document::new(&kb.id, &filename, file_type, user_id)
            .with_parser(
                parser_for(file_type, &filename, &kb.parser_id),
                kb.parser_config.clone(),
            )
            .with_location(location, blob.len() as i64);
        counters::insert_document(&self.repos, &doc).await?;
        self.add_file_from_kb(&doc, kb_folder_id, &kb.tenant_id).await?;

        tracing::info!(kb_id = %kb.id, doc_id = %doc.id, name = %doc.name, "document stored");
        Ok(doc)
    }

    async fn document_count(&self, tenant_id: &str) -> Result<usize, DomainError> {
        let tenant = tenant_id.to_string();
        let kb_ids: Vec<String> = self
            .repos
            .knowledgebases
            .find(&|kb: &Knowledgebase| kb.tenant_id == tenant)
            .await?
            .into_iter()
            .map(|kb| kb.id)
            .collect();
        Ok(self
            .repos
            .documents
            .find(&|d: &Document| kb_ids.contains(&d.kb_id))
            .await?
            .len())
    }

    /// Uploads into a knowledge base. Returns per-file error lines and the
    /// documents that were created.
    #[instrument(skip(self, kb, files), fields(kb_id = %kb.id, count = files.len()))]
    pub async fn upload_document(
        &self,
        kb: &Knowledgebase,
        files: &[UploadedFile],
        user_id: &str,
    ) -> Result<(Vec<String>, Vec<Document>), DomainError> {
        let kb_root = self.kb_root_folder(user_id).await?;
        let kb_folder = self.folder_in(&kb.tenant_id, &kb.name, &kb_root.id).await?;

        let mut errors = Vec::new();
        let mut docs = Vec::new();
        for file in files {
            if self.max_file_num_per_user > 0
                && self.document_count(&kb.tenant_id).await? >= self.max_file_num_per_user
            {
                errors.push(format!(
                    "{}: Exceed the maximum file number of a free user!",
                    file.filename
                ));
                continue;
            }
            match self
                .store_kb_document(kb, &kb_folder.id, &file.filename, &file.data, user_id)
                .await
            {
                Ok(doc) => docs.push(doc),
                Err(e) => errors.push(format!("{}: {}", file.filename, e)),
            }
        }
        Ok((errors, docs))
    }

    /// Leaf files below `folder_id`, descending through nested folders.
    /// Empty folders contribute nothing.
    pub async fn innermost_file_ids(&self, folder_id: &str) -> Result<Vec<String>, DomainError> {
        let mut result = Vec::new();
        let mut pending = vec![folder_id.to_string()];
        while let Some(id) = pending.pop() {
            let children = self.children(&id).await?;
            if children.is_empty() {
                let is_file = self
                    .repos
                    .files
                    .get(&id)
                    .await?
                    .is_some_and(|f| !f.is_folder());
                if is_file {
                    result.push(id);
                }
                continue;
            }
            pending.extend(children.into_iter().map(|c| c.id));
        }
        Ok(result)
    }

    /// Bucket and object name holding a document's bytes. Documents converted
    /// from locally uploaded files stay in the file's folder bucket.
    pub async fn storage_address(&self, doc: &Document) -> Result<(String, String), DomainError> {
        let doc_id = doc.id.clone();
        let link = self
            .repos
            .file2documents
            .find_one(&|l: &File2Document| l.document_id == doc_id)
            .await?;
        if let Some(link) = link {
            if let Some(file) = self.repos.files.get(&link.file_id).await? {
                if file.source_type == FileSource::Local {
                    return Ok((file.parent_id, file.location.unwrap_or_default()));
                }
            }
        }
        Ok((doc.kb_id.clone(), doc.location.clone()))
    }

    /// Extracts and joins the text of uploaded files.
    pub fn parse_docs(&self, files: &[UploadedFile]) -> Result<String, DomainError> {
        let texts = files
            .iter()
            .map(|f| parser::extract_text(&f.filename, filename_type(&f.filename), &f.data))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(texts.join("\n"))
    }

    async fn parent_or_root(
        &self,
        tenant_id: &str,
        parent_id: Option<&str>,
    ) -> Result<File, DomainError> {
        match parent_id.filter(|p| !p.is_empty()) {
            Some(id) => self
                .repos
                .files
                .get(id)
                .await?
                .filter(|f| f.tenant_id == tenant_id && f.is_folder())
                .ok_or_else(|| DomainError::not_found("Can't find this folder!")),
            None => self.root_folder(tenant_id).await,
        }
    }

    /// Uploads into the file manager. Blobs live in the parent folder's bucket.
    #[instrument(skip(self, files), fields(count = files.len()))]
    pub async fn upload(
        &self,
        tenant_id: &str,
        parent_id: Option<&str>,
        files: &[UploadedFile],
    ) -> Result<Vec<File>, DomainError> {
        let parent = self.parent_or_root(tenant_id, parent_id).await?;
        let mut created = Vec::new();
        for upload in files {
            let file_type = filename_type(&upload.filename);
            if file_type == FileType::Other {
                return Err(DomainError::validation(
                    "This type of file has not been supported yet!",
                ));
            }
            let siblings: Vec<String> = self
                .children(&parent.id)
                .await?
                .into_iter()
                .map(|f| f.name)
                .collect();
            let name = duplicate_name(&upload.filename, |n| siblings.iter().any(|s| s == n));

            let mut location = name.clone();
            while self.blobs.exists(&parent.id, &location).await? {
                location.push('_');
            }
            self.blobs.put(&parent.id, &location, &upload.data).await?;

            let mut file = File::folder(Some(&parent.id), tenant_id, name, FileSource::Local);
            file.file_type = file_type;
            file.size = upload.data.len() as i64;
            file.location = Some(location);
            self.repos.files.save(&file).await?;
            created.push(file);
        }
        Ok(created)
    }

    /// Creates a folder or an empty virtual file.
    #[instrument(skip(self))]
    pub async fn create(
        &self,
        tenant_id: &str,
        parent_id: Option<&str>,
        name: &str,
        file_type: FileType,
    ) -> Result<File, DomainError> {
        let parent = self.parent_or_root(tenant_id, parent_id).await?;
        if self.child_named(&parent.id, name).await?.is_some() {
            return Err(DomainError::conflict("Duplicated folder name in the same folder."));
        }

        let mut file = File::folder(Some(&parent.id), tenant_id, name, FileSource::Local);
        if file_type != FileType::Folder {
            file.file_type = FileType::Virtual;
        }
        self.repos.files.save(&file).await?;
        Ok(file)
    }

    pub async fn list(
        &self,
        tenant_id: &str,
        parent_id: Option<&str>,
        keywords: &str,
        query: &PageQuery,
    ) -> Result<Value, DomainError> {
        let parent = self.parent_or_root(tenant_id, parent_id).await?;
        let keywords = keywords.to_lowercase();
        let rows = self
            .children(&parent.id)
            .await?
            .into_iter()
            .filter(|f| keywords.is_empty() || f.name.to_lowercase().contains(&keywords))
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        let total = rows.len();

        Ok(json!({
            "total": total,
            "files": order_and_page(rows, query),
            "parent_folder": parent,
        }))
    }
}
