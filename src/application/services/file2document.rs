use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

use super::counters;
use super::document::{DocumentService, DOC_NOT_FOUND, KB_NOT_FOUND};
use super::file::FileService;
use crate::domain::naming::parser_for;
use crate::domain::ports::Repositories;
use crate::domain::{Document, DomainError, File2Document};

/// Turns file-manager entries into knowledge-base documents and back.
pub struct File2DocumentService {
    repos: Repositories,
    documents: Arc<DocumentService>,
    files: Arc<FileService>,
}

impl File2DocumentService {
    pub fn new(repos: Repositories, documents: Arc<DocumentService>, files: Arc<FileService>) -> Self {
        Self {
            repos,
            documents,
            files,
        }
    }

    async fn links_of_file(&self, file_id: &str) -> Result<Vec<File2Document>, DomainError> {
        let file = file_id.to_string();
        self.repos
            .file2documents
            .find(&|l: &File2Document| l.file_id == file)
            .await
    }

    async fn drop_linked_documents(&self, links: &[File2Document]) -> Result<(), DomainError> {
        for link in links {
            let doc = self
                .repos
                .documents
                .get(&link.document_id)
                .await?
                .ok_or_else(|| DomainError::not_found(DOC_NOT_FOUND))?;
            let tenant_id = self.documents.tenant_id(&doc).await?;
            self.documents.remove_document(&doc, &tenant_id).await?;
        }
        Ok(())
    }

    /// Links every selected file into each knowledge base, replacing any
    /// documents previously created from it. Folders expand to the files
    /// they contain.
    #[instrument(skip(self))]
    pub async fn convert(
        &self,
        user_id: &str,
        file_ids: &[String],
        kb_ids: &[String],
    ) -> Result<Vec<Value>, DomainError> {
        let mut targets = Vec::new();
        for file_id in file_ids {
            let file = self
                .files
                .get(file_id)
                .await?
                .ok_or_else(|| DomainError::not_found("File not found!"))?;
            if file.is_folder() {
                targets.extend(self.files.innermost_file_ids(&file.id).await?);
            } else {
                targets.push(file.id);
            }
        }

        let mut created = Vec::new();
        for file_id in &targets {
            let links = self.links_of_file(file_id).await?;
            self.drop_linked_documents(&links).await?;
            let file = file_id.clone();
            self.repos
                .file2documents
                .delete_where(&|l: &File2Document| l.file_id == file)
                .await?;

            for kb_id in kb_ids {
                let kb = self
                    .repos
                    .knowledgebases
                    .get(kb_id)
                    .await?
                    .ok_or_else(|| DomainError::not_found(KB_NOT_FOUND))?;
                let file = self
                    .files
                    .get(file_id)
                    .await?
                    .ok_or_else(|| DomainError::not_found("Can't find this file!"))?;

                let doc = Document::new(&kb.id, &file.name, file.file_type, user_id)
                    .with_parser(
                        parser_for(file.file_type, &file.name, &kb.parser_id),
                        kb.parser_config.clone(),
                    )
                    .with_location(file.location.clone().unwrap_or_default(), file.size);
                counters::insert_document(&self.repos, &doc).await?;

                let link = File2Document::new(&file.id, &doc.id);
                self.repos.file2documents.save(&link).await?;
                created.push(serde_json::to_value(&link)?);
            }
        }

        tracing::info!(files = targets.len(), kbs = kb_ids.len(), "files converted");
        Ok(created)
    }

    /// Unlinks files and removes the documents made from them.
    #[instrument(skip(self))]
    pub async fn rm(&self, file_ids: &[String]) -> Result<(), DomainError> {
        if file_ids.is_empty() {
            return Err(DomainError::invalid_argument("Lack of \"Files ID\""));
        }
        for file_id in file_ids {
            let links = self.links_of_file(file_id).await?;
            if links.is_empty() {
                return Err(DomainError::not_found("Inform not found!"));
            }
            for link in &links {
                self.repos.file2documents.delete(&link.id).await?;
            }
            self.drop_linked_documents(&links).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::testing;
    use crate::application::{Services, Settings, UploadedFile};
    use crate::domain::FileType;

    #[tokio::test]
    async fn test_convert_expands_folders_and_replaces_docs() {
        let b = testing::backends();
        let s = Services::new(b.clone(), Settings::default());
        let kb = testing::knowledgebase(&b, "t1", "kb").await;
        let other = testing::knowledgebase(&b, "t1", "other").await;

        let folder = s.files.create("t1", None, "papers", FileType::Folder).await.unwrap();
        s.files.create("t1", Some(&folder.id), "empty", FileType::Folder).await.unwrap();
        let uploaded = s
            .files
            .upload("t1", Some(&folder.id), &[UploadedFile::new("slides.pptx", "p")])
            .await
            .unwrap();

        let links = s
            .file2documents
            .convert("t1", &[folder.id.clone()], &[kb.id.clone(), other.id.clone()])
            .await
            .unwrap();
        assert_eq!(links.len(), 2);

        let docs = b.repos.documents.list().await.unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|d| d.parser_id == "presentation"));
        let kb_row = b.repos.knowledgebases.get(&kb.id).await.unwrap().unwrap();
        assert_eq!(kb_row.doc_num, 1);

        s.file2documents
            .convert("t1", &[uploaded[0].id.clone()], &[kb.id.clone()])
            .await
            .unwrap();
        let docs = b.repos.documents.list().await.unwrap();
        assert_eq!(docs.len(), 1);
        let (bucket, name) = s.files.storage_address(&docs[0]).await.unwrap();
        assert_eq!(bucket, folder.id);
        assert_eq!(name, "slides.pptx");
    }

    #[tokio::test]
    async fn test_convert_missing_inputs() {
        let b = testing::backends();
        let s = Services::new(b.clone(), Settings::default());
        let kb = testing::knowledgebase(&b, "t1", "kb").await;

        let err = s
            .file2documents
            .convert("t1", &["nope".to_string()], &[kb.id])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "File not found!");

        let file = s
            .files
            .upload("t1", None, &[UploadedFile::new("a.txt", "x")])
            .await
            .unwrap();
        let err = s
            .file2documents
            .convert("t1", &[file[0].id.clone()], &["nope".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), KB_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rm_unlinks_and_removes_documents() {
        let b = testing::backends();
        let s = Services::new(b.clone(), Settings::default());
        let kb = testing::knowledgebase(&b, "t1", "kb").await;
        let file = s
            .files
            .upload("t1", None, &[UploadedFile::new("a.txt", "x")])
            .await
            .unwrap();
        let file_id = file[0].id.clone();
        s.file2documents
            .convert("t1", &[file_id.clone()], &[kb.id.clone()])
            .await
            .unwrap();

        let err = s.file2documents.rm(&[]).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidArgument(_)));

        s.file2documents.rm(&[file_id.clone()]).await.unwrap();
        assert!(b.repos.documents.list().await.unwrap().is_empty());
        assert!(b.repos.file2documents.list().await.unwrap().is_empty());

        let err = s.file2documents.rm(&[file_id]).await.unwrap_err();
        assert_eq!(err.to_string(), "Inform not found!");
    }
}
