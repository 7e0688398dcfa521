use std::sync::Arc;
use tracing::instrument;

use super::counters;
use super::llm::LlmService;
use super::task::TaskService;
use crate::domain::ports::{index_name, BlobStore, ChunkStore, Repositories, TaskMessage};
use crate::domain::{chunk_content, DocumentChunk, DomainError, Embedding, TaskStatus};
use crate::infrastructure::parser;

const CANCELED: &str = "Task has been canceled.";

/// Characters per chunk for each configured token.
const CHARS_PER_TOKEN: usize = 4;

/// How a task left the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Failed,
    Canceled,
    /// The task row no longer exists.
    Skipped,
}

/// Parses queued documents: extract, chunk, embed, index.
pub struct TaskExecutor {
    repos: Repositories,
    blobs: Arc<dyn BlobStore>,
    chunks: Arc<dyn ChunkStore>,
    llms: Arc<LlmService>,
    tasks: Arc<TaskService>,
    batch_size: usize,
    chunk_token_num: usize,
}

impl TaskExecutor {
    pub fn new(
        repos: Repositories,
        blobs: Arc<dyn BlobStore>,
        chunks: Arc<dyn ChunkStore>,
        llms: Arc<LlmService>,
        tasks: Arc<TaskService>,
        batch_size: usize,
        chunk_token_num: usize,
    ) -> Self {
        Self {
            repos,
            blobs,
            chunks,
            llms,
            tasks,
            batch_size: batch_size.max(1),
            chunk_token_num,
        }
    }

    async fn canceled(&self, doc_id: &str) -> Result<bool, DomainError> {
        Ok(self
            .repos
            .documents
            .get(doc_id)
            .await?
            .is_none_or(|d| d.run == TaskStatus::Cancel))
    }

    fn chunk_size(&self, message: &TaskMessage) -> usize {
        let tokens = message
            .parser_config
            .get("chunk_token_num")
            .and_then(serde_json::Value::as_u64)
            .map_or(self.chunk_token_num, |n| n as usize);
        tokens.max(1) * CHARS_PER_TOKEN
    }

    #[instrument(skip(self), fields(task_id = %message.id, doc_id = %message.doc_id))]
    pub async fn handle(&self, message: &TaskMessage) -> Result<Outcome, DomainError> {
        if self.tasks.get(&message.id).await?.is_none() {
            tracing::warn!("task row is gone, skipping");
            return Ok(Outcome::Skipped);
        }
        if self.canceled(&message.doc_id).await? {
            self.tasks.set_progress(&message.id, -1.0, CANCELED).await?;
            return Ok(Outcome::Canceled);
        }

        match self.build(message).await {
            Ok(true) => {
                self.tasks.set_progress(&message.id, 1.0, "Done!").await?;
                tracing::info!("task done");
                Ok(Outcome::Done)
            }
            Ok(false) => {
                self.tasks.set_progress(&message.id, -1.0, CANCELED).await?;
                Ok(Outcome::Canceled)
            }
            Err(e) => {
                tracing::error!(error = %e, "task failed");
                self.tasks
                    .set_progress(&message.id, -1.0, &format!("[ERROR]{e}"))
                    .await?;
                Ok(Outcome::Failed)
            }
        }
    }

    /// Returns false when the document was canceled part way.
    async fn build(&self, message: &TaskMessage) -> Result<bool, DomainError> {
        let started = std::time::Instant::now();
        self.tasks
            .set_progress(&message.id, 0.1, "Start to parse.")
            .await?;

        let bytes = self.blobs.get(&message.bucket, &message.name).await?;
        let text = parser::extract_text(&message.doc_name, message.file_type, &bytes)?;

        let doc = self
            .repos
            .documents
            .get(&message.doc_id)
            .await?
            .ok_or_else(|| DomainError::not_found("Document not found!"))?;
        let pagerank = self
            .repos
            .knowledgebases
            .get(&message.kb_id)
            .await?
            .map_or(0, |kb| kb.pagerank);

        let pieces = chunk_content(&text, self.chunk_size(message));
        let chunks: Vec<DocumentChunk> = pieces
            .iter()
            .enumerate()
            .map(|(i, piece)| DocumentChunk::new(&doc, piece.as_str(), i).with_pagerank(pagerank))
            .collect();
        self.tasks
            .set_progress(&message.id, 0.4, &format!("Generate {} chunk(s).", chunks.len()))
            .await?;

        let model = self
            .llms
            .embedding_model(&message.tenant_id, &message.embd_id)
            .await?;
        let mut vectors: Vec<Embedding> = Vec::with_capacity(chunks.len());
        let mut used_tokens = 0u64;
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.content_with_weight.clone()).collect();
            let (embedded, tokens) = model.encode(&texts).await?;
            if embedded.len() != batch.len() {
                return Err(DomainError::external(format!(
                    "Embedding model returned {} vectors for {} texts",
                    embedded.len(),
                    batch.len()
                )));
            }
            vectors.extend(embedded);
            used_tokens += tokens;
            if self.canceled(&message.doc_id).await? {
                return Ok(false);
            }
        }

        let token_num = if used_tokens > 0 {
            used_tokens as i64
        } else {
            chunks.iter().map(|c| c.token_num).sum()
        };
        let chunk_num = chunks.len() as i64;
        let rows: Vec<(DocumentChunk, Embedding)> = chunks.into_iter().zip(vectors).collect();
        if !rows.is_empty() {
            self.chunks
                .upsert(&index_name(&message.tenant_id), &rows)
                .await?;
        }

        counters::increment_chunk_num(
            &self.repos,
            &message.doc_id,
            &message.kb_id,
            token_num,
            chunk_num,
            started.elapsed().as_secs_f64(),
        )
        .await?;
        self.llms
            .record_usage(&message.tenant_id, &message.embd_id, used_tokens)
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::testing;
    use crate::application::{Backends, Services, Settings};
    use crate::domain::ports::ChunkFilter;
    use crate::domain::{Document, FileType, TenantLlm};

    async fn queued(b: &Backends, s: &Services, name: &str, body: &[u8]) -> (Document, TaskMessage) {
        stored_as(b, s, name, name, body).await
    }

    /// Queues a document whose blob lives under `location`.
    async fn stored_as(
        b: &Backends,
        s: &Services,
        name: &str,
        location: &str,
        body: &[u8],
    ) -> (Document, TaskMessage) {
        let mut kb = testing::knowledgebase(b, "t1", "kb").await;
        kb.pagerank = 7;
        b.repos.knowledgebases.save(&kb).await.unwrap();

        b.blobs.put(&kb.id, location, body).await.unwrap();
        let mut doc = Document::new(&kb.id, name, FileType::Doc, "t1")
            .with_location(location, body.len() as i64);
        doc.run = TaskStatus::Running;
        b.repos.documents.save(&doc).await.unwrap();

        s.tasks.queue_tasks(&doc, &kb, &kb.id, location).await.unwrap();
        let message = b.queue.pop(0.1).await.unwrap().unwrap();
        (doc, message)
    }

    #[tokio::test]
    async fn test_handle_indexes_chunks_and_counts() {
        let b = testing::backends();
        let s = Services::new(b.clone(), Settings::default());
        let (doc, message) = queued(&b, &s, "notes.txt", b"alpha beta\n\ngamma delta").await;

        assert_eq!(s.executor.handle(&message).await.unwrap(), Outcome::Done);

        let task = s.tasks.get(&message.id).await.unwrap().unwrap();
        assert_eq!(task.progress, 1.0);
        assert!(task.progress_msg.contains("Start to parse."));
        assert!(task.progress_msg.contains("Generate 1 chunk(s)."));
        assert!(task.progress_msg.ends_with("Done!"));

        let hits = b
            .chunks
            .search(&index_name("t1"), None, &ChunkFilter::doc(&doc.kb_id, &doc.id), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.pagerank_fea, Some(7));

        let doc = b.repos.documents.get(&doc.id).await.unwrap().unwrap();
        assert_eq!(doc.chunk_num, 1);
        assert_eq!(doc.token_num, 4);
        let kb = b.repos.knowledgebases.get(&doc.kb_id).await.unwrap().unwrap();
        assert_eq!(kb.chunk_num, 1);

        let row = b
            .repos
            .tenant_llms
            .get(&TenantLlm::row_key("t1", "Test", "embed"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.used_tokens, 4);
    }

    #[tokio::test]
    async fn test_handle_reports_failures() {
        let b = testing::backends();
        let s = Services::new(b.clone(), Settings::default());
        let (_, message) = queued(&b, &s, "photo.png", b"\x89PNG").await;

        assert_eq!(s.executor.handle(&message).await.unwrap(), Outcome::Failed);
        let task = s.tasks.get(&message.id).await.unwrap().unwrap();
        assert_eq!(task.progress, -1.0);
        assert!(task.progress_msg.contains("[ERROR]Unsupported file type"));
    }

    #[tokio::test]
    async fn test_handle_parses_by_document_name() {
        let b = testing::backends();
        let s = Services::new(b.clone(), Settings::default());
        let (doc, message) = stored_as(&b, &s, "notes.txt", "notes.txt_", b"alpha beta").await;
        assert_eq!(message.name, "notes.txt_");
        assert_eq!(message.doc_name, "notes.txt");

        assert_eq!(s.executor.handle(&message).await.unwrap(), Outcome::Done);
        let doc = b.repos.documents.get(&doc.id).await.unwrap().unwrap();
        assert_eq!(doc.chunk_num, 1);
    }

    #[tokio::test]
    async fn test_handle_canceled_and_missing() {
        let b = testing::backends();
        let s = Services::new(b.clone(), Settings::default());
        let (mut doc, message) = queued(&b, &s, "notes.txt", b"text").await;
        doc.run = TaskStatus::Cancel;
        b.repos.documents.save(&doc).await.unwrap();

        assert_eq!(s.executor.handle(&message).await.unwrap(), Outcome::Canceled);
        let task = s.tasks.get(&message.id).await.unwrap().unwrap();
        assert!(task.progress_msg.ends_with(CANCELED));

        let mut orphan = message.clone();
        orphan.id = "gone".to_string();
        assert_eq!(s.executor.handle(&orphan).await.unwrap(), Outcome::Skipped);
    }

    #[test]
    fn test_chunk_size_prefers_parser_config() {
        let b = testing::backends();
        let s = Services::new(b, Settings::default());
        let mut message = TaskMessage {
            id: "t".into(),
            doc_id: "d".into(),
            kb_id: "k".into(),
            tenant_id: "t1".into(),
            bucket: "k".into(),
            name: "a.txt".into(),
            doc_name: "a.txt".into(),
            file_type: FileType::Doc,
            from_page: 0,
            to_page: 1,
            parser_id: "naive".into(),
            parser_config: serde_json::json!({}),
            embd_id: "embed@Test".into(),
            language: "English".into(),
        };
        assert_eq!(s.executor.chunk_size(&message), 128 * CHARS_PER_TOKEN);
        message.parser_config = serde_json::json!({"chunk_token_num": 16});
        assert_eq!(s.executor.chunk_size(&message), 64);
    }
}
