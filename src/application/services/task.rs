use std::sync::Arc;
use tracing::instrument;

use crate::domain::clock::now_millis;
use crate::domain::ports::{Repositories, TaskMessage, TaskQueue};
use crate::domain::{Document, DomainError, Knowledgebase, Task, TaskStatus};

/// Parsing tasks: creation, queueing and folding their progress back into
/// documents.
pub struct TaskService {
    repos: Repositories,
    queue: Arc<dyn TaskQueue>,
}

impl TaskService {
    pub fn new(repos: Repositories, queue: Arc<dyn TaskQueue>) -> Self {
        Self { repos, queue }
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<Task>, DomainError> {
        self.repos.tasks.get(task_id).await
    }

    pub async fn for_document(&self, doc_id: &str) -> Result<Vec<Task>, DomainError> {
        let doc = doc_id.to_string();
        let mut tasks = self
            .repos
            .tasks
            .find(&|t: &Task| t.doc_id == doc)
            .await?;
        tasks.sort_by_key(|t| t.stamp.create_time);
        Ok(tasks)
    }

    pub async fn delete_for_document(&self, doc_id: &str) -> Result<usize, DomainError> {
        let doc = doc_id.to_string();
        self.repos
            .tasks
            .delete_where(&|t: &Task| t.doc_id == doc)
            .await
    }

    /// Creates the document's parsing task and pushes it to the executors.
    #[instrument(skip(self, doc, kb), fields(doc_id = %doc.id))]
    pub async fn queue_tasks(
        &self,
        doc: &Document,
        kb: &Knowledgebase,
        bucket: &str,
        name: &str,
    ) -> Result<Task, DomainError> {
        let task = Task::new(&doc.id);
        self.repos.tasks.save(&task).await?;

        let message = TaskMessage {
            id: task.id.clone(),
            doc_id: doc.id.clone(),
            kb_id: kb.id.clone(),
            tenant_id: kb.tenant_id.clone(),
            bucket: bucket.to_string(),
            name: name.to_string(),
            doc_name: doc.name.clone(),
            file_type: doc.file_type,
            from_page: task.from_page,
            to_page: task.to_page,
            parser_id: doc.parser_id.clone(),
            parser_config: doc.parser_config.clone(),
            embd_id: kb.embd_id.clone(),
            language: kb.language.clone(),
        };
        self.queue.push(&message).await?;

        let queued_at = now_millis();
        self.repos
            .documents
            .update(&doc.id, &|doc: &mut Document| {
                doc.process_begin_at = Some(queued_at);
                doc.progress_msg = "Task is queued...".to_string();
            })
            .await?;

        tracing::info!(task_id = %task.id, bucket, name, "task queued");
        Ok(task)
    }

    /// Records executor progress on a task. Messages accumulate one per line.
    pub async fn set_progress(
        &self,
        task_id: &str,
        progress: f64,
        msg: &str,
    ) -> Result<(), DomainError> {
        let line = (!msg.is_empty())
            .then(|| format!("{} {}", chrono::Local::now().format("%H:%M:%S"), msg));
        let now = now_millis();
        self.repos
            .tasks
            .update(task_id, &|task: &mut Task| {
                task.progress = progress;
                if let Some(line) = &line {
                    if task.progress_msg.is_empty() {
                        task.progress_msg = line.clone();
                    } else {
                        task.progress_msg = format!("{}\n{}", task.progress_msg, line);
                    }
                }
                let begin = *task.begin_at.get_or_insert(now);
                task.process_duation = (now - begin) as f64 / 1000.0;
            })
            .await?;
        Ok(())
    }

    /// Folds task progress into every running document. Returns how many
    /// documents were updated.
    #[instrument(skip(self))]
    pub async fn update_progress(&self) -> Result<usize, DomainError> {
        let running = self
            .repos
            .documents
            .find(&|d: &Document| {
                d.run == TaskStatus::Running && d.progress >= 0.0 && d.progress < 1.0
            })
            .await?;

        let mut updated = 0;
        for doc in running {
            let tasks = self.for_document(&doc.id).await?;
            if tasks.is_empty() {
                continue;
            }

            let mut finished = true;
            let mut bad = 0;
            let mut progress = 0.0;
            let mut msgs: Vec<&str> = Vec::new();
            for task in &tasks {
                if (0.0..1.0).contains(&task.progress) {
                    finished = false;
                }
                if task.progress >= 0.0 {
                    progress += task.progress;
                }
                if task.progress == -1.0 {
                    bad += 1;
                }
                if !msgs.contains(&task.progress_msg.as_str()) {
                    msgs.push(&task.progress_msg);
                }
            }
            progress /= tasks.len() as f64;

            let mut status = TaskStatus::Running;
            if finished && bad > 0 {
                progress = -1.0;
                status = TaskStatus::Fail;
            } else if finished {
                status = TaskStatus::Done;
            }

            msgs.sort_unstable();
            let msg = msgs.join("\n");
            let now = now_millis();

            // Only the progress fields are written so chunk totals, renames and
            // status changes landing since the scan above survive.
            let written = self
                .repos
                .documents
                .update(&doc.id, &|doc: &mut Document| {
                    if doc.run != TaskStatus::Running {
                        return;
                    }
                    if let Some(begin) = doc.process_begin_at {
                        doc.process_duation = (now - begin) as f64 / 1000.0;
                    }
                    doc.run = status;
                    if progress != 0.0 {
                        doc.progress = progress;
                    }
                    if !msg.trim().is_empty() {
                        doc.progress_msg = msg.clone();
                    }
                })
                .await?;
            if written.is_none() {
                continue;
            }
            updated += 1;

            if finished {
                tracing::info!(doc_id = %doc.id, run = status.as_str(), "document parsing finished");
            }
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::testing;
    use crate::domain::ports::Repository;
    use crate::domain::FileType;

    async fn running_doc(b: &crate::application::Backends) -> (Document, Knowledgebase) {
        let kb = testing::knowledgebase(b, "t1", "kb").await;
        let mut doc = Document::new(&kb.id, "a.txt", FileType::Doc, "t1");
        doc.run = TaskStatus::Running;
        b.repos.documents.save(&doc).await.unwrap();
        (doc, kb)
    }

    #[tokio::test]
    async fn test_queue_tasks_pushes_message() {
        let b = testing::backends();
        let tasks = TaskService::new(b.repos.clone(), b.queue.clone());
        let (doc, kb) = running_doc(&b).await;

        let task = tasks.queue_tasks(&doc, &kb, &kb.id, "a.txt").await.unwrap();

        let message = b.queue.pop(0.1).await.unwrap().unwrap();
        assert_eq!(message.id, task.id);
        assert_eq!(message.tenant_id, "t1");
        assert_eq!(message.embd_id, "embed@Test");
        assert_eq!(message.to_page, crate::domain::MAX_PAGE);

        let doc = b.repos.documents.get(&doc.id).await.unwrap().unwrap();
        assert!(doc.process_begin_at.is_some());
    }

    #[tokio::test]
    async fn test_update_progress_averages_unfinished_tasks() {
        let b = testing::backends();
        let tasks = TaskService::new(b.repos.clone(), b.queue.clone());
        let (doc, kb) = running_doc(&b).await;

        let first = tasks.queue_tasks(&doc, &kb, &kb.id, "a.txt").await.unwrap();
        let second = tasks.queue_tasks(&doc, &kb, &kb.id, "a.txt").await.unwrap();
        tasks.set_progress(&first.id, 1.0, "Done!").await.unwrap();
        tasks.set_progress(&second.id, 0.4, "Generate 3 chunk(s).").await.unwrap();

        assert_eq!(tasks.update_progress().await.unwrap(), 1);

        let doc = b.repos.documents.get(&doc.id).await.unwrap().unwrap();
        assert!((doc.progress - 0.7).abs() < 1e-9);
        assert_eq!(doc.run, TaskStatus::Running);
        assert!(doc.progress_msg.contains("Done!"));
    }

    #[tokio::test]
    async fn test_update_progress_marks_done_and_failed() {
        let b = testing::backends();
        let tasks = TaskService::new(b.repos.clone(), b.queue.clone());

        let (ok_doc, kb) = running_doc(&b).await;
        let ok_task = tasks.queue_tasks(&ok_doc, &kb, &kb.id, "a.txt").await.unwrap();
        tasks.set_progress(&ok_task.id, 1.0, "Done!").await.unwrap();

        let mut bad_doc = Document::new(&kb.id, "b.txt", FileType::Doc, "t1");
        bad_doc.run = TaskStatus::Running;
        b.repos.documents.save(&bad_doc).await.unwrap();
        let bad_task = tasks.queue_tasks(&bad_doc, &kb, &kb.id, "b.txt").await.unwrap();
        tasks.set_progress(&bad_task.id, -1.0, "[ERROR]boom").await.unwrap();

        tasks.update_progress().await.unwrap();

        let ok_doc = b.repos.documents.get(&ok_doc.id).await.unwrap().unwrap();
        assert_eq!(ok_doc.run, TaskStatus::Done);
        assert_eq!(ok_doc.progress, 1.0);

        let bad_doc = b.repos.documents.get(&bad_doc.id).await.unwrap().unwrap();
        assert_eq!(bad_doc.run, TaskStatus::Fail);
        assert_eq!(bad_doc.progress, -1.0);
        assert!(bad_doc.progress_msg.contains("[ERROR]boom"));
    }

    #[tokio::test]
    async fn test_update_progress_skips_docs_without_tasks() {
        let b = testing::backends();
        let tasks = TaskService::new(b.repos.clone(), b.queue.clone());
        running_doc(&b).await;

        assert_eq!(tasks.update_progress().await.unwrap(), 0);
    }

    /// Lands a concurrent write right after the running-documents scan.
    struct WritesAfterScan {
        inner: Arc<dyn Repository<Document>>,
        doc_id: String,
        write: fn(&mut Document),
    }

    #[async_trait::async_trait]
    impl Repository<Document> for WritesAfterScan {
        async fn get(&self, id: &str) -> Result<Option<Document>, DomainError> {
            self.inner.get(id).await
        }
        async fn list(&self) -> Result<Vec<Document>, DomainError> {
            self.inner.list().await
        }
        async fn save(&self, entity: &Document) -> Result<(), DomainError> {
            self.inner.save(entity).await
        }
        async fn delete(&self, id: &str) -> Result<bool, DomainError> {
            self.inner.delete(id).await
        }
        async fn update(
            &self,
            id: &str,
            apply: &(dyn for<'a> Fn(&'a mut Document) + Send + Sync),
        ) -> Result<Option<Document>, DomainError> {
            self.inner.update(id, apply).await
        }
        async fn find(
            &self,
            pred: &(dyn for<'a> Fn(&'a Document) -> bool + Send + Sync),
        ) -> Result<Vec<Document>, DomainError> {
            let found = self.inner.find(pred).await?;
            self.inner.update(&self.doc_id, &self.write).await?;
            Ok(found)
        }
    }

    #[tokio::test]
    async fn test_update_progress_keeps_writes_made_after_scan() {
        let b = testing::backends();
        let (doc, kb) = running_doc(&b).await;
        let mut repos = b.repos.clone();
        repos.documents = Arc::new(WritesAfterScan {
            inner: b.repos.documents.clone(),
            doc_id: doc.id.clone(),
            write: |d| {
                d.chunk_num += 5;
                d.token_num += 50;
                d.name = "renamed.txt".to_string();
            },
        });
        let tasks = TaskService::new(repos, b.queue.clone());

        let task = tasks.queue_tasks(&doc, &kb, &kb.id, "a.txt").await.unwrap();
        tasks.set_progress(&task.id, 0.5, "Page(1~2): OCR finished").await.unwrap();
        assert_eq!(tasks.update_progress().await.unwrap(), 1);

        let doc = b.repos.documents.get(&doc.id).await.unwrap().unwrap();
        assert_eq!(doc.chunk_num, 5);
        assert_eq!(doc.token_num, 50);
        assert_eq!(doc.name, "renamed.txt");
        assert!((doc.progress - 0.5).abs() < 1e-9);
        assert!(doc.progress_msg.contains("OCR finished"));
    }

    #[tokio::test]
    async fn test_update_progress_leaves_canceled_documents() {
        let b = testing::backends();
        let tasks = TaskService::new(b.repos.clone(), b.queue.clone());
        let (doc, kb) = running_doc(&b).await;
        let task = tasks.queue_tasks(&doc, &kb, &kb.id, "a.txt").await.unwrap();
        tasks.set_progress(&task.id, 1.0, "Done!").await.unwrap();

        let mut repos = b.repos.clone();
        repos.documents = Arc::new(WritesAfterScan {
            inner: b.repos.documents.clone(),
            doc_id: doc.id.clone(),
            write: |d| d.run = TaskStatus::Cancel,
        });
        TaskService::new(repos, b.queue.clone())
            .update_progress()
            .await
            .unwrap();

        let doc = b.repos.documents.get(&doc.id).await.unwrap().unwrap();
        assert_eq!(doc.run, TaskStatus::Cancel);
    }
}
