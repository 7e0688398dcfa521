//! Document and knowledge-base counters kept in step with inserts,
//! removals and parsing results.

use crate::domain::ports::Repositories;
use crate::domain::{Document, DomainError, Knowledgebase};

/// Saves a new document and bumps its knowledge base's `doc_num`.
pub async fn insert_document(repos: &Repositories, doc: &Document) -> Result<(), DomainError> {
    if repos.knowledgebases.get(&doc.kb_id).await?.is_none() {
        return Err(DomainError::not_found("Can't find this knowledgebase!"));
    }
    repos.documents.save(doc).await?;
    repos
        .knowledgebases
        .update(&doc.kb_id, &|kb: &mut Knowledgebase| kb.doc_num += 1)
        .await?;
    Ok(())
}

/// Adds (or with negative values subtracts) parsing totals on a document
/// and its knowledge base.
pub async fn increment_chunk_num(
    repos: &Repositories,
    doc_id: &str,
    kb_id: &str,
    token_num: i64,
    chunk_num: i64,
    duration: f64,
) -> Result<(), DomainError> {
    repos
        .documents
        .update(doc_id, &|doc: &mut Document| {
            doc.token_num += token_num;
            doc.chunk_num += chunk_num;
            doc.process_duation += duration;
        })
        .await?
        .ok_or_else(|| DomainError::not_found("Document not found!"))?;

    repos
        .knowledgebases
        .update(kb_id, &|kb: &mut Knowledgebase| {
            kb.token_num += token_num;
            kb.chunk_num += chunk_num;
        })
        .await?;
    Ok(())
}

/// Takes a removed document's totals off its knowledge base.
pub async fn clear_chunk_num(repos: &Repositories, doc: &Document) -> Result<(), DomainError> {
    let (token_num, chunk_num) = (doc.token_num, doc.chunk_num);
    repos
        .knowledgebases
        .update(&doc.kb_id, &|kb: &mut Knowledgebase| {
            kb.token_num -= token_num;
            kb.chunk_num -= chunk_num;
            kb.doc_num -= 1;
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::testing;
    use crate::domain::FileType;

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_increments_keep_every_chunk() {
        let b = testing::backends();
        let kb = testing::knowledgebase(&b, "t1", "kb").await;
        let doc = Document::new(&kb.id, "a.txt", FileType::Doc, "t1");
        insert_document(&b.repos, &doc).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..200 {
            let repos = b.repos.clone();
            let (doc_id, kb_id) = (doc.id.clone(), kb.id.clone());
            handles.push(tokio::spawn(async move {
                increment_chunk_num(&repos, &doc_id, &kb_id, 3, 1, 0.0)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let kb = b.repos.knowledgebases.get(&kb.id).await.unwrap().unwrap();
        assert_eq!(kb.chunk_num, 200);
        assert_eq!(kb.token_num, 600);
        assert_eq!(kb.doc_num, 1);
        let doc = b.repos.documents.get(&doc.id).await.unwrap().unwrap();
        assert_eq!(doc.chunk_num, 200);
    }

    #[tokio::test]
    async fn test_missing_rows() {
        let b = testing::backends();
        let doc = Document::new("no-kb", "a.txt", FileType::Doc, "t1");
        let err = insert_document(&b.repos, &doc).await.unwrap_err();
        assert_eq!(err.to_string(), "Can't find this knowledgebase!");

        let err = increment_chunk_num(&b.repos, "nope", "no-kb", 1, 1, 0.0)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Document not found!");
    }

    #[tokio::test]
    async fn test_clear_chunk_num_subtracts_document_totals() {
        let b = testing::backends();
        let kb = testing::knowledgebase(&b, "t1", "kb").await;
        let doc = Document::new(&kb.id, "a.txt", FileType::Doc, "t1");
        insert_document(&b.repos, &doc).await.unwrap();
        increment_chunk_num(&b.repos, &doc.id, &kb.id, 40, 4, 1.5).await.unwrap();

        let doc = b.repos.documents.get(&doc.id).await.unwrap().unwrap();
        assert!((doc.process_duation - 1.5).abs() < 1e-9);
        clear_chunk_num(&b.repos, &doc).await.unwrap();

        let kb = b.repos.knowledgebases.get(&kb.id).await.unwrap().unwrap();
        assert_eq!((kb.doc_num, kb.chunk_num, kb.token_num), (0, 0, 0));
    }
}
