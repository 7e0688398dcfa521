//! End-to-end API tests over in-memory backends.
//!
//! Covers registration and login, token and API-key authentication, the
//! knowledge base lifecycle, and a document travelling from upload through
//! the task executor to retrieval.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt; // for oneshot

use ragflow::api::{create_router, AppState};
use ragflow::application::{Backends, DefaultModels, Services, Settings};
use ragflow::domain::ports::{
    ChatMessage, ChatModel, EmbeddingModel, FetchedPage, GenConf, ModelProvider, ModelSpec,
    PageFetcher, RerankModel, Usage,
};
use ragflow::domain::{DomainError, Embedding, LlmType};
use ragflow::infrastructure::{
    in_memory_repositories, AppConfig, InMemoryBlobStore, InMemoryChunkStore,
    InMemoryExecutorRegistry, InMemoryTaskQueue,
};

const BOUNDARY: &str = "ragflow-test-boundary";

struct LetterEmbedding;

#[async_trait]
impl EmbeddingModel for LetterEmbedding {
    async fn encode(&self, texts: &[String]) -> Result<Usage<Vec<Embedding>>, DomainError> {
        let vectors = texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 26];
                for c in t.to_lowercase().chars().filter(char::is_ascii_lowercase) {
                    v[(c as u8 - b'a') as usize] += 1.0;
                }
                Embedding::new(v)
            })
            .collect();
        Ok((vectors, texts.len() as u64))
    }
}

struct EchoChat;

#[async_trait]
impl ChatModel for EchoChat {
    async fn chat(
        &self,
        _system: Option<&str>,
        history: &[ChatMessage],
        _conf: &GenConf,
    ) -> Result<Usage<String>, DomainError> {
        Ok((history.last().map(|m| m.content.clone()).unwrap_or_default(), 1))
    }
}

struct FlatRerank;

#[async_trait]
impl RerankModel for FlatRerank {
    async fn similarity(&self, _query: &str, texts: &[String]) -> Result<Usage<Vec<f32>>, DomainError> {
        Ok((vec![1.0; texts.len()], 1))
    }
}

struct StubModels;

impl ModelProvider for StubModels {
    fn chat(&self, _spec: &ModelSpec) -> Result<Arc<dyn ChatModel>, DomainError> {
        Ok(Arc::new(EchoChat))
    }

    fn embedding(&self, _spec: &ModelSpec) -> Result<Arc<dyn EmbeddingModel>, DomainError> {
        Ok(Arc::new(LetterEmbedding))
    }

    fn rerank(&self, _spec: &ModelSpec) -> Result<Arc<dyn RerankModel>, DomainError> {
        Ok(Arc::new(FlatRerank))
    }

    fn supports(&self, _factory: &str, _model_type: LlmType) -> bool {
        true
    }
}

struct StubFetcher;

#[async_trait]
impl PageFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, DomainError> {
        Ok(FetchedPage {
            content_type: "text/html".to_string(),
            body: format!("<html><body><p>Welcome to {url}</p></body></html>").into_bytes(),
        })
    }
}

struct TestApp {
    router: Router,
    services: Services,
    backends: Backends,
}

fn setup_app() -> TestApp {
    let backends = Backends {
        repos: in_memory_repositories(),
        blobs: Arc::new(InMemoryBlobStore::new()),
        chunks: Arc::new(InMemoryChunkStore::new()),
        queue: Arc::new(InMemoryTaskQueue::new()),
        executors: Arc::new(InMemoryExecutorRegistry::new()),
        models: Arc::new(StubModels),
        fetcher: Arc::new(StubFetcher),
    };
    let settings = Settings {
        default_models: DefaultModels {
            factory: "Stub".to_string(),
            llm_id: "chat@Stub".to_string(),
            embd_id: "embed@Stub".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };
    let services = Services::new(backends.clone(), settings);
    let router = create_router(AppState::new(services.clone(), AppConfig::default()));
    TestApp {
        router,
        services,
        backends,
    }
}

async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

fn get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn post_multipart(uri: &str, token: &str, fields: &[(&str, &str)], files: &[(&str, &[u8])]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    for (filename, data) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

/// Registers a user and returns their access token.
async fn register(app: &TestApp, email: &str) -> String {
    let (status, body) = send(
        app,
        post_json(
            "/v1/user/register",
            None,
            json!({"email": email, "password": "secret", "nickname": "ann"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0, "{body}");
    body["data"]["access_token"].as_str().unwrap().to_string()
}

async fn create_kb(app: &TestApp, token: &str, name: &str) -> String {
    let (_, body) = send(app, post_json("/v1/kb/create", Some(token), json!({"name": name}))).await;
    assert_eq!(body["code"], 0, "{body}");
    body["data"]["kb_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_check() {
    let app = setup_app();
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_protected_routes_require_auth() {
    let app = setup_app();
    let request = Request::builder()
        .uri("/v1/kb/list")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 401);

    let (status, _) = send(&app, get("/v1/kb/list", "garbage")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_and_login() {
    let app = setup_app();
    let token = register(&app, "ann@example.com").await;

    let (_, body) = send(&app, get("/v1/user/info", &token)).await;
    assert_eq!(body["data"]["email"], "ann@example.com");

    let (_, body) = send(
        &app,
        post_json(
            "/v1/user/register",
            None,
            json!({"email": "ann@example.com", "password": "x", "nickname": "again"}),
        ),
    )
    .await;
    assert_eq!(body["code"], 102);

    let (_, body) = send(
        &app,
        post_json(
            "/v1/user/register",
            None,
            json!({"email": "not-an-email", "password": "x", "nickname": "x"}),
        ),
    )
    .await;
    assert_eq!(body["message"], "Invalid email address: not-an-email!");

    let (_, body) = send(
        &app,
        post_json("/v1/user/register", None, json!({"email": "a@b.com"})),
    )
    .await;
    assert_eq!(body["code"], 101);
    assert_eq!(body["message"], "required argument are missing: password,nickname; ");

    let (_, body) = send(
        &app,
        post_json(
            "/v1/user/login",
            None,
            json!({"email": "ann@example.com", "password": "wrong"}),
        ),
    )
    .await;
    assert_eq!(body["code"], 109);
    assert_eq!(body["data"], false);

    let (_, body) = send(
        &app,
        post_json(
            "/v1/user/login",
            None,
            json!({"email": "ann@example.com", "password": "secret"}),
        ),
    )
    .await;
    assert_eq!(body["code"], 0);
    assert!(body["data"]["access_token"].as_str().is_some());
}

#[tokio::test]
async fn test_api_token_authenticates() {
    let app = setup_app();
    let token = register(&app, "ann@example.com").await;

    let (_, body) = send(&app, post_json("/v1/system/new_token", Some(&token), json!({}))).await;
    assert_eq!(body["code"], 0, "{body}");
    let api_token = body["data"]["token"].as_str().unwrap().to_string();
    assert!(api_token.starts_with("ragflow-"));

    let (_, body) = send(&app, get("/v1/system/token_list", &api_token)).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/v1/system/token/{api_token}"))
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (_, body) = send(&app, request).await;
    assert_eq!(body["data"], true);

    let (status, _) = send(&app, get("/v1/system/token_list", &api_token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_knowledgebase_lifecycle() {
    let app = setup_app();
    let token = register(&app, "ann@example.com").await;

    let (_, body) = send(&app, post_json("/v1/kb/create", Some(&token), json!({"description": "d"}))).await;
    assert_eq!(body["code"], 101);
    assert_eq!(body["message"], "required argument are missing: name; ");

    let kb_id = create_kb(&app, &token, "manuals").await;
    let second = create_kb(&app, &token, "manuals").await;
    let (_, body) = send(&app, get(&format!("/v1/kb/detail?kb_id={second}"), &token)).await;
    assert_eq!(body["data"]["name"], "manuals(1)");

    let (_, body) = send(&app, get("/v1/kb/list?keywords=MAN&page_size=1", &token)).await;
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["kbs"].as_array().unwrap().len(), 1);

    let (_, body) = send(
        &app,
        post_json(
            "/v1/kb/update",
            Some(&token),
            json!({"kb_id": kb_id, "name": "guides", "description": "d", "permission": "me", "parser_id": "naive", "id": "x"}),
        ),
    )
    .await;
    assert_eq!(body["message"], "Parameter id isn't allowed");

    let (_, body) = send(
        &app,
        post_json(
            "/v1/kb/update",
            Some(&token),
            json!({"kb_id": kb_id, "name": "guides", "description": "d", "parser_id": "naive"}),
        ),
    )
    .await;
    assert_eq!(body["code"], 101);
    assert_eq!(body["message"], "required argument are missing: permission; ");

    let (_, body) = send(
        &app,
        post_json(
            "/v1/kb/update",
            Some(&token),
            json!({"kb_id": kb_id, "name": "guides", "description": "d", "permission": "me", "parser_id": "naive"}),
        ),
    )
    .await;
    assert_eq!(body["code"], 0, "{body}");
    assert_eq!(body["data"]["name"], "guides");

    let (_, body) = send(&app, post_json("/v1/kb/rm", Some(&token), json!({"kb_id": second}))).await;
    assert_eq!(body["data"], true);
    let (_, body) = send(&app, get("/v1/kb/list", &token)).await;
    assert_eq!(body["data"]["total"], 1);

    let (_, body) = send(&app, get(&format!("/v1/kb/{kb_id}/knowledge_graph"), &token)).await;
    assert_eq!(body["data"], json!({"graph": {}, "mind_map": {}}));
}

#[tokio::test]
async fn test_other_users_cannot_touch_a_private_kb() {
    let app = setup_app();
    let owner = register(&app, "ann@example.com").await;
    let other = register(&app, "bob@example.com").await;
    let kb_id = create_kb(&app, &owner, "private").await;

    let (_, body) = send(&app, get(&format!("/v1/kb/detail?kb_id={kb_id}"), &other)).await;
    assert_eq!(body["code"], 103);

    let (_, body) = send(&app, post_json("/v1/kb/rm", Some(&other), json!({"kb_id": kb_id}))).await;
    assert_eq!(body["code"], 109);
}

#[tokio::test]
async fn test_document_upload_parse_and_retrieve() {
    let app = setup_app();
    let token = register(&app, "ann@example.com").await;
    let kb_id = create_kb(&app, &token, "notes").await;

    let (_, body) = send(
        &app,
        post_multipart("/v1/document/upload", &token, &[], &[("a.txt", b"x".as_slice())]),
    )
    .await;
    assert_eq!(body["message"], r#"Lack of "KB ID""#);

    let (_, body) = send(
        &app,
        post_multipart("/v1/document/upload", &token, &[("kb_id", kb_id.as_str())], &[]),
    )
    .await;
    assert_eq!(body["message"], "No file part!");

    let (_, body) = send(
        &app,
        post_multipart(
            "/v1/document/upload",
            &token,
            &[("kb_id", kb_id.as_str())],
            &[("zebra.txt", b"zebras graze on the savanna".as_slice())],
        ),
    )
    .await;
    assert_eq!(body["code"], 0, "{body}");

    let (_, body) = send(&app, get(&format!("/v1/document/list?kb_id={kb_id}"), &token)).await;
    assert_eq!(body["data"]["total"], 1);
    let doc_id = body["data"]["docs"][0]["id"].as_str().unwrap().to_string();

    let (_, body) = send(
        &app,
        post_json(
            "/v1/document/run",
            Some(&token),
            json!({"doc_ids": [doc_id], "run": "1"}),
        ),
    )
    .await;
    assert_eq!(body["code"], 0, "{body}");

    let message = app.backends.queue.pop(0.1).await.unwrap().unwrap();
    assert_eq!(message.doc_id, doc_id);
    app.services.executor.handle(&message).await.unwrap();
    app.services.tasks.update_progress().await.unwrap();

    let (_, body) = send(&app, get(&format!("/v1/document/list?kb_id={kb_id}"), &token)).await;
    let doc = &body["data"]["docs"][0];
    assert_eq!(doc["progress"], 1.0);
    assert_eq!(doc["chunk_num"], 1);

    let (_, body) = send(
        &app,
        post_json(
            "/v1/chunk/retrieval_test",
            Some(&token),
            json!({"kb_id": kb_id, "question": "zebras on the savanna", "similarity_threshold": 0.0}),
        ),
    )
    .await;
    assert_eq!(body["code"], 0, "{body}");
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["chunks"][0]["doc_id"], doc_id.as_str());

    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/v1/document/get/{doc_id}"), &token))
        .await
        .unwrap();
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/txt"
    );

    let (_, body) = send(&app, post_json("/v1/document/rm", Some(&token), json!({"doc_id": doc_id}))).await;
    assert_eq!(body["data"], true);
    let (_, body) = send(&app, get(&format!("/v1/document/list?kb_id={kb_id}"), &token)).await;
    assert_eq!(body["data"]["total"], 0);
}

fn anonymous(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_document_media_is_served_without_a_session() {
    let app = setup_app();
    let token = register(&app, "ann@example.com").await;
    let kb_id = create_kb(&app, &token, "notes").await;

    let (_, body) = send(
        &app,
        post_multipart(
            "/v1/document/upload",
            &token,
            &[("kb_id", kb_id.as_str())],
            &[("plain.txt", b"hello there".as_slice())],
        ),
    )
    .await;
    assert_eq!(body["code"], 0, "{body}");
    let (_, body) = send(&app, get(&format!("/v1/document/list?kb_id={kb_id}"), &token)).await;
    let doc_id = body["data"]["docs"][0]["id"].as_str().unwrap().to_string();

    let response = app
        .router
        .clone()
        .oneshot(anonymous(&format!("/v1/document/get/{doc_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"hello there");

    app.backends
        .blobs
        .put(&kb_id, "thumb.png", b"\x89PNG")
        .await
        .unwrap();
    let response = app
        .router
        .clone()
        .oneshot(anonymous(&format!("/v1/document/image/{kb_id}-thumb.png")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/JPEG");

    let (status, body) = send(&app, anonymous(&format!("/v1/document/thumbnails?doc_ids={doc_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0, "{body}");

    let (status, _) = send(&app, anonymous(&format!("/v1/document/list?kb_id={kb_id}"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_document_validation_messages() {
    let app = setup_app();
    let token = register(&app, "ann@example.com").await;
    let kb_id = create_kb(&app, &token, "notes").await;

    let (_, body) = send(
        &app,
        post_json("/v1/document/create", Some(&token), json!({"name": "draft", "kb_id": kb_id})),
    )
    .await;
    assert_eq!(body["code"], 0, "{body}");
    let doc_id = body["data"]["id"].as_str().unwrap().to_string();

    let (_, body) = send(
        &app,
        post_json("/v1/document/create", Some(&token), json!({"name": "draft", "kb_id": kb_id})),
    )
    .await;
    assert_eq!(body["message"], "Duplicated document name in the same knowledgebase.");

    let (_, body) = send(
        &app,
        post_json(
            "/v1/document/change_status",
            Some(&token),
            json!({"doc_id": doc_id, "status": "7"}),
        ),
    )
    .await;
    assert_eq!(body["message"], r#""Status" must be either 0 or 1!"#);

    let (_, body) = send(
        &app,
        post_json(
            "/v1/document/set_meta",
            Some(&token),
            json!({"doc_id": doc_id, "meta": "[1, 2]"}),
        ),
    )
    .await;
    assert_eq!(body["message"], r#"Meta data should be in Json map format, like {"key": "value"}"#);

    let (_, body) = send(&app, get("/v1/document/thumbnails", &token)).await;
    assert_eq!(body["message"], r#"Lack of "Document ID""#);

    let (_, body) = send(
        &app,
        post_json(
            "/v1/document/parse",
            Some(&token),
            json!({"url": "https://example.com/page"}),
        ),
    )
    .await;
    assert!(body["data"].as_str().unwrap().contains("Welcome to https://example.com/page"));
}

#[tokio::test]
async fn test_files_convert_into_documents() {
    let app = setup_app();
    let token = register(&app, "ann@example.com").await;
    let kb_id = create_kb(&app, &token, "library").await;

    let (_, body) = send(
        &app,
        post_multipart("/v1/file/upload", &token, &[], &[("report.txt", b"quarterly numbers".as_slice())]),
    )
    .await;
    assert_eq!(body["code"], 0, "{body}");
    let file_id = body["data"][0]["id"].as_str().unwrap().to_string();

    let (_, body) = send(
        &app,
        post_json(
            "/v1/file2document/convert",
            Some(&token),
            json!({"file_ids": [file_id], "kb_ids": [kb_id]}),
        ),
    )
    .await;
    assert_eq!(body["code"], 0, "{body}");
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (_, body) = send(&app, get(&format!("/v1/document/list?kb_id={kb_id}"), &token)).await;
    assert_eq!(body["data"]["docs"][0]["name"], "report.txt");

    let (_, body) = send(
        &app,
        post_json("/v1/file2document/rm", Some(&token), json!({"file_ids": []})),
    )
    .await;
    assert_eq!(body["code"], 101);

    let (_, body) = send(
        &app,
        post_json("/v1/file2document/rm", Some(&token), json!({"file_ids": [file_id]})),
    )
    .await;
    assert_eq!(body["data"], true);
    let (_, body) = send(&app, get(&format!("/v1/document/list?kb_id={kb_id}"), &token)).await;
    assert_eq!(body["data"]["total"], 0);
}

#[tokio::test]
async fn test_tenant_invitation_flow() {
    let app = setup_app();
    let owner = register(&app, "ann@example.com").await;
    let guest = register(&app, "bob@example.com").await;

    let (_, info) = send(&app, get("/v1/user/info", &owner)).await;
    let tenant_id = info["data"]["id"].as_str().unwrap().to_string();

    let (_, body) = send(
        &app,
        post_json(
            &format!("/v1/tenant/{tenant_id}/user"),
            Some(&owner),
            json!({"email": "bob@example.com"}),
        ),
    )
    .await;
    assert_eq!(body["code"], 0, "{body}");

    let (_, body) = send(
        &app,
        post_json(
            &format!("/v1/tenant/{tenant_id}/user"),
            Some(&owner),
            json!({"email": "nobody@example.com"}),
        ),
    )
    .await;
    assert_eq!(body["message"], "User not found.");

    let (_, body) = send(&app, get(&format!("/v1/tenant/{tenant_id}/user/list"), &guest)).await;
    assert_eq!(body["code"], 109);

    let request = Request::builder()
        .method("PUT")
        .uri(format!("/v1/tenant/agree/{tenant_id}"))
        .header(header::AUTHORIZATION, format!("Bearer {guest}"))
        .body(Body::empty())
        .unwrap();
    let (_, body) = send(&app, request).await;
    assert_eq!(body["data"], true);

    let (_, body) = send(&app, get(&format!("/v1/tenant/{tenant_id}/user/list"), &owner)).await;
    let roles: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["role"].as_str())
        .collect();
    assert!(roles.contains(&"normal"));
}

#[tokio::test]
async fn test_system_status_reports_components() {
    let app = setup_app();
    let token = register(&app, "ann@example.com").await;

    let (_, body) = send(&app, get("/v1/system/version", &token)).await;
    assert_eq!(body["data"], env!("CARGO_PKG_VERSION"));

    let (_, body) = send(&app, get("/v1/system/status", &token)).await;
    for component in ["doc_engine", "storage", "database", "redis"] {
        assert_eq!(body["data"][component]["status"], "green", "{component}: {body}");
    }

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
