use polyport_core::{
    DependencyContext, OracleAdapter, OracleBackend, OracleConfig, OracleError, OracleRequest,
    TransportError, TranslationTask,
};
use polyport_graph::{FileId, SourceFile};
use polyport_oracle::HttpBackend;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Reply};

/// Start a chat-completions stub and return its base URL
fn serve<F>(handler: F) -> String
where
    F: Fn(Option<String>, Value) -> Response + Clone + Send + Sync + 'static,
{
    let route = warp::post()
        .and(warp::path!("v1" / "chat" / "completions"))
        .and(warp::header::optional::<String>("authorization"))
        .and(warp::body::json())
        .map(handler);
    let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    format!("http://{addr}/v1")
}

fn completion(content: &str) -> Response {
    warp::reply::json(&json!({
        "id": "chatcmpl-1",
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
    }))
    .into_response()
}

fn status(code: StatusCode, body: &str) -> Response {
    warp::reply::with_status(body.to_string(), code).into_response()
}

fn request() -> OracleRequest {
    OracleRequest {
        file: FileId::new("list.c"),
        model: "gpt-4".into(),
        temperature: 0.2,
        max_tokens: 256,
        system: "You translate C to Python.".into(),
        user: "int x = 1;".into(),
        refinement: false,
    }
}

#[tokio::test]
async fn sends_chat_completion_and_reads_content() {
    let seen: Arc<Mutex<Option<(Option<String>, Value)>>> = Arc::new(Mutex::new(None));
    let capture = Arc::clone(&seen);
    let url = serve(move |auth, body| {
        *capture.lock().unwrap() = Some((auth, body));
        completion("```python\nx = 1\n```")
    });

    let backend = HttpBackend::new(&url, Some("test-key".into())).unwrap();
    let text = backend.complete(&request()).await.unwrap();
    assert_eq!(text, "```python\nx = 1\n```");

    let (auth, body) = seen.lock().unwrap().clone().unwrap();
    assert_eq!(auth.as_deref(), Some("Bearer test-key"));
    assert_eq!(body["model"], "gpt-4");
    assert_eq!(body["max_tokens"], 256);
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][1]["content"], "int x = 1;");
}

#[tokio::test]
async fn no_key_sends_no_authorization() {
    let seen = Arc::new(Mutex::new(Some(String::new())));
    let capture = Arc::clone(&seen);
    let url = serve(move |auth, _| {
        *capture.lock().unwrap() = auth;
        completion("x = 1")
    });
    HttpBackend::new(&url, None).unwrap().complete(&request()).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), None);
}

#[tokio::test]
async fn rate_limit_carries_retry_after() {
    let url = serve(|_, _| {
        warp::reply::with_header(status(StatusCode::TOO_MANY_REQUESTS, "slow down"), "retry-after", "3")
            .into_response()
    });
    let err = HttpBackend::new(&url, None).unwrap().complete(&request()).await.unwrap_err();
    assert_eq!(
        err,
        TransportError::RateLimited {
            retry_after: Some(Duration::from_secs(3))
        }
    );
}

#[tokio::test]
async fn server_errors_are_transient_client_errors_rejected() {
    let url = serve(|_, _| status(StatusCode::SERVICE_UNAVAILABLE, "overloaded"));
    let err = HttpBackend::new(&url, None).unwrap().complete(&request()).await.unwrap_err();
    assert!(matches!(err, TransportError::Transient(ref m) if m.contains("overloaded")));

    let url = serve(|_, _| status(StatusCode::BAD_REQUEST, "context length exceeded"));
    let err = HttpBackend::new(&url, None).unwrap().complete(&request()).await.unwrap_err();
    assert!(matches!(err, TransportError::Rejected(ref m) if m.contains("context length exceeded")));
}

#[tokio::test]
async fn empty_choices_are_transient() {
    let url = serve(|_, _| warp::reply::json(&json!({ "choices": [] })).into_response());
    let err = HttpBackend::new(&url, None).unwrap().complete(&request()).await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn refused_connection_is_transient() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let backend = HttpBackend::new(&format!("http://127.0.0.1:{port}/v1"), None).unwrap();
    let err = backend.complete(&request()).await.unwrap_err();
    assert!(matches!(err, TransportError::Transient(_)));
}

fn fast_oracle_config(endpoint: &str) -> OracleConfig {
    OracleConfig {
        endpoint: endpoint.to_string(),
        timeout: Duration::from_secs(5),
        max_retries: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        ..OracleConfig::default()
    }
}

#[tokio::test]
async fn adapter_retries_through_server_errors() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let url = serve(move |_, _| {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            status(StatusCode::BAD_GATEWAY, "upstream")
        } else {
            completion("Sure:\n```python\ndef push(x):\n    return x\n```")
        }
    });

    let config = fast_oracle_config(&url);
    let backend = HttpBackend::new(&config.endpoint, None).unwrap();
    let oracle = OracleAdapter::new(Arc::new(backend), config, "c", "python");
    let source = SourceFile::new("list.c", "int push(int x) { return x; }");
    let context = DependencyContext::new();
    let task = TranslationTask {
        source: &source,
        module: "list",
        feedback: None,
        context: &context,
    };

    let candidate = oracle.translate(&task).await.unwrap();
    assert_eq!(candidate, "def push(x):\n    return x");
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn adapter_gives_up_after_retry_bound() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let url = serve(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        status(StatusCode::INTERNAL_SERVER_ERROR, "boom")
    });

    let config = fast_oracle_config(&url);
    let backend = HttpBackend::new(&config.endpoint, None).unwrap();
    let oracle = OracleAdapter::new(Arc::new(backend), config, "c", "python");
    let source = SourceFile::new("list.c", "int x;");
    let context = DependencyContext::new();
    let task = TranslationTask {
        source: &source,
        module: "list",
        feedback: None,
        context: &context,
    };

    let err = oracle.translate(&task).await.unwrap_err();
    assert!(matches!(err, OracleError::Unavailable { attempts: 4, .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 4);
}
