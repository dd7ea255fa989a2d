//! HTTP source against a local server that replays canned responses.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pagesync_connectors::{HttpPageSource, HttpSourceConfig, MemorySink};
use pagesync_engine::{PageRequest, PageSource, ProtocolAdapter, RequestContext, RetryPolicy, SchemaRegistry};
use pagesync_types::error::ErrorCategory;
use pagesync_types::protocol::{Request, Response, Secrets};
use pagesync_types::schema::{FieldSchema, FieldType, Resource, Schema};
use pagesync_types::state::{ConnectorId, RunStatus};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

struct Canned {
    status: u16,
    headers: Vec<(&'static str, &'static str)>,
    body: String,
}

impl Canned {
    fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    fn header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.push((name, value));
        self
    }
}

struct Server {
    base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl Server {
    /// Raw requests received so far, lowercased.
    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

fn header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn content_length(head: &str) -> usize {
    head.lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// One response per connection, in order; 404 once the script runs out.
async fn serve(responses: Vec<Canned>) -> Server {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let queue = Arc::new(Mutex::new(VecDeque::from(responses)));
    let requests = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&requests);

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = stream.read(&mut chunk).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                if let Some(end) = header_end(&buf) {
                    let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                    if buf.len() >= end + 4 + content_length(&head) {
                        break;
                    }
                }
            }
            log.lock().unwrap().push(String::from_utf8_lossy(&buf).to_lowercase());

            let canned = queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Canned::json(404, serde_json::json!({})));
            let mut response = format!(
                "HTTP/1.1 {} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n",
                canned.status,
                canned.body.len()
            );
            for (name, value) in &canned.headers {
                response.push_str(&format!("{name}: {value}\r\n"));
            }
            response.push_str("\r\n");
            response.push_str(&canned.body);
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    Server {
        base_url: format!("http://{addr}"),
        requests,
    }
}

fn listing(ids: &[&str], after: Option<&str>) -> serde_json::Value {
    let children: Vec<_> = ids
        .iter()
        .map(|id| serde_json::json!({"kind": "t3", "data": {"id": id, "score": 1}}))
        .collect();
    serde_json::json!({"kind": "Listing", "data": {"after": after, "children": children}})
}

fn posts() -> Resource {
    let mut resource = Resource::new(Schema::new(
        "posts",
        vec![
            FieldSchema::new("id", FieldType::String).primary_key(),
            FieldSchema::new("score", FieldType::Integer),
        ],
    ));
    resource.endpoint = Some("r/rust/new".to_string());
    resource
}

fn source(server: &Server) -> HttpPageSource {
    let mut config = HttpSourceConfig::new(server.base_url.clone());
    config.page_size = 2;
    config.timeout_secs = 5;
    config.token_url = format!("{}/api/v1/access_token", server.base_url);
    HttpPageSource::new(config).unwrap()
}

fn secrets(value: serde_json::Value) -> Secrets {
    serde_json::from_value(value).unwrap()
}

fn bearer_ctx() -> RequestContext {
    RequestContext::new(secrets(serde_json::json!({"access_token": "tok"})), CancellationToken::new())
}

#[tokio::test]
async fn pages_follow_the_continuation_token() {
    let server = serve(vec![
        Canned::json(200, listing(&["a", "b"], Some("t3_b"))),
        Canned::json(200, listing(&["c"], None)),
    ])
    .await;
    let source = source(&server);
    let ctx = bearer_ctx();

    let first = source.next_page(&ctx, &posts(), &PageRequest::default()).await.unwrap();
    assert!(first.has_more);
    assert_eq!(first.next_cursor.as_deref(), Some("t3_b"));
    assert_eq!(first.records.len(), 2);

    let request = PageRequest {
        cursor: None,
        page_token: first.next_cursor.clone(),
    };
    let second = source.next_page(&ctx, &posts(), &request).await.unwrap();
    assert!(!second.has_more);
    assert_eq!(second.records[0]["id"], "c");

    let requests = server.requests();
    assert!(requests[0].starts_with("get /r/rust/new?limit=2 "), "{}", requests[0]);
    assert!(requests[0].contains("authorization: bearer tok"));
    assert!(requests[1].starts_with("get /r/rust/new?limit=2&after=t3_b "), "{}", requests[1]);
}

#[tokio::test]
async fn too_many_requests_carries_retry_after() {
    let server = serve(vec![Canned::json(429, serde_json::json!({"message": "slow down"})).header("retry-after", "3")]).await;

    let err = source(&server)
        .next_page(&bearer_ctx(), &posts(), &PageRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::RateLimit);
    assert_eq!(err.retry_after_ms, Some(3_000));
    assert!(err.retryable);
}

#[tokio::test]
async fn forbidden_is_an_auth_failure() {
    let server = serve(vec![Canned::json(403, serde_json::json!({"error": 403}))]).await;

    let err = source(&server)
        .next_page(&bearer_ctx(), &posts(), &PageRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::Auth);
    assert!(err.is_request_fatal());
}

#[tokio::test]
async fn refused_connection_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = HttpSourceConfig::new(format!("http://{addr}"));
    config.timeout_secs = 5;
    let err = HttpPageSource::new(config)
        .unwrap()
        .next_page(&bearer_ctx(), &posts(), &PageRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::TransientNetwork);
    assert!(err.retryable);
}

#[tokio::test]
async fn password_grant_token_is_fetched_once_and_reused() {
    let server = serve(vec![
        Canned::json(200, serde_json::json!({"access_token": "abc", "token_type": "bearer", "expires_in": 3600})),
        Canned::json(200, listing(&["a"], Some("t3_a"))),
        Canned::json(200, listing(&["b"], None)),
    ])
    .await;
    let source = source(&server);
    let ctx = RequestContext::new(
        secrets(serde_json::json!({
            "client_id": "id",
            "client_secret": "shh",
            "username": "u",
            "password": "pw"
        })),
        CancellationToken::new(),
    );

    source.next_page(&ctx, &posts(), &PageRequest::default()).await.unwrap();
    let request = PageRequest {
        cursor: None,
        page_token: Some("t3_a".into()),
    };
    source.next_page(&ctx, &posts(), &request).await.unwrap();

    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[0].starts_with("post /api/v1/access_token "));
    assert!(requests[0].contains("authorization: basic "));
    assert!(requests[0].contains("grant_type=password"));
    assert!(requests[1].contains("authorization: bearer abc"));
    assert!(requests[2].contains("authorization: bearer abc"));
}

#[tokio::test]
async fn rejected_password_grant_is_an_auth_failure() {
    let server = serve(vec![Canned::json(401, serde_json::json!({"error": "invalid_grant"}))]).await;
    let ctx = RequestContext::new(
        secrets(serde_json::json!({
            "client_id": "id",
            "client_secret": "shh",
            "username": "u",
            "password": "wrong"
        })),
        CancellationToken::new(),
    );

    let err = source(&server)
        .next_page(&ctx, &posts(), &PageRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.category, ErrorCategory::Auth);
    assert_eq!(err.code, "TOKEN_REQUEST_REJECTED");
}

fn adapter(server: &Server, sink: Arc<MemorySink>) -> ProtocolAdapter {
    let registry = SchemaRegistry::new(vec![posts()]).unwrap();
    let policy = RetryPolicy {
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        ..RetryPolicy::default()
    };
    ProtocolAdapter::new(
        Arc::new(registry),
        Arc::new(source(server)),
        sink,
        ConnectorId::new("listings"),
    )
    .with_retry_policy(policy)
}

#[tokio::test]
async fn sync_retries_unavailable_upstream_and_stores_every_row() {
    let server = serve(vec![
        Canned::json(503, serde_json::json!({"error": "busy"})),
        Canned::json(200, listing(&["a", "b"], Some("t3_b"))),
        Canned::json(200, listing(&["b", "c"], None)),
    ])
    .await;
    let sink = Arc::new(MemorySink::new());
    let adapter = adapter(&server, Arc::clone(&sink));

    let request = Request::parse(r#"{"action": "sync", "secrets": {"access_token": "tok"}, "state": {}}"#).unwrap();
    let handled = adapter.handle(request, CancellationToken::new()).await.unwrap();
    let Response::Sync(response) = handled.response else {
        panic!("expected a sync response");
    };

    assert_eq!(response.runs.len(), 1);
    assert_eq!(response.runs[0].status, RunStatus::Complete);
    assert_eq!(response.runs[0].rows_emitted, 4);
    assert!(response.state.contains_key("posts"));
    let ids: Vec<_> = sink.rows("posts").await.iter().map(|r| r["id"].clone()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(server.requests().len(), 3);
}

#[tokio::test]
async fn test_action_probes_the_first_resource() {
    let server = serve(vec![Canned::json(200, listing(&["a"], None))]).await;
    let adapter = adapter(&server, Arc::new(MemorySink::new()));

    let request = Request::parse(r#"{"selection": {"action": "test"}, "secrets": {"access_token": "tok"}}"#).unwrap();
    let handled = adapter.handle(request, CancellationToken::new()).await.unwrap();
    let Response::Test(response) = handled.response else {
        panic!("expected a test response");
    };
    assert!(response.success);
    assert_eq!(response.message.as_deref(), Some("Connection test passed"));
    assert!(server.requests()[0].starts_with("get /r/rust/new?limit=1 "));
}
