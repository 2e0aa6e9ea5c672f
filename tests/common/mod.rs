use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;
use turnstream::engine::{EngineOptions, EngineUpdate, SessionEngine};
use turnstream::persistence::PersistenceBridge;
use turnstream::stream::transport::http::HttpTransport;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const STREAM_PATH: &str = "/api/agentos/chat/stream";

#[allow(dead_code)]
pub fn temp_db() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let db_path = tmp.path().join("sessions.db");
    (tmp, db_path)
}

/// Transport pointed at the mock server's stream endpoint.
#[allow(dead_code)]
pub fn http_transport(server: &MockServer) -> HttpTransport {
    let base = url::Url::parse(&format!("{}/api/agentos", server.uri())).expect("valid url");
    HttpTransport::new(&base, "/chat/stream", &HashMap::new(), Duration::from_secs(5))
        .expect("transport")
}

#[allow(dead_code)]
pub fn engine(server: &MockServer, db_path: Option<&Path>) -> SessionEngine {
    let persistence =
        db_path.map(|p| PersistenceBridge::open(Some(p), 500).expect("open persistence"));
    SessionEngine::new(
        Arc::new(http_transport(server)),
        persistence,
        EngineOptions::default(),
    )
}

/// Engine with no network behind it, for replaying a database.
#[allow(dead_code)]
pub async fn offline_engine(db_path: &Path) -> SessionEngine {
    let base = url::Url::parse("http://127.0.0.1:9/api").expect("valid url");
    let transport =
        HttpTransport::new(&base, "/chat/stream", &HashMap::new(), Duration::from_secs(1))
            .expect("transport");
    let persistence = PersistenceBridge::open(Some(db_path), 500).expect("open persistence");
    let mut engine = SessionEngine::new(
        Arc::new(transport),
        Some(persistence),
        EngineOptions::default(),
    );
    engine.bootstrap().await.expect("bootstrap");
    engine
}

/// Serve `records` as a server-sent-event body.
#[allow(dead_code)]
pub fn sse_body(records: &[Value]) -> Vec<u8> {
    let mut body = String::from(": stream open\n\n");
    for record in records {
        body.push_str("event: chunk\n");
        body.push_str(&format!("data: {}\n\n", record));
    }
    body.into_bytes()
}

/// Serve `lines` as a newline-delimited body, verbatim.
#[allow(dead_code)]
pub fn ndjson_body(lines: &[String]) -> Vec<u8> {
    let mut body = lines.join("\n");
    body.push('\n');
    body.into_bytes()
}

#[allow(dead_code)]
pub async fn mount_stream(server: &MockServer, body: Vec<u8>, mime: &str) {
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, mime))
        .mount(server)
        .await;
}

/// Drive the engine until no stream is left, collecting every update.
#[allow(dead_code)]
pub async fn drain(engine: &mut SessionEngine) -> Vec<EngineUpdate> {
    let mut updates = Vec::new();
    while engine.active_streams() > 0 {
        match tokio::time::timeout(Duration::from_secs(5), engine.next_update()).await {
            Ok(Some(update)) => updates.push(update),
            Ok(None) => break,
            Err(_) => panic!("engine did not settle"),
        }
    }
    updates
}
