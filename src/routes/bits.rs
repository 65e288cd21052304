//! BITS packet dispatch
//!
//! The single upload endpoint. Every request is a BITS packet named by the
//! `BITS-Packet-Type` header; the handler validates the method, dispatches
//! on the packet type, and answers with an `Ack` envelope on both success
//! and failure. Session state lives entirely on disk (`session::store`).
//!
//! Packet flow:
//! 1. Ping - connectivity probe, no side effects
//! 2. Create-Session - negotiate protocol, mint session directory
//! 3. Fragment - append a byte range to the upload file
//! 4. Cancel-Session / Close-Session - hand the session over to the hook

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header::CONTENT_RANGE, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use crate::error::{BitsError, Result};
use crate::events::BitsEvent;
use crate::protocol::headers::{self, header_str};
use crate::protocol::{parse_content_length, parse_content_range, supported_protocols, PacketType};
use crate::session::SessionId;
use crate::state::AppState;

/// All errors are acknowledged in the remote-file context.
const ERROR_CONTEXT_REMOTE_FILE: u32 = 0x0000_0005;
const DEFAULT_ERROR_CODE: u32 = 0x0000_0000;

/// Entry point for every BITS request.
pub async fn handle_packet(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    request_headers: HeaderMap,
    body: Bytes,
) -> Response {
    match dispatch(&state, &method, &uri, &request_headers, &body).await {
        Ok(response) => response,
        Err(error) => {
            // The error ack echoes the session id only when it is well-formed.
            let session = header_str(&request_headers, headers::SESSION_ID)
                .and_then(|s| s.parse::<SessionId>().ok());
            let session_label = session.as_ref().map(ToString::to_string).unwrap_or_default();
            tracing::warn!(
                method = %method,
                uri = %uri,
                session_id = %session_label,
                %error,
                "request failed"
            );
            error_ack(session.as_ref(), &error)
        }
    }
}

async fn dispatch(
    state: &AppState,
    method: &Method,
    uri: &Uri,
    request_headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response> {
    if method.as_str() != state.config().allowed_method {
        return Err(BitsError::MethodNotAllowed);
    }

    let packet = header_str(request_headers, headers::PACKET_TYPE)
        .and_then(PacketType::parse)
        .ok_or_else(|| BitsError::BadRequest("unknown packet type".into()))?;

    match packet {
        PacketType::Ping => ping(),
        PacketType::CreateSession => create_session(state, request_headers).await,
        PacketType::Fragment => fragment(state, uri, request_headers, body).await,
        PacketType::CancelSession => {
            terminate(state, request_headers, BitsEvent::CancelSession).await
        }
        PacketType::CloseSession => terminate(state, request_headers, BitsEvent::CloseSession).await,
    }
}

/// Connectivity probe.
fn ping() -> Result<Response> {
    tracing::debug!("ping");
    ack().body(Body::empty()).map_err(internal)
}

/// Negotiates the protocol and opens a new session.
async fn create_session(
    state: &AppState,
    request_headers: &HeaderMap,
) -> Result<Response> {
    let offered = supported_protocols(request_headers);
    let chosen = offered
        .iter()
        .find(|p| **p == state.config().protocol)
        .ok_or_else(|| {
            BitsError::BadRequest(format!("no matching protocol in {offered:?}"))
        })?
        .to_string();

    let (id, dir) = state.store().create().await?;
    tracing::info!(session_id = %id, dir = %dir.display(), "session created");

    let response = ack()
        .header(headers::PROTOCOL, chosen.as_str())
        .header(headers::SESSION_ID, id.to_string())
        .header(axum::http::header::ACCEPT_ENCODING, "Identity")
        .body(Body::empty())
        .map_err(internal)?;

    state.events().emit(BitsEvent::CreateSession, &id, &dir);
    Ok(response)
}

/// Appends a fragment to the session's upload file.
async fn fragment(
    state: &AppState,
    uri: &Uri,
    request_headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response> {
    let id: SessionId = header_str(request_headers, headers::SESSION_ID)
        .unwrap_or("")
        .parse()?;

    if !state.store().exists(&id).await {
        return Err(BitsError::BadRequest(format!("no such session {id}")));
    }

    let filename = filename_from_uri(uri)?;
    state.filter().check(filename)?;

    let range_header = header_str(request_headers, CONTENT_RANGE.as_str())
        .ok_or_else(|| BitsError::BadRequest("missing Content-Range".into()))?;
    let range = parse_content_range(range_header)?;

    let max_size = state.config().max_size;
    if max_size > 0 && range.total > max_size {
        return Err(BitsError::TooLarge);
    }

    let fragment_size = parse_content_length(request_headers)?;
    if body.len() as u64 != fragment_size {
        return Err(BitsError::BadRequest(format!(
            "body is {} bytes, Content-Length says {fragment_size}",
            body.len()
        )));
    }
    if range.fragment_len() != fragment_size {
        return Err(BitsError::BadRequest(format!(
            "range covers {} bytes, Content-Length says {fragment_size}",
            range.fragment_len()
        )));
    }

    let path = state.store().file_path(&id, filename)?;

    // Size snapshot and append must not interleave with another fragment
    // for the same session.
    let write = {
        let _guard = state.locks().acquire(&id).await;
        crate::session::append_fragment(&path, &range, body).await?
    };

    tracing::debug!(
        session_id = %id,
        filename,
        range_start = range.start,
        range_end = range.end,
        file_size = write.file_size,
        completed = write.completed,
        "fragment written"
    );

    let response = ack()
        .header(headers::SESSION_ID, id.to_string())
        .header(headers::RECEIVED_CONTENT_RANGE, write.file_size.to_string())
        .body(Body::empty())
        .map_err(internal)?;

    if write.completed {
        tracing::info!(session_id = %id, path = %path.display(), "file received");
        state.events().emit(BitsEvent::ReceiveFile, &id, &path);
    }
    Ok(response)
}

/// Cancel-Session and Close-Session share everything but the event kind.
/// The hook owns cleanup; the directory is not touched here.
async fn terminate(
    state: &AppState,
    request_headers: &HeaderMap,
    event: BitsEvent,
) -> Result<Response> {
    let id: SessionId = header_str(request_headers, headers::SESSION_ID)
        .unwrap_or("")
        .parse()?;

    if !state.store().exists(&id).await {
        return Err(BitsError::BadRequest(format!("no such session {id}")));
    }

    let dir = state.store().session_dir(&id);
    state.locks().release(&id).await;
    tracing::info!(session_id = %id, %event, "session terminated");

    let response = ack()
        .header(headers::SESSION_ID, id.to_string())
        .body(Body::empty())
        .map_err(internal)?;

    state.events().emit(event, &id, &dir);
    Ok(response)
}

/// Final path segment of the request URI, taken literally.
fn filename_from_uri(uri: &Uri) -> Result<&str> {
    match uri.path().rsplit('/').next() {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(BitsError::BadRequest("request URI has no filename".into())),
    }
}

fn ack() -> axum::http::response::Builder {
    Response::builder()
        .status(StatusCode::OK)
        .header(headers::PACKET_TYPE, "Ack")
}

/// Builds the BITS error acknowledgement: empty body, status per error
/// kind, 8-hex-digit code and context headers.
fn error_ack(session: Option<&SessionId>, error: &BitsError) -> Response {
    let mut builder = Response::builder()
        .status(error.status_code())
        .header(headers::PACKET_TYPE, "Ack")
        .header(
            headers::SESSION_ID,
            session.map(ToString::to_string).unwrap_or_default(),
        )
        .header(headers::ERROR_CODE, hex_code(DEFAULT_ERROR_CODE))
        .header(headers::ERROR_CONTEXT, hex_code(ERROR_CONTEXT_REMOTE_FILE));

    if let Some(received) = error.received_bytes() {
        builder = builder.header(headers::RECEIVED_CONTENT_RANGE, received.to_string());
    }

    builder
        .body(Body::empty())
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn hex_code(code: u32) -> String {
    format!("{code:#010x}")
}

fn internal(e: axum::http::Error) -> BitsError {
    BitsError::Internal(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use tempfile::TempDir;

    use crate::config::Config;
    use crate::events::EventSink;

    type EventLog = Arc<Mutex<Vec<(BitsEvent, SessionId, PathBuf)>>>;

    fn test_state(tmp: &TempDir, mutate: impl FnOnce(&mut Config)) -> (AppState, EventLog) {
        let mut config = Config {
            temp_root: tmp.path().to_path_buf(),
            allow_patterns: vec![r".*\.txt$".to_string()],
            ..Config::default()
        };
        mutate(&mut config);

        let log: EventLog = Arc::default();
        let sink = {
            let log = Arc::clone(&log);
            EventSink::new(Arc::new(move |event, id, path| {
                log.lock().unwrap().push((event, id.clone(), path.to_path_buf()));
            }))
        };

        (AppState::new(config, sink).unwrap(), log)
    }

    async fn call(
        state: &AppState,
        method: &str,
        path: &str,
        header_pairs: &[(&str, &str)],
        body: &[u8],
    ) -> Response {
        let mut request_headers = HeaderMap::new();
        for (name, value) in header_pairs {
            request_headers.insert(
                axum::http::HeaderName::try_from(*name).unwrap(),
                value.parse().unwrap(),
            );
        }

        handle_packet(
            State(state.clone()),
            Method::from_bytes(method.as_bytes()).unwrap(),
            path.parse().unwrap(),
            request_headers,
            Bytes::copy_from_slice(body),
        )
        .await
    }

    fn response_header<'a>(response: &'a Response, name: &str) -> &'a str {
        response
            .headers()
            .get(name)
            .unwrap_or_else(|| panic!("missing header {name}"))
            .to_str()
            .unwrap()
    }

    async fn open_session(state: &AppState) -> SessionId {
        let response = call(
            state,
            "BITS_POST",
            "/",
            &[
                ("BITS-Packet-Type", "Create-Session"),
                ("BITS-Supported-Protocols", "{7df0354d-249b-430f-820d-3d2a9bef4931}"),
            ],
            b"",
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        response_header(&response, "BITS-Session-Id").parse().unwrap()
    }

    async fn send_fragment(
        state: &AppState,
        id: &SessionId,
        path: &str,
        content_range: &str,
        body: &[u8],
    ) -> Response {
        let session = id.to_string();
        call(
            state,
            "BITS_POST",
            path,
            &[
                ("BITS-Packet-Type", "Fragment"),
                ("BITS-Session-Id", &session),
                ("Content-Range", content_range),
                ("Content-Length", &body.len().to_string()),
            ],
            body,
        )
        .await
    }

    #[tokio::test]
    async fn ping_acks_with_empty_body() {
        let tmp = TempDir::new().unwrap();
        let (state, _) = test_state(&tmp, |_| {});

        let response = call(&state, "BITS_POST", "/", &[("BITS-Packet-Type", "Ping")], b"").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_header(&response, "BITS-Packet-Type"), "Ack");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn wrong_method_is_refused() {
        let tmp = TempDir::new().unwrap();
        let (state, _) = test_state(&tmp, |_| {});

        let response = call(&state, "POST", "/", &[("BITS-Packet-Type", "Ping")], b"").await;

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response_header(&response, "BITS-Packet-Type"), "Ack");
        assert_eq!(response_header(&response, "BITS-Error-Code"), "0x00000000");
        assert_eq!(response_header(&response, "BITS-Error-Context"), "0x00000005");
    }

    #[tokio::test]
    async fn unknown_packet_type_is_a_bad_request() {
        let tmp = TempDir::new().unwrap();
        let (state, _) = test_state(&tmp, |_| {});

        let response =
            call(&state, "BITS_POST", "/", &[("BITS-Packet-Type", "Download")], b"").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = call(&state, "BITS_POST", "/", &[], b"").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_session_negotiates_and_creates_directory() {
        let tmp = TempDir::new().unwrap();
        let (state, log) = test_state(&tmp, |_| {});

        let response = call(
            &state,
            "BITS_POST",
            "/",
            &[
                ("BITS-Packet-Type", "Create-Session"),
                (
                    "BITS-Supported-Protocols",
                    "{deadbeef-0000-0000-0000-000000000000} {7df0354d-249b-430f-820d-3d2a9bef4931}",
                ),
            ],
            b"",
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response_header(&response, "BITS-Protocol"),
            "{7df0354d-249b-430f-820d-3d2a9bef4931}"
        );
        assert_eq!(response_header(&response, "Accept-Encoding"), "Identity");

        let id: SessionId = response_header(&response, "BITS-Session-Id").parse().unwrap();
        assert!(tmp.path().join(id.to_string()).is_dir());

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, BitsEvent::CreateSession);
        assert_eq!(log[0].1, id);
    }

    #[tokio::test]
    async fn create_session_without_matching_protocol_fails() {
        let tmp = TempDir::new().unwrap();
        let (state, log) = test_state(&tmp, |_| {});

        let response = call(
            &state,
            "BITS_POST",
            "/",
            &[
                ("BITS-Packet-Type", "Create-Session"),
                ("BITS-Supported-Protocols", "{deadbeef-0000-0000-0000-000000000000}"),
            ],
            b"",
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn two_fragment_upload_assembles_hello_world() {
        let tmp = TempDir::new().unwrap();
        let (state, log) = test_state(&tmp, |_| {});
        let id = open_session(&state).await;

        let response = send_fragment(&state, &id, "/hello.txt", "bytes 0-4/10", b"Hello").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_header(&response, "BITS-Received-Content-Range"), "5");
        assert_eq!(response_header(&response, "BITS-Session-Id"), id.to_string());

        let response = send_fragment(&state, &id, "/hello.txt", "bytes 5-9/10", b"World").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_header(&response, "BITS-Received-Content-Range"), "10");

        let file = tmp.path().join(id.to_string()).join("hello.txt");
        assert_eq!(std::fs::read(&file).unwrap(), b"HelloWorld");

        let receives: Vec<_> = log
            .lock()
            .unwrap()
            .iter()
            .filter(|(event, _, _)| *event == BitsEvent::ReceiveFile)
            .cloned()
            .collect();
        assert_eq!(receives.len(), 1);
        assert_eq!(receives[0].1, id);
        assert_eq!(receives[0].2, file);
    }

    #[tokio::test]
    async fn replayed_fragment_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let (state, log) = test_state(&tmp, |_| {});
        let id = open_session(&state).await;

        send_fragment(&state, &id, "/hello.txt", "bytes 0-4/10", b"Hello").await;
        send_fragment(&state, &id, "/hello.txt", "bytes 5-9/10", b"World").await;

        let response = send_fragment(&state, &id, "/hello.txt", "bytes 0-4/10", b"Hello").await;
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response_header(&response, "BITS-Received-Content-Range"), "10");

        let file = tmp.path().join(id.to_string()).join("hello.txt");
        assert_eq!(std::fs::read(&file).unwrap(), b"HelloWorld");

        // No second receive event for the replay.
        let receives = log
            .lock()
            .unwrap()
            .iter()
            .filter(|(event, _, _)| *event == BitsEvent::ReceiveFile)
            .count();
        assert_eq!(receives, 1);
    }

    #[tokio::test]
    async fn gap_fragment_is_refused_with_current_size() {
        let tmp = TempDir::new().unwrap();
        let (state, _) = test_state(&tmp, |_| {});
        let id = open_session(&state).await;

        let response = send_fragment(&state, &id, "/hello.txt", "bytes 5-9/10", b"World").await;

        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response_header(&response, "BITS-Received-Content-Range"), "0");
        assert!(!tmp.path().join(id.to_string()).join("hello.txt").exists());
    }

    #[tokio::test]
    async fn oversize_file_is_refused() {
        let tmp = TempDir::new().unwrap();
        let (state, _) = test_state(&tmp, |c| c.max_size = 100);
        let id = open_session(&state).await;

        let body = vec![0u8; 50];
        let response = send_fragment(&state, &id, "/big.txt", "bytes 0-49/200", &body).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        // Exactly at the limit is fine.
        let body = vec![0u8; 50];
        let response = send_fragment(&state, &id, "/big.txt", "bytes 0-49/100", &body).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn fragment_requires_a_live_session() {
        let tmp = TempDir::new().unwrap();
        let (state, _) = test_state(&tmp, |_| {});

        // Malformed id.
        let response = call(
            &state,
            "BITS_POST",
            "/hello.txt",
            &[
                ("BITS-Packet-Type", "Fragment"),
                ("BITS-Session-Id", "not-a-uuid"),
                ("Content-Range", "bytes 0-4/10"),
                ("Content-Length", "5"),
            ],
            b"Hello",
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response_header(&response, "BITS-Session-Id"), "");

        // Well-formed id, but no directory behind it.
        let ghost = SessionId::mint();
        let response = send_fragment(&state, &ghost, "/hello.txt", "bytes 0-4/10", b"Hello").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response_header(&response, "BITS-Session-Id"), ghost.to_string());
    }

    #[tokio::test]
    async fn fragment_validates_headers_and_body() {
        let tmp = TempDir::new().unwrap();
        let (state, _) = test_state(&tmp, |_| {});
        let id = open_session(&state).await;
        let session = id.to_string();

        // Missing filename.
        let response = call(
            &state,
            "BITS_POST",
            "/",
            &[
                ("BITS-Packet-Type", "Fragment"),
                ("BITS-Session-Id", &session),
                ("Content-Range", "bytes 0-4/10"),
                ("Content-Length", "5"),
            ],
            b"Hello",
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Filter rejection.
        let response = send_fragment(&state, &id, "/prog.exe", "bytes 0-4/10", b"Hello").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Missing Content-Range.
        let response = call(
            &state,
            "BITS_POST",
            "/hello.txt",
            &[
                ("BITS-Packet-Type", "Fragment"),
                ("BITS-Session-Id", &session),
                ("Content-Length", "5"),
            ],
            b"Hello",
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Body shorter than Content-Length.
        let response = call(
            &state,
            "BITS_POST",
            "/hello.txt",
            &[
                ("BITS-Packet-Type", "Fragment"),
                ("BITS-Session-Id", &session),
                ("Content-Range", "bytes 0-4/10"),
                ("Content-Length", "5"),
            ],
            b"Hi",
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Range width disagrees with Content-Length.
        let response = call(
            &state,
            "BITS_POST",
            "/hello.txt",
            &[
                ("BITS-Packet-Type", "Fragment"),
                ("BITS-Session-Id", &session),
                ("Content-Range", "bytes 0-9/20"),
                ("Content-Length", "5"),
            ],
            b"Hello",
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Nothing was written by any of the failed attempts.
        assert!(!tmp.path().join(session).join("hello.txt").exists());
    }

    #[tokio::test]
    async fn cancel_and_close_emit_events_and_gate_on_existence() {
        let tmp = TempDir::new().unwrap();
        let (state, log) = test_state(&tmp, |_| {});
        let id = open_session(&state).await;
        let session = id.to_string();

        let response = call(
            &state,
            "BITS_POST",
            "/",
            &[("BITS-Packet-Type", "Close-Session"), ("BITS-Session-Id", &session)],
            b"",
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_header(&response, "BITS-Session-Id"), session);

        // The hook owns cleanup; simulate it removing the directory.
        std::fs::remove_dir_all(tmp.path().join(&session)).unwrap();

        // Terminal is absorbing: the directory is gone, so any further
        // packet for this session fails.
        let response = call(
            &state,
            "BITS_POST",
            "/",
            &[("BITS-Packet-Type", "Cancel-Session"), ("BITS-Session-Id", &session)],
            b"",
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let log = log.lock().unwrap();
        let kinds: Vec<_> = log.iter().map(|(event, _, _)| *event).collect();
        assert_eq!(kinds, vec![BitsEvent::CreateSession, BitsEvent::CloseSession]);
    }

    #[tokio::test]
    async fn cancel_session_emits_cancel_event() {
        let tmp = TempDir::new().unwrap();
        let (state, log) = test_state(&tmp, |_| {});
        let id = open_session(&state).await;
        let session = id.to_string();

        let response = call(
            &state,
            "BITS_POST",
            "/",
            &[("BITS-Packet-Type", "Cancel-Session"), ("BITS-Session-Id", &session)],
            b"",
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let log = log.lock().unwrap();
        assert_eq!(log.last().unwrap().0, BitsEvent::CancelSession);
        assert_eq!(log.last().unwrap().2, tmp.path().join(&session));
    }

    #[tokio::test]
    async fn traversal_filenames_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let (state, _) = test_state(&tmp, |c| c.allow_patterns = vec![".*".into()]);
        let id = open_session(&state).await;

        let response = send_fragment(&state, &id, "/a/../..", "bytes 0-4/10", b"Hello").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn received_range_is_monotonic_across_acks() {
        let tmp = TempDir::new().unwrap();
        let (state, _) = test_state(&tmp, |_| {});
        let id = open_session(&state).await;

        let mut last = 0u64;
        for (range, body) in [
            ("bytes 0-3/12", &b"aaaa"[..]),
            ("bytes 2-7/12", b"aabbbb"),
            ("bytes 8-11/12", b"cccc"),
        ] {
            let response = send_fragment(&state, &id, "/data.txt", range, body).await;
            assert_eq!(response.status(), StatusCode::OK);
            let received: u64 = response_header(&response, "BITS-Received-Content-Range")
                .parse()
                .unwrap();
            assert!(received >= last);
            assert!(received <= 12);
            last = received;
        }
        assert_eq!(last, 12);

        let file = tmp.path().join(id.to_string()).join("data.txt");
        assert_eq!(std::fs::read(&file).unwrap(), b"aaaabbbbcccc");
    }
}
