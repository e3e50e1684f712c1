//! End-to-end `rget` scenarios against a mocked backend.
//!
//! Mirrors `AharonR-downloader/tests/download_integration.rs`'s shape:
//! spin up a `wiremock` server, drive the public API, assert on the
//! filesystem and on the emitted outcomes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use fastdbfs_core::config::{EngineSettings, Profile};
use fastdbfs_core::predicate::PredicateBundle;
use fastdbfs_core::session::Session;
use fastdbfs_core::WalkEntry;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn test_engine(workers: usize, chunk_size: i64) -> EngineSettings {
    EngineSettings {
        workers,
        chunk_size,
        max_retries: 1,
        error_delay: 0,
        error_delay_increment: 0,
        pager: "less".to_string(),
        editor: None,
    }
}

async fn open_session(server: &MockServer, engine: EngineSettings) -> Session {
    let profile = Profile {
        host: server.uri(),
        cluster_id: None,
        token: "tok".to_string(),
    };
    Session::open(&profile, engine).await.expect("session opens")
}

fn status_body(path: &str, is_dir: bool, size: i64) -> serde_json::Value {
    json!({ "path": path, "is_dir": is_dir, "file_size": size, "modification_time": 0 })
}

/// S1 — `{ /d/a (100 B), /d/b (2 MiB), /d/sub/c (10 B) }`, chunk_size=1
/// MiB, workers=4: `rget /d ./out` produces identical files and the
/// walker visits every entry (invariant 1: strictly ascending order).
#[tokio::test]
async fn rget_mirrors_a_tree_and_emits_ascending_order() {
    let server = MockServer::start().await;
    let out_dir = TempDir::new().unwrap();

    let a_content = vec![b'a'; 100];
    let b_content = vec![b'b'; 2 * 1024 * 1024];
    let c_content = vec![b'c'; 10];

    let sizes: HashMap<&str, (bool, i64)> = HashMap::from([
        ("/", (true, 0)),
        ("/d", (true, 0)),
        ("/d/a", (false, 100)),
        ("/d/b", (false, 2 * 1024 * 1024)),
        ("/d/sub", (true, 0)),
        ("/d/sub/c", (false, 10)),
    ]);
    Mock::given(method("GET"))
        .and(path("/api/2.0/dbfs/get-status"))
        .respond_with(move |req: &Request| {
            let query: HashMap<_, _> = req.url.query_pairs().collect();
            let requested = query.get("path").map(|s| s.to_string()).unwrap_or_default();
            match sizes.get(requested.as_str()) {
                Some((is_dir, size)) => ResponseTemplate::new(200).set_body_json(status_body(&requested, *is_dir, *size)),
                None => ResponseTemplate::new(404).set_body_json(json!({
                    "error_code": "RESOURCE_DOES_NOT_EXIST", "message": "no"
                })),
            }
        })
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/2.0/dbfs/list"))
        .and(query_param("path", "/d"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [
                status_body("/d/a", false, 100),
                status_body("/d/b", false, 2 * 1024 * 1024),
                status_body("/d/sub", true, 0),
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/2.0/dbfs/list"))
        .and(query_param("path", "/d/sub"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [status_body("/d/sub/c", false, 10)],
        })))
        .mount(&server)
        .await;

    mount_read(&server, "/d/a", &a_content).await;
    mount_read(&server, "/d/b", &b_content).await;
    mount_read(&server, "/d/sub/c", &c_content).await;

    let session = open_session(&server, test_engine(4, 1024 * 1024)).await;

    // Invariant 1 (find ordering): `find`'s own emission is strictly
    // ascending, independent of how the later concurrent transfer phase
    // happens to complete.
    let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let order_cb = order.clone();
    session
        .find("/d", PredicateBundle::default(), None, move |entry: WalkEntry| {
            order_cb.lock().unwrap().push(entry.relpath.clone());
        })
        .await
        .expect("find succeeds");
    let seen = order.lock().unwrap().clone();
    let mut sorted = seen.clone();
    sorted.sort();
    assert_eq!(seen, sorted, "find must emit relpaths in strictly ascending order");

    // S1: `rget` reproduces every file byte-for-byte regardless of the
    // order the concurrent transfer swarm happens to finish in.
    let live: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let live_cb = live.clone();
    let outcomes = session
        .rget(
            "/d",
            out_dir.path().to_str().unwrap(),
            true,
            false,
            PredicateBundle::default(),
            None,
            move |outcome: fastdbfs_core::MirrorOutcome| live_cb.lock().unwrap().push(outcome.relpath),
        )
        .await
        .expect("rget succeeds");
    assert_eq!(live.lock().unwrap().len(), outcomes.len(), "cb fires once per outcome");
    for outcome in &outcomes {
        assert!(outcome.good, "{}: {:?}", outcome.relpath, outcome.err);
    }

    assert_eq!(std::fs::read(out_dir.path().join("a")).unwrap(), a_content);
    assert_eq!(std::fs::read(out_dir.path().join("b")).unwrap(), b_content);
    assert_eq!(std::fs::read(out_dir.path().join("sub/c")).unwrap(), c_content);
}

/// S5 (rate-limit half) — the backend returns the rate-limit header on
/// the 1st, 3rd, and 5th responses to the same call; `max_retries=0`.
/// Rate limits never consume the retry budget, so the call still
/// succeeds even with zero budget for real retries (invariant 6).
#[tokio::test]
async fn rate_limited_responses_never_consume_the_retry_budget() {
    let server = MockServer::start().await;
    let hit_count = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let hits = hit_count.clone();

    Mock::given(method("GET"))
        .and(path("/api/2.0/dbfs/get-status"))
        .respond_with(move |_req: &Request| {
            let n = hits.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            if n == 1 || n == 3 || n == 5 {
                ResponseTemplate::new(200).insert_header("x-envoy-ratelimited", "true")
            } else {
                ResponseTemplate::new(200).set_body_json(status_body("/d", true, 0))
            }
        })
        .mount(&server)
        .await;

    let mut engine = test_engine(2, 1024);
    engine.max_retries = 0;
    let profile = Profile {
        host: server.uri(),
        cluster_id: None,
        token: "tok".to_string(),
    };
    let session = Session::open(&profile, engine).await;
    assert!(session.is_ok(), "rate limits must not consume a zero-sized retry budget");
    assert!(hit_count.load(std::sync::atomic::Ordering::SeqCst) >= 6);
}

/// S6 — `mv src dst` where `dst` exists as a file and `overwrite=true`:
/// one failing move, one delete, one successful move.
#[tokio::test]
async fn mv_overwrite_deletes_existing_file_target_then_retries() {
    let server = MockServer::start().await;
    let move_calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let calls = move_calls.clone();

    Mock::given(method("GET"))
        .and(path("/api/2.0/dbfs/get-status"))
        .respond_with(move |req: &Request| {
            let query: HashMap<_, _> = req.url.query_pairs().collect();
            let requested = query.get("path").map(|s| s.as_ref()).unwrap_or("/");
            ResponseTemplate::new(200).set_body_json(status_body(requested, false, 10))
        })
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/2.0/dbfs/move"))
        .respond_with(move |_req: &Request| {
            let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n == 0 {
                ResponseTemplate::new(409).set_body_json(json!({
                    "error_code": "RESOURCE_ALREADY_EXISTS", "message": "dst exists"
                }))
            } else {
                ResponseTemplate::new(200).set_body_json(json!({}))
            }
        })
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/2.0/dbfs/delete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let session = open_session(&server, test_engine(2, 1024)).await;
    session.mv("/src", "/dst", true).await.expect("overwrite move succeeds");
    assert_eq!(move_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
}

async fn mount_read(server: &MockServer, file_path: &str, content: &[u8]) {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    let path_owned = file_path.to_string();
    let content_owned = content.to_vec();
    Mock::given(method("GET"))
        .and(path("/api/2.0/dbfs/read"))
        .respond_with(move |req: &Request| {
            let query: HashMap<_, _> = req.url.query_pairs().collect();
            let requested = query.get("path").map(std::string::ToString::to_string).unwrap_or_default();
            if requested != path_owned {
                return ResponseTemplate::new(404).set_body_json(json!({
                    "error_code": "RESOURCE_DOES_NOT_EXIST", "message": "no"
                }));
            }
            let offset: usize = query.get("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
            let length: usize = query.get("length").and_then(|v| v.parse().ok()).unwrap_or(content_owned.len());
            let end = (offset + length).min(content_owned.len());
            let slice = if offset >= content_owned.len() { &[][..] } else { &content_owned[offset..end] };
            ResponseTemplate::new(200).set_body_json(json!({
                "bytes_read": slice.len(),
                "data": STANDARD.encode(slice),
            }))
        })
        .mount(server)
        .await;
}
