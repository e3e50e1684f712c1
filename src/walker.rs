//! Ordered recursive directory traversal with predicate filtering.
//!
//! The remote walk drives a dedicated Swarm whose queue is keyed by the
//! directory path being listed, so shallow directories tend to drain
//! first and the `pending` buffer stays small. `pending` is owned
//! exclusively by the task running [`walk`] — it is never shared across
//! tasks, so no lock is needed even though the runtime is
//! multi-threaded: every mutation happens on one response at a time,
//! sequentially, inside this function.

use std::collections::HashSet;
use std::path::Path;

use tracing::instrument;

use crate::client::ApiClient;
use crate::error::WalkError;
use crate::fileinfo::FileInfo;
use crate::predicate::PredicateBundle;
use crate::swarm::{Key, Swarm};

/// A function that narrows a batch of candidates down to the subset it
/// wants kept, by relpath. Candidates it does not return are discarded.
pub type FilterFn = dyn Fn(&[(String, FileInfo)]) -> HashSet<String> + Send + Sync;

/// One surfaced entry: the listing/walk result for one path, with the
/// predicate/filter verdict already applied.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    pub fi: FileInfo,
    pub relpath: String,
    pub good: bool,
    pub err: Option<String>,
}

struct PendingEntry {
    fi: FileInfo,
    relpath: String,
    good: bool,
    err: Option<String>,
    done: bool,
}

fn apply_filter(
    candidates: &[(FileInfo, String)],
    bundle: &PredicateBundle,
    filter: Option<&FilterFn>,
) -> Vec<(FileInfo, String, bool)> {
    let predicate_pass: Vec<(FileInfo, String, bool)> = candidates
        .iter()
        .map(|(fi, relpath)| {
            let pass = fi.check_predicates(relpath, bundle);
            (fi.clone(), relpath.clone(), pass)
        })
        .collect();

    let Some(filter) = filter else {
        return predicate_pass;
    };

    let filterable: Vec<(String, FileInfo)> = predicate_pass
        .iter()
        .filter(|(_, _, pass)| *pass)
        .map(|(fi, relpath, _)| (relpath.clone(), fi.clone()))
        .collect();
    let kept = filter(&filterable);

    predicate_pass
        .into_iter()
        .map(|(fi, relpath, pass)| {
            let good = pass && kept.contains(&relpath);
            (fi, relpath, good)
        })
        .collect()
}

fn insert_sorted(pending: &mut Vec<PendingEntry>, entry: PendingEntry) {
    let pos = pending
        .binary_search_by(|e| e.fi.abspath().cmp(entry.fi.abspath()))
        .unwrap_or_else(|p| p);
    pending.insert(pos, entry);
}

/// Walks the remote tree rooted at `root`, emitting every surviving
/// entry in ascending `abspath` order via `emit`. Intended to run as
/// the driver future of `swarm.run_while(...)`.
#[instrument(skip(client, swarm, bundle, filter, emit))]
pub async fn walk(
    client: &ApiClient,
    swarm: &Swarm<Vec<FileInfo>, WalkError>,
    root: &str,
    bundle: &PredicateBundle,
    filter: Option<&FilterFn>,
    mut emit: impl FnMut(WalkEntry),
) -> Result<(), WalkError> {
    let root_fi = client.get_status(root).await?;

    if !root_fi.is_dir() {
        let relpath = root_fi.relpath(root, None);
        let good = root_fi.check_predicates(&relpath, bundle);
        emit(WalkEntry {
            fi: root_fi,
            relpath,
            good,
            err: None,
        });
        return Ok(());
    }

    let root_relpath = root_fi.relpath(root, None);
    let judged_root = apply_filter(&[(root_fi.clone(), root_relpath.clone())], bundle, filter);
    let root_good = judged_root.first().is_some_and(|(_, _, good)| *good);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut pending = vec![PendingEntry {
        relpath: root_relpath,
        fi: root_fi.clone(),
        good: root_good,
        err: None,
        done: false,
    }];

    enqueue_listing(client, swarm, root.to_string(), root.to_string(), tx.clone()).await;

    while pending.iter().any(|e| !e.done) {
        let res = rx
            .recv()
            .await
            .expect("walker swarm never drops its sender while pending work remains");
        let key_path = match &res.key {
            Key::Path(p) => p.clone(),
            Key::Int(_) => unreachable!("walker only enqueues path-keyed tasks"),
        };

        let idx = pending
            .iter()
            .position(|e| e.fi.abspath() == key_path)
            .expect("listing response key always matches a pending entry");

        match res.value {
            Ok(children) => {
                pending[idx].done = true;
                let candidates: Vec<(FileInfo, String)> = children
                    .iter()
                    .map(|fi| (fi.clone(), fi.relpath(root, None)))
                    .collect();
                let judged = apply_filter(&candidates, bundle, filter);

                for (fi, relpath, good) in judged {
                    let is_dir = fi.is_dir();
                    let abspath = fi.abspath().to_string();
                    insert_sorted(
                        &mut pending,
                        PendingEntry {
                            relpath,
                            fi,
                            good,
                            err: None,
                            done: !is_dir,
                        },
                    );
                    if is_dir {
                        enqueue_listing(client, swarm, abspath.clone(), abspath, tx.clone()).await;
                    }
                }
            }
            Err(err) => {
                pending[idx].done = true;
                pending[idx].err = Some(err.to_string());
                pending[idx].good = false;
            }
        }

        while pending.first().is_some_and(|e| e.done) {
            let head = pending.remove(0);
            emit(WalkEntry {
                fi: head.fi,
                relpath: head.relpath,
                good: head.good,
                err: head.err,
            });
        }
    }

    Ok(())
}

async fn enqueue_listing(
    client: &ApiClient,
    swarm: &Swarm<Vec<FileInfo>, WalkError>,
    key_path: String,
    list_path: String,
    response: tokio::sync::mpsc::UnboundedSender<crate::swarm::SwarmResult<Vec<FileInfo>, WalkError>>,
) {
    let client = client.clone();
    swarm
        .put(
            async move { client.list(&list_path).await.map_err(WalkError::from) },
            Some(Key::Path(key_path)),
            Some(response),
        )
        .await;
}

/// Depth-first walk of a local directory tree, mirroring [`walk`]'s
/// filtering semantics. Synchronous: the caller runs it inside
/// `spawn_blocking` if it must not block the async runtime.
pub fn local_walk(
    root: &Path,
    bundle: &PredicateBundle,
    filter: Option<&FilterFn>,
    mut emit: impl FnMut(WalkEntry),
) -> Result<(), WalkError> {
    let root_abspath = root.to_string_lossy().into_owned();
    local_walk_dir(root, &root_abspath, bundle, filter, &mut emit)
}

fn local_walk_dir(
    dir: &Path,
    root_abspath: &str,
    bundle: &PredicateBundle,
    filter: Option<&FilterFn>,
    emit: &mut impl FnMut(WalkEntry),
) -> Result<(), WalkError> {
    let metadata = std::fs::metadata(dir).map_err(|e| WalkError::io(dir, e))?;
    let dir_fi = FileInfo::from_local_metadata(dir, &metadata).map_err(|e| WalkError::io(dir, e))?;
    emit(WalkEntry {
        relpath: dir_fi.relpath(root_abspath, None),
        fi: dir_fi,
        good: true,
        err: None,
    });

    let read_dir = std::fs::read_dir(dir).map_err(|e| WalkError::io(dir, e))?;
    let mut children = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|e| WalkError::io(dir, e))?;
        let metadata = entry.metadata().map_err(|e| WalkError::io(entry.path(), e))?;
        let fi = FileInfo::from_local_metadata(&entry.path(), &metadata)
            .map_err(|e| WalkError::io(entry.path(), e))?;
        let relpath = fi.relpath(root_abspath, None);
        children.push((fi, relpath));
    }
    children.sort_by(|a, b| a.0.abspath().cmp(b.0.abspath()));

    let judged = apply_filter(&children, bundle, filter);
    for (fi, relpath, good) in judged {
        if fi.is_dir() {
            local_walk_dir(Path::new(fi.abspath()), root_abspath, bundle, filter, emit)?;
        } else {
            emit(WalkEntry {
                fi,
                relpath,
                good,
                err: None,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_client(server: &MockServer) -> ApiClient {
        ApiClient::with_retry_policy(
            server.uri(),
            "tok",
            4,
            RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn walk_emits_entries_in_ascending_path_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/2.0/dbfs/get-status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "path": "/d", "is_dir": true, "file_size": 0, "modification_time": 0
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/2.0/dbfs/list"))
            .respond_with(move |req: &wiremock::Request| {
                let q: std::collections::HashMap<String, String> =
                    req.url.query_pairs().into_owned().collect();
                match q["path"].as_str() {
                    "/d" => ResponseTemplate::new(200).set_body_json(serde_json::json!({ "files": [
                        { "path": "/d/b", "is_dir": false, "file_size": 1, "modification_time": 0 },
                        { "path": "/d/a", "is_dir": true, "file_size": 0, "modification_time": 0 }
                    ]})),
                    "/d/a" => ResponseTemplate::new(200).set_body_json(serde_json::json!({ "files": [
                        { "path": "/d/a/c", "is_dir": false, "file_size": 1, "modification_time": 0 }
                    ]})),
                    _ => ResponseTemplate::new(404),
                }
            })
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        let swarm: Swarm<Vec<FileInfo>, WalkError> = Swarm::new("walker", 2, None);
        let bundle = PredicateBundle::default();

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let swarm_for_driver = swarm.clone();
        let client_clone = client.clone();
        swarm
            .run_while(async move {
                walk(&client_clone, &swarm_for_driver, "/d", &bundle, None, |entry| {
                    seen_clone.lock().unwrap().push(entry.fi.abspath().to_string());
                })
                .await
                .unwrap();
            })
            .await;

        let seen = seen.lock().unwrap();
        let mut sorted = seen.clone();
        sorted.sort();
        assert_eq!(*seen, sorted);
        assert_eq!(seen.last().unwrap(), "/d/a/c");
    }
}
