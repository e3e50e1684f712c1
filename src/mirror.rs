//! Recursive tree transfer (`rget`/`rput`), parameterised over
//! direction.
//!
//! A [`Direction`] supplies the asymmetric parts of the transfer: how a
//! relpath becomes a target path, how a directory gets created on the
//! target side, how "does this file need syncing" is decided, and how
//! one file actually moves. [`mirror`] drives the shared part: walking
//! the source tree, deciding what to do with each entry, and running
//! transfers up to `workers` at a time while the walk continues.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::chunked_reader::{self, ChunkOutcome};
use crate::client::ApiClient;
use crate::error::TransferError;
use crate::fileinfo::FileInfo;
use crate::predicate::PredicateBundle;
use crate::streaming_writer;
use crate::swarm::{Key, Swarm, SwarmResult};
use crate::walker::{self, FilterFn, WalkEntry};

/// Per-entry result reported to the caller of [`mirror`].
#[derive(Debug, Clone)]
pub struct MirrorOutcome {
    pub relpath: String,
    pub good: bool,
    pub err: Option<String>,
}

/// The asymmetric half of a recursive transfer: local-to-remote
/// (`RPutter`) or remote-to-local (`RGetter`).
///
/// Async trait objects are required here for `dyn Direction` dispatch —
/// Rust's native async traits are not yet object-safe.
#[async_trait]
pub trait Direction: Send + Sync {
    /// Whether `transfer` needs a multi-worker low Swarm (rget does,
    /// for ranged reads; rput does not).
    fn needs_low_swarm(&self) -> bool;

    /// Joins `relpath` onto `target` using this side's path algebra.
    fn resolve_target(&self, target: &str, relpath: &str) -> String;

    async fn mkdirs(&self, target_path: &str) -> Result<(), TransferError>;

    /// `true` if `target_path` is missing or stale relative to `fi`.
    async fn needs_sync(&self, fi: &FileInfo, target_path: &str) -> Result<bool, TransferError>;

    async fn transfer(
        &self,
        low: &Swarm<ChunkOutcome, TransferError>,
        src_abspath: &str,
        target_path: &str,
        overwrite: bool,
    ) -> Result<(), TransferError>;
}

/// Remote-to-local: downloads a tree rooted at a DBFS path into a local
/// directory.
pub struct RGetter {
    pub client: ApiClient,
    pub chunk_size: i64,
}

#[async_trait]
impl Direction for RGetter {
    fn needs_low_swarm(&self) -> bool {
        true
    }

    fn resolve_target(&self, target: &str, relpath: &str) -> String {
        if relpath == "." {
            return target.to_string();
        }
        std::path::Path::new(target)
            .join(relpath)
            .to_string_lossy()
            .into_owned()
    }

    async fn mkdirs(&self, target_path: &str) -> Result<(), TransferError> {
        match tokio::fs::create_dir(target_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(TransferError::io(target_path, e)),
        }
    }

    async fn needs_sync(&self, fi: &FileInfo, target_path: &str) -> Result<bool, TransferError> {
        let metadata = match tokio::fs::metadata(target_path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(TransferError::io(target_path, e)),
        };
        if metadata.len() as i64 != fi.size() {
            return Ok(true);
        }
        let local_fi = FileInfo::from_local_metadata(std::path::Path::new(target_path), &metadata)
            .map_err(|e| TransferError::io(target_path, e))?;
        Ok(local_fi.mtime() < fi.mtime())
    }

    async fn transfer(
        &self,
        low: &Swarm<ChunkOutcome, TransferError>,
        src_abspath: &str,
        target_path: &str,
        overwrite: bool,
    ) -> Result<(), TransferError> {
        chunked_reader::get_to_file(
            &self.client,
            low,
            src_abspath,
            std::path::Path::new(target_path),
            overwrite,
            self.chunk_size,
            None,
        )
        .await
        .map(|_| ())
    }
}

/// Local-to-remote: uploads a local directory tree to a DBFS path.
pub struct RPutter {
    pub client: ApiClient,
    pub chunk_size: i64,
}

#[async_trait]
impl Direction for RPutter {
    fn needs_low_swarm(&self) -> bool {
        false
    }

    fn resolve_target(&self, target: &str, relpath: &str) -> String {
        if relpath == "." {
            return target.to_string();
        }
        crate::fileinfo::normalize_posix(&format!("{target}/{relpath}"))
    }

    async fn mkdirs(&self, target_path: &str) -> Result<(), TransferError> {
        self.client.mkdirs(target_path).await.map_err(TransferError::from)
    }

    async fn needs_sync(&self, fi: &FileInfo, target_path: &str) -> Result<bool, TransferError> {
        match self.client.get_status(target_path).await {
            Ok(remote_fi) => {
                if remote_fi.size() != fi.size() {
                    return Ok(true);
                }
                Ok(remote_fi.mtime() < fi.mtime())
            }
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(TransferError::from(e)),
        }
    }

    async fn transfer(
        &self,
        _low: &Swarm<ChunkOutcome, TransferError>,
        src_abspath: &str,
        target_path: &str,
        overwrite: bool,
    ) -> Result<(), TransferError> {
        streaming_writer::put_path(
            &self.client,
            std::path::Path::new(src_abspath),
            target_path,
            overwrite,
            self.chunk_size,
            None,
        )
        .await
    }
}

fn emit(outcomes: &mut Vec<MirrorOutcome>, cb: &mut dyn FnMut(MirrorOutcome), outcome: MirrorOutcome) {
    cb(outcome.clone());
    outcomes.push(outcome);
}

async fn handle_entry(
    entry: WalkEntry,
    direction: &Arc<dyn Direction>,
    target: &str,
    overwrite: bool,
    sync: bool,
    high: &Swarm<(), TransferError>,
    low: Swarm<ChunkOutcome, TransferError>,
    active: &Arc<Mutex<HashMap<String, WalkEntry>>>,
    high_tx: &mpsc::UnboundedSender<SwarmResult<(), TransferError>>,
    outcomes: &mut Vec<MirrorOutcome>,
    cb: &mut dyn FnMut(MirrorOutcome),
) {
    let relpath = entry.relpath.clone();
    let target_path = direction.resolve_target(target, &relpath);

    if entry.fi.is_dir() {
        let mut good = entry.good;
        let mut err = entry.err.clone();
        if good {
            debug!(relpath, "making target directory");
            if let Err(e) = direction.mkdirs(&target_path).await {
                warn!(relpath, %e, "mkdirs failed");
                good = false;
                err = Some(e.to_string());
            }
        }
        emit(outcomes, cb, MirrorOutcome { relpath, good, err });
        return;
    }

    let mut good = entry.good;
    if sync && good {
        match direction.needs_sync(&entry.fi, &target_path).await {
            Ok(true) => {}
            Ok(false) => good = false,
            Err(e) => {
                emit(
                    outcomes,
                    cb,
                    MirrorOutcome {
                        relpath,
                        good: false,
                        err: Some(e.to_string()),
                    },
                );
                return;
            }
        }
    }

    if !good {
        emit(
            outcomes,
            cb,
            MirrorOutcome {
                relpath,
                good: false,
                err: entry.err,
            },
        );
        return;
    }

    debug!(relpath, "queueing transfer");
    let src_abspath = entry.fi.abspath().to_string();
    active.lock().unwrap().insert(relpath.clone(), entry);
    let direction = direction.clone();
    let task = async move { direction.transfer(&low, &src_abspath, &target_path, overwrite).await };
    high.put(task, Some(Key::Path(relpath)), Some(high_tx.clone())).await;
}

/// Drives a full recursive transfer: walks `src`, mkdirs/transfers each
/// entry through `direction`, and returns every entry's outcome once
/// the walk and all in-flight transfers have completed.
pub async fn mirror(
    client: &ApiClient,
    direction: Arc<dyn Direction>,
    workers: usize,
    src: &str,
    target: &str,
    overwrite: bool,
    sync: bool,
    bundle: PredicateBundle,
    filter: Option<Arc<FilterFn>>,
    mut cb: impl FnMut(MirrorOutcome) + Send + 'static,
) -> Result<Vec<MirrorOutcome>, TransferError> {
    let overwrite = overwrite || sync;
    let low_workers = if direction.needs_low_swarm() { workers } else { 1 };
    let low: Swarm<ChunkOutcome, TransferError> = Swarm::new("mirror-low", low_workers, Some(low_workers * 2));
    let high: Swarm<(), TransferError> = Swarm::new("mirror-high", workers, Some(workers * 2));
    let walk_swarm: Swarm<Vec<FileInfo>, crate::error::WalkError> =
        Swarm::new("mirror-walk", workers, None);

    let active: Arc<Mutex<HashMap<String, WalkEntry>>> = Arc::new(Mutex::new(HashMap::new()));
    let (walk_tx, mut walk_rx) = mpsc::unbounded_channel::<WalkEntry>();
    let (high_tx, mut high_rx) = mpsc::unbounded_channel::<SwarmResult<(), TransferError>>();

    let walker_handle = {
        let client = client.clone();
        let walk_swarm = walk_swarm.clone();
        let src = src.to_string();
        let bundle = bundle.clone();
        let filter = filter.clone();
        tokio::spawn(async move {
            let swarm_for_driver = walk_swarm.clone();
            walk_swarm
                .run_while(async move {
                    walker::walk(&client, &swarm_for_driver, &src, &bundle, filter.as_deref(), move |entry| {
                        let _ = walk_tx.send(entry);
                    })
                    .await
                })
                .await
        })
    };

    let high_run = high.clone();
    let target = target.to_string();
    let driver = async move {
        let mut outcomes = Vec::new();
        while let Some(entry) = walk_rx.recv().await {
            while let Ok(res) = high_rx.try_recv() {
                record_completed(&active, res, &mut outcomes, &mut cb);
            }
            handle_entry(
                entry,
                &direction,
                &target,
                overwrite,
                sync,
                &high_run,
                low.clone(),
                &active,
                &high_tx,
                &mut outcomes,
                &mut cb,
            )
            .await;
        }
        while !active.lock().unwrap().is_empty() {
            let res = high_rx
                .recv()
                .await
                .expect("high swarm never drops its sender while transfers remain active");
            record_completed(&active, res, &mut outcomes, &mut cb);
        }
        outcomes
    };
    let outcomes = high.run_while(driver).await;

    walker_handle
        .await
        .expect("walker task never panics")
        .map_err(TransferError::from)?;

    Ok(outcomes)
}

fn record_completed(
    active: &Arc<Mutex<HashMap<String, WalkEntry>>>,
    res: SwarmResult<(), TransferError>,
    outcomes: &mut Vec<MirrorOutcome>,
    cb: &mut dyn FnMut(MirrorOutcome),
) {
    let relpath = match res.key {
        Key::Path(p) => p,
        Key::Int(_) => unreachable!("mirror only enqueues path-keyed transfers"),
    };
    let mut guard = active.lock().unwrap();
    guard.remove(&relpath);
    drop(guard);
    match res.value {
        Ok(()) => emit(
            outcomes,
            cb,
            MirrorOutcome {
                relpath,
                good: true,
                err: None,
            },
        ),
        Err(e) => emit(
            outcomes,
            cb,
            MirrorOutcome {
                relpath,
                good: false,
                err: Some(e.to_string()),
            },
        ),
    }
}
