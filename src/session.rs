//! Façade tying the client, walker, and mirror together behind one
//! `cwd`-aware API, mirroring `DBFS`'s public surface in the original
//! implementation.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::instrument;

use crate::chunked_reader::{self, ChunkOutcome};
use crate::client::ApiClient;
use crate::config::{EngineSettings, Profile};
use crate::error::{ApiError, TransferError};
use crate::fileinfo::{normalize_posix, FileInfo};
use crate::mirror::{self, Direction, MirrorOutcome, RGetter, RPutter};
use crate::predicate::PredicateBundle;
use crate::retry::RetryPolicy;
use crate::swarm::Swarm;
use crate::walker::{self, FilterFn, WalkEntry};

/// An open connection to one profile, with its own working directory.
pub struct Session {
    client: ApiClient,
    cwd: RwLock<String>,
    engine: EngineSettings,
}

impl Session {
    /// Connects using `profile`, then performs a `get-status("/")`
    /// round trip so a bad host/token surfaces here rather than on the
    /// first real command.
    #[instrument(skip(profile, engine))]
    pub async fn open(profile: &Profile, engine: EngineSettings) -> Result<Self, ApiError> {
        let client = ApiClient::with_retry_policy(
            profile.host.clone(),
            profile.token.clone(),
            engine.workers,
            RetryPolicy::new(
                engine.max_retries,
                std::time::Duration::from_secs(engine.error_delay),
                std::time::Duration::from_secs(engine.error_delay_increment),
            ),
        );
        let session = Self {
            client,
            cwd: RwLock::new("/".to_string()),
            engine,
        };
        session.client.get_status("/").await?;
        Ok(session)
    }

    async fn resolve(&self, path: &str) -> String {
        if path.starts_with('/') {
            normalize_posix(path)
        } else {
            let cwd = self.cwd.read().await;
            normalize_posix(&format!("{cwd}/{path}"))
        }
    }

    pub async fn pwd(&self) -> String {
        self.cwd.read().await.clone()
    }

    pub async fn cd(&self, path: &str) -> Result<(), ApiError> {
        let resolved = self.resolve(path).await;
        let fi = self.client.get_status(&resolved).await?;
        if !fi.is_dir() {
            return Err(ApiError::protocol(format!("{resolved} is not a directory")));
        }
        *self.cwd.write().await = resolved;
        Ok(())
    }

    pub async fn ls(&self, path: &str) -> Result<Vec<FileInfo>, ApiError> {
        let resolved = self.resolve(path).await;
        let fi = self.client.get_status(&resolved).await?;
        if fi.is_dir() {
            self.client.list(&resolved).await
        } else {
            Ok(vec![fi])
        }
    }

    pub async fn mkdir(&self, path: &str) -> Result<(), ApiError> {
        let resolved = self.resolve(path).await;
        self.client.mkdirs(&resolved).await
    }

    /// Deletes `path`. If `cwd` was inside the removed subtree, it is
    /// repaired to the removed path's parent.
    pub async fn rm(&self, path: &str, recursive: bool) -> Result<(), ApiError> {
        let resolved = self.resolve(path).await;
        self.client.delete(&resolved, recursive).await?;

        let mut cwd = self.cwd.write().await;
        if *cwd != "/"
            && (*cwd == resolved || cwd.strip_prefix(&resolved).is_some_and(|rest| rest.starts_with('/')))
        {
            let parent = resolved.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
            *cwd = if parent.is_empty() { "/".to_string() } else { parent.to_string() };
        }
        Ok(())
    }

    /// Issues `move`; on `AlreadyExists` with `overwrite=true` and a
    /// file target, deletes the target and retries once. A directory
    /// target refuses overwrite, surfacing the original error.
    pub async fn mv(&self, src: &str, dst: &str, overwrite: bool) -> Result<(), ApiError> {
        let src = self.resolve(src).await;
        let dst = self.resolve(dst).await;
        match self.client.move_path(&src, &dst).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_already_exists() && overwrite => {
                let dst_fi = self.client.get_status(&dst).await?;
                if dst_fi.is_dir() {
                    return Err(e);
                }
                self.client.delete(&dst, false).await?;
                self.client.move_path(&src, &dst).await
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_status(&self, path: &str) -> Result<FileInfo, ApiError> {
        let resolved = self.resolve(path).await;
        self.client.get_status(&resolved).await
    }

    pub async fn filetest_e(&self, path: &str) -> Result<bool, ApiError> {
        match self.get_status(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn filetest_d(&self, path: &str) -> Result<bool, ApiError> {
        match self.get_status(path).await {
            Ok(fi) => Ok(fi.is_dir()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn filetest_f(&self, path: &str) -> Result<bool, ApiError> {
        match self.get_status(path).await {
            Ok(fi) => Ok(!fi.is_dir()),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Uploads a single local file to `target`.
    pub async fn put(&self, src: &Path, target: &str, overwrite: bool) -> Result<(), TransferError> {
        let resolved = self.resolve(target).await;
        crate::streaming_writer::put_path(&self.client, src, &resolved, overwrite, self.engine.chunk_size, None)
            .await
    }

    /// Downloads a single remote file to `target`.
    pub async fn get(&self, src: &str, target: &Path, overwrite: bool) -> Result<FileInfo, TransferError> {
        let resolved = self.resolve(src).await;
        let low: Swarm<ChunkOutcome, TransferError> = Swarm::new("get-low", self.engine.workers, Some(self.engine.workers * 2));
        let client = self.client.clone();
        let chunk_size = self.engine.chunk_size;
        let target = target.to_path_buf();
        let low_driver = low.clone();
        low.run_while(async move {
            chunked_reader::get_to_file(&client, &low_driver, &resolved, &target, overwrite, chunk_size, None).await
        })
        .await
    }

    /// Downloads a single remote file to a freshly created temp file
    /// and returns its path (used by `cat`/`show`/`edit`, which live
    /// outside this crate).
    pub async fn get_to_temp(&self, src: &str) -> Result<std::path::PathBuf, TransferError> {
        let resolved = self.resolve(src).await;
        let tmp = tempfile::NamedTempFile::new().map_err(|e| TransferError::io("<tmp>", e))?;
        let (file, path) = tmp.keep().map_err(|e| TransferError::io("<tmp>", e.error))?;
        let low: Swarm<ChunkOutcome, TransferError> = Swarm::new("get-to-temp-low", self.engine.workers, Some(self.engine.workers * 2));
        let client = self.client.clone();
        let chunk_size = self.engine.chunk_size;
        let low_driver = low.clone();
        low.run_while(async move {
            chunked_reader::get_to_writer(&client, &low_driver, &resolved, tokio::fs::File::from_std(file), chunk_size, None).await
        })
        .await?;
        Ok(path)
    }

    /// Recursive ordered listing with predicate/filter evaluation.
    pub async fn find(
        &self,
        path: &str,
        bundle: PredicateBundle,
        filter: Option<Arc<FilterFn>>,
        mut cb: impl FnMut(WalkEntry) + Send,
    ) -> Result<(), crate::error::WalkError> {
        let resolved = self.resolve(path).await;
        let swarm: Swarm<Vec<FileInfo>, crate::error::WalkError> = Swarm::new("find", self.engine.workers, None);
        let client = self.client.clone();
        let swarm_driver = swarm.clone();
        swarm
            .run_while(async move {
                walker::walk(&client, &swarm_driver, &resolved, &bundle, filter.as_deref(), |entry| cb(entry)).await
            })
            .await
    }

    /// Recursive download of the tree rooted at `src` into `target`.
    /// `cb` is invoked once per entry as its outcome completes, live,
    /// in addition to the full outcome list returned at the end.
    pub async fn rget(
        &self,
        src: &str,
        target: &str,
        overwrite: bool,
        sync: bool,
        bundle: PredicateBundle,
        filter: Option<Arc<FilterFn>>,
        cb: impl FnMut(MirrorOutcome) + Send + 'static,
    ) -> Result<Vec<MirrorOutcome>, TransferError> {
        let resolved_src = self.resolve(src).await;
        let direction: Arc<dyn Direction> = Arc::new(RGetter {
            client: self.client.clone(),
            chunk_size: self.engine.chunk_size,
        });
        mirror::mirror(
            &self.client,
            direction,
            self.engine.workers,
            &resolved_src,
            target,
            overwrite,
            sync,
            bundle,
            filter,
            cb,
        )
        .await
    }

    /// Recursive upload of the local tree rooted at `src` into `target`.
    /// `cb` is invoked once per entry as its outcome completes, live,
    /// in addition to the full outcome list returned at the end.
    pub async fn rput(
        &self,
        src: &Path,
        target: &str,
        overwrite: bool,
        cb: impl FnMut(MirrorOutcome) + Send + 'static,
    ) -> Result<Vec<MirrorOutcome>, TransferError> {
        let resolved_target = self.resolve(target).await;
        let direction: Arc<dyn Direction> = Arc::new(RPutter {
            client: self.client.clone(),
            chunk_size: self.engine.chunk_size,
        });
        let src_str = src.to_string_lossy().into_owned();
        mirror::mirror(
            &self.client,
            direction,
            self.engine.workers,
            &src_str,
            &resolved_target,
            overwrite,
            false,
            PredicateBundle::default(),
            None,
            cb,
        )
        .await
    }
}
