//! Single-file download: ranged reads fanned out across a worker pool,
//! written to arbitrary offsets in the destination.
//!
//! Chunks are requested in order but may complete and be written out of
//! order; correctness comes from each worker seeking to its own offset
//! rather than from completion order.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, instrument};

use crate::client::ApiClient;
use crate::error::{ApiError, TransferError};
use crate::fileinfo::FileInfo;
use crate::swarm::{Key, Swarm, SwarmResult};

/// Invoked as bytes land, with `(total_size, bytes_copied)`.
pub type ProgressCb = Box<dyn FnMut(i64, i64) + Send>;

/// Result of one range-read task run on the low Swarm.
pub struct ChunkOutcome {
    bytes_copied: i64,
}

async fn fetch_chunk(
    client: ApiClient,
    path: String,
    offset: i64,
    window: i64,
    out: std::sync::Arc<tokio::sync::Mutex<File>>,
) -> Result<ChunkOutcome, TransferError> {
    let mut remaining = window;
    let mut cursor = offset;
    while remaining > 0 {
        let (bytes_read, data) = client.read(&path, cursor, remaining).await?;
        if bytes_read <= 0 || bytes_read > remaining {
            return Err(TransferError::ShortRead {
                expected: remaining,
                actual: bytes_read,
            });
        }
        if data.len() as i64 != bytes_read {
            return Err(TransferError::ShortRead {
                expected: bytes_read,
                actual: data.len() as i64,
            });
        }
        let mut file = out.lock().await;
        file.seek(SeekFrom::Start(cursor as u64))
            .await
            .map_err(|e| TransferError::io(&path, e))?;
        file.write_all(&data)
            .await
            .map_err(|e| TransferError::io(&path, e))?;
        remaining -= bytes_read;
        cursor += bytes_read;
    }
    Ok(ChunkOutcome { bytes_copied: window })
}

/// Downloads `src` into `out`, fanning ranged reads across `low`.
/// Returns the source's [`FileInfo`] as fetched at the start.
#[instrument(skip(client, low, out, progress))]
pub async fn get_to_writer(
    client: &ApiClient,
    low: &Swarm<ChunkOutcome, TransferError>,
    src: &str,
    out: File,
    chunk_size: i64,
    mut progress: Option<ProgressCb>,
) -> Result<FileInfo, TransferError> {
    let fi = client.get_status(src).await?;
    let size = fi.size();

    let out = std::sync::Arc::new(tokio::sync::Mutex::new(out));
    let (tx, mut rx) = mpsc::unbounded_channel::<SwarmResult<ChunkOutcome, TransferError>>();

    let mut bytes_copied: i64 = 0;
    let mut active: u64 = 0;
    let mut offset: i64 = 0;

    loop {
        while let Ok(res) = rx.try_recv() {
            active -= 1;
            let outcome = res.value?;
            bytes_copied += outcome.bytes_copied;
            if let Some(cb) = progress.as_mut() {
                cb(size, bytes_copied);
            }
        }

        let next_offset = (offset + chunk_size).min(size);
        let window = next_offset - offset;
        if window <= 0 {
            break;
        }

        let client = client.clone();
        let path = src.to_string();
        let out = out.clone();
        low.put(
            fetch_chunk(client, path, offset, window, out),
            None,
            Some(tx.clone()),
        )
        .await;
        active += 1;
        offset = next_offset;
    }

    while active > 0 {
        let res = rx.recv().await.expect("low swarm never drops its senders early");
        active -= 1;
        let outcome = res.value?;
        bytes_copied += outcome.bytes_copied;
        if let Some(cb) = progress.as_mut() {
            cb(size, bytes_copied);
        }
    }

    debug!(src, size, bytes_copied, "download complete");
    Ok(fi)
}

/// Downloads `src` to `target` atomically: writes to a sibling temp
/// file, then renames into place. On any failure the temp file is
/// removed and `target` is left untouched.
#[instrument(skip(client, low, progress))]
pub async fn get_to_file(
    client: &ApiClient,
    low: &Swarm<ChunkOutcome, TransferError>,
    src: &str,
    target: &Path,
    overwrite: bool,
    chunk_size: i64,
    progress: Option<ProgressCb>,
) -> Result<FileInfo, TransferError> {
    if !overwrite && target.exists() {
        return Err(TransferError::already_exists(target.to_string_lossy()));
    }
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| TransferError::io(target, e))?;
    let tmp_path: PathBuf = tmp.path().to_path_buf();
    let file = File::from_std(
        tmp.reopen()
            .map_err(|e| TransferError::io(&tmp_path, e))?,
    );

    let result = get_to_writer(client, low, src, file, chunk_size, progress).await;
    match result {
        Ok(fi) => {
            tmp.persist(target)
                .map_err(|e| TransferError::io(target, e.error))?;
            Ok(fi)
        }
        Err(e) => {
            let _ = tmp.close();
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use std::time::Duration;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_client(server: &MockServer) -> ApiClient {
        ApiClient::with_retry_policy(server.uri(), "tok", 4, RetryPolicy::new(1, Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn get_to_file_reassembles_chunks_in_order() {
        let server = MockServer::start().await;
        let content = b"0123456789abcdef";
        Mock::given(method("GET"))
            .and(path("/api/2.0/dbfs/get-status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "path": "/d/a", "is_dir": false, "file_size": content.len() as i64, "modification_time": 0
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/api/2.0/dbfs/read"))
            .respond_with(move |req: &wiremock::Request| {
                let q: std::collections::HashMap<String, String> =
                    req.url.query_pairs().into_owned().collect();
                let offset: usize = q["offset"].parse().unwrap();
                let length: usize = q["length"].parse().unwrap();
                let end = (offset + length).min(content.len());
                let slice = &content[offset..end];
                let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, slice);
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "bytes_read": slice.len(), "data": encoded
                }))
            })
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        let low: Swarm<ChunkOutcome, TransferError> = Swarm::new("low", 4, Some(8));
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.bin");

        let swarm_clone = low.clone();
        let client_clone = client.clone();
        let target_clone = target.clone();
        let fi = low
            .clone()
            .run_while(async move {
                get_to_file(&client_clone, &swarm_clone, "/d/a", &target_clone, false, 4, None).await
            })
            .await
            .unwrap();

        assert_eq!(fi.size(), content.len() as i64);
        let on_disk = std::fs::read(&target).unwrap();
        assert_eq!(on_disk, content);
    }

    #[tokio::test]
    async fn get_to_file_refuses_overwrite_when_target_exists() {
        let server = MockServer::start().await;
        let client = mock_client(&server).await;
        let low: Swarm<ChunkOutcome, TransferError> = Swarm::new("low", 2, Some(4));
        let dir = tempdir().unwrap();
        let target = dir.path().join("out.bin");
        std::fs::write(&target, b"existing").unwrap();

        let err = get_to_file(&client, &low, "/d/a", &target, false, 4, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::AlreadyExists { .. }));
    }
}
