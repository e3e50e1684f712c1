//! Single-file upload: a small-file fast path plus the block-streamed
//! path for anything larger than one chunk.

use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::instrument;

use crate::client::ApiClient;
use crate::error::TransferError;

/// Invoked after each successful block (or once, for the small-file
/// path) with `(total_size, bytes_copied)`.
pub type ProgressCb<'a> = &'a mut dyn FnMut(i64, i64);

/// Uploads the contents of `file` (already opened, `size` bytes) to
/// `target`. Files no larger than `chunk_size` go through a single
/// `put` call; larger files go through create/add-block/close and are
/// verified against the server-reported size afterward.
#[instrument(skip(client, file, progress))]
pub async fn put_from_file(
    client: &ApiClient,
    mut file: File,
    size: i64,
    target: &str,
    overwrite: bool,
    chunk_size: i64,
    mut progress: Option<ProgressCb<'_>>,
) -> Result<(), TransferError> {
    if size <= chunk_size {
        let mut buf = Vec::with_capacity(size.max(0) as usize);
        file.read_to_end(&mut buf)
            .await
            .map_err(|e| TransferError::io(target, e))?;
        client.put(target, &buf, overwrite).await?;
        if let Some(cb) = progress.as_mut() {
            cb(size, size);
        }
        return Ok(());
    }

    let handle = client.create(target, overwrite).await?;
    let result = upload_blocks(client, &mut file, handle, size, chunk_size, &mut progress).await;

    match result {
        Ok(bytes_copied) => {
            client.close(handle).await?;
            let fi = client.get_status(target).await?;
            if fi.size() != bytes_copied {
                let _ = client.delete(target, false).await;
                return Err(TransferError::corruption(target, bytes_copied, fi.size()));
            }
            Ok(())
        }
        Err(e) => {
            let _ = client.close(handle).await;
            let _ = client.delete(target, false).await;
            Err(e)
        }
    }
}

async fn upload_blocks(
    client: &ApiClient,
    file: &mut File,
    handle: i64,
    size: i64,
    chunk_size: i64,
    progress: &mut Option<ProgressCb<'_>>,
) -> Result<i64, TransferError> {
    file.seek(std::io::SeekFrom::Start(0))
        .await
        .map_err(|e| TransferError::io("<upload source>", e))?;
    let mut bytes_copied: i64 = 0;
    let mut buf = vec![0u8; chunk_size as usize];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|e| TransferError::io("<upload source>", e))?;
        if n == 0 {
            break;
        }
        client.add_block(handle, &buf[..n]).await?;
        bytes_copied += n as i64;
        if let Some(cb) = progress.as_mut() {
            cb(size, bytes_copied);
        }
    }
    Ok(bytes_copied)
}

/// Opens `src` and uploads it, resolving `size` from filesystem
/// metadata.
pub async fn put_path(
    client: &ApiClient,
    src: &Path,
    target: &str,
    overwrite: bool,
    chunk_size: i64,
    progress: Option<ProgressCb<'_>>,
) -> Result<(), TransferError> {
    let metadata = tokio::fs::metadata(src)
        .await
        .map_err(|e| TransferError::io(src, e))?;
    let size = i64::try_from(metadata.len()).unwrap_or(i64::MAX);
    let file = File::open(src).await.map_err(|e| TransferError::io(src, e))?;
    put_from_file(client, file, size, target, overwrite, chunk_size, progress).await
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
    async fn small_file_takes_the_single_put_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/2.0/dbfs/put"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("small.bin");
        std::fs::write(&src, b"hello").unwrap();

        put_path(&client, &src, "/d/small.bin", false, 1024, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn large_file_verifies_size_after_close_and_fails_on_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/2.0/dbfs/create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "handle": 7 })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/2.0/dbfs/add-block"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/2.0/dbfs/close"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/2.0/dbfs/get-status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "path": "/d/big.bin", "is_dir": false, "file_size": 1, "modification_time": 0
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/2.0/dbfs/delete"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = mock_client(&server).await;
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("big.bin");
        std::fs::write(&src, vec![0u8; 10]).unwrap();

        let err = put_path(&client, &src, "/d/big.bin", false, 4, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Corruption { .. }));
    }
}
