//! Streaming HTTP downloads.
//!
//! Bytes are written to a uniquely named sibling of `dest` and renamed into
//! place only after the received byte count matches the declared
//! `Content-Length`, so a partial transfer is never observable at `dest`.

use std::io;
use std::path::Path;

use futures::StreamExt;
use reqwest::Client;
use tempfile::TempPath;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Why a single download attempt failed.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Transport or status failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Writing the destination failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The body ended before the advertised length.
    #[error("incomplete download: expected {expected} bytes, got {actual}")]
    Incomplete {
        /// Advertised `Content-Length`.
        expected: u64,
        /// Bytes actually received.
        actual: u64,
    },

    /// The token fired mid-transfer.
    #[error("download cancelled")]
    Cancelled,
}

/// Create an empty, uniquely named temp file next to `dest`.
///
/// The file is removed when the returned path is dropped; `persist` it onto
/// `dest` once it is complete. The parent directory must exist.
pub fn temp_sibling(dest: &Path) -> io::Result<TempPath> {
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut prefix = std::ffi::OsString::from(".");
    prefix.push(dest.file_name().unwrap_or_default());
    prefix.push(".");
    let file = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(parent)?;
    Ok(file.into_temp_path())
}

/// Download `url` to `dest`, reporting `(received, total)` after every chunk.
///
/// Returns the number of bytes written.
pub async fn download_to_file<F>(
    client: &Client,
    url: &str,
    dest: &Path,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<u64, DownloadError>
where
    F: FnMut(u64, Option<u64>) + Send,
{
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    // Dropping `tmp` on any error path removes the partial file.
    let tmp = temp_sibling(dest)?;
    let written = stream_into(client, url, &tmp, cancel, &mut on_progress).await?;
    tmp.persist(dest).map_err(io::Error::from)?;
    Ok(written)
}

async fn stream_into<F>(
    client: &Client,
    url: &str,
    tmp: &Path,
    cancel: &CancellationToken,
    on_progress: &mut F,
) -> Result<u64, DownloadError>
where
    F: FnMut(u64, Option<u64>) + Send,
{
    let request = client
        .get(url)
        .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
        .send();

    let response = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(DownloadError::Cancelled),
        resp = request => resp?.error_for_status()?,
    };

    let total = response.content_length();
    let mut file = File::create(tmp).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    on_progress(0, total);
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(DownloadError::Cancelled),
            chunk = stream.next() => chunk,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
        on_progress(written, total);
    }
    file.flush().await?;

    match total {
        Some(expected) if expected != written => Err(DownloadError::Incomplete {
            expected,
            actual: written,
        }),
        _ => Ok(written),
    }
}
