//! Streamed artifact downloads with progress reporting.

use crate::error::{Error, Result};
use crate::model::ArtifactDescriptor;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

// Removes the bar on every exit path, including errors.
struct ProgressGuard(ProgressBar);

impl Drop for ProgressGuard {
    fn drop(&mut self) {
        self.0.finish_and_clear();
    }
}

fn transfer_bar(name: &str, total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template(
            "{msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message(format!("Downloading {}", name));
    bar
}

/// Guarantees on return that `dest` exists and its size matches the
/// descriptor. Skips the transfer entirely when that already holds.
pub async fn ensure_artifact(dest: &Path, artifact: &ArtifactDescriptor) -> Result<PathBuf> {
    if artifact.matches(dest) {
        tracing::debug!("Artifact '{}' already present, skipping", artifact.name);
        return Ok(dest.to_path_buf());
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    tracing::info!("Downloading '{}' from {}", artifact.name, artifact.url);

    let response = reqwest::get(&artifact.url)
        .await
        .map_err(|e| Error::DownloadFailed(format!("GET {}: {}", artifact.url, e)))?;

    if !response.status().is_success() {
        return Err(Error::DownloadFailed(format!(
            "GET {} returned {}",
            artifact.url,
            response.status()
        )));
    }

    let total = response.content_length().unwrap_or(artifact.size);
    let guard = ProgressGuard(transfer_bar(&artifact.name, total));

    // Write to a temp file first so a failed transfer never occupies the
    // trusted path.
    let temp_path = dest.with_extension("part");
    let mut temp_file = File::create(&temp_path).await?;

    let mut response = response;
    let mut downloaded: u64 = 0;
    loop {
        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                return Err(Error::DownloadFailed(e.to_string()));
            }
        };

        if let Err(e) = temp_file.write_all(&chunk).await {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        downloaded += chunk.len() as u64;
        guard.0.set_position(downloaded);
    }

    temp_file.flush().await?;
    drop(temp_file);

    if downloaded != artifact.size {
        let _ = fs::remove_file(&temp_path);
        return Err(Error::SizeMismatch {
            name: artifact.name.clone(),
            expected: artifact.size,
            actual: downloaded,
        });
    }

    fs::rename(&temp_path, dest)?;

    tracing::info!("Downloaded '{}' ({} bytes)", artifact.name, downloaded);

    Ok(dest.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    // One-shot loopback HTTP server; answers a single GET with `body`.
    fn serve_body(body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut request = Vec::new();
                let mut buf = [0u8; 512];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let header = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(header.as_bytes());
                let _ = stream.write_all(&body);
                let _ = stream.flush();
            }
        });
        format!("http://{}/artifact.bin", addr)
    }

    // A URL with nothing listening behind it: any network attempt fails.
    fn unroutable_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}/artifact.bin", addr)
    }

    #[tokio::test]
    async fn downloads_absent_artifact() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let body = vec![7u8; 4096];
        let url = serve_body(body.clone());
        let desc = ArtifactDescriptor::new("artifact.bin", &url, body.len() as u64);

        let dest = dir.path().join("artifact.bin");
        let path = ensure_artifact(&dest, &desc).await?;

        assert_eq!(path, dest);
        assert_eq!(fs::metadata(&dest)?.len(), body.len() as u64);
        assert_eq!(fs::read(&dest)?, body);
        Ok(())
    }

    #[tokio::test]
    async fn skips_transfer_when_size_matches() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("artifact.bin");
        fs::write(&dest, vec![1u8; 128]).unwrap();

        let url = unroutable_url();
        let desc = ArtifactDescriptor::new("artifact.bin", &url, 128);

        ensure_artifact(&dest, &desc).await.unwrap();
        assert_eq!(fs::read(&dest).unwrap(), vec![1u8; 128]);
    }

    #[tokio::test]
    async fn overwrites_artifact_with_wrong_size() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("artifact.bin");
        fs::write(&dest, vec![1u8; 10])?;

        let body = vec![9u8; 2048];
        let url = serve_body(body.clone());
        let desc = ArtifactDescriptor::new("artifact.bin", &url, body.len() as u64);

        ensure_artifact(&dest, &desc).await?;
        assert_eq!(fs::read(&dest)?, body);
        Ok(())
    }

    #[tokio::test]
    async fn rejects_truncated_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("artifact.bin");

        let url = serve_body(vec![3u8; 1000]);
        let desc = ArtifactDescriptor::new("artifact.bin", &url, 4096);

        let err = ensure_artifact(&dest, &desc).await.unwrap_err();
        assert!(matches!(
            err,
            Error::SizeMismatch {
                expected: 4096,
                actual: 1000,
                ..
            }
        ));
        assert!(!dest.exists());
        assert!(!dest.with_extension("part").exists());
    }

    #[tokio::test]
    async fn network_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("artifact.bin");

        let url = unroutable_url();
        let desc = ArtifactDescriptor::new("artifact.bin", &url, 64);

        let err = ensure_artifact(&dest, &desc).await.unwrap_err();
        assert!(matches!(err, Error::DownloadFailed(_)));
        assert!(!dest.exists());
    }
}
