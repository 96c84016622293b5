//! Fetching of observation files.
//!
//! Remote files (`http://`, `https://`) are streamed chunk by chunk with `reqwest` on a
//! private `tokio` runtime; local ones (`file://` or plain paths) are copied. In both cases
//! the bytes land in a temporary file of the destination directory which is renamed into
//! place once complete, so an interrupted download never leaves a truncated segment behind.
use std::io::Write;

use camino::Utf8Path;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Runtime;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::pipeline_errors::PipelineError;

pub struct Downloader {
    runtime: Runtime,
    client: reqwest::Client,
}

impl Downloader {
    pub fn new() -> Result<Self, PipelineError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("platodebs/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Downloader { runtime, client })
    }

    /// Fetch `uri` into `dest`.
    ///
    /// Arguments
    /// -----------------
    /// * `uri`: remote URL, `file://` URL or local path.
    /// * `dest`: final location; its directory is created if needed.
    ///
    /// Return
    /// ----------
    /// * `Ok(())` once `dest` holds the complete file.
    /// * An I/O or HTTP error otherwise; `dest` is then left untouched.
    pub fn fetch(&self, uri: &str, dest: &Utf8Path) -> Result<(), PipelineError> {
        let dir = dest
            .parent()
            .filter(|p| !p.as_str().is_empty())
            .unwrap_or(Utf8Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;

        if uri.starts_with("http://") || uri.starts_with("https://") {
            debug!("downloading {uri}");
            let file = tmp.reopen()?;
            self.runtime
                .block_on(download_big_file(&self.client, uri, file))?;
        } else {
            let source = uri.strip_prefix("file://").unwrap_or(uri);
            debug!("copying {source}");
            let mut input = std::fs::File::open(source)?;
            std::io::copy(&mut input, &mut tmp)?;
            tmp.flush()?;
        }

        tmp.as_file().sync_all()?;
        tmp.persist(dest)?;
        Ok(())
    }
}

/// Stream the body of `url` into `file`.
async fn download_big_file(
    client: &reqwest::Client,
    url: &str,
    file: std::fs::File,
) -> Result<(), PipelineError> {
    let mut file = tokio::fs::File::from_std(file);
    let mut stream = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .bytes_stream();

    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod download_test {
    use super::*;

    #[test]
    fn test_fetch_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let source = root.join("source.fits");
        std::fs::write(&source, b"SIMPLE  =").unwrap();

        let downloader = Downloader::new().unwrap();
        let dest = root.join("out/0000000042/source.fits");
        downloader
            .fetch(&format!("file://{source}"), &dest)
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"SIMPLE  =");

        downloader.fetch(source.as_str(), &root.join("copy.fits")).unwrap();
        assert!(root.join("copy.fits").is_file());
    }

    #[test]
    fn test_missing_source_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let dest = root.join("dest.fits");

        let err = Downloader::new()
            .unwrap()
            .fetch(root.join("absent.fits").as_str(), &dest)
            .unwrap_err();
        assert!(matches!(err, PipelineError::IoError(_)));
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(root).unwrap().count(), 0);
    }
}
