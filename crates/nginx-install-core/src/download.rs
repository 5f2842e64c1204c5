//! HTTP downloads for source tarballs and release pages.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

use crate::config::NetworkConfig;
use crate::error::{InstallError, Result};
use crate::progress::{NullProgress, ProgressSink};

/// Fetches remote resources.
#[async_trait]
pub trait Downloader: Send + Sync + std::fmt::Debug {
    /// Stream `url` into `dest`, showing progress under `title`.
    async fn fetch(&self, url: &str, dest: &Path, title: &str) -> Result<()>;

    /// Fetch a page as text.
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

/// Strip the query string so credentials never reach the logs.
pub fn redact_url(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{base}?<redacted>"),
        None => url.to_string(),
    }
}

fn network_error(url: &str, reason: impl ToString) -> InstallError {
    InstallError::Network {
        url: redact_url(url),
        reason: reason.to_string(),
    }
}

/// [`Downloader`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
    progress: Arc<dyn ProgressSink>,
}

impl HttpDownloader {
    /// Build a client sending `user_agent`.
    ///
    /// `proxy` of `None` uses the system proxy settings, an empty string
    /// disables proxying, anything else is used for all schemes.
    pub fn new(user_agent: &str, proxy: Option<&str>) -> Result<Self> {
        Self::build(user_agent, proxy, None, None)
    }

    /// Client configured from the `network` config section.
    pub fn from_config(network: &NetworkConfig) -> Result<Self> {
        for key in network.unsupported_extra() {
            warn!(key, "ignoring unsupported network option");
        }
        Self::build(
            &network.user_agent,
            network.proxy.as_deref(),
            network.timeout(),
            network.connect_timeout(),
        )
    }

    fn build(
        user_agent: &str,
        proxy: Option<&str>,
        timeout: Option<Duration>,
        connect_timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut builder = Client::builder().user_agent(user_agent);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        match proxy.map(str::trim) {
            None => {}
            Some("") => builder = builder.no_proxy(),
            Some(p) => {
                let proxy = reqwest::Proxy::all(p)
                    .map_err(|e| InstallError::ConfigValidation(format!("bad proxy '{p}': {e}")))?;
                builder = builder.proxy(proxy);
            }
        }
        let client = builder
            .build()
            .map_err(|e| InstallError::ConfigValidation(format!("HTTP client: {e}")))?;

        Ok(HttpDownloader {
            client,
            progress: Arc::new(NullProgress),
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| network_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(url = %redact_url(url), %status, body = %body, "download failed");
            return Err(network_error(url, format!("HTTP {status}")));
        }
        Ok(response)
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str, dest: &Path, title: &str) -> Result<()> {
        debug!(url = %redact_url(url), dest = %dest.display(), "downloading");
        let response = self.get(url).await?;

        let task = self.progress.begin(title);
        if let Some(len) = response.content_length() {
            task.set_total(len);
        }

        let temp = partial_path(dest);
        let mut file = tokio::fs::File::create(&temp).await?;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    task.finish();
                    let _ = tokio::fs::remove_file(&temp).await;
                    return Err(network_error(url, format!("download interrupted: {e}")));
                }
            };
            file.write_all(&chunk).await?;
            task.advance(chunk.len() as u64);
        }
        file.flush().await?;
        drop(file);
        task.finish();

        tokio::fs::rename(&temp, dest).await?;
        Ok(())
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        debug!(url = %redact_url(url), "fetching page");
        self.get(url)
            .await?
            .text()
            .await
            .map_err(|e| network_error(url, e))
    }
}
