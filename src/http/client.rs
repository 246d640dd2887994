//! Shared HTTP client for page fetches and attachment transfers.
//!
//! One client is built per run and cloned into every worker, so connection
//! pooling is shared across the batch.

use std::io::SeekFrom;
use std::path::Path;

use futures_util::StreamExt;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT,
};
use reqwest::{Client, redirect};
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};
use url::Url;

use super::charset::decode_body;
use super::error::FetchError;
use crate::config::HarvestConfig;
use crate::user_agent::UserAgentPool;

/// Maximum redirects followed for a single request.
const MAX_REDIRECTS: usize = 10;

/// A fetched page body together with the URL it was served from.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL that was requested.
    pub url: String,
    /// URL after redirects; relative links resolve against this.
    pub final_url: String,
    /// Body decoded with the declared or detected charset.
    pub body: String,
}

/// HTTP client with rotating User-Agent and fixed Accept headers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    agents: UserAgentPool,
}

impl HttpClient {
    /// Builds the client from run configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Build`] if reqwest rejects the configuration.
    pub fn from_config(config: &HarvestConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .default_headers(default_headers(config))
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .gzip(true)
            .build()
            .map_err(|source| FetchError::Build { source })?;

        debug!(
            timeout_secs = config.timeout_secs,
            user_agents = config.user_agents.len(),
            "built HTTP client"
        );

        Ok(Self {
            client,
            agents: UserAgentPool::new(&config.user_agents),
        })
    }

    /// Fetches a page and decodes its body.
    ///
    /// The charset comes from the Content-Type header, the markup's
    /// `<meta>` declaration, or detection; see [`decode_body`].
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] for invalid URLs, transport failures, and
    /// non-success statuses.
    #[instrument(level = "debug", skip(self))]
    pub async fn fetch_page(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let response = self.send(url).await?;
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::network(url, e))?;
        let (body, encoding) = decode_body(&bytes, content_type.as_deref());

        debug!(
            final_url = %final_url,
            bytes = bytes.len(),
            encoding = encoding.name(),
            "page fetched"
        );

        Ok(FetchedPage {
            url: url.to_string(),
            final_url,
            body,
        })
    }

    /// Streams a response body into an already reserved file.
    ///
    /// The file is truncated before the request goes out and again if
    /// streaming fails, so a failed attempt leaves no partial body behind.
    /// `path` is only used for error context.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] for transport failures, non-success statuses,
    /// and write errors.
    #[instrument(level = "debug", skip(self, file), fields(path = %path.display()))]
    pub async fn fetch_to_file(
        &self,
        url: &str,
        file: &mut File,
        path: &Path,
    ) -> Result<u64, FetchError> {
        truncate(file, path).await?;
        let response = self.send(url).await?;

        let result = stream_to_file(file, response, url, path).await;
        if result.is_err() {
            debug!("discarding partial body");
            if let Err(e) = truncate(file, path).await {
                warn!(error = %e, "failed to truncate partial file");
            }
        }
        result
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::invalid_url(url));
        }

        let response = self
            .client
            .get(parsed)
            .header(USER_AGENT, self.agents.pick())
            .send()
            .await
            .map_err(|e| FetchError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::http_status(url, status.as_u16()));
        }
        Ok(response)
    }
}

fn default_headers(config: &HarvestConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in [
        (ACCEPT, config.accept.as_str()),
        (ACCEPT_LANGUAGE, config.accept_language.as_str()),
    ] {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                headers.insert(name, value);
            }
            Err(_) => warn!(header = %name, "ignoring invalid header value"),
        }
    }
    headers
}

async fn truncate(file: &mut File, path: &Path) -> Result<(), FetchError> {
    file.set_len(0).await.map_err(|e| FetchError::io(path, e))?;
    file.seek(SeekFrom::Start(0))
        .await
        .map_err(|e| FetchError::io(path, e))?;
    Ok(())
}

/// Streams response body to file, returning bytes written.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, FetchError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| FetchError::network(url, e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| FetchError::io(file_path, e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| FetchError::io(file_path, e))?;

    Ok(bytes_written)
}
