use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tracing::{debug, instrument};

use crate::error::{Error, Result};

/// Fetches the raw bytes of a document.
#[async_trait]
pub trait ByteSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTP byte source.
///
/// With a proxy configured, `https://files.example/doc` is requested as
/// `GET <proxy>?url=https%3A%2F%2Ffiles.example%2Fdoc` so the renderer never
/// needs credentials for the remote file host. `file://` URLs are read from
/// disk and never proxied.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    proxy: Option<Url>,
}

impl HttpFetcher {
    pub fn new(proxy: Option<Url>, timeout: Option<Duration>) -> std::result::Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            proxy,
        })
    }

    /// The URL actually requested for `source`.
    pub fn request_url(&self, source: &str) -> Result<Url> {
        match &self.proxy {
            Some(proxy) => Ok(proxy_url(proxy, source)),
            None => Url::parse(source).map_err(|err| Error::fetch(source, err.to_string())),
        }
    }
}

/// Builds `<proxy>?url=<encoded source>`, keeping any query the proxy already has.
pub fn proxy_url(proxy: &Url, source: &str) -> Url {
    let mut url = proxy.clone();
    url.query_pairs_mut().append_pair("url", source);
    url
}

#[async_trait]
impl ByteSource for HttpFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if let Ok(parsed) = Url::parse(url) {
            if parsed.scheme() == "file" {
                let path = parsed
                    .to_file_path()
                    .map_err(|_| Error::fetch(url, "not a local file path"))?;
                return tokio::fs::read(&path)
                    .await
                    .map_err(|err| Error::fetch(url, err.to_string()));
            }
        }

        let target = self.request_url(url)?;
        debug!(request = %target, "fetching document bytes");
        let response = self
            .client
            .get(target)
            .send()
            .await
            .map_err(|err| Error::fetch(url, err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(url, format!("HTTP status {status}")));
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| Error::fetch(url, err.to_string()))?;
        debug!(bytes = body.len(), "document bytes received");
        Ok(body.to_vec())
    }
}
