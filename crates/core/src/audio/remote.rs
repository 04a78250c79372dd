use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::{Result, SpectraError};

use super::software::StreamFetcher;

/// Downloads stream media over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("spectra/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(stream_error)?;
        Ok(Self { client })
    }
}

impl StreamFetcher for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            tracing::debug!(url, "fetching stream");
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(stream_error)?
                .error_for_status()
                .map_err(stream_error)?;
            let bytes = response.bytes().await.map_err(stream_error)?;
            tracing::debug!(url, bytes = bytes.len(), "stream fetched");
            Ok(bytes.to_vec())
        })
    }
}

fn stream_error(err: reqwest::Error) -> SpectraError {
    SpectraError::Stream(err.to_string())
}
