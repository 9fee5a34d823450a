//! HTTP client wrapper with Range request support.
//!
//! Every request is attempted once; retrying is decided by the caller
//! through [`crate::retry::RetryPolicy`] and [`CloudError::is_transient`].

use crate::error::{CloudError, Result};
use reqwest::Client;
use std::time::Duration;

/// HTTP client for fetching byte ranges from remote files.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    request_timeout: Duration,
}

impl HttpClient {
    /// Create a new HTTP client.
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("hexchange/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            request_timeout,
        })
    }

    /// Fetch a byte range from a remote file.
    ///
    /// Returns the raw bytes for `[offset .. offset + length)`.
    pub async fn fetch_range(&self, url: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let range_value = format!("bytes={}-{}", offset, offset + length - 1);

        let resp = self
            .client
            .get(url)
            .header(reqwest::header::RANGE, &range_value)
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::RANGE_NOT_SATISFIABLE
            || (status.is_success() && status != reqwest::StatusCode::PARTIAL_CONTENT)
        {
            return Err(CloudError::RangeNotSupported {
                url: url.to_string(),
            });
        }

        if !status.is_success() {
            return Err(CloudError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = resp.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// Fetch multiple byte ranges concurrently.
    ///
    /// Each element in `ranges` is `(offset, length)`.
    /// Returns one `Vec<u8>` per range, in the same order.
    pub async fn fetch_ranges(&self, url: &str, ranges: &[(u64, u64)]) -> Result<Vec<Vec<u8>>> {
        use futures::stream::{FuturesOrdered, StreamExt};

        let mut futs = FuturesOrdered::new();
        for &(offset, length) in ranges {
            futs.push_back(self.fetch_range(url, offset, length));
        }

        let mut results = Vec::with_capacity(ranges.len());
        while let Some(res) = futs.next().await {
            results.push(res?);
        }

        Ok(results)
    }

    /// Getter for the timeout duration.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// The underlying reqwest client, shared with the STAC client.
    pub fn inner(&self) -> &Client {
        &self.client
    }
}
