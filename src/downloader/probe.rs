//! HEAD probing: size, range support and naming headers

use crate::utils::error::{LoaderError, Result};
use futures::StreamExt;
use reqwest::header::{ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, RANGE, USER_AGENT};
use reqwest::header::HeaderMap;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Bytes hashed into collision-resistant file names
pub const SAMPLE_SIZE: usize = 8192;

/// What a HEAD request told us about a resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResult {
    /// 0 when the server did not send Content-Length
    pub total_size: u64,
    pub supports_ranges: bool,
    pub content_disposition: Option<String>,
    pub content_type: Option<String>,
}

impl ProbeResult {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            total_size: content_length(headers),
            supports_ranges: headers
                .get(ACCEPT_RANGES)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().eq_ignore_ascii_case("bytes"))
                .unwrap_or(false),
            content_disposition: header_string(headers, CONTENT_DISPOSITION.as_str()),
            content_type: header_string(headers, CONTENT_TYPE.as_str()),
        }
    }

    /// MIME type without parameters, lowercased
    pub fn mime_type(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .filter(|ct| !ct.is_empty())
    }
}

fn content_length(headers: &HeaderMap) -> u64 {
    // Response::content_length() reports the body size, which is 0 for HEAD
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0)
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Issues the HEAD request that precedes every HTTP download
#[derive(Debug, Clone)]
pub struct SizeProbe {
    client: Client,
    timeout: Duration,
}

impl SizeProbe {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// HEAD the URL. Non-2xx, timeouts and connection failures are all
    /// network-classed; nothing is retried here.
    pub async fn probe(&self, url: &str, user_agent: &str) -> Result<ProbeResult> {
        let response = self
            .client
            .head(url)
            .header(USER_AGENT, user_agent)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoaderError::HttpStatus(status));
        }

        let result = ProbeResult::from_headers(response.headers());
        debug!(
            url,
            total_size = result.total_size,
            supports_ranges = result.supports_ranges,
            "Probed resource"
        );
        Ok(result)
    }

    /// Fetch up to the first 8 KiB with a ranged GET.
    ///
    /// Servers that ignore the range still work: the stream is dropped once
    /// enough bytes have arrived.
    pub async fn fetch_sample(&self, url: &str, user_agent: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, user_agent)
            .header(RANGE, format!("bytes=0-{}", SAMPLE_SIZE - 1))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoaderError::HttpStatus(status));
        }

        let mut sample = Vec::with_capacity(SAMPLE_SIZE);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.classify(e))?;
            let take = (SAMPLE_SIZE - sample.len()).min(chunk.len());
            sample.extend_from_slice(&chunk[..take]);
            if sample.len() >= SAMPLE_SIZE {
                break;
            }
        }

        Ok(sample)
    }

    fn classify(&self, err: reqwest::Error) -> LoaderError {
        if err.is_timeout() {
            LoaderError::Timeout(self.timeout)
        } else {
            LoaderError::Network(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_headers_with_range_support() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("10485760"));
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("Application/Zip; charset=binary"),
        );

        let result = ProbeResult::from_headers(&headers);
        assert_eq!(result.total_size, 10_485_760);
        assert!(result.supports_ranges);
        assert_eq!(result.mime_type().as_deref(), Some("application/zip"));
        assert!(result.content_disposition.is_none());
    }

    #[test]
    fn test_headers_without_ranges_or_length() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("none"));

        let result = ProbeResult::from_headers(&headers);
        assert_eq!(result.total_size, 0);
        assert!(!result.supports_ranges);
        assert!(result.mime_type().is_none());
    }

    #[test]
    fn test_accept_ranges_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("Bytes"));
        assert!(ProbeResult::from_headers(&headers).supports_ranges);
    }

    #[test]
    fn test_garbage_content_length_is_unknown() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("lots"));
        assert_eq!(ProbeResult::from_headers(&headers).total_size, 0);
    }
}
