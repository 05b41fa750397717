//! HttpSource: ranged GET reads from plain HTTP(S) URLs.

use crate::{
    errors::{StorageError, StorageResult},
    services::retry::RetryPolicy,
};
use bytes::Bytes;
use reqwest::{StatusCode, header};
use std::time::Duration;

#[derive(Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl HttpSource {
    pub fn new(timeout: Duration, policy: RetryPolicy) -> StorageResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| StorageError::permanent("http_client", err.to_string()))?;
        Ok(Self { client, policy })
    }

    /// Total size of the resource, discovered from a one-byte ranged GET.
    pub async fn content_length(&self, url: &str) -> StorageResult<u64> {
        self.policy
            .run("http_content_length", || self.try_content_length(url))
            .await
    }

    /// Bytes `start..=end` of the resource.
    pub async fn get_range(&self, url: &str, start: u64, end: u64) -> StorageResult<Bytes> {
        self.policy
            .run("http_get_range", || self.try_get_range(url, start, end))
            .await
    }

    async fn try_content_length(&self, url: &str) -> StorageResult<u64> {
        let response = self
            .client
            .get(url)
            .header(header::RANGE, "bytes=0-0")
            .send()
            .await
            .map_err(|err| classify("http_content_length", err))?;

        let status = response.status();
        let content_range = response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|value| value.to_str().ok());

        match (status, content_range) {
            (StatusCode::PARTIAL_CONTENT, Some(value)) => parse_content_range_total(value),
            (StatusCode::PARTIAL_CONTENT, None) => {
                Err(StorageError::InvalidContentRange(String::new()))
            }
            // An empty resource has no byte 0 to serve.
            (StatusCode::RANGE_NOT_SATISFIABLE, Some(value))
                if parse_content_range_total(value).ok() == Some(0) =>
            {
                Ok(0)
            }
            _ => Err(StorageError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            }),
        }
    }

    async fn try_get_range(&self, url: &str, start: u64, end: u64) -> StorageResult<Bytes> {
        let response = self
            .client
            .get(url)
            .header(header::RANGE, format!("bytes={}-{}", start, end))
            .send()
            .await
            .map_err(|err| classify("http_get_range", err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| classify("http_get_range", err))?;
        let expected = end - start + 1;
        if body.len() as u64 != expected {
            return Err(StorageError::ShortRead {
                offset: start,
                expected,
                actual: body.len() as u64,
            });
        }
        Ok(body)
    }
}

fn classify(operation: &'static str, err: reqwest::Error) -> StorageError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        StorageError::transient(operation, err.to_string())
    } else {
        StorageError::permanent(operation, err.to_string())
    }
}

/// Parse the total length out of `bytes <start>-<end>/<total>`.
pub fn parse_content_range_total(value: &str) -> StorageResult<u64> {
    let invalid = || StorageError::InvalidContentRange(value.to_string());
    let (_, total) = value.split_once('/').ok_or_else(invalid)?;
    total.trim().parse::<u64>().map_err(|_| invalid())
}
