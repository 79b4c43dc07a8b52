//! HTTP client for a remote BCH x402 facilitator.
//!
//! Wraps the facilitator's `/facilitator/verify`, `/facilitator/settle`,
//! and `/facilitator/supported` endpoints with typed requests and
//! responses. Construct it from the facilitator server's root URL:
//!
//! ```rust
//! use x402_bch_axum::FacilitatorClient;
//!
//! let facilitator = FacilitatorClient::try_new("http://localhost:4345").unwrap();
//! ```

use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

use x402_bch::types::{
    SettleRequest, SettleResponse, SupportedPaymentKindsResponse, VerifyRequest, VerifyResponse,
};

/// Errors talking to the remote facilitator.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorClientError {
    #[error("Invalid facilitator URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("Facilitator URL cannot be a base")]
    CannotBeABase,
    #[error("Facilitator request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Facilitator returned status {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },
}

/// A client for one remote facilitator.
#[derive(Debug, Clone)]
pub struct FacilitatorClient {
    base_url: Url,
    verify_url: Url,
    settle_url: Url,
    supported_url: Url,
    client: Client,
    timeout: Option<Duration>,
}

impl FacilitatorClient {
    /// Build a client from the facilitator server's root URL.
    pub fn try_new(url: &str) -> Result<Self, FacilitatorClientError> {
        let base_url: Url = url.parse()?;
        let verify_url = endpoint(&base_url, &["facilitator", "verify"])?;
        let settle_url = endpoint(&base_url, &["facilitator", "settle"])?;
        let supported_url = endpoint(&base_url, &["facilitator", "supported"])?;
        Ok(FacilitatorClient {
            base_url,
            verify_url,
            settle_url,
            supported_url,
            client: Client::new(),
            timeout: None,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Per-request timeout; no timeout by default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// `POST /facilitator/verify`.
    pub async fn verify(
        &self,
        request: &VerifyRequest,
    ) -> Result<VerifyResponse, FacilitatorClientError> {
        self.post_json(self.verify_url.clone(), request).await
    }

    /// `POST /facilitator/settle`.
    pub async fn settle(
        &self,
        request: &SettleRequest,
    ) -> Result<SettleResponse, FacilitatorClientError> {
        self.post_json(self.settle_url.clone(), request).await
    }

    /// `GET /facilitator/supported`.
    pub async fn supported(
        &self,
    ) -> Result<SupportedPaymentKindsResponse, FacilitatorClientError> {
        let mut builder = self.client.get(self.supported_url.clone());
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder.send().await?;
        Self::expect_ok(response).await
    }

    async fn post_json<B, T>(&self, url: Url, body: &B) -> Result<T, FacilitatorClientError>
    where
        B: serde::Serialize,
        T: serde::de::DeserializeOwned,
    {
        let mut builder = self.client.post(url).json(body);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder.send().await?;
        Self::expect_ok(response).await
    }

    async fn expect_ok<T>(response: reqwest::Response) -> Result<T, FacilitatorClientError>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FacilitatorClientError::UnexpectedStatus { status, body });
        }
        Ok(response.json::<T>().await?)
    }
}

impl TryFrom<&str> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_new(value)
    }
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, FacilitatorClientError> {
    let mut url = base.clone();
    {
        let mut parts = url
            .path_segments_mut()
            .map_err(|_| FacilitatorClientError::CannotBeABase)?;
        parts.pop_if_empty();
        for segment in segments {
            parts.push(segment);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_urls() {
        let client = FacilitatorClient::try_new("http://localhost:4345").unwrap();
        assert_eq!(
            client.verify_url.as_str(),
            "http://localhost:4345/facilitator/verify"
        );
        assert_eq!(
            client.settle_url.as_str(),
            "http://localhost:4345/facilitator/settle"
        );
        assert_eq!(
            client.supported_url.as_str(),
            "http://localhost:4345/facilitator/supported"
        );
    }

    #[test]
    fn test_trailing_slash_handled() {
        let client = FacilitatorClient::try_new("http://facilitator.example/").unwrap();
        assert_eq!(
            client.verify_url.as_str(),
            "http://facilitator.example/facilitator/verify"
        );
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(FacilitatorClient::try_new("not a url").is_err());
    }
}
