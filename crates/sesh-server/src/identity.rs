//! Identity verification for `LinkUser`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use sesh_core::LinkedUser;
use tracing::debug;

/// Errors reaching the identity service.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// HTTP request failed (connect, timeout, or body decode).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Unexpected status from the identity service.
    #[error("verification service returned {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },
}

/// Outcome of verifying a bearer token.
#[derive(Clone, Debug, PartialEq)]
pub enum Verification {
    /// Token accepted; the linked user record.
    Valid(LinkedUser),
    /// Token rejected.
    Invalid,
}

/// Resolves an opaque bearer token to a user record.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify `token`.
    async fn verify(&self, token: &str) -> Result<Verification, VerifyError>;
}

#[derive(Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    valid: bool,
    user: Option<LinkedUser>,
}

/// Calls `GET {base_url}/verify` with the token in the `authorization` header.
pub struct HttpIdentityVerifier {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpIdentityVerifier {
    /// Verifier against `base_url`, bounding each call by `timeout`.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn verify_url(&self) -> String {
        format!("{}/verify", self.base_url)
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    #[tracing::instrument(skip_all)]
    async fn verify(&self, token: &str) -> Result<Verification, VerifyError> {
        let resp = self
            .client
            .get(self.verify_url())
            .header(reqwest::header::AUTHORIZATION, token)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Ok(Verification::Invalid);
        }
        if !status.is_success() {
            return Err(VerifyError::Status {
                status: status.as_u16(),
            });
        }

        let body: VerifyResponse = resp.json().await?;
        match body.user {
            Some(user) if body.valid => Ok(Verification::Valid(user)),
            _ => {
                debug!("token rejected by identity service");
                Ok(Verification::Invalid)
            }
        }
    }
}
