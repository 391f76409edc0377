/// RPC Client Module
///
/// This module defines the ledger backend capability and its HTTP implementation.
/// A backend hands out the raw, still-encoded close meta for one ledger at a time;
/// decoding is the reader's job.
use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::BackendError;

#[cfg(test)]
use mockall::automock;

/// Source of raw ledger close meta.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LedgerBackend: Send + Sync {
    /// Fetch the encoded close meta for `sequence`.
    ///
    /// `Ok(None)` means the ledger is not available yet, which is different from a failed call.
    async fn get_ledger(&self, sequence: u32) -> Result<Option<Vec<u8>>, BackendError>;

    /// Highest ledger sequence the backend can serve.
    async fn latest_ledger_sequence(&self) -> Result<u32, BackendError>;
}

/// Backend that serves ledgers over HTTP.
///
/// `GET {base}/ledgers/{seq}` returns the encoded meta as the response body, and
/// `GET {base}/ledgers/latest` returns the tip sequence as decimal text.
pub struct HttpLedgerBackend {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpLedgerBackend {
    /// Create a new backend client for the specified endpoint
    pub fn new(endpoint: impl Into<String>) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().build()?;
        let endpoint = endpoint.into().trim_end_matches('/').to_string();

        Ok(Self { client, endpoint })
    }

    /// Get the endpoint URL this client is connected to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn ledger_url(&self, path: &str) -> String {
        format!("{}/ledgers/{}", self.endpoint, path)
    }
}

#[async_trait]
impl LedgerBackend for HttpLedgerBackend {
    async fn get_ledger(&self, sequence: u32) -> Result<Option<Vec<u8>>, BackendError> {
        tracing::debug!("Fetching ledger {} from {}", sequence, self.endpoint);

        let response = self.client.get(self.ledger_url(&sequence.to_string())).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response.bytes().await?;
                tracing::debug!("Fetched ledger {} ({} bytes)", sequence, body.len());
                Ok(Some(body.to_vec()))
            }
            status => Err(BackendError::Status { status: status.as_u16() }),
        }
    }

    async fn latest_ledger_sequence(&self) -> Result<u32, BackendError> {
        let response = self.client.get(self.ledger_url("latest")).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status { status: status.as_u16() });
        }

        parse_sequence(&response.text().await?)
    }
}

fn parse_sequence(body: &str) -> Result<u32, BackendError> {
    body.trim()
        .parse::<u32>()
        .map_err(|e| BackendError::InvalidResponse(format!("expected ledger sequence, got {:?}: {}", body.trim(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trailing_slash() {
        let backend = HttpLedgerBackend::new("http://localhost:8000/").unwrap();
        assert_eq!(backend.endpoint(), "http://localhost:8000");
        assert_eq!(backend.ledger_url("42"), "http://localhost:8000/ledgers/42");
    }

    #[test]
    fn test_parse_sequence() {
        assert_eq!(parse_sequence("1234\n").unwrap(), 1234);
        assert!(matches!(parse_sequence("latest"), Err(BackendError::InvalidResponse(_))));
    }
}
