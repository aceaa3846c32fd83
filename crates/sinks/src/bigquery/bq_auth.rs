//! Bearer tokens for the BigQuery API.

use std::path::Path;
use std::sync::Arc;

use gcp_auth::{CustomServiceAccount, TokenProvider};
use rowsync_core::{WarehouseError, WarehouseResult};

const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

pub(super) enum TokenSource {
    /// Configured token, sent as is. Expires on Google's schedule.
    Static(String),
    /// Minted from a service-account key; cached and refreshed before
    /// expiry by `gcp_auth`.
    ServiceAccount(Arc<CustomServiceAccount>),
    /// No credentials, for emulators.
    Anonymous,
}

impl TokenSource {
    /// An explicit token wins; the key file is not read in that case.
    pub(super) fn select(
        access_token: Option<&str>,
        key_file: Option<&str>,
    ) -> WarehouseResult<Self> {
        if let Some(token) = access_token.filter(|t| !t.is_empty()) {
            return Ok(TokenSource::Static(token.to_owned()));
        }
        match key_file.filter(|k| !k.is_empty()) {
            Some(path) => {
                let account = CustomServiceAccount::from_file(Path::new(path))
                    .map_err(|e| WarehouseError::Auth {
                        details: format!("service account key {path}: {e}").into(),
                    })?;
                Ok(TokenSource::ServiceAccount(Arc::new(account)))
            }
            None => Ok(TokenSource::Anonymous),
        }
    }

    pub(super) fn kind(&self) -> &'static str {
        match self {
            TokenSource::Static(_) => "static",
            TokenSource::ServiceAccount(_) => "service_account",
            TokenSource::Anonymous => "anonymous",
        }
    }

    /// Current bearer token, `None` when anonymous.
    pub(super) async fn bearer(&self) -> WarehouseResult<Option<String>> {
        match self {
            TokenSource::Static(token) => Ok(Some(token.clone())),
            TokenSource::ServiceAccount(account) => {
                let token = account.token(&[BIGQUERY_SCOPE]).await.map_err(|e| {
                    // refresh goes over the network; let the caller retry
                    WarehouseError::Connect {
                        details: format!("fetching access token: {e}").into(),
                    }
                })?;
                Ok(Some(token.as_str().to_owned()))
            }
            TokenSource::Anonymous => Ok(None),
        }
    }
}
