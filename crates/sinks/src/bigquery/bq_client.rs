//! Thin authenticated JSON client over `reqwest`.

use std::future::Future;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use common::{RetryOutcome, RetryPolicy, retry_async};
use reqwest::{RequestBuilder, Response, StatusCode};
use rowsync_core::{WarehouseError, WarehouseResult};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::bq_api::ErrorEnvelope;
use super::bq_auth::TokenSource;

const MULTIPART_BOUNDARY: &str = "rowsync_load_boundary_7f3a";

pub(super) struct BqClient {
    http: reqwest::Client,
    auth: TokenSource,
    request_timeout: Duration,
    cancel: CancellationToken,
}

impl BqClient {
    pub(super) fn new(
        auth: TokenSource,
        request_timeout: Duration,
        cancel: CancellationToken,
    ) -> WarehouseResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("rowsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WarehouseError::Connect {
                details: format!("building http client: {e}").into(),
            })?;

        Ok(Self {
            http,
            auth,
            request_timeout,
            cancel,
        })
    }

    /// Fetched per request so refreshed service-account tokens are used.
    async fn authed(&self, rb: RequestBuilder) -> WarehouseResult<RequestBuilder> {
        Ok(match self.auth.bearer().await? {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        })
    }

    /// GET, retried on transient failures. `None` on 404.
    pub(super) async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        label: &'static str,
    ) -> WarehouseResult<Option<T>> {
        self.with_retries(label, move |_| async move {
            let resp = self
                .authed(self.http.get(url))
                .await?
                .send()
                .await
                .map_err(from_reqwest)?;
            read_json(resp).await
        })
        .await
    }

    /// POST a JSON body. Only pass `retry = true` for idempotent requests.
    pub(super) async fn post_json<B, T>(
        &self,
        url: &str,
        body: &B,
        label: &'static str,
        retry: bool,
    ) -> WarehouseResult<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let send = move |_: u32| async move {
            let resp = self
                .authed(self.http.post(url).json(body))
                .await?
                .send()
                .await
                .map_err(from_reqwest)?;
            read_json::<T>(resp).await?.ok_or_else(|| not_found(url))
        };

        if retry {
            self.with_retries(label, send).await
        } else {
            send(1).await
        }
    }

    /// DELETE. `false` when the resource was already gone.
    pub(super) async fn delete(
        &self,
        url: &str,
        label: &'static str,
    ) -> WarehouseResult<bool> {
        self.with_retries(label, move |_| async move {
            let resp = self
                .authed(self.http.delete(url))
                .await?
                .send()
                .await
                .map_err(from_reqwest)?;
            let status = resp.status();
            if status == StatusCode::NOT_FOUND {
                return Ok(false);
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(from_status(status.as_u16(), &body));
            }
            Ok(true)
        })
        .await
    }

    /// `multipart/related` upload: JSON metadata part, then the payload.
    pub(super) async fn upload<T: DeserializeOwned>(
        &self,
        url: &str,
        metadata: &Value,
        payload: Bytes,
    ) -> WarehouseResult<T> {
        let body = multipart_related(
            MULTIPART_BOUNDARY,
            &serde_json::to_vec(metadata)?,
            &payload,
        );
        debug!(bytes = body.len(), "uploading load payload");

        let resp = self
            .authed(self.http.post(url))
            .await?
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={MULTIPART_BOUNDARY}"),
            )
            .body(body)
            .send()
            .await
            .map_err(from_reqwest)?;

        read_json::<T>(resp).await?.ok_or_else(|| not_found(url))
    }

    async fn with_retries<T, F, Fut>(
        &self,
        label: &'static str,
        op: F,
    ) -> WarehouseResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = WarehouseResult<T>>,
    {
        retry_async(
            op,
            WarehouseError::is_transient,
            self.request_timeout,
            RetryPolicy::default(),
            &self.cancel,
            label,
        )
        .await
        .map_err(|outcome| from_retry(label, outcome))
    }
}

pub(super) fn from_retry(
    label: &'static str,
    outcome: RetryOutcome<WarehouseError>,
) -> WarehouseError {
    match outcome {
        RetryOutcome::Cancelled => WarehouseError::Cancelled,
        RetryOutcome::Timeout { action } => WarehouseError::Timeout { action },
        RetryOutcome::Exhausted {
            attempts,
            last_error,
        } => {
            warn!(label, attempts, error = %last_error, "warehouse request exhausted retries");
            last_error
        }
        RetryOutcome::Failed(e) => e,
    }
}

async fn read_json<T: DeserializeOwned>(
    resp: Response,
) -> WarehouseResult<Option<T>> {
    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }

    let body = resp.text().await.map_err(from_reqwest)?;
    if !status.is_success() {
        return Err(from_status(status.as_u16(), &body));
    }

    serde_json::from_str(&body)
        .map(Some)
        .map_err(|e| WarehouseError::Protocol {
            details: format!("decoding response: {e}").into(),
        })
}

fn not_found(url: &str) -> WarehouseError {
    WarehouseError::NotFound {
        details: url.to_owned().into(),
    }
}

pub(super) fn from_status(status: u16, body: &str) -> WarehouseError {
    let details = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(512).collect());

    match status {
        401 | 403 => WarehouseError::Auth {
            details: details.into(),
        },
        404 => WarehouseError::NotFound {
            details: details.into(),
        },
        429 | 500..=599 => WarehouseError::Unavailable {
            status,
            details: details.into(),
        },
        _ => WarehouseError::Rejected {
            status,
            details: details.into(),
        },
    }
}

fn from_reqwest(e: reqwest::Error) -> WarehouseError {
    if e.is_timeout() {
        WarehouseError::Timeout {
            action: "http request".into(),
        }
    } else if e.is_decode() {
        WarehouseError::Protocol {
            details: e.to_string().into(),
        }
    } else {
        WarehouseError::Connect {
            details: e.to_string().into(),
        }
    }
}

pub(super) fn multipart_related(
    boundary: &str,
    metadata: &[u8],
    payload: &[u8],
) -> Bytes {
    let mut body = BytesMut::with_capacity(payload.len() + metadata.len() + 256);
    body.put_slice(format!("--{boundary}\r\n").as_bytes());
    body.put_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.put_slice(metadata);
    body.put_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.put_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.put_slice(payload);
    body.put_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body.freeze()
}
