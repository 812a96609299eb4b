//! HTTP client for the remote replica API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use super::remote::{
    ChangesPage, DeleteBody, DeleteRequest, ErrorBody, RemoteError, RemoteStore, StoredRecord,
    UpsertBody, UpsertRequest,
};
use crate::error::{Error, Result};
use crate::models::SyncCursor;
use crate::util::{compact_text, is_http_url, normalize_text_option};

#[derive(Clone)]
pub struct HttpRemote {
    endpoint: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemote")
            .field("endpoint", &self.endpoint)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    /// Create a client for the API rooted at `endpoint`.
    ///
    /// `timeout` bounds every request; a hung call fails as `RemoteError::Timeout`.
    pub fn new(
        endpoint: impl Into<String>,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::Config(format!("Failed to build HTTP client: {error}")))?;

        Ok(Self {
            endpoint,
            auth_token: normalize_text_option(auth_token),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn record_url(&self, collection: &str, id: &str) -> String {
        format!(
            "{}/v1/collections/{}/records/{}",
            self.endpoint,
            urlencoding::encode(collection),
            urlencoding::encode(id)
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Accept", "application/json");
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> std::result::Result<T, RemoteError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|error| RemoteError::Transient(format!("Invalid response body: {error}")));
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn upsert(&self, request: UpsertRequest) -> std::result::Result<StoredRecord, RemoteError> {
        let url = self.record_url(&request.collection, request.record_id.as_str());
        let body = UpsertBody {
            operation_id: request.operation_id,
            payload: request.payload,
            client_updated_at: request.client_updated_at,
            base_version: request.base_version,
        };
        self.send(self.client.put(url).json(&body)).await
    }

    async fn delete(&self, request: DeleteRequest) -> std::result::Result<StoredRecord, RemoteError> {
        let url = self.record_url(&request.collection, request.record_id.as_str());
        let body = DeleteBody {
            operation_id: request.operation_id,
            base_version: request.base_version,
        };
        self.send(self.client.delete(url).json(&body)).await
    }

    async fn changes(
        &self,
        collection: &str,
        since: Option<&SyncCursor>,
        limit: usize,
    ) -> std::result::Result<ChangesPage, RemoteError> {
        let url = format!(
            "{}/v1/collections/{}/changes",
            self.endpoint,
            urlencoding::encode(collection)
        );
        let mut query = vec![("limit", limit.to_string())];
        if let Some(cursor) = since {
            query.push(("since", cursor.as_str().to_string()));
        }
        self.send(self.client.get(url).query(&query)).await
    }

    async fn health(&self) -> std::result::Result<(), RemoteError> {
        let url = format!("{}/healthz", self.endpoint);
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(classify_transport_error)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify_status(status, &body))
        }
    }
}

fn classify_transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Transient(error.to_string())
    }
}

/// Map a non-success response onto the remote failure taxonomy.
fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok();

    if status == StatusCode::CONFLICT {
        if let Some(current) = parsed.as_ref().and_then(|payload| payload.current.clone()) {
            return RemoteError::Conflict(Box::new(current));
        }
    }

    let message = parsed.map_or_else(
        || {
            let trimmed = compact_text(body);
            if trimmed.is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                trimmed
            }
        },
        |payload| payload.error.trim().to_string(),
    );

    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        RemoteError::Transient(format!("{message} ({})", status.as_u16()))
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        RemoteError::Unauthorized {
            status: status.as_u16(),
            message,
        }
    } else {
        RemoteError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

fn normalize_endpoint(raw: String) -> Result<String> {
    let endpoint = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::Config("Remote URL must not be empty".to_string()))?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(Error::Config(
            "Remote URL must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_endpoint_rejects_invalid_values() {
        assert!(normalize_endpoint(String::new()).is_err());
        assert!(normalize_endpoint("api.example.com".to_string()).is_err());
        assert_eq!(
            normalize_endpoint(" https://sync.example.com/ ".to_string()).unwrap(),
            "https://sync.example.com"
        );
    }

    #[test]
    fn debug_redacts_token() {
        let remote = HttpRemote::new(
            "https://sync.example.com",
            Some("secret".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        let debug = format!("{remote:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn record_url_encodes_ids() {
        let remote =
            HttpRemote::new("http://localhost:8080", None, Duration::from_secs(5)).unwrap();
        assert_eq!(
            remote.record_url("jobs", "a b/c"),
            "http://localhost:8080/v1/collections/jobs/records/a%20b%2Fc"
        );
    }

    #[test]
    fn classify_status_maps_taxonomy() {
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "").is_retryable());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down").is_retryable());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, "").is_retryable());

        let unauthorized = classify_status(
            StatusCode::UNAUTHORIZED,
            r#"{"error":"Unauthorized: Invalid API token"}"#,
        );
        assert_eq!(
            unauthorized,
            RemoteError::Unauthorized {
                status: 401,
                message: "Unauthorized: Invalid API token".to_string()
            }
        );
        assert!(unauthorized.is_retryable());
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, ""),
            RemoteError::Unauthorized { status: 403, .. }
        ));

        let rejected = classify_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"error":"Record payload must be a JSON object"}"#,
        );
        assert_eq!(
            rejected,
            RemoteError::Rejected {
                status: 422,
                message: "Record payload must be a JSON object".to_string()
            }
        );

        let body = json!({
            "error": "version conflict",
            "current": {
                "collection": "jobs",
                "id": "A",
                "payload": { "price": 60 },
                "updated_at": 105,
                "deleted": false
            }
        });
        let conflict = classify_status(StatusCode::CONFLICT, &body.to_string());
        assert!(matches!(conflict, RemoteError::Conflict(current) if current.updated_at == 105));
    }

    #[test]
    fn conflict_without_current_is_rejected() {
        let error = classify_status(StatusCode::CONFLICT, r#"{"error":"conflict"}"#);
        assert!(matches!(error, RemoteError::Rejected { status: 409, .. }));
    }
}
