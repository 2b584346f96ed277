//! REST client for the authoritative item store.
//!
//! Every call carries the session's bearer token. Mutating calls make the
//! server broadcast the change on the live channel to the principal's other
//! sessions.

use std::future::Future;
use std::sync::Arc;

use reqwest::header::{IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use stockpile_engine::{Error, Record, Result};

/// Result of a conditional fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Full remote collection, with the server's `Last-Modified` validator
    /// for the next request, if it sent one.
    Fetched {
        records: Vec<Record>,
        last_modified: Option<String>,
    },
    /// Nothing changed since the validator that was sent.
    NotModified,
}

/// Remote operations needed by the sync engine.
pub trait RemoteApi: Send + Sync + 'static {
    /// Fetch every record visible to the token's principal.
    fn fetch_all(
        &self,
        token: &str,
        if_modified_since: Option<&str>,
    ) -> impl Future<Output = Result<FetchOutcome>> + Send;

    /// Create a record. The server assigns the id and version 1.
    fn create(&self, token: &str, record: &Record) -> impl Future<Output = Result<Record>> + Send;

    /// Replace the record with the same id.
    fn update(&self, token: &str, record: &Record) -> impl Future<Output = Result<Record>> + Send;

    /// Delete a record by id.
    fn delete(&self, token: &str, id: &str) -> impl Future<Output = Result<()>> + Send;
}

impl<T: RemoteApi> RemoteApi for Arc<T> {
    fn fetch_all(
        &self,
        token: &str,
        if_modified_since: Option<&str>,
    ) -> impl Future<Output = Result<FetchOutcome>> + Send {
        (**self).fetch_all(token, if_modified_since)
    }

    fn create(&self, token: &str, record: &Record) -> impl Future<Output = Result<Record>> + Send {
        (**self).create(token, record)
    }

    fn update(&self, token: &str, record: &Record) -> impl Future<Output = Result<Record>> + Send {
        (**self).update(token, record)
    }

    fn delete(&self, token: &str, id: &str) -> impl Future<Output = Result<()>> + Send {
        (**self).delete(token, id)
    }
}

/// Error body returned by the server.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// [`RemoteApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    items_url: String,
}

impl HttpRemote {
    /// Create a client for the API rooted at `base_url`.
    pub fn new(base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a client reusing an existing connection pool.
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            items_url: format!("{}/items", base_url.trim_end_matches('/')),
        }
    }

    /// URL of the item collection.
    pub fn items_url(&self) -> &str {
        &self.items_url
    }

    fn item_url(&self, id: &str) -> String {
        format!("{}/{}", self.items_url, id)
    }
}

impl RemoteApi for HttpRemote {
    async fn fetch_all(
        &self,
        token: &str,
        if_modified_since: Option<&str>,
    ) -> Result<FetchOutcome> {
        let mut request = self.client.get(&self.items_url).bearer_auth(token);
        if let Some(since) = if_modified_since {
            request = request.header(IF_MODIFIED_SINCE, since);
        }

        let response = request.send().await.map_err(transport_error)?;
        if response.status() == StatusCode::NOT_MODIFIED {
            tracing::debug!("Item collection not modified");
            return Ok(FetchOutcome::NotModified);
        }

        let response = check_status(response).await?;
        // Only a server-issued validator is safe; anything else could hide changes
        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let records: Vec<Record> = response.json().await.map_err(transport_error)?;
        tracing::debug!(count = records.len(), "Fetched remote items");

        Ok(FetchOutcome::Fetched {
            records,
            last_modified,
        })
    }

    async fn create(&self, token: &str, record: &Record) -> Result<Record> {
        let response = self
            .client
            .post(&self.items_url)
            .bearer_auth(token)
            .json(&record.without_id())
            .send()
            .await
            .map_err(transport_error)?;

        let created: Record = check_status(response)
            .await?
            .json()
            .await
            .map_err(transport_error)?;
        tracing::debug!(record_id = ?created.id, "Created remote item");
        Ok(created)
    }

    async fn update(&self, token: &str, record: &Record) -> Result<Record> {
        let id = record
            .id()
            .ok_or_else(|| Error::Validation("update requires an id".into()))?;

        let response = self
            .client
            .put(self.item_url(id))
            .bearer_auth(token)
            .json(&record.for_remote())
            .send()
            .await
            .map_err(transport_error)?;

        let updated: Record = check_status(response)
            .await?
            .json()
            .await
            .map_err(transport_error)?;
        tracing::debug!(record_id = %id, version = updated.version, "Updated remote item");
        Ok(updated)
    }

    async fn delete(&self, token: &str, id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.item_url(id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)?;

        check_status(response).await?;
        tracing::debug!(record_id = %id, "Deleted remote item");
        Ok(())
    }
}

/// Map a non-success response to an engine error.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.message)
        .unwrap_or(text);

    Err(status_error(status, message))
}

fn status_error(status: StatusCode, message: String) -> Error {
    match status {
        StatusCode::BAD_REQUEST => Error::Validation(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Auth(if message.is_empty() {
            status.to_string()
        } else {
            message
        }),
        _ => Error::Network(format!("server responded with {}: {}", status, message)),
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_decode() {
        Error::Protocol(e.to_string())
    } else {
        Error::Network(e.to_string())
    }
}
