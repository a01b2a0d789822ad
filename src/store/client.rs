//! PostgREST client for the persistent store, authenticated with a service key

use std::fmt::Display;

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};

/// Client for server-side store operations
#[derive(Clone)]
pub struct StoreClient {
    client: Client,
    base_url: String,
    service_key: String,
}

impl StoreClient {
    pub fn new(base_url: &str, service_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        }
    }

    /// Get the REST API URL for a table
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Authenticated request with filters sent as encoded query parameters
    fn request(&self, method: Method, table: &str, params: &[(&str, String)]) -> RequestBuilder {
        self.authed(self.client.request(method, self.rest_url(table)).query(params))
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Content-Type", "application/json")
    }

    async fn check(response: Response) -> Result<Response, StoreError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Api { status: status.as_u16(), body });
        }
        Ok(response)
    }

    /// Make an authenticated GET request expecting at most one row
    pub async fn get_one<T: DeserializeOwned>(
        &self,
        table: &str,
        params: &[(&str, String)],
    ) -> Result<Option<T>, StoreError> {
        let response = self
            .request(Method::GET, table, params)
            .header("Accept", "application/vnd.pgrst.object+json")
            .send()
            .await
            .map_err(StoreError::Request)?;

        if response.status() == reqwest::StatusCode::NOT_ACCEPTABLE {
            // No rows found
            return Ok(None);
        }

        let response = Self::check(response).await?;
        response.json().await.map(Some).map_err(StoreError::Parse)
    }

    /// Insert a row without reading it back
    pub async fn insert<T: Serialize>(&self, table: &str, data: &T) -> Result<(), StoreError> {
        let response = self
            .authed(self.client.post(self.rest_url(table)))
            .header("Prefer", "return=minimal")
            .json(data)
            .send()
            .await
            .map_err(StoreError::Request)?;

        Self::check(response).await.map(|_| ())
    }

    /// PATCH rows matching `params`
    pub async fn update<T: Serialize>(
        &self,
        table: &str,
        params: &[(&str, String)],
        data: &T,
    ) -> Result<(), StoreError> {
        let response = self
            .request(Method::PATCH, table, params)
            .json(data)
            .send()
            .await
            .map_err(StoreError::Request)?;

        Self::check(response).await.map(|_| ())
    }

    /// Upsert (insert or update on conflict)
    pub async fn upsert<T: Serialize>(
        &self,
        table: &str,
        data: &T,
        on_conflict: &str,
    ) -> Result<(), StoreError> {
        let response = self
            .request(Method::POST, table, &[("on_conflict", on_conflict.to_string())])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(data)
            .send()
            .await
            .map_err(StoreError::Request)?;

        Self::check(response).await.map(|_| ())
    }

    /// DELETE rows matching `params`
    pub async fn delete(&self, table: &str, params: &[(&str, String)]) -> Result<(), StoreError> {
        let response = self
            .request(Method::DELETE, table, params)
            .send()
            .await
            .map_err(StoreError::Request)?;

        Self::check(response).await.map(|_| ())
    }
}

/// PostgREST equality filter on `column`
pub fn eq<'a>(column: &'a str, value: impl Display) -> (&'a str, String) {
    (column, format!("eq.{}", value))
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(#[source] reqwest::Error),
}
