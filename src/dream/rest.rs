//! Authenticated client for the remote data store's REST and RPC surface.
//!
//! Filters use the store's query-string syntax, e.g. `("receiver_id", "eq.<id>")`.

use crate::dream::types::handle_http_response;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

/// A single query-string pair.
pub type Filter = (&'static str, String);

pub fn eq(column: &'static str, value: impl std::fmt::Display) -> Filter {
    (column, format!("eq.{value}"))
}

pub fn is_null(column: &'static str) -> Filter {
    (column, "is.null".to_string())
}

pub fn in_list(column: &'static str, values: &[String]) -> Filter {
    (column, format!("in.({})", values.join(",")))
}

#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    api_base_url: String,
}

impl RestClient {
    /// Build a client whose default headers carry the project key and the
    /// user's access token.
    pub fn new(api_base_url: &str, anon_key: &str, access_token: &str) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .default_headers({
                let mut headers = reqwest::header::HeaderMap::new();
                headers.insert(
                    reqwest::header::HeaderName::from_static("apikey"),
                    reqwest::header::HeaderValue::from_str(anon_key).context("invalid api key")?,
                );
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    reqwest::header::HeaderValue::from_str(&format!("Bearer {access_token}"))
                        .context("invalid access token")?,
                );
                headers
            })
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.api_base_url, table)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rest/v1/rpc/{}", self.api_base_url, function)
    }

    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[Filter],
    ) -> Result<Vec<T>> {
        let operation_id = Uuid::new_v4().to_string();
        debug!("[REST] select {} {:?} op={}", table, filters, operation_id);
        let response = self
            .client
            .get(self.table_url(table))
            .header("operationID", &operation_id)
            .query(filters)
            .send()
            .await
            .with_context(|| format!("select from {table} failed"))?;
        handle_http_response(response, &format!("select {table}")).await
    }

    /// Insert rows and return them as stored (server ids, defaults).
    pub async fn insert<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        table: &str,
        body: &B,
    ) -> Result<Vec<T>> {
        debug!("[REST] insert into {}", table);
        let response = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await
            .with_context(|| format!("insert into {table} failed"))?;
        handle_http_response(response, &format!("insert {table}")).await
    }

    pub async fn update<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[Filter],
        body: &B,
    ) -> Result<Vec<T>> {
        debug!("[REST] update {} {:?}", table, filters);
        let response = self
            .client
            .patch(self.table_url(table))
            .header("Prefer", "return=representation")
            .query(filters)
            .json(body)
            .send()
            .await
            .with_context(|| format!("update {table} failed"))?;
        handle_http_response(response, &format!("update {table}")).await
    }

    pub async fn delete(&self, table: &str, filters: &[Filter]) -> Result<()> {
        debug!("[REST] delete from {} {:?}", table, filters);
        let response = self
            .client
            .delete(self.table_url(table))
            .query(filters)
            .send()
            .await
            .with_context(|| format!("delete from {table} failed"))?;
        let _: serde_json::Value = handle_http_response(response, &format!("delete {table}")).await?;
        Ok(())
    }

    /// Invoke a remote stored procedure.
    pub async fn rpc<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        function: &str,
        args: &B,
    ) -> Result<T> {
        debug!("[REST] rpc {}", function);
        let response = self
            .client
            .post(self.rpc_url(function))
            .json(args)
            .send()
            .await
            .with_context(|| format!("rpc {function} failed"))?;
        handle_http_response(response, &format!("rpc {function}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_filter_syntax() {
        assert_eq!(eq("receiver_id", "u1"), ("receiver_id", "eq.u1".to_string()));
        assert_eq!(is_null("read_at"), ("read_at", "is.null".to_string()));
        assert_eq!(
            in_list("id", &["a".to_string(), "b".to_string()]),
            ("id", "in.(a,b)".to_string())
        );
    }

    #[test]
    fn trims_trailing_slash_from_base_url() {
        let client = RestClient::new("http://localhost:54321/", "anon", "token").unwrap();
        assert_eq!(client.table_url("messages"), "http://localhost:54321/rest/v1/messages");
        assert_eq!(client.rpc_url("is_developer"), "http://localhost:54321/rest/v1/rpc/is_developer");
    }
}
