//! Record store over a Supabase/PostgREST endpoint.
//!
//! - Inserts: `POST /rest/v1/<table>` with `Prefer: return=minimal`
//! - Reads: `GET /rest/v1/<table>?select=*` paged by `limit`/`offset` until a
//!   page comes back empty (the server may cap pages below `limit`)
//! - DDL: `POST /rest/v1/rpc/execute_sql` with `{"query": ...}`, which only
//!   works if that function has been created on the database

use super::{Record, RecordStore, validate_identifier};
use crate::config::{StoreConfig, StoreCredentials};
use crate::error::StoreError;
use crate::schema::Dialect;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub struct PostgrestStore {
    client: Client,
    base_url: String,
    api_key: String,
    page_size: usize,
}

impl PostgrestStore {
    pub fn new(credentials: StoreCredentials, config: &StoreConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| StoreError::Connection {
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: credentials.url.trim_end_matches('/').to_string(),
            api_key: credentials.key,
            page_size: config.page_size.max(1),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/rest/v1/{path}", self.base_url)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.endpoint(path))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }
}

async fn check(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Rejected {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl RecordStore for PostgrestStore {
    fn name(&self) -> &str {
        "postgrest"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn execute_sql(&self, sql: &str) -> Result<(), StoreError> {
        let response = self
            .request(Method::POST, "rpc/execute_sql")
            .json(&json!({ "query": sql }))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::Unsupported {
                message: "the execute_sql RPC function is not installed".into(),
            });
        }
        check(response).await?;
        Ok(())
    }

    async fn insert(&self, table: &str, records: &[Record]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let table = validate_identifier(table)?;
        let response = self
            .request(Method::POST, table)
            .header("Prefer", "return=minimal")
            .json(records)
            .send()
            .await?;
        check(response).await?;
        Ok(records.len())
    }

    async fn select_all(&self, table: &str) -> Result<Vec<Record>, StoreError> {
        let table = validate_identifier(table)?;
        let mut rows = Vec::new();
        let mut offset = 0usize;
        loop {
            let response = self
                .request(Method::GET, table)
                .query(&[
                    ("select", "*".to_string()),
                    ("order", "id.asc".to_string()),
                    ("limit", self.page_size.to_string()),
                    ("offset", offset.to_string()),
                ])
                .send()
                .await?;
            let page: Vec<Record> = check(response).await?.json().await?;
            let fetched = page.len();
            debug!(table, offset, fetched, "Fetched page");
            if fetched == 0 {
                break;
            }
            rows.extend(page);
            offset += fetched;
        }
        Ok(rows)
    }
}
