//! ==============================================================================
//! backend.rs - graphql client for the managed sensor backend
//! ==============================================================================
//!
//! purpose:
//!     the dashboard's only view of the backend. two operations:
//!     - listSensorData (paginated query)
//!     - createCsvExport (mutation returning a download url, or nothing)
//!
//! relationships:
//!     - implemented by: AppSyncClient (reqwest, api key auth)
//!     - used by: fetcher.rs (list), export.rs (export)
//!     - reads: schema.rs (query documents)
//!
//! the client is constructed once in main.rs and handed to the controllers;
//! there is no global connection.
//!
//! ==============================================================================

use std::future::Future;
use std::time::Duration;

use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::{BackendConfig, SchemaShape};
use crate::domain::ExportRequest;
use crate::schema;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend responded with HTTP {status}")]
    Status { status: u16 },

    #[error("backend reported errors: {}", .0.join(", "))]
    GraphQl(Vec<String>),

    #[error("could not decode backend response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("backend response carried no data")]
    MissingData,
}

impl BackendError {
    /// the individual messages a user should see, one per reported problem
    pub fn messages(&self) -> Vec<String> {
        match self {
            BackendError::GraphQl(messages) => messages.clone(),
            other => vec![other.to_string()],
        }
    }
}

/// one page of `listSensorData`. items stay untyped so a single bad entry
/// cannot fail the whole page.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorPage {
    #[serde(default)]
    pub items: Vec<Option<serde_json::Value>>,
    #[serde(default)]
    pub next_token: Option<String>,
}

pub trait SensorBackend: Send + Sync + 'static {
    fn list_sensor_data(
        &self,
        device_id: &str,
        next_token: Option<&str>,
    ) -> impl Future<Output = Result<SensorPage, BackendError>> + Send;

    /// returns the presigned download url, empty when there was nothing to export
    fn create_csv_export(
        &self,
        request: &ExportRequest,
    ) -> impl Future<Output = Result<String, BackendError>> + Send;
}

// ==============================================================================
// wire envelope
// ==============================================================================

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListSensorDataData {
    list_sensor_data: Option<SensorPage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCsvExportData {
    create_csv_export: Option<String>,
}

/// interpret a raw graphql response body. backend-reported errors win over data.
fn decode_response<T: DeserializeOwned>(status: u16, body: &str) -> Result<T, BackendError> {
    let parsed = serde_json::from_str::<GraphQlResponse<T>>(body);

    match parsed {
        Ok(response) if !response.errors.is_empty() => Err(BackendError::GraphQl(
            response.errors.into_iter().map(|e| e.message).collect(),
        )),
        _ if !(200..300).contains(&status) => Err(BackendError::Status { status }),
        Ok(response) => response.data.ok_or(BackendError::MissingData),
        Err(e) => Err(BackendError::Decode(e)),
    }
}

// ==============================================================================
// appsync client
// ==============================================================================

#[derive(Clone)]
pub struct AppSyncClient {
    http: reqwest::Client,
    endpoint: Url,
    api_key: String,
    shape: SchemaShape,
    page_limit: Option<u32>,
}

impl AppSyncClient {
    pub fn new(config: &BackendConfig) -> anyhow::Result<Self> {
        let endpoint = Url::parse(&config.graphql_endpoint)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            endpoint,
            api_key: config.api_key.clone(),
            shape: config.schema,
            page_limit: config.page_limit,
        })
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, BackendError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .header("x-api-key", &self.api_key)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        decode_response(status, &body)
    }
}

impl SensorBackend for AppSyncClient {
    async fn list_sensor_data(
        &self,
        device_id: &str,
        next_token: Option<&str>,
    ) -> Result<SensorPage, BackendError> {
        let variables = json!({
            "filter": { "deviceId": { "eq": device_id } },
            "limit": self.page_limit,
            "nextToken": next_token,
        });

        let data: ListSensorDataData = self
            .execute(schema::list_query_document(self.shape), variables)
            .await?;
        Ok(data.list_sensor_data.unwrap_or_default())
    }

    async fn create_csv_export(&self, request: &ExportRequest) -> Result<String, BackendError> {
        let variables = json!({
            "deviceID": request.device_id,
            "startTimestamp": request.start_timestamp,
            "endTimestamp": request.end_timestamp,
        });

        let data: CreateCsvExportData = self.execute(schema::CREATE_CSV_EXPORT, variables).await?;
        Ok(data.create_csv_export.unwrap_or_default())
    }
}
