//! ==============================================================================
//! export.rs - csv export controller
//! ==============================================================================
//!
//! purpose:
//!     validates the export form, asks the backend to build a csv for the
//!     range and hands back what the browser should download.
//!
//! flow:
//!     form ──► validate (no network on failure) ──► createCsvExport
//!                                                     │
//!                      url ──► Download { url, export_<device>_<ms>.csv }
//!                      ""  ──► NotFound
//!
//!     only one export runs at a time; a second submit gets `Busy`.
//!
//! ==============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Local, NaiveDateTime, TimeZone};
use serde::Deserialize;
use thiserror::Error;

use crate::backend::{BackendError, SensorBackend};
use crate::domain::{now_ms, ExportRequest};
use crate::state::SharedState;

pub const REQUIRED_MESSAGE: &str = "device ID, start and end are all required";
pub const NOT_FOUND_MESSAGE: &str = "no data found to export";
pub const FAILED_MESSAGE: &str = "CSV export failed";

/// what `<input type="datetime-local">` submits, with and without seconds
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("{0}")]
    Validation(String),

    #[error("an export is already running")]
    Busy,

    #[error("CSV export failed")]
    Failed(#[source] BackendError),

    #[error("CSV download failed")]
    Download(#[source] reqwest::Error),
}

/// raw user input, exactly as submitted
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportForm {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub url: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Download(DownloadTarget),
    NotFound,
}

/// the name ends up in a quoted header value, so anything outside
/// `[A-Za-z0-9_-]` becomes `_`
pub fn export_filename(device_id: &str, now_ms: u64) -> String {
    let device: String = device_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("export_{device}_{now_ms}.csv")
}

fn to_epoch_millis<Tz: TimeZone>(value: &str, tz: &Tz) -> Result<i64, ExportError> {
    let invalid = || ExportError::Validation(format!("invalid date-time: {value}"));

    let naive = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .ok_or_else(invalid)?;

    // a local time inside a DST gap does not exist
    let local = tz.from_local_datetime(&naive).earliest().ok_or_else(invalid)?;
    Ok(local.timestamp_millis())
}

/// check the form and convert it into a backend request, interpreting the
/// date-times in `tz`
pub fn validate_in<Tz: TimeZone>(form: &ExportForm, tz: &Tz) -> Result<ExportRequest, ExportError> {
    let device_id = form.device_id.trim();
    let start = form.start.trim();
    let end = form.end.trim();

    if device_id.is_empty() || start.is_empty() || end.is_empty() {
        return Err(ExportError::Validation(REQUIRED_MESSAGE.to_string()));
    }

    let start_ms = to_epoch_millis(start, tz)?;
    let end_ms = to_epoch_millis(end, tz)?;
    if end_ms < start_ms {
        return Err(ExportError::Validation("end must not be before start".to_string()));
    }

    Ok(ExportRequest {
        device_id: device_id.to_string(),
        start_timestamp: start_ms.to_string(),
        end_timestamp: end_ms.to_string(),
    })
}

pub fn validate(form: &ExportForm) -> Result<ExportRequest, ExportError> {
    validate_in(form, &Local)
}

/// clears the in-flight flag however the export ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ExportController<B> {
    backend: Arc<B>,
    state: SharedState,
    http: reqwest::Client,
    in_flight: AtomicBool,
}

impl<B: SensorBackend> ExportController<B> {
    pub fn new(backend: Arc<B>, state: SharedState, http: reqwest::Client) -> Self {
        Self {
            backend,
            state,
            http,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_exporting(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub async fn export(&self, form: ExportForm) -> Result<ExportOutcome, ExportError> {
        let request = match validate(&form) {
            Ok(request) => request,
            Err(e) => {
                self.set_error(e.to_string()).await;
                return Err(e);
            }
        };

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ExportError::Busy);
        }
        let _in_flight = InFlight(&self.in_flight);

        {
            let mut state = self.state.write().await;
            state.export.exporting = true;
            state.export.error = None;
            state.export.device_id = request.device_id.clone();
            state.touch();
        }

        let (outcome, message) = match self.backend.create_csv_export(&request).await {
            Ok(url) if !url.trim().is_empty() => {
                let filename = export_filename(&request.device_id, now_ms());
                tracing::info!(device_id = %request.device_id, %filename, "csv export ready");
                (Ok(ExportOutcome::Download(DownloadTarget { url, filename })), None)
            }
            Ok(_) => (Ok(ExportOutcome::NotFound), Some(NOT_FOUND_MESSAGE.to_string())),
            Err(e) => {
                tracing::warn!(device_id = %request.device_id, error = %e, "csv export failed");
                (Err(ExportError::Failed(e)), Some(FAILED_MESSAGE.to_string()))
            }
        };

        self.finish(message).await;
        outcome
    }

    /// fetch the finished csv so it can be served as an attachment
    pub async fn download(&self, target: &DownloadTarget) -> Result<Vec<u8>, ExportError> {
        let result = async {
            let response = self.http.get(&target.url).send().await?.error_for_status()?;
            Ok::<_, reqwest::Error>(response.bytes().await?.to_vec())
        }
        .await;

        result.map_err(|e| {
            tracing::warn!(filename = %target.filename, error = %e, "csv download failed");
            ExportError::Download(e)
        })
    }

    /// record a download failure for the next render
    pub async fn report(&self, err: &ExportError) {
        self.set_error(err.to_string()).await;
    }

    async fn set_error(&self, message: String) {
        let mut state = self.state.write().await;
        state.export.error = Some(message);
        state.touch();
    }

    async fn finish(&self, error: Option<String>) {
        let mut state = self.state.write().await;
        state.export.exporting = false;
        state.export.error = error;
        state.touch();
    }
}
