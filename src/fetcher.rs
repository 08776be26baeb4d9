//! data fetcher: list query -> normalized, time-ordered records.
//!
//! nothing past this boundary sees a backend error type; failures become a
//! single user-facing message.

use std::sync::Arc;

use thiserror::Error;

use crate::backend::{BackendError, SensorBackend};
use crate::domain::SensorRecord;
use crate::schema::SensorItem;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FetchError {
    pub message: String,
}

impl FetchError {
    pub fn from_backend(err: &BackendError) -> Self {
        let messages: Vec<String> = err
            .messages()
            .into_iter()
            .filter(|m| !m.trim().is_empty())
            .collect();

        let detail = if messages.is_empty() {
            "an unknown error occurred".to_string()
        } else {
            messages.join(", ")
        };
        Self { message: format!("failed to fetch sensor data: {detail}") }
    }
}

pub struct Fetcher<B> {
    backend: Arc<B>,
    max_pages: usize,
}

impl<B: SensorBackend> Fetcher<B> {
    pub fn new(backend: Arc<B>, max_pages: usize) -> Self {
        Self { backend, max_pages: max_pages.max(1) }
    }

    /// every record of `device_id`, oldest first
    pub async fn fetch(&self, device_id: &str) -> Result<Vec<SensorRecord>, FetchError> {
        let mut items = Vec::new();
        let mut next_token: Option<String> = None;

        for page_no in 0..self.max_pages {
            let page = self
                .backend
                .list_sensor_data(device_id, next_token.as_deref())
                .await
                .map_err(|e| {
                    tracing::warn!(device_id, error = %e, "sensor data query failed");
                    FetchError::from_backend(&e)
                })?;

            items.extend(page.items);
            next_token = page.next_token.filter(|t| !t.is_empty());
            if next_token.is_none() {
                break;
            }
            if page_no + 1 == self.max_pages {
                tracing::warn!(device_id, pages = self.max_pages, "stopped paging, more data available");
            }
        }

        Ok(normalize(items))
    }
}

/// drop null and malformed entries, then sort ascending by timestamp.
/// the sort is stable so equal timestamps keep backend order.
pub fn normalize(items: Vec<Option<serde_json::Value>>) -> Vec<SensorRecord> {
    let mut records: Vec<SensorRecord> = items
        .into_iter()
        .flatten()
        .filter_map(|value| {
            match SensorItem::from_value(value).and_then(SensorItem::into_record) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::debug!(error = %e, "dropping malformed sensor item");
                    None
                }
            }
        })
        .collect();

    records.sort_by_key(|r| r.timestamp);
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{item, MockBackend};
    use serde_json::json;

    #[test]
    fn test_normalize_sorts_and_filters() {
        let items = vec![
            Some(item("22-27", "300")),
            None,
            Some(json!({ "deviceId": "22-27", "timestamp": "200" })),
            Some(item("22-27", "100")),
            Some(item("22-27", "not-a-number")),
            Some(item("22-27", "200")),
        ];

        let records = normalize(items);
        let stamps: Vec<i64> = records.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![100, 200, 300]);
    }

    #[test]
    fn test_normalize_keeps_records_with_null_metrics() {
        let mut partial = item("22-27", "100");
        partial["payload"]["data"]["stem"] = serde_json::Value::Null;

        let records = normalize(vec![Some(item("22-27", "200")), Some(partial)]);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp, 100);
        assert_eq!(records[0].stem, None);
        assert_eq!(records[0].temperature, Some(21.5));
    }

    #[test]
    fn test_error_displays_message() {
        let err = FetchError::from_backend(&BackendError::MissingData);
        assert_eq!(err.to_string(), err.message);
    }

    #[test]
    fn test_normalize_is_non_decreasing() {
        let stamps = ["9", "3", "3", "12", "1", "7", "7", "0"];
        let items = stamps.iter().map(|s| Some(item("22-30", s))).collect();

        let records = normalize(items);
        assert_eq!(records.len(), stamps.len());
        assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_error_message_joins_backend_errors() {
        let err = BackendError::GraphQl(vec!["Unauthorized".into(), "Throttled".into()]);
        assert_eq!(
            FetchError::from_backend(&err).message,
            "failed to fetch sensor data: Unauthorized, Throttled"
        );
    }

    #[test]
    fn test_error_message_without_details() {
        let err = BackendError::GraphQl(vec![]);
        assert_eq!(
            FetchError::from_backend(&err).message,
            "failed to fetch sensor data: an unknown error occurred"
        );
    }

    #[tokio::test]
    async fn test_fetch_follows_next_token() {
        let backend = Arc::new(MockBackend::default());
        backend.push_page(vec![Some(item("22-27", "20"))], Some("page-2"));
        backend.push_page(vec![Some(item("22-27", "10"))], None);

        let fetcher = Fetcher::new(backend.clone(), 5);
        let records = fetcher.fetch("22-27").await.unwrap();

        assert_eq!(records.iter().map(|r| r.timestamp).collect::<Vec<_>>(), vec![10, 20]);
        assert_eq!(backend.tokens_seen(), vec![None, Some("page-2".to_string())]);
    }

    #[tokio::test]
    async fn test_fetch_stops_at_page_cap() {
        let backend = Arc::new(MockBackend::default());
        for i in 0..4 {
            backend.push_page(vec![Some(item("22-27", &i.to_string()))], Some("more"));
        }

        let fetcher = Fetcher::new(backend.clone(), 2);
        let records = fetcher.fetch("22-27").await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(backend.list_calls_for("22-27"), 2);
    }

    #[tokio::test]
    async fn test_fetch_maps_failures() {
        let backend = Arc::new(MockBackend::default());
        backend.fail_next_list(vec!["Network error"]);

        let fetcher = Fetcher::new(backend, 5);
        let err = fetcher.fetch("22-27").await.unwrap_err();
        assert_eq!(err.message, "failed to fetch sensor data: Network error");
    }
}
