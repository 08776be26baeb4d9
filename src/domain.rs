use serde::{Deserialize, Serialize};

/// one sensor reading as the dashboard understands it.
/// immutable once fetched, identified by (device_id, timestamp).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    pub device_id: String,
    /// unix seconds
    pub timestamp: i64,
    /// celsius. metrics are `None` when the device did not report them
    pub temperature: Option<f64>,
    /// relative humidity (0-100%)
    pub humidity: Option<f64>,
    /// external illuminance in lx
    pub uv_light: Option<f64>,
    /// internal illuminance in lx
    pub iv_light: Option<f64>,
    /// plant stem metric
    pub stem: Option<f64>,
    /// fruit diagram metric
    pub fruit_diagram: Option<f64>,
    pub humidity_hq: Option<f64>,
    pub temperature_hq: Option<f64>,
    /// storage keys of camera images taken with this reading, in capture order
    #[serde(default)]
    pub image_keys: Vec<String>,
}

/// a csv export range, epochs are millisecond strings as the backend expects
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExportRequest {
    pub device_id: String,
    pub start_timestamp: String,
    pub end_timestamp: String,
}

/// a storage key resolved to a temporary url
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResolvedImage {
    pub key: String,
    pub url: String,
    /// unix ms after which the url stops working
    pub expires_at_ms: u64,
}

/// display-only projection of a record onto one chart
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChartPoint {
    pub label: String,
    /// unix seconds, the x coordinate
    pub x: i64,
    pub primary: Option<f64>,
    pub secondary: Option<f64>,
}

/// the record with the highest timestamp, if any
pub fn latest(records: &[SensorRecord]) -> Option<&SensorRecord> {
    records.iter().max_by_key(|r| r.timestamp)
}

/// current unix time in milliseconds
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
