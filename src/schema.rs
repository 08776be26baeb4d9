//! ==============================================================================
//! schema.rs - backend wire shapes and their mapping into SensorRecord
//! ==============================================================================
//!
//! purpose:
//!     the sensor table has been served in two layouts over time:
//!     - envelope: `{deviceId, timestamp, imageKeys, payload: {data: {...}}}`
//!     - flat:     `{deviceId, timestamp, imageKeys, temperature, ...}`
//!     both decode into one tagged enum and map through a single pure
//!     function, so nothing past this file knows which layout was used.
//!
//! relationships:
//!     - used by: backend.rs (query documents), fetcher.rs (normalization)
//!     - produces: domain.rs SensorRecord
//!
//! ==============================================================================

use serde::Deserialize;
use thiserror::Error;

use crate::config::SchemaShape;
use crate::domain::SensorRecord;

// the selection sets below must stay in sync with Metrics

pub const LIST_SENSOR_DATA_ENVELOPE: &str = r#"
query ListSensorData($filter: ModelSensorDataFilterInput, $limit: Int, $nextToken: String) {
  listSensorData(filter: $filter, limit: $limit, nextToken: $nextToken) {
    items {
      deviceId
      timestamp
      imageKeys
      payload {
        data {
          fruit_diagram
          humidity
          humidity_hq
          i_v_light
          stem
          temperature
          temperature_hq
          u_v_light
        }
      }
    }
    nextToken
  }
}
"#;

pub const LIST_SENSOR_DATA_FLAT: &str = r#"
query ListSensorData($filter: ModelSensorDataFilterInput, $limit: Int, $nextToken: String) {
  listSensorData(filter: $filter, limit: $limit, nextToken: $nextToken) {
    items {
      deviceId
      timestamp
      imageKeys
      fruit_diagram
      humidity
      humidity_hq
      i_v_light
      stem
      temperature
      temperature_hq
      u_v_light
    }
    nextToken
  }
}
"#;

pub const CREATE_CSV_EXPORT: &str = r#"
mutation CreateCsvExport($deviceID: String!, $startTimestamp: String!, $endTimestamp: String!) {
  createCsvExport(deviceID: $deviceID, startTimestamp: $startTimestamp, endTimestamp: $endTimestamp)
}
"#;

pub fn list_query_document(shape: SchemaShape) -> &'static str {
    match shape {
        SchemaShape::Envelope => LIST_SENSOR_DATA_ENVELOPE,
        SchemaShape::Flat => LIST_SENSOR_DATA_FLAT,
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum MappingError {
    #[error("item does not match any known sensor layout: {0}")]
    Shape(String),

    #[error("timestamp {0:?} is not an integer")]
    Timestamp(String),

    #[error("device id is empty")]
    EmptyDevice,

    #[error("item carries no sensor values")]
    NoMetrics,
}

/// the numeric fields, identical in both layouts.
/// a device may leave any of them out or null.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Metrics {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub u_v_light: Option<f64>,
    pub i_v_light: Option<f64>,
    pub stem: Option<f64>,
    pub fruit_diagram: Option<f64>,
    pub humidity_hq: Option<f64>,
    pub temperature_hq: Option<f64>,
}

impl Metrics {
    fn is_empty(&self) -> bool {
        [
            self.temperature,
            self.humidity,
            self.u_v_light,
            self.i_v_light,
            self.stem,
            self.fruit_diagram,
            self.humidity_hq,
            self.temperature_hq,
        ]
        .iter()
        .all(Option::is_none)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Text(String),
    Number(i64),
}

impl Timestamp {
    fn seconds(&self) -> Result<i64, MappingError> {
        match self {
            Timestamp::Number(n) => Ok(*n),
            Timestamp::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| MappingError::Timestamp(s.clone())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Payload {
    pub data: Metrics,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeItem {
    #[serde(alias = "deviceID")]
    pub device_id: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub image_keys: Option<Vec<String>>,
    pub payload: Payload,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatItem {
    #[serde(alias = "deviceID")]
    pub device_id: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub image_keys: Option<Vec<String>>,
    #[serde(flatten)]
    pub metrics: Metrics,
}

/// one list item as returned by either schema version
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SensorItem {
    Envelope(EnvelopeItem),
    Flat(FlatItem),
}

impl SensorItem {
    pub fn from_value(value: serde_json::Value) -> Result<Self, MappingError> {
        serde_json::from_value(value).map_err(|e| MappingError::Shape(e.to_string()))
    }

    /// map either layout into the canonical record
    pub fn into_record(self) -> Result<SensorRecord, MappingError> {
        let (device_id, timestamp, image_keys, m) = match self {
            SensorItem::Envelope(item) => {
                (item.device_id, item.timestamp, item.image_keys, item.payload.data)
            }
            SensorItem::Flat(item) => (item.device_id, item.timestamp, item.image_keys, item.metrics),
        };

        if device_id.trim().is_empty() {
            return Err(MappingError::EmptyDevice);
        }
        // an envelope without payload also decodes as an empty flat item
        if m.is_empty() {
            return Err(MappingError::NoMetrics);
        }

        Ok(SensorRecord {
            device_id,
            timestamp: timestamp.seconds()?,
            temperature: m.temperature,
            humidity: m.humidity,
            uv_light: m.u_v_light,
            iv_light: m.i_v_light,
            stem: m.stem,
            fruit_diagram: m.fruit_diagram,
            humidity_hq: m.humidity_hq,
            temperature_hq: m.temperature_hq,
            image_keys: image_keys.unwrap_or_default(),
        })
    }
}
