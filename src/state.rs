use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::domain::{ResolvedImage, SensorRecord};

// ==============================================================================
// shared view state
// ==============================================================================
// one instance is shared between:
// - the polling controller (records, images, phase, fetch errors)
// - the export controller (export status)
// - the web server (reads for rendering and the json api)
//
// each field group has exactly one writer.

pub type SharedState = Arc<RwLock<DashboardState>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Phase {
    /// nothing requested yet
    #[default]
    Initializing,
    /// user-initiated fetch in flight
    Loading,
    Ready,
    /// user-initiated fetch failed, nothing to show
    Error,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportStatus {
    pub exporting: bool,
    pub error: Option<String>,
    /// device prefilled in the export form, follows the selected device
    pub device_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DashboardState {
    pub phase: Phase,
    pub selected_device: String,
    /// ascending by timestamp
    pub records: Vec<SensorRecord>,
    /// resolved camera images of the latest record
    pub images: Vec<ResolvedImage>,
    pub image_loading: bool,
    /// full-page message in `Phase::Error`, inline banner otherwise
    pub error: Option<String>,
    /// unix ms of the last successful fetch
    pub last_update_ms: u64,
    pub export: ExportStatus,
    /// bumped on every write, open pages reload when it moves
    pub revision: u64,
}

impl DashboardState {
    pub fn latest(&self) -> Option<&SensorRecord> {
        crate::domain::latest(&self.records)
    }

    pub fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

pub fn shared() -> SharedState {
    Arc::new(RwLock::new(DashboardState::default()))
}
