//! ==============================================================================
//! poller.rs - polling controller
//! ==============================================================================
//!
//! purpose:
//!     keeps the shared dashboard state in step with the backend for the
//!     selected device.
//!
//! lifecycle:
//!
//!     select_device(id) ──► cancel previous task ──► phase = Loading
//!                                                      │
//!                           spawn task ◄───────────────┘
//!                              │
//!                              ├─ foreground fetch (Loading -> Ready | Error)
//!                              └─ every interval: silent fetch (phase untouched)
//!
//!     refresh_now()  ──► silent fetch for the current selection, awaited
//!     shutdown()     ──► cancel the task, nothing else is scheduled
//!
//! staleness:
//!     in-flight requests are never aborted. every state write is gated on the
//!     selection's cancellation token and generation number instead, so a late
//!     response for a previous device is dropped rather than shown.
//!
//! failure policy:
//!     - foreground failure: full-page error, nothing stale is kept
//!     - silent failure: inline error, records and images stay as they were
//!
//! ==============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::SensorBackend;
use crate::domain::{latest, now_ms};
use crate::fetcher::Fetcher;
use crate::images::{resolve_all, UrlSigner};
use crate::state::{DashboardState, Phase, SharedState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// user initiated: drives the Loading phase
    Foreground,
    /// background tick or manual refresh: never flips the phase to Loading
    Silent,
}

/// one device selection. results carrying an older ticket are stale.
#[derive(Debug, Clone)]
struct Ticket {
    device_id: String,
    generation: u64,
    cancel_token: CancellationToken,
}

struct Inner<B, S> {
    fetcher: Fetcher<B>,
    signer: Arc<S>,
    state: SharedState,
    interval: Duration,
    generation: AtomicU64,
}

pub struct PollingController<B, S> {
    inner: Arc<Inner<B, S>>,
    current: Mutex<Option<Ticket>>,
}

impl<B: SensorBackend, S: UrlSigner> PollingController<B, S> {
    pub fn new(fetcher: Fetcher<B>, signer: Arc<S>, state: SharedState, interval: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                signer,
                state,
                interval,
                generation: AtomicU64::new(0),
            }),
            current: Mutex::new(None),
        }
    }

    /// mount or switch the dashboard to `device_id`.
    ///
    /// the previous timer is cancelled before anything else happens, then
    /// exactly one foreground fetch and a fresh timer are started.
    pub async fn select_device(&self, device_id: &str) {
        let mut current = self.current.lock().await;

        if let Some(previous) = current.take() {
            previous.cancel_token.cancel();
            debug!(device_id = %previous.device_id, "cancelled polling for previous device");
        }

        let ticket = Ticket {
            device_id: device_id.to_string(),
            generation: self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1,
            cancel_token: CancellationToken::new(),
        };

        {
            let mut state = self.inner.state.write().await;
            state.selected_device = ticket.device_id.clone();
            state.export.device_id = ticket.device_id.clone();
            state.phase = Phase::Loading;
            state.error = None;
            state.records.clear();
            state.images.clear();
            state.image_loading = false;
            state.touch();
        }

        info!(device_id, interval_s = self.inner.interval.as_secs(), "started polling");
        tokio::spawn(polling_task(self.inner.clone(), ticket.clone()));
        *current = Some(ticket);
    }

    /// fetch now without the loading screen
    pub async fn refresh_now(&self) {
        let ticket = self.current.lock().await.clone();
        match ticket {
            Some(ticket) => self.inner.refresh(&ticket, FetchMode::Silent).await,
            None => debug!("manual refresh before any device was selected"),
        }
    }

    /// tear down the timer; a fetch already in flight finishes but is discarded
    pub async fn shutdown(&self) {
        if let Some(ticket) = self.current.lock().await.take() {
            ticket.cancel_token.cancel();
            info!(device_id = %ticket.device_id, "stopped polling");
        }
    }
}

async fn polling_task<B: SensorBackend, S: UrlSigner>(inner: Arc<Inner<B, S>>, ticket: Ticket) {
    inner.refresh(&ticket, FetchMode::Foreground).await;

    let mut interval = tokio::time::interval_at(Instant::now() + inner.interval, inner.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = ticket.cancel_token.cancelled() => {
                debug!(device_id = %ticket.device_id, "polling task cancelled");
                break;
            }
            _ = interval.tick() => {
                debug!(device_id = %ticket.device_id, "background poll tick");
                inner.refresh(&ticket, FetchMode::Silent).await;
            }
        }
    }
}

impl<B: SensorBackend, S: UrlSigner> Inner<B, S> {
    async fn refresh(&self, ticket: &Ticket, mode: FetchMode) {
        match self.fetcher.fetch(&ticket.device_id).await {
            Ok(records) => {
                let keys = latest(&records)
                    .map(|r| r.image_keys.clone())
                    .unwrap_or_default();

                let applied = self
                    .apply(ticket, |state| {
                        state.records = records;
                        state.phase = Phase::Ready;
                        state.error = None;
                        state.last_update_ms = now_ms();
                        state.image_loading = !keys.is_empty();
                        if keys.is_empty() {
                            state.images.clear();
                        }
                    })
                    .await;
                if !applied || keys.is_empty() {
                    return;
                }

                let images = resolve_all(self.signer.as_ref(), &keys).await;
                self.apply(ticket, |state| {
                    state.images = images;
                    state.image_loading = false;
                })
                .await;
            }
            Err(e) => {
                warn!(device_id = %ticket.device_id, ?mode, error = %e, "refresh failed");
                self.apply(ticket, |state| match mode {
                    FetchMode::Foreground => {
                        state.phase = Phase::Error;
                        state.records.clear();
                        state.images.clear();
                        state.image_loading = false;
                        state.error = Some(e.message);
                    }
                    FetchMode::Silent => state.error = Some(e.message),
                })
                .await;
            }
        }
    }

    /// run `update` unless the ticket has been superseded
    async fn apply<F>(&self, ticket: &Ticket, update: F) -> bool
    where
        F: FnOnce(&mut DashboardState),
    {
        let mut state = self.state.write().await;
        if ticket.cancel_token.is_cancelled()
            || self.generation.load(Ordering::SeqCst) != ticket.generation
        {
            debug!(device_id = %ticket.device_id, "discarding stale result");
            return false;
        }
        update(&mut state);
        state.touch();
        true
    }
}
