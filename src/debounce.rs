//! # Viewport Debouncer
//!
//! Coalesces bursts of map viewport changes into one bounds query.
//!
//! Each change re-arms a single-shot timer; only the viewport current when
//! the timer fires is queried. Firing hands the query to its own task, so
//! cancelling or re-arming the timer never aborts a query already sent.
//! Outdated queries are discarded by the coordinator's staleness check.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, warn};
use tokio::task::JoinHandle;

use crate::http::RemoteApi;
use crate::store::TrackStore;
use crate::sync::{BatchCallback, SyncCoordinator, TrackCallback};
use crate::{SyncConfig, SyncError, ViewportQuad};

/// Debounces viewport changes into `fetch_in_bounds` calls.
///
/// Must be driven from within a tokio runtime.
pub struct ViewportDebouncer<A: RemoteApi, S: TrackStore> {
    coordinator: Arc<SyncCoordinator<A, S>>,
    delay: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
    on_each: Option<TrackCallback>,
    on_complete: Option<BatchCallback>,
}

impl<A: RemoteApi, S: TrackStore> ViewportDebouncer<A, S> {
    pub fn new(coordinator: Arc<SyncCoordinator<A, S>>, config: &SyncConfig) -> Self {
        Self {
            coordinator,
            delay: config.debounce_delay,
            timer: Mutex::new(None),
            on_each: None,
            on_complete: None,
        }
    }

    /// Called for every track a query resolves.
    pub fn on_each(mut self, callback: TrackCallback) -> Self {
        self.on_each = Some(callback);
        self
    }

    /// Called once per query that was not superseded.
    pub fn on_complete(mut self, callback: BatchCallback) -> Self {
        self.on_complete = Some(callback);
        self
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    fn timer(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a timer is armed and has not fired yet.
    pub fn is_pending(&self) -> bool {
        self.timer().as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// A gesture is starting: drop any query armed for the old viewport.
    pub fn viewport_will_change(&self) {
        if let Some(handle) = self.timer().take() {
            if !handle.is_finished() {
                debug!("[ViewportDebouncer] Cancelled pending query");
            }
            handle.abort();
        }
    }

    /// The viewport settled on `quad`: (re)arm the timer.
    pub fn viewport_changed(&self, quad: ViewportQuad) {
        let coordinator = Arc::clone(&self.coordinator);
        let on_each = self.on_each.clone();
        let on_complete = self.on_complete.clone();
        let delay = self.delay;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(run_query(coordinator, quad, on_each, on_complete));
        });

        if let Some(previous) = self.timer().replace(handle) {
            previous.abort();
        }
    }
}

impl<A: RemoteApi, S: TrackStore> Drop for ViewportDebouncer<A, S> {
    fn drop(&mut self) {
        if let Some(handle) = self.timer().take() {
            handle.abort();
        }
    }
}

async fn run_query<A: RemoteApi, S: TrackStore>(
    coordinator: Arc<SyncCoordinator<A, S>>,
    quad: ViewportQuad,
    on_each: Option<TrackCallback>,
    on_complete: Option<BatchCallback>,
) {
    match coordinator.fetch_in_bounds(quad, on_each).await {
        Ok(ids) => {
            if let Some(callback) = on_complete {
                callback(ids);
            }
        }
        Err(SyncError::Superseded) => debug!("[ViewportDebouncer] Query superseded"),
        Err(e) => warn!("[ViewportDebouncer] Query failed: {}", e),
    }
}
