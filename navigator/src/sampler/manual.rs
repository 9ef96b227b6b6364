use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use campus_nav_lib::location_sample::LocationSample;
use futures::{channel::mpsc, StreamExt};

use super::{PermissionState, PositionSource, PositionStream, SensorError, TrackingOptions};

type Reading = Result<LocationSample, SensorError>;

/// A position source fed by hand. Every live watcher receives each pushed
/// reading.
#[derive(Default)]
pub struct ManualSource {
    inner: Mutex<ManualInner>,
}

#[derive(Default)]
struct ManualInner {
    permission: PermissionState,
    watchers: Vec<mpsc::UnboundedSender<Reading>>,
    refuse_next: Option<SensorError>,
    last: Option<LocationSample>,
}

impl ManualSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_permission(permission: PermissionState) -> Self {
        let source = Self::default();
        source.lock().permission = permission;
        source
    }

    pub fn push_sample(&self, sample: LocationSample) {
        let mut inner = self.lock();
        inner.last = Some(sample);
        inner.broadcast(Ok(sample));
    }

    pub fn push_error(&self, error: SensorError) {
        self.lock().broadcast(Err(error));
    }

    /// The next `watch_position` call fails with `error`.
    pub fn refuse_next_watch(&self, error: SensorError) {
        self.lock().refuse_next = Some(error);
    }

    /// Ends every open subscription.
    pub fn close(&self) {
        self.lock().watchers.clear();
    }

    pub fn watcher_count(&self) -> usize {
        let mut inner = self.lock();
        inner.watchers.retain(|w| !w.is_closed());
        inner.watchers.len()
    }

    fn lock(&self) -> MutexGuard<'_, ManualInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ManualInner {
    fn broadcast(&mut self, reading: Reading) {
        self.watchers.retain(|w| w.unbounded_send(reading).is_ok());
    }
}

#[async_trait]
impl PositionSource for ManualSource {
    async fn query_permission(&self) -> PermissionState {
        self.lock().permission
    }

    fn watch_position(&self, _options: &TrackingOptions) -> Result<PositionStream, SensorError> {
        let mut inner = self.lock();
        if let Some(error) = inner.refuse_next.take() {
            return Err(error);
        }

        let (tx, rx) = mpsc::unbounded();
        inner.watchers.push(tx);
        Ok(rx.boxed())
    }

    /// The most recently pushed sample, if any.
    async fn current_position(&self, _options: &TrackingOptions) -> Result<LocationSample, SensorError> {
        let inner = self.lock();
        if inner.permission == PermissionState::Denied {
            return Err(SensorError::PermissionDenied);
        }
        inner.last.ok_or(SensorError::PositionUnavailable)
    }
}
