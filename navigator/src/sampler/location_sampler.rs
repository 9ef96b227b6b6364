use std::sync::Arc;

use campus_nav_lib::location_sample::LocationSample;
use futures::StreamExt;
use tokio::{sync::watch, task::JoinHandle};

use super::{
    PermissionState, PositionSource, PositionStream, SamplerEvent, SamplerUpdate, SensorError, TrackingOptions,
    TrackingState,
};

/// Owns the single tracking subscription.
///
/// Readings are forwarded by a background task into a watch channel, so a
/// slow consumer only ever sees the newest one. Every start and stop bumps
/// the epoch, and readings from an older epoch are discarded on arrival.
pub struct LocationSampler {
    source: Option<Arc<dyn PositionSource>>,
    options: TrackingOptions,
    state: TrackingState,
    permission: PermissionState,
    last_error: Option<SensorError>,

    epoch: u64,
    subscription: Option<JoinHandle<()>>,
    events_tx: watch::Sender<Option<SamplerEvent>>,
    events_rx: watch::Receiver<Option<SamplerEvent>>,
}

impl LocationSampler {
    /// `None` means the device has no position capability at all.
    pub async fn initialize(source: Option<Arc<dyn PositionSource>>, options: TrackingOptions) -> Self {
        let permission = match &source {
            Some(source) => source.query_permission().await,
            None => PermissionState::Unknown,
        };
        tracing::debug!("Location permission is {}", permission);

        let (events_tx, events_rx) = watch::channel(None);

        Self {
            source,
            options,
            state: TrackingState::Idle,
            permission,
            last_error: None,
            epoch: 0,
            subscription: None,
            events_tx,
            events_rx,
        }
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn is_tracking(&self) -> bool {
        self.state == TrackingState::Tracking
    }

    pub fn permission(&self) -> PermissionState {
        self.permission
    }

    pub fn last_error(&self) -> Option<SensorError> {
        self.last_error
    }

    pub fn options(&self) -> &TrackingOptions {
        &self.options
    }

    /// Starts the subscription. Calling it while tracking only confirms the state.
    pub fn start_tracking(&mut self) -> Result<(), SensorError> {
        if self.is_tracking() {
            return Ok(());
        }
        self.last_error = None;

        let Some(source) = &self.source else {
            self.fail(SensorError::Unsupported);
            return Err(SensorError::Unsupported);
        };

        let stream = match source.watch_position(&self.options) {
            Ok(stream) => stream,
            Err(error) => {
                self.fail(error);
                return Err(error);
            }
        };

        self.epoch += 1;
        self.subscription = Some(tokio::spawn(forward_readings(
            stream,
            self.epoch,
            self.options,
            self.events_tx.clone(),
        )));
        self.state = TrackingState::Tracking;

        tracing::info!("Tracking started (high accuracy: {})", self.options.high_accuracy);
        Ok(())
    }

    /// Cancels the subscription, if any, and always ends up idle.
    pub fn stop_tracking(&mut self) {
        let was_tracking = self.is_tracking();
        self.cancel();
        self.state = TrackingState::Idle;

        if was_tracking {
            tracing::info!("Tracking stopped");
        }
    }

    /// One fix without touching the tracking subscription.
    pub async fn current_position(&self) -> Result<LocationSample, SensorError> {
        let source = self.source.as_ref().ok_or(SensorError::Unsupported)?;
        source.current_position(&self.options).await
    }

    /// Waits for the next reading of the live subscription.
    ///
    /// Returns `None` once tracking is idle and nothing is pending. A
    /// `Failed` update means tracking has already been torn down.
    pub async fn next_update(&mut self) -> Option<SamplerUpdate> {
        loop {
            let pending = self.events_rx.has_changed().unwrap_or(false);
            if !self.is_tracking() && !pending {
                return None;
            }

            if !pending && self.events_rx.changed().await.is_err() {
                return None;
            }

            let event = *self.events_rx.borrow_and_update();
            if let Some(update) = event.and_then(|event| self.accept(event)) {
                return Some(update);
            }
        }
    }

    pub(crate) fn accept(&mut self, event: SamplerEvent) -> Option<SamplerUpdate> {
        if event.epoch != self.epoch || !self.is_tracking() {
            tracing::trace!("Dropping reading from stale subscription {}", event.epoch);
            return None;
        }

        match event.reading {
            Ok(sample) => {
                self.permission = PermissionState::Granted;
                Some(SamplerUpdate::Sample(sample))
            }
            Err(error) => {
                self.fail(error);
                Some(SamplerUpdate::Failed(error))
            }
        }
    }

    fn fail(&mut self, error: SensorError) {
        tracing::warn!("Tracking failed: {}", error);
        self.cancel();
        self.state = TrackingState::Idle;
        self.last_error = Some(error);
        if error == SensorError::PermissionDenied {
            self.permission = PermissionState::Denied;
        }
    }

    fn cancel(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.abort();
        }
        // Whatever the old task already sent belongs to a dead epoch now
        self.epoch += 1;
    }
}

impl Drop for LocationSampler {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn forward_readings(
    mut stream: PositionStream,
    epoch: u64,
    options: TrackingOptions,
    events: watch::Sender<Option<SamplerEvent>>,
) {
    loop {
        let reading = match tokio::time::timeout(options.timeout(), stream.next()).await {
            Ok(Some(reading)) => reading,
            Ok(None) => Err(SensorError::PositionUnavailable),
            Err(_) => Err(SensorError::Timeout),
        };

        let finished = reading.is_err();
        events.send_replace(Some(SamplerEvent { epoch, reading }));
        if finished {
            break;
        }
    }
}
