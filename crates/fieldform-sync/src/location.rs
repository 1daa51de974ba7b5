//! Position capture for geometry-bearing forms.
//!
//! A [`LocationTracker`] accumulates fixes from a [`PositionSource`] and
//! turns the trace into the geometry the schema asks for at submit time.
//! Consumers watch the latest fix through a [`tokio::sync::watch`] channel.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use fieldform_spec::GeometryKind;

use crate::payload::{CapturedPosition, Geometry};

/// Non-fatal capture problem surfaced to the user, for example a fix with
/// accuracy worse than the configured threshold or a provider timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationWarning {
    pub message: String,
}

impl LocationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Accumulates position fixes for one response in progress.
#[derive(Debug)]
pub struct LocationTracker {
    latest_tx: watch::Sender<Option<CapturedPosition>>,
    trace: Mutex<Vec<CapturedPosition>>,
    warnings: Mutex<Vec<LocationWarning>>,
}

impl Default for LocationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationTracker {
    pub fn new() -> Self {
        let (latest_tx, _) = watch::channel(None);
        Self {
            latest_tx,
            trace: Mutex::new(Vec::new()),
            warnings: Mutex::new(Vec::new()),
        }
    }

    /// Appends a fix to the trace and publishes it as the latest position.
    pub fn record_position(&self, position: CapturedPosition) {
        let mut trace = self.trace.lock().unwrap_or_else(PoisonError::into_inner);
        trace.push(position);
        // Receivers may all be gone; the trace still matters for geometry.
        let _ = self.latest_tx.send(Some(position));
    }

    pub fn record_warning(&self, warning: LocationWarning) {
        tracing::warn!(message = %warning.message, "position capture warning");
        let mut warnings = self.warnings.lock().unwrap_or_else(PoisonError::into_inner);
        warnings.push(warning);
    }

    pub fn latest(&self) -> Option<CapturedPosition> {
        *self.latest_tx.borrow()
    }

    /// Watch channel carrying the most recent fix.
    pub fn subscribe(&self) -> watch::Receiver<Option<CapturedPosition>> {
        self.latest_tx.subscribe()
    }

    pub fn warnings(&self) -> Vec<LocationWarning> {
        self.warnings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn trace(&self) -> Vec<CapturedPosition> {
        self.trace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Builds the geometry the schema requires from the captured trace.
    ///
    /// Returns `None` when the trace cannot satisfy the kind yet: a point
    /// needs at least one fix, a line two, a polygon three (the ring is
    /// closed automatically).
    pub fn geometry(&self, kind: GeometryKind) -> Option<Geometry> {
        let trace = self.trace.lock().unwrap_or_else(PoisonError::into_inner);
        match kind {
            GeometryKind::None => None,
            GeometryKind::Point => {
                // The latest fix wins, earlier ones were refinements.
                let fix = trace.last()?;
                Some(Geometry::Point {
                    coordinates: fix.coordinates(),
                })
            }
            GeometryKind::Line => {
                if trace.len() < 2 {
                    return None;
                }
                Some(Geometry::Line {
                    coordinates: trace.iter().map(CapturedPosition::coordinates).collect(),
                })
            }
            GeometryKind::Polygon => {
                if trace.len() < 3 {
                    return None;
                }
                let mut ring: Vec<[f64; 2]> =
                    trace.iter().map(CapturedPosition::coordinates).collect();
                if ring.first() != ring.last() {
                    if let Some(first) = ring.first().copied() {
                        ring.push(first);
                    }
                }
                Some(Geometry::Polygon {
                    coordinates: vec![ring],
                })
            }
        }
    }
}

/// Stream of fixes from the device's positioning hardware. A `None` item
/// ends the capture.
#[async_trait::async_trait]
pub trait PositionSource: Send {
    async fn next_position(&mut self) -> Option<Result<CapturedPosition, LocationWarning>>;
}

/// Feeds a tracker from a source until the source is exhausted.
pub fn spawn_capture(
    tracker: Arc<LocationTracker>,
    mut source: Box<dyn PositionSource>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(item) = source.next_position().await {
            match item {
                Ok(position) => tracker.record_position(position),
                Err(warning) => tracker.record_warning(warning),
            }
        }
        tracing::debug!("position source closed");
    })
}
