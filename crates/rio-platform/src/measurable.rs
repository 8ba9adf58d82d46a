//! ---
//! rio_section: "03-platform-capability"
//! rio_subsection: "module"
//! rio_type: "source"
//! rio_scope: "code"
//! rio_description: "Platform and measurable capability model."
//! rio_version: "v0.1.0-alpha"
//! rio_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::Result;

/// A single measurement taken from a measurable capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasuredResource {
    /// Identifier of the measuring capability (`cpu`, `memory`, `disk`).
    pub id: String,
    /// Measured value, normalized to `[0, 1]` utilization where possible.
    pub value: f64,
    /// Whether the value lies outside the configured thresholds.
    pub threshold_crossed: bool,
}

/// Low/high thresholds for a measured value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdValues {
    /// Values below this bound cross the threshold.
    pub low: f64,
    /// Values above this bound cross the threshold.
    pub high: f64,
}

impl Default for ThresholdValues {
    fn default() -> Self {
        Self { low: 0.0, high: 1.0 }
    }
}

impl ThresholdValues {
    /// Whether `value` falls outside the configured band.
    pub fn crossed(&self, value: f64) -> bool {
        value < self.low || value > self.high
    }
}

/// Source of raw measurements for a measurable capability.
pub trait ResourceMonitor: Send + Sync {
    /// Take one measurement.
    fn measure(&self) -> Result<f64>;
}

/// Receiver for fresh measurements. Platform capabilities that mirror a
/// measurable (storage, memory) register a sink so their attributes track
/// the measured state.
pub trait MeasuredResourceSink: Send + Sync {
    /// Called with every successful measurement.
    fn report(&self, resource: &MeasuredResource);
}

/// A capability that actively measures a resource on an interval and
/// yields [`MeasuredResource`] values. Started at boot, stopped at
/// shutdown.
pub struct MeasurableCapability {
    id: String,
    sample_interval: Duration,
    thresholds: ThresholdValues,
    monitor: Arc<dyn ResourceMonitor>,
    sinks: Arc<Mutex<Vec<Arc<dyn MeasuredResourceSink>>>>,
    last: Arc<Mutex<Option<MeasuredResource>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for MeasurableCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasurableCapability")
            .field("id", &self.id)
            .field("sample_interval", &self.sample_interval)
            .field("thresholds", &self.thresholds)
            .finish()
    }
}

impl MeasurableCapability {
    /// Create a measurable capability over the given monitor.
    pub fn new(
        id: impl Into<String>,
        sample_interval: Duration,
        thresholds: ThresholdValues,
        monitor: Arc<dyn ResourceMonitor>,
    ) -> Self {
        Self {
            id: id.into(),
            sample_interval,
            thresholds,
            monitor,
            sinks: Arc::new(Mutex::new(Vec::new())),
            last: Arc::new(Mutex::new(None)),
            task: Mutex::new(None),
        }
    }

    /// Capability identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Register a sink that receives every successful measurement.
    pub fn add_sink(&self, sink: Arc<dyn MeasuredResourceSink>) {
        self.sinks.lock().push(sink);
    }

    /// The most recent measurement, if any has been taken.
    pub fn last_measured(&self) -> Option<MeasuredResource> {
        self.last.lock().clone()
    }

    /// Take a single measurement synchronously, updating the last-measured
    /// value and notifying sinks. Used at boot for an initial reading.
    pub fn measure_once(&self) -> Result<MeasuredResource> {
        let value = self.monitor.measure()?;
        let resource = MeasuredResource {
            id: self.id.clone(),
            value,
            threshold_crossed: self.thresholds.crossed(value),
        };
        *self.last.lock() = Some(resource.clone());
        for sink in self.sinks.lock().iter() {
            sink.report(&resource);
        }
        Ok(resource)
    }

    /// Start the background sampling task. Idempotent; a running task is
    /// left in place.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let id = self.id.clone();
        let thresholds = self.thresholds;
        let monitor = self.monitor.clone();
        let sinks = self.sinks.clone();
        let last = self.last.clone();
        let sample_interval = self.sample_interval;
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(sample_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match monitor.measure() {
                    Ok(value) => {
                        let resource = MeasuredResource {
                            id: id.clone(),
                            value,
                            threshold_crossed: thresholds.crossed(value),
                        };
                        if resource.threshold_crossed {
                            debug!(capability = %id, value, "measured value crossed threshold");
                        }
                        *last.lock() = Some(resource.clone());
                        for sink in sinks.lock().iter() {
                            sink.report(&resource);
                        }
                    }
                    Err(err) => {
                        warn!(capability = %id, error = %err, "measurement failed");
                    }
                }
            }
        }));
    }

    /// Stop the background sampling task, if running.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for MeasurableCapability {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedMonitor(f64);

    impl ResourceMonitor for FixedMonitor {
        fn measure(&self) -> Result<f64> {
            Ok(self.0)
        }
    }

    struct CountingSink(AtomicUsize);

    impl MeasuredResourceSink for CountingSink {
        fn report(&self, _resource: &MeasuredResource) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn measure_once_updates_last_and_sinks() {
        let capability = MeasurableCapability::new(
            "cpu",
            Duration::from_secs(5),
            ThresholdValues::default(),
            Arc::new(FixedMonitor(0.25)),
        );
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        capability.add_sink(sink.clone());

        let measured = capability.measure_once().unwrap();
        assert_eq!(measured.value, 0.25);
        assert!(!measured.threshold_crossed);
        assert_eq!(capability.last_measured().unwrap().value, 0.25);
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn threshold_crossing_is_flagged() {
        let capability = MeasurableCapability::new(
            "memory",
            Duration::from_secs(5),
            ThresholdValues { low: 0.0, high: 0.8 },
            Arc::new(FixedMonitor(0.95)),
        );
        assert!(capability.measure_once().unwrap().threshold_crossed);
    }

    #[tokio::test(start_paused = true)]
    async fn background_task_samples_on_interval() {
        let capability = MeasurableCapability::new(
            "cpu",
            Duration::from_millis(100),
            ThresholdValues::default(),
            Arc::new(FixedMonitor(0.5)),
        );
        capability.start();
        tokio::time::sleep(Duration::from_millis(350)).await;
        // Let the sampling task run its pending ticks.
        tokio::task::yield_now().await;
        capability.stop();
        assert_eq!(capability.last_measured().unwrap().value, 0.5);
    }
}
