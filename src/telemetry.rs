//! Anonymous usage telemetry.
//!
//! Collaborators register named trackers; a recurring job snapshots every
//! tracker and hands the merged result to a [`TelemetrySender`]. A failing
//! tracker is skipped for that tick, it never aborts the others.

use alloc::sync::Arc;
use core::time::Duration;
use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::scheduler::{RecurringTask, create_recurring_task};

/// Time between telemetry snapshots.
const TELEMETRY_TICK_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Where snapshots are shipped by the production sender.
const TELEMETRY_ENDPOINT: &str = "https://telemetry.tackboard.dev/v1/batch";

/// A named metric collector. Returns one flat mapping per invocation.
pub type Tracker = Box<dyn Fn() -> eyre::Result<Map<String, Value>> + Send + Sync>;

/// One merged snapshot, keyed by tracker name.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub telemetry_id: String,
    pub first_run_millis: i64,
    pub trackers: Map<String, Value>,
}

/// Transport for finished snapshots. The production implementation posts
/// JSON over HTTP; tests substitute a recorder.
#[async_trait]
pub trait TelemetrySender: Send + Sync {
    async fn send(&self, snapshot: &TelemetrySnapshot) -> eyre::Result<()>;
}

/// Sender posting snapshots to the telemetry endpoint.
pub struct HttpSender {
    client: reqwest::Client,
    endpoint: String,
}

impl Default for HttpSender {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: TELEMETRY_ENDPOINT.to_string(),
        }
    }
}

#[async_trait]
impl TelemetrySender for HttpSender {
    async fn send(&self, snapshot: &TelemetrySnapshot) -> eyre::Result<()> {
        self.client
            .post(&self.endpoint)
            .json(snapshot)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Periodic collection and shipping of registered trackers.
pub struct TelemetryService {
    telemetry_id: String,
    trackers: Arc<Mutex<HashMap<String, Tracker>>>,
    sender: Arc<dyn TelemetrySender>,
    job: Mutex<Option<RecurringTask>>,
}

impl TelemetryService {
    pub fn new(telemetry_id: String, sender: Arc<dyn TelemetrySender>) -> Self {
        Self {
            telemetry_id,
            trackers: Arc::new(Mutex::new(HashMap::new())),
            sender,
            job: Mutex::new(None),
        }
    }

    /// Registers a named tracker. Registering under an existing name
    /// replaces the previous collector. Safe to call before the job starts.
    pub fn register_tracker(&self, name: &str, tracker: Tracker) {
        let mut trackers = self.trackers.lock().unwrap_or_else(|e| e.into_inner());
        trackers.insert(name.to_string(), tracker);
    }

    /// Starts the periodic collection job. A second call while the job is
    /// running is a no-op.
    pub fn run_telemetry_job(&self, first_run_millis: i64) {
        let mut job = self.job.lock().unwrap_or_else(|e| e.into_inner());
        if job.is_some() {
            return;
        }

        let telemetry_id = self.telemetry_id.clone();
        let trackers = self.trackers.clone();
        let sender = self.sender.clone();

        *job = Some(create_recurring_task(
            "telemetry",
            TELEMETRY_TICK_INTERVAL,
            move || {
                let snapshot = TelemetrySnapshot {
                    telemetry_id: telemetry_id.clone(),
                    first_run_millis,
                    trackers: collect(&trackers),
                };
                let sender = sender.clone();
                async move {
                    if let Err(e) = sender.send(&snapshot).await {
                        debug!("Failed to ship telemetry snapshot: {e}");
                    }
                }
            },
        ));
    }

    /// Stops the periodic job. Idempotent, safe without a prior
    /// [`Self::run_telemetry_job`].
    pub async fn shutdown(&self) {
        let job = {
            let mut guard = self.job.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        if let Some(job) = job {
            job.cancel().await;
        }
    }
}

/// Invokes every registered tracker, merging the results keyed by tracker
/// name. A tracker returning an error is skipped.
fn collect(trackers: &Mutex<HashMap<String, Tracker>>) -> Map<String, Value> {
    let trackers = trackers.lock().unwrap_or_else(|e| e.into_inner());
    let mut merged = Map::new();
    for (name, tracker) in trackers.iter() {
        match tracker() {
            Ok(values) => {
                merged.insert(name.clone(), Value::Object(values));
            }
            Err(e) => {
                warn!(tracker = %name, "Telemetry tracker failed, skipping: {e}");
            }
        }
    }
    merged
}
