//! Always-on runtime
//!
//! A tokio task owns the [`RegulatoryCore`]. External events arrive over an
//! mpsc channel. The wall clock only paces the idle check: when a heartbeat
//! interval passes without any event, the task runs one heartbeat cycle and
//! then drains the internal pressure queue. State snapshots go out over a
//! `watch` channel, alerts and pressure events over `broadcast`.

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use anima_core::{HealthAlert, PressureEvent, RawEvent};
use anima_limbic::HeartbeatConfig;
use anima_memory::SqliteArchive;

use crate::coordinator::{CoreSnapshot, CycleReport, RegulatoryCore};

const BROADCAST_CAPACITY: usize = 256;

/// Where finished cycles go.
struct Outlets {
    state_tx: watch::Sender<CoreSnapshot>,
    alert_tx: broadcast::Sender<HealthAlert>,
    pressure_tx: broadcast::Sender<PressureEvent>,
    archive: Option<SqliteArchive>,
}

impl Outlets {
    async fn publish(&self, core: &RegulatoryCore, report: &CycleReport) {
        let _ = self.state_tx.send(core.snapshot().as_ref().clone());
        for alert in &report.alerts {
            // No subscribers is fine
            let _ = self.alert_tx.send(alert.clone());
        }
        if let Some(pressure) = &report.pressure {
            let _ = self.pressure_tx.send(pressure.clone());
        }

        if let Some(archive) = &self.archive {
            if let Err(e) = archive_report(archive, report).await {
                tracing::warn!("Archiving cycle {} failed: {:#}", report.cycle, e);
            }
        }
    }
}

/// Append everything a cycle produced to the archive.
pub async fn archive_report(archive: &SqliteArchive, report: &CycleReport) -> Result<()> {
    if let Some(record) = &report.accepted {
        archive.append_event(record).await?;
    }
    if let (Some(batch), Some(semantic)) = (&report.batch, &report.semantic) {
        archive.append_batch(batch, semantic).await?;
    }
    for alert in &report.alerts {
        archive.append_alert(alert).await?;
    }
    archive.record_state(&report.state).await
}

/// Handle to a running core.
pub struct CoreHandle {
    events: mpsc::Sender<RawEvent>,
    state_rx: watch::Receiver<CoreSnapshot>,
    alert_tx: broadcast::Sender<HealthAlert>,
    pressure_tx: broadcast::Sender<PressureEvent>,
    task: JoinHandle<RegulatoryCore>,
}

impl CoreHandle {
    /// Spawn the core task. Heartbeat pacing comes from the core's runtime config.
    pub fn spawn(core: RegulatoryCore, archive: Option<SqliteArchive>) -> Self {
        let heartbeat = HeartbeatConfig::from_runtime(&core.config().runtime);
        Self::spawn_with(core, heartbeat, archive)
    }

    pub fn spawn_with(
        core: RegulatoryCore,
        heartbeat: HeartbeatConfig,
        archive: Option<SqliteArchive>,
    ) -> Self {
        let capacity = core.config().runtime.event_channel_capacity;
        let (events, events_rx) = mpsc::channel(capacity);
        let (state_tx, state_rx) = watch::channel(core.snapshot().as_ref().clone());
        let (alert_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (pressure_tx, _) = broadcast::channel(BROADCAST_CAPACITY);

        let outlets = Outlets {
            state_tx,
            alert_tx: alert_tx.clone(),
            pressure_tx: pressure_tx.clone(),
            archive,
        };
        let task = tokio::spawn(run(core, heartbeat, events_rx, outlets));

        Self {
            events,
            state_rx,
            alert_tx,
            pressure_tx,
            task,
        }
    }

    /// Queue an external event. Waits if the channel is full.
    pub async fn send(&self, event: RawEvent) -> Result<()> {
        self.events
            .send(event)
            .await
            .context("Regulatory core has stopped")
    }

    pub fn state(&self) -> CoreSnapshot {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CoreSnapshot> {
        self.state_rx.clone()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<HealthAlert> {
        self.alert_tx.subscribe()
    }

    pub fn subscribe_pressure(&self) -> broadcast::Receiver<PressureEvent> {
        self.pressure_tx.subscribe()
    }

    /// Stop accepting events, let the task finish queued work and return the core.
    pub async fn shutdown(self) -> Result<RegulatoryCore> {
        drop(self.events);
        self.task.await.context("Regulatory core task panicked")
    }
}

async fn run(
    mut core: RegulatoryCore,
    heartbeat: HeartbeatConfig,
    mut events_rx: mpsc::Receiver<RawEvent>,
    outlets: Outlets,
) -> RegulatoryCore {
    let mut interval = tokio::time::interval(heartbeat.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    interval.tick().await;

    tracing::info!(
        "Regulatory core running (heartbeat every {:?})",
        heartbeat.interval
    );

    let mut heard_event = false;
    loop {
        tokio::select! {
            biased;

            maybe = events_rx.recv() => {
                let Some(raw) = maybe else { break };
                // Quarantine is logged by intake; nothing else to do
                if let Ok(report) = core.ingest(raw) {
                    heard_event = true;
                    outlets.publish(&core, &report).await;
                }
            }

            _ = interval.tick() => {
                if std::mem::take(&mut heard_event) {
                    continue;
                }
                let report = core.heartbeat();
                outlets.publish(&core, &report).await;
                for internal in core.drain_internal() {
                    outlets.publish(&core, &internal).await;
                }
            }
        }
    }

    tracing::info!("Regulatory core stopped at cycle {}", core.cycle());
    core
}
