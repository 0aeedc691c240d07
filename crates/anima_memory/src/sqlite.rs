use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use std::path::Path;
use uuid::Uuid;

use anima_core::{AlertKind, EmotionalState, EventKind, EventRecord, HealthAlert};

use crate::consolidation::{ConsolidationBatch, ConsolidationTrigger, SemanticRecord};

/// Durable, append-only archive of everything the core accepted or produced.
///
/// Rows are only ever inserted. There is no update or delete path.
#[derive(Clone)]
pub struct SqliteArchive {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveCounts {
    pub events: i64,
    pub batches: i64,
    pub semantic_records: i64,
    pub alerts: i64,
    pub states: i64,
}

impl SqliteArchive {
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .connect(&db_url)
            .await
            .with_context(|| format!("Failed to open archive at {}", db_path.as_ref().display()))?;

        let archive = Self { pool };
        archive.migrate().await?;
        Ok(archive)
    }

    /// Private in-memory archive. A single connection, since every SQLite
    /// connection to `:memory:` sees its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory archive")?;

        let archive = Self { pool };
        archive.migrate().await?;
        Ok(archive)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                sequence INTEGER NOT NULL,
                source TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                novelty_score REAL,
                timestamp INTEGER NOT NULL,
                cycle INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create events table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_source ON events(source)")
            .execute(&self.pool)
            .await
            .context("Failed to create events source index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS batches (
                id TEXT PRIMARY KEY,
                created_at_cycle INTEGER NOT NULL,
                trigger TEXT NOT NULL,
                trigger_json TEXT NOT NULL,
                semantic_id TEXT NOT NULL,
                source_ids_json TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create batches table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS semantic_records (
                id TEXT PRIMARY KEY,
                batch_id TEXT NOT NULL,
                created_at_cycle INTEGER NOT NULL,
                source_event_count INTEGER NOT NULL,
                patterns_json TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create semantic_records table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                severity TEXT NOT NULL,
                cycle INTEGER NOT NULL,
                evidence TEXT NOT NULL,
                recorded_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create alerts table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS state_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cycle INTEGER NOT NULL,
                state_json TEXT NOT NULL,
                recorded_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create state_history table")?;

        Ok(())
    }

    // =========================================================================
    // Episodic events
    // =========================================================================

    pub async fn append_event(&self, record: &EventRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO events (id, sequence, source, kind, payload_json, novelty_score, timestamp, cycle) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(record.sequence as i64)
        .bind(&record.source)
        .bind(record.kind.as_str())
        .bind(record.payload.to_string())
        .bind(record.novelty_score)
        .bind(record.timestamp)
        .bind(record.cycle as i64)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to archive event {}", record.id))?;

        tracing::trace!("Archived event {} (cycle {})", record.id, record.cycle);
        Ok(())
    }

    /// All archived events in cycle order.
    pub async fn load_events(&self) -> Result<Vec<EventRecord>> {
        let rows = sqlx::query(
            "SELECT id, sequence, source, kind, payload_json, novelty_score, timestamp, cycle \
             FROM events ORDER BY cycle ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to query events")?;

        rows.into_iter()
            .map(|row| {
                let kind: String = row.get("kind");
                let payload: String = row.get("payload_json");
                Ok(EventRecord {
                    id: row.get("id"),
                    sequence: row.get::<i64, _>("sequence") as u64,
                    source: row.get("source"),
                    kind: EventKind::parse(&kind)
                        .ok_or_else(|| anyhow!("Unknown event kind in archive: {}", kind))?,
                    payload: serde_json::from_str(&payload)
                        .context("Failed to deserialize event payload")?,
                    novelty_score: row.get("novelty_score"),
                    timestamp: row.get("timestamp"),
                    cycle: row.get::<i64, _>("cycle") as u64,
                })
            })
            .collect()
    }

    // =========================================================================
    // Consolidation
    // =========================================================================

    /// Archive a batch together with its semantic record, atomically.
    pub async fn append_batch(
        &self,
        batch: &ConsolidationBatch,
        semantic: &SemanticRecord,
    ) -> Result<()> {
        let trigger_json =
            serde_json::to_string(&batch.trigger).context("Failed to serialize trigger")?;
        let source_ids =
            serde_json::to_string(&batch.source_event_ids).context("Failed to serialize source ids")?;
        let patterns =
            serde_json::to_string(&semantic.patterns).context("Failed to serialize patterns")?;

        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            "INSERT INTO batches (id, created_at_cycle, trigger, trigger_json, semantic_id, source_ids_json) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(batch.id.to_string())
        .bind(batch.created_at_cycle as i64)
        .bind(batch.trigger.name())
        .bind(&trigger_json)
        .bind(batch.resulting_semantic_id.to_string())
        .bind(&source_ids)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to archive batch {}", batch.id))?;

        sqlx::query(
            "INSERT INTO semantic_records (id, batch_id, created_at_cycle, source_event_count, patterns_json) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(semantic.id.to_string())
        .bind(semantic.batch_id.to_string())
        .bind(semantic.created_at_cycle as i64)
        .bind(semantic.source_event_count as i64)
        .bind(&patterns)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to archive semantic record {}", semantic.id))?;

        tx.commit().await.context("Failed to commit batch")?;
        tracing::debug!("Archived batch {} ({})", batch.id, batch.trigger.name());
        Ok(())
    }

    pub async fn load_batches(&self) -> Result<Vec<ConsolidationBatch>> {
        let rows = sqlx::query(
            "SELECT id, created_at_cycle, trigger_json, semantic_id, source_ids_json \
             FROM batches ORDER BY created_at_cycle ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to query batches")?;

        rows.into_iter()
            .map(|row| {
                let id: String = row.get("id");
                let semantic_id: String = row.get("semantic_id");
                let trigger: String = row.get("trigger_json");
                let source_ids: String = row.get("source_ids_json");
                Ok(ConsolidationBatch {
                    id: Uuid::parse_str(&id).context("Invalid batch id")?,
                    source_event_ids: serde_json::from_str(&source_ids)
                        .context("Failed to deserialize source ids")?,
                    resulting_semantic_id: Uuid::parse_str(&semantic_id)
                        .context("Invalid semantic id")?,
                    created_at_cycle: row.get::<i64, _>("created_at_cycle") as u64,
                    trigger: serde_json::from_str::<ConsolidationTrigger>(&trigger)
                        .context("Failed to deserialize trigger")?,
                })
            })
            .collect()
    }

    // =========================================================================
    // Alerts and state history
    // =========================================================================

    pub async fn append_alert(&self, alert: &HealthAlert) -> Result<()> {
        let kind = serde_json::to_value(alert.kind).context("Failed to serialize alert kind")?;
        let severity =
            serde_json::to_value(alert.severity).context("Failed to serialize severity")?;

        sqlx::query(
            "INSERT INTO alerts (kind, severity, cycle, evidence, recorded_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(kind.as_str().unwrap_or_default())
        .bind(severity.as_str().unwrap_or_default())
        .bind(alert.cycle as i64)
        .bind(&alert.evidence)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to archive alert")?;
        Ok(())
    }

    pub async fn load_alerts(&self) -> Result<Vec<HealthAlert>> {
        let rows = sqlx::query("SELECT kind, cycle, evidence FROM alerts ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .context("Failed to query alerts")?;

        rows.into_iter()
            .map(|row| {
                let kind: String = row.get("kind");
                let kind: AlertKind = serde_json::from_value(serde_json::Value::String(kind))
                    .context("Unknown alert kind in archive")?;
                let evidence: String = row.get("evidence");
                Ok(HealthAlert::new(
                    kind,
                    row.get::<i64, _>("cycle") as u64,
                    evidence,
                ))
            })
            .collect()
    }

    pub async fn record_state(&self, state: &EmotionalState) -> Result<()> {
        let json = serde_json::to_string(state).context("Failed to serialize state")?;
        sqlx::query("INSERT INTO state_history (cycle, state_json, recorded_at) VALUES (?, ?, ?)")
            .bind(state.cycle as i64)
            .bind(&json)
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to record state for cycle {}", state.cycle))?;
        Ok(())
    }

    pub async fn latest_state(&self) -> Result<Option<EmotionalState>> {
        let row = sqlx::query("SELECT state_json FROM state_history ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .context("Failed to query state_history")?;

        match row {
            Some(row) => {
                let json: String = row.get("state_json");
                let state = serde_json::from_str(&json).context("Failed to deserialize state")?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    pub async fn counts(&self) -> Result<ArchiveCounts> {
        let row = sqlx::query(
            "SELECT \
               (SELECT COUNT(*) FROM events) AS events, \
               (SELECT COUNT(*) FROM batches) AS batches, \
               (SELECT COUNT(*) FROM semantic_records) AS semantic_records, \
               (SELECT COUNT(*) FROM alerts) AS alerts, \
               (SELECT COUNT(*) FROM state_history) AS states",
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to count archive rows")?;

        Ok(ArchiveCounts {
            events: row.get("events"),
            batches: row.get("batches"),
            semantic_records: row.get("semantic_records"),
            alerts: row.get("alerts"),
            states: row.get("states"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    fn record(id: &str, cycle: u64) -> EventRecord {
        EventRecord {
            id: id.to_string(),
            sequence: cycle,
            source: "world".to_string(),
            kind: EventKind::Outcome,
            payload: json!({"ok": true, "subject": "lamp"}),
            novelty_score: Some(0.25),
            timestamp: 1_700_000_000_000,
            cycle,
        }
    }

    #[tokio::test]
    async fn test_event_roundtrip_and_append_only() {
        let archive = SqliteArchive::in_memory().await.unwrap();
        archive.append_event(&record("a", 1)).await.unwrap();
        archive.append_event(&record("b", 2)).await.unwrap();

        // Same id again is refused, not overwritten
        assert!(archive.append_event(&record("a", 3)).await.is_err());

        let events = archive.load_events().await.unwrap();
        assert_eq!(events, vec![record("a", 1), record("b", 2)]);
    }

    #[tokio::test]
    async fn test_batch_and_semantic_are_archived_together() {
        let archive = SqliteArchive::in_memory().await.unwrap();
        let batch_id = Uuid::new_v4();
        let semantic = SemanticRecord {
            id: Uuid::new_v4(),
            batch_id,
            patterns: vec![],
            source_event_count: 2,
            created_at_cycle: 9,
        };
        let batch = ConsolidationBatch {
            id: batch_id,
            source_event_ids: BTreeSet::from(["a".to_string(), "b".to_string()]),
            resulting_semantic_id: semantic.id,
            created_at_cycle: 9,
            trigger: ConsolidationTrigger::ArousalPeak { peak: 0.5 },
        };
        archive.append_batch(&batch, &semantic).await.unwrap();

        let loaded = archive.load_batches().await.unwrap();
        assert_eq!(loaded, vec![batch]);
        let counts = archive.counts().await.unwrap();
        assert_eq!(counts.batches, 1);
        assert_eq!(counts.semantic_records, 1);
    }

    #[tokio::test]
    async fn test_alerts_and_latest_state() {
        let archive = SqliteArchive::in_memory().await.unwrap();
        let alert = HealthAlert::new(AlertKind::RunawayArousal, 40, "16 rising updates");
        archive.append_alert(&alert).await.unwrap();
        assert_eq!(archive.load_alerts().await.unwrap(), vec![alert]);

        assert!(archive.latest_state().await.unwrap().is_none());
        for cycle in 1..=3 {
            let state = EmotionalState {
                cycle,
                ..Default::default()
            };
            archive.record_state(&state).await.unwrap();
        }
        assert_eq!(archive.latest_state().await.unwrap().unwrap().cycle, 3);
    }
}
