//! SQLite journal of committed vault activity.
//!
//! Persists what the keeper observes so that `status` can report on a run:
//! - Committed vault events (JSON payloads)
//! - Periodic position snapshots
//!
//! Fixed-point quantities are stored as TEXT to keep full `u128` precision.

use crate::vault::{PositionSnapshot, VaultEvent};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// An event as read back from the journal.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedEvent {
    pub timestamp: DateTime<Utc>,
    pub event: VaultEvent,
}

/// A snapshot as read back from the journal.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedSnapshot {
    pub timestamp: DateTime<Utc>,
    pub snapshot: PositionSnapshot,
}

/// SQLite-based persistence manager.
pub struct PersistenceManager {
    conn: Connection,
}

impl PersistenceManager {
    /// Open (or create) the journal at `db_path`. `":memory:"` is accepted.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        let manager = Self { conn };
        manager.init_schema()?;

        info!("Persistence manager initialized at {:?}", path);
        Ok(manager)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS vault_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_type ON vault_events(event_type);

            CREATE TABLE IF NOT EXISTS position_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                collateral_base TEXT NOT NULL,
                debt_base TEXT NOT NULL,
                idle_reserve_base TEXT NOT NULL,
                idle_collateral_base TEXT NOT NULL,
                total_base TEXT NOT NULL,
                current_ltv_bps INTEGER NOT NULL,
                target_ltv_bps INTEGER NOT NULL,
                health_factor TEXT NOT NULL,
                total_shares TEXT NOT NULL,
                closed INTEGER NOT NULL
            );
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Append a batch of events in one SQLite transaction.
    pub fn record_events(&self, events: &[VaultEvent]) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let now = Utc::now().to_rfc3339();
        for event in events {
            let payload = serde_json::to_string(event).context("Failed to encode event")?;
            tx.execute(
                r#"
                INSERT INTO vault_events (timestamp, event_type, payload)
                VALUES (?1, ?2, ?3)
                "#,
                params![now, event.name(), payload],
            )?;
        }
        tx.commit()?;

        debug!(count = events.len(), "Events journaled");
        Ok(events.len())
    }

    pub fn record_snapshot(&self, snapshot: &PositionSnapshot) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO position_snapshots (timestamp, collateral_base, debt_base,
                                            idle_reserve_base, idle_collateral_base, total_base,
                                            current_ltv_bps, target_ltv_bps, health_factor,
                                            total_shares, closed)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                Utc::now().to_rfc3339(),
                snapshot.collateral_base.to_string(),
                snapshot.debt_base.to_string(),
                snapshot.idle_reserve_base.to_string(),
                snapshot.idle_collateral_base.to_string(),
                snapshot.total_base.to_string(),
                snapshot.current_ltv_bps,
                snapshot.target_ltv_bps,
                snapshot.health_factor.to_string(),
                snapshot.total_shares.to_string(),
                snapshot.closed as i32,
            ],
        )?;
        Ok(())
    }

    /// Most recent events, newest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<PersistedEvent>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, payload
            FROM vault_events
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let events = stmt
            .query_map([limit], |row| {
                let ts: String = row.get(0)?;
                let payload: String = row.get(1)?;
                Ok((ts, payload))
            })?
            .filter_map(|r| r.ok())
            .filter_map(|(ts, payload)| match serde_json::from_str(&payload) {
                Ok(event) => Some(PersistedEvent {
                    timestamp: parse_timestamp(&ts),
                    event,
                }),
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable journal entry");
                    None
                }
            })
            .collect();

        Ok(events)
    }

    /// Number of journaled events per event type.
    pub fn event_counts(&self) -> Result<HashMap<String, u64>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT event_type, COUNT(*)
            FROM vault_events
            GROUP BY event_type
            "#,
        )?;

        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(counts)
    }

    pub fn latest_snapshot(&self) -> Result<Option<PersistedSnapshot>> {
        let snapshot = self
            .conn
            .query_row(
                r#"
                SELECT timestamp, collateral_base, debt_base, idle_reserve_base,
                       idle_collateral_base, total_base, current_ltv_bps, target_ltv_bps,
                       health_factor, total_shares, closed
                FROM position_snapshots
                ORDER BY id DESC
                LIMIT 1
                "#,
                [],
                |row| {
                    let ts: String = row.get(0)?;
                    let amount = |idx: usize| -> rusqlite::Result<u128> {
                        Ok(row.get::<_, String>(idx)?.parse().unwrap_or_default())
                    };
                    Ok(PersistedSnapshot {
                        timestamp: parse_timestamp(&ts),
                        snapshot: PositionSnapshot {
                            collateral_base: amount(1)?,
                            debt_base: amount(2)?,
                            idle_reserve_base: amount(3)?,
                            idle_collateral_base: amount(4)?,
                            total_base: amount(5)?,
                            current_ltv_bps: row.get(6)?,
                            target_ltv_bps: row.get(7)?,
                            health_factor: amount(8)?,
                            total_shares: amount(9)?,
                            closed: row.get::<_, i32>(10)? != 0,
                        },
                    })
                },
            )
            .optional()?;

        Ok(snapshot)
    }
}

fn parse_timestamp(ts: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
