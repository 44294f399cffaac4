//! SQLite journal of hedge cycles.
//!
//! Persists what the driver needs across restarts:
//! - One row per finished cycle, with the full result as JSON
//! - The halt flag raised by the exposure guard
//! - Operator acknowledgements of past halts

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::strategy::HedgePairResult;

/// Summary row of a journaled cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleRecord {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub notional: Decimal,
    pub venue_a_leg: String,
    pub filled_a: Decimal,
    pub filled_b: Decimal,
    pub classification: String,
    pub outcome: String,
    pub exposure_unknown: bool,
    pub residual_notional: Decimal,
}

/// Persisted halt flag.
#[derive(Debug, Clone, PartialEq)]
pub struct HaltRecord {
    pub reason: String,
    pub halted_at: DateTime<Utc>,
}

/// SQLite-based cycle journal.
pub struct Journal {
    conn: Connection,
}

impl Journal {
    /// Open the journal, creating the database and schema if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {:?}", path))?;

        let journal = Self { conn };
        journal.init_schema()?;

        info!("Journal initialized at {:?}", path);
        Ok(journal)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cycles (
                cycle_id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                notional TEXT NOT NULL,
                venue_a_leg TEXT NOT NULL,
                filled_a TEXT NOT NULL,
                filled_b TEXT NOT NULL,
                classification TEXT NOT NULL,
                outcome TEXT NOT NULL,
                exposure_unknown INTEGER NOT NULL,
                residual_notional TEXT NOT NULL,
                result_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cycles_started_at ON cycles(started_at);

            -- Halt flag (singleton row)
            CREATE TABLE IF NOT EXISTS halt_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                reason TEXT NOT NULL,
                halted_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS acknowledgements (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                operator TEXT NOT NULL,
                reason TEXT NOT NULL,
                acknowledged_at TEXT NOT NULL
            );
            "#,
        )?;

        debug!("Journal schema initialized");
        Ok(())
    }

    /// Append a finished cycle.
    pub fn record_cycle(&self, result: &HedgePairResult) -> Result<()> {
        let residual: Decimal = result.residual_exposure.iter().map(|r| r.notional).sum();
        let json = serde_json::to_string(result).context("Failed to serialize cycle result")?;

        self.conn.execute(
            r#"
            INSERT INTO cycles (cycle_id, started_at, finished_at, notional, venue_a_leg,
                                filled_a, filled_b, classification, outcome,
                                exposure_unknown, residual_notional, result_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                result.cycle_id,
                result.started_at.to_rfc3339(),
                result.finished_at.to_rfc3339(),
                result.request.notional_usd.to_string(),
                result.request.venue_a_leg.to_string(),
                result.leg_a.filled_notional.to_string(),
                result.leg_b.filled_notional.to_string(),
                result.classification.as_str(),
                result.outcome.as_str(),
                result.exposure_unknown,
                residual.to_string(),
                json,
            ],
        )?;

        debug!(cycle_id = %result.cycle_id, outcome = result.outcome.as_str(), "Cycle journaled");
        Ok(())
    }

    /// Most recent cycles, newest first.
    pub fn recent_cycles(&self, limit: usize) -> Result<Vec<CycleRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT cycle_id, started_at, finished_at, notional, venue_a_leg, filled_a, filled_b,
                   classification, outcome, exposure_unknown, residual_notional
            FROM cycles
            ORDER BY started_at DESC
            LIMIT ?1
            "#,
        )?;

        let records = stmt
            .query_map([limit as i64], |row| {
                Ok(CycleRecord {
                    cycle_id: row.get(0)?,
                    started_at: parse_timestamp(&row.get::<_, String>(1)?),
                    finished_at: parse_timestamp(&row.get::<_, String>(2)?),
                    notional: parse_decimal(&row.get::<_, String>(3)?),
                    venue_a_leg: row.get(4)?,
                    filled_a: parse_decimal(&row.get::<_, String>(5)?),
                    filled_b: parse_decimal(&row.get::<_, String>(6)?),
                    classification: row.get(7)?,
                    outcome: row.get(8)?,
                    exposure_unknown: row.get(9)?,
                    residual_notional: parse_decimal(&row.get::<_, String>(10)?),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(records)
    }

    /// Full JSON result of one cycle.
    pub fn cycle_json(&self, cycle_id: &str) -> Result<Option<String>> {
        let json = self
            .conn
            .query_row(
                "SELECT result_json FROM cycles WHERE cycle_id = ?1",
                [cycle_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json)
    }

    pub fn load_halt(&self) -> Result<Option<HaltRecord>> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT reason, halted_at FROM halt_state WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(row.map(|(reason, halted_at)| HaltRecord {
            reason,
            halted_at: parse_timestamp(&halted_at),
        }))
    }

    pub fn save_halt(&self, halt: &HaltRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO halt_state (id, reason, halted_at)
            VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET reason = ?1, halted_at = ?2
            "#,
            params![halt.reason, halt.halted_at.to_rfc3339()],
        )?;

        info!(reason = %halt.reason, "Halt persisted");
        Ok(())
    }

    /// Clear the halt flag and record who acknowledged it.
    ///
    /// Returns the cleared halt, if there was one.
    pub fn clear_halt(&self, operator: &str) -> Result<Option<HaltRecord>> {
        let Some(halt) = self.load_halt()? else {
            return Ok(None);
        };

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            r#"
            INSERT INTO acknowledgements (operator, reason, acknowledged_at)
            VALUES (?1, ?2, ?3)
            "#,
            params![operator, halt.reason, Utc::now().to_rfc3339()],
        )?;
        tx.execute("DELETE FROM halt_state", [])?;
        tx.commit()?;

        info!(%operator, reason = %halt.reason, "Halt cleared");
        Ok(Some(halt))
    }

    /// Number of acknowledgements on record.
    pub fn acknowledgement_count(&self) -> Result<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM acknowledgements", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_decimal(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{Direction, Venue};
    use crate::strategy::{
        CycleState, HedgeRequest, LegOrder, Outcome, ResidualExposure,
    };
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use tokio_test::assert_ok;

    fn result(cycle_id: &str, started_at: DateTime<Utc>, outcome: Outcome) -> HedgePairResult {
        let mut leg_a = LegOrder::new(Venue::Paradex, "ETH-USD-PERP", Direction::Long, dec!(100), "a");
        leg_a.filled_notional = dec!(100);
        let leg_b = LegOrder::new(Venue::Bitget, "ETHPERP", Direction::Short, dec!(100), "b");

        HedgePairResult {
            cycle_id: cycle_id.into(),
            request: HedgeRequest::new(dec!(100), Direction::Long).unwrap(),
            leg_a,
            leg_b,
            top_up: None,
            classification: Outcome::Imbalanced,
            outcome,
            unwinds: Vec::new(),
            residual_exposure: Vec::new(),
            exposure_unknown: false,
            final_state: CycleState::UnwoundDone,
            started_at,
            finished_at: started_at + Duration::seconds(6),
        }
    }

    #[test]
    fn test_record_and_list_cycles() {
        let journal = assert_ok!(Journal::new(":memory:"));
        let t0 = Utc::now();

        assert_ok!(journal.record_cycle(&result("c-1", t0, Outcome::Unwound)));

        let mut failed = result("c-2", t0 + Duration::seconds(30), Outcome::Failed);
        failed.residual_exposure.push(ResidualExposure {
            venue: Venue::Paradex,
            symbol: "ETH-USD-PERP".into(),
            direction: Direction::Long,
            notional: dec!(100),
        });
        journal.record_cycle(&failed).unwrap();

        let cycles = journal.recent_cycles(10).unwrap();
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[0].cycle_id, "c-2");
        assert_eq!(cycles[0].outcome, "FAILED");
        assert_eq!(cycles[0].residual_notional, dec!(100));
        assert_eq!(cycles[1].classification, "IMBALANCED");
        assert_eq!(cycles[1].filled_a, dec!(100));
        assert_eq!(cycles[1].venue_a_leg, "LONG");

        assert_eq!(journal.recent_cycles(1).unwrap().len(), 1);

        let json = journal.cycle_json("c-1").unwrap().unwrap();
        assert!(json.contains("\"outcome\":\"unwound\""));
        assert!(journal.cycle_json("missing").unwrap().is_none());
    }

    #[test]
    fn test_halt_roundtrip_and_ack() {
        let journal = assert_ok!(Journal::new(":memory:"));
        assert!(journal.load_halt().unwrap().is_none());

        let halt = HaltRecord {
            reason: "residual exposure".into(),
            halted_at: Utc::now(),
        };
        journal.save_halt(&halt).unwrap();

        let loaded = journal.load_halt().unwrap().unwrap();
        assert_eq!(loaded.reason, "residual exposure");

        let cleared = journal.clear_halt("alice").unwrap();
        assert_eq!(cleared.map(|h| h.reason), Some("residual exposure".to_string()));
        assert!(journal.load_halt().unwrap().is_none());
        assert_eq!(journal.acknowledgement_count().unwrap(), 1);

        assert!(journal.clear_halt("alice").unwrap().is_none());
        assert_eq!(journal.acknowledgement_count().unwrap(), 1);
    }
}
