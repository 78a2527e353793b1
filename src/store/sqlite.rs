//! SQLite implementation of [`Store`].
//!
//! Timestamps are stored as Unix seconds so range scans and the
//! `last_updated` compare-and-swap are plain integer comparisons.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::Store;
use crate::error::{StoreError, ValidationError};
use crate::model::{
    BatteryState, CurtailmentEvent, DemandObservation, DispatchLogEntry,
    ForecastPerformanceRecord, GenerationObservation, MitigationActuals, MitigationKind,
    MitigationRecommendation, SourceType,
};

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS generation_observations (
        region         TEXT NOT NULL,
        source_type    TEXT NOT NULL,
        timestamp      INTEGER NOT NULL,
        generation_mw  REAL NOT NULL,
        provenance     TEXT NOT NULL,
        PRIMARY KEY (region, source_type, timestamp)
    );

    CREATE TABLE IF NOT EXISTS demand_observations (
        region     TEXT NOT NULL,
        timestamp  INTEGER NOT NULL,
        demand_mw  REAL NOT NULL,
        PRIMARY KEY (region, timestamp)
    );

    CREATE TABLE IF NOT EXISTS curtailment_events (
        id                          INTEGER PRIMARY KEY AUTOINCREMENT,
        region                      TEXT NOT NULL,
        source_type                 TEXT NOT NULL,
        occurred_at                 INTEGER NOT NULL,
        ended_at                    INTEGER,
        curtailed_mw                REAL NOT NULL,
        available_capacity_mw       REAL NOT NULL,
        curtailment_percent         REAL NOT NULL,
        duration_hours              REAL NOT NULL,
        total_energy_curtailed_mwh  REAL NOT NULL,
        reason                      TEXT NOT NULL,
        reason_detail               TEXT NOT NULL,
        market_price                REAL NOT NULL,
        opportunity_cost            REAL NOT NULL,
        grid_demand_mw              REAL NOT NULL,
        provenance                  TEXT NOT NULL,
        UNIQUE (region, occurred_at)
    );

    CREATE TABLE IF NOT EXISTS curtailment_recommendations (
        id                   INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id             INTEGER NOT NULL REFERENCES curtailment_events(id),
        kind                 TEXT NOT NULL,
        target_mw            REAL NOT NULL,
        effectiveness        REAL NOT NULL,
        confidence           REAL NOT NULL,
        estimated_mwh_saved  REAL NOT NULL,
        actual_mwh_saved     REAL,
        estimated_cost       REAL NOT NULL,
        actual_cost          REAL,
        estimated_revenue    REAL NOT NULL,
        actual_revenue       REAL,
        implemented          INTEGER NOT NULL DEFAULT 0,
        UNIQUE (event_id, kind)
    );

    CREATE TABLE IF NOT EXISTS battery_state (
        region           TEXT PRIMARY KEY,
        soc_percent      REAL NOT NULL,
        capacity_mwh     REAL NOT NULL,
        power_rating_mw  REAL NOT NULL,
        last_updated     INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS dispatch_log (
        id                      INTEGER PRIMARY KEY AUTOINCREMENT,
        region                  TEXT NOT NULL,
        timestamp               INTEGER NOT NULL,
        action                  TEXT NOT NULL,
        power_mw                REAL NOT NULL,
        duration_hours          REAL NOT NULL,
        soc_before              REAL NOT NULL,
        soc_after               REAL NOT NULL,
        reason                  TEXT NOT NULL,
        rule                    TEXT NOT NULL,
        price                   REAL NOT NULL,
        expected_revenue        REAL NOT NULL,
        renewable_absorption    INTEGER NOT NULL,
        curtailment_mitigation  INTEGER NOT NULL,
        provenance              TEXT NOT NULL,
        UNIQUE (region, timestamp)
    );

    CREATE INDEX IF NOT EXISTS idx_dispatch_log_time ON dispatch_log(timestamp);

    CREATE TABLE IF NOT EXISTS forecast_performance_metrics (
        id                               INTEGER PRIMARY KEY AUTOINCREMENT,
        region                           TEXT NOT NULL,
        source_type                      TEXT NOT NULL,
        horizon_hours                    INTEGER NOT NULL,
        method                           TEXT NOT NULL,
        mae                              REAL NOT NULL,
        mape                             REAL NOT NULL,
        rmse                             REAL NOT NULL,
        bias                             REAL NOT NULL,
        sample_count                     INTEGER NOT NULL,
        improvement_vs_baseline_percent  REAL,
        period_start                     INTEGER NOT NULL,
        period_end                       INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_forecast_performance_lookup
        ON forecast_performance_metrics(region, source_type, period_start);
";

const EVENT_COLUMNS: &str = "id, region, source_type, occurred_at, ended_at, curtailed_mw, \
     available_capacity_mw, curtailment_percent, duration_hours, total_energy_curtailed_mwh, \
     reason, reason_detail, market_price, opportunity_cost, grid_demand_mw, provenance";

const RECOMMENDATION_COLUMNS: &str = "id, event_id, kind, target_mw, effectiveness, confidence, \
     estimated_mwh_saved, actual_mwh_saved, estimated_cost, actual_cost, estimated_revenue, \
     actual_revenue, implemented";

const PERFORMANCE_COLUMNS: &str = "region, source_type, horizon_hours, method, mae, mape, rmse, \
     bias, sample_count, improvement_vs_baseline_percent, period_start, period_end";

const LOG_COLUMNS: &str = "id, region, timestamp, action, power_mw, duration_hours, soc_before, \
     soc_after, reason, rule, price, expected_revenue, renewable_absorption, \
     curtailment_mitigation, provenance";

/// Store backed by a single SQLite connection.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database file and applies the schema.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the file cannot be opened or the schema fails.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Corrupt(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        Self::init(Connection::open(path)?)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns a `StoreError` if the schema fails to apply.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn conversion_error(idx: usize, ty: Type, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, message.into())
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let secs: i64 = row.get(idx)?;
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        conversion_error(idx, Type::Integer, format!("timestamp {secs} out of range"))
    })
}

fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => ts_col(row, idx).map(Some),
        None => Ok(None),
    }
}

fn tag_col<T: FromStr<Err = ValidationError>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let tag: String = row.get(idx)?;
    tag.parse()
        .map_err(|e: ValidationError| conversion_error(idx, Type::Text, e.to_string()))
}

fn count_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<usize> {
    let n: i64 = row.get(idx)?;
    usize::try_from(n).map_err(|e| conversion_error(idx, Type::Integer, e.to_string()))
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<CurtailmentEvent> {
    Ok(CurtailmentEvent {
        id: Some(row.get(0)?),
        region: row.get(1)?,
        source_type: tag_col(row, 2)?,
        occurred_at: ts_col(row, 3)?,
        ended_at: opt_ts_col(row, 4)?,
        curtailed_mw: row.get(5)?,
        available_capacity_mw: row.get(6)?,
        curtailment_percent: row.get(7)?,
        duration_hours: row.get(8)?,
        total_energy_curtailed_mwh: row.get(9)?,
        reason: tag_col(row, 10)?,
        reason_detail: row.get(11)?,
        market_price: row.get(12)?,
        opportunity_cost: row.get(13)?,
        grid_demand_mw: row.get(14)?,
        provenance: row.get(15)?,
    })
}

fn recommendation_from_row(row: &Row<'_>) -> rusqlite::Result<MitigationRecommendation> {
    Ok(MitigationRecommendation {
        id: Some(row.get(0)?),
        event_id: row.get(1)?,
        kind: tag_col(row, 2)?,
        target_mw: row.get(3)?,
        effectiveness: row.get(4)?,
        confidence: row.get(5)?,
        estimated_mwh_saved: row.get(6)?,
        actual_mwh_saved: row.get(7)?,
        estimated_cost: row.get(8)?,
        actual_cost: row.get(9)?,
        estimated_revenue: row.get(10)?,
        actual_revenue: row.get(11)?,
        implemented: row.get(12)?,
    })
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<DispatchLogEntry> {
    Ok(DispatchLogEntry {
        id: Some(row.get(0)?),
        region: row.get(1)?,
        timestamp: ts_col(row, 2)?,
        action: tag_col(row, 3)?,
        power_mw: row.get(4)?,
        duration_hours: row.get(5)?,
        soc_before: row.get(6)?,
        soc_after: row.get(7)?,
        reason: row.get(8)?,
        rule: row.get(9)?,
        price: row.get(10)?,
        expected_revenue: row.get(11)?,
        renewable_absorption: row.get(12)?,
        curtailment_mitigation: row.get(13)?,
        provenance: tag_col(row, 14)?,
    })
}

fn performance_from_row(row: &Row<'_>) -> rusqlite::Result<ForecastPerformanceRecord> {
    Ok(ForecastPerformanceRecord {
        region: row.get(0)?,
        source_type: tag_col(row, 1)?,
        horizon_hours: row.get(2)?,
        method: row.get(3)?,
        mae: row.get(4)?,
        mape: row.get(5)?,
        rmse: row.get(6)?,
        bias: row.get(7)?,
        sample_count: count_col(row, 8)?,
        improvement_vs_baseline_percent: row.get(9)?,
        period_start: ts_col(row, 10)?,
        period_end: ts_col(row, 11)?,
    })
}

impl Store for SqliteStore {
    fn insert_generation(&self, rows: &[GenerationObservation]) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO generation_observations
                     (region, source_type, timestamp, generation_mw, provenance)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(region, source_type, timestamp) DO NOTHING",
            )?;
            for r in rows {
                written += stmt.execute(params![
                    r.region,
                    r.source_type.as_str(),
                    r.timestamp.timestamp(),
                    r.generation_mw,
                    r.provenance,
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    fn insert_demand(&self, rows: &[DemandObservation]) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO demand_observations (region, timestamp, demand_mw)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(region, timestamp) DO NOTHING",
            )?;
            for r in rows {
                written += stmt.execute(params![r.region, r.timestamp.timestamp(), r.demand_mw])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    fn generation_between(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GenerationObservation>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT region, source_type, timestamp, generation_mw, provenance
             FROM generation_observations
             WHERE region = ?1 AND timestamp BETWEEN ?2 AND ?3
             ORDER BY timestamp, source_type",
        )?;
        let rows = stmt
            .query_map(params![region, start.timestamp(), end.timestamp()], |row| {
                Ok(GenerationObservation {
                    region: row.get(0)?,
                    source_type: tag_col(row, 1)?,
                    timestamp: ts_col(row, 2)?,
                    generation_mw: row.get(3)?,
                    provenance: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn demand_between(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DemandObservation>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT region, timestamp, demand_mw
             FROM demand_observations
             WHERE region = ?1 AND timestamp BETWEEN ?2 AND ?3
             ORDER BY timestamp",
        )?;
        let rows = stmt
            .query_map(params![region, start.timestamp(), end.timestamp()], |row| {
                Ok(DemandObservation {
                    region: row.get(0)?,
                    timestamp: ts_col(row, 1)?,
                    demand_mw: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn upsert_event(&self, e: &CurtailmentEvent) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let id = conn.query_row(
            "INSERT INTO curtailment_events
                 (region, source_type, occurred_at, ended_at, curtailed_mw, available_capacity_mw,
                  curtailment_percent, duration_hours, total_energy_curtailed_mwh, reason,
                  reason_detail, market_price, opportunity_cost, grid_demand_mw, provenance)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(region, occurred_at) DO UPDATE SET
                 source_type = excluded.source_type,
                 ended_at = excluded.ended_at,
                 curtailed_mw = excluded.curtailed_mw,
                 available_capacity_mw = excluded.available_capacity_mw,
                 curtailment_percent = excluded.curtailment_percent,
                 duration_hours = excluded.duration_hours,
                 total_energy_curtailed_mwh = excluded.total_energy_curtailed_mwh,
                 reason = excluded.reason,
                 reason_detail = excluded.reason_detail,
                 market_price = excluded.market_price,
                 opportunity_cost = excluded.opportunity_cost,
                 grid_demand_mw = excluded.grid_demand_mw,
                 provenance = excluded.provenance
             RETURNING id",
            params![
                e.region,
                e.source_type.as_str(),
                e.occurred_at.timestamp(),
                e.ended_at.map(|t| t.timestamp()),
                e.curtailed_mw,
                e.available_capacity_mw,
                e.curtailment_percent,
                e.duration_hours,
                e.total_energy_curtailed_mwh,
                e.reason.as_str(),
                e.reason_detail,
                e.market_price,
                e.opportunity_cost,
                e.grid_demand_mw,
                e.provenance,
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn events_between(
        &self,
        region: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CurtailmentEvent>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM curtailment_events
             WHERE region = ?1 AND occurred_at BETWEEN ?2 AND ?3
             ORDER BY occurred_at"
        ))?;
        let rows = stmt
            .query_map(
                params![region, start.timestamp(), end.timestamp()],
                event_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn upsert_recommendation(&self, r: &MitigationRecommendation) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let id = conn.query_row(
            "INSERT INTO curtailment_recommendations
                 (event_id, kind, target_mw, effectiveness, confidence, estimated_mwh_saved,
                  estimated_cost, estimated_revenue)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(event_id, kind) DO UPDATE SET
                 target_mw = excluded.target_mw,
                 effectiveness = excluded.effectiveness,
                 confidence = excluded.confidence,
                 estimated_mwh_saved = excluded.estimated_mwh_saved,
                 estimated_cost = excluded.estimated_cost,
                 estimated_revenue = excluded.estimated_revenue
             RETURNING id",
            params![
                r.event_id,
                r.kind.as_str(),
                r.target_mw,
                r.effectiveness,
                r.confidence,
                r.estimated_mwh_saved,
                r.estimated_cost,
                r.estimated_revenue,
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn recommendations_for_event(
        &self,
        event_id: i64,
    ) -> Result<Vec<MitigationRecommendation>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECOMMENDATION_COLUMNS} FROM curtailment_recommendations
             WHERE event_id = ?1
             ORDER BY kind"
        ))?;
        let rows = stmt
            .query_map(params![event_id], recommendation_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn retain_recommendations(
        &self,
        event_id: i64,
        kinds: &[MitigationKind],
    ) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare(
                "SELECT id, kind FROM curtailment_recommendations
                 WHERE event_id = ?1 AND implemented = 0 AND actual_mwh_saved IS NULL",
            )?;
            let unmeasured = stmt
                .query_map(params![event_id], |row| {
                    Ok((row.get::<_, i64>(0)?, tag_col::<MitigationKind>(row, 1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            for (id, kind) in unmeasured {
                if !kinds.contains(&kind) {
                    removed += tx.execute(
                        "DELETE FROM curtailment_recommendations WHERE id = ?1",
                        params![id],
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn record_actuals(
        &self,
        recommendation_id: i64,
        actuals: &MitigationActuals,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE curtailment_recommendations
             SET actual_mwh_saved = ?1, actual_cost = ?2, actual_revenue = ?3, implemented = 1
             WHERE id = ?4",
            params![
                actuals.mwh_saved,
                actuals.cost,
                actuals.revenue,
                recommendation_id
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "recommendation",
                id: recommendation_id,
            });
        }
        Ok(())
    }

    fn battery_state(&self, region: &str) -> Result<Option<BatteryState>, StoreError> {
        let conn = self.conn()?;
        let state = conn
            .query_row(
                "SELECT region, soc_percent, capacity_mwh, power_rating_mw, last_updated
                 FROM battery_state WHERE region = ?1",
                params![region],
                |row| {
                    Ok(BatteryState {
                        region: row.get(0)?,
                        soc_percent: row.get(1)?,
                        capacity_mwh: row.get(2)?,
                        power_rating_mw: row.get(3)?,
                        last_updated: Some(ts_col(row, 4)?),
                    })
                },
            )
            .optional()?;
        Ok(state)
    }

    fn log_entry_at(
        &self,
        region: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<DispatchLogEntry>, StoreError> {
        let conn = self.conn()?;
        let entry = conn
            .query_row(
                &format!(
                    "SELECT {LOG_COLUMNS} FROM dispatch_log WHERE region = ?1 AND timestamp = ?2"
                ),
                params![region, timestamp.timestamp()],
                log_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    fn commit_tick(
        &self,
        entry: &DispatchLogEntry,
        state: &BatteryState,
        expected_last_updated: Option<DateTime<Utc>>,
    ) -> Result<i64, StoreError> {
        let Some(updated) = state.last_updated else {
            return Err(StoreError::Corrupt(format!(
                "battery state for {} has no last_updated",
                state.region
            )));
        };
        let conflict = || StoreError::Conflict {
            region: state.region.clone(),
        };

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let swapped = match expected_last_updated {
            None => tx.execute(
                "INSERT INTO battery_state
                     (region, soc_percent, capacity_mwh, power_rating_mw, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(region) DO NOTHING",
                params![
                    state.region,
                    state.soc_percent,
                    state.capacity_mwh,
                    state.power_rating_mw,
                    updated.timestamp(),
                ],
            )?,
            Some(expected) => tx.execute(
                "UPDATE battery_state
                 SET soc_percent = ?2, capacity_mwh = ?3, power_rating_mw = ?4, last_updated = ?5
                 WHERE region = ?1 AND last_updated = ?6",
                params![
                    state.region,
                    state.soc_percent,
                    state.capacity_mwh,
                    state.power_rating_mw,
                    updated.timestamp(),
                    expected.timestamp(),
                ],
            )?,
        };
        if swapped == 0 {
            return Err(conflict());
        }

        let inserted = tx.execute(
            "INSERT INTO dispatch_log
                 (region, timestamp, action, power_mw, duration_hours, soc_before, soc_after,
                  reason, rule, price, expected_revenue, renewable_absorption,
                  curtailment_mitigation, provenance)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(region, timestamp) DO NOTHING",
            params![
                entry.region,
                entry.timestamp.timestamp(),
                entry.action.as_str(),
                entry.power_mw,
                entry.duration_hours,
                entry.soc_before,
                entry.soc_after,
                entry.reason,
                entry.rule,
                entry.price,
                entry.expected_revenue,
                entry.renewable_absorption,
                entry.curtailment_mitigation,
                entry.provenance.as_str(),
            ],
        )?;
        if inserted == 0 {
            return Err(conflict());
        }

        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    fn dispatch_log(
        &self,
        region: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DispatchLogEntry>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM dispatch_log
             WHERE (?1 IS NULL OR region = ?1) AND timestamp BETWEEN ?2 AND ?3
             ORDER BY timestamp, region"
        ))?;
        let rows = stmt
            .query_map(
                params![region, start.timestamp(), end.timestamp()],
                log_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn recent_dispatch_log(
        &self,
        region: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DispatchLogEntry>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM dispatch_log
             WHERE (?1 IS NULL OR region = ?1)
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![region, limit], log_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn insert_forecast_performance(
        &self,
        r: &ForecastPerformanceRecord,
    ) -> Result<i64, StoreError> {
        let sample_count = i64::try_from(r.sample_count)
            .map_err(|e| StoreError::Corrupt(format!("sample_count: {e}")))?;
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO forecast_performance_metrics ({PERFORMANCE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                r.region,
                r.source_type.as_str(),
                r.horizon_hours,
                r.method,
                r.mae,
                r.mape,
                r.rmse,
                r.bias,
                sample_count,
                r.improvement_vs_baseline_percent,
                r.period_start.timestamp(),
                r.period_end.timestamp(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn forecast_performance(
        &self,
        region: &str,
        source_type: SourceType,
        horizon_hours: Option<u32>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ForecastPerformanceRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PERFORMANCE_COLUMNS} FROM forecast_performance_metrics
             WHERE region = ?1 AND source_type = ?2 AND (?3 IS NULL OR horizon_hours = ?3)
               AND period_start >= ?4 AND period_end <= ?5
             ORDER BY period_start DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map(
                params![
                    region,
                    source_type.as_str(),
                    horizon_hours,
                    start.timestamp(),
                    end.timestamp()
                ],
                performance_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
