//! CSV export of the dispatch log and curtailment events.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::model::{CurtailmentEvent, DispatchLogEntry};

/// Column header for dispatch log export.
const DISPATCH_HEADER: &str = "timestamp,region,action,power_mw,duration_hours,energy_mwh,\
                               soc_before,soc_after,price,expected_revenue,\
                               renewable_absorption,curtailment_mitigation,rule,provenance,reason";

/// Column header for curtailment event export.
const EVENT_HEADER: &str = "occurred_at,ended_at,region,source_type,curtailed_mw,\
                            available_capacity_mw,curtailment_percent,duration_hours,\
                            total_energy_curtailed_mwh,reason,market_price,opportunity_cost,\
                            grid_demand_mw,reason_detail";

/// Exports dispatch log entries to a CSV file at `path`.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_dispatch_log(entries: &[DispatchLogEntry], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    write_dispatch_log(entries, io::BufWriter::new(file))
}

/// Writes dispatch log entries as CSV to any writer.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_dispatch_log(entries: &[DispatchLogEntry], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(DISPATCH_HEADER.split(',').map(str::trim))?;

    for e in entries {
        wtr.write_record(&[
            e.timestamp.to_rfc3339(),
            e.region.clone(),
            e.action.to_string(),
            format!("{:.3}", e.power_mw),
            format!("{:.4}", e.duration_hours),
            format!("{:.4}", e.energy_mwh()),
            format!("{:.3}", e.soc_before),
            format!("{:.3}", e.soc_after),
            format!("{:.2}", e.price),
            format!("{:.2}", e.expected_revenue),
            e.renewable_absorption.to_string(),
            e.curtailment_mitigation.to_string(),
            e.rule.clone(),
            e.provenance.to_string(),
            e.reason.clone(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Exports curtailment events to a CSV file at `path`.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_events(events: &[CurtailmentEvent], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    write_events(events, io::BufWriter::new(file))
}

/// Writes curtailment events as CSV to any writer.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_events(events: &[CurtailmentEvent], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(EVENT_HEADER.split(',').map(str::trim))?;

    for e in events {
        wtr.write_record(&[
            e.occurred_at.to_rfc3339(),
            e.ended_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            e.region.clone(),
            e.source_type.to_string(),
            format!("{:.2}", e.curtailed_mw),
            format!("{:.2}", e.available_capacity_mw),
            format!("{:.3}", e.curtailment_percent),
            format!("{:.4}", e.duration_hours),
            format!("{:.3}", e.total_energy_curtailed_mwh),
            e.reason.to_string(),
            format!("{:.2}", e.market_price),
            format!("{:.2}", e.opportunity_cost),
            format!("{:.2}", e.grid_demand_mw),
            e.reason_detail.clone(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
