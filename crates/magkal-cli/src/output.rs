use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use magkal_sim::{SensorModel, SessionConfig, SessionResult};
use serde::Serialize;

use crate::OutputFormat;

#[derive(Serialize)]
struct Report<'a> {
    session: &'a SessionConfig,
    sensor: Option<&'a SensorModel>,
    result: &'a SessionResult,
}

/// Write a session to `session.csv` (per-step trace) or `session.json` (full
/// report) under `output_dir`.
pub fn write_session(
    output_dir: &Path,
    format: OutputFormat,
    session: &SessionConfig,
    result: &SessionResult,
    sensor: Option<&SensorModel>,
) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    let path = match format {
        OutputFormat::Csv => {
            let path = output_dir.join("session.csv");
            write_trace_csv(&path, session.calibration.dimension, result)?;
            path
        }
        OutputFormat::Json => {
            let path = output_dir.join("session.json");
            let report = Report {
                session,
                sensor,
                result,
            };
            std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
            path
        }
    };

    println!("Data written to {:?}", path);
    Ok(path)
}

fn write_trace_csv(path: &Path, dimension: usize, result: &SessionResult) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    let mut header = vec!["step".to_string(), "accepted".to_string()];
    header.extend((0..dimension).map(|i| format!("k{i}")));
    header.extend((0..dimension).map(|i| format!("l{i}")));
    for i in 0..dimension {
        header.push(format!("p_k{i}"));
        header.push(format!("p_l{i}"));
    }
    wtr.write_record(&header)?;

    for rec in &result.trace {
        let mut row = vec![rec.step.to_string(), rec.accepted.to_string()];
        row.extend(rec.k.iter().map(|v| format!("{:.6}", v)));
        row.extend(rec.l.iter().map(|v| format!("{:.6}", v)));
        row.extend(rec.p_diag.iter().map(|v| format!("{:.6e}", v)));
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

pub fn print_summary(result: &SessionResult, sensor: Option<&SensorModel>) {
    println!("\nSession Stats:");
    println!("  Steps:     {} ({} rejected)", result.steps, result.rejected);
    println!("  K:         {}", fmt_vec(&result.k));
    println!("  L:         {}", fmt_vec(&result.l));
    if let Some(sensor) = sensor {
        println!("  True K:    {}", fmt_vec(&sensor.k));
        println!("  True L:    {}", fmt_vec(&sensor.l));
    }
    println!("  Coverage:  {:.1}%", 100.0 * result.coverage);
    if let (Some(cal), Some(raw)) = (result.spread, result.raw_spread) {
        println!(
            "  |N|^2:     {:.4} +/- {:.4} (raw {:.4} +/- {:.4})",
            cal.mean, cal.std_dev, raw.mean, raw.std_dev
        );
    }
    println!("-----------------------------");
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{:.4}", x)).collect();
    format!("[{}]", parts.join(", "))
}
