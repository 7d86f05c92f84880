use chrono::{DateTime, Utc};
use plsync_core::commit::PendingCommit;
use plsync_core::controller::{BatchReport, Outcome};
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    // Calculate column widths
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let header_row: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
        .collect();
    println!("{}", header_row.join("  ").trim_end());

    let sep: Vec<String> = widths.iter().map(|&w| "-".repeat(w)).collect();
    println!("{}", sep.join("  "));

    for row in &rows {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let w = widths.get(i).copied().unwrap_or(0);
                format!("{:width$}", cell, width = w)
            })
            .collect();
        println!("{}", cells.join("  ").trim_end());
    }
}

pub fn timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn short(digest: &str) -> &str {
    &digest[..digest.len().min(12)]
}

fn outcome_detail(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Applied { commit } => format!(
            "{} pending, rolls back at {} unless confirmed",
            short(&commit.digest),
            timestamp(commit.deadline)
        ),
        Outcome::Confirmed { commit } => format!("{} confirmed", short(&commit.digest)),
        Outcome::RolledBack { commit } => format!(
            "window closed at {}; device reverted, confirm not sent",
            timestamp(commit.deadline)
        ),
        Outcome::NothingPending => "-".to_string(),
        Outcome::Failed { kind, message } => format!("{kind}: {message}"),
    }
}

/// Per-router table plus a warning block for outcomes needing an operator.
pub fn print_report(report: &BatchReport, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(report);
    }
    if report.outcomes.is_empty() {
        println!("No routers to process.");
        return Ok(());
    }
    let rows = report
        .outcomes
        .iter()
        .map(|o| {
            vec![
                o.router.clone(),
                o.hostname.clone(),
                o.outcome.label().to_string(),
                outcome_detail(&o.outcome),
            ]
        })
        .collect();
    print_table(&["ROUTER", "HOSTNAME", "RESULT", "DETAIL"], rows);

    let attention: Vec<_> = report.needs_attention().collect();
    if !attention.is_empty() {
        eprintln!();
        for o in attention {
            eprintln!(
                "WARNING: {} ({}) outcome unknown; check the device with 'show system commit' before retrying",
                o.router, o.hostname
            );
        }
    }
    Ok(())
}

pub fn pending_rows(entries: &[PendingCommit], now: DateTime<Utc>) -> Vec<Vec<String>> {
    entries
        .iter()
        .map(|e| {
            let remaining = e.remaining(now);
            vec![
                e.router.clone(),
                e.hostname.clone(),
                e.state.to_string(),
                short(&e.digest).to_string(),
                timestamp(e.applied_at),
                timestamp(e.deadline),
                if remaining.is_zero() {
                    "-".to_string()
                } else {
                    format!("{}m{:02}s", remaining.num_minutes(), remaining.num_seconds() % 60)
                },
            ]
        })
        .collect()
}
