use anyhow::{Context, Result};
use chrono::DateTime;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::models::GoalResult;

/// CSV sink for the qualifying-wallet lists. The engine hands this module an
/// ordered, deduplicated list per goal; everything here is formatting.
///
/// One file per goal, named `goal_<seq>_<id>.csv`. The wallet column keeps
/// the original reports' `wallet_addresses` header; replay runs add a
/// `qualified_at` column with RFC 3339 timestamps, sweep runs omit it.
pub fn write_reports(
    out_dir: &Path,
    results: &[GoalResult],
    with_timestamps: bool,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create report directory {}", out_dir.display()))?;

    let mut written = Vec::with_capacity(results.len());
    for result in results {
        let path = out_dir.join(format!("goal_{}_{}.csv", result.goal_seq, result.goal_id));
        let file = File::create(&path)
            .with_context(|| format!("failed to create report {}", path.display()))?;
        write_report(file, result, with_timestamps)
            .with_context(|| format!("failed to write report {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

pub fn write_report<W: Write>(
    writer: W,
    result: &GoalResult,
    with_timestamps: bool,
) -> Result<()> {
    let mut csv = csv::WriterBuilder::new().from_writer(writer);
    if with_timestamps {
        csv.write_record(["wallet_addresses", "qualified_at"])?;
        for (wallet, ts) in &result.rows {
            csv.write_record([format!("{wallet:?}"), format_timestamp(*ts)])?;
        }
    } else {
        csv.write_record(["wallet_addresses"])?;
        for (wallet, _) in &result.rows {
            csv.write_record([format!("{wallet:?}")])?;
        }
    }
    csv.flush()?;
    Ok(())
}

fn format_timestamp(ts: Option<i64>) -> String {
    ts.and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Address;

    fn result_fixture() -> GoalResult {
        GoalResult {
            goal_seq: 7,
            goal_id: "owns_1_pet".to_string(),
            rows: vec![
                (Address::from_low_u64_be(1), Some(1_700_000_000)),
                (Address::from_low_u64_be(2), None),
            ],
        }
    }

    fn rendered(with_timestamps: bool) -> String {
        let mut buf = Vec::new();
        write_report(&mut buf, &result_fixture(), with_timestamps).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_timestamped_report_shape() {
        let text = rendered(true);
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("wallet_addresses,qualified_at"));
        assert_eq!(
            lines.next(),
            Some("0x0000000000000000000000000000000000000001,2023-11-14T22:13:20Z")
        );
        // Unknown acquisition time renders as an empty cell, not a zero.
        assert_eq!(
            lines.next(),
            Some("0x0000000000000000000000000000000000000002,")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_sweep_report_has_single_column() {
        let text = rendered(false);
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("wallet_addresses"));
        assert_eq!(
            lines.next(),
            Some("0x0000000000000000000000000000000000000001")
        );
        assert_eq!(
            lines.next(),
            Some("0x0000000000000000000000000000000000000002")
        );
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_report_files_are_named_by_goal() {
        let dir = std::env::temp_dir().join(format!(
            "goal-report-test-{}",
            std::process::id()
        ));
        let written = write_reports(&dir, &[result_fixture()], false).unwrap();
        assert_eq!(written.len(), 1);
        assert!(written[0].ends_with("goal_7_owns_1_pet.csv"));
        assert!(written[0].exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
