//! Batch summary table

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::config::ProbeId;
use crate::error::Result;

pub const BATCH_SUMMARY_FILE: &str = "batch_summary.csv";
pub const STATUS_EXPORT_FAILED: &str = "EXPORT_FAILED";

const FIXED_COLUMNS: [&str; 5] = ["probe", "status", "ks_dir", "save_path", "error"];

/// One row of `batch_summary.csv`.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub probe: ProbeId,
    pub status: String,
    pub ks_dir: PathBuf,
    pub save_path: PathBuf,
    pub error: Option<String>,
    /// Unit-type counts; empty when the engine never produced labels
    pub counts: BTreeMap<String, usize>,
}

/// Count unit types, most frequent first, ties by name.
pub fn unit_type_counts(unit_types: &[String]) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for unit_type in unit_types {
        *counts.entry(unit_type.as_str()).or_default() += 1;
    }
    let mut sorted: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(name, count)| (name.to_string(), count))
        .collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted
}

/// Write the summary with fixed columns, then one `n_<type>` column per
/// unit type seen in any row, sorted by name.
pub fn write_batch_summary(path: &Path, rows: &[SummaryRow]) -> Result<()> {
    let unit_types: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.counts.keys().map(String::as_str))
        .collect();

    let mut writer = csv::Writer::from_path(path)?;
    let mut header: Vec<String> = FIXED_COLUMNS.iter().map(|c| c.to_string()).collect();
    header.extend(unit_types.iter().map(|t| format!("n_{}", t)));
    writer.write_record(&header)?;

    for row in rows {
        let mut record = vec![
            row.probe.to_string(),
            row.status.clone(),
            row.ks_dir.display().to_string(),
            row.save_path.display().to_string(),
            row.error.clone().unwrap_or_default(),
        ];
        for unit_type in &unit_types {
            record.push(match row.counts.get(*unit_type) {
                Some(count) => count.to_string(),
                None if row.counts.is_empty() => String::new(),
                None => "0".to_string(),
            });
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_counts_sorted_by_frequency_then_name() {
        let counts = unit_type_counts(&labels(&["MUA", "GOOD", "NOISE", "MUA", "GOOD", "MUA"]));
        assert_eq!(
            counts,
            vec![
                ("MUA".to_string(), 3),
                ("GOOD".to_string(), 2),
                ("NOISE".to_string(), 1)
            ]
        );
    }

    #[test]
    fn test_summary_columns() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(BATCH_SUMMARY_FILE);
        let rows = vec![
            SummaryRow {
                probe: ProbeId::A,
                status: "OK".to_string(),
                ks_dir: PathBuf::from("/s/kilosort4_A"),
                save_path: PathBuf::from("/s/kilosort4_A/bombcell/batch"),
                error: None,
                counts: BTreeMap::from([("MUA".to_string(), 2), ("GOOD".to_string(), 1)]),
            },
            SummaryRow {
                probe: ProbeId::B,
                status: "FAILED".to_string(),
                ks_dir: PathBuf::from("/s/kilosort4_B"),
                save_path: PathBuf::from("/s/kilosort4_B/bombcell/batch"),
                error: Some("Metrics engine error: boom".to_string()),
                counts: BTreeMap::new(),
            },
        ];

        write_batch_summary(&path, &rows).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines[0], "probe,status,ks_dir,save_path,error,n_GOOD,n_MUA");
        assert_eq!(lines[1], "A,OK,/s/kilosort4_A,/s/kilosort4_A/bombcell/batch,,1,2");
        assert_eq!(
            lines[2],
            "B,FAILED,/s/kilosort4_B,/s/kilosort4_B/bombcell/batch,Metrics engine error: boom,,"
        );
    }
}
