//! Checkpoint snapshots of resolved evaluations.
//!
//! Each snapshot writes two artifacts into a directory and replaces any
//! previous ones: `results.csv` with one row per evaluation (parameters,
//! objective, elapsed seconds, status), and `results.json` mapping each
//! fingerprint to its objective. Files are written to a temporary name and
//! renamed into place.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use sx_types::SxResult;
use tracing::info;

use crate::evaluation::{Evaluation, EvaluationStatus};

pub const RECORDS_FILE: &str = "results.csv";
pub const OBJECTIVES_FILE: &str = "results.json";

/// Locations of the artifacts written by one checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointPaths {
    pub records: PathBuf,
    pub objectives: PathBuf,
}

/// Write a snapshot of `evaluations`. Unresolved entries are skipped; when
/// nothing is resolved no file is touched and `Ok(None)` is returned.
pub fn write_checkpoint(dir: &Path, evaluations: &[Evaluation]) -> SxResult<Option<CheckpointPaths>> {
    let resolved: Vec<&Evaluation> = evaluations.iter().filter(|e| e.is_resolved()).collect();
    if resolved.is_empty() {
        return Ok(None);
    }

    fs::create_dir_all(dir)?;
    let paths = CheckpointPaths {
        records: dir.join(RECORDS_FILE),
        objectives: dir.join(OBJECTIVES_FILE),
    };

    let columns: BTreeSet<&String> = resolved
        .iter()
        .flat_map(|e| e.configuration.names())
        .collect();

    let records_tmp = temp_path(&paths.records);
    {
        let mut writer = csv::Writer::from_path(&records_tmp)?;
        let mut header: Vec<&str> = columns.iter().map(|c| c.as_str()).collect();
        header.extend(["objective", "elapsed_sec", "status"]);
        writer.write_record(&header)?;

        for eval in &resolved {
            let mut row: Vec<String> = columns
                .iter()
                .map(|name| {
                    eval.configuration
                        .get(name)
                        .map(|v| v.to_string())
                        .unwrap_or_default()
                })
                .collect();
            row.push(eval.objective_or_sentinel().to_string());
            row.push(eval.finished_at.unwrap_or_default().to_string());
            row.push(status_label(eval.status).to_string());
            writer.write_record(&row)?;
        }
        writer.flush()?;
    }
    fs::rename(&records_tmp, &paths.records)?;

    let objectives: BTreeMap<&str, f64> = resolved
        .iter()
        .map(|e| (e.fingerprint.as_str(), e.objective_or_sentinel()))
        .collect();
    let objectives_tmp = temp_path(&paths.objectives);
    {
        let mut file = fs::File::create(&objectives_tmp)?;
        serde_json::to_writer_pretty(&mut file, &objectives)?;
        file.write_all(b"\n")?;
        file.sync_all()?;
    }
    fs::rename(&objectives_tmp, &paths.objectives)?;

    info!(
        evaluations = resolved.len(),
        dir = %dir.display(),
        "checkpoint written"
    );
    Ok(Some(paths))
}

/// Read back the fingerprint → objective map of a checkpoint.
pub fn read_objectives(path: &Path) -> SxResult<BTreeMap<String, f64>> {
    let file = fs::File::open(path)?;
    Ok(serde_json::from_reader(file)?)
}

fn status_label(status: EvaluationStatus) -> &'static str {
    match status {
        EvaluationStatus::Finished => "finished",
        EvaluationStatus::Failed => "failed",
        EvaluationStatus::Pending => "pending",
        EvaluationStatus::Requested => "requested",
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
