//! Timing/provenance log kept as one JSON document:
//! `{task: {operation: [{filename, filesize, start, end, duration}, ...]}}`.
//!
//! Every call reads the whole file, appends in memory and rewrites it. There
//! is no locking: two processes sharing a log path can lose each other's
//! entries (last writer wins). Use one log file per concurrent writer.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeLogEntry {
    pub filename: Option<String>,
    pub filesize: u64,
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

/// Seconds since the Unix epoch as a float.
pub fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Size of `target` in bytes, or 0 when absent, empty or unreadable.
fn file_size(target: Option<&Path>) -> u64 {
    match target {
        Some(path) if !path.as_os_str().is_empty() => {
            std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
        }
        _ => 0,
    }
}

pub fn time_log(
    log_file: &Path,
    task_name: &str,
    op_name: &str,
    target: Option<&Path>,
    start: f64,
    end: f64,
) -> Result<()> {
    if !log_file.exists() {
        std::fs::write(log_file, "{}")?;
    }

    let text = std::fs::read_to_string(log_file).map_err(|source| Error::Read {
        path: log_file.to_path_buf(),
        source,
    })?;
    let mut log: Map<String, Value> = match serde_json::from_str::<Value>(&text)? {
        Value::Object(map) => map,
        other => {
            return Err(Error::TimeLog(format!(
                "{} does not hold a JSON object (found {})",
                log_file.display(),
                other
            )))
        }
    };

    let entry = TimeLogEntry {
        filename: target.map(|p| p.to_string_lossy().into_owned()),
        filesize: file_size(target),
        start,
        end,
        duration: end - start,
    };

    let task = log
        .entry(task_name.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    let ops = task.as_object_mut().ok_or_else(|| {
        Error::TimeLog(format!("task '{}' is not a JSON object", task_name))
    })?;
    let entries = ops
        .entry(op_name.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    entries
        .as_array_mut()
        .ok_or_else(|| {
            Error::TimeLog(format!(
                "operation '{}/{}' is not a JSON array",
                task_name, op_name
            ))
        })?
        .push(serde_json::to_value(&entry)?);

    std::fs::write(log_file, serde_json::to_string(&log)?)?;
    Ok(())
}

/// Reads back all entries recorded under `task/op`.
pub fn read_entries(log_file: &Path, task_name: &str, op_name: &str) -> Result<Vec<TimeLogEntry>> {
    let text = std::fs::read_to_string(log_file).map_err(|source| Error::Read {
        path: log_file.to_path_buf(),
        source,
    })?;
    let log: Value = serde_json::from_str(&text)?;
    match log.get(task_name).and_then(|t| t.get(op_name)) {
        Some(entries) => Ok(serde_json::from_value(entries.clone())?),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_log_and_appends_in_call_order() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("timelog.json");

        time_log(&log, "mgdm_segmentation", "read", None, 1.0, 2.5).unwrap();
        time_log(&log, "mgdm_segmentation", "read", None, 3.0, 3.25).unwrap();

        let entries = read_entries(&log, "mgdm_segmentation", "read").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].start, 1.0);
        assert_eq!(entries[0].duration, 1.5);
        assert_eq!(entries[1].start, 3.0);
        assert_eq!(entries[1].duration, 0.25);
    }

    #[test]
    fn filesize_is_the_target_size_in_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("timelog.json");
        let target = tmp.path().join("seg.nii");
        std::fs::write(&target, vec![7u8; 1234]).unwrap();

        time_log(&log, "task", "write", Some(&target), 0.0, 1.0).unwrap();
        time_log(&log, "task", "write", Some(Path::new("")), 0.0, 1.0).unwrap();
        time_log(&log, "task", "write", Some(&tmp.path().join("gone.nii")), 0.0, 1.0).unwrap();
        time_log(&log, "task", "write", None, 0.0, 1.0).unwrap();

        let entries = read_entries(&log, "task", "write").unwrap();
        let sizes: Vec<u64> = entries.iter().map(|e| e.filesize).collect();
        assert_eq!(sizes, vec![1234, 0, 0, 0]);
        assert_eq!(entries[3].filename, None);
    }

    #[test]
    fn keeps_other_tasks_and_operations() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("timelog.json");
        std::fs::write(&log, r#"{"earlier": {"makespan": []}}"#).unwrap();

        time_log(&log, "cruise_cortex_extraction", "read", None, 0.0, 1.0).unwrap();
        time_log(&log, "cruise_cortex_extraction", "write", None, 1.0, 2.0).unwrap();

        let doc: Value = serde_json::from_str(&std::fs::read_to_string(&log).unwrap()).unwrap();
        assert!(doc["earlier"]["makespan"].as_array().unwrap().is_empty());
        assert_eq!(doc["cruise_cortex_extraction"]["read"].as_array().unwrap().len(), 1);
        assert_eq!(doc["cruise_cortex_extraction"]["write"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn non_object_document_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("timelog.json");
        std::fs::write(&log, "[1, 2]").unwrap();
        let err = time_log(&log, "task", "read", None, 0.0, 1.0).unwrap_err();
        assert!(matches!(err, Error::TimeLog(_)));
    }
}
