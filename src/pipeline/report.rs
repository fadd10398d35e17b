//! Per-stage timing records and the flat timing report.
//!
//! The report is written as one flat JSON object whose key shape is read by
//! the cross-mode comparison tooling:
//!
//! ```text
//! generate_data_time, generate_data_wall_time,
//! check_structure_time, check_structure_wall_time,
//! <stage>_time, [<stage>_upload_time, <stage>_download_time, <stage>_total_time,]
//! <stage>_wall_time, <stage>_location
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use tracing::debug;

use super::stage::Stage;
use crate::error::PipelineError;
use crate::plan::Location;

/// Normalized timing of one stage, identical in shape for both locations.
///
/// Times are in seconds. Upload and download are only present for remote
/// runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingRecord {
    pub stage: Stage,
    pub location: Location,
    /// Compute time self-reported by the stage process.
    pub compute_time: f64,
    pub upload_time: Option<f64>,
    pub download_time: Option<f64>,
    /// Measured by the orchestrator around the whole dispatch.
    pub wall_time: f64,
}

impl TimingRecord {
    pub fn local(stage: Stage, compute_time: f64) -> Self {
        Self {
            stage,
            location: Location::Local,
            compute_time,
            upload_time: None,
            download_time: None,
            wall_time: 0.0,
        }
    }

    pub fn remote(stage: Stage, compute_time: f64, upload_time: f64, download_time: f64) -> Self {
        Self {
            stage,
            location: Location::Remote,
            compute_time,
            upload_time: Some(upload_time),
            download_time: Some(download_time),
            wall_time: 0.0,
        }
    }

    /// Sets the orchestrator-measured wall time.
    pub fn with_wall_time(mut self, wall: Duration) -> Self {
        self.wall_time = wall.as_secs_f64();
        self
    }

    /// `compute + upload + download`; absent parts count as zero.
    pub fn total_time(&self) -> f64 {
        self.compute_time + self.upload_time.unwrap_or(0.0) + self.download_time.unwrap_or(0.0)
    }

    /// Report entries for this record, in output order.
    fn entries(&self) -> Vec<(String, ReportValue)> {
        let name = self.stage.report_name();
        let mut entries = vec![(format!("{name}_time"), ReportValue::Seconds(self.compute_time))];
        if self.location == Location::Remote {
            entries.push((
                format!("{name}_upload_time"),
                ReportValue::Seconds(self.upload_time.unwrap_or(0.0)),
            ));
            entries.push((
                format!("{name}_download_time"),
                ReportValue::Seconds(self.download_time.unwrap_or(0.0)),
            ));
            entries.push((format!("{name}_total_time"), ReportValue::Seconds(self.total_time())));
        }
        entries.push((format!("{name}_wall_time"), ReportValue::Seconds(self.wall_time)));
        if self.stage.is_remote_eligible() {
            entries.push((format!("{name}_location"), ReportValue::Location(self.location)));
        }
        entries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
enum ReportValue {
    Seconds(f64),
    Location(Location),
}

/// Timing records in creation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimingReport {
    records: Vec<TimingRecord>,
}

impl TimingReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record. Records are never modified afterwards.
    pub fn push(&mut self, record: TimingRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[TimingRecord] {
        &self.records
    }

    /// The flat report as a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    /// Writes the report as pretty JSON, creating parent directories.
    pub fn write_to(&self, path: &Path) -> Result<(), PipelineError> {
        let report_err = |reason: String| PipelineError::Report {
            path: path.to_path_buf(),
            reason,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| report_err(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| report_err(e.to_string()))?;
        fs::write(path, json).map_err(|e| report_err(e.to_string()))?;
        debug!("Saved timing report to {}", path.display());
        Ok(())
    }

    /// `key: value` lines for the end-of-run summary.
    pub fn summary_lines(&self) -> Vec<String> {
        self.records
            .iter()
            .flat_map(TimingRecord::entries)
            .map(|(key, value)| match value {
                ReportValue::Seconds(s) => format!("{key}: {s:.3}s"),
                ReportValue::Location(l) => format!("{key}: {l}"),
            })
            .collect()
    }
}

impl Serialize for TimingReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let entries: Vec<_> = self.records.iter().flat_map(TimingRecord::entries).collect();
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in &entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
