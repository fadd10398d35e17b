//! Timing side-channel written by stage processes.
//!
//! A stage reports its own compute time as a JSON object with at least a
//! numeric `time` field (seconds). Anything else in the object is kept as
//! metadata.

use std::path::Path;

use serde_json::{Map, Value};

use crate::error::PipelineError;

/// Parsed contents of a timing file.
#[derive(Debug, Clone, PartialEq)]
pub struct StageTiming {
    pub time: f64,
    pub meta: Map<String, Value>,
}

/// Parses and validates timing JSON.
pub fn parse_timing(content: &str, path: &Path) -> Result<StageTiming, PipelineError> {
    let invalid = |reason: String| PipelineError::TimingFile {
        path: path.to_path_buf(),
        reason,
    };

    let value: Value =
        serde_json::from_str(content).map_err(|e| invalid(format!("not valid JSON: {e}")))?;
    let Value::Object(mut meta) = value else {
        return Err(invalid("expected a JSON object".to_string()));
    };
    let time = match meta.remove("time") {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| invalid(format!("'time' is not representable: {n}")))?,
        Some(other) => return Err(invalid(format!("'time' must be a number, got {other}"))),
        None => return Err(invalid("missing 'time' field".to_string())),
    };
    if !time.is_finite() || time < 0.0 {
        return Err(invalid(format!("'time' must be a non-negative number, got {time}")));
    }
    Ok(StageTiming { time, meta })
}

/// Reads and validates a timing file.
pub fn read_timing_file(path: &Path) -> Result<StageTiming, PipelineError> {
    let content = std::fs::read_to_string(path).map_err(|e| PipelineError::TimingFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_timing(&content, path)
}

/// Reads one key from the pre-stage timing file.
///
/// Returns `None` when the file, the key, or a numeric value is missing.
pub fn read_pre_timing(path: &Path, key: &str) -> Option<f64> {
    let content = std::fs::read_to_string(path).ok()?;
    let value: Value = serde_json::from_str(&content).ok()?;
    value.get(key)?.as_f64()
}
