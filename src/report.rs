use crate::{
    chain::Chain,
    format::DocFormat,
    pipeline::JobMode,
    probe::InputProbe,
    search::{SearchOutcome, StopReason, Trial},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_name: String,
    pub job_id: String,
    pub started: String,
    pub finished: String,
    pub input: InputProbe,
    pub output: String,
    pub output_format: DocFormat,
    pub mode: JobMode,
    pub chain: Chain,
    pub result: ResultReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultReport {
    pub dpi: Option<u32>,
    pub bytes: u64,
    /// Percent saved relative to the input; negative when the output grew.
    pub reduction_percent: f64,
    #[serde(default)]
    pub target_bytes: Option<u64>,
    #[serde(default)]
    pub target_met: Option<bool>,
    #[serde(default)]
    pub stop: Option<StopReason>,
    #[serde(default)]
    pub trials: Vec<Trial>,
}

impl ResultReport {
    pub fn single(dpi: Option<u32>, bytes: u64, input_bytes: u64) -> Self {
        Self {
            dpi,
            bytes,
            reduction_percent: reduction_percent(input_bytes, bytes),
            target_bytes: None,
            target_met: None,
            stop: None,
            trials: Vec::new(),
        }
    }

    pub fn from_search(outcome: SearchOutcome, input_bytes: u64) -> Self {
        Self {
            dpi: outcome.dpi,
            bytes: outcome.bytes,
            reduction_percent: reduction_percent(input_bytes, outcome.bytes),
            target_bytes: Some(outcome.target_bytes),
            target_met: Some(outcome.target_met),
            stop: Some(outcome.stop),
            trials: outcome.trials,
        }
    }
}

pub fn reduction_percent(original: u64, result: u64) -> f64 {
    if original == 0 {
        return 0.0;
    }
    (1.0 - result as f64 / original as f64) * 100.0
}
