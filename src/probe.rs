use crate::{config::Config, engine::DocInfo, engine::Engine, error::ConvertError, format::DocFormat};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Size probe: byte length of an artifact on disk.
pub fn size_of(path: &Path) -> std::io::Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputProbe {
    pub path: String,
    pub format: DocFormat,
    pub file_bytes: u64,
}

/// Checks that `input` is a readable document this tool handles.
pub fn probe_input(cfg: &Config, input: &Path) -> Result<InputProbe, ConvertError> {
    let input_str = input.display().to_string();

    if cfg.security.reject_url_inputs && looks_like_url(&input_str) {
        return Err(ConvertError::input(format!("URL inputs are disabled: {input_str}")));
    }

    let meta = std::fs::metadata(input)
        .map_err(|e| ConvertError::input(format!("input not readable: {input_str}: {e}")))?;
    if !meta.is_file() {
        return Err(ConvertError::input(format!("input is not a file: {input_str}")));
    }

    let format = DocFormat::from_path(input).ok_or_else(|| {
        ConvertError::input(format!(
            "unsupported file type: {input_str} (supported: {})",
            DocFormat::supported_list()
        ))
    })?;

    let file_bytes = meta.len();
    if file_bytes == 0 {
        return Err(ConvertError::input(format!("input is empty: {input_str}")));
    }
    if file_bytes > cfg.limits.max_input_file_bytes {
        return Err(ConvertError::input(format!(
            "input exceeds max_input_file_bytes: {file_bytes}"
        )));
    }

    Ok(InputProbe {
        path: input_str,
        format,
        file_bytes,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentReport {
    pub input: InputProbe,
    pub info: DocInfo,
}

/// Input probe plus page/slide details from the engine.
pub fn inspect(cfg: &Config, engine: &dyn Engine, input: &Path) -> Result<DocumentReport> {
    let probe = probe_input(cfg, input)?;
    let info = engine
        .inspect(input, probe.format)
        .with_context(|| "engine inspect failed")?;
    if info.page_count == 0 {
        anyhow::bail!("input has zero pages");
    }
    Ok(DocumentReport { input: probe, info })
}

fn looks_like_url(s: &str) -> bool {
    let s = s.to_ascii_lowercase();
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with("file://")
}
