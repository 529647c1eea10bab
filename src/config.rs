use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub hashing: Hashing,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub search: Search,
    #[serde(default)]
    pub tiers: Tiers,
    #[serde(default)]
    pub render: Render,
    #[serde(default)]
    pub office: Office,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
    #[serde(default)]
    pub security: Security,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        cfg.validate()
            .with_context(|| format!("invalid config: {}", path.display()))?;
        Ok(cfg)
    }

    /// A stable, normalization-friendly string for hashing.
    pub fn normalized_for_hash(&self) -> String {
        toml::to_string(self).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.search;
        if s.dpi_min == 0 {
            bail!("search.dpi_min must be > 0");
        }
        if s.dpi_min > s.dpi_max {
            bail!("search.dpi_min ({}) > search.dpi_max ({})", s.dpi_min, s.dpi_max);
        }
        if s.min_step == 0 {
            bail!("search.min_step must be > 0");
        }
        if s.max_iterations == 0 {
            bail!("search.max_iterations must be > 0");
        }
        if !(s.tolerance_fraction >= 0.0 && s.tolerance_fraction.is_finite()) {
            bail!("search.tolerance_fraction must be a finite value >= 0");
        }
        if self.render.default_dpi == 0 {
            bail!("render.default_dpi must be > 0");
        }
        if self.render.jpeg_quality == 0 || self.render.jpeg_quality > 100 {
            bail!("render.jpeg_quality must be in 1..=100");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub job_name: String,
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            job_name: "default".into(),
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    pub scratch_dir: String,
    pub scripts_dir: String,
    pub log_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            scratch_dir: "".into(),
            scripts_dir: "scripts".into(),
            log_dir: ".pdf-zipper-logs".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hashing {
    pub mode: String,
    pub fast_window_bytes: u64,
}
impl Default for Hashing {
    fn default() -> Self {
        Self {
            mode: "fast_2x16mb".into(),
            fast_window_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    pub max_input_file_bytes: u64,
    pub min_target_bytes: u64,
}
impl Default for Limits {
    fn default() -> Self {
        Self {
            max_input_file_bytes: 2 * 1024 * 1024 * 1024,
            min_target_bytes: 16 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Search {
    pub dpi_min: u32,
    pub dpi_max: u32,
    pub min_step: u32,
    pub max_iterations: u32,
    pub tolerance_fraction: f64,
    pub tolerance_floor_bytes: u64,
}
impl Default for Search {
    fn default() -> Self {
        Self {
            dpi_min: 30,
            dpi_max: 300,
            min_step: 1,
            max_iterations: 10,
            tolerance_fraction: 0.05,
            tolerance_floor_bytes: 32 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tiers {
    pub draft_max_dpi: u32,
    pub high_min_dpi: u32,
}
impl Default for Tiers {
    fn default() -> Self {
        Self {
            draft_max_dpi: 110,
            high_min_dpi: 144,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Render {
    pub python_exe: String,
    pub default_dpi: u32,
    pub jpeg_quality: u8,
    pub call_timeout_seconds: u64,
}
impl Default for Render {
    fn default() -> Self {
        Self {
            python_exe: "auto".into(),
            default_dpi: 150,
            jpeg_quality: 85,
            call_timeout_seconds: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Office {
    pub soffice_exe: String,
    pub timeout_seconds: u64,
}
impl Default for Office {
    fn default() -> Self {
        Self {
            soffice_exe: "auto".into(),
            timeout_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub write_report_json: bool,
    pub report_suffix: String,
    pub overwrite: bool,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            write_report_json: false,
            report_suffix: ".report.json".into(),
            overwrite: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debug {
    pub keep_python_stderr: bool,
}
impl Default for Debug {
    fn default() -> Self {
        Self {
            keep_python_stderr: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    pub reject_url_inputs: bool,
    pub pin_scripts_dir: bool,
}
impl Default for Security {
    fn default() -> Self {
        Self {
            reject_url_inputs: true,
            pin_scripts_dir: false,
        }
    }
}
