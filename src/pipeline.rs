use crate::{
    chain::{Chain, ChainRenderer, Renderer},
    config::{Config, Hashing},
    engine::Engine,
    error::ConvertError,
    format::DocFormat,
    policy::QualityTier,
    probe::{self, InputProbe},
    progress::{CancelFlag, Progress},
    report::{JobReport, ResultReport},
    scratch::Scratch,
    search::{ConversionJob, Converger, JobContext, SearchParams},
    util::{fmt_mb, timestamp},
};
use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobMode {
    /// Search for the resolution whose output lands near `bytes`.
    Target { bytes: u64 },
    /// Single render at a caller-chosen resolution.
    Fixed { dpi: u32 },
    /// Office conversion only, no rasterization.
    Direct,
}

#[derive(Debug, Clone)]
pub struct JobRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: DocFormat,
    pub mode: JobMode,
    pub tier: Option<QualityTier>,
}

pub struct Pipeline<E: Engine> {
    cfg: Config,
    renderer: ChainRenderer<E>,
}

impl<E: Engine> Pipeline<E> {
    pub fn new(cfg: &Config, engine: E) -> Self {
        Self {
            cfg: cfg.clone(),
            renderer: ChainRenderer::new(engine),
        }
    }

    pub fn scratch_root(&self) -> PathBuf {
        if self.cfg.paths.scratch_dir.is_empty() {
            std::env::temp_dir().join("pdf-zipper")
        } else {
            PathBuf::from(&self.cfg.paths.scratch_dir)
        }
    }

    pub fn run_job(
        &self,
        req: &JobRequest,
        progress: &dyn Progress,
        cancel: &CancelFlag,
    ) -> Result<JobReport> {
        let started = timestamp();

        let input = match probe::probe_input(&self.cfg, &req.input) {
            Ok(p) => p,
            Err(err) => {
                progress.report(&format!("Error: {err}"));
                return Err(err.into());
            }
        };
        let fail = |e: &anyhow::Error| progress.report(&format!("Error: {e:#}"));
        self.check_output(req).inspect_err(fail)?;

        let job_id = self.job_id(req).inspect_err(fail)?;
        let label = scratch_label(&self.cfg.global.job_name, &job_id);
        let scratch_root = self.scratch_root();
        let chain = Chain::plan(input.format, req.format);
        info!(
            "job_id={job_id} input={} ({}, {}) output={} mode={:?}",
            input.path,
            input.format,
            fmt_mb(input.file_bytes),
            req.output.display(),
            req.mode
        );

        let ctx = JobContext {
            scratch_root: &scratch_root,
            progress,
            cancel,
        };

        let result = match req.mode {
            JobMode::Target { bytes } => {
                let params = SearchParams::from_config(&self.cfg).inspect_err(fail)?;
                let job = ConversionJob {
                    input: req.input.clone(),
                    output: req.output.clone(),
                    target_bytes: bytes,
                    format: req.format,
                    tier: req.tier,
                    label,
                };
                let outcome = Converger::new(&self.renderer, params).search(&job, &ctx)?;
                ResultReport::from_search(outcome, input.file_bytes)
            }
            JobMode::Fixed { dpi } => {
                let bytes = self
                    .render_fixed(req, &input, dpi, &label, &ctx)
                    .inspect_err(fail)?;
                ResultReport::single(Some(dpi), bytes, input.file_bytes)
            }
            JobMode::Direct => {
                let bytes = self
                    .convert_direct(req, &input, &label, &ctx)
                    .inspect_err(fail)?;
                ResultReport::single(None, bytes, input.file_bytes)
            }
        };

        progress.report(&format!(
            "Done: {} -> {} ({:.2}% smaller), saved to {}",
            fmt_mb(input.file_bytes),
            fmt_mb(result.bytes),
            result.reduction_percent,
            req.output.display()
        ));

        let report = JobReport {
            job_name: self.cfg.global.job_name.clone(),
            job_id,
            started,
            finished: timestamp(),
            input,
            output: req.output.display().to_string(),
            output_format: req.format,
            mode: req.mode,
            chain,
            result,
        };

        if self.cfg.output.write_report_json {
            let mut path = req.output.clone().into_os_string();
            path.push(&self.cfg.output.report_suffix);
            let path = PathBuf::from(path);
            serde_json::to_string_pretty(&report)
                .map_err(anyhow::Error::from)
                .and_then(|json| {
                    std::fs::write(&path, json)
                        .with_context(|| format!("writing report: {}", path.display()))
                })
                .inspect_err(fail)?;
        }

        Ok(report)
    }

    fn check_output(&self, req: &JobRequest) -> Result<()> {
        if DocFormat::from_path(&req.output) != Some(req.format) {
            warn!(
                "output {} does not carry a .{} extension",
                req.output.display(),
                req.format
            );
        }
        if req.output.exists() {
            if !self.cfg.output.overwrite {
                bail!(
                    "output exists and output.overwrite=false: {}",
                    req.output.display()
                );
            }
            let same = match (req.input.canonicalize(), req.output.canonicalize()) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            };
            if same {
                bail!("output would overwrite the input: {}", req.output.display());
            }
        }
        Ok(())
    }

    /// Hex SHA-256 over the config, the input fingerprint, the mode and the output format.
    fn job_id(&self, req: &JobRequest) -> Result<String> {
        let mut h = Sha256::new();
        h.update(self.cfg.normalized_for_hash().as_bytes());
        fingerprint_input(&mut h, &self.cfg.hashing, &req.input)
            .with_context(|| format!("hashing input: {}", req.input.display()))?;
        h.update(serde_json::to_vec(&req.mode)?);
        h.update(req.format.extension().as_bytes());
        Ok(format!("{:x}", h.finalize()))
    }

    fn render_fixed(
        &self,
        req: &JobRequest,
        input: &InputProbe,
        dpi: u32,
        label: &str,
        ctx: &JobContext<'_>,
    ) -> Result<u64> {
        if !self.renderer.supports(input.format, req.format) {
            bail!("cannot produce {} from {}", req.format, input.format);
        }
        if ctx.cancel.is_cancelled() {
            return Err(ConvertError::Cancelled { iterations: 0 }.into());
        }
        let scratch = Scratch::create(ctx.scratch_root, label)?;
        let result = (|| -> Result<u64> {
            let prepared = self
                .renderer
                .prepare(&req.input, input.format, req.format, &scratch)
                .map_err(|e| ConvertError::step(ctx.cancel, dpi, 0, &e))?;
            let document = prepared.as_ref().map_or(req.input.as_path(), |f| f.path());
            if ctx.cancel.is_cancelled() {
                return Err(ConvertError::Cancelled { iterations: 0 }.into());
            }
            ctx.progress
                .report(&format!("Rendering {} at {dpi} dpi...", req.format));
            let artifact = self
                .renderer
                .render(document, dpi, req.format, &scratch)
                .map_err(|e| ConvertError::step(ctx.cancel, dpi, 1, &e))?;
            let bytes = artifact.size()?;
            artifact.promote(&req.output)?;
            Ok(bytes)
        })();
        close_scratch(scratch);
        result
    }

    fn convert_direct(
        &self,
        req: &JobRequest,
        input: &InputProbe,
        label: &str,
        ctx: &JobContext<'_>,
    ) -> Result<u64> {
        if ctx.cancel.is_cancelled() {
            return Err(ConvertError::Cancelled { iterations: 0 }.into());
        }
        let scratch = Scratch::create(ctx.scratch_root, label)?;
        let result = (|| -> Result<u64> {
            ctx.progress.report(&format!(
                "Converting {} to {}...",
                input.format, req.format
            ));
            let converted = self
                .renderer
                .prepare(&req.input, input.format, req.format, &scratch)
                .map_err(|e| {
                    if ctx.cancel.is_cancelled() {
                        ConvertError::Cancelled { iterations: 0 }.into()
                    } else {
                        e
                    }
                })?
                .ok_or_else(|| {
                    anyhow!(
                        "no direct conversion from {} to {}; pass a DPI",
                        input.format,
                        req.format
                    )
                })?;
            let bytes = converted.size()?;
            converted.promote(&req.output)?;
            Ok(bytes)
        })();
        close_scratch(scratch);
        result
    }
}

fn close_scratch(scratch: Scratch) {
    let path: PathBuf = scratch.path().to_path_buf();
    if let Err(err) = scratch.close() {
        warn!("failed to remove scratch dir {}: {err}", path.display());
    }
}

/// Feeds the input into `h`: every byte for `full_sha256`, else the head and
/// tail windows plus the length.
fn fingerprint_input(h: &mut Sha256, cfg: &Hashing, path: &Path) -> Result<()> {
    let mut f = File::open(path).with_context(|| "open input")?;
    let size = f.metadata().with_context(|| "input metadata")?.len();
    match cfg.mode.as_str() {
        "full_sha256" => {
            std::io::copy(&mut f, h)?;
        }
        "fast_2x16mb" => {
            let window = cfg.fast_window_bytes.min(size);
            if window > 0 {
                let mut buf = vec![0u8; window as usize];
                f.read_exact(&mut buf)?;
                h.update(&buf);
                if size > window {
                    f.seek(SeekFrom::Start(size - window))?;
                    f.read_exact(&mut buf)?;
                    h.update(&buf);
                }
            }
            h.update(size.to_le_bytes());
        }
        other => bail!("unknown hashing.mode: {other}"),
    }
    Ok(())
}

/// Scratch directory prefix: the job name reduced to `[A-Za-z0-9_-]`, then the
/// first 12 hex digits of the job id.
pub fn scratch_label(job_name: &str, job_id: &str) -> String {
    let name: String = job_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let name = if name.is_empty() { "pz" } else { name.as_str() };
    let id = job_id.get(..12).unwrap_or(job_id);
    format!("{name}-{id}")
}

/// Default output path next to the input.
pub fn default_output(input: &Path, format: DocFormat, mode: JobMode) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let same_format = DocFormat::from_path(input) == Some(format);
    let name = match mode {
        JobMode::Target { .. } => format!("{stem}_auto_compressed.{}", format.extension()),
        JobMode::Fixed { .. } if same_format => {
            format!("{stem}_compressed.{}", format.extension())
        }
        _ => format!("{stem}.{}", format.extension()),
    };
    input.with_file_name(name)
}
