use crate::{
    config::Config,
    engine::{Engine, python::PythonEngine},
    format::DocFormat,
    pipeline::{JobMode, JobRequest, Pipeline, default_output},
    policy::QualityTier,
    probe,
    progress::{CancelFlag, LogProgress, Progress, Silent},
    util::{fmt_mb, mb_to_bytes},
};
use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "pdf-zipper", version)]
#[command(about = "Compress PDF/PPTX files and convert between them, optionally to a target size")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./pdf-zipper.toml if present, else defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check the rendering helper and office converter.
    Doctor {},
    /// Show format, size, page count and page size of a file.
    Info {
        #[arg(long)]
        input: PathBuf,
    },
    /// Compress a file. With --target-size the format is kept and the DPI is searched.
    Compress(JobArgs),
    /// Convert PDF to PPTX or PPTX to PDF.
    Convert(JobArgs),
}

#[derive(clap::Args, Debug)]
pub struct JobArgs {
    #[arg(long)]
    pub input: PathBuf,
    #[arg(long, short)]
    pub output: Option<PathBuf>,
    /// Rendering resolution for a single pass.
    #[arg(long, short)]
    pub dpi: Option<u32>,
    /// Target output size in MB; enables the resolution search.
    #[arg(long, short = 's')]
    pub target_size: Option<f64>,
    /// Narrows the searched resolutions: draft, standard or high.
    #[arg(long)]
    pub tier: Option<QualityTier>,
    /// Suppress progress output.
    #[arg(long, short)]
    pub quiet: bool,
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg = match resolve_config_path(args.config.as_deref()) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    let log_path = resolve_log_path(&cfg);
    let _guard = init_logging(&args, &cfg, log_path.as_deref())?;

    match &args.cmd {
        Command::Doctor {} => doctor(&cfg),
        Command::Info { input } => info_cmd(&cfg, input),
        Command::Compress(job) => {
            let req = compress_request(&cfg, job)?;
            run(&cfg, req, job.quiet)
        }
        Command::Convert(job) => {
            let req = convert_request(&cfg, job)?;
            run(&cfg, req, job.quiet)
        }
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    let default = PathBuf::from("pdf-zipper.toml");
    default.exists().then_some(default)
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log dir: {}", parent.display()))?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from(&cfg.paths.log_dir).join("pdf-zipper.log"))
}

fn doctor(cfg: &Config) -> Result<()> {
    let engine = PythonEngine::new(cfg)?;
    let diag = engine.doctor()?;
    println!("{}", serde_json::to_string_pretty(&diag)?);
    Ok(())
}

fn info_cmd(cfg: &Config, input: &Path) -> Result<()> {
    let engine = PythonEngine::new(cfg)?;
    let doc = probe::inspect(cfg, &engine, input)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "file": input,
            "format": doc.input.format.description(),
            "size": fmt_mb(doc.input.file_bytes),
            "size_bytes": doc.input.file_bytes,
            "pages": doc.info.page_count,
            "width_pt": doc.info.width_pt,
            "height_pt": doc.info.height_pt,
            "width_in": doc.info.width_pt / 72.0,
            "height_in": doc.info.height_pt / 72.0,
        }))?
    );
    Ok(())
}

fn target_bytes(mb: f64) -> Result<u64> {
    let bytes = mb_to_bytes(mb);
    if bytes == 0 {
        bail!("--target-size must be a positive number of MB, got {mb}");
    }
    Ok(bytes)
}

fn input_format(input: &Path) -> Result<DocFormat> {
    DocFormat::from_path(input).ok_or_else(|| {
        anyhow!(
            "unsupported file type: {} (supported: {})",
            input.display(),
            DocFormat::supported_list()
        )
    })
}

/// Target mode keeps the format; a plain PDF pass recompresses at a fixed DPI;
/// a plain PPTX pass converts it to PDF.
fn compress_request(cfg: &Config, a: &JobArgs) -> Result<JobRequest> {
    let source = input_format(&a.input)?;
    let (format, mode) = match (a.target_size, a.dpi, source) {
        (Some(mb), dpi, _) => {
            if dpi.is_some() {
                warn!("--dpi is ignored when --target-size is given");
            }
            (source, JobMode::Target { bytes: target_bytes(mb)? })
        }
        (None, dpi, DocFormat::Pdf) => (
            DocFormat::Pdf,
            JobMode::Fixed {
                dpi: dpi.unwrap_or(cfg.render.default_dpi),
            },
        ),
        (None, Some(dpi), DocFormat::Pptx) => (DocFormat::Pdf, JobMode::Fixed { dpi }),
        (None, None, DocFormat::Pptx) => (DocFormat::Pdf, JobMode::Direct),
    };
    Ok(request(a, format, mode))
}

fn convert_request(cfg: &Config, a: &JobArgs) -> Result<JobRequest> {
    let source = input_format(&a.input)?;
    let format = source.counterpart();
    let mode = match (a.target_size, a.dpi, source) {
        (Some(mb), _, _) => JobMode::Target { bytes: target_bytes(mb)? },
        (None, None, DocFormat::Pptx) => JobMode::Direct,
        (None, dpi, _) => JobMode::Fixed {
            dpi: dpi.unwrap_or(cfg.render.default_dpi),
        },
    };
    Ok(request(a, format, mode))
}

fn request(a: &JobArgs, format: DocFormat, mode: JobMode) -> JobRequest {
    JobRequest {
        input: a.input.clone(),
        output: a
            .output
            .clone()
            .unwrap_or_else(|| default_output(&a.input, format, mode)),
        format,
        mode,
        tier: a.tier,
    }
}

fn run(cfg: &Config, req: JobRequest, quiet: bool) -> Result<()> {
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel())
            .map_err(|e| anyhow!("failed to set Ctrl+C handler: {e}"))?;
    }

    let console = |msg: &str| eprintln!("{msg}");
    let progress: &dyn Progress = match (quiet, cfg.logging.json) {
        (true, _) => &Silent,
        (false, true) => &LogProgress,
        (false, false) => &console,
    };

    let engine = PythonEngine::new(cfg)?;
    let pipeline = Pipeline::new(cfg, engine);
    info!(
        "{} -> {} ({:?})",
        req.input.display(),
        req.output.display(),
        req.mode
    );
    let report = pipeline.run_job(&req, progress, &cancel)?;

    if cfg.global.print_summary {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "job_id": report.job_id,
                "output": report.output,
                "bytes": report.result.bytes,
                "dpi": report.result.dpi,
                "target_met": report.result.target_met,
                "status": "ok",
            }))?
        );
    }

    Ok(())
}
