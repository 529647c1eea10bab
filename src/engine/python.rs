use super::{
    Engine,
    office::OfficeConverter,
    process::{timeout_from_secs, wait},
    types::*,
};
use crate::{config::Config, format::DocFormat};
use anyhow::{Context, Result, anyhow};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, warn};

const SCRIPT: &str = "doc_render.py";

/// Engine backed by a Python helper (PyMuPDF, Pillow, python-pptx) spoken to
/// over JSON on stdin/stdout, plus LibreOffice for office documents.
pub struct PythonEngine {
    cfg: Config,
    script: PathBuf,
    python_exe: PathBuf,
    office: OfficeConverter,
}

impl PythonEngine {
    pub fn new(cfg: &Config) -> Result<Self> {
        let scripts_dir = PathBuf::from(&cfg.paths.scripts_dir);
        if cfg.security.pin_scripts_dir {
            let cwd = std::env::current_dir().with_context(|| "current_dir")?;
            let canon = scripts_dir
                .canonicalize()
                .with_context(|| format!("canonicalize scripts_dir: {}", scripts_dir.display()))?;
            if !canon.starts_with(&cwd) {
                return Err(anyhow!(
                    "scripts_dir is outside cwd while pin_scripts_dir=true: {}",
                    canon.display()
                ));
            }
        }
        let script = scripts_dir.join(SCRIPT);
        if !script.exists() {
            return Err(anyhow!("missing script: {}", script.display()));
        }
        let python_exe = resolve_python_exe(&cfg.render.python_exe);
        Ok(Self {
            cfg: cfg.clone(),
            script,
            python_exe,
            office: OfficeConverter::new(&cfg.office),
        })
    }

    fn run_json<I: serde::Serialize, O: for<'de> serde::Deserialize<'de>>(
        &self,
        input: &I,
    ) -> Result<O> {
        let timeout = timeout_from_secs(self.cfg.render.call_timeout_seconds);
        debug!("python run {} timeout={:?}", self.script.display(), timeout);

        let mut cmd = Command::new(&self.python_exe);
        cmd.arg(&self.script);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning python: {}", self.python_exe.display()))?;

        {
            let mut stdin = child.stdin.take().ok_or_else(|| anyhow!("no stdin"))?;
            let bytes = serde_json::to_vec(input)?;
            stdin.write_all(&bytes)?;
            stdin.flush().ok();
        }

        let output = wait(&mut child, timeout)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "python script failed: {}\n{}",
                self.script.display(),
                stderr
            ));
        }

        if self.cfg.debug.keep_python_stderr && !output.stderr.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("python stderr: {}", stderr.trim());
        }

        let out: O = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("parsing python JSON output: {}", self.script.display()))?;
        Ok(out)
    }

    fn checked(out: RenderOut, what: &str) -> Result<RenderOut> {
        if !out.ok {
            let msg = out.error.unwrap_or_else(|| format!("{what} failed"));
            return Err(anyhow!("{what}: {msg}"));
        }
        if !out.skipped_pages.is_empty() {
            warn!("{what} skipped pages {:?}", out.skipped_pages);
        }
        Ok(out)
    }
}

fn resolve_python_exe(raw: &str) -> PathBuf {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
        if let Ok(env_val) = std::env::var("PDF_ZIPPER_PYTHON") {
            let p = expand_tilde(&env_val);
            if p.exists() {
                return p;
            }
        }
        for venv in [".venv/bin/python", ".venv/Scripts/python.exe"] {
            let p = PathBuf::from(venv);
            if p.exists() {
                return p;
            }
        }
        return PathBuf::from("python3");
    }
    expand_tilde(raw)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

impl Engine for PythonEngine {
    fn doctor(&self) -> Result<DocDiag> {
        let mut diag: DocDiag = self.run_json(&serde_json::json!({"cmd": "doctor"}))?;
        diag.office = Some(self.office.diag());
        Ok(diag)
    }

    fn inspect(&self, input: &Path, format: DocFormat) -> Result<DocInfo> {
        let info: DocInfo = self.run_json(&serde_json::json!({
            "cmd": "inspect",
            "input": input,
            "format": format,
        }))?;
        if let Some(err) = info.error.as_deref() {
            return Err(anyhow!("inspect error: {err}"));
        }
        Ok(info)
    }

    fn rasterize(&self, input_pdf: &Path, dpi: u32, out_pdf: &Path) -> Result<RenderOut> {
        let req = RasterizeIn {
            input_pdf: input_pdf.display().to_string(),
            out_pdf: out_pdf.display().to_string(),
            dpi,
            jpeg_quality: self.cfg.render.jpeg_quality,
        };
        let out: RenderOut = self.run_json(&serde_json::json!({"cmd": "rasterize", "req": req}))?;
        Self::checked(out, "rasterize")
    }

    fn pack_slides(&self, raster_pdf: &Path, out_pptx: &Path) -> Result<RenderOut> {
        let req = PackSlidesIn {
            raster_pdf: raster_pdf.display().to_string(),
            out_pptx: out_pptx.display().to_string(),
        };
        let out: RenderOut =
            self.run_json(&serde_json::json!({"cmd": "pack_slides", "req": req}))?;
        Self::checked(out, "pack_slides")
    }

    fn office_to_pdf(&self, input: &Path, out_pdf: &Path) -> Result<()> {
        self.office.to_pdf(input, out_pdf)
    }
}
