use super::{
    process::{run_captured, timeout_from_secs},
    types::OfficeDiag,
};
use crate::config;
use anyhow::{Context, Result, anyhow, bail};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};

const MACOS_SOFFICE: &str = "/Applications/LibreOffice.app/Contents/MacOS/soffice";

/// Headless LibreOffice conversion to PDF.
pub struct OfficeConverter {
    configured: String,
    timeout: Option<Duration>,
}

impl OfficeConverter {
    pub fn new(cfg: &config::Office) -> Self {
        Self {
            configured: cfg.soffice_exe.clone(),
            timeout: timeout_from_secs(cfg.timeout_seconds),
        }
    }

    /// Resolved at call time so `doctor` can report a missing install instead of failing early.
    pub fn resolve(&self) -> Result<PathBuf> {
        let raw = self.configured.trim();
        if !raw.is_empty() && !raw.eq_ignore_ascii_case("auto") {
            return Ok(PathBuf::from(raw));
        }
        for name in ["soffice", "libreoffice"] {
            if let Ok(p) = which::which(name) {
                return Ok(p);
            }
        }
        let mac = PathBuf::from(MACOS_SOFFICE);
        if mac.exists() {
            return Ok(mac);
        }
        Err(anyhow!(
            "LibreOffice not found (looked for soffice, libreoffice); set office.soffice_exe"
        ))
    }

    pub fn diag(&self) -> OfficeDiag {
        let exe = match self.resolve() {
            Ok(exe) => exe,
            Err(e) => {
                return OfficeDiag {
                    exe: self.configured.clone(),
                    version: None,
                    error: Some(e.to_string()),
                };
            }
        };
        let mut cmd = Command::new(&exe);
        cmd.arg("--version");
        match run_captured(&mut cmd, Some(Duration::from_secs(60))) {
            Ok(out) if out.status.success() => OfficeDiag {
                exe: exe.display().to_string(),
                version: Some(String::from_utf8_lossy(&out.stdout).trim().to_string()),
                error: None,
            },
            Ok(out) => OfficeDiag {
                exe: exe.display().to_string(),
                version: None,
                error: Some(String::from_utf8_lossy(&out.stderr).trim().to_string()),
            },
            Err(e) => OfficeDiag {
                exe: exe.display().to_string(),
                version: None,
                error: Some(format!("{e:#}")),
            },
        }
    }

    pub fn to_pdf(&self, input: &Path, out_pdf: &Path) -> Result<()> {
        let exe = self.resolve()?;
        let parent = out_pdf
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        // soffice picks the output name itself, so convert into a private dir and move.
        let work = tempfile::Builder::new()
            .prefix("office-")
            .tempdir_in(parent)
            .with_context(|| format!("create office work dir in {}", parent.display()))?;
        let work_dir = work
            .path()
            .canonicalize()
            .with_context(|| "canonicalize office work dir")?;
        let profile = work_dir.join("profile");

        let mut cmd = Command::new(&exe);
        cmd.arg("--headless")
            .arg("--norestore")
            // Private profile: the shared one is locked while another soffice runs.
            .arg(format!("-env:UserInstallation=file://{}", profile.display()))
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(&work_dir)
            .arg(input);
        debug!("office convert {:?}", cmd);

        let output = run_captured(&mut cmd, self.timeout)
            .with_context(|| format!("running {}", exe.display()))?;
        if !output.status.success() {
            bail!(
                "office conversion failed for {}: {}",
                input.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stem = input
            .file_stem()
            .ok_or_else(|| anyhow!("input has no file name: {}", input.display()))?;
        let produced = work_dir.join(format!("{}.pdf", stem.to_string_lossy()));
        if !produced.exists() {
            bail!(
                "office conversion produced no PDF for {}: {}",
                input.display(),
                String::from_utf8_lossy(&output.stdout).trim()
            );
        }
        std::fs::rename(&produced, out_pdf)
            .or_else(|_| std::fs::copy(&produced, out_pdf).map(|_| ()))
            .with_context(|| format!("move {} -> {}", produced.display(), out_pdf.display()))?;
        info!("converted {} to PDF", input.display());
        Ok(())
    }
}
