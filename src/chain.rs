use crate::{
    engine::{Engine, RenderOut},
    format::DocFormat,
    scratch::{Scratch, ScratchFile},
};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Produces candidate artifacts for the convergence search.
///
/// Size is expected to be non-decreasing in `dpi` for a fixed document and
/// format. Violations make the search less accurate but never break it.
pub trait Renderer {
    fn supports(&self, from: DocFormat, to: DocFormat) -> bool;

    /// Resolution-independent work done once per job, e.g. turning a slide
    /// deck into a PDF that can be rasterized. The returned file replaces the
    /// input document for every later `render` call.
    fn prepare(
        &self,
        _document: &Path,
        _from: DocFormat,
        _to: DocFormat,
        _scratch: &Scratch,
    ) -> Result<Option<ScratchFile>> {
        Ok(None)
    }

    /// Renders `document` at `dpi` all the way to `to`. The returned artifact
    /// is what gets measured and, if chosen, delivered.
    fn render(
        &self,
        document: &Path,
        dpi: u32,
        to: DocFormat,
        scratch: &Scratch,
    ) -> Result<ScratchFile>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Office document to PDF through the external converter.
    OfficeToPdf,
    /// Every page to an image at the trial DPI, reassembled as a PDF.
    Rasterize,
    /// Raster PDF pages to one picture slide each.
    PackSlides,
}

impl Step {
    pub fn output_format(self) -> DocFormat {
        match self {
            Step::OfficeToPdf | Step::Rasterize => DocFormat::Pdf,
            Step::PackSlides => DocFormat::Pptx,
        }
    }
}

/// Steps needed to get from one format to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    pub from: DocFormat,
    pub to: DocFormat,
    pub prepare: Vec<Step>,
    pub per_trial: Vec<Step>,
}

impl Chain {
    pub fn plan(from: DocFormat, to: DocFormat) -> Chain {
        let prepare = match from {
            DocFormat::Pdf => Vec::new(),
            DocFormat::Pptx => vec![Step::OfficeToPdf],
        };
        Chain {
            from,
            to,
            prepare,
            per_trial: Self::trial_steps(to),
        }
    }

    /// Per-trial steps; they always start from a PDF.
    pub fn trial_steps(to: DocFormat) -> Vec<Step> {
        match to {
            DocFormat::Pdf => vec![Step::Rasterize],
            DocFormat::Pptx => vec![Step::Rasterize, Step::PackSlides],
        }
    }

    pub fn final_format(&self) -> DocFormat {
        self.per_trial
            .last()
            .map(|s| s.output_format())
            .unwrap_or(self.from)
    }
}

/// [`Renderer`] that runs [`Chain`] steps on an [`Engine`].
pub struct ChainRenderer<E: Engine> {
    engine: E,
}

impl<E: Engine> ChainRenderer<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Runs `steps` in order. Each intermediate is released as soon as the
    /// next step has consumed it; only the last output is returned.
    fn run_steps(
        &self,
        steps: &[Step],
        document: &Path,
        dpi: u32,
        scratch: &Scratch,
    ) -> Result<Option<ScratchFile>> {
        let mut current: Option<ScratchFile> = None;
        for &step in steps {
            let input = current.as_ref().map_or(document, |f| f.path());
            let out = scratch.allocate(step.output_format().extension());
            self.apply(step, input, dpi, out.path())
                .with_context(|| match step {
                    Step::OfficeToPdf => "office to PDF conversion".to_string(),
                    _ => format!("{step:?} at {dpi} dpi"),
                })?;
            current = Some(out);
        }
        Ok(current)
    }

    fn apply(&self, step: Step, input: &Path, dpi: u32, out: &Path) -> Result<()> {
        debug!("step {step:?} {} -> {}", input.display(), out.display());
        match step {
            Step::OfficeToPdf => self.engine.office_to_pdf(input, out),
            Step::Rasterize => self
                .engine
                .rasterize(input, dpi, out)
                .map(|o| log_render(step, &o)),
            Step::PackSlides => self
                .engine
                .pack_slides(input, out)
                .map(|o| log_render(step, &o)),
        }
    }
}

fn log_render(step: Step, out: &RenderOut) {
    debug!("{step:?} wrote {} page(s)", out.pages);
    for w in &out.warnings {
        warn!("{step:?}: {w}");
    }
}

impl<E: Engine> Renderer for ChainRenderer<E> {
    fn supports(&self, from: DocFormat, to: DocFormat) -> bool {
        Chain::plan(from, to).final_format() == to
    }

    fn prepare(
        &self,
        document: &Path,
        from: DocFormat,
        to: DocFormat,
        scratch: &Scratch,
    ) -> Result<Option<ScratchFile>> {
        let chain = Chain::plan(from, to);
        self.run_steps(&chain.prepare, document, 0, scratch)
    }

    fn render(
        &self,
        document: &Path,
        dpi: u32,
        to: DocFormat,
        scratch: &Scratch,
    ) -> Result<ScratchFile> {
        self.run_steps(&Chain::trial_steps(to), document, dpi, scratch)?
            .ok_or_else(|| anyhow!("no render steps for {to}"))
    }
}
