//! Target-size convergence.
//!
//! Output size is assumed to grow with rendering resolution, so the search is a
//! bisection over DPI. Every trial renders the complete chain and measures the
//! artifact in the format that will be delivered; intermediate stages are never
//! measured because their size does not track the final one.
//!
//! The loop state lives in [`SearchState`], which can be driven without any
//! rendering. [`Converger`] wires it to a [`Renderer`], scratch space, progress
//! reporting and cancellation.

use crate::{
    chain::Renderer,
    config::{Config, Tiers},
    error::ConvertError,
    format::DocFormat,
    policy::{self, QualityTier},
    probe,
    progress::{CancelFlag, Progress},
    scratch::{Scratch, ScratchFile},
    util::fmt_mb,
};
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Resolution bounds in DPI. Always `0 < lo <= hi`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchBounds {
    pub lo: u32,
    pub hi: u32,
}

impl SearchBounds {
    pub fn new(lo: u32, hi: u32) -> Option<Self> {
        (lo > 0 && lo <= hi).then_some(Self { lo, hi })
    }

    pub fn width(&self) -> u32 {
        self.hi - self.lo
    }
}

/// Accepted deviation around the target: `max(fraction * target, floor_bytes)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    pub fraction: f64,
    pub floor_bytes: u64,
}

impl Tolerance {
    pub fn allowance(&self, target: u64) -> u64 {
        ((target as f64 * self.fraction) as u64).max(self.floor_bytes)
    }

    pub fn accepts(&self, bytes: u64, target: u64) -> bool {
        bytes.abs_diff(target) <= self.allowance(target)
    }
}

#[derive(Debug, Clone)]
pub struct SearchParams {
    pub domain: SearchBounds,
    pub min_step: u32,
    pub max_iterations: u32,
    pub tolerance: Tolerance,
    pub min_target_bytes: u64,
    pub tiers: Tiers,
}

impl SearchParams {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let s = &cfg.search;
        let domain = SearchBounds::new(s.dpi_min, s.dpi_max)
            .ok_or_else(|| anyhow!("invalid search domain {}..{}", s.dpi_min, s.dpi_max))?;
        Ok(Self {
            domain,
            min_step: s.min_step.max(1),
            max_iterations: s.max_iterations.max(1),
            tolerance: Tolerance {
                fraction: s.tolerance_fraction,
                floor_bytes: s.tolerance_floor_bytes,
            },
            min_target_bytes: cfg.limits.min_target_bytes,
            tiers: cfg.tiers.clone(),
        })
    }
}

/// One render-and-measure step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trial {
    pub iteration: u32,
    pub dpi: u32,
    pub bytes: u64,
    pub within_tolerance: bool,
}

impl Trial {
    pub fn over(&self, target: u64) -> bool {
        self.bytes > target
    }

    /// Lower is better. Within tolerance first, and within tolerance an
    /// at-or-under result beats an over result before deviation is compared.
    /// Outside tolerance, deviation decides and at-or-under breaks exact ties.
    fn rank(&self, target: u64) -> (bool, bool, u64, bool) {
        let over = self.over(target);
        (
            !self.within_tolerance,
            self.within_tolerance && over,
            self.bytes.abs_diff(target),
            over,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The input already fits and was forwarded unchanged.
    AlreadyWithinTarget,
    WithinTolerance,
    /// Even the lowest resolution exceeds the target.
    FloorAboveTarget,
    BoundsCollapsed,
    IterationCap,
    RepeatedResolution,
}

/// Bisection state. Call [`next_resolution`](Self::next_resolution), render,
/// then [`observe`](Self::observe) the measured size, until `next_resolution`
/// returns `None`.
///
/// Trials start at the midpoint. The lower bound is rendered only while no
/// trial has come in at or under the target, once the bounds collapse or a
/// single trial is left before the cap. An over-target floor ends the search
/// with [`StopReason::FloorAboveTarget`].
#[derive(Debug, Clone)]
pub struct SearchState {
    bounds: SearchBounds,
    target: u64,
    tolerance: Tolerance,
    min_step: u32,
    max_iterations: u32,
    trials: Vec<Trial>,
    best: Option<usize>,
    stop: Option<StopReason>,
    /// Some trial came in at or under the target.
    reachable: bool,
    floor_tried: bool,
}

impl SearchState {
    pub fn new(bounds: SearchBounds, target: u64, params: &SearchParams) -> Self {
        Self {
            bounds,
            target,
            tolerance: params.tolerance,
            min_step: params.min_step.max(1),
            max_iterations: params.max_iterations,
            trials: Vec::new(),
            best: None,
            stop: None,
            reachable: false,
            floor_tried: false,
        }
    }

    pub fn bounds(&self) -> SearchBounds {
        self.bounds
    }

    pub fn iteration(&self) -> u32 {
        self.trials.len() as u32
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn best(&self) -> Option<Trial> {
        self.best.map(|i| self.trials[i])
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    /// The next resolution to try, or `None` once a stop condition holds.
    pub fn next_resolution(&mut self) -> Option<u32> {
        if self.stop.is_some() {
            return None;
        }
        if self.iteration() >= self.max_iterations {
            self.stop = Some(StopReason::IterationCap);
            return None;
        }
        let floor_pending = !self.reachable && !self.floor_tried;
        if self.bounds.width() <= self.min_step {
            if floor_pending {
                return Some(self.bounds.lo);
            }
            self.stop = Some(StopReason::BoundsCollapsed);
            return None;
        }
        if floor_pending && self.iteration() + 1 == self.max_iterations {
            return Some(self.bounds.lo);
        }
        let mid = self.bounds.lo + self.bounds.width() / 2;
        if self.trials.last().is_some_and(|t| t.dpi == mid) {
            self.stop = Some(StopReason::RepeatedResolution);
            return None;
        }
        Some(mid)
    }

    /// Records a measurement and narrows the bounds. Returns the trial and
    /// whether it is the new best candidate.
    pub fn observe(&mut self, dpi: u32, bytes: u64) -> (Trial, bool) {
        // The lower bound only moves once the target is known reachable.
        let at_floor = !self.reachable && dpi <= self.bounds.lo;
        if at_floor {
            self.floor_tried = true;
        }
        let trial = Trial {
            iteration: self.iteration() + 1,
            dpi,
            bytes,
            within_tolerance: self.tolerance.accepts(bytes, self.target),
        };
        self.trials.push(trial);

        let is_best = match self.best {
            None => true,
            Some(i) => trial.rank(self.target) < self.trials[i].rank(self.target),
        };
        if is_best {
            self.best = Some(self.trials.len() - 1);
        }

        if !trial.over(self.target) {
            self.reachable = true;
        }
        if trial.within_tolerance {
            self.stop = Some(StopReason::WithinTolerance);
        } else if trial.over(self.target) {
            if at_floor {
                self.stop = Some(StopReason::FloorAboveTarget);
            } else {
                self.bounds.hi = dpi.max(self.bounds.lo);
            }
        } else {
            self.bounds.lo = dpi.min(self.bounds.hi);
        }

        (trial, is_best)
    }
}

/// Immutable request for one target-size search.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub target_bytes: u64,
    pub format: DocFormat,
    pub tier: Option<QualityTier>,
    /// Prefix for the job's scratch directory.
    pub label: String,
}

/// Caller-owned collaborators for one job.
pub struct JobContext<'a> {
    pub scratch_root: &'a Path,
    pub progress: &'a dyn Progress,
    pub cancel: &'a CancelFlag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub output: PathBuf,
    pub target_bytes: u64,
    /// Resolution of the promoted artifact; `None` when the input was forwarded as is.
    pub dpi: Option<u32>,
    pub bytes: u64,
    pub target_met: bool,
    pub stop: StopReason,
    pub bounds: SearchBounds,
    pub trials: Vec<Trial>,
}

pub struct Converger<'r, R: Renderer + ?Sized> {
    renderer: &'r R,
    params: SearchParams,
}

impl<'r, R: Renderer + ?Sized> Converger<'r, R> {
    pub fn new(renderer: &'r R, params: SearchParams) -> Self {
        Self { renderer, params }
    }

    /// Finds a resolution whose final artifact lands within tolerance of the
    /// target and promotes it to `job.output`.
    ///
    /// Writes nothing to `job.output` on error. The job's scratch directory is
    /// removed on every path.
    pub fn search(
        &self,
        job: &ConversionJob,
        ctx: &JobContext<'_>,
    ) -> Result<SearchOutcome, ConvertError> {
        let result = self.search_inner(job, ctx);
        if let Err(err) = &result {
            warn!("search for {} failed: {err}", job.input.display());
            ctx.progress.report(&format!("Error: {err}"));
        }
        result
    }

    fn search_inner(
        &self,
        job: &ConversionJob,
        ctx: &JobContext<'_>,
    ) -> Result<SearchOutcome, ConvertError> {
        let (source, input_bytes) = self.check(job)?;
        let bounds = policy::bounds_for(self.params.domain, job.tier, &self.params.tiers);

        if source == job.format && input_bytes <= job.target_bytes {
            ctx.progress.report(&format!(
                "Input is {} which is within the target of {}; copying it unchanged.",
                fmt_mb(input_bytes),
                fmt_mb(job.target_bytes)
            ));
            if let Some(parent) = job.output.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&job.input, &job.output)?;
            return Ok(SearchOutcome {
                output: job.output.clone(),
                target_bytes: job.target_bytes,
                dpi: None,
                bytes: input_bytes,
                target_met: true,
                stop: StopReason::AlreadyWithinTarget,
                bounds,
                trials: Vec::new(),
            });
        }

        ctx.progress.report(&format!(
            "Searching {}..{} dpi for a {} {} (input {}, at most {} trials)",
            bounds.lo,
            bounds.hi,
            fmt_mb(job.target_bytes),
            job.format,
            fmt_mb(input_bytes),
            self.params.max_iterations
        ));

        let scratch = Scratch::create(ctx.scratch_root, &job.label)?;
        let result = self.converge(job, ctx, &scratch, source, bounds);
        if let Err(err) = scratch.close() {
            warn!("failed to remove scratch dir: {err}");
        }
        result
    }

    fn check(&self, job: &ConversionJob) -> Result<(DocFormat, u64), ConvertError> {
        if job.target_bytes <= self.params.min_target_bytes {
            return Err(ConvertError::input(format!(
                "target size {} bytes must be greater than {} bytes",
                job.target_bytes, self.params.min_target_bytes
            )));
        }
        let source = DocFormat::from_path(&job.input).ok_or_else(|| {
            ConvertError::input(format!(
                "unsupported file type: {} (supported: {})",
                job.input.display(),
                DocFormat::supported_list()
            ))
        })?;
        let input_bytes = probe::size_of(&job.input).map_err(|e| {
            ConvertError::input(format!("cannot read {}: {e}", job.input.display()))
        })?;
        if !self.renderer.supports(source, job.format) {
            return Err(ConvertError::input(format!(
                "cannot produce {} from {}",
                job.format, source
            )));
        }
        Ok((source, input_bytes))
    }

    fn converge(
        &self,
        job: &ConversionJob,
        ctx: &JobContext<'_>,
        scratch: &Scratch,
        source: DocFormat,
        bounds: SearchBounds,
    ) -> Result<SearchOutcome, ConvertError> {
        if ctx.cancel.is_cancelled() {
            return Err(ConvertError::Cancelled { iterations: 0 });
        }
        let prepared = self
            .renderer
            .prepare(&job.input, source, job.format, scratch)
            .map_err(|e| ConvertError::step(ctx.cancel, bounds.lo, 0, &e))?;
        let document: &Path = match &prepared {
            Some(file) => {
                ctx.progress
                    .report(&format!("Prepared {} input for rendering", source));
                file.path()
            }
            None => job.input.as_path(),
        };

        let target = job.target_bytes;
        let max = self.params.max_iterations;
        let mut state = SearchState::new(bounds, target, &self.params);
        let mut best: Option<ScratchFile> = None;

        while let Some(dpi) = state.next_resolution() {
            if ctx.cancel.is_cancelled() {
                return Err(ConvertError::Cancelled {
                    iterations: state.iteration(),
                });
            }
            let iteration = state.iteration() + 1;
            ctx.progress
                .report(&format!("Attempt {iteration}/{max}: trying {dpi} dpi"));

            let artifact = self
                .renderer
                .render(document, dpi, job.format, scratch)
                .map_err(|e| ConvertError::step(ctx.cancel, dpi, iteration, &e))?;
            let bytes = artifact.size()?;
            if bytes == 0 {
                return Err(ConvertError::Render {
                    dpi,
                    iteration,
                    reason: "renderer produced an empty artifact".into(),
                });
            }

            let (trial, is_best) = state.observe(dpi, bytes);
            debug!(?trial, is_best, bounds = ?state.bounds(), "trial");
            ctx.progress.report(&format!(
                "  - {dpi} dpi -> {} (target {}){}",
                fmt_mb(bytes),
                fmt_mb(target),
                if trial.within_tolerance {
                    ", within tolerance"
                } else if trial.over(target) {
                    ", too large"
                } else {
                    ", under target"
                }
            ));

            if is_best {
                best = Some(artifact);
            }
        }

        let iterations = state.iteration();
        let stop = state.stop_reason().unwrap_or(StopReason::IterationCap);
        let (Some(trial), Some(artifact)) = (state.best(), best) else {
            return Err(ConvertError::NoArtifact { iterations });
        };

        artifact.promote(&job.output)?;
        info!(
            "promoted {} dpi ({} bytes, target {}) after {} trial(s), stop={:?}",
            trial.dpi, trial.bytes, target, iterations, stop
        );

        if trial.within_tolerance {
            ctx.progress.report(&format!(
                "Search complete after {iterations} trial(s): {} dpi -> {} (target {}).",
                trial.dpi,
                fmt_mb(trial.bytes),
                fmt_mb(target)
            ));
        } else {
            ctx.progress.report(&format!(
                "Target not reached within tolerance; closest result is {} dpi -> {} (target {}).",
                trial.dpi,
                fmt_mb(trial.bytes),
                fmt_mb(target)
            ));
        }

        Ok(SearchOutcome {
            output: job.output.clone(),
            target_bytes: target,
            dpi: Some(trial.dpi),
            bytes: trial.bytes,
            target_met: trial.within_tolerance,
            stop,
            bounds: state.bounds(),
            trials: state.trials().to_vec(),
        })
    }
}
