use anyhow::{Result, bail};
use pdf_zipper::{
    chain::Renderer,
    config::Tiers,
    error::ConvertError,
    format::DocFormat,
    policy::QualityTier,
    progress::{CancelFlag, Progress, Silent},
    scratch::{Scratch, ScratchFile},
    search::{
        ConversionJob, Converger, JobContext, SearchBounds, SearchParams, StopReason, Tolerance,
    },
};
use std::cell::{Cell, RefCell};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Writes a sparse artifact of `dpi * bytes_per_dpi` bytes.
struct LinearRenderer {
    bytes_per_dpi: u64,
    calls: Cell<u32>,
    fail_on_call: Option<u32>,
    /// Set just before the failing call, the way Ctrl+C reaches both us and the child.
    interrupt: Option<CancelFlag>,
    only_to: Option<DocFormat>,
}

impl LinearRenderer {
    fn new(bytes_per_dpi: u64) -> Self {
        Self {
            bytes_per_dpi,
            calls: Cell::new(0),
            fail_on_call: None,
            interrupt: None,
            only_to: None,
        }
    }
}

impl Renderer for LinearRenderer {
    fn supports(&self, _from: DocFormat, to: DocFormat) -> bool {
        self.only_to.is_none_or(|f| f == to)
    }

    fn render(
        &self,
        _document: &Path,
        dpi: u32,
        to: DocFormat,
        scratch: &Scratch,
    ) -> Result<ScratchFile> {
        let call = self.calls.get() + 1;
        self.calls.set(call);
        if self.fail_on_call == Some(call) {
            if let Some(flag) = &self.interrupt {
                flag.cancel();
                bail!("renderer exited: KeyboardInterrupt");
            }
            bail!("stub renderer failure");
        }
        let out = scratch.allocate(to.extension());
        File::create(out.path())?.set_len(dpi as u64 * self.bytes_per_dpi)?;
        Ok(out)
    }
}

fn params() -> SearchParams {
    SearchParams {
        domain: SearchBounds::new(50, 300).expect("bounds"),
        min_step: 1,
        max_iterations: 10,
        tolerance: Tolerance {
            fraction: 0.1,
            floor_bytes: 0,
        },
        min_target_bytes: 1024,
        tiers: Tiers::default(),
    }
}

struct Fixture {
    _tmp: tempfile::TempDir,
    input: PathBuf,
    output: PathBuf,
    scratch_root: PathBuf,
}

fn fixture(input_bytes: u64) -> Fixture {
    let tmp = tempfile::tempdir().expect("tempdir");
    let input = tmp.path().join("deck.pdf");
    File::create(&input)
        .expect("create input")
        .set_len(input_bytes)
        .expect("size input");
    Fixture {
        input,
        output: tmp.path().join("out").join("deck_small.pdf"),
        scratch_root: tmp.path().join("scratch"),
        _tmp: tmp,
    }
}

fn job(fx: &Fixture, target_bytes: u64) -> ConversionJob {
    ConversionJob {
        input: fx.input.clone(),
        output: fx.output.clone(),
        target_bytes,
        format: DocFormat::Pdf,
        tier: None,
        label: "test".into(),
    }
}

fn scratch_is_empty(root: &Path) -> bool {
    !root.exists()
        || std::fs::read_dir(root)
            .expect("read scratch root")
            .next()
            .is_none()
}

#[test]
fn converges_and_promotes_final_artifact() {
    let fx = fixture(20_000_000);
    let renderer = LinearRenderer::new(50_000);
    let cancel = CancelFlag::new();
    let ctx = JobContext {
        scratch_root: &fx.scratch_root,
        progress: &Silent,
        cancel: &cancel,
    };

    let outcome = Converger::new(&renderer, params())
        .search(&job(&fx, 5_000_000), &ctx)
        .expect("search");

    assert!(outcome.target_met);
    assert_eq!(outcome.stop, StopReason::WithinTolerance);
    assert_eq!(outcome.dpi, Some(96));
    assert_eq!(outcome.bytes, 4_800_000);
    assert_eq!(outcome.trials.len(), 4);
    assert_eq!(renderer.calls.get(), 4);
    let on_disk = std::fs::metadata(&fx.output).expect("output").len();
    assert_eq!(on_disk, outcome.bytes);
    assert!(scratch_is_empty(&fx.scratch_root));
}

#[test]
fn unreachable_target_keeps_closest_artifact() {
    let fx = fixture(20_000_000);
    let renderer = LinearRenderer::new(50_000);
    let cancel = CancelFlag::new();
    let ctx = JobContext {
        scratch_root: &fx.scratch_root,
        progress: &Silent,
        cancel: &cancel,
    };

    let outcome = Converger::new(&renderer, params())
        .search(&job(&fx, 500_000), &ctx)
        .expect("search");

    assert!(!outcome.target_met);
    assert_eq!(outcome.stop, StopReason::FloorAboveTarget);
    assert_eq!(outcome.dpi, Some(50));
    assert_eq!(outcome.trials.len(), 8);
    assert_eq!(std::fs::metadata(&fx.output).expect("output").len(), 2_500_000);
    assert!(scratch_is_empty(&fx.scratch_root));
}

#[test]
fn input_already_within_target_is_copied() {
    let fx = fixture(1_000_000);
    let renderer = LinearRenderer::new(50_000);
    let cancel = CancelFlag::new();
    let ctx = JobContext {
        scratch_root: &fx.scratch_root,
        progress: &Silent,
        cancel: &cancel,
    };

    let outcome = Converger::new(&renderer, params())
        .search(&job(&fx, 5_000_000), &ctx)
        .expect("search");

    assert_eq!(outcome.stop, StopReason::AlreadyWithinTarget);
    assert!(outcome.target_met);
    assert_eq!(outcome.dpi, None);
    assert!(outcome.trials.is_empty());
    assert_eq!(renderer.calls.get(), 0);
    assert_eq!(std::fs::metadata(&fx.output).expect("output").len(), 1_000_000);
    assert!(scratch_is_empty(&fx.scratch_root));
}

#[test]
fn repeated_search_gives_same_result() {
    let fx = fixture(20_000_000);
    let renderer = LinearRenderer::new(37_000);
    let cancel = CancelFlag::new();
    let ctx = JobContext {
        scratch_root: &fx.scratch_root,
        progress: &Silent,
        cancel: &cancel,
    };
    let converger = Converger::new(&renderer, params());

    let first = converger.search(&job(&fx, 6_000_000), &ctx).expect("first");
    let second = converger.search(&job(&fx, 6_000_000), &ctx).expect("second");

    assert_eq!(first.dpi, second.dpi);
    assert_eq!(first.bytes, second.bytes);
    assert_eq!(first.trials, second.trials);
}

#[test]
fn draft_tier_caps_resolution() {
    let fx = fixture(40_000_000);
    let renderer = LinearRenderer::new(50_000);
    let cancel = CancelFlag::new();
    let ctx = JobContext {
        scratch_root: &fx.scratch_root,
        progress: &Silent,
        cancel: &cancel,
    };
    let mut job = job(&fx, 10_000_000);
    job.tier = Some(QualityTier::Draft);

    let outcome = Converger::new(&renderer, params())
        .search(&job, &ctx)
        .expect("search");

    let cap = Tiers::default().draft_max_dpi;
    assert!(outcome.trials.iter().all(|t| t.dpi <= cap));
    assert!(!outcome.target_met);
    assert!(outcome.bounds.hi <= cap);
    assert!(scratch_is_empty(&fx.scratch_root));
}

#[test]
fn target_at_minimum_is_rejected() {
    let fx = fixture(20_000_000);
    let renderer = LinearRenderer::new(50_000);
    let cancel = CancelFlag::new();
    let ctx = JobContext {
        scratch_root: &fx.scratch_root,
        progress: &Silent,
        cancel: &cancel,
    };

    let err = Converger::new(&renderer, params())
        .search(&job(&fx, 1024), &ctx)
        .expect_err("too small");

    assert!(matches!(err, ConvertError::Input(_)));
    assert_eq!(renderer.calls.get(), 0);
    assert!(!fx.output.exists());
}

#[test]
fn missing_input_is_rejected() {
    let fx = fixture(1);
    let renderer = LinearRenderer::new(50_000);
    let cancel = CancelFlag::new();
    let ctx = JobContext {
        scratch_root: &fx.scratch_root,
        progress: &Silent,
        cancel: &cancel,
    };
    let mut job = job(&fx, 5_000_000);
    job.input = fx.input.with_file_name("nope.pdf");

    let err = Converger::new(&renderer, params())
        .search(&job, &ctx)
        .expect_err("missing input");

    assert!(matches!(err, ConvertError::Input(_)));
    assert!(!fx.output.exists());
}

#[test]
fn unsupported_conversion_is_rejected() {
    let fx = fixture(20_000_000);
    let mut renderer = LinearRenderer::new(50_000);
    renderer.only_to = Some(DocFormat::Pdf);
    let cancel = CancelFlag::new();
    let ctx = JobContext {
        scratch_root: &fx.scratch_root,
        progress: &Silent,
        cancel: &cancel,
    };
    let mut job = job(&fx, 5_000_000);
    job.format = DocFormat::Pptx;

    let err = Converger::new(&renderer, params())
        .search(&job, &ctx)
        .expect_err("unsupported");

    assert!(matches!(err, ConvertError::Input(_)));
    assert_eq!(renderer.calls.get(), 0);
}

#[test]
fn render_failure_leaves_nothing_behind() {
    let fx = fixture(20_000_000);
    let mut renderer = LinearRenderer::new(50_000);
    renderer.fail_on_call = Some(2);
    let cancel = CancelFlag::new();
    let ctx = JobContext {
        scratch_root: &fx.scratch_root,
        progress: &Silent,
        cancel: &cancel,
    };

    let err = Converger::new(&renderer, params())
        .search(&job(&fx, 5_000_000), &ctx)
        .expect_err("render failure");

    match err {
        ConvertError::Render { dpi, iteration, .. } => {
            assert_eq!(dpi, 112);
            assert_eq!(iteration, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!fx.output.exists());
    assert!(scratch_is_empty(&fx.scratch_root));
}

#[test]
fn empty_artifact_is_a_render_error() {
    let fx = fixture(20_000_000);
    let renderer = LinearRenderer::new(0);
    let cancel = CancelFlag::new();
    let ctx = JobContext {
        scratch_root: &fx.scratch_root,
        progress: &Silent,
        cancel: &cancel,
    };

    let err = Converger::new(&renderer, params())
        .search(&job(&fx, 5_000_000), &ctx)
        .expect_err("empty artifact");

    assert!(matches!(err, ConvertError::Render { iteration: 1, .. }));
    assert!(!fx.output.exists());
    assert!(scratch_is_empty(&fx.scratch_root));
}

#[test]
fn cancellation_between_trials_cleans_up() {
    let fx = fixture(20_000_000);
    let renderer = LinearRenderer::new(50_000);
    let cancel = CancelFlag::new();
    let trigger = cancel.clone();
    // Cancel as soon as the first measurement is reported.
    let progress = move |msg: &str| {
        if msg.trim_start().starts_with("- ") {
            trigger.cancel();
        }
    };
    let ctx = JobContext {
        scratch_root: &fx.scratch_root,
        progress: &progress,
        cancel: &cancel,
    };

    let err = Converger::new(&renderer, params())
        .search(&job(&fx, 5_000_000), &ctx)
        .expect_err("cancelled");

    assert!(matches!(err, ConvertError::Cancelled { iterations: 1 }));
    assert!(err.is_cancelled());
    assert_eq!(renderer.calls.get(), 1);
    assert!(!fx.output.exists());
    assert!(scratch_is_empty(&fx.scratch_root));
}

#[test]
fn interrupted_render_is_cancellation() {
    let fx = fixture(20_000_000);
    let cancel = CancelFlag::new();
    let mut renderer = LinearRenderer::new(50_000);
    renderer.fail_on_call = Some(2);
    renderer.interrupt = Some(cancel.clone());
    let ctx = JobContext {
        scratch_root: &fx.scratch_root,
        progress: &Silent,
        cancel: &cancel,
    };

    let err = Converger::new(&renderer, params())
        .search(&job(&fx, 5_000_000), &ctx)
        .expect_err("cancelled");

    assert!(matches!(err, ConvertError::Cancelled { iterations: 1 }), "{err}");
    assert!(err.is_cancelled());
    assert_eq!(renderer.calls.get(), 2);
    assert!(!fx.output.exists());
    assert!(scratch_is_empty(&fx.scratch_root));
}

#[test]
fn cancelled_before_start_renders_nothing() {
    let fx = fixture(20_000_000);
    let renderer = LinearRenderer::new(50_000);
    let cancel = CancelFlag::new();
    cancel.cancel();
    let ctx = JobContext {
        scratch_root: &fx.scratch_root,
        progress: &Silent,
        cancel: &cancel,
    };

    let err = Converger::new(&renderer, params())
        .search(&job(&fx, 5_000_000), &ctx)
        .expect_err("cancelled");

    assert!(matches!(err, ConvertError::Cancelled { iterations: 0 }));
    assert_eq!(renderer.calls.get(), 0);
    assert!(scratch_is_empty(&fx.scratch_root));
}

#[test]
fn reports_each_attempt() {
    let fx = fixture(20_000_000);
    let renderer = LinearRenderer::new(50_000);
    let cancel = CancelFlag::new();
    let lines = RefCell::new(Vec::<String>::new());
    let progress = |msg: &str| lines.borrow_mut().push(msg.to_string());
    let ctx = JobContext {
        scratch_root: &fx.scratch_root,
        progress: &progress as &dyn Progress,
        cancel: &cancel,
    };

    Converger::new(&renderer, params())
        .search(&job(&fx, 5_000_000), &ctx)
        .expect("search");

    let lines = lines.into_inner();
    assert!(lines.iter().any(|l| l == "Attempt 1/10: trying 175 dpi"));
    assert!(lines.iter().any(|l| l == "Attempt 4/10: trying 96 dpi"));
    assert!(lines.iter().any(|l| l.starts_with("Search complete after 4 trial(s)")));
}
