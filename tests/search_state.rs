use pdf_zipper::{
    config::Tiers,
    search::{SearchBounds, SearchParams, SearchState, StopReason, Tolerance},
};

fn params(lo: u32, hi: u32, fraction: f64, floor: u64) -> SearchParams {
    SearchParams {
        domain: SearchBounds::new(lo, hi).expect("valid bounds"),
        min_step: 1,
        max_iterations: 10,
        tolerance: Tolerance {
            fraction,
            floor_bytes: floor,
        },
        min_target_bytes: 1024,
        tiers: Tiers::default(),
    }
}

/// Drives the state machine against a size function and returns it finished.
fn drive(p: &SearchParams, target: u64, size: impl Fn(u32) -> u64) -> SearchState {
    let mut state = SearchState::new(p.domain, target, p);
    while let Some(dpi) = state.next_resolution() {
        state.observe(dpi, size(dpi));
    }
    state
}

#[test]
fn bounds_require_positive_ordered_range() {
    assert!(SearchBounds::new(0, 10).is_none());
    assert!(SearchBounds::new(20, 10).is_none());
    assert_eq!(SearchBounds::new(7, 7).map(|b| b.width()), Some(0));
}

#[test]
fn tolerance_uses_larger_of_fraction_and_floor() {
    let t = Tolerance {
        fraction: 0.05,
        floor_bytes: 32 * 1024,
    };
    assert_eq!(t.allowance(100_000), 32 * 1024);
    assert_eq!(t.allowance(10_000_000), 500_000);
    assert!(t.accepts(10_400_000, 10_000_000));
    assert!(!t.accepts(10_600_000, 10_000_000));
    assert!(t.accepts(9_500_000, 10_000_000));
}

#[test]
fn first_trial_is_the_midpoint() {
    let p = params(50, 300, 0.1, 0);
    let mut state = SearchState::new(p.domain, 1_000_000, &p);
    assert_eq!(state.next_resolution(), Some(175));
}

#[test]
fn converges_on_linear_sizes() {
    let p = params(50, 300, 0.1, 0);
    let state = drive(&p, 5_000_000, |dpi| dpi as u64 * 50_000);

    let dpis: Vec<u32> = state.trials().iter().map(|t| t.dpi).collect();
    assert_eq!(dpis, vec![175, 112, 81, 96]);
    assert_eq!(state.stop_reason(), Some(StopReason::WithinTolerance));
    let best = state.best().expect("best");
    assert_eq!(best.dpi, 96);
    assert!(best.within_tolerance);
}

#[test]
fn unreachable_target_ends_on_the_floor() {
    let p = params(50, 300, 0.1, 0);
    let state = drive(&p, 500_000, |dpi| dpi as u64 * 50_000);

    let dpis: Vec<u32> = state.trials().iter().map(|t| t.dpi).collect();
    assert_eq!(dpis, vec![175, 112, 81, 65, 57, 53, 51, 50]);
    assert_eq!(state.stop_reason(), Some(StopReason::FloorAboveTarget));
    let best = state.best().expect("best");
    assert_eq!(best.dpi, 50);
    assert!(!best.within_tolerance);
}

#[test]
fn floor_is_rendered_before_the_cap_when_everything_was_over() {
    let mut p = params(50, 300, 0.1, 0);
    p.max_iterations = 3;
    let state = drive(&p, 500_000, |dpi| dpi as u64 * 50_000);

    let dpis: Vec<u32> = state.trials().iter().map(|t| t.dpi).collect();
    assert_eq!(dpis, vec![175, 112, 50]);
    assert_eq!(state.stop_reason(), Some(StopReason::FloorAboveTarget));
}

#[test]
fn floor_within_tolerance_is_accepted() {
    let p = params(50, 300, 0.01, 0);
    let state = drive(&p, 2_510_000, |dpi| dpi as u64 * 50_000);
    assert_eq!(state.trials().len(), 8);
    assert_eq!(state.stop_reason(), Some(StopReason::WithinTolerance));
    assert_eq!(state.best().map(|t| t.dpi), Some(50));
}

#[test]
fn trial_count_is_logarithmic_in_domain_width() {
    // ceil(log2((300 - 50) / 1)) = 8
    let p = params(50, 300, 0.002, 0);
    for dpi_target in 51..=299u32 {
        let target = dpi_target as u64 * 50_000;
        let state = drive(&p, target, |dpi| dpi as u64 * 50_000);
        assert!(
            state.trials().len() <= 8,
            "dpi {dpi_target}: {} trials",
            state.trials().len()
        );
        assert_eq!(state.stop_reason(), Some(StopReason::WithinTolerance));
        assert_eq!(state.best().map(|t| t.dpi), Some(dpi_target));
    }
}

#[test]
fn prefers_under_target_among_equal_deviation() {
    let p = params(50, 300, 0.0, 0);
    let mut state = SearchState::new(p.domain, 1_000_000, &p);
    let (_, best) = state.observe(50, 900_000);
    assert!(best);
    let (_, best) = state.observe(175, 1_100_000);
    assert!(!best, "an over-target result with equal deviation must not win");
    assert_eq!(state.best().map(|t| t.dpi), Some(50));
}

#[test]
fn within_tolerance_outranks_outside() {
    let p = params(50, 300, 0.0, 1000);
    let mut state = SearchState::new(p.domain, 1_000_000, &p);
    state.observe(50, 990_000);
    state.observe(60, 999_500);
    assert_eq!(state.best().map(|t| t.dpi), Some(60));
}

#[test]
fn under_target_wins_inside_tolerance() {
    let p = params(50, 300, 0.0, 10_000);
    let mut state = SearchState::new(p.domain, 1_000_000, &p);
    let (_, best) = state.observe(90, 995_000);
    assert!(best);
    let (over, best) = state.observe(91, 1_001_000);
    assert!(over.within_tolerance);
    assert!(!best);
    assert_eq!(state.best().map(|t| t.bytes), Some(995_000));
}

#[test]
fn iteration_cap_is_honored() {
    let mut p = params(1, 10_000, 0.0, 0);
    p.max_iterations = 3;
    let state = drive(&p, 123_456_789, |dpi| dpi as u64 * 1_000);
    assert_eq!(state.trials().len(), 3);
    assert_eq!(state.stop_reason(), Some(StopReason::IterationCap));
}

#[test]
fn bounds_stay_ordered_with_non_monotonic_sizes() {
    let p = params(30, 300, 0.0, 0);
    let mut state = SearchState::new(p.domain, 2_000_000, &p);
    let sizes = |dpi: u32| if dpi % 2 == 0 { 1_000_000 + dpi as u64 } else { 3_000_000 };
    while let Some(dpi) = state.next_resolution() {
        let b = state.bounds();
        assert!(b.lo <= dpi && dpi <= b.hi);
        state.observe(dpi, sizes(dpi));
        let b = state.bounds();
        assert!(0 < b.lo && b.lo <= b.hi);
    }
    assert!(state.trials().len() <= 10);
    assert!(state.best().is_some());
}

#[test]
fn single_point_domain_runs_once() {
    let p = params(96, 96, 0.0, 0);
    let state = drive(&p, 1_000_000, |_| 500_000);
    assert_eq!(state.trials().len(), 1);
    assert_eq!(state.stop_reason(), Some(StopReason::BoundsCollapsed));
}
