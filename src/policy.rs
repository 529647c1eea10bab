use crate::{config::Tiers, search::SearchBounds};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Caller hint that narrows the resolution domain searched for a target size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityTier {
    Draft,
    Standard,
    High,
}

impl FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(QualityTier::Draft),
            "STANDARD" | "AUTO" => Ok(QualityTier::Standard),
            "HIGH" => Ok(QualityTier::High),
            other => Err(format!("unknown quality tier: {other}")),
        }
    }
}

/// Applies the tier to the configured domain. The result always satisfies `0 < lo <= hi`.
pub fn bounds_for(domain: SearchBounds, tier: Option<QualityTier>, tiers: &Tiers) -> SearchBounds {
    match tier {
        None | Some(QualityTier::Standard) => domain,
        Some(QualityTier::Draft) => {
            let hi = domain.hi.min(tiers.draft_max_dpi).max(domain.lo);
            SearchBounds { lo: domain.lo, hi }
        }
        Some(QualityTier::High) => {
            let lo = domain.lo.max(tiers.high_min_dpi).min(domain.hi);
            SearchBounds { lo, hi: domain.hi }
        }
    }
}
