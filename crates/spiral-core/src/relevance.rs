//! Relevance scoring: pure, stateless functions over a node and query
//! context.
//!
//! The composite score blends four components — semantic similarity,
//! recency, graph connectivity, and a query-keyword type boost — with
//! per-tier weight tables, then maps scores onto tiers through a
//! 4-threshold ladder. Thresholds and weights are configuration, not
//! constants; [`RelevanceParams::validate`] rejects inconsistent tables.

use anyhow::{bail, Result};

use crate::models::TIER_COUNT;

/// Decay constant for the recency component (per hour).
///
/// Half-life ≈ ln(2)/0.05 ≈ 13.86 hours.
pub const RECENCY_LAMBDA: f64 = 0.05;

/// Neighbor count at which the connection component saturates.
pub const CONNECTION_SATURATION: f64 = 5.0;

/// Weights for the four composite components. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierWeights {
    pub semantic: f64,
    pub recency: f64,
    pub connection: f64,
    pub type_boost: f64,
}

impl TierWeights {
    fn sum(&self) -> f64 {
        self.semantic + self.recency + self.connection + self.type_boost
    }
}

/// The tier classification ladder: `l1_min > l2_min > l3_min > l4_min`,
/// all in (0, 1). Scores below `l4_min` land in tier 5.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierThresholds {
    pub l1_min: f64,
    pub l2_min: f64,
    pub l3_min: f64,
    pub l4_min: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            l1_min: 0.8,
            l2_min: 0.6,
            l3_min: 0.4,
            l4_min: 0.2,
        }
    }
}

/// Scoring configuration: the threshold ladder plus one weight row per tier.
///
/// The default rows shift emphasis from semantic+recency at tier 1 toward
/// connection+type at tier 5: deep-archive material is recalled by its
/// links and category more than by raw similarity.
#[derive(Debug, Clone)]
pub struct RelevanceParams {
    pub thresholds: TierThresholds,
    pub weights: [TierWeights; TIER_COUNT],
}

impl Default for RelevanceParams {
    fn default() -> Self {
        Self {
            thresholds: TierThresholds::default(),
            weights: [
                TierWeights { semantic: 0.45, recency: 0.35, connection: 0.10, type_boost: 0.10 },
                TierWeights { semantic: 0.40, recency: 0.30, connection: 0.15, type_boost: 0.15 },
                TierWeights { semantic: 0.35, recency: 0.25, connection: 0.20, type_boost: 0.20 },
                TierWeights { semantic: 0.30, recency: 0.20, connection: 0.25, type_boost: 0.25 },
                TierWeights { semantic: 0.25, recency: 0.15, connection: 0.30, type_boost: 0.30 },
            ],
        }
    }
}

impl RelevanceParams {
    /// Reject descending-order violations and weight rows that do not sum
    /// to 1.0 (within 1e-6).
    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        let ladder = [t.l1_min, t.l2_min, t.l3_min, t.l4_min];
        for v in ladder {
            if !(0.0 < v && v < 1.0) {
                bail!("tier thresholds must be in (0, 1), got {v}");
            }
        }
        if !(t.l1_min > t.l2_min && t.l2_min > t.l3_min && t.l3_min > t.l4_min) {
            bail!("tier thresholds must be strictly descending: l1 > l2 > l3 > l4");
        }
        for (i, w) in self.weights.iter().enumerate() {
            if (w.sum() - 1.0).abs() > 1e-6 {
                bail!("tier {} weights must sum to 1.0, got {}", i + 1, w.sum());
            }
        }
        Ok(())
    }
}

/// Recency score: `exp(-λ · hours_since_access)`.
///
/// 1.0 at zero elapsed time, asymptotically approaching 0.
pub fn recency_score(hours_since_access: f64) -> f64 {
    (-RECENCY_LAMBDA * hours_since_access.max(0.0)).exp()
}

/// Connection score: neighbor count saturating at 5.
pub fn connection_score(co_retrieved_neighbors: usize) -> f64 {
    (co_retrieved_neighbors as f64 / CONNECTION_SATURATION).min(1.0)
}

/// Keyword categories detected in a query text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryCategories {
    /// error / exception / crash terms present
    pub error: bool,
    /// design / pattern / architecture terms present
    pub design: bool,
    /// function / implement / code terms present
    pub code: bool,
}

/// Scan a query for the keyword categories that drive the type boost.
pub fn detect_categories(query: &str) -> QueryCategories {
    let q = query.to_lowercase();
    let has = |terms: &[&str]| terms.iter().any(|t| q.contains(t));
    QueryCategories {
        error: has(&["error", "exception", "crash", "panic", "fail", "bug"]),
        design: has(&["design", "pattern", "architecture", "structure", "decision"]),
        code: has(&["function", "implement", "code", "method", "refactor"]),
    }
}

/// Type boost: 1.0 when the node's kind matches a detected query category.
pub fn type_boost(kind: &str, categories: QueryCategories) -> f64 {
    let boosted = match kind {
        "error" => categories.error,
        "architecture" | "decision" => categories.design,
        "code" | "pattern" => categories.code,
        _ => false,
    };
    if boosted {
        1.0
    } else {
        0.0
    }
}

/// Composite relevance using the weight row for `level` (1..=5).
///
/// All four inputs are expected in `[0, 1]`; the output is clamped there
/// regardless.
pub fn composite_score(
    params: &RelevanceParams,
    level: i64,
    semantic: f64,
    recency: f64,
    connection: f64,
    boost: f64,
) -> f64 {
    let idx = (level.clamp(1, TIER_COUNT as i64) - 1) as usize;
    let w = params.weights[idx];
    let score =
        semantic * w.semantic + recency * w.recency + connection * w.connection + boost * w.type_boost;
    score.clamp(0.0, 1.0)
}

/// Map a relevance score onto a tier through the threshold ladder.
pub fn classify_tier(thresholds: &TierThresholds, score: f64) -> i64 {
    if score >= thresholds.l1_min {
        1
    } else if score >= thresholds.l2_min {
        2
    } else if score >= thresholds.l3_min {
        3
    } else if score >= thresholds.l4_min {
        4
    } else {
        5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recency_at_zero() {
        assert!((recency_score(0.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_recency_half_life() {
        // ln(2)/0.05 ≈ 13.86 hours
        let half_life = std::f64::consts::LN_2 / RECENCY_LAMBDA;
        let r = recency_score(half_life);
        assert!((r - 0.5).abs() < 0.01, "expected ≈0.5, got {r}");
    }

    #[test]
    fn test_recency_monotonic_decreasing() {
        assert!(recency_score(1.0) > recency_score(10.0));
        assert!(recency_score(100.0) > 0.0);
    }

    #[test]
    fn test_connection_saturates() {
        assert_eq!(connection_score(0), 0.0);
        assert!((connection_score(2) - 0.4).abs() < 1e-12);
        assert_eq!(connection_score(5), 1.0);
        assert_eq!(connection_score(50), 1.0);
    }

    #[test]
    fn test_detect_categories() {
        let c = detect_categories("why does this function crash with an exception?");
        assert!(c.error);
        assert!(c.code);
        assert!(!c.design);

        let c = detect_categories("review the architecture decision");
        assert!(c.design);
        assert!(!c.error);
    }

    #[test]
    fn test_type_boost_matches_category() {
        let c = detect_categories("stack trace of the crash");
        assert_eq!(type_boost("error", c), 1.0);
        assert_eq!(type_boost("code", c), 0.0);
        assert_eq!(type_boost("conversation", c), 0.0);
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        RelevanceParams::default().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_ladder() {
        let mut params = RelevanceParams::default();
        params.thresholds.l2_min = 0.9; // above l1_min
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_weights() {
        let mut params = RelevanceParams::default();
        params.weights[2].semantic = 0.9;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_composite_in_unit_interval() {
        let params = RelevanceParams::default();
        for level in 1..=5 {
            let s = composite_score(&params, level, 1.0, 1.0, 1.0, 1.0);
            assert!((0.0..=1.0).contains(&s));
            let s = composite_score(&params, level, 0.0, 0.0, 0.0, 0.0);
            assert_eq!(s, 0.0);
        }
    }

    #[test]
    fn test_classification_monotonic() {
        let t = TierThresholds::default();
        let mut last_tier = 1;
        let mut score = 1.0;
        while score >= 0.0 {
            let tier = classify_tier(&t, score);
            assert!(tier >= last_tier, "descending scores must never promote");
            last_tier = tier;
            score -= 0.01;
        }
        assert_eq!(classify_tier(&t, 0.85), 1);
        assert_eq!(classify_tier(&t, 0.7), 2);
        assert_eq!(classify_tier(&t, 0.5), 3);
        assert_eq!(classify_tier(&t, 0.3), 4);
        assert_eq!(classify_tier(&t, 0.05), 5);
    }
}
