//! Evolution, decay, and compaction passes.
//!
//! Three batch scans over the node table, each with a distinct contract:
//!
//! - **evolve** — lossless. Reclassify every node's tier from its current
//!   relevance score; derive summaries on first demotion into tier 3 and
//!   deep-compress on first demotion into tier 4. Never deletes, and
//!   running it twice back-to-back changes nothing the second time.
//! - **decay** — erode relevance by idle time, then reclassify exactly
//!   like evolve.
//! - **compact** — lossy, age-gated reclamation. Summarizes and demotes
//!   idle working-memory nodes, and (aggressive mode only) deletes
//!   deep-archive nodes idle past 30 days. This is the only path that
//!   deletes data.
//!
//! At most one pass runs at a time; a re-entrant call is rejected, not
//! queued. A failure on one node is logged and skipped so the rest of
//! the pass completes; reruns self-heal via idempotence.

use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::Mutex;

use spiral_core::models::{estimate_tokens, ContextNode};
use spiral_core::relevance::{classify_tier, TierThresholds};
use spiral_core::store::{NodeStore, VectorIndex};
use spiral_core::summarize::{cap_chars, summarize, DEEP_CAP, SUMMARY_CAP};

/// Relevance never decays below this floor.
pub const DECAY_FLOOR: f64 = 0.01;

/// Idle gates (hours) before compaction touches a tier.
pub const COMPACT_T2_IDLE_HOURS: f64 = 24.0;
pub const COMPACT_T3_IDLE_HOURS: f64 = 72.0;
pub const COMPACT_T4_IDLE_HOURS: f64 = 7.0 * 24.0;
pub const COMPACT_T5_IDLE_HOURS: f64 = 30.0 * 24.0;

#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct EvolveReport {
    pub scanned: usize,
    pub promoted: usize,
    pub demoted: usize,
    pub summarized: usize,
    pub deep_compressed: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DecayReport {
    pub scanned: usize,
    pub decayed: usize,
    pub promoted: usize,
    pub demoted: usize,
    pub summarized: usize,
    pub deep_compressed: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CompactReport {
    pub scanned: usize,
    pub compacted: usize,
    pub deleted: usize,
    pub freed_tokens: i64,
}

pub struct Evolution {
    nodes: Arc<dyn NodeStore>,
    index: Arc<dyn VectorIndex>,
    thresholds: TierThresholds,
    decay_rate: f64,
    /// Serializes evolve/decay/compact; each pass reads-then-writes
    /// per-node level and score, so two interleaved passes would clobber
    /// each other.
    pass_guard: Mutex<()>,
}

impl Evolution {
    pub fn new(
        nodes: Arc<dyn NodeStore>,
        index: Arc<dyn VectorIndex>,
        thresholds: TierThresholds,
        decay_rate: f64,
    ) -> Self {
        Self {
            nodes,
            index,
            thresholds,
            decay_rate,
            pass_guard: Mutex::new(()),
        }
    }

    /// Lossless tier reclassification from current relevance scores.
    pub async fn evolve(&self, now: i64) -> Result<EvolveReport> {
        let Ok(_guard) = self.pass_guard.try_lock() else {
            bail!("another maintenance pass is already running");
        };

        let mut report = EvolveReport::default();
        for node in self.nodes.all().await? {
            report.scanned += 1;
            if let Err(e) = self.reclassify(&node, node.relevance, now, &mut Moves {
                promoted: &mut report.promoted,
                demoted: &mut report.demoted,
                summarized: &mut report.summarized,
                deep_compressed: &mut report.deep_compressed,
            })
            .await
            {
                tracing::warn!(node_id = %node.id, error = %e, "evolve skipped node");
            }
        }
        tracing::debug!(?report, "evolve pass complete");
        Ok(report)
    }

    /// Time-based relevance erosion followed by reclassification.
    pub async fn decay(&self, now: i64) -> Result<DecayReport> {
        let Ok(_guard) = self.pass_guard.try_lock() else {
            bail!("another maintenance pass is already running");
        };

        let mut report = DecayReport::default();
        for node in self.nodes.all().await? {
            report.scanned += 1;
            let result: Result<()> = async {
                let hours = node.hours_since_access(now);
                let eroded =
                    (node.relevance * (-self.decay_rate * hours).exp()).max(DECAY_FLOOR);
                if (eroded - node.relevance).abs() > f64::EPSILON {
                    self.nodes.set_relevance(&node.id, eroded, now).await?;
                    report.decayed += 1;
                }
                self.reclassify(&node, eroded, now, &mut Moves {
                    promoted: &mut report.promoted,
                    demoted: &mut report.demoted,
                    summarized: &mut report.summarized,
                    deep_compressed: &mut report.deep_compressed,
                })
                .await
            }
            .await;
            if let Err(e) = result {
                tracing::warn!(node_id = %node.id, error = %e, "decay skipped node");
            }
        }
        tracing::debug!(?report, "decay pass complete");
        Ok(report)
    }

    /// Age-gated lossy compaction. With `aggressive`, the idle gates on
    /// tiers 2 and 3 are waived, tier-4 nodes idle past 7 days sink to
    /// tier 5, and tier-5 nodes idle past 30 days are deleted outright.
    pub async fn compact(&self, now: i64, aggressive: bool) -> Result<CompactReport> {
        let Ok(_guard) = self.pass_guard.try_lock() else {
            bail!("another maintenance pass is already running");
        };

        let mut report = CompactReport::default();
        for node in self.nodes.all().await? {
            report.scanned += 1;
            if let Err(e) = self.compact_node(&node, now, aggressive, &mut report).await {
                tracing::warn!(node_id = %node.id, error = %e, "compact skipped node");
            }
        }
        tracing::debug!(?report, aggressive, "compact pass complete");
        Ok(report)
    }

    async fn compact_node(
        &self,
        node: &ContextNode,
        now: i64,
        aggressive: bool,
        report: &mut CompactReport,
    ) -> Result<()> {
        let idle = node.hours_since_access(now);
        match node.level {
            2 if aggressive || idle > COMPACT_T2_IDLE_HOURS => {
                let summary = node
                    .summary
                    .clone()
                    .unwrap_or_else(|| summarize(&node.content, SUMMARY_CAP));
                self.demote_with_summary(node, summary, 3, now, report).await
            }
            3 if aggressive || idle > COMPACT_T3_IDLE_HOURS => {
                let base = node.summary.as_deref().unwrap_or(&node.content);
                let summary = cap_chars(&summarize(base, DEEP_CAP), DEEP_CAP);
                self.demote_with_summary(node, summary, 4, now, report).await
            }
            4 if aggressive && idle > COMPACT_T4_IDLE_HOURS => {
                self.nodes.set_level(&node.id, 5, now).await?;
                report.compacted += 1;
                Ok(())
            }
            5 if aggressive && idle > COMPACT_T5_IDLE_HOURS => {
                self.nodes.delete(&node.id).await?;
                self.index.remove(&node.id).await?;
                report.deleted += 1;
                report.freed_tokens += node.token_count;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn demote_with_summary(
        &self,
        node: &ContextNode,
        summary: String,
        level: i64,
        now: i64,
        report: &mut CompactReport,
    ) -> Result<()> {
        let new_tokens = estimate_tokens(&summary);
        let mut updated = node.clone();
        updated.summary = Some(summary);
        updated.level = level;
        // token_count tracks the fidelity now served, so the pre/post
        // delta is the reclaimed budget.
        updated.token_count = new_tokens;
        updated.updated_at = now;
        self.nodes.update(&updated).await?;
        report.compacted += 1;
        report.freed_tokens += (node.token_count - new_tokens).max(0);
        Ok(())
    }

    /// Move a node to the tier its score maps to, deriving the summary
    /// artifacts on first demotion past the tier-3 and tier-4 boundaries.
    async fn reclassify(
        &self,
        node: &ContextNode,
        score: f64,
        now: i64,
        moves: &mut Moves<'_>,
    ) -> Result<()> {
        let target = classify_tier(&self.thresholds, score);
        if target == node.level {
            return Ok(());
        }
        if target < node.level {
            self.nodes.set_level(&node.id, target, now).await?;
            *moves.promoted += 1;
            return Ok(());
        }

        if node.level < 3 && target >= 3 && node.summary.is_none() {
            let summary = summarize(&node.content, SUMMARY_CAP);
            self.nodes.set_summary(&node.id, &summary, now).await?;
            *moves.summarized += 1;
        }
        if node.level < 4 && target >= 4 {
            let base = node
                .summary
                .clone()
                .unwrap_or_else(|| summarize(&node.content, SUMMARY_CAP));
            let compressed = cap_chars(&base, DEEP_CAP);
            self.nodes.set_summary(&node.id, &compressed, now).await?;
            *moves.deep_compressed += 1;
        }
        self.nodes.set_level(&node.id, target, now).await?;
        *moves.demoted += 1;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn hold_pass_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.pass_guard.lock().await
    }
}

struct Moves<'a> {
    promoted: &'a mut usize,
    demoted: &'a mut usize,
    summarized: &'a mut usize,
    deep_compressed: &'a mut usize,
}
