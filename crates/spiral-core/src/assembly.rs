//! Query-time context assembly.
//!
//! Assembly turns a query into a tiered payload under a hard token
//! budget. Candidates come from the vector index (or a recency scan when
//! no query embedding is available), get a composite relevance score, and
//! form one descending-sorted list that the five tiers consume in turn:
//! tier 1 takes the head of the list down to its relevance floor, tier 2
//! scans what remains, and so on, with content fidelity degrading by
//! tier. A node placed in an earlier tier never reappears in a later one.
//! The total never exceeds the requested budget; unused budget rolls over
//! from earlier tiers to later ones.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::embedding::distance_to_similarity;
use crate::models::{estimate_tokens, ContextNode, TIER_COUNT};
use crate::relevance::{
    composite_score, connection_score, detect_categories, recency_score, type_boost,
    RelevanceParams,
};
use crate::store::{EdgeStore, NodeStore, VectorIndex};
use crate::summarize::{cap_chars, summarize, DEEP_CAP, SUMMARY_CAP, TRACE_CAP};

/// Semantic score assigned to every candidate when no query embedding
/// exists. Neutral: recency and connectivity decide the ordering.
pub const NO_EMBEDDING_SIMILARITY: f64 = 0.5;

/// Assembly tuning knobs.
#[derive(Debug, Clone)]
pub struct AssemblyParams {
    /// Candidates pulled from the index (or the recency scan).
    pub candidate_k: usize,
    /// Fraction of the token budget reserved per tier. Sums to 1.0.
    pub budget_split: [f64; TIER_COUNT],
    /// Minimum composite score to enter a tier; `None` means no floor.
    pub floors: [Option<f64>; TIER_COUNT],
}

impl Default for AssemblyParams {
    fn default() -> Self {
        Self {
            candidate_k: 50,
            budget_split: [0.35, 0.25, 0.20, 0.12, 0.08],
            floors: [Some(0.5), Some(0.2), Some(0.1), None, None],
        }
    }
}

impl AssemblyParams {
    pub fn validate(&self) -> Result<()> {
        let sum: f64 = self.budget_split.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            anyhow::bail!("budget split must sum to 1.0, got {sum}");
        }
        if self.budget_split.iter().any(|&f| f < 0.0) {
            anyhow::bail!("budget split fractions must be non-negative");
        }
        Ok(())
    }
}

/// One assembly invocation.
#[derive(Debug, Clone)]
pub struct AssemblyRequest {
    pub query: String,
    /// Query embedding; `None` switches candidate selection to recency.
    pub query_vec: Option<Vec<f32>>,
    /// Hard upper bound on payload tokens.
    pub max_tokens: i64,
    /// Restrict assembly to these tiers; `None` means all five. Budget
    /// reserved for excluded tiers rolls over to the included ones.
    pub levels: Option<Vec<i64>>,
}

/// Content fidelity a node was rendered at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fidelity {
    Full,
    Summary,
    Compressed,
    Deep,
    Trace,
}

/// A node as it appears in the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssembledNode {
    pub id: String,
    pub kind: String,
    pub text: String,
    pub tokens: i64,
    pub score: f64,
    pub fidelity: Fidelity,
}

/// One tier section of the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierPayload {
    pub level: i64,
    /// Budget available when this tier was filled (reserve + rollover).
    pub budget: i64,
    pub used_tokens: i64,
    pub nodes: Vec<AssembledNode>,
}

/// The assembled context for one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPayload {
    pub query: String,
    pub max_tokens: i64,
    pub total_tokens: i64,
    pub candidate_count: usize,
    pub tiers: Vec<TierPayload>,
}

struct Scored {
    node: ContextNode,
    score: f64,
}

/// Assemble a tiered context payload for a query.
pub async fn assemble(
    nodes: &dyn NodeStore,
    edges: &dyn EdgeStore,
    index: &dyn VectorIndex,
    req: &AssemblyRequest,
    params: &AssemblyParams,
    relevance: &RelevanceParams,
    now: i64,
) -> Result<ContextPayload> {
    params.validate()?;

    // Candidate selection: nearest neighbors when we have a query vector,
    // otherwise the most recently accessed nodes at a neutral similarity.
    let mut similarity: HashMap<String, f64> = HashMap::new();
    let candidates: Vec<ContextNode> = match &req.query_vec {
        Some(vec) => {
            let hits = index.search(vec, params.candidate_k).await?;
            for hit in &hits {
                similarity.insert(hit.id.clone(), distance_to_similarity(hit.distance));
            }
            let ids: Vec<String> = hits.into_iter().map(|h| h.id).collect();
            nodes.get_many(&ids, now).await?
        }
        None => nodes.recent(params.candidate_k).await?,
    };

    let candidate_ids: HashSet<String> = candidates.iter().map(|n| n.id.clone()).collect();
    let categories = detect_categories(&req.query);

    let mut scored = Vec::with_capacity(candidates.len());
    for node in candidates {
        let semantic = match req.query_vec {
            Some(_) => similarity.get(&node.id).copied().unwrap_or(0.0),
            None => NO_EMBEDDING_SIMILARITY,
        };
        let neighbors = edges.neighbor_ids(&node.id).await?;
        let in_set = neighbors.iter().filter(|id| candidate_ids.contains(*id)).count();
        let score = composite_score(
            relevance,
            node.level,
            semantic,
            recency_score(node.hours_since_access(now)),
            connection_score(in_set),
            type_boost(&node.kind, categories),
        );
        scored.push(Scored { node, score });
    }
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());

    let include: [bool; TIER_COUNT] = match &req.levels {
        Some(levels) => {
            let mut inc = [false; TIER_COUNT];
            for &l in levels {
                if (1..=TIER_COUNT as i64).contains(&l) {
                    inc[(l - 1) as usize] = true;
                }
            }
            inc
        }
        None => [true; TIER_COUNT],
    };

    let candidate_count = scored.len();
    let mut pending = scored;
    let mut tiers = Vec::new();
    let mut total_tokens = 0i64;
    let mut surplus = 0i64;

    for tier_idx in 0..TIER_COUNT {
        let level = (tier_idx + 1) as i64;
        let reserve = (req.max_tokens as f64 * params.budget_split[tier_idx]).floor() as i64;
        if !include[tier_idx] {
            surplus += reserve;
            continue;
        }
        let budget = reserve + surplus;
        let mut remaining = budget;
        let mut payload_nodes = Vec::new();

        if level == 2 {
            prefer_neighbors_of(&mut pending, &tiers, edges).await?;
        }

        let mut taken = 0;
        for s in &pending {
            if let Some(floor) = params.floors[tier_idx] {
                if s.score < floor {
                    break;
                }
            }
            let (text, fidelity) = render(&s.node, level);
            let tokens = estimate_tokens(&text);
            if tokens > remaining {
                // Strict budget: a node that does not fit ends this tier.
                break;
            }
            remaining -= tokens;
            payload_nodes.push(AssembledNode {
                id: s.node.id.clone(),
                kind: s.node.kind.clone(),
                text,
                tokens,
                score: s.score,
                fidelity,
            });
            taken += 1;
        }
        pending.drain(..taken);
        if level == 2 {
            // Undo the neighbor reorder so later floor scans see a
            // relevance-sorted list again.
            pending.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        }

        let used = budget - remaining;
        total_tokens += used;
        surplus = remaining;
        tiers.push(TierPayload {
            level,
            budget,
            used_tokens: used,
            nodes: payload_nodes,
        });
    }

    Ok(ContextPayload {
        query: req.query.clone(),
        max_tokens: req.max_tokens,
        total_tokens,
        candidate_count,
        tiers,
    })
}

/// Stable-partition the remaining candidates so 1-hop neighbors of
/// already-selected tier-1 nodes come first in the tier-2 scan. Working
/// memory that connects to the current focus wins the budget over
/// higher-scored but disconnected candidates.
async fn prefer_neighbors_of(
    pending: &mut Vec<Scored>,
    assembled: &[TierPayload],
    edges: &dyn EdgeStore,
) -> Result<()> {
    let mut focus_neighbors: HashSet<String> = HashSet::new();
    for tier in assembled.iter().filter(|t| t.level == 1) {
        for node in &tier.nodes {
            focus_neighbors.extend(edges.neighbor_ids(&node.id).await?);
        }
    }
    if focus_neighbors.is_empty() {
        return Ok(());
    }
    let (linked, rest): (Vec<Scored>, Vec<Scored>) = pending
        .drain(..)
        .partition(|s| focus_neighbors.contains(&s.node.id));
    pending.extend(linked);
    pending.extend(rest);
    Ok(())
}

/// Render a node's text at the fidelity its tier prescribes.
fn render(node: &ContextNode, level: i64) -> (String, Fidelity) {
    match level {
        1 => (node.content.clone(), Fidelity::Full),
        2 => match &node.summary {
            Some(s) => (s.clone(), Fidelity::Summary),
            None => (node.content.clone(), Fidelity::Full),
        },
        3 => match &node.summary {
            Some(s) => (cap_chars(s, SUMMARY_CAP), Fidelity::Compressed),
            None => (summarize(&node.content, SUMMARY_CAP), Fidelity::Compressed),
        },
        4 => match &node.summary {
            Some(s) => (cap_chars(s, DEEP_CAP), Fidelity::Deep),
            None => (summarize(&node.content, DEEP_CAP), Fidelity::Deep),
        },
        _ => match &node.summary {
            Some(s) => (cap_chars(s, TRACE_CAP), Fidelity::Trace),
            None => (summarize(&node.content, TRACE_CAP), Fidelity::Trace),
        },
    }
}
