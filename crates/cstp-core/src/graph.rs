// crates/cstp-core/src/graph.rs
// ============================================================================
// Module: Decision Graph
// Description: Typed directional edges between decisions with traversal.
// Purpose: Link decisions, walk subgraphs, and auto-link on record.
// Dependencies: crate::core, serde, thiserror
// ============================================================================

//! ## Overview
//! Edges are additive and may form cycles (supersedes chains broken by
//! reverses are legal); traversal therefore carries an explicit visited
//! set. Edges live in an append-only log replayed into memory at startup,
//! keyed by `(source, target, type)` with the last record winning. The
//! auto-link pass derives heuristic edges from related-to hints, shared
//! patterns, and shared tags; its failures are logged, never surfaced.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::decision::DecisionRecord;
use crate::core::enums::Direction;
use crate::core::enums::EdgeType;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum edges created by one auto-link pass.
const AUTO_LINK_MAX_EDGES: usize = 5;
/// Minimum shared tags for a tag-based auto-link.
const AUTO_LINK_MIN_SHARED_TAGS: usize = 2;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Graph errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Edge log I/O failure.
    #[error("edge log error: {0}")]
    Log(String),
    /// Graph state mutex poisoned.
    #[error("graph state poisoned")]
    Poisoned,
}

// ============================================================================
// SECTION: Edge Log
// ============================================================================

/// Append-only storage for graph edges.
pub trait EdgeLog: Send + Sync {
    /// Appends one edge.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Log`] when the append fails.
    fn append(&self, edge: &EdgeRecord) -> Result<(), GraphError>;

    /// Loads all edges in append order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Log`] when the log is unreadable.
    fn load(&self) -> Result<Vec<EdgeRecord>, GraphError>;
}

/// In-memory edge log for tests and log-less deployments.
#[derive(Debug, Default)]
pub struct MemoryEdgeLog {
    /// Appended edges in order.
    edges: Mutex<Vec<EdgeRecord>>,
}

impl MemoryEdgeLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EdgeLog for MemoryEdgeLog {
    fn append(&self, edge: &EdgeRecord) -> Result<(), GraphError> {
        let mut edges = self.edges.lock().map_err(|_| GraphError::Poisoned)?;
        edges.push(edge.clone());
        Ok(())
    }

    fn load(&self) -> Result<Vec<EdgeRecord>, GraphError> {
        let edges = self.edges.lock().map_err(|_| GraphError::Poisoned)?;
        Ok(edges.clone())
    }
}

// ============================================================================
// SECTION: Edge Record
// ============================================================================

/// One typed directional edge.
///
/// # Invariants
/// - Identity is `(source, target, edge_type)`; later records replace
///   earlier ones on replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// Source decision id.
    pub source: String,
    /// Target decision id.
    pub target: String,
    /// Edge type.
    pub edge_type: EdgeType,
    /// Optional weight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    /// Optional free-form context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// Creator agent id.
    pub created_by: String,
}

/// Subgraph returned by traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Subgraph {
    /// Node ids reachable within the requested depth, including the root.
    pub nodes: Vec<String>,
    /// Edges among the reachable nodes.
    pub edges: Vec<EdgeRecord>,
}

/// One neighbor with its connecting edge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    /// Neighboring node id.
    pub id: String,
    /// Edge connecting the node to the neighbor.
    pub edge: EdgeRecord,
}

// ============================================================================
// SECTION: Graph Store
// ============================================================================

/// In-memory edge set replayed from the log, with write-through appends.
pub struct DecisionGraph {
    /// Edges keyed by `(source, target, type)`.
    edges: Mutex<BTreeMap<(String, String, EdgeType), EdgeRecord>>,
    /// Durable log.
    log: Box<dyn EdgeLog>,
}

impl std::fmt::Debug for DecisionGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionGraph").finish_non_exhaustive()
    }
}

impl DecisionGraph {
    /// Loads the graph from an edge log.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError`] when the log is unreadable.
    pub fn load(log: Box<dyn EdgeLog>) -> Result<Self, GraphError> {
        let mut edges = BTreeMap::new();
        for edge in log.load()? {
            edges.insert(
                (edge.source.clone(), edge.target.clone(), edge.edge_type),
                edge,
            );
        }
        Ok(Self {
            edges: Mutex::new(edges),
            log,
        })
    }

    /// Adds one edge, writing through to the log.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError`] when the log append fails.
    pub fn link(&self, edge: EdgeRecord) -> Result<(), GraphError> {
        self.log.append(&edge)?;
        let mut edges = self.edges.lock().map_err(|_| GraphError::Poisoned)?;
        edges.insert(
            (edge.source.clone(), edge.target.clone(), edge.edge_type),
            edge,
        );
        Ok(())
    }

    /// Number of stored edges.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Poisoned`] when the state mutex is poisoned.
    pub fn edge_count(&self) -> Result<usize, GraphError> {
        Ok(self.edges.lock().map_err(|_| GraphError::Poisoned)?.len())
    }

    /// Subgraph reachable from `node` within `depth` hops.
    ///
    /// Traversal respects `direction` and the optional edge-type
    /// restriction; a visited set makes cycles safe.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Poisoned`] when the state mutex is poisoned.
    pub fn subgraph(
        &self,
        node: &str,
        depth: usize,
        edge_types: Option<&[EdgeType]>,
        direction: Direction,
    ) -> Result<Subgraph, GraphError> {
        let edges = self.edges.lock().map_err(|_| GraphError::Poisoned)?;
        let all: Vec<&EdgeRecord> = edges
            .values()
            .filter(|e| edge_types.is_none_or(|types| types.contains(&e.edge_type)))
            .collect();

        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut frontier: VecDeque<(String, usize)> = VecDeque::new();
        visited.insert(node.to_string());
        frontier.push_back((node.to_string(), 0));

        while let Some((current, hops)) = frontier.pop_front() {
            if hops >= depth {
                continue;
            }
            for edge in &all {
                let next = match direction {
                    Direction::Out if edge.source == current => Some(&edge.target),
                    Direction::In if edge.target == current => Some(&edge.source),
                    Direction::Both if edge.source == current => Some(&edge.target),
                    Direction::Both if edge.target == current => Some(&edge.source),
                    _ => None,
                };
                if let Some(next) = next {
                    if visited.insert(next.clone()) {
                        frontier.push_back((next.clone(), hops + 1));
                    }
                }
            }
        }

        let subgraph_edges: Vec<EdgeRecord> = all
            .iter()
            .filter(|e| visited.contains(&e.source) && visited.contains(&e.target))
            .map(|e| (*e).clone())
            .collect();

        Ok(Subgraph {
            nodes: visited.into_iter().collect(),
            edges: subgraph_edges,
        })
    }

    /// One-hop frontier of a node.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::Poisoned`] when the state mutex is poisoned.
    pub fn neighbors(
        &self,
        node: &str,
        direction: Direction,
        edge_type: Option<EdgeType>,
        limit: usize,
    ) -> Result<Vec<Neighbor>, GraphError> {
        let edges = self.edges.lock().map_err(|_| GraphError::Poisoned)?;
        let mut neighbors = Vec::new();
        for edge in edges.values() {
            if let Some(required) = edge_type {
                if edge.edge_type != required {
                    continue;
                }
            }
            let neighbor = match direction {
                Direction::Out if edge.source == node => Some(edge.target.clone()),
                Direction::In if edge.target == node => Some(edge.source.clone()),
                Direction::Both if edge.source == node => Some(edge.target.clone()),
                Direction::Both if edge.target == node => Some(edge.source.clone()),
                _ => None,
            };
            if let Some(id) = neighbor {
                neighbors.push(Neighbor {
                    id,
                    edge: edge.clone(),
                });
                if neighbors.len() >= limit {
                    break;
                }
            }
        }
        Ok(neighbors)
    }
}

// ============================================================================
// SECTION: Auto-Link
// ============================================================================

/// Derives heuristic edges for a newly recorded decision.
///
/// Sources, in priority order: explicit related-to hints, decisions
/// sharing the pattern, decisions sharing at least two tags. The pass is
/// capped at five edges and never links a decision to itself.
#[must_use]
pub fn auto_link_candidates(
    new_record: &DecisionRecord,
    corpus: &[DecisionRecord],
    created_at: String,
) -> Vec<EdgeRecord> {
    let mut edges: Vec<EdgeRecord> = Vec::new();
    let mut linked: BTreeSet<String> = BTreeSet::new();
    let source = new_record.id.short().to_string();
    let created_by = new_record
        .recorded_by
        .clone()
        .unwrap_or_else(|| "auto-link".to_string());

    for related in &new_record.related_to {
        if edges.len() >= AUTO_LINK_MAX_EDGES {
            return edges;
        }
        let target = related.id.clone();
        if target == source || !linked.insert(target.clone()) {
            continue;
        }
        edges.push(EdgeRecord {
            source: source.clone(),
            target,
            edge_type: EdgeType::RelatedTo,
            weight: Some((1.0 - related.distance).clamp(0.0, 1.0)),
            context: Some("related during deliberation".to_string()),
            created_at: created_at.clone(),
            created_by: created_by.clone(),
        });
    }

    for candidate in corpus {
        if edges.len() >= AUTO_LINK_MAX_EDGES {
            return edges;
        }
        let target = candidate.id.short().to_string();
        if target == source || linked.contains(&target) {
            continue;
        }

        let pattern_match = matches!(
            (&new_record.pattern, &candidate.pattern),
            (Some(a), Some(b)) if !a.is_empty() && a == b
        );
        let shared_tags = new_record
            .tags
            .iter()
            .filter(|tag| candidate.tags.contains(tag))
            .count();

        if pattern_match {
            linked.insert(target.clone());
            edges.push(EdgeRecord {
                source: source.clone(),
                target,
                edge_type: EdgeType::RelatedTo,
                weight: Some(0.8),
                context: new_record.pattern.clone().map(|p| format!("shared pattern: {p}")),
                created_at: created_at.clone(),
                created_by: created_by.clone(),
            });
        } else if shared_tags >= AUTO_LINK_MIN_SHARED_TAGS {
            linked.insert(target.clone());
            edges.push(EdgeRecord {
                source: source.clone(),
                target,
                edge_type: EdgeType::RelatedTo,
                weight: Some(0.5),
                context: Some(format!("{shared_tags} shared tags")),
                created_at: created_at.clone(),
                created_by: created_by.clone(),
            });
        }
    }

    edges
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use crate::core::decision::DecisionRecord;
    use crate::core::decision::RelatedDecision;
    use crate::core::enums::Category;
    use crate::core::enums::DecisionStatus;
    use crate::core::enums::Direction;
    use crate::core::enums::EdgeType;
    use crate::core::enums::Stakes;
    use crate::core::identifiers::DecisionId;
    use crate::graph::EdgeLog;

    use super::DecisionGraph;
    use super::EdgeRecord;
    use super::MemoryEdgeLog;
    use super::auto_link_candidates;

    fn edge(source: &str, target: &str, edge_type: EdgeType) -> EdgeRecord {
        EdgeRecord {
            source: source.to_string(),
            target: target.to_string(),
            edge_type,
            weight: None,
            context: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            created_by: "test".to_string(),
        }
    }

    fn record(id: &str, tags: &[&str], pattern: Option<&str>) -> DecisionRecord {
        DecisionRecord {
            id: DecisionId::new(id),
            summary: format!("decision {id}"),
            decision: format!("decision {id}"),
            category: Category::Process,
            confidence: 0.7,
            stakes: Stakes::Medium,
            status: DecisionStatus::Pending,
            date: "2026-01-01T00:00:00Z".to_string(),
            context: None,
            pattern: pattern.map(str::to_string),
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            project: None,
            feature: None,
            pr: None,
            kpi_indicators: Vec::new(),
            mental_state: None,
            review_by: None,
            recorded_by: None,
            reasons: Vec::new(),
            pre_decision: None,
            related_to: Vec::new(),
            bridge: None,
            deliberation: None,
            preserve: false,
            outcome: None,
            actual_result: None,
            lessons: None,
            affected_kpis: Vec::new(),
            reviewed_at: None,
            reviewed_by: None,
            extra: std::collections::BTreeMap::new(),
        }
    }

    #[allow(clippy::unwrap_used, reason = "memory log operations cannot fail in setup")]
    fn graph(edges: Vec<EdgeRecord>) -> DecisionGraph {
        let log = MemoryEdgeLog::new();
        for e in &edges {
            log.append(e).unwrap();
        }
        DecisionGraph::load(Box::new(log)).unwrap()
    }

    #[test]
    fn traversal_respects_depth_and_direction() -> Result<(), super::GraphError> {
        let g = graph(vec![
            edge("a", "b", EdgeType::Supersedes),
            edge("b", "c", EdgeType::Supersedes),
            edge("d", "a", EdgeType::Requires),
        ]);

        let out1 = g.subgraph("a", 1, None, Direction::Out)?;
        assert_eq!(out1.nodes, vec!["a".to_string(), "b".to_string()]);

        let both2 = g.subgraph("a", 2, None, Direction::Both)?;
        assert_eq!(both2.nodes.len(), 4);
        assert_eq!(both2.edges.len(), 3);

        let in1 = g.subgraph("a", 1, None, Direction::In)?;
        assert_eq!(in1.nodes, vec!["a".to_string(), "d".to_string()]);
        Ok(())
    }

    #[test]
    fn cycles_terminate_via_the_visited_set() -> Result<(), super::GraphError> {
        let g = graph(vec![
            edge("a", "b", EdgeType::Supersedes),
            edge("b", "a", EdgeType::Reverses),
        ]);
        let sub = g.subgraph("a", 10, None, Direction::Both)?;
        assert_eq!(sub.nodes.len(), 2);
        assert_eq!(sub.edges.len(), 2);
        Ok(())
    }

    #[test]
    fn edge_type_filter_restricts_traversal() -> Result<(), super::GraphError> {
        let g = graph(vec![
            edge("a", "b", EdgeType::Supersedes),
            edge("a", "c", EdgeType::RelatedTo),
        ]);
        let sub = g.subgraph("a", 1, Some(&[EdgeType::RelatedTo]), Direction::Out)?;
        assert_eq!(sub.nodes, vec!["a".to_string(), "c".to_string()]);
        Ok(())
    }

    #[test]
    fn neighbors_limit_and_type_filter_apply() -> Result<(), super::GraphError> {
        let g = graph(vec![
            edge("a", "b", EdgeType::RelatedTo),
            edge("a", "c", EdgeType::RelatedTo),
            edge("a", "d", EdgeType::Supersedes),
        ]);
        let neighbors = g.neighbors("a", Direction::Out, Some(EdgeType::RelatedTo), 10)?;
        assert_eq!(neighbors.len(), 2);

        let capped = g.neighbors("a", Direction::Out, None, 1)?;
        assert_eq!(capped.len(), 1);
        Ok(())
    }

    #[test]
    fn duplicate_edges_replay_last_record_wins() -> Result<(), super::GraphError> {
        let mut first = edge("a", "b", EdgeType::RelatedTo);
        first.weight = Some(0.1);
        let mut second = edge("a", "b", EdgeType::RelatedTo);
        second.weight = Some(0.9);
        let g = graph(vec![first, second]);
        assert_eq!(g.edge_count()?, 1);
        let neighbors = g.neighbors("a", Direction::Out, None, 10)?;
        assert_eq!(neighbors[0].edge.weight, Some(0.9));
        Ok(())
    }

    #[test]
    fn auto_link_prefers_hints_then_pattern_then_tags() {
        let mut new_record = record("aaaa0000", &["caching", "redis"], Some("cache-aside"));
        new_record.related_to = vec![RelatedDecision {
            id: "bbbb0000".to_string(),
            summary: "hint".to_string(),
            distance: 0.25,
        }];
        let corpus = vec![
            record("cccc0000", &[], Some("cache-aside")),
            record("dddd0000", &["caching", "redis"], None),
            record("eeee0000", &["caching"], None),
        ];

        let edges = auto_link_candidates(&new_record, &corpus, "2026-01-01T00:00:00Z".to_string());
        assert_eq!(edges.len(), 3);
        assert_eq!(edges[0].target, "bbbb0000");
        assert_eq!(edges[0].weight, Some(0.75));
        assert_eq!(edges[1].target, "cccc0000");
        assert_eq!(edges[2].target, "dddd0000");
        assert!(edges.iter().all(|e| e.edge_type == EdgeType::RelatedTo));
    }

    #[test]
    fn auto_link_never_links_to_self_and_caps_edges() {
        let new_record = record("aaaa0000", &["t1", "t2"], None);
        let corpus: Vec<DecisionRecord> = (0..10)
            .map(|i| record(&format!("bb{i:02}0000"), &["t1", "t2"], None))
            .chain(std::iter::once(record("aaaa0000", &["t1", "t2"], None)))
            .collect();
        let edges = auto_link_candidates(&new_record, &corpus, "2026-01-01T00:00:00Z".to_string());
        assert_eq!(edges.len(), 5);
        assert!(edges.iter().all(|e| e.target != "aaaa0000"));
    }
}
