//! Pure shape and referential checks for mind map graphs.
//!
//! Every check collects violations instead of stopping at the first one so a
//! caller can report all problems with a payload at once.

use std::collections::HashSet;

use crate::error::{LibError, Result};
use crate::models::{Edge, EdgeEndpoint, EdgeId, GraphViolation, Node, NodeId};

pub fn node_violations(index: usize, node: &Node) -> Vec<GraphViolation> {
    let mut violations = Vec::new();
    if node.id.as_str().trim().is_empty() {
        violations.push(GraphViolation::EmptyNodeId { index });
    }
    if node.label.trim().is_empty() {
        violations.push(GraphViolation::EmptyLabel {
            node_id: node.id.clone(),
        });
    }
    if !node.position.x.is_finite() || !node.position.y.is_finite() {
        violations.push(GraphViolation::NonFinitePosition {
            node_id: node.id.clone(),
        });
    }
    violations
}

/// Self-loops (`source == target`) are accepted.
pub fn edge_violations(
    index: usize,
    edge: &Edge,
    node_ids: &HashSet<&NodeId>,
) -> Vec<GraphViolation> {
    let mut violations = Vec::new();
    if edge.id.as_str().trim().is_empty() {
        violations.push(GraphViolation::EmptyEdgeId { index });
    }
    if !node_ids.contains(&edge.source) {
        violations.push(GraphViolation::UnknownNodeReference {
            edge_id: edge.id.clone(),
            endpoint: EdgeEndpoint::Source,
            missing_node_id: edge.source.clone(),
        });
    }
    if !node_ids.contains(&edge.target) {
        violations.push(GraphViolation::UnknownNodeReference {
            edge_id: edge.id.clone(),
            endpoint: EdgeEndpoint::Target,
            missing_node_id: edge.target.clone(),
        });
    }
    if let Some(width) = edge.style.as_ref().and_then(|style| style.stroke_width) {
        if !width.is_finite() || width < 0.0 {
            violations.push(GraphViolation::InvalidStrokeWidth {
                edge_id: edge.id.clone(),
            });
        }
    }
    violations
}

pub fn graph_violations(nodes: &[Node], edges: &[Edge]) -> Vec<GraphViolation> {
    let mut violations = Vec::new();
    let mut node_ids: HashSet<&NodeId> = HashSet::with_capacity(nodes.len());
    for (index, node) in nodes.iter().enumerate() {
        violations.extend(node_violations(index, node));
        if !node_ids.insert(&node.id) {
            violations.push(GraphViolation::DuplicateNodeId {
                node_id: node.id.clone(),
            });
        }
    }

    let mut edge_ids: HashSet<&EdgeId> = HashSet::with_capacity(edges.len());
    for (index, edge) in edges.iter().enumerate() {
        violations.extend(edge_violations(index, edge, &node_ids));
        if !edge_ids.insert(&edge.id) {
            violations.push(GraphViolation::DuplicateEdgeId {
                edge_id: edge.id.clone(),
            });
        }
    }

    violations
}

pub fn validate_node(node: &Node) -> Result<()> {
    into_result(node_violations(0, node))
}

pub fn validate_edge(edge: &Edge, node_ids: &HashSet<&NodeId>) -> Result<()> {
    into_result(edge_violations(0, edge, node_ids))
}

pub fn validate_graph(nodes: &[Node], edges: &[Edge]) -> Result<()> {
    into_result(graph_violations(nodes, edges))
}

fn into_result(violations: Vec<GraphViolation>) -> Result<()> {
    if violations.is_empty() {
        Ok(())
    } else {
        Err(LibError::invalid_graph(violations))
    }
}
