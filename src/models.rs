use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::auth::UserId;
use crate::error::{LibError, Result};
use crate::validation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct MindMapId(pub Uuid);

impl MindMapId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for MindMapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MindMapId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

impl From<Uuid> for MindMapId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Client-chosen node identifier, unique within its mind map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct EdgeId(pub String);

impl EdgeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EdgeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EdgeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Canvas coordinates. A missing or `null` coordinate reads as NaN so validation reports
/// it as a non-finite position instead of failing to parse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    #[serde(default = "unset_coordinate", deserialize_with = "coordinate")]
    pub x: f64,
    #[serde(default = "unset_coordinate", deserialize_with = "coordinate")]
    pub y: f64,
}

fn unset_coordinate() -> f64 {
    f64::NAN
}

fn coordinate<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_radius: Option<String>,
}

impl NodeStyle {
    pub fn is_empty(&self) -> bool {
        self.background.is_none()
            && self.color.is_none()
            && self.border.is_none()
            && self.border_radius.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EdgeStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
}

impl EdgeStyle {
    pub fn is_empty(&self) -> bool {
        self.stroke.is_none() && self.stroke_width.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<NodeStyle>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, label: impl Into<String>, position: Position) -> Self {
        Self {
            id: id.into(),
            kind: None,
            label: label.into(),
            description: None,
            position,
            style: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<EdgeStyle>,
}

impl Edge {
    pub fn new(
        id: impl Into<EdgeId>,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            kind: None,
            style: None,
        }
    }

    pub fn touches(&self, node_id: &NodeId) -> bool {
        self.source == *node_id || self.target == *node_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MindMap {
    pub id: MindMapId,
    pub owner_id: UserId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MindMapSummary {
    pub id: MindMapId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub node_count: i64,
    pub edge_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeEndpoint {
    Source,
    Target,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphViolation {
    EmptyTitle,
    EmptyNodeId {
        index: usize,
    },
    EmptyLabel {
        node_id: NodeId,
    },
    NonFinitePosition {
        node_id: NodeId,
    },
    DuplicateNodeId {
        node_id: NodeId,
    },
    EmptyEdgeId {
        index: usize,
    },
    DuplicateEdgeId {
        edge_id: EdgeId,
    },
    UnknownNodeReference {
        edge_id: EdgeId,
        endpoint: EdgeEndpoint,
        missing_node_id: NodeId,
    },
    InvalidStrokeWidth {
        edge_id: EdgeId,
    },
}

impl GraphViolation {
    pub const fn error_code(&self) -> &'static str {
        match self {
            GraphViolation::EmptyTitle => "mind_map_title_required",
            GraphViolation::EmptyNodeId { .. } => "node_id_required",
            GraphViolation::EmptyLabel { .. } => "node_label_required",
            GraphViolation::NonFinitePosition { .. } => "node_position_not_finite",
            GraphViolation::DuplicateNodeId { .. } => "node_id_duplicate",
            GraphViolation::EmptyEdgeId { .. } => "edge_id_required",
            GraphViolation::DuplicateEdgeId { .. } => "edge_id_duplicate",
            GraphViolation::UnknownNodeReference { .. } => "edge_unknown_node_reference",
            GraphViolation::InvalidStrokeWidth { .. } => "edge_stroke_width_invalid",
        }
    }

    pub const fn public_message(&self) -> &'static str {
        match self {
            GraphViolation::EmptyTitle => "Mind map title is required",
            GraphViolation::EmptyNodeId { .. } => "Node id is required",
            GraphViolation::EmptyLabel { .. } => "Node label is required",
            GraphViolation::NonFinitePosition { .. } => "Node position must be finite",
            GraphViolation::DuplicateNodeId { .. } => "Node ids must be unique within a mind map",
            GraphViolation::EmptyEdgeId { .. } => "Edge id is required",
            GraphViolation::DuplicateEdgeId { .. } => "Edge ids must be unique within a mind map",
            GraphViolation::UnknownNodeReference {
                endpoint: EdgeEndpoint::Source,
                ..
            } => "Edge source node not found",
            GraphViolation::UnknownNodeReference {
                endpoint: EdgeEndpoint::Target,
                ..
            } => "Edge target node not found",
            GraphViolation::InvalidStrokeWidth { .. } => {
                "Edge stroke width must be a finite, non-negative number"
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMindMapPayload {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Full replacement of a mind map's title, description and graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceGraphPayload {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// A replace payload that passed validation and had its styles normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphDefinition {
    pub title: String,
    pub description: Option<String>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone)]
pub struct NewMindMap {
    pub title: String,
    pub description: Option<String>,
}

impl CreateMindMapPayload {
    pub fn normalize(self) -> Result<NewMindMap> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(LibError::invalid_graph(vec![GraphViolation::EmptyTitle]));
        }
        Ok(NewMindMap {
            title,
            description: self.description,
        })
    }
}

impl ReplaceGraphPayload {
    pub fn normalize(self) -> Result<GraphDefinition> {
        let mut violations = Vec::new();
        let title = self.title.trim().to_string();
        if title.is_empty() {
            violations.push(GraphViolation::EmptyTitle);
        }
        violations.extend(validation::graph_violations(&self.nodes, &self.edges));
        if !violations.is_empty() {
            return Err(LibError::invalid_graph(violations));
        }

        Ok(GraphDefinition {
            title,
            description: self.description,
            nodes: self.nodes.into_iter().map(normalize_node).collect(),
            edges: self.edges.into_iter().map(normalize_edge).collect(),
        })
    }
}

fn normalize_node(mut node: Node) -> Node {
    node.style = node.style.filter(|style| !style.is_empty());
    node
}

fn normalize_edge(mut edge: Edge) -> Edge {
    edge.style = edge.style.filter(|style| !style.is_empty());
    edge
}

pub(crate) fn missing_mind_map(id: MindMapId) -> LibError {
    LibError::not_found("Mind map not found", anyhow!("mind map {} not found", id))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn node_wire_format_uses_type_and_camel_case_style() {
        let node: Node = serde_json::from_value(json!({
            "id": "n1",
            "type": "idea",
            "label": "Root",
            "position": {"x": 1.5, "y": -2.0},
            "style": {"background": "#fff", "borderRadius": "4px"}
        }))
        .expect("node should deserialize");

        assert_eq!(node.kind.as_deref(), Some("idea"));
        assert_eq!(
            node.style.as_ref().and_then(|s| s.border_radius.as_deref()),
            Some("4px")
        );

        let value = serde_json::to_value(&node).expect("node should serialize");
        assert_eq!(value["type"], "idea");
        assert_eq!(value["style"]["borderRadius"], "4px");
        assert!(value.get("description").is_none());
    }

    #[test]
    fn missing_label_and_null_coordinates_reach_validation() {
        let payload: ReplaceGraphPayload = serde_json::from_value(json!({
            "title": "Plan",
            "nodes": [
                {"id": "n1", "position": {"x": 0.0, "y": 0.0}},
                {"id": "n2", "label": "Child", "position": {"x": null, "y": 4.0}},
                {"id": "n3", "label": "Loose", "position": {"y": 1.0}}
            ]
        }))
        .expect("payload should deserialize");

        let err = payload.normalize().expect_err("payload should fail");
        assert_eq!(
            err.violations,
            vec![
                GraphViolation::EmptyLabel {
                    node_id: NodeId::from("n1")
                },
                GraphViolation::NonFinitePosition {
                    node_id: NodeId::from("n2")
                },
                GraphViolation::NonFinitePosition {
                    node_id: NodeId::from("n3")
                },
            ]
        );
    }

    #[test]
    fn replace_payload_rejects_dangling_edges() {
        let payload = ReplaceGraphPayload {
            title: "Plan".to_string(),
            description: None,
            nodes: vec![Node::new("n1", "Root", Position::new(0.0, 0.0))],
            edges: vec![Edge::new("e1", "n1", "ghost")],
        };

        let err = payload.normalize().expect_err("dangling edge should fail");
        assert_eq!(err.public, "Edge target node not found");
        assert_eq!(err.violations.len(), 1);
    }

    #[test]
    fn replace_payload_collects_title_and_graph_violations() {
        let payload = ReplaceGraphPayload {
            title: "   ".to_string(),
            description: None,
            nodes: vec![Node::new("n1", "", Position::new(0.0, 0.0))],
            edges: vec![],
        };

        let err = payload.normalize().expect_err("payload should fail");
        assert_eq!(
            err.violations,
            vec![
                GraphViolation::EmptyTitle,
                GraphViolation::EmptyLabel {
                    node_id: NodeId::from("n1")
                }
            ]
        );
    }

    #[test]
    fn normalize_drops_empty_styles() {
        let mut node = Node::new("n1", "Root", Position::new(0.0, 0.0));
        node.style = Some(NodeStyle::default());
        let mut edge = Edge::new("e1", "n1", "n1");
        edge.style = Some(EdgeStyle {
            stroke: Some("#000".to_string()),
            stroke_width: None,
        });

        let definition = ReplaceGraphPayload {
            title: "Plan".to_string(),
            description: None,
            nodes: vec![node],
            edges: vec![edge],
        }
        .normalize()
        .expect("payload should normalize");

        assert_eq!(definition.nodes[0].style, None);
        assert!(definition.edges[0].style.is_some());
    }

    #[test]
    fn create_payload_trims_title() {
        let created = CreateMindMapPayload {
            title: "  Plan ".to_string(),
            description: None,
        }
        .normalize()
        .expect("title should normalize");
        assert_eq!(created.title, "Plan");

        let err = CreateMindMapPayload {
            title: " ".to_string(),
            description: None,
        }
        .normalize()
        .expect_err("blank title should fail");
        assert_eq!(err.code, "mind_map_title_required");
    }
}
