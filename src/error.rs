use anyhow::anyhow;

use crate::models::GraphViolation;

pub type Result<T> = std::result::Result<T, LibError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Unauthenticated,
    NotFound,
    Storage,
    Unknown,
}

#[derive(Debug)]
pub struct LibError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub public: &'static str,
    pub violations: Vec<GraphViolation>,
    pub source: anyhow::Error,
}

impl LibError {
    pub fn storage(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Storage,
            code: "storage_failure",
            public,
            violations: Vec::new(),
            source,
        }
    }

    pub fn invalid(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Validation,
            code: "invalid_input",
            public,
            violations: Vec::new(),
            source,
        }
    }

    /// Validation failure carrying every violation found, not only the first.
    ///
    /// `code` and `public` describe the first violation so single-problem payloads
    /// keep a precise message.
    pub fn invalid_graph(violations: Vec<GraphViolation>) -> Self {
        let (code, public) = violations
            .first()
            .map(|first| (first.error_code(), first.public_message()))
            .unwrap_or(("invalid_graph", "Mind map graph is invalid"));
        let source = anyhow!(
            "graph validation failed with {} violation(s): {:?}",
            violations.len(),
            violations
        );
        Self {
            kind: ErrorKind::Validation,
            code,
            public,
            violations,
            source,
        }
    }

    pub fn unauthenticated(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Unauthenticated,
            code: "unauthenticated",
            public,
            violations: Vec::new(),
            source,
        }
    }

    pub fn not_found(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            code: "not_found",
            public,
            violations: Vec::new(),
            source,
        }
    }

    pub fn unknown(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            code: "unknown_error",
            public,
            violations: Vec::new(),
            source,
        }
    }

    pub fn message(public: &'static str) -> Self {
        Self::unknown(public, anyhow!(public))
    }

    /// Only transient storage failures may be retried, and only by the next autosave cycle.
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Storage
    }
}

impl std::fmt::Display for LibError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.public, self.code, self.source)
    }
}

impl std::error::Error for LibError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeId;

    #[test]
    fn invalid_graph_reports_first_violation_and_keeps_all() {
        let err = LibError::invalid_graph(vec![
            GraphViolation::EmptyLabel {
                node_id: NodeId::from("a"),
            },
            GraphViolation::DuplicateNodeId {
                node_id: NodeId::from("a"),
            },
        ]);
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.code, "node_label_required");
        assert_eq!(err.violations.len(), 2);
        assert!(!err.is_retryable());
    }

    #[test]
    fn only_storage_failures_are_retryable() {
        assert!(LibError::storage("down", anyhow!("io")).is_retryable());
        assert!(!LibError::not_found("gone", anyhow!("missing")).is_retryable());
        assert!(!LibError::unauthenticated("who", anyhow!("no token")).is_retryable());
    }
}
