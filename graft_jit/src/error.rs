//! Errors raised by the inlining engine.
//!
//! Heuristic rejections are not errors; they come back as a
//! [`Decision`](crate::opt::inline::Decision). What ends up here either
//! terminates the inlining pass (contract violations, collaborator failures)
//! or reports bad configuration.

use thiserror::Error;

use crate::ir::kind::MethodId;
use crate::ir::node::NodeId;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum InlineError {
    /// The node handed to the inliner is not a live invoke.
    #[error("node {0} is not a live call site")]
    InvalidCallSite(NodeId),

    #[error("unknown method {0}")]
    UnknownMethod(MethodId),

    /// The method exists but has no body to inline (native, abstract).
    #[error("method {0} has no inlineable body")]
    MissingBody(MethodId),

    /// A freshly built graph has nothing after its start node.
    #[error("graph built for {0} has an empty body")]
    EmptyCalleeBody(MethodId),

    #[error("callee {method} is malformed: {reason}")]
    MalformedCallee { method: MethodId, reason: String },

    #[error("malformed graph: {0}")]
    MalformedGraph(String),

    /// A phase grew the graph beyond its declared growth factor.
    #[error(
        "phase contract of {owner} violated{}: size {before} -> {after}, \
         expected ratio <= {expected_ratio:.3}, observed {observed_ratio:.3}",
        method.map(|m| format!(" while compiling {m}")).unwrap_or_default()
    )]
    ContractViolation {
        owner: String,
        method: Option<MethodId>,
        before: i64,
        after: i64,
        expected_ratio: f64,
        observed_ratio: f64,
    },

    #[error("unknown inlining option `{0}`")]
    UnknownOption(String),

    #[error("invalid value `{value}` for inlining option `{name}`")]
    InvalidOption { name: String, value: String },
}

/// Result type for inlining operations.
pub type InlineResult<T> = Result<T, InlineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_violation_message_names_owner_and_method() {
        let err = InlineError::ContractViolation {
            owner: "inlining".into(),
            method: Some(MethodId(9)),
            before: 10_000,
            after: 20_000,
            expected_ratio: 1.5,
            observed_ratio: 2.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("inlining"));
        assert!(msg.contains("while compiling m9"));
        assert!(msg.contains("10000 -> 20000"));
        assert!(msg.contains("1.500"));
    }

    #[test]
    fn test_unknown_option_message() {
        let err = InlineError::UnknownOption("MaxFoo".into());
        assert_eq!(err.to_string(), "unknown inlining option `MaxFoo`");
    }
}
