//! Term rewriting over linear-algebra expression DAGs.
//!
//! This crate is the optimizer core of a linear-algebra compiler: it
//! represents programs as typed expression DAGs, matches structural patterns
//! against them and produces semantically equivalent rewritten DAGs under
//! explicit cost and shape constraints.
//!
//! # Module Organization
//!
//! - [`stmt`] - statement nodes, identity, metadata
//! - [`arena`] - the per-session node store, consolidation, traversal
//! - [`context`] - the instruction registry (types, costs, capabilities)
//! - [`builtins`] - the default linear-algebra vocabulary
//! - [`pattern`] - structural unification and subexpression search
//! - [`rule`] / [`ruleset`] - rewrite rules, explicit links, rule sets
//! - [`assertions`] - equivalence classes and canonical class nodes
//! - [`meta`] - shape propagation, literal interning, validation
//! - [`heuristic`] - ordered, repeatable rule-set scheduling
//! - [`rules`] - built-in rule collections
//! - [`error`] - error types and result handling
//!
//! # Ownership model
//!
//! Every engine call threads explicit, caller-owned state: an [`ExprArena`]
//! owning the session's statements and a [`RuleContext`] describing the
//! operator vocabulary. There is no process-wide default context.

pub mod arena;
pub mod assertions;
pub mod builtins;
pub mod context;
pub mod error;
pub mod heuristic;
pub mod meta;
pub mod pattern;
pub mod prelude;
pub mod render;
pub mod rule;
pub mod rules;
pub mod ruleset;
pub mod stmt;

#[cfg(any(test, feature = "proptest"))]
pub mod test;

pub use arena::{ARGLIST_OP, ECLASS_OP, ExprArena, structural_eq};
pub use assertions::EquivalenceAssertions;
pub use context::{CostFn, OpInfo, RenderFn, RuleContext, Signature};
pub use error::{Error, Result};
pub use heuristic::{Heuristic, HeuristicSequence, HeuristicTransform, Outcome, Repeated, StepHook};
pub use meta::MetaPropagator;
pub use pattern::{MatchingSubexpression, find_matches, match_root};
pub use rule::{ComputeFn, IffFn, LinkSpec, Rule, RuleBuilder};
pub use ruleset::{ApplicableRule, RuleSet};
pub use stmt::{Meta, Stmt, StmtId, StmtKind, meta_keys};

// Re-export the value-type crate for convenience.
pub use matra_dtype::{Literal, ValueType};
