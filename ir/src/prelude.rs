//! Convenience re-exports for engine consumers.

pub use crate::arena::ExprArena;
pub use crate::assertions::EquivalenceAssertions;
pub use crate::builtins::default_context;
pub use crate::context::RuleContext;
pub use crate::error::{Error, Result};
pub use crate::heuristic::{Heuristic, HeuristicSequence, HeuristicTransform};
pub use crate::meta::MetaPropagator;
pub use crate::rule::Rule;
pub use crate::ruleset::RuleSet;
pub use crate::stmt::{Meta, StmtId, meta_keys};
pub use matra_dtype::{Literal, ValueType};
