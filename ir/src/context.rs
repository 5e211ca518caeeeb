//! The instruction registry: typed signatures, costs, capabilities, renderers.
//!
//! A [`RuleContext`] is an explicitly constructed, caller-owned table. There
//! is no process-wide default; every engine call that needs operator
//! information takes a context reference. Lookups that miss are hard errors
//! at consolidation time - no implicit default cost or result type exists.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use snafu::OptionExt;

use matra_dtype::ValueType;

use crate::arena::ExprArena;
use crate::error::{self, Result};
use crate::stmt::StmtId;

/// Cost of an instruction given its operand statements.
pub type CostFn = Arc<dyn Fn(&ExprArena, &[StmtId]) -> u64 + Send + Sync>;

/// Custom textual rendering of an instruction. Receives the arena, the
/// context (for recursive rendering of operands) and the statement id.
pub type RenderFn = Arc<dyn Fn(&ExprArena, &RuleContext, StmtId) -> String + Send + Sync>;

/// Typed instruction signature: operator name plus ordered operand types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    op: String,
    operand_types: Vec<ValueType>,
}

impl Signature {
    pub fn new(op: &str, operand_types: impl IntoIterator<Item = ValueType>) -> Self {
        Self { op: op.to_string(), operand_types: operand_types.into_iter().collect() }
    }

    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn operand_types(&self) -> &[ValueType] {
        &self.operand_types
    }

    /// Same operand types under a different operator name. Used for
    /// capability lookups, where the abstract operator is keyed with the
    /// concrete instruction's operand types.
    pub fn with_op(&self, op: &str) -> Self {
        Self { op: op.to_string(), operand_types: self.operand_types.clone() }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.op)?;
        for (i, vtype) in self.operand_types.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(vtype.as_str())?;
        }
        f.write_str(")")
    }
}

/// Registry entry for one typed instruction signature.
#[derive(Clone)]
pub struct OpInfo {
    pub result_type: ValueType,
    /// Cost function; its absence at consolidation time is a distinct fatal
    /// error from an unregistered signature.
    pub cost: Option<CostFn>,
    /// Abstract operator classes this signature implements. Capability
    /// signatures may themselves carry further tags (multi-level classing).
    pub implements: HashSet<String>,
    /// Operand order is insignificant for matching.
    pub commutative: bool,
    pub renderer: Option<RenderFn>,
}

impl fmt::Debug for OpInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpInfo")
            .field("result_type", &self.result_type)
            .field("has_cost", &self.cost.is_some())
            .field("implements", &self.implements)
            .field("commutative", &self.commutative)
            .finish_non_exhaustive()
    }
}

impl OpInfo {
    /// Entry with unit cost, no tags, no renderer.
    pub fn new(result_type: ValueType) -> Self {
        Self {
            result_type,
            cost: Some(Arc::new(|_, _| 1)),
            implements: HashSet::new(),
            commutative: false,
            renderer: None,
        }
    }

    pub fn commutative(&mut self) -> &mut Self {
        self.commutative = true;
        self
    }

    pub fn implements(&mut self, capability: &str) -> &mut Self {
        self.implements.insert(capability.to_string());
        self
    }

    pub fn cost(&mut self, cost: CostFn) -> &mut Self {
        self.cost = Some(cost);
        self
    }

    pub fn no_cost(&mut self) -> &mut Self {
        self.cost = None;
        self
    }

    pub fn renderer(&mut self, renderer: RenderFn) -> &mut Self {
        self.renderer = Some(renderer);
        self
    }
}

/// Caller-owned instruction registry.
///
/// Read-only during matching and rewriting; construct and populate it before
/// starting a rewrite session.
#[derive(Debug, Default, Clone)]
pub struct RuleContext {
    ops: HashMap<Signature, OpInfo>,
}

impl RuleContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a signature, returning the entry for further configuration.
    /// Re-registering replaces the previous entry.
    pub fn register(&mut self, op: &str, operand_types: &[ValueType], result_type: ValueType) -> &mut OpInfo {
        let signature = Signature::new(op, operand_types.iter().copied());
        self.ops.insert(signature.clone(), OpInfo::new(result_type));
        self.ops.get_mut(&signature).expect("entry was just inserted")
    }

    pub fn try_lookup(&self, signature: &Signature) -> Option<&OpInfo> {
        self.ops.get(signature)
    }

    pub fn lookup(&self, signature: &Signature) -> Result<&OpInfo> {
        self.try_lookup(signature)
            .with_context(|| error::UnknownInstructionSnafu { signature: signature.to_string() })
    }

    /// Does `signature` implement `capability`, directly or through a chain
    /// of capability signatures (tag membership, not type inheritance)?
    pub fn implements(&self, signature: &Signature, capability: &str) -> bool {
        if signature.op() == capability {
            return true;
        }
        let mut frontier = vec![signature.clone()];
        let mut seen = HashSet::new();
        while let Some(current) = frontier.pop() {
            let Some(info) = self.ops.get(&current) else {
                continue;
            };
            for tag in &info.implements {
                if tag == capability {
                    return true;
                }
                if seen.insert(tag.clone()) {
                    frontier.push(current.with_op(tag));
                }
            }
        }
        false
    }

    /// All capability tags of a signature, transitively.
    pub fn capabilities(&self, signature: &Signature) -> HashSet<String> {
        let mut tags = HashSet::new();
        let mut frontier = vec![signature.clone()];
        while let Some(current) = frontier.pop() {
            let Some(info) = self.ops.get(&current) else {
                continue;
            };
            for tag in &info.implements {
                if tags.insert(tag.clone()) {
                    frontier.push(current.with_op(tag));
                }
            }
        }
        tags
    }

    pub fn is_commutative(&self, signature: &Signature) -> bool {
        self.ops.get(signature).is_some_and(|info| info.commutative)
    }

    /// Evaluate the registered cost function for a consolidated instruction.
    pub fn cost_of(&self, arena: &ExprArena, id: StmtId) -> Result<u64> {
        let signature = arena.signature(id)?;
        let info = self.lookup(&signature)?;
        let cost = info
            .cost
            .as_ref()
            .with_context(|| error::MissingCostFunctionSnafu { signature: signature.to_string() })?;
        Ok(cost(arena, arena.operands(id)))
    }
}
