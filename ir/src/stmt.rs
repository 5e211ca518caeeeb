//! Statement nodes: the universal node type of expression DAGs.
//!
//! A [`Stmt`] is either a leaf (free variable or literal) or an instruction
//! with an operator name and ordered operands. Statements live in an
//! [`ExprArena`](crate::ExprArena) and reference each other through
//! [`StmtId`] indices, so identity comparison and shared-node detection are
//! plain index equality.

use std::fmt;

use smallvec::SmallVec;

use matra_dtype::{Literal, ValueType};

/// Stable index identity of a statement within its arena.
///
/// Ids are never reused; rewrites that orphan nodes leave their ids dangling
/// in the arena for the rest of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StmtId(pub(crate) u32);

impl StmtId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StmtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Auxiliary metadata value attached to a statement.
///
/// Shape information (`nrow`/`ncol`) is stored as statements so that symbolic
/// dimensions stay first-class expressions; ownership and index identity tags
/// are opaque tokens drawn from the arena's counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Meta {
    Stmt(StmtId),
    Token(u64),
}

impl Meta {
    pub fn as_stmt(&self) -> Option<StmtId> {
        match self {
            Self::Stmt(id) => Some(*id),
            Self::Token(_) => None,
        }
    }

    pub fn as_token(&self) -> Option<u64> {
        match self {
            Self::Token(t) => Some(*t),
            Self::Stmt(_) => None,
        }
    }
}

/// Well-known metadata keys.
pub mod meta_keys {
    /// Row count of a matrix-typed statement (a statement, possibly symbolic).
    pub const NROW: &str = "nrow";
    /// Column count of a matrix-typed statement.
    pub const NCOL: &str = "ncol";
    /// Ownership token tying `_m` constructors to their index markers.
    pub const OWNER_ID: &str = "ownerId";
    /// Identity token of an `_idx` streaming-index marker.
    pub const IDX_ID: &str = "idxId";
}

/// The two statement shapes: leaves and instructions.
#[derive(Debug, Clone)]
pub enum StmtKind {
    /// A free variable: matches any statement of compatible type.
    Var { vtype: ValueType },
    /// A literal value, compared by value equality.
    Literal { value: Literal },
    /// An operator applied to ordered operands. The result type is `None`
    /// until consolidation resolves it through the instruction registry.
    Instr { op: String, vtype: Option<ValueType>, operands: SmallVec<[StmtId; 4]> },
}

/// A node in an expression DAG.
#[derive(Debug, Clone)]
pub struct Stmt {
    /// Binding identifier used during rule construction. Not part of
    /// structural identity for instructions.
    pub(crate) name: String,
    pub(crate) kind: StmtKind,
    /// Once set, the structural fields (operator, operands, type) are frozen;
    /// only metadata may still change.
    pub(crate) consolidated: bool,
    /// Structural hash, computed bottom-up after consolidation and after any
    /// operand-list mutation.
    pub(crate) hash: u64,
    pub(crate) meta: Vec<(String, Meta)>,
}

impl Stmt {
    pub(crate) fn new(name: String, kind: StmtKind) -> Self {
        Self { name, kind, consolidated: false, hash: 0, meta: Vec::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &StmtKind {
        &self.kind
    }

    pub fn is_instruction(&self) -> bool {
        matches!(self.kind, StmtKind::Instr { .. })
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.kind, StmtKind::Literal { .. })
    }

    pub fn is_var(&self) -> bool {
        matches!(self.kind, StmtKind::Var { .. })
    }

    /// Literal value carried by this statement, if it is a literal leaf.
    pub fn literal(&self) -> Option<Literal> {
        match &self.kind {
            StmtKind::Literal { value } => Some(*value),
            _ => None,
        }
    }

    /// Operator name, if this statement is an instruction.
    pub fn op(&self) -> Option<&str> {
        match &self.kind {
            StmtKind::Instr { op, .. } => Some(op),
            _ => None,
        }
    }

    /// Ordered operands; empty for leaves.
    pub fn operands(&self) -> &[StmtId] {
        match &self.kind {
            StmtKind::Instr { operands, .. } => operands,
            _ => &[],
        }
    }

    /// Resulting type. `None` only for instructions that have not been
    /// consolidated yet.
    pub fn vtype(&self) -> Option<ValueType> {
        match &self.kind {
            StmtKind::Var { vtype } => Some(*vtype),
            StmtKind::Literal { value } => Some(value.value_type()),
            StmtKind::Instr { vtype, .. } => *vtype,
        }
    }

    pub fn is_consolidated(&self) -> bool {
        self.consolidated
    }

    /// Structural hash. Zero until consolidation computes it.
    pub fn structural_hash(&self) -> u64 {
        self.hash
    }

    pub fn get_meta(&self, key: &str) -> Option<&Meta> {
        self.meta.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn meta_entries(&self) -> impl Iterator<Item = (&str, &Meta)> {
        self.meta.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn put_meta(&mut self, key: &str, value: Meta) {
        if let Some(slot) = self.meta.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            self.meta.push((key.to_string(), value));
        }
    }
}
