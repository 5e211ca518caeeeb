//! The expression arena: append-only node store for one rewrite session.
//!
//! All statements of a tree (and every tree derived from it by rewriting)
//! live in one [`ExprArena`]. Operand references are [`StmtId`] indices, so
//! "same node reached twice" detection during traversal is O(1) and
//! equivalence-class rewiring is an index remap. Rewrites orphan nodes
//! instead of freeing them; the arena grows monotonically for the life of a
//! session.
//!
//! # Consolidation
//!
//! An instruction starts out structurally mutable. [`ExprArena::consolidate`]
//! resolves its result type and cost function through the instruction
//! registry (a miss is a fatal configuration error), freezes the structural
//! fields and computes structural hashes bottom-up. Only metadata may change
//! afterwards; the engine-internal rewiring primitives recompute hashes after
//! every operand-slot mutation.

use std::collections::{HashMap, HashSet};

use smallvec::SmallVec;
use snafu::OptionExt;
use xxhash_rust::xxh64::Xxh64;

use matra_dtype::{Literal, ValueType};

use crate::context::{RuleContext, Signature};
use crate::error::{self, Error, Result};
use crate::stmt::{Meta, Stmt, StmtId, StmtKind};

/// Operator name of the materialized equivalence-class node.
pub const ECLASS_OP: &str = "_EClass";
/// Operator name of the argument-list node wrapped by a class node.
pub const ARGLIST_OP: &str = "_argList";

/// Engine-internal operators are typed structurally (result type of the
/// first operand, zero cost) and bypass the registry.
fn is_internal_op(op: &str) -> bool {
    op == ECLASS_OP || op == ARGLIST_OP
}

/// Append-only statement store.
#[derive(Debug, Default, Clone)]
pub struct ExprArena {
    nodes: Vec<Stmt>,
    token_counter: u64,
}

impl ExprArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push(&mut self, stmt: Stmt) -> StmtId {
        let id = StmtId(self.nodes.len() as u32);
        self.nodes.push(stmt);
        id
    }

    /// Draw a fresh ownership/index token, unique within this arena.
    pub fn fresh_token(&mut self) -> u64 {
        let token = self.token_counter;
        self.token_counter += 1;
        token
    }

    // =========================================================================
    // Construction
    // =========================================================================

    /// Create a free variable leaf. Variables are complete at creation and
    /// therefore born consolidated.
    pub fn var(&mut self, name: &str, vtype: ValueType) -> StmtId {
        let mut stmt = Stmt::new(name.to_string(), StmtKind::Var { vtype });
        stmt.consolidated = true;
        let id = self.push(stmt);
        let hash = self.compute_hash(id);
        self.nodes[id.index()].hash = hash;
        id
    }

    /// Create a literal leaf, born consolidated.
    ///
    /// Every call creates a fresh node; duplicate literals are interned later
    /// by the meta propagation pass.
    pub fn literal(&mut self, value: impl Into<Literal>) -> StmtId {
        let value = value.into();
        let mut stmt = Stmt::new(String::new(), StmtKind::Literal { value });
        stmt.consolidated = true;
        let id = self.push(stmt);
        let hash = self.compute_hash(id);
        self.nodes[id.index()].hash = hash;
        id
    }

    /// Create an instruction node. The result type stays unresolved until
    /// [`consolidate`](Self::consolidate).
    pub fn instr(&mut self, op: &str, operands: impl IntoIterator<Item = StmtId>) -> StmtId {
        let operands: SmallVec<[StmtId; 4]> = operands.into_iter().collect();
        self.push(Stmt::new(String::new(), StmtKind::Instr { op: op.to_string(), vtype: None, operands }))
    }

    /// Assign the binding identifier of a statement.
    pub fn set_name(&mut self, id: StmtId, name: &str) {
        self.nodes[id.index()].name = name.to_string();
    }

    /// Append an operand to an unconsolidated instruction.
    pub fn add_operand(&mut self, id: StmtId, operand: StmtId) -> Result<()> {
        let stmt = &mut self.nodes[id.index()];
        if stmt.consolidated {
            return error::ConsolidatedMutationSnafu { op: stmt.op().unwrap_or("<leaf>").to_string() }.fail();
        }
        match &mut stmt.kind {
            StmtKind::Instr { operands, .. } => {
                operands.push(operand);
                Ok(())
            }
            _ => error::ConsolidatedMutationSnafu { op: "<leaf>".to_string() }.fail(),
        }
    }

    // =========================================================================
    // Access
    // =========================================================================

    pub fn get(&self, id: StmtId) -> &Stmt {
        &self.nodes[id.index()]
    }

    pub fn op(&self, id: StmtId) -> Option<&str> {
        self.get(id).op()
    }

    pub fn operands(&self, id: StmtId) -> &[StmtId] {
        self.get(id).operands()
    }

    pub fn operand(&self, id: StmtId, index: usize) -> Result<StmtId> {
        self.operands(id).get(index).copied().with_context(|| error::MissingOperandSnafu {
            op: self.get(id).op().unwrap_or("<leaf>").to_string(),
            index,
        })
    }

    pub fn vtype(&self, id: StmtId) -> Option<ValueType> {
        self.get(id).vtype()
    }

    pub fn get_meta(&self, id: StmtId, key: &str) -> Option<&Meta> {
        self.get(id).get_meta(key)
    }

    pub fn put_meta(&mut self, id: StmtId, key: &str, value: Meta) {
        self.nodes[id.index()].put_meta(key, value);
    }

    /// Typed instruction signature: operator name plus resolved operand
    /// types. Requires every operand to be consolidated.
    pub fn signature(&self, id: StmtId) -> Result<Signature> {
        let stmt = self.get(id);
        let op = stmt.op().map(str::to_string).ok_or(Error::EmptyInstruction)?;
        if op.is_empty() {
            return Err(Error::EmptyInstruction);
        }
        let mut operand_types = Vec::with_capacity(stmt.operands().len());
        for &operand in stmt.operands() {
            let vtype = self
                .vtype(operand)
                .ok_or_else(|| Error::UnknownInstruction { signature: format!("{op}(<unconsolidated>)") })?;
            operand_types.push(vtype);
        }
        Ok(Signature::new(&op, operand_types))
    }

    // =========================================================================
    // Consolidation & hashing
    // =========================================================================

    /// Consolidate the subtree rooted at `id`: operands first, then the node
    /// itself. Resolves instruction result types through `ctx`, requires a
    /// cost function for every registered signature, freezes structure and
    /// computes structural hashes bottom-up.
    ///
    /// Consolidating an already-consolidated statement is a no-op and never
    /// alters its hash.
    pub fn consolidate(&mut self, id: StmtId, ctx: &RuleContext) -> Result<()> {
        for node in self.post_order_ids(id) {
            if self.get(node).consolidated {
                continue;
            }
            let Some(op) = self.get(node).op() else {
                continue;
            };
            if op.is_empty() {
                return Err(Error::EmptyInstruction);
            }

            let result_type = if is_internal_op(op) {
                let first = self.operand(node, 0)?;
                self.vtype(first).expect("class-node member must be consolidated")
            } else {
                let signature = self.signature(node)?;
                let info = ctx.lookup(&signature)?;
                if info.cost.is_none() {
                    return error::MissingCostFunctionSnafu { signature: signature.to_string() }.fail();
                }
                info.result_type
            };

            let stmt = &mut self.nodes[node.index()];
            if let StmtKind::Instr { vtype, .. } = &mut stmt.kind {
                *vtype = Some(result_type);
            }
            stmt.consolidated = true;
            let hash = self.compute_hash(node);
            self.nodes[node.index()].hash = hash;
        }
        Ok(())
    }

    /// Recompute structural hashes bottom-up over the subtree rooted at
    /// `root`. Must be called after any operand-slot mutation.
    pub fn recompute_hashes(&mut self, root: StmtId) {
        for node in self.post_order_ids(root) {
            let hash = self.compute_hash(node);
            self.nodes[node.index()].hash = hash;
        }
    }

    /// Hash of one node from its own fields and its operands' stored hashes.
    fn compute_hash(&self, id: StmtId) -> u64 {
        let mut hasher = Xxh64::new(0);
        let stmt = self.get(id);
        match &stmt.kind {
            StmtKind::Var { vtype } => {
                hasher.update(b"var");
                hasher.update(stmt.name.as_bytes());
                hasher.update(vtype.as_str().as_bytes());
            }
            StmtKind::Literal { value } => {
                use std::hash::{Hash, Hasher};
                hasher.update(b"lit");
                let mut inner = std::collections::hash_map::DefaultHasher::new();
                value.hash(&mut inner);
                hasher.update(&inner.finish().to_le_bytes());
            }
            StmtKind::Instr { op, vtype, operands } => {
                hasher.update(b"ins");
                hasher.update(op.as_bytes());
                if let Some(vtype) = vtype {
                    hasher.update(vtype.as_str().as_bytes());
                }
                for &operand in operands {
                    hasher.update(&self.nodes[operand.index()].hash.to_le_bytes());
                }
            }
        }
        hasher.digest()
    }

    /// Structural equality of two subtrees within this arena.
    pub fn structural_eq(&self, a: StmtId, b: StmtId) -> bool {
        structural_eq(self, a, self, b)
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    /// Pre-order node ids, visiting each identity once. Shared subtrees are
    /// listed at their first occurrence only.
    pub fn pre_order_ids(&self, root: StmtId) -> Vec<StmtId> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            order.push(node);
            for &operand in self.operands(node).iter().rev() {
                stack.push(operand);
            }
        }
        order
    }

    /// Post-order node ids, visiting each identity once.
    pub fn post_order_ids(&self, root: StmtId) -> Vec<StmtId> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![(root, false)];
        while let Some((node, expanded)) = stack.pop() {
            if expanded {
                order.push(node);
                continue;
            }
            if !seen.insert(node) {
                continue;
            }
            stack.push((node, true));
            for &operand in self.operands(node).iter().rev() {
                if !seen.contains(&operand) {
                    stack.push((operand, false));
                }
            }
        }
        order
    }

    /// Post-order occurrences: every occurrence of a shared node is visited
    /// once per parent slot, paired with its `(parent, operand index)`. The
    /// root occurrence carries `None`. This is the traversal metadata
    /// propagation needs, since metadata is occurrence-local prior to
    /// canonicalization and the pass replaces parent slots.
    ///
    /// Cost is proportional to the tree expansion of the DAG, not its node
    /// count.
    pub fn post_order_occurrences(&self, root: StmtId) -> Vec<(StmtId, Option<(StmtId, usize)>)> {
        let mut order = Vec::new();
        let mut stack = vec![(root, None, false)];
        while let Some((node, parent, expanded)) = stack.pop() {
            if expanded {
                order.push((node, parent));
                continue;
            }
            stack.push((node, parent, true));
            for (i, &operand) in self.operands(node).iter().enumerate().rev() {
                stack.push((operand, Some((node, i)), false));
            }
        }
        order
    }

    // =========================================================================
    // Rewiring & copying
    // =========================================================================

    /// Engine-internal rewiring primitive: overwrite one operand slot of an
    /// instruction. The caller is responsible for recomputing hashes over
    /// every affected root afterwards.
    pub(crate) fn replace_operand(&mut self, parent: StmtId, index: usize, new_operand: StmtId) {
        if let StmtKind::Instr { operands, .. } = &mut self.nodes[parent.index()].kind {
            operands[index] = new_operand;
        }
    }

    /// Engine-internal: replace the whole operand list of an instruction.
    /// Used when a materialized class node absorbs new members.
    pub(crate) fn replace_operands(&mut self, parent: StmtId, new_operands: impl IntoIterator<Item = StmtId>) {
        if let StmtKind::Instr { operands, .. } = &mut self.nodes[parent.index()].kind {
            *operands = new_operands.into_iter().collect();
        }
    }

    /// Deep-copy the subtree rooted at `root`, preserving internal sharing.
    /// Returns the new root together with the old-to-new identity map that
    /// assertion contexts consume when remapping class membership.
    pub fn deep_copy(&mut self, root: StmtId) -> (StmtId, HashMap<StmtId, StmtId>) {
        let order = self.post_order_ids(root);
        let mut map: HashMap<StmtId, StmtId> = HashMap::with_capacity(order.len());
        for node in order {
            let mut copy = self.nodes[node.index()].clone();
            if let StmtKind::Instr { operands, .. } = &mut copy.kind {
                for operand in operands.iter_mut() {
                    *operand = map[operand];
                }
            }
            // Shape metadata follows the copy where the copy covers it.
            for (_, value) in copy.meta.iter_mut() {
                if let Meta::Stmt(id) = value
                    && let Some(mapped) = map.get(id)
                {
                    *value = Meta::Stmt(*mapped);
                }
            }
            let new_id = self.push(copy);
            map.insert(node, new_id);
        }
        (map[&root], map)
    }

    /// Copy the spine from `root` down to and including `through`, sharing
    /// every off-spine subtree. Returns the new root and the old-to-new map
    /// for the copied spine nodes, or `None` when `through` is unreachable
    /// from `root`.
    ///
    /// This is what out-of-place rule application uses: the original tree
    /// stays intact and the replacement is spliced into the copied spine.
    pub fn path_copy(&mut self, root: StmtId, through: StmtId) -> Option<(StmtId, HashMap<StmtId, StmtId>)> {
        let mut path = if root == through { Vec::new() } else { self.find_path(root, through)? };
        path.push(through);
        let mut map = HashMap::with_capacity(path.len());
        // Copy bottom-up so each copied parent points at its copied child.
        for &node in path.iter().rev() {
            let mut copy = self.nodes[node.index()].clone();
            if let StmtKind::Instr { operands, .. } = &mut copy.kind {
                for operand in operands.iter_mut() {
                    if let Some(mapped) = map.get(operand) {
                        *operand = *mapped;
                    }
                }
            }
            let new_id = self.push(copy);
            map.insert(node, new_id);
        }
        Some((map[&root], map))
    }

    /// First pre-order path (root inclusive, target exclusive) from `root`
    /// to `target`.
    fn find_path(&self, root: StmtId, target: StmtId) -> Option<Vec<StmtId>> {
        let mut stack = vec![(root, 0usize)];
        let mut visited = HashSet::new();
        visited.insert(root);
        while let Some(&(node, next_child)) = stack.last() {
            let operands = self.operands(node);
            if next_child >= operands.len() {
                stack.pop();
                continue;
            }
            stack.last_mut().unwrap().1 += 1;
            let child = operands[next_child];
            if child == target {
                return Some(stack.iter().map(|&(n, _)| n).collect());
            }
            if visited.insert(child) {
                stack.push((child, 0));
            }
        }
        None
    }
}

/// Structural equality of two subtrees, possibly from different arenas.
///
/// Variables compare by name and type (their arena identity is irrelevant),
/// literals by value, instructions by operator, result type and operand-wise
/// recursion.
pub fn structural_eq(lhs_arena: &ExprArena, lhs: StmtId, rhs_arena: &ExprArena, rhs: StmtId) -> bool {
    let mut stack = vec![(lhs, rhs)];
    while let Some((a, b)) = stack.pop() {
        let (sa, sb) = (lhs_arena.get(a), rhs_arena.get(b));
        match (&sa.kind, &sb.kind) {
            (StmtKind::Var { vtype: ta }, StmtKind::Var { vtype: tb }) => {
                if ta != tb || sa.name != sb.name {
                    return false;
                }
            }
            (StmtKind::Literal { value: va }, StmtKind::Literal { value: vb }) => {
                if va != vb {
                    return false;
                }
            }
            (
                StmtKind::Instr { op: oa, vtype: ta, operands: la },
                StmtKind::Instr { op: ob, vtype: tb, operands: lb },
            ) => {
                if oa != ob || ta != tb || la.len() != lb.len() {
                    return false;
                }
                stack.extend(la.iter().copied().zip(lb.iter().copied()));
            }
            _ => return false,
        }
    }
    true
}
