//! Structural pattern matching over expression DAGs.
//!
//! The matcher unifies a rule-side pattern tree against subtrees of a target
//! tree by lock-step recursive descent:
//!
//! - a free-variable leaf binds to any target subtree of compatible type,
//!   subject to consistency with prior bindings of the same variable;
//! - a literal leaf requires exact value equality;
//! - an instruction requires the target operator to equal the pattern
//!   operator or to advertise it as an implemented capability through the
//!   registry, with matching arity and operand-wise recursion (retried in
//!   swapped order for commutative binary operators).
//!
//! Subexpression search walks the target pre-order and attempts a
//! root-anchored match at every occurrence, short-circuiting in first-match
//! mode and collecting everything in all-matches mode.

use std::collections::HashMap;

use crate::arena::ExprArena;
use crate::context::RuleContext;
use crate::stmt::{StmtId, StmtKind};

/// A successful match of a pattern against one target subtree.
///
/// Created per match attempt, discarded if the structural match or an `iff`
/// predicate fails, otherwise handed to rule application.
#[derive(Debug, Clone)]
pub struct MatchingSubexpression {
    /// Matched root in the target arena.
    pub root: StmtId,
    /// Parent occurrence of the matched root: `(parent, operand index)`,
    /// `None` when the match is anchored at the searched root.
    pub parent: Option<(StmtId, usize)>,
    /// Pattern node to target node pairing. Free variables map to their
    /// bound subtrees; instruction nodes map to the instructions they
    /// matched (capability-transferring explicit links consume the latter).
    bindings: HashMap<StmtId, StmtId>,
}

impl MatchingSubexpression {
    /// Target statement a pattern node was paired with.
    pub fn binding(&self, pattern_node: StmtId) -> Option<StmtId> {
        self.bindings.get(&pattern_node).copied()
    }

    pub fn bindings(&self) -> &HashMap<StmtId, StmtId> {
        &self.bindings
    }
}

/// Attempt a root-anchored match of `pattern_root` against `target_root`.
pub fn match_root(
    pattern: &ExprArena,
    pattern_root: StmtId,
    target: &ExprArena,
    target_root: StmtId,
    ctx: &RuleContext,
) -> Option<MatchingSubexpression> {
    let mut bindings = HashMap::new();
    match_nodes(pattern, pattern_root, target, target_root, ctx, &mut bindings)
        .then_some(MatchingSubexpression { root: target_root, parent: None, bindings })
}

/// Search the whole target tree for matches of the pattern.
///
/// Walks the target pre-order, attempting a root-anchored match at every
/// occurrence. `filter` is evaluated on each structural match (this is where
/// rule `iff` predicates hook in); matches failing it are discarded. With
/// `first_only`, the search stops at the first surviving match.
pub fn find_matches(
    pattern: &ExprArena,
    pattern_root: StmtId,
    target: &ExprArena,
    target_root: StmtId,
    ctx: &RuleContext,
    first_only: bool,
    filter: &dyn Fn(&MatchingSubexpression) -> bool,
) -> Vec<MatchingSubexpression> {
    let mut matches = Vec::new();
    let mut stack: Vec<(StmtId, Option<(StmtId, usize)>)> = vec![(target_root, None)];
    while let Some((node, parent)) = stack.pop() {
        let mut bindings = HashMap::new();
        if match_nodes(pattern, pattern_root, target, node, ctx, &mut bindings) {
            let candidate = MatchingSubexpression { root: node, parent, bindings };
            if filter(&candidate) {
                matches.push(candidate);
                if first_only {
                    return matches;
                }
            }
        }
        for (i, &operand) in target.operands(node).iter().enumerate().rev() {
            stack.push((operand, Some((node, i))));
        }
    }
    matches
}

/// Lock-step unification of one pattern node against one target node.
fn match_nodes(
    pattern: &ExprArena,
    p: StmtId,
    target: &ExprArena,
    t: StmtId,
    ctx: &RuleContext,
    bindings: &mut HashMap<StmtId, StmtId>,
) -> bool {
    match &pattern.get(p).kind {
        StmtKind::Var { vtype } => {
            if target.vtype(t) != Some(*vtype) {
                return false;
            }
            match bindings.get(&p) {
                None => {
                    bindings.insert(p, t);
                    true
                }
                Some(&prev) => {
                    // A variable re-binds consistently to the same identity;
                    // equal-valued literals count as the same value even when
                    // they have not been interned to one node yet.
                    prev == t
                        || match (target.get(prev).literal(), target.get(t).literal()) {
                            (Some(a), Some(b)) => a == b,
                            _ => false,
                        }
                }
            }
        }
        StmtKind::Literal { value } => target.get(t).literal() == Some(*value),
        StmtKind::Instr { op: pattern_op, vtype: pattern_type, operands: pattern_operands } => {
            let target_stmt = target.get(t);
            let StmtKind::Instr { operands: target_operands, .. } = &target_stmt.kind else {
                return false;
            };
            if target_stmt.vtype() != *pattern_type {
                return false;
            }
            if pattern_operands.len() != target_operands.len() {
                return false;
            }

            let Ok(target_signature) = target.signature(t) else {
                return false;
            };
            if target_signature.op() != pattern_op && !ctx.implements(&target_signature, pattern_op) {
                return false;
            }

            bindings.insert(p, t);

            let snapshot = bindings.clone();
            let direct = pattern_operands
                .iter()
                .zip(target_operands.iter())
                .all(|(&po, &to)| match_nodes(pattern, po, target, to, ctx, bindings));
            if direct {
                return true;
            }

            // Commutative binary operators match in either operand order.
            if pattern_operands.len() == 2 && ctx.is_commutative(&target_signature) {
                *bindings = snapshot;
                return match_nodes(pattern, pattern_operands[0], target, target_operands[1], ctx, bindings)
                    && match_nodes(pattern, pattern_operands[1], target, target_operands[0], ctx, bindings);
            }

            false
        }
    }
}
