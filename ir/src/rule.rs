//! Rewrite rules: pattern pairs, side-conditions and explicit links.
//!
//! A [`Rule`] owns one arena holding both of its pattern trees. Free
//! variables shared between the two sides are literally the same node, so a
//! binding established while matching one side substitutes directly into the
//! other during application.
//!
//! Beyond plain substitution, a rule may carry [`LinkSpec`]s - pure
//! per-destination-node transfer specs consulted during instantiation - and
//! fresh-token groups stamping ownership metadata on newly created nodes at
//! each application.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use snafu::OptionExt;

use crate::arena::ExprArena;
use crate::context::RuleContext;
use crate::error::{self, Error, Result};
use crate::pattern::{self, MatchingSubexpression};
use crate::stmt::{StmtId, StmtKind};

/// Side-condition predicate, evaluated against the target arena and a
/// structurally successful match before the match is reported.
pub type IffFn = Arc<dyn Fn(&ExprArena, &MatchingSubexpression) -> bool + Send + Sync>;

/// Computes derived content for one destination node during application.
/// Receives the target arena, the match (for variable bindings) and the
/// already-instantiated operands of the destination node.
pub type ComputeFn = Arc<dyn Fn(&mut ExprArena, &MatchingSubexpression, &[StmtId]) -> Result<StmtId> + Send + Sync>;

/// Explicit link: how a destination-pattern node is produced at apply time
/// when plain substitution is not enough.
#[derive(Clone)]
pub enum LinkSpec {
    /// Instantiate with the concrete operator the match bound for the given
    /// source-pattern node. This is how a capability operator on the
    /// destination side becomes the operator it actually matched.
    TransferOp(StmtId),
    /// Instantiate structurally, then copy the matched source node's
    /// metadata onto the created node.
    TransferMeta(StmtId),
    /// Compute the node from the bindings.
    Compute(ComputeFn),
}

/// A rewrite rule: an ordered pair of pattern trees plus optional
/// side-conditions and transfer machinery. Reversible unless marked
/// unidirectional.
pub struct Rule {
    name: String,
    arena: ExprArena,
    from: StmtId,
    to: StmtId,
    unidirectional: bool,
    iff_forward: Vec<IffFn>,
    iff_backward: Vec<IffFn>,
    links: HashMap<StmtId, LinkSpec>,
    /// Groups of destination nodes receiving one freshly drawn token under
    /// the given metadata key at each application.
    fresh_tokens: Vec<(String, Vec<StmtId>)>,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("unidirectional", &self.unidirectional)
            .finish_non_exhaustive()
    }
}

impl Rule {
    pub fn builder(name: &str) -> RuleBuilder {
        RuleBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_unidirectional(&self) -> bool {
        self.unidirectional
    }

    /// Arena owning both pattern trees.
    pub fn pattern_arena(&self) -> &ExprArena {
        &self.arena
    }

    pub fn from_root(&self) -> StmtId {
        self.from
    }

    pub fn to_root(&self) -> StmtId {
        self.to
    }

    /// Match the forward (A) pattern anywhere in the target tree.
    pub fn match_from(
        &self,
        arena: &ExprArena,
        root: StmtId,
        ctx: &RuleContext,
        first_only: bool,
    ) -> Vec<MatchingSubexpression> {
        pattern::find_matches(&self.arena, self.from, arena, root, ctx, first_only, &|m| {
            self.iff_forward.iter().all(|iff| iff(arena, m))
        })
    }

    /// Match the backward (B) pattern anywhere in the target tree.
    pub fn match_to(
        &self,
        arena: &ExprArena,
        root: StmtId,
        ctx: &RuleContext,
        first_only: bool,
    ) -> Vec<MatchingSubexpression> {
        pattern::find_matches(&self.arena, self.to, arena, root, ctx, first_only, &|m| {
            self.iff_backward.iter().all(|iff| iff(arena, m))
        })
    }

    /// Apply A=>B: instantiate the B pattern under the match's bindings and
    /// splice it in place of the matched subtree.
    ///
    /// With `in_place`, the matched parent's operand slot is overwritten and
    /// the original root is returned (a match at the root returns the
    /// replacement). Otherwise the spine from the root to the match is
    /// copied first and the original tree stays intact.
    pub fn apply_forward(
        &self,
        arena: &mut ExprArena,
        root: StmtId,
        m: &MatchingSubexpression,
        ctx: &RuleContext,
        in_place: bool,
    ) -> Result<StmtId> {
        self.apply(arena, root, m, ctx, self.to, in_place)
    }

    /// Apply B=>A.
    pub fn apply_backward(
        &self,
        arena: &mut ExprArena,
        root: StmtId,
        m: &MatchingSubexpression,
        ctx: &RuleContext,
        in_place: bool,
    ) -> Result<StmtId> {
        self.apply(arena, root, m, ctx, self.from, in_place)
    }

    fn apply(
        &self,
        arena: &mut ExprArena,
        root: StmtId,
        m: &MatchingSubexpression,
        ctx: &RuleContext,
        dest: StmtId,
        in_place: bool,
    ) -> Result<StmtId> {
        tracing::debug!(rule = %self.name, root = %m.root, "applying rule");

        let mut memo = HashMap::new();
        let replacement = self.instantiate(arena, m, dest, &mut memo)?;
        arena.consolidate(replacement, ctx)?;

        for (key, nodes) in &self.fresh_tokens {
            let token = arena.fresh_token();
            for node in nodes {
                if let Some(&created) = memo.get(node) {
                    arena.put_meta(created, key, crate::stmt::Meta::Token(token));
                }
            }
        }

        let Some((parent, slot)) = m.parent else {
            // Match anchored at the searched root: the replacement is the
            // new root and nothing in the original tree is mutated.
            arena.recompute_hashes(replacement);
            return Ok(replacement);
        };

        if in_place {
            arena.replace_operand(parent, slot, replacement);
            arena.recompute_hashes(root);
            Ok(root)
        } else {
            let (new_root, spine) = arena.path_copy(root, parent).with_context(|| error::MalformedRuleSnafu {
                rule: self.name.clone(),
                reason: format!("match parent {parent} is not reachable from root {root}"),
            })?;
            arena.replace_operand(spine[&parent], slot, replacement);
            arena.recompute_hashes(new_root);
            Ok(new_root)
        }
    }

    /// Build the destination subtree in the target arena, substituting
    /// bindings for free variables and consulting explicit links. Shared
    /// destination nodes are instantiated once.
    fn instantiate(
        &self,
        arena: &mut ExprArena,
        m: &MatchingSubexpression,
        node: StmtId,
        memo: &mut HashMap<StmtId, StmtId>,
    ) -> Result<StmtId> {
        if let Some(&done) = memo.get(&node) {
            return Ok(done);
        }

        let created = match self.links.get(&node) {
            Some(LinkSpec::TransferOp(source)) => {
                let matched = m.binding(*source).with_context(|| error::MalformedRuleSnafu {
                    rule: self.name.clone(),
                    reason: format!("operator-transfer source {source} was not bound by the match"),
                })?;
                let op = arena.get(matched).op().map(str::to_string).ok_or(Error::EmptyInstruction)?;
                let operands = self.instantiate_operands(arena, m, node, memo)?;
                arena.instr(&op, operands)
            }
            Some(LinkSpec::TransferMeta(source)) => {
                let matched = m.binding(*source).with_context(|| error::MalformedRuleSnafu {
                    rule: self.name.clone(),
                    reason: format!("metadata-transfer source {source} was not bound by the match"),
                })?;
                let created = self.instantiate_structural(arena, m, node, memo)?;
                let meta: Vec<_> =
                    arena.get(matched).meta_entries().map(|(k, v)| (k.to_string(), *v)).collect();
                for (key, value) in meta {
                    arena.put_meta(created, &key, value);
                }
                created
            }
            Some(LinkSpec::Compute(compute)) => {
                let operands = self.instantiate_operands(arena, m, node, memo)?;
                compute(arena, m, &operands)?
            }
            None => self.instantiate_structural(arena, m, node, memo)?,
        };

        memo.insert(node, created);
        Ok(created)
    }

    fn instantiate_structural(
        &self,
        arena: &mut ExprArena,
        m: &MatchingSubexpression,
        node: StmtId,
        memo: &mut HashMap<StmtId, StmtId>,
    ) -> Result<StmtId> {
        match &self.arena.get(node).kind {
            StmtKind::Var { .. } => m.binding(node).with_context(|| error::UnboundVariableSnafu {
                name: self.arena.get(node).name().to_string(),
            }),
            StmtKind::Literal { value } => Ok(arena.literal(*value)),
            StmtKind::Instr { op, .. } => {
                let op = op.clone();
                let operands = self.instantiate_operands(arena, m, node, memo)?;
                Ok(arena.instr(&op, operands))
            }
        }
    }

    fn instantiate_operands(
        &self,
        arena: &mut ExprArena,
        m: &MatchingSubexpression,
        node: StmtId,
        memo: &mut HashMap<StmtId, StmtId>,
    ) -> Result<Vec<StmtId>> {
        let pattern_operands: Vec<StmtId> = self.arena.operands(node).to_vec();
        let mut operands = Vec::with_capacity(pattern_operands.len());
        for operand in pattern_operands {
            operands.push(self.instantiate(arena, m, operand, memo)?);
        }
        Ok(operands)
    }
}

/// Fluent rule construction.
///
/// The builder owns the arena both pattern sides are built in; construct
/// leaves and instructions bottom-up, then seal the rule with
/// [`build`](RuleBuilder::build). A variable used on both sides must be
/// created once and referenced by its id from either side.
pub struct RuleBuilder {
    name: String,
    arena: ExprArena,
    unidirectional: bool,
    iff_forward: Vec<IffFn>,
    iff_backward: Vec<IffFn>,
    links: HashMap<StmtId, LinkSpec>,
    fresh_tokens: Vec<(String, Vec<StmtId>)>,
}

impl RuleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            arena: ExprArena::new(),
            unidirectional: false,
            iff_forward: Vec::new(),
            iff_backward: Vec::new(),
            links: HashMap::new(),
            fresh_tokens: Vec::new(),
        }
    }

    pub fn var(&mut self, name: &str, vtype: matra_dtype::ValueType) -> StmtId {
        self.arena.var(name, vtype)
    }

    pub fn lit(&mut self, value: impl Into<matra_dtype::Literal>) -> StmtId {
        self.arena.literal(value)
    }

    pub fn instr(&mut self, op: &str, operands: impl IntoIterator<Item = StmtId>) -> StmtId {
        self.arena.instr(op, operands)
    }

    pub fn unidirectional(&mut self) -> &mut Self {
        self.unidirectional = true;
        self
    }

    pub fn iff_forward(&mut self, predicate: IffFn) -> &mut Self {
        self.iff_forward.push(predicate);
        self
    }

    pub fn iff_backward(&mut self, predicate: IffFn) -> &mut Self {
        self.iff_backward.push(predicate);
        self
    }

    /// Transfer the concrete matched operator of `source` onto `dest` when
    /// the side containing `dest` is instantiated.
    pub fn transfer_op(&mut self, source: StmtId, dest: StmtId) -> &mut Self {
        self.links.insert(dest, LinkSpec::TransferOp(source));
        self
    }

    /// Transfer the matched metadata of `source` onto `dest`.
    pub fn transfer_meta(&mut self, source: StmtId, dest: StmtId) -> &mut Self {
        self.links.insert(dest, LinkSpec::TransferMeta(source));
        self
    }

    /// Compute `dest` from the bindings at apply time.
    pub fn compute(&mut self, dest: StmtId, compute: ComputeFn) -> &mut Self {
        self.links.insert(dest, LinkSpec::Compute(compute));
        self
    }

    /// Stamp every node of `group` with one fresh token under `key` at each
    /// application.
    pub fn fresh_token_group(&mut self, key: &str, group: impl IntoIterator<Item = StmtId>) -> &mut Self {
        self.fresh_tokens.push((key.to_string(), group.into_iter().collect()));
        self
    }

    /// Seal the rule: consolidate both sides against the registry, compute
    /// pattern hashes and check well-formedness. Every free variable of a
    /// side that can be instantiated must be bound by the opposite side or
    /// covered by an explicit link.
    pub fn build(mut self, from: StmtId, to: StmtId, ctx: &RuleContext) -> Result<Rule> {
        self.arena.consolidate(from, ctx)?;
        self.arena.consolidate(to, ctx)?;

        self.check_closed(from, to)?;
        if !self.unidirectional {
            self.check_closed(to, from)?;
        }

        Ok(Rule {
            name: self.name,
            arena: self.arena,
            from,
            to,
            unidirectional: self.unidirectional,
            iff_forward: self.iff_forward,
            iff_backward: self.iff_backward,
            links: self.links,
            fresh_tokens: self.fresh_tokens,
        })
    }

    /// Every variable of `dest` must be bound by matching `source` or be
    /// covered by an explicit link.
    fn check_closed(&self, source: StmtId, dest: StmtId) -> Result<()> {
        let bound: HashSet<StmtId> =
            self.arena.pre_order_ids(source).into_iter().filter(|&id| self.arena.get(id).is_var()).collect();
        for id in self.arena.pre_order_ids(dest) {
            if self.arena.get(id).is_var() && !bound.contains(&id) && !self.links.contains_key(&id) {
                return error::MalformedRuleSnafu {
                    rule: self.name.clone(),
                    reason: format!(
                        "variable {} is not bound by the opposite side and has no explicit link",
                        self.arena.get(id).name()
                    ),
                }
                .fail();
            }
        }
        Ok(())
    }
}
