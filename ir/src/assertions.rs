//! Equivalence assertions: union-find partitioning of statement identities.
//!
//! An assertion context records which instruction statements are known to
//! denote the same value. Each equivalence class is materialized lazily as a
//! canonical class node - `_EClass(_argList(members...))` - so that DAG
//! sharing survives rewriting: [`EquivalenceAssertions::build_equivalences`]
//! rewires operand references to canonical representatives.
//!
//! Assertions are scoped to one tree/session. When a tree is cloned, remap
//! the context through the clone's identity map with
//! [`copy`](EquivalenceAssertions::copy) or
//! [`update`](EquivalenceAssertions::update).

use std::collections::{HashMap, HashSet};

use crate::arena::{ARGLIST_OP, ECLASS_OP, ExprArena};
use crate::context::RuleContext;
use crate::error::{self, Result};
use crate::stmt::StmtId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ClassId(u32);

#[derive(Debug, Clone)]
struct EquivClass {
    members: HashSet<StmtId>,
    /// Lazily materialized class node; dropped on merge so it is rebuilt on
    /// next request.
    node: Option<StmtId>,
}

/// Per-session equivalence-class context.
#[derive(Debug, Default, Clone)]
pub struct EquivalenceAssertions {
    class_of: HashMap<StmtId, ClassId>,
    classes: Vec<Option<EquivClass>>,
}

impl EquivalenceAssertions {
    pub fn new() -> Self {
        Self::default()
    }

    fn class(&self, id: ClassId) -> &EquivClass {
        self.classes[id.0 as usize].as_ref().expect("class id points at a live class")
    }

    fn class_mut(&mut self, id: ClassId) -> &mut EquivClass {
        self.classes[id.0 as usize].as_mut().expect("class id points at a live class")
    }

    fn new_class(&mut self, members: HashSet<StmtId>) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(Some(EquivClass { members, node: None }));
        id
    }

    /// Record that `a` and `b` denote the same value.
    ///
    /// Identical statements (same identity, or equal literals) are a no-op
    /// returning `false`. Asserting equality on non-instruction statements
    /// is a fatal error - leaves cannot be aliased through the assertion
    /// mechanism. Returns `true` iff a new fact was recorded.
    pub fn add_equality_assertion(&mut self, arena: &mut ExprArena, a: StmtId, b: StmtId) -> Result<bool> {
        if a == b {
            return Ok(false);
        }
        if let (Some(va), Some(vb)) = (arena.get(a).literal(), arena.get(b).literal())
            && va == vb
        {
            return Ok(false);
        }
        for id in [a, b] {
            if !arena.get(id).is_instruction() {
                return error::LeafAssertionSnafu { statement: id.to_string() }.fail();
            }
        }

        tracing::debug!(lhs = %a, rhs = %b, "asserting equality");

        let class_a = self.class_of.get(&a).copied();
        let class_b = self.class_of.get(&b).copied();

        match (class_a, class_b) {
            (None, None) => {
                let class = self.new_class(HashSet::from([a, b]));
                self.class_of.insert(a, class);
                self.class_of.insert(b, class);
                Ok(true)
            }
            (Some(class), None) | (None, Some(class)) => {
                let newcomer = if class_a.is_some() { b } else { a };
                self.class_mut(class).members.insert(newcomer);
                self.class_of.insert(newcomer, class);
                self.refresh_class_node(arena, class);
                Ok(true)
            }
            (Some(x), Some(y)) if x == y => Ok(false),
            (Some(x), Some(y)) => {
                // Merge the smaller member set into the larger to bound cost.
                let (small, large) =
                    if self.class(x).members.len() <= self.class(y).members.len() { (x, y) } else { (y, x) };
                let absorbed = self.classes[small.0 as usize].take().expect("class id points at a live class");
                for member in &absorbed.members {
                    self.class_of.insert(*member, large);
                }
                self.class_mut(large).members.extend(absorbed.members);
                // Both materializations are stale; rebuild lazily.
                self.class_mut(large).node = None;
                Ok(true)
            }
        }
    }

    /// Member set of the class `id` belongs to, if any.
    pub fn get_assertions(&self, id: StmtId) -> Option<&HashSet<StmtId>> {
        self.class_of.get(&id).map(|&class| &self.class(class).members)
    }

    /// Canonical statement for `id`: `id` itself unless it belongs to a
    /// class, in which case the class node (materialized on first request)
    /// stands for the whole member set.
    pub fn get_assertion_statement(&mut self, arena: &mut ExprArena, id: StmtId, ctx: &RuleContext) -> Result<StmtId> {
        let Some(&class) = self.class_of.get(&id) else {
            return Ok(id);
        };
        if let Some(node) = self.class(class).node {
            return Ok(node);
        }

        let mut members: Vec<StmtId> = self.class(class).members.iter().copied().collect();
        members.sort_unstable();
        let arg_list = arena.instr(ARGLIST_OP, members);
        let class_node = arena.instr(ECLASS_OP, [arg_list]);
        arena.consolidate(class_node, ctx)?;

        self.class_mut(class).node = Some(class_node);
        Ok(class_node)
    }

    /// Rewrite every operand reference in the subtree rooted at `root`'s
    /// canonical form to point at each operand's canonical class
    /// representative, skipping replacements that would alias a class node
    /// as its own operand. Hashes are recomputed bottom-up afterwards.
    pub fn build_equivalences(&mut self, arena: &mut ExprArena, root: StmtId, ctx: &RuleContext) -> Result<StmtId> {
        let canonical_root = self.get_assertion_statement(arena, root, ctx)?;

        let mut visited = HashSet::new();
        let mut stack = vec![canonical_root];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            for index in 0..arena.operands(current).len() {
                let operand = arena.operands(current)[index];
                let canonical = self.get_assertion_statement(arena, operand, ctx)?;
                if canonical != operand && arena.operand(canonical, 0)? != current {
                    arena.replace_operand(current, index, canonical);
                }
            }
            stack.extend(arena.operands(current).iter().copied());
        }

        arena.recompute_hashes(canonical_root);
        Ok(canonical_root)
    }

    /// Remap this context through an identity substitution, producing the
    /// context for a cloned tree. With `drop_missing`, members absent from
    /// the substitution are dropped (classes shrinking below two members
    /// dissolve); otherwise unmapped members keep their identity.
    pub fn copy(&self, map: &HashMap<StmtId, StmtId>, drop_missing: bool) -> Self {
        let mut copied = Self::new();
        for class in self.classes.iter().flatten() {
            let members: HashSet<StmtId> = if drop_missing {
                class.members.iter().filter_map(|member| map.get(member).copied()).collect()
            } else {
                class.members.iter().map(|member| map.get(member).copied().unwrap_or(*member)).collect()
            };
            if members.len() < 2 {
                continue;
            }
            let class_id = copied.new_class(members.clone());
            for member in members {
                copied.class_of.insert(member, class_id);
            }
        }
        copied
    }

    /// Remap all membership and class-node references in place.
    pub fn update(&mut self, map: &HashMap<StmtId, StmtId>) {
        for class in self.classes.iter_mut().flatten() {
            class.members = class.members.iter().map(|member| map.get(member).copied().unwrap_or(*member)).collect();
            if let Some(node) = class.node {
                class.node = Some(map.get(&node).copied().unwrap_or(node));
            }
        }
        let mut remapped = HashMap::with_capacity(self.class_of.len());
        for (&member, &class) in &self.class_of {
            remapped.insert(map.get(&member).copied().unwrap_or(member), class);
        }
        self.class_of = remapped;
    }

    /// Refresh a materialized class node's member list after a single-sided
    /// extension, keeping existing references to the node valid.
    fn refresh_class_node(&mut self, arena: &mut ExprArena, class: ClassId) {
        let Some(node) = self.class(class).node else {
            return;
        };
        let mut members: Vec<StmtId> = self.class(class).members.iter().copied().collect();
        members.sort_unstable();
        if let Ok(arg_list) = arena.operand(node, 0) {
            arena.replace_operands(arg_list, members);
            arena.recompute_hashes(node);
        }
    }
}
