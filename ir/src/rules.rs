//! Built-in rule collections.
//!
//! Every rule here is locally sound - it needs no empirical validation to be
//! value-preserving. Rules the upstream system keeps disabled pending its
//! external validator are deliberately not carried.
//!
//! Declaration order inside each set matters: structural setup rules come
//! before the simplifications that consume their output.

use std::sync::Arc;

use snafu::OptionExt;

use matra_dtype::Literal;
use matra_dtype::ValueType::{Bool, Float, Int, Matrix};

use crate::arena::ExprArena;
use crate::builtins::ROW_SELECT_PUSHABLE;
use crate::context::RuleContext;
use crate::error::{self, Result};
use crate::pattern::MatchingSubexpression;
use crate::rule::{ComputeFn, Rule};
use crate::ruleset::RuleSet;
use crate::stmt::{StmtId, meta_keys};

/// Row-selection pushdown and merging.
///
/// 1. `rowSelect(op(A,B), i, j) => op(rowSelect(A,i,j), rowSelect(B,i,j))`
///    for any operator advertising the row-select-pushable capability; the
///    concrete operator is carried across by an operator-transfer link.
/// 2. `rowSelect(rowSelect(A,i,j), k, l) => rowSelect(A, max(i,k), min(j,l))`
///    - nested selections intersect; the bounds are explicit-link computed
///    and fold to literals when both inputs are literal.
pub fn selection_pushdown(ctx: &RuleContext) -> Result<RuleSet> {
    let mut rules = Vec::new();

    {
        let mut b = Rule::builder("rowselect.pushdown");
        let a = b.var("A", Matrix);
        let bb = b.var("B", Matrix);
        let i = b.var("i", Int);
        let j = b.var("j", Int);
        let combined = b.instr(ROW_SELECT_PUSHABLE, [a, bb]);
        let from = b.instr("rowSelect", [combined, i, j]);
        let left = b.instr("rowSelect", [a, i, j]);
        let right = b.instr("rowSelect", [bb, i, j]);
        let to = b.instr(ROW_SELECT_PUSHABLE, [left, right]);
        b.unidirectional();
        b.transfer_op(combined, to);
        rules.push(b.build(from, to, ctx)?);
    }

    {
        let mut b = Rule::builder("rowselect.merge");
        let a = b.var("A", Matrix);
        let i = b.var("i", Int);
        let j = b.var("j", Int);
        let k = b.var("k", Int);
        let l = b.var("l", Int);
        let inner = b.instr("rowSelect", [a, i, j]);
        let from = b.instr("rowSelect", [inner, k, l]);
        let lo = b.var("lo", Int);
        let hi = b.var("hi", Int);
        let to = b.instr("rowSelect", [a, lo, hi]);
        b.unidirectional();
        b.compute(lo, derived_bound("max", i, k));
        b.compute(hi, derived_bound("min", j, l));
        rules.push(b.build(from, to, ctx)?);
    }

    Ok(RuleSet::new("selection pushdown", rules))
}

/// Streaming expansion: rewrite dense operators into streaming-matrix form.
///
/// `t(A) => _m(_idx(1, ncol(A)), _idx(1, nrow(A)), A[j, i])` - each `_idx`
/// marker receives a fresh index-identity token and the `_m` constructor
/// shares one ownership token with its markers, which the meta propagator
/// validates.
pub fn expand_streaming(ctx: &RuleContext) -> Result<RuleSet> {
    let mut b = Rule::builder("expand.transpose");
    let a = b.var("A", Matrix);
    let from = b.instr("t", [a]);

    let one_col = b.lit(1i64);
    let one_row = b.lit(1i64);
    let ncol = b.instr("ncol", [a]);
    let nrow = b.instr("nrow", [a]);
    let col_idx = b.instr("_idx", [one_col, ncol]);
    let row_idx = b.instr("_idx", [one_row, nrow]);
    let element = b.instr("[]", [a, row_idx, col_idx]);
    let to = b.instr("_m", [col_idx, row_idx, element]);

    b.unidirectional();
    b.fresh_token_group(meta_keys::IDX_ID, [col_idx]);
    b.fresh_token_group(meta_keys::IDX_ID, [row_idx]);
    b.fresh_token_group(meta_keys::OWNER_ID, [to, col_idx, row_idx]);

    Ok(RuleSet::new("streaming expansion", vec![b.build(from, to, ctx)?]))
}

/// Scalar and boolean identities.
pub fn scalar_simplifications(ctx: &RuleContext) -> Result<RuleSet> {
    let mut rules = Vec::new();

    {
        let mut b = Rule::builder("add.zero");
        let a = b.var("a", Float);
        let zero = b.lit(0.0);
        let from = b.instr("+", [a, zero]);
        b.unidirectional();
        rules.push(b.build(from, a, ctx)?);
    }

    {
        let mut b = Rule::builder("mul.one");
        let a = b.var("a", Float);
        let one = b.lit(1.0);
        let from = b.instr("*", [a, one]);
        b.unidirectional();
        rules.push(b.build(from, a, ctx)?);
    }

    {
        // Constant folding of integer addition, gated on both operands
        // being bound to literals.
        let mut b = Rule::builder("fold.add.int");
        let x = b.var("x", Int);
        let y = b.var("y", Int);
        let from = b.instr("+", [x, y]);
        let folded = b.var("folded", Int);
        b.unidirectional();
        b.iff_forward(both_literal(x, y));
        b.compute(
            folded,
            Arc::new(move |arena, m, _| {
                let (a, b) = (literal_int(arena, m, x)?, literal_int(arena, m, y)?);
                Ok(arena.literal(Literal::Int(a + b)))
            }),
        );
        rules.push(b.build(from, folded, ctx)?);
    }

    {
        let mut b = Rule::builder("not.not");
        let a = b.var("a", Bool);
        let inner = b.instr("!", [a]);
        let from = b.instr("!", [inner]);
        b.unidirectional();
        rules.push(b.build(from, a, ctx)?);
    }

    {
        let mut b = Rule::builder("and.true");
        let a = b.var("a", Bool);
        let true_lit = b.lit(true);
        let from = b.instr("&", [a, true_lit]);
        b.unidirectional();
        rules.push(b.build(from, a, ctx)?);
    }

    Ok(RuleSet::new("scalar simplification", rules))
}

/// The default stage order: push selections down, merge them, then clean up
/// scalars. Each stage runs to its own fixpoint.
pub fn default_heuristics(ctx: &RuleContext) -> Result<crate::heuristic::HeuristicSequence> {
    use crate::heuristic::{Heuristic, HeuristicSequence};

    let mut sequence = HeuristicSequence::new();
    sequence.add("selection pushdown", Heuristic::new(selection_pushdown(ctx)?));
    sequence.add_repeated("scalar simplification", Heuristic::new(scalar_simplifications(ctx)?));
    Ok(sequence)
}

/// Compute link producing `op(x, y)` over the bindings of two pattern
/// variables, folded to a literal when both are literal integers.
fn derived_bound(op: &'static str, x: StmtId, y: StmtId) -> ComputeFn {
    Arc::new(move |arena, m, _| {
        let bound_x = binding(m, x)?;
        let bound_y = binding(m, y)?;
        let literals = (
            arena.get(bound_x).literal().and_then(|l| l.as_int()),
            arena.get(bound_y).literal().and_then(|l| l.as_int()),
        );
        if let (Some(a), Some(b)) = literals {
            let folded = if op == "max" { a.max(b) } else { a.min(b) };
            return Ok(arena.literal(Literal::Int(folded)));
        }
        Ok(arena.instr(op, [bound_x, bound_y]))
    })
}

fn both_literal(x: StmtId, y: StmtId) -> crate::rule::IffFn {
    Arc::new(move |arena: &ExprArena, m: &MatchingSubexpression| {
        [x, y].iter().all(|&var| m.binding(var).is_some_and(|bound| arena.get(bound).is_literal()))
    })
}

fn binding(m: &MatchingSubexpression, var: StmtId) -> Result<StmtId> {
    m.binding(var).with_context(|| error::UnboundVariableSnafu { name: var.to_string() })
}

fn literal_int(arena: &ExprArena, m: &MatchingSubexpression, var: StmtId) -> Result<i64> {
    let bound = binding(m, var)?;
    arena
        .get(bound)
        .literal()
        .and_then(|l| l.as_int())
        .with_context(|| error::UnboundVariableSnafu { name: var.to_string() })
}
