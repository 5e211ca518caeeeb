use matra_dtype::{Literal, ValueType};
use matra_dtype::ValueType::{Int, Matrix};

use crate::arena::{ExprArena, structural_eq};
use crate::builtins::ROW_SELECT_PUSHABLE;
use crate::error::Error;
use crate::meta::MetaPropagator;
use crate::rule::Rule;
use crate::rules;
use crate::stmt::meta_keys;
use crate::test::helpers;

#[test]
fn test_push_down_row_selection() {
    let ctx = helpers::ctx();
    let rule_set = rules::selection_pushdown(&ctx).unwrap();

    let mut arena = ExprArena::new();
    let root = helpers::row_select_sum(&mut arena, &ctx).unwrap();

    let applicable = rule_set.find_first_applicable_rule(&arena, root, &ctx).expect("pushdown must apply");
    assert!(applicable.forward);
    assert_eq!(rule_set.rule(applicable.rule_index).name(), "rowselect.pushdown");

    let rule = rule_set.rule(applicable.rule_index);
    let rewritten = rule.apply_forward(&mut arena, root, &applicable.matches[0], &ctx, true).unwrap();

    // rowSelect(M1 + M2, 2, 5) => rowSelect(M1, 2, 5) + rowSelect(M2, 2, 5),
    // with the concrete `+` carried over by the operator-transfer link.
    assert_eq!(arena.render(rewritten, &ctx), "(M1[2:5,] + M2[2:5,])");
}

#[test]
fn test_merge_with_literal_folded_bounds() {
    let ctx = helpers::ctx();
    let rule_set = rules::selection_pushdown(&ctx).unwrap();

    let mut arena = ExprArena::new();
    let m = arena.var("M", Matrix);
    let lo_inner = arena.literal(2i64);
    let hi_inner = arena.literal(10i64);
    let inner = arena.instr("rowSelect", [m, lo_inner, hi_inner]);
    let lo_outer = arena.literal(5i64);
    let hi_outer = arena.literal(8i64);
    let root = arena.instr("rowSelect", [inner, lo_outer, hi_outer]);
    arena.consolidate(root, &ctx).unwrap();

    let applicable = rule_set.find_first_applicable_rule(&arena, root, &ctx).expect("merge must apply");
    assert_eq!(rule_set.rule(applicable.rule_index).name(), "rowselect.merge");

    let rule = rule_set.rule(applicable.rule_index);
    let rewritten = rule.apply_forward(&mut arena, root, &applicable.matches[0], &ctx, true).unwrap();

    // Ranges intersect: max(2, 5) = 5, min(10, 8) = 8, folded to literals.
    assert_eq!(arena.render(rewritten, &ctx), "M[5:8,]");
}

#[test]
fn test_merge_with_symbolic_bounds() {
    let ctx = helpers::ctx();
    let rule_set = rules::selection_pushdown(&ctx).unwrap();

    let mut arena = ExprArena::new();
    let m = arena.var("M", Matrix);
    let i = arena.var("i", Int);
    let j = arena.var("j", Int);
    let k = arena.var("k", Int);
    let l = arena.var("l", Int);
    let inner = arena.instr("rowSelect", [m, i, j]);
    let root = arena.instr("rowSelect", [inner, k, l]);
    arena.consolidate(root, &ctx).unwrap();

    let applicable = rule_set.find_first_applicable_rule(&arena, root, &ctx).unwrap();
    let rule = rule_set.rule(applicable.rule_index);
    let rewritten = rule.apply_forward(&mut arena, root, &applicable.matches[0], &ctx, true).unwrap();

    // Non-literal bounds stay symbolic.
    assert_eq!(arena.render(rewritten, &ctx), "M[(i max k):(j min l),]");
}

#[test]
fn test_round_trip_restores_original() {
    let ctx = helpers::ctx();

    // A bidirectional pushdown with operator transfer both ways.
    let mut b = Rule::builder("pushdown.bidi");
    let a = b.var("A", Matrix);
    let b_var = b.var("B", Matrix);
    let i = b.var("i", Int);
    let j = b.var("j", Int);
    let combined = b.instr(ROW_SELECT_PUSHABLE, [a, b_var]);
    let from = b.instr("rowSelect", [combined, i, j]);
    let left = b.instr("rowSelect", [a, i, j]);
    let right = b.instr("rowSelect", [b_var, i, j]);
    let to = b.instr(ROW_SELECT_PUSHABLE, [left, right]);
    b.transfer_op(combined, to);
    b.transfer_op(to, combined);
    let rule = b.build(from, to, &ctx).unwrap();
    assert!(!rule.is_unidirectional());

    let mut arena = ExprArena::new();
    let original = helpers::row_select_sum(&mut arena, &ctx).unwrap();
    let (reference, _) = arena.deep_copy(original);

    let forward_match = rule.match_from(&arena, original, &ctx, true).remove(0);
    let pushed = rule.apply_forward(&mut arena, original, &forward_match, &ctx, true).unwrap();
    assert!(!arena.structural_eq(pushed, reference));

    let backward_match = rule.match_to(&arena, pushed, &ctx, true).remove(0);
    let restored = rule.apply_backward(&mut arena, pushed, &backward_match, &ctx, true).unwrap();
    assert!(arena.structural_eq(restored, reference));
}

#[test]
fn test_out_of_place_application_keeps_original() {
    let ctx = helpers::ctx();
    let rule_set = rules::selection_pushdown(&ctx).unwrap();

    let mut arena = ExprArena::new();
    let inner = helpers::row_select_sum(&mut arena, &ctx).unwrap();
    let root = arena.instr("t", [inner]);
    arena.consolidate(root, &ctx).unwrap();
    let before = arena.render(root, &ctx);

    let applicable = rule_set.find_first_applicable_rule(&arena, root, &ctx).unwrap();
    let rule = rule_set.rule(applicable.rule_index);
    let rewritten = rule.apply_forward(&mut arena, root, &applicable.matches[0], &ctx, false).unwrap();

    assert_ne!(rewritten, root);
    assert_eq!(arena.render(root, &ctx), before, "original tree must stay intact");
    assert_eq!(arena.render(rewritten, &ctx), "t((M1[2:5,] + M2[2:5,]))");
}

#[test]
fn test_match_at_root_returns_replacement() {
    let ctx = helpers::ctx();
    let rule_set = rules::selection_pushdown(&ctx).unwrap();

    let mut arena = ExprArena::new();
    let root = helpers::row_select_sum(&mut arena, &ctx).unwrap();
    let before = arena.render(root, &ctx);

    let applicable = rule_set.find_first_applicable_rule(&arena, root, &ctx).unwrap();
    let rule = rule_set.rule(applicable.rule_index);
    let rewritten = rule.apply_forward(&mut arena, root, &applicable.matches[0], &ctx, false).unwrap();

    // Out-of-place at the root: nothing to splice, the original survives.
    assert_ne!(rewritten, root);
    assert_eq!(arena.render(root, &ctx), before);
}

#[test]
fn test_constant_folding_gated_by_iff() {
    let ctx = helpers::ctx();
    let rule_set = rules::scalar_simplifications(&ctx).unwrap();

    // Variables: the iff predicate rejects the structural match.
    let mut arena = ExprArena::new();
    let x = arena.var("x", Int);
    let y = arena.var("y", Int);
    let symbolic = arena.instr("+", [x, y]);
    arena.consolidate(symbolic, &ctx).unwrap();
    assert!(rule_set.find_first_applicable_rule(&arena, symbolic, &ctx).is_none());

    // Literals: the compute link folds the sum.
    let two = arena.literal(2i64);
    let three = arena.literal(3i64);
    let foldable = arena.instr("+", [two, three]);
    arena.consolidate(foldable, &ctx).unwrap();

    let applicable = rule_set.find_first_applicable_rule(&arena, foldable, &ctx).unwrap();
    assert_eq!(rule_set.rule(applicable.rule_index).name(), "fold.add.int");
    let rule = rule_set.rule(applicable.rule_index);
    let folded = rule.apply_forward(&mut arena, foldable, &applicable.matches[0], &ctx, true).unwrap();
    assert_eq!(arena.get(folded).literal(), Some(Literal::Int(5)));
}

#[test]
fn test_streaming_expansion_stamps_fresh_tokens() {
    let ctx = helpers::ctx();
    let rule_set = rules::expand_streaming(&ctx).unwrap();
    let propagator = MetaPropagator::new(&ctx);

    let mut stamp = |arena: &mut ExprArena| {
        let root = helpers::transposed_rand(arena, &ctx).unwrap();
        let applicable = rule_set.find_first_applicable_rule(arena, root, &ctx).unwrap();
        let rule = rule_set.rule(applicable.rule_index);
        let expanded = rule.apply_forward(arena, root, &applicable.matches[0], &ctx, true).unwrap();
        // Marker validation passes because the tokens were stamped.
        propagator.apply(arena, expanded).unwrap()
    };

    let mut arena = ExprArena::new();
    let first = stamp(&mut arena);
    let second = stamp(&mut arena);

    let owner = |arena: &ExprArena, root| {
        arena.get_meta(root, meta_keys::OWNER_ID).and_then(|meta| meta.as_token()).expect("_m carries an owner token")
    };

    // The `_m` node shares its owner token with both `_idx` markers...
    let col_idx = arena.operands(first)[0];
    let row_idx = arena.operands(first)[1];
    assert_eq!(owner(&arena, first), owner(&arena, col_idx));
    assert_eq!(owner(&arena, first), owner(&arena, row_idx));

    // ...the two markers carry distinct index identities...
    let idx_token = |arena: &ExprArena, id| arena.get_meta(id, meta_keys::IDX_ID).and_then(|meta| meta.as_token());
    assert_ne!(idx_token(&arena, col_idx), idx_token(&arena, row_idx));

    // ...and a second application draws a fresh owner.
    assert_ne!(owner(&arena, first), owner(&arena, second));
}

#[test]
fn test_unbound_destination_variable_is_malformed() {
    let ctx = helpers::ctx();
    let mut b = Rule::builder("broken");
    let unrelated = b.var("mystery", ValueType::Float);
    let flag = b.var("flag", ValueType::Bool);
    let from = b.instr("!", [flag]);
    let err = b.build(from, unrelated, &ctx).unwrap_err();
    assert!(matches!(err, Error::MalformedRule { .. }), "got {err:?}");
}

#[test]
fn test_rule_sides_share_variables_structurally() {
    let ctx = helpers::ctx();
    let mut b = Rule::builder("t.t");
    let a = b.var("A", Matrix);
    let inner = b.instr("t", [a]);
    let from = b.instr("t", [inner]);
    let rule = b.build(from, a, &ctx).unwrap();

    let mut arena = ExprArena::new();
    let m = arena.var("M", Matrix);
    let t1 = arena.instr("t", [m]);
    let t2 = arena.instr("t", [t1]);
    arena.consolidate(t2, &ctx).unwrap();

    let m_match = rule.match_from(&arena, t2, &ctx, true).remove(0);
    let collapsed = rule.apply_forward(&mut arena, t2, &m_match, &ctx, true).unwrap();
    assert_eq!(collapsed, m);

    let mut expected = ExprArena::new();
    let expected_m = expected.var("M", Matrix);
    assert!(structural_eq(&arena, collapsed, &expected, expected_m));
}
