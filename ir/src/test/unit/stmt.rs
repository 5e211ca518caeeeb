use matra_dtype::{Literal, ValueType};

use crate::arena::{ExprArena, structural_eq};
use crate::error::Error;
use crate::stmt::Meta;
use crate::test::helpers;

#[test]
fn test_leaf_construction() {
    let mut arena = ExprArena::new();
    let var = arena.var("A", ValueType::Matrix);
    let lit = arena.literal(5i64);

    assert!(arena.get(var).is_var());
    assert!(arena.get(var).is_consolidated());
    assert_eq!(arena.vtype(var), Some(ValueType::Matrix));
    assert_eq!(arena.get(var).name(), "A");

    assert!(arena.get(lit).is_literal());
    assert_eq!(arena.get(lit).literal(), Some(Literal::Int(5)));
    assert_eq!(arena.vtype(lit), Some(ValueType::Int));
}

#[test]
fn test_instruction_consolidation() {
    let ctx = helpers::ctx();
    let mut arena = ExprArena::new();
    let a = arena.literal(1.0);
    let b = arena.literal(2.0);
    let add = arena.instr("+", [a, b]);

    assert_eq!(arena.vtype(add), None);
    assert!(!arena.get(add).is_consolidated());

    arena.consolidate(add, &ctx).unwrap();
    assert_eq!(arena.vtype(add), Some(ValueType::Float));
    assert!(arena.get(add).is_consolidated());
    assert_ne!(arena.get(add).structural_hash(), 0);
}

#[test]
fn test_consolidation_idempotent() {
    let ctx = helpers::ctx();
    let mut arena = ExprArena::new();
    let root = helpers::row_select_sum(&mut arena, &ctx).unwrap();

    let hash = arena.get(root).structural_hash();
    arena.consolidate(root, &ctx).unwrap();
    assert_eq!(arena.get(root).structural_hash(), hash);
}

#[test]
fn test_unknown_instruction_is_fatal() {
    let ctx = helpers::ctx();
    let mut arena = ExprArena::new();
    let a = arena.literal(1.0);
    let mystery = arena.instr("mystery", [a]);

    let err = arena.consolidate(mystery, &ctx).unwrap_err();
    assert!(matches!(err, Error::UnknownInstruction { .. }), "got {err:?}");
}

#[test]
fn test_missing_cost_function_is_fatal() {
    let mut ctx = helpers::ctx();
    ctx.register("costless", &[ValueType::Float], ValueType::Float).no_cost();

    let mut arena = ExprArena::new();
    let a = arena.literal(1.0);
    let node = arena.instr("costless", [a]);

    let err = arena.consolidate(node, &ctx).unwrap_err();
    assert!(matches!(err, Error::MissingCostFunction { .. }), "got {err:?}");
}

#[test]
fn test_empty_operator_is_fatal() {
    let ctx = helpers::ctx();
    let mut arena = ExprArena::new();
    let a = arena.literal(1.0);
    let node = arena.instr("", [a]);

    let err = arena.consolidate(node, &ctx).unwrap_err();
    assert_eq!(err, Error::EmptyInstruction);
}

#[test]
fn test_mutation_after_consolidation_is_fatal() {
    let ctx = helpers::ctx();
    let mut arena = ExprArena::new();
    let a = arena.literal(1.0);
    let b = arena.literal(2.0);
    let add = arena.instr("+", [a, b]);
    arena.consolidate(add, &ctx).unwrap();

    let err = arena.add_operand(add, a).unwrap_err();
    assert!(matches!(err, Error::ConsolidatedMutation { .. }), "got {err:?}");
}

#[test]
fn test_metadata_stays_writable_after_consolidation() {
    let ctx = helpers::ctx();
    let mut arena = ExprArena::new();
    let root = helpers::row_select_sum(&mut arena, &ctx).unwrap();

    arena.put_meta(root, "tag", Meta::Token(7));
    assert_eq!(arena.get_meta(root, "tag"), Some(&Meta::Token(7)));

    // Overwrite under the same key.
    arena.put_meta(root, "tag", Meta::Token(8));
    assert_eq!(arena.get_meta(root, "tag"), Some(&Meta::Token(8)));
}

#[test]
fn test_structural_hash_of_independent_trees() {
    let ctx = helpers::ctx();
    let mut first = ExprArena::new();
    let mut second = ExprArena::new();
    let a = helpers::row_select_sum(&mut first, &ctx).unwrap();
    let b = helpers::row_select_sum(&mut second, &ctx).unwrap();

    assert_eq!(first.get(a).structural_hash(), second.get(b).structural_hash());
    assert!(structural_eq(&first, a, &second, b));

    // A differing literal changes the hash.
    let mut third = ExprArena::new();
    let m1 = third.var("M1", ValueType::Matrix);
    let m2 = third.var("M2", ValueType::Matrix);
    let sum = third.instr("+", [m1, m2]);
    let lo = third.literal(2i64);
    let hi = third.literal(6i64);
    let c = third.instr("rowSelect", [sum, lo, hi]);
    third.consolidate(c, &ctx).unwrap();
    assert_ne!(first.get(a).structural_hash(), third.get(c).structural_hash());
    assert!(!structural_eq(&first, a, &third, c));
}

#[test]
fn test_traversal_orders() {
    let ctx = helpers::ctx();
    let mut arena = ExprArena::new();
    let root = helpers::row_select_sum(&mut arena, &ctx).unwrap();

    let post = arena.post_order_ids(root);
    assert_eq!(*post.last().unwrap(), root);
    for (index, &node) in post.iter().enumerate() {
        for operand in arena.operands(node) {
            let operand_index = post.iter().position(|candidate| candidate == operand).unwrap();
            assert!(operand_index < index, "operands come before their instruction");
        }
    }

    let pre = arena.pre_order_ids(root);
    assert_eq!(pre[0], root);
    assert_eq!(pre.len(), post.len());
}

#[test]
fn test_shared_node_traversal() {
    let ctx = helpers::ctx();
    let mut arena = ExprArena::new();
    let x = arena.var("x", ValueType::Float);
    // x appears as both operands of one instruction.
    let mul = arena.instr("*", [x, x]);
    arena.consolidate(mul, &ctx).unwrap();

    // Once per identity...
    assert_eq!(arena.post_order_ids(mul).len(), 2);
    // ...but once per occurrence here.
    let occurrences = arena.post_order_occurrences(mul);
    assert_eq!(occurrences.len(), 3);
    assert_eq!(occurrences.iter().filter(|(node, _)| *node == x).count(), 2);
}

#[test]
fn test_deep_copy_preserves_sharing() {
    let ctx = helpers::ctx();
    let mut arena = ExprArena::new();
    let shared = arena.var("M", ValueType::Matrix);
    let transposed = arena.instr("t", [shared]);
    let product = arena.instr("%*%", [transposed, shared]);
    arena.consolidate(product, &ctx).unwrap();

    let (copy, map) = arena.deep_copy(product);
    assert_ne!(copy, product);
    assert!(arena.structural_eq(copy, product));

    // The shared leaf is copied once and still shared.
    let copied_shared = map[&shared];
    let copied_transposed = arena.operands(copy)[0];
    assert_eq!(arena.operands(copy)[1], copied_shared);
    assert_eq!(arena.operands(copied_transposed)[0], copied_shared);
}

#[test]
fn test_path_copy_shares_off_spine_subtrees() {
    let ctx = helpers::ctx();
    let mut arena = ExprArena::new();
    let inner = helpers::row_select_sum(&mut arena, &ctx).unwrap();
    let root = arena.instr("t", [inner]);
    arena.consolidate(root, &ctx).unwrap();

    let (new_root, spine) = arena.path_copy(root, inner).unwrap();
    assert_ne!(new_root, root);
    assert!(spine.contains_key(&inner));
    // The copied spine node still points at the original sum subtree.
    let copied_inner = spine[&inner];
    assert_eq!(arena.operands(copied_inner)[0], arena.operands(inner)[0]);
}
