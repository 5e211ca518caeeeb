use proptest::prelude::*;

use crate::arena::{ExprArena, structural_eq};
use crate::meta::MetaPropagator;
use crate::pattern::match_root;
use crate::test::helpers;

use super::generators::{arb_tree, realize};

proptest! {
    /// Consolidating an already-consolidated tree never alters its hash.
    #[test]
    fn consolidation_is_idempotent(spec in arb_tree()) {
        let ctx = helpers::ctx();
        let mut arena = ExprArena::new();
        let root = realize(&spec, &mut arena, &ctx);

        let hashes: Vec<u64> =
            arena.post_order_ids(root).iter().map(|&node| arena.get(node).structural_hash()).collect();
        arena.consolidate(root, &ctx).unwrap();
        let again: Vec<u64> =
            arena.post_order_ids(root).iter().map(|&node| arena.get(node).structural_hash()).collect();
        prop_assert_eq!(hashes, again);
    }

    /// Independently built instances of one spec are structurally equal and
    /// hash identically.
    #[test]
    fn structural_hash_is_deterministic(spec in arb_tree()) {
        let ctx = helpers::ctx();
        let mut first = ExprArena::new();
        let mut second = ExprArena::new();
        let a = realize(&spec, &mut first, &ctx);
        let b = realize(&spec, &mut second, &ctx);

        prop_assert!(structural_eq(&first, a, &second, b));
        prop_assert_eq!(first.get(a).structural_hash(), second.get(b).structural_hash());
    }

    /// A ground tree used as its own pattern matches itself, and every
    /// pattern node binds a structurally equal target subtree.
    #[test]
    fn ground_match_is_sound(spec in arb_tree()) {
        let ctx = helpers::ctx();
        let mut pattern = ExprArena::new();
        let mut target = ExprArena::new();
        let pattern_root = realize(&spec, &mut pattern, &ctx);
        let target_root = realize(&spec, &mut target, &ctx);

        let m = match_root(&pattern, pattern_root, &target, target_root, &ctx)
            .expect("a tree matches its own structure");
        for (&pattern_node, &bound) in m.bindings() {
            prop_assert!(structural_eq(&pattern, pattern_node, &target, bound));
        }
    }

    /// After propagation, equal literal values share one node identity.
    #[test]
    fn interning_unifies_equal_literals(spec in arb_tree()) {
        let ctx = helpers::ctx();
        let mut arena = ExprArena::new();
        let root = realize(&spec, &mut arena, &ctx);
        let root = MetaPropagator::new(&ctx).apply(&mut arena, root).unwrap();

        let mut seen = std::collections::HashMap::new();
        for node in arena.post_order_ids(root) {
            if let Some(value) = arena.get(node).literal() {
                if let Some(&first) = seen.get(&value) {
                    prop_assert_eq!(first, node, "literal {:?} must be interned to one node", value);
                } else {
                    seen.insert(value, node);
                }
            }
        }
    }

    /// Deep copies are structurally equal to their originals.
    #[test]
    fn deep_copy_is_faithful(spec in arb_tree()) {
        let ctx = helpers::ctx();
        let mut arena = ExprArena::new();
        let root = realize(&spec, &mut arena, &ctx);
        let (copy, _) = arena.deep_copy(root);
        prop_assert!(arena.structural_eq(copy, root));
        prop_assert_eq!(arena.get(copy).structural_hash(), arena.get(root).structural_hash());
    }
}
