//! Rule sets: ordered collections of rules searched in declaration order.
//!
//! Declaration order is part of the contract - it is the tie-break when
//! multiple rules apply, and the built-in rule sets rely on it to sequence
//! structural setup rules ahead of their corresponding simplifications.
//! Within one rule, the forward pattern is tried before the backward one.

use crate::arena::ExprArena;
use crate::context::RuleContext;
use crate::pattern::MatchingSubexpression;
use crate::rule::Rule;
use crate::stmt::StmtId;

/// One applicable rule together with its matches.
#[derive(Debug)]
pub struct ApplicableRule {
    /// Index of the rule in its [`RuleSet`].
    pub rule_index: usize,
    /// Forward (A=>B) or backward (B=>A) direction.
    pub forward: bool,
    /// At least one match; first-match searches carry exactly one.
    pub matches: Vec<MatchingSubexpression>,
}

/// An ordered, named collection of rules.
#[derive(Debug)]
pub struct RuleSet {
    name: String,
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(name: &str, rules: Vec<Rule>) -> Self {
        Self { name: name.to_string(), rules }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, index: usize) -> &Rule {
        &self.rules[index]
    }

    /// First rule (in declaration order) with a match anywhere in the
    /// target, forward tried before backward. `None` is the normal terminal
    /// condition of the scheduler's fixpoint loop, not an error.
    pub fn find_first_applicable_rule(
        &self,
        arena: &ExprArena,
        root: StmtId,
        ctx: &RuleContext,
    ) -> Option<ApplicableRule> {
        for (rule_index, rule) in self.rules.iter().enumerate() {
            let matches = rule.match_from(arena, root, ctx, true);
            if !matches.is_empty() {
                return Some(ApplicableRule { rule_index, forward: true, matches });
            }
            if !rule.is_unidirectional() {
                let matches = rule.match_to(arena, root, ctx, true);
                if !matches.is_empty() {
                    return Some(ApplicableRule { rule_index, forward: false, matches });
                }
            }
        }
        None
    }

    /// Every rule/direction pair with at least one match, each carrying its
    /// full match list. Used by exploratory/random rewriting.
    pub fn find_applicable_rules(&self, arena: &ExprArena, root: StmtId, ctx: &RuleContext) -> Vec<ApplicableRule> {
        let mut applicable = Vec::new();
        for (rule_index, rule) in self.rules.iter().enumerate() {
            let matches = rule.match_from(arena, root, ctx, false);
            if !matches.is_empty() {
                applicable.push(ApplicableRule { rule_index, forward: true, matches });
            }
            if !rule.is_unidirectional() {
                let matches = rule.match_to(arena, root, ctx, false);
                if !matches.is_empty() {
                    applicable.push(ApplicableRule { rule_index, forward: false, matches });
                }
            }
        }
        applicable
    }
}
