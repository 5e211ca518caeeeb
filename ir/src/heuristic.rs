//! Heuristic scheduling: ordered, possibly repeated rule-set application.
//!
//! A [`Heuristic`] drives one rule set to its fixpoint
//! (find-first-applicable, apply, re-propagate metadata, repeat).
//! [`Repeated`] wraps an inner stage in a loop that keeps going while
//! rewrites keep occurring. [`HeuristicSequence`] runs named stages strictly
//! in declared order, each to its own fixpoint before the next starts.
//!
//! The caller-supplied step hook sees the current tree after each individual
//! rewrite; returning `false` stops the whole scheduler, not just the
//! current stage. There is no timeout - two unconditional inverse rules will
//! loop forever, and avoiding that is a rule-authoring responsibility.

use std::ops::ControlFlow;

use crate::arena::ExprArena;
use crate::context::RuleContext;
use crate::error::Result;
use crate::meta::MetaPropagator;
use crate::ruleset::RuleSet;
use crate::stmt::StmtId;

/// Step hook: `false` vetoes continuation of the whole scheduler.
pub type StepHook<'a> = &'a mut dyn FnMut(&ExprArena, StmtId) -> bool;

/// Result of a scheduler run.
#[derive(Debug, Clone, Copy)]
pub struct Outcome {
    /// Root of the fully rewritten tree.
    pub root: StmtId,
    /// Whether any rewrite occurred.
    pub rewritten: bool,
}

/// A rewriting stage.
pub trait HeuristicTransform {
    /// Run the stage. `rewritten` accumulates whether any rewrite occurred;
    /// `Break` carries the root at the moment the step hook vetoed.
    fn apply_step(
        &self,
        arena: &mut ExprArena,
        root: StmtId,
        ctx: &RuleContext,
        hook: StepHook<'_>,
        rewritten: &mut bool,
    ) -> Result<ControlFlow<StmtId, StmtId>>;

    /// Convenience entry point unwrapping the control flow.
    fn apply(
        &self,
        arena: &mut ExprArena,
        root: StmtId,
        ctx: &RuleContext,
        hook: Option<StepHook<'_>>,
    ) -> Result<Outcome> {
        let mut default_hook = |_: &ExprArena, _: StmtId| true;
        let hook: StepHook<'_> = match hook {
            Some(hook) => hook,
            None => &mut default_hook,
        };
        let mut rewritten = false;
        let root = match self.apply_step(arena, root, ctx, hook, &mut rewritten)? {
            ControlFlow::Continue(root) | ControlFlow::Break(root) => root,
        };
        Ok(Outcome { root, rewritten })
    }
}

/// One rule set applied to its fixpoint.
#[derive(Debug)]
pub struct Heuristic {
    rule_set: RuleSet,
}

impl Heuristic {
    pub fn new(rule_set: RuleSet) -> Self {
        Self { rule_set }
    }

    pub fn rule_set(&self) -> &RuleSet {
        &self.rule_set
    }
}

impl HeuristicTransform for Heuristic {
    fn apply_step(
        &self,
        arena: &mut ExprArena,
        root: StmtId,
        ctx: &RuleContext,
        hook: StepHook<'_>,
        rewritten: &mut bool,
    ) -> Result<ControlFlow<StmtId, StmtId>> {
        let propagator = MetaPropagator::new(ctx);
        let mut current = root;
        while let Some(applicable) = self.rule_set.find_first_applicable_rule(arena, current, ctx) {
            let rule = self.rule_set.rule(applicable.rule_index);
            let m = &applicable.matches[0];
            tracing::trace!(
                rule_set = %self.rule_set.name(),
                rule = %rule.name(),
                forward = applicable.forward,
                "rewriting"
            );
            current = if applicable.forward {
                rule.apply_forward(arena, current, m, ctx, true)?
            } else {
                rule.apply_backward(arena, current, m, ctx, true)?
            };
            current = propagator.apply(arena, current)?;
            *rewritten = true;
            if !hook(arena, current) {
                return Ok(ControlFlow::Break(current));
            }
        }
        Ok(ControlFlow::Continue(current))
    }
}

/// Wrapper repeating an inner stage while rewrites keep occurring.
pub struct Repeated {
    inner: Box<dyn HeuristicTransform>,
}

impl Repeated {
    pub fn new(inner: impl HeuristicTransform + 'static) -> Self {
        Self { inner: Box::new(inner) }
    }
}

impl HeuristicTransform for Repeated {
    fn apply_step(
        &self,
        arena: &mut ExprArena,
        root: StmtId,
        ctx: &RuleContext,
        hook: StepHook<'_>,
        rewritten: &mut bool,
    ) -> Result<ControlFlow<StmtId, StmtId>> {
        let mut current = root;
        let mut any = false;
        loop {
            let mut round = false;
            let flow = self.inner.apply_step(arena, current, ctx, hook, &mut round)?;
            any |= round;
            match flow {
                ControlFlow::Break(root) => {
                    *rewritten |= any;
                    return Ok(ControlFlow::Break(root));
                }
                ControlFlow::Continue(root) => current = root,
            }
            if !round {
                break;
            }
        }
        *rewritten |= any;
        Ok(ControlFlow::Continue(current))
    }
}

/// A named, ordered sequence of rewriting stages.
#[derive(Default)]
pub struct HeuristicSequence {
    stages: Vec<(String, Box<dyn HeuristicTransform>)>,
}

impl HeuristicSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage, run once to its own fixpoint.
    pub fn add(&mut self, name: &str, stage: impl HeuristicTransform + 'static) -> &mut Self {
        self.stages.push((name.to_string(), Box::new(stage)));
        self
    }

    /// Append a stage wrapped in a rewrite-occurred repetition loop.
    pub fn add_repeated(&mut self, name: &str, stage: impl HeuristicTransform + 'static) -> &mut Self {
        self.stages.push((name.to_string(), Box::new(Repeated::new(stage))));
        self
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|(name, _)| name.as_str())
    }
}

impl HeuristicTransform for HeuristicSequence {
    fn apply_step(
        &self,
        arena: &mut ExprArena,
        root: StmtId,
        ctx: &RuleContext,
        hook: StepHook<'_>,
        rewritten: &mut bool,
    ) -> Result<ControlFlow<StmtId, StmtId>> {
        let mut current = root;
        for (name, stage) in &self.stages {
            tracing::info!(stage = %name, "heuristic stage");
            match stage.apply_step(arena, current, ctx, hook, rewritten)? {
                ControlFlow::Break(root) => return Ok(ControlFlow::Break(root)),
                ControlFlow::Continue(root) => current = root,
            }
        }
        Ok(ControlFlow::Continue(current))
    }
}
