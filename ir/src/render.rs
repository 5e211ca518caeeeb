//! Canonical textual rendering of statements.
//!
//! The default form is `op(a, b, ...)`, with two-operand instructions
//! rendered infix as `(a op b)`. A custom renderer registered for the
//! instruction's signature takes precedence; the external validator uses
//! this to embed rewritten expressions in generated verification code.

use crate::arena::ExprArena;
use crate::context::RuleContext;
use crate::stmt::{StmtId, StmtKind};

impl ExprArena {
    /// Render the subtree rooted at `id`, honoring custom per-signature
    /// renderers from `ctx`.
    pub fn render(&self, id: StmtId, ctx: &RuleContext) -> String {
        let stmt = self.get(id);
        match &stmt.kind {
            StmtKind::Var { .. } => stmt.name().to_string(),
            StmtKind::Literal { value } => value.to_string(),
            StmtKind::Instr { op, operands, .. } => {
                if let Ok(signature) = self.signature(id)
                    && let Some(info) = ctx.try_lookup(&signature)
                    && let Some(renderer) = &info.renderer
                {
                    return renderer(self, ctx, id);
                }

                if operands.len() == 2 {
                    return format!("({} {} {})", self.render(operands[0], ctx), op, self.render(operands[1], ctx));
                }

                let rendered: Vec<String> = operands.iter().map(|&operand| self.render(operand, ctx)).collect();
                format!("{}({})", op, rendered.join(", "))
            }
        }
    }
}
