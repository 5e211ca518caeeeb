//! The default linear-algebra instruction vocabulary.
//!
//! [`default_context`] registers the operators the built-in rule collection
//! and the meta propagator dispatch on: scalar arithmetic, comparison and
//! boolean operators, element-wise matrix arithmetic (capability-classed),
//! matrix products, reductions, generators, dimension accessors, range
//! selection and the streaming-index markers.
//!
//! Capability classing is multi-level: concrete element-wise operators
//! implement `ElementWiseInstruction`, which in turn implements
//! `RowSelectPushableBinaryInstruction`, so a row-selection pushdown pattern
//! matches any element-wise operator without either being named.

use std::sync::Arc;

use matra_dtype::ValueType::{self, Bool, Float, Int, Matrix};

use crate::context::{RenderFn, RuleContext};

/// Abstract class of operators that propagate shape element-wise.
pub const ELEMENT_WISE: &str = "ElementWiseInstruction";
/// Abstract class of binary operators a row selection distributes over.
pub const ROW_SELECT_PUSHABLE: &str = "RowSelectPushableBinaryInstruction";

/// Build a registry covering the default vocabulary.
pub fn default_context() -> RuleContext {
    let mut ctx = RuleContext::new();

    register_scalar_ops(&mut ctx);
    register_matrix_ops(&mut ctx);
    register_markers(&mut ctx);

    ctx
}

fn register_scalar_ops(ctx: &mut RuleContext) {
    let numeric: [(ValueType, ValueType, ValueType); 4] =
        [(Int, Int, Int), (Float, Float, Float), (Int, Float, Float), (Float, Int, Float)];

    for (lhs, rhs, result) in numeric {
        ctx.register("+", &[lhs, rhs], result).commutative();
        ctx.register("*", &[lhs, rhs], result).commutative();
        ctx.register("-", &[lhs, rhs], result);
        ctx.register("/", &[lhs, rhs], Float);
        ctx.register("min", &[lhs, rhs], result).commutative();
        ctx.register("max", &[lhs, rhs], result).commutative();

        for comparison in ["<", ">", "<=", ">="] {
            ctx.register(comparison, &[lhs, rhs], Bool);
        }
        ctx.register("==", &[lhs, rhs], Bool).commutative();
        ctx.register("!=", &[lhs, rhs], Bool).commutative();
    }

    ctx.register("&", &[Bool, Bool], Bool).commutative();
    ctx.register("|", &[Bool, Bool], Bool).commutative();
    ctx.register("!", &[Bool], Bool);
    ctx.register("==", &[Bool, Bool], Bool).commutative();
    ctx.register("!=", &[Bool, Bool], Bool).commutative();
}

fn register_matrix_ops(ctx: &mut RuleContext) {
    // Element-wise arithmetic, matrix-matrix and matrix-scalar.
    let shapes: [[ValueType; 2]; 3] = [[Matrix, Matrix], [Matrix, Float], [Float, Matrix]];
    for operand_types in shapes {
        for op in ["+", "-", "*", "/"] {
            let info = ctx.register(op, &operand_types, Matrix);
            info.implements(ELEMENT_WISE);
            if op == "+" || op == "*" {
                info.commutative();
            }
        }
        // The capability itself is matchable and carries the next level.
        ctx.register(ELEMENT_WISE, &operand_types, Matrix).implements(ROW_SELECT_PUSHABLE);
    }
    ctx.register(ROW_SELECT_PUSHABLE, &[Matrix, Matrix], Matrix);

    ctx.register("%*%", &[Matrix, Matrix], Matrix).cost(Arc::new(|_, _| 100));
    ctx.register("t", &[Matrix], Matrix);
    ctx.register("sum", &[Matrix], Float);
    ctx.register("trace", &[Matrix], Float);
    ctx.register("rowSums", &[Matrix], Matrix);
    ctx.register("colSums", &[Matrix], Matrix);
    ctx.register("diag", &[Matrix], Matrix);

    ctx.register("rand", &[Int, Int, Float, Float], Matrix);
    ctx.register("matrix", &[Float, Int, Int], Matrix);
    ctx.register("as.matrix", &[Float], Matrix);
    ctx.register("as.matrix", &[Int], Matrix);
    ctx.register("as.scalar", &[Matrix], Float);

    ctx.register("nrow", &[Matrix], Int);
    ctx.register("ncol", &[Matrix], Int);
    ctx.register("length", &[Matrix], Int);

    // Range indexing and row/column selection, with selection-style
    // renderers for generated verification code.
    let range_renderer: RenderFn = Arc::new(|arena, ctx, id| {
        let ops = arena.operands(id);
        format!(
            "{}[{}:{},{}:{}]",
            arena.render(ops[0], ctx),
            arena.render(ops[1], ctx),
            arena.render(ops[2], ctx),
            arena.render(ops[3], ctx),
            arena.render(ops[4], ctx),
        )
    });
    ctx.register("[]", &[Matrix, Int, Int, Int, Int], Matrix).renderer(range_renderer);

    let element_renderer: RenderFn = Arc::new(|arena, ctx, id| {
        let ops = arena.operands(id);
        format!("{}[{},{}]", arena.render(ops[0], ctx), arena.render(ops[1], ctx), arena.render(ops[2], ctx))
    });
    ctx.register("[]", &[Matrix, Int, Int], Float).renderer(element_renderer);

    let row_select_renderer: RenderFn = Arc::new(|arena, ctx, id| {
        let ops = arena.operands(id);
        format!("{}[{}:{},]", arena.render(ops[0], ctx), arena.render(ops[1], ctx), arena.render(ops[2], ctx))
    });
    ctx.register("rowSelect", &[Matrix, Int, Int], Matrix).renderer(row_select_renderer);

    let col_select_renderer: RenderFn = Arc::new(|arena, ctx, id| {
        let ops = arena.operands(id);
        format!("{}[,{}:{}]", arena.render(ops[0], ctx), arena.render(ops[1], ctx), arena.render(ops[2], ctx))
    });
    ctx.register("colSelect", &[Matrix, Int, Int], Matrix).renderer(col_select_renderer);
}

fn register_markers(ctx: &mut RuleContext) {
    // Streaming-expression markers: `_idx` ranges over an index interval,
    // `_m` constructs a matrix from two index markers and a cell expression.
    ctx.register("_idx", &[Int, Int], Int);
    ctx.register("_m", &[Int, Int, Float], Matrix);
}
