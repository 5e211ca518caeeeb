//! Shape metadata propagation and literal interning.
//!
//! A single post-order pass over every occurrence of a tree (shared nodes
//! revisited once per parent slot, since metadata is occurrence-local prior
//! to canonicalization) that
//!
//! - constant-folds dimension queries (`nrow`/`ncol` applied to an operand
//!   that already carries the queried metadata),
//! - attaches row/column-count statements to every matrix-typed node,
//!   dispatching on operator identity or capability,
//! - interns duplicate literals (the first occurrence of a value wins;
//!   later equal literals are replaced in their parent slot),
//! - and finally validates shape completeness and marker-ownership
//!   metadata, failing fatally on violations.

use std::collections::HashMap;

use matra_dtype::{Literal, ValueType};

use crate::arena::ExprArena;
use crate::builtins::ELEMENT_WISE;
use crate::context::RuleContext;
use crate::error::{self, Result};
use crate::stmt::{Meta, StmtId, meta_keys};

/// The shape propagation pass. Stateless apart from the registry reference;
/// construct once per context and reuse across rewrites.
pub struct MetaPropagator<'a> {
    ctx: &'a RuleContext,
}

impl<'a> MetaPropagator<'a> {
    pub fn new(ctx: &'a RuleContext) -> Self {
        Self { ctx }
    }

    /// Run the pass over the tree rooted at `root`, returning the (possibly
    /// replaced) root.
    pub fn apply(&self, arena: &mut ExprArena, root: StmtId) -> Result<StmtId> {
        let mut interned: HashMap<Literal, StmtId> = HashMap::new();
        let mut current_root = root;

        for (node, parent) in arena.post_order_occurrences(root) {
            // An earlier step may have replaced this occurrence already.
            if let Some((p, i)) = parent
                && arena.operands(p)[i] != node
            {
                continue;
            }

            let replacement = if let Some(value) = arena.get(node).literal() {
                match interned.get(&value) {
                    Some(&canonical) if canonical != node => Some(canonical),
                    Some(_) => None,
                    None => {
                        interned.insert(value, node);
                        None
                    }
                }
            } else {
                self.propagate(arena, node, &mut interned)?
            };

            if let Some(replacement) = replacement {
                match parent {
                    Some((p, i)) => arena.replace_operand(p, i, replacement),
                    None => current_root = replacement,
                }
            }
        }

        arena.recompute_hashes(current_root);
        self.validate(arena, current_root)?;
        Ok(current_root)
    }

    /// Dimension handling for one non-literal node. Returns a replacement
    /// statement when the node itself folds away (dimension queries).
    fn propagate(
        &self,
        arena: &mut ExprArena,
        node: StmtId,
        interned: &mut HashMap<Literal, StmtId>,
    ) -> Result<Option<StmtId>> {
        let stmt = arena.get(node);
        let vtype = stmt.vtype().expect("statement must be consolidated before propagation");

        if vtype != ValueType::Matrix {
            // Constant-fold dimension queries against already-propagated
            // operand metadata.
            if let Some(op) = stmt.op()
                && (op == "nrow" || op == "ncol")
            {
                let key = if op == "nrow" { meta_keys::NROW } else { meta_keys::NCOL };
                let operand = arena.operand(node, 0)?;
                if let Some(Meta::Stmt(dim)) = arena.get_meta(operand, key) {
                    return Ok(Some(*dim));
                }
            }
            return Ok(None);
        }

        // Matrix leaf (or operand-less instruction): shape defers to the
        // node itself through self-referential accessors.
        if stmt.operands().is_empty() {
            if arena.get_meta(node, meta_keys::NROW).is_none() {
                let nrow = arena.instr("nrow", [node]);
                arena.consolidate(nrow, self.ctx)?;
                arena.put_meta(node, meta_keys::NROW, Meta::Stmt(nrow));
            }
            if arena.get_meta(node, meta_keys::NCOL).is_none() {
                let ncol = arena.instr("ncol", [node]);
                arena.consolidate(ncol, self.ctx)?;
                arena.put_meta(node, meta_keys::NCOL, Meta::Stmt(ncol));
            }
            return Ok(None);
        }

        let op = stmt.op().expect("matrix-typed non-leaf is an instruction").to_string();
        let operands: Vec<StmtId> = stmt.operands().to_vec();

        match op.as_str() {
            // Generators fix their shape from their declared size operands.
            "rand" => {
                self.put_dims(arena, node, operands[0], operands[1]);
            }
            "matrix" => {
                self.put_dims(arena, node, operands[1], operands[2]);
            }
            "as.matrix" => {
                let one = self.intern_literal(arena, interned, Literal::Int(1));
                self.put_dims(arena, node, one, one);
            }
            "t" => {
                let nrow = self.dim_of(arena, operands[0], meta_keys::NCOL);
                let ncol = self.dim_of(arena, operands[0], meta_keys::NROW);
                self.put_dims_opt(arena, node, nrow, ncol);
            }
            "%*%" => {
                let nrow = self.dim_of(arena, operands[0], meta_keys::NROW);
                let ncol = self.dim_of(arena, operands[1], meta_keys::NCOL);
                self.put_dims_opt(arena, node, nrow, ncol);
            }
            "rowSums" => {
                let one = self.intern_literal(arena, interned, Literal::Int(1));
                let nrow = self.dim_of(arena, operands[0], meta_keys::NROW);
                self.put_dims_opt(arena, node, nrow, Some(one));
            }
            "colSums" => {
                let one = self.intern_literal(arena, interned, Literal::Int(1));
                let ncol = self.dim_of(arena, operands[0], meta_keys::NCOL);
                self.put_dims_opt(arena, node, Some(one), ncol);
            }
            "diag" => {
                let one = self.intern_literal(arena, interned, Literal::Int(1));
                let nrow = self.dim_of(arena, operands[0], meta_keys::NROW);
                self.put_dims_opt(arena, node, nrow, Some(one));
            }
            "[]" => {
                // Range indexing: extents are computable for literal bounds
                // only; anything symbolic is explicitly unsupported here.
                let bounds: Vec<Option<i64>> =
                    operands[1..5].iter().map(|&b| arena.get(b).literal().and_then(|l| l.as_int())).collect();
                match (bounds[0], bounds[1], bounds[2], bounds[3]) {
                    (Some(r1), Some(r2), Some(c1), Some(c2)) => {
                        let nrow = self.intern_literal(arena, interned, Literal::Int(r2 - r1 + 1));
                        let ncol = self.intern_literal(arena, interned, Literal::Int(c2 - c1 + 1));
                        self.put_dims(arena, node, nrow, ncol);
                    }
                    _ => return error::NonLiteralBoundsSnafu { op: op.clone() }.fail(),
                }
            }
            "rowSelect" => {
                let extent = self.selection_extent(arena, interned, operands[1], operands[2])?;
                let ncol = self.dim_of(arena, operands[0], meta_keys::NCOL);
                self.put_dims_opt(arena, node, Some(extent), ncol);
            }
            "colSelect" => {
                let extent = self.selection_extent(arena, interned, operands[1], operands[2])?;
                let nrow = self.dim_of(arena, operands[0], meta_keys::NROW);
                self.put_dims_opt(arena, node, nrow, Some(extent));
            }
            "_m" => {
                let nrow = self.index_bound(arena, interned, operands[0])?;
                let ncol = self.index_bound(arena, interned, operands[1])?;
                self.put_dims(arena, node, nrow, ncol);
            }
            _ => {
                let signature = arena.signature(node)?;
                if self.ctx.implements(&signature, ELEMENT_WISE) {
                    // Element-wise operators inherit the shape of whichever
                    // operand is matrix-typed.
                    let matrix_operand = operands
                        .iter()
                        .copied()
                        .find(|&operand| arena.vtype(operand) == Some(ValueType::Matrix))
                        .expect("element-wise matrix instruction has a matrix operand");
                    let nrow = self.dim_of(arena, matrix_operand, meta_keys::NROW);
                    let ncol = self.dim_of(arena, matrix_operand, meta_keys::NCOL);
                    self.put_dims_opt(arena, node, nrow, ncol);
                } else {
                    return error::UnknownShapeRuleSnafu { signature: signature.to_string() }.fail();
                }
            }
        }
        Ok(None)
    }

    /// Extent of a selection range `lo..hi`: folded to a literal when both
    /// bounds are literal, otherwise the symbolic statement `((hi - lo) + 1)`.
    fn selection_extent(
        &self,
        arena: &mut ExprArena,
        interned: &mut HashMap<Literal, StmtId>,
        lo: StmtId,
        hi: StmtId,
    ) -> Result<StmtId> {
        let literal_bounds = (
            arena.get(lo).literal().and_then(|l| l.as_int()),
            arena.get(hi).literal().and_then(|l| l.as_int()),
        );
        if let (Some(lo), Some(hi)) = literal_bounds {
            return Ok(self.intern_literal(arena, interned, Literal::Int(hi - lo + 1)));
        }
        let one = self.intern_literal(arena, interned, Literal::Int(1));
        let diff = arena.instr("-", [hi, lo]);
        let extent = arena.instr("+", [diff, one]);
        arena.consolidate(extent, self.ctx)?;
        Ok(extent)
    }

    /// Upper bound of an `_idx(lo, hi)` streaming-index marker; a non-marker
    /// operand pins the dimension to 1.
    fn index_bound(
        &self,
        arena: &mut ExprArena,
        interned: &mut HashMap<Literal, StmtId>,
        operand: StmtId,
    ) -> Result<StmtId> {
        if arena.get(operand).op() == Some("_idx") {
            arena.operand(operand, 1)
        } else {
            Ok(self.intern_literal(arena, interned, Literal::Int(1)))
        }
    }

    fn intern_literal(&self, arena: &mut ExprArena, interned: &mut HashMap<Literal, StmtId>, value: Literal) -> StmtId {
        if let Some(&id) = interned.get(&value) {
            return id;
        }
        let id = arena.literal(value);
        interned.insert(value, id);
        id
    }

    fn put_dims(&self, arena: &mut ExprArena, node: StmtId, nrow: StmtId, ncol: StmtId) {
        arena.put_meta(node, meta_keys::NROW, Meta::Stmt(nrow));
        arena.put_meta(node, meta_keys::NCOL, Meta::Stmt(ncol));
    }

    /// Propagate whichever dimensions the operand actually carried; missing
    /// ones are left absent for the validation step to report.
    fn put_dims_opt(&self, arena: &mut ExprArena, node: StmtId, nrow: Option<StmtId>, ncol: Option<StmtId>) {
        if let Some(nrow) = nrow {
            arena.put_meta(node, meta_keys::NROW, Meta::Stmt(nrow));
        }
        if let Some(ncol) = ncol {
            arena.put_meta(node, meta_keys::NCOL, Meta::Stmt(ncol));
        }
    }

    fn dim_of(&self, arena: &ExprArena, node: StmtId, key: &str) -> Option<StmtId> {
        match arena.get_meta(node, key) {
            Some(Meta::Stmt(dim)) => Some(*dim),
            _ => None,
        }
    }

    /// Shape completeness and marker-ownership validation.
    fn validate(&self, arena: &ExprArena, root: StmtId) -> Result<()> {
        for node in arena.post_order_ids(root) {
            let stmt = arena.get(node);
            if stmt.vtype() == Some(ValueType::Matrix)
                && (stmt.get_meta(meta_keys::NROW).is_none() || stmt.get_meta(meta_keys::NCOL).is_none())
            {
                return error::MissingShapeSnafu { op: stmt.op().unwrap_or(stmt.name()).to_string() }.fail();
            }
            match stmt.op() {
                Some("_m") if stmt.get_meta(meta_keys::OWNER_ID).is_none() => {
                    return error::MissingMarkerMetaSnafu { op: "_m".to_string(), key: meta_keys::OWNER_ID.to_string() }
                        .fail();
                }
                Some("_idx") if stmt.get_meta(meta_keys::IDX_ID).is_none() => {
                    return error::MissingMarkerMetaSnafu {
                        op: "_idx".to_string(),
                        key: meta_keys::IDX_ID.to_string(),
                    }
                    .fail();
                }
                _ => {}
            }
        }
        Ok(())
    }
}
