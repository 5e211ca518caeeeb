use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Fatal engine conditions.
///
/// Every variant is a distinct, inspectable error so callers can tell a
/// configuration mistake (bad registry, malformed rule) apart from an
/// unsupported input construct. "No applicable rule" is not an error; the
/// search APIs report it as an empty result.
#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Instruction constructed without an operator name.
    #[snafu(display("instruction operator cannot be empty"))]
    EmptyInstruction,

    /// Registry has no entry for a typed instruction signature.
    #[snafu(display("no registry entry for instruction {signature}"))]
    UnknownInstruction { signature: String },

    /// Registry entry exists but carries no cost function.
    #[snafu(display("no cost function registered for instruction {signature}"))]
    MissingCostFunction { signature: String },

    /// Shape propagation has no rule for a matrix-typed operator.
    #[snafu(display("no shape propagation rule for instruction {signature}"))]
    UnknownShapeRule { signature: String },

    /// Rule construction failed a well-formedness check.
    #[snafu(display("malformed rule {rule}: {reason}"))]
    MalformedRule { rule: String, reason: String },

    /// Rule application reached a destination variable with no binding.
    #[snafu(display("no binding for pattern variable {name} during rule application"))]
    UnboundVariable { name: String },

    /// Indexing bounds must be literals for shape propagation.
    #[snafu(display("non-literal bounds in {op} are not supported by shape propagation"))]
    NonLiteralBounds { op: String },

    /// Equality assertions only apply to instruction statements.
    #[snafu(display("cannot assert equality on non-instruction statement {statement}"))]
    LeafAssertion { statement: String },

    /// Structural mutation of a consolidated statement.
    #[snafu(display("statement {op} cannot be modified after consolidation"))]
    ConsolidatedMutation { op: String },

    /// Operand access out of range.
    #[snafu(display("instruction {op} has no operand {index}"))]
    MissingOperand { op: String, index: usize },

    /// Shape completeness validation failed for a matrix-typed node.
    #[snafu(display("matrix statement {op} is missing row/column metadata after propagation"))]
    MissingShape { op: String },

    /// A marker instruction is missing its required ownership metadata.
    #[snafu(display("marker instruction {op} is missing required metadata key {key}"))]
    MissingMarkerMeta { op: String, key: String },
}
