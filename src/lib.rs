//! The semantic-analysis and IR-generation stage of a C compiler.
//!
//! The input is a parsed AST for one translation unit ([`types::ast`]); the
//! output is a typed, block-structured linear IR ([`types::ir`]) ready for a
//! downstream optimizer and code generator. In between sit the pieces that
//! make C interesting to lower:
//!
//! * a type environment with structural records, incomplete types,
//!   canonical pointers, and array/function decay ([`types::ty`]);
//! * a constant evaluator for array bounds, enum values, case labels and
//!   static initializers ([`const_eval`]);
//! * C's inside-out declarator reading rules ([`decl`]);
//! * recursive aggregate initializers with designators, string literals
//!   and zero fill ([`init`]);
//! * the expression/statement lowering engine and top-level driver
//!   ([`build_ir`]), which owns control-flow construction: short-circuit
//!   phis, two-pass `switch` dispatch, and `goto` fixups.
//!
//! The whole pass is a single-threaded tree walk driven by
//! [`lower_unit`]; errors are fatal at translation-unit granularity and no
//! partial IR escapes on failure.

mod symbol;
pub mod types;
mod const_eval;
mod decl;
mod init;
mod build_ir;

use types::Span;

pub use symbol::{Interner, Symbol, intern};
pub use types::{Idx, IdxVec, IntRank, IntTy, Spanned};
pub use build_ir::{ExprCtx, IrGen, Term};

/// The kinds of user-visible lowering errors. Everything here is fatal at
/// the translation-unit level; internal invariants that cannot be violated
/// by any parser output are asserted instead.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
  /// An expression referenced a name with no binding in scope.
  #[error("unknown identifier `{0}`")]
  UnknownIdent(Symbol),
  /// A type specifier referenced an unknown typedef or tag.
  #[error("unknown type name `{0}`")]
  UnknownType(Symbol),
  /// Operand types not permitted for an operation.
  #[error("type mismatch: {0}")]
  TypeMismatch(&'static str),
  /// A struct or union tag was defined twice.
  #[error("redefinition of `{0}`")]
  RecordRedefinition(Symbol),
  /// A complete type was required (sizing, field layout, dereference).
  #[error("use of incomplete type")]
  IncompleteType,
  /// The parser accepted a form this stage does not implement.
  #[error("unsupported construct: {0}")]
  Unsupported(&'static str),
  /// A non-constant expression appeared where a constant was required.
  #[error("expression is not constant")]
  BadConstExpr,
  /// `break`/`continue` outside a loop or switch, `case` outside a
  /// switch, or a duplicate label.
  #[error("malformed control flow: {0}")]
  MalformedControlFlow(&'static str),
  /// A `goto` whose label never appeared in the function.
  #[error("unresolved label `{0}`")]
  UnresolvedLabel(Symbol),
}

impl ErrorKind {
  /// Attach a source location, producing a reportable error.
  #[must_use] pub fn at(self, span: Span) -> LowerError { LowerError { kind: self, span } }
}

/// A lowering error with its source location.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{span:?}: {kind}")]
pub struct LowerError {
  /// What went wrong.
  pub kind: ErrorKind,
  /// Where in the source it went wrong.
  pub span: Span,
}

pub(crate) type Result<T, E = LowerError> = std::result::Result<T, E>;

/// Lower a parsed translation unit to IR. This is the main entry point of
/// the crate; the returned unit has passed the control-flow validator.
pub fn lower_unit<'a>(ast: &'a types::ast::TranslationUnit<'a>)
  -> Result<types::ir::TransUnit, LowerError> {
  IrGen::run(ast)
}
