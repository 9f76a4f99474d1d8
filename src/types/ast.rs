//! The input AST, as produced by the parser collaborator.
//!
//! Nodes are allocated from a per-translation-unit [`AstArena`] and refer to
//! each other by `&'a` references; the arena owns everything until the whole
//! unit is dropped. Node families follow the C11 grammar: external
//! declarations, declarations with specifier lists and init-declarators,
//! (pointer | direct) declarator trees, statements, expressions, type names,
//! and initializers with designator chains.

use typed_arena::Arena;
use crate::Symbol;
use super::{Span, Spanned};

/// A parsed translation unit: the list of external declarations in source
/// order.
#[derive(Debug, Default)]
pub struct TranslationUnit<'a> {
  /// The external declarations, in source order.
  pub decls: Vec<ExternalDecl<'a>>,
}

/// An external declaration.
#[derive(Copy, Clone, Debug)]
pub enum ExternalDecl<'a> {
  /// A function definition.
  FunctionDef(&'a FunctionDef<'a>),
  /// An object, function, or typedef declaration.
  Decl(&'a Decl<'a>),
}

/// A function definition: specifiers, the declarator naming the function
/// and its parameters, and the body (always a compound statement).
#[derive(Debug)]
pub struct FunctionDef<'a> {
  /// The source position of the definition's head.
  pub span: Span,
  /// The declaration specifiers (return type, storage class, `inline`).
  pub specifiers: Vec<DeclSpec<'a>>,
  /// The function declarator.
  pub declarator: &'a Declarator<'a>,
  /// The function body.
  pub body: &'a Stmt<'a>,
}

/// A declaration: specifiers plus zero or more init-declarators.
#[derive(Debug)]
pub struct Decl<'a> {
  /// The source position of the declaration.
  pub span: Span,
  /// The declaration specifiers.
  pub specifiers: Vec<DeclSpec<'a>>,
  /// The declarators, each with an optional initializer.
  pub inits: Vec<InitDeclarator<'a>>,
}

/// One declarator in a declaration, with its optional initializer.
#[derive(Copy, Clone, Debug)]
pub struct InitDeclarator<'a> {
  /// The declarator.
  pub declarator: &'a Declarator<'a>,
  /// The initializer, if present.
  pub init: Option<&'a Initializer<'a>>,
}

/// A single declaration specifier.
#[derive(Copy, Clone, Debug)]
pub enum DeclSpec<'a> {
  /// A storage class specifier.
  Storage(StorageClass),
  /// A type specifier.
  Type(&'a TypeSpecifier<'a>),
  /// A function specifier (`inline` is the only one).
  Function(FunctionSpecifier),
}

/// A storage class specifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StorageClass {
  /// `typedef`
  Typedef,
  /// `extern`
  Extern,
  /// `static`
  Static,
  /// `auto` (accepted and ignored)
  Auto,
  /// `register` (accepted and ignored)
  Register,
}

/// A function specifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FunctionSpecifier {
  /// `inline`
  Inline,
}

/// A type specifier with its source position.
pub type TypeSpecifier<'a> = Spanned<TypeSpecifierKind<'a>>;

/// The type specifier forms.
#[derive(Debug)]
pub enum TypeSpecifierKind<'a> {
  /// A base type keyword (`int`, `unsigned`, ...) or a typedef name.
  /// Multi-keyword base types (`unsigned long long`) appear as consecutive
  /// `Named` specifiers in the specifier list.
  Named(Symbol),
  /// A `struct` or `union` specifier, with or without a body.
  Record(RecordSpecifier<'a>),
  /// An `enum` specifier, with or without a body.
  Enum(EnumSpecifier<'a>),
}

/// A `struct`/`union` specifier.
#[derive(Debug)]
pub struct RecordSpecifier<'a> {
  /// True for `union`, false for `struct`.
  pub is_union: bool,
  /// The tag, if named.
  pub tag: Option<Symbol>,
  /// The field declarations; `None` for a bodyless reference.
  pub fields: Option<Vec<FieldDecl<'a>>>,
  /// True if the struct is declared packed.
  pub packed: bool,
}

/// An `enum` specifier.
#[derive(Debug)]
pub struct EnumSpecifier<'a> {
  /// The tag, if named.
  pub tag: Option<Symbol>,
  /// The enumerators; `None` for a bodyless reference.
  pub enumerators: Option<Vec<Enumerator<'a>>>,
}

/// One enumerator, with an optional explicit value expression.
#[derive(Copy, Clone, Debug)]
pub struct Enumerator<'a> {
  /// The enumerator name.
  pub name: Symbol,
  /// The explicit value, if given.
  pub value: Option<&'a Expr<'a>>,
}

/// A field declaration inside a struct/union body: one specifier list
/// shared by one or more field declarators.
#[derive(Debug)]
pub struct FieldDecl<'a> {
  /// The declaration specifiers.
  pub specifiers: Vec<DeclSpec<'a>>,
  /// The field declarators.
  pub declarators: Vec<FieldDeclarator<'a>>,
}

/// A single field declarator, possibly a bit-field (which this stage
/// rejects as unsupported).
#[derive(Copy, Clone, Debug)]
pub struct FieldDeclarator<'a> {
  /// The declarator.
  pub declarator: &'a Declarator<'a>,
  /// The bit-field width, if present.
  pub bit_width: Option<&'a Expr<'a>>,
}

/// A declarator: a chain of pointer wrappers around a direct declarator.
#[derive(Copy, Clone, Debug)]
pub enum Declarator<'a> {
  /// `* declarator`
  Pointer(&'a Declarator<'a>),
  /// A direct declarator.
  Direct(&'a DirectDeclarator<'a>),
}

/// A direct declarator.
#[derive(Debug)]
pub enum DirectDeclarator<'a> {
  /// The declared identifier.
  Ident(Symbol),
  /// The hole of an abstract declarator (type names, unnamed parameters).
  Abstract,
  /// A parenthesized sub-declarator.
  Paren(&'a Declarator<'a>),
  /// An array declarator, with an optional length expression.
  Array {
    /// The element declarator.
    elem: &'a DirectDeclarator<'a>,
    /// The length, absent for `[]`.
    len: Option<&'a Expr<'a>>,
  },
  /// A function declarator with its parameter list.
  Function {
    /// The declarator for the function itself.
    inner: &'a DirectDeclarator<'a>,
    /// The parameter declarations.
    params: Vec<ParamDecl<'a>>,
    /// True if the parameter list ends in `...`.
    variadic: bool,
  },
}

/// A parameter declaration.
#[derive(Debug)]
pub struct ParamDecl<'a> {
  /// The declaration specifiers.
  pub specifiers: Vec<DeclSpec<'a>>,
  /// The declarator; `None` when fully abstract.
  pub declarator: Option<&'a Declarator<'a>>,
}

/// A type name, as used in casts, `sizeof`, compound literals and
/// `__builtin_va_arg`: specifiers plus an optional abstract declarator.
#[derive(Debug)]
pub struct TypeName<'a> {
  /// The declaration specifiers.
  pub specifiers: Vec<DeclSpec<'a>>,
  /// The abstract declarator, if any.
  pub declarator: Option<&'a Declarator<'a>>,
}

/// An initializer.
#[derive(Debug)]
pub enum Initializer<'a> {
  /// A plain expression initializer.
  Expr(&'a Expr<'a>),
  /// A brace-enclosed initializer list.
  List(Vec<InitItem<'a>>),
}

/// One element of a brace-enclosed initializer list, with its designator
/// chain (empty for positional elements).
#[derive(Debug)]
pub struct InitItem<'a> {
  /// The designator chain prefix.
  pub designators: Vec<Designator<'a>>,
  /// The element's initializer.
  pub init: &'a Initializer<'a>,
}

/// A single designator.
#[derive(Copy, Clone, Debug)]
pub enum Designator<'a> {
  /// `.field`
  Field(Symbol),
  /// `[constant-expression]`
  Index(&'a Expr<'a>),
}

/// A statement with its source position.
pub type Stmt<'a> = Spanned<StmtKind<'a>>;

/// The statement forms.
#[derive(Debug)]
pub enum StmtKind<'a> {
  /// `label: stmt`
  Labeled(Symbol, &'a Stmt<'a>),
  /// `case expr: stmt`
  Case(&'a Expr<'a>, &'a Stmt<'a>),
  /// `default: stmt`
  Default(&'a Stmt<'a>),
  /// `{ ... }`
  Compound(Vec<BlockItem<'a>>),
  /// An expression statement; `None` is the empty statement `;`.
  Expr(Option<&'a Expr<'a>>),
  /// `if (cond) then [else els]`
  If {
    /// The controlling expression.
    cond: &'a Expr<'a>,
    /// The then branch.
    then: &'a Stmt<'a>,
    /// The else branch, if present.
    els: Option<&'a Stmt<'a>>,
  },
  /// `switch (ctrl) body`
  Switch {
    /// The controlling expression.
    ctrl: &'a Expr<'a>,
    /// The switch body.
    body: &'a Stmt<'a>,
  },
  /// `while (cond) body`
  While {
    /// The loop condition.
    cond: &'a Expr<'a>,
    /// The loop body.
    body: &'a Stmt<'a>,
  },
  /// `do body while (cond);`
  DoWhile {
    /// The loop body.
    body: &'a Stmt<'a>,
    /// The loop condition.
    cond: &'a Expr<'a>,
  },
  /// `for (init; cond; update) body`
  For {
    /// The init clause.
    init: ForInit<'a>,
    /// The condition; absent means constant true.
    cond: Option<&'a Expr<'a>>,
    /// The update expression.
    update: Option<&'a Expr<'a>>,
    /// The loop body.
    body: &'a Stmt<'a>,
  },
  /// `goto label;`
  Goto(Symbol),
  /// `continue;`
  Continue,
  /// `break;`
  Break,
  /// `return [expr];`
  Return(Option<&'a Expr<'a>>),
}

/// The init clause of a `for` statement.
#[derive(Copy, Clone, Debug)]
pub enum ForInit<'a> {
  /// A declaration, scoped to the loop.
  Decl(&'a Decl<'a>),
  /// An optional expression.
  Expr(Option<&'a Expr<'a>>),
}

/// An item in a compound statement.
#[derive(Copy, Clone, Debug)]
pub enum BlockItem<'a> {
  /// A declaration.
  Decl(&'a Decl<'a>),
  /// A statement.
  Stmt(&'a Stmt<'a>),
}

/// An expression with its source position.
pub type Expr<'a> = Spanned<ExprKind<'a>>;

/// The expression forms.
#[derive(Debug)]
pub enum ExprKind<'a> {
  /// An identifier reference.
  Ident(Symbol),
  /// An integer literal, kept in lexical form so the typing rules can see
  /// the base and suffix. Character constants arrive in this form too,
  /// already reduced to their integer value by the lexer.
  Int(IntLit),
  /// A string literal, with escapes already processed.
  Str(Box<[u8]>),
  /// A unary operator application.
  Unary(UnaryOp, &'a Expr<'a>),
  /// A binary operator application.
  Binary(BinaryOp, &'a Expr<'a>, &'a Expr<'a>),
  /// An assignment; `op` is the compound-assignment operator, if any.
  Assign {
    /// The compound operator (`+=` carries `Add`), or `None` for `=`.
    op: Option<BinaryOp>,
    /// The assigned-to expression.
    lhs: &'a Expr<'a>,
    /// The assigned value.
    rhs: &'a Expr<'a>,
  },
  /// `a[b]`
  Index(&'a Expr<'a>, &'a Expr<'a>),
  /// A function call.
  Call {
    /// The called expression.
    callee: &'a Expr<'a>,
    /// The arguments, in source order.
    args: Vec<&'a Expr<'a>>,
  },
  /// `base.field` or `base->field`.
  Member {
    /// True for `->`, false for `.`.
    arrow: bool,
    /// The receiver.
    base: &'a Expr<'a>,
    /// The field name.
    field: Symbol,
  },
  /// `cond ? then : els`
  Conditional {
    /// The condition.
    cond: &'a Expr<'a>,
    /// The value if nonzero.
    then: &'a Expr<'a>,
    /// The value if zero.
    els: &'a Expr<'a>,
  },
  /// `a, b`
  Comma(&'a Expr<'a>, &'a Expr<'a>),
  /// `(type) expr`
  Cast(&'a TypeName<'a>, &'a Expr<'a>),
  /// `sizeof expr`
  SizeofExpr(&'a Expr<'a>),
  /// `sizeof (type)`
  SizeofType(&'a TypeName<'a>),
  /// A compound literal `(type) { ... }`.
  CompoundLiteral(&'a TypeName<'a>, &'a Initializer<'a>),
  /// `__builtin_va_arg(ap, type)`
  VaArg(&'a Expr<'a>, &'a TypeName<'a>),
}

/// The base of an integer literal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IntBase {
  /// No prefix.
  Decimal,
  /// `0` prefix.
  Octal,
  /// `0x` prefix.
  Hexadecimal,
}

impl IntBase {
  /// The radix for digit parsing.
  #[must_use] pub fn radix(self) -> u32 {
    match self {
      IntBase::Decimal => 10,
      IntBase::Octal => 8,
      IntBase::Hexadecimal => 16,
    }
  }
}

/// The size portion of an integer literal suffix.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum IntSuffixSize {
  /// No size suffix.
  #[default]
  None,
  /// `l` / `L`
  Long,
  /// `ll` / `LL`
  LongLong,
}

/// An integer literal in lexical form.
#[derive(Clone, Debug)]
pub struct IntLit {
  /// The digits, without base prefix or suffix.
  pub digits: Box<str>,
  /// The base.
  pub base: IntBase,
  /// True if the suffix contains `u`/`U`.
  pub unsigned: bool,
  /// The size suffix.
  pub size: IntSuffixSize,
}

impl IntLit {
  /// A decimal literal with the given value and no suffix.
  #[must_use] pub fn dec(n: u64) -> Self {
    Self {
      digits: n.to_string().into_boxed_str(),
      base: IntBase::Decimal,
      unsigned: false,
      size: IntSuffixSize::None,
    }
  }
}

/// The unary operators.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOp {
  /// `+a`
  Plus,
  /// `-a`
  Minus,
  /// `~a`
  BitNot,
  /// `!a`
  LogNot,
  /// `&a`
  AddrOf,
  /// `*a`
  Deref,
  /// `++a`
  PreInc,
  /// `--a`
  PreDec,
  /// `a++`
  PostInc,
  /// `a--`
  PostDec,
}

/// The binary operators (assignment forms are [`ExprKind::Assign`]).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOp {
  /// `a + b`
  Add,
  /// `a - b`
  Sub,
  /// `a * b`
  Mul,
  /// `a / b`
  Div,
  /// `a % b`
  Mod,
  /// `a << b`
  Shl,
  /// `a >> b`
  Shr,
  /// `a & b`
  BitAnd,
  /// `a ^ b`
  BitXor,
  /// `a | b`
  BitOr,
  /// `a < b`
  Lt,
  /// `a > b`
  Gt,
  /// `a <= b`
  Le,
  /// `a >= b`
  Ge,
  /// `a == b`
  Eq,
  /// `a != b`
  Ne,
  /// `a && b`
  LogAnd,
  /// `a || b`
  LogOr,
}

impl BinaryOp {
  /// True for the six relational/equality operators.
  #[must_use] pub fn is_comparison(self) -> bool {
    matches!(self, BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge |
      BinaryOp::Eq | BinaryOp::Ne)
  }
}

/// The arenas owning all AST nodes of one translation unit.
#[derive(Default)]
pub struct AstArena<'a> {
  /// Expressions.
  pub exprs: Arena<Expr<'a>>,
  /// Statements.
  pub stmts: Arena<Stmt<'a>>,
  /// Declarators.
  pub declarators: Arena<Declarator<'a>>,
  /// Direct declarators.
  pub direct_declarators: Arena<DirectDeclarator<'a>>,
  /// Initializers.
  pub inits: Arena<Initializer<'a>>,
  /// Declarations.
  pub decls: Arena<Decl<'a>>,
  /// Function definitions.
  pub function_defs: Arena<FunctionDef<'a>>,
  /// Type specifiers.
  pub type_specifiers: Arena<TypeSpecifier<'a>>,
  /// Type names.
  pub type_names: Arena<TypeName<'a>>,
}

impl<'a> AstArena<'a> {
  /// Allocate an expression.
  pub fn expr(&'a self, span: Span, k: ExprKind<'a>) -> &'a Expr<'a> {
    self.exprs.alloc(Spanned { span, k })
  }

  /// Allocate a statement.
  pub fn stmt(&'a self, span: Span, k: StmtKind<'a>) -> &'a Stmt<'a> {
    self.stmts.alloc(Spanned { span, k })
  }

  /// Allocate a declarator.
  pub fn declarator(&'a self, d: Declarator<'a>) -> &'a Declarator<'a> {
    self.declarators.alloc(d)
  }

  /// Allocate a direct declarator.
  pub fn direct(&'a self, d: DirectDeclarator<'a>) -> &'a DirectDeclarator<'a> {
    self.direct_declarators.alloc(d)
  }

  /// Allocate a declarator naming `name`, the common leaf case.
  pub fn ident_declarator(&'a self, name: Symbol) -> &'a Declarator<'a> {
    self.declarator(Declarator::Direct(self.direct(DirectDeclarator::Ident(name))))
  }

  /// Allocate an initializer.
  pub fn init(&'a self, i: Initializer<'a>) -> &'a Initializer<'a> {
    self.inits.alloc(i)
  }

  /// Allocate a declaration.
  pub fn decl(&'a self, d: Decl<'a>) -> &'a Decl<'a> { self.decls.alloc(d) }

  /// Allocate a function definition.
  pub fn function_def(&'a self, f: FunctionDef<'a>) -> &'a FunctionDef<'a> {
    self.function_defs.alloc(f)
  }

  /// Allocate a type specifier.
  pub fn type_specifier(&'a self, span: Span, k: TypeSpecifierKind<'a>) -> &'a TypeSpecifier<'a> {
    self.type_specifiers.alloc(Spanned { span, k })
  }

  /// Allocate a type name.
  pub fn type_name(&'a self, t: TypeName<'a>) -> &'a TypeName<'a> {
    self.type_names.alloc(t)
  }
}
