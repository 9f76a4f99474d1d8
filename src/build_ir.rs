//! Build the IR from the parsed AST.
//!
//! [`IrGen`] is the mutable context threaded through the whole pass: the IR
//! builder, the type environment, the scope chain, and the control-flow
//! state (break/continue stacks, the per-switch case tables, the goto label
//! and fixup tables). Expression lowering is the polymorphic entry point
//! [`IrGen::lower`], parameterized by an [`ExprCtx`]; statement lowering
//! drives block construction and owns the deferred block-placement tricks
//! that keep IR block order equal to source order.

use hashbrown::HashMap;
use if_chain::if_chain;
use log::{debug, trace};
use smallvec::SmallVec;

use crate::{ErrorKind, Result, Symbol, intern};
use crate::types::{IntTy, Span};
use crate::types::ast::*;
use crate::types::ir::{
  BlockId, Builder, Cmp, Const, FnSig, GlobalId, GlobalKind, InstId, IrType, Linkage, Op,
  TransUnit, Value,
};
use crate::types::ty::{CTypeKind, FnData, TypeEnv, TypeId};

/// The evaluation context of an expression.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ExprCtx {
  /// The result is the address of the designated object. Legal only for
  /// identifiers, field access, indexing, and dereference.
  LValue,
  /// The result is the value of the expression. Objects of aggregate or
  /// function type still produce their address (implicit address-taking).
  RValue,
  /// The expression must reduce to a constant; nothing is emitted.
  Const,
}

/// A typed IR value: the result of lowering one expression.
#[derive(Clone, Debug)]
pub struct Term {
  /// The C type.
  pub ty: TypeId,
  /// The IR value.
  pub value: Value,
}

impl Term {
  /// The placeholder term for `void`-typed expressions.
  #[must_use] pub fn void() -> Self {
    Term { ty: TypeId::VOID, value: Value::Const(Const::Int { ty: IrType::Void, val: 0 }) }
  }
}

/// One name binding in a scope.
#[derive(Clone, Debug)]
pub(crate) struct Binding {
  pub(crate) name: Symbol,
  pub(crate) ty: TypeId,
  /// For variables, a pointer to storage; for functions, the global
  /// address; for enumerator constants, the value itself.
  pub(crate) value: Value,
  /// True for enumerator constants.
  pub(crate) constant: bool,
}

/// A fully resolved function definition whose body emission was deferred
/// (`inline` with no forcing redeclaration yet). Resolution happens once,
/// at the definition site; re-resolving later would replay the side
/// effects of its specifiers (tag definitions, enum bindings).
struct PendingFn<'a> {
  gid: GlobalId,
  name: Symbol,
  ty: TypeId,
  params: Vec<(Option<Symbol>, TypeId)>,
  body: &'a Stmt<'a>,
  span: Span,
}

/// The per-switch state: the case table collected while lowering the body.
struct SwitchFrame {
  /// The type of the controlling expression, which case values convert to.
  ctrl: IntTy,
  /// `(value bits, target block)` in source order.
  cases: SmallVec<[(u64, BlockId); 8]>,
  /// The `default:` block, once seen.
  default: Option<BlockId>,
}

/// The main context struct for the IR builder pass.
pub struct IrGen<'a> {
  /// The IR under construction.
  pub builder: Builder,
  /// The type environment.
  pub types: TypeEnv,
  scopes: Vec<Vec<Binding>>,
  break_targets: Vec<BlockId>,
  continue_targets: Vec<BlockId>,
  switches: Vec<SwitchFrame>,
  /// Labels of the current function.
  labels: HashMap<Symbol, BlockId>,
  /// Pending branches to labels not yet seen, patched at function end.
  goto_fixups: Vec<(Symbol, InstId, Span)>,
  /// Function definitions seen only with `inline` so far; emission is
  /// forced by a later non-inline redeclaration.
  deferred_inline: HashMap<Symbol, PendingFn<'a>>,
  /// The return type of the current function and whether it returns a
  /// struct through a hidden pointer argument.
  ret: Option<(TypeId, bool)>,
  string_count: u32,
}

impl<'a> IrGen<'a> {
  /// Construct a fresh lowering context.
  #[must_use] pub fn new() -> Self {
    Self {
      builder: Builder::default(),
      types: TypeEnv::new(),
      scopes: vec![],
      break_targets: vec![],
      continue_targets: vec![],
      switches: vec![],
      labels: HashMap::new(),
      goto_fixups: vec![],
      deferred_inline: HashMap::new(),
      ret: None,
      string_count: 0,
    }
  }

  /// Lower a whole translation unit.
  pub fn run(ast: &'a TranslationUnit<'a>) -> Result<TransUnit> {
    let mut this = Self::new();
    this.scopes.push(vec![]);
    for decl in &ast.decls {
      match *decl {
        ExternalDecl::FunctionDef(f) => this.gen_function_def(f)?,
        ExternalDecl::Decl(d) => this.gen_toplevel_decl(d)?,
      }
    }
    for (name, pending) in std::mem::take(&mut this.deferred_inline) {
      debug!("dropping inline-only function `{name}` ({:?})", pending.span);
    }
    this.scopes.pop();
    let unit = this.builder.unit;
    unit.validate().expect("lowering produced ill-formed control flow");
    Ok(unit)
  }

  // == scopes ==============================================================

  pub(crate) fn push_scope(&mut self) { self.scopes.push(vec![]) }
  pub(crate) fn pop_scope(&mut self) { self.scopes.pop().expect("scope underflow"); }

  pub(crate) fn bind(&mut self, b: Binding) {
    self.scopes.last_mut().expect("no scope").push(b);
  }

  pub(crate) fn lookup(&self, name: Symbol) -> Option<&Binding> {
    self.scopes.iter().rev().find_map(|s| s.iter().rev().find(|b| b.name == name))
  }

  // == small helpers =======================================================

  /// The IR mirror of `ty`, failing on incomplete types.
  pub(crate) fn ir_of(&self, ty: TypeId, span: Span) -> Result<IrType> {
    match self.types.kind(ty) {
      CTypeKind::Record(rec) if !rec.complete => Err(ErrorKind::IncompleteType.at(span)),
      CTypeKind::Array(a) if a.len.is_none() => Err(ErrorKind::IncompleteType.at(span)),
      _ => Ok(self.types.to_ir(ty)),
    }
  }

  /// The size of `ty`, failing on incomplete types.
  pub(crate) fn size_of(&self, ty: TypeId, span: Span) -> Result<u64> {
    self.types.size(ty).ok_or_else(|| ErrorKind::IncompleteType.at(span))
  }

  /// Find or create the runtime support function `name`.
  fn runtime_fn(&mut self, name: &str, params: &[IrType], ret: IrType) -> GlobalId {
    let sym = intern(name);
    if let Some(g) = self.builder.unit.global_by_name(sym) { return g }
    self.builder.unit.add_func(sym, Linkage::External,
      FnSig { params: params.into(), ret, variadic: false })
  }

  /// Emit a call to `memcpy(dst, src, size)`.
  pub(crate) fn emit_memcpy(&mut self, dst: Value, src: Value, size: u64) {
    let f = self.runtime_fn("memcpy", &[IrType::Ptr, IrType::Ptr, IrType::I64], IrType::Ptr);
    self.builder.build_call(Value::Global(f), IrType::Ptr,
      [dst, src, Value::int(IrType::I64, size)]);
  }

  /// Emit a call to `memset(dst, 0, size)`.
  pub(crate) fn emit_memset_zero(&mut self, dst: Value, size: u64) {
    let f = self.runtime_fn("memset", &[IrType::Ptr, IrType::I32, IrType::I64], IrType::Ptr);
    self.builder.build_call(Value::Global(f), IrType::Ptr,
      [dst, Value::int(IrType::I32, 0), Value::int(IrType::I64, size)]);
  }

  /// Allocate the internal-linkage global for a string literal and return
  /// its address, typed as array-of-char with the trailing NUL included.
  pub(crate) fn string_literal(&mut self, s: &[u8]) -> Term {
    let name = intern(&format!("__string_literal_{}", self.string_count));
    self.string_count += 1;
    trace!("interning string literal `{name}` ({} bytes)", s.len() + 1);
    let len = s.len() as u64 + 1;
    let ty = self.types.make_array(TypeId::CHAR, Some(len));
    let ir = self.types.to_ir(ty);
    let elems = s.iter().copied().chain([0])
      .map(|b| Const::int(IrType::I8, u64::from(b)))
      .collect();
    let gid = self.builder.unit.add_var(name, Linkage::Internal, ir.clone());
    let GlobalKind::Var { init, .. } = &mut self.builder.unit.globals[gid].kind else {
      unreachable!()
    };
    *init = Some(Const::Array { ty: ir, elems });
    Term { ty, value: Value::Global(gid) }
  }

  // == conversions =========================================================

  /// Re-type an integer constant's bit pattern from `from` to a `to_bits`
  /// wide pattern, sign-extending if the source is signed.
  pub(crate) fn const_retype(val: u64, from: IntTy, to_bits: u32) -> u64 {
    let extended = if from.signed {
      let shift = 64 - from.bits();
      (((val << shift) as i64) >> shift) as u64
    } else {
      val
    };
    if to_bits == 64 { extended } else { extended & ((1 << to_bits) - 1) }
  }

  /// Convert `term` to type `to`, per the C conversion rules. Equal types
  /// and pointer/array/function adjustments are value-identical; integer
  /// narrowing truncates and widening extends per the source signedness.
  pub(crate) fn convert(&mut self, term: &Term, to: TypeId, span: Span) -> Result<Value> {
    let from = term.ty;
    if from == to { return Ok(term.value.clone()) }
    match (self.types.as_int(from), self.types.as_int(to)) {
      (Some(fi), Some(ti)) => {
        if let Value::Const(Const::Int { val, .. }) = term.value {
          let ir = IrType::int(ti.rank);
          return Ok(Value::Const(Const::int(ir, Self::const_retype(val, fi, ti.bits()))))
        }
        let ir = IrType::int(ti.rank);
        Ok(if ti.size() < fi.size() {
          self.builder.build_conv(Op::Trunc, term.value.clone(), ir)
        } else if ti.size() > fi.size() {
          let op = if fi.signed { Op::Sext } else { Op::Zext };
          self.builder.build_conv(op, term.value.clone(), ir)
        } else {
          term.value.clone()
        })
      }
      (Some(fi), None) if self.types.is_pointer(to) => {
        // integer to pointer: zero-extend to pointer width, reinterpret
        if let Value::Const(Const::Int { val, .. }) = term.value {
          return Ok(Value::Const(Const::int(IrType::Ptr, val)))
        }
        let wide = if fi.size() < 8 {
          self.builder.build_conv(Op::Zext, term.value.clone(), IrType::I64)
        } else {
          term.value.clone()
        };
        Ok(self.builder.build_conv(Op::Cast, wide, IrType::Ptr))
      }
      (None, Some(ti)) if self.types.is_pointer(from) => {
        // pointer to integer: reinterpret, possibly narrow
        let wide = self.builder.build_conv(Op::Cast, term.value.clone(), IrType::I64);
        Ok(if ti.size() < 8 {
          self.builder.build_conv(Op::Trunc, wide, IrType::int(ti.rank))
        } else {
          wide
        })
      }
      _ => {
        let ok = match (self.types.kind(from), self.types.kind(to)) {
          (_, CTypeKind::Void) => true,
          (CTypeKind::Pointer(_), CTypeKind::Pointer(_)) => true,
          (CTypeKind::Array(_), CTypeKind::Pointer(_)) => true,
          (CTypeKind::Function(_), CTypeKind::Pointer(_)) => true,
          _ => false,
        };
        if ok { Ok(term.value.clone()) }
        else { Err(ErrorKind::TypeMismatch("no conversion between these types").at(span)) }
      }
    }
  }

  /// The common type of the usual arithmetic conversions for two integer
  /// operands.
  pub(crate) fn common_int_ty(l: IntTy, r: IntTy) -> IntTy {
    if l.signed == r.signed {
      if l.rank >= r.rank { l } else { r }
    } else {
      let (s, u) = if l.signed { (l, r) } else { (r, l) };
      if u.rank >= s.rank { u } else { s }
    }
  }

  /// Apply the usual arithmetic conversions to two integer operands that
  /// may live in different blocks; any widening instruction is emitted in
  /// the block that produced the operand. Returns the common type and the
  /// converted values.
  fn usual_arith(&mut self, l: (Value, IntTy, BlockId), r: (Value, IntTy, BlockId))
    -> (IntTy, Value, Value) {
    let common = Self::common_int_ty(l.1, r.1);
    let conv = |this: &mut Self, (val, ity, block): (Value, IntTy, BlockId)| {
      if ity == common { return val }
      if let Value::Const(Const::Int { val: bits, .. }) = val {
        return Value::Const(Const::int(IrType::int(common.rank),
          Self::const_retype(bits, ity, common.bits())))
      }
      if common.size() > ity.size() {
        let op = if ity.signed { Op::Sext } else { Op::Zext };
        this.builder.build_conv_in(block, op, val, IrType::int(common.rank))
      } else {
        val
      }
    };
    let lv = conv(self, l);
    let rv = conv(self, r);
    (common, lv, rv)
  }

  /// Require an integer operand type.
  fn expect_int(&self, ty: TypeId, span: Span) -> Result<IntTy> {
    self.types.as_int(ty)
      .ok_or_else(|| ErrorKind::TypeMismatch("expected an integer operand").at(span))
  }

  /// Lower a statement/expression condition to an integer value; pointers
  /// are converted to the pointer-sized integer type first.
  fn lower_condition(&mut self, e: &'a Expr<'a>) -> Result<Value> {
    let t = self.lower_rvalue(e)?;
    let ty = self.types.decay(t.ty);
    let t = Term { ty, value: t.value };
    if self.types.is_integer(ty) { return Ok(t.value) }
    if self.types.is_pointer(ty) { return self.convert(&t, TypeId::PTR_INT, e.span) }
    Err(ErrorKind::TypeMismatch("condition must be scalar").at(e.span))
  }

  // == expressions =========================================================

  /// Lower an expression in r-value context.
  pub(crate) fn lower_rvalue(&mut self, e: &'a Expr<'a>) -> Result<Term> {
    self.lower(e, ExprCtx::RValue)
  }

  /// Lower an expression. This is the main polymorphic lowering function.
  pub fn lower(&mut self, e: &'a Expr<'a>, ctx: ExprCtx) -> Result<Term> {
    if ctx == ExprCtx::Const { return self.eval_const(e) }
    if ctx == ExprCtx::LValue
      && !matches!(e.k, ExprKind::Ident(_) | ExprKind::Member { .. } | ExprKind::Index(..)
        | ExprKind::Unary(UnaryOp::Deref, _)) {
      return Err(ErrorKind::TypeMismatch("expression is not an l-value").at(e.span))
    }
    match &e.k {
      &ExprKind::Ident(name) => {
        let Some(b) = self.lookup(name).cloned() else {
          return Err(ErrorKind::UnknownIdent(name).at(e.span))
        };
        if b.constant { return Ok(Term { ty: b.ty, value: b.value }) }
        let keep_addr = ctx == ExprCtx::LValue
          || self.types.is_aggregate(b.ty)
          || matches!(self.types.kind(b.ty), CTypeKind::Function(_));
        let value = if keep_addr { b.value } else {
          let ir = self.ir_of(b.ty, e.span)?;
          self.builder.build_load(b.value, ir)
        };
        Ok(Term { ty: b.ty, value })
      }
      ExprKind::Int(lit) => {
        let (ity, val) = crate::const_eval::int_lit_value(lit)
          .map_err(|k| k.at(e.span))?;
        Ok(Term {
          ty: TypeEnv::int_id(ity),
          value: Value::Const(Const::int(IrType::int(ity.rank), val)),
        })
      }
      ExprKind::Str(s) => Ok(self.string_literal(s)),
      &ExprKind::Unary(op, arg) => self.gen_unary(op, arg, ctx, e.span),
      &ExprKind::Binary(op, lhs, rhs) => match op {
        BinaryOp::LogAnd | BinaryOp::LogOr => self.gen_logical(op == BinaryOp::LogAnd, lhs, rhs),
        _ if op.is_comparison() => {
          let l = self.lower_rvalue(lhs)?;
          let r = self.lower_rvalue(rhs)?;
          self.gen_cmp(op, l, r, e.span)
        }
        _ => {
          let l = self.lower_rvalue(lhs)?;
          let r = self.lower_rvalue(rhs)?;
          self.gen_arith(op, l, r, e.span)
        }
      },
      &ExprKind::Assign { op, lhs, rhs } => {
        let lv = self.lower(lhs, ExprCtx::LValue)?;
        match op {
          None => {
            let rv = self.lower_rvalue(rhs)?;
            self.gen_store(&lv, rv, e.span)
          }
          Some(op) => {
            let rv = self.lower_rvalue(rhs)?;
            let (result, _) = self.gen_compound_assign(op, &lv, rv, e.span)?;
            Ok(result)
          }
        }
      }
      &ExprKind::Index(a, b) => {
        let l = self.lower_rvalue(a)?;
        let r = self.lower_rvalue(b)?;
        let sum = self.gen_arith(BinaryOp::Add, l, r, e.span)?;
        self.gen_deref(sum, ctx, e.span)
      }
      &ExprKind::Call { callee, ref args } => self.gen_call(callee, args, e.span),
      &ExprKind::Member { arrow, base, field } => self.gen_member(arrow, base, field, ctx, e.span),
      &ExprKind::Conditional { cond, then, els } => self.gen_conditional(cond, then, els, e.span),
      &ExprKind::Comma(a, b) => {
        self.lower_rvalue(a)?;
        self.lower_rvalue(b)
      }
      &ExprKind::Cast(tn, arg) => {
        let to = self.resolve_type_name(tn)?;
        let t = self.lower_rvalue(arg)?;
        let value = self.convert(&t, to, e.span)?;
        Ok(Term { ty: to, value })
      }
      &ExprKind::SizeofExpr(arg) => {
        let ty = self.type_of_expr(arg)?;
        let size = self.size_of(ty, e.span)?;
        Ok(Term { ty: TypeId::SIZE, value: Value::int(IrType::I64, size) })
      }
      &ExprKind::SizeofType(tn) => {
        let ty = self.resolve_type_name(tn)?;
        let size = self.size_of(ty, e.span)?;
        Ok(Term { ty: TypeId::SIZE, value: Value::int(IrType::I64, size) })
      }
      &ExprKind::CompoundLiteral(tn, init) => {
        let ty = self.resolve_type_name(tn)?;
        let tree = self.compile_initializer(ty, init, false)?;
        let ir = self.ir_of(ty, e.span)?;
        let local = self.builder.build_local(ir);
        self.emit_local_init(local.clone(), ty, &tree, e.span)?;
        if self.types.is_aggregate(ty) || ctx == ExprCtx::LValue {
          Ok(Term { ty, value: local })
        } else {
          let ir = self.ir_of(ty, e.span)?;
          Ok(Term { ty, value: self.builder.build_load(local, ir) })
        }
      }
      &ExprKind::VaArg(ap, tn) => {
        let ty = self.resolve_type_name(tn)?;
        let ap = self.lower_rvalue(ap)?;
        let f = self.runtime_fn("__builtin_va_arg_uint64", &[IrType::Ptr], IrType::I64);
        let raw = self.builder.build_call(Value::Global(f), IrType::I64, [ap.value]);
        let value = self.convert(&Term { ty: TypeId::ULONGLONG, value: raw }, ty, e.span)?;
        Ok(Term { ty, value })
      }
    }
  }

  /// The type an expression would have, computed by lowering it into a
  /// scratch function that is discarded (`sizeof expr`). The builder state
  /// of the enclosing function is asserted unchanged.
  pub(crate) fn type_of_expr(&mut self, e: &'a Expr<'a>) -> Result<TypeId> {
    let before = self.builder.in_function().then(|| self.builder.fingerprint());
    self.builder.enter_scratch();
    let ty = self.lower_rvalue(e).map(|t| t.ty);
    self.builder.discard_scratch();
    if let Some(before) = before {
      assert!(self.builder.fingerprint() == before, "sizeof lowering leaked instructions");
    }
    ty
  }

  fn gen_unary(&mut self, op: UnaryOp, arg: &'a Expr<'a>, ctx: ExprCtx, span: Span)
    -> Result<Term> {
    match op {
      UnaryOp::Plus => {
        let t = self.lower_rvalue(arg)?;
        self.expect_int(t.ty, span)?;
        Ok(t)
      }
      UnaryOp::Minus | UnaryOp::BitNot => {
        let t = self.lower_rvalue(arg)?;
        let ity = self.expect_int(t.ty, span)?;
        // integer promotion: sub-int operands widen to int first
        let pty = if ity.rank < crate::types::IntRank::Int { TypeId::INT } else { t.ty };
        let value = self.convert(&t, pty, span)?;
        let ir = self.types.to_ir(pty);
        let irop = if op == UnaryOp::Minus { Op::Neg } else { Op::BitNot };
        Ok(Term { ty: pty, value: self.builder.build_unary(irop, ir, value) })
      }
      UnaryOp::LogNot => {
        let value = self.lower_condition(arg)?;
        let ty = self.builder.value_ty(&value);
        let zero = Value::int(ty, 0);
        Ok(Term { ty: TypeId::INT, value: self.builder.build_cmp(Cmp::Eq, value, zero) })
      }
      UnaryOp::AddrOf => {
        let t = self.lower(arg, ExprCtx::LValue)?;
        Ok(Term { ty: self.types.make_pointer(t.ty), value: t.value })
      }
      UnaryOp::Deref => {
        let t = self.lower_rvalue(arg)?;
        self.gen_deref(t, ctx, span)
      }
      UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
        let lv = self.lower(arg, ExprCtx::LValue)?;
        let one = Term { ty: TypeId::INT, value: Value::int(IrType::I32, 1) };
        let bop = if matches!(op, UnaryOp::PreInc | UnaryOp::PostInc) { BinaryOp::Add }
          else { BinaryOp::Sub };
        let (result, pre) = self.gen_compound_assign(bop, &lv, one, span)?;
        Ok(if matches!(op, UnaryOp::PreInc | UnaryOp::PreDec) { result } else { pre })
      }
    }
  }

  /// Dereference `ptr` per the expression context: in l-value context, or
  /// when the pointee is an aggregate or function, the address is the
  /// result; otherwise the pointee is loaded.
  fn gen_deref(&mut self, ptr: Term, ctx: ExprCtx, span: Span) -> Result<Term> {
    let ty = self.types.decay(ptr.ty);
    let Some(pointee) = self.types.pointee(ty) else {
      return Err(ErrorKind::TypeMismatch("dereference of a non-pointer").at(span))
    };
    let keep_addr = ctx == ExprCtx::LValue
      || self.types.is_aggregate(pointee)
      || matches!(self.types.kind(pointee), CTypeKind::Function(_));
    let value = if keep_addr { ptr.value } else {
      let ir = self.ir_of(pointee, span)?;
      self.builder.build_load(ptr.value, ir)
    };
    Ok(Term { ty: pointee, value })
  }

  fn gen_member(&mut self, arrow: bool, base: &'a Expr<'a>, field: Symbol, ctx: ExprCtx,
    span: Span) -> Result<Term> {
    let base = self.lower_rvalue(base)?;
    let rec_ty = if arrow {
      let ty = self.types.decay(base.ty);
      self.types.pointee(ty)
        .ok_or_else(|| ErrorKind::TypeMismatch("`->` on a non-pointer").at(span))?
    } else {
      base.ty
    };
    let Some((index, f)) = self.types.record_field(rec_ty, field) else {
      return Err(ErrorKind::TypeMismatch("no such field").at(span))
    };
    let rec_ir = self.ir_of(rec_ty, span)?;
    let addr = self.builder.build_field(base.value, rec_ir, index);
    let keep_addr = ctx == ExprCtx::LValue || self.types.is_aggregate(f.ty);
    let value = if keep_addr { addr } else {
      let ir = self.ir_of(f.ty, span)?;
      self.builder.build_load(addr, ir)
    };
    Ok(Term { ty: f.ty, value })
  }

  /// Pointer arithmetic: scale the integer operand by the pointee size and
  /// combine through pointer-width integer arithmetic.
  fn gen_ptr_offset(&mut self, sub: bool, ptr: Term, index: Term, span: Span) -> Result<Term> {
    let pointee = self.types.pointee(ptr.ty).expect("caller checked");
    let elem_size = self.size_of(pointee, span)?;
    let ity = self.expect_int(index.ty, span)?;
    let wide = if ity.size() < 8 {
      let op = if ity.signed { Op::Sext } else { Op::Zext };
      self.builder.build_conv(op, index.value, IrType::I64)
    } else {
      index.value
    };
    let scaled = self.builder.build_binary(Op::Mul, IrType::I64, wide,
      Value::int(IrType::I64, elem_size));
    let base = self.builder.build_conv(Op::Cast, ptr.value, IrType::I64);
    let op = if sub { Op::Sub } else { Op::Add };
    let sum = self.builder.build_binary(op, IrType::I64, base, scaled);
    let value = self.builder.build_conv(Op::Cast, sum, IrType::Ptr);
    Ok(Term { ty: ptr.ty, value })
  }

  fn gen_arith(&mut self, op: BinaryOp, l: Term, r: Term, span: Span) -> Result<Term> {
    let l = Term { ty: self.types.decay(l.ty), value: l.value };
    let r = Term { ty: self.types.decay(r.ty), value: r.value };
    let lp = self.types.is_pointer(l.ty);
    let rp = self.types.is_pointer(r.ty);
    match op {
      BinaryOp::Add if lp || rp => {
        if lp && rp {
          return Err(ErrorKind::TypeMismatch("cannot add two pointers").at(span))
        }
        let (ptr, idx) = if lp { (l, r) } else { (r, l) };
        self.gen_ptr_offset(false, ptr, idx, span)
      }
      BinaryOp::Sub if lp && rp => {
        // p - q: subtract as integers, divide by the pointee size
        let pointee = self.types.pointee(l.ty).expect("checked");
        let elem_size = self.size_of(pointee, span)?;
        let li = self.builder.build_conv(Op::Cast, l.value, IrType::I64);
        let ri = self.builder.build_conv(Op::Cast, r.value, IrType::I64);
        let diff = self.builder.build_binary(Op::Sub, IrType::I64, li, ri);
        let value = self.builder.build_binary(Op::Div, IrType::I64, diff,
          Value::int(IrType::I64, elem_size));
        Ok(Term { ty: TypeId::PTR_INT, value })
      }
      BinaryOp::Sub if lp => self.gen_ptr_offset(true, l, r, span),
      _ => {
        let li = self.expect_int(l.ty, span)?;
        let ri = self.expect_int(r.ty, span)?;
        let block = self.builder.cur_block();
        let (common, lv, rv) =
          self.usual_arith((l.value, li, block), (r.value, ri, block));
        let irop = match op {
          BinaryOp::Add => Op::Add,
          BinaryOp::Sub => Op::Sub,
          BinaryOp::Mul => Op::Mul,
          BinaryOp::Div => Op::Div,
          BinaryOp::Mod => Op::Mod,
          BinaryOp::Shl => Op::Shl,
          // arithmetic shift for signed operands
          BinaryOp::Shr => if common.signed { Op::Sar } else { Op::Shr },
          BinaryOp::BitAnd => Op::BitAnd,
          BinaryOp::BitOr => Op::BitOr,
          BinaryOp::BitXor => Op::BitXor,
          _ => unreachable!("not an arithmetic operator"),
        };
        let ir = IrType::int(common.rank);
        Ok(Term {
          ty: TypeEnv::int_id(common),
          value: self.builder.build_binary(irop, ir, lv, rv),
        })
      }
    }
  }

  fn gen_cmp(&mut self, op: BinaryOp, l: Term, r: Term, span: Span) -> Result<Term> {
    let mut l = Term { ty: self.types.decay(l.ty), value: l.value };
    let mut r = Term { ty: self.types.decay(r.ty), value: r.value };
    for t in [&mut l, &mut r] {
      if matches!(self.types.kind(t.ty), CTypeKind::Function(_)) {
        t.ty = self.types.make_pointer(t.ty);
      }
    }
    let lp = self.types.is_pointer(l.ty);
    let rp = self.types.is_pointer(r.ty);
    let eq_kind = matches!(op, BinaryOp::Eq | BinaryOp::Ne);
    if lp && rp {
      // two distinct global addresses have a known answer for == and !=
      if_chain! {
        if eq_kind;
        if let Value::Global(ga) = l.value;
        if let Value::Global(gb) = r.value;
        then {
          let same = ga == gb;
          let hit = if op == BinaryOp::Eq { same } else { !same };
          return Ok(Term { ty: TypeId::INT, value: Value::int(IrType::I32, hit.into()) })
        }
      }
      let cmp = Self::cmp_kind(op, false);
      return Ok(Term { ty: TypeId::INT, value: self.builder.build_cmp(cmp, l.value, r.value) })
    }
    if lp || rp {
      // pointer against integer: only a literal zero (null constant)
      let (_, int) = if lp { (&l, &mut r) } else { (&r, &mut l) };
      if !int.value.is_const_zero() {
        return Err(ErrorKind::TypeMismatch("comparison of pointer and integer").at(span))
      }
      int.value = Value::Const(Const::int(IrType::Ptr, 0));
      let cmp = Self::cmp_kind(op, false);
      return Ok(Term { ty: TypeId::INT, value: self.builder.build_cmp(cmp, l.value, r.value) })
    }
    let li = self.expect_int(l.ty, span)?;
    let ri = self.expect_int(r.ty, span)?;
    let block = self.builder.cur_block();
    let (common, lv, rv) = self.usual_arith((l.value, li, block), (r.value, ri, block));
    let cmp = Self::cmp_kind(op, common.signed);
    Ok(Term { ty: TypeId::INT, value: self.builder.build_cmp(cmp, lv, rv) })
  }

  fn cmp_kind(op: BinaryOp, signed: bool) -> Cmp {
    match (op, signed) {
      (BinaryOp::Eq, _) => Cmp::Eq,
      (BinaryOp::Ne, _) => Cmp::Ne,
      (BinaryOp::Lt, true) => Cmp::Slt,
      (BinaryOp::Le, true) => Cmp::Sle,
      (BinaryOp::Gt, true) => Cmp::Sgt,
      (BinaryOp::Ge, true) => Cmp::Sge,
      (BinaryOp::Lt, false) => Cmp::Ult,
      (BinaryOp::Le, false) => Cmp::Ule,
      (BinaryOp::Gt, false) => Cmp::Ugt,
      (BinaryOp::Ge, false) => Cmp::Uge,
      _ => unreachable!("not a comparison"),
    }
  }

  /// Short-circuit `&&`/`||`: branch on the left operand, normalize the
  /// right operand to 0/1 in its own block, join through a phi.
  fn gen_logical(&mut self, is_and: bool, lhs: &'a Expr<'a>, rhs: &'a Expr<'a>)
    -> Result<Term> {
    let lv = self.lower_condition(lhs)?;
    let entry = self.builder.cur_block();
    let (rhs_name, after_name) = if is_and { ("and.rhs", "and.after") }
      else { ("or.rhs", "or.after") };
    let rhs_block = self.builder.new_block(rhs_name);
    let merge = self.builder.reserve_block(after_name);
    if is_and {
      self.builder.build_cond(lv, rhs_block, merge);
    } else {
      self.builder.build_cond(lv, merge, rhs_block);
    }
    self.builder.set_block(rhs_block);
    let rv = self.lower_condition(rhs)?;
    let rty = self.builder.value_ty(&rv);
    let norm = self.builder.build_cmp(Cmp::Ne, rv, Value::int(rty, 0));
    let rhs_end = self.builder.cur_block();
    self.builder.build_branch(merge);
    self.builder.place_block(merge);
    self.builder.set_block(merge);
    let skip = Value::int(IrType::I32, if is_and { 0 } else { 1 });
    let value = self.builder.build_phi(IrType::I32, [(entry, skip), (rhs_end, norm)]);
    Ok(Term { ty: TypeId::INT, value })
  }

  /// `cond ? then : els`: lower each arm in its own block, unify the
  /// result types (usual arithmetic conversions, or the void-pointer
  /// adjustment), join with a phi.
  fn gen_conditional(&mut self, cond: &'a Expr<'a>, then: &'a Expr<'a>, els: &'a Expr<'a>,
    span: Span) -> Result<Term> {
    let cv = self.lower_condition(cond)?;
    let entry = self.builder.cur_block();
    let then_block = self.builder.new_block("cond.then");
    let else_block = self.builder.reserve_block("cond.else");
    let after = self.builder.reserve_block("cond.after");
    self.builder.emit_in(entry, Op::Cond, IrType::Void, [cv], [then_block, else_block]);

    self.builder.set_block(then_block);
    let t1 = self.lower_rvalue(then)?;
    let t1 = Term { ty: self.types.decay(t1.ty), value: t1.value };
    let then_end = self.builder.cur_block();

    self.builder.place_block(else_block);
    self.builder.set_block(else_block);
    let t2 = self.lower_rvalue(els)?;
    let t2 = Term { ty: self.types.decay(t2.ty), value: t2.value };
    let else_end = self.builder.cur_block();

    // unify the arm types, emitting conversions in the arms' end blocks
    let (ty, v1, v2) = match (self.types.as_int(t1.ty), self.types.as_int(t2.ty)) {
      (Some(li), Some(ri)) => {
        let (common, v1, v2) =
          self.usual_arith((t1.value, li, then_end), (t2.value, ri, else_end));
        (TypeEnv::int_id(common), v1, v2)
      }
      _ => {
        let unified = self.unify_pointerish(&t1, &t2, span)?;
        (unified, t1.value, t2.value)
      }
    };

    self.builder.emit_in(then_end, Op::Branch, IrType::Void, [], [after]);
    self.builder.emit_in(else_end, Op::Branch, IrType::Void, [], [after]);
    self.builder.place_block(after);
    self.builder.set_block(after);
    if ty == TypeId::VOID { return Ok(Term::void()) }
    let ir = self.ir_of(ty, span)?;
    let value = self.builder.build_phi(ir, [(then_end, v1), (else_end, v2)]);
    Ok(Term { ty, value })
  }

  /// Unify two non-integer conditional arms: equal types, void with void,
  /// `void *` with any pointer, or a pointer with a literal zero.
  fn unify_pointerish(&mut self, t1: &Term, t2: &Term, span: Span) -> Result<TypeId> {
    if t1.ty == t2.ty { return Ok(t1.ty) }
    let p1 = self.types.pointee(t1.ty);
    let p2 = self.types.pointee(t2.ty);
    match (p1, p2) {
      (Some(a), Some(b)) => {
        if a == TypeId::VOID { return Ok(t2.ty) }
        if b == TypeId::VOID { return Ok(t1.ty) }
        Err(ErrorKind::TypeMismatch("incompatible pointer types in conditional").at(span))
      }
      (Some(_), None) if t2.value.is_const_zero() => Ok(t1.ty),
      (None, Some(_)) if t1.value.is_const_zero() => Ok(t2.ty),
      _ => Err(ErrorKind::TypeMismatch("incompatible operand types in conditional").at(span)),
    }
  }

  /// Plain assignment into an l-value: aggregate assignment is a `memcpy`
  /// of the declared size, scalar assignment converts and stores.
  fn gen_store(&mut self, lv: &Term, rv: Term, span: Span) -> Result<Term> {
    if self.types.is_aggregate(lv.ty) {
      if rv.ty != lv.ty {
        return Err(ErrorKind::TypeMismatch("assignment between incompatible aggregates").at(span))
      }
      let size = self.size_of(lv.ty, span)?;
      self.emit_memcpy(lv.value.clone(), rv.value.clone(), size);
      return Ok(Term { ty: lv.ty, value: lv.value.clone() })
    }
    let value = self.convert(&rv, lv.ty, span)?;
    self.builder.build_store(lv.value.clone(), value.clone());
    Ok(Term { ty: lv.ty, value })
  }

  /// Compound assignment: load the l-value, apply the operator, store the
  /// result. Returns `(result, pre-load value)`; the pre-load value feeds
  /// post-increment/decrement.
  fn gen_compound_assign(&mut self, op: BinaryOp, lv: &Term, rhs: Term, span: Span)
    -> Result<(Term, Term)> {
    let ir = self.ir_of(lv.ty, span)?;
    let loaded = self.builder.build_load(lv.value.clone(), ir);
    let pre = Term { ty: lv.ty, value: loaded };
    let result = self.gen_arith(op, pre.clone(), rhs, span)?;
    let value = self.convert(&result, lv.ty, span)?;
    self.builder.build_store(lv.value.clone(), value.clone());
    Ok((Term { ty: lv.ty, value }, pre))
  }

  fn gen_call(&mut self, callee: &'a Expr<'a>, args: &[&'a Expr<'a>], span: Span)
    -> Result<Term> {
    // the variadic intrinsics are recognized by name
    if let ExprKind::Ident(name) = callee.k {
      match name.as_str() {
        "__builtin_va_start" => {
          let ap = args.first().copied()
            .ok_or_else(|| ErrorKind::TypeMismatch("va_start needs an argument").at(span))?;
          let ap = self.lower_rvalue(ap)?;
          self.builder.build_va_start(ap.value);
          return Ok(Term::void())
        }
        "__builtin_va_end" => return Ok(Term::void()),
        _ => {}
      }
    }

    let ct = self.lower_rvalue(callee)?;
    let f: std::rc::Rc<FnData> = match self.types.kind(ct.ty) {
      CTypeKind::Function(f) => f.clone(),
      CTypeKind::Pointer(p) => self.types.as_function(*p)
        .ok_or_else(|| ErrorKind::TypeMismatch("call of a non-function").at(span))?,
      _ => return Err(ErrorKind::TypeMismatch("call of a non-function").at(span)),
    };
    // the callee value: a function designator is already an address; a
    // function pointer object was loaded by rvalue lowering
    let callee_val = ct.value;

    let mut lowered = Vec::with_capacity(args.len() + 1);
    for (i, &arg) in args.iter().enumerate() {
      let t = self.lower_rvalue(arg)?;
      let t = Term { ty: self.types.decay(t.ty), value: t.value };
      let v = if let Some(&pty) = f.params.get(i) {
        self.convert(&t, pty, arg.span)?
      } else if let Some(ity) = self.types.as_int(t.ty) {
        // default argument promotions for the variadic tail
        if ity.rank < crate::types::IntRank::Int {
          self.convert(&t, TypeId::INT, arg.span)?
        } else {
          t.value
        }
      } else {
        t.value
      };
      lowered.push(v);
    }

    if matches!(self.types.kind(f.ret), CTypeKind::Record(_)) {
      // struct return: allocate a caller local, pass its address as the
      // hidden zeroth argument, and designate it as the result
      let ret_ir = self.ir_of(f.ret, span)?;
      let buf = self.builder.build_local(ret_ir);
      let args = std::iter::once(buf.clone()).chain(lowered);
      self.builder.build_call(callee_val, IrType::Void, args);
      return Ok(Term { ty: f.ret, value: buf })
    }
    let ret_ir = self.ir_of(f.ret, span)?;
    let value = self.builder.build_call(callee_val, ret_ir, lowered);
    Ok(Term { ty: f.ret, value })
  }

  // == statements ==========================================================

  pub(crate) fn gen_stmt(&mut self, stmt: &'a Stmt<'a>) -> Result<()> {
    match &stmt.k {
      StmtKind::Compound(items) => {
        self.push_scope();
        for item in items {
          match *item {
            BlockItem::Decl(d) => self.gen_local_decl(d)?,
            BlockItem::Stmt(s) => self.gen_stmt(s)?,
          }
        }
        self.pop_scope();
        Ok(())
      }
      StmtKind::Expr(None) => Ok(()),
      StmtKind::Expr(Some(e)) => {
        self.lower_rvalue(e)?;
        Ok(())
      }
      StmtKind::Return(e) => self.gen_return(*e, stmt.span),
      StmtKind::If { cond, then, els } => self.gen_if(cond, then, *els),
      StmtKind::While { cond, body } => self.gen_while(cond, body),
      StmtKind::DoWhile { body, cond } => self.gen_do_while(body, cond),
      StmtKind::For { init, cond, update, body } => self.gen_for(init, *cond, *update, body),
      StmtKind::Switch { ctrl, body } => self.gen_switch(ctrl, body, stmt.span),
      StmtKind::Case(value, inner) => self.gen_case(value, inner, stmt.span),
      StmtKind::Default(inner) => self.gen_default(inner, stmt.span),
      &StmtKind::Labeled(name, inner) => {
        let block = self.builder.new_block(name.as_str());
        if !self.builder.cur_terminated() { self.builder.build_branch(block) }
        self.builder.set_block(block);
        if self.labels.insert(name, block).is_some() {
          return Err(ErrorKind::MalformedControlFlow("duplicate label").at(stmt.span))
        }
        self.gen_stmt(inner)
      }
      &StmtKind::Goto(name) => {
        match self.labels.get(&name) {
          Some(&block) => self.builder.build_branch(block),
          None => {
            let inst = self.builder.build_branch_pending();
            self.goto_fixups.push((name, inst, stmt.span));
          }
        }
        let dead = self.builder.new_block("dead");
        self.builder.set_block(dead);
        Ok(())
      }
      StmtKind::Break => {
        let Some(&target) = self.break_targets.last() else {
          return Err(ErrorKind::MalformedControlFlow("`break` outside a loop or switch")
            .at(stmt.span))
        };
        self.builder.build_branch(target);
        let dead = self.builder.new_block("dead");
        self.builder.set_block(dead);
        Ok(())
      }
      StmtKind::Continue => {
        let Some(&target) = self.continue_targets.last() else {
          return Err(ErrorKind::MalformedControlFlow("`continue` outside a loop").at(stmt.span))
        };
        self.builder.build_branch(target);
        let dead = self.builder.new_block("dead");
        self.builder.set_block(dead);
        Ok(())
      }
    }
  }

  fn gen_return(&mut self, e: Option<&'a Expr<'a>>, span: Span) -> Result<()> {
    let (ret_ty, sret) = self.ret.expect("return outside a function");
    match e {
      None => self.builder.build_ret_void(),
      Some(e) => {
        let t = self.lower_rvalue(e)?;
        if sret {
          if t.ty != ret_ty {
            return Err(ErrorKind::TypeMismatch("returning the wrong struct type").at(span))
          }
          let size = self.size_of(ret_ty, span)?;
          self.emit_memcpy(Value::Arg(0), t.value, size);
          self.builder.build_ret_void();
        } else if ret_ty == TypeId::VOID {
          self.builder.build_ret_void();
        } else {
          let v = self.convert(&t, ret_ty, span)?;
          self.builder.build_ret(v);
        }
      }
    }
    let dead = self.builder.new_block("dead");
    self.builder.set_block(dead);
    Ok(())
  }

  fn gen_if(&mut self, cond: &'a Expr<'a>, then: &'a Stmt<'a>, els: Option<&'a Stmt<'a>>)
    -> Result<()> {
    let cv = self.lower_condition(cond)?;
    let entry = self.builder.cur_block();
    let then_block = self.builder.new_block("if.then");
    let after = self.builder.reserve_block("if.after");

    self.builder.set_block(then_block);
    self.gen_stmt(then)?;
    if !self.builder.cur_terminated() { self.builder.build_branch(after) }

    let else_target = match els {
      None => after,
      Some(els) => {
        let else_block = self.builder.new_block("if.else");
        self.builder.set_block(else_block);
        self.gen_stmt(els)?;
        if !self.builder.cur_terminated() { self.builder.build_branch(after) }
        else_block
      }
    };

    self.builder.emit_in(entry, Op::Cond, IrType::Void, [cv], [then_block, else_target]);
    self.builder.place_block(after);
    self.builder.set_block(after);
    Ok(())
  }

  fn gen_while(&mut self, cond: &'a Expr<'a>, body: &'a Stmt<'a>) -> Result<()> {
    let pre_header = self.builder.new_block("while.ph");
    let after = self.builder.reserve_block("while.after");
    self.builder.build_branch(pre_header);
    self.builder.set_block(pre_header);
    let cv = self.lower_condition(cond)?;
    let cond_end = self.builder.cur_block();
    let body_block = self.builder.new_block("while.body");
    self.builder.emit_in(cond_end, Op::Cond, IrType::Void, [cv], [body_block, after]);

    self.builder.set_block(body_block);
    self.break_targets.push(after);
    self.continue_targets.push(pre_header);
    self.gen_stmt(body)?;
    self.break_targets.pop();
    self.continue_targets.pop();
    if !self.builder.cur_terminated() { self.builder.build_branch(pre_header) }

    self.builder.place_block(after);
    self.builder.set_block(after);
    Ok(())
  }

  fn gen_do_while(&mut self, body: &'a Stmt<'a>, cond: &'a Expr<'a>) -> Result<()> {
    let body_block = self.builder.new_block("do.body");
    let cond_block = self.builder.reserve_block("do.cond");
    let after = self.builder.reserve_block("do.after");
    self.builder.build_branch(body_block);

    self.builder.set_block(body_block);
    self.break_targets.push(after);
    self.continue_targets.push(cond_block);
    self.gen_stmt(body)?;
    self.break_targets.pop();
    self.continue_targets.pop();
    if !self.builder.cur_terminated() { self.builder.build_branch(cond_block) }

    self.builder.place_block(cond_block);
    self.builder.set_block(cond_block);
    let cv = self.lower_condition(cond)?;
    self.builder.build_cond(cv, body_block, after);
    self.builder.place_block(after);
    self.builder.set_block(after);
    Ok(())
  }

  fn gen_for(&mut self, init: &ForInit<'a>, cond: Option<&'a Expr<'a>>,
    update: Option<&'a Expr<'a>>, body: &'a Stmt<'a>) -> Result<()> {
    let scoped = matches!(init, ForInit::Decl(_));
    match *init {
      ForInit::Decl(d) => {
        self.push_scope();
        self.gen_local_decl(d)?;
      }
      ForInit::Expr(Some(e)) => { self.lower_rvalue(e)?; }
      ForInit::Expr(None) => {}
    }

    let pre_header = self.builder.new_block("for.ph");
    let body_block = self.builder.reserve_block("for.body");
    let update_block = self.builder.reserve_block("for.update");
    let after = self.builder.reserve_block("for.after");
    self.builder.build_branch(pre_header);
    self.builder.set_block(pre_header);
    match cond {
      // a missing condition is constant true
      None => self.builder.build_branch(body_block),
      Some(cond) => {
        let cv = self.lower_condition(cond)?;
        self.builder.build_cond(cv, body_block, after);
      }
    }

    self.builder.place_block(body_block);
    self.builder.set_block(body_block);
    self.break_targets.push(after);
    self.continue_targets.push(update_block);
    self.gen_stmt(body)?;
    self.break_targets.pop();
    self.continue_targets.pop();
    if !self.builder.cur_terminated() { self.builder.build_branch(update_block) }

    self.builder.place_block(update_block);
    self.builder.set_block(update_block);
    if let Some(e) = update { self.lower_rvalue(e)?; }
    self.builder.build_branch(pre_header);

    self.builder.place_block(after);
    self.builder.set_block(after);
    if scoped { self.pop_scope() }
    Ok(())
  }

  /// Two-pass switch: the body is lowered first (collecting the case
  /// table), then the compare-and-branch dispatch ladder is built and
  /// inserted into the layout between the switch entry and the body.
  fn gen_switch(&mut self, ctrl: &'a Expr<'a>, body: &'a Stmt<'a>, span: Span) -> Result<()> {
    let t = self.lower_rvalue(ctrl)?;
    let ctrl_ity = self.expect_int(t.ty, span)?;
    let pending = self.builder.build_branch_pending();
    let ladder_pos = self.builder.layout_pos();

    let body_entry = self.builder.new_block("switch.body");
    let after = self.builder.reserve_block("switch.after");
    self.break_targets.push(after);
    self.switches.push(SwitchFrame { ctrl: ctrl_ity, cases: SmallVec::new(), default: None });

    self.builder.set_block(body_entry);
    self.gen_stmt(body)?;
    if !self.builder.cur_terminated() { self.builder.build_branch(after) }

    let frame = self.switches.pop().expect("switch stack underflow");
    self.break_targets.pop();
    trace!("switch dispatch over {} cases, default {}", frame.cases.len(),
      frame.default.is_some());
    let fallback = frame.default.unwrap_or(after);

    // dispatch ladder, in source order of the case labels
    let cmp_blocks: Vec<BlockId> =
      frame.cases.iter().map(|_| self.builder.reserve_block("switch.cmp")).collect();
    for (i, &b) in cmp_blocks.iter().enumerate() {
      self.builder.place_block_at(ladder_pos + i, b);
    }
    let ctrl_ir = IrType::int(ctrl_ity.rank);
    for (i, &(val, target)) in frame.cases.iter().enumerate() {
      self.builder.set_block(cmp_blocks[i]);
      let hit = self.builder.build_cmp(Cmp::Eq, t.value.clone(),
        Value::int(ctrl_ir.clone(), val));
      let next = cmp_blocks.get(i + 1).copied().unwrap_or(fallback);
      self.builder.build_cond(hit, target, next);
    }
    self.builder.patch_branch(pending, cmp_blocks.first().copied().unwrap_or(fallback));

    self.builder.place_block(after);
    self.builder.set_block(after);
    Ok(())
  }

  fn gen_case(&mut self, value: &'a Expr<'a>, inner: &'a Stmt<'a>, span: Span) -> Result<()> {
    if self.switches.is_empty() {
      return Err(ErrorKind::MalformedControlFlow("`case` outside a switch").at(span))
    }
    let (_, big) = self.eval_const_int(value)?;
    let ctrl = self.switches.last().expect("checked").ctrl;
    let bits = crate::const_eval::bigint_bits(&big, ctrl);
    let block = self.builder.new_block("switch.case");
    if !self.builder.cur_terminated() { self.builder.build_branch(block) }
    self.builder.set_block(block);
    self.switches.last_mut().expect("checked").cases.push((bits, block));
    self.gen_stmt(inner)
  }

  fn gen_default(&mut self, inner: &'a Stmt<'a>, span: Span) -> Result<()> {
    let block = self.builder.new_block("switch.default");
    if !self.builder.cur_terminated() { self.builder.build_branch(block) }
    self.builder.set_block(block);
    let Some(frame) = self.switches.last_mut() else {
      return Err(ErrorKind::MalformedControlFlow("`default` outside a switch").at(span))
    };
    if frame.default.replace(block).is_some() {
      return Err(ErrorKind::MalformedControlFlow("duplicate `default`").at(span))
    }
    self.gen_stmt(inner)
  }

  // == declarations ========================================================

  /// A declaration in block scope: bind the names, allocate locals, run
  /// initializers.
  fn gen_local_decl(&mut self, d: &'a Decl<'a>) -> Result<()> {
    let (flags, base) = self.resolve_specifiers(&d.specifiers, d.span)?;
    if flags.contains(crate::decl::SpecFlags::TYPEDEF) {
      for init in &d.inits {
        let info = self.resolve_declarator(base, init.declarator, d.span)?;
        let name = info.name
          .ok_or_else(|| ErrorKind::TypeMismatch("typedef needs a name").at(d.span))?;
        self.types.typedefs.insert(name, info.ty);
      }
      return Ok(())
    }
    if flags.contains(crate::decl::SpecFlags::STATIC) {
      return Err(ErrorKind::Unsupported("block-scope `static`").at(d.span))
    }
    for init in &d.inits {
      let info = self.resolve_declarator(base, init.declarator, d.span)?;
      let name = info.name
        .ok_or_else(|| ErrorKind::TypeMismatch("declaration needs a name").at(d.span))?;
      if matches!(self.types.kind(info.ty), CTypeKind::Function(_))
        || flags.contains(crate::decl::SpecFlags::EXTERN) {
        // block-scope function or extern object declaration: bind the global
        let gid = self.declare_global(name, info.ty, Linkage::External, d.span)?;
        self.bind(Binding { name, ty: info.ty, value: Value::Global(gid), constant: false });
        continue
      }
      let tree = match init.init {
        None => None,
        Some(i) => Some(self.compile_initializer(info.ty, i, false)?),
      };
      let ir = self.ir_of(info.ty, d.span)?;
      let local = self.builder.build_local(ir);
      self.bind(Binding { name, ty: info.ty, value: local.clone(), constant: false });
      if let Some(tree) = &tree {
        self.emit_local_init(local, info.ty, tree, d.span)?;
      }
    }
    Ok(())
  }

  // == top level ===========================================================

  /// Find or create the IR global for a declaration of `name` with C type
  /// `ty`.
  fn declare_global(&mut self, name: Symbol, ty: TypeId, linkage: Linkage, span: Span)
    -> Result<GlobalId> {
    if let Some(g) = self.builder.unit.global_by_name(name) { return Ok(g) }
    Ok(match self.types.as_function(ty) {
      Some(f) => {
        let (sig, _) = self.fn_sig(&f, span)?;
        self.builder.unit.add_func(name, linkage, sig)
      }
      None => {
        let ir = self.ir_of(ty, span)?;
        self.builder.unit.add_var(name, linkage, ir)
      }
    })
  }

  /// The IR signature of a C function type, and whether it returns a
  /// struct via a hidden pointer argument.
  fn fn_sig(&mut self, f: &FnData, span: Span) -> Result<(FnSig, bool)> {
    let sret = matches!(self.types.kind(f.ret), CTypeKind::Record(_));
    let mut params = Vec::with_capacity(f.params.len() + usize::from(sret));
    if sret { params.push(IrType::Ptr) }
    for &p in &f.params { params.push(self.ir_of(p, span)?) }
    let ret = if sret { IrType::Void } else { self.ir_of(f.ret, span)? };
    Ok((FnSig { params: params.into_boxed_slice(), ret, variadic: f.variadic }, sret))
  }

  fn gen_function_def(&mut self, f: &'a FunctionDef<'a>) -> Result<()> {
    let (flags, base) = self.resolve_specifiers(&f.specifiers, f.span)?;
    let info = self.resolve_declarator(base, f.declarator, f.span)?;
    let name = info.name
      .ok_or_else(|| ErrorKind::TypeMismatch("function definition needs a name").at(f.span))?;
    if self.types.as_function(info.ty).is_none() {
      return Err(ErrorKind::TypeMismatch("function definition is not a function").at(f.span))
    }
    let linkage = if flags.contains(crate::decl::SpecFlags::STATIC) { Linkage::Internal }
      else { Linkage::External };
    let gid = self.declare_global(name, info.ty, linkage, f.span)?;
    self.bind_global(name, info.ty, gid);

    let pending = PendingFn {
      gid, name,
      ty: info.ty,
      params: info.fn_params.unwrap_or_default(),
      body: f.body,
      span: f.span,
    };
    if flags.contains(crate::decl::SpecFlags::INLINE) {
      debug!("deferring inline function `{name}`");
      self.deferred_inline.insert(name, pending);
      return Ok(())
    }
    self.gen_function_body(pending)
  }

  /// Lower a function body: bind the parameters to locals initialized from
  /// the argument values, lower the statement tree, resolve goto fixups,
  /// and guard the last block with an implicit void return.
  fn gen_function_body(&mut self, f: PendingFn<'a>) -> Result<()> {
    let fndata = self.types.as_function(f.ty).expect("checked by caller");
    debug!("lowering function `{}`", f.name);
    let (sig, sret) = self.fn_sig(&fndata, f.span)?;
    self.builder.enter_function(f.gid, sig);
    self.push_scope();

    let arg_base = u32::from(sret);
    for (i, (pname, pty)) in f.params.into_iter().enumerate() {
      let Some(pname) = pname else { continue };
      let ir = self.ir_of(pty, f.span)?;
      let local = self.builder.build_local(ir);
      self.builder.build_store(local.clone(), Value::Arg(arg_base + i as u32));
      self.bind(Binding { name: pname, ty: pty, value: local, constant: false });
    }

    self.ret = Some((fndata.ret, sret));
    self.labels.clear();
    self.goto_fixups.clear();
    self.gen_stmt(f.body)?;

    for (label, inst, span) in std::mem::take(&mut self.goto_fixups) {
      match self.labels.get(&label) {
        Some(&block) => self.builder.patch_branch(inst, block),
        None => return Err(ErrorKind::UnresolvedLabel(label).at(span)),
      }
    }
    // unreachability guard, not language-level fallthrough
    if !self.builder.cur_terminated() { self.builder.build_ret_void() }

    self.pop_scope();
    self.ret = None;
    self.builder.finish_function();
    Ok(())
  }

  fn bind_global(&mut self, name: Symbol, ty: TypeId, gid: GlobalId) {
    let binding = Binding { name, ty, value: Value::Global(gid), constant: false };
    match self.scopes.first_mut().expect("no global scope").iter_mut()
      .find(|b| b.name == name) {
      Some(b) => *b = binding,
      None => self.scopes.first_mut().expect("no global scope").push(binding),
    }
  }

  fn gen_toplevel_decl(&mut self, d: &'a Decl<'a>) -> Result<()> {
    let (flags, base) = self.resolve_specifiers(&d.specifiers, d.span)?;
    if flags.contains(crate::decl::SpecFlags::TYPEDEF) {
      for init in &d.inits {
        let info = self.resolve_declarator(base, init.declarator, d.span)?;
        let name = info.name
          .ok_or_else(|| ErrorKind::TypeMismatch("typedef needs a name").at(d.span))?;
        self.types.typedefs.insert(name, info.ty);
      }
      return Ok(())
    }
    for init in &d.inits {
      let info = self.resolve_declarator(base, init.declarator, d.span)?;
      let Some(name) = info.name else {
        // a bare specifier declaration (e.g. a struct definition); the
        // specifier resolution already had its effect
        continue
      };
      let linkage = if flags.contains(crate::decl::SpecFlags::STATIC) { Linkage::Internal }
        else { Linkage::External };

      if self.types.as_function(info.ty).is_some() {
        let gid = self.declare_global(name, info.ty, linkage, d.span)?;
        self.bind_global(name, info.ty, gid);
        // a non-inline redeclaration forces a deferred inline body
        if !flags.contains(crate::decl::SpecFlags::INLINE) {
          if let Some(pending) = self.deferred_inline.remove(&name) {
            debug!("forcing deferred inline function `{name}`");
            self.gen_function_body(pending)?;
          }
        }
        continue
      }

      let is_extern = flags.contains(crate::decl::SpecFlags::EXTERN);
      // compile the initializer first: it may complete an unsized array
      let tree = match init.init {
        None => None,
        Some(i) => Some(self.compile_initializer(info.ty, i, true)?),
      };
      let gid = self.declare_global(name, info.ty, linkage, d.span)?;
      self.builder.unit.globals[gid].linkage = linkage;
      if !(is_extern && tree.is_none()) {
        let konst = self.static_init(info.ty, tree.as_ref(), d.span)?;
        let ir = self.ir_of(info.ty, d.span)?;
        let GlobalKind::Var { ty: gty, init: ginit } = &mut self.builder.unit.globals[gid].kind
          else {
            return Err(ErrorKind::TypeMismatch("object redeclared as a function").at(d.span))
          };
        *gty = ir;
        *ginit = Some(konst);
      }
      self.bind_global(name, info.ty, gid);
    }
    Ok(())
  }
}

impl Default for IrGen<'_> {
  fn default() -> Self { Self::new() }
}
