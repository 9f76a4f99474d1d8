//! The constant evaluator: reduces the restricted constant-expression
//! subset to IR constants without emitting instructions. Used for array
//! bounds, enum values, `case` labels, designators, and static-initializer
//! leaves.
//!
//! Arithmetic runs in `BigInt` with every intermediate normalized to its C
//! type (wrap to width, reinterpret the sign bit), so overflow behaves the
//! way the emitted code would. `sizeof expr` is the one place evaluation
//! touches the lowering engine: the operand is lowered into a scratch
//! function that is discarded, and only its type survives.

use num::{BigInt, One, ToPrimitive, Zero};

use crate::{ErrorKind, Result};
use crate::build_ir::{IrGen, Term};
use crate::types::{IntRank, IntTy};
use crate::types::ast::{BinaryOp, Expr, ExprKind, IntBase, IntLit, IntSuffixSize, UnaryOp};
use crate::types::ir::{Const, GlobalId, IrType, Value};
use crate::types::ty::{TypeEnv, TypeId};

/// The value of a constant expression during evaluation.
enum CVal {
  /// An integer, normalized to the range of its type.
  Int(IntTy, BigInt),
  /// The address of a global; the type is the C type of the term (an
  /// array type for arrays and string literals, a pointer for `&x`).
  Addr(TypeId, GlobalId),
  /// A pointer-typed integer pattern ((T*)0 and friends).
  Ptr(TypeId, u64),
}

/// The bit pattern of `n` wrapped to the width of `ity`.
pub(crate) fn bigint_bits(n: &BigInt, ity: IntTy) -> u64 {
  let mask = BigInt::one() << ity.bits();
  let mut r = n % &mask;
  if r < BigInt::zero() { r += &mask }
  r.to_u64().expect("wrapped value fits in 64 bits")
}

/// Normalize `n` to the value range of `ity`: wrap to the type's width and
/// reinterpret through the sign bit if signed.
fn norm(ity: IntTy, n: &BigInt) -> BigInt {
  let bits = bigint_bits(n, ity);
  if ity.signed {
    let shift = 64 - ity.bits();
    BigInt::from(((bits << shift) as i64) >> shift)
  } else {
    BigInt::from(bits)
  }
}

fn fits(ity: IntTy, n: &BigInt) -> bool {
  let max = if ity.signed {
    (BigInt::one() << (ity.bits() - 1)) - 1
  } else {
    (BigInt::one() << ity.bits()) - 1
  };
  *n <= max
}

/// The type and value of an integer literal, per the C rules: the value
/// gets the first type it fits among the candidates selected by the
/// suffix, with non-decimal literals additionally allowed to go unsigned.
pub(crate) fn int_lit_big(lit: &IntLit) -> Result<(IntTy, BigInt), ErrorKind> {
  let n = BigInt::parse_bytes(lit.digits.as_bytes(), lit.base.radix())
    .ok_or(ErrorKind::BadConstExpr)?;
  let decimal = lit.base == IntBase::Decimal;
  let candidates: &[IntTy] = match (lit.size, lit.unsigned, decimal) {
    (IntSuffixSize::None, false, true) => &[IntTy::INT, IntTy::LONG, IntTy::LONGLONG],
    (IntSuffixSize::None, false, false) => &[
      IntTy::INT, IntTy::UINT, IntTy::LONG, IntTy::ULONG, IntTy::LONGLONG, IntTy::ULONGLONG,
    ],
    (IntSuffixSize::None, true, _) => &[IntTy::UINT, IntTy::ULONG, IntTy::ULONGLONG],
    (IntSuffixSize::Long, false, true) => &[IntTy::LONG, IntTy::LONGLONG],
    (IntSuffixSize::Long, false, false) =>
      &[IntTy::LONG, IntTy::ULONG, IntTy::LONGLONG, IntTy::ULONGLONG],
    (IntSuffixSize::Long, true, _) => &[IntTy::ULONG, IntTy::ULONGLONG],
    (IntSuffixSize::LongLong, false, true) => &[IntTy::LONGLONG],
    (IntSuffixSize::LongLong, false, false) => &[IntTy::LONGLONG, IntTy::ULONGLONG],
    (IntSuffixSize::LongLong, true, _) => &[IntTy::ULONGLONG],
  };
  let ity = candidates.iter().copied().find(|&c| fits(c, &n))
    .unwrap_or(*candidates.last().expect("nonempty"));
  Ok((ity, n))
}

/// The type and wrapped bit pattern of an integer literal.
pub(crate) fn int_lit_value(lit: &IntLit) -> Result<(IntTy, u64), ErrorKind> {
  let (ity, n) = int_lit_big(lit)?;
  let bits = bigint_bits(&n, ity);
  Ok((ity, bits))
}

impl<'a> IrGen<'a> {
  /// Evaluate a constant expression to a term whose value is an IR
  /// constant. No instructions are emitted.
  pub(crate) fn eval_const(&mut self, e: &'a Expr<'a>) -> Result<Term> {
    Ok(match self.const_val(e)? {
      CVal::Int(ity, n) => Term {
        ty: TypeEnv::int_id(ity),
        value: Value::Const(Const::int(IrType::int(ity.rank), bigint_bits(&n, ity))),
      },
      CVal::Addr(ty, g) => Term { ty, value: Value::Const(Const::Global(g)) },
      CVal::Ptr(ty, bits) => Term { ty, value: Value::Const(Const::int(IrType::Ptr, bits)) },
    })
  }

  /// Evaluate a constant expression that must be an integer.
  pub(crate) fn eval_const_int(&mut self, e: &'a Expr<'a>) -> Result<(IntTy, BigInt)> {
    match self.const_val(e)? {
      CVal::Int(ity, n) => Ok((ity, n)),
      _ => Err(ErrorKind::BadConstExpr.at(e.span)),
    }
  }

  /// Evaluate a constant array bound or index designator: a non-negative
  /// integer.
  pub(crate) fn eval_const_index(&mut self, e: &'a Expr<'a>) -> Result<u64> {
    let (_, n) = self.eval_const_int(e)?;
    n.to_u64().ok_or_else(|| ErrorKind::BadConstExpr.at(e.span))
  }

  fn const_val(&mut self, e: &'a Expr<'a>) -> Result<CVal> {
    match &e.k {
      ExprKind::Int(lit) => {
        let (ity, n) = int_lit_big(lit).map_err(|k| k.at(e.span))?;
        Ok(CVal::Int(ity, norm(ity, &n)))
      }
      &ExprKind::Ident(name) => {
        let Some(b) = self.lookup(name).cloned() else {
          return Err(ErrorKind::UnknownIdent(name).at(e.span))
        };
        if b.constant {
          let Value::Const(Const::Int { val, .. }) = b.value else {
            panic!("constant binding is not an integer")
          };
          return Ok(CVal::Int(IntTy::INT, BigInt::from(val as u32 as i32)))
        }
        // the address of a global array or function is itself a constant
        if_chain::if_chain! {
          if let Value::Global(g) = b.value;
          if self.types.is_aggregate(b.ty)
            || self.types.as_function(b.ty).is_some();
          then { return Ok(CVal::Addr(b.ty, g)) }
        }
        Err(ErrorKind::BadConstExpr.at(e.span))
      }
      ExprKind::Str(s) => {
        let t = self.string_literal(s);
        let Value::Global(g) = t.value else { unreachable!() };
        Ok(CVal::Addr(t.ty, g))
      }
      &ExprKind::Unary(op, arg) => self.const_unary(op, arg, e),
      &ExprKind::Binary(op, lhs, rhs) => self.const_binary(op, lhs, rhs, e),
      &ExprKind::Conditional { cond, then, els } => {
        let c = self.const_truthy(cond)?;
        self.const_val(if c { then } else { els })
      }
      &ExprKind::Cast(tn, arg) => {
        let to = self.resolve_type_name(tn)?;
        let v = self.const_val(arg)?;
        match (self.types.as_int(to), v) {
          (Some(ti), CVal::Int(_, n)) => Ok(CVal::Int(ti, norm(ti, &n))),
          (Some(ti), CVal::Ptr(_, bits)) => Ok(CVal::Int(ti, norm(ti, &BigInt::from(bits)))),
          (None, CVal::Int(ity, n)) if self.types.is_pointer(to) =>
            Ok(CVal::Ptr(to, bigint_bits(&n, ity))),
          (None, CVal::Ptr(_, bits)) if self.types.is_pointer(to) => Ok(CVal::Ptr(to, bits)),
          (None, CVal::Addr(_, g)) if self.types.is_pointer(to) => Ok(CVal::Addr(to, g)),
          _ => Err(ErrorKind::BadConstExpr.at(e.span)),
        }
      }
      &ExprKind::SizeofExpr(arg) => {
        let ty = self.type_of_expr(arg)?;
        let size = self.size_of(ty, e.span)?;
        Ok(CVal::Int(IntTy::ULONG, BigInt::from(size)))
      }
      &ExprKind::SizeofType(tn) => {
        let ty = self.resolve_type_name(tn)?;
        let size = self.size_of(ty, e.span)?;
        Ok(CVal::Int(IntTy::ULONG, BigInt::from(size)))
      }
      // assignments, increments, calls and comma are not constant
      _ => Err(ErrorKind::BadConstExpr.at(e.span)),
    }
  }

  fn const_truthy(&mut self, e: &'a Expr<'a>) -> Result<bool> {
    Ok(match self.const_val(e)? {
      CVal::Int(_, n) => !n.is_zero(),
      CVal::Addr(..) => true,
      CVal::Ptr(_, bits) => bits != 0,
    })
  }

  fn const_unary(&mut self, op: UnaryOp, arg: &'a Expr<'a>, e: &'a Expr<'a>) -> Result<CVal> {
    match op {
      UnaryOp::AddrOf => {
        // address-of a global object
        if let ExprKind::Ident(name) = arg.k {
          let Some(b) = self.lookup(name).cloned() else {
            return Err(ErrorKind::UnknownIdent(name).at(arg.span))
          };
          if let Value::Global(g) = b.value {
            return Ok(CVal::Addr(self.types.make_pointer(b.ty), g))
          }
        }
        Err(ErrorKind::BadConstExpr.at(e.span))
      }
      UnaryOp::LogNot => {
        let t = self.const_truthy(arg)?;
        Ok(CVal::Int(IntTy::INT, BigInt::from(u32::from(!t))))
      }
      UnaryOp::Plus | UnaryOp::Minus | UnaryOp::BitNot => {
        let CVal::Int(ity, n) = self.const_val(arg)? else {
          return Err(ErrorKind::BadConstExpr.at(e.span))
        };
        let ity = if ity.rank < IntRank::Int { IntTy::INT } else { ity };
        let n = match op {
          UnaryOp::Plus => n,
          UnaryOp::Minus => -n,
          UnaryOp::BitNot => -n - 1,
          _ => unreachable!(),
        };
        Ok(CVal::Int(ity, norm(ity, &n)))
      }
      _ => Err(ErrorKind::BadConstExpr.at(e.span)),
    }
  }

  fn const_binary(&mut self, op: BinaryOp, lhs: &'a Expr<'a>, rhs: &'a Expr<'a>,
    e: &'a Expr<'a>) -> Result<CVal> {
    // short-circuit forms evaluate lazily, like the emitted code would
    match op {
      BinaryOp::LogAnd => {
        let v = if !self.const_truthy(lhs)? { false } else { self.const_truthy(rhs)? };
        return Ok(CVal::Int(IntTy::INT, BigInt::from(u32::from(v))))
      }
      BinaryOp::LogOr => {
        let v = if self.const_truthy(lhs)? { true } else { self.const_truthy(rhs)? };
        return Ok(CVal::Int(IntTy::INT, BigInt::from(u32::from(v))))
      }
      _ => {}
    }
    let CVal::Int(li, ln) = self.const_val(lhs)? else {
      return Err(ErrorKind::BadConstExpr.at(e.span))
    };
    let CVal::Int(ri, rn) = self.const_val(rhs)? else {
      return Err(ErrorKind::BadConstExpr.at(e.span))
    };
    let common = IrGen::common_int_ty(li, ri);
    let ln = norm(common, &ln);
    let rn = norm(common, &rn);
    if op.is_comparison() {
      let hit = match op {
        BinaryOp::Eq => ln == rn,
        BinaryOp::Ne => ln != rn,
        BinaryOp::Lt => ln < rn,
        BinaryOp::Le => ln <= rn,
        BinaryOp::Gt => ln > rn,
        BinaryOp::Ge => ln >= rn,
        _ => unreachable!(),
      };
      return Ok(CVal::Int(IntTy::INT, BigInt::from(u32::from(hit))))
    }
    let result = match op {
      BinaryOp::Add => ln + rn,
      BinaryOp::Sub => ln - rn,
      BinaryOp::Mul => ln * rn,
      BinaryOp::Div | BinaryOp::Mod => {
        if rn.is_zero() {
          return Err(ErrorKind::BadConstExpr.at(e.span))
        }
        if op == BinaryOp::Div { ln / rn } else { ln % rn }
      }
      BinaryOp::Shl | BinaryOp::Shr => {
        let sh = rn.to_u32().filter(|&s| s < 64)
          .ok_or_else(|| ErrorKind::BadConstExpr.at(e.span))?;
        if op == BinaryOp::Shl { ln << sh } else { ln >> sh }
      }
      BinaryOp::BitAnd => ln & rn,
      BinaryOp::BitOr => ln | rn,
      BinaryOp::BitXor => ln ^ rn,
      _ => unreachable!("handled above"),
    };
    Ok(CVal::Int(common, norm(common, &result)))
  }
}

#[cfg(test)]
mod tests {
  use crate::types::Span;
  use crate::types::ast::*;
  use crate::types::ir::{Const, Value};
  use crate::types::ty::TypeId;
  use crate::IrGen;
  use super::*;

  fn lit(digits: &str, base: IntBase, unsigned: bool, size: IntSuffixSize) -> IntLit {
    IntLit { digits: digits.into(), base, unsigned, size }
  }

  #[test]
  fn literal_typing_follows_c() {
    let (ity, _) = int_lit_big(&lit("1", IntBase::Decimal, false, IntSuffixSize::None)).unwrap();
    assert_eq!(ity, IntTy::INT);
    // 2^31 does not fit in int; decimal literals stay signed
    let (ity, _) =
      int_lit_big(&lit("2147483648", IntBase::Decimal, false, IntSuffixSize::None)).unwrap();
    assert_eq!(ity, IntTy::LONG);
    // but hex literals may go unsigned
    let (ity, _) =
      int_lit_big(&lit("80000000", IntBase::Hexadecimal, false, IntSuffixSize::None)).unwrap();
    assert_eq!(ity, IntTy::UINT);
    let (ity, _) = int_lit_big(&lit("1", IntBase::Decimal, true, IntSuffixSize::None)).unwrap();
    assert_eq!(ity, IntTy::UINT);
    let (ity, _) = int_lit_big(&lit("1", IntBase::Decimal, false, IntSuffixSize::Long)).unwrap();
    assert_eq!(ity, IntTy::LONG);
  }

  #[test]
  fn arithmetic_wraps_to_type() {
    let arena = AstArena::default();
    let mut lowerer = IrGen::new();
    // (2147483647 + 1) as int wraps negative
    let e = arena.expr(Span::default(), ExprKind::Binary(BinaryOp::Add,
      arena.expr(Span::default(), ExprKind::Int(IntLit::dec(2147483647))),
      arena.expr(Span::default(), ExprKind::Int(IntLit::dec(1)))));
    let (ity, n) = lowerer.eval_const_int(e).unwrap();
    assert_eq!(ity, IntTy::INT);
    assert_eq!(n, BigInt::from(-2147483648i64));
  }

  #[test]
  fn conditional_and_comparison_fold() {
    let arena = AstArena::default();
    let mut lowerer = IrGen::new();
    // 3 < 5 ? 7 : 9
    let e = arena.expr(Span::default(), ExprKind::Conditional {
      cond: arena.expr(Span::default(), ExprKind::Binary(BinaryOp::Lt,
        arena.expr(Span::default(), ExprKind::Int(IntLit::dec(3))),
        arena.expr(Span::default(), ExprKind::Int(IntLit::dec(5))))),
      then: arena.expr(Span::default(), ExprKind::Int(IntLit::dec(7))),
      els: arena.expr(Span::default(), ExprKind::Int(IntLit::dec(9))),
    });
    let (_, n) = lowerer.eval_const_int(e).unwrap();
    assert_eq!(n, BigInt::from(7));
  }

  #[test]
  fn division_by_zero_is_rejected() {
    let arena = AstArena::default();
    let mut lowerer = IrGen::new();
    let e = arena.expr(Span::default(), ExprKind::Binary(BinaryOp::Div,
      arena.expr(Span::default(), ExprKind::Int(IntLit::dec(1))),
      arena.expr(Span::default(), ExprKind::Int(IntLit::dec(0)))));
    assert!(lowerer.eval_const_int(e).is_err());
  }

  #[test]
  fn sizeof_type_is_the_size_type() {
    let arena = AstArena::default();
    let mut lowerer = IrGen::new();
    let tn = arena.type_name(TypeName {
      specifiers: vec![DeclSpec::Type(arena.type_specifier(Span::default(),
        TypeSpecifierKind::Named(crate::intern("int"))))],
      declarator: None,
    });
    let e = arena.expr(Span::default(), ExprKind::SizeofType(tn));
    let t = lowerer.eval_const(e).unwrap();
    assert_eq!(t.ty, TypeId::SIZE);
    assert_eq!(t.value, Value::Const(Const::int(crate::types::ir::IrType::I64, 4)));
  }
}
