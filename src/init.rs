//! The initializer compiler: an initializer AST is normalized against its
//! target type into a tree of per-field/per-element leaves, then emitted
//! either as runtime stores (locals, compound literals) or as an IR
//! constant tree (globals).
//!
//! The normalized tree is dense: a compound node has one slot per field or
//! element, `None` meaning zero. Designators move the current index inside
//! the innermost containing compound and may descend through
//! auto-created sub-compounds.

use crate::{ErrorKind, Result};
use crate::build_ir::{IrGen, Term};
use crate::types::Span;
use crate::types::ast::{Designator, ExprKind, InitItem, Initializer};
use crate::types::ir::{Const, IrType, Value};
use crate::types::ty::{CTypeKind, TypeId};

/// The normalized initializer tree.
pub(crate) enum InitTree {
  /// A runtime leaf: an already-lowered (and converted) value.
  Value(Term),
  /// A static leaf: an IR constant.
  Const(Const),
  /// A struct/union/array compound, one slot per field or element.
  Compound(Vec<Option<InitTree>>),
}

impl InitTree {
  /// True if every leaf of the tree is present, recursively. A partial
  /// tree needs a zeroing memset before its stores.
  fn is_full(&self) -> bool {
    match self {
      InitTree::Value(_) | InitTree::Const(_) => true,
      InitTree::Compound(slots) =>
        slots.iter().all(|s| s.as_ref().is_some_and(InitTree::is_full)),
    }
  }
}

fn empty_slots(n: usize) -> Vec<Option<InitTree>> {
  (0..n).map(|_| None).collect()
}

impl<'a> IrGen<'a> {
  /// Normalize `init` against `target`. With `konst` set, leaves are
  /// evaluated by the constant evaluator (static initializers); otherwise
  /// they are lowered into the current function.
  pub(crate) fn compile_initializer(&mut self, target: TypeId, init: &'a Initializer<'a>,
    konst: bool) -> Result<InitTree> {
    match init {
      Initializer::Expr(e) => {
        if let (ExprKind::Str(s), Some(_)) = (&e.k, self.types.as_array(target)) {
          return self.string_into_array(target, s, e.span)
        }
        if konst {
          let t = self.eval_const(e)?;
          let c = self.static_convert(&t, target, e.span)?;
          return Ok(InitTree::Const(c))
        }
        let t = self.lower_rvalue(e)?;
        if matches!(self.types.kind(target), CTypeKind::Record(_)) {
          if t.ty != target {
            return Err(ErrorKind::TypeMismatch("initializing from an incompatible struct")
              .at(e.span))
          }
          return Ok(InitTree::Value(t))
        }
        if self.types.as_array(target).is_some() {
          return Err(ErrorKind::TypeMismatch("array initializer must be a brace list").at(e.span))
        }
        let value = self.convert(&t, target, e.span)?;
        Ok(InitTree::Value(Term { ty: target, value }))
      }
      Initializer::List(items) => self.compile_list(target, items, konst),
    }
  }

  /// A string literal initializing a character array: a compound of
  /// character leaves with the implicit trailing NUL. An incomplete array
  /// takes its length from the string.
  fn string_into_array(&mut self, target: TypeId, s: &[u8], span: Span) -> Result<InitTree> {
    let (elem, len) = self.types.as_array(target).expect("caller checked");
    if self.types.as_int(elem).is_none_or(|i| i.rank != crate::types::IntRank::Char) {
      return Err(ErrorKind::TypeMismatch("string initializer for a non-char array").at(span))
    }
    let with_nul = s.len() as u64 + 1;
    let len = match len {
      Some(n) => n,
      None => {
        self.types.set_array_len(target, with_nul);
        with_nul
      }
    };
    let mut slots = empty_slots(len as usize);
    for (i, b) in s.iter().copied().chain([0]).enumerate().take(len as usize) {
      slots[i] = Some(InitTree::Const(Const::int(IrType::I8, u64::from(b))));
    }
    Ok(InitTree::Compound(slots))
  }

  fn compile_list(&mut self, target: TypeId, items: &'a [InitItem<'a>], konst: bool)
    -> Result<InitTree> {
    // a brace list around a string literal for an array
    if_chain::if_chain! {
      if let [item] = items;
      if item.designators.is_empty();
      if let Initializer::Expr(e) = item.init;
      if let ExprKind::Str(s) = &e.k;
      if self.types.as_array(target).is_some();
      then { return self.string_into_array(target, s, e.span) }
    }
    // braces around a scalar
    if !self.types.is_aggregate(target) {
      let [item] = items else {
        return Err(ErrorKind::TypeMismatch("too many initializers for a scalar")
          .at(Span::default()))
      };
      if !item.designators.is_empty() {
        return Err(ErrorKind::TypeMismatch("designator on a scalar initializer")
          .at(Span::default()))
      }
      return self.compile_initializer(target, item.init, konst)
    }

    let unsized_array = matches!(self.types.as_array(target), Some((_, None)));
    let mut slots = match self.slot_count(target) {
      Ok(n) => empty_slots(n),
      Err(_) if unsized_array => vec![],
      Err(k) => return Err(k.at(Span::default())),
    };
    let mut cur = 0usize;
    for item in items {
      if item.designators.is_empty() {
        if unsized_array && cur >= slots.len() {
          slots.resize_with(cur + 1, || None);
        }
        let slot_ty = self.slot_type(target, cur)
          .map_err(|k| k.at(Span::default()))?;
        let tree = self.compile_initializer(slot_ty, item.init, konst)?;
        *slots.get_mut(cur)
          .ok_or_else(|| ErrorKind::TypeMismatch("too many initializers").at(Span::default()))? =
          Some(tree);
        cur += 1;
        continue
      }
      // the first designator addresses this compound and resets the index
      let index = self.designator_index(target, &item.designators[0])?;
      if unsized_array && index >= slots.len() {
        slots.resize_with(index + 1, || None);
      }
      if index >= slots.len() {
        return Err(ErrorKind::TypeMismatch("designator out of range").at(Span::default()))
      }
      cur = index;
      self.place_designated(target, &mut slots, index, &item.designators[1..], item.init,
        konst)?;
      cur += 1;
    }
    if unsized_array {
      self.types.set_array_len(target, slots.len() as u64);
    }
    Ok(InitTree::Compound(slots))
  }

  /// Descend through the remaining designators, auto-creating intermediate
  /// sub-compounds, and compile the initializer into the addressed slot.
  fn place_designated(&mut self, container: TypeId, slots: &mut Vec<Option<InitTree>>,
    index: usize, rest: &'a [Designator<'a>], init: &'a Initializer<'a>, konst: bool)
    -> Result<()> {
    let slot_ty = self.slot_type(container, index).map_err(|k| k.at(Span::default()))?;
    if rest.is_empty() {
      slots[index] = Some(self.compile_initializer(slot_ty, init, konst)?);
      return Ok(())
    }
    let sub_index = self.designator_index(slot_ty, &rest[0])?;
    let n = self.slot_count(slot_ty).map_err(|k| k.at(Span::default()))?;
    let sub = slots[index].get_or_insert_with(|| InitTree::Compound(empty_slots(n)));
    let InitTree::Compound(sub_slots) = sub else {
      return Err(ErrorKind::TypeMismatch("designator into a non-aggregate").at(Span::default()))
    };
    if sub_index >= sub_slots.len() {
      return Err(ErrorKind::TypeMismatch("designator out of range").at(Span::default()))
    }
    self.place_designated(slot_ty, sub_slots, sub_index, &rest[1..], init, konst)
  }

  /// Resolve one designator against its containing aggregate.
  fn designator_index(&mut self, container: TypeId, d: &'a Designator<'a>) -> Result<usize> {
    match *d {
      Designator::Index(e) => {
        if self.types.as_array(container).is_none() {
          return Err(ErrorKind::TypeMismatch("index designator on a non-array").at(e.span))
        }
        Ok(self.eval_const_index(e)? as usize)
      }
      Designator::Field(name) => {
        let Some((i, _)) = self.types.record_field(container, name) else {
          return Err(ErrorKind::TypeMismatch("no such field in designator").at(Span::default()))
        };
        Ok(i as usize)
      }
    }
  }

  /// The number of slots of an aggregate's compound.
  fn slot_count(&self, ty: TypeId) -> Result<usize, ErrorKind> {
    match self.types.kind(ty) {
      CTypeKind::Array(a) => a.len.map(|n| n as usize).ok_or(ErrorKind::IncompleteType),
      CTypeKind::Record(_) =>
        self.types.record_field_count(ty).ok_or(ErrorKind::IncompleteType),
      _ => Err(ErrorKind::TypeMismatch("braces around a non-aggregate")),
    }
  }

  /// The type of slot `i` of an aggregate.
  fn slot_type(&self, ty: TypeId, i: usize) -> Result<TypeId, ErrorKind> {
    match self.types.kind(ty) {
      CTypeKind::Array(a) => {
        if a.len.is_some_and(|n| i as u64 >= n) {
          return Err(ErrorKind::TypeMismatch("too many initializers"))
        }
        Ok(a.elem)
      }
      CTypeKind::Record(_) => self.types.record_field_at(ty, i)
        .map(|f| f.ty)
        .ok_or(ErrorKind::TypeMismatch("too many initializers")),
      _ => Err(ErrorKind::TypeMismatch("braces around a non-aggregate")),
    }
  }

  // == runtime emission ====================================================

  /// Emit the runtime initialization of the object at `base`. If the tree
  /// is not full, a single zeroing memset of the whole object precedes the
  /// per-leaf stores.
  pub(crate) fn emit_local_init(&mut self, base: Value, target: TypeId, tree: &InitTree,
    span: Span) -> Result<()> {
    if let InitTree::Compound(_) = tree {
      if !tree.is_full() {
        let size = self.size_of(target, span)?;
        self.emit_memset_zero(base.clone(), size);
      }
    }
    self.emit_init_at(&base, target, tree, 0, span)
  }

  fn emit_init_at(&mut self, base: &Value, ty: TypeId, tree: &InitTree, offset: u64,
    span: Span) -> Result<()> {
    match tree {
      InitTree::Value(t) => {
        let addr = self.addr_at(base, offset);
        if matches!(self.types.kind(t.ty), CTypeKind::Record(_)) {
          let size = self.size_of(t.ty, span)?;
          self.emit_memcpy(addr, t.value.clone(), size);
        } else {
          self.builder.build_store(addr, t.value.clone());
        }
        Ok(())
      }
      InitTree::Const(c) => {
        let addr = self.addr_at(base, offset);
        self.builder.build_store(addr, Value::Const(c.clone()));
        Ok(())
      }
      InitTree::Compound(slots) => {
        for (i, slot) in slots.iter().enumerate() {
          let Some(sub) = slot else { continue };
          let (child_ty, child_off) = self.slot_location(ty, i)?;
          self.emit_init_at(base, child_ty, sub, offset + child_off, span)?;
        }
        Ok(())
      }
    }
  }

  /// The type and byte offset of slot `i` within an aggregate.
  fn slot_location(&self, ty: TypeId, i: usize) -> Result<(TypeId, u64)> {
    match self.types.kind(ty) {
      CTypeKind::Array(a) => {
        let elem_size = self.types.size(a.elem)
          .ok_or_else(|| ErrorKind::IncompleteType.at(Span::default()))?;
        Ok((a.elem, elem_size * i as u64))
      }
      CTypeKind::Record(_) => {
        let f = self.types.record_field_at(ty, i).expect("slot index in range");
        Ok((f.ty, f.offset))
      }
      _ => unreachable!("compound over a non-aggregate"),
    }
  }

  /// The address `base + offset`, through pointer-width integer
  /// arithmetic; offset zero is the base itself.
  fn addr_at(&mut self, base: &Value, offset: u64) -> Value {
    if offset == 0 { return base.clone() }
    let as_int = self.builder.build_conv(crate::types::ir::Op::Cast, base.clone(), IrType::I64);
    let sum = self.builder.build_binary(crate::types::ir::Op::Add, IrType::I64, as_int,
      Value::int(IrType::I64, offset));
    self.builder.build_conv(crate::types::ir::Op::Cast, sum, IrType::Ptr)
  }

  // == static emission =====================================================

  /// Build the IR constant for a static initializer; missing leaves become
  /// recursive zero-initializers.
  pub(crate) fn static_init(&mut self, target: TypeId, tree: Option<&InitTree>, span: Span)
    -> Result<Const> {
    let Some(tree) = tree else {
      let ir = self.ir_of(target, span)?;
      return Ok(Const::zero(&ir))
    };
    match tree {
      InitTree::Const(c) => Ok(c.clone()),
      InitTree::Value(_) => Err(ErrorKind::BadConstExpr.at(span)),
      InitTree::Compound(slots) => {
        let ir = self.ir_of(target, span)?;
        if let Some((elem, len)) = self.types.as_array(target) {
          let len = len.expect("array completed by now") as usize;
          let mut elems = Vec::with_capacity(len);
          for i in 0..len {
            elems.push(self.static_init(elem, slots.get(i).and_then(Option::as_ref), span)?);
          }
          Ok(Const::Array { ty: ir, elems: elems.into_boxed_slice() })
        } else if let Some(n) = self.types.record_field_count(target) {
          let mut fields = Vec::with_capacity(n);
          for i in 0..n {
            let fty = self.types.record_field_at(target, i).expect("in range").ty;
            fields.push(self.static_init(fty, slots.get(i).and_then(Option::as_ref), span)?);
          }
          Ok(Const::Record { ty: ir, fields: fields.into_boxed_slice() })
        } else {
          unreachable!("compound over a non-aggregate")
        }
      }
    }
  }

  /// Convert a constant leaf to its slot type without emitting anything:
  /// integer re-typing, null pointers, and address-of-global adjustments.
  fn static_convert(&self, t: &Term, target: TypeId, span: Span) -> Result<Const> {
    let Value::Const(c) = &t.value else {
      return Err(ErrorKind::BadConstExpr.at(span))
    };
    if t.ty == target { return Ok(c.clone()) }
    if let (Some(fi), Some(ti)) = (self.types.as_int(t.ty), self.types.as_int(target)) {
      let Const::Int { val, .. } = *c else { return Err(ErrorKind::BadConstExpr.at(span)) };
      return Ok(Const::int(IrType::int(ti.rank), IrGen::const_retype(val, fi, ti.bits())))
    }
    if self.types.is_pointer(target) {
      return match c {
        // a literal zero is the null pointer constant
        Const::Int { val: 0, .. } => Ok(Const::int(IrType::Ptr, 0)),
        // array and function addresses decay to the pointer
        Const::Global(g) => Ok(Const::Global(*g)),
        _ => Err(ErrorKind::BadConstExpr.at(span)),
      }
    }
    Err(ErrorKind::TypeMismatch("constant initializer of the wrong type").at(span))
  }
}

#[cfg(test)]
mod tests {
  use crate::types::Span;
  use crate::types::ast::*;
  use crate::types::ir::Const;
  use crate::types::ty::TypeId;
  use crate::IrGen;

  fn index_item<'a>(arena: &'a AstArena<'a>, at: u64, val: u64) -> InitItem<'a> {
    InitItem {
      designators: vec![Designator::Index(
        arena.expr(Span::default(), ExprKind::Int(IntLit::dec(at))))],
      init: arena.init(Initializer::Expr(
        arena.expr(Span::default(), ExprKind::Int(IntLit::dec(val))))),
    }
  }

  #[test]
  fn designated_global_array_zero_fills() {
    // int a[5] = { [4]=1, [1]=2 };
    let arena = AstArena::default();
    let mut lowerer = IrGen::new();
    let target = lowerer.types.make_array(TypeId::INT, Some(5));
    let init = arena.init(Initializer::List(vec![
      index_item(&arena, 4, 1),
      index_item(&arena, 1, 2),
    ]));
    let tree = lowerer.compile_initializer(target, init, true).unwrap();
    let c = lowerer.static_init(target, Some(&tree), Span::default()).unwrap();
    let Const::Array { elems, .. } = c else { panic!("expected array constant") };
    let vals: Vec<u64> = elems.iter().map(|c| {
      let Const::Int { val, .. } = c else { panic!("expected int") };
      *val
    }).collect();
    assert_eq!(vals, [0, 2, 0, 0, 1]);
  }

  #[test]
  fn string_initializer_infers_length() {
    // char s[] = "hi";
    let arena = AstArena::default();
    let mut lowerer = IrGen::new();
    let target = lowerer.types.make_array(TypeId::CHAR, None);
    let init = arena.init(Initializer::Expr(
      arena.expr(Span::default(), ExprKind::Str(b"hi".to_vec().into_boxed_slice()))));
    let tree = lowerer.compile_initializer(target, init, true).unwrap();
    assert_eq!(lowerer.types.as_array(target), Some((TypeId::CHAR, Some(3))));
    let c = lowerer.static_init(target, Some(&tree), Span::default()).unwrap();
    let Const::Array { elems, .. } = c else { panic!("expected array constant") };
    assert_eq!(elems.len(), 3);
    let Const::Int { val, .. } = elems[2] else { panic!("expected int") };
    assert_eq!(val, 0);
  }

  #[test]
  fn unsized_array_infers_from_max_index() {
    // int a[] = { 1, [3]=4 };
    let arena = AstArena::default();
    let mut lowerer = IrGen::new();
    let target = lowerer.types.make_array(TypeId::INT, None);
    let init = arena.init(Initializer::List(vec![
      InitItem {
        designators: vec![],
        init: arena.init(Initializer::Expr(
          arena.expr(Span::default(), ExprKind::Int(IntLit::dec(1))))),
      },
      index_item(&arena, 3, 4),
    ]));
    lowerer.compile_initializer(target, init, true).unwrap();
    assert_eq!(lowerer.types.as_array(target), Some((TypeId::INT, Some(4))));
  }
}
