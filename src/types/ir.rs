//! The output IR: a translation unit of globals, functions made of basic
//! blocks, and typed instructions, together with the [`Builder`] that the
//! lowering pass emits through.
//!
//! Blocks have identity ([`BlockId`]) separate from their position in the
//! function's layout list. The lowering pass exploits this split: a loop's
//! after-block or a switch's dispatch ladder is allocated early but placed
//! into the layout later, so the final block order matches source order.

use std::fmt;
use std::rc::Rc;
use smallvec::SmallVec;
use itertools::Itertools;
use crate::Symbol;
use super::{IdxVec, IntRank, mk_id};

mk_id! {
  /// An index into the translation unit's global list.
  GlobalId,
  /// An index into a function's block store.
  BlockId,
  /// An index into a function's instruction store.
  InstId,
}

impl BlockId {
  /// The entry block of every function.
  pub const ENTRY: Self = Self(0);
  /// The placeholder target of a not-yet-patched branch (goto fixups).
  pub const PENDING: Self = Self(u32::MAX);
}

/// An IR-level array type. Always flattened: the element is never itself
/// an array.
#[derive(Debug, PartialEq, Eq)]
pub struct IrArray {
  /// The element type.
  pub elem: IrType,
  /// The element count.
  pub len: u64,
}

/// One field of an IR record type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IrRecordField {
  /// The field type.
  pub ty: IrType,
  /// The byte offset of the field.
  pub offset: u64,
}

/// An IR-level record type, carrying the full layout.
#[derive(Debug, PartialEq, Eq)]
pub struct IrRecord {
  /// The source tag, for dumps.
  pub name: Option<Symbol>,
  /// The fields with their offsets. Union mirrors have all offsets 0.
  pub fields: Box<[IrRecordField]>,
  /// The total size in bytes.
  pub size: u64,
  /// The alignment in bytes.
  pub align: u64,
}

/// An IR type. Integer types are widths only; signedness lives in the
/// opcodes that care (compares, extensions).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IrType {
  /// No value.
  Void,
  /// 8-bit integer.
  I8,
  /// 16-bit integer.
  I16,
  /// 32-bit integer.
  I32,
  /// 64-bit integer.
  I64,
  /// An untyped pointer.
  Ptr,
  /// A function; only meaningful behind a pointer or as a call target.
  Func,
  /// An array.
  Array(Rc<IrArray>),
  /// A struct or union.
  Record(Rc<IrRecord>),
}

impl IrType {
  /// The integer type of the given rank.
  #[must_use] pub fn int(rank: IntRank) -> Self {
    match rank {
      IntRank::Char => IrType::I8,
      IntRank::Short => IrType::I16,
      IntRank::Int => IrType::I32,
      IntRank::Long | IntRank::LongLong => IrType::I64,
    }
  }

  /// Construct an array type.
  #[must_use] pub fn array(elem: IrType, len: u64) -> Self {
    debug_assert!(!matches!(elem, IrType::Array(_)), "array mirrors are flattened");
    IrType::Array(Rc::new(IrArray { elem, len }))
  }

  /// The size in bytes.
  #[must_use] pub fn size(&self) -> u64 {
    match self {
      IrType::Void => 0,
      IrType::I8 => 1,
      IrType::I16 => 2,
      IrType::I32 => 4,
      IrType::I64 | IrType::Ptr | IrType::Func => 8,
      IrType::Array(a) => a.elem.size() * a.len,
      IrType::Record(r) => r.size,
    }
  }

  /// The alignment in bytes.
  #[must_use] pub fn align(&self) -> u64 {
    match self {
      IrType::Void => 1,
      IrType::Array(a) => a.elem.align(),
      IrType::Record(r) => r.align,
      _ => self.size(),
    }
  }

  /// The width in bits of an integer or pointer type.
  #[must_use] pub fn bits(&self) -> u32 { (self.size() * 8) as u32 }

  /// True for the integer types.
  #[must_use] pub fn is_int(&self) -> bool {
    matches!(self, IrType::I8 | IrType::I16 | IrType::I32 | IrType::I64)
  }
}

/// An IR constant. Aggregate constants nest; pointer constants reference a
/// global.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Const {
  /// An integer constant, stored as the bit pattern truncated to the width
  /// of `ty` (which may also be `Ptr`, for null pointer constants).
  Int {
    /// The constant's type.
    ty: IrType,
    /// The bit pattern.
    val: u64,
  },
  /// The address of a global.
  Global(GlobalId),
  /// An array constant.
  Array {
    /// The array type.
    ty: IrType,
    /// The element constants.
    elems: Box<[Const]>,
  },
  /// A struct constant.
  Record {
    /// The record type.
    ty: IrType,
    /// The field constants, in field order.
    fields: Box<[Const]>,
  },
}

impl Const {
  /// An integer constant of the given type, wrapping `val` to its width.
  #[must_use] pub fn int(ty: IrType, val: u64) -> Self {
    let val = match ty.bits() {
      64 => val,
      bits => val & ((1 << bits) - 1),
    };
    Const::Int { ty, val }
  }

  /// The all-zero constant of a type, recursively for aggregates.
  #[must_use] pub fn zero(ty: &IrType) -> Self {
    match ty {
      IrType::Array(a) => Const::Array {
        ty: ty.clone(),
        elems: (0..a.len).map(|_| Const::zero(&a.elem)).collect(),
      },
      IrType::Record(r) => Const::Record {
        ty: ty.clone(),
        fields: r.fields.iter().map(|f| Const::zero(&f.ty)).collect(),
      },
      _ => Const::Int { ty: ty.clone(), val: 0 },
    }
  }

  /// The type of this constant.
  #[must_use] pub fn ty(&self) -> IrType {
    match self {
      Const::Int { ty, .. } | Const::Array { ty, .. } | Const::Record { ty, .. } => ty.clone(),
      Const::Global(_) => IrType::Ptr,
    }
  }
}

/// An IR value: anything an instruction operand can be.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
  /// A constant.
  Const(Const),
  /// The address of a global.
  Global(GlobalId),
  /// The result of an instruction.
  Inst(InstId),
  /// The `i`th argument of the enclosing function.
  Arg(u32),
}

impl Value {
  /// An integer constant value.
  #[must_use] pub fn int(ty: IrType, val: u64) -> Self { Value::Const(Const::int(ty, val)) }

  /// True if this value is the integer constant zero (a null pointer
  /// constant when typed as an integer literal).
  #[must_use] pub fn is_const_zero(&self) -> bool {
    matches!(self, Value::Const(Const::Int { val: 0, .. }))
  }
}

/// A comparison kind. Ordering compares exist in signed and unsigned
/// variants; equality is variant-free.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Cmp {
  /// `==`
  Eq,
  /// `!=`
  Ne,
  /// signed `<`
  Slt,
  /// signed `<=`
  Sle,
  /// signed `>`
  Sgt,
  /// signed `>=`
  Sge,
  /// unsigned `<`
  Ult,
  /// unsigned `<=`
  Ule,
  /// unsigned `>`
  Ugt,
  /// unsigned `>=`
  Uge,
}

/// An instruction opcode.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Op {
  /// Allocate a stack slot of the instruction's type; the result is its
  /// address.
  Local,
  /// Load a value of the instruction's type from `args[0]`.
  Load,
  /// Store `args[1]` to the address `args[0]`.
  Store,
  /// Compute the address of field/element `n` of the aggregate (of the
  /// instruction's type) at address `args[0]`.
  Field(u32),
  /// Bit-preserving reinterpretation to the instruction's type.
  Cast,
  /// Zero-extend to the instruction's type.
  Zext,
  /// Sign-extend to the instruction's type.
  Sext,
  /// Truncate to the instruction's type.
  Trunc,
  /// Two's complement negation.
  Neg,
  /// Bitwise complement.
  BitNot,
  /// Addition.
  Add,
  /// Subtraction.
  Sub,
  /// Multiplication.
  Mul,
  /// Division.
  Div,
  /// Remainder.
  Mod,
  /// Left shift.
  Shl,
  /// Logical right shift.
  Shr,
  /// Arithmetic right shift.
  Sar,
  /// Bitwise and.
  BitAnd,
  /// Bitwise or.
  BitOr,
  /// Bitwise xor.
  BitXor,
  /// Comparison; the result is a 0/1 `i32`.
  Cmp(Cmp),
  /// Call `args[0]` with `args[1..]`; the instruction's type is the
  /// return type.
  Call,
  /// Select `args[i]` if control arrived from `blocks[i]`.
  Phi,
  /// Unconditional branch to `blocks[0]`. Terminator.
  Branch,
  /// Branch to `blocks[0]` if `args[0]` is nonzero, else `blocks[1]`.
  /// Terminator.
  Cond,
  /// Return `args[0]`. Terminator.
  Ret,
  /// Return without a value. Terminator.
  RetVoid,
  /// Initialize the va_list at address `args[0]`.
  VaStart,
}

impl Op {
  /// True if this opcode ends a block.
  #[must_use] pub fn is_terminator(self) -> bool {
    matches!(self, Op::Branch | Op::Cond | Op::Ret | Op::RetVoid)
  }
}

/// One instruction: an opcode, a result type, value operands, and block
/// operands (branch targets, phi predecessors).
#[derive(Clone, Debug)]
pub struct Inst {
  /// The opcode.
  pub op: Op,
  /// The type parameter of the instruction (result type for most opcodes;
  /// allocated type for `local`; aggregate type for `field`).
  pub ty: IrType,
  /// The value operands.
  pub args: SmallVec<[Value; 2]>,
  /// The block operands: branch targets, or phi predecessors parallel to
  /// `args`.
  pub blocks: SmallVec<[BlockId; 2]>,
}

impl Inst {
  /// The type of this instruction's result value.
  #[must_use] pub fn result_ty(&self) -> IrType {
    match self.op {
      Op::Local | Op::Field(_) => IrType::Ptr,
      Op::Cmp(_) => IrType::I32,
      Op::Store | Op::Branch | Op::Cond | Op::Ret | Op::RetVoid | Op::VaStart => IrType::Void,
      _ => self.ty.clone(),
    }
  }
}

/// A basic block: an advisory name and the instructions in order. A
/// well-formed block ends with exactly one terminator.
#[derive(Debug, Default)]
pub struct Block {
  /// The advisory name, from the source construct that created the block.
  pub name: Box<str>,
  /// The instructions, in order.
  pub insts: Vec<InstId>,
  /// Set once a terminator has been emitted.
  pub terminated: bool,
}

/// The signature of a function global.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FnSig {
  /// The parameter types. For struct-returning functions this includes
  /// the hidden return-buffer pointer at index 0.
  pub params: Box<[IrType]>,
  /// The return type.
  pub ret: IrType,
  /// True for variadic functions.
  pub variadic: bool,
}

/// The body of a defined function.
#[derive(Debug)]
pub struct FuncBody {
  /// The block store, in allocation order.
  pub blocks: IdxVec<BlockId, Block>,
  /// The block layout: ids in emission order, which the builder keeps
  /// equal to source order.
  pub layout: Vec<BlockId>,
  /// The instruction store.
  pub insts: IdxVec<InstId, Inst>,
  /// The signature, repeated here for argument typing.
  pub sig: FnSig,
}

impl FuncBody {
  fn new(sig: FnSig) -> Self {
    let mut blocks = IdxVec::new();
    let entry = blocks.push(Block { name: "entry".into(), ..Block::default() });
    Self { blocks, layout: vec![entry], insts: IdxVec::new(), sig }
  }

  /// The type of a value in the context of this function.
  #[must_use] pub fn value_ty(&self, v: &Value) -> IrType {
    match v {
      Value::Const(c) => c.ty(),
      Value::Global(_) => IrType::Ptr,
      Value::Inst(i) => self.insts[*i].result_ty(),
      Value::Arg(i) => self.sig.params[*i as usize].clone(),
    }
  }
}

/// The linkage of a global.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Linkage {
  /// Visible to other translation units.
  External,
  /// Local to this translation unit (`static`, string literals).
  Internal,
}

/// The definition payload of a global.
#[derive(Debug)]
pub enum GlobalKind {
  /// A variable, with an optional constant initializer (`None` for
  /// `extern` declarations).
  Var {
    /// The variable's type.
    ty: IrType,
    /// The initializer.
    init: Option<Const>,
  },
  /// A function, with a body once defined.
  Func {
    /// The signature.
    sig: FnSig,
    /// The body, present for defined functions.
    body: Option<FuncBody>,
  },
}

/// A global: a named variable or function.
#[derive(Debug)]
pub struct Global {
  /// The name.
  pub name: Symbol,
  /// The linkage.
  pub linkage: Linkage,
  /// The payload.
  pub kind: GlobalKind,
}

/// A lowered translation unit.
#[derive(Debug, Default)]
pub struct TransUnit {
  /// The globals, in creation order.
  pub globals: IdxVec<GlobalId, Global>,
}

impl TransUnit {
  /// Find a global by name.
  #[must_use] pub fn global_by_name(&self, name: Symbol) -> Option<GlobalId> {
    self.globals.enum_iter().find(|(_, g)| g.name == name).map(|(id, _)| id)
  }

  /// Add a variable global.
  pub fn add_var(&mut self, name: Symbol, linkage: Linkage, ty: IrType) -> GlobalId {
    self.globals.push(Global { name, linkage, kind: GlobalKind::Var { ty, init: None } })
  }

  /// Add a function global (declaration only; the builder fills the body).
  pub fn add_func(&mut self, name: Symbol, linkage: Linkage, sig: FnSig) -> GlobalId {
    self.globals.push(Global { name, linkage, kind: GlobalKind::Func { sig, body: None } })
  }

  /// Check the control-flow invariants of every function body: each laid
  /// out block ends with exactly one terminator, every branch target is a
  /// real block of the same function placed in its layout, and no pending
  /// (unpatched) targets remain.
  pub fn validate(&self) -> Result<(), String> {
    for (gid, global) in self.globals.enum_iter() {
      let GlobalKind::Func { body: Some(body), .. } = &global.kind else { continue };
      let name = global.name;
      if body.layout.len() != body.blocks.len() {
        return Err(format!("{name}: {gid:?} has unplaced blocks"))
      }
      for &bid in &body.layout {
        let block = body.blocks.get(bid)
          .ok_or_else(|| format!("{name}: bogus block {bid:?} in layout"))?;
        let Some((&last, rest)) = block.insts.split_last() else {
          return Err(format!("{name}: block {bid:?} is empty"))
        };
        if !body.insts[last].op.is_terminator() {
          return Err(format!("{name}: block {bid:?} does not end in a terminator"))
        }
        if rest.iter().any(|&i| body.insts[i].op.is_terminator()) {
          return Err(format!("{name}: block {bid:?} has an interior terminator"))
        }
        for inst in block.insts.iter().map(|&i| &body.insts[i]) {
          for &tgt in &inst.blocks {
            if tgt == BlockId::PENDING {
              return Err(format!("{name}: unpatched branch in block {bid:?}"))
            }
            if body.blocks.get(tgt).is_none() || !body.layout.contains(&tgt) {
              return Err(format!("{name}: branch to unplaced block {tgt:?} in {bid:?}"))
            }
          }
        }
      }
    }
    Ok(())
  }
}

struct CurFunc {
  /// The global this body will be attached to; `None` for the constant
  /// evaluator's scratch function.
  global: Option<GlobalId>,
  body: FuncBody,
  cur_block: BlockId,
}

/// The IR builder: the translation unit under construction plus a stack of
/// in-progress function bodies (the real function, and above it any
/// scratch function the constant evaluator opens for `sizeof`).
#[derive(Default)]
pub struct Builder {
  /// The translation unit being built.
  pub unit: TransUnit,
  cur: Vec<CurFunc>,
}

impl Builder {
  fn top(&self) -> &CurFunc { self.cur.last().expect("not in a function") }
  fn top_mut(&mut self) -> &mut CurFunc { self.cur.last_mut().expect("not in a function") }

  /// The body of the function currently being built.
  #[must_use] pub fn body(&self) -> &FuncBody { &self.top().body }

  /// The current block, where new instructions are inserted.
  #[must_use] pub fn cur_block(&self) -> BlockId { self.top().cur_block }

  /// Move the insertion point to `block`.
  pub fn set_block(&mut self, block: BlockId) { self.top_mut().cur_block = block }

  /// Begin building the body of function `global`.
  pub fn enter_function(&mut self, global: GlobalId, sig: FnSig) {
    assert!(self.cur.is_empty(), "already building a function");
    self.cur.push(CurFunc {
      global: Some(global),
      body: FuncBody::new(sig),
      cur_block: BlockId::ENTRY,
    });
  }

  /// Finish the current function, attaching its body to its global.
  pub fn finish_function(&mut self) {
    let cur = self.cur.pop().expect("not in a function");
    let global = cur.global.expect("cannot finish a scratch function");
    let GlobalKind::Func { body, .. } = &mut self.unit.globals[global].kind else {
      panic!("global is not a function")
    };
    assert!(body.is_none(), "function already has a body");
    *body = Some(cur.body);
  }

  /// Open a scratch function for type-only lowering (`sizeof expr`).
  /// Everything emitted into it is discarded by [`Self::discard_scratch`].
  pub fn enter_scratch(&mut self) {
    self.cur.push(CurFunc {
      global: None,
      body: FuncBody::new(FnSig { params: Box::new([]), ret: IrType::Void, variadic: false }),
      cur_block: BlockId::ENTRY,
    });
  }

  /// Discard the scratch function opened by [`Self::enter_scratch`].
  pub fn discard_scratch(&mut self) {
    let cur = self.cur.pop().expect("not in a function");
    assert!(cur.global.is_none(), "discarding a real function");
  }

  /// True when the builder is inside some function (including scratch).
  #[must_use] pub fn in_function(&self) -> bool { !self.cur.is_empty() }

  /// A fingerprint of the current function's size, used by the constant
  /// evaluator to assert that evaluation emitted nothing.
  #[must_use] pub fn fingerprint(&self) -> (usize, usize) {
    let body = self.body();
    (body.blocks.len(), body.insts.len())
  }

  /// Allocate a new block and place it at the end of the layout.
  pub fn new_block(&mut self, name: &str) -> BlockId {
    let id = self.reserve_block(name);
    self.place_block(id);
    id
  }

  /// Allocate a block without placing it in the layout; used for blocks
  /// whose position is decided later (loop after-blocks, switch ladders).
  pub fn reserve_block(&mut self, name: &str) -> BlockId {
    self.top_mut().body.blocks.push(Block { name: name.into(), ..Block::default() })
  }

  /// Place a reserved block at the end of the layout.
  pub fn place_block(&mut self, block: BlockId) {
    let body = &mut self.top_mut().body;
    debug_assert!(!body.layout.contains(&block), "block placed twice");
    body.layout.push(block);
  }

  /// Place a reserved block at `pos` in the layout. Positions come from
  /// [`Self::layout_pos`], captured before the blocks to insert in front of
  /// were placed.
  pub fn place_block_at(&mut self, pos: usize, block: BlockId) {
    let body = &mut self.top_mut().body;
    debug_assert!(!body.layout.contains(&block), "block placed twice");
    body.layout.insert(pos, block);
  }

  /// The current end of the layout, as an insertion position.
  #[must_use] pub fn layout_pos(&self) -> usize { self.body().layout.len() }

  /// The type of a value in the current function.
  #[must_use] pub fn value_ty(&self, v: &Value) -> IrType { self.body().value_ty(v) }

  /// Emit an instruction into `block`.
  pub fn emit_in(&mut self, block: BlockId, op: Op, ty: IrType,
    args: impl IntoIterator<Item = Value>, blocks: impl IntoIterator<Item = BlockId>,
  ) -> InstId {
    let cur = self.top_mut();
    assert!(!cur.body.blocks[block].terminated, "emitting into a terminated block");
    let inst = cur.body.insts.push(Inst {
      op, ty,
      args: args.into_iter().collect(),
      blocks: blocks.into_iter().collect(),
    });
    cur.body.blocks[block].insts.push(inst);
    if op.is_terminator() { cur.body.blocks[block].terminated = true }
    inst
  }

  /// Emit an instruction into the current block.
  pub fn emit(&mut self, op: Op, ty: IrType,
    args: impl IntoIterator<Item = Value>, blocks: impl IntoIterator<Item = BlockId>,
  ) -> InstId {
    let block = self.cur_block();
    self.emit_in(block, op, ty, args, blocks)
  }

  /// True if the current block already has a terminator.
  #[must_use] pub fn cur_terminated(&self) -> bool {
    self.body().blocks[self.cur_block()].terminated
  }

  /// Allocate a stack slot of type `ty` in the current function; the
  /// result is its address.
  pub fn build_local(&mut self, ty: IrType) -> Value {
    Value::Inst(self.emit(Op::Local, ty, [], []))
  }

  /// Load a value of type `ty` from `ptr`.
  pub fn build_load(&mut self, ptr: Value, ty: IrType) -> Value {
    Value::Inst(self.emit(Op::Load, ty, [ptr], []))
  }

  /// Store `val` to `ptr`.
  pub fn build_store(&mut self, ptr: Value, val: Value) {
    self.emit(Op::Store, IrType::Void, [ptr, val], []);
  }

  /// Emit a binary arithmetic instruction.
  pub fn build_binary(&mut self, op: Op, ty: IrType, lhs: Value, rhs: Value) -> Value {
    Value::Inst(self.emit(op, ty, [lhs, rhs], []))
  }

  /// Emit a unary arithmetic instruction.
  pub fn build_unary(&mut self, op: Op, ty: IrType, arg: Value) -> Value {
    Value::Inst(self.emit(op, ty, [arg], []))
  }

  /// Emit a comparison; the result is a 0/1 `i32`.
  pub fn build_cmp(&mut self, cmp: Cmp, lhs: Value, rhs: Value) -> Value {
    Value::Inst(self.emit(Op::Cmp(cmp), IrType::I32, [lhs, rhs], []))
  }

  /// Emit a conversion (`cast`, `zext`, `sext`, or `trunc`) to `ty`, into
  /// the given block.
  pub fn build_conv_in(&mut self, block: BlockId, op: Op, val: Value, ty: IrType) -> Value {
    debug_assert!(matches!(op, Op::Cast | Op::Zext | Op::Sext | Op::Trunc));
    Value::Inst(self.emit_in(block, op, ty, [val], []))
  }

  /// Emit a conversion to `ty` in the current block.
  pub fn build_conv(&mut self, op: Op, val: Value, ty: IrType) -> Value {
    let block = self.cur_block();
    self.build_conv_in(block, op, val, ty)
  }

  /// Compute the address of field/element `index` of the aggregate of type
  /// `agg_ty` at `base`.
  pub fn build_field(&mut self, base: Value, agg_ty: IrType, index: u32) -> Value {
    Value::Inst(self.emit(Op::Field(index), agg_ty, [base], []))
  }

  /// Emit a call. `ret` is the return type.
  pub fn build_call(&mut self, callee: Value, ret: IrType,
    args: impl IntoIterator<Item = Value>,
  ) -> Value {
    let args = std::iter::once(callee).chain(args);
    Value::Inst(self.emit(Op::Call, ret, args, []))
  }

  /// Emit a phi joining `(predecessor, value)` pairs.
  pub fn build_phi(&mut self, ty: IrType,
    pairs: impl IntoIterator<Item = (BlockId, Value)>,
  ) -> Value {
    let (blocks, args): (SmallVec<[BlockId; 2]>, SmallVec<[Value; 2]>) =
      pairs.into_iter().unzip();
    Value::Inst(self.emit(Op::Phi, ty, args, blocks))
  }

  /// Emit an unconditional branch to `target`.
  pub fn build_branch(&mut self, target: BlockId) {
    self.emit(Op::Branch, IrType::Void, [], [target]);
  }

  /// Emit a branch whose target is not yet known, returning the
  /// instruction to patch.
  pub fn build_branch_pending(&mut self) -> InstId {
    self.emit(Op::Branch, IrType::Void, [], [BlockId::PENDING])
  }

  /// Patch a pending branch with its real target.
  pub fn patch_branch(&mut self, inst: InstId, target: BlockId) {
    let body = &mut self.top_mut().body;
    let i = &mut body.insts[inst];
    assert!(matches!(i.op, Op::Branch) && i.blocks[0] == BlockId::PENDING,
      "patching a non-pending branch");
    i.blocks[0] = target;
  }

  /// Emit a conditional branch on `cond`.
  pub fn build_cond(&mut self, cond: Value, then: BlockId, els: BlockId) {
    self.emit(Op::Cond, IrType::Void, [cond], [then, els]);
  }

  /// Emit a value return.
  pub fn build_ret(&mut self, val: Value) {
    self.emit(Op::Ret, IrType::Void, [val], []);
  }

  /// Emit a void return.
  pub fn build_ret_void(&mut self) {
    self.emit(Op::RetVoid, IrType::Void, [], []);
  }

  /// Emit the va_list initialization intrinsic on `ap`.
  pub fn build_va_start(&mut self, ap: Value) {
    self.emit(Op::VaStart, IrType::Void, [ap], []);
  }
}

impl fmt::Display for IrType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      IrType::Void => write!(f, "void"),
      IrType::I8 => write!(f, "i8"),
      IrType::I16 => write!(f, "i16"),
      IrType::I32 => write!(f, "i32"),
      IrType::I64 => write!(f, "i64"),
      IrType::Ptr => write!(f, "ptr"),
      IrType::Func => write!(f, "func"),
      IrType::Array(a) => write!(f, "[{} x {}]", a.elem, a.len),
      IrType::Record(r) => match r.name {
        Some(name) => write!(f, "%{name}"),
        None => write!(f, "%<anon>"),
      },
    }
  }
}

impl fmt::Display for Const {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Const::Int { ty, val } => write!(f, "{ty} {val}"),
      Const::Global(g) => write!(f, "@{}", g.0),
      Const::Array { elems, .. } =>
        write!(f, "[{}]", elems.iter().format(", ")),
      Const::Record { fields, .. } =>
        write!(f, "{{{}}}", fields.iter().format(", ")),
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Const(c) => c.fmt(f),
      Value::Global(g) => write!(f, "@{}", g.0),
      Value::Inst(i) => write!(f, "%{}", i.0),
      Value::Arg(i) => write!(f, "$arg{i}"),
    }
  }
}

impl fmt::Display for Op {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Op::Local => "local",
      Op::Load => "load",
      Op::Store => "store",
      Op::Field(_) => "field",
      Op::Cast => "cast",
      Op::Zext => "zext",
      Op::Sext => "sext",
      Op::Trunc => "trunc",
      Op::Neg => "neg",
      Op::BitNot => "bit_not",
      Op::Add => "add",
      Op::Sub => "sub",
      Op::Mul => "mul",
      Op::Div => "div",
      Op::Mod => "mod",
      Op::Shl => "shl",
      Op::Shr => "shr",
      Op::Sar => "sar",
      Op::BitAnd => "bit_and",
      Op::BitOr => "bit_or",
      Op::BitXor => "bit_xor",
      Op::Cmp(Cmp::Eq) => "cmp eq",
      Op::Cmp(Cmp::Ne) => "cmp ne",
      Op::Cmp(Cmp::Slt) => "cmp slt",
      Op::Cmp(Cmp::Sle) => "cmp sle",
      Op::Cmp(Cmp::Sgt) => "cmp sgt",
      Op::Cmp(Cmp::Sge) => "cmp sge",
      Op::Cmp(Cmp::Ult) => "cmp ult",
      Op::Cmp(Cmp::Ule) => "cmp ule",
      Op::Cmp(Cmp::Ugt) => "cmp ugt",
      Op::Cmp(Cmp::Uge) => "cmp uge",
      Op::Call => "call",
      Op::Phi => "phi",
      Op::Branch => "branch",
      Op::Cond => "cond",
      Op::Ret => "ret",
      Op::RetVoid => "ret_void",
      Op::VaStart => "builtin_va_start",
    };
    f.write_str(name)
  }
}

impl FuncBody {
  fn dump(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for &bid in &self.layout {
      let block = &self.blocks[bid];
      writeln!(f, "{}.{}:", block.name, bid.0)?;
      for &iid in &block.insts {
        let inst = &self.insts[iid];
        write!(f, "  %{} = {}", iid.0, inst.op)?;
        if let Op::Field(n) = inst.op { write!(f, " {n}")? }
        if inst.ty != IrType::Void { write!(f, " {}", inst.ty)? }
        for arg in &inst.args { write!(f, " {arg}")? }
        for tgt in &inst.blocks { write!(f, " ->{}", tgt.0)? }
        writeln!(f)?;
      }
    }
    Ok(())
  }
}

impl fmt::Display for TransUnit {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (gid, global) in self.globals.enum_iter() {
      let linkage = match global.linkage {
        Linkage::External => "",
        Linkage::Internal => "internal ",
      };
      match &global.kind {
        GlobalKind::Var { ty, init } => {
          write!(f, "{linkage}@{} = global {} {ty}", gid.0, global.name)?;
          match init {
            Some(c) => writeln!(f, " {c}")?,
            None => writeln!(f, " extern")?,
          }
        }
        GlobalKind::Func { sig, body } => {
          let variadic = if sig.variadic { ", ..." } else { "" };
          writeln!(f, "{linkage}@{} = func {} ({}{variadic}) -> {}",
            gid.0, global.name, sig.params.iter().format(", "), sig.ret)?;
          if let Some(body) = body { body.dump(f)? }
        }
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_const_covers_aggregates() {
    let arr = IrType::array(IrType::I32, 3);
    let Const::Array { elems, .. } = Const::zero(&arr) else { panic!() };
    assert_eq!(elems.len(), 3);
    assert!(elems.iter().all(|c| matches!(c, Const::Int { val: 0, .. })));
  }

  #[test]
  fn const_int_wraps_to_width() {
    let Const::Int { val, .. } = Const::int(IrType::I8, 0x1ff) else { panic!() };
    assert_eq!(val, 0xff);
  }

  #[test]
  fn builder_tracks_terminators() {
    let mut b = Builder::default();
    b.enter_scratch();
    assert!(!b.cur_terminated());
    b.build_ret_void();
    assert!(b.cur_terminated());
    b.discard_scratch();
  }

  #[test]
  fn validate_rejects_unterminated_blocks() {
    let mut b = Builder::default();
    let name = crate::intern("f");
    let sig = FnSig { params: Box::new([]), ret: IrType::Void, variadic: false };
    let g = b.unit.add_func(name, Linkage::External, sig.clone());
    b.enter_function(g, sig);
    b.build_local(IrType::I32);
    b.finish_function();
    assert!(b.unit.validate().is_err());
  }
}
