//! The C type representation and the type environment.
//!
//! Types live in a growable store addressed by [`TypeId`]; this gives the
//! aliasing structure C needs (a struct can contain a pointer to itself, an
//! incomplete type can be completed after references to it exist) without
//! per-node ownership. Canonical built-ins occupy fixed ids at the front of
//! the store, so two built-ins are equal exactly when their ids are equal.

use std::rc::Rc;
use hashbrown::HashMap;
use crate::{ErrorKind, Symbol};
use super::{IdxVec, IntRank, IntTy, mk_id};
use super::ir::{IrRecord, IrRecordField, IrType};

mk_id! {
  /// An index into the type store.
  TypeId,
}

impl TypeId {
  /// `void`
  pub const VOID: Self = Self(0);
  /// `char` (signed on this target)
  pub const CHAR: Self = Self(1);
  /// `unsigned char`
  pub const UCHAR: Self = Self(2);
  /// `short`
  pub const SHORT: Self = Self(3);
  /// `unsigned short`
  pub const USHORT: Self = Self(4);
  /// `int`
  pub const INT: Self = Self(5);
  /// `unsigned int`
  pub const UINT: Self = Self(6);
  /// `long`
  pub const LONG: Self = Self(7);
  /// `unsigned long`
  pub const ULONG: Self = Self(8);
  /// `long long`
  pub const LONGLONG: Self = Self(9);
  /// `unsigned long long`
  pub const ULONGLONG: Self = Self(10);
  /// The designated pointer-sized integer type.
  pub const PTR_INT: Self = Self::LONG;
  /// The designated size type, the type of `sizeof`.
  pub const SIZE: Self = Self::ULONG;
}

/// One field of a struct or union, with its computed byte offset.
#[derive(Copy, Clone, Debug)]
pub struct Field {
  /// The field name.
  pub name: Symbol,
  /// The field type.
  pub ty: TypeId,
  /// The byte offset of the field within the record.
  pub offset: u64,
}

/// The body of a struct or union type.
#[derive(Debug)]
pub struct RecordData {
  /// The tag, if the record was declared with one.
  pub tag: Option<Symbol>,
  /// True for unions.
  pub is_union: bool,
  /// True if the record is packed: alignment 1 and no padding.
  pub packed: bool,
  /// True once the body has been seen. Incomplete records may be pointed
  /// to but not sized.
  pub complete: bool,
  /// The fields in declaration order (empty while incomplete).
  pub fields: Vec<Field>,
  /// The total size in bytes.
  pub size: u64,
  /// The alignment in bytes.
  pub align: u64,
  /// The mirror IR type, present once complete.
  pub ir: Option<IrType>,
}

/// The signature part of a function type.
#[derive(Debug, PartialEq, Eq)]
pub struct FnData {
  /// The return type.
  pub ret: TypeId,
  /// The parameter types, after array/function decay.
  pub params: Box<[TypeId]>,
  /// True if the parameter list ends in `...`.
  pub variadic: bool,
}

/// An array type. `len` is `None` while the length is still unknown
/// (`int a[] = {...}` before inference completes it).
#[derive(Debug)]
pub struct ArrayData {
  /// The element type.
  pub elem: TypeId,
  /// The number of elements, once known.
  pub len: Option<u64>,
  /// The mirror IR array type (flattened if the element is itself an
  /// array), present once the length is known.
  pub ir: Option<IrType>,
}

/// The discriminated C type value.
#[derive(Debug)]
pub enum CTypeKind {
  /// `void`
  Void,
  /// An integer type. Enum types are represented directly as `int`.
  Int(IntTy),
  /// A pointer type. Constructed only through [`TypeEnv::make_pointer`],
  /// which canonicalizes per pointee.
  Pointer(TypeId),
  /// An array type.
  Array(ArrayData),
  /// A function type.
  Function(Rc<FnData>),
  /// A struct or union type.
  Record(RecordData),
}

#[derive(Debug)]
struct TypeData {
  kind: CTypeKind,
  /// The canonical pointer-to-this, once constructed.
  ptr_to: Option<TypeId>,
}

/// The type environment: the type store plus the four tag/typedef
/// namespaces. Struct, union and enum tags and typedef names are disjoint
/// namespaces; typedefs are flat across the translation unit.
pub struct TypeEnv {
  types: IdxVec<TypeId, TypeData>,
  /// `struct` tags.
  pub struct_tags: HashMap<Symbol, TypeId>,
  /// `union` tags.
  pub union_tags: HashMap<Symbol, TypeId>,
  /// `enum` tags. Enum types behave as `int`, so these all map to ids of
  /// integer type.
  pub enum_tags: HashMap<Symbol, TypeId>,
  /// `typedef` names.
  pub typedefs: HashMap<Symbol, TypeId>,
}

fn align_to(n: u64, align: u64) -> u64 { n.div_ceil(align) * align }

impl Default for TypeEnv {
  fn default() -> Self { Self::new() }
}

impl TypeEnv {
  /// Construct a type environment preloaded with the built-in types at
  /// their fixed ids.
  #[must_use] pub fn new() -> Self {
    let mut types = IdxVec::new();
    let mut push = |kind| { types.push(TypeData { kind, ptr_to: None }); };
    push(CTypeKind::Void);
    for ity in [IntTy::CHAR, IntTy::UCHAR, IntTy::SHORT, IntTy::USHORT,
        IntTy::INT, IntTy::UINT, IntTy::LONG, IntTy::ULONG,
        IntTy::LONGLONG, IntTy::ULONGLONG] {
      push(CTypeKind::Int(ity));
    }
    Self {
      types,
      struct_tags: HashMap::new(),
      union_tags: HashMap::new(),
      enum_tags: HashMap::new(),
      typedefs: HashMap::new(),
    }
  }

  /// The kind of a type.
  #[must_use] pub fn kind(&self, ty: TypeId) -> &CTypeKind { &self.types[ty].kind }

  /// The built-in id for an integer type.
  #[must_use] pub fn int_id(ity: IntTy) -> TypeId {
    let base = match ity.rank {
      IntRank::Char => TypeId::CHAR,
      IntRank::Short => TypeId::SHORT,
      IntRank::Int => TypeId::INT,
      IntRank::Long => TypeId::LONG,
      IntRank::LongLong => TypeId::LONGLONG,
    };
    if ity.signed { base } else { TypeId(base.0 + 1) }
  }

  /// If `ty` is an integer type, its rank and signedness.
  #[must_use] pub fn as_int(&self, ty: TypeId) -> Option<IntTy> {
    if let CTypeKind::Int(ity) = *self.kind(ty) { Some(ity) } else { None }
  }

  /// True if `ty` is an integer type.
  #[must_use] pub fn is_integer(&self, ty: TypeId) -> bool {
    matches!(self.kind(ty), CTypeKind::Int(_))
  }

  /// True if `ty` is a pointer type.
  #[must_use] pub fn is_pointer(&self, ty: TypeId) -> bool {
    matches!(self.kind(ty), CTypeKind::Pointer(_))
  }

  /// If `ty` is a pointer type, its pointee.
  #[must_use] pub fn pointee(&self, ty: TypeId) -> Option<TypeId> {
    if let CTypeKind::Pointer(p) = *self.kind(ty) { Some(p) } else { None }
  }

  /// True if `ty` is a struct, union, or array type, the types whose
  /// r-values are represented by their address.
  #[must_use] pub fn is_aggregate(&self, ty: TypeId) -> bool {
    matches!(self.kind(ty), CTypeKind::Record(_) | CTypeKind::Array(_))
  }

  /// If `ty` is a function type, its signature.
  #[must_use] pub fn as_function(&self, ty: TypeId) -> Option<Rc<FnData>> {
    if let CTypeKind::Function(f) = self.kind(ty) { Some(f.clone()) } else { None }
  }

  /// If `ty` is an array type, its element type and length.
  #[must_use] pub fn as_array(&self, ty: TypeId) -> Option<(TypeId, Option<u64>)> {
    if let CTypeKind::Array(a) = self.kind(ty) { Some((a.elem, a.len)) } else { None }
  }

  /// The canonical pointer-to-`ty`, constructing and caching it if this is
  /// the first request.
  pub fn make_pointer(&mut self, ty: TypeId) -> TypeId {
    if let Some(p) = self.types[ty].ptr_to { return p }
    let p = self.types.push(TypeData { kind: CTypeKind::Pointer(ty), ptr_to: None });
    self.types[ty].ptr_to = Some(p);
    p
  }

  /// A fresh array type. The mirror IR type is computed when the length is
  /// known; nested arrays flatten into the innermost non-array element.
  pub fn make_array(&mut self, elem: TypeId, len: Option<u64>) -> TypeId {
    let ir = len.map(|n| self.array_ir(elem, n));
    self.types.push(TypeData {
      kind: CTypeKind::Array(ArrayData { elem, len, ir }),
      ptr_to: None,
    })
  }

  /// Complete an incomplete array type with its inferred length.
  pub fn set_array_len(&mut self, ty: TypeId, len: u64) {
    let CTypeKind::Array(a) = &self.types[ty].kind else { panic!("not an array") };
    assert!(a.len.is_none(), "array already sized");
    let elem = a.elem;
    let ir = self.array_ir(elem, len);
    let CTypeKind::Array(a) = &mut self.types[ty].kind else { unreachable!() };
    a.len = Some(len);
    a.ir = Some(ir);
  }

  fn array_ir(&self, elem: TypeId, mut len: u64) -> IrType {
    let mut elem_ir = self.to_ir(elem);
    if let IrType::Array(inner) = &elem_ir {
      len *= inner.len;
      elem_ir = inner.elem.clone();
    }
    IrType::array(elem_ir, len)
  }

  /// A fresh function type.
  pub fn make_function(&mut self, ret: TypeId, params: Box<[TypeId]>, variadic: bool) -> TypeId {
    self.types.push(TypeData {
      kind: CTypeKind::Function(Rc::new(FnData { ret, params, variadic })),
      ptr_to: None,
    })
  }

  /// Look up or create the incomplete record for a bodyless
  /// `struct tag` / `union tag` reference.
  pub fn declare_record(&mut self, tag: Symbol, is_union: bool) -> TypeId {
    let tags = if is_union { &mut self.union_tags } else { &mut self.struct_tags };
    if let Some(&ty) = tags.get(&tag) { return ty }
    let ty = self.types.push(TypeData {
      kind: CTypeKind::Record(RecordData {
        tag: Some(tag), is_union, packed: false, complete: false,
        fields: vec![], size: 0, align: 1, ir: None,
      }),
      ptr_to: None,
    });
    if is_union { self.union_tags.insert(tag, ty); }
    else { self.struct_tags.insert(tag, ty); }
    ty
  }

  /// Define (or complete) a struct or union. Completion mutates the stored
  /// type in place, so pointers constructed to the incomplete record
  /// observe the body. Redefining a completed tag is an error.
  pub fn define_record(&mut self, tag: Option<Symbol>, is_union: bool, packed: bool,
    fields: Vec<(Symbol, TypeId)>,
  ) -> Result<TypeId, ErrorKind> {
    let ty = match tag {
      Some(tag) => {
        let ty = self.declare_record(tag, is_union);
        let CTypeKind::Record(rec) = self.kind(ty) else { unreachable!() };
        if rec.complete { return Err(ErrorKind::RecordRedefinition(tag)) }
        ty
      }
      None => self.types.push(TypeData {
        kind: CTypeKind::Record(RecordData {
          tag: None, is_union, packed: false, complete: false,
          fields: vec![], size: 0, align: 1, ir: None,
        }),
        ptr_to: None,
      }),
    };

    let mut laid = Vec::with_capacity(fields.len());
    let mut offset = 0;
    let mut max_size = 0;
    let mut align = 1;
    let mut ir_fields = Vec::with_capacity(fields.len());
    for (name, fty) in fields {
      let field_size = self.size(fty).ok_or(ErrorKind::IncompleteType)?;
      let field_align = if packed { 1 } else { self.align(fty).ok_or(ErrorKind::IncompleteType)? };
      align = align.max(field_align);
      let field_offset = if is_union { 0 } else { align_to(offset, field_align) };
      laid.push(Field { name, ty: fty, offset: field_offset });
      ir_fields.push(IrRecordField { ty: self.to_ir(fty), offset: field_offset });
      offset = field_offset + field_size;
      max_size = max_size.max(field_size);
    }
    let size = align_to(if is_union { max_size } else { offset }, align);

    let ir = IrType::Record(Rc::new(IrRecord {
      name: tag,
      fields: ir_fields.into_boxed_slice(),
      size,
      align,
    }));
    let CTypeKind::Record(rec) = &mut self.types[ty].kind else { unreachable!() };
    rec.packed = packed;
    rec.complete = true;
    rec.fields = laid;
    rec.size = size;
    rec.align = align;
    rec.ir = Some(ir);
    Ok(ty)
  }

  /// Look up a field of a record by name, returning its index and data.
  #[must_use] pub fn record_field(&self, ty: TypeId, name: Symbol) -> Option<(u32, Field)> {
    let CTypeKind::Record(rec) = self.kind(ty) else { return None };
    rec.fields.iter().enumerate()
      .find(|(_, f)| f.name == name)
      .map(|(i, f)| (i as u32, *f))
  }

  /// The number of fields of a complete record.
  #[must_use] pub fn record_field_count(&self, ty: TypeId) -> Option<usize> {
    let CTypeKind::Record(rec) = self.kind(ty) else { return None };
    if rec.complete { Some(rec.fields.len()) } else { None }
  }

  /// The `i`th field of a record.
  #[must_use] pub fn record_field_at(&self, ty: TypeId, i: usize) -> Option<Field> {
    let CTypeKind::Record(rec) = self.kind(ty) else { return None };
    rec.fields.get(i).copied()
  }

  /// Array-to-pointer decay; other types pass through. (Function types
  /// decay separately, at the points of assignment, passing, and
  /// comparison.)
  pub fn decay(&mut self, ty: TypeId) -> TypeId {
    match self.as_array(ty) {
      Some((elem, _)) => self.make_pointer(elem),
      None => ty,
    }
  }

  /// The size in bytes of a type, if it is complete.
  #[must_use] pub fn size(&self, ty: TypeId) -> Option<u64> {
    match self.kind(ty) {
      CTypeKind::Void | CTypeKind::Function(_) => None,
      CTypeKind::Int(ity) => Some(ity.size()),
      CTypeKind::Pointer(_) => Some(8),
      CTypeKind::Array(a) => Some(self.size(a.elem)? * a.len?),
      CTypeKind::Record(rec) => rec.complete.then_some(rec.size),
    }
  }

  /// The alignment in bytes of a type, if it is complete.
  #[must_use] pub fn align(&self, ty: TypeId) -> Option<u64> {
    match self.kind(ty) {
      CTypeKind::Void | CTypeKind::Function(_) => None,
      CTypeKind::Int(ity) => Some(ity.align()),
      CTypeKind::Pointer(_) => Some(8),
      CTypeKind::Array(a) => self.align(a.elem),
      CTypeKind::Record(rec) => rec.complete.then_some(rec.align),
    }
  }

  /// The IR mirror of a C type. Incomplete records and unsized arrays have
  /// no IR mirror and may not reach here.
  #[must_use] pub fn to_ir(&self, ty: TypeId) -> IrType {
    match self.kind(ty) {
      CTypeKind::Void => IrType::Void,
      CTypeKind::Int(ity) => IrType::int(ity.rank),
      CTypeKind::Pointer(_) => IrType::Ptr,
      CTypeKind::Function(_) => IrType::Func,
      CTypeKind::Array(a) => a.ir.clone().expect("unsized array has no IR type"),
      CTypeKind::Record(rec) => rec.ir.clone().expect("incomplete record has no IR type"),
    }
  }

  /// Map a base-type keyword sequence to a built-in type. Returns `None`
  /// if the sequence is not one of the recognized spellings, in which case
  /// the caller falls back to the typedef namespace.
  #[must_use] pub fn named_type_specifier(names: &[&str]) -> Option<TypeId> {
    if names.is_empty() { return None }
    if names == ["void"] { return Some(TypeId::VOID) }
    let mut signed = None;
    let mut longs = 0u32;
    let mut short = false;
    let mut base = None;
    for &name in names {
      match name {
        "signed" if signed.is_none() => signed = Some(true),
        "unsigned" if signed.is_none() => signed = Some(false),
        "long" if longs < 2 && !short => longs += 1,
        "short" if longs == 0 && !short => short = true,
        "char" | "int" if base.is_none() => base = Some(name),
        _ => return None,
      }
    }
    let rank = if base == Some("char") {
      if short || longs > 0 { return None }
      IntRank::Char
    } else if short {
      IntRank::Short
    } else {
      match longs {
        0 if base.is_none() && signed.is_none() => return None,
        0 => IntRank::Int,
        1 => IntRank::Long,
        _ => IntRank::LongLong,
      }
    };
    Some(Self::int_id(IntTy { rank, signed: signed.unwrap_or(true) }))
  }
}

#[cfg(test)]
mod tests {
  use crate::intern;
  use super::*;

  #[test]
  fn pointer_types_are_canonical() {
    let mut env = TypeEnv::new();
    let p1 = env.make_pointer(TypeId::INT);
    let p2 = env.make_pointer(TypeId::INT);
    assert_eq!(p1, p2);
    let pp = env.make_pointer(p1);
    assert_ne!(p1, pp);
    assert_eq!(env.pointee(pp), Some(p1));
  }

  #[test]
  fn struct_layout_is_idempotent() {
    let fields = || vec![
      (intern("c"), TypeId::CHAR),
      (intern("x"), TypeId::INT),
      (intern("p"), TypeId::LONG),
    ];
    let mut env1 = TypeEnv::new();
    let s1 = env1.define_record(None, false, false, fields()).unwrap();
    let mut env2 = TypeEnv::new();
    let s2 = env2.define_record(None, false, false, fields()).unwrap();
    for i in 0..3 {
      assert_eq!(
        env1.record_field_at(s1, i).unwrap().offset,
        env2.record_field_at(s2, i).unwrap().offset,
      );
    }
    // char at 0, int aligned to 4, long aligned to 8
    assert_eq!(env1.record_field_at(s1, 0).unwrap().offset, 0);
    assert_eq!(env1.record_field_at(s1, 1).unwrap().offset, 4);
    assert_eq!(env1.record_field_at(s1, 2).unwrap().offset, 8);
    assert_eq!(env1.size(s1), Some(16));
    assert_eq!(env1.align(s1), Some(8));
  }

  #[test]
  fn packed_struct_has_no_padding() {
    let mut env = TypeEnv::new();
    let s = env.define_record(None, false, true, vec![
      (intern("c"), TypeId::CHAR),
      (intern("x"), TypeId::INT),
    ]).unwrap();
    assert_eq!(env.record_field_at(s, 1).unwrap().offset, 1);
    assert_eq!(env.size(s), Some(5));
    assert_eq!(env.align(s), Some(1));
  }

  #[test]
  fn union_layout_overlaps() {
    let mut env = TypeEnv::new();
    let u = env.define_record(None, true, false, vec![
      (intern("c"), TypeId::CHAR),
      (intern("x"), TypeId::LONG),
    ]).unwrap();
    assert_eq!(env.record_field_at(u, 0).unwrap().offset, 0);
    assert_eq!(env.record_field_at(u, 1).unwrap().offset, 0);
    assert_eq!(env.size(u), Some(8));
  }

  #[test]
  fn record_redefinition_is_an_error() {
    let mut env = TypeEnv::new();
    let tag = intern("S");
    env.define_record(Some(tag), false, false, vec![(intern("a"), TypeId::INT)]).unwrap();
    assert!(matches!(
      env.define_record(Some(tag), false, false, vec![(intern("a"), TypeId::INT)]),
      Err(ErrorKind::RecordRedefinition(_)),
    ));
  }

  #[test]
  fn incomplete_record_completes_in_place() {
    let mut env = TypeEnv::new();
    let tag = intern("node");
    let fwd = env.declare_record(tag, false);
    let self_ptr = env.make_pointer(fwd);
    let done = env.define_record(Some(tag), false, false, vec![
      (intern("val"), TypeId::INT),
      (intern("next"), self_ptr),
    ]).unwrap();
    assert_eq!(fwd, done);
    assert_eq!(env.size(fwd), Some(16));
  }

  #[test]
  fn named_specifier_sequences() {
    assert_eq!(TypeEnv::named_type_specifier(&["void"]), Some(TypeId::VOID));
    assert_eq!(TypeEnv::named_type_specifier(&["char"]), Some(TypeId::CHAR));
    assert_eq!(TypeEnv::named_type_specifier(&["signed", "char"]), Some(TypeId::CHAR));
    assert_eq!(TypeEnv::named_type_specifier(&["unsigned", "char"]), Some(TypeId::UCHAR));
    assert_eq!(TypeEnv::named_type_specifier(&["short", "int"]), Some(TypeId::SHORT));
    assert_eq!(TypeEnv::named_type_specifier(&["int"]), Some(TypeId::INT));
    assert_eq!(TypeEnv::named_type_specifier(&["signed"]), Some(TypeId::INT));
    assert_eq!(TypeEnv::named_type_specifier(&["unsigned"]), Some(TypeId::UINT));
    assert_eq!(TypeEnv::named_type_specifier(&["long", "int"]), Some(TypeId::LONG));
    assert_eq!(TypeEnv::named_type_specifier(&["unsigned", "long", "long"]),
      Some(TypeId::ULONGLONG));
    assert_eq!(TypeEnv::named_type_specifier(&["long", "long", "int"]),
      Some(TypeId::LONGLONG));
    assert_eq!(TypeEnv::named_type_specifier(&["mytype"]), None);
    assert_eq!(TypeEnv::named_type_specifier(&["short", "char"]), None);
  }

  #[test]
  fn array_ir_mirror_flattens() {
    let mut env = TypeEnv::new();
    let inner = env.make_array(TypeId::INT, Some(4));
    let outer = env.make_array(inner, Some(3));
    assert_eq!(env.size(outer), Some(48));
    let IrType::Array(arr) = env.to_ir(outer) else { panic!("expected array") };
    assert_eq!(arr.len, 12);
    assert_eq!(arr.elem, IrType::I32);
  }
}
