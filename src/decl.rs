//! The declarator resolver: declaration-specifier lists plus declarator
//! trees become `(name, type)` pairs, following C's inside-out reading
//! rules. Storage-class and function specifiers are stripped into a flag
//! set for the caller; type specifiers may have side effects (defining a
//! struct/union tag, binding enumerators) that happen here.

use arrayvec::ArrayVec;
use bitflags::bitflags;
use num::ToPrimitive;

use crate::{ErrorKind, Result, Symbol};
use crate::build_ir::{Binding, IrGen};
use crate::types::Span;
use crate::types::ast::*;
use crate::types::ir::{Const, IrType, Value};
use crate::types::ty::{TypeEnv, TypeId};

bitflags! {
  /// The storage-class and function specifiers stripped from a
  /// declaration. `auto` and `register` are accepted and dropped.
  #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
  pub(crate) struct SpecFlags: u8 {
    /// `typedef`
    const TYPEDEF = 1 << 0;
    /// `extern`
    const EXTERN = 1 << 1;
    /// `static`
    const STATIC = 1 << 2;
    /// `inline`
    const INLINE = 1 << 3;
  }
}

/// The result of resolving one declarator against a base type.
pub(crate) struct DeclInfo {
  /// The declared name; `None` for abstract declarators.
  pub(crate) name: Option<Symbol>,
  /// The declared type.
  pub(crate) ty: TypeId,
  /// For function declarators, the parameter names and adjusted types of
  /// the function the name declares (the innermost function wrapper).
  pub(crate) fn_params: Option<Vec<(Option<Symbol>, TypeId)>>,
}

impl<'a> IrGen<'a> {
  /// Split a specifier list into flags and a base type. Record and enum
  /// specifiers take effect here: tags are registered or completed,
  /// enumerators are bound in the current scope.
  pub(crate) fn resolve_specifiers(&mut self, specs: &'a [DeclSpec<'a>], span: Span)
    -> Result<(SpecFlags, TypeId)> {
    let mut flags = SpecFlags::default();
    let mut names = ArrayVec::<Symbol, 4>::new();
    let mut tagged: Option<&'a TypeSpecifier<'a>> = None;
    for spec in specs {
      match *spec {
        DeclSpec::Storage(StorageClass::Typedef) => flags |= SpecFlags::TYPEDEF,
        DeclSpec::Storage(StorageClass::Extern) => flags |= SpecFlags::EXTERN,
        DeclSpec::Storage(StorageClass::Static) => flags |= SpecFlags::STATIC,
        DeclSpec::Storage(StorageClass::Auto | StorageClass::Register) => {}
        DeclSpec::Function(FunctionSpecifier::Inline) => flags |= SpecFlags::INLINE,
        DeclSpec::Type(ts) => match &ts.k {
          TypeSpecifierKind::Named(name) => names.try_push(*name)
            .map_err(|_| ErrorKind::TypeMismatch("too many type specifiers").at(ts.span))?,
          TypeSpecifierKind::Record(_) | TypeSpecifierKind::Enum(_) => {
            if tagged.replace(ts).is_some() {
              return Err(ErrorKind::TypeMismatch("multiple tagged type specifiers").at(ts.span))
            }
          }
        },
      }
    }
    let base = match tagged {
      Some(ts) => {
        if !names.is_empty() {
          return Err(ErrorKind::TypeMismatch("mixed type specifiers").at(ts.span))
        }
        match &ts.k {
          TypeSpecifierKind::Record(rs) => self.resolve_record_specifier(rs, ts.span)?,
          TypeSpecifierKind::Enum(es) => self.resolve_enum_specifier(es, ts.span)?,
          TypeSpecifierKind::Named(_) => unreachable!(),
        }
      }
      None => {
        if names.is_empty() {
          return Err(ErrorKind::TypeMismatch("missing type specifier").at(span))
        }
        let strs: ArrayVec<&str, 4> = names.iter().map(|n| n.as_str()).collect();
        match TypeEnv::named_type_specifier(&strs) {
          Some(ty) => ty,
          None if names.len() == 1 => {
            let name = names[0];
            *self.types.typedefs.get(&name)
              .ok_or_else(|| ErrorKind::UnknownType(name).at(span))?
          }
          None => return Err(ErrorKind::UnknownType(names[0]).at(span)),
        }
      }
    };
    Ok((flags, base))
  }

  fn resolve_record_specifier(&mut self, rs: &'a RecordSpecifier<'a>, span: Span)
    -> Result<TypeId> {
    let Some(field_decls) = &rs.fields else {
      let Some(tag) = rs.tag else {
        return Err(ErrorKind::TypeMismatch("record specifier needs a tag or a body").at(span))
      };
      return Ok(self.types.declare_record(tag, rs.is_union))
    };
    let mut fields = Vec::new();
    for fd in field_decls {
      let (fflags, fbase) = self.resolve_specifiers(&fd.specifiers, span)?;
      if !fflags.is_empty() {
        return Err(ErrorKind::TypeMismatch("storage class on a field").at(span))
      }
      for fdecl in &fd.declarators {
        if fdecl.bit_width.is_some() {
          return Err(ErrorKind::Unsupported("bit-fields").at(span))
        }
        let info = self.resolve_declarator(fbase, fdecl.declarator, span)?;
        let name = info.name
          .ok_or_else(|| ErrorKind::TypeMismatch("unnamed field").at(span))?;
        fields.push((name, info.ty));
      }
    }
    self.types.define_record(rs.tag, rs.is_union, rs.packed, fields)
      .map_err(|k| k.at(span))
  }

  /// Enum definitions assign each enumerator a value (the explicit
  /// constant, else previous+1 starting from 0) and bind it in the current
  /// scope as an `int` constant. The enum type itself is `int`.
  fn resolve_enum_specifier(&mut self, es: &'a EnumSpecifier<'a>, span: Span)
    -> Result<TypeId> {
    let Some(enumerators) = &es.enumerators else {
      let Some(tag) = es.tag else {
        return Err(ErrorKind::TypeMismatch("enum specifier needs a tag or a body").at(span))
      };
      return match self.types.enum_tags.get(&tag) {
        Some(&ty) => Ok(ty),
        None => Err(ErrorKind::UnknownType(tag).at(span)),
      }
    };
    let mut next = 0i64;
    for en in enumerators {
      let value = match en.value {
        Some(e) => {
          let (_, big) = self.eval_const_int(e)?;
          big.to_i64().ok_or_else(|| ErrorKind::BadConstExpr.at(e.span))?
        }
        None => next,
      };
      next = value.wrapping_add(1);
      self.bind(Binding {
        name: en.name,
        ty: TypeId::INT,
        value: Value::Const(Const::int(IrType::I32, value as u64)),
        constant: true,
      });
    }
    if let Some(tag) = es.tag { self.types.enum_tags.insert(tag, TypeId::INT); }
    Ok(TypeId::INT)
  }

  /// Fold a declarator around a base type, from the outside in: pointer
  /// layers wrap the running type, array and function wrappers derive it,
  /// and the identifier (or abstract hole) at the center names the result.
  pub(crate) fn resolve_declarator(&mut self, base: TypeId, d: &'a Declarator<'a>, span: Span)
    -> Result<DeclInfo> {
    match *d {
      Declarator::Pointer(inner) => {
        let ptr = self.types.make_pointer(base);
        self.resolve_declarator(ptr, inner, span)
      }
      Declarator::Direct(dd) => self.resolve_direct(base, dd, span),
    }
  }

  fn resolve_direct(&mut self, base: TypeId, dd: &'a DirectDeclarator<'a>, span: Span)
    -> Result<DeclInfo> {
    match dd {
      DirectDeclarator::Ident(name) =>
        Ok(DeclInfo { name: Some(*name), ty: base, fn_params: None }),
      DirectDeclarator::Abstract =>
        Ok(DeclInfo { name: None, ty: base, fn_params: None }),
      DirectDeclarator::Paren(inner) => self.resolve_declarator(base, inner, span),
      DirectDeclarator::Array { elem, len } => {
        let len = match len {
          Some(e) => Some(self.eval_const_index(e)?),
          None => None,
        };
        if self.types.size(base).is_none() {
          return Err(ErrorKind::IncompleteType.at(span))
        }
        let arr = self.types.make_array(base, len);
        self.resolve_direct(arr, elem, span)
      }
      DirectDeclarator::Function { inner, params, variadic } => {
        let mut ptys = Vec::with_capacity(params.len());
        let mut pinfos = Vec::with_capacity(params.len());
        for p in params {
          let (name, ty) = self.resolve_param(p, span)?;
          ptys.push(ty);
          pinfos.push((name, ty));
        }
        // a single unnamed `void` parameter means no parameters at all
        if let [(None, ty)] = pinfos.as_slice() {
          if *ty == TypeId::VOID {
            ptys.clear();
            pinfos.clear();
          }
        }
        let fnty = self.types.make_function(base, ptys.into_boxed_slice(), *variadic);
        let mut info = self.resolve_direct(fnty, inner, span)?;
        // the innermost function wrapper is the one the name declares;
        // it set `fn_params` first, so only fill the empty case
        if info.fn_params.is_none() { info.fn_params = Some(pinfos) }
        Ok(info)
      }
    }
  }

  /// Resolve one parameter declaration, applying the parameter-position
  /// adjustments: arrays decay to pointers, function types become function
  /// pointers.
  fn resolve_param(&mut self, p: &'a ParamDecl<'a>, span: Span)
    -> Result<(Option<Symbol>, TypeId)> {
    let (flags, base) = self.resolve_specifiers(&p.specifiers, span)?;
    if flags.intersects(SpecFlags::TYPEDEF | SpecFlags::EXTERN | SpecFlags::STATIC) {
      return Err(ErrorKind::TypeMismatch("storage class on a parameter").at(span))
    }
    let info = match p.declarator {
      Some(d) => self.resolve_declarator(base, d, span)?,
      None => DeclInfo { name: None, ty: base, fn_params: None },
    };
    let ty = if let Some((elem, _)) = self.types.as_array(info.ty) {
      self.types.make_pointer(elem)
    } else if self.types.as_function(info.ty).is_some() {
      self.types.make_pointer(info.ty)
    } else {
      info.ty
    };
    Ok((info.name, ty))
  }

  /// Resolve a type name (casts, `sizeof`, compound literals,
  /// `__builtin_va_arg`).
  pub(crate) fn resolve_type_name(&mut self, tn: &'a TypeName<'a>) -> Result<TypeId> {
    let span = tn.specifiers.iter().find_map(|s| {
      if let DeclSpec::Type(ts) = s { Some(ts.span) } else { None }
    }).unwrap_or_default();
    let (_, base) = self.resolve_specifiers(&tn.specifiers, span)?;
    match tn.declarator {
      Some(d) => Ok(self.resolve_declarator(base, d, span)?.ty),
      None => Ok(base),
    }
  }
}
