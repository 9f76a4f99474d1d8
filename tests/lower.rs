//! End-to-end lowering tests: ASTs are built the way the parser would
//! build them, lowered, and the resulting IR is checked structurally.

use pretty_assertions::assert_eq;

use cir::types::Span;
use cir::types::ast::*;
use cir::types::ir::{
  BlockId, Const, FuncBody, GlobalKind, Inst, IrType, Op, TransUnit, Value,
};
use cir::{ErrorKind, intern, lower_unit};

const SP: Span = Span::new(0, 0);

fn num<'a>(a: &'a AstArena<'a>, n: u64) -> &'a Expr<'a> {
  a.expr(SP, ExprKind::Int(IntLit::dec(n)))
}

fn var<'a>(a: &'a AstArena<'a>, name: &str) -> &'a Expr<'a> {
  a.expr(SP, ExprKind::Ident(intern(name)))
}

fn bin<'a>(a: &'a AstArena<'a>, op: BinaryOp, l: &'a Expr<'a>, r: &'a Expr<'a>)
  -> &'a Expr<'a> {
  a.expr(SP, ExprKind::Binary(op, l, r))
}

fn ts<'a>(a: &'a AstArena<'a>, kw: &str) -> DeclSpec<'a> {
  DeclSpec::Type(a.type_specifier(SP, TypeSpecifierKind::Named(intern(kw))))
}

fn param<'a>(a: &'a AstArena<'a>, kw: &str, d: Option<&'a Declarator<'a>>) -> ParamDecl<'a> {
  ParamDecl { specifiers: vec![ts(a, kw)], declarator: d }
}

fn void_params<'a>(a: &'a AstArena<'a>) -> Vec<ParamDecl<'a>> {
  vec![param(a, "void", None)]
}

fn fn_declarator<'a>(a: &'a AstArena<'a>, name: &str, params: Vec<ParamDecl<'a>>)
  -> &'a Declarator<'a> {
  a.declarator(Declarator::Direct(a.direct(DirectDeclarator::Function {
    inner: a.direct(DirectDeclarator::Ident(intern(name))),
    params,
    variadic: false,
  })))
}

fn fn_def<'a>(a: &'a AstArena<'a>, specifiers: Vec<DeclSpec<'a>>, name: &str,
  params: Vec<ParamDecl<'a>>, items: Vec<BlockItem<'a>>) -> ExternalDecl<'a> {
  ExternalDecl::FunctionDef(a.function_def(FunctionDef {
    span: SP,
    specifiers,
    declarator: fn_declarator(a, name, params),
    body: a.stmt(SP, StmtKind::Compound(items)),
  }))
}

fn ret<'a>(a: &'a AstArena<'a>, e: Option<&'a Expr<'a>>) -> BlockItem<'a> {
  BlockItem::Stmt(a.stmt(SP, StmtKind::Return(e)))
}

fn func<'u>(unit: &'u TransUnit, name: &str) -> &'u FuncBody {
  let g = unit.global_by_name(intern(name)).expect("global exists");
  let GlobalKind::Func { body: Some(body), .. } = &unit.globals[g].kind else {
    panic!("`{name}` has no body")
  };
  body
}

fn all_insts<'u>(body: &'u FuncBody) -> Vec<&'u Inst> {
  body.layout.iter()
    .flat_map(|&b| body.blocks[b].insts.iter().map(|&i| &body.insts[i]))
    .collect()
}

fn last_inst<'u>(body: &'u FuncBody, block: BlockId) -> &'u Inst {
  &body.insts[*body.blocks[block].insts.last().expect("nonempty block")]
}

fn int_const(ty: IrType, val: u64) -> Value {
  Value::Const(Const::Int { ty, val })
}

#[test]
fn scenario_pointer_arithmetic_and_usual_conversions() {
  // int f(int *p, unsigned n) { return p[n] - *p; }
  let a = AstArena::default();
  let p_decl = a.declarator(Declarator::Pointer(a.ident_declarator(intern("p"))));
  let body = ret(&a, Some(bin(&a, BinaryOp::Sub,
    a.expr(SP, ExprKind::Index(var(&a, "p"), var(&a, "n"))),
    a.expr(SP, ExprKind::Unary(UnaryOp::Deref, var(&a, "p"))))));
  let ast = TranslationUnit { decls: vec![fn_def(&a, vec![ts(&a, "int")], "f", vec![
    param(&a, "int", Some(p_decl)),
    param(&a, "unsigned", Some(a.ident_declarator(intern("n")))),
  ], vec![body])] };
  let unit = lower_unit(&ast).unwrap();
  let f = func(&unit, "f");
  let insts = all_insts(f);

  // n is zero-extended to pointer width and scaled by sizeof(int)
  assert!(insts.iter().any(|i| i.op == Op::Zext && i.ty == IrType::I64));
  assert!(insts.iter().any(|i| i.op == Op::Mul
    && i.args[1] == int_const(IrType::I64, 4)));
  // the subtraction operates on two 32-bit ints
  let subs: Vec<_> = insts.iter().filter(|i| i.op == Op::Sub && i.ty == IrType::I32).collect();
  assert_eq!(subs.len(), 1);
  assert_eq!(f.value_ty(&subs[0].args[0]), IrType::I32);
  assert_eq!(f.value_ty(&subs[0].args[1]), IrType::I32);
  assert!(insts.iter().any(|i| i.op == Op::Ret));
}

fn record_ref<'a>(a: &'a AstArena<'a>, tag: &str) -> DeclSpec<'a> {
  DeclSpec::Type(a.type_specifier(SP, TypeSpecifierKind::Record(RecordSpecifier {
    is_union: false,
    tag: Some(intern(tag)),
    fields: None,
    packed: false,
  })))
}

#[test]
fn scenario_struct_return_through_hidden_pointer() {
  // struct S { int a, b; }; struct S g(void); int h(void) { return g().a; }
  let a = AstArena::default();
  let s_def = ExternalDecl::Decl(a.decl(Decl {
    span: SP,
    specifiers: vec![DeclSpec::Type(a.type_specifier(SP,
      TypeSpecifierKind::Record(RecordSpecifier {
        is_union: false,
        tag: Some(intern("S")),
        fields: Some(vec![FieldDecl {
          specifiers: vec![ts(&a, "int")],
          declarators: vec![
            FieldDeclarator { declarator: a.ident_declarator(intern("a")), bit_width: None },
            FieldDeclarator { declarator: a.ident_declarator(intern("b")), bit_width: None },
          ],
        }]),
        packed: false,
      })))],
    inits: vec![],
  }));
  let g_decl = ExternalDecl::Decl(a.decl(Decl {
    span: SP,
    specifiers: vec![record_ref(&a, "S")],
    inits: vec![InitDeclarator {
      declarator: fn_declarator(&a, "g", void_params(&a)),
      init: None,
    }],
  }));
  let call = a.expr(SP, ExprKind::Call { callee: var(&a, "g"), args: vec![] });
  let access = a.expr(SP, ExprKind::Member { arrow: false, base: call, field: intern("a") });
  let h = fn_def(&a, vec![ts(&a, "int")], "h", void_params(&a), vec![ret(&a, Some(access))]);
  let ast = TranslationUnit { decls: vec![s_def, g_decl, h] };
  let unit = lower_unit(&ast).unwrap();

  let g_id = unit.global_by_name(intern("g")).unwrap();
  let h_body = func(&unit, "h");
  let insts = all_insts(h_body);
  // a local S-typed buffer is allocated
  let (local_id, _) = h_body.insts.enum_iter()
    .find(|(_, i)| i.op == Op::Local && matches!(i.ty, IrType::Record(_)))
    .expect("local struct buffer");
  // the call passes its address as the hidden argument and returns void
  let call_inst = insts.iter().find(|i| i.op == Op::Call).expect("call");
  assert_eq!(call_inst.ty, IrType::Void);
  assert_eq!(call_inst.args[0], Value::Global(g_id));
  assert_eq!(call_inst.args[1], Value::Inst(local_id));
  // field 0 of the buffer is addressed, loaded, and returned
  let field = insts.iter().find(|i| matches!(i.op, Op::Field(0))).expect("field access");
  assert_eq!(field.args[0], Value::Inst(local_id));
  assert!(insts.iter().any(|i| i.op == Op::Load && i.ty == IrType::I32));
  assert!(insts.iter().any(|i| i.op == Op::Ret));
}

#[test]
fn scenario_designated_global_initializer() {
  // int a[5] = { [4]=1, [1]=2 };
  let a = AstArena::default();
  let designated = |at: u64, val: u64| InitItem {
    designators: vec![Designator::Index(num(&a, at))],
    init: a.init(Initializer::Expr(num(&a, val))),
  };
  let arr = a.declarator(Declarator::Direct(a.direct(DirectDeclarator::Array {
    elem: a.direct(DirectDeclarator::Ident(intern("a"))),
    len: Some(num(&a, 5)),
  })));
  let ast = TranslationUnit { decls: vec![ExternalDecl::Decl(a.decl(Decl {
    span: SP,
    specifiers: vec![ts(&a, "int")],
    inits: vec![InitDeclarator {
      declarator: arr,
      init: Some(a.init(Initializer::List(vec![designated(4, 1), designated(1, 2)]))),
    }],
  }))] };
  let unit = lower_unit(&ast).unwrap();
  let g = unit.global_by_name(intern("a")).unwrap();
  let GlobalKind::Var { init: Some(Const::Array { elems, .. }), .. } = &unit.globals[g].kind
    else { panic!("expected an array initializer") };
  let vals: Vec<u64> = elems.iter().map(|c| {
    let Const::Int { val, .. } = c else { panic!("expected int elements") };
    *val
  }).collect();
  assert_eq!(vals, [0, 2, 0, 0, 1]);
}

#[test]
fn scenario_short_circuit_and() {
  // int f(int x) { return x && x+1; }
  let a = AstArena::default();
  let body = ret(&a, Some(bin(&a, BinaryOp::LogAnd,
    var(&a, "x"),
    bin(&a, BinaryOp::Add, var(&a, "x"), num(&a, 1)))));
  let ast = TranslationUnit { decls: vec![fn_def(&a, vec![ts(&a, "int")], "f",
    vec![param(&a, "int", Some(a.ident_declarator(intern("x"))))], vec![body])] };
  let unit = lower_unit(&ast).unwrap();
  let f = func(&unit, "f");
  let insts = all_insts(f);

  // the skip edge carries the constant 0, the rhs is normalized via != 0
  let phi = insts.iter().find(|i| i.op == Op::Phi).expect("phi");
  assert_eq!(phi.blocks.len(), 2);
  assert_eq!(phi.args[0], int_const(IrType::I32, 0));
  let Value::Inst(norm) = phi.args[1] else { panic!("rhs edge is an instruction") };
  assert!(matches!(f.insts[norm].op, Op::Cmp(cir::types::ir::Cmp::Ne)));
  // the lhs branches: one conditional in the entry block
  assert!(f.blocks[BlockId::ENTRY].insts.iter()
    .any(|&i| f.insts[i].op == Op::Cond));
}

#[test]
fn scenario_switch_dispatch_ladder() {
  // int f(int x) { switch (x) { case 1: return 10; case 3: return 30;
  //                             default: return 0; } }
  let a = AstArena::default();
  let case1 = a.stmt(SP, StmtKind::Case(num(&a, 1),
    a.stmt(SP, StmtKind::Return(Some(num(&a, 10))))));
  let case3 = a.stmt(SP, StmtKind::Case(num(&a, 3),
    a.stmt(SP, StmtKind::Return(Some(num(&a, 30))))));
  let dflt = a.stmt(SP, StmtKind::Default(
    a.stmt(SP, StmtKind::Return(Some(num(&a, 0))))));
  let sw = a.stmt(SP, StmtKind::Switch {
    ctrl: var(&a, "x"),
    body: a.stmt(SP, StmtKind::Compound(vec![
      BlockItem::Stmt(case1), BlockItem::Stmt(case3), BlockItem::Stmt(dflt),
    ])),
  });
  let ast = TranslationUnit { decls: vec![fn_def(&a, vec![ts(&a, "int")], "f",
    vec![param(&a, "int", Some(a.ident_declarator(intern("x"))))],
    vec![BlockItem::Stmt(sw)])] };
  let unit = lower_unit(&ast).unwrap();
  let f = func(&unit, "f");

  // the entry branches into the ladder, which sits between the entry and
  // the body in layout order
  let entry = f.layout[0];
  assert_eq!(entry, BlockId::ENTRY);
  let Op::Branch = last_inst(f, entry).op else { panic!("entry ends in a branch") };
  let cmp1 = last_inst(f, entry).blocks[0];
  assert_eq!(cmp1, f.layout[1]);
  let cmp2 = f.layout[2];
  assert_eq!(&*f.blocks[f.layout[3]].name, "switch.body");

  let check_ret = |block: BlockId, val: u64| {
    let i = last_inst(f, block);
    assert_eq!(i.op, Op::Ret);
    assert_eq!(i.args[0], int_const(IrType::I32, val));
  };
  // x == 1 -> ret 10, else fall to the next compare
  let c1 = last_inst(f, cmp1);
  assert_eq!(c1.op, Op::Cond);
  let eq1 = &f.blocks[cmp1].insts[f.blocks[cmp1].insts.len() - 2];
  assert_eq!(f.insts[*eq1].args[1], int_const(IrType::I32, 1));
  check_ret(c1.blocks[0], 10);
  assert_eq!(c1.blocks[1], cmp2);
  // x == 3 -> ret 30, else the default
  let c2 = last_inst(f, cmp2);
  assert_eq!(c2.op, Op::Cond);
  let eq3 = &f.blocks[cmp2].insts[f.blocks[cmp2].insts.len() - 2];
  assert_eq!(f.insts[*eq3].args[1], int_const(IrType::I32, 3));
  check_ret(c2.blocks[0], 30);
  check_ret(c2.blocks[1], 0);
}

#[test]
fn scenario_forward_goto() {
  // void f(void) { goto L; L: return; }
  let a = AstArena::default();
  let items = vec![
    BlockItem::Stmt(a.stmt(SP, StmtKind::Goto(intern("L")))),
    BlockItem::Stmt(a.stmt(SP, StmtKind::Labeled(intern("L"),
      a.stmt(SP, StmtKind::Return(None))))),
  ];
  let ast = TranslationUnit {
    decls: vec![fn_def(&a, vec![ts(&a, "void")], "f", void_params(&a), items)],
  };
  let unit = lower_unit(&ast).unwrap();
  let f = func(&unit, "f");

  let goto = last_inst(f, BlockId::ENTRY);
  assert_eq!(goto.op, Op::Branch);
  let target = goto.blocks[0];
  assert_eq!(&*f.blocks[target].name, "L");
  assert_eq!(last_inst(f, target).op, Op::RetVoid);
}

#[test]
fn usual_conversions_are_symmetric() {
  // int f(unsigned u, char c) { return u + c; }
  let a = AstArena::default();
  let body = ret(&a, Some(bin(&a, BinaryOp::Add, var(&a, "u"), var(&a, "c"))));
  let ast = TranslationUnit { decls: vec![fn_def(&a, vec![ts(&a, "int")], "f", vec![
    param(&a, "unsigned", Some(a.ident_declarator(intern("u")))),
    param(&a, "char", Some(a.ident_declarator(intern("c")))),
  ], vec![body])] };
  let unit = lower_unit(&ast).unwrap();
  let f = func(&unit, "f");
  let insts = all_insts(f);
  // char is sign-extended to the common type; both operands of the add
  // have the same IR type, which is also the result type
  assert!(insts.iter().any(|i| i.op == Op::Sext && i.ty == IrType::I32));
  let add = insts.iter().find(|i| i.op == Op::Add).expect("add");
  assert_eq!(add.ty, IrType::I32);
  assert_eq!(f.value_ty(&add.args[0]), IrType::I32);
  assert_eq!(f.value_ty(&add.args[1]), IrType::I32);
}

#[test]
fn pointer_difference_divides_by_element_size() {
  // long d(long *p, long *q) { return p - q; }
  let a = AstArena::default();
  let pd = |name: &str| Some(a.declarator(Declarator::Pointer(a.ident_declarator(intern(name)))));
  let body = ret(&a, Some(bin(&a, BinaryOp::Sub, var(&a, "p"), var(&a, "q"))));
  let ast = TranslationUnit { decls: vec![fn_def(&a, vec![ts(&a, "long")], "d", vec![
    param(&a, "long", pd("p")),
    param(&a, "long", pd("q")),
  ], vec![body])] };
  let unit = lower_unit(&ast).unwrap();
  let insts = all_insts(func(&unit, "d"));
  assert!(insts.iter().any(|i| i.op == Op::Div
    && i.args[1] == int_const(IrType::I64, 8)));
}

#[test]
fn partial_local_initializer_memsets_first() {
  // void f(void) { int a[4] = { 1 }; }
  let a = AstArena::default();
  let arr = a.declarator(Declarator::Direct(a.direct(DirectDeclarator::Array {
    elem: a.direct(DirectDeclarator::Ident(intern("a"))),
    len: Some(num(&a, 4)),
  })));
  let decl = BlockItem::Decl(a.decl(Decl {
    span: SP,
    specifiers: vec![ts(&a, "int")],
    inits: vec![InitDeclarator {
      declarator: arr,
      init: Some(a.init(Initializer::List(vec![InitItem {
        designators: vec![],
        init: a.init(Initializer::Expr(num(&a, 1))),
      }]))),
    }],
  }));
  let ast = TranslationUnit {
    decls: vec![fn_def(&a, vec![ts(&a, "void")], "f", void_params(&a), vec![decl])],
  };
  let unit = lower_unit(&ast).unwrap();
  let memset = unit.global_by_name(intern("memset")).expect("memset intrinsic");
  let insts = all_insts(func(&unit, "f"));
  let call = insts.iter().find(|i| i.op == Op::Call).expect("memset call");
  assert_eq!(call.args[0], Value::Global(memset));
  assert_eq!(call.args[3], int_const(IrType::I64, 16));
  // the explicit element is still stored
  assert!(insts.iter().any(|i| i.op == Op::Store
    && i.args[1] == int_const(IrType::I32, 1)));
}

#[test]
fn inline_definition_is_deferred_until_forced() {
  // inline int f(int x) { return x; }   -- alone: no body
  let a = AstArena::default();
  let inline_def = fn_def(&a, vec![DeclSpec::Function(FunctionSpecifier::Inline), ts(&a, "int")],
    "f", vec![param(&a, "int", Some(a.ident_declarator(intern("x"))))],
    vec![ret(&a, Some(var(&a, "x")))]);
  let ast = TranslationUnit { decls: vec![inline_def] };
  let unit = lower_unit(&ast).unwrap();
  let g = unit.global_by_name(intern("f")).unwrap();
  assert!(matches!(&unit.globals[g].kind, GlobalKind::Func { body: None, .. }));

  // with a later non-inline redeclaration, the body is emitted
  let b = AstArena::default();
  let inline_def = fn_def(&b, vec![DeclSpec::Function(FunctionSpecifier::Inline), ts(&b, "int")],
    "f", vec![param(&b, "int", Some(b.ident_declarator(intern("x"))))],
    vec![ret(&b, Some(var(&b, "x")))]);
  let redecl = ExternalDecl::Decl(b.decl(Decl {
    span: SP,
    specifiers: vec![ts(&b, "int")],
    inits: vec![InitDeclarator {
      declarator: fn_declarator(&b, "f",
        vec![param(&b, "int", Some(b.ident_declarator(intern("x"))))]),
      init: None,
    }],
  }));
  let ast = TranslationUnit { decls: vec![inline_def, redecl] };
  let unit = lower_unit(&ast).unwrap();
  let f = func(&unit, "f");
  assert!(all_insts(f).iter().any(|i| i.op == Op::Ret));
}

#[test]
fn signed_shift_right_is_arithmetic() {
  // int f(int x, unsigned u) { return (x >> 1) + (u >> 1); }
  let a = AstArena::default();
  let body = ret(&a, Some(bin(&a, BinaryOp::Add,
    bin(&a, BinaryOp::Shr, var(&a, "x"), num(&a, 1)),
    bin(&a, BinaryOp::Shr, var(&a, "u"), num(&a, 1)))));
  let ast = TranslationUnit { decls: vec![fn_def(&a, vec![ts(&a, "int")], "f", vec![
    param(&a, "int", Some(a.ident_declarator(intern("x")))),
    param(&a, "unsigned", Some(a.ident_declarator(intern("u")))),
  ], vec![body])] };
  let unit = lower_unit(&ast).unwrap();
  let insts = all_insts(func(&unit, "f"));
  assert!(insts.iter().any(|i| i.op == Op::Sar));
  assert!(insts.iter().any(|i| i.op == Op::Shr));
}

#[test]
fn string_literal_globals_are_nul_terminated() {
  // char *s = "hi";
  let a = AstArena::default();
  let ptr = a.declarator(Declarator::Pointer(a.ident_declarator(intern("s"))));
  let ast = TranslationUnit { decls: vec![ExternalDecl::Decl(a.decl(Decl {
    span: SP,
    specifiers: vec![ts(&a, "char")],
    inits: vec![InitDeclarator {
      declarator: ptr,
      init: Some(a.init(Initializer::Expr(
        a.expr(SP, ExprKind::Str(b"hi".to_vec().into_boxed_slice()))))),
    }],
  }))] };
  let unit = lower_unit(&ast).unwrap();
  let lit = unit.global_by_name(intern("__string_literal_0")).expect("string global");
  let GlobalKind::Var { init: Some(Const::Array { elems, .. }), .. } = &unit.globals[lit].kind
    else { panic!("expected array initializer") };
  assert_eq!(elems.len(), 3);
  assert_eq!(elems[2], Const::int(IrType::I8, 0));
  let s = unit.global_by_name(intern("s")).unwrap();
  let GlobalKind::Var { init: Some(Const::Global(target)), .. } = &unit.globals[s].kind
    else { panic!("expected a pointer initializer") };
  assert_eq!(*target, lit);
}

#[test]
fn break_outside_a_loop_is_rejected() {
  let a = AstArena::default();
  let items = vec![BlockItem::Stmt(a.stmt(SP, StmtKind::Break))];
  let ast = TranslationUnit {
    decls: vec![fn_def(&a, vec![ts(&a, "void")], "f", void_params(&a), items)],
  };
  let err = lower_unit(&ast).unwrap_err();
  assert!(matches!(err.kind, ErrorKind::MalformedControlFlow(_)));
}

#[test]
fn unknown_identifiers_are_rejected() {
  let a = AstArena::default();
  let items = vec![ret(&a, Some(var(&a, "mystery")))];
  let ast = TranslationUnit {
    decls: vec![fn_def(&a, vec![ts(&a, "int")], "f", void_params(&a), items)],
  };
  let err = lower_unit(&ast).unwrap_err();
  assert_eq!(err.kind, ErrorKind::UnknownIdent(intern("mystery")));
}

#[test]
fn while_loop_block_order_matches_source() {
  // void f(int n) { while (n) n = n - 1; }
  let a = AstArena::default();
  let assign = a.expr(SP, ExprKind::Assign {
    op: None,
    lhs: var(&a, "n"),
    rhs: bin(&a, BinaryOp::Sub, var(&a, "n"), num(&a, 1)),
  });
  let w = a.stmt(SP, StmtKind::While {
    cond: var(&a, "n"),
    body: a.stmt(SP, StmtKind::Expr(Some(assign))),
  });
  let ast = TranslationUnit { decls: vec![fn_def(&a, vec![ts(&a, "void")], "f",
    vec![param(&a, "int", Some(a.ident_declarator(intern("n"))))],
    vec![BlockItem::Stmt(w)])] };
  let unit = lower_unit(&ast).unwrap();
  let f = func(&unit, "f");
  let names: Vec<&str> = f.layout.iter().map(|&b| &*f.blocks[b].name).collect();
  assert_eq!(names, ["entry", "while.ph", "while.body", "while.after"]);
}
