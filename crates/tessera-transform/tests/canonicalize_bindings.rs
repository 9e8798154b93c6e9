use pretty_assertions::assert_eq;
use tessera_ir::{
    Binding, BindingBlock, Constant, DataType, Expr, Function, MatchShape, Module, PrimExpr,
    ShapeVar, Type, Var, VarBinding,
};
use tessera_transform::{canonicalize_bindings, canonicalize_bindings_with, TransformConfig};

fn bind(var: &Var, value: Expr) -> Binding {
    VarBinding::new(var.clone(), value).into()
}

fn any_tensor(name: &str) -> Var {
    Var::new(name, None, Some(Type::any_tensor()))
}

fn matrix(name: &str, m: &ShapeVar, n: &ShapeVar) -> Var {
    Var::new(
        name,
        Some(Expr::shape_expr(vec![PrimExpr::var(m), PrimExpr::var(n)])),
        Some(Type::tensor(2, DataType::FLOAT32)),
    )
}

fn module_of(params: Vec<Var>, blocks: Vec<BindingBlock>, body: Expr) -> Module {
    let func = Function::new(params, Expr::seq(blocks, body));
    Module::new().with_function("main", func).unwrap()
}

/// The bindings of `main`, one per line, followed by its result.
fn listing(module: &Module) -> Vec<String> {
    let func = module.get("main").expect("main");
    let mut lines = Vec::new();
    let body = match func.body.as_seq() {
        Some(seq) => {
            for block in &seq.blocks {
                for binding in &block.bindings {
                    lines.push(match binding {
                        Binding::Var(b) => format!("{} = {}", b.var.name_hint, b.value),
                        Binding::MatchShape(m) => {
                            let pattern = Expr::shape_expr(m.pattern.clone());
                            match &m.var {
                                Some(var) => {
                                    format!("{} = match_shape({}, {})", var.name_hint, m.value, pattern)
                                }
                                None => format!("match_shape({}, {})", m.value, pattern),
                            }
                        }
                    });
                }
            }
            (*seq.body).clone()
        }
        None => func.body.clone(),
    };
    lines.push(format!("return {}", body));
    lines
}

#[test]
fn test_chain_collapses_to_parameter() {
    let x = any_tensor("x");
    let y = any_tensor("y");
    let z = any_tensor("z");
    let q = any_tensor("q");
    let p = any_tensor("p");
    let o = any_tensor("o");
    let module = module_of(
        vec![x.clone()],
        vec![BindingBlock::new(vec![
            bind(&y, x.to_expr()),
            bind(&z, y.to_expr()),
            bind(&q, z.to_expr()),
            bind(&p, q.to_expr()),
            bind(&o, p.to_expr()),
        ])],
        o.to_expr(),
    );

    let out = canonicalize_bindings(&module).unwrap();
    assert_eq!(
        listing(&out),
        vec!["y = %x", "z = %x", "q = %x", "p = %x", "o = %x", "return %x"]
    );
}

#[test]
fn test_output_keeps_its_own_group() {
    let c = Constant::scalar_int(1);
    let dataflow = |name: &str| Var::dataflow(name, Some(c.shape_expr()), Some(c.checked_type()));
    let y = dataflow("y");
    let z = dataflow("z");
    let o = dataflow("o");
    let p = dataflow("p");
    let m = dataflow("m");
    let n = Var::new("n", Some(c.shape_expr()), Some(c.checked_type()));
    let module = module_of(
        Vec::new(),
        vec![BindingBlock::dataflow(vec![
            bind(&y, Expr::constant(c.clone())),
            bind(&z, y.to_expr()),
            bind(&o, z.to_expr()),
            bind(&p, o.to_expr()),
            bind(&m, p.to_expr()),
            bind(&n, m.to_expr()),
        ])],
        n.to_expr(),
    );

    let out = canonicalize_bindings(&module).unwrap();
    assert_eq!(
        listing(&out),
        vec!["y = 1", "z = %y", "o = %y", "p = %y", "m = %y", "n = %y", "return %n"]
    );
    let seq = out.get("main").unwrap().body.as_seq().unwrap();
    assert!(seq.blocks[0].is_dataflow);
}

#[test]
fn test_operands_are_substituted() {
    let m = ShapeVar::new("m");
    let n = ShapeVar::new("n");
    let x = matrix("x", &m, &n);
    let y = matrix("y", &m, &n);
    let w = matrix("w", &m, &n);
    let q = matrix("q", &m, &n);
    let z = matrix("z", &m, &n);
    let module = module_of(
        vec![x.clone(), y.clone()],
        vec![BindingBlock::new(vec![
            bind(&w, x.to_expr()),
            bind(&q, y.to_expr()),
            bind(&z, Expr::call_op("relax.add", vec![w.to_expr(), q.to_expr()])),
        ])],
        Expr::call_op("relax.add", vec![z.to_expr(), w.to_expr()]),
    );

    let out = canonicalize_bindings(&module).unwrap();
    assert_eq!(
        listing(&out),
        vec![
            "w = %x",
            "q = %y",
            "z = relax.add(%x, %y)",
            "return relax.add(%z, %x)",
        ]
    );
}

#[test]
fn test_type_change_is_a_boundary() {
    let x = any_tensor("x");
    let y = any_tensor("y");
    let z = Var::new("z", None, Some(Type::Object));
    let module = module_of(
        vec![x.clone()],
        vec![BindingBlock::new(vec![
            bind(&y, x.to_expr()),
            bind(&z, y.to_expr()),
        ])],
        z.to_expr(),
    );

    let out = canonicalize_bindings(&module).unwrap();
    assert_eq!(listing(&out), vec!["y = %x", "z = %x", "return %z"]);
}

#[test]
fn test_shape_change_is_a_boundary() {
    let (m, n, k, l) = (
        ShapeVar::new("m"),
        ShapeVar::new("n"),
        ShapeVar::new("k"),
        ShapeVar::new("l"),
    );
    let x = matrix("x", &m, &n);
    let z = matrix("z", &k, &l);
    let w = matrix("w", &k, &l);
    let module = module_of(
        vec![x.clone()],
        vec![BindingBlock::new(vec![
            bind(&z, x.to_expr()),
            bind(&w, z.to_expr()),
        ])],
        w.to_expr(),
    );

    let out = canonicalize_bindings(&module).unwrap();
    assert_eq!(listing(&out), vec!["z = %x", "w = %z", "return %z"]);
}

#[test]
fn test_match_shape_adding_a_shape_is_kept() {
    let m = ShapeVar::new("m");
    let n = ShapeVar::new("n");
    let x = any_tensor("x");
    let pattern = vec![PrimExpr::var(&m), PrimExpr::var(&n)];
    let (ty, shape) = MatchShape::var_annotations(&x.to_expr(), &pattern);
    let z = Var::new("z", shape.clone(), ty.clone());
    let w = Var::new("w", shape, ty);
    let module = module_of(
        vec![x.clone()],
        vec![BindingBlock::new(vec![
            MatchShape::new(x.to_expr(), pattern, Some(z.clone())).into(),
            bind(&w, z.to_expr()),
        ])],
        w.to_expr(),
    );

    let out = canonicalize_bindings(&module).unwrap();
    assert_eq!(
        listing(&out),
        vec!["z = match_shape(%x, (m, n))", "w = %z", "return %z"]
    );
}

#[test]
fn test_redundant_match_shape_becomes_binding() {
    let m = ShapeVar::new("m");
    let n = ShapeVar::new("n");
    let x = matrix("x", &m, &n);
    let pattern = vec![PrimExpr::var(&m), PrimExpr::var(&n)];
    let z = matrix("z", &m, &n);
    let w = matrix("w", &m, &n);
    let module = module_of(
        vec![x.clone()],
        vec![BindingBlock::new(vec![
            MatchShape::new(x.to_expr(), pattern, Some(z.clone())).into(),
            bind(&w, z.to_expr()),
        ])],
        w.to_expr(),
    );

    let out = canonicalize_bindings(&module).unwrap();
    assert_eq!(listing(&out), vec!["z = %x", "w = %x", "return %x"]);
}

#[test]
fn test_unbound_match_shape_value_is_substituted() {
    let m = ShapeVar::new("m");
    let n = ShapeVar::new("n");
    let x = matrix("x", &m, &n);
    let z = matrix("z", &m, &n);
    let w = matrix("w", &m, &n);
    let module = module_of(
        vec![x.clone()],
        vec![BindingBlock::new(vec![
            bind(&z, x.to_expr()),
            MatchShape::new(z.to_expr(), vec![PrimExpr::var(&m), PrimExpr::var(&n)], None).into(),
            bind(&w, z.to_expr()),
        ])],
        w.to_expr(),
    );

    let out = canonicalize_bindings(&module).unwrap();
    assert_eq!(
        listing(&out),
        vec!["z = %x", "match_shape(%x, (m, n))", "w = %x", "return %x"]
    );
}

#[test]
fn test_second_run_changes_nothing() {
    let x = any_tensor("x");
    let y = any_tensor("y");
    let z = any_tensor("z");
    let module = module_of(
        vec![x.clone()],
        vec![BindingBlock::new(vec![
            bind(&y, x.to_expr()),
            bind(&z, y.to_expr()),
        ])],
        z.to_expr(),
    );

    let once = canonicalize_bindings(&module).unwrap();
    let twice = canonicalize_bindings(&once).unwrap();
    assert_eq!(twice.to_string(), once.to_string());
    insta::assert_snapshot!(once.to_string(), @r###"
    fn @main(%x: Tensor(_, _)) -> Tensor(_, _) {
      %y = %x
      %z = %x
      %x
    }
    "###);
}

#[test]
fn test_input_module_is_untouched() {
    let x = any_tensor("x");
    let y = any_tensor("y");
    let module = module_of(
        vec![x.clone()],
        vec![BindingBlock::new(vec![bind(&y, x.to_expr())])],
        y.to_expr(),
    );
    let before = module.to_string();
    let out = canonicalize_bindings_with(&module, TransformConfig::strict()).unwrap();
    assert_eq!(module.to_string(), before);
    assert_eq!(listing(&out), vec!["y = %x", "return %x"]);
}
