use pretty_assertions::assert_eq;
use tessera_ir::analysis::{
    all_vars, dataflow_block_use_def, derive_func_ret_shape, free_vars, name_to_binding,
    remove_all_unused,
};
use tessera_ir::{
    post_order_visit, Binding, BindingBlock, DataType, Expr, ExprKind, Function, MatchShape,
    PrimExpr, ShapeVar, Type, Var, VarBinding,
};

fn bind(var: &Var, value: Expr) -> Binding {
    VarBinding::new(var.clone(), value).into()
}

fn tensor(name: &str) -> Var {
    Var::new(name, None, Some(Type::tensor(2, DataType::FLOAT32)))
}

fn lv(name: &str) -> Var {
    Var::dataflow(name, None, Some(Type::tensor(2, DataType::FLOAT32)))
}

#[test]
fn test_post_order_reaches_every_operator() {
    let x = tensor("x");
    let body = Expr::seq(
        vec![BindingBlock::new(vec![bind(
            &tensor("y"),
            Expr::call_op("relax.add", vec![x.to_expr(), x.to_expr()]),
        )])],
        Expr::call_op(
            "relax.multiply",
            vec![Expr::call_op("relax.exp", vec![x.to_expr()]), x.to_expr()],
        ),
    );
    let mut ops = Vec::new();
    post_order_visit(&body, |e| {
        if let ExprKind::Op(name) = &e.kind {
            ops.push(name.to_string());
        }
    });
    assert_eq!(ops, vec!["relax.add", "relax.multiply", "relax.exp"]);
}

#[test]
fn test_use_def_chains_of_dataflow_block() {
    let x = tensor("x");
    let lv0 = lv("lv0");
    let lv1 = lv("lv1");
    let gv = tensor("gv");
    let block = BindingBlock::dataflow(vec![
        bind(&lv0, Expr::call_op("relax.exp", vec![x.to_expr()])),
        bind(&lv1, Expr::call_op("relax.add", vec![lv0.to_expr(), x.to_expr()])),
        bind(&gv, Expr::call_op("relax.multiply", vec![lv0.to_expr(), lv1.to_expr()])),
    ]);
    let chains = dataflow_block_use_def(&block);
    assert_eq!(chains[&x.id], vec![lv0.id, lv1.id]);
    assert_eq!(chains[&lv0.id], vec![lv1.id, gv.id]);
    assert_eq!(chains[&lv1.id], vec![gv.id]);
    assert!(chains[&gv.id].is_empty());
}

#[test]
fn test_shadowed_names_keep_every_binding() {
    let x = tensor("x");
    let first = tensor("t");
    let second = tensor("t");
    let func = Function::new(
        vec![x.clone()],
        Expr::seq(
            vec![BindingBlock::new(vec![
                bind(&first, x.to_expr()),
                bind(&second, first.to_expr()),
            ])],
            second.to_expr(),
        ),
    );
    let table = name_to_binding(&func);
    assert_eq!(table.len(), 1);
    let ids: Vec<_> = table["t"].iter().filter_map(|b| b.var()).map(|v| v.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
}

#[test]
fn test_unused_dataflow_bindings_are_removed_transitively() {
    let x = tensor("x");
    let lv0 = lv("lv0");
    let lv1 = lv("lv1");
    let lv2 = lv("lv2");
    let gv = tensor("gv");
    let func = Function::new(
        vec![x.clone()],
        Expr::seq(
            vec![BindingBlock::dataflow(vec![
                bind(&lv0, Expr::call_op("relax.exp", vec![x.to_expr()])),
                // only feeds lv2, which is dead
                bind(&lv1, Expr::call_op("relax.negative", vec![x.to_expr()])),
                bind(&lv2, Expr::call_op("relax.add", vec![lv1.to_expr(), x.to_expr()])),
                bind(&gv, Expr::call_op("relax.nn.relu", vec![lv0.to_expr()])),
            ])],
            gv.to_expr(),
        ),
    );
    let pruned = remove_all_unused(&func);
    let seq = pruned.body.as_seq().expect("sequence");
    let names: Vec<_> = seq.blocks[0]
        .bindings
        .iter()
        .filter_map(|b| b.var())
        .map(|v| v.name_hint.to_string())
        .collect();
    assert_eq!(names, vec!["lv0", "gv"]);
    assert_eq!(remove_all_unused(&pruned), pruned);
}

#[test]
fn test_unused_outputs_and_matches_are_kept() {
    let n = ShapeVar::new("n");
    let x = tensor("x");
    let unused_out = tensor("unused");
    let s = lv("s");
    let func = Function::new(
        vec![x.clone()],
        Expr::seq(
            vec![BindingBlock::dataflow(vec![
                MatchShape::new(x.to_expr(), vec![PrimExpr::var(&n), PrimExpr::var(&n)], Some(s))
                    .into(),
                bind(&unused_out, Expr::call_op("relax.exp", vec![x.to_expr()])),
            ])],
            x.to_expr(),
        ),
    );
    assert_eq!(remove_all_unused(&func), func);
}

#[test]
fn test_lambda_captures_are_free() {
    let x = tensor("x");
    let y = tensor("y");
    let lambda = Expr::function(Function::new(
        vec![y.clone()],
        Expr::call_op("relax.add", vec![x.to_expr(), y.to_expr()]),
    ));
    let free: Vec<_> = free_vars(&lambda).into_iter().map(|v| v.id).collect();
    assert_eq!(free, vec![x.id]);
    let all: Vec<_> = all_vars(&lambda).into_iter().map(|v| v.id).collect();
    assert_eq!(all, vec![y.id, x.id]);
}

#[test]
fn test_ret_shape_keeps_parameter_bound_dims() {
    let m = ShapeVar::new("m");
    let n = ShapeVar::new("n");
    let k = ShapeVar::new("k");
    let x = Var::new(
        "x",
        Some(Expr::shape_expr(vec![PrimExpr::var(&m), PrimExpr::var(&n)])),
        Some(Type::tensor(2, DataType::FLOAT32)),
    );
    let bound = Expr::shape_expr(vec![PrimExpr::var(&m) * PrimExpr::var(&n)]);
    let body = x.to_expr().with_shape(Some(bound.clone()));
    assert_eq!(derive_func_ret_shape(&[x.clone()], &body), bound);

    let unbound = Expr::shape_expr(vec![PrimExpr::var(&k)]);
    let body = x.to_expr().with_shape(Some(unbound));
    assert_eq!(
        derive_func_ret_shape(&[x], &body).kind,
        ExprKind::RuntimeDepShape
    );
}
