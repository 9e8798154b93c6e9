//! Well-formedness checking.
//!
//! A module is well formed when, in every function:
//!
//! - every referenced variable is defined earlier in an enclosing scope
//! - every variable identity is defined once
//! - every reference carries the annotations of its definition
//! - dataflow variables are defined in dataflow blocks and not used after
//!   their block ends
//! - operand positions hold atomic expressions
//! - global references name functions of the module
//! - a function's return type accepts the type of its body

use crate::expr::{BindingBlock, Expr, ExprKind, Function, Type, Var, VarId};
use crate::module::Module;
use crate::pretty::pretty_print_expr;
use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;
use thiserror::Error;

/// A violated invariant, reported with the enclosing global function.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WellFormedError {
    #[error("in `{function}`: variable `{name}` is used outside the scope of its definition")]
    UndefinedVar { function: SmolStr, name: SmolStr },

    #[error("in `{function}`: variable `{name}` is defined more than once")]
    DuplicateDefinition { function: SmolStr, name: SmolStr },

    #[error("in `{function}`: variable `{name}` is referenced with annotations that differ from its definition")]
    IdentityConflict { function: SmolStr, name: SmolStr },

    #[error("in `{function}`: dataflow variable `{name}` is defined outside a dataflow block")]
    DataflowVarOutsideBlock { function: SmolStr, name: SmolStr },

    #[error("in `{function}`: dataflow variable `{name}` is used outside its dataflow block")]
    DataflowVarEscape { function: SmolStr, name: SmolStr },

    #[error("in `{function}`: operand `{operand}` is not atomic")]
    NotNormalForm { function: SmolStr, operand: String },

    #[error("in `{function}`: cannot find global function `{name}`")]
    UndefinedGlobal { function: SmolStr, name: SmolStr },

    #[error("in `{function}`: return type `{ret_type}` does not accept body type `{body_type}`")]
    ReturnTypeMismatch {
        function: SmolStr,
        ret_type: Type,
        body_type: Type,
    },
}

/// Check every function of `module`, returning all violations found.
pub fn well_formed(module: &Module) -> Vec<WellFormedError> {
    let mut errors = Vec::new();
    for (name, func) in module.iter() {
        let mut checker = Checker::new(module, name.clone());
        checker.check_function(func);
        errors.extend(checker.errors);
    }
    errors
}

pub fn is_well_formed(module: &Module) -> bool {
    well_formed(module).is_empty()
}

struct Checker<'m> {
    module: &'m Module,
    function: SmolStr,
    /// Every definition seen so far.
    defined: FxHashMap<VarId, Var>,
    /// Definitions in scope at the current point.
    visible: FxHashSet<VarId>,
    /// Definitions per open scope, removed when the scope closes.
    scopes: Vec<Vec<VarId>>,
    /// Dataflow variables whose block has ended.
    expired: FxHashSet<VarId>,
    conflicts: FxHashSet<VarId>,
    errors: Vec<WellFormedError>,
}

impl<'m> Checker<'m> {
    fn new(module: &'m Module, function: SmolStr) -> Self {
        Self {
            module,
            function,
            defined: FxHashMap::default(),
            visible: FxHashSet::default(),
            scopes: Vec::new(),
            expired: FxHashSet::default(),
            conflicts: FxHashSet::default(),
            errors: Vec::new(),
        }
    }

    fn push_scope(&mut self) {
        self.scopes.push(Vec::new());
    }

    fn pop_scope(&mut self) {
        if let Some(ids) = self.scopes.pop() {
            for id in ids {
                self.visible.remove(&id);
            }
        }
    }

    fn define(&mut self, var: &Var, in_dataflow_block: bool) {
        if let Some(shape) = var.shape() {
            self.check_expr(shape);
        }
        if var.is_dataflow && !in_dataflow_block {
            self.errors.push(WellFormedError::DataflowVarOutsideBlock {
                function: self.function.clone(),
                name: var.name_hint.clone(),
            });
        }
        if self.defined.insert(var.id, var.clone()).is_some() {
            self.errors.push(WellFormedError::DuplicateDefinition {
                function: self.function.clone(),
                name: var.name_hint.clone(),
            });
        }
        self.visible.insert(var.id);
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(var.id);
        }
    }

    fn check_function(&mut self, func: &Function) {
        self.push_scope();
        for param in &func.params {
            self.define(param, false);
        }
        self.check_expr(&func.body);
        self.pop_scope();
        if let (Some(ret_type), Some(body_type)) = (&func.ret_type, &func.body.checked_type) {
            if !ret_type.accepts(body_type) {
                self.errors.push(WellFormedError::ReturnTypeMismatch {
                    function: self.function.clone(),
                    ret_type: ret_type.clone(),
                    body_type: body_type.clone(),
                });
            }
        }
    }

    fn check_operand(&mut self, operand: &Expr) {
        if !operand.is_atomic() {
            self.errors.push(WellFormedError::NotNormalForm {
                function: self.function.clone(),
                operand: pretty_print_expr(operand),
            });
        }
        self.check_expr(operand);
    }

    fn check_scope(&mut self, expr: &Expr) {
        self.push_scope();
        self.check_expr(expr);
        self.pop_scope();
    }

    fn check_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Constant(_)
            | ExprKind::Op(_)
            | ExprKind::ExternFunc(_)
            | ExprKind::ShapeExpr(_)
            | ExprKind::RuntimeDepShape => {}
            ExprKind::Var(var) => self.check_var_ref(expr, var.id, &var.name_hint),
            ExprKind::GlobalVar(name) => {
                if !self.module.contains(name) {
                    self.errors.push(WellFormedError::UndefinedGlobal {
                        function: self.function.clone(),
                        name: name.clone(),
                    });
                }
            }
            ExprKind::Tuple(fields) => {
                for field in fields {
                    self.check_operand(field);
                }
            }
            ExprKind::TupleGetItem { tuple, .. } => self.check_operand(tuple),
            ExprKind::Call(call) => {
                self.check_operand(&call.op);
                for arg in &call.args {
                    self.check_operand(arg);
                }
            }
            ExprKind::If(branch) => {
                self.check_operand(&branch.cond);
                self.check_scope(&branch.then_branch);
                self.check_scope(&branch.else_branch);
            }
            ExprKind::Function(func) => self.check_function(func),
            ExprKind::Seq(seq) => {
                self.push_scope();
                for block in &seq.blocks {
                    self.check_block(block);
                }
                self.check_expr(&seq.body);
                self.pop_scope();
            }
        }
    }

    fn check_block(&mut self, block: &BindingBlock) {
        let mut local_dataflow = Vec::new();
        for binding in &block.bindings {
            self.check_expr(binding.value());
            if let Some(var) = binding.var() {
                self.define(var, block.is_dataflow);
                if var.is_dataflow {
                    local_dataflow.push(var.id);
                }
            }
        }
        for id in local_dataflow {
            self.visible.remove(&id);
            self.expired.insert(id);
        }
    }

    fn check_var_ref(&mut self, expr: &Expr, id: VarId, name: &SmolStr) {
        if !self.visible.contains(&id) {
            let error = if self.expired.contains(&id) {
                WellFormedError::DataflowVarEscape {
                    function: self.function.clone(),
                    name: name.clone(),
                }
            } else {
                WellFormedError::UndefinedVar {
                    function: self.function.clone(),
                    name: name.clone(),
                }
            };
            self.errors.push(error);
            return;
        }
        let Some(def) = self.defined.get(&id) else {
            return;
        };
        let consistent = def.checked_type == expr.checked_type && def.shape == expr.shape;
        if !consistent && self.conflicts.insert(id) {
            self.errors.push(WellFormedError::IdentityConflict {
                function: self.function.clone(),
                name: name.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{DataType, VarBinding};

    fn module_of(func: Function) -> Module {
        Module::new().with_function("main", func).unwrap()
    }

    #[test]
    fn test_identity_function_is_well_formed() {
        let x = Var::new("x", None, Some(Type::Object));
        let m = module_of(Function::new(vec![x.clone()], x.to_expr()));
        assert!(is_well_formed(&m));
    }

    #[test]
    fn test_undefined_var() {
        let x = Var::new("x", None, None);
        let m = module_of(Function::new(Vec::new(), x.to_expr()));
        assert_eq!(
            well_formed(&m),
            vec![WellFormedError::UndefinedVar {
                function: "main".into(),
                name: "x".into()
            }]
        );
    }

    #[test]
    fn test_dataflow_escape() {
        let x = Var::new("x", None, None);
        let lv = Var::dataflow("lv", None, None);
        let body = Expr::seq(
            vec![BindingBlock::dataflow(vec![VarBinding::new(lv.clone(), x.to_expr()).into()])],
            lv.to_expr(),
        );
        let errors = well_formed(&module_of(Function::new(vec![x], body)));
        assert!(matches!(
            errors.as_slice(),
            [WellFormedError::DataflowVarEscape { .. }]
        ));
    }

    #[test]
    fn test_dataflow_var_in_ordinary_block() {
        let x = Var::new("x", None, None);
        let lv = Var::dataflow("lv", None, None);
        let body = Expr::seq(
            vec![BindingBlock::new(vec![VarBinding::new(lv.clone(), x.to_expr()).into()])],
            x.to_expr(),
        );
        let errors = well_formed(&module_of(Function::new(vec![x], body)));
        assert!(matches!(
            errors.as_slice(),
            [WellFormedError::DataflowVarOutsideBlock { .. }]
        ));
    }

    #[test]
    fn test_identity_conflict() {
        let x = Var::new("x", None, Some(Type::Object));
        let stale = x.with_shape_and_type(None, Some(Type::Shape));
        let m = module_of(Function::new(vec![x], stale.to_expr()));
        assert!(matches!(
            well_formed(&m).as_slice(),
            [WellFormedError::IdentityConflict { .. }]
        ));
    }

    #[test]
    fn test_nested_operand_is_reported() {
        let x = Var::new("x", None, None);
        let inner = Expr::call_op("relax.add", vec![x.to_expr(), x.to_expr()]);
        let outer = Expr::call_op("relax.add", vec![inner, x.to_expr()]);
        let errors = well_formed(&module_of(Function::new(vec![x], outer)));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("is not atomic"));
    }

    #[test]
    fn test_undefined_global() {
        let m = module_of(Function::new(Vec::new(), Expr::global("missing")));
        assert_eq!(
            well_formed(&m)[0].to_string(),
            "in `main`: cannot find global function `missing`"
        );
    }

    #[test]
    fn test_return_type_must_accept_body() {
        let x = Var::new("x", None, Some(Type::tensor(1, DataType::FLOAT32)));
        let identity = || Function::new(vec![x.clone()], x.to_expr());

        assert!(is_well_formed(&module_of(identity().with_ret_type(Type::any_tensor()))));
        assert!(is_well_formed(&module_of(identity().with_ret_type(Type::Object))));

        let m = module_of(identity().with_ret_type(Type::Shape));
        assert_eq!(
            well_formed(&m),
            vec![WellFormedError::ReturnTypeMismatch {
                function: "main".into(),
                ret_type: Type::Shape,
                body_type: Type::tensor(1, DataType::FLOAT32),
            }]
        );
        assert_eq!(
            well_formed(&m)[0].to_string(),
            "in `main`: return type `Shape` does not accept body type `Tensor[ndim=1, float32]`"
        );
    }
}
