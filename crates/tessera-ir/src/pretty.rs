//! Pretty printing for the IR.
//!
//! The output is meant for debugging and tests. Variables print as `%name`,
//! global functions as `@name`, dataflow blocks as `dataflow { ... }`.

use std::fmt::{self, Write};

use crate::expr::*;
use crate::module::Module;
use crate::prim::PrimExpr;

/// Pretty print every function of a module, in definition order.
pub fn pretty_print_module(module: &Module) -> String {
    let mut out = String::new();
    let mut printer = PrettyPrinter::new(&mut out);
    for (i, (name, func)) in module.iter().enumerate() {
        if i > 0 {
            printer.out.push('\n');
        }
        printer.print_function(Some(name), func);
    }
    out
}

/// Pretty print a global function.
pub fn pretty_print_function(name: &str, func: &Function) -> String {
    let mut out = String::new();
    PrettyPrinter::new(&mut out).print_function(Some(name), func);
    out
}

/// Pretty print an expression. Nested scopes span several lines.
pub fn pretty_print_expr(expr: &Expr) -> String {
    let mut out = String::new();
    PrettyPrinter::new(&mut out).write_expr(expr);
    out
}

struct PrettyPrinter<'a> {
    out: &'a mut String,
    indent: usize,
}

impl<'a> PrettyPrinter<'a> {
    fn new(out: &'a mut String) -> Self {
        Self { out, indent: 0 }
    }

    fn indent(&mut self) {
        self.indent += 2;
    }

    fn dedent(&mut self) {
        self.indent = self.indent.saturating_sub(2);
    }

    fn write_indent(&mut self) {
        for _ in 0..self.indent {
            self.out.push(' ');
        }
    }

    fn writeln(&mut self, s: &str) {
        self.write_indent();
        self.out.push_str(s);
        self.out.push('\n');
    }

    fn print_function(&mut self, name: Option<&str>, func: &Function) {
        self.write_indent();
        self.write_function(name, func);
        self.out.push('\n');
    }

    /// `fn @name(params) -> ret { ... }`, starting at the current column.
    fn write_function(&mut self, name: Option<&str>, func: &Function) {
        match name {
            Some(name) => {
                let _ = write!(self.out, "fn @{}(", name);
            }
            None => self.out.push_str("fn("),
        }
        for (i, param) in func.params.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.out.push('%');
            self.out.push_str(&param.name_hint);
            if let Some(anno) = annotation(param.checked_type.as_ref(), param.shape()) {
                let _ = write!(self.out, ": {}", anno);
            }
        }
        self.out.push(')');
        if let Some(ret) = annotation(func.ret_type.as_ref(), func.ret_shape.as_ref()) {
            let _ = write!(self.out, " -> {}", ret);
        }
        self.out.push_str(" {\n");
        self.indent();
        self.print_scope(&func.body);
        self.dedent();
        self.write_indent();
        self.out.push('}');
    }

    /// The contents of a scope: its bindings, then its result.
    fn print_scope(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Seq(seq) => {
                for block in &seq.blocks {
                    self.print_block(block);
                }
                self.print_scope(&seq.body);
            }
            _ => {
                self.write_indent();
                self.write_expr(expr);
                self.out.push('\n');
            }
        }
    }

    fn print_block(&mut self, block: &BindingBlock) {
        if block.is_dataflow {
            self.writeln("dataflow {");
            self.indent();
        }
        for binding in &block.bindings {
            self.print_binding(binding);
        }
        if block.is_dataflow {
            self.dedent();
            self.writeln("}");
        }
    }

    fn print_binding(&mut self, binding: &Binding) {
        self.write_indent();
        match binding {
            Binding::Var(b) => {
                let _ = write!(self.out, "%{} = ", b.var.name_hint);
                self.write_expr(&b.value);
            }
            Binding::MatchShape(m) => {
                if let Some(var) = &m.var {
                    let _ = write!(self.out, "%{} = ", var.name_hint);
                }
                self.out.push_str("match_shape(");
                self.write_expr(&m.value);
                let _ = write!(self.out, ", {})", ShapeTuple(&m.pattern));
            }
        }
        self.out.push('\n');
    }

    fn write_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Constant(c) => {
                let _ = write!(self.out, "{}", c);
            }
            ExprKind::Var(v) => {
                let _ = write!(self.out, "%{}", v.name_hint);
            }
            ExprKind::GlobalVar(name) => {
                let _ = write!(self.out, "@{}", name);
            }
            ExprKind::Op(name) => self.out.push_str(name),
            ExprKind::ExternFunc(name) => {
                let _ = write!(self.out, "extern(\"{}\")", name);
            }
            ExprKind::ShapeExpr(values) => {
                let _ = write!(self.out, "{}", ShapeTuple(values));
            }
            ExprKind::RuntimeDepShape => self.out.push_str("runtime_dep_shape"),
            ExprKind::Tuple(fields) => {
                self.out.push('(');
                self.write_list(fields);
                if fields.len() == 1 {
                    self.out.push(',');
                }
                self.out.push(')');
            }
            ExprKind::TupleGetItem { tuple, index } => {
                self.write_expr(tuple);
                let _ = write!(self.out, "[{}]", index);
            }
            ExprKind::Call(call) => {
                self.write_expr(&call.op);
                self.out.push('(');
                self.write_list(&call.args);
                if !call.type_args.is_empty() {
                    if !call.args.is_empty() {
                        self.out.push_str(", ");
                    }
                    self.out.push_str("type_args=[");
                    for (i, ty) in call.type_args.iter().enumerate() {
                        if i > 0 {
                            self.out.push_str(", ");
                        }
                        let _ = write!(self.out, "{}", ty);
                    }
                    self.out.push(']');
                }
                self.out.push(')');
            }
            ExprKind::If(branch) => {
                self.out.push_str("if ");
                self.write_expr(&branch.cond);
                self.out.push_str(" {\n");
                self.indent();
                self.print_scope(&branch.then_branch);
                self.dedent();
                self.write_indent();
                self.out.push_str("} else {\n");
                self.indent();
                self.print_scope(&branch.else_branch);
                self.dedent();
                self.write_indent();
                self.out.push('}');
            }
            ExprKind::Function(func) => self.write_function(None, func),
            ExprKind::Seq(_) => {
                self.out.push_str("{\n");
                self.indent();
                self.print_scope(expr);
                self.dedent();
                self.write_indent();
                self.out.push('}');
            }
        }
    }

    fn write_list(&mut self, items: &[Expr]) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.write_expr(item);
        }
    }
}

/// `(a, b)`, `(a,)` or `()`.
struct ShapeTuple<'a>(&'a [PrimExpr]);

impl fmt::Display for ShapeTuple<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        if self.0.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

/// Parameter and return annotations: `Tensor((m, n), float32)` for tensors,
/// the type itself otherwise.
fn annotation(ty: Option<&Type>, shape: Option<&Expr>) -> Option<String> {
    let shape_text = shape.map(|s| match &s.kind {
        ExprKind::ShapeExpr(values) => ShapeTuple(values).to_string(),
        ExprKind::RuntimeDepShape => "_".to_string(),
        _ => pretty_print_expr(s),
    });
    match (ty, shape_text) {
        (None, None) => None,
        (Some(Type::DynTensor { ndim, dtype }), shape_text) => {
            let dims = match shape_text {
                Some(text) => text,
                None if *ndim >= 0 => format!("ndim={}", ndim),
                None => "_".to_string(),
            };
            let dtype = if dtype.is_unknown() {
                "_".to_string()
            } else {
                dtype.to_string()
            };
            Some(format!("Tensor({}, {})", dims, dtype))
        }
        (Some(ty), _) => Some(ty.to_string()),
        (None, Some(shape_text)) => Some(format!("_{}", shape_text)),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&pretty_print_expr(self))
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        PrettyPrinter::new(&mut out).write_function(None, self);
        f.write_str(&out)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&pretty_print_module(self))
    }
}
