//! Lifting of closed local functions.
//!
//! A local function bound to a variable and referring to no variable defined
//! outside of it is added to the module under a fresh name, and the binding
//! is rebound to the global. Functions that capture variables stay local.

use smol_str::SmolStr;
use tessera_ir::{analysis::free_vars, Expr, Module, VarBinding};
use tracing::{debug, instrument};

use crate::block_builder::BlockBuilder;
use crate::error::Result;
use crate::mutator::{emit_rebound, walk_var_binding, ExprMutator, MutatorContext};

/// Moves closed local functions into the module as globals.
pub struct LiftClosedFunctions {
    ctx: MutatorContext,
    counter: usize,
}

impl LiftClosedFunctions {
    pub fn new(builder: BlockBuilder) -> Self {
        Self {
            ctx: MutatorContext::new(builder),
            counter: 0,
        }
    }

    pub fn into_builder(self) -> BlockBuilder {
        self.ctx.into_builder()
    }

    fn next_name(&mut self) -> SmolStr {
        let parent = self
            .ctx
            .current_global()
            .cloned()
            .unwrap_or_else(|| SmolStr::new("lambda"));
        let base = format!("{parent}_lifted_{}", self.counter);
        self.counter += 1;
        self.ctx.builder.unique_function_name(&base)
    }
}

impl ExprMutator for LiftClosedFunctions {
    fn context(&mut self) -> &mut MutatorContext {
        &mut self.ctx
    }

    fn visit_var_binding(&mut self, binding: &VarBinding) -> Result<()> {
        if binding.value.as_function().is_none() {
            return walk_var_binding(self, binding);
        }
        let new_value = self.visit_expr(&binding.value)?;
        let new_var = self.visit_var_def(&binding.var)?;
        let closed = match new_value.as_function() {
            Some(func) if free_vars(&new_value).is_empty() => Some(func.clone()),
            _ => None,
        };
        let Some(func) = closed else {
            emit_rebound(self, binding, new_var, new_value)?;
            return Ok(());
        };
        let name = self.next_name();
        debug!(function = %name, var = %binding.var.name_hint, "lifting closed function");
        self.ctx.builder.add_function(name.clone(), func)?;
        let global = self.ctx.builder.normalize(Expr::global(name))?;
        emit_rebound(self, binding, new_var, global)?;
        Ok(())
    }
}

/// Lift every closed local function of `module` to module scope.
#[instrument(skip_all, fields(functions = module.len()))]
pub fn lift_closed_functions(module: &Module) -> Result<Module> {
    let builder = BlockBuilder::with_module(module.clone());
    LiftClosedFunctions::new(builder).transform_module()
}
