//! Incremental construction of binding blocks.
//!
//! A [`BlockBuilder`] keeps a stack of open blocks. Passes emit bindings into
//! the innermost one while they traverse, and the normalizer hoists nested
//! operands there. The stack is strictly LIFO: [`BlockBuilder::scope`] closes
//! the block it opened on every exit path.
//!
//! The builder also owns the module under transformation and the two
//! oracles used by normalization: type inference and shape equality.

use std::fmt;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;
use tessera_arith::{Analyzer, ShapeEquivalence};
use tessera_ir::{
    Binding, BindingBlock, Expr, Function, MatchShape, Module, PrimExpr, Type, Var, VarBinding,
};
use tracing::{debug, trace};

use crate::config::TransformConfig;
use crate::error::{Result, StructuralError};
use crate::infer::{OpRegistry, TypeInference};
use crate::module_store::ModuleStore;

/// Bindings accumulated for one open block.
#[derive(Debug)]
struct BlockFrame {
    bindings: Vec<Binding>,
    is_dataflow: bool,
}

/// A function under construction.
#[derive(Debug)]
struct FunctionFrame {
    name: SmolStr,
    params: Vec<Var>,
    blocks: Vec<BindingBlock>,
    /// Block stack depth when the function was opened.
    depth: usize,
}

/// Counts of `begin_block` and `end_block` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScopeStats {
    pub begun: usize,
    pub ended: usize,
}

impl ScopeStats {
    pub fn is_balanced(&self) -> bool {
        self.begun == self.ended
    }
}

/// Names handed out so far. Explicit hints are kept as given; anonymous
/// bindings get a prefix and the first free counter value.
#[derive(Debug, Default)]
struct NameTable {
    used: FxHashSet<SmolStr>,
    counters: FxHashMap<SmolStr, usize>,
}

impl NameTable {
    fn reserve(&mut self, name: &SmolStr) {
        self.used.insert(name.clone());
    }

    fn fresh(&mut self, hint: &str, prefix: &str) -> SmolStr {
        if !hint.is_empty() {
            let name = SmolStr::new(hint);
            self.used.insert(name.clone());
            return name;
        }
        let counter = self.counters.entry(SmolStr::new(prefix)).or_insert(0);
        loop {
            let candidate = SmolStr::new(format!("{}{}", prefix, counter));
            *counter += 1;
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }
}

/// Builds binding blocks and functions one binding at a time, over a
/// copy-on-write module.
pub struct BlockBuilder {
    frames: Vec<BlockFrame>,
    functions: Vec<FunctionFrame>,
    module: ModuleStore,
    oracle: Arc<dyn ShapeEquivalence>,
    pub(crate) inference: Arc<dyn TypeInference>,
    names: NameTable,
    config: TransformConfig,
    stats: ScopeStats,
}

impl fmt::Debug for BlockBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockBuilder")
            .field("frames", &self.frames)
            .field("functions", &self.functions)
            .field("module_version", &self.module.version())
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Default for BlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockBuilder {
    /// A builder over an empty module.
    pub fn new() -> Self {
        Self::with_module(Module::new())
    }

    pub fn with_module(module: Module) -> Self {
        Self {
            frames: Vec::new(),
            functions: Vec::new(),
            module: ModuleStore::new(module),
            oracle: Arc::new(Analyzer::new()),
            inference: Arc::new(OpRegistry::with_builtins()),
            names: NameTable::default(),
            config: TransformConfig::default(),
            stats: ScopeStats::default(),
        }
    }

    pub fn with_config(mut self, config: TransformConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn ShapeEquivalence>) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn with_inference(mut self, inference: Arc<dyn TypeInference>) -> Self {
        self.inference = inference;
        self
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    pub fn oracle(&self) -> &dyn ShapeEquivalence {
        self.oracle.as_ref()
    }

    // ========================================================================
    // Block stack
    // ========================================================================

    /// Open a new block nested in the current one.
    pub fn begin_block(&mut self, is_dataflow: bool) -> Result<()> {
        if is_dataflow && self.current_block_is_dataflow() {
            return Err(StructuralError::NestedDataflowBlock.into());
        }
        self.frames.push(BlockFrame {
            bindings: Vec::new(),
            is_dataflow,
        });
        self.stats.begun += 1;
        trace!(depth = self.frames.len(), is_dataflow, "begin block");
        Ok(())
    }

    pub fn begin_dataflow_block(&mut self) -> Result<()> {
        self.begin_block(true)
    }

    pub fn begin_binding_block(&mut self) -> Result<()> {
        self.begin_block(false)
    }

    /// Close the innermost block and return its bindings.
    pub fn end_block(&mut self) -> Result<BindingBlock> {
        let frame = self
            .frames
            .pop()
            .ok_or(StructuralError::UnmatchedEndBlock)?;
        self.stats.ended += 1;
        trace!(
            depth = self.frames.len(),
            bindings = frame.bindings.len(),
            "end block"
        );
        Ok(BindingBlock {
            bindings: frame.bindings,
            is_dataflow: frame.is_dataflow,
        })
    }

    /// Run `f` inside a new block. The block is closed whatever `f` returns,
    /// and so is every block `f` opened and left open.
    pub fn scope<T>(
        &mut self,
        is_dataflow: bool,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<(T, BindingBlock)> {
        let depth = self.open_scope(is_dataflow)?;
        let result = f(self);
        self.close_scope(depth, result)
    }

    pub(crate) fn open_scope(&mut self, is_dataflow: bool) -> Result<usize> {
        let depth = self.frames.len();
        self.begin_block(is_dataflow)?;
        Ok(depth)
    }

    /// Close the block opened at `depth` once its contents are done.
    pub(crate) fn close_scope<T>(
        &mut self,
        depth: usize,
        result: Result<T>,
    ) -> Result<(T, BindingBlock)> {
        if self.frames.len() <= depth {
            // the scope's own block was closed by its contents
            return result.and(Err(StructuralError::UnmatchedEndBlock.into()));
        }
        let leaked = self.unwind_to(depth + 1);
        let block = self.end_block()?;
        let value = result?;
        if leaked > 0 {
            return Err(StructuralError::UnclosedBlocks { count: leaked }.into());
        }
        Ok((value, block))
    }

    /// Drop open blocks until `depth` remain. Returns how many were dropped.
    fn unwind_to(&mut self, depth: usize) -> usize {
        let mut dropped = 0;
        while self.frames.len() > depth {
            self.frames.pop();
            self.stats.ended += 1;
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, depth, "unwound open blocks");
        }
        dropped
    }

    /// Whether the innermost open block is a dataflow block.
    pub fn current_block_is_dataflow(&self) -> bool {
        self.frames.last().is_some_and(|f| f.is_dataflow)
    }

    /// Number of open blocks.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn scope_stats(&self) -> ScopeStats {
        self.stats
    }

    // ========================================================================
    // Emission
    // ========================================================================

    fn current_frame(&mut self, operation: &'static str) -> Result<&mut BlockFrame> {
        self.frames
            .last_mut()
            .ok_or_else(|| StructuralError::NoOpenBlock { operation }.into())
    }

    fn fresh_var(
        &mut self,
        name_hint: &str,
        is_dataflow: bool,
        shape: Option<Expr>,
        checked_type: Option<Type>,
    ) -> Var {
        let prefix = if is_dataflow {
            self.config.binding_prefix.clone()
        } else {
            self.config.output_prefix.clone()
        };
        let name = self.names.fresh(name_hint, &prefix);
        if is_dataflow {
            Var::dataflow(name, shape, checked_type)
        } else {
            Var::new(name, shape, checked_type)
        }
    }

    /// Bind `expr` to a fresh variable in the innermost block. The variable
    /// is a dataflow variable iff the block is a dataflow block, and takes
    /// the expression's metadata. `expr` is not normalized.
    pub fn emit(&mut self, expr: Expr, name_hint: &str) -> Result<Var> {
        let is_dataflow = self.current_frame("emit")?.is_dataflow;
        let var = self.fresh_var(
            name_hint,
            is_dataflow,
            expr.shape().cloned(),
            expr.checked_type.clone(),
        );
        trace!(var = %var.name_hint, value = %expr, "emit");
        self.push_binding(VarBinding::new(var.clone(), expr).into(), "emit")?;
        Ok(var)
    }

    /// Normalize `expr`, then emit it.
    pub fn emit_normalized(&mut self, expr: Expr, name_hint: &str) -> Result<Var> {
        let expr = self.normalize(expr)?;
        self.emit(expr, name_hint)
    }

    /// Bind `expr` to a non-dataflow variable inside a dataflow block.
    pub fn emit_output(&mut self, expr: Expr, name_hint: &str) -> Result<Var> {
        if !self.current_frame("emit_output")?.is_dataflow {
            return Err(StructuralError::OutputOutsideDataflow {
                name: SmolStr::new(name_hint),
            }
            .into());
        }
        let var = self.fresh_var(
            name_hint,
            false,
            expr.shape().cloned(),
            expr.checked_type.clone(),
        );
        trace!(var = %var.name_hint, value = %expr, "emit output");
        self.push_binding(VarBinding::new(var.clone(), expr).into(), "emit_output")?;
        Ok(var)
    }

    /// Match `value`'s shape against `pattern` and bind the result.
    pub fn emit_match_shape(
        &mut self,
        value: Expr,
        pattern: Vec<PrimExpr>,
        name_hint: &str,
    ) -> Result<Var> {
        let is_dataflow = self.current_frame("emit_match_shape")?.is_dataflow;
        let (checked_type, shape) = MatchShape::var_annotations(&value, &pattern);
        let var = self.fresh_var(name_hint, is_dataflow, shape, checked_type);
        trace!(var = %var.name_hint, value = %value, "emit match_shape");
        self.push_binding(
            MatchShape::new(value, pattern, Some(var.clone())).into(),
            "emit_match_shape",
        )?;
        Ok(var)
    }

    /// Re-emit an existing value binding.
    pub fn emit_binding(&mut self, binding: VarBinding) -> Result<Var> {
        let var = binding.var.clone();
        self.names.reserve(&var.name_hint);
        self.push_binding(binding.into(), "emit")?;
        Ok(var)
    }

    /// Re-emit an existing binding as an output of the current dataflow
    /// block.
    pub fn emit_output_binding(&mut self, binding: VarBinding) -> Result<Var> {
        if !self.current_frame("emit_output")?.is_dataflow {
            return Err(StructuralError::OutputOutsideDataflow {
                name: binding.var.name_hint.clone(),
            }
            .into());
        }
        self.emit_binding(binding)
    }

    /// Re-emit an existing match-shape binding.
    pub fn emit_match_shape_binding(&mut self, binding: MatchShape) -> Result<Option<Var>> {
        let var = binding.var.clone();
        if let Some(var) = &var {
            self.names.reserve(&var.name_hint);
        }
        self.push_binding(binding.into(), "emit_match_shape")?;
        Ok(var)
    }

    pub(crate) fn push_binding(&mut self, binding: Binding, operation: &'static str) -> Result<()> {
        let frame = self.current_frame(operation)?;
        if let Some(var) = binding.var() {
            if var.is_dataflow && !frame.is_dataflow {
                return Err(StructuralError::DataflowVarInOrdinaryBlock {
                    name: var.name_hint.clone(),
                }
                .into());
            }
        }
        frame.bindings.push(binding);
        Ok(())
    }

    // ========================================================================
    // Module
    // ========================================================================

    /// The current module. Later updates do not affect the returned value.
    pub fn get_module(&self) -> Module {
        self.module.snapshot()
    }

    pub(crate) fn module(&self) -> &Module {
        self.module.current()
    }

    pub fn add_function(&mut self, name: impl Into<SmolStr>, func: Function) -> Result<()> {
        Ok(self.module.add(name, func)?)
    }

    pub fn update_function(&mut self, name: &str, func: Function) -> Result<()> {
        Ok(self.module.update(name, func)?)
    }

    pub fn remove_function(&mut self, name: &str) -> Result<()> {
        Ok(self.module.remove(name)?)
    }

    pub fn lookup_function(&self, name: &str) -> Option<&Function> {
        self.module.get(name)
    }

    /// A global name based on `base` that the module does not use yet.
    pub fn unique_function_name(&self, base: &str) -> SmolStr {
        self.module.unique_name(base)
    }

    // ========================================================================
    // Shape equality
    // ========================================================================

    pub fn shapes_provably_equal(&self, lhs: &Expr, rhs: &Expr) -> bool {
        self.oracle.shapes_provably_equal(lhs, rhs)
    }

    pub fn prims_provably_equal(&self, lhs: &PrimExpr, rhs: &PrimExpr) -> bool {
        self.oracle.prims_provably_equal(lhs, rhs)
    }

    // ========================================================================
    // Function building
    // ========================================================================

    /// Start building global function `name`. Bindings emitted until the
    /// matching [`emit_func_output`](Self::emit_func_output) go into ordinary
    /// blocks, except inside [`dataflow`](Self::dataflow).
    pub fn begin_function(&mut self, name: impl Into<SmolStr>, params: Vec<Var>) -> Result<()> {
        let name = name.into();
        for param in &params {
            self.names.reserve(&param.name_hint);
        }
        debug!(function = %name, params = params.len(), "begin function");
        self.functions.push(FunctionFrame {
            name,
            params,
            blocks: Vec::new(),
            depth: self.frames.len(),
        });
        self.begin_block(false)
    }

    fn function_frame(&self) -> Result<&FunctionFrame> {
        let frame = self
            .functions
            .last()
            .ok_or(StructuralError::NoFunctionScope)?;
        if self.frames.len() != frame.depth + 1 {
            return Err(StructuralError::FunctionScopeMismatch {
                name: frame.name.clone(),
            }
            .into());
        }
        Ok(frame)
    }

    fn push_function_block(&mut self, block: BindingBlock) {
        if block.is_empty() {
            return;
        }
        if let Some(frame) = self.functions.last_mut() {
            frame.blocks.push(block);
        }
    }

    /// Run `f` inside a dataflow block of the function being built.
    pub fn dataflow<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.function_frame()?;
        let pending = self.end_block()?;
        self.push_function_block(pending);
        let result = self.scope(true, f);
        self.begin_block(false)?;
        let (value, block) = result?;
        self.push_function_block(block);
        Ok(value)
    }

    /// Finish the function being built with `output` as its result, and add
    /// it to the module.
    pub fn emit_func_output(&mut self, output: Expr) -> Result<Function> {
        self.function_frame()?;
        let output = self.normalize(output)?;
        let last = self.end_block()?;
        self.push_function_block(last);
        let frame = self
            .functions
            .pop()
            .ok_or(StructuralError::NoFunctionScope)?;
        let body = if frame.blocks.is_empty() {
            output
        } else {
            Expr::seq(frame.blocks, output)
        };
        let func = Self::complete_signature(Function::new(frame.params, body));
        self.module.add(frame.name.clone(), func.clone())?;
        debug!(function = %frame.name, "finished function");
        Ok(func)
    }

    /// Build global function `name` from the output of `f`. On error the
    /// function is abandoned and its blocks are closed.
    pub fn function(
        &mut self,
        name: impl Into<SmolStr>,
        params: Vec<Var>,
        f: impl FnOnce(&mut Self) -> Result<Expr>,
    ) -> Result<Function> {
        let open = self.functions.len();
        self.begin_function(name, params)?;
        let result = f(self).and_then(|output| self.emit_func_output(output));
        if result.is_err() {
            self.abandon_functions(open);
        }
        result
    }

    fn abandon_functions(&mut self, keep: usize) {
        while self.functions.len() > keep {
            if let Some(frame) = self.functions.pop() {
                debug!(function = %frame.name, "abandoned function");
                self.unwind_to(frame.depth);
            }
        }
    }

    /// The final module. Fails if blocks or functions are still open.
    pub fn finish(self) -> Result<Module> {
        if let Some(frame) = self.functions.last() {
            return Err(StructuralError::FunctionScopeMismatch {
                name: frame.name.clone(),
            }
            .into());
        }
        if !self.frames.is_empty() {
            return Err(StructuralError::UnclosedBlocks {
                count: self.frames.len(),
            }
            .into());
        }
        Ok(self.module.snapshot())
    }
}
