//! Copy-on-write collection of global functions.

use crate::expr::Function;
use indexmap::IndexMap;
use smol_str::SmolStr;
use std::sync::Arc;
use thiserror::Error;

/// Errors from module updates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    #[error("global function `{name}` is already defined")]
    DuplicateFunction { name: SmolStr },

    #[error("cannot find global function `{name}`")]
    UnknownFunction { name: SmolStr },
}

/// Result type for module updates
pub type ModuleResult<T> = std::result::Result<T, ModuleError>;

/// A program: global functions in definition order.
///
/// Cloning is cheap and every update returns a new module, so older values
/// stay valid while a transformation builds newer ones.
#[derive(Debug, Clone, Default)]
pub struct Module {
    functions: Arc<IndexMap<SmolStr, Arc<Function>>>,
    version: u64,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of updates that produced this module.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.get(name).map(|f| f.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Function names in definition order.
    pub fn names(&self) -> Vec<SmolStr> {
        self.functions.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SmolStr, &Function)> {
        self.functions.iter().map(|(name, f)| (name, f.as_ref()))
    }

    /// Add a new function.
    pub fn with_function(&self, name: impl Into<SmolStr>, func: Function) -> ModuleResult<Module> {
        let name = name.into();
        if self.functions.contains_key(&name) {
            return Err(ModuleError::DuplicateFunction { name });
        }
        Ok(self.derive(|map| {
            map.insert(name, Arc::new(func));
        }))
    }

    /// Replace an existing function, keeping its position.
    pub fn with_updated_function(&self, name: &str, func: Function) -> ModuleResult<Module> {
        if !self.functions.contains_key(name) {
            return Err(ModuleError::UnknownFunction { name: name.into() });
        }
        Ok(self.derive(|map| {
            if let Some(slot) = map.get_mut(name) {
                *slot = Arc::new(func);
            }
        }))
    }

    /// Remove a function.
    pub fn without_function(&self, name: &str) -> ModuleResult<Module> {
        if !self.functions.contains_key(name) {
            return Err(ModuleError::UnknownFunction { name: name.into() });
        }
        Ok(self.derive(|map| {
            map.shift_remove(name);
        }))
    }

    /// Whether two modules share the same storage.
    pub fn ptr_eq(&self, other: &Module) -> bool {
        Arc::ptr_eq(&self.functions, &other.functions)
    }

    fn derive(&self, update: impl FnOnce(&mut IndexMap<SmolStr, Arc<Function>>)) -> Module {
        let mut functions = (*self.functions).clone();
        update(&mut functions);
        Module {
            functions: Arc::new(functions),
            version: self.version + 1,
        }
    }
}

impl PartialEq for Module {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
            || (self.functions.len() == other.functions.len()
                && self
                    .functions
                    .iter()
                    .zip(other.functions.iter())
                    .all(|((n1, f1), (n2, f2))| n1 == n2 && f1 == f2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Expr, Var};

    fn identity() -> Function {
        let x = Var::new("x", None, None);
        Function::new(vec![x.clone()], x.to_expr())
    }

    #[test]
    fn test_add_keeps_old_version_readable() {
        let empty = Module::new();
        let one = empty.with_function("main", identity()).unwrap();
        assert!(empty.is_empty());
        assert_eq!(one.len(), 1);
        assert!(one.version() > empty.version());
        assert!(!one.ptr_eq(&empty));
    }

    #[test]
    fn test_duplicate_and_unknown() {
        let m = Module::new().with_function("main", identity()).unwrap();
        assert_eq!(
            m.with_function("main", identity()).unwrap_err(),
            ModuleError::DuplicateFunction { name: "main".into() }
        );
        assert!(matches!(
            m.with_updated_function("other", identity()),
            Err(ModuleError::UnknownFunction { .. })
        ));
        assert_eq!(
            m.without_function("other").unwrap_err().to_string(),
            "cannot find global function `other`"
        );
    }

    #[test]
    fn test_update_preserves_order() {
        let m = Module::new()
            .with_function("a", identity())
            .unwrap()
            .with_function("b", identity())
            .unwrap();
        let f = Function::new(Vec::new(), Expr::global("b"));
        let updated = m.with_updated_function("a", f.clone()).unwrap();
        assert_eq!(updated.names(), vec![SmolStr::new("a"), SmolStr::new("b")]);
        assert_eq!(updated.get("a"), Some(&f));
        assert_ne!(m.get("a"), Some(&f));

        let removed = updated.without_function("a").unwrap();
        assert_eq!(removed.names(), vec![SmolStr::new("b")]);
    }
}
