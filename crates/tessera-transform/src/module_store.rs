//! The module a builder works on.
//!
//! A [`ModuleStore`] holds the latest version of a [`Module`]. Every update
//! advances it to a new copy-on-write version; snapshots taken earlier keep
//! the contents they had.

use smol_str::SmolStr;
use tessera_ir::{Function, Module, ModuleResult};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ModuleStore {
    current: Module,
}

impl ModuleStore {
    pub fn new(module: Module) -> Self {
        Self { current: module }
    }

    /// The current version. Cheap: shares storage with the store.
    pub fn snapshot(&self) -> Module {
        self.current.clone()
    }

    pub fn current(&self) -> &Module {
        &self.current
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.current.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.current.contains(name)
    }

    pub fn version(&self) -> u64 {
        self.current.version()
    }

    pub fn add(&mut self, name: impl Into<SmolStr>, func: Function) -> ModuleResult<()> {
        let name = name.into();
        self.current = self.current.with_function(name.clone(), func)?;
        debug!(function = %name, version = self.current.version(), "added global function");
        Ok(())
    }

    pub fn update(&mut self, name: &str, func: Function) -> ModuleResult<()> {
        self.current = self.current.with_updated_function(name, func)?;
        debug!(function = %name, version = self.current.version(), "updated global function");
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> ModuleResult<()> {
        self.current = self.current.without_function(name)?;
        debug!(function = %name, version = self.current.version(), "removed global function");
        Ok(())
    }

    /// `base` if it is free, otherwise `base` followed by the first free
    /// counter value.
    pub fn unique_name(&self, base: &str) -> SmolStr {
        if !self.current.contains(base) {
            return SmolStr::new(base);
        }
        let mut counter = 0usize;
        loop {
            let candidate = format!("{}{}", base, counter);
            if !self.current.contains(&candidate) {
                return SmolStr::new(candidate);
            }
            counter += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_ir::{ModuleError, Var};

    fn identity() -> Function {
        let x = Var::new("x", None, None);
        Function::new(vec![x.clone()], x.to_expr())
    }

    #[test]
    fn test_snapshots_are_stable() {
        let mut store = ModuleStore::default();
        let before = store.snapshot();
        store.add("f", identity()).unwrap();
        assert!(before.is_empty());
        assert!(store.contains("f"));
        assert!(store.version() > before.version());
    }

    #[test]
    fn test_update_and_remove() {
        let mut store = ModuleStore::default();
        assert_eq!(
            store.update("f", identity()),
            Err(ModuleError::UnknownFunction { name: "f".into() })
        );
        store.add("f", identity()).unwrap();
        store.update("f", identity()).unwrap();
        store.remove("f").unwrap();
        assert!(store.current().is_empty());
    }

    #[test]
    fn test_unique_name() {
        let mut store = ModuleStore::default();
        assert_eq!(store.unique_name("f"), "f");
        store.add("f", identity()).unwrap();
        store.add("f0", identity()).unwrap();
        assert_eq!(store.unique_name("f"), "f1");
    }
}
