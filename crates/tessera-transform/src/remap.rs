//! Variable remapping.
//!
//! When a rewrite changes the annotations of a bound variable, the variable
//! keeps its identity and gets new annotations. [`VarRemap`] maps the identity
//! to the up-to-date variable so that every later reference in the same
//! traversal carries the new annotations.

use rustc_hash::FxHashMap;
use tessera_ir::{Var, VarId};
use tracing::trace;

/// Per-traversal table from variable identity to its replacement.
#[derive(Debug, Clone, Default)]
pub struct VarRemap {
    table: FxHashMap<VarId, Var>,
}

impl VarRemap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, id: VarId) -> Option<&Var> {
        self.table.get(&id)
    }

    /// Record `new` as the replacement of `old` if their annotations differ.
    /// Returns whether an entry was recorded. When they agree, an earlier
    /// entry for the identity is dropped.
    pub fn record_if_changed(&mut self, old: &Var, new: &Var) -> bool {
        if old.annotations_equal(new) {
            self.table.remove(&old.id);
            return false;
        }
        trace!(var = %old.name_hint, id = %old.id, "remapped variable");
        self.table.insert(old.id, new.clone());
        true
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }
}
