//! Variable environments for the evaluator.
//!
//! Backed by `im::HashMap`, so extending an environment for a lambda call
//! shares structure with the enclosing one instead of copying it.

use im::HashMap;

use crate::VName;

use super::value::Value;

/// An immutable mapping from names to values.
#[derive(Clone, Debug, Default)]
pub struct Env {
    bindings: HashMap<VName, Value>,
}

impl Env {
    /// Creates an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a name.
    #[must_use]
    pub fn lookup(&self, name: VName) -> Option<&Value> {
        self.bindings.get(&name)
    }

    /// Returns a new environment with `name` bound to `value`.
    #[must_use]
    pub fn extend(&self, name: VName, value: Value) -> Self {
        Self {
            bindings: self.bindings.update(name, value),
        }
    }

    /// Returns a new environment with all of `bindings` added.
    #[must_use]
    pub fn extend_many(&self, bindings: impl IntoIterator<Item = (VName, Value)>) -> Self {
        let mut new_bindings = self.bindings.clone();
        for (name, value) in bindings {
            new_bindings.insert(name, value);
        }
        Self {
            bindings: new_bindings,
        }
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether the environment is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
