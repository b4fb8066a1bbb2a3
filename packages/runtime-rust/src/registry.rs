use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use repokeeper_core::Descriptor;

use crate::operator::{BoxedOperator, Operator};

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Concurrent name -> operator directory.
///
/// Populated at startup and read on every dispatch. `register` takes the write
/// lock, lookups take the read lock. Registering under an existing name
/// replaces the previous operator; versions are informational only.
#[derive(Default)]
pub struct Registry {
    operators: RwLock<HashMap<String, BoxedOperator>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a concrete operator.
    pub fn register<T: Operator + 'static>(&self, op: T) {
        self.register_arc(Arc::new(op));
    }

    /// Register an already type-erased operator (e.g. the result of `adapt`).
    pub fn register_arc(&self, op: BoxedOperator) {
        let name = op.name().to_string();
        let version = op.version().to_string();
        if let Some(previous) = self.operators.write().insert(name.clone(), op) {
            tracing::debug!(
                operator = %name,
                version = %version,
                replaced_version = %previous.version(),
                "operator re-registered"
            );
        }
    }

    /// Retrieve an operator by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<BoxedOperator> {
        self.operators.read().get(name).cloned()
    }

    /// Name and version of every registered operator, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<Descriptor> {
        let mut descriptors: Vec<Descriptor> = self
            .operators
            .read()
            .values()
            .map(|op| Descriptor {
                name: op.name().to_string(),
                version: op.version().to_string(),
            })
            .collect();
        descriptors.sort();
        descriptors
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operators.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operators.read().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
