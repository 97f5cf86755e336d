//! Output type registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::error::EngineError;
use crate::plugin::OutputDefinition;
use crate::EngineResult;

/// Record of one registered output type.
#[derive(Clone)]
pub struct Registration {
    definition: Arc<dyn OutputDefinition>,
}

impl Registration {
    pub fn id(&self) -> &'static str {
        self.definition.id()
    }

    pub fn display_name(&self) -> &'static str {
        self.definition.display_name()
    }

    pub fn definition(&self) -> &Arc<dyn OutputDefinition> {
        &self.definition
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id())
            .field("display_name", &self.display_name())
            .finish()
    }
}

/// Output types known to an engine.
#[derive(Default)]
pub struct OutputRegistry {
    definitions: RwLock<HashMap<&'static str, Registration>>,
}

impl OutputRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an output type. Fails if the id is taken.
    pub fn register(&self, definition: Arc<dyn OutputDefinition>) -> EngineResult<Registration> {
        let id = definition.id();
        let mut definitions = self.definitions.write();

        if definitions.contains_key(id) {
            return Err(EngineError::AlreadyRegistered(id.to_string()));
        }

        let registration = Registration { definition };
        definitions.insert(id, registration.clone());
        info!(id, name = registration.display_name(), "Registered output type");

        Ok(registration)
    }

    /// Register an output type unless one with the same id exists, in
    /// which case the existing record is returned.
    pub fn register_once<F>(&self, id: &'static str, make: F) -> Registration
    where
        F: FnOnce() -> Arc<dyn OutputDefinition>,
    {
        let mut definitions = self.definitions.write();
        if let Some(existing) = definitions.get(id) {
            return existing.clone();
        }

        let registration = Registration { definition: make() };
        definitions.insert(id, registration.clone());
        info!(id, name = registration.display_name(), "Registered output type");

        registration
    }

    pub fn get(&self, id: &str) -> Option<Registration> {
        self.definitions.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.definitions.read().contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<_> = self.definitions.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
