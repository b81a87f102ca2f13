use raxm_component::ComponentDefinition;
use raxm_protocol::{RaxmError, RaxmResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Component definitions addressable by name.
#[derive(Default, Clone)]
pub struct DefinitionRegistry {
    definitions: HashMap<String, Arc<dyn ComponentDefinition>>,
}

impl fmt::Debug for DefinitionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefinitionRegistry")
            .field("components", &self.names())
            .finish()
    }
}

impl DefinitionRegistry {
    /// Register under the schema name. A later registration replaces an
    /// earlier one with the same name.
    pub fn register(&mut self, definition: impl ComponentDefinition + 'static) {
        self.register_arc(Arc::new(definition));
    }

    pub fn register_arc(&mut self, definition: Arc<dyn ComponentDefinition>) {
        let name = definition.schema().name().to_owned();
        self.definitions.insert(name, definition);
    }

    pub fn get(&self, name: &str) -> RaxmResult<&Arc<dyn ComponentDefinition>> {
        self.definitions
            .get(name)
            .ok_or_else(|| RaxmError::ComponentNotFound(name.to_owned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// Sorted component names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
