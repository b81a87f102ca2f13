use crate::schema::ComponentSchema;
use crate::state::ComponentState;
use raxm_protocol::{DataMap, RaxmError, RaxmResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Renders keyed child components from inside a parent's `render`.
pub trait ChildRenderer {
    /// HTML for the child mounted under `key`. A key rendered in the previous
    /// round yields a placeholder; the child keeps its own state client-side.
    fn child(&mut self, key: &str, name: &str, params: &DataMap) -> RaxmResult<String>;
}

/// Child renderer for contexts without nesting support.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoChildren;

impl ChildRenderer for NoChildren {
    fn child(&mut self, _key: &str, name: &str, _params: &DataMap) -> RaxmResult<String> {
        Err(RaxmError::component(format!(
            "nested component {name} cannot be rendered here"
        )))
    }
}

/// Behavior of a component type. Instances are stateless; everything
/// per-request lives in [`ComponentState`].
pub trait ComponentDefinition: Send + Sync {
    fn schema(&self) -> &Arc<ComponentSchema>;

    /// Runs once on first render, after initial props were applied.
    fn mount(&self, _state: &mut ComponentState, _params: &DataMap) -> RaxmResult<()> {
        Ok(())
    }

    /// Runs before a `syncInput` write.
    fn updating(&self, _state: &mut ComponentState, _name: &str, _value: &Value) -> RaxmResult<()> {
        Ok(())
    }

    /// Runs after a `syncInput` write.
    fn updated(&self, _state: &mut ComponentState, _name: &str) -> RaxmResult<()> {
        Ok(())
    }

    /// Invoke a public method. Callers have already checked the schema.
    fn call(&self, state: &mut ComponentState, method: &str, params: &[Value]) -> RaxmResult<Value>;

    fn render(&self, state: &ComponentState, children: &mut dyn ChildRenderer) -> RaxmResult<String>;
}

type MethodFn = Arc<dyn Fn(&mut ComponentState, &[Value]) -> RaxmResult<Value> + Send + Sync>;
type RenderFn =
    Arc<dyn Fn(&ComponentState, &mut dyn ChildRenderer) -> RaxmResult<String> + Send + Sync>;
type MountFn = Arc<dyn Fn(&mut ComponentState, &DataMap) -> RaxmResult<()> + Send + Sync>;
type UpdatedFn = Arc<dyn Fn(&mut ComponentState, &str) -> RaxmResult<()> + Send + Sync>;

/// A [`ComponentDefinition`] assembled from closures: an explicit dispatch
/// table of methods instead of dynamic method lookup.
#[derive(Clone)]
pub struct FnComponent {
    schema: Arc<ComponentSchema>,
    methods: HashMap<String, MethodFn>,
    render: RenderFn,
    mount: Option<MountFn>,
    updated: Option<UpdatedFn>,
}

impl std::fmt::Debug for FnComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("FnComponent")
            .field("schema", &self.schema.name())
            .field("methods", &methods)
            .finish()
    }
}

impl FnComponent {
    pub fn new<R>(schema: ComponentSchema, render: R) -> Self
    where
        R: Fn(&ComponentState, &mut dyn ChildRenderer) -> RaxmResult<String>
            + Send
            + Sync
            + 'static,
    {
        Self {
            schema: Arc::new(schema),
            methods: HashMap::new(),
            render: Arc::new(render),
            mount: None,
            updated: None,
        }
    }

    /// Register a public method; the schema is extended with its name.
    pub fn method<F>(mut self, name: &str, method: F) -> Self
    where
        F: Fn(&mut ComponentState, &[Value]) -> RaxmResult<Value> + Send + Sync + 'static,
    {
        let schema = Arc::make_mut(&mut self.schema);
        *schema = std::mem::take(schema).with_method(name);
        self.methods.insert(name.to_owned(), Arc::new(method));
        self
    }

    pub fn on_mount<F>(mut self, mount: F) -> Self
    where
        F: Fn(&mut ComponentState, &DataMap) -> RaxmResult<()> + Send + Sync + 'static,
    {
        self.mount = Some(Arc::new(mount));
        self
    }

    pub fn on_updated<F>(mut self, updated: F) -> Self
    where
        F: Fn(&mut ComponentState, &str) -> RaxmResult<()> + Send + Sync + 'static,
    {
        self.updated = Some(Arc::new(updated));
        self
    }
}

impl ComponentDefinition for FnComponent {
    fn schema(&self) -> &Arc<ComponentSchema> {
        &self.schema
    }

    fn mount(&self, state: &mut ComponentState, params: &DataMap) -> RaxmResult<()> {
        match &self.mount {
            Some(mount) => mount(state, params),
            None => Ok(()),
        }
    }

    fn updated(&self, state: &mut ComponentState, name: &str) -> RaxmResult<()> {
        match &self.updated {
            Some(updated) => updated(state, name),
            None => Ok(()),
        }
    }

    fn call(&self, state: &mut ComponentState, method: &str, params: &[Value]) -> RaxmResult<Value> {
        let handler = self
            .methods
            .get(method)
            .ok_or_else(|| RaxmError::MethodNotFound {
                component: self.schema.name().to_owned(),
                method: method.to_owned(),
            })?;
        handler(state, params)
    }

    fn render(&self, state: &ComponentState, children: &mut dyn ChildRenderer) -> RaxmResult<String> {
        (self.render)(state, children)
    }
}
