use indexmap::{IndexMap, IndexSet};
use raxm_protocol::{DataMap, RaxmError, RaxmResult};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Lifecycle names that can never be invoked through `callMethod`.
pub const RESERVED_METHODS: [&str; 7] = [
    "hydrate",
    "dehydrate",
    "mount",
    "render",
    "boot",
    "updating",
    "updated",
];

/// Declared kind of a public property. `null` is accepted for every kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropKind {
    String,
    Integer,
    Float,
    Boolean,
    Array,
    Object,
    Any,
}

impl PropKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        }
    }

    /// Coerce an incoming value to this kind. Form inputs deliver strings,
    /// so numeric and boolean kinds accept their textual forms.
    pub fn coerce(self, property: &str, value: Value) -> RaxmResult<Value> {
        let mismatch = || RaxmError::PropertyTypeMismatch {
            property: property.to_owned(),
            expected: self.name(),
        };

        match (self, value) {
            (Self::Any, value) => Ok(value),
            (_, Value::Null) => Ok(Value::Null),
            (Self::String, Value::String(text)) => Ok(Value::String(text)),
            (Self::String, Value::Number(number)) => Ok(Value::String(number.to_string())),
            (Self::String, Value::Bool(flag)) => Ok(Value::String(flag.to_string())),
            (Self::Integer, Value::Number(number)) => {
                if number.is_i64() || number.is_u64() {
                    Ok(Value::Number(number))
                } else {
                    match number.as_f64() {
                        Some(float) if float.fract() == 0.0 => {
                            Ok(Value::Number(Number::from(float as i64)))
                        }
                        _ => Err(mismatch()),
                    }
                }
            }
            (Self::Integer, Value::String(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    return Ok(Value::Null);
                }
                text.parse::<i64>()
                    .map(|int| Value::Number(Number::from(int)))
                    .map_err(|_| mismatch())
            }
            (Self::Float, Value::Number(number)) => Ok(Value::Number(number)),
            (Self::Float, Value::String(text)) => {
                let text = text.trim();
                if text.is_empty() {
                    return Ok(Value::Null);
                }
                text.parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(mismatch)
            }
            (Self::Boolean, Value::Bool(flag)) => Ok(Value::Bool(flag)),
            (Self::Boolean, Value::String(text)) => match text.trim() {
                "true" | "1" | "on" | "yes" => Ok(Value::Bool(true)),
                "false" | "0" | "off" | "no" | "" => Ok(Value::Bool(false)),
                _ => Err(mismatch()),
            },
            (Self::Boolean, Value::Number(number)) => match number.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(mismatch()),
            },
            (Self::Array, Value::Array(items)) => Ok(Value::Array(items)),
            (Self::Object, Value::Object(map)) => Ok(Value::Object(map)),
            _ => Err(mismatch()),
        }
    }
}

/// One declared public property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySpec {
    pub name: String,
    pub kind: PropKind,
    pub default: Value,
}

/// Explicit description of a component's public surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentSchema {
    name: String,
    properties: IndexMap<String, PropertySpec>,
    methods: IndexSet<String>,
    listeners: IndexMap<String, String>,
    rules: IndexMap<String, String>,
}

impl ComponentSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, kind: PropKind, default: Value) -> Self {
        let name = name.into();
        self.properties.insert(
            name.clone(),
            PropertySpec {
                name,
                kind,
                default,
            },
        );
        self
    }

    pub fn with_method(mut self, name: impl Into<String>) -> Self {
        self.methods.insert(name.into());
        self
    }

    /// Bind a listener name to a method; the method becomes callable.
    pub fn with_listener(mut self, event: impl Into<String>, method: impl Into<String>) -> Self {
        let method = method.into();
        self.methods.insert(method.clone());
        self.listeners.insert(event.into(), method);
        self
    }

    /// Rules for a property path, e.g. `"required|min:3"`.
    pub fn with_rules(mut self, path: impl Into<String>, rules: impl Into<String>) -> Self {
        self.rules.insert(path.into(), rules.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn property(&self, name: &str) -> Option<&PropertySpec> {
        self.properties.get(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertySpec> {
        self.properties.values()
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// Declared, and not one of the reserved lifecycle names.
    pub fn is_public_method(&self, name: &str) -> bool {
        self.methods.contains(name) && !RESERVED_METHODS.contains(&name)
    }

    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods
            .iter()
            .map(String::as_str)
            .filter(|name| !RESERVED_METHODS.contains(name))
    }

    pub fn listener_method(&self, event: &str) -> Option<&str> {
        self.listeners.get(event).map(String::as_str)
    }

    pub fn listeners(&self) -> impl Iterator<Item = &str> {
        self.listeners.keys().map(String::as_str)
    }

    pub fn rules(&self) -> &IndexMap<String, String> {
        &self.rules
    }

    /// Defaults for every property, in declaration order.
    pub fn defaults(&self) -> DataMap {
        self.properties
            .values()
            .map(|spec| (spec.name.clone(), spec.default.clone()))
            .collect()
    }
}
