//! Validation port and a small rule-string implementation.
//!
//! The full rule engine is an external collaborator; [`RuleValidator`]
//! covers the handful of rules components need for forms.

use indexmap::IndexMap;
use raxm_protocol::{DataMap, path};
use serde_json::Value;
use tracing::warn;

/// `validate(rules, data) -> errors`. An empty map means success.
pub trait Validator: Send + Sync {
    fn validate(
        &self,
        rules: &IndexMap<String, String>,
        data: &DataMap,
    ) -> IndexMap<String, Vec<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule {
    Required,
    Numeric,
    Integer,
    Email,
    Min(f64),
    Max(f64),
}

impl Rule {
    pub fn parse(raw: &str) -> Option<Self> {
        let (name, argument) = match raw.split_once(':') {
            Some((name, argument)) => (name.trim(), Some(argument.trim())),
            None => (raw.trim(), None),
        };
        match (name, argument) {
            ("required", None) => Some(Self::Required),
            ("numeric", None) => Some(Self::Numeric),
            ("integer", None) => Some(Self::Integer),
            ("email", None) => Some(Self::Email),
            ("min", Some(argument)) => argument.parse().ok().map(Self::Min),
            ("max", Some(argument)) => argument.parse().ok().map(Self::Max),
            _ => None,
        }
    }

    pub fn parse_list(rules: &str) -> Vec<Self> {
        rules
            .split('|')
            .filter(|raw| !raw.trim().is_empty())
            .filter_map(|raw| {
                let rule = Self::parse(raw);
                if rule.is_none() {
                    warn!(rule = raw, "unknown validation rule ignored");
                }
                rule
            })
            .collect()
    }

    fn check(self, field: &str, value: Option<&Value>) -> Option<String> {
        let label = field.replace(['.', '_'], " ");
        let value = value.filter(|value| !is_blank(value));
        match self {
            Self::Required => value
                .is_none()
                .then(|| format!("The {label} field is required.")),
            // Remaining rules only apply to present values.
            _ if value.is_none() => None,
            Self::Numeric => value
                .and_then(as_number)
                .is_none()
                .then(|| format!("The {label} must be a number.")),
            Self::Integer => value
                .and_then(as_number)
                .filter(|number| number.fract() == 0.0)
                .is_none()
                .then(|| format!("The {label} must be an integer.")),
            Self::Email => value
                .and_then(Value::as_str)
                .filter(|text| looks_like_email(text))
                .is_none()
                .then(|| format!("The {label} must be a valid email address.")),
            Self::Min(bound) => {
                let size = value.map(size_of).unwrap_or_default();
                (size < bound).then(|| match value {
                    Some(Value::String(_)) => {
                        format!("The {label} must be at least {bound} characters.")
                    }
                    Some(Value::Array(_)) => {
                        format!("The {label} must have at least {bound} items.")
                    }
                    _ => format!("The {label} must be at least {bound}."),
                })
            }
            Self::Max(bound) => {
                let size = value.map(size_of).unwrap_or_default();
                (size > bound).then(|| match value {
                    Some(Value::String(_)) => {
                        format!("The {label} may not be greater than {bound} characters.")
                    }
                    Some(Value::Array(_)) => {
                        format!("The {label} may not have more than {bound} items.")
                    }
                    _ => format!("The {label} may not be greater than {bound}."),
                })
            }
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn size_of(value: &Value) -> f64 {
    match value {
        Value::String(text) => text.chars().count() as f64,
        Value::Array(items) => items.len() as f64,
        Value::Object(map) => map.len() as f64,
        other => as_number(other).unwrap_or_default(),
    }
}

fn looks_like_email(text: &str) -> bool {
    let Some((local, domain)) = text.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !text.contains(char::is_whitespace)
}

/// Rule-string validator (`"required|min:3"`).
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleValidator;

impl Validator for RuleValidator {
    fn validate(
        &self,
        rules: &IndexMap<String, String>,
        data: &DataMap,
    ) -> IndexMap<String, Vec<String>> {
        let mut errors = IndexMap::new();
        for (field, raw_rules) in rules {
            let value = path::get(data, field);
            let messages: Vec<String> = Rule::parse_list(raw_rules)
                .into_iter()
                .filter_map(|rule| rule.check(field, value))
                .collect();
            if !messages.is_empty() {
                errors.insert(field.clone(), messages);
            }
        }
        errors
    }
}
