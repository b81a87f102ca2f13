//! `axm:*` attribute parsing.
//!
//! `axm:model.debounce.500ms="search"` reads as directive `model` with
//! modifiers `["debounce", "500ms"]` and value `search`.

use crate::dom::{Document, NodeId};
use raxm_protocol::DIRECTIVE_PREFIX;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_MODEL_DEBOUNCE: Duration = Duration::from_millis(150);

/// Directives that mark or configure an element rather than bind an event.
const MARKERS: [&str; 5] = ["id", "initial-data", "key", "ignore", "model"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    pub modifiers: Vec<String>,
    pub value: String,
}

impl Directive {
    /// `None` when `attr` is not an `axm:` attribute.
    pub fn parse(attr: &str, value: &str) -> Option<Self> {
        let rest = attr.strip_prefix(DIRECTIVE_PREFIX)?;
        let mut parts = rest.split('.');
        let name = parts.next().filter(|name| !name.is_empty())?;
        Some(Self {
            name: name.to_owned(),
            modifiers: parts.map(str::to_owned).collect(),
            value: value.to_owned(),
        })
    }

    pub fn has_modifier(&self, modifier: &str) -> bool {
        self.modifiers.iter().any(|m| m == modifier)
    }

    pub fn is_event_binding(&self) -> bool {
        !MARKERS.contains(&self.name.as_str())
    }

    /// First modifier shaped like a duration (`500ms`, `2s`).
    pub fn duration(&self) -> Option<Duration> {
        self.modifiers.iter().find_map(|modifier| parse_duration(modifier))
    }

    /// Key modifiers of a keyboard binding (`axm:keydown.enter`), excluding
    /// behaviour modifiers.
    pub fn key_filter(&self) -> Vec<&str> {
        const BEHAVIOUR: [&str; 6] = ["prevent", "stop", "self", "debounce", "prefetch", "lazy"];
        self.modifiers
            .iter()
            .map(String::as_str)
            .filter(|modifier| !BEHAVIOUR.contains(modifier))
            .filter(|modifier| parse_duration(modifier).is_none())
            .collect()
    }

    /// Whether a key event with `key` passes the key filter. `ArrowUp` is
    /// matched by the modifier `arrow-up`.
    pub fn matches_key(&self, key: Option<&str>) -> bool {
        let filter = self.key_filter();
        if filter.is_empty() {
            return true;
        }
        let Some(key) = key else {
            return false;
        };
        let kebab = kebab_case(key);
        filter.iter().any(|wanted| *wanted == kebab)
    }
}

fn parse_duration(modifier: &str) -> Option<Duration> {
    if let Some(ms) = modifier.strip_suffix("ms") {
        return ms.parse().ok().map(Duration::from_millis);
    }
    modifier
        .strip_suffix('s')
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
}

fn kebab_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 2);
    for (index, c) in key.chars().enumerate() {
        if c.is_ascii_uppercase() && index > 0 {
            out.push('-');
        }
        if c == ' ' {
            out.push_str("space");
        } else {
            out.push(c.to_ascii_lowercase());
        }
    }
    out
}

/// All directives on `node`, in attribute order.
pub fn directives(document: &Document, node: NodeId) -> Vec<Directive> {
    document
        .element(node)
        .map(|element| {
            element
                .attrs
                .iter()
                .filter_map(|(attr, value)| Directive::parse(attr, value))
                .collect()
        })
        .unwrap_or_default()
}

pub fn find(document: &Document, node: NodeId, name: &str) -> Option<Directive> {
    directives(document, node)
        .into_iter()
        .find(|directive| directive.name == name)
}

pub fn model(document: &Document, node: NodeId) -> Option<Directive> {
    find(document, node, "model")
}

/// A parsed action expression such as `increment(2, 'a')`.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionCall {
    pub method: String,
    pub params: Vec<Value>,
}

/// Parse an action expression. `$event` in a parameter position is replaced
/// by `event_value`.
pub fn parse_action(expression: &str, event_value: Option<&Value>) -> ActionCall {
    let expression = expression.trim();
    let Some(open) = expression.find('(') else {
        return ActionCall {
            method: expression.to_owned(),
            params: Vec::new(),
        };
    };
    let method = expression[..open].trim().to_owned();
    let inner = expression[open + 1..]
        .strip_suffix(')')
        .unwrap_or(&expression[open + 1..]);
    let params = split_top_level(inner)
        .into_iter()
        .map(|param| parse_param(param, event_value))
        .collect();
    ActionCall { method, params }
}

fn parse_param(param: &str, event_value: Option<&Value>) -> Value {
    if param == "$event" {
        return event_value.cloned().unwrap_or(Value::Null);
    }
    if let Some(text) = param
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
    {
        return Value::String(text.to_owned());
    }
    serde_json::from_str(param).unwrap_or_else(|_| Value::String(param.to_owned()))
}

/// Split on commas outside quotes and brackets; empty pieces are dropped.
fn split_top_level(input: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0_i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    for (index, c) in input.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '[' | '{' | '(' => depth += 1,
            ']' | '}' | ')' => depth -= 1,
            ',' if depth == 0 => {
                out.push(input[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }
    out.push(input[start..].trim());
    out.retain(|piece| !piece.is_empty());
    out
}
