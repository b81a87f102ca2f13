//! Components served by the binary out of the box.

use raxm_component::{ComponentSchema, ComponentState, FnComponent, PropKind, RuleValidator};
use raxm_protocol::{DataMap, RaxmResult};
use raxm_runtime::RaxmBuilder;
use raxm_runtime::html::escape_attribute;
use serde_json::{Value, json};
use std::sync::Arc;

pub fn register(builder: RaxmBuilder) -> RaxmBuilder {
    builder
        .component(counter())
        .component(contact_form())
        .component(dashboard())
}

fn text(state: &ComponentState, path: &str) -> String {
    match state.get(path) {
        Some(Value::String(value)) => escape_attribute(value),
        Some(Value::Null) | None => String::new(),
        Some(other) => escape_attribute(&other.to_string()),
    }
}

pub fn counter() -> FnComponent {
    FnComponent::new(
        ComponentSchema::new("counter")
            .with_property("count", PropKind::Integer, json!(0))
            .with_property("step", PropKind::Integer, json!(1))
            .with_listener("reset-all", "resetCount"),
        |state, _| {
            Ok(format!(
                concat!(
                    "<div><span>{count}</span>",
                    r#"<button axm:click="increment">+</button>"#,
                    r#"<button axm:click="decrement">-</button>"#,
                    r#"<button axm:click.prefetch="incrementBy({step})">+{step}</button>"#,
                    "</div>"
                ),
                count = text(state, "count"),
                step = text(state, "step"),
            ))
        },
    )
    .method("increment", |state, _| add(state, 1))
    .method("decrement", |state, _| add(state, -1))
    .method("incrementBy", |state, params| {
        let step = params.first().and_then(Value::as_i64).unwrap_or(1);
        add(state, step)
    })
    .method("resetCount", |state, _| {
        state.reset(&["count"])?;
        Ok(Value::Null)
    })
}

fn add(state: &mut ComponentState, step: i64) -> RaxmResult<Value> {
    let count: i64 = state.get_as("count")?;
    state.set("count", json!(count + step))?;
    Ok(json!(count + step))
}

pub fn contact_form() -> FnComponent {
    FnComponent::new(
        ComponentSchema::new("contact-form")
            .with_property("name", PropKind::String, json!(""))
            .with_property("email", PropKind::String, json!(""))
            .with_property("address", PropKind::Object, json!({"city": "", "zip": ""}))
            .with_property("sent", PropKind::Boolean, json!(false))
            .with_rules("name", "required")
            .with_rules("email", "required|email")
            .with_rules("address.zip", "numeric"),
        |state, _| {
            let error = |field: &str| {
                state
                    .errors
                    .first(field)
                    .map(|message| format!(r#"<p class="error">{}</p>"#, escape_attribute(message)))
                    .unwrap_or_default()
            };
            let sent = if state.get("sent") == Some(&Value::Bool(true)) {
                "<p>Thanks, we will be in touch.</p>"
            } else {
                ""
            };
            Ok(format!(
                concat!(
                    r#"<form axm:submit.prevent="submit">"#,
                    r#"<input axm:model.defer="name" value="{name}">{name_error}"#,
                    r#"<input axm:model.defer="email" value="{email}">{email_error}"#,
                    r#"<input axm:model.lazy="address.city" value="{city}">"#,
                    r#"<input axm:model.debounce.300ms="address.zip" value="{zip}">{zip_error}"#,
                    r#"<button type="submit">Send</button>{sent}</form>"#
                ),
                name = text(state, "name"),
                name_error = error("name"),
                email = text(state, "email"),
                email_error = error("email"),
                city = text(state, "address.city"),
                zip = text(state, "address.zip"),
                zip_error = error("address.zip"),
                sent = sent,
            ))
        },
    )
    .method("submit", |state, _| {
        let schema = Arc::clone(state.schema());
        let data = state.data().clone();
        if !state.errors.validate(&RuleValidator, schema.rules(), &data) {
            return Ok(Value::Bool(false));
        }
        state.set("sent", Value::Bool(true))?;
        state
            .events
            .dispatch_browser_event("contact-sent", json!({"email": data.get("email")}));
        state.events.emit_up("contact-sent", Vec::new());
        Ok(Value::Bool(true))
    })
}

/// Parent of two keyed counters; `resetAll` reaches them through an event.
pub fn dashboard() -> FnComponent {
    FnComponent::new(
        ComponentSchema::new("dashboard").with_property("title", PropKind::String, json!("Dashboard")),
        |state, children| {
            let mut big = DataMap::new();
            big.insert("step".into(), json!(10));
            Ok(format!(
                concat!(
                    "<section><h1>{title}</h1>{small}{big}",
                    r#"<button axm:click="resetAll">reset</button></section>"#
                ),
                title = text(state, "title"),
                small = children.child("small", "counter", &DataMap::new())?,
                big = children.child("big", "counter", &big)?,
            ))
        },
    )
    .method("resetAll", |state, _| {
        state.events.emit("reset-all", Vec::new());
        Ok(Value::Null)
    })
}
