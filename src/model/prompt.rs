// SPDX-License-Identifier: MIT

//! Prompt-template nodes

use serde_json::Value;
use std::sync::Arc;

use super::{GenerationConfig, Model};
use crate::engine::{Node, Store};

/// Render `{key}` placeholders from the store.
///
/// String values are inserted as-is, other values as JSON text, missing keys
/// as the empty string. Text not forming a `{key}` placeholder is kept.
pub fn render(template: &str, store: &Store) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let key = after
            .find('}')
            .map(|end| &after[..end])
            .filter(|key| !key.is_empty() && !key.contains(['{', ' ', '\n']));

        match key {
            Some(key) => {
                match store.get_path(key) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(Value::Null) | None => {}
                    Some(other) => out.push_str(&other.to_string()),
                }
                rest = &after[key.len() + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Node that renders `template`, asks `model`, and stores the answer under
/// `output_key`
pub fn prompt_node(
    model: Arc<dyn Model>,
    template: impl Into<String>,
    output_key: impl Into<String>,
    config: GenerationConfig,
) -> Node {
    let template: Arc<str> = Arc::from(template.into());
    let output_key: Arc<str> = Arc::from(output_key.into());
    let name = format!("{}->{}", model.name(), output_key);
    let config = Arc::new(config);

    Node::from_fn(move |mut store: Store| {
        let model = Arc::clone(&model);
        let template = Arc::clone(&template);
        let output_key = Arc::clone(&output_key);
        let config = Arc::clone(&config);
        async move {
            let prompt = render(&template, &store);
            log::debug!("Prompting {} ({} chars)", model.name(), prompt.len());
            let answer = model.generate(&prompt, &config).await?;
            store.insert(output_key.as_ref(), answer);
            Ok(store)
        }
    })
    .named(name)
}
