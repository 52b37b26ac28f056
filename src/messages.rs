// Translation message extraction
// Collects message ids from remappers and page names across an app

use std::ops::ControlFlow;

use indexmap::IndexMap;
use serde::Serialize;

use crate::app::{ActionDefinition, AppDefinition, BlockDefinition, PageDefinition, PageKind};
use crate::ast::{Operator, Remapper};
use crate::parser;
use crate::signature;
use crate::utils::normalize;
use crate::value::JValue;
use crate::walker::{walk_app, AppVisitor, PathSegment};

/// Messages an app needs translated.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppMessages {
    /// Message id to default template, from `string.format` and `translate`.
    pub message_ids: IndexMap<String, String>,
    /// Page, tab and step ids to their display names.
    pub app: IndexMap<String, String>,
}

impl AppMessages {
    /// Record `id`, keeping the first non-empty template seen for it.
    fn add_message(&mut self, id: &str, template: &str) {
        match self.message_ids.get_mut(id) {
            Some(existing) if existing.is_empty() => *existing = template.to_string(),
            Some(_) => {}
            None => {
                self.message_ids.insert(id.to_string(), template.to_string());
            }
        }
    }

    /// Collect every message referenced anywhere in `remapper`.
    pub fn add_remapper(&mut self, remapper: &Remapper) {
        for op in remapper.operators() {
            match op {
                Operator::StringFormat(format) => {
                    if let Some(id) = &format.message_id {
                        self.add_message(id, format.template.as_deref().unwrap_or_default());
                    }
                }
                Operator::Translate(id) => self.add_message(id, ""),
                _ => {}
            }
        }
    }

    /// Collect messages from remappers embedded in free-form block parameters.
    ///
    /// Any single-key object named after an operator that compiles is
    /// treated as a remapper; everything else is searched recursively.
    pub fn add_parameters(&mut self, value: &JValue) {
        match value {
            JValue::Object(map) => {
                if map.len() == 1 && map.keys().all(|k| signature::lookup(k).is_some()) {
                    if let Ok(remapper) = parser::parse(&serde_json::Value::from(value)) {
                        self.add_remapper(&remapper);
                        return;
                    }
                }
                for child in map.values() {
                    self.add_parameters(child);
                }
            }
            JValue::Array(items) => {
                for child in items.iter() {
                    self.add_parameters(child);
                }
            }
            _ => {}
        }
    }
}

struct Extractor {
    messages: AppMessages,
}

impl AppVisitor for Extractor {
    fn visit_page(&mut self, page: &PageDefinition, _path: &[PathSegment]) -> ControlFlow<()> {
        let id = format!("pages.{}", normalize(&page.name));
        let children = match &page.kind {
            PageKind::Tabs { tabs } => Some(("tabs", tabs)),
            PageKind::Flow { steps, .. } => Some(("steps", steps)),
            _ => None,
        };
        if let Some((kind, subpages)) = children {
            for sub in subpages {
                self.messages.app.insert(
                    format!("{id}.{kind}.{}", normalize(&sub.name)),
                    sub.name.clone(),
                );
            }
        }
        self.messages.app.insert(id, page.name.clone());
        ControlFlow::Continue(())
    }

    fn visit_block(&mut self, block: &BlockDefinition, _path: &[PathSegment]) -> ControlFlow<()> {
        if let Some(header) = &block.header {
            self.messages.add_remapper(header);
        }
        if let Some(parameters) = &block.parameters {
            self.messages.add_parameters(parameters);
        }
        ControlFlow::Continue(())
    }

    fn visit_action(&mut self, action: &ActionDefinition, _path: &[PathSegment]) -> ControlFlow<()> {
        for (_, remapper) in action.remappers() {
            self.messages.add_remapper(remapper);
        }
        ControlFlow::Continue(())
    }
}

/// Extract every translatable message of an app.
#[tracing::instrument(level = "debug", skip_all, fields(app = %app.name))]
pub fn extract_messages(app: &AppDefinition) -> AppMessages {
    let mut extractor = Extractor {
        messages: AppMessages::default(),
    };
    walk_app(app, &mut extractor);
    tracing::debug!(
        messages = extractor.messages.message_ids.len(),
        pages = extractor.messages.app.len(),
        "extracted messages"
    );
    extractor.messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_extracts_from_actions_blocks_and_pages() {
        let app = AppDefinition::from_value(json!({
            "name": "Test",
            "pages": [
                {
                    "name": "My Page",
                    "blocks": [{
                        "type": "list",
                        "version": "0.1.0",
                        "header": { "translate": "list.header" },
                        "parameters": {
                            "fields": [{ "label": { "string.format": {
                                "messageId": "field.label",
                                "template": "Name of {name}",
                                "values": { "name": { "prop": "name" } }
                            } } }]
                        },
                        "actions": {
                            "onClick": {
                                "type": "message",
                                "body": { "string.format": { "messageId": "list.header", "template": "Items" } }
                            }
                        }
                    }]
                },
                {
                    "name": "Wizard",
                    "type": "flow",
                    "steps": [{ "name": "Step One", "blocks": [] }]
                }
            ]
        }))
        .unwrap();

        let messages = extract_messages(&app);
        let ids: Vec<(&str, &str)> = messages
            .message_ids
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            ids,
            vec![("list.header", "Items"), ("field.label", "Name of {name}")]
        );
        assert_eq!(messages.app.get("pages.my-page").map(String::as_str), Some("My Page"));
        assert_eq!(
            messages.app.get("pages.wizard.steps.step-one").map(String::as_str),
            Some("Step One")
        );
    }

    #[test]
    fn test_first_non_empty_template_wins() {
        let mut messages = AppMessages::default();
        messages.add_message("a", "");
        messages.add_message("a", "first");
        messages.add_message("a", "second");
        assert_eq!(messages.message_ids.get("a").map(String::as_str), Some("first"));
    }

    #[test]
    fn test_serializes_camel_case() {
        let messages = AppMessages::default();
        assert_eq!(
            serde_json::to_value(&messages).unwrap(),
            json!({ "messageIds": {}, "app": {} })
        );
    }
}
