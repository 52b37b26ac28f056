// Typed app definition model
// Pages, blocks, actions and cron jobs with their remapper-bearing fields

use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;

use crate::ast::Remapper;
use crate::validate::ValidationError;
use crate::value::JValue;

/// App document errors
#[derive(Error, Debug)]
pub enum DocumentError {
    /// Malformed JSON, a structural mismatch, or a rejected remapper.
    #[error("Invalid app definition: {0}")]
    Json(#[from] serde_json::Error),

    #[error("App definition has {} reference error(s): {}", .0.len(), join(.0))]
    Invalid(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A complete app definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_page: Option<String>,
    #[serde(default)]
    pub pages: Vec<PageDefinition>,
    #[serde(default)]
    pub cron: IndexMap<String, CronDefinition>,
    #[serde(default)]
    pub resources: IndexMap<String, ResourceDefinition>,
    #[serde(default)]
    pub security: Option<SecurityDefinition>,
}

impl AppDefinition {
    /// Deserialize an app definition, compiling every embedded remapper.
    pub fn from_json_str(json: &str) -> Result<Self, DocumentError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, DocumentError> {
        Ok(serde_json::from_value(value)?)
    }

    /// Deserialize and check every cross reference in the document.
    pub fn load(json: &str) -> Result<Self, DocumentError> {
        let app = Self::from_json_str(json)?;
        let errors = crate::validate::validate_app(&app);
        if errors.is_empty() {
            Ok(app)
        } else {
            Err(DocumentError::Invalid(errors))
        }
    }

    pub fn page(&self, name: &str) -> Option<&PageDefinition> {
        self.pages.iter().find(|p| p.name == name)
    }
}

/// A scheduled job running one action.
#[derive(Debug, Clone, Deserialize)]
pub struct CronDefinition {
    pub schedule: String,
    pub action: ActionDefinition,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    #[serde(default)]
    pub schema: Option<JValue>,
    #[serde(default)]
    pub expires: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityDefinition {
    #[serde(default)]
    pub default: Option<SecurityDefault>,
    #[serde(default)]
    pub roles: IndexMap<String, RoleDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityDefault {
    pub role: String,
    #[serde(default)]
    pub policy: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleDefinition {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub inherits: Vec<String>,
}

/// A page and its content.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawPage")]
pub struct PageDefinition {
    pub name: String,
    pub roles: Vec<String>,
    pub hide_from_menu: bool,
    pub kind: PageKind,
}

/// Content layout of a page, selected by its `type`.
#[derive(Debug, Clone)]
pub enum PageKind {
    Page {
        blocks: Vec<BlockDefinition>,
    },
    Flow {
        steps: Vec<SubPage>,
        actions: IndexMap<String, ActionDefinition>,
    },
    Tabs {
        tabs: Vec<SubPage>,
    },
    Container {
        pages: Vec<PageDefinition>,
    },
}

impl PageKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            PageKind::Page { .. } => "page",
            PageKind::Flow { .. } => "flow",
            PageKind::Tabs { .. } => "tabs",
            PageKind::Container { .. } => "container",
        }
    }
}

/// A flow step or a tab.
#[derive(Debug, Clone, Deserialize)]
pub struct SubPage {
    pub name: String,
    #[serde(default)]
    pub blocks: Vec<BlockDefinition>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPage {
    name: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    hide_from_menu: bool,
    #[serde(default)]
    blocks: Option<Vec<BlockDefinition>>,
    #[serde(default)]
    steps: Option<Vec<SubPage>>,
    #[serde(default)]
    tabs: Option<Vec<SubPage>>,
    #[serde(default)]
    pages: Option<Vec<PageDefinition>>,
    #[serde(default)]
    actions: Option<IndexMap<String, ActionDefinition>>,
}

impl TryFrom<RawPage> for PageDefinition {
    type Error = String;

    fn try_from(raw: RawPage) -> Result<Self, Self::Error> {
        let missing = |field: &str, kind: &str| {
            format!("page '{}' of type '{kind}' requires '{field}'", raw.name)
        };
        let kind = match raw.kind.as_deref().unwrap_or("page") {
            "page" => PageKind::Page {
                blocks: raw.blocks.ok_or_else(|| missing("blocks", "page"))?,
            },
            "flow" => PageKind::Flow {
                steps: raw.steps.ok_or_else(|| missing("steps", "flow"))?,
                actions: raw.actions.unwrap_or_default(),
            },
            "tabs" => PageKind::Tabs {
                tabs: raw.tabs.ok_or_else(|| missing("tabs", "tabs"))?,
            },
            "container" => PageKind::Container {
                pages: raw.pages.ok_or_else(|| missing("pages", "container"))?,
            },
            other => return Err(format!("unknown page type '{other}'")),
        };
        Ok(PageDefinition {
            name: raw.name,
            roles: raw.roles,
            hide_from_menu: raw.hide_from_menu,
            kind,
        })
    }
}

/// A block placed on a page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDefinition {
    #[serde(rename = "type")]
    pub block_type: String,
    pub version: String,
    #[serde(default)]
    pub header: Option<Remapper>,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Block-specific parameters; remappers inside are only known by shape.
    #[serde(default)]
    pub parameters: Option<JValue>,
    #[serde(default)]
    pub actions: IndexMap<String, ActionDefinition>,
}

/// An action with its common remappers and chained continuations.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDefinition {
    #[serde(default)]
    pub remap_before: Option<Remapper>,
    #[serde(default)]
    pub remap_after: Option<Remapper>,
    #[serde(default)]
    pub on_success: Option<Box<ActionDefinition>>,
    #[serde(default)]
    pub on_error: Option<Box<ActionDefinition>>,
    #[serde(flatten)]
    pub kind: ActionKind,
}

/// Where a `link` action navigates: a page name, a `[page, subpage]` path,
/// or an absolute URL.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LinkTarget {
    Page(String),
    Path(Vec<String>),
}

impl LinkTarget {
    /// Name of the page targeted inside this app, if any.
    pub fn page(&self) -> Option<&str> {
        let first = match self {
            LinkTarget::Page(p) => p.as_str(),
            LinkTarget::Path(segments) => segments.first()?.as_str(),
        };
        if first.contains("://") || first.starts_with("mailto:") {
            None
        } else {
            Some(first)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAction {
    pub resource: String,
    #[serde(default)]
    pub id: Option<Remapper>,
    #[serde(default)]
    pub query: Option<Remapper>,
    #[serde(default)]
    pub body: Option<Remapper>,
}

/// The closed set of action kinds, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ActionKind {
    #[serde(rename = "noop")]
    Noop,

    #[serde(rename = "throw")]
    Throw,

    #[serde(rename = "log")]
    Log {
        #[serde(default)]
        level: Option<String>,
    },

    #[serde(rename = "static")]
    Static { value: JValue },

    #[serde(rename = "link")]
    Link {
        to: LinkTarget,
        #[serde(default)]
        parameters: Option<Remapper>,
    },

    #[serde(rename = "condition")]
    Condition {
        #[serde(rename = "if")]
        condition: Remapper,
        then: Box<ActionDefinition>,
        #[serde(rename = "else")]
        otherwise: Box<ActionDefinition>,
    },

    #[serde(rename = "dialog")]
    Dialog {
        #[serde(default)]
        title: Option<Remapper>,
        blocks: Vec<BlockDefinition>,
        #[serde(default)]
        fullscreen: bool,
    },

    #[serde(rename = "drawer")]
    Drawer {
        #[serde(default)]
        title: Option<Remapper>,
        blocks: Vec<BlockDefinition>,
    },

    #[serde(rename = "request", rename_all = "camelCase")]
    Request {
        url: Remapper,
        #[serde(default)]
        method: Option<String>,
        #[serde(default)]
        query: Option<Remapper>,
        #[serde(default)]
        body: Option<Remapper>,
    },

    #[serde(rename = "resource.get")]
    ResourceGet(ResourceAction),
    #[serde(rename = "resource.query")]
    ResourceQuery(ResourceAction),
    #[serde(rename = "resource.count")]
    ResourceCount(ResourceAction),
    #[serde(rename = "resource.create")]
    ResourceCreate(ResourceAction),
    #[serde(rename = "resource.update")]
    ResourceUpdate(ResourceAction),
    #[serde(rename = "resource.patch")]
    ResourcePatch(ResourceAction),
    #[serde(rename = "resource.delete")]
    ResourceDelete(ResourceAction),

    #[serde(rename = "message")]
    Message {
        body: Remapper,
        #[serde(default)]
        color: Option<String>,
        #[serde(default)]
        timeout: Option<u64>,
    },

    #[serde(rename = "notify")]
    Notify {
        to: Remapper,
        title: Remapper,
        body: Remapper,
    },

    #[serde(rename = "email")]
    Email {
        to: Remapper,
        #[serde(default)]
        cc: Option<Remapper>,
        #[serde(default)]
        bcc: Option<Remapper>,
        subject: Remapper,
        body: Remapper,
        #[serde(default)]
        attachments: Option<Remapper>,
    },

    #[serde(rename = "event", rename_all = "camelCase")]
    Event {
        event: String,
        #[serde(default)]
        wait_for: Option<String>,
    },

    #[serde(rename = "flow.next")]
    FlowNext,
    #[serde(rename = "flow.back")]
    FlowBack,
    #[serde(rename = "flow.finish")]
    FlowFinish,
    #[serde(rename = "flow.cancel")]
    FlowCancel,
    #[serde(rename = "flow.to")]
    FlowTo { step: Remapper },

    #[serde(rename = "share")]
    Share {
        #[serde(default)]
        url: Option<Remapper>,
        #[serde(default)]
        title: Option<Remapper>,
        #[serde(default)]
        text: Option<Remapper>,
    },
}

impl ActionKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ActionKind::Noop => "noop",
            ActionKind::Throw => "throw",
            ActionKind::Log { .. } => "log",
            ActionKind::Static { .. } => "static",
            ActionKind::Link { .. } => "link",
            ActionKind::Condition { .. } => "condition",
            ActionKind::Dialog { .. } => "dialog",
            ActionKind::Drawer { .. } => "drawer",
            ActionKind::Request { .. } => "request",
            ActionKind::ResourceGet(_) => "resource.get",
            ActionKind::ResourceQuery(_) => "resource.query",
            ActionKind::ResourceCount(_) => "resource.count",
            ActionKind::ResourceCreate(_) => "resource.create",
            ActionKind::ResourceUpdate(_) => "resource.update",
            ActionKind::ResourcePatch(_) => "resource.patch",
            ActionKind::ResourceDelete(_) => "resource.delete",
            ActionKind::Message { .. } => "message",
            ActionKind::Notify { .. } => "notify",
            ActionKind::Email { .. } => "email",
            ActionKind::Event { .. } => "event",
            ActionKind::FlowNext => "flow.next",
            ActionKind::FlowBack => "flow.back",
            ActionKind::FlowFinish => "flow.finish",
            ActionKind::FlowCancel => "flow.cancel",
            ActionKind::FlowTo { .. } => "flow.to",
            ActionKind::Share { .. } => "share",
        }
    }

    pub fn resource_action(&self) -> Option<&ResourceAction> {
        match self {
            ActionKind::ResourceGet(r)
            | ActionKind::ResourceQuery(r)
            | ActionKind::ResourceCount(r)
            | ActionKind::ResourceCreate(r)
            | ActionKind::ResourceUpdate(r)
            | ActionKind::ResourcePatch(r)
            | ActionKind::ResourceDelete(r) => Some(r),
            _ => None,
        }
    }

    /// Block lists spawned by this action.
    pub fn blocks(&self) -> Option<&[BlockDefinition]> {
        match self {
            ActionKind::Dialog { blocks, .. } | ActionKind::Drawer { blocks, .. } => Some(blocks.as_slice()),
            _ => None,
        }
    }
}

impl ActionDefinition {
    /// Every remapper-bearing field of this action, excluding nested
    /// actions and blocks.
    pub fn remappers(&self) -> Vec<(&'static str, &Remapper)> {
        let mut fields: Vec<(&'static str, Option<&Remapper>)> = vec![
            ("remapBefore", self.remap_before.as_ref()),
            ("remapAfter", self.remap_after.as_ref()),
        ];
        match &self.kind {
            ActionKind::Link { parameters, .. } => fields.push(("parameters", parameters.as_ref())),
            ActionKind::Condition { condition, .. } => fields.push(("if", Some(condition))),
            ActionKind::Dialog { title, .. } | ActionKind::Drawer { title, .. } => {
                fields.push(("title", title.as_ref()))
            }
            ActionKind::Request { url, query, body, .. } => fields.extend([
                ("url", Some(url)),
                ("query", query.as_ref()),
                ("body", body.as_ref()),
            ]),
            ActionKind::Message { body, .. } => fields.push(("body", Some(body))),
            ActionKind::Notify { to, title, body } => fields.extend([
                ("to", Some(to)),
                ("title", Some(title)),
                ("body", Some(body)),
            ]),
            ActionKind::Email {
                to,
                cc,
                bcc,
                subject,
                body,
                attachments,
            } => fields.extend([
                ("to", Some(to)),
                ("cc", cc.as_ref()),
                ("bcc", bcc.as_ref()),
                ("subject", Some(subject)),
                ("body", Some(body)),
                ("attachments", attachments.as_ref()),
            ]),
            ActionKind::FlowTo { step } => fields.push(("step", Some(step))),
            ActionKind::Share { url, title, text } => fields.extend([
                ("url", url.as_ref()),
                ("title", title.as_ref()),
                ("text", text.as_ref()),
            ]),
            kind => {
                if let Some(resource) = kind.resource_action() {
                    fields.extend([
                        ("id", resource.id.as_ref()),
                        ("query", resource.query.as_ref()),
                        ("body", resource.body.as_ref()),
                    ]);
                }
            }
        }
        fields
            .into_iter()
            .filter_map(|(name, node)| Some((name, node?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_page_type_defaults_to_page() {
        let page: PageDefinition = serde_json::from_value(json!({
            "name": "Home",
            "blocks": [{ "type": "list", "version": "0.1.0" }]
        }))
        .unwrap();
        assert!(matches!(page.kind, PageKind::Page { ref blocks } if blocks.len() == 1));
    }

    #[test]
    fn test_flow_page_requires_steps() {
        let result: Result<PageDefinition, _> = serde_json::from_value(json!({
            "name": "Wizard",
            "type": "flow"
        }));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("requires 'steps'"), "{err}");
    }

    #[test]
    fn test_actions_compile_remappers() {
        let action: ActionDefinition = serde_json::from_value(json!({
            "type": "condition",
            "if": { "equals": [{ "prop": "a" }, 1] },
            "then": { "type": "noop" },
            "else": {
                "type": "message",
                "body": { "translate": "failed" },
                "remapBefore": { "prop": "x" }
            },
            "onSuccess": { "type": "resource.get", "resource": "person" }
        }))
        .unwrap();

        assert_eq!(action.kind.type_name(), "condition");
        let ActionKind::Condition { otherwise, .. } = &action.kind else {
            panic!("expected condition");
        };
        let names: Vec<&str> = otherwise.remappers().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["remapBefore", "body"]);
        assert_eq!(
            action
                .on_success
                .as_ref()
                .and_then(|a| a.kind.resource_action())
                .map(|r| r.resource.as_str()),
            Some("person")
        );
    }

    #[test]
    fn test_invalid_remapper_rejects_document() {
        let result = AppDefinition::from_value(json!({
            "name": "Broken",
            "pages": [{
                "name": "Home",
                "blocks": [{ "type": "list", "version": "0.1.0", "header": { "nope": 1 } }]
            }]
        }));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Unknown remapper 'nope'"), "{err}");
    }

    #[test]
    fn test_link_target_page() {
        assert_eq!(LinkTarget::Page("Home".into()).page(), Some("Home"));
        assert_eq!(
            LinkTarget::Path(vec!["Wizard".into(), "Step".into()]).page(),
            Some("Wizard")
        );
        assert_eq!(LinkTarget::Page("https://example.com".into()).page(), None);
    }
}
