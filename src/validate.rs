// Static reference validation
// Checks that resources, roles and link targets named in an app exist

use std::collections::HashSet;
use std::ops::ControlFlow;

use thiserror::Error;

use crate::app::{ActionDefinition, ActionKind, AppDefinition, BlockDefinition, PageDefinition, PageKind};
use crate::utils::json_pointer;
use crate::walker::{pointer, walk_app, AppVisitor, PathSegment};

/// A dangling reference, located by JSON pointer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{path}: resource '{resource}' does not exist")]
    UnknownResource { path: String, resource: String },

    #[error("{path}: role '{role}' is not defined in security.roles")]
    UnknownRole { path: String, role: String },

    #[error("{path}: page '{page}' does not exist")]
    UnknownPage { path: String, page: String },
}

impl ValidationError {
    pub fn path(&self) -> &str {
        match self {
            ValidationError::UnknownResource { path, .. }
            | ValidationError::UnknownRole { path, .. }
            | ValidationError::UnknownPage { path, .. } => path,
        }
    }
}

struct Validator<'a> {
    app: &'a AppDefinition,
    pages: HashSet<&'a str>,
    errors: Vec<ValidationError>,
}

impl<'a> Validator<'a> {
    fn new(app: &'a AppDefinition) -> Self {
        let mut pages = HashSet::new();
        collect_page_names(&app.pages, &mut pages);
        Validator {
            app,
            pages,
            errors: Vec::new(),
        }
    }

    fn has_role(&self, role: &str) -> bool {
        self.app
            .security
            .as_ref()
            .is_some_and(|s| s.roles.contains_key(role))
    }

    fn check_roles(&mut self, roles: &[String], path: &[PathSegment]) {
        for (index, role) in roles.iter().enumerate() {
            if !self.has_role(role) {
                self.errors.push(ValidationError::UnknownRole {
                    path: format!("{}/roles/{index}", pointer(path)),
                    role: role.clone(),
                });
            }
        }
    }

    fn check_security(&mut self) {
        let Some(security) = &self.app.security else {
            return;
        };
        if let Some(default) = &security.default {
            if !security.roles.contains_key(&default.role) {
                self.errors.push(ValidationError::UnknownRole {
                    path: json_pointer(["security", "default", "role"]),
                    role: default.role.clone(),
                });
            }
        }
        for (name, role) in &security.roles {
            for (index, parent) in role.inherits.iter().enumerate() {
                if !security.roles.contains_key(parent) {
                    self.errors.push(ValidationError::UnknownRole {
                        path: json_pointer([
                            "security".to_string(),
                            "roles".to_string(),
                            name.clone(),
                            "inherits".to_string(),
                            index.to_string(),
                        ]),
                        role: parent.clone(),
                    });
                }
            }
        }
    }
}

fn collect_page_names<'a>(pages: &'a [PageDefinition], names: &mut HashSet<&'a str>) {
    for page in pages {
        names.insert(page.name.as_str());
        if let PageKind::Container { pages } = &page.kind {
            collect_page_names(pages, names);
        }
    }
}

impl AppVisitor for Validator<'_> {
    fn visit_page(&mut self, page: &PageDefinition, path: &[PathSegment]) -> ControlFlow<()> {
        self.check_roles(&page.roles, path);
        ControlFlow::Continue(())
    }

    fn visit_block(&mut self, block: &BlockDefinition, path: &[PathSegment]) -> ControlFlow<()> {
        self.check_roles(&block.roles, path);
        ControlFlow::Continue(())
    }

    fn visit_action(&mut self, action: &ActionDefinition, path: &[PathSegment]) -> ControlFlow<()> {
        if let Some(resource) = action.kind.resource_action() {
            if !self.app.resources.contains_key(&resource.resource) {
                self.errors.push(ValidationError::UnknownResource {
                    path: format!("{}/resource", pointer(path)),
                    resource: resource.resource.clone(),
                });
            }
        }
        if let ActionKind::Link { to, .. } = &action.kind {
            if let Some(page) = to.page() {
                if !self.pages.contains(page) {
                    self.errors.push(ValidationError::UnknownPage {
                        path: format!("{}/to", pointer(path)),
                        page: page.to_string(),
                    });
                }
            }
        }
        ControlFlow::Continue(())
    }
}

/// Report every dangling reference in `app`, in document order.
#[tracing::instrument(level = "debug", skip_all, fields(app = %app.name))]
pub fn validate_app(app: &AppDefinition) -> Vec<ValidationError> {
    let mut validator = Validator::new(app);
    validator.check_security();
    if let Some(default_page) = &app.default_page {
        if !validator.pages.contains(default_page.as_str()) {
            validator.errors.push(ValidationError::UnknownPage {
                path: json_pointer(["defaultPage"]),
                page: default_page.clone(),
            });
        }
    }
    walk_app(app, &mut validator);
    if !validator.errors.is_empty() {
        tracing::debug!(errors = validator.errors.len(), "app has dangling references");
    }
    validator.errors
}
