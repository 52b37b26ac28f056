//! Definition-tree walker
//!
//! Visits every page, block list, block and action of an app definition in
//! document order, handing each node and its location to an [`AppVisitor`].
//!
//! # Order
//!
//! Cron job actions come first, then pages. Every node is visited before its
//! children. Within a page: the page, its page-level actions, then its
//! content (flow steps, tabs, container sub-pages, or blocks). Within an
//! action: the action, the block lists it spawns, `onSuccess`, `onError`,
//! then a condition's `then` and `else`.
//!
//! # Aborting
//!
//! Any visit method may return [`ControlFlow::Break`]; the walk then stops at
//! every enclosing level and [`walk_app`] reports `true`.

use std::fmt;
use std::ops::ControlFlow;

use crate::app::{ActionDefinition, ActionKind, AppDefinition, BlockDefinition, PageDefinition, PageKind};
use crate::utils::json_pointer;

/// One structural step from the document root to a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => f.write_str(key),
            PathSegment::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

/// Render a path as a JSON pointer such as `/pages/0/blocks/1`.
pub fn pointer(path: &[PathSegment]) -> String {
    json_pointer(path)
}

/// Callbacks invoked by [`walk_app`]. Every method defaults to continuing.
pub trait AppVisitor {
    fn visit_page(&mut self, _page: &PageDefinition, _path: &[PathSegment]) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn visit_block_list(
        &mut self,
        _blocks: &[BlockDefinition],
        _path: &[PathSegment],
    ) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn visit_block(&mut self, _block: &BlockDefinition, _path: &[PathSegment]) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn visit_action(
        &mut self,
        _action: &ActionDefinition,
        _path: &[PathSegment],
    ) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

/// Walk the whole app definition. Returns `true` if the visitor aborted.
#[tracing::instrument(level = "debug", skip_all, fields(app = %app.name))]
pub fn walk_app<V: AppVisitor + ?Sized>(app: &AppDefinition, visitor: &mut V) -> bool {
    let mut walker = Walker {
        visitor,
        path: Vec::new(),
    };
    let aborted = walker.app(app).is_break();
    if aborted {
        tracing::debug!(at = %pointer(&walker.path), "walk aborted");
    }
    aborted
}

struct Walker<'v, V: ?Sized> {
    visitor: &'v mut V,
    path: Vec<PathSegment>,
}

impl<V: AppVisitor + ?Sized> Walker<'_, V> {
    /// Run `f` with `segments` appended to the current path.
    ///
    /// The path is left in place when `f` breaks so the abort location can
    /// be reported.
    fn nested<const N: usize>(
        &mut self,
        segments: [PathSegment; N],
        f: impl FnOnce(&mut Self) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        self.path.extend(segments);
        f(self)?;
        self.path.truncate(self.path.len() - N);
        ControlFlow::Continue(())
    }

    fn app(&mut self, app: &AppDefinition) -> ControlFlow<()> {
        for (name, job) in &app.cron {
            self.nested(["cron".into(), name.as_str().into(), "action".into()], |w| {
                w.action(&job.action)
            })?;
        }
        for (index, page) in app.pages.iter().enumerate() {
            self.nested(["pages".into(), index.into()], |w| w.page(page))?;
        }
        ControlFlow::Continue(())
    }

    fn page(&mut self, page: &PageDefinition) -> ControlFlow<()> {
        self.visitor.visit_page(page, &self.path)?;

        match &page.kind {
            PageKind::Page { blocks } => self.nested(["blocks".into()], |w| w.block_list(blocks)),
            PageKind::Flow { steps, actions } => {
                for (key, action) in actions {
                    self.nested(["actions".into(), key.as_str().into()], |w| w.action(action))?;
                }
                for (index, step) in steps.iter().enumerate() {
                    self.nested(["steps".into(), index.into(), "blocks".into()], |w| {
                        w.block_list(&step.blocks)
                    })?;
                }
                ControlFlow::Continue(())
            }
            PageKind::Tabs { tabs } => {
                for (index, tab) in tabs.iter().enumerate() {
                    self.nested(["tabs".into(), index.into(), "blocks".into()], |w| {
                        w.block_list(&tab.blocks)
                    })?;
                }
                ControlFlow::Continue(())
            }
            PageKind::Container { pages } => {
                for (index, sub) in pages.iter().enumerate() {
                    self.nested(["pages".into(), index.into()], |w| w.page(sub))?;
                }
                ControlFlow::Continue(())
            }
        }
    }

    fn block_list(&mut self, blocks: &[BlockDefinition]) -> ControlFlow<()> {
        self.visitor.visit_block_list(blocks, &self.path)?;
        for (index, block) in blocks.iter().enumerate() {
            self.nested([index.into()], |w| w.block(block))?;
        }
        ControlFlow::Continue(())
    }

    fn block(&mut self, block: &BlockDefinition) -> ControlFlow<()> {
        self.visitor.visit_block(block, &self.path)?;
        for (key, action) in &block.actions {
            self.nested(["actions".into(), key.as_str().into()], |w| w.action(action))?;
        }
        ControlFlow::Continue(())
    }

    fn action(&mut self, action: &ActionDefinition) -> ControlFlow<()> {
        self.visitor.visit_action(action, &self.path)?;

        if let Some(blocks) = action.kind.blocks() {
            self.nested(["blocks".into()], |w| w.block_list(blocks))?;
        }
        if let Some(next) = &action.on_success {
            self.nested(["onSuccess".into()], |w| w.action(next))?;
        }
        if let Some(next) = &action.on_error {
            self.nested(["onError".into()], |w| w.action(next))?;
        }
        if let ActionKind::Condition {
            then, otherwise, ..
        } = &action.kind
        {
            self.nested(["then".into()], |w| w.action(then))?;
            self.nested(["else".into()], |w| w.action(otherwise))?;
        }
        ControlFlow::Continue(())
    }
}
