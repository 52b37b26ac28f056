// remapper - JSON-representable data transformation engine
// Copyright (c) 2025 remapper contributors
// Licensed under the MIT License

//! # remapper
//!
//! The remapper engine of a low-code app platform: a small, JSON-representable
//! expression language used wherever app definitions transform data (block
//! parameters, action inputs and outputs, notifications, translated strings).
//!
//! ## Architecture
//!
//! - `value` - Cheap-clone JSON value with a "no value" sentinel
//! - `ast` - Remapper tree: one variant per operator
//! - `signature` - Operand shape of every operator tag
//! - `parser` - Compiles remapper documents into trees
//! - `context` - Evaluation context and injectable host collaborators
//! - `evaluator` - Tree-walking evaluator
//! - `functions` - Operator helper implementations
//! - `format` - Message templates for `string.format`
//! - `datetime` - Date parsing, durations and formatting
//! - `ics` - iCalendar rendering for the `ics` operator
//! - `app` - Typed app definition model
//! - `walker` - Definition-tree walker
//! - `messages` - Translation message extraction
//! - `validate` - Reference validation
//!
//! ## Example
//!
//! ```
//! use remapper::{compile, EvaluationContext, External, jvalue};
//!
//! let remapper = compile(r#"{ "object.from": { "greeting": { "prop": "name" } } }"#).unwrap();
//! let external = External::new();
//! let ctx = EvaluationContext::new(jvalue!({"name": "Ada"}), &external);
//! assert_eq!(remapper.evaluate(&ctx).unwrap(), jvalue!({"greeting": "Ada"}));
//! ```

pub mod app;
pub mod ast;
pub mod context;
pub mod datetime;
pub mod evaluator;
pub mod format;
pub mod functions;
pub mod ics;
pub mod messages;
pub mod parser;
pub mod signature;
pub mod validate;
pub mod value;
pub mod walker;
mod utils;

pub use app::{AppDefinition, DocumentError};
pub use ast::{Operator, Remapper};
pub use context::{
    ArrayFrame, Clock, Entropy, EvaluationContext, External, FixedClock, HostError,
    MessageSource, NoMessages, SeededEntropy, StaticMessages, SystemClock, ThreadEntropy,
};
pub use evaluator::{Evaluator, EvaluatorError, EvaluatorOptions};
pub use messages::{extract_messages, AppMessages};
pub use parser::ParserError;
pub use validate::{validate_app, ValidationError};
pub use value::JValue;
pub use walker::{walk_app, AppVisitor, PathSegment};

/// A compiled remapper that can be evaluated many times.
///
/// Compile once, then evaluate against different contexts. The tree is
/// immutable, so one compiled remapper may be shared across threads.
#[derive(Debug, Clone)]
pub struct CompiledRemapper {
    tree: Remapper,
}

impl CompiledRemapper {
    pub fn tree(&self) -> &Remapper {
        &self.tree
    }

    /// Evaluate against `ctx` with default options.
    pub fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<JValue, EvaluatorError> {
        Evaluator::new().evaluate(&self.tree, ctx)
    }

    /// Evaluate JSON text input and return the result as JSON text.
    ///
    /// The input is both the current value and the root; history is empty.
    pub fn evaluate_json(&self, json: &str, external: &External) -> Result<String, EvaluatorError> {
        let input = JValue::from_json_str(json)
            .map_err(|e| EvaluatorError::EvaluationError(format!("Invalid JSON: {e}")))?;
        let result = self.evaluate(&EvaluationContext::new(input, external))?;
        result
            .to_json_string()
            .map_err(|e| EvaluatorError::EvaluationError(format!("Failed to serialize result: {e}")))
    }
}

impl From<Remapper> for CompiledRemapper {
    fn from(tree: Remapper) -> Self {
        CompiledRemapper { tree }
    }
}

/// Compile a remapper from JSON text.
pub fn compile(json: &str) -> Result<CompiledRemapper, ParserError> {
    Ok(CompiledRemapper {
        tree: parser::parse_str(json)?,
    })
}

/// Compile and evaluate in one step.
///
/// For repeated evaluations of the same remapper, use [`compile`] instead.
pub fn evaluate(remapper: &serde_json::Value, ctx: &EvaluationContext<'_>) -> Result<JValue, Error> {
    let tree = parser::parse(remapper)?;
    Ok(Evaluator::new().evaluate(&tree, ctx)?)
}

/// Either class of remapper failure.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Parser(#[from] ParserError),

    #[error(transparent)]
    Evaluator(#[from] EvaluatorError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_and_evaluate_json() {
        let remapper = compile(r#"{ "array.map": { "prop": "id" } }"#).unwrap();
        let result = remapper
            .evaluate_json(r#"[{"id": 1}, {"id": 2}, {}]"#, &External::new())
            .unwrap();
        assert_eq!(result, "[1,2,null]");
    }

    #[test]
    fn test_one_shot_evaluate() {
        let external = External::new();
        let ctx = EvaluationContext::new(jvalue!({"a": 1}), &external);
        let result = evaluate(&serde_json::json!({ "prop": "a" }), &ctx).unwrap();
        assert_eq!(result, JValue::from(1i64));

        let err = evaluate(&serde_json::json!({ "bogus": 1 }), &ctx).unwrap_err();
        assert!(matches!(err, Error::Parser(ParserError::UnknownOperator { .. })));
    }

    #[test]
    fn test_compiled_remapper_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompiledRemapper>();
    }
}
