// Remapper evaluator
// Dispatches every operator of a compiled tree against an evaluation context

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ast::{ArrayField, IcsOperand, LogLevel, Operator, Remapper, RemapperMap, StringFormat};
use crate::context::{ArrayFrame, EvaluationContext, HostError};
use crate::datetime::{self, coerce_date};
use crate::format::format_message;
use crate::functions::{self, array, compare, object, path, random, string, FunctionError};
use crate::ics::{self, Event, EventFields, IcsError};
use crate::value::JValue;

const DEFAULT_PRODID: &str = "-//remapper//EN";

/// Evaluator errors
#[derive(Error, Debug)]
pub enum EvaluatorError {
    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Reference error: {0}")]
    ReferenceError(String),

    #[error("Evaluation error: {0}")]
    EvaluationError(String),
}

impl From<FunctionError> for EvaluatorError {
    fn from(e: FunctionError) -> Self {
        match e {
            FunctionError::TypeError(msg) => EvaluatorError::TypeError(msg),
        }
    }
}

impl From<crate::datetime::DateTimeError> for EvaluatorError {
    fn from(e: crate::datetime::DateTimeError) -> Self {
        EvaluatorError::EvaluationError(e.to_string())
    }
}

impl From<IcsError> for EvaluatorError {
    fn from(e: IcsError) -> Self {
        EvaluatorError::EvaluationError(e.to_string())
    }
}

impl From<HostError> for EvaluatorError {
    fn from(e: HostError) -> Self {
        EvaluatorError::ReferenceError(e.to_string())
    }
}

/// Evaluator configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EvaluatorOptions {
    /// Maximum nesting of remapper nodes evaluated at once.
    pub max_depth: usize,
}

impl Default for EvaluatorOptions {
    fn default() -> Self {
        EvaluatorOptions { max_depth: 256 }
    }
}

/// Evaluator
///
/// Holds no state between calls apart from the recursion counter, so one
/// evaluator can be reused for many evaluations on the same thread.
pub struct Evaluator {
    options: EvaluatorOptions,
    recursion_depth: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self::with_options(EvaluatorOptions::default())
    }

    pub fn with_options(options: EvaluatorOptions) -> Self {
        Evaluator {
            options,
            recursion_depth: 0,
        }
    }

    pub fn options(&self) -> &EvaluatorOptions {
        &self.options
    }

    /// Evaluate a remapper tree against a context
    ///
    /// This is the main entry point for evaluation.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn evaluate(
        &mut self,
        node: &Remapper,
        ctx: &EvaluationContext<'_>,
    ) -> Result<JValue, EvaluatorError> {
        self.recursion_depth = 0;
        self.evaluate_internal(node, ctx)
    }

    /// Internal evaluation method
    fn evaluate_internal(
        &mut self,
        node: &Remapper,
        ctx: &EvaluationContext<'_>,
    ) -> Result<JValue, EvaluatorError> {
        // Check recursion depth to prevent stack overflow
        self.recursion_depth += 1;
        if self.recursion_depth > self.options.max_depth {
            self.recursion_depth -= 1;
            return Err(EvaluatorError::EvaluationError(format!(
                "maximum remapper depth ({}) exceeded",
                self.options.max_depth
            )));
        }

        let result = self.evaluate_internal_impl(node, ctx);

        self.recursion_depth -= 1;
        result
    }

    /// Internal evaluation implementation (separated to allow depth tracking)
    fn evaluate_internal_impl(
        &mut self,
        node: &Remapper,
        ctx: &EvaluationContext<'_>,
    ) -> Result<JValue, EvaluatorError> {
        match node {
            Remapper::Literal(value) => Ok(value.clone()),

            // Each step sees the previous step's result as its input
            Remapper::Pipe(steps) => {
                let mut current = ctx.input().clone();
                for step in steps {
                    current = self.evaluate_internal(step, &ctx.derive(current))?;
                }
                Ok(current)
            }

            Remapper::Operator(op) => {
                tracing::trace!(operator = op.tag(), "dispatch");
                self.apply(op, ctx)
            }
        }
    }

    fn apply(&mut self, op: &Operator, ctx: &EvaluationContext<'_>) -> Result<JValue, EvaluatorError> {
        let input = ctx.input();
        let external = ctx.external();

        let value = match op {
            // ── Structural ──────────────────────────────────────────────────
            Operator::Prop(keys) => path::lookup(input, keys),
            Operator::Static(value) => value.clone(),
            Operator::ObjectFrom(map) => JValue::object(self.evaluate_map(map, ctx)?),
            Operator::ObjectAssign(map) => object::assign(input, self.evaluate_map(map, ctx)?),
            Operator::ObjectOmit(keys) => object::omit(input, keys),

            Operator::ArrayMap(item) => match input.as_array() {
                Some(items) => {
                    let length = items.len();
                    let mut result = Vec::with_capacity(length);
                    for (index, element) in items.iter().enumerate() {
                        let child = ctx.derive_frame(element.clone(), ArrayFrame { index, length });
                        result.push(self.evaluate_internal(item, &child)?);
                    }
                    JValue::array(result)
                }
                None => JValue::array(Vec::new()),
            },
            Operator::ArrayFrom(list) => JValue::array(self.evaluate_list(list, ctx)?),
            Operator::ArrayAppend(list) => match input.as_array() {
                Some(items) => {
                    let mut result = items.clone();
                    result.extend(self.evaluate_list(list, ctx)?);
                    JValue::array(result)
                }
                None => JValue::array(Vec::new()),
            },
            Operator::ArrayOmit(list) => match input.as_array() {
                Some(items) => array::omit_indices(items, &self.evaluate_list(list, ctx)?),
                None => JValue::array(Vec::new()),
            },
            Operator::ArrayUnique(key) => match input.as_array() {
                Some(items) => {
                    let mut keys = Vec::with_capacity(items.len());
                    for element in items.iter() {
                        let k = match key {
                            Some(key) => self.evaluate_internal(key, &ctx.derive(element.clone()))?,
                            None => JValue::Undefined,
                        };
                        keys.push(if k.is_undefined() { element.clone() } else { k });
                    }
                    array::unique_by(items, &keys)
                }
                None => input.clone(),
            },

            // ── Comparison and control flow ─────────────────────────────────
            Operator::If(branches) => {
                if self.evaluate_internal(&branches.condition, ctx)?.is_truthy() {
                    self.evaluate_internal(&branches.then_branch, ctx)?
                } else {
                    self.evaluate_internal(&branches.else_branch, ctx)?
                }
            }
            Operator::Match(cases) => {
                for case in cases {
                    if self.evaluate_internal(&case.case, ctx)?.is_truthy() {
                        return self.evaluate_internal(&case.value, ctx);
                    }
                }
                JValue::Undefined
            }
            Operator::Equals(list) => JValue::Bool(compare::equals(&self.evaluate_list(list, ctx)?)),
            Operator::Gt(pair) => {
                let left = self.evaluate_internal(&pair.0, ctx)?;
                let right = self.evaluate_internal(&pair.1, ctx)?;
                JValue::Bool(compare::order(&left, &right)?.is_gt())
            }
            Operator::Lt(pair) => {
                let left = self.evaluate_internal(&pair.0, ctx)?;
                let right = self.evaluate_internal(&pair.1, ctx)?;
                JValue::Bool(compare::order(&left, &right)?.is_lt())
            }

            // ── Textual ─────────────────────────────────────────────────────
            Operator::StringFormat(format) => self.string_format(format, ctx)?,
            Operator::StringReplace(rules) => string::replace(input, rules),
            Operator::StringCase(case) => string::case(input, *case),
            Operator::Translate(id) => match external.messages().message(id)? {
                Some(message) => JValue::from(message),
                None => JValue::from(format!("{{{id}}}")),
            },

            // ── Temporal ────────────────────────────────────────────────────
            Operator::DateNow => JValue::Date(external.clock().now()),
            Operator::DateAdd(duration) => match coerce_date(input) {
                Some(date) => date
                    .checked_add_signed(duration.delta)
                    .map(JValue::Date)
                    .ok_or_else(|| {
                        EvaluatorError::EvaluationError(format!(
                            "date out of range after adding '{}'",
                            duration.source
                        ))
                    })?,
                None => input.clone(),
            },
            Operator::DateParse(format) => parse_date(input, format.as_deref()),
            Operator::DateFormat(format) => match coerce_date(input) {
                Some(date) => JValue::from(match format {
                    Some(f) => datetime::format_with(&date, f),
                    None => datetime::format_iso8601(&date),
                }),
                None => JValue::Undefined,
            },

            // ── Stochastic ──────────────────────────────────────────────────
            Operator::RandomChoice => random::choice(external.entropy(), input),
            Operator::RandomInteger(range) => random::integer(external.entropy(), *range),
            Operator::RandomFloat(range) => random::float(external.entropy(), *range),
            Operator::RandomString(spec) => random::string(external.entropy(), spec),

            // ── Contextual ──────────────────────────────────────────────────
            Operator::Context(keys) => path::lookup_keys(external.context(), keys),
            Operator::Root => ctx.root().clone(),
            Operator::History(index) => ctx.history_at(*index),
            Operator::FromHistory(props) => {
                let past = ctx.derive(ctx.history_at(props.index));
                JValue::object(self.evaluate_map(&props.props, &past)?)
            }
            Operator::AssignHistory(props) => {
                let past = ctx.derive(ctx.history_at(props.index));
                object::assign(input, self.evaluate_map(&props.props, &past)?)
            }
            Operator::OmitHistory(omit) => {
                let past = ctx.history_at(omit.index);
                if !past.is_object() {
                    past
                } else {
                    let remaining = object::omit(&past, &omit.keys);
                    match (input.is_object(), remaining.as_object()) {
                        (true, Some(entries)) => object::assign(input, entries.clone()),
                        _ => remaining,
                    }
                }
            }
            Operator::App(field) => lookup(external.app(), field.as_str()),
            Operator::Page(field) => lookup(external.page(), field.as_str()),
            Operator::User(key) => lookup(external.user(), key),
            Operator::Array(field) => match ctx.array_frame() {
                Some(frame) => JValue::from(match field {
                    ArrayField::Index => frame.index,
                    ArrayField::Length => frame.length,
                }),
                None => JValue::Undefined,
            },
            Operator::Step(name) => lookup(external.steps(), name),

            // ── Compound ────────────────────────────────────────────────────
            Operator::NullStrip(depth) => functions::null_strip(input, *depth),
            Operator::Ics(event) => self.ics(event, ctx)?,
            Operator::Log(level) => {
                log_input(*level, input, ctx.history().len());
                input.clone()
            }
        };

        Ok(value)
    }

    fn evaluate_list(
        &mut self,
        list: &[Remapper],
        ctx: &EvaluationContext<'_>,
    ) -> Result<Vec<JValue>, EvaluatorError> {
        list.iter()
            .map(|node| self.evaluate_internal(node, ctx))
            .collect()
    }

    fn evaluate_map(
        &mut self,
        map: &RemapperMap,
        ctx: &EvaluationContext<'_>,
    ) -> Result<IndexMap<String, JValue>, EvaluatorError> {
        let mut result = IndexMap::with_capacity(map.len());
        for (key, node) in map {
            result.insert(key.clone(), self.evaluate_internal(node, ctx)?);
        }
        Ok(result)
    }

    fn string_format(
        &mut self,
        format: &StringFormat,
        ctx: &EvaluationContext<'_>,
    ) -> Result<JValue, EvaluatorError> {
        let values = match &format.values {
            Some(map) => self.evaluate_map(map, ctx)?,
            None => IndexMap::new(),
        };
        let message = match &format.message_id {
            Some(id) => ctx.external().messages().message(id)?,
            None => None,
        };
        let template = message
            .as_deref()
            .or(format.template.as_deref())
            .unwrap_or_default();
        Ok(JValue::from(format_message(template, &values)))
    }

    fn ics(&mut self, op: &IcsOperand, ctx: &EvaluationContext<'_>) -> Result<JValue, EvaluatorError> {
        let mut optional = |node: &Option<Remapper>| -> Result<JValue, EvaluatorError> {
            match node {
                Some(node) => self.evaluate_internal(node, ctx),
                None => Ok(JValue::Undefined),
            }
        };
        let end = optional(&op.end)?;
        let duration = optional(&op.duration)?;
        let description = optional(&op.description)?;
        let url = optional(&op.url)?;
        let location = optional(&op.location)?;
        let coordinates = optional(&op.coordinates)?;

        let fields = EventFields {
            start: self.evaluate_internal(&op.start, ctx)?,
            end,
            duration,
            title: self.evaluate_internal(&op.title, ctx)?,
            description,
            url,
            location,
            coordinates,
        };
        let event = Event::from_fields(&fields)?;

        let external = ctx.external();
        let prodid = match external.app().get("url") {
            Some(url) if !url.is_nullish() => url.to_text(),
            _ => DEFAULT_PRODID.to_string(),
        };
        let uid = ics::uid(external.entropy());
        Ok(JValue::from(event.render(&uid, external.clock().now(), &prodid)))
    }
}

fn lookup(source: &JValue, key: &str) -> JValue {
    source.get(key).cloned().unwrap_or(JValue::Undefined)
}

fn parse_date(input: &JValue, format: Option<&str>) -> JValue {
    let parsed = match input {
        JValue::Date(_) => return input.clone(),
        JValue::Number(n) if n.is_finite() => chrono::DateTime::from_timestamp_millis(*n as i64),
        JValue::String(s) => match format {
            Some(f) if !f.is_empty() => datetime::parse_with_format(s, f).ok(),
            _ => datetime::parse_iso8601(s).ok(),
        },
        _ => None,
    };
    parsed.map(JValue::Date).unwrap_or(JValue::Undefined)
}

fn log_input(level: LogLevel, input: &JValue, history: usize) {
    match level {
        LogLevel::Debug => tracing::debug!(%input, history, "remapper log"),
        LogLevel::Info => tracing::info!(%input, history, "remapper log"),
        LogLevel::Warn => tracing::warn!(%input, history, "remapper log"),
        LogLevel::Error => tracing::error!(%input, history, "remapper log"),
    }
}

/// Evaluate `node` with a fresh default evaluator.
pub fn evaluate(node: &Remapper, ctx: &EvaluationContext<'_>) -> Result<JValue, EvaluatorError> {
    Evaluator::new().evaluate(node, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{External, FixedClock, SeededEntropy, StaticMessages};
    use crate::jvalue;
    use crate::parser::parse;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn eval(remapper: serde_json::Value, input: JValue) -> JValue {
        eval_with(remapper, input, &External::new())
    }

    fn eval_with(remapper: serde_json::Value, input: JValue, external: &External) -> JValue {
        let tree = parse(&remapper).unwrap();
        let ctx = EvaluationContext::new(input, external);
        evaluate(&tree, &ctx).unwrap()
    }

    #[test]
    fn test_literal_and_pipe() {
        assert_eq!(eval(json!("hi"), JValue::Null), JValue::from("hi"));
        assert_eq!(
            eval(json!([{ "prop": "a" }, { "prop": "b" }]), jvalue!({"a": {"b": 3}})),
            JValue::from(3i64)
        );
    }

    #[test]
    fn test_object_from_keeps_absent_keys() {
        let remapper = json!({ "object.from": { "a": { "prop": "x" } } });
        assert_eq!(eval(remapper.clone(), jvalue!({"x": 5})), jvalue!({"a": 5}));

        let result = eval(remapper, jvalue!({}));
        assert_eq!(result.get("a"), Some(&JValue::Undefined));
        assert_eq!(result.to_json_string().unwrap(), r#"{"a":null}"#);
    }

    #[test]
    fn test_omit_then_assign() {
        let remapper = json!([
            { "object.omit": ["a"] },
            { "object.assign": { "a": { "static": 1 } } }
        ]);
        assert_eq!(eval(remapper, jvalue!({"a": 0, "b": 2})), jvalue!({"b": 2, "a": 1}));
    }

    #[test]
    fn test_array_map_frames() {
        let remapper = json!({ "array.map": { "object.from": {
            "i": { "array": "index" },
            "n": { "array": "length" },
            "v": { "prop": "v" }
        } } });
        let result = eval(remapper, jvalue!([{"v": "a"}, {"v": "b"}]));
        assert_eq!(
            result,
            jvalue!([{"i": 0, "n": 2, "v": "a"}, {"i": 1, "n": 2, "v": "b"}])
        );
    }

    #[test]
    fn test_nested_array_map_shadows_outer_frame() {
        let remapper = json!({ "array.map": [
            { "prop": "items" },
            { "array.map": { "array": "index" } }
        ] });
        let input = jvalue!([{"items": [1, 2, 3]}, {"items": [4]}]);
        assert_eq!(eval(remapper, input), jvalue!([[0, 1, 2], [0]]));
    }

    #[test]
    fn test_array_operators_on_non_arrays() {
        assert_eq!(eval(json!({ "array.map": { "static": 1 } }), JValue::from("x")), jvalue!([]));
        assert_eq!(eval(json!({ "array.append": [{ "static": 1 }] }), JValue::Null), jvalue!([]));
        assert_eq!(eval(json!({ "array.omit": [{ "static": 0 }] }), jvalue!({})), jvalue!([]));
        assert_eq!(eval(json!({ "array.unique": null }), JValue::from(3i64)), JValue::from(3i64));
        assert_eq!(eval(json!({ "array": "index" }), JValue::Null), JValue::Undefined);
    }

    #[test]
    fn test_array_append_omit_unique() {
        assert_eq!(
            eval(json!({ "array.append": [{ "static": 3 }] }), jvalue!([1, 2])),
            jvalue!([1, 2, 3])
        );
        assert_eq!(
            eval(json!({ "array.omit": [{ "static": 0 }, { "static": "x" }] }), jvalue!([1, 2])),
            jvalue!([2])
        );
        assert_eq!(
            eval(
                json!({ "array.unique": { "prop": "id" } }),
                jvalue!([{"id": 1, "n": "a"}, {"id": 1, "n": "b"}, {"n": "c"}])
            ),
            jvalue!([{"id": 1, "n": "a"}, {"n": "c"}])
        );
    }

    #[test]
    fn test_if_and_match() {
        let remapper = json!({ "if": {
            "condition": { "prop": "ok" },
            "then": "yes",
            "else": "no"
        } });
        assert_eq!(eval(remapper.clone(), jvalue!({"ok": 1})), JValue::from("yes"));
        assert_eq!(eval(remapper, jvalue!({"ok": ""})), JValue::from("no"));

        let remapper = json!({ "match": [
            { "case": { "equals": [{ "prop": "t" }, "a"] }, "value": "A" },
            { "case": { "equals": [{ "prop": "t" }, "b"] }, "value": "B" }
        ] });
        assert_eq!(eval(remapper.clone(), jvalue!({"t": "b"})), JValue::from("B"));
        assert_eq!(eval(remapper, jvalue!({"t": "z"})), JValue::Undefined);
    }

    #[test]
    fn test_comparisons() {
        let input = jvalue!({"a": 1, "b": 1});
        assert_eq!(eval(json!({ "equals": [{ "prop": "a" }, { "prop": "b" }] }), input), JValue::Bool(true));
        assert_eq!(
            eval(json!({ "equals": [{ "prop": "a" }, { "prop": "b" }] }), jvalue!({"a": 1})),
            JValue::Bool(false)
        );
        assert_eq!(eval(json!({ "gt": [2, 1] }), JValue::Null), JValue::Bool(true));
        assert_eq!(eval(json!({ "lt": ["a", "b"] }), JValue::Null), JValue::Bool(true));

        let tree = parse(&json!({ "gt": [1, "1"] })).unwrap();
        let external = External::new();
        let err = evaluate(&tree, &EvaluationContext::new(JValue::Null, &external)).unwrap_err();
        assert!(matches!(err, EvaluatorError::TypeError(_)));
    }

    #[test]
    fn test_string_operators() {
        let external = External::new()
            .with_messages(StaticMessages::new().with("hello", "Hello {name}"));
        let remapper = json!({ "string.format": {
            "messageId": "hello",
            "template": "Hi {name}",
            "values": { "name": { "prop": "n" } }
        } });
        assert_eq!(eval_with(remapper, jvalue!({"n": "Ada"}), &external), JValue::from("Hello Ada"));

        let remapper = json!({ "string.format": { "messageId": "missing", "template": "Hi {name}", "values": { "name": "Bo" } } });
        assert_eq!(eval(remapper, JValue::Null), JValue::from("Hi Bo"));

        assert_eq!(eval(json!({ "translate": "nope" }), JValue::Null), JValue::from("{nope}"));
        assert_eq!(eval(json!({ "string.case": "upper" }), JValue::from("abc")), JValue::from("ABC"));
        assert_eq!(
            eval(json!({ "string.replace": { "\\s+": "-" } }), JValue::from("a  b c")),
            JValue::from("a-b-c")
        );
    }

    #[test]
    fn test_dates_are_injectable() {
        let now = Utc.with_ymd_and_hms(2024, 2, 28, 12, 0, 0).unwrap();
        let external = External::new().with_clock(FixedClock(now));
        let result = eval_with(json!([{ "date.now": null }, { "date.add": "1d" }]), JValue::Null, &external);
        assert_eq!(result, JValue::Date(Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap()));

        assert_eq!(
            eval(json!([{ "date.parse": "%d/%m/%Y" }, { "date.format": "%Y-%m-%d" }]), JValue::from("05/11/2023")),
            JValue::from("2023-11-05")
        );
        assert_eq!(eval(json!({ "date.parse": null }), JValue::from("garbage")), JValue::Undefined);
        assert_eq!(eval(json!({ "date.add": "1h" }), JValue::Bool(true)), JValue::Bool(true));
    }

    #[test]
    fn test_random_is_reproducible() {
        let remapper = json!({ "array.from": [
            { "random.integer": [0, 100] },
            { "random.float": [0, 1] },
            { "random.string": { "choice": "abc", "length": 4 } }
        ] });
        let a = eval_with(remapper.clone(), JValue::Null, &External::new().with_entropy(SeededEntropy::new(9)));
        let b = eval_with(remapper, JValue::Null, &External::new().with_entropy(SeededEntropy::new(9)));
        assert_eq!(a, b);
        assert_eq!(eval(json!({ "random.choice": null }), JValue::from("x")), JValue::from("x"));
    }

    #[test]
    fn test_history_operators() {
        let external = External::new();
        let history = vec![jvalue!({"a": 1, "b": 2}), JValue::from(10i64)];
        let run = |remapper: serde_json::Value, input: JValue| {
            let tree = parse(&remapper).unwrap();
            let ctx = EvaluationContext::new(input, &external).with_history(&history);
            evaluate(&tree, &ctx).unwrap()
        };

        assert_eq!(run(json!({ "history": 1 }), JValue::Null), JValue::from(10i64));
        assert_eq!(run(json!({ "history": 5 }), JValue::Null), JValue::Undefined);
        assert_eq!(
            run(json!({ "from.history": { "index": 0, "props": { "x": { "prop": "a" } } } }), JValue::Null),
            jvalue!({"x": 1})
        );
        assert_eq!(
            run(json!({ "assign.history": { "index": 0, "props": { "x": { "prop": "b" } } } }), jvalue!({"y": 0})),
            jvalue!({"y": 0, "x": 2})
        );
        assert_eq!(
            run(json!({ "omit.history": { "index": 0, "keys": ["a"] } }), jvalue!({"c": 3})),
            jvalue!({"c": 3, "b": 2})
        );
    }

    #[test]
    fn test_external_lookups() {
        let external = External::new()
            .with_app(jvalue!({"id": 3, "locale": "nl", "url": "https://app.test"}))
            .with_page(jvalue!({"data": {"p": 1}, "url": "https://app.test/p"}))
            .with_user(jvalue!({"name": "Ada"}))
            .with_context(jvalue!({"a": {"b": "deep"}}))
            .with_steps(jvalue!({"first": 1}));
        assert_eq!(eval_with(json!({ "app": "locale" }), JValue::Null, &external), JValue::from("nl"));
        assert_eq!(eval_with(json!({ "page": "data" }), JValue::Null, &external), jvalue!({"p": 1}));
        assert_eq!(eval_with(json!({ "user": "name" }), JValue::Null, &external), JValue::from("Ada"));
        assert_eq!(eval_with(json!({ "user": "email" }), JValue::Null, &external), JValue::Undefined);
        assert_eq!(eval_with(json!({ "context": "a.b" }), JValue::Null, &external), JValue::from("deep"));
        assert_eq!(eval_with(json!({ "step": "first" }), JValue::Null, &external), JValue::from(1i64));
        assert_eq!(eval_with(json!([{ "prop": "x" }, { "root": null }]), jvalue!({"x": 1}), &external), jvalue!({"x": 1}));
    }

    #[test]
    fn test_ics() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let external = External::new()
            .with_clock(FixedClock(now))
            .with_entropy(SeededEntropy::new(1))
            .with_app(jvalue!({"url": "https://app.test"}));
        let remapper = json!({ "ics": {
            "start": { "prop": "at" },
            "duration": "2h",
            "title": { "prop": "name" }
        } });
        let result = eval_with(remapper.clone(), jvalue!({"at": "2024-03-01T10:00:00Z", "name": "Demo"}), &external);
        let text = result.as_str().unwrap();
        assert!(text.contains("PRODID:https://app.test\r\n"));
        assert!(text.contains("DTSTAMP:20240101T000000Z\r\n"));
        assert!(text.contains("DTEND:20240301T120000Z\r\n"));
        assert!(text.contains("SUMMARY:Demo\r\n"));

        let tree = parse(&remapper).unwrap();
        let input = jvalue!({"name": "Demo"});
        let err = evaluate(&tree, &EvaluationContext::new(input, &external)).unwrap_err();
        assert!(matches!(err, EvaluatorError::EvaluationError(_)));
    }

    #[test]
    fn test_ics_overflowing_duration_is_an_error() {
        let external = External::new().with_entropy(SeededEntropy::new(1));
        let tree = parse(&json!({ "ics": {
            "start": { "prop": "s" },
            "duration": { "prop": "d" },
            "title": "t"
        } }))
        .unwrap();
        for d in [1e17, -1e30] {
            let input = jvalue!({"s": "2024-01-01T00:00:00Z", "d": d});
            let err = evaluate(&tree, &EvaluationContext::new(input, &external)).unwrap_err();
            assert!(matches!(err, EvaluatorError::EvaluationError(_)), "{err}");
        }
    }

    struct BrokenMessages;

    impl crate::context::MessageSource for BrokenMessages {
        fn message(&self, _id: &str) -> Result<Option<String>, HostError> {
            Err(HostError("no messages for locale 'xx'".to_string()))
        }
    }

    #[test]
    fn test_host_lookup_failure_is_reference_error() {
        let external = External::new().with_messages(BrokenMessages);
        for remapper in [
            json!({ "translate": "greeting" }),
            json!({ "string.format": { "messageId": "greeting", "template": "Hi" } }),
        ] {
            let tree = parse(&remapper).unwrap();
            let err = evaluate(&tree, &EvaluationContext::new(JValue::Null, &external)).unwrap_err();
            match err {
                EvaluatorError::ReferenceError(msg) => assert!(msg.contains("locale 'xx'"), "{msg}"),
                other => panic!("expected a reference error, got {other}"),
            }
        }

        // Without a message id the source is never consulted
        let tree = parse(&json!({ "string.format": { "template": "Hi" } })).unwrap();
        let ctx = EvaluationContext::new(JValue::Null, &external);
        assert_eq!(evaluate(&tree, &ctx).unwrap(), JValue::from("Hi"));
    }

    #[test]
    fn test_null_strip_and_log() {
        assert_eq!(
            eval(json!({ "null.strip": null }), jvalue!({"a": null, "b": [null, 1, []], "c": 2})),
            jvalue!({"b": [1], "c": 2})
        );
        assert_eq!(eval(json!({ "log": "warn" }), JValue::from(4i64)), JValue::from(4i64));
    }

    #[test]
    fn test_depth_limit() {
        let mut node = Remapper::literal(1i64);
        for _ in 0..10 {
            node = Remapper::Pipe(vec![node]);
        }
        let external = External::new();
        let ctx = EvaluationContext::new(JValue::Null, &external);
        let mut shallow = Evaluator::with_options(EvaluatorOptions { max_depth: 5 });
        assert!(matches!(shallow.evaluate(&node, &ctx), Err(EvaluatorError::EvaluationError(_))));
        assert_eq!(Evaluator::new().evaluate(&node, &ctx).unwrap(), JValue::from(1i64));
    }

    #[test]
    fn test_options_deserialize() {
        let options: EvaluatorOptions = serde_json::from_value(json!({ "maxDepth": 12 })).unwrap();
        assert_eq!(options.max_depth, 12);
        let options: EvaluatorOptions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(options, EvaluatorOptions::default());
    }
}
