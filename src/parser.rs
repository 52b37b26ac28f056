// Remapper parser
// Compiles a schema-checked JSON remapper document into a `Remapper` tree

use std::fmt;

use regex::RegexBuilder;
use serde::de::{self, Deserialize, Deserializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::ast::{
    AppField, ArrayField, DurationSpec, HistoryOmit, HistoryProps, IcsOperand, IfOperand,
    LogLevel, MatchCase, Operator, PageField, PropKey, RandomRange, RandomString, Remapper,
    RemapperMap, Replacement, StringCase, StringFormat,
};
use crate::datetime;
use crate::signature::{self, OperandShape, Signature, SignatureError};
use crate::utils::json_pointer;
use crate::value::JValue;

/// Parser errors
///
/// These are construction errors: a document that produces one is rejected
/// as a whole. Every variant except `Json` records the JSON pointer of the
/// offending node.
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Unknown remapper '{name}' at {at}")]
    UnknownOperator { name: String, at: String },

    #[error("Remapper object must have exactly one key, found {count} at {at}")]
    AmbiguousOperator { count: usize, at: String },

    #[error("Invalid operand for '{operator}' at {at}: {reason}")]
    InvalidOperand {
        operator: String,
        reason: String,
        at: String,
    },

    #[error("Missing key '{key}' for '{operator}' at {at}")]
    MissingKey {
        operator: String,
        key: String,
        at: String,
    },

    #[error("Invalid regex '{pattern}' at {at}: {reason}")]
    InvalidRegex {
        pattern: String,
        reason: String,
        at: String,
    },

    #[error("Invalid duration '{value}' at {at}")]
    InvalidDuration { value: String, at: String },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Compile a remapper document.
///
/// Strings, numbers, booleans and null are literals. Arrays are pipelines.
/// Objects must have exactly one key naming an operator.
pub fn parse(value: &Value) -> Result<Remapper, ParserError> {
    let result = Parser::new().parse_node(value);
    if let Err(e) = &result {
        tracing::debug!(error = %e, "rejected remapper definition");
    }
    result
}

/// Compile a remapper document from JSON text.
pub fn parse_str(json: &str) -> Result<Remapper, ParserError> {
    let value: Value = serde_json::from_str(json)?;
    parse(&value)
}

impl<'de> Deserialize<'de> for Remapper {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        parse(&value).map_err(de::Error::custom)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

static NULL: Value = Value::Null;

/// Value of a record field; absent fields read as null.
fn required<'v>(record: &'v Map<String, Value>, key: &str) -> &'v Value {
    record.get(key).unwrap_or(&NULL)
}

struct Parser {
    path: Vec<String>,
}

impl Parser {
    fn new() -> Self {
        Parser { path: Vec::new() }
    }

    fn location(&self) -> String {
        json_pointer(&self.path)
    }

    /// Run `f` with `segment` appended to the current location.
    fn nested<T>(
        &mut self,
        segment: impl fmt::Display,
        f: impl FnOnce(&mut Self) -> Result<T, ParserError>,
    ) -> Result<T, ParserError> {
        self.path.push(segment.to_string());
        let result = f(self);
        self.path.pop();
        result
    }

    fn invalid(&self, operator: &str, reason: impl Into<String>) -> ParserError {
        ParserError::InvalidOperand {
            operator: operator.to_string(),
            reason: reason.into(),
            at: self.location(),
        }
    }

    fn signature_error(&self, operator: &str, error: SignatureError) -> ParserError {
        match error {
            SignatureError::MissingKey(key) => ParserError::MissingKey {
                operator: operator.to_string(),
                key,
                at: self.location(),
            },
            other => self.invalid(operator, other.to_string()),
        }
    }

    fn mismatch(&self, operator: &str, expected: &'static str, actual: &Value) -> ParserError {
        self.signature_error(
            operator,
            SignatureError::ShapeMismatch {
                expected,
                actual: json_type(actual),
            },
        )
    }

    fn parse_node(&mut self, value: &Value) -> Result<Remapper, ParserError> {
        match value {
            Value::Array(steps) => {
                let mut pipe = Vec::with_capacity(steps.len());
                for (i, step) in steps.iter().enumerate() {
                    pipe.push(self.nested(i, |p| p.parse_node(step))?);
                }
                Ok(Remapper::Pipe(pipe))
            }
            Value::Object(map) => {
                let mut entries = map.iter();
                match (entries.next(), entries.next()) {
                    (Some((tag, operand)), None) => {
                        let op = self.nested(tag, |p| p.parse_operator(tag, operand))?;
                        Ok(Remapper::Operator(op))
                    }
                    _ => Err(ParserError::AmbiguousOperator {
                        count: map.len(),
                        at: self.location(),
                    }),
                }
            }
            scalar => Ok(Remapper::Literal(JValue::from(scalar))),
        }
    }

    fn parse_operator(&mut self, tag: &str, operand: &Value) -> Result<Operator, ParserError> {
        let unknown = |p: &Self| ParserError::UnknownOperator {
            name: tag.to_string(),
            at: p.location(),
        };
        let sig = signature::lookup(tag).ok_or_else(|| unknown(self))?;

        let op = match sig.tag {
            "prop" => Operator::Prop(self.prop_path(sig, operand)?),
            "static" => Operator::Static(JValue::from(operand)),
            "object.from" => Operator::ObjectFrom(self.node_map(sig, operand)?),
            "object.assign" => Operator::ObjectAssign(self.node_map(sig, operand)?),
            "object.omit" => Operator::ObjectOmit(self.key_list(sig, operand)?),
            "array.map" => Operator::ArrayMap(Box::new(self.parse_node(operand)?)),
            "array.from" => Operator::ArrayFrom(self.node_list(sig, operand)?),
            "array.append" => Operator::ArrayAppend(self.node_list(sig, operand)?),
            "array.omit" => Operator::ArrayOmit(self.node_list(sig, operand)?),
            "array.unique" => Operator::ArrayUnique(match operand {
                Value::Null => None,
                other => Some(Box::new(self.parse_node(other)?)),
            }),
            "if" => {
                let record = self.record(sig, operand)?;
                Operator::If(Box::new(IfOperand {
                    condition: self.field(record, "condition")?,
                    then_branch: self.field(record, "then")?,
                    else_branch: self.field(record, "else")?,
                }))
            }
            "match" => Operator::Match(self.match_cases(sig, operand)?),
            "equals" => Operator::Equals(self.node_list(sig, operand)?),
            "gt" | "lt" => {
                let mut pair = self.node_list(sig, operand)?.into_iter();
                let (Some(left), Some(right)) = (pair.next(), pair.next()) else {
                    return Err(self.invalid(sig.tag, "expected two remappers"));
                };
                let pair = Box::new((left, right));
                if sig.tag == "gt" {
                    Operator::Gt(pair)
                } else {
                    Operator::Lt(pair)
                }
            }
            "string.format" => Operator::StringFormat(self.string_format(sig, operand)?),
            "string.replace" => Operator::StringReplace(self.replacements(sig, operand)?),
            "string.case" => Operator::StringCase(match self.string(sig, operand)? {
                "lower" => StringCase::Lower,
                "upper" => StringCase::Upper,
                other => {
                    return Err(self.invalid(sig.tag, format!("unsupported case '{other}'")));
                }
            }),
            "translate" => Operator::Translate(self.string(sig, operand)?.to_string()),
            "date.now" => Operator::DateNow,
            "date.add" => {
                let source = self.string(sig, operand)?;
                let delta =
                    datetime::parse_duration(source).map_err(|_| ParserError::InvalidDuration {
                        value: source.to_string(),
                        at: self.location(),
                    })?;
                Operator::DateAdd(DurationSpec {
                    source: source.to_string(),
                    delta,
                })
            }
            "date.parse" => Operator::DateParse(self.date_format(sig, operand)?),
            "date.format" => Operator::DateFormat(self.date_format(sig, operand)?),
            "random.choice" => Operator::RandomChoice,
            "random.integer" => Operator::RandomInteger(self.range(sig, operand)?),
            "random.float" => Operator::RandomFloat(self.range(sig, operand)?),
            "random.string" => Operator::RandomString(self.random_string(sig, operand)?),
            "context" => Operator::Context(
                self.string(sig, operand)?
                    .split('.')
                    .map(str::to_string)
                    .collect(),
            ),
            "root" => Operator::Root,
            "history" => Operator::History(self.index(sig, operand)?),
            "from.history" => Operator::FromHistory(self.history_props(sig, operand)?),
            "assign.history" => Operator::AssignHistory(self.history_props(sig, operand)?),
            "omit.history" => {
                let record = self.record(sig, operand)?;
                let index = self.nested("index", |p| p.index(sig, required(record, "index")))?;
                let keys = self.nested("keys", |p| p.key_list(sig, required(record, "keys")))?;
                Operator::OmitHistory(HistoryOmit { index, keys })
            }
            "app" => Operator::App(match self.string(sig, operand)? {
                "id" => AppField::Id,
                "locale" => AppField::Locale,
                "url" => AppField::Url,
                other => return Err(self.invalid(sig.tag, format!("unknown field '{other}'"))),
            }),
            "page" => Operator::Page(match self.string(sig, operand)? {
                "data" => PageField::Data,
                "url" => PageField::Url,
                other => return Err(self.invalid(sig.tag, format!("unknown field '{other}'"))),
            }),
            "array" => Operator::Array(match self.string(sig, operand)? {
                "index" => ArrayField::Index,
                "length" => ArrayField::Length,
                other => return Err(self.invalid(sig.tag, format!("unknown field '{other}'"))),
            }),
            "user" => Operator::User(self.string(sig, operand)?.to_string()),
            "step" => Operator::Step(self.string(sig, operand)?.to_string()),
            "null.strip" => Operator::NullStrip(self.depth(sig, operand)?),
            "ics" => Operator::Ics(Box::new(self.ics(sig, operand)?)),
            "log" => Operator::Log(match operand {
                Value::Null => LogLevel::Info,
                _ => match self.string(sig, operand)? {
                    "debug" => LogLevel::Debug,
                    "info" => LogLevel::Info,
                    "warn" => LogLevel::Warn,
                    "error" => LogLevel::Error,
                    other => {
                        return Err(self.invalid(sig.tag, format!("unknown level '{other}'")));
                    }
                },
            }),
            // Only reachable if the signature table lists a tag with no decoder
            _ => return Err(unknown(self)),
        };

        Ok(op)
    }

    // ── Operand shapes ───────────────────────────────────────────────────────

    fn node_list(&mut self, sig: &Signature, operand: &Value) -> Result<Vec<Remapper>, ParserError> {
        let Value::Array(items) = operand else {
            return Err(self.mismatch(sig.tag, "a list of remappers", operand));
        };
        sig.validate_list_len(items.len())
            .map_err(|e| self.signature_error(sig.tag, e))?;

        let mut nodes = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            nodes.push(self.nested(i, |p| p.parse_node(item))?);
        }
        Ok(nodes)
    }

    fn node_map(&mut self, sig: &Signature, operand: &Value) -> Result<RemapperMap, ParserError> {
        let Value::Object(entries) = operand else {
            return Err(self.mismatch(sig.tag, "a map of remappers", operand));
        };
        let mut map = RemapperMap::with_capacity(entries.len());
        for (key, value) in entries {
            let node = self.nested(key, |p| p.parse_node(value))?;
            map.insert(key.clone(), node);
        }
        Ok(map)
    }

    fn record<'v>(
        &self,
        sig: &Signature,
        operand: &'v Value,
    ) -> Result<&'v Map<String, Value>, ParserError> {
        debug_assert!(matches!(sig.shape, OperandShape::Record(_) | OperandShape::RecordList(_)));
        let Value::Object(record) = operand else {
            return Err(self.mismatch(sig.tag, "a record", operand));
        };
        sig.validate_record_keys(record.keys().map(String::as_str))
            .map_err(|e| self.signature_error(sig.tag, e))?;
        Ok(record)
    }

    /// Parse a required record field as a remapper.
    fn field(&mut self, record: &Map<String, Value>, key: &str) -> Result<Remapper, ParserError> {
        let value = required(record, key);
        self.nested(key, |p| p.parse_node(value))
    }

    /// Parse an optional record field as a remapper.
    fn optional_field(
        &mut self,
        record: &Map<String, Value>,
        key: &str,
    ) -> Result<Option<Remapper>, ParserError> {
        record
            .get(key)
            .map(|value| self.nested(key, |p| p.parse_node(value)))
            .transpose()
    }

    // ── Literal arguments ────────────────────────────────────────────────────

    fn string<'v>(&self, sig: &Signature, operand: &'v Value) -> Result<&'v str, ParserError> {
        operand
            .as_str()
            .ok_or_else(|| self.mismatch(sig.tag, "a string", operand))
    }

    fn index(&self, sig: &Signature, operand: &Value) -> Result<usize, ParserError> {
        operand
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| self.mismatch(sig.tag, "a non-negative integer", operand))
    }

    fn prop_key(&self, sig: &Signature, value: &Value) -> Result<PropKey, ParserError> {
        match value {
            Value::String(s) => Ok(PropKey::Key(s.clone())),
            Value::Number(n) => n
                .as_i64()
                .map(PropKey::Index)
                .ok_or_else(|| self.invalid(sig.tag, format!("{n} is not an integer index"))),
            other => Err(self.mismatch(sig.tag, "a key or an index", other)),
        }
    }

    fn prop_path(&mut self, sig: &Signature, operand: &Value) -> Result<Vec<PropKey>, ParserError> {
        match operand {
            Value::Array(segments) => {
                let mut path = Vec::with_capacity(segments.len());
                for (i, segment) in segments.iter().enumerate() {
                    path.push(self.nested(i, |p| p.prop_key(sig, segment))?);
                }
                Ok(path)
            }
            single => Ok(vec![self.prop_key(sig, single)?]),
        }
    }

    fn key_segment(&self, sig: &Signature, value: &Value) -> Result<String, ParserError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(self.mismatch(sig.tag, "a key", other)),
        }
    }

    fn key_list(&mut self, sig: &Signature, operand: &Value) -> Result<Vec<Vec<String>>, ParserError> {
        let Value::Array(entries) = operand else {
            return Err(self.mismatch(sig.tag, "a list of keys", operand));
        };

        let mut keys = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let key = self.nested(i, |p| match entry {
                Value::Array(path) if path.is_empty() => {
                    Err(p.invalid(sig.tag, "key paths must not be empty"))
                }
                Value::Array(path) => path.iter().map(|s| p.key_segment(sig, s)).collect(),
                single => Ok(vec![p.key_segment(sig, single)?]),
            })?;
            keys.push(key);
        }
        Ok(keys)
    }

    fn range(&self, sig: &Signature, operand: &Value) -> Result<RandomRange, ParserError> {
        match operand.as_array().map(Vec::as_slice) {
            Some([min, max]) => match (min.as_f64(), max.as_f64()) {
                (Some(min), Some(max)) => Ok(RandomRange { min, max }),
                _ => Err(self.invalid(sig.tag, "bounds must be numbers")),
            },
            _ => Err(self.mismatch(sig.tag, "a [min, max] pair", operand)),
        }
    }

    fn date_format(&self, sig: &Signature, operand: &Value) -> Result<Option<String>, ParserError> {
        match operand {
            Value::Null => Ok(None),
            Value::String(s) if s.is_empty() => Ok(None),
            Value::String(s) => {
                datetime::validate_format(s).map_err(|e| self.invalid(sig.tag, e.to_string()))?;
                Ok(Some(s.clone()))
            }
            other => Err(self.mismatch(sig.tag, "a format string or null", other)),
        }
    }

    fn depth(&self, sig: &Signature, operand: &Value) -> Result<Option<usize>, ParserError> {
        match operand {
            Value::Null => Ok(None),
            Value::Number(_) => self.index(sig, operand).map(Some),
            Value::Object(record) => {
                if let Some(unknown) = record.keys().find(|k| k.as_str() != "depth") {
                    return Err(self.invalid(sig.tag, format!("unexpected key '{unknown}'")));
                }
                match record.get("depth") {
                    None | Some(Value::Null) => Ok(None),
                    Some(depth) => self.index(sig, depth).map(Some),
                }
            }
            other => Err(self.mismatch(sig.tag, "null, a depth or {depth}", other)),
        }
    }

    // ── Structured operands ──────────────────────────────────────────────────

    fn match_cases(&mut self, sig: &Signature, operand: &Value) -> Result<Vec<MatchCase>, ParserError> {
        let Value::Array(arms) = operand else {
            return Err(self.mismatch(sig.tag, "a list of {case, value} records", operand));
        };
        let mut cases = Vec::with_capacity(arms.len());
        for (i, arm) in arms.iter().enumerate() {
            let case = self.nested(i, |p| {
                let record = p.record(sig, arm)?;
                Ok(MatchCase {
                    case: p.field(record, "case")?,
                    value: p.field(record, "value")?,
                })
            })?;
            cases.push(case);
        }
        Ok(cases)
    }

    fn string_format(&mut self, sig: &Signature, operand: &Value) -> Result<StringFormat, ParserError> {
        let record = self.record(sig, operand)?;
        let text = |p: &Self, key: &str| -> Result<Option<String>, ParserError> {
            match record.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(s)) => Ok(Some(s.clone())),
                Some(other) => Err(p.mismatch(sig.tag, "a string", other)),
            }
        };
        let message_id = self.nested("messageId", |p| text(p, "messageId"))?;
        let template = self.nested("template", |p| text(p, "template"))?;
        let values = match record.get("values") {
            None | Some(Value::Null) => None,
            Some(values) => Some(self.nested("values", |p| p.node_map(sig, values))?),
        };
        Ok(StringFormat {
            message_id,
            template,
            values,
        })
    }

    fn replacements(&self, sig: &Signature, operand: &Value) -> Result<Vec<Replacement>, ParserError> {
        let Value::Object(rules) = operand else {
            return Err(self.mismatch(sig.tag, "a map of pattern to replacement", operand));
        };
        let mut replacements = Vec::with_capacity(rules.len());
        for (pattern, replacement) in rules {
            let replacement = replacement
                .as_str()
                .ok_or_else(|| self.mismatch(sig.tag, "a replacement string", replacement))?;
            let regex = RegexBuilder::new(pattern)
                .multi_line(true)
                .build()
                .map_err(|e| ParserError::InvalidRegex {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                    at: self.location(),
                })?;
            replacements.push(Replacement {
                pattern: regex,
                replacement: replacement.to_string(),
            });
        }
        Ok(replacements)
    }

    fn random_string(&mut self, sig: &Signature, operand: &Value) -> Result<RandomString, ParserError> {
        let record = self.record(sig, operand)?;
        let choice: Vec<char> = self
            .nested("choice", |p| p.string(sig, required(record, "choice")))?
            .chars()
            .collect();
        if choice.is_empty() {
            return Err(self.invalid(sig.tag, "choice must not be empty"));
        }
        let length = self.nested("length", |p| p.index(sig, required(record, "length")))?;
        Ok(RandomString { choice, length })
    }

    fn history_props(&mut self, sig: &Signature, operand: &Value) -> Result<HistoryProps, ParserError> {
        let record = self.record(sig, operand)?;
        let index = self.nested("index", |p| p.index(sig, required(record, "index")))?;
        let props = self.nested("props", |p| p.node_map(sig, required(record, "props")))?;
        Ok(HistoryProps { index, props })
    }

    fn ics(&mut self, sig: &Signature, operand: &Value) -> Result<IcsOperand, ParserError> {
        let record = self.record(sig, operand)?;
        if !record.contains_key("end") && !record.contains_key("duration") {
            return Err(self.invalid(sig.tag, "either 'end' or 'duration' is required"));
        }
        Ok(IcsOperand {
            start: self.field(record, "start")?,
            end: self.optional_field(record, "end")?,
            duration: self.optional_field(record, "duration")?,
            title: self.field(record, "title")?,
            description: self.optional_field(record, "description")?,
            url: self.optional_field(record, "url")?,
            location: self.optional_field(record, "location")?,
            coordinates: self.optional_field(record, "coordinates")?,
        })
    }
}
