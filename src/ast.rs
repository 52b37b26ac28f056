// Abstract Syntax Tree definitions
// One variant per remapper operator, each carrying its typed operand

use chrono::TimeDelta;
use indexmap::IndexMap;
use regex::Regex;

use crate::value::JValue;

/// Remappers keyed by output property, in document order.
pub type RemapperMap = IndexMap<String, Remapper>;

/// A compiled remapper definition.
///
/// Trees are immutable once built by [`crate::parser::parse`] and hold no
/// interior mutability, so one tree can be shared by concurrent evaluations.
#[derive(Debug, Clone)]
pub enum Remapper {
    /// Any JSON value, returned verbatim.
    Literal(JValue),

    /// Sequence of remappers, each applied to the previous result.
    Pipe(Vec<Remapper>),

    /// A named operator with its operand.
    Operator(Operator),
}

/// One segment of a `prop` path.
#[derive(Debug, Clone, PartialEq)]
pub enum PropKey {
    Key(String),
    Index(i64),
}

/// Case conversion for `string.case`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringCase {
    Lower,
    Upper,
}

/// Fields readable through the `app` operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppField {
    Id,
    Locale,
    Url,
}

/// Fields readable through the `page` operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageField {
    Data,
    Url,
}

/// Fields readable through the `array` operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayField {
    Index,
    Length,
}

/// Severity used by the `log` operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl AppField {
    pub fn as_str(self) -> &'static str {
        match self {
            AppField::Id => "id",
            AppField::Locale => "locale",
            AppField::Url => "url",
        }
    }
}

impl PageField {
    pub fn as_str(self) -> &'static str {
        match self {
            PageField::Data => "data",
            PageField::Url => "url",
        }
    }
}

/// Operand of `if`.
#[derive(Debug, Clone)]
pub struct IfOperand {
    pub condition: Remapper,
    pub then_branch: Remapper,
    pub else_branch: Remapper,
}

/// One arm of `match`.
#[derive(Debug, Clone)]
pub struct MatchCase {
    pub case: Remapper,
    pub value: Remapper,
}

/// Operand of `string.format`.
#[derive(Debug, Clone, Default)]
pub struct StringFormat {
    pub message_id: Option<String>,
    pub template: Option<String>,
    pub values: Option<RemapperMap>,
}

/// A single `string.replace` rule. The pattern is compiled once at construction.
#[derive(Debug, Clone)]
pub struct Replacement {
    pub pattern: Regex,
    pub replacement: String,
}

/// A parsed `date.add` duration, keeping the source text for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct DurationSpec {
    pub source: String,
    pub delta: TimeDelta,
}

/// Bounds for `random.integer` and `random.float`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RandomRange {
    pub min: f64,
    pub max: f64,
}

/// Operand of `random.string`.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomString {
    pub choice: Vec<char>,
    pub length: usize,
}

/// Operand of `from.history` and `assign.history`.
#[derive(Debug, Clone)]
pub struct HistoryProps {
    pub index: usize,
    pub props: RemapperMap,
}

/// Operand of `omit.history`.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryOmit {
    pub index: usize,
    pub keys: Vec<Vec<String>>,
}

/// Operand of `ics`.
#[derive(Debug, Clone)]
pub struct IcsOperand {
    pub start: Remapper,
    pub end: Option<Remapper>,
    pub duration: Option<Remapper>,
    pub title: Remapper,
    pub description: Option<Remapper>,
    pub url: Option<Remapper>,
    pub location: Option<Remapper>,
    pub coordinates: Option<Remapper>,
}

/// The closed set of remapper operators.
#[derive(Debug, Clone)]
pub enum Operator {
    // Structural
    Prop(Vec<PropKey>),
    Static(JValue),
    ObjectFrom(RemapperMap),
    ObjectAssign(RemapperMap),
    /// Each entry is a key path; a single-element path removes a top-level key.
    ObjectOmit(Vec<Vec<String>>),
    ArrayMap(Box<Remapper>),
    ArrayFrom(Vec<Remapper>),
    ArrayAppend(Vec<Remapper>),
    ArrayOmit(Vec<Remapper>),
    ArrayUnique(Option<Box<Remapper>>),

    // Comparison and control flow
    If(Box<IfOperand>),
    Match(Vec<MatchCase>),
    Equals(Vec<Remapper>),
    Gt(Box<(Remapper, Remapper)>),
    Lt(Box<(Remapper, Remapper)>),

    // Textual
    StringFormat(StringFormat),
    StringReplace(Vec<Replacement>),
    StringCase(StringCase),
    Translate(String),

    // Temporal
    DateNow,
    DateAdd(DurationSpec),
    DateParse(Option<String>),
    DateFormat(Option<String>),

    // Stochastic
    RandomChoice,
    RandomInteger(RandomRange),
    RandomFloat(RandomRange),
    RandomString(RandomString),

    // Contextual
    Context(Vec<String>),
    Root,
    History(usize),
    FromHistory(HistoryProps),
    AssignHistory(HistoryProps),
    OmitHistory(HistoryOmit),
    App(AppField),
    Page(PageField),
    User(String),
    Array(ArrayField),
    Step(String),

    // Compound
    NullStrip(Option<usize>),
    Ics(Box<IcsOperand>),
    Log(LogLevel),
}

impl Operator {
    /// The operator's name as written in remapper documents.
    pub fn tag(&self) -> &'static str {
        match self {
            Operator::Prop(_) => "prop",
            Operator::Static(_) => "static",
            Operator::ObjectFrom(_) => "object.from",
            Operator::ObjectAssign(_) => "object.assign",
            Operator::ObjectOmit(_) => "object.omit",
            Operator::ArrayMap(_) => "array.map",
            Operator::ArrayFrom(_) => "array.from",
            Operator::ArrayAppend(_) => "array.append",
            Operator::ArrayOmit(_) => "array.omit",
            Operator::ArrayUnique(_) => "array.unique",
            Operator::If(_) => "if",
            Operator::Match(_) => "match",
            Operator::Equals(_) => "equals",
            Operator::Gt(_) => "gt",
            Operator::Lt(_) => "lt",
            Operator::StringFormat(_) => "string.format",
            Operator::StringReplace(_) => "string.replace",
            Operator::StringCase(_) => "string.case",
            Operator::Translate(_) => "translate",
            Operator::DateNow => "date.now",
            Operator::DateAdd(_) => "date.add",
            Operator::DateParse(_) => "date.parse",
            Operator::DateFormat(_) => "date.format",
            Operator::RandomChoice => "random.choice",
            Operator::RandomInteger(_) => "random.integer",
            Operator::RandomFloat(_) => "random.float",
            Operator::RandomString(_) => "random.string",
            Operator::Context(_) => "context",
            Operator::Root => "root",
            Operator::History(_) => "history",
            Operator::FromHistory(_) => "from.history",
            Operator::AssignHistory(_) => "assign.history",
            Operator::OmitHistory(_) => "omit.history",
            Operator::App(_) => "app",
            Operator::Page(_) => "page",
            Operator::User(_) => "user",
            Operator::Array(_) => "array",
            Operator::Step(_) => "step",
            Operator::NullStrip(_) => "null.strip",
            Operator::Ics(_) => "ics",
            Operator::Log(_) => "log",
        }
    }

    /// Direct child remappers of this operator, in evaluation order.
    pub fn children(&self) -> Vec<&Remapper> {
        match self {
            Operator::ObjectFrom(map) | Operator::ObjectAssign(map) => map.values().collect(),
            Operator::FromHistory(h) | Operator::AssignHistory(h) => h.props.values().collect(),
            Operator::ArrayMap(item) => vec![item.as_ref()],
            Operator::ArrayUnique(item) => item.iter().map(|r| r.as_ref()).collect(),
            Operator::ArrayFrom(list)
            | Operator::ArrayAppend(list)
            | Operator::ArrayOmit(list)
            | Operator::Equals(list) => list.iter().collect(),
            Operator::If(op) => vec![&op.condition, &op.then_branch, &op.else_branch],
            Operator::Match(cases) => cases.iter().flat_map(|c| [&c.case, &c.value]).collect(),
            Operator::Gt(pair) | Operator::Lt(pair) => vec![&pair.0, &pair.1],
            Operator::StringFormat(format) => format
                .values
                .iter()
                .flat_map(|values| values.values())
                .collect(),
            Operator::Ics(ics) => std::iter::once(&ics.start)
                .chain(ics.end.as_ref())
                .chain(ics.duration.as_ref())
                .chain(std::iter::once(&ics.title))
                .chain(ics.description.as_ref())
                .chain(ics.url.as_ref())
                .chain(ics.location.as_ref())
                .chain(ics.coordinates.as_ref())
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl Remapper {
    /// Create a literal node
    pub fn literal(value: impl Into<JValue>) -> Self {
        Remapper::Literal(value.into())
    }

    /// Create an operator node
    pub fn op(operator: Operator) -> Self {
        Remapper::Operator(operator)
    }

    /// `prop` over a single object key
    pub fn prop(key: impl Into<String>) -> Self {
        Remapper::Operator(Operator::Prop(vec![PropKey::Key(key.into())]))
    }

    /// `static` returning `value`
    pub fn static_value(value: impl Into<JValue>) -> Self {
        Remapper::Operator(Operator::Static(value.into()))
    }

    /// Visit this node and every node below it, parents first.
    ///
    /// Pipelines are visited in order, operator operands in evaluation order.
    pub fn for_each_node<'a>(&'a self, f: &mut impl FnMut(&'a Remapper)) {
        f(self);
        match self {
            Remapper::Literal(_) => {}
            Remapper::Pipe(steps) => {
                for step in steps {
                    step.for_each_node(f);
                }
            }
            Remapper::Operator(op) => {
                for child in op.children() {
                    child.for_each_node(f);
                }
            }
        }
    }

    /// Operator nodes anywhere in this tree, parents first.
    pub fn operators(&self) -> Vec<&Operator> {
        let mut found = Vec::new();
        self.for_each_node(&mut |node| {
            if let Remapper::Operator(op) = node {
                found.push(op);
            }
        });
        found
    }
}
