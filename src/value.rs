// JValue: Arc-wrapped value type for O(1) cloning
// Shared by remapper literals, evaluation contexts and results

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// Object entries in insertion order.
pub type ObjectMap = IndexMap<String, JValue>;

/// A JSON-like value with O(1) clone semantics via Arc-wrapping.
///
/// Standard JSON types (Array, Object, String) are wrapped in `Arc` so that
/// compiled remapper trees holding literals can be shared between threads.
/// `Undefined` is the "no value" sentinel produced by failed lookups and is
/// distinct from an explicit `Null`. `Date` is produced by the `date.*`
/// operators and serializes as an RFC 3339 string.
#[derive(Clone, Debug)]
pub enum JValue {
    // Standard JSON types
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Array(Arc<Vec<JValue>>),
    Object(Arc<IndexMap<String, JValue>>),

    // Internal types
    Undefined,
    Date(DateTime<Utc>),
}

// ── Type checks ──────────────────────────────────────────────────────────────

impl JValue {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, JValue::Null)
    }

    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, JValue::Undefined)
    }

    /// Null or undefined.
    #[inline]
    pub fn is_nullish(&self) -> bool {
        matches!(self, JValue::Null | JValue::Undefined)
    }

    #[inline]
    pub fn is_bool(&self) -> bool {
        matches!(self, JValue::Bool(_))
    }

    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, JValue::Number(_))
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, JValue::String(_))
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self, JValue::Array(_))
    }

    #[inline]
    pub fn is_object(&self) -> bool {
        matches!(self, JValue::Object(_))
    }

    #[inline]
    pub fn is_date(&self) -> bool {
        matches!(self, JValue::Date(_))
    }

    /// Truthiness as used by `if` and `match`.
    ///
    /// `false`, `0`, `NaN`, the empty string, `null` and undefined are falsy.
    /// Every other value, including empty arrays and objects, is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            JValue::Null | JValue::Undefined => false,
            JValue::Bool(b) => *b,
            JValue::Number(n) => *n != 0.0 && !n.is_nan(),
            JValue::String(s) => !s.is_empty(),
            JValue::Array(_) | JValue::Object(_) | JValue::Date(_) => true,
        }
    }

    /// Name of the value's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            JValue::Null => "null",
            JValue::Undefined => "undefined",
            JValue::Bool(_) => "boolean",
            JValue::Number(_) => "number",
            JValue::String(_) => "string",
            JValue::Array(_) => "array",
            JValue::Object(_) => "object",
            JValue::Date(_) => "date",
        }
    }
}

// ── Extraction ───────────────────────────────────────────────────────────────

impl JValue {
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            JValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            JValue::Number(n) => {
                let f = *n;
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    Some(f as i64)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            JValue::String(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            JValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_array(&self) -> Option<&Vec<JValue>> {
        match self {
            JValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    #[inline]
    pub fn as_object(&self) -> Option<&IndexMap<String, JValue>> {
        match self {
            JValue::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Get a mutable reference to the inner Vec, cloning if shared (Arc::make_mut).
    #[inline]
    pub fn as_array_mut(&mut self) -> Option<&mut Vec<JValue>> {
        match self {
            JValue::Array(arr) => Some(Arc::make_mut(arr)),
            _ => None,
        }
    }

    /// Get a mutable reference to the inner IndexMap, cloning if shared (Arc::make_mut).
    #[inline]
    pub fn as_object_mut(&mut self) -> Option<&mut IndexMap<String, JValue>> {
        match self {
            JValue::Object(map) => Some(Arc::make_mut(map)),
            _ => None,
        }
    }

    /// Index into an object by key.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&JValue> {
        match self {
            JValue::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Coerce to text the way string operators see their input.
    ///
    /// Strings are returned as-is, null and undefined become the empty
    /// string, dates render as RFC 3339 and containers as compact JSON.
    pub fn to_text(&self) -> String {
        match self {
            JValue::Null | JValue::Undefined => String::new(),
            JValue::String(s) => s.to_string(),
            JValue::Date(d) => format_date(d),
            other => other.to_string(),
        }
    }
}

// ── Constructors ─────────────────────────────────────────────────────────────

impl JValue {
    #[inline]
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        JValue::String(s.into())
    }

    #[inline]
    pub fn array(v: Vec<JValue>) -> Self {
        JValue::Array(Arc::new(v))
    }

    #[inline]
    pub fn object(m: IndexMap<String, JValue>) -> Self {
        JValue::Object(Arc::new(m))
    }

    #[inline]
    pub fn date(d: DateTime<Utc>) -> Self {
        JValue::Date(d)
    }
}

/// The default value is the "no value" sentinel.
impl Default for JValue {
    fn default() -> Self {
        JValue::Undefined
    }
}

// ── From impls ───────────────────────────────────────────────────────────────

impl From<bool> for JValue {
    #[inline]
    fn from(b: bool) -> Self {
        JValue::Bool(b)
    }
}

impl From<i64> for JValue {
    #[inline]
    fn from(n: i64) -> Self {
        JValue::Number(n as f64)
    }
}

impl From<i32> for JValue {
    #[inline]
    fn from(n: i32) -> Self {
        JValue::Number(n as f64)
    }
}

impl From<u64> for JValue {
    #[inline]
    fn from(n: u64) -> Self {
        JValue::Number(n as f64)
    }
}

impl From<usize> for JValue {
    #[inline]
    fn from(n: usize) -> Self {
        JValue::Number(n as f64)
    }
}

impl From<f64> for JValue {
    #[inline]
    fn from(n: f64) -> Self {
        JValue::Number(n)
    }
}

impl From<&str> for JValue {
    #[inline]
    fn from(s: &str) -> Self {
        JValue::String(s.into())
    }
}

impl From<String> for JValue {
    #[inline]
    fn from(s: String) -> Self {
        JValue::String(s.into())
    }
}

impl From<Vec<JValue>> for JValue {
    #[inline]
    fn from(v: Vec<JValue>) -> Self {
        JValue::Array(Arc::new(v))
    }
}

impl From<IndexMap<String, JValue>> for JValue {
    #[inline]
    fn from(m: IndexMap<String, JValue>) -> Self {
        JValue::Object(Arc::new(m))
    }
}

impl From<DateTime<Utc>> for JValue {
    #[inline]
    fn from(d: DateTime<Utc>) -> Self {
        JValue::Date(d)
    }
}

// ── PartialEq ────────────────────────────────────────────────────────────────

/// Deep structural equality.
///
/// Undefined is only equal to undefined, so two failed lookups compare equal
/// to each other but never to an explicit `null`.
impl PartialEq for JValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (JValue::Null, JValue::Null) => true,
            (JValue::Undefined, JValue::Undefined) => true,
            (JValue::Bool(a), JValue::Bool(b)) => a == b,
            (JValue::Number(a), JValue::Number(b)) => {
                // Handle NaN: NaN != NaN
                if a.is_nan() && b.is_nan() {
                    return false;
                }
                a == b
            }
            (JValue::String(a), JValue::String(b)) => a == b,
            (JValue::Array(a), JValue::Array(b)) => Arc::ptr_eq(a, b) || a == b,
            (JValue::Object(a), JValue::Object(b)) => Arc::ptr_eq(a, b) || a == b,
            (JValue::Date(a), JValue::Date(b)) => a == b,
            _ => false,
        }
    }
}

impl JValue {
    /// Natural ordering between two values of the same comparable type.
    ///
    /// Numbers, strings and dates are ordered among themselves; any other
    /// pairing has no ordering and yields `None`.
    pub fn partial_order(&self, other: &JValue) -> Option<Ordering> {
        match (self, other) {
            (JValue::Number(a), JValue::Number(b)) => a.partial_cmp(b),
            (JValue::String(a), JValue::String(b)) => Some(a.cmp(b)),
            (JValue::Date(a), JValue::Date(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

// ── Display ──────────────────────────────────────────────────────────────────

impl fmt::Display for JValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JValue::Null => write!(f, "null"),
            JValue::Undefined => write!(f, "undefined"),
            JValue::Bool(b) => write!(f, "{}", b),
            JValue::Number(n) => format_number(*n, f),
            JValue::String(s) => write!(f, "\"{}\"", escape_json_string(s)),
            JValue::Array(arr) => {
                write!(f, "[")?;
                for (i, v) in arr.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            JValue::Object(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "\"{}\":{}", escape_json_string(k), v)?;
                }
                write!(f, "}}")
            }
            JValue::Date(d) => write!(f, "\"{}\"", format_date(d)),
        }
    }
}

fn escape_json_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            c if c < '\x20' => {
                result.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => result.push(c),
        }
    }
    result
}

fn format_number(n: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if !n.is_finite() {
        // NaN and +/-Infinity serialize as null (matching JSON spec)
        write!(f, "null")
    } else if n.fract() == 0.0 && n.abs() < 1e20 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{}", n)
    }
}

/// RFC 3339 with millisecond precision and a `Z` suffix.
pub(crate) fn format_date(d: &DateTime<Utc>) -> String {
    d.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ── Serialization ────────────────────────────────────────────────────────────

impl Serialize for JValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            JValue::Null => serializer.serialize_none(),
            JValue::Undefined => serializer.serialize_none(),
            JValue::Bool(b) => serializer.serialize_bool(*b),
            JValue::Number(n) => {
                if n.is_nan() || n.is_infinite() {
                    serializer.serialize_none()
                } else if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n <= i64::MAX as f64 {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            JValue::String(s) => serializer.serialize_str(s),
            JValue::Array(arr) => {
                let mut seq = serializer.serialize_seq(Some(arr.len()))?;
                for v in arr.iter() {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            JValue::Object(map) => {
                let mut m = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map.iter() {
                    m.serialize_entry(k, v)?;
                }
                m.end()
            }
            JValue::Date(d) => serializer.serialize_str(&format_date(d)),
        }
    }
}

// ── Deserialization (single-pass JSON→JValue) ────────────────────────────────

impl<'de> serde::Deserialize<'de> for JValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(JValueVisitor)
    }
}

struct JValueVisitor;

impl<'de> Visitor<'de> for JValueVisitor {
    type Value = JValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "any valid JSON value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<JValue, E> {
        Ok(JValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<JValue, E> {
        Ok(JValue::Number(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<JValue, E> {
        Ok(JValue::Number(v as f64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<JValue, E> {
        Ok(JValue::Number(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<JValue, E> {
        Ok(JValue::string(v))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<JValue, E> {
        Ok(JValue::String(v.into()))
    }

    fn visit_none<E: de::Error>(self) -> Result<JValue, E> {
        Ok(JValue::Null)
    }

    fn visit_unit<E: de::Error>(self) -> Result<JValue, E> {
        Ok(JValue::Null)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<JValue, A::Error> {
        let mut vec = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(elem) = seq.next_element()? {
            vec.push(elem);
        }
        Ok(JValue::array(vec))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<JValue, A::Error> {
        let mut m = IndexMap::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((k, v)) = map.next_entry()? {
            m.insert(k, v);
        }
        Ok(JValue::object(m))
    }
}

// ── JSON string I/O ──────────────────────────────────────────────────────────

impl JValue {
    /// Serialize to a JSON string.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a JSON string into a JValue (single-pass, no intermediate serde_json::Value).
    pub fn from_json_str(s: &str) -> Result<JValue, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// ── Conversion from serde_json::Value ────────────────────────────────────────

impl From<serde_json::Value> for JValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => JValue::Null,
            serde_json::Value::Bool(b) => JValue::Bool(b),
            serde_json::Value::Number(n) => JValue::Number(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(s) => JValue::String(s.into()),
            serde_json::Value::Array(arr) => {
                JValue::Array(Arc::new(arr.into_iter().map(JValue::from).collect()))
            }
            serde_json::Value::Object(map) => {
                let m: IndexMap<String, JValue> =
                    map.into_iter().map(|(k, v)| (k, JValue::from(v))).collect();
                JValue::Object(Arc::new(m))
            }
        }
    }
}

impl From<&serde_json::Value> for JValue {
    fn from(v: &serde_json::Value) -> Self {
        JValue::from(v.clone())
    }
}

// ── Conversion to serde_json::Value (for host boundaries) ────────────────────

impl From<&JValue> for serde_json::Value {
    fn from(v: &JValue) -> Self {
        match v {
            JValue::Null | JValue::Undefined => serde_json::Value::Null,
            JValue::Bool(b) => serde_json::Value::Bool(*b),
            JValue::Number(n) => {
                if n.is_nan() || n.is_infinite() {
                    serde_json::Value::Null
                } else if n.fract() == 0.0 && n.abs() < (1i64 << 53) as f64 {
                    serde_json::json!(*n as i64)
                } else {
                    serde_json::json!(*n)
                }
            }
            JValue::String(s) => serde_json::Value::String(s.to_string()),
            JValue::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(serde_json::Value::from).collect())
            }
            JValue::Object(map) => {
                let m: serde_json::Map<String, serde_json::Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect();
                serde_json::Value::Object(m)
            }
            JValue::Date(d) => serde_json::Value::String(format_date(d)),
        }
    }
}

// ── jvalue! macro ────────────────────────────────────────────────────────────

/// Macro for constructing JValue literals, similar to serde_json::json!
///
/// Usage:
///   jvalue!(null)           → JValue::Null
///   jvalue!(true)           → JValue::Bool(true)
///   jvalue!(42)             → JValue::Number(42.0)
///   jvalue!("hello")        → JValue::String(Arc::from("hello"))
///   jvalue!([1, 2, 3])      → JValue::Array(Arc::new(vec![...]))
///   jvalue!({"k": v, ...})  → JValue::Object(Arc::new(IndexMap from pairs))
///   jvalue!(expr)           → JValue::from(expr)
#[macro_export]
macro_rules! jvalue {
    (null) => {
        $crate::value::JValue::Null
    };

    (true) => {
        $crate::value::JValue::Bool(true)
    };

    (false) => {
        $crate::value::JValue::Bool(false)
    };

    ([ $($elem:tt),* $(,)? ]) => {
        $crate::value::JValue::Array(std::sync::Arc::new(vec![ $( $crate::jvalue!($elem) ),* ]))
    };

    ({ $($key:tt : $val:tt),* $(,)? }) => {
        {
            let mut map = $crate::value::ObjectMap::new();
            $(
                map.insert(($key).to_string(), $crate::jvalue!($val));
            )*
            $crate::value::JValue::Object(std::sync::Arc::new(map))
        }
    };

    ($other:expr) => {
        $crate::value::JValue::from($other)
    };
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_clone_is_cheap() {
        let arr = JValue::array(vec![
            JValue::from(1i64),
            JValue::from(2i64),
            JValue::from(3i64),
        ]);
        let arr2 = arr.clone();
        if let (JValue::Array(a), JValue::Array(b)) = (&arr, &arr2) {
            assert!(Arc::ptr_eq(a, b));
        } else {
            panic!("expected arrays");
        }

        let mut map = IndexMap::new();
        map.insert("x".to_string(), JValue::from(1i64));
        let obj = JValue::object(map);
        let obj2 = obj.clone();
        if let (JValue::Object(a), JValue::Object(b)) = (&obj, &obj2) {
            assert!(Arc::ptr_eq(a, b));
        } else {
            panic!("expected objects");
        }
    }

    #[test]
    fn test_values_are_thread_safe() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<JValue>();
    }

    #[test]
    fn test_type_checks() {
        assert!(JValue::Null.is_null());
        assert!(JValue::Undefined.is_undefined());
        assert!(JValue::Undefined.is_nullish());
        assert!(JValue::Bool(true).is_bool());
        assert!(JValue::Number(42.0).is_number());
        assert!(JValue::string("hello").is_string());
        assert!(JValue::array(vec![]).is_array());
        assert!(JValue::object(IndexMap::new()).is_object());
        assert!(JValue::date(Utc::now()).is_date());
    }

    #[test]
    fn test_truthiness() {
        assert!(!JValue::Null.is_truthy());
        assert!(!JValue::Undefined.is_truthy());
        assert!(!JValue::Bool(false).is_truthy());
        assert!(!JValue::Number(0.0).is_truthy());
        assert!(!JValue::Number(f64::NAN).is_truthy());
        assert!(!JValue::string("").is_truthy());
        assert!(JValue::string("0").is_truthy());
        assert!(JValue::array(vec![]).is_truthy());
        assert!(JValue::object(IndexMap::new()).is_truthy());
    }

    #[test]
    fn test_extraction() {
        assert_eq!(JValue::Number(42.0).as_f64(), Some(42.0));
        assert_eq!(JValue::Number(42.0).as_i64(), Some(42));
        assert_eq!(JValue::Number(42.5).as_i64(), None);
        assert_eq!(JValue::string("hello").as_str(), Some("hello"));
        assert_eq!(JValue::Bool(true).as_bool(), Some(true));
    }

    #[test]
    fn test_jvalue_macro() {
        let n = jvalue!(null);
        assert!(n.is_null());

        let arr = jvalue!([1i64, 2i64, 3i64]);
        assert_eq!(arr.as_array().map(|a| a.len()), Some(3));

        let obj = jvalue!({"name": "Alice", "age": 30i64});
        assert_eq!(obj.get("name").and_then(|v| v.as_str()), Some("Alice"));
    }

    #[test]
    fn test_equality() {
        assert_eq!(JValue::Null, JValue::Null);
        assert_eq!(JValue::Undefined, JValue::Undefined);
        assert_ne!(JValue::Null, JValue::Undefined);
        assert_ne!(JValue::Number(f64::NAN), JValue::Number(f64::NAN));
        assert_eq!(jvalue!({"a": [1i64, 2i64]}), jvalue!({"a": [1i64, 2i64]}));
        assert_ne!(jvalue!({"a": 1i64}), jvalue!({"a": 2i64}));
    }

    #[test]
    fn test_partial_order() {
        assert_eq!(
            JValue::from(1i64).partial_order(&JValue::from(2i64)),
            Some(Ordering::Less)
        );
        assert_eq!(
            JValue::from("b").partial_order(&JValue::from("a")),
            Some(Ordering::Greater)
        );
        assert_eq!(JValue::from(1i64).partial_order(&JValue::from("1")), None);
        assert_eq!(JValue::Undefined.partial_order(&JValue::Undefined), None);
    }

    #[test]
    fn test_serialize_sentinels_and_dates() {
        let date = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let v = jvalue!({"missing": (JValue::Undefined), "at": date});
        assert_eq!(
            v.to_json_string().unwrap(),
            r#"{"missing":null,"at":"2024-03-01T12:00:00.000Z"}"#
        );
    }

    #[test]
    fn test_to_text() {
        assert_eq!(JValue::string("abc").to_text(), "abc");
        assert_eq!(JValue::from(3i64).to_text(), "3");
        assert_eq!(JValue::from(2.5).to_text(), "2.5");
        assert_eq!(JValue::Undefined.to_text(), "");
        assert_eq!(jvalue!([1i64]).to_text(), "[1]");
    }

    #[test]
    fn test_serde_roundtrip() {
        let v = jvalue!({"name": "Alice", "scores": [1i64, 2i64, 3i64], "active": true});
        let json_str = v.to_json_string().unwrap();
        let parsed = JValue::from_json_str(&json_str).unwrap();
        assert_eq!(v, parsed);
    }

    #[test]
    fn test_from_serde_json_preserves_key_order() {
        let sv = serde_json::json!({"z": 1, "a": 2, "m": 3});
        let jv = JValue::from(sv);
        let keys: Vec<&str> = jv.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_make_mut() {
        let mut arr = JValue::array(vec![JValue::from(1i64), JValue::from(2i64)]);
        let arr2 = arr.clone();

        arr.as_array_mut().unwrap().push(JValue::from(3i64));

        assert_eq!(arr.as_array().unwrap().len(), 3);
        assert_eq!(arr2.as_array().unwrap().len(), 2);
    }
}
