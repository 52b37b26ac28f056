// Operator helper implementations
// Pure functions over JValue, grouped by operator family

use thiserror::Error;

use crate::value::JValue;

/// Function errors
#[derive(Error, Debug, PartialEq)]
pub enum FunctionError {
    #[error("Type error: {0}")]
    TypeError(String),
}

/// Property lookup for `prop`
pub mod path {
    use crate::ast::PropKey;
    use crate::value::JValue;

    fn step(value: &JValue, key: &PropKey) -> Option<JValue> {
        match (value, key) {
            (JValue::Object(map), PropKey::Key(k)) => map.get(k.as_str()).cloned(),
            (JValue::Object(map), PropKey::Index(i)) => map.get(&i.to_string()).cloned(),
            (JValue::Array(arr), PropKey::Index(i)) => {
                usize::try_from(*i).ok().and_then(|i| arr.get(i)).cloned()
            }
            (JValue::Array(arr), PropKey::Key(k)) => {
                k.parse::<usize>().ok().and_then(|i| arr.get(i)).cloned()
            }
            _ => None,
        }
    }

    /// Walk `path` into `value`. Any miss yields undefined for the whole path.
    pub fn lookup(value: &JValue, path: &[PropKey]) -> JValue {
        let mut current = value.clone();
        for key in path {
            match step(&current, key) {
                Some(next) => current = next,
                None => return JValue::Undefined,
            }
        }
        current
    }

    /// Walk a dot-separated key path through nested objects.
    pub fn lookup_keys(value: &JValue, keys: &[String]) -> JValue {
        let mut current = value;
        for key in keys {
            match current.get(key) {
                Some(next) => current = next,
                None => return JValue::Undefined,
            }
        }
        current.clone()
    }
}

/// Object operators
pub mod object {
    use indexmap::IndexMap;

    use crate::value::JValue;

    /// Remove every key path in `paths` from `value`.
    ///
    /// A single-segment path removes a top-level key; longer paths remove the
    /// last segment from the nested object named by the preceding ones.
    /// Paths that do not resolve to an object are skipped. Non-objects pass
    /// through untouched.
    pub fn omit(value: &JValue, paths: &[Vec<String>]) -> JValue {
        if !value.is_object() {
            return value.clone();
        }
        let mut result = value.clone();
        for path in paths {
            remove_path(&mut result, path);
        }
        result
    }

    fn remove_path(value: &mut JValue, path: &[String]) {
        let Some((first, rest)) = path.split_first() else {
            return;
        };
        let Some(map) = value.as_object_mut() else {
            return;
        };
        if rest.is_empty() {
            map.shift_remove(first);
        } else if let Some(child) = map.get_mut(first) {
            remove_path(child, rest);
        }
    }

    /// Shallow-merge `entries` over `base`. A non-object base starts empty.
    pub fn assign(base: &JValue, entries: IndexMap<String, JValue>) -> JValue {
        let mut map = base.as_object().cloned().unwrap_or_default();
        map.extend(entries);
        JValue::object(map)
    }
}

/// Array operators
pub mod array {
    use crate::value::JValue;

    /// Drop the positions named by `indices`. Non-integer and out-of-range
    /// indices are ignored.
    pub fn omit_indices(items: &[JValue], indices: &[JValue]) -> JValue {
        let drop: Vec<usize> = indices
            .iter()
            .filter_map(JValue::as_i64)
            .filter_map(|i| usize::try_from(i).ok())
            .collect();
        JValue::array(
            items
                .iter()
                .enumerate()
                .filter(|(i, _)| !drop.contains(i))
                .map(|(_, v)| v.clone())
                .collect(),
        )
    }

    /// Keep the first element for every distinct key, preserving order.
    ///
    /// `keys` runs parallel to `items`.
    pub fn unique_by(items: &[JValue], keys: &[JValue]) -> JValue {
        let mut seen: Vec<&JValue> = Vec::new();
        let mut result = Vec::new();
        for (item, key) in items.iter().zip(keys) {
            if !seen.contains(&key) {
                seen.push(key);
                result.push(item.clone());
            }
        }
        JValue::array(result)
    }
}

/// Comparison operators
pub mod compare {
    use std::cmp::Ordering;

    use super::FunctionError;
    use crate::value::JValue;

    /// True iff every value is deeply equal to the first. Fewer than two
    /// values are trivially equal.
    pub fn equals(values: &[JValue]) -> bool {
        match values.split_first() {
            Some((first, rest)) => rest.iter().all(|v| v == first),
            None => true,
        }
    }

    /// Order two values of the same comparable type.
    pub fn order(left: &JValue, right: &JValue) -> Result<Ordering, FunctionError> {
        left.partial_order(right).ok_or_else(|| {
            FunctionError::TypeError(format!(
                "cannot compare {} with {}",
                left.type_name(),
                right.type_name()
            ))
        })
    }
}

/// String operators
pub mod string {
    use crate::ast::{Replacement, StringCase};
    use crate::value::JValue;

    pub fn case(value: &JValue, case: StringCase) -> JValue {
        if value.is_undefined() {
            return JValue::Undefined;
        }
        let text = value.to_text();
        match case {
            StringCase::Lower => JValue::from(text.to_lowercase()),
            StringCase::Upper => JValue::from(text.to_uppercase()),
        }
    }

    /// Apply every replacement in order to the input's text form.
    pub fn replace(value: &JValue, replacements: &[Replacement]) -> JValue {
        let mut text = value.to_text();
        for rule in replacements {
            text = rule
                .pattern
                .replace_all(&text, rule.replacement.as_str())
                .into_owned();
        }
        JValue::from(text)
    }
}

/// Randomness drawn from an injected entropy source
pub mod random {
    use crate::ast::{RandomRange, RandomString};
    use crate::context::Entropy;
    use crate::value::JValue;

    fn pick(entropy: &dyn Entropy, len: usize) -> usize {
        // next_f64 is in [0, 1), clamp anyway against a misbehaving source
        ((entropy.next_f64() * len as f64).floor() as usize).min(len.saturating_sub(1))
    }

    /// One element of an array input; anything else passes through.
    pub fn choice(entropy: &dyn Entropy, value: &JValue) -> JValue {
        match value.as_array() {
            Some(items) if !items.is_empty() => items[pick(entropy, items.len())].clone(),
            Some(_) => JValue::Undefined,
            None => value.clone(),
        }
    }

    /// An integer in `[min, max)`.
    pub fn integer(entropy: &dyn Entropy, range: RandomRange) -> JValue {
        let r = entropy.next_f64();
        JValue::from((r * (range.max - range.min) + range.min).floor())
    }

    /// A float in `[min, max)`.
    pub fn float(entropy: &dyn Entropy, range: RandomRange) -> JValue {
        let r = entropy.next_f64();
        JValue::from(r * (range.max - range.min) + range.min)
    }

    pub fn string(entropy: &dyn Entropy, spec: &RandomString) -> JValue {
        if spec.choice.is_empty() {
            return JValue::from("");
        }
        let text: String = (0..spec.length)
            .map(|_| spec.choice[pick(entropy, spec.choice.len())])
            .collect();
        JValue::from(text)
    }
}

/// Recursively remove null and undefined values and empty arrays.
///
/// `depth` limits how many container levels are cleaned; `None` is unbounded.
/// Arrays emptied by stripping are removed from their parent as well.
pub fn null_strip(value: &JValue, depth: Option<usize>) -> JValue {
    if depth == Some(0) {
        return value.clone();
    }
    let next = depth.map(|d| d - 1);
    let keep = |v: &JValue| !v.is_nullish() && !matches!(v, JValue::Array(a) if a.is_empty());

    match value {
        JValue::Array(items) => JValue::array(
            items
                .iter()
                .map(|v| null_strip(v, next))
                .filter(keep)
                .collect(),
        ),
        JValue::Object(map) => JValue::object(
            map.iter()
                .map(|(k, v)| (k.clone(), null_strip(v, next)))
                .filter(|(_, v)| keep(v))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{PropKey, RandomRange, RandomString, Replacement, StringCase};
    use crate::context::SeededEntropy;
    use crate::jvalue;
    use regex::Regex;

    #[test]
    fn test_path_lookup() {
        let data = jvalue!({"a": {"b": [10, 20]}, "1": "one"});
        let path = [
            PropKey::Key("a".to_string()),
            PropKey::Key("b".to_string()),
            PropKey::Index(1),
        ];
        assert_eq!(path::lookup(&data, &path), JValue::from(20i64));
        assert_eq!(path::lookup(&data, &[PropKey::Index(1)]), JValue::from("one"));
        assert_eq!(
            path::lookup(&data, &[PropKey::Key("a".into()), PropKey::Key("x".into())]),
            JValue::Undefined
        );
        assert_eq!(
            path::lookup(&data, &[PropKey::Key("a".into()), PropKey::Key("b".into()), PropKey::Key("0".into())]),
            JValue::from(10i64)
        );
    }

    #[test]
    fn test_object_omit_paths() {
        let data = jvalue!({"a": 0, "b": {"c": 1, "d": 2}, "e": 3});
        let result = object::omit(
            &data,
            &[vec!["a".to_string()], vec!["b".to_string(), "c".to_string()], vec!["x".to_string(), "y".to_string()]],
        );
        assert_eq!(result, jvalue!({"b": {"d": 2}, "e": 3}));
        // Input is left untouched
        assert_eq!(data.get("a"), Some(&JValue::from(0i64)));
    }

    #[test]
    fn test_object_assign_non_object_base() {
        let mut entries = indexmap::IndexMap::new();
        entries.insert("a".to_string(), JValue::from(1i64));
        assert_eq!(object::assign(&JValue::from("x"), entries), jvalue!({"a": 1}));
    }

    #[test]
    fn test_array_omit_and_unique() {
        let items = vec![JValue::from("a"), JValue::from("b"), JValue::from("c")];
        let indices = vec![JValue::from(1i64), JValue::from(9i64), JValue::from("0"), JValue::from(-1i64)];
        assert_eq!(array::omit_indices(&items, &indices), jvalue!(["a", "c"]));

        let keys = vec![JValue::from(1i64), JValue::from(2i64), JValue::from(1i64)];
        assert_eq!(array::unique_by(&items, &keys), jvalue!(["a", "b"]));
    }

    #[test]
    fn test_compare() {
        assert!(compare::equals(&[JValue::from(1i64), JValue::from(1i64)]));
        assert!(!compare::equals(&[JValue::from(1i64), JValue::Undefined]));
        assert!(compare::equals(&[]));
        assert_eq!(
            compare::order(&JValue::from("a"), &JValue::from("b")),
            Ok(std::cmp::Ordering::Less)
        );
        assert!(matches!(
            compare::order(&JValue::from(1i64), &JValue::from("1")),
            Err(FunctionError::TypeError(_))
        ));
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(string::case(&JValue::from("Hello"), StringCase::Upper), JValue::from("HELLO"));
        assert_eq!(string::case(&JValue::Undefined, StringCase::Lower), JValue::Undefined);

        let rules = vec![
            Replacement { pattern: Regex::new("o").unwrap(), replacement: "0".to_string() },
            Replacement { pattern: Regex::new("^h").unwrap(), replacement: "H".to_string() },
        ];
        assert_eq!(string::replace(&JValue::from("hello world"), &rules), JValue::from("Hell0 w0rld"));
    }

    #[test]
    fn test_random_is_bounded() {
        let entropy = SeededEntropy::new(42);
        for _ in 0..100 {
            let n = random::integer(&entropy, RandomRange { min: 3.0, max: 6.0 });
            let n = n.as_f64().unwrap();
            assert!((3.0..6.0).contains(&n));
            assert_eq!(n.fract(), 0.0);
        }
        let s = random::string(&entropy, &RandomString { choice: vec!['x', 'y'], length: 8 });
        let s = s.as_str().unwrap();
        assert_eq!(s.chars().count(), 8);
        assert!(s.chars().all(|c| c == 'x' || c == 'y'));
    }

    #[test]
    fn test_random_choice() {
        let entropy = SeededEntropy::new(1);
        let items = jvalue!([1, 2, 3]);
        let picked = random::choice(&entropy, &items);
        assert!(items.as_array().unwrap().contains(&picked));
        assert_eq!(random::choice(&entropy, &JValue::from("x")), JValue::from("x"));
    }

    #[test]
    fn test_null_strip() {
        let data = jvalue!({"a": null, "b": [null, 1, []], "c": 2});
        assert_eq!(null_strip(&data, None), jvalue!({"b": [1], "c": 2}));

        let nested = jvalue!({"a": {"b": null}, "c": null});
        assert_eq!(null_strip(&nested, Some(1)), jvalue!({"a": {"b": null}}));
        assert_eq!(null_strip(&nested, Some(0)), nested);
    }
}
