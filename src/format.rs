// Message template formatting for string.format
//
// Supported placeholders:
//   {name}                                   plain substitution
//   {name, select, a {..} b {..} other {..}} choose a branch by value
//   {name, plural, =0 {..} one {..} other {..}}
//                                            choose by count; `#` is the count

use indexmap::IndexMap;

use crate::value::JValue;

/// Substitute `values` into `template`.
///
/// Placeholders naming a key absent from `values`, or with malformed
/// arguments, are copied to the output verbatim. Unbalanced braces are
/// treated as plain text.
pub fn format_message(template: &str, values: &IndexMap<String, JValue>) -> String {
    let mut out = String::with_capacity(template.len());
    render(template, values, None, &mut out);
    out
}

fn render(template: &str, values: &IndexMap<String, JValue>, count: Option<&str>, out: &mut String) {
    let mut rest = template;
    while let Some(pos) = rest.find(['{', '#']) {
        let (text, tail) = rest.split_at(pos);
        out.push_str(text);

        if let Some(after) = tail.strip_prefix('#') {
            out.push_str(count.unwrap_or("#"));
            rest = after;
            continue;
        }

        match matching_brace(tail) {
            Some(end) => {
                let inner = &tail[1..end];
                let placeholder = &tail[..=end];
                if !render_placeholder(inner, values, out) {
                    out.push_str(placeholder);
                }
                rest = &tail[end + 1..];
            }
            None => {
                out.push_str(tail);
                rest = "";
            }
        }
    }
    out.push_str(rest);
}

/// Byte offset of the brace closing the one at the start of `s`.
fn matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn render_placeholder(inner: &str, values: &IndexMap<String, JValue>, out: &mut String) -> bool {
    let mut parts = inner.splitn(3, ',');
    let name = parts.next().unwrap_or_default().trim();
    let Some(value) = values.get(name) else {
        return false;
    };

    match (parts.next().map(str::trim), parts.next()) {
        (None, _) => {
            out.push_str(&value.to_text());
            true
        }
        (Some("select"), Some(branches)) => {
            let Some(branches) = parse_branches(branches) else {
                return false;
            };
            let key = value.to_text();
            let chosen = branches
                .iter()
                .find(|(selector, _)| *selector == key)
                .or_else(|| branches.iter().find(|(selector, _)| *selector == "other"));
            if let Some((_, message)) = chosen {
                render(message, values, None, out);
            }
            true
        }
        (Some("plural"), Some(branches)) => {
            let Some(branches) = parse_branches(branches) else {
                return false;
            };
            let Some(n) = value.as_f64() else {
                return false;
            };
            let exact = format!("={}", JValue::from(n));
            let category = if n == 1.0 { "one" } else { "other" };
            let chosen = branches
                .iter()
                .find(|(selector, _)| *selector == exact)
                .or_else(|| branches.iter().find(|(selector, _)| *selector == category))
                .or_else(|| branches.iter().find(|(selector, _)| *selector == "other"));
            if let Some((_, message)) = chosen {
                render(message, values, Some(&value.to_text()), out);
            }
            true
        }
        _ => false,
    }
}

/// Split `one {..} other {..}` into selector / message pairs.
fn parse_branches(s: &str) -> Option<Vec<(&str, &str)>> {
    let mut branches = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        let open = rest.find('{')?;
        let selector = rest[..open].trim();
        if selector.is_empty() {
            return None;
        }
        let body = &rest[open..];
        let end = matching_brace(body)?;
        branches.push((selector, &body[1..end]));
        rest = body[end + 1..].trim_start();
    }
    Some(branches)
}
