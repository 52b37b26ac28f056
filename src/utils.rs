// Utility functions and helpers shared by the parser, walker and extractors

use std::fmt::Display;

/// Render path segments as an RFC 6901 JSON pointer.
///
/// The empty path renders as `""`, the pointer to the whole document.
pub fn json_pointer<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: Display,
{
    let mut pointer = String::new();
    for segment in segments {
        pointer.push('/');
        for c in segment.to_string().chars() {
            match c {
                '~' => pointer.push_str("~0"),
                '/' => pointer.push_str("~1"),
                c => pointer.push(c),
            }
        }
    }
    pointer
}

/// Normalise a display name into a message-id segment.
///
/// Lowercases, turns every run of non-alphanumeric characters into a single
/// dash and trims dashes from both ends: `"My Page!"` becomes `"my-page"`.
pub fn normalize(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !result.is_empty() {
                result.push('-');
            }
            pending_dash = false;
            result.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_pointer() {
        assert_eq!(json_pointer(["pages", "0", "blocks"]), "/pages/0/blocks");
        assert_eq!(json_pointer(["a/b", "c~d"]), "/a~1b/c~0d");
        assert_eq!(json_pointer(Vec::<String>::new()), "");
        // An empty key is a real segment, distinct from the root
        assert_eq!(json_pointer([""]), "/");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("My Page!"), "my-page");
        assert_eq!(normalize("  Über  uns "), "über-uns");
        assert_eq!(normalize("step_2.final"), "step-2-final");
        assert_eq!(normalize("---"), "");
    }
}
