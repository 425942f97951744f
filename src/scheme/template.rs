//! Input file templating
//!
//! Schemes materialize engine input files by substituting a declared
//! placeholder set into a template. Placeholders look like `{NAME}` with
//! upper-case names. Any placeholder left unresolved after substitution is
//! a fatal build error, never a silently broken input file.

use std::collections::HashMap;

use crate::error::{AsyncReError, Result};

/// Substitute the declared placeholders; reject leftovers
pub fn render_template(template: &str, values: &HashMap<&str, String>) -> Result<String> {
    let mut rendered = template.to_string();
    for (name, value) in values {
        rendered = rendered.replace(&format!("{{{}}}", name), value);
    }
    if let Some(leftover) = find_placeholder(&rendered) {
        return Err(AsyncReError::Template(leftover));
    }
    Ok(rendered)
}

/// First `{NAME}` placeholder remaining in the text, if any
fn find_placeholder(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && (bytes[end].is_ascii_uppercase() || bytes[end] == b'_') {
                end += 1;
            }
            if end > start && end < bytes.len() && bytes[end] == b'}' {
                return Some(text[start..end].to_string());
            }
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&'static str, &str)]) -> HashMap<&'static str, String> {
        pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    #[test]
    fn test_render_substitutes_all() {
        let out = render_template(
            "restraint {CENTER} with k={FORCE}\n",
            &values(&[("CENTER", "1.5"), ("FORCE", "2.0")]),
        )
        .unwrap();
        assert_eq!(out, "restraint 1.5 with k=2.0\n");
    }

    #[test]
    fn test_unresolved_placeholder_is_fatal() {
        let err = render_template("k={FORCE}", &values(&[("CENTER", "1.5")])).unwrap_err();
        assert!(matches!(err, AsyncReError::Template(_)));
        assert!(err.to_string().contains("FORCE"));
    }

    #[test]
    fn test_repeated_placeholder() {
        let out = render_template("{X} and {X}", &values(&[("X", "a")])).unwrap();
        assert_eq!(out, "a and a");
    }

    #[test]
    fn test_braces_without_placeholder_pass() {
        // Lower-case or empty braces are not placeholders
        let out = render_template("{x} {} {123}", &values(&[])).unwrap();
        assert_eq!(out, "{x} {} {123}");
    }

    #[test]
    fn test_deterministic_rerender() {
        let vals = values(&[("CYCLE", "4"), ("STATE", "2")]);
        let a = render_template("c={CYCLE} s={STATE}", &vals).unwrap();
        let b = render_template("c={CYCLE} s={STATE}", &vals).unwrap();
        assert_eq!(a, b);
    }
}
