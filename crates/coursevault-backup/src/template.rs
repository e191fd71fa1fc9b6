//! `{name}` placeholder templates shared by the logger chain and log rules

use regex::Regex;
use std::collections::BTreeMap;

/// Replace every `{name}` in `template` for which `lookup` returns a value.
///
/// Unknown placeholders are left in place.
pub fn fill<'a, F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<&'a str>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) if is_placeholder_name(&after[..end]) => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Names of the placeholders in `template`, in order of appearance
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) if is_placeholder_name(&after[..end]) => {
                names.push(after[..end].to_string());
                rest = &after[end + 1..];
            }
            _ => rest = after,
        }
    }
    names
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A read pattern compiled from a template: literal text must match
/// exactly and each `{name}` captures a run of characters.
#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Regex,
    names: Vec<String>,
}

impl Pattern {
    pub fn compile(template: &str) -> Result<Self, regex::Error> {
        let names = placeholders(template);
        let mut expr = String::from("^");
        let mut rest = template;
        for name in &names {
            let marker = format!("{{{}}}", name);
            // placeholders() guarantees the marker is present in order
            let idx = rest.find(&marker).unwrap_or(rest.len());
            expr.push_str(&regex::escape(&rest[..idx]));
            expr.push_str("(.*?)");
            rest = rest.get(idx + marker.len()..).unwrap_or("");
        }
        expr.push_str(&regex::escape(rest));
        expr.push('$');

        Ok(Self {
            regex: Regex::new(&expr)?,
            names,
        })
    }

    /// Captured values keyed by placeholder name, or `None` if `input`
    /// does not match the pattern.
    pub fn captures(&self, input: &str) -> Option<BTreeMap<String, String>> {
        let caps = self.regex.captures(input)?;
        let mut values = BTreeMap::new();
        for (i, name) in self.names.iter().enumerate() {
            let value = caps.get(i + 1).map(|m| m.as_str()).unwrap_or_default();
            values.insert(name.clone(), value.to_string());
        }
        Some(values)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_replaces_known_placeholders() {
        let out = fill("view.php?id={course}&s={section}", |name| match name {
            "course" => Some("7"),
            _ => None,
        });
        assert_eq!(out, "view.php?id=7&s={section}");
    }

    #[test]
    fn test_fill_leaves_braces_that_are_not_placeholders() {
        let out = fill("{ not one } and {}", |_| Some("x"));
        assert_eq!(out, "{ not one } and {}");
    }

    #[test]
    fn test_placeholders_in_order() {
        assert_eq!(
            placeholders("a {one} b {two_2} {"),
            vec!["one".to_string(), "two_2".to_string()]
        );
    }

    #[test]
    fn test_pattern_captures() {
        let pattern = Pattern::compile("view.php?id={activity}").unwrap();
        let caps = pattern.captures("view.php?id=42").unwrap();
        assert_eq!(caps.get("activity"), Some(&"42".to_string()));
        assert!(pattern.captures("index.php?id=42").is_none());
    }

    #[test]
    fn test_pattern_without_placeholders_is_literal() {
        let pattern = Pattern::compile("report.php?mode=all").unwrap();
        assert!(pattern.captures("report.php?mode=all").is_some());
        assert!(pattern.captures("report.php?mode=allx").is_none());
        assert!(pattern.names().is_empty());
    }
}
