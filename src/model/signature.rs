//! Signature text handling.
//!
//! Signatures are keyed as `qualified.name(T1,T2)`. Parameter types are
//! normalized so that spacing and generic arguments never split two spellings
//! of the same declaration into different keys.

/// Placeholder used for parameters without a declared type.
pub const UNKNOWN_TYPE: &str = "_";

/// Normalize a declared type for use in signature keys.
///
/// Strips whitespace, generic arguments (`List<String>` -> `List`),
/// parameterized subscripts (`list[int]` -> `list`) and `final`, and spells
/// varargs as an array.
pub fn normalize_type(raw: &str) -> String {
    let mut text = raw.trim();
    for prefix in ["final ", "const "] {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim_start();
        }
    }

    let mut out = String::with_capacity(text.len());
    let mut angle_depth = 0usize;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '<' => angle_depth += 1,
            '>' => angle_depth = angle_depth.saturating_sub(1),
            '[' if angle_depth == 0 => {
                // `[]` is an array suffix; `[...]` with content is a subscript.
                if chars.peek() == Some(&']') {
                    chars.next();
                    out.push_str("[]");
                } else {
                    let mut depth = 1usize;
                    for inner in chars.by_ref() {
                        match inner {
                            '[' => depth += 1,
                            ']' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
            c if c.is_whitespace() => {}
            c if angle_depth == 0 => out.push(c),
            _ => {}
        }
    }

    if let Some(base) = out.strip_suffix("...") {
        format!("{}[]", base)
    } else if out.is_empty() {
        UNKNOWN_TYPE.to_string()
    } else {
        out
    }
}

/// The unqualified spelling of a normalized type (`java.lang.String` -> `String`).
pub fn simple_type(raw: &str) -> String {
    let normalized = normalize_type(raw);
    match normalized.rsplit_once('.') {
        Some((_, tail)) => tail.to_string(),
        None => normalized,
    }
}

/// The last dotted segment of a qualified name.
pub fn simple_name(qualified: &str) -> &str {
    qualified.rsplit('.').next().unwrap_or(qualified)
}

/// Spell a bytecode constructor name (`a.b.T.<init>`) as the type's own name (`a.b.T.T`).
pub fn constructor_alias(qualified_name: &str) -> Option<String> {
    let owner = qualified_name.strip_suffix(".<init>")?;
    Some(format!("{}.{}", owner, simple_name(owner)))
}

/// Split `a.b.name(T1, T2)` into its name part and parameter types.
///
/// Returns `None` when the text has no parameter list.
pub fn parse_signature(text: &str) -> Option<(String, Vec<String>)> {
    let open = text.find('(')?;
    let close = text.rfind(')')?;
    if close < open {
        return None;
    }
    let name = text[..open].trim().to_string();
    if name.is_empty() {
        return None;
    }
    let params = split_top_level(&text[open + 1..close])
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    Some((name, params))
}

/// Build the canonical key text for a signature.
pub fn canonical(qualified_name: &str, parameter_types: &[String]) -> String {
    let params: Vec<String> = parameter_types.iter().map(|t| normalize_type(t)).collect();
    format!("{}({})", qualified_name, params.join(","))
}

/// Split on commas that are not nested inside `<>`, `()` or `[]`.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '<' | '(' | '[' => depth += 1,
            '>' | ')' | ']' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_type() {
        assert_eq!(normalize_type(" java.util.List<String> "), "java.util.List");
        assert_eq!(normalize_type("Map<String, List<Integer>>"), "Map");
        assert_eq!(normalize_type("String..."), "String[]");
        assert_eq!(normalize_type("int []"), "int[]");
        assert_eq!(normalize_type("list[int]"), "list");
        assert_eq!(normalize_type("final Order"), "Order");
        assert_eq!(normalize_type(""), UNKNOWN_TYPE);
    }

    #[test]
    fn test_simple_type() {
        assert_eq!(simple_type("java.lang.String"), "String");
        assert_eq!(simple_type("com.acme.Order[]"), "Order[]");
        assert_eq!(simple_type("int"), "int");
    }

    #[test]
    fn test_parse_signature() {
        let (name, params) = parse_signature("com.acme.Repo.save(Order, java.util.Map<K, V>)").unwrap();
        assert_eq!(name, "com.acme.Repo.save");
        assert_eq!(params, vec!["Order", "java.util.Map<K, V>"]);

        let (name, params) = parse_signature("process()").unwrap();
        assert_eq!(name, "process");
        assert!(params.is_empty());

        assert!(parse_signature("noParens").is_none());
    }

    #[test]
    fn test_constructor_alias() {
        assert_eq!(constructor_alias("com.acme.Order.<init>").as_deref(), Some("com.acme.Order.Order"));
        assert_eq!(constructor_alias("Order.<init>").as_deref(), Some("Order.Order"));
        assert!(constructor_alias("com.acme.Order.save").is_none());
    }

    #[test]
    fn test_canonical_key() {
        let key = canonical("a.B.m", &["List<String>".to_string(), "int ...".to_string()]);
        assert_eq!(key, "a.B.m(List,int[])");
    }
}
