//! Query builder helper functions.

/// Returns true when `value` addresses a path inside a JSON column (`col->key`).
pub fn is_json_selector(value: &str) -> bool {
    value.contains("->")
}

/// Converts `StudlyCase` or `camelCase` to `snake_case`.
///
/// Already-lowercase input is returned unchanged.
pub fn snake_case(value: &str) -> String {
    if value.chars().all(|c| !c.is_uppercase()) {
        return value.to_string();
    }

    let compact: String = value.split_whitespace().collect();
    let mut out = String::with_capacity(compact.len() + 4);
    for (idx, ch) in compact.chars().enumerate() {
        if ch.is_uppercase() {
            if idx > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Splits a dynamic finder on `And`/`Or` connectors that are followed by an
/// uppercase letter, keeping the connectors as separate segments.
///
/// `FooAndBarOrBaz` yields `["Foo", "And", "Bar", "Or", "Baz"]`, while
/// `OrderAndBrand` keeps `Order` intact.
pub fn split_dynamic_finder(finder: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut idx = 0;

    while idx < finder.len() {
        let rest = &finder[idx..];
        let connector = ["And", "Or"].into_iter().find(|connector| {
            rest.starts_with(connector)
                && rest[connector.len()..].starts_with(|c: char| c.is_ascii_uppercase())
        });

        match connector {
            Some(connector) => {
                if idx > start {
                    segments.push(&finder[start..idx]);
                }
                segments.push(&finder[idx..idx + connector.len()]);
                idx += connector.len();
                start = idx;
            }
            None => {
                idx += rest.chars().next().map(char::len_utf8).unwrap_or(1);
            }
        }
    }

    if start < finder.len() {
        segments.push(&finder[start..]);
    }
    segments
}
