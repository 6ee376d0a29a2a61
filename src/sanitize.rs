//! Cleaning of API payloads before flat-row serialization.
//!
//! Downstream records are pipe-delimited and carry JSON blobs inside
//! unquoted fields, so nothing that could act as a delimiter or quote may
//! survive: pipes, single and double quotes, and control characters are
//! all replaced. Backslashes that do not open a valid JSON escape are
//! replaced too; a backslash that remains after cleaning marks a document
//! the flattener cannot handle (the detail stage drops those).

use serde_json::Value;

/// Recursively clean every string inside a JSON value.
pub fn clean_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(clean_str(s)),
        Value::Array(items) => Value::Array(items.iter().map(clean_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), clean_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Clean one string: drop invalid escape sequences, control characters,
/// quotes and pipes, then collapse whitespace.
pub fn clean_str(input: &str) -> String {
    let escaped = strip_invalid_escapes(input);

    let stripped: String = escaped
        .chars()
        .filter(|c| !('\u{1}'..='\u{1f}').contains(c))
        .map(|c| match c {
            '\'' | '"' | '|' => ' ',
            other => other,
        })
        .collect();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Replace any backslash that does not open a valid JSON escape sequence
/// (`\" \\ \/ \b \f \n \r \t \uXXXX`) with a space. Valid sequences are
/// kept intact, including their escaped character.
fn strip_invalid_escapes(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '\\' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        match chars.get(i + 1) {
            Some(&next) if matches!(next, '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't') => {
                out.push('\\');
                out.push(next);
                i += 2;
            }
            Some('u')
                if chars[i + 2..].len() >= 4
                    && chars[i + 2..i + 6].iter().all(|c| c.is_ascii_hexdigit()) =>
            {
                out.push('\\');
                out.push('u');
                out.extend(&chars[i + 2..i + 6]);
                i += 6;
            }
            _ => {
                out.push(' ');
                i += 1;
            }
        }
    }

    out
}
