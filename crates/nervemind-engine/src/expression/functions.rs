//! The expression function library.
//!
//! Every function takes already-evaluated string arguments and returns a
//! string. Unparseable numeric input to the ordering comparisons yields
//! `"false"`; unparseable dates pass through verbatim.

use chrono::{DateTime, Local, Utc};

/// Names the evaluator treats as function calls. Anything else followed by
/// parentheses is plain text.
pub const FUNCTION_NAMES: &[&str] = &[
    "if", "and", "or", "not", "eq", "ne", "gt", "lt", "gte", "lte", "contains", "startsWith",
    "endsWith", "length", "trim", "upper", "lower", "concat", "substring", "replace", "split",
    "join", "now", "format", "toNumber", "toString", "toBoolean",
];

pub fn is_function(name: &str) -> bool {
    FUNCTION_NAMES.contains(&name)
}

/// Truthy set: `"true"`, `"1"`, `"yes"` (case-insensitive).
pub fn is_truthy(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn bool_str(b: bool) -> String {
    if b { "true" } else { "false" }.to_string()
}

fn parse_pair(a: &str, b: &str) -> Option<(f64, f64)> {
    Some((a.trim().parse::<f64>().ok()?, b.trim().parse::<f64>().ok()?))
}

fn arg<'a>(args: &'a [String], index: usize) -> &'a str {
    args.get(index).map(String::as_str).unwrap_or("")
}

/// Render a float the way the library displays numbers: integral values
/// without a trailing fraction.
fn number_str(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Apply a library function to its arguments. `name` must satisfy
/// [`is_function`]; the result is always a renderable string.
pub fn call(name: &str, args: &[String]) -> String {
    match name {
        // Logical
        "if" => {
            if is_truthy(arg(args, 0)) {
                arg(args, 1).to_string()
            } else {
                arg(args, 2).to_string()
            }
        }
        "and" => bool_str(!args.is_empty() && args.iter().all(|a| is_truthy(a))),
        "or" => bool_str(args.iter().any(|a| is_truthy(a))),
        "not" => bool_str(!is_truthy(arg(args, 0))),

        // Comparison
        "eq" => bool_str(values_equal(arg(args, 0), arg(args, 1))),
        "ne" => bool_str(!values_equal(arg(args, 0), arg(args, 1))),
        "gt" => bool_str(parse_pair(arg(args, 0), arg(args, 1)).is_some_and(|(a, b)| a > b)),
        "lt" => bool_str(parse_pair(arg(args, 0), arg(args, 1)).is_some_and(|(a, b)| a < b)),
        "gte" => bool_str(parse_pair(arg(args, 0), arg(args, 1)).is_some_and(|(a, b)| a >= b)),
        "lte" => bool_str(parse_pair(arg(args, 0), arg(args, 1)).is_some_and(|(a, b)| a <= b)),

        // String
        "contains" => bool_str(arg(args, 0).contains(arg(args, 1))),
        "startsWith" => bool_str(arg(args, 0).starts_with(arg(args, 1))),
        "endsWith" => bool_str(arg(args, 0).ends_with(arg(args, 1))),
        "length" => arg(args, 0).chars().count().to_string(),
        "trim" => arg(args, 0).trim().to_string(),
        "upper" => arg(args, 0).to_uppercase(),
        "lower" => arg(args, 0).to_lowercase(),
        "concat" => args.concat(),
        "substring" => substring(arg(args, 0), arg(args, 1), args.get(2).map(String::as_str)),
        "replace" => arg(args, 0).replace(arg(args, 1), arg(args, 2)),
        "split" => {
            let parts: Vec<&str> = if arg(args, 1).is_empty() {
                vec![arg(args, 0)]
            } else {
                arg(args, 0).split(arg(args, 1)).collect()
            };
            format!("[{}]", parts.join(", "))
        }
        "join" => join(arg(args, 0), arg(args, 1)),

        // Date
        "now" => Utc::now().to_rfc3339(),
        "format" => format_instant(arg(args, 0), arg(args, 1)),

        // Conversion
        "toNumber" => arg(args, 0)
            .trim()
            .parse::<f64>()
            .map(number_str)
            .unwrap_or_else(|_| "0".to_string()),
        "toString" => arg(args, 0).to_string(),
        "toBoolean" => bool_str(is_truthy(arg(args, 0))),

        _ => String::new(),
    }
}

fn values_equal(a: &str, b: &str) -> bool {
    if let Some((x, y)) = parse_pair(a, b) {
        return x == y;
    }
    a == b
}

fn substring(s: &str, start: &str, end: Option<&str>) -> String {
    let chars: Vec<char> = s.chars().collect();
    let start = start.trim().parse::<usize>().unwrap_or(0).min(chars.len());
    let end = end
        .and_then(|e| e.trim().parse::<usize>().ok())
        .unwrap_or(chars.len())
        .clamp(start, chars.len());
    chars[start..end].iter().collect()
}

fn join(list: &str, separator: &str) -> String {
    let trimmed = list.trim();
    if let Some(inner) = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    {
        inner
            .split(", ")
            .collect::<Vec<_>>()
            .join(separator)
    } else {
        trimmed.to_string()
    }
}

fn format_instant(instant: &str, pattern: &str) -> String {
    match DateTime::parse_from_rfc3339(instant.trim()) {
        Ok(parsed) => parsed
            .with_timezone(&Local)
            .format(pattern)
            .to_string(),
        // Unparseable dates pass through verbatim.
        Err(_) => instant.to_string(),
    }
}
