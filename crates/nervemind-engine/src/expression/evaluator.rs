//! The expression evaluator: variable substitution followed by
//! innermost-first function evaluation to a fixed point.

use std::sync::OnceLock;

use nervemind_workflow::{lookup_path, value_to_display, DataObject};
use regex::Regex;
use serde_json::Value;

use super::functions;

/// Upper bound on evaluation passes. A fixed point is normally reached in
/// a handful of passes; the cap guarantees termination on pathological
/// self-producing input.
const MAX_PASSES: usize = 100;

fn variable_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.]*)\}").expect("static pattern"))
}

fn call_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let names = functions::FUNCTION_NAMES.join("|");
        Regex::new(&format!(r"(?:^|[^A-Za-z0-9_.])({names})\s*\(")).expect("static pattern")
    })
}

/// Pure, single-invocation expression evaluator over a variable context.
#[derive(Debug, Clone)]
pub struct Evaluator {
    variables: Value,
}

impl Evaluator {
    /// Create an evaluator over the given variable map.
    pub fn new(variables: DataObject) -> Self {
        Self {
            variables: Value::Object(variables),
        }
    }

    /// Quick check whether a string holds anything worth evaluating.
    pub fn contains_expression(input: &str) -> bool {
        input.contains("${") || call_pattern().is_match(input)
    }

    /// Evaluate to a rendered string. Never fails: unknown variables keep
    /// their placeholder, unknown functions render literally.
    pub fn evaluate(&self, input: &str) -> String {
        let mut current = self.substitute_variables(input);
        for _ in 0..MAX_PASSES {
            match eval_innermost_call(&current) {
                Some(next) => current = next,
                None => break,
            }
        }
        current
    }

    /// Evaluate and parse the final string as long, then double, then
    /// boolean; otherwise return the string.
    pub fn evaluate_to_value(&self, input: &str) -> Value {
        let rendered = self.evaluate(input);
        if let Ok(i) = rendered.trim().parse::<i64>() {
            return Value::from(i);
        }
        if let Ok(f) = rendered.trim().parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Value::Number(n);
            }
        }
        match rendered.trim() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(rendered),
        }
    }

    fn substitute_variables(&self, input: &str) -> String {
        variable_pattern()
            .replace_all(input, |caps: &regex::Captures<'_>| {
                match lookup_path(&self.variables, &caps[1]) {
                    Some(value) => value_to_display(value),
                    // Unknown keys keep the literal placeholder.
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

/// One frame per open paren; `Some` when the paren opened a known call.
struct CallFrame {
    name: Option<(usize, String)>,
    open: usize,
}

/// Find and evaluate the first innermost known function call. A call is
/// innermost when its closing paren is the first one reached whose opening
/// paren carried a library function name. Returns `None` at fixed point.
fn eval_innermost_call(input: &str) -> Option<String> {
    let mut stack: Vec<CallFrame> = Vec::new();
    let mut in_string: Option<char> = None;

    let mut iter = input.char_indices().peekable();
    while let Some((idx, ch)) = iter.next() {
        if let Some(quote) = in_string {
            if ch == '\\' {
                if let Some(&(_, next)) = iter.peek() {
                    if next == quote {
                        iter.next();
                    }
                }
            } else if ch == quote {
                in_string = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => in_string = Some(ch),
            '(' => {
                let name = identifier_before(input, idx)
                    .filter(|(_, name)| functions::is_function(name));
                stack.push(CallFrame { name, open: idx });
            }
            ')' => {
                if let Some(frame) = stack.pop() {
                    if let Some((name_start, name)) = frame.name {
                        let inner = &input[frame.open + 1..idx];
                        let args = split_args(inner);
                        let result = functions::call(&name, &args);
                        let mut replaced =
                            String::with_capacity(input.len() - (idx - name_start) + result.len());
                        replaced.push_str(&input[..name_start]);
                        replaced.push_str(&result);
                        replaced.push_str(&input[idx + ch.len_utf8()..]);
                        return Some(replaced);
                    }
                }
            }
            _ => {}
        }
    }

    None
}

/// Walk back over an identifier ending at `open`. The character before the
/// identifier must not extend it (no `foo.bar(`, no `xupper(`).
fn identifier_before(input: &str, open: usize) -> Option<(usize, String)> {
    let head = &input[..open];
    let start = head
        .rfind(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .map(|i| i + 1)
        .unwrap_or(0);
    let name = &head[start..];
    if name.is_empty() || !name.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    if start > 0 {
        let before = head[..start].chars().next_back();
        if matches!(before, Some('.') | Some('$')) {
            return None;
        }
    }
    Some((start, name.to_string()))
}

/// Split an argument list at commas with paren depth 0 outside strings,
/// then trim and unquote each argument.
fn split_args(inner: &str) -> Vec<String> {
    if inner.trim().is_empty() {
        return Vec::new();
    }
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_string: Option<char> = None;

    let mut iter = inner.chars().peekable();
    while let Some(ch) = iter.next() {
        if let Some(quote) = in_string {
            if ch == '\\' && iter.peek() == Some(&quote) {
                current.push(ch);
                current.push(iter.next().unwrap_or(quote));
                continue;
            }
            if ch == quote {
                in_string = None;
            }
            current.push(ch);
            continue;
        }
        match ch {
            '\'' | '"' => {
                in_string = Some(ch);
                current.push(ch);
            }
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                args.push(unquote(current.trim()));
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    args.push(unquote(current.trim()));
    args
}

/// Strip one layer of matched quotes and resolve `\<quote>` escapes.
fn unquote(arg: &str) -> String {
    let mut chars = arg.chars();
    let first = chars.next();
    let last = arg.chars().next_back();
    if arg.len() >= 2 && first == last && matches!(first, Some('\'') | Some('"')) {
        let quote = first.unwrap_or('\'');
        let inner = &arg[1..arg.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut iter = inner.chars().peekable();
        while let Some(ch) = iter.next() {
            if ch == '\\' && iter.peek() == Some(&quote) {
                out.push(iter.next().unwrap_or(quote));
            } else {
                out.push(ch);
            }
        }
        out
    } else {
        arg.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evaluator() -> Evaluator {
        let mut vars = DataObject::new();
        vars.insert("name".to_string(), json!("Alice"));
        vars.insert("age".to_string(), json!(30));
        vars.insert("nested".to_string(), json!({"city": "Oslo"}));
        Evaluator::new(vars)
    }

    #[test]
    fn substitutes_variables() {
        assert_eq!(evaluator().evaluate("Hello ${name}!"), "Hello Alice!");
        assert_eq!(evaluator().evaluate("${nested.city}"), "Oslo");
    }

    #[test]
    fn unknown_variable_keeps_placeholder() {
        assert_eq!(evaluator().evaluate("${missing}"), "${missing}");
        assert_eq!(
            evaluator().evaluate("before ${nested.missing} after"),
            "before ${nested.missing} after"
        );
    }

    #[test]
    fn nested_function_calls_evaluate_innermost_first() {
        let result = evaluator().evaluate("if(gt(${age},18),'adult','minor')");
        assert_eq!(result, "adult");

        let result = evaluator().evaluate("upper(concat('a', lower('BC')))");
        assert_eq!(result, "ABC");
    }

    #[test]
    fn typed_accessor_parses_progressively() {
        let eval = evaluator();
        assert_eq!(eval.evaluate_to_value("${age}"), json!(30));
        assert_eq!(eval.evaluate_to_value("3.5"), json!(3.5));
        assert_eq!(eval.evaluate_to_value("eq(1,1)"), json!(true));
        assert_eq!(eval.evaluate_to_value("plain"), json!("plain"));
    }

    #[test]
    fn unknown_functions_render_literally() {
        assert_eq!(evaluator().evaluate("mystery(1,2)"), "mystery(1,2)");
        // A known call wrapping an unknown one treats it as text.
        assert_eq!(evaluator().evaluate("upper(mystery(x))"), "MYSTERY(X)");
    }

    #[test]
    fn quoted_strings_shield_commas_and_parens() {
        assert_eq!(
            evaluator().evaluate("concat('a,b', \"(c)\")"),
            "a,b(c)"
        );
        assert_eq!(evaluator().evaluate(r"concat('it\'s', ' ok')"), "it's ok");
    }

    #[test]
    fn evaluation_is_idempotent_on_ground_strings() {
        let eval = evaluator();
        let once = eval.evaluate("Hello ${name}, you are if(gt(${age},18),'grown','young')");
        let twice = eval.evaluate(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn method_like_calls_are_not_functions() {
        assert_eq!(evaluator().evaluate("obj.trim(x)"), "obj.trim(x)");
    }

    #[test]
    fn contains_expression_detects_both_forms() {
        assert!(Evaluator::contains_expression("${a}"));
        assert!(Evaluator::contains_expression("upper(x)"));
        assert!(!Evaluator::contains_expression("plain text"));
        assert!(!Evaluator::contains_expression("superb(x)"));
    }
}
