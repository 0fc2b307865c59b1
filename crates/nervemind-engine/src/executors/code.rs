//! Sandboxed code executor.
//!
//! JavaScript runs in an embedded boa context, Python in an embedded
//! rustpython interpreter without stdlib access. Both see a single binding
//! `input` (the flowing data map) and must produce a map: JavaScript by
//! returning one, Python by assigning `output` (falling back to the
//! possibly-mutated `input`). The engine's per-node deadline caps wall
//! time; in-interpreter limits below cap loop iterations and recursion so
//! a runaway script cannot balloon memory before the deadline fires.

use std::collections::HashMap;

use async_trait::async_trait;
use nervemind_workflow::{DataObject, Node};
use rustpython_vm::{self as pyvm, builtins::PyStr, PyObjectRef, VirtualMachine};
use serde_json::{json, Value};

use crate::error::EngineError;
use crate::executor::{NodeCategory, NodeDescriptor, NodeExecutor, NodeOutput};
use crate::runtime::ExecutionContext;

/// Loop-iteration ceiling for the boa context.
const JS_LOOP_ITERATION_LIMIT: u64 = 1_000_000;

/// Recursion ceiling for the boa context.
const JS_RECURSION_LIMIT: usize = 512;

/// Recursion ceiling for the rustpython interpreter.
const PY_RECURSION_LIMIT: usize = 512;

/// Pure-Python JSON rendering of the result. The interpreter runs without
/// stdlib, so the bridge back to the host is a string in the scope.
const PY_SERIALIZER: &str = r#"
def __nm_json(v):
    if v is None:
        return 'null'
    if v is True:
        return 'true'
    if v is False:
        return 'false'
    if isinstance(v, (int, float)):
        return repr(v)
    if isinstance(v, str):
        s = v.replace('\\', '\\\\').replace('"', '\\"')
        s = s.replace('\n', '\\n').replace('\r', '\\r').replace('\t', '\\t')
        return '"' + s + '"'
    if isinstance(v, (list, tuple)):
        return '[' + ','.join([__nm_json(x) for x in v]) + ']'
    if isinstance(v, dict):
        return '{' + ','.join([__nm_json(str(k)) + ':' + __nm_json(x) for k, x in v.items()]) + '}'
    return __nm_json(str(v))

__nm_result = __nm_json(output if 'output' in globals() else input)
"#;

/// code node.
pub struct CodeExecutor;

#[async_trait]
impl NodeExecutor for CodeExecutor {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            type_id: "code",
            display_name: "Code",
            category: NodeCategory::Action,
            trigger_kind: None,
            description: "Runs JavaScript or Python over the flowing data map in a sandbox.",
            config_schema: json!({
                "type": "object",
                "properties": {
                    "language": {"type": "string", "enum": ["javascript", "python"]},
                    "code": {"type": "string"}
                },
                "required": ["code"]
            }),
        }
    }

    fn validate(&self, config: &DataObject) -> HashMap<String, String> {
        let mut errors = HashMap::new();
        if let Some(language) = config.get("language").and_then(Value::as_str) {
            if !matches!(language, "javascript" | "python") {
                errors.insert(
                    "language".to_string(),
                    format!("unsupported language: {language}"),
                );
            }
        }
        errors
    }

    async fn execute(
        &self,
        node: &Node,
        input: &DataObject,
        _ctx: &ExecutionContext,
    ) -> Result<NodeOutput, EngineError> {
        let code = node.parameter_str("code").unwrap_or("").to_string();
        if code.trim().is_empty() {
            // Blank code is the identity.
            return Ok(NodeOutput::main(input.clone()));
        }
        let language = node
            .parameter_str("language")
            .unwrap_or("javascript")
            .to_string();
        let node_id = node.id.clone();
        let input_map = input.clone();

        let result = tokio::task::spawn_blocking(move || match language.as_str() {
            "python" => run_python(&code, &input_map),
            "javascript" => run_javascript(&code, &input_map),
            other => Err(format!("unsupported language: {other}")),
        })
        .await
        .map_err(|e| EngineError::Internal(format!("code task failed: {e}")))?;

        match result {
            Ok(output) => Ok(NodeOutput::main(output)),
            Err(message) => Err(EngineError::for_node(&node_id, message)),
        }
    }
}

/// Run a JavaScript function body with `input` bound. The body's return
/// value must serialize to an object.
fn run_javascript(code: &str, input: &DataObject) -> Result<DataObject, String> {
    use boa_engine::{js_string, property::Attribute, Context, JsValue, Source};

    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(JS_LOOP_ITERATION_LIMIT);
    context
        .runtime_limits_mut()
        .set_recursion_limit(JS_RECURSION_LIMIT);

    let input_value = JsValue::from_json(&Value::Object(input.clone()), &mut context)
        .map_err(|e| format!("javascript: failed to bind input: {e}"))?;
    context
        .register_global_property(js_string!("input"), input_value, Attribute::READONLY)
        .map_err(|e| format!("javascript: failed to bind input: {e}"))?;

    let wrapped = format!("(function(input) {{\n{code}\n}})(input);");
    let result = context
        .eval(Source::from_bytes(wrapped.as_bytes()))
        .map_err(|e| format!("javascript error: {e}"))?;

    if result.is_undefined() || result.is_null() {
        return Err("javascript: code must return a map".to_string());
    }
    let json = result
        .to_json(&mut context)
        .map_err(|e| format!("javascript: result is not serializable: {e}"))?;
    match json {
        Value::Object(map) => Ok(map),
        other => Err(format!("javascript: code must return a map, got {other}")),
    }
}

/// Run a Python script with `input` bound; the script's `output` dict (or
/// the mutated `input`) becomes the node output.
fn run_python(code: &str, input: &DataObject) -> Result<DataObject, String> {
    let interpreter = pyvm::Interpreter::without_stdlib(Default::default());
    interpreter.enter(|vm| {
        vm.recursion_limit.set(PY_RECURSION_LIMIT);
        let scope = vm.new_scope_with_builtins();

        let input_obj = json_to_py(vm, &Value::Object(input.clone()));
        scope
            .globals
            .set_item("input", input_obj, vm)
            .map_err(|e| format_py_error(vm, e))?;

        let code_obj = vm
            .compile(code, pyvm::compiler::Mode::Exec, "<code node>".to_owned())
            .map_err(|e| format!("python compile error: {e}"))?;
        vm.run_code_obj(code_obj, scope.clone())
            .map_err(|e| format_py_error(vm, e))?;

        let serializer = vm
            .compile(
                PY_SERIALIZER,
                pyvm::compiler::Mode::Exec,
                "<result bridge>".to_owned(),
            )
            .map_err(|e| format!("python compile error: {e}"))?;
        vm.run_code_obj(serializer, scope.clone())
            .map_err(|e| format_py_error(vm, e))?;

        let rendered = scope
            .globals
            .get_item("__nm_result", vm)
            .map_err(|e| format_py_error(vm, e))?;
        let rendered = rendered
            .downcast_ref::<PyStr>()
            .ok_or_else(|| "python: internal result bridge failure".to_string())?
            .as_str()
            .to_string();

        let value: Value = serde_json::from_str(&rendered)
            .map_err(|e| format!("python: result is not serializable: {e}"))?;
        match value {
            Value::Object(map) => Ok(map),
            other => Err(format!("python: code must produce a map, got {other}")),
        }
    })
}

fn json_to_py(vm: &VirtualMachine, value: &Value) -> PyObjectRef {
    match value {
        Value::Null => vm.ctx.none(),
        Value::Bool(b) => vm.ctx.new_bool(*b).into(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                vm.ctx.new_int(i).into()
            } else {
                vm.ctx.new_float(n.as_f64().unwrap_or(0.0)).into()
            }
        }
        Value::String(s) => vm.ctx.new_str(s.as_str()).into(),
        Value::Array(items) => {
            let elements = items.iter().map(|v| json_to_py(vm, v)).collect();
            vm.ctx.new_list(elements).into()
        }
        Value::Object(map) => {
            let dict = vm.ctx.new_dict();
            for (key, item) in map {
                let _ = dict.set_item(key.as_str(), json_to_py(vm, item), vm);
            }
            dict.into()
        }
    }
}

fn format_py_error(
    vm: &VirtualMachine,
    error: pyvm::builtins::PyBaseExceptionRef,
) -> String {
    let mut rendered = String::new();
    if vm.write_exception(&mut rendered, &error).is_err() || rendered.trim().is_empty() {
        return "python error".to_string();
    }
    format!("python error: {}", rendered.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input_map() -> DataObject {
        let mut map = DataObject::new();
        map.insert("count".to_string(), json!(2));
        map.insert("name".to_string(), json!("nerve"));
        map
    }

    #[test]
    fn javascript_returns_a_map() {
        let output = run_javascript(
            "return { doubled: input.count * 2, name: input.name };",
            &input_map(),
        )
        .unwrap();
        assert_eq!(output["doubled"], json!(4));
        assert_eq!(output["name"], json!("nerve"));
    }

    #[test]
    fn javascript_non_map_is_rejected() {
        let err = run_javascript("return 42;", &input_map()).unwrap_err();
        assert!(err.contains("must return a map"));
    }

    #[test]
    fn javascript_error_carries_language() {
        let err = run_javascript("throw new Error('boom');", &input_map()).unwrap_err();
        assert!(err.contains("javascript"));
        assert!(err.contains("boom"));
    }

    #[test]
    fn javascript_runaway_loop_is_bounded() {
        let err = run_javascript(
            "let a = []; while (true) { a.push(a.length); } return {};",
            &input_map(),
        )
        .unwrap_err();
        assert!(err.contains("javascript"));
    }

    #[test]
    fn javascript_runaway_recursion_is_bounded() {
        let err = run_javascript("function f() { return f(); } return f();", &input_map())
            .unwrap_err();
        assert!(err.contains("javascript"));
    }

    #[test]
    fn python_output_variable_wins() {
        let output = run_python(
            "output = {'tripled': input['count'] * 3}",
            &input_map(),
        )
        .unwrap();
        assert_eq!(output["tripled"], json!(6));
    }

    #[test]
    fn python_falls_back_to_mutated_input() {
        let output = run_python("input['seen'] = True", &input_map()).unwrap();
        assert_eq!(output["seen"], json!(true));
        assert_eq!(output["count"], json!(2));
    }

    #[test]
    fn python_error_carries_language() {
        let err = run_python("raise ValueError('nope')", &input_map()).unwrap_err();
        assert!(err.contains("python"));
    }

    #[test]
    fn python_runaway_recursion_is_bounded() {
        let err = run_python("def f():\n    return f()\nf()", &input_map()).unwrap_err();
        assert!(err.contains("python"));
    }
}
