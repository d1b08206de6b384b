// src/sandbox/engine.rs — Restricted Rhai engine used inside the worker
//
// Rhai has no file, network or process primitives, so the restricted builtin
// set is the standard package minus `eval`. Imports resolve only against an
// in-memory allowlist. This is a policy boundary, not a verified sandbox: the
// process boundary and the wall-clock kill are what actually contain a script.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rhai::module_resolvers::ModuleResolver;
use rhai::{
    Array, Dynamic, Engine, EvalAltResult, Module, Position, Scope, Shared, FLOAT, INT,
};
use serde_json::Value;

use super::protocol::{Namespace, WorkerRequest, WorkerResponse, FINAL_ANSWER_VAR};
use crate::core::truncation::BoundedBuffer;

/// Modules a script may `import`.
pub const ALLOWED_MODULES: &[&str] = &["text", "stats"];

// ---------------------------------------------------------------------------
// Capture state shared with engine callbacks
// ---------------------------------------------------------------------------

struct Capture {
    stdout: BoundedBuffer,
    stderr: BoundedBuffer,
    final_answer: Option<String>,
}

type SharedCapture = Arc<Mutex<Capture>>;

fn with_capture<R>(capture: &SharedCapture, f: impl FnOnce(&mut Capture) -> R) -> R {
    let mut guard = capture.lock().unwrap_or_else(|p| p.into_inner());
    f(&mut guard)
}

// ---------------------------------------------------------------------------
// Import allowlist
// ---------------------------------------------------------------------------

struct AllowlistResolver {
    modules: BTreeMap<&'static str, Shared<Module>>,
}

impl AllowlistResolver {
    fn new() -> Self {
        let mut modules = BTreeMap::new();
        modules.insert("text", Shared::new(text_module()));
        modules.insert("stats", Shared::new(stats_module()));
        Self { modules }
    }
}

impl ModuleResolver for AllowlistResolver {
    fn resolve(
        &self,
        _engine: &Engine,
        _source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> Result<Shared<Module>, Box<EvalAltResult>> {
        match self.modules.get(path) {
            Some(module) => Ok(module.clone()),
            None => Err(EvalAltResult::ErrorModuleNotFound(
                format!("{} (allowed modules: {})", path, ALLOWED_MODULES.join(", ")),
                pos,
            )
            .into()),
        }
    }
}

fn text_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("words", |s: &str| {
        Ok(s.split_whitespace()
            .map(|w| Dynamic::from(w.to_string()))
            .collect::<Array>())
    });
    m.set_native_fn("split_lines", |s: &str| {
        Ok(s.lines()
            .map(|l| Dynamic::from(l.to_string()))
            .collect::<Array>())
    });
    m.set_native_fn("count", |s: &str, needle: &str| {
        Ok(if needle.is_empty() {
            0
        } else {
            s.matches(needle).count() as INT
        })
    });
    m.set_native_fn("truncate", |s: &str, max: INT| {
        Ok(s.chars().take(max.max(0) as usize).collect::<String>())
    });
    m
}

fn numbers(arr: &Array) -> Vec<FLOAT> {
    arr.iter()
        .filter_map(|v| v.as_float().ok().or_else(|| v.as_int().ok().map(|i| i as FLOAT)))
        .collect()
}

fn stats_module() -> Module {
    let mut m = Module::new();
    m.set_native_fn("sum", |arr: Array| Ok(numbers(&arr).iter().sum::<FLOAT>()));
    m.set_native_fn("mean", |arr: Array| {
        let nums = numbers(&arr);
        Ok(if nums.is_empty() {
            0.0
        } else {
            nums.iter().sum::<FLOAT>() / nums.len() as FLOAT
        })
    });
    m.set_native_fn("min", |arr: Array| {
        Ok(numbers(&arr).into_iter().fold(FLOAT::INFINITY, FLOAT::min))
    });
    m.set_native_fn("max", |arr: Array| {
        Ok(numbers(&arr).into_iter().fold(FLOAT::NEG_INFINITY, FLOAT::max))
    });
    m
}

// ---------------------------------------------------------------------------
// Engine factory
// ---------------------------------------------------------------------------

fn create_sandbox_engine(capture: &SharedCapture, stubs: &[String]) -> Engine {
    let mut engine = Engine::new();

    // Safety limits. No operation limit: runaway loops are ended by the process kill.
    engine.set_max_expr_depths(64, 32);
    engine.set_max_string_size(1_048_576); // 1MB
    engine.set_max_array_size(100_000);
    engine.set_max_map_size(100_000);

    engine.disable_symbol("eval");
    engine.set_module_resolver(AllowlistResolver::new());

    let out = Arc::clone(capture);
    engine.on_print(move |s| with_capture(&out, |c| c.stdout.push_line(s)));
    let err = Arc::clone(capture);
    engine.on_debug(move |s, _src, pos| {
        let line = if pos.is_none() {
            s.to_string()
        } else {
            format!("{:?} {}", pos, s)
        };
        with_capture(&err, |c| c.stderr.push_line(&line));
    });

    engine.register_fn("sleep", |secs: FLOAT| -> Result<(), Box<EvalAltResult>> {
        let d = Duration::try_from_secs_f64(secs.max(0.0))
            .map_err(|_| format!("sleep: {} is not a valid number of seconds", secs))?;
        std::thread::sleep(d);
        Ok(())
    });
    engine.register_fn("sleep", |secs: INT| {
        std::thread::sleep(Duration::from_secs(secs.max(0) as u64));
    });

    let fin = Arc::clone(capture);
    engine.register_fn(
        "FINAL",
        move |value: Dynamic| -> Result<(), Box<EvalAltResult>> {
            with_capture(&fin, |c| c.final_answer = Some(value.to_string()));
            Err(EvalAltResult::ErrorTerminated(Dynamic::UNIT, Position::NONE).into())
        },
    );

    for name in stubs {
        register_stub(&mut engine, name);
    }

    engine
}

/// Register a raising stand-in for a host tool, for every arity a tool uses.
fn register_stub(engine: &mut Engine, name: &str) {
    let message = format!(
        "`{name}` runs on the host and cannot be called from inside executing code. \
         Tool calls must be assigned to a variable in their own top-level statement with \
         literal arguments, e.g. `result = {name}(...);`, then use `result`."
    );
    let fail = move || -> Result<Dynamic, Box<EvalAltResult>> { Err(message.clone().into()) };

    let f = fail.clone();
    engine.register_fn(name.to_string(), move || f());
    let f = fail.clone();
    engine.register_fn(name.to_string(), move |_a: Dynamic| f());
    let f = fail.clone();
    engine.register_fn(name.to_string(), move |_a: Dynamic, _b: Dynamic| f());
    let f = fail.clone();
    engine.register_fn(name.to_string(), move |_a: Dynamic, _b: Dynamic, _c: Dynamic| f());
    let f = fail;
    engine.register_fn(
        name.to_string(),
        move |_a: Dynamic, _b: Dynamic, _c: Dynamic, _d: Dynamic| f(),
    );
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Run one request to completion inside the current process.
pub fn execute_request(req: &WorkerRequest) -> WorkerResponse {
    let capture = Arc::new(Mutex::new(Capture {
        stdout: BoundedBuffer::new(req.max_print_chars),
        stderr: BoundedBuffer::new(req.max_print_chars),
        final_answer: None,
    }));
    let engine = create_sandbox_engine(&capture, &req.stubs);

    let mut scope = Scope::new();
    for (name, value) in &req.namespace {
        scope.push_dynamic(name.as_str(), json_to_dynamic(value));
    }
    scope.push_dynamic(FINAL_ANSWER_VAR, Dynamic::UNIT);

    let outcome = engine.run_with_scope(&mut scope, &req.code);

    let updates = collect_updates(&scope, &req.namespace);
    let assigned_answer = scope
        .get_value::<Dynamic>(FINAL_ANSWER_VAR)
        .filter(|v| !v.is_unit())
        .map(|v| v.to_string());

    let (stdout, stderr, called_answer) = {
        let mut guard = capture.lock().unwrap_or_else(|p| p.into_inner());
        let c = std::mem::replace(
            &mut *guard,
            Capture {
                stdout: BoundedBuffer::new(0),
                stderr: BoundedBuffer::new(0),
                final_answer: None,
            },
        );
        (c.stdout.finish(), c.stderr.finish(), c.final_answer)
    };

    // A direct FINAL(...) call ends the script through ErrorTerminated.
    let (success, error, final_answer) = match outcome {
        Ok(()) => (true, None, called_answer.or(assigned_answer)),
        Err(_) if called_answer.is_some() => (true, None, called_answer),
        Err(e) => (false, Some(e.to_string()), None),
    };

    WorkerResponse {
        success,
        stdout,
        stderr,
        error,
        final_answer,
        updates,
    }
}

/// Bindings worth carrying to the next execution.
fn collect_updates(scope: &Scope, before: &Namespace) -> Namespace {
    let mut updates = Namespace::new();
    // Later entries shadow earlier ones with the same name.
    for (name, _constant, value) in scope.iter() {
        if name.starts_with('_') || name == FINAL_ANSWER_VAR {
            continue;
        }
        match dynamic_to_json(&value) {
            Some(json) if before.get(name) != Some(&json) => {
                updates.insert(name.to_string(), json);
            }
            Some(_) => {
                updates.remove(name);
            }
            None => {
                updates.remove(name);
            }
        }
    }
    updates
}

// ---------------------------------------------------------------------------
// Value conversion
// ---------------------------------------------------------------------------

/// Convert a serde_json::Value to a Rhai Dynamic.
pub fn json_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(arr) => {
            let rhai_arr: Array = arr.iter().map(json_to_dynamic).collect();
            Dynamic::from(rhai_arr)
        }
        Value::Object(obj) => {
            let mut map = rhai::Map::new();
            for (k, v) in obj {
                map.insert(k.clone().into(), json_to_dynamic(v));
            }
            Dynamic::from(map)
        }
    }
}

/// Convert a Rhai Dynamic back to JSON. `None` when it has no JSON form
/// (function pointers, timestamps, custom types, non-finite floats).
pub fn dynamic_to_json(value: &Dynamic) -> Option<Value> {
    let value = value.flatten_clone();
    if value.is_unit() {
        return Some(Value::Null);
    }
    if let Ok(b) = value.as_bool() {
        return Some(Value::Bool(b));
    }
    if let Ok(i) = value.as_int() {
        return Some(Value::from(i));
    }
    if let Ok(f) = value.as_float() {
        return serde_json::Number::from_f64(f).map(Value::Number);
    }
    if let Ok(c) = value.as_char() {
        return Some(Value::String(c.to_string()));
    }
    if value.is_string() {
        return value.into_string().ok().map(Value::String);
    }
    if value.is::<Array>() {
        let arr = value.try_cast::<Array>()?;
        return arr
            .iter()
            .map(dynamic_to_json)
            .collect::<Option<Vec<_>>>()
            .map(Value::Array);
    }
    if value.is::<rhai::Map>() {
        let map = value.try_cast::<rhai::Map>()?;
        let mut obj = serde_json::Map::new();
        for (k, v) in map.iter() {
            obj.insert(k.to_string(), dynamic_to_json(v)?);
        }
        return Some(Value::Object(obj));
    }
    if value.is::<rhai::Blob>() {
        let blob = value.try_cast::<rhai::Blob>()?;
        return Some(Value::Array(blob.into_iter().map(Value::from).collect()));
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn request(code: &str) -> WorkerRequest {
        WorkerRequest {
            code: code.into(),
            namespace: Namespace::new(),
            stubs: vec![],
            max_print_chars: 1000,
        }
    }

    #[test]
    fn test_print_is_captured() {
        let resp = execute_request(&request(r#"print("hello"); print(40 + 2);"#));
        assert!(resp.success);
        assert_eq!(resp.stdout, "hello\n42\n");
    }

    #[test]
    fn test_final_call_halts_script() {
        let resp = execute_request(&request(
            r#"print("before"); FINAL("the answer"); print("after");"#,
        ));
        assert!(resp.success);
        assert_eq!(resp.final_answer.as_deref(), Some("the answer"));
        assert_eq!(resp.stdout, "before\n");
    }

    #[test]
    fn test_final_assignment_form() {
        let resp = execute_request(&request(r#"let x = 6 * 7; FINAL_ANSWER = `x is ${x}`;"#));
        assert!(resp.success);
        assert_eq!(resp.final_answer.as_deref(), Some("x is 42"));
        assert!(!resp.updates.contains_key(FINAL_ANSWER_VAR));
    }

    #[test]
    fn test_final_inside_function_still_halts() {
        let resp = execute_request(&request(
            "fn finish(v) { FINAL(v); }\nfinish(7);\nprint(\"unreachable\");",
        ));
        assert_eq!(resp.final_answer.as_deref(), Some("7"));
        assert!(resp.stdout.is_empty());
    }

    #[test]
    fn test_runtime_error_reported() {
        let resp = execute_request(&request("let x = 1;\nlet y = x / 0;"));
        assert!(!resp.success);
        assert!(resp.error.is_some());
        assert!(resp.final_answer.is_none());
    }

    #[test]
    fn test_unrepresentable_sleep_is_a_script_error() {
        let resp = execute_request(&request("sleep(1.0e300);"));
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("not a valid number of seconds"));
        let resp = execute_request(&request("sleep(-1.5); print(\"done\");"));
        assert!(resp.success, "{:?}", resp.error);
        assert_eq!(resp.stdout, "done\n");
    }

    #[test]
    fn test_eval_is_disabled() {
        let resp = execute_request(&request(r#"eval("40 + 2")"#));
        assert!(!resp.success);
    }

    #[test]
    fn test_import_allowlist() {
        let ok = execute_request(&request(
            r#"import "stats" as s; import "text" as t; print(s::sum([1, 2, 3.5])); print(t::words("a b").len());"#,
        ));
        assert!(ok.success, "{:?}", ok.error);
        assert_eq!(ok.stdout, "6.5\n2\n");

        let denied = execute_request(&request(r#"import "fs" as fs;"#));
        assert!(!denied.success);
        assert!(denied.error.unwrap().contains("allowed modules: text, stats"));
    }

    #[test]
    fn test_stub_raises_actionable_error() {
        let mut req = request("let x = 1;\nlet head = peek(0, x);");
        req.stubs = vec!["peek".into()];
        let resp = execute_request(&req);
        assert!(!resp.success);
        assert!(resp.error.unwrap().contains("must be assigned to a variable"));
    }

    #[test]
    fn test_updates_are_filtered_and_diffed() {
        let mut req = request(
            r#"
            let total = count + 1;
            let _scratch = 5;
            let f = |x| x + 1;
            let items = [1, "two", #{ three: 3.0 }];
            "#,
        );
        req.namespace.insert("count".into(), json!(1));
        req.namespace.insert("context".into(), json!("unchanged"));
        let resp = execute_request(&req);
        assert!(resp.success, "{:?}", resp.error);

        let keys: Vec<&str> = resp.updates.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["items", "total"]);
        assert_eq!(resp.updates["total"], json!(2));
        assert_eq!(resp.updates["items"], json!([1, "two", {"three": 3.0}]));
    }

    #[test]
    fn test_output_is_bounded() {
        let mut req = request(r#"for i in 0..100 { print("xxxxxxxxxx"); }"#);
        req.max_print_chars = 50;
        let resp = execute_request(&req);
        assert!(resp.stdout.starts_with("xxxxxxxxxx\n"));
        assert!(resp.stdout.contains("[Output truncated"));
        assert!(resp.stdout.chars().count() < 120);
    }

    #[test]
    fn test_json_round_trip_of_nested_values() {
        let value = json!({"a": [1, 2.5, null, true], "b": {"c": "d"}});
        assert_eq!(dynamic_to_json(&json_to_dynamic(&value)), Some(value));
    }

    #[test]
    fn test_json_to_dynamic_primitives() {
        assert!(json_to_dynamic(&json!(null)).is_unit());
        assert_eq!(json_to_dynamic(&json!(42)).as_int().unwrap(), 42);
        assert_eq!(json_to_dynamic(&json!("hello")).into_string().unwrap(), "hello");
    }
}
