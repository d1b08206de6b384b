// tests/sandbox_test.rs — Integration test: sandbox against real worker processes

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};

use openkoi_rlm::infra::config::RlmConfig;
use openkoi_rlm::sandbox::Sandbox;
use openkoi_rlm::tools::{Tool, ToolSpec};

const WORKER: &str = env!("CARGO_BIN_EXE_koi-rlm");
const TIMEOUT: Duration = Duration::from_secs(10);

fn sandbox() -> Sandbox {
    let mut sb = Sandbox::with_program(&RlmConfig::default(), WORKER);
    sb.start().unwrap();
    sb
}

struct UpperTool;

#[async_trait]
impl Tool for UpperTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "upper".into(),
            signature: "upper(text)".into(),
            example: r#"upper("hi")"#.into(),
            description: "Uppercases text".into(),
            returns: "string".into(),
        }
    }

    async fn call(&self, args: &[Value]) -> anyhow::Result<Value> {
        let s = args.first().and_then(|v| v.as_str()).unwrap_or_default();
        Ok(Value::String(s.to_uppercase()))
    }
}

#[tokio::test]
async fn test_print_is_captured() {
    let mut sb = sandbox();
    let result = sb.execute(r#"print("hello"); print(1 + 2);"#, TIMEOUT).await.unwrap();
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.stdout, "hello\n3\n");
    assert!(result.error.is_none());
    assert_eq!(sb.spawn_count(), 1);
}

#[tokio::test]
async fn test_namespace_persists_across_executions() {
    let mut sb = sandbox();
    sb.inject_variable("context", "alpha beta gamma").unwrap();

    let first = sb
        .execute(r#"let words = context.split(" "); let n = words.len();"#, TIMEOUT)
        .await
        .unwrap();
    assert!(first.success, "{:?}", first.error);
    assert_eq!(sb.get_variable("n"), Some(&json!(3)));
    assert_eq!(sb.get_variable("words"), Some(&json!(["alpha", "beta", "gamma"])));

    let second = sb.execute("print(n * 2);", TIMEOUT).await.unwrap();
    assert_eq!(second.stdout, "6\n");
    assert_eq!(sb.spawn_count(), 2);
}

#[tokio::test]
async fn test_final_call_halts_block() {
    let mut sb = sandbox();
    let result = sb
        .execute(r#"print("before"); FINAL("the answer"); print("after");"#, TIMEOUT)
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.final_answer.as_deref(), Some("the answer"));
    assert_eq!(result.stdout, "before\n");
}

#[tokio::test]
async fn test_final_answer_assignment() {
    let mut sb = sandbox();
    let result = sb
        .execute("let x = 21; FINAL_ANSWER = `${x * 2}`;", TIMEOUT)
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.final_answer.as_deref(), Some("42"));
    assert!(sb.get_variable("FINAL_ANSWER").is_none());
}

#[tokio::test]
async fn test_runtime_error_is_captured() {
    let mut sb = sandbox();
    let result = sb.execute(r#"throw "boom";"#, TIMEOUT).await.unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().contains("boom"));
    assert!(result.final_answer.is_none());
}

#[tokio::test]
async fn test_spin_loop_killed_at_timeout() {
    let mut sb = sandbox();
    let start = Instant::now();
    let result = sb
        .execute("let i = 0; loop { i += 1; }", Duration::from_secs(1))
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert!(!result.success);
    assert!(result.timed_out);
    let err = result.error.unwrap();
    assert!(err.contains("timed out"), "{}", err);
    assert!(err.contains("killed"), "{}", err);
    assert!(elapsed < Duration::from_secs(3), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_sleep_killed_at_timeout() {
    let mut sb = sandbox();
    let start = Instant::now();
    let result = sb
        .execute("let kept = 1; sleep(5);", Duration::from_secs(1))
        .await
        .unwrap();
    assert!(result.timed_out);
    assert!(start.elapsed() < Duration::from_secs(3));
    // A killed block reports no bindings.
    assert!(sb.get_variable("kept").is_none());

    // The sandbox remains usable.
    let next = sb.execute("print(7);", TIMEOUT).await.unwrap();
    assert_eq!(next.stdout, "7\n");
}

#[tokio::test]
async fn test_registered_tool_is_a_stub_inside_worker() {
    let mut sb = sandbox();
    sb.register_callback(Arc::new(UpperTool));
    let result = sb
        .execute(r#"fn shout(s) { upper(s) } let y = shout("hi");"#, TIMEOUT)
        .await
        .unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().contains("assigned"));
}

#[tokio::test]
async fn test_import_allowlist() {
    let mut sb = sandbox();
    let ok = sb
        .execute(r#"import "text" as t; print(t::words("a b  c").len());"#, TIMEOUT)
        .await
        .unwrap();
    assert!(ok.success, "{:?}", ok.error);
    assert_eq!(ok.stdout, "3\n");

    let denied = sb.execute(r#"import "fs" as fs;"#, TIMEOUT).await.unwrap();
    assert!(!denied.success);
    assert!(denied.error.unwrap().contains("allowed modules"));
}

#[tokio::test]
async fn test_eval_is_disabled() {
    let mut sb = sandbox();
    let result = sb.execute(r#"let x = eval("40 + 2");"#, TIMEOUT).await.unwrap();
    assert!(!result.success);
    assert!(sb.get_variable("x").is_none());
}

#[tokio::test]
async fn test_private_and_callable_bindings_not_persisted() {
    let mut sb = sandbox();
    let result = sb
        .execute(r#"let _scratch = 1; let f = Fn("print"); let kept = "yes";"#, TIMEOUT)
        .await
        .unwrap();
    assert!(result.success, "{:?}", result.error);
    assert!(sb.get_variable("_scratch").is_none());
    assert!(sb.get_variable("f").is_none());
    assert_eq!(sb.get_variable("kept"), Some(&json!("yes")));
}

#[tokio::test]
async fn test_output_is_bounded() {
    let cfg = RlmConfig {
        max_print_chars: 100,
        ..Default::default()
    };
    let mut sb = Sandbox::with_program(&cfg, WORKER);
    sb.start().unwrap();
    let result = sb
        .execute(r#"for i in 0..1000 { print("line " + i); }"#, TIMEOUT)
        .await
        .unwrap();
    assert!(result.success);
    assert!(result.stdout.contains("[Output truncated"));
    assert!(result.stdout.len() < 300);
}

#[cfg(unix)]
#[tokio::test]
async fn test_worker_crash_is_reported() {
    // `sh sandbox-worker` fails to open the script and exits non-zero.
    let mut sb = Sandbox::with_program(&RlmConfig::default(), "sh");
    sb.start().unwrap();
    let result = sb.execute("print(1);", TIMEOUT).await.unwrap();
    assert!(!result.success);
    assert!(!result.timed_out);
    let err = result.error.unwrap();
    assert!(err.contains("crashed"), "{}", err);
    assert!(err.contains("sandbox-worker"), "{}", err);
}

#[tokio::test]
async fn test_request_bindings_are_not_persisted() {
    let mut sb = sandbox();
    let slots = vec![("__tool_0".to_string(), json!("def"))];

    let ok = sb
        .execute_with("let head = __tool_0;", &slots, TIMEOUT)
        .await
        .unwrap();
    assert!(ok.success, "{:?}", ok.error);
    assert_eq!(sb.get_variable("head"), Some(&json!("def")));
    assert!(sb.get_variable("__tool_0").is_none());

    let killed = sb
        .execute_with("let late = __tool_0; sleep(5);", &slots, Duration::from_secs(1))
        .await
        .unwrap();
    assert!(killed.timed_out);
    assert!(sb.get_variable("late").is_none());

    let gone = sb.execute("print(is_def_var(\"__tool_0\"));", TIMEOUT).await.unwrap();
    assert_eq!(gone.stdout, "false\n");
}
