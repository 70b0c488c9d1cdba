//! Integration tests for sandbox evaluation: results, deadlines, timers,
//! modules and async host calls

use otter_bridge::{JsFunction, JsObject, Value};
use otter_sandbox::{
    run_sandbox, ErrorKind, EvalResult, MemoryModules, Phase, Sandbox, SandboxConfig,
    SandboxError, SandboxOptions, EXECUTION_TIMEOUT, RESOURCE_LIMIT_EXCEEDED, SANDBOX_ERROR,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn tokio_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

fn eval(options: SandboxOptions, source: &str) -> EvalResult {
    run_sandbox(options, |session| session.eval(source)).unwrap()
}

fn error_name(result: &EvalResult) -> String {
    result.error_info().expect("evaluation failed").name.clone()
}

#[test]
fn test_default_export_is_the_result() {
    let result = Sandbox::default().eval("export default 1 + 1;").unwrap();
    assert_eq!(result.to_json(), json!({ "ok": true, "data": 2 }));
}

#[test]
fn test_large_bigint_result_stays_a_bigint() {
    let result = Sandbox::default().eval("export default 2n ** 70n;").unwrap();
    let Some(Value::BigInt(n)) = result.data() else {
        panic!("expected a bigint, got {:?}", result.data());
    };
    assert_eq!(n.to_string(), "1180591620717411303424");
    assert_eq!(result.to_json()["data"], json!("1180591620717411303424"));
}

#[test]
fn test_thrown_error_is_reported() {
    let result = Sandbox::default().eval("throw new Error('x');").unwrap();
    assert!(!result.is_ok());
    assert!(!result.is_syntax_error());
    let error = result.error_info().unwrap();
    assert_eq!(error.name, "Error");
    assert_eq!(error.message, "x");
    assert_eq!(result.kind(), Some(ErrorKind::GuestRuntime));
    assert_eq!(result.to_json()["ok"], json!(false));
}

#[test]
fn test_host_functions_share_host_state() {
    let number = Arc::new(Mutex::new(1.0));
    let get = {
        let number = number.clone();
        JsFunction::native("getNumber", move |_, _| Ok(Value::Number(*number.lock())))
    };
    let set = {
        let number = number.clone();
        JsFunction::native("setNumber", move |call, _| {
            let value = call.arg(0).as_number().unwrap_or(f64::NAN);
            *number.lock() = value;
            Ok(Value::Undefined)
        })
    };
    let options = SandboxOptions::default()
        .bind("getNumber", get)
        .bind("setNumber", set);

    let result = eval(options, "setNumber(getNumber() + 41); export default getNumber();");
    assert_eq!(result.to_json(), json!({ "ok": true, "data": 42 }));
    assert_eq!(*number.lock(), 42.0);
}

#[test]
fn test_async_host_call_without_deadline() {
    let runtime = tokio_runtime();
    let slow = JsFunction::asynchronous("slow", |_| async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(Value::from("done"))
    });
    let options = SandboxOptions::default()
        .bind("slow", slow)
        .tokio_handle(runtime.handle().clone());

    let (result, pending) = run_sandbox(options, |session| {
        let result = session.eval("export default await slow();");
        (result, session.pending_calls())
    })
    .unwrap();
    assert_eq!(result.to_json(), json!({ "ok": true, "data": "done" }));
    assert_eq!(pending, 0);
}

#[test]
fn test_timer_ceiling_is_a_guest_error() {
    let options = SandboxOptions::new(SandboxConfig::new().max_timeouts(2));
    let result = eval(
        options,
        r#"
        setTimeout(() => {}, 10);
        setTimeout(() => {}, 10);
        let name;
        try { setTimeout(() => {}, 10); } catch (e) { name = e.name; }
        export default name;
        "#,
    );
    assert_eq!(result.to_json(), json!({ "ok": true, "data": RESOURCE_LIMIT_EXCEEDED }));
}

#[test]
fn test_uncaught_timer_ceiling_fails_the_evaluation() {
    let options = SandboxOptions::new(SandboxConfig::new().max_intervals(1));
    let result = eval(
        options,
        "const a = setInterval(() => {}, 10); setInterval(() => {}, 10); export default 1;",
    );
    assert_eq!(result.kind(), Some(ErrorKind::ResourceLimitExceeded));
}

#[test]
fn test_timeout_wins_over_a_slow_host_call() {
    let runtime = tokio_runtime();
    let marker = Arc::new(());
    let slow = {
        let marker = marker.clone();
        JsFunction::asynchronous("slow", move |_| {
            let marker = marker.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(100)).await;
                drop(marker);
                Ok(Value::Null)
            }
        })
    };

    let started = Instant::now();
    let (result, phase) = run_sandbox(
        SandboxOptions::new(SandboxConfig::new().timeout_ms(100))
            .bind("slow", slow)
            .tokio_handle(runtime.handle().clone()),
        |session| {
            let result = session.eval("export default await slow();");
            (result, session.phase())
        },
    )
    .unwrap();

    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(phase, Phase::TimedOut);
    assert_eq!(result.kind(), Some(ErrorKind::ExecutionTimeout));
    let error = result.error_info().unwrap();
    assert_eq!(error.name, EXECUTION_TIMEOUT);
    assert_eq!(error.message, "Script execution timed out after 100ms");
    assert_eq!(Arc::strong_count(&marker), 1);
}

#[test]
fn test_infinite_loop_is_interrupted() {
    let options = SandboxOptions::new(SandboxConfig::new().timeout_ms(100));
    let started = Instant::now();
    let result = eval(options, "while (true) {} export default 1;");
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(error_name(&result), EXECUTION_TIMEOUT);
}

#[test]
fn test_endless_interval_is_interrupted() {
    let options = SandboxOptions::new(SandboxConfig::new().timeout_ms(100));
    let result = eval(
        options,
        "setInterval(() => {}, 1); export default await new Promise(() => {});",
    );
    assert_eq!(error_name(&result), EXECUTION_TIMEOUT);
}

#[test]
fn test_syntax_error_is_flagged() {
    let result = Sandbox::default().eval("export default (;").unwrap();
    assert!(result.is_syntax_error());
    assert_eq!(result.kind(), Some(ErrorKind::SyntaxError));
    assert_eq!(result.to_json()["isSyntaxError"], json!(true));
}

#[test]
fn test_session_runs_one_evaluation() {
    let (first, second) = run_sandbox(SandboxOptions::default(), |session| {
        let first = session.eval("export default 1;");
        let second = session.eval("export default 2;");
        (first, second)
    })
    .unwrap();
    assert!(first.is_ok());
    assert_eq!(error_name(&second), SANDBOX_ERROR);
}

#[test]
fn test_timers_drive_top_level_await() {
    let result = Sandbox::default()
        .eval(
            r#"
            const later = await new Promise((resolve) => setTimeout(resolve, 10, 'later'));
            let ticks = 0;
            await new Promise((resolve) => {
              const id = setInterval(() => {
                ticks += 1;
                if (ticks === 3) { clearInterval(id); resolve(); }
              }, 1);
            });
            const seen = [];
            await new Promise((resolve) => {
              setImmediate(() => seen.push('immediate'));
              setTimeout(() => { seen.push('timeout'); resolve(); }, 5);
            });
            const cancelled = setTimeout(() => { throw new Error('should not run'); }, 0);
            clearTimeout(cancelled);
            export default { later, ticks, seen };
            "#,
        )
        .unwrap();
    assert_eq!(
        result.to_json(),
        json!({ "ok": true, "data": { "later": "later", "ticks": 3, "seen": ["immediate", "timeout"] } })
    );
}

#[test]
fn test_timer_callback_errors_are_contained() {
    let result = Sandbox::default()
        .eval(
            r#"
            setTimeout(() => { throw new Error('ignored'); }, 0);
            export default await new Promise((resolve) => setTimeout(() => resolve('still running'), 5));
            "#,
        )
        .unwrap();
    assert_eq!(result.data(), Some(&Value::from("still running")));
}

#[test]
fn test_modules_load_from_module_source() {
    let modules = MemoryModules::new()
        .with("lib/math.js", "export const add = (a, b) => a + b;")
        .with("lib/index.js", "export { add } from './math.js'; export const name = 'lib';");
    let options = SandboxOptions::default().modules(modules);
    let result = eval(
        options,
        "import { add, name } from './lib/index.js'; export default `${name}:${add(2, 3)}`;",
    );
    assert_eq!(result.to_json(), json!({ "ok": true, "data": "lib:5" }));
}

#[test]
fn test_missing_module_is_an_error() {
    let options = SandboxOptions::default().modules(MemoryModules::new());
    let result = eval(options, "import x from './missing.js'; export default x;");
    assert!(!result.is_ok());
}

#[test]
fn test_transpile_hook_runs_before_parsing() {
    let options = SandboxOptions::default()
        .transpile(|source| Ok(source.replace(": number", "")));
    let result = eval(options, "const answer: number = 42; export default answer;");
    assert_eq!(result.to_json(), json!({ "ok": true, "data": 42 }));
}

#[test]
fn test_transpile_failure_is_a_syntax_error() {
    let options = SandboxOptions::default().transpile(|_| Err("unexpected type annotation".to_string()));
    let result = eval(options, "const answer: number = 42;");
    assert!(result.is_syntax_error());
    assert_eq!(result.error_info().unwrap().message, "unexpected type annotation");
}

#[test]
fn test_returned_function_can_be_called() {
    let (result, doubled) = run_sandbox(SandboxOptions::default(), |session| {
        let result = session.eval("export default (n) => n * 2;");
        let doubled = match result.data() {
            Some(Value::Function(function)) => session.call(function, vec![Value::from(21)]),
            other => panic!("expected a function, got {other:?}"),
        };
        (result, doubled)
    })
    .unwrap();
    assert!(result.is_ok());
    assert_eq!(doubled.data(), Some(&Value::Number(42.0)));
}

#[test]
fn test_returned_future_can_be_resolved() {
    let resolved = run_sandbox(SandboxOptions::default(), |session| {
        let result = session.eval(
            "export default { later: new Promise((resolve) => setTimeout(() => resolve(7), 5)) };",
        );
        let later = result.data().and_then(|data| data.get("later").as_future().cloned());
        let future = later.expect("exported promise");
        session.resolve(&future)
    })
    .unwrap();
    assert_eq!(resolved.data(), Some(&Value::Number(7.0)));
}

#[test]
fn test_rejected_host_call_reaches_guest() {
    let runtime = tokio_runtime();
    let fail = JsFunction::asynchronous("fail", |_| async {
        Err(Value::Error(otter_bridge::ErrorValue::new("NetworkError", "unreachable")))
    });
    let options = SandboxOptions::default()
        .bind("fail", fail)
        .tokio_handle(runtime.handle().clone());
    let result = eval(
        options,
        "try { await fail(); } catch (e) { globalThis.caught = `${e.name}: ${e.message}`; } export default caught;",
    );
    assert_eq!(result.data(), Some(&Value::from("NetworkError: unreachable")));
}

#[test]
fn test_async_binding_needs_a_runtime() {
    let fetch = JsFunction::asynchronous("fetch", |_| async { Ok(Value::Null) });
    let api = JsObject::from_entries([("fetch", Value::Function(fetch))]);
    let err = run_sandbox(SandboxOptions::default().bind("api", api), |session| {
        session.eval("export default 1;")
    })
    .unwrap_err();
    assert!(matches!(err, SandboxError::NoTokioRuntime));
}

#[test]
fn test_engine_limits_are_applied() {
    let config = SandboxConfig::new()
        .memory_limit(32 << 20)
        .max_stack_size(1 << 20);
    let result = eval(
        SandboxOptions::new(config),
        "const deep = (n) => deep(n + 1); let name; try { deep(0); } catch (e) { name = e.name; } export default typeof name;",
    );
    assert_eq!(result.to_json(), json!({ "ok": true, "data": "string" }));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_eval_async_uses_the_current_runtime() {
    let wait = JsFunction::asynchronous("wait", |call| async move {
        let ms = call.arg(0).as_number().unwrap_or(0.0) as u64;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(Value::from(ms as i32))
    });
    let sandbox = Sandbox::new(SandboxOptions::default().bind("wait", wait));
    let result = sandbox
        .eval_async("export default (await wait(5)) + (await wait(10));")
        .await
        .unwrap();
    assert_eq!(result.to_json(), json!({ "ok": true, "data": 15 }));
}
