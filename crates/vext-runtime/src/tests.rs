//! Tests for the Lua execution context, sandbox attribution, and host bindings.

use std::time::Duration;

use tempfile::tempdir;

use super::{
    create_runtime, DebugLevel, HostContext, HostMessageLevel, Lua53Runtime, RuntimeOptions,
    SandboxLimits, ScriptError, ScriptRuntime, ScriptValue, ScriptVersion,
    SANDBOX_CONTEXT_CANCELLED_REASON_CODE, SANDBOX_MEMORY_EXCEEDED_REASON_CODE,
    SANDBOX_TIME_EXCEEDED_REASON_CODE,
};

fn runtime_with_limits(limits: SandboxLimits) -> Lua53Runtime {
    Lua53Runtime::new(RuntimeOptions {
        limits,
        ..RuntimeOptions::default()
    })
    .expect("create runtime")
}

fn memory_limited(bytes: usize) -> Lua53Runtime {
    runtime_with_limits(SandboxLimits {
        max_time: None,
        max_memory_bytes: Some(bytes),
    })
}

fn time_limited(limit: Duration) -> Lua53Runtime {
    runtime_with_limits(SandboxLimits {
        max_time: Some(limit),
        max_memory_bytes: None,
    })
}

#[test]
fn unit_script_version_resolves_file_and_manifest_tags() {
    assert_eq!(
        ScriptVersion::from_file_tags("53", "lua"),
        Some(ScriptVersion::Lua53)
    );
    assert_eq!(ScriptVersion::from_file_tags("54", "lua"), None);
    assert_eq!(ScriptVersion::from_file_tags("53", "LUA"), None);
    assert_eq!(
        ScriptVersion::from_manifest("Lua", "5.3"),
        Some(ScriptVersion::Lua53)
    );
    assert_eq!(ScriptVersion::from_manifest("lua", "5.3"), None);
    assert_eq!(ScriptVersion::Lua53.implementation_version(), "5.3.6");
}

#[test]
fn functional_call_function_converts_supported_return_shapes() {
    let mut runtime = create_runtime(ScriptVersion::Lua53, RuntimeOptions::default())
        .expect("create runtime");
    runtime
        .load_source(
            "shapes",
            r#"
function give_int() return 7 end
function give_float() return 3.0 end
function give_bool() return true end
function give_string() return "hello" end
function give_map() return { a = "1", b = "2" } end
function give_nothing() end
"#,
        )
        .expect("load shapes");

    assert_eq!(
        runtime.call_function("give_int").expect("int"),
        Some(ScriptValue::Int(7))
    );
    assert_eq!(
        runtime.call_function("give_float").expect("float"),
        Some(ScriptValue::Int(3))
    );
    assert_eq!(
        runtime.call_function("give_bool").expect("bool"),
        Some(ScriptValue::Bool(true))
    );
    assert_eq!(
        runtime.call_function("give_string").expect("string"),
        Some(ScriptValue::String("hello".to_string()))
    );
    let Some(ScriptValue::Map(map)) = runtime.call_function("give_map").expect("map") else {
        panic!("expected map return");
    };
    assert_eq!(map.get("a").map(String::as_str), Some("1"));
    assert_eq!(map.len(), 2);
    assert_eq!(runtime.call_function("give_nothing").expect("nil"), None);
    assert!(runtime.function_exists("give_int"));
    assert!(!runtime.function_exists("missing"));
}

#[test]
fn regression_call_function_rejects_unsupported_return_shapes() {
    let mut runtime = runtime_with_limits(SandboxLimits::default());
    runtime
        .load_source(
            "bad",
            r#"
function give_function() return print end
function give_nested() return { a = { } } end
function give_fraction() return 1.5 end
"#,
        )
        .expect("load bad shapes");
    for name in ["give_function", "give_nested", "give_fraction"] {
        let error = runtime.call_function(name).expect_err("bad data");
        assert!(matches!(error, ScriptError::BadReturn { .. }), "{name}: {error}");
        assert_eq!(error.category(), "script");
    }
}

#[test]
fn functional_script_errors_are_script_attributed() {
    let mut runtime = runtime_with_limits(SandboxLimits::default());
    runtime
        .load_source("raise", "function boom() error('kaboom') end")
        .expect("load");
    let error = runtime.call_function("boom").expect_err("script error");
    assert!(matches!(error, ScriptError::Runtime { .. }));
    assert!(error.to_string().starts_with("Lua runtime error: "));
    assert!(error.to_string().contains("kaboom"));
    assert!(!runtime.is_cancelled());
}

#[test]
fn functional_time_budget_cancels_infinite_loop() {
    let mut runtime = time_limited(Duration::from_millis(50));
    runtime
        .load_source("spin", "function spin() while true do end end")
        .expect("load");
    let error = runtime.call_function("spin").expect_err("time limit");
    let ScriptError::Sandbox(sandbox) = &error else {
        panic!("expected sandbox error, got {error}");
    };
    assert_eq!(sandbox.reason_code, SANDBOX_TIME_EXCEEDED_REASON_CODE);
    assert_eq!(error.category(), "sandbox");
    assert!(runtime.is_cancelled());
    assert!(runtime.elapsed() >= Duration::from_millis(50));
}

#[test]
fn regression_pcall_cannot_swallow_time_cancellation() {
    let mut runtime = time_limited(Duration::from_millis(50));
    runtime
        .load_source(
            "mask",
            r#"
function masked()
  local ok = pcall(function() while true do end end)
  error("benign looking failure")
end
"#,
        )
        .expect("load");
    let error = runtime.call_function("masked").expect_err("time limit");
    assert!(error.is_sandbox(), "expected sandbox attribution, got {error}");
}

#[test]
fn functional_memory_budget_is_sandbox_attributed() {
    let mut runtime = memory_limited(2 * 1_048_576);
    runtime
        .load_source(
            "hog",
            r#"
function hog()
  local t = {}
  for i = 1, 10000000 do t[i] = string.rep("x", 64) .. i end
  return 1
end
"#,
        )
        .expect("load");
    let error = runtime.call_function("hog").expect_err("memory limit");
    let ScriptError::Sandbox(sandbox) = &error else {
        panic!("expected sandbox error, got {error}");
    };
    assert_eq!(sandbox.reason_code, SANDBOX_MEMORY_EXCEEDED_REASON_CODE);
}

#[test]
fn regression_try_catch_around_allocation_still_reports_sandbox() {
    let mut runtime = memory_limited(2 * 1_048_576);
    runtime
        .load_source(
            "hog",
            r#"
function sneaky()
  local ok, err = pcall(function()
    local t = {}
    for i = 1, 10000000 do t[i] = string.rep("y", 64) .. i end
  end)
  if not ok then error("script decided to fail: " .. tostring(err)) end
  return 1
end
"#,
        )
        .expect("load");
    let error = runtime.call_function("sneaky").expect_err("memory limit");
    assert!(error.is_sandbox(), "expected sandbox attribution, got {error}");

    let mut runtime = memory_limited(2 * 1_048_576);
    runtime
        .load_source(
            "hog",
            r#"
function sneaky_coroutine()
  local co = coroutine.create(function()
    local t = {}
    for i = 1, 10000000 do t[i] = string.rep("z", 64) .. i end
  end)
  local ok = coroutine.resume(co)
  return 1
end
"#,
        )
        .expect("load");
    let error = runtime
        .call_function("sneaky_coroutine")
        .expect_err("memory limit");
    assert!(error.is_sandbox(), "expected sandbox attribution, got {error}");
}

#[test]
fn regression_script_raised_memory_message_stays_script_attributed() {
    let mut runtime = memory_limited(64 * 1_048_576);
    runtime
        .load_source(
            "forged",
            r#"
function caught()
  local ok, err = pcall(error, "not enough memory")
  local ok2, err2 = pcall(function() error("not enough memory", 0) end)
  local ok3, err3 = xpcall(error, function(e) return e end, "not enough memory")
  if ok or ok2 or ok3 then return "unexpected success" end
  return err .. "|" .. err2 .. "|" .. err3
end
function rethrown()
  local ok, err = pcall(error, "not enough memory")
  error(err, 0)
end
"#,
        )
        .expect("load");
    assert_eq!(
        runtime.call_function("caught").expect("script-level failure"),
        Some(ScriptValue::String(
            "not enough memory|not enough memory|not enough memory".to_string()
        ))
    );
    assert!(!runtime.is_cancelled());

    let error = runtime.call_function("rethrown").expect_err("script error");
    assert!(!error.is_sandbox(), "expected script attribution, got {error}");
    assert_eq!(error.category(), "script");
    assert!(!runtime.is_cancelled());
}

#[test]
fn regression_cancelled_context_refuses_further_calls() {
    let mut runtime = time_limited(Duration::from_millis(20));
    runtime
        .load_source(
            "spin",
            "function spin() while true do end end\nfunction ok() return 1 end",
        )
        .expect("load");
    runtime.call_function("spin").expect_err("time limit");
    let error = runtime.call_function("ok").expect_err("cancelled");
    let ScriptError::Sandbox(sandbox) = &error else {
        panic!("expected sandbox error, got {error}");
    };
    assert_eq!(sandbox.reason_code, SANDBOX_CONTEXT_CANCELLED_REASON_CODE);
}

#[test]
fn functional_host_bindings_expose_caller_context_and_messages() {
    let mut host = HostContext::default();
    host.vars.insert("user".to_string(), "alice".to_string());
    host.vars.insert("port".to_string(), "ssl:1666".to_string());
    host.argv = vec!["-c".to_string(), "main".to_string()];
    let mut runtime = Lua53Runtime::new(RuntimeOptions {
        host,
        ..RuntimeOptions::default()
    })
    .expect("create runtime");
    runtime
        .load_source(
            "vars",
            r#"
local Client = Helix.Core.Client
function describe()
  Client.ClientMsg("hook " .. Client.GetVar("hook") .. " func " .. Client.GetVar("func"))
  Client.ClientError("argc " .. Client.GetVar("argc"))
  return {
    user = Client.GetVar("user"),
    port = Client.GetVar("port"),
    first = Client.GetVar("argv")[1],
    missing = tostring(Client.GetVar("nope")),
    pass = tostring(Client.Action.PASS),
  }
end
"#,
        )
        .expect("load");
    runtime.set_call_context("pre-user-submit", Some("user-submit"));
    let Some(ScriptValue::Map(map)) = runtime.call_function("describe").expect("call") else {
        panic!("expected map");
    };
    assert_eq!(map["user"], "alice");
    assert_eq!(map["port"], "ssl:1666");
    assert_eq!(map["first"], "-c");
    assert_eq!(map["missing"], "nil");
    assert_eq!(map["pass"], "1");

    let messages = runtime.take_messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].level, HostMessageLevel::Info);
    assert_eq!(messages[0].text, "hook pre-user-submit func user-submit");
    assert_eq!(messages[1].level, HostMessageLevel::Error);
    assert_eq!(messages[1].text, "argc 2");
    assert!(runtime.take_messages().is_empty());
}

#[test]
fn regression_disabled_extension_binding_refuses_activation() {
    let mut runtime = runtime_with_limits(SandboxLimits::default());
    runtime
        .load_source(
            "guard",
            r#"
function activate() return Helix.Core.Client.EnableExtensions() end
function self_disable() Helix.Core.Client.DisableExtensionBinding() return true end
"#,
        )
        .expect("load");
    assert_eq!(
        runtime.call_function("activate").expect("enabled"),
        Some(ScriptValue::Bool(true))
    );
    runtime.call_function("self_disable").expect("disable");
    assert!(!runtime.extension_binding_enabled());
    let error = runtime.call_function("activate").expect_err("disabled");
    assert!(error.to_string().contains("extension loading is disabled"));
}

#[test]
fn regression_unsupported_debug_level_is_rejected() {
    let error = Lua53Runtime::new(RuntimeOptions {
        debug_level: DebugLevel::CrystalBall,
        ..RuntimeOptions::default()
    })
    .err()
    .expect("crystal ball unsupported");
    assert!(matches!(error, ScriptError::UnsupportedDebugLevel { .. }));
    assert_eq!(error.category(), "input");
}

#[test]
fn integration_tracing_mode_logs_executed_lines() {
    let temp = tempdir().expect("tempdir");
    let script = temp.path().join("trace.53.lua");
    std::fs::write(&script, "function traced()\n  local x = 1\n  return x\nend\n")
        .expect("write script");
    let trace_dir = temp.path().join("logs");
    let mut runtime = Lua53Runtime::new(RuntimeOptions {
        debug_level: DebugLevel::Tracing,
        trace_dir: trace_dir.clone(),
        context_id: "ext-7".to_string(),
        ..RuntimeOptions::default()
    })
    .expect("create runtime");
    runtime.load_file(&script).expect("load script");
    assert_eq!(
        runtime.call_function("traced").expect("call"),
        Some(ScriptValue::Int(1))
    );

    let raw = std::fs::read_to_string(trace_dir.join(super::DEBUG_TRACE_FILE_NAME))
        .expect("read trace");
    assert!(raw.contains(" ext-7 Start of script"));
    assert!(raw.contains(" ext-7 End of script"));
    assert!(raw.contains("local x = 1"));
    assert!(raw.contains(&script.display().to_string()));
}

#[test]
fn regression_load_file_reports_missing_script_as_input_error() {
    let temp = tempdir().expect("tempdir");
    let mut runtime = runtime_with_limits(SandboxLimits::default());
    let error = runtime
        .load_file(&temp.path().join("missing.53.lua"))
        .expect_err("missing file");
    assert_eq!(error.category(), "input");
}
