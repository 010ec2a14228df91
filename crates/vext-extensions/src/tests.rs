//! Tests for discovery, caller data binding, and hook dispatch.

use std::{
    fs,
    path::{Path, PathBuf},
};

use proptest::prelude::*;
use tempfile::tempdir;
use vext_runtime::{SandboxLimits, ScriptVersion};

use super::{
    find_loose_scripts, parse_search_patterns, render_hook_report, script_version_from_file_name,
    CallerData, ClientScriptAction, DiscoveryState, DispatchError, DispatchOptions,
    HookDispatcher,
};

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    fs::create_dir_all(dir).expect("create script dir");
    let path = dir.join(name);
    fs::write(&path, body).expect("write script");
    path
}

fn hook_returning(label: &str, action: &str) -> String {
    format!(
        r#"
local Client = Helix.Core.Client
function H()
  Client.ClientMsg("{label} ran")
  return Client.Action.{action}
end
"#
    )
}

fn caller() -> CallerData {
    CallerData {
        port: "ssl:example.com:1666".to_string(),
        user: "alice".to_string(),
        client: "alice-ws".to_string(),
        host: "build-01".to_string(),
        version: "vext/0.1.0".to_string(),
        charset: "utf8".to_string(),
        language: "en".to_string(),
        cwd: PathBuf::from("/work"),
        ..CallerData::default()
    }
}

fn dispatcher_for(dir: &Path, patterns: &[&str], options: DispatchOptions) -> HookDispatcher {
    let mut dispatcher = HookDispatcher::new(caller(), options);
    let patterns = patterns
        .iter()
        .map(|pattern| pattern.to_string())
        .collect::<Vec<_>>();
    dispatcher
        .load_scripts(&mut DiscoveryState::new(), &patterns, dir, false)
        .expect("load scripts");
    dispatcher
}

fn names(scripts: &[super::DiscoveredScript]) -> Vec<String> {
    scripts
        .iter()
        .map(|script| {
            script
                .path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default()
                .to_string()
        })
        .collect()
}

#[test]
fn unit_script_version_uses_last_two_dot_fields() {
    assert_eq!(
        script_version_from_file_name("check.53.lua"),
        Some(ScriptVersion::Lua53)
    );
    assert_eq!(
        script_version_from_file_name("pre.submit.53.lua"),
        Some(ScriptVersion::Lua53)
    );
    for unknown in ["53.lua", "check.54.lua", "check.53.py", "check.p4-extension", "lua"] {
        assert_eq!(script_version_from_file_name(unknown), None, "{unknown}");
    }
}

#[test]
fn unit_parse_search_patterns_trims_and_drops_empty_elements() {
    assert_eq!(
        parse_search_patterns("  pre.53.lua , ,hooks,/abs/check "),
        vec!["pre.53.lua", "hooks", "/abs/check"]
    );
    assert!(parse_search_patterns(" , ").is_empty());
}

#[test]
fn functional_discovery_sorts_case_insensitively_and_skips_unknown_tags() {
    let temp = tempdir().expect("tempdir");
    for name in ["Beta.53.lua", "alpha.53.lua", "gamma.54.lua", "notes.txt"] {
        write_script(temp.path(), name, "-- empty\n");
    }
    fs::create_dir_all(temp.path().join("dir.53.lua")).expect("create dir");

    let found = find_loose_scripts(
        &mut DiscoveryState::new(),
        &["a".to_string()],
        temp.path(),
        false,
    );
    assert_eq!(names(&found), vec!["alpha.53.lua", "Beta.53.lua"]);
    assert!(found
        .iter()
        .all(|script| script.version == ScriptVersion::Lua53));
}

#[test]
fn functional_discovery_searches_ancestors_only_when_enabled() {
    let temp = tempdir().expect("tempdir");
    write_script(temp.path(), "root.53.lua", "-- root\n");
    let start = temp.path().join("sub/deeper");
    write_script(&start, "local.53.lua", "-- local\n");

    let patterns = vec![".53.lua".to_string()];
    let flat = find_loose_scripts(&mut DiscoveryState::new(), &patterns, &start, false);
    assert_eq!(names(&flat), vec!["local.53.lua"]);

    let recursive = find_loose_scripts(&mut DiscoveryState::new(), &patterns, &start, true);
    let recursive_names = names(&recursive);
    assert_eq!(&recursive_names[..2], ["local.53.lua", "root.53.lua"]);
}

#[test]
fn functional_discovery_handles_absolute_and_separator_patterns() {
    let temp = tempdir().expect("tempdir");
    let hooks = temp.path().join("hooks");
    write_script(&hooks, "only.53.lua", "-- only\n");
    write_script(&hooks, "other.53.lua", "-- other\n");

    let absolute = format!("{}/only", hooks.display());
    let trailing = format!("{}/", hooks.display());
    let found = find_loose_scripts(
        &mut DiscoveryState::new(),
        &[absolute, trailing],
        Path::new("/nonexistent-start"),
        true,
    );
    assert_eq!(names(&found), vec!["only.53.lua"]);

    let relative = find_loose_scripts(
        &mut DiscoveryState::new(),
        &["hooks/other".to_string()],
        temp.path(),
        false,
    );
    assert_eq!(names(&relative), vec!["other.53.lua"]);
}

#[test]
fn regression_discovery_is_idempotent_and_deduplicates() {
    let temp = tempdir().expect("tempdir");
    for name in ["b.53.lua", "A.53.lua", "c.53.lua"] {
        write_script(temp.path(), name, "-- script\n");
    }
    let patterns = vec!["53".to_string(), ".lua".to_string()];

    let mut state = DiscoveryState::new();
    let first = find_loose_scripts(&mut state, &patterns, temp.path(), false);
    let second = find_loose_scripts(&mut state, &patterns, temp.path(), false);
    let fresh = find_loose_scripts(&mut DiscoveryState::new(), &patterns, temp.path(), false);
    assert_eq!(first, second);
    assert_eq!(first, fresh);
    assert_eq!(names(&first), vec!["A.53.lua", "b.53.lua", "c.53.lua"]);
    assert_eq!(state.directories_scanned(), 1);
}

#[test]
fn integration_dispatch_stops_at_first_rejection() {
    let temp = tempdir().expect("tempdir");
    write_script(temp.path(), "a_ext.53.lua", &hook_returning("A", "PASS"));
    write_script(temp.path(), "b_ext.53.lua", &hook_returning("B", "FAIL"));
    write_script(temp.path(), "c_ext.53.lua", &hook_returning("C", "PASS"));

    let mut dispatcher = dispatcher_for(temp.path(), &["_ext"], DispatchOptions::default());
    assert_eq!(dispatcher.len(), 3);
    let outcome = dispatcher.run("H", Some("submit"), false);

    assert_eq!(outcome.action, ClientScriptAction::Fail);
    assert_eq!(outcome.extensions_run, 2);
    let texts = outcome
        .messages
        .iter()
        .map(|message| message.text.as_str())
        .collect::<Vec<_>>();
    assert_eq!(texts, vec!["A ran", "B ran"]);
    match outcome.error.as_ref() {
        Some(DispatchError::Rejected { hook, path }) => {
            assert_eq!(hook, "H");
            assert!(path.ends_with("b_ext.53.lua"), "{path}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let report = render_hook_report(&outcome);
    assert!(report.contains("action=FAIL extensions_run=2"), "{report}");
    assert!(report.contains("command rejected in 'H'"), "{report}");
}

#[test]
fn functional_dispatch_without_callbacks_passes_with_zero_runs() {
    let temp = tempdir().expect("tempdir");
    write_script(temp.path(), "quiet.53.lua", "function Other() return 1 end\n");
    let mut dispatcher = dispatcher_for(temp.path(), &["quiet"], DispatchOptions::default());
    let outcome = dispatcher.run("H", None, false);
    assert_eq!(outcome.action, ClientScriptAction::Pass);
    assert_eq!(outcome.extensions_run, 0);
    assert!(outcome.error.is_none());

    let mut empty = HookDispatcher::new(caller(), DispatchOptions::default());
    assert!(empty.is_empty());
    assert_eq!(empty.run("H", None, false).action, ClientScriptAction::Pass);
}

#[test]
fn regression_replace_is_a_coding_error_on_non_replaceable_hooks() {
    let temp = tempdir().expect("tempdir");
    write_script(temp.path(), "swap.53.lua", &hook_returning("swap", "REPLACE"));
    write_script(temp.path(), "zz_after.53.lua", &hook_returning("after", "PASS"));

    let mut dispatcher = dispatcher_for(temp.path(), &[".53.lua"], DispatchOptions::default());
    let outcome = dispatcher.run("H", None, true);
    assert_eq!(outcome.action, ClientScriptAction::Fail);
    assert_eq!(outcome.extensions_run, 1);
    assert!(matches!(
        outcome.error,
        Some(DispatchError::IllegalReplace { .. })
    ));

    let outcome = dispatcher.run("H", None, false);
    assert_eq!(outcome.action, ClientScriptAction::Replace);
    assert!(outcome.error.is_none());
}

#[test]
fn regression_debug_actions_require_debug_hooks() {
    let temp = tempdir().expect("tempdir");
    write_script(temp.path(), "dbg.53.lua", &hook_returning("dbg", "ABORT"));
    write_script(temp.path(), "dbz_later.53.lua", &hook_returning("later", "PASS"));

    let mut gated = dispatcher_for(temp.path(), &["db"], DispatchOptions::default());
    let outcome = gated.run("H", None, false);
    assert_eq!(outcome.action, ClientScriptAction::Unknown);
    assert_eq!(outcome.extensions_run, 1);
    assert!(matches!(
        outcome.error,
        Some(DispatchError::UnknownAction { value: 4, .. })
    ));

    let mut enabled = dispatcher_for(
        temp.path(),
        &["db"],
        DispatchOptions {
            debug_hooks_enabled: true,
            ..DispatchOptions::default()
        },
    );
    let outcome = enabled.run("H", None, false);
    assert_eq!(outcome.action, ClientScriptAction::Abort);
    assert!(outcome.error.is_none());
}

#[test]
fn regression_missing_return_and_script_errors_are_runtime_failures() {
    let temp = tempdir().expect("tempdir");
    write_script(temp.path(), "silent.53.lua", "function H() end\n");
    let mut dispatcher = dispatcher_for(temp.path(), &["silent"], DispatchOptions::default());
    let outcome = dispatcher.run("H", None, false);
    assert_eq!(outcome.action, ClientScriptAction::Fail);
    let error = outcome.error.expect("no return error");
    assert!(
        error.to_string().ends_with("failed: no return from callback"),
        "{error}"
    );

    write_script(temp.path(), "broken.53.lua", "function H() error('boom') end\n");
    let mut dispatcher = dispatcher_for(temp.path(), &["broken"], DispatchOptions::default());
    let outcome = dispatcher.run("H", None, false);
    let error = outcome.error.expect("runtime failure");
    assert!(matches!(error, DispatchError::RuntimeFailure { .. }));
    assert_eq!(error.category(), "script");
    assert!(error.to_string().contains("Lua runtime error"), "{error}");
    assert!(error.to_string().contains("boom"), "{error}");
}

#[test]
fn regression_non_action_results_are_bad_data() {
    let temp = tempdir().expect("tempdir");
    write_script(temp.path(), "text.53.lua", "function H() return 'yes' end\n");
    write_script(
        temp.path(),
        "nested.53.lua",
        "function H() return { inner = {} } end\n",
    );
    for pattern in ["text", "nested"] {
        let mut dispatcher = dispatcher_for(temp.path(), &[pattern], DispatchOptions::default());
        let outcome = dispatcher.run("H", None, false);
        assert_eq!(outcome.action, ClientScriptAction::Fail);
        assert!(
            matches!(outcome.error, Some(DispatchError::BadData { .. })),
            "{pattern}: {:?}",
            outcome.error
        );
    }
}

#[test]
fn regression_sandbox_error_outranks_script_error_and_bad_data() {
    let temp = tempdir().expect("tempdir");
    write_script(
        temp.path(),
        "hog.53.lua",
        r#"
function H()
  local ok = pcall(function()
    local t = {}
    for i = 1, 10000000 do t[i] = string.rep("x", 64) .. i end
  end)
  if not ok then error("ordinary failure") end
  return "not an action"
end
"#,
    );
    let mut dispatcher = dispatcher_for(
        temp.path(),
        &["hog"],
        DispatchOptions {
            limits: SandboxLimits::from_seconds_and_megabytes(0, 2),
            ..DispatchOptions::default()
        },
    );
    let outcome = dispatcher.run("H", None, false);
    assert_eq!(outcome.action, ClientScriptAction::Fail);
    let error = outcome.error.expect("sandbox error");
    assert!(error.is_sandbox(), "{error}");
    assert_eq!(error.category(), "sandbox");
    assert!(error.to_string().contains("memory limit"), "{error}");
}

#[test]
fn functional_callbacks_observe_caller_data_and_cannot_enable_extensions() {
    let temp = tempdir().expect("tempdir");
    let script = write_script(
        temp.path(),
        "whoami.53.lua",
        r#"
local Client = Helix.Core.Client
function H()
  Client.ClientMsg(Client.GetVar("user") .. "@" .. Client.GetVar("client"))
  Client.ClientMsg(Client.GetVar("func") .. ":" .. Client.GetVar("hook"))
  Client.ClientMsg(Client.GetVar("sourcePath"))
  Client.ClientMsg(tostring(Client.GetVar("argc")))
  local ok = pcall(Client.EnableExtensions)
  if ok then return Client.Action.FAIL end
  return Client.Action.PASS
end
"#,
    );
    let mut dispatcher = HookDispatcher::new(
        CallerData {
            argv: vec!["//depot/...".to_string()],
            ..caller()
        },
        DispatchOptions::default(),
    );
    dispatcher
        .load_script(&script, ScriptVersion::Lua53)
        .expect("load");

    let outcome = dispatcher.run("H", Some("sync"), false);
    assert_eq!(outcome.action, ClientScriptAction::Pass, "{:?}", outcome.error);
    let texts = outcome
        .messages
        .iter()
        .map(|message| message.text.clone())
        .collect::<Vec<_>>();
    assert_eq!(texts[0], "alice@alice-ws");
    assert_eq!(texts[1], "sync:H");
    assert_eq!(texts[2], script.display().to_string());
    assert_eq!(texts[3], "1");
}

fn package_manifest() -> serde_json::Value {
    serde_json::json!({
        "api_version": 20191,
        "manifest_version": 1,
        "default_locale": "en",
        "description": "demo",
        "homepage_url": "https://example.com",
        "key": "7a1c5e2b-3d4f-4a6b-8c9d-0e1f2a3b4c5d",
        "license": "MIT",
        "license_body": "",
        "name": "job-check",
        "namespace": "Acme",
        "version": "1.0",
        "version_name": "one",
        "developer": { "name": "Acme", "url": "https://example.com" },
        "script_runtime": { "language": "Lua", "version": "5.3" },
        "supported_locales": [],
        "compatible_products": ["p4d"]
    })
}

fn write_package(dir: &Path, manifest: &serde_json::Value) {
    fs::create_dir_all(dir).expect("create package");
    fs::write(dir.join("manifest.json"), manifest.to_string()).expect("write manifest");
    fs::write(dir.join("main.lua"), hook_returning("packaged", "PASS")).expect("write main");
}

#[test]
fn integration_load_package_runs_manifest_entry_point() {
    let temp = tempdir().expect("tempdir");
    let package = temp.path().join("job-check");
    write_package(&package, &package_manifest());

    let mut dispatcher = HookDispatcher::new(caller(), DispatchOptions::default());
    dispatcher.load_package(&package).expect("load package");
    assert_eq!(
        dispatcher.extensions()[0].name.as_deref(),
        Some("Acme::job-check")
    );
    let outcome = dispatcher.run("H", None, false);
    assert_eq!(outcome.action, ClientScriptAction::Pass);
    assert_eq!(outcome.extensions_run, 1);

    fs::remove_file(package.join("manifest.json")).expect("remove manifest");
    let error = HookDispatcher::new(caller(), DispatchOptions::default())
        .load_package(&package)
        .expect_err("missing manifest");
    assert_eq!(error.category(), "input");
}

#[test]
fn regression_load_package_refuses_incompatible_product_and_api_version() {
    let temp = tempdir().expect("tempdir");

    let mut swarm_only = package_manifest();
    swarm_only["compatible_products"] = serde_json::json!(["swarm"]);
    let swarm_dir = temp.path().join("swarm-only");
    write_package(&swarm_dir, &swarm_only);

    let mut dispatcher = HookDispatcher::new(caller(), DispatchOptions::default());
    let error = dispatcher
        .load_package(&swarm_dir)
        .expect_err("product mismatch");
    assert!(matches!(error, DispatchError::Package { .. }), "{error}");
    assert!(error.to_string().contains("incompatible with 'p4d'"), "{error}");
    assert_eq!(error.category(), "input");

    let mut future_api = package_manifest();
    future_api["api_version"] = serde_json::json!(7);
    future_api["compatible_products"] = serde_json::json!(["swarm"]);
    let future_dir = temp.path().join("future-api");
    write_package(&future_dir, &future_api);
    assert!(dispatcher.load_package(&future_dir).is_err());

    let mut stale_api = package_manifest();
    stale_api["api_version"] = serde_json::json!(7);
    let stale_dir = temp.path().join("stale-api");
    write_package(&stale_dir, &stale_api);
    let error = dispatcher
        .load_package(&stale_dir)
        .expect_err("unknown api version");
    assert!(error.to_string().contains('7'), "{error}");

    assert!(dispatcher.is_empty());
    let outcome = dispatcher.run("H", None, false);
    assert_eq!(outcome.extensions_run, 0);
    assert!(outcome.messages.is_empty());

    let mut swarm_host = HookDispatcher::new(
        caller(),
        DispatchOptions {
            host_product: "swarm".to_string(),
            ..DispatchOptions::default()
        },
    );
    swarm_host.load_package(&swarm_dir).expect("swarm host accepts");
    assert_eq!(swarm_host.len(), 1);
}

#[test]
#[cfg(unix)]
fn regression_relative_start_dir_still_searches_ancestors() {
    let temp = tempdir().expect("tempdir");
    write_script(temp.path(), "vextupward.53.lua", "-- upward\n");
    let start = temp.path().join("a/b");
    fs::create_dir_all(&start).expect("create start");

    let cwd = std::env::current_dir().expect("cwd");
    let mut relative = PathBuf::new();
    for _ in cwd.components().skip(1) {
        relative.push("..");
    }
    relative.push(start.strip_prefix("/").expect("absolute tempdir"));
    assert!(relative.is_relative());

    let patterns = vec!["vextupward".to_string()];
    let found = find_loose_scripts(&mut DiscoveryState::new(), &patterns, &relative, true);
    assert_eq!(names(&found), vec!["vextupward.53.lua"]);

    let flat = find_loose_scripts(&mut DiscoveryState::new(), &patterns, &relative, false);
    assert!(flat.is_empty());
}

proptest! {
    #[test]
    fn property_parsed_patterns_are_trimmed_and_non_empty(raw in "[ a-z.,/]{0,32}") {
        for pattern in parse_search_patterns(&raw) {
            prop_assert!(!pattern.is_empty());
            prop_assert_eq!(pattern.trim(), pattern.as_str());
            prop_assert!(!pattern.contains(','));
        }
    }
}
