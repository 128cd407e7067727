use codemode_runtime::{
    filter_sensitive_data, providers, ExecuteOptions, ExecutionContext, ExecutionRuntime,
    PluginRegistry, PrivacyLayer, ProviderPlugin, RuntimeConfig,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::fs;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn marina() -> ExecutionRuntime {
    ExecutionRuntime::new(RuntimeConfig::default(), providers::marina_plugins())
}

#[tokio::test]
async fn forbidden_code_never_runs() {
    let mut rt = marina();
    let out = rt
        .run("print('hi')\nvessels = loadTool('vessel', 'vessel_tracking')\nimport subprocess")
        .await;

    assert!(!out.success);
    assert_eq!(out.stdout, "");
    assert!(out.tools_used.is_empty());
    assert!(out.stderr.starts_with("ValidationRejected"), "{}", out.stderr);
    assert_eq!(out.tokens_saved, 0);
}

#[tokio::test]
async fn result_variable_is_returned() {
    let mut rt = marina();
    let out = rt.run("result = 2 + 2").await;

    assert!(out.success, "{}", out.stderr);
    assert_eq!(out.result, Some(json!(4)));
    assert!(out.tools_used.is_empty());

    let out = rt.run("x = {'a': [1, 2.5, None, True]}\nresult = x").await;
    assert_eq!(out.result, Some(json!({"a": [1, 2.5, null, true]})));
}

#[tokio::test]
async fn missing_result_is_not_an_error() {
    let mut rt = marina();
    let out = rt.run("total = 0\nfor i in range(3):\n    total += i\nprint(total)").await;

    assert!(out.success, "{}", out.stderr);
    assert_eq!(out.result, None);
    assert_eq!(out.stdout, "3\n");
}

#[test_log::test(tokio::test)]
async fn runaway_loop_hits_deadline() {
    let mut config = RuntimeConfig::default();
    config.sandbox = config.sandbox.with_timeout(Duration::from_millis(300));
    let mut rt = ExecutionRuntime::new(config, providers::marina_plugins());

    let started = Instant::now();
    let out = rt.run("print('spinning')\nwhile True:\n    pass").await;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!out.success);
    assert!(out.stderr.contains("SandboxTimeoutError"), "{}", out.stderr);
    assert_eq!(out.stdout, "spinning\n");
}

#[tokio::test]
async fn numeric_literals_survive_privacy() {
    let mut rt = marina();

    let out = rt.run("result = 1700000000").await;
    assert!(out.success, "{}", out.stderr);
    assert_eq!(out.result, Some(json!(1700000000)));

    let out = rt.run("result = 3.1415926535").await;
    assert!(out.success, "{}", out.stderr);
    assert_eq!(out.result, Some(json!(3.1415926535)));

    let out = rt.run("contact = 'dana@dock.io'\nresult = [contact, 4155550142]").await;
    assert!(out.success, "{}", out.stderr);
    let values = out.result.unwrap();
    assert!(values[0].as_str().unwrap().starts_with("[EMAIL_"));
    assert_eq!(values[1], json!(4155550142i64));
}

#[tokio::test]
async fn oversized_range_raises_instead_of_crashing() {
    let mut rt = marina();
    let out = rt.run("result = len(range(-1, 9223372036854775807))").await;
    assert!(!out.success);
    assert!(out.stderr.contains("OverflowError"), "{}", out.stderr);

    let code = "\
try:
    len(range(-1, 9223372036854775807))
except OverflowError:
    result = 'too long'
";
    assert_eq!(rt.run(code).await.result, Some(json!("too long")));
}

#[tokio::test]
async fn failed_runs_keep_successful_loads() {
    let mut rt = marina();
    let out = rt
        .run("t = loadTool('vessel', 'vessel_tracking')\nraise ValueError('late failure')")
        .await;

    assert!(!out.success);
    assert_eq!(out.tools_used, vec!["vessel/vessel_tracking"]);
    assert_eq!(out.tokens_saved, 0);
    assert!(out.stderr.contains("ValueError: late failure"), "{}", out.stderr);
}

#[tokio::test]
async fn timed_out_runs_keep_successful_loads() {
    let mut rt = marina();
    let opts = ExecuteOptions::default().with_timeout(Duration::from_millis(200));
    let out = rt
        .execute_with(
            "t = loadTool('vessel', 'vessel_tracking')\nwhile True:\n    pass",
            opts,
        )
        .await;

    assert!(!out.success);
    assert!(out.stderr.contains("SandboxTimeoutError"), "{}", out.stderr);
    assert_eq!(out.tools_used, vec!["vessel/vessel_tracking"]);
    assert_eq!(out.tokens_saved, 0);
}

#[tokio::test]
async fn per_call_timeout_overrides_config() {
    let mut rt = marina();
    let opts = ExecuteOptions::default().with_timeout(Duration::from_millis(150));
    let out = rt.execute_with("while True:\n    pass", opts).await;

    assert!(!out.success);
    assert!(out.stderr.contains("SandboxTimeoutError"));
}

#[tokio::test]
async fn searching_does_not_load() {
    let mut rt = marina();
    let out = rt
        .run("hits = searchTools('vessel')\nresult = [t['name'] for t in hits]")
        .await;

    assert!(out.success, "{}", out.stderr);
    assert_eq!(out.result, Some(json!(["vessel_tracking"])));
    assert!(out.tools_used.is_empty());
    assert_eq!(out.tokens_saved, 0);
}

#[tokio::test]
async fn loaded_tools_are_recorded_once() {
    let mut rt = marina();
    let code = "\
track = loadTool('vessel', 'vessel_tracking')
again = loadTool('vessel', 'vessel_tracking')
berths = loadTool('berth', 'berth_availability')
slips = berths(min_length_m=20)
result = {'moving': len([v for v in track() if v['speed_knots'] > 0]), 'open': len(slips)}
";
    let out = rt.run(code).await;

    assert!(out.success, "{}", out.stderr);
    assert_eq!(out.result, Some(json!({"moving": 2, "open": 1})));
    assert_eq!(
        out.tools_used,
        vec!["vessel/vessel_tracking", "berth/berth_availability"]
    );
    assert!(out.tokens_saved > 0);
}

#[tokio::test]
async fn tool_failures_are_catchable() {
    let mut rt = marina();
    let code = "\
reserve = loadTool('berth', 'berth_reservation')
try:
    reserve(berth='A-01', nights=2)
    result = 'booked'
except Exception as e:
    result = 'refused'
";
    let out = rt.run(code).await;

    assert!(out.success, "{}", out.stderr);
    assert_eq!(out.result, Some(json!("refused")));
}

#[tokio::test]
async fn unknown_tool_fails_execution() {
    let mut rt = marina();
    let out = rt.run("print('looking')\nloadTool('vessel', 'teleport')").await;

    assert!(!out.success);
    assert_eq!(out.stdout, "looking\n");
    assert!(out.stderr.contains("ToolNotFound"), "{}", out.stderr);
    assert!(out.tools_used.is_empty());
}

#[tokio::test]
async fn tool_output_is_scrubbed_under_privacy() {
    let mut rt = marina();
    let code = "info = loadTool('port', 'port_info')()\nresult = info";
    let out = rt.run(code).await;

    assert!(out.success, "{}", out.stderr);
    let info = out.result.unwrap();
    assert_eq!(info["wifi_password"], json!("[REDACTED]"));
    let email = info["harbormaster"]["email"].as_str().unwrap();
    assert!(email.starts_with("[EMAIL_"), "{}", email);
    assert!(!email.contains("harbormaster@"));

    let out = rt
        .execute_with(code, ExecuteOptions::default().preserve_privacy(false))
        .await;
    let info = out.result.unwrap();
    assert_eq!(info["wifi_password"], json!("saltwater"));
    assert_eq!(
        info["harbormaster"]["email"],
        json!("harbormaster@pier39marina.example")
    );
}

#[tokio::test]
async fn caller_context_is_visible_to_code() {
    let mut rt = marina();
    let ctx = ExecutionContext::new().with_variable("berth_id", json!("B-07"));
    let code = "reserve = loadTool('berth', 'berth_reservation')\nresult = reserve(berth=berth_id, nights=3)['total']";
    let out = rt.execute(code, Some(ctx), true, true).await;

    assert!(out.success, "{}", out.stderr);
    assert_eq!(out.result, Some(json!(18.0 * 4.25 * 3.0)));
}

#[test]
fn pii_round_trips() {
    let privacy = PrivacyLayer::new();
    let text = "Skipper dana@dock.io, cell 415-555-0142, card 4111 1111 1111 1111.";
    let (tokenized, tokens) = privacy.tokenize_pii(text, false);

    assert!(!tokens.is_empty());
    for secret in ["dana@dock.io", "415-555-0142", "4111 1111 1111 1111"] {
        assert!(!tokenized.contains(secret), "{} leaked", secret);
    }
    assert_eq!(privacy.detokenize(&tokenized), text);

    let (again, _) = privacy.tokenize_pii(text, false);
    assert_eq!(again, tokenized);
}

#[test]
fn sensitive_keys_are_redacted() {
    let filtered = filter_sensitive_data(&json!({
        "password": "abc",
        "profile": {"api_key": "xyz", "name": "ok"}
    }));
    assert_eq!(
        filtered,
        json!({"password": "[REDACTED]", "profile": {"api_key": "[REDACTED]", "name": "ok"}})
    );
}

#[tokio::test]
async fn session_survives_snapshot_and_restore() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state").join("session.json");

    let mut first = marina();
    assert!(first.run("saveState('visits', 2)").await.success);
    assert!(first.run("saveState('contact', 'dana@dock.io')").await.success);
    first.snapshot(&path).unwrap();

    let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["session_state"]["contact"], json!("dana@dock.io"));
    assert_eq!(raw["execution_history"].as_array().map(Vec::len), Some(2));

    let mut second = marina();
    second.restore(&path).unwrap();
    let out = second.run("result = loadState('visits') + 1").await;
    assert_eq!(out.result, Some(json!(3)));
    assert_eq!(second.history().len(), 1);
}

#[tokio::test]
async fn on_disk_manifests_resolve_against_plugins() {
    let dir = TempDir::new().unwrap();
    let weather = dir.path().join("weather");
    fs::create_dir_all(&weather).unwrap();
    fs::write(weather.join("provider.toml"), "category = \"environment\"\n").unwrap();
    fs::write(
        weather.join("tide_table.toml"),
        "description = \"Tide heights for a station\"\n[parameters]\nstation = \"string\"\n",
    )
    .unwrap();
    fs::write(
        weather.join("wind.toml"),
        "description = \"Wind forecast\"\n",
    )
    .unwrap();

    let plugins = providers::marina_plugins().with(
        ProviderPlugin::new("weather").entry("tide_table", |params| {
            Ok(json!({"station": params["station"], "high_m": 1.8}))
        }),
    );
    let mut config = RuntimeConfig::default();
    config.tools.root = Some(dir.path().to_path_buf());
    let mut rt = ExecutionRuntime::new(config, plugins);

    assert_eq!(
        rt.loader().list_providers(),
        vec!["weather", "vessel", "port", "berth"]
    );

    let code = "\
hits = searchTools('tide', category='environment')
tide = loadTool(hits[0]['provider'], hits[0]['name'])
result = tide(station='SF')['high_m']
";
    let out = rt.run(code).await;
    assert!(out.success, "{}", out.stderr);
    assert_eq!(out.result, Some(json!(1.8)));
    assert_eq!(out.tools_used, vec!["weather/tide_table"]);

    // declared on disk but never exported
    let out = rt.run("loadTool('weather', 'wind')").await;
    assert!(!out.success);
    assert!(out.stderr.contains("exports neither"), "{}", out.stderr);
}

#[tokio::test]
async fn empty_registry_still_executes() {
    let mut rt = ExecutionRuntime::new(RuntimeConfig::default(), PluginRegistry::new());
    let out = rt.run("result = listProviders()").await;
    assert_eq!(out.result, Some(json!([])));
}
