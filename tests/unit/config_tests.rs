//! Unit tests for configuration parsing, defaults, and validation.

use std::path::PathBuf;
use std::time::Duration;

use agent_conductor::config::ConductorConfig;
use agent_conductor::orchestrator::hooks::CommandResolver;
use agent_conductor::orchestrator::shell::Platform;
use agent_conductor::orchestrator::OrchestratorOptions;
use agent_conductor::AppError;

fn full_toml() -> &'static str {
    r#"
[agent]
command = "/usr/local/bin/opencode"
args = ["run", "--format", "json", "--print-logs"]
model = "anthropic/claude-sonnet"
working_directory = "/work"
fallback_temp_path = "/scratch"
packaged = true
platform = "darwin"

[timing]
waiting_notice_ms = 750
interrupt_confirm_ms = 50
exit_drain_ms = 100

[completion]
max_continuation_attempts = 5

[attachments]
base_dir = "/var/tmp/att"
max_file_mb = 10
max_session_mb = 20
max_session_age_hours = 2
sweep_interval_secs = 60

[log_watcher]
enabled = true
log_dir = "/logs"
poll_interval_ms = 250
"#
}

#[test]
fn empty_config_uses_defaults() {
    let config = ConductorConfig::from_toml_str("").expect("defaults are valid");

    assert_eq!(config.agent.command, "opencode");
    assert_eq!(config.agent.args, ["run", "--format", "json"]);
    assert!(config.agent.model.is_none());
    assert!(!config.agent.packaged);
    assert_eq!(config.timing.waiting_notice_ms, 500);
    assert_eq!(config.timing.interrupt_confirm_ms, 100);
    assert_eq!(config.completion.max_continuation_attempts, 3);
    assert_eq!(config.attachments.max_file_mb, 100);
    assert_eq!(config.attachments.max_session_mb, 500);
    assert_eq!(config.attachments.max_session_age_hours, 24);
    assert!(config.log_watcher.enabled);
    assert_eq!(config, ConductorConfig::default());
}

#[test]
fn full_config_parses() {
    let config = ConductorConfig::from_toml_str(full_toml()).expect("valid config");

    assert_eq!(config.agent.command, "/usr/local/bin/opencode");
    assert_eq!(config.agent.model.as_deref(), Some("anthropic/claude-sonnet"));
    assert_eq!(config.agent.working_directory, Some(PathBuf::from("/work")));
    assert_eq!(config.platform(), Platform::Macos);
    assert_eq!(config.completion.max_continuation_attempts, 5);
    assert_eq!(config.log_watcher.resolved_log_dir(), Some(PathBuf::from("/logs")));
}

#[test]
fn attachment_limits_convert_to_bytes() {
    let config = ConductorConfig::from_toml_str(full_toml()).expect("valid config");
    let limits = config.attachments.limits();

    assert_eq!(limits.max_file_bytes, 10 * 1024 * 1024);
    assert_eq!(limits.max_session_bytes, 20 * 1024 * 1024);
    assert_eq!(limits.max_session_age, Duration::from_secs(2 * 3600));
    assert_eq!(limits.sweep_interval, Duration::from_secs(60));
}

#[test]
fn orchestrator_options_follow_config() {
    let config = ConductorConfig::from_toml_str(full_toml()).expect("valid config");
    let options = OrchestratorOptions::from_config(&config);

    assert_eq!(options.platform, Platform::Macos);
    assert!(options.packaged);
    assert_eq!(options.temp_path, PathBuf::from("/scratch"));
    assert_eq!(options.model_id.as_deref(), Some("anthropic/claude-sonnet"));
    assert_eq!(options.waiting_notice, Duration::from_millis(750));
    assert_eq!(options.exit_drain, Duration::from_millis(100));
    assert_eq!(options.max_continuation_attempts, 5);
    assert_eq!(options.log_dir, Some(PathBuf::from("/logs")));
    assert_eq!(options.log_poll_interval, Duration::from_millis(250));

    let resolved = options.command.resolve().expect("static command");
    assert_eq!(resolved.program, "/usr/local/bin/opencode");
    assert_eq!(resolved.args.last().map(String::as_str), Some("--print-logs"));
}

#[test]
fn disabled_watcher_has_no_log_dir() {
    let config = ConductorConfig::from_toml_str("[log_watcher]\nenabled = false\nlog_dir = \"/logs\"\n")
        .expect("valid config");
    assert!(OrchestratorOptions::from_config(&config).log_dir.is_none());
}

#[test]
fn invalid_toml_is_a_config_error() {
    let err = ConductorConfig::from_toml_str("[agent\ncommand = 1").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn validation_rejects_bad_values() {
    let cases = [
        ("[agent]\ncommand = \"  \"\n", "agent.command"),
        ("[attachments]\nmax_file_mb = 0\n", "quotas"),
        ("[attachments]\nmax_file_mb = 50\nmax_session_mb = 10\n", "max_file_mb"),
        ("[attachments]\nsweep_interval_secs = 0\n", "sweep_interval_secs"),
        ("[completion]\nmax_continuation_attempts = 0\n", "max_continuation_attempts"),
        ("[log_watcher]\npoll_interval_ms = 0\n", "poll_interval_ms"),
    ];
    for (raw, needle) in cases {
        match ConductorConfig::from_toml_str(raw) {
            Err(AppError::Config(msg)) => assert!(msg.contains(needle), "{msg} should mention {needle}"),
            other => panic!("expected config error for {raw:?}, got {other:?}"),
        }
    }
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("conductor.toml");
    std::fs::write(&path, "[completion]\nmax_continuation_attempts = 7\n").expect("write");

    let config = ConductorConfig::load_from_path(&path).expect("load");
    assert_eq!(config.completion.max_continuation_attempts, 7);

    let err = ConductorConfig::load_from_path(dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
#[serial_test::serial]
fn log_dir_prefers_xdg_data_home() {
    let config = ConductorConfig::default();
    let saved = std::env::var_os("XDG_DATA_HOME");
    std::env::set_var("XDG_DATA_HOME", "/xdg");

    let resolved = config.log_watcher.resolved_log_dir();

    match saved {
        Some(value) => std::env::set_var("XDG_DATA_HOME", value),
        None => std::env::remove_var("XDG_DATA_HOME"),
    }
    assert_eq!(resolved, Some(PathBuf::from("/xdg/opencode/log")));
}

#[test]
#[serial_test::serial]
fn log_dir_falls_back_to_home() {
    let config = ConductorConfig::default();
    let saved_xdg = std::env::var_os("XDG_DATA_HOME");
    let saved_home = std::env::var_os("HOME");
    std::env::remove_var("XDG_DATA_HOME");
    std::env::set_var("HOME", "/home/tester");

    let resolved = config.log_watcher.resolved_log_dir();

    if let Some(value) = saved_xdg {
        std::env::set_var("XDG_DATA_HOME", value);
    }
    match saved_home {
        Some(value) => std::env::set_var("HOME", value),
        None => std::env::remove_var("HOME"),
    }
    assert_eq!(
        resolved,
        Some(PathBuf::from("/home/tester/.local/share/opencode/log"))
    );
}
