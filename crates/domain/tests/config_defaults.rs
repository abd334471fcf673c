use ca_domain::config::CoreConfig;

#[test]
fn default_knobs_match_documented_values() {
    let config = CoreConfig::default();
    assert_eq!(config.agent.max_retry_times, 10);
    assert_eq!(config.memory.prune_keep_occurrences, 3);
    assert_eq!(config.memory.prune_max_chars, 60_000);
    assert_eq!(config.runtime.terminal_run_timeout_ms, 30_000);
}

#[test]
fn explicit_overrides_parse() {
    let toml_str = r#"
[llm]
base_url = "http://127.0.0.1:8080/v1"
model = "local-coder"

[runtime]
sandbox_url = "http://127.0.0.1:3210"
terminal_run_timeout_ms = 5000
"#;
    let config: CoreConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(config.llm.base_url, "http://127.0.0.1:8080/v1");
    assert_eq!(config.llm.model, "local-coder");
    assert_eq!(config.runtime.sandbox_url.as_deref(), Some("http://127.0.0.1:3210"));
    assert_eq!(config.runtime.terminal_run_timeout_ms, 5000);
    // Untouched sections keep their defaults.
    assert_eq!(config.memory.repeat_detect_window, 2);
}
