use std::io::Write;

use skein::{builder, FanOut, RefinePolicy, SkeinConfig, SkeinError};

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[orchestration]
max_steps = 12
event_capacity = 32

[fan_out]
concurrency = 3

[refine]
max_iterations = 2
counter_key = "article.rewrites"

[log]
filter = "skein=debug"
ansi = false
with_target = true
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = SkeinConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.orchestration.max_steps, 12);
    assert_eq!(config.orchestration.event_capacity, 32);
    assert_eq!(config.fan_out.concurrency, 3);
    assert_eq!(config.refine.max_iterations, 2);
    assert_eq!(config.refine.counter_key, "article.rewrites");
    assert_eq!(config.log.filter, "skein=debug");
    assert!(!config.log.ansi);
    assert!(config.log.with_target);

    assert_eq!(FanOut::from_config(&config.fan_out).limit(), 3);
    let policy = RefinePolicy::from_config(&config.refine);
    assert_eq!(policy.max_iterations(), 2);
    assert_eq!(policy.counter_key(), "article.rewrites");
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("SKEIN_TEST_MAX_STEPS", "7");
    std::env::set_var("SKEIN_TEST_COUNTER", "loop.count");

    let toml_content = r#"
[orchestration]
max_steps = ${SKEIN_TEST_MAX_STEPS}

[refine]
counter_key = "${SKEIN_TEST_COUNTER}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = SkeinConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.orchestration.max_steps, 7);
    assert_eq!(config.refine.counter_key, "loop.count");

    std::env::remove_var("SKEIN_TEST_MAX_STEPS");
    std::env::remove_var("SKEIN_TEST_COUNTER");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[log]\nansi = false\n").expect("write toml");

    let config = SkeinConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.orchestration.max_steps, 64);
    assert_eq!(config.fan_out.concurrency, 4);
    assert_eq!(config.refine.max_iterations, 3);
    assert_eq!(config.refine.counter_key, "refine.iterations");
    assert!(!config.log.ansi);
}

#[test]
fn test_missing_file_is_reported() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("absent.toml");
    let err = SkeinConfig::load(&path).unwrap_err();
    assert!(matches!(err, SkeinError::ConfigNotFound(_)));
}

#[test]
fn test_invalid_values_are_rejected() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[orchestration]\nmax_steps = 0\n")
        .expect("write toml");
    let err = SkeinConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, SkeinError::Config(_)));

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[fan_out]\nconcurrency = \"many\"\n")
        .expect("write toml");
    assert!(matches!(
        SkeinConfig::load(tmp.path()).unwrap_err(),
        SkeinError::Config(_)
    ));
}

#[test]
fn test_bootstrap_without_file_uses_defaults() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let config = skein::bootstrap(Some(&dir.path().join("skein.toml"))).expect("bootstrap");
    assert_eq!(config.orchestration.max_steps, 64);
}

#[test]
fn test_builder_takes_step_cap_from_config() {
    let config = SkeinConfig::parse("[orchestration]\nmax_steps = 5\n").expect("parse");
    let mut graph = builder::<u32, u32>(&config);
    let echo = graph.add_node(skein_test_utils::FnRunnable::new("echo", |n: u32, _| Ok(n)));
    graph.set_entry(&echo).add_result(&echo);
    let orchestration = graph.build().expect("build");
    assert_eq!(orchestration.max_steps(), 5);
}
