use std::time::Duration;
use std::{env, fs};

use permaccel::config::load_config;

#[test]
fn config_file_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("permaccel.toml");

    let toml_content = r#"
batch_threshold = 20
parallel_threshold = 4
optimization_cache_ttl = "10m"
index_cache_ttl = "90s"
enable_prediction = false
prediction_confidence_threshold = 0.9
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) File values are applied, the rest keeps defaults
    let cfg = load_config(Some(&path)).expect("should parse config");
    assert_eq!(cfg.batch_threshold, 20);
    assert_eq!(cfg.parallel_threshold, 4);
    assert_eq!(cfg.optimization_cache_ttl, Duration::from_secs(600));
    assert_eq!(cfg.index_cache_ttl, Duration::from_secs(90));
    assert!(!cfg.enable_prediction);
    assert_eq!(cfg.matrix_cache_ttl, Duration::from_secs(7200));
    assert_eq!(cfg.hot_data_sync_every, 10);

    // 2) Env override wins over file
    unsafe {
        env::set_var("PERMACCEL__BATCH_THRESHOLD", "30");
        env::set_var("PERMACCEL__VALIDATION_DEADLINE", "750ms");
    }
    let cfg_env = load_config(Some(&path)).expect("should parse config with env overrides");
    assert_eq!(cfg_env.batch_threshold, 30);
    assert_eq!(cfg_env.validation_deadline, Duration::from_millis(750));
    unsafe {
        env::remove_var("PERMACCEL__BATCH_THRESHOLD");
        env::remove_var("PERMACCEL__VALIDATION_DEADLINE");
    }

    // 3) Missing file falls back to defaults
    let cfg_missing = load_config(Some(&dir.path().join("absent.toml"))).expect("defaults");
    assert_eq!(cfg_missing.batch_threshold, 10);

    // 4) Invalid values are rejected
    let invalid_path = dir.path().join("invalid.toml");
    fs::write(&invalid_path, "prediction_confidence_threshold = 1.5\n")
        .expect("write invalid toml");
    let err = load_config(Some(&invalid_path)).expect_err("expected validation error");
    assert!(err.to_string().contains("prediction_confidence_threshold"));
}
