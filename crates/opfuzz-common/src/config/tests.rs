use super::*;

#[test]
fn default_config_validates() {
    FuzzConfig::default().validate().unwrap();
}

#[test]
fn parses_partial_document_with_defaults() {
    let cfg = FuzzConfig::from_toml_str(
        r#"
        [backend]
        targets = ["reference"]
        isolation = "thread"

        [generation]
        max_nodes = 5
        assignment = "smallest"

        [campaign]
        time_budget = "30s"
        "#,
    )
    .unwrap();
    cfg.validate().unwrap();
    assert_eq!(cfg.backend.targets, vec!["reference"]);
    assert_eq!(cfg.backend.isolation, IsolationMode::Thread);
    assert_eq!(cfg.generation.max_nodes, 5);
    assert_eq!(cfg.generation.assignment, AssignmentStrategy::Smallest);
    assert_eq!(cfg.campaign.time_budget().unwrap(), Duration::from_secs(30));
    assert_eq!(cfg.compare.rtol, CompareConfig::default().rtol);
}

#[test]
fn unknown_key_fails_fast() {
    let err = FuzzConfig::from_toml_str("[campaign]\ntime_limit = \"1m\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
    assert!(err.to_string().contains("time_limit"), "{err}");
}

#[test]
fn unknown_enum_value_fails_fast() {
    let err = FuzzConfig::from_toml_str("[generation]\nmethod = \"magic\"\n").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn empty_targets_is_missing() {
    let mut cfg = FuzzConfig::default();
    cfg.backend.targets.clear();
    assert!(matches!(cfg.validate(), Err(ConfigError::Missing("backend.targets"))));
}

#[test]
fn unknown_filter_is_rejected() {
    let mut cfg = FuzzConfig::default();
    cfg.filter.active.push("segfault".to_string());
    let err = cfg.validate().unwrap_err();
    assert!(err.to_string().contains("segfault"));
}

#[test]
fn dedup_cannot_be_suppressed() {
    let mut cfg = FuzzConfig::default();
    cfg.filter.suppress = vec!["nan".to_string()];
    assert!(cfg.validate().is_ok());
    cfg.filter.suppress.push("dup".to_string());
    assert!(matches!(cfg.validate(), Err(ConfigError::Invalid { key: "filter.suppress", .. })));
}

#[test]
fn bad_time_budget_is_rejected() {
    let mut cfg = FuzzConfig::default();
    cfg.campaign.time_budget = "soon".to_string();
    assert!(matches!(
        cfg.validate(),
        Err(ConfigError::Invalid { key: "campaign.time_budget", .. })
    ));
}

#[test]
fn inverted_dim_range_is_rejected() {
    let mut cfg = FuzzConfig::default();
    cfg.generation.dim_range = [8, 2];
    assert!(matches!(
        cfg.validate(),
        Err(ConfigError::Invalid { key: "generation.dim_range", .. })
    ));
}

#[test]
fn campaign_name_must_be_plain() {
    let mut cfg = FuzzConfig::default();
    cfg.campaign.name = Some("../escape".to_string());
    assert!(cfg.validate().is_err());
}

#[test]
fn toml_round_trip_preserves_values() {
    let mut cfg = FuzzConfig::default();
    cfg.generation.op_weights.insert("matmul".to_string(), 3.0);
    cfg.campaign.seed = Some(7);
    let text = cfg.to_toml_string().unwrap();
    let back = FuzzConfig::from_toml_str(&text).unwrap();
    assert_eq!(back.generation.op_weights.get("matmul"), Some(&3.0));
    assert_eq!(back.campaign.seed, Some(7));
}

#[test]
fn missing_file_reports_path() {
    let err = FuzzConfig::from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
    assert!(err.to_string().contains("/definitely/not/here.toml"));
}
