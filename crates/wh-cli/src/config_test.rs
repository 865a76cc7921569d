use super::*;

#[test]
fn missing_config_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(dir.path()).unwrap();
    assert_eq!(config.scripts_dir, "scripts");
    assert_eq!(config.threads, 4);
}

#[test]
fn parses_a_minimal_config_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("waphouse.yml"),
        "dataset: analytics\nwrite_dataset: \"{dataset}_scratch\"\nkeep_going: true\n",
    )
    .unwrap();

    let config = Config::load(dir.path()).unwrap();
    assert_eq!(config.dataset.as_deref(), Some("analytics"));
    assert!(config.keep_going);
    assert_eq!(config.resolved_write_dataset("analytics"), "analytics_scratch");
}

#[test]
fn rejects_unknown_fields() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("waphouse.yml"), "bogus_field: 1\n").unwrap();
    assert!(Config::load(dir.path()).is_err());
}
