use std::fs;

use graphite_bridge::unittest;

const CONFIG: &str = r#"
default_prefix: "prefix."
write:
  template_data:
    site: eu
  rules:
  - match:
      owner: team-X
    template: 'team.{{.labels.owner}}.{{.site}}.{{.labels.__name__}}'
    continue: true
  - match:
      owner: team-Z
    continue: false
"#;

const TESTS: &str = r#"
config_file: bridge.yaml
tests:
- name: templated and default
  input: |
    # TYPE up gauge
    up{owner="team-X"} 1 1000000
  output: |
    prefix.up.owner.team-X 1.000000 1000
    team.team-X.eu.up 1.000000 1000
- name: silenced
  input: |
    up{owner="team-Z"} 1 1000000
  output: ""
- name: wrong expectation
  input: |
    up{owner="team-K"} 2 1000000
  output: |
    prefix.up.owner.team-K 1.000000 1000
"#;

#[test]
fn test_unittest_file_reports_each_case() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("bridge.yaml"), CONFIG).unwrap();
    let test_path = dir.path().join("tests.yaml");
    fs::write(&test_path, TESTS).unwrap();

    let test_file = unittest::load_test_file(&test_path).unwrap();
    let outcomes = unittest::run(&test_file, 0).unwrap();

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].passed(), "{:?}", outcomes[0]);
    assert!(outcomes[1].passed(), "{:?}", outcomes[1]);

    let failed = &outcomes[2];
    assert_eq!(failed.name, "wrong expectation");
    assert_eq!(failed.missing, vec!["prefix.up.owner.team-K 1.000000 1000"]);
    assert_eq!(failed.extra, vec!["prefix.up.owner.team-K 2.000000 1000"]);
}

#[test]
fn test_missing_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let test_path = dir.path().join("tests.yaml");
    fs::write(&test_path, "config_file: absent.yaml\ntests: []\n").unwrap();

    let test_file = unittest::load_test_file(&test_path).unwrap();
    assert!(unittest::run(&test_file, 0).is_err());
}
