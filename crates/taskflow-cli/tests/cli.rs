use assert_cmd::Command;
use predicates::str::contains;

#[test]
fn help_mentions_binary_name() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("taskflow"));
    cmd.arg("--help").assert().success().stdout(contains("taskflow"));
}

#[test]
fn version_succeeds() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("taskflow"));
    cmd.arg("--version").assert().success();
}

#[test]
fn task_add_then_list_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("taskflow.redb");

    let mut add = Command::new(assert_cmd::cargo::cargo_bin!("taskflow"));
    add.arg("--db-path")
        .arg(&db_path)
        .args(["task", "add", "write the launch memo", "--description", "draft and send"])
        .assert()
        .success()
        .stdout(contains("created task"));

    let mut list = Command::new(assert_cmd::cargo::cargo_bin!("taskflow"));
    list.arg("--db-path")
        .arg(&db_path)
        .args(["task", "list"])
        .assert()
        .success()
        .stdout(contains("write the launch memo"));
}
