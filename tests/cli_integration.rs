use std::fs;
use std::path::{Path, PathBuf};
use std::process::Output;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value, json};
use tempfile::tempdir;
use tenantize::model::Record;
use tenantize::store::database::Database;

struct Fixture {
    root: PathBuf,
    db_path: PathBuf,
}

impl Fixture {
    /// A file-backed store with two seeded collections and a config that
    /// points the backup directory and log file inside `root`.
    fn new(root: &Path) -> Self {
        let db_path = root.join("documents.db");
        let db = Database::create(&db_path).unwrap();
        for (name, count) in [("entries", 25), ("treatments", 8)] {
            let collection = db.collection(name).unwrap();
            for i in 0..count {
                let doc = json!({"name": format!("{name} {i}"), "nested": {"b": 2, "a": 1}});
                collection
                    .insert(&Record::new(
                        format!("{i:04}"),
                        doc.as_object().unwrap().clone(),
                    ))
                    .unwrap();
            }
        }
        db.close().unwrap();

        fs::write(
            root.join("tenantize.yaml"),
            "collections: [entries, treatments]\nbatch_size: 10\nbatch_interval_ms: 0\n",
        )
        .unwrap();

        Self {
            root: root.to_path_buf(),
            db_path,
        }
    }

    fn uri(&self) -> String {
        format!("sqlite://{}", self.db_path.display())
    }

    fn command(&self, args: &[&str]) -> Command {
        let binary = assert_cmd::cargo::cargo_bin!("tenantize");
        let mut cmd = Command::new(binary);
        cmd.current_dir(&self.root)
            .env("NO_COLOR", "1")
            .env("TENANTIZE_DATABASE_URI", self.uri())
            .arg("--config")
            .arg("tenantize.yaml")
            .args(args);
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.command(args).output().expect("tenantize executes")
    }

    fn run_json(&self, args: &[&str]) -> Value {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "tenantize {:?} failed:\nstdout:\n{}\nstderr:\n{}",
            args,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).expect("valid json stdout")
    }

    fn untagged(&self, collection: &str) -> u64 {
        let db = Database::connect(&self.uri()).unwrap();
        let count = db
            .collection(collection)
            .unwrap()
            .count_missing("tenantId")
            .unwrap();
        db.close().unwrap();
        count
    }
}

#[test]
fn migrate_then_rollback_restores_untagged_records() {
    let dir = tempdir().unwrap();
    let fixture = Fixture::new(dir.path());

    let report = fixture.run_json(&["--force", "migrate"]);
    assert_eq!(report["dry_run"], false);
    assert_eq!(report["collections"][0]["collection"], "entries");
    assert_eq!(report["collections"][0]["archived"], 25);
    assert_eq!(report["collections"][0]["tagged"], 25);
    assert_eq!(report["collections"][1]["phase"], "indexed");
    assert!(report["tenant_id"].as_str().unwrap().len() == 36);
    assert_eq!(fixture.untagged("entries"), 0);
    assert!(dir.path().join("backup").join("entries.jsonl").is_file());

    let rollback = fixture.run_json(&["--force", "rollback"]);
    assert_eq!(rollback["collections"][0]["status"], "restored");
    assert_eq!(rollback["collections"][0]["entries"], 25);
    assert_eq!(rollback["manifest_cleared"], true);
    assert_eq!(fixture.untagged("entries"), 25);
    assert_eq!(fixture.untagged("treatments"), 8);
}

#[test]
fn migrate_is_the_default_verb() {
    let dir = tempdir().unwrap();
    let fixture = Fixture::new(dir.path());

    let report = fixture.run_json(&["--force"]);
    assert_eq!(report["collections"].as_array().unwrap().len(), 2);
    assert_eq!(fixture.untagged("treatments"), 0);
}

#[test]
fn dry_run_reports_without_writing() {
    let dir = tempdir().unwrap();
    let fixture = Fixture::new(dir.path());

    let report = fixture.run_json(&["--dry-run"]);
    assert_eq!(report["dry_run"], true);
    assert_eq!(report["collections"][0]["tagged"], 25);
    assert!(!dir.path().join("backup").exists());
    assert_eq!(fixture.untagged("entries"), 25);
}

#[test]
fn unreachable_database_exits_with_connectivity_code() {
    let dir = tempdir().unwrap();
    let fixture = Fixture::new(dir.path());

    fixture
        .command(&["--force", "migrate"])
        .env("TENANTIZE_DATABASE_URI", "sqlite://does/not/exist.db")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("\"error\":\"connectivity_error\""));
    assert!(!dir.path().join("backup").exists());
}

#[test]
fn unsupported_scheme_is_a_connectivity_error() {
    let dir = tempdir().unwrap();
    let fixture = Fixture::new(dir.path());

    fixture
        .command(&["--force", "status"])
        .env("TENANTIZE_DATABASE_URI", "mongodb://localhost:27017/app")
        .assert()
        .code(2);
}

#[test]
fn declining_the_prompt_cancels_without_changes() {
    let dir = tempdir().unwrap();
    let fixture = Fixture::new(dir.path());

    fixture
        .command(&["migrate"])
        .write_stdin("n\n")
        .assert()
        .code(6)
        .stderr(predicate::str::contains("[y/N]"))
        .stderr(predicate::str::contains("cancelled"));
    assert_eq!(fixture.untagged("entries"), 25);
    assert!(!dir.path().join("backup").exists());
}

#[test]
fn answering_yes_proceeds() {
    let dir = tempdir().unwrap();
    let fixture = Fixture::new(dir.path());

    fixture.command(&["migrate"]).write_stdin("yes\n").assert().success();
    assert_eq!(fixture.untagged("entries"), 0);
}

#[test]
fn rollback_without_archives_exits_incomplete_with_report() {
    let dir = tempdir().unwrap();
    let fixture = Fixture::new(dir.path());

    let output = fixture.run(&["--force", "rollback"]);
    assert_eq!(output.status.code(), Some(4));
    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["collections"][0]["status"], "archive_not_found");
    assert_eq!(report["collections"][1]["status"], "archive_not_found");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("rollback_incomplete"));
}

#[test]
fn corrupt_archive_fails_that_collection_and_keeps_live_data() {
    let dir = tempdir().unwrap();
    let fixture = Fixture::new(dir.path());
    fixture.run_json(&["--force", "migrate"]);

    let archive = dir.path().join("backup").join("entries.jsonl");
    let mut lines: Vec<String> = fs::read_to_string(&archive)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    lines[2] = "{not json".to_string();
    fs::write(&archive, lines.join("\n")).unwrap();

    let output = fixture.run(&["--force", "rollback"]);
    assert_eq!(output.status.code(), Some(4));
    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["collections"][0]["status"], "failed");
    assert!(
        report["collections"][0]["detail"]
            .as_str()
            .unwrap()
            .contains("line 3")
    );
    assert_eq!(report["collections"][1]["status"], "restored");
    assert_eq!(fixture.untagged("entries"), 0);
    assert_eq!(fixture.untagged("treatments"), 8);
}

#[test]
fn invalid_batch_flag_is_ignored_with_warning() {
    let dir = tempdir().unwrap();
    let fixture = Fixture::new(dir.path());

    fixture
        .command(&["--force", "--batch=abc", "migrate"])
        .assert()
        .success()
        .stderr(predicate::str::contains("ignoring --batch=abc"));
    assert_eq!(fixture.untagged("entries"), 0);
}

#[test]
fn tenant_flag_sets_the_tenant_and_rejects_garbage() {
    let dir = tempdir().unwrap();
    let fixture = Fixture::new(dir.path());

    fixture
        .command(&["--force", "--tenant", "nope", "migrate"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid_config"));

    let tenant = "1b4e28ba-2fa1-11d2-883f-0016d3cca427";
    let report = fixture.run_json(&["--force", "--tenant", tenant, "migrate"]);
    assert_eq!(report["tenant_id"], tenant);
}

#[test]
fn status_reflects_progress() {
    let dir = tempdir().unwrap();
    let fixture = Fixture::new(dir.path());

    let before = fixture.run_json(&["status"]);
    assert!(before.get("manifest").is_none());
    assert_eq!(before["collections"][0]["untagged"], 25);
    assert_eq!(before["collections"][0]["index_built"], false);

    fixture.run_json(&["--force", "migrate"]);
    let after = fixture.run_json(&["status"]);
    assert_eq!(after["collections"][0]["tagged"], 25);
    assert_eq!(after["collections"][0]["archive_entries"], 25);
    assert_eq!(after["collections"][0]["index_built"], true);
    assert_eq!(after["collections"][0]["phase"], "indexed");
}

#[test]
fn cleanup_removes_archives() {
    let dir = tempdir().unwrap();
    let fixture = Fixture::new(dir.path());
    fixture.run_json(&["--force", "migrate"]);

    let report = fixture.run_json(&["--force", "cleanup"]);
    assert_eq!(report["purged"], json!(["entries", "treatments"]));
    assert_eq!(report["manifest_cleared"], true);
    assert!(!dir.path().join("backup").join("entries.jsonl").exists());
}

#[test]
fn pretty_output_and_progress_log() {
    let dir = tempdir().unwrap();
    let fixture = Fixture::new(dir.path());

    fixture
        .command(&["--force", "--pretty", "migrate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tenantize migrate"))
        .stdout(predicate::str::contains("entries"));

    let log = fs::read_to_string(dir.path().join("logs").join("migration.log")).unwrap();
    assert!(log.lines().any(|l| l.contains("INFO  entries/backup: backup complete: 25")));
    assert!(log.lines().any(|l| l.contains("entries/tag: tag complete: 25 records updated")));
    assert!(log.lines().all(|l| l.starts_with('[')));
}

#[test]
fn minimal_output_is_key_value() {
    let dir = tempdir().unwrap();
    let fixture = Fixture::new(dir.path());

    fixture
        .command(&["--force", "--format", "minimal", "migrate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("entries phase=indexed archived=25 tagged=25"));
}
