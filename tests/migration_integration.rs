use std::fs;

use serde_json::{Value, json};
use tempfile::tempdir;
use tenantize::config::MigrationConfig;
use tenantize::migration::index::IndexBuilder;
use tenantize::migration::orchestrator::{Orchestrator, RestoreOutcome};
use tenantize::migration::tagger::{TagSettings, TenantTagger};
use tenantize::model::{CollectionDescriptor, Record, TenantId};
use tenantize::progress::ProgressLog;
use tenantize::store::archive::BackupStore;
use tenantize::store::database::Database;

fn record(id: &str, doc: Value) -> Record {
    Record::new(id, doc.as_object().unwrap().clone())
}

#[test]
fn hundred_untagged_records_in_batches_of_ten() {
    let db = Database::open_memory().unwrap();
    let entries = db.collection("entries").unwrap();
    for i in 0..100 {
        entries
            .insert(&record(
                &format!("doc-{i:03}"),
                json!({"name": format!("Test Document {i}"), "value": i}),
            ))
            .unwrap();
    }

    let log = ProgressLog::in_memory();
    let tagger = TenantTagger::new(
        &log,
        TagSettings {
            batch_interval: std::time::Duration::ZERO,
            ..TagSettings::default()
        },
    );
    let tenant = TenantId::generate();

    assert_eq!(tagger.tag_all(&entries, &tenant, 10).unwrap(), 100);
    assert_eq!(entries.count_with_tenant("tenantId", &tenant).unwrap(), 100);
    assert_eq!(tagger.tag_all(&entries, &tenant, 10).unwrap(), 0);

    let builder = IndexBuilder::new(&log, "tenantId");
    assert!(builder.build(&entries));
    assert!(builder.build(&entries));
    assert_eq!(entries.indexes().unwrap().len(), 1);
}

#[test]
fn archive_round_trip_preserves_ids_order_and_content() {
    let dir = tempdir().unwrap();
    let db = Database::open_memory().unwrap();
    let profile = db.collection("profile").unwrap();
    let originals = vec![
        record(
            "zeta",
            json!({
                "store": {"Default": {"dia": 3, "carbratio": [{"time": "00:00", "value": 10}]}},
                "units": "mg/dl"
            }),
        ),
        record(
            "alpha",
            json!({"z": null, "a": [1, 2.5, "three"], "m": {"y": true, "x": false}}),
        ),
        record("mid", json!({"text": "line\nbreak \"quoted\" ünïcode"})),
    ];
    for r in &originals {
        profile.insert(r).unwrap();
    }

    let log = ProgressLog::in_memory();
    let archives = BackupStore::new(dir.path(), &log);
    assert_eq!(archives.dump(&profile).unwrap(), 3);
    assert_eq!(archives.restore(&profile).unwrap(), 3);

    let mut restored = Vec::new();
    profile
        .scan(|r| {
            restored.push(r);
            Ok(())
        })
        .unwrap();
    assert_eq!(restored, originals);

    let keys: Vec<&String> = restored[1].doc.keys().collect();
    assert_eq!(keys, vec!["z", "a", "m"]);

    let first_line = fs::read_to_string(archives.archive_path("profile"))
        .unwrap()
        .lines()
        .next()
        .unwrap()
        .to_string();
    assert!(first_line.starts_with("{\"_id\":\"zeta\""));
}

#[test]
fn full_run_and_rollback_against_a_file_store() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("documents.db");
    let db = Database::create(&db_path).unwrap();
    for name in ["entries", "devicestatus"] {
        let collection = db.collection(name).unwrap();
        for i in 0..15 {
            collection
                .insert(&record(&format!("{i:02}"), json!({"sgv": 100 + i})))
                .unwrap();
        }
    }
    let foreign = TenantId::generate();
    db.collection("entries")
        .unwrap()
        .set_tenant_if_missing("tenantId", &"07".into(), &foreign)
        .unwrap();

    let config = MigrationConfig {
        database_uri: Some(format!("sqlite://{}", db_path.display())),
        collections: ["entries", "devicestatus"]
            .into_iter()
            .map(|c| CollectionDescriptor::new(c).unwrap())
            .collect(),
        batch_size: 4,
        batch_interval_ms: 0,
        backup_dir: dir.path().join("backup"),
        log_file: dir.path().join("migration.log"),
        ..MigrationConfig::default()
    };
    let log = ProgressLog::open(&config.log_file).unwrap();
    let orchestrator = Orchestrator::new(&config, &log);

    let report = orchestrator.run().unwrap();
    assert_eq!(report.collections[0].tagged, Some(14));
    assert_eq!(report.collections[1].tagged, Some(15));

    let entries = db.collection("entries").unwrap();
    assert_eq!(entries.count_missing("tenantId").unwrap(), 0);
    assert_eq!(entries.count_with_tenant("tenantId", &foreign).unwrap(), 1);
    assert_eq!(
        entries
            .count_with_tenant("tenantId", &report.tenant_id)
            .unwrap(),
        14
    );

    let rollback = orchestrator.rollback().unwrap();
    assert!(rollback.success());
    assert!(
        rollback
            .collections
            .iter()
            .all(|c| c.outcome == RestoreOutcome::Restored { entries: 15 })
    );
    assert_eq!(entries.count_missing("tenantId").unwrap(), 14);
    let devicestatus = db.collection("devicestatus").unwrap();
    assert_eq!(devicestatus.count_missing("tenantId").unwrap(), 15);

    drop(log);
    let text = fs::read_to_string(&config.log_file).unwrap();
    assert!(text.contains("migration complete"));
    assert!(text.contains("rollback complete"));
}

#[test]
fn rollback_restores_unusual_documents_byte_for_byte() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("documents.db");
    let db = Database::create(&db_path).unwrap();
    let docs = [
        (
            "a1",
            r#"{"_id":"legacy-1","big":123456789012345678901234567890,"v":1}"#,
        ),
        (
            "a2",
            r#"{"readings":[[1,[2.50,[-3]]],{"z":null,"a":[]}],"huge":-18446744073709551617}"#,
        ),
        (
            "a3",
            r#"{"_id":{"$oid":"5f1e"},"note":"tab\tand \"quotes\"","tenantId":null}"#,
        ),
    ];
    let profile = db.collection("profile").unwrap();
    for (id, doc) in docs {
        profile.insert_raw(&id.into(), doc).unwrap();
    }

    let config = MigrationConfig {
        database_uri: Some(format!("sqlite://{}", db_path.display())),
        collections: vec![CollectionDescriptor::new("profile").unwrap()],
        batch_interval_ms: 0,
        backup_dir: dir.path().join("backup"),
        log_file: dir.path().join("migration.log"),
        ..MigrationConfig::default()
    };
    let log = ProgressLog::in_memory();
    let orchestrator = Orchestrator::new(&config, &log);

    let report = orchestrator.run().unwrap();
    assert_eq!(report.collections[0].tagged, Some(2));
    let tagged = profile.get(&"a1".into()).unwrap().unwrap();
    assert_eq!(tagged.field("_id"), Some(&json!("legacy-1")));
    assert_eq!(tagged.tenant("tenantId"), Some(report.tenant_id));

    assert!(orchestrator.rollback().unwrap().success());
    let mut restored = Vec::new();
    profile
        .scan_raw(|id, doc| {
            restored.push((id.to_string(), doc));
            Ok(())
        })
        .unwrap();
    let expected: Vec<(String, String)> = docs
        .iter()
        .map(|(id, doc)| (id.to_string(), doc.to_string()))
        .collect();
    assert_eq!(restored, expected);
}
