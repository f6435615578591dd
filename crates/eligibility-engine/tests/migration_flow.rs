//! 版本迁移与保留链路

use serde_json::{Value, json};

use eligibility_engine::engine::EligibilityEngine;
use eligibility_engine::migration::{MigrationSummary, VersionMigration};
use eligibility_engine::models::ImportOptions;
use eligibility_engine::version::RuleVersion;
use eligibility_engine::RuleStore;
use eligibility_shared::config::AppConfig;

fn rule(id: &str, major: u32, supersedes: Option<&str>) -> Value {
    json!({
        "id": id,
        "programId": "snap",
        "name": "income limit",
        "ruleLogic": {"<=": [{"var": "income"}, 1000]},
        "ruleType": "eligibility",
        "classification": "income",
        "version": {"major": major, "minor": 0, "patch": 0},
        "supersedes": supersedes
    })
}

async fn engine_with(rules: Vec<Value>) -> EligibilityEngine<eligibility_engine::MemoryRuleStore> {
    let engine = EligibilityEngine::in_memory(AppConfig::default());
    let payload = Value::Array(rules).to_string();
    let report = engine
        .import_from_json(&payload, &ImportOptions::default())
        .await;
    assert!(report.success, "seed failed: {:?}", report.errors);
    engine
}

#[tokio::test]
async fn registered_migration_lands_exactly_on_target() {
    let engine = engine_with(vec![rule("r1", 1, None)]).await;
    engine.register_migration(
        "snap",
        VersionMigration::new(
            RuleVersion::new(1, 0, 0),
            RuleVersion::new(2, 0, 0),
            "rename income to monthlyIncome",
            |mut raw| {
                raw["ruleLogic"] = json!({"<=": [{"var": "monthlyIncome"}, 1000]});
                Ok(raw)
            },
        ),
    );

    let summary = engine
        .migrate_program("snap", &RuleVersion::new(2, 0, 0))
        .await
        .unwrap();
    assert_eq!(summary, MigrationSummary { migrated: 1, skipped: 0, errored: 0 });

    let migrated = engine.store().find_by_id("r1").await.unwrap().unwrap();
    assert_eq!(migrated.definition.version, RuleVersion::new(2, 0, 0));
    assert_eq!(
        migrated.definition.rule_logic,
        json!({"<=": [{"var": "monthlyIncome"}, 1000]})
    );
}

#[tokio::test]
async fn unreachable_target_fails_loudly_and_leaves_rule_untouched() {
    let engine = engine_with(vec![rule("r1", 1, None)]).await;
    // 没有注册任何迁移

    let summary = engine
        .migrate_program("snap", &RuleVersion::new(2, 0, 0))
        .await
        .unwrap();
    assert_eq!(summary.errored, 1);
    assert_eq!(summary.migrated, 0);

    // 直接迁移单条规则时错误是显式的 NO_MIGRATION_PATH
    let stored = engine.store().find_by_id("r1").await.unwrap().unwrap();
    let err = engine
        .migrations()
        .migrate_rule(&stored.definition, &RuleVersion::new(2, 0, 0))
        .unwrap_err();
    assert_eq!(err.code(), "NO_MIGRATION_PATH");

    // 失败的规则保持原版本，不会悄悄停在旧状态被误认为已迁移
    assert_eq!(stored.definition.version, RuleVersion::new(1, 0, 0));
}

#[tokio::test]
async fn one_rule_failure_does_not_abort_batch() {
    let engine = engine_with(vec![rule("r1", 1, None), rule("r2", 2, None)]).await;
    engine.register_migration(
        "snap",
        VersionMigration::new(
            RuleVersion::new(2, 0, 0),
            RuleVersion::new(3, 0, 0),
            "raise limit",
            |mut raw| {
                raw["ruleLogic"]["<="][1] = json!(1200);
                Ok(raw)
            },
        ),
    );

    // r1 无 1.0.0 起点的迁移 → errored；r2 正常迁移
    let summary = engine
        .migrate_program("snap", &RuleVersion::new(3, 0, 0))
        .await
        .unwrap();
    assert_eq!(summary, MigrationSummary { migrated: 1, skipped: 0, errored: 1 });

    let r2 = engine.store().find_by_id("r2").await.unwrap().unwrap();
    assert_eq!(r2.definition.version, RuleVersion::new(3, 0, 0));
}

#[tokio::test]
async fn retention_archives_then_deletes_old_lineage_versions() {
    let mut config = AppConfig::default();
    config.engine.version_retention = 1;

    let engine = EligibilityEngine::in_memory(config);
    let payload = Value::Array(vec![
        rule("r1", 1, None),
        rule("r1-v2", 2, Some("r1")),
        rule("r1-v3", 3, Some("r1-v2")),
    ])
    .to_string();
    engine
        .import_from_json(&payload, &ImportOptions::default())
        .await;

    let archived = engine.archive_old_versions().await.unwrap();
    assert_eq!(archived, 2);
    let oldest = engine.store().find_by_id("r1").await.unwrap().unwrap();
    assert!(!oldest.definition.active);
    let newest = engine.store().find_by_id("r1-v3").await.unwrap().unwrap();
    assert!(newest.definition.active);

    let deleted = engine.delete_old_versions().await.unwrap();
    assert_eq!(deleted, 2);
    assert!(engine.store().find_by_id("r1").await.unwrap().is_none());
    assert!(engine.store().find_by_id("r1-v3").await.unwrap().is_some());
}
