//! 导入 → 评估 → 归类 的端到端链路

use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use eligibility_engine::engine::EligibilityEngine;
use eligibility_engine::models::{EligibilityStatus, EvaluationProfile, ImportOptions};
use eligibility_engine::store::MemoryRuleStore;
use eligibility_engine::{Evaluator, OperatorSet};
use eligibility_shared::config::AppConfig;

fn profile(value: Value) -> EvaluationProfile {
    value.as_object().unwrap().clone()
}

fn rule(id: &str, program: &str, classification: &str, logic: Value) -> Value {
    json!({
        "id": id,
        "programId": program,
        "name": format!("{} requirement", id),
        "ruleLogic": logic,
        "ruleType": "eligibility",
        "classification": classification,
        "version": {"major": 1, "minor": 0, "patch": 0}
    })
}

async fn seed(engine: &EligibilityEngine<MemoryRuleStore>, rules: Vec<Value>) {
    let payload = Value::Array(rules).to_string();
    let report = engine
        .import_from_json(&payload, &ImportOptions::default())
        .await;
    assert!(report.success, "seed failed: {:?}", report.errors);
}

#[tokio::test]
async fn snap_household_over_income_limit_is_hard_stopped() {
    let engine = EligibilityEngine::in_memory(AppConfig::default());
    seed(
        &engine,
        vec![
            rule(
                "snap-income",
                "snap",
                "income",
                json!({"<=": [{"var": "monthlyIncome"}, {"household_threshold": [
                    {"var": "householdSize"},
                    {"1": 1580, "2": 2292, "3": 2694}
                ]}]}),
            ),
            rule(
                "snap-residency",
                "snap",
                "categorical",
                json!({"==": [{"var": "isResident"}, true]}),
            ),
        ],
    )
    .await;

    let result = engine
        .evaluate_program(
            "snap",
            &profile(json!({"monthlyIncome": 3000, "householdSize": 2, "isResident": true})),
        )
        .await
        .unwrap();

    // 3000 > 2292：收入硬性止损，而不是 maybe
    assert_eq!(result.status, EligibilityStatus::NotQualified);
    assert!(result.income_hard_stop);
    assert_eq!(result.confidence_score, 95);
    assert!(result.explanation.reason.contains("income exceeds"));
    // 收入 vs 阈值不是简单形态时不强行抽取计算
    assert!(result.explanation.details[0].starts_with('✗'));
}

#[tokio::test]
async fn failing_income_rule_never_invokes_other_rules() {
    let calls = Arc::new(AtomicU32::new(0));
    let probe = calls.clone();
    let operators = OperatorSet::benefits().with_operator("probe", move |_args| {
        probe.fetch_add(1, Ordering::SeqCst);
        Ok(json!(true))
    });

    let engine = EligibilityEngine::with_evaluator(
        Arc::new(MemoryRuleStore::new()),
        AppConfig::default(),
        Evaluator::new(operators),
    );

    let mut rules = vec![rule(
        "income",
        "snap",
        "income",
        json!({"<=": [{"var": "monthlyIncome"}, 2292]}),
    )];
    for i in 0..5 {
        rules.push(rule(
            &format!("other-{}", i),
            "snap",
            "other",
            json!({"probe": [1]}),
        ));
    }
    seed(&engine, rules).await;

    let result = engine
        .evaluate_program("snap", &profile(json!({"monthlyIncome": 9000})))
        .await
        .unwrap();

    assert_eq!(result.status, EligibilityStatus::NotQualified);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn screening_partitions_programs_with_hard_stop_sub_bucket() {
    let engine = EligibilityEngine::in_memory(AppConfig::default());
    seed(
        &engine,
        vec![
            // 全部通过
            rule("wic-kids", "wic", "categorical", json!({"==": [{"var": "hasChildren"}, true]})),
            // 收入硬性止损
            rule("snap-income", "snap", "income", json!({"<=": [{"var": "monthlyIncome"}, 1000]})),
            // 4 条中 3 条通过，落 likely
            rule("liheap-1", "liheap", "other", json!(true)),
            rule("liheap-2", "liheap", "other", json!(true)),
            rule("liheap-3", "liheap", "other", json!(true)),
            rule("liheap-4", "liheap", "other", json!({"==": [{"var": "hasCrisis"}, true]})),
        ],
    )
    .await;

    let categorized = engine
        .screen(&profile(json!({
            "monthlyIncome": 2000,
            "hasChildren": true,
            "hasCrisis": false
        })))
        .await
        .unwrap();

    assert_eq!(categorized.qualified.len(), 1);
    assert_eq!(categorized.qualified[0].program_id, "wic");
    assert_eq!(categorized.likely.len(), 1);
    assert_eq!(categorized.likely[0].program_id, "liheap");
    assert_eq!(categorized.not_qualified.len(), 1);
    assert_eq!(categorized.income_hard_stops, vec!["snap"]);
}

#[tokio::test]
async fn qualified_result_carries_explanation_and_documents() {
    let engine = EligibilityEngine::in_memory(AppConfig::default());
    let mut income_rule = rule(
        "income",
        "medicaid",
        "income",
        json!({"<=": [{"var": "monthlyIncome"}, 1800]}),
    );
    income_rule["explanation"] = json!("Monthly income must be at or below the state limit.");
    income_rule["requiredDocuments"] = json!(["pay stubs", "tax return"]);
    income_rule["nextSteps"] = json!(["apply online"]);
    seed(&engine, vec![income_rule]).await;

    let result = engine
        .evaluate_program("medicaid", &profile(json!({"monthlyIncome": 1200})))
        .await
        .unwrap();

    assert_eq!(result.status, EligibilityStatus::Qualified);
    assert_eq!(result.explanation.details.len(), 1);
    assert!(result.explanation.details[0].starts_with('✓'));
    assert_eq!(result.required_documents, vec!["pay stubs", "tax return"]);
    assert_eq!(result.next_steps, vec!["apply online"]);
    assert_eq!(result.explanation.calculations.len(), 1);
    assert_eq!(result.explanation.calculations[0].threshold, 1800.0);
    assert_eq!(result.explanation.calculations[0].observed, 1200.0);
}

#[tokio::test]
async fn unresolved_profile_fields_fail_falsy_instead_of_erroring() {
    let engine = EligibilityEngine::in_memory(AppConfig::default());
    seed(
        &engine,
        vec![rule(
            "age",
            "ssi",
            "categorical",
            json!({">=": [{"var": "age"}, 65]}),
        )],
    )
    .await;

    // 画像缺 age 字段：按假值处理，不报错
    let result = engine
        .evaluate_program("ssi", &profile(json!({})))
        .await
        .unwrap();
    assert_eq!(result.status, EligibilityStatus::NotQualified);
    assert!(result.explanation.details[0].starts_with('✗'));
    assert!(!result.explanation.details[0].contains("could not be checked"));
}
