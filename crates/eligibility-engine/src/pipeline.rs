//! 资格决策管线
//!
//! 按项目分组的两阶段短路状态机：
//! 1. 收集 active && !draft 且在生效窗口内的规则；计分只看资格/条件
//!    规则，材料要求规则单独聚合进材料清单与后续步骤；
//! 2. 收入阶段：先评估全部 income 分类规则，任一失败即收入硬性止损，
//!    其余规则不再评估（收入不合格具有决定性）；
//! 3. 全量阶段：评估其余规则并统计通过率；
//! 4. 状态推导：全部通过 → qualified；categorical 分类失败为决定性排除，
//!    强制 not-qualified；否则按通过率划 likely/maybe；无可用规则 → indeterminate。
//!
//! 单条规则评估出错按未通过计，既不中断该项目也不影响其他项目。
//! 结果是派生且短暂的，从不持久化。

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

use eligibility_shared::config::EngineConfig;
use eligibility_shared::error::Result;

use crate::explanation::{self, EvaluatedRule};
use crate::logic::Evaluator;
use crate::models::{
    CategorizedPrograms, ConfidenceLevel, EligibilityStatus, EvaluationProfile,
    ProgramEligibilityResult, RuleClassification, RuleDefinition, RuleType,
};
use crate::monitor::PerformanceMonitor;
use crate::store::RuleStore;

/// 收入硬性止损的固定置信分
const HARD_STOP_CONFIDENCE: u8 = 95;

/// 资格决策管线
pub struct EligibilityPipeline<S: RuleStore> {
    store: Arc<S>,
    evaluator: Evaluator,
    config: EngineConfig,
    monitor: Arc<PerformanceMonitor>,
}

impl<S: RuleStore> EligibilityPipeline<S> {
    pub fn new(
        store: Arc<S>,
        evaluator: Evaluator,
        config: EngineConfig,
        monitor: Arc<PerformanceMonitor>,
    ) -> Self {
        Self {
            store,
            evaluator,
            config,
            monitor,
        }
    }

    /// 评估单个项目
    #[instrument(skip(self, profile))]
    pub async fn evaluate_program(
        &self,
        program_id: &str,
        profile: &EvaluationProfile,
    ) -> Result<ProgramEligibilityResult> {
        let rules: Vec<RuleDefinition> = self
            .store
            .find_by_program_id(program_id)
            .await?
            .into_iter()
            .map(|s| s.definition)
            .filter(in_effect)
            .collect();

        Ok(self.decide(program_id, rules, profile))
    }

    /// 评估存储中出现的全部项目
    ///
    /// 单个项目内部的规则失败不会外溢，各项目结果互不影响。
    #[instrument(skip(self, profile))]
    pub async fn evaluate_all(
        &self,
        profile: &EvaluationProfile,
    ) -> Result<Vec<ProgramEligibilityResult>> {
        let mut by_program: HashMap<String, Vec<RuleDefinition>> = HashMap::new();
        for stored in self.store.list_all().await? {
            let definition = stored.definition;
            if in_effect(&definition) {
                by_program
                    .entry(definition.program_id.clone())
                    .or_default()
                    .push(definition);
            }
        }

        let mut results: Vec<ProgramEligibilityResult> = by_program
            .into_iter()
            .map(|(program_id, rules)| self.decide(&program_id, rules, profile))
            .collect();
        results.sort_by(|a, b| a.program_id.cmp(&b.program_id));
        Ok(results)
    }

    /// 跨项目归类
    ///
    /// indeterminate 并入 maybe 桶；收入硬性止损的项目 id 以结构化标记
    /// 另列子桶。
    pub fn categorize(results: Vec<ProgramEligibilityResult>) -> CategorizedPrograms {
        let mut categorized = CategorizedPrograms::default();
        for result in results {
            if result.income_hard_stop {
                categorized.income_hard_stops.push(result.program_id.clone());
            }
            match result.status {
                EligibilityStatus::Qualified => categorized.qualified.push(result),
                EligibilityStatus::Likely => categorized.likely.push(result),
                EligibilityStatus::Maybe | EligibilityStatus::Indeterminate => {
                    categorized.maybe.push(result)
                }
                EligibilityStatus::NotQualified => categorized.not_qualified.push(result),
            }
        }
        categorized
    }

    // -----------------------------------------------------------------------
    // 两阶段决策
    // -----------------------------------------------------------------------

    fn decide(
        &self,
        program_id: &str,
        rules: Vec<RuleDefinition>,
        profile: &EvaluationProfile,
    ) -> ProgramEligibilityResult {
        // 材料要求规则不计入通过率，只向结果聚合材料清单与后续步骤
        let (mut scored, rest): (Vec<RuleDefinition>, Vec<RuleDefinition>) =
            rules.into_iter().partition(|r| r.counts_toward_eligibility());
        let document_rules: Vec<RuleDefinition> = rest
            .into_iter()
            .filter(|r| r.rule_type == RuleType::DocumentRequirements)
            .collect();

        scored.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

        let total = scored.len();
        if total == 0 {
            return self.assemble(
                program_id,
                EligibilityStatus::Indeterminate,
                false,
                Vec::new(),
                &[],
                &document_rules,
                profile,
            );
        }

        let (income_rules, other_rules): (Vec<_>, Vec<_>) = scored
            .iter()
            .partition(|r| r.classification_or_other() == RuleClassification::Income);

        // 收入阶段
        let mut evaluated: Vec<EvaluatedRule> = income_rules
            .iter()
            .map(|rule| self.evaluate_rule(rule, profile))
            .collect();

        if evaluated.iter().any(|e| !e.passed) {
            info!(program_id, "收入硬性止损，跳过其余规则");
            return self.assemble(
                program_id,
                EligibilityStatus::NotQualified,
                true,
                evaluated,
                &scored,
                &document_rules,
                profile,
            );
        }

        // 全量阶段
        evaluated.extend(
            other_rules
                .iter()
                .map(|rule| self.evaluate_rule(rule, profile)),
        );

        let passed = evaluated.iter().filter(|e| e.passed).count();
        let categorical_failure = evaluated.iter().any(|e| {
            !e.passed
                && e.definition.classification_or_other() == RuleClassification::Categorical
        });

        let ratio = passed as f64 / total as f64;
        let status = if passed == total {
            EligibilityStatus::Qualified
        } else if categorical_failure {
            // 决定性排除：类别性条件不满足时通过率不再有意义
            EligibilityStatus::NotQualified
        } else if ratio >= self.config.likely_threshold {
            EligibilityStatus::Likely
        } else {
            EligibilityStatus::Maybe
        };

        self.assemble(
            program_id,
            status,
            false,
            evaluated,
            &scored,
            &document_rules,
            profile,
        )
    }

    fn evaluate_rule(&self, rule: &RuleDefinition, profile: &EvaluationProfile) -> EvaluatedRule {
        let started = Instant::now();
        let outcome = self.evaluator.evaluate(&rule.rule_logic, profile);
        let elapsed = started.elapsed();

        self.monitor.record(&rule.id, elapsed, outcome.success);
        if let Some(error) = &outcome.error {
            warn!(rule_id = %rule.id, error = %error, "规则评估出错，按未通过处理");
        }

        EvaluatedRule {
            definition: rule.clone(),
            passed: outcome.passed(),
            error: outcome.error,
        }
    }

    fn assemble(
        &self,
        program_id: &str,
        status: EligibilityStatus,
        income_hard_stop: bool,
        evaluated: Vec<EvaluatedRule>,
        applicable_rules: &[RuleDefinition],
        document_rules: &[RuleDefinition],
        profile: &EvaluationProfile,
    ) -> ProgramEligibilityResult {
        let total = applicable_rules.len();
        let passed = evaluated.iter().filter(|e| e.passed).count();

        let confidence_score = if income_hard_stop {
            HARD_STOP_CONFIDENCE
        } else if total == 0 {
            0
        } else {
            confidence_score(passed as f64 / total as f64, total)
        };

        let rules_version = applicable_rules
            .iter()
            .map(|r| r.version.clone())
            .max_by(|a, b| a.cmp_release(b));

        let doc_next_steps = document_rules.iter().flat_map(|r| r.next_steps.iter());
        let failed: Vec<&EvaluatedRule> = evaluated.iter().filter(|e| !e.passed).collect();
        let next_steps = if failed.is_empty() {
            dedup(
                evaluated
                    .iter()
                    .flat_map(|e| e.definition.next_steps.iter())
                    .chain(doc_next_steps),
            )
        } else {
            dedup(
                failed
                    .iter()
                    .flat_map(|e| e.definition.next_steps.iter())
                    .chain(doc_next_steps),
            )
        };
        let required_documents = dedup(
            evaluated
                .iter()
                .flat_map(|e| e.definition.required_documents.iter())
                .chain(
                    document_rules
                        .iter()
                        .flat_map(|r| r.required_documents.iter()),
                ),
        );

        let explanation = explanation::build(status, income_hard_stop, &evaluated, profile);

        ProgramEligibilityResult {
            program_id: program_id.to_string(),
            program_name: None,
            description: None,
            jurisdiction: applicable_rules.iter().find_map(|r| r.jurisdiction.clone()),
            status,
            confidence: ConfidenceLevel::from_score(confidence_score),
            confidence_score,
            explanation,
            required_documents,
            next_steps,
            evaluated_at: Utc::now(),
            rules_version,
            income_hard_stop,
        }
    }
}

/// 置信分：50 分基线，按通过率偏移，规则越多越敢给极端分
fn confidence_score(ratio: f64, rule_count: usize) -> u8 {
    let n = rule_count as f64;
    let raw = 50.0 + (ratio - 0.5) * 100.0 * (n / (n + 1.0));
    raw.clamp(0.0, 100.0).round() as u8
}

/// active、非 draft 且当前时间在生效窗口内
fn in_effect(rule: &RuleDefinition) -> bool {
    if !rule.active || rule.draft {
        return false;
    }
    let now = Utc::now();
    if rule.effective_date.is_some_and(|d| d > now) {
        return false;
    }
    !rule.expiration_date.is_some_and(|d| d <= now)
}

fn dedup<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::OperatorSet;
    use crate::store::{MemoryRuleStore, StoredRule};
    use crate::version::RuleVersion;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn pipeline(store: Arc<MemoryRuleStore>) -> EligibilityPipeline<MemoryRuleStore> {
        pipeline_with(store, Evaluator::benefits())
    }

    fn pipeline_with(
        store: Arc<MemoryRuleStore>,
        evaluator: Evaluator,
    ) -> EligibilityPipeline<MemoryRuleStore> {
        EligibilityPipeline::new(
            store,
            evaluator,
            EngineConfig::default(),
            Arc::new(PerformanceMonitor::new(Duration::from_millis(100))),
        )
    }

    fn rule(id: &str, program_id: &str, classification: &str, logic: Value) -> RuleDefinition {
        serde_json::from_value(json!({
            "id": id,
            "programId": program_id,
            "name": format!("rule {}", id),
            "ruleLogic": logic,
            "ruleType": "eligibility",
            "classification": classification,
            "version": {"major": 1, "minor": 0, "patch": 0}
        }))
        .unwrap()
    }

    fn profile(value: Value) -> EvaluationProfile {
        value.as_object().unwrap().clone()
    }

    async fn seed(store: &MemoryRuleStore, rules: Vec<RuleDefinition>) {
        for rule in rules {
            store.upsert(StoredRule::new(rule, None)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_all_pass_is_qualified() {
        let store = Arc::new(MemoryRuleStore::new());
        seed(
            &store,
            vec![
                rule("income", "snap", "income", json!({"<=": [{"var": "monthlyIncome"}, 2292]})),
                rule("age", "snap", "categorical", json!({">=": [{"var": "age"}, 18]})),
            ],
        )
        .await;

        let result = pipeline(store)
            .evaluate_program("snap", &profile(json!({"monthlyIncome": 1000, "age": 30})))
            .await
            .unwrap();

        assert_eq!(result.status, EligibilityStatus::Qualified);
        assert!(!result.income_hard_stop);
        assert!(result.confidence_score > 80);
        assert_eq!(result.rules_version, Some(RuleVersion::new(1, 0, 0)));
    }

    #[tokio::test]
    async fn test_income_hard_stop_skips_remaining_rules() {
        let calls = Arc::new(AtomicU32::new(0));
        let probe = calls.clone();
        let operators = OperatorSet::benefits().with_operator("probe", move |_args| {
            probe.fetch_add(1, Ordering::SeqCst);
            Ok(json!(true))
        });

        let store = Arc::new(MemoryRuleStore::new());
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
        seed(&store, rules).await;

        let result = pipeline_with(store, Evaluator::new(operators))
            .evaluate_program("snap", &profile(json!({"monthlyIncome": 9000})))
            .await
            .unwrap();

        assert_eq!(result.status, EligibilityStatus::NotQualified);
        assert!(result.income_hard_stop);
        assert_eq!(result.confidence_score, HARD_STOP_CONFIDENCE);
        // 非收入规则从未被调用
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_snap_income_scenario_is_hard_stop_not_maybe() {
        let store = Arc::new(MemoryRuleStore::new());
        seed(
            &store,
            vec![
                rule("income", "snap", "income", json!({"<=": [{"var": "monthlyIncome"}, 2292]})),
                rule("residency", "snap", "categorical", json!({"==": [{"var": "isResident"}, true]})),
                rule("work", "snap", "other", json!({"==": [{"var": "meetsWorkRequirement"}, true]})),
            ],
        )
        .await;

        let result = pipeline(store)
            .evaluate_program(
                "snap",
                &profile(json!({"monthlyIncome": 3000, "householdSize": 2})),
            )
            .await
            .unwrap();

        assert_eq!(result.status, EligibilityStatus::NotQualified);
        assert!(result.income_hard_stop);
        assert_ne!(result.status, EligibilityStatus::Maybe);
    }

    #[tokio::test]
    async fn test_categorical_failure_forces_not_qualified() {
        let store = Arc::new(MemoryRuleStore::new());
        seed(
            &store,
            vec![
                rule("age", "ssi", "categorical", json!({">=": [{"var": "age"}, 65]})),
                rule("r1", "ssi", "other", json!(true)),
                rule("r2", "ssi", "other", json!(true)),
                rule("r3", "ssi", "other", json!(true)),
            ],
        )
        .await;

        // 3/4 通过本应落 likely，但类别性失败具有决定性
        let result = pipeline(store)
            .evaluate_program("ssi", &profile(json!({"age": 40})))
            .await
            .unwrap();

        assert_eq!(result.status, EligibilityStatus::NotQualified);
        assert!(!result.income_hard_stop);
    }

    #[tokio::test]
    async fn test_partial_pass_ratio_buckets() {
        let store = Arc::new(MemoryRuleStore::new());
        seed(
            &store,
            vec![
                rule("r1", "wic", "other", json!(true)),
                rule("r2", "wic", "other", json!(true)),
                rule("r3", "wic", "other", json!(true)),
                rule("r4", "wic", "other", json!(false)),
            ],
        )
        .await;

        let result = pipeline(store)
            .evaluate_program("wic", &profile(json!({})))
            .await
            .unwrap();
        // 3/4 = 0.75 达到 likely 阈值
        assert_eq!(result.status, EligibilityStatus::Likely);
    }

    #[tokio::test]
    async fn test_document_rules_aggregate_without_entering_tally() {
        let store = Arc::new(MemoryRuleStore::new());
        let doc_rule: RuleDefinition = serde_json::from_value(json!({
            "id": "snap-docs",
            "programId": "snap",
            "name": "required documents",
            "ruleLogic": false,
            "ruleType": "document_requirements",
            "classification": "document",
            "version": {"major": 1, "minor": 0, "patch": 0},
            "requiredDocuments": ["proof of income", "photo id"],
            "nextSteps": ["Gather the listed documents"]
        }))
        .unwrap();
        seed(
            &store,
            vec![
                doc_rule,
                rule("income", "snap", "income", json!({"<=": [{"var": "monthlyIncome"}, 2292]})),
            ],
        )
        .await;

        let result = pipeline(store)
            .evaluate_program("snap", &profile(json!({"monthlyIncome": 1000})))
            .await
            .unwrap();

        // 材料要求规则的恒假逻辑不影响状态，材料与步骤照常出现在结果里
        assert_eq!(result.status, EligibilityStatus::Qualified);
        assert!(result.required_documents.contains(&"proof of income".to_string()));
        assert!(result.required_documents.contains(&"photo id".to_string()));
        assert!(
            result
                .next_steps
                .contains(&"Gather the listed documents".to_string())
        );
    }

    #[tokio::test]
    async fn test_no_rules_is_indeterminate() {
        let store = Arc::new(MemoryRuleStore::new());
        let result = pipeline(store)
            .evaluate_program("ghost", &profile(json!({})))
            .await
            .unwrap();

        assert_eq!(result.status, EligibilityStatus::Indeterminate);
        assert_eq!(result.confidence, ConfidenceLevel::Low);
    }

    #[tokio::test]
    async fn test_draft_and_inactive_rules_excluded() {
        let store = Arc::new(MemoryRuleStore::new());
        let mut draft = rule("draft", "snap", "other", json!(false));
        draft.draft = true;
        let mut inactive = rule("inactive", "snap", "other", json!(false));
        inactive.active = false;
        seed(
            &store,
            vec![draft, inactive, rule("live", "snap", "other", json!(true))],
        )
        .await;

        let result = pipeline(store)
            .evaluate_program("snap", &profile(json!({})))
            .await
            .unwrap();
        assert_eq!(result.status, EligibilityStatus::Qualified);
        assert_eq!(result.explanation.rules_cited, vec!["live"]);
    }

    #[tokio::test]
    async fn test_evaluation_error_counts_as_failed_without_aborting() {
        let store = Arc::new(MemoryRuleStore::new());
        seed(
            &store,
            vec![
                rule("bad", "snap", "other", json!({"/": [1, 0]})),
                rule("good", "snap", "other", json!(true)),
            ],
        )
        .await;

        let result = pipeline(store)
            .evaluate_program("snap", &profile(json!({})))
            .await
            .unwrap();
        assert_ne!(result.status, EligibilityStatus::Qualified);
        assert!(
            result
                .explanation
                .details
                .iter()
                .any(|line| line.contains("could not be checked"))
        );
    }

    #[tokio::test]
    async fn test_categorize_buckets_and_hard_stop_sub_bucket() {
        let store = Arc::new(MemoryRuleStore::new());
        seed(
            &store,
            vec![
                rule("a1", "alpha", "other", json!(true)),
                rule("b1", "beta", "income", json!({"<=": [{"var": "monthlyIncome"}, 100]})),
            ],
        )
        .await;

        let pipeline = pipeline(store);
        let results = pipeline
            .evaluate_all(&profile(json!({"monthlyIncome": 500})))
            .await
            .unwrap();
        let categorized = EligibilityPipeline::<MemoryRuleStore>::categorize(results);

        assert_eq!(categorized.qualified.len(), 1);
        assert_eq!(categorized.not_qualified.len(), 1);
        assert_eq!(categorized.income_hard_stops, vec!["beta"]);
    }
}
