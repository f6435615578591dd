//! 规则导入管线
//!
//! 单条规则的导入流程：schema 校验 → 逻辑校验（操作符白名单、字段可达性）
//! → 可选的内嵌测试用例执行（失败仅告警，从不阻断）→ 与存储中已存在规则
//! 的冲突解决 → 落库（dry run 除外）。
//!
//! 规则包导入在写入任何规则之前先重算并核对校验和，不一致时整包拒绝。
//!
//! 外层防护：并发闸门（资源压力下延迟开始）、单次尝试超时、存储瞬时
//! 故障的指数退避重试，以及同 key 并发导入的合并。超时只约束外层尝试，
//! 不会中断进行中的规则评估；批内单条失败不回滚已成功的条目。

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use eligibility_shared::coalesce::Coalescer;
use eligibility_shared::config::ImportConfig;
use eligibility_shared::error::{EligibilityError, Result};
use eligibility_shared::retry::{RetryPolicy, retry_with_policy};

use crate::logic::{Evaluator, compile, is_truthy};
use crate::models::{
    EvaluationProfile, ImportMode, ImportOptions, ImportReport, RuleDefinition, RuleTestCase,
};
use crate::schema::{validate_rule_definition, validate_rule_package};
use crate::store::{RuleStore, StoredRule};
use crate::{checksum, version::RuleVersion};

/// 规则导入器
pub struct RuleImporter<S: RuleStore> {
    store: Arc<S>,
    evaluator: Evaluator,
    config: ImportConfig,
    retry: RetryPolicy,
    gate: Arc<Semaphore>,
    coalescer: Coalescer<ImportReport>,
}

impl<S: RuleStore> RuleImporter<S> {
    pub fn new(store: Arc<S>, evaluator: Evaluator, config: ImportConfig) -> Self {
        let retry = RetryPolicy::from_import_config(&config);
        let gate = Arc::new(Semaphore::new(config.max_concurrent_imports));
        Self {
            store,
            evaluator,
            config,
            retry,
            gate,
            coalescer: Coalescer::new(),
        }
    }

    // -----------------------------------------------------------------------
    // 公开入口（带闸门/超时/合并）
    // -----------------------------------------------------------------------

    /// 导入单条规则
    #[instrument(skip(self, raw, options))]
    pub async fn import_rule(&self, raw: &Value, options: &ImportOptions) -> ImportReport {
        let key = raw
            .get("id")
            .and_then(Value::as_str)
            .map(|id| format!("rule:{}", id))
            .unwrap_or_else(|| format!("rule:{}", Uuid::new_v4()));

        let raw = raw.clone();
        let options = options.clone();
        self.coalescer
            .run(&key, || async move {
                self.run_guarded("import_rule", async {
                    let mut report = ImportReport::new(options.dry_run);
                    self.import_raw_rule(&raw, &options, None, &mut report).await;
                    self.log_report("import_rule", &report);
                    report
                })
                .await
            })
            .await
    }

    /// 导入规则包
    ///
    /// 校验和不一致时整包拒绝，任何规则都不会写入。
    #[instrument(skip(self, raw, options))]
    pub async fn import_package(&self, raw: &Value, options: &ImportOptions) -> ImportReport {
        let key = raw
            .pointer("/metadata/id")
            .and_then(Value::as_str)
            .map(|id| format!("pkg:{}", id))
            .unwrap_or_else(|| format!("pkg:{}", Uuid::new_v4()));

        let raw = raw.clone();
        let options = options.clone();
        self.coalescer
            .run(&key, || async move {
                self.run_guarded("import_package", async {
                    let report = self.import_package_inner(&raw, &options).await;
                    self.log_report("import_package", &report);
                    report
                })
                .await
            })
            .await
    }

    /// 从 JSON 字符串导入，按载荷形状区分单规则 / 规则数组 / 完整规则包
    #[instrument(skip(self, payload, options))]
    pub async fn import_from_json(&self, payload: &str, options: &ImportOptions) -> ImportReport {
        let raw: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(e) => {
                let mut report = ImportReport::new(options.dry_run);
                report.record_error(None, format!("JSON 解析失败: {}", e), "INVALID_FORMAT");
                return report;
            }
        };

        match &raw {
            Value::Object(map) if map.contains_key("metadata") && map.contains_key("rules") => {
                self.import_package(&raw, options).await
            }
            Value::Array(items) => {
                self.run_guarded("import_rule_array", async {
                    let mut report = ImportReport::new(options.dry_run);
                    for item in items {
                        self.import_raw_rule(item, options, None, &mut report).await;
                    }
                    self.log_report("import_rule_array", &report);
                    report
                })
                .await
            }
            Value::Object(map) if map.contains_key("id") && map.contains_key("ruleLogic") => {
                self.import_rule(&raw, options).await
            }
            _ => {
                let mut report = ImportReport::new(options.dry_run);
                report.record_error(
                    None,
                    "无法识别的载荷形状：既不是规则、规则数组，也不是规则包",
                    "INVALID_FORMAT",
                );
                report
            }
        }
    }

    /// 执行规则的内嵌测试用例，返回失败描述列表
    ///
    /// 导入路径之外也可单独调用，用于作者侧验证。
    pub fn run_test_cases(&self, rule: &RuleDefinition) -> Vec<String> {
        rule.test_cases
            .iter()
            .filter_map(|tc| self.run_test_case(rule, tc).err())
            .collect()
    }

    // -----------------------------------------------------------------------
    // 外层防护
    // -----------------------------------------------------------------------

    async fn run_guarded(
        &self,
        operation: &str,
        fut: impl Future<Output = ImportReport>,
    ) -> ImportReport {
        // 资源压力闸门：并发导入达到上限时在此等待
        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                let mut report = ImportReport::new(false);
                report.record_error(
                    None,
                    format!("导入闸门已关闭: {}", operation),
                    "RESOURCE_EXHAUSTED",
                );
                return report;
            }
        };

        let timeout = Duration::from_secs(self.config.timeout_seconds);
        match tokio::time::timeout(timeout, fut).await {
            Ok(report) => report,
            Err(_) => {
                warn!(operation, timeout_seconds = self.config.timeout_seconds, "导入超时");
                let mut report = ImportReport::new(false);
                report.record_error(None, format!("导入超时: {}", operation), "TIMEOUT");
                report
            }
        }
    }

    fn log_report(&self, operation: &str, report: &ImportReport) {
        info!(
            operation,
            operation_id = %report.operation_id,
            imported = report.imported,
            skipped = report.skipped,
            failed = report.failed,
            warnings = report.warnings.len(),
            dry_run = report.dry_run,
            "导入完成"
        );
    }

    // -----------------------------------------------------------------------
    // 包导入
    // -----------------------------------------------------------------------

    async fn import_package_inner(&self, raw: &Value, options: &ImportOptions) -> ImportReport {
        let mut report = ImportReport::new(options.dry_run);

        let validated = match validate_rule_package(raw) {
            Ok(validated) => validated,
            Err(issues) => {
                for issue in issues {
                    report.record_error(
                        None,
                        format!("{}: {}", issue.path, issue.message),
                        "INVALID_FORMAT",
                    );
                }
                return report;
            }
        };

        for warning in &validated.warnings {
            report.record_warning(None, format!("{}: {}", warning.path, warning.message));
        }
        let package = validated.value;

        // 校验和核对必须先于任何规则写入。核对针对线格式的原样内容：
        // 校验阶段回填的缺省字段（时间戳、推断的分类）不参与哈希，
        // 否则省略可选字段的合法包会被误判为损坏。
        if let Some(declared) = &package.checksum {
            let computed = checksum::raw_package_checksum(raw);

            if &computed != declared {
                warn!(
                    package_id = %package.metadata.id,
                    declared = %declared,
                    computed = %computed,
                    "规则包校验和不匹配，整包拒绝"
                );
                report.failed = package.rules.len();
                report.success = false;
                report.errors.push(crate::models::ImportIssue {
                    rule_id: None,
                    message: format!(
                        "包 {} 已损坏或被篡改: 声明校验和 {}, 重算 {}",
                        package.metadata.id, declared, computed
                    ),
                    code: Some("CHECKSUM_MISMATCH".to_string()),
                });
                return report;
            }
        }

        let source = Some(package.metadata.id.clone());
        for rule in package.rules {
            // 包级校验已覆盖 schema，这里直接走定义导入
            self.import_definition(rule, options, source.clone(), &mut report)
                .await;
        }

        report
    }

    // -----------------------------------------------------------------------
    // 单规则管线
    // -----------------------------------------------------------------------

    async fn import_raw_rule(
        &self,
        raw: &Value,
        options: &ImportOptions,
        source_package: Option<String>,
        report: &mut ImportReport,
    ) {
        let rule_id = raw.get("id").and_then(Value::as_str).map(String::from);

        let rule = if options.validate {
            match validate_rule_definition(raw) {
                Ok(validated) => {
                    for warning in &validated.warnings {
                        report.record_warning(
                            rule_id.clone(),
                            format!("{}: {}", warning.path, warning.message),
                        );
                    }
                    validated.value
                }
                Err(issues) => {
                    report.failed += 1;
                    report.success = false;
                    for issue in issues {
                        report.errors.push(crate::models::ImportIssue {
                            rule_id: rule_id.clone(),
                            message: format!("{}: {}", issue.path, issue.message),
                            code: Some("INVALID_FORMAT".to_string()),
                        });
                    }
                    return;
                }
            }
        } else {
            match serde_json::from_value::<RuleDefinition>(raw.clone()) {
                Ok(rule) => rule,
                Err(e) => {
                    report.record_error(rule_id, format!("反序列化失败: {}", e), "INVALID_FORMAT");
                    return;
                }
            }
        };

        self.import_definition(rule, options, source_package, report)
            .await;
    }

    async fn import_definition(
        &self,
        rule: RuleDefinition,
        options: &ImportOptions,
        source_package: Option<String>,
        report: &mut ImportReport,
    ) {
        let rule_id = rule.id.clone();

        // 逻辑校验：操作符白名单 + 引用字段可达性
        match compile(&rule.rule_logic, self.evaluator.operators()) {
            Ok(compiled) => {
                if !rule.required_fields.is_empty() {
                    let undeclared: Vec<&String> = compiled
                        .variables
                        .iter()
                        .filter(|v| {
                            let head = v.split('.').next().unwrap_or(v);
                            !rule
                                .required_fields
                                .iter()
                                .any(|f| f == *v || f == head)
                        })
                        .collect();
                    if !undeclared.is_empty() {
                        report.record_warning(
                            Some(rule_id.clone()),
                            format!(
                                "逻辑引用了未在 requiredFields 声明的字段: {:?}",
                                undeclared
                            ),
                        );
                    }
                }
            }
            Err(e) => {
                report.record_error(
                    Some(rule_id),
                    format!("规则逻辑无效: {}", e),
                    "INVALID_FORMAT",
                );
                return;
            }
        }

        // 内嵌测试用例：失败只产生警告，从不阻断导入
        if !options.skip_tests {
            for failure in self.run_test_cases(&rule) {
                report.record_warning(Some(rule_id.clone()), format!("TEST_FAILED: {}", failure));
            }
        }

        // 冲突解决：存储是“已存在”的唯一事实来源
        let existing = match self.find_existing(&rule_id).await {
            Ok(existing) => existing,
            Err(e) => {
                report.record_error(Some(rule_id), e.to_string(), e.code());
                return;
            }
        };

        let overwrite = options.overwrite_existing || options.mode == ImportMode::Replace;

        match (&existing, options.mode) {
            (Some(_), ImportMode::Create) => {
                report.record_error(
                    Some(rule_id.clone()),
                    format!("规则 id 已存在: {}", rule_id),
                    "DUPLICATE_ID",
                );
                return;
            }
            (None, ImportMode::Update) => {
                report.skipped += 1;
                report.record_warning(
                    Some(rule_id.clone()),
                    "update 模式下规则不存在，已跳过".to_string(),
                );
                return;
            }
            (Some(_), ImportMode::Update | ImportMode::Upsert) if !overwrite => {
                report.skipped += 1;
                report.record_warning(
                    Some(rule_id.clone()),
                    "规则已存在且未允许覆盖，已跳过".to_string(),
                );
                return;
            }
            _ => {}
        }

        // 旧版本覆盖新版本是警告而非阻断
        if let Some(existing) = &existing {
            let old = &existing.definition.version;
            if rule.version.cmp_release(old) != std::cmp::Ordering::Greater {
                report.record_warning(
                    Some(rule_id.clone()),
                    format!(
                        "导入版本 {} 不高于已存在版本 {}",
                        rule.version, old
                    ),
                );
            }
        }

        if options.dry_run {
            report.imported += 1;
            return;
        }

        let stored = StoredRule::new(rule, source_package);
        let persisted = match (options.mode, existing.is_some()) {
            (ImportMode::Create, _) => self.persist_insert(stored).await,
            (ImportMode::Update, _) => self.persist_update(stored).await,
            (ImportMode::Upsert | ImportMode::Replace, _) => self.persist_upsert(stored).await,
        };

        match persisted {
            Ok(()) => report.imported += 1,
            Err(e) => report.record_error(Some(rule_id), e.to_string(), e.code()),
        }
    }

    fn run_test_case(&self, rule: &RuleDefinition, tc: &RuleTestCase) -> std::result::Result<(), String> {
        let profile: EvaluationProfile = match tc.input.as_object() {
            Some(map) => map.clone(),
            None => return Err(format!("用例 {} 的 input 不是对象", tc.id)),
        };

        let outcome = self.evaluator.evaluate(&rule.rule_logic, &profile);

        if let Some(error) = &outcome.error {
            return Err(format!("用例 {} 评估出错: {}", tc.id, error));
        }

        let matched = match tc.expected.as_bool() {
            Some(expected) => is_truthy(&outcome.result) == expected,
            None => outcome.result == tc.expected,
        };

        if matched {
            Ok(())
        } else {
            Err(format!(
                "用例 {} 期望 {} 实际 {}",
                tc.id, tc.expected, outcome.result
            ))
        }
    }

    // -----------------------------------------------------------------------
    // 带重试的存储访问
    // -----------------------------------------------------------------------

    async fn find_existing(&self, rule_id: &str) -> Result<Option<StoredRule>> {
        retry_with_policy(
            &self.retry,
            "rule_store.find_by_id",
            EligibilityError::is_retryable,
            || self.store.find_by_id(rule_id),
        )
        .await
    }

    async fn persist_insert(&self, rule: StoredRule) -> Result<()> {
        retry_with_policy(
            &self.retry,
            "rule_store.insert",
            EligibilityError::is_retryable,
            || self.store.insert(rule.clone()),
        )
        .await
    }

    async fn persist_update(&self, rule: StoredRule) -> Result<()> {
        retry_with_policy(
            &self.retry,
            "rule_store.update",
            EligibilityError::is_retryable,
            || self.store.update(rule.clone()),
        )
        .await
    }

    async fn persist_upsert(&self, rule: StoredRule) -> Result<()> {
        retry_with_policy(
            &self.retry,
            "rule_store.upsert",
            EligibilityError::is_retryable,
            || self.store.upsert(rule.clone()),
        )
        .await
    }
}

/// 给定已导入规则与目标版本，构造取代版本的骨架
///
/// 规则从不原地改版：新版本是一条新定义，supersedes 指向旧 id。
pub fn supersede(definition: &RuleDefinition, new_id: &str, version: RuleVersion) -> RuleDefinition {
    let mut next = definition.clone();
    next.supersedes = Some(definition.id.clone());
    next.id = new_id.to_string();
    next.version = version;
    next.updated_at = chrono::Utc::now();
    next
}
