//! 引擎门面
//!
//! 把存储、导入/导出、版本迁移、决策管线与性能监控装配为一个入口。
//! 评估器与领域操作符集在构造时固定，运行期不可变。

use std::sync::Arc;
use std::time::Duration;

use eligibility_shared::config::AppConfig;
use eligibility_shared::error::Result;

use crate::export::{ExportOptions, RuleExporter};
use crate::import::RuleImporter;
use crate::logic::Evaluator;
use crate::migration::{self, MigrationRegistry, MigrationSummary, VersionMigration};
use crate::models::{
    CategorizedPrograms, EvaluationProfile, ImportOptions, ImportReport,
    ProgramEligibilityResult, RulePackage,
};
use crate::monitor::PerformanceMonitor;
use crate::pipeline::EligibilityPipeline;
use crate::store::{MemoryRuleStore, RuleStore};
use crate::version::RuleVersion;

/// 资格决策引擎
pub struct EligibilityEngine<S: RuleStore> {
    store: Arc<S>,
    importer: RuleImporter<S>,
    exporter: RuleExporter<S>,
    migrations: MigrationRegistry,
    monitor: Arc<PerformanceMonitor>,
    pipeline: EligibilityPipeline<S>,
    config: AppConfig,
}

impl EligibilityEngine<MemoryRuleStore> {
    /// 内存存储 + 福利领域标准操作符集
    pub fn in_memory(config: AppConfig) -> Self {
        Self::new(Arc::new(MemoryRuleStore::new()), config)
    }
}

impl<S: RuleStore> EligibilityEngine<S> {
    pub fn new(store: Arc<S>, config: AppConfig) -> Self {
        Self::with_evaluator(store, config, Evaluator::benefits())
    }

    /// 自定义评估器（附加领域操作符时使用）
    pub fn with_evaluator(store: Arc<S>, config: AppConfig, evaluator: Evaluator) -> Self {
        let monitor = Arc::new(PerformanceMonitor::new(Duration::from_millis(
            config.engine.slow_rule_ms,
        )));
        let importer = RuleImporter::new(store.clone(), evaluator.clone(), config.import.clone());
        let exporter = RuleExporter::new(store.clone());
        let pipeline = EligibilityPipeline::new(
            store.clone(),
            evaluator,
            config.engine.clone(),
            monitor.clone(),
        );

        Self {
            store,
            importer,
            exporter,
            migrations: MigrationRegistry::new(),
            monitor,
            pipeline,
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    // ---- 导入 / 导出 ----

    pub async fn import_rule(
        &self,
        raw: &serde_json::Value,
        options: &ImportOptions,
    ) -> ImportReport {
        self.importer.import_rule(raw, options).await
    }

    pub async fn import_package(
        &self,
        raw: &serde_json::Value,
        options: &ImportOptions,
    ) -> ImportReport {
        self.importer.import_package(raw, options).await
    }

    pub async fn import_from_json(&self, payload: &str, options: &ImportOptions) -> ImportReport {
        self.importer.import_from_json(payload, options).await
    }

    pub async fn export_rule(
        &self,
        rule_id: &str,
        options: &ExportOptions,
    ) -> Result<serde_json::Value> {
        self.exporter.export_rule(rule_id, options).await
    }

    pub async fn export_program(
        &self,
        program_id: &str,
        options: &ExportOptions,
    ) -> Result<RulePackage> {
        self.exporter.export_program(program_id, options).await
    }

    // ---- 版本迁移与保留 ----

    pub fn register_migration(&self, program_id: &str, migration: VersionMigration) {
        self.migrations.register(program_id, migration);
    }

    pub fn migrations(&self) -> &MigrationRegistry {
        &self.migrations
    }

    pub async fn migrate_program(
        &self,
        program_id: &str,
        to: &RuleVersion,
    ) -> Result<MigrationSummary> {
        self.migrations
            .migrate_program(self.store.as_ref(), program_id, to)
            .await
    }

    /// 归档保留窗口之外的旧版本规则
    pub async fn archive_old_versions(&self) -> Result<usize> {
        migration::archive_old_versions(self.store.as_ref(), self.config.engine.version_retention)
            .await
    }

    /// 删除保留窗口之外的旧版本规则
    pub async fn delete_old_versions(&self) -> Result<usize> {
        migration::delete_old_versions(self.store.as_ref(), self.config.engine.version_retention)
            .await
    }

    // ---- 资格评估 ----

    pub async fn evaluate_program(
        &self,
        program_id: &str,
        profile: &EvaluationProfile,
    ) -> Result<ProgramEligibilityResult> {
        self.pipeline.evaluate_program(program_id, profile).await
    }

    pub async fn evaluate_all(
        &self,
        profile: &EvaluationProfile,
    ) -> Result<Vec<ProgramEligibilityResult>> {
        self.pipeline.evaluate_all(profile).await
    }

    /// 全量评估并按状态归类
    pub async fn screen(&self, profile: &EvaluationProfile) -> Result<CategorizedPrograms> {
        let results = self.pipeline.evaluate_all(profile).await?;
        Ok(EligibilityPipeline::<S>::categorize(results))
    }
}
