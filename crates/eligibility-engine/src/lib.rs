//! 资格决策规则引擎
//!
//! 对政府福利项目的授权规则进行版本化管理与资格评估，提供：
//! - 带 schema 校验的规则/规则包数据模型与版本模型
//! - 基于校验和的规则包完整性检查与多模式冲突解决的导入/导出管线
//! - 按程序注册的版本迁移链应用器
//! - 收入优先、可短路、可解释的两阶段资格决策管线
//! - 评估耗时监控与慢规则标记

pub mod checksum;
pub mod engine;
pub mod explanation;
pub mod export;
pub mod import;
pub mod logic;
pub mod migration;
pub mod models;
pub mod monitor;
pub mod pipeline;
pub mod schema;
pub mod store;
pub mod version;

pub use engine::EligibilityEngine;
pub use export::{ExportOptions, RuleExporter};
pub use import::RuleImporter;
pub use logic::{Evaluator, LogicOutcome, OperatorSet};
pub use migration::{MigrationRegistry, MigrationSummary, VersionMigration};
pub use models::{
    CategorizedPrograms, EligibilityStatus, EvaluationProfile, ImportMode, ImportOptions,
    ImportReport, ProgramEligibilityResult, RuleClassification, RuleDefinition, RulePackage,
    RuleType,
};
pub use monitor::PerformanceMonitor;
pub use pipeline::EligibilityPipeline;
pub use store::{MemoryRuleStore, RuleStore, StoredRule};
pub use version::{RuleVersion, VersionLevel};
