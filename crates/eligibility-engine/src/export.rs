//! 规则导出
//!
//! 把存储中的规则导出为单规则 JSON 或带校验和的完整规则包。
//! 校验和在导出时基于规范化 JSON 重算，保证 导出 → 导入 闭环可核验。
//! 规则按 id 排序后写入，同一存储状态的两次导出字节一致。

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument};

use eligibility_shared::error::{EligibilityError, Result};

use crate::checksum;
use crate::models::{PackageMetadata, RuleDefinition, RulePackage};
use crate::store::RuleStore;
use crate::version::RuleVersion;

/// 导出选项
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// 是否保留内嵌测试用例
    pub include_test_cases: bool,
    /// 是否保留变更记录
    pub include_changelog: bool,
    /// JSON 是否缩进输出
    pub pretty: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_test_cases: true,
            include_changelog: true,
            pretty: false,
        }
    }
}

/// 规则导出器
pub struct RuleExporter<S: RuleStore> {
    store: Arc<S>,
}

impl<S: RuleStore> RuleExporter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// 导出单条规则
    #[instrument(skip(self, options))]
    pub async fn export_rule(&self, rule_id: &str, options: &ExportOptions) -> Result<Value> {
        let stored = self.store.find_by_id(rule_id).await?.ok_or_else(|| {
            EligibilityError::RuleNotFound {
                rule_id: rule_id.to_string(),
            }
        })?;

        let rule = strip(stored.definition, options);
        Ok(serde_json::to_value(rule)?)
    }

    /// 把一个项目的全部规则导出为规则包
    ///
    /// 包版本取规则中的最高发布版本，校验和在此处盖章。
    #[instrument(skip(self, options))]
    pub async fn export_program(
        &self,
        program_id: &str,
        options: &ExportOptions,
    ) -> Result<RulePackage> {
        let stored = self.store.find_by_program_id(program_id).await?;
        if stored.is_empty() {
            return Err(EligibilityError::ProgramNotFound {
                program_id: program_id.to_string(),
            });
        }

        let mut rules: Vec<RuleDefinition> = stored
            .into_iter()
            .map(|s| strip(s.definition, options))
            .collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));

        let package_version = rules
            .iter()
            .map(|r| r.version.clone())
            .max_by(|a, b| a.cmp_release(b))
            .unwrap_or_else(|| RuleVersion::new(1, 0, 0));

        let metadata = PackageMetadata {
            id: format!("{}-rules", program_id),
            name: format!("{} rules", program_id),
            description: None,
            version: package_version,
            author: None,
            license: None,
            homepage: None,
            repository: None,
            jurisdiction: rules.iter().find_map(|r| r.jurisdiction.clone()),
            programs: vec![program_id.to_string()],
            tags: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        self.seal(metadata, rules)
    }

    /// 用调用方提供的元数据把指定规则导出为规则包
    #[instrument(skip(self, metadata, options))]
    pub async fn export_package(
        &self,
        metadata: PackageMetadata,
        rule_ids: &[String],
        options: &ExportOptions,
    ) -> Result<RulePackage> {
        let mut rules = Vec::with_capacity(rule_ids.len());
        for rule_id in rule_ids {
            let stored = self.store.find_by_id(rule_id).await?.ok_or_else(|| {
                EligibilityError::RuleNotFound {
                    rule_id: rule_id.clone(),
                }
            })?;
            rules.push(strip(stored.definition, options));
        }
        rules.sort_by(|a, b| a.id.cmp(&b.id));

        self.seal(metadata, rules)
    }

    /// 序列化为 JSON 字符串
    pub fn to_json(&self, package: &RulePackage, options: &ExportOptions) -> Result<String> {
        let json = if options.pretty {
            serde_json::to_string_pretty(package)?
        } else {
            serde_json::to_string(package)?
        };
        Ok(json)
    }

    fn seal(&self, metadata: PackageMetadata, rules: Vec<RuleDefinition>) -> Result<RulePackage> {
        let checksum = checksum::package_checksum(&metadata, &rules)?;
        info!(
            package_id = %metadata.id,
            rules = rules.len(),
            checksum = %checksum,
            "规则包已导出"
        );
        Ok(RulePackage {
            metadata,
            rules,
            checksum: Some(checksum),
            signature: None,
        })
    }
}

fn strip(mut rule: RuleDefinition, options: &ExportOptions) -> RuleDefinition {
    if !options.include_test_cases {
        rule.test_cases.clear();
    }
    if !options.include_changelog {
        rule.changelog.clear();
    }
    rule
}
