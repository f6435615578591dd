//! 规则版本迁移与保留
//!
//! 迁移按项目注册，每一步声明 from → to 版本对与一个对规则定义原始 JSON
//! 的纯转换函数。跨版本迁移通过逐步串联完成，链路出现缺口时报
//! NO_MIGRATION_PATH，绝不跳跃猜测。
//!
//! 版本比较忽略预发布标签：1.2.0-beta 与 1.2.0 在迁移路径上视为同一发布。
//!
//! 保留策略：每条版本沿革（supersedes 链）只保留最新 N 个版本，
//! 更旧的版本归档（置为 inactive）或删除。

use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use eligibility_shared::error::{EligibilityError, Result};

use crate::models::RuleDefinition;
use crate::store::{RuleStore, StoredRule};
use crate::version::RuleVersion;

/// 迁移转换函数：输入旧格式的规则定义 JSON，输出新格式
pub type MigrationFn = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// 一步版本迁移
#[derive(Clone)]
pub struct VersionMigration {
    pub from_version: RuleVersion,
    pub to_version: RuleVersion,
    pub description: String,
    pub migrate: MigrationFn,
}

impl VersionMigration {
    pub fn new(
        from_version: RuleVersion,
        to_version: RuleVersion,
        description: impl Into<String>,
        migrate: impl Fn(Value) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            from_version,
            to_version,
            description: description.into(),
            migrate: Arc::new(migrate),
        }
    }
}

impl std::fmt::Debug for VersionMigration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionMigration")
            .field("from_version", &self.from_version)
            .field("to_version", &self.to_version)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// 批量迁移统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    pub migrated: usize,
    pub skipped: usize,
    pub errored: usize,
}

/// 按项目组织的迁移注册表
#[derive(Default)]
pub struct MigrationRegistry {
    migrations: DashMap<String, Vec<VersionMigration>>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, program_id: &str, migration: VersionMigration) {
        self.migrations
            .entry(program_id.to_string())
            .or_default()
            .push(migration);
    }

    /// 求 from → to 的迁移链
    ///
    /// 逐步匹配 from_version，且每一步的 to_version 不得越过目标；
    /// 缺口或只剩越过目标的步骤时报 NO_MIGRATION_PATH。
    pub fn migrations_between(
        &self,
        program_id: &str,
        from: &RuleVersion,
        to: &RuleVersion,
    ) -> Result<Vec<VersionMigration>> {
        if from.cmp_release(to).is_ge() {
            return Ok(Vec::new());
        }

        let registered = self
            .migrations
            .get(program_id)
            .map(|m| m.clone())
            .unwrap_or_default();

        let mut chain = Vec::new();
        let mut current = from.clone();
        while current.cmp_release(to).is_lt() {
            let step = registered
                .iter()
                .find(|m| {
                    m.from_version.cmp_release(&current).is_eq()
                        && m.to_version.cmp_release(to).is_le()
                })
                .cloned();
            match step {
                Some(step) => {
                    current = step.to_version.clone();
                    chain.push(step);
                }
                None => {
                    return Err(EligibilityError::NoMigrationPath {
                        program_id: program_id.to_string(),
                        from: from.to_string(),
                        to: to.to_string(),
                    });
                }
            }
        }
        Ok(chain)
    }

    /// 把一条规则迁移到目标版本
    ///
    /// 对定义的原始 JSON 依次应用迁移链，最后盖上目标版本。
    #[instrument(skip(self, rule), fields(rule_id = %rule.id, from = %rule.version, to = %to))]
    pub fn migrate_rule(&self, rule: &RuleDefinition, to: &RuleVersion) -> Result<RuleDefinition> {
        let chain = self.migrations_between(&rule.program_id, &rule.version, to)?;
        if chain.is_empty() {
            return Ok(rule.clone());
        }

        let mut raw = serde_json::to_value(rule)?;
        for step in &chain {
            raw = (step.migrate)(raw).map_err(|e| {
                warn!(
                    rule_id = %rule.id,
                    step = %step.description,
                    error = %e,
                    "迁移步骤失败"
                );
                EligibilityError::MigrationFailed(format!("{}: {}", step.description, e))
            })?;
        }

        let mut migrated: RuleDefinition = serde_json::from_value(raw).map_err(|e| {
            EligibilityError::MigrationFailed(format!("迁移产出不是合法的规则定义: {}", e))
        })?;
        migrated.version = to.clone();
        migrated.updated_at = chrono::Utc::now();

        info!(rule_id = %rule.id, steps = chain.len(), "规则迁移完成");
        Ok(migrated)
    }

    /// 把一个项目的全部规则迁移到目标版本并落库
    ///
    /// 已达到或高于目标版本的规则计入 skipped；单条失败不中断批次。
    #[instrument(skip(self, store))]
    pub async fn migrate_program<S: RuleStore>(
        &self,
        store: &S,
        program_id: &str,
        to: &RuleVersion,
    ) -> Result<MigrationSummary> {
        let mut summary = MigrationSummary::default();

        for stored in store.find_by_program_id(program_id).await? {
            if stored.definition.version.cmp_release(to).is_ge() {
                summary.skipped += 1;
                continue;
            }

            match self.migrate_rule(&stored.definition, to) {
                Ok(migrated) => {
                    let next = StoredRule::new(migrated, stored.source_package.clone());
                    match store.upsert(next).await {
                        Ok(()) => summary.migrated += 1,
                        Err(e) => {
                            warn!(rule_id = %stored.rule_id(), error = %e, "迁移结果写入失败");
                            summary.errored += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(rule_id = %stored.rule_id(), error = %e, "规则迁移失败");
                    summary.errored += 1;
                }
            }
        }

        info!(
            program_id,
            migrated = summary.migrated,
            skipped = summary.skipped,
            errored = summary.errored,
            "项目迁移完成"
        );
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// 保留策略 — 版本沿革的归档与清理
// ---------------------------------------------------------------------------

/// 把每条沿革中超出保留窗口的旧版本置为 inactive，返回归档条数
pub async fn archive_old_versions<S: RuleStore>(store: &S, retention: usize) -> Result<usize> {
    let mut archived = 0;
    for stored in beyond_retention(store, retention).await? {
        if !stored.definition.active {
            continue;
        }
        let mut next = stored.clone();
        next.definition.active = false;
        store.update(next).await?;
        archived += 1;
    }
    if archived > 0 {
        info!(archived, retention, "旧版本规则已归档");
    }
    Ok(archived)
}

/// 把每条沿革中超出保留窗口的旧版本从存储中删除，返回删除条数
pub async fn delete_old_versions<S: RuleStore>(store: &S, retention: usize) -> Result<usize> {
    let mut deleted = 0;
    for stored in beyond_retention(store, retention).await? {
        store.remove(stored.rule_id()).await?;
        deleted += 1;
    }
    if deleted > 0 {
        info!(deleted, retention, "旧版本规则已删除");
    }
    Ok(deleted)
}

/// 按 supersedes 链聚沿革，返回每条沿革中最新 retention 个之外的版本
async fn beyond_retention<S: RuleStore>(store: &S, retention: usize) -> Result<Vec<StoredRule>> {
    let all = store.list_all().await?;
    let by_id: HashMap<&str, &StoredRule> =
        all.iter().map(|s| (s.rule_id(), s)).collect();

    // 沿革 key = supersedes 链的最老祖先 id
    let mut lineages: HashMap<String, Vec<&StoredRule>> = HashMap::new();
    for stored in &all {
        let mut root = stored.rule_id();
        let mut hops = 0;
        while let Some(parent) = by_id
            .get(root)
            .and_then(|s| s.definition.supersedes.as_deref())
            && by_id.contains_key(parent)
            && hops < all.len()
        {
            root = parent;
            hops += 1;
        }
        lineages.entry(root.to_string()).or_default().push(stored);
    }

    let mut stale = Vec::new();
    for (_, mut lineage) in lineages {
        if lineage.len() <= retention {
            continue;
        }
        lineage.sort_by(|a, b| b.definition.version.cmp_release(&a.definition.version));
        stale.extend(lineage.into_iter().skip(retention).cloned());
    }
    Ok(stale)
}
