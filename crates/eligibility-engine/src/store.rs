//! 规则存储契约
//!
//! 引擎只依赖存储协作方的 CRUD 契约，不关心其内部实现。
//! 冲突解决期间存储是“已存在规则”的唯一事实来源。
//! 内置基于 DashMap 的内存实现，供嵌入方与测试使用。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use eligibility_shared::error::{EligibilityError, Result};

use crate::models::RuleDefinition;

/// 持久化形态的规则
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRule {
    pub definition: RuleDefinition,
    pub imported_at: DateTime<Utc>,
    /// 来源规则包 id（单规则导入时为 None）
    #[serde(default)]
    pub source_package: Option<String>,
}

impl StoredRule {
    pub fn new(definition: RuleDefinition, source_package: Option<String>) -> Self {
        Self {
            definition,
            imported_at: Utc::now(),
            source_package,
        }
    }

    pub fn rule_id(&self) -> &str {
        &self.definition.id
    }
}

/// 规则存储契约（awaited CRUD）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn find_by_id(&self, rule_id: &str) -> Result<Option<StoredRule>>;
    async fn find_by_program_id(&self, program_id: &str) -> Result<Vec<StoredRule>>;
    async fn insert(&self, rule: StoredRule) -> Result<()>;
    async fn upsert(&self, rule: StoredRule) -> Result<()>;
    async fn update(&self, rule: StoredRule) -> Result<()>;
    async fn remove(&self, rule_id: &str) -> Result<()>;
    /// 全量枚举，供归档/删除与跨项目评估使用
    async fn list_all(&self) -> Result<Vec<StoredRule>>;
}

/// 内存规则存储
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    rules: DashMap<String, StoredRule>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn find_by_id(&self, rule_id: &str) -> Result<Option<StoredRule>> {
        Ok(self.rules.get(rule_id).map(|r| r.clone()))
    }

    async fn find_by_program_id(&self, program_id: &str) -> Result<Vec<StoredRule>> {
        Ok(self
            .rules
            .iter()
            .filter(|r| r.definition.program_id == program_id)
            .map(|r| r.clone())
            .collect())
    }

    #[instrument(skip(self, rule), fields(rule_id = %rule.rule_id()))]
    async fn insert(&self, rule: StoredRule) -> Result<()> {
        let rule_id = rule.rule_id().to_string();
        if self.rules.contains_key(&rule_id) {
            return Err(EligibilityError::DuplicateId { rule_id });
        }
        self.rules.insert(rule_id.clone(), rule);
        info!("规则已写入: {}", rule_id);
        Ok(())
    }

    #[instrument(skip(self, rule), fields(rule_id = %rule.rule_id()))]
    async fn upsert(&self, rule: StoredRule) -> Result<()> {
        self.rules.insert(rule.rule_id().to_string(), rule);
        Ok(())
    }

    #[instrument(skip(self, rule), fields(rule_id = %rule.rule_id()))]
    async fn update(&self, rule: StoredRule) -> Result<()> {
        let rule_id = rule.rule_id().to_string();
        if !self.rules.contains_key(&rule_id) {
            return Err(EligibilityError::RuleNotFound { rule_id });
        }
        self.rules.insert(rule_id, rule);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, rule_id: &str) -> Result<()> {
        if self.rules.remove(rule_id).is_none() {
            return Err(EligibilityError::RuleNotFound {
                rule_id: rule_id.to_string(),
            });
        }
        info!("规则已删除: {}", rule_id);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<StoredRule>> {
        Ok(self.rules.iter().map(|r| r.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_rule(id: &str, program_id: &str) -> RuleDefinition {
        serde_json::from_value(json!({
            "id": id,
            "programId": program_id,
            "name": format!("rule {}", id),
            "ruleLogic": {"==": [1, 1]},
            "ruleType": "eligibility",
            "version": {"major": 1, "minor": 0, "patch": 0}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = MemoryRuleStore::new();
        store
            .insert(StoredRule::new(sample_rule("r1", "snap"), None))
            .await
            .unwrap();

        let found = store.find_by_id("r1").await.unwrap().unwrap();
        assert_eq!(found.definition.program_id, "snap");
        assert!(store.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_duplicate_rejected() {
        let store = MemoryRuleStore::new();
        store
            .insert(StoredRule::new(sample_rule("r1", "snap"), None))
            .await
            .unwrap();

        let err = store
            .insert(StoredRule::new(sample_rule("r1", "snap"), None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_ID");
    }

    #[tokio::test]
    async fn test_upsert_overwrites_without_duplicates() {
        let store = MemoryRuleStore::new();
        store
            .upsert(StoredRule::new(sample_rule("r1", "snap"), None))
            .await
            .unwrap();
        store
            .upsert(StoredRule::new(sample_rule("r1", "snap"), None))
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_rejected() {
        let store = MemoryRuleStore::new();
        let err = store
            .update(StoredRule::new(sample_rule("ghost", "snap"), None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RULE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_find_by_program_id() {
        let store = MemoryRuleStore::new();
        store
            .insert(StoredRule::new(sample_rule("r1", "snap"), None))
            .await
            .unwrap();
        store
            .insert(StoredRule::new(sample_rule("r2", "snap"), None))
            .await
            .unwrap();
        store
            .insert(StoredRule::new(sample_rule("r3", "medicaid"), None))
            .await
            .unwrap();

        assert_eq!(store.find_by_program_id("snap").await.unwrap().len(), 2);
        assert_eq!(store.find_by_program_id("medicaid").await.unwrap().len(), 1);
        assert!(store.find_by_program_id("wic").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryRuleStore::new();
        store
            .insert(StoredRule::new(sample_rule("r1", "snap"), None))
            .await
            .unwrap();

        store.remove("r1").await.unwrap();
        assert!(store.is_empty());
        assert!(store.remove("r1").await.is_err());
    }
}
