//! 规则引擎领域模型
//!
//! 定义规则、规则包、导入选项/结果以及资格评估结果的核心结构体。
//! 所有线上 JSON 格式均为 camelCase。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::version::RuleVersion;

/// 家庭画像：外部提供的扁平 字段 → 值 映射，本引擎不约束其 schema
pub type EvaluationProfile = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// 规则定义
// ---------------------------------------------------------------------------

/// 规则类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    /// 资格判定规则，参与通过/未通过统计
    Eligibility,
    /// 福利金额计算规则
    BenefitAmount,
    /// 材料要求规则
    DocumentRequirements,
    /// 条件规则
    Conditional,
}

/// 规则分类
///
/// 决策管线据此划分收入阶段与决定性排除项，取代对 id/名称的子串嗅探。
/// 作者未显式标注时在校验阶段推断一次并落在定义上。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleClassification {
    /// 收入相关，收入阶段优先评估，失败即硬性止损
    Income,
    /// 类别性条件（年龄、残障、失明、怀孕/子女等），失败为决定性排除
    Categorical,
    /// 材料类条件
    Document,
    /// 其他
    Other,
}

/// 规则内嵌测试用例
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleTestCase {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    /// 测试输入：一份家庭画像
    pub input: Value,
    /// 期望结果：布尔时按真值比较，否则按值比较
    pub expected: Value,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// 变更记录条目
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangelogEntry {
    pub version: RuleVersion,
    pub author: String,
    pub description: String,
    #[serde(default)]
    pub breaking: bool,
}

fn default_true() -> bool {
    true
}

/// 规则定义
///
/// 规则一经创建只能通过版本化取代演进（active/draft 开关除外），
/// 超过保留窗口的旧版本经归档/删除退役。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDefinition {
    /// 全局唯一标识
    pub id: String,
    pub program_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// 以操作符为键的递归逻辑表达式树
    pub rule_logic: Value,
    pub rule_type: RuleType,
    #[serde(default)]
    pub classification: Option<RuleClassification>,
    /// 面向申请人的通俗解释文本
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub required_documents: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    pub version: RuleVersion,
    #[serde(default)]
    pub effective_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
    /// 被本版本取代的规则 id
    #[serde(default)]
    pub supersedes: Option<String>,
    #[serde(default)]
    pub citations: Vec<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub legal_reference: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub test_cases: Vec<RuleTestCase>,
    #[serde(default)]
    pub changelog: Vec<ChangelogEntry>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
}

impl RuleDefinition {
    /// 分类读取：未标注时按 Other 处理
    ///
    /// 正常路径下校验阶段已推断并落库，这里只是兜底。
    pub fn classification_or_other(&self) -> RuleClassification {
        self.classification.unwrap_or(RuleClassification::Other)
    }

    /// 是否参与资格通过/未通过统计
    pub fn counts_toward_eligibility(&self) -> bool {
        matches!(
            self.rule_type,
            RuleType::Eligibility | RuleType::Conditional
        )
    }
}

// ---------------------------------------------------------------------------
// 规则包
// ---------------------------------------------------------------------------

/// 规则包元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub version: RuleVersion,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub programs: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// 规则包
///
/// 一旦写入校验和即视为不可变：导入时重算校验和，
/// 不一致则整包判定为损坏并拒绝。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulePackage {
    pub metadata: PackageMetadata,
    pub rules: Vec<RuleDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

// ---------------------------------------------------------------------------
// 导入选项与结果
// ---------------------------------------------------------------------------

/// 导入模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// 仅新建，id 已存在时报 DUPLICATE_ID 错误
    Create,
    /// 仅更新已存在的规则
    Update,
    /// 存在则更新，不存在则新建
    Upsert,
    /// 替换：按 upsert 处理且隐含覆盖
    Replace,
}

/// 导入选项
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    pub mode: ImportMode,
    /// 是否执行 schema 校验
    pub validate: bool,
    /// 是否跳过内嵌测试用例
    pub skip_tests: bool,
    /// update/upsert 模式下是否允许覆盖已存在的规则
    pub overwrite_existing: bool,
    /// 只做检查不落库
    pub dry_run: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            mode: ImportMode::Upsert,
            validate: true,
            skip_tests: false,
            overwrite_existing: false,
            dry_run: false,
        }
    }
}

/// 导入错误条目
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportIssue {
    #[serde(default)]
    pub rule_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

/// 导入警告条目
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportWarning {
    #[serde(default)]
    pub rule_id: Option<String>,
    pub message: String,
}

/// 导入结果
///
/// 可克隆，以便合并的并发导入调用共享同一份结果。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub success: bool,
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<ImportIssue>,
    pub warnings: Vec<ImportWarning>,
    pub dry_run: bool,
    /// 本次导入操作的关联 id，用于日志追踪
    pub operation_id: Uuid,
}

impl ImportReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            success: true,
            imported: 0,
            skipped: 0,
            failed: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            dry_run,
            operation_id: Uuid::new_v4(),
        }
    }

    /// 记录一条规则级错误并计入 failed
    pub fn record_error(
        &mut self,
        rule_id: Option<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) {
        self.failed += 1;
        self.success = false;
        self.errors.push(ImportIssue {
            rule_id,
            message: message.into(),
            code: Some(code.into()),
        });
    }

    /// 记录一条警告，不影响导入成败
    pub fn record_warning(&mut self, rule_id: Option<String>, message: impl Into<String>) {
        self.warnings.push(ImportWarning {
            rule_id,
            message: message.into(),
        });
    }
}

// ---------------------------------------------------------------------------
// 资格评估结果（派生、短暂，从不持久化）
// ---------------------------------------------------------------------------

/// 资格状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EligibilityStatus {
    /// 全部规则通过
    Qualified,
    /// 通过率较高但未达 100%
    Likely,
    /// 通过率偏低
    Maybe,
    /// 未通过（含收入硬性止损与决定性排除）
    NotQualified,
    /// 无可用规则，无法判定
    Indeterminate,
}

/// 置信级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    /// 按 0–100 置信分划档
    pub fn from_score(score: u8) -> Self {
        match score {
            80..=100 => Self::High,
            50..=79 => Self::Medium,
            _ => Self::Low,
        }
    }
}

/// 结构化计算明细（例如 收入 vs 阈值）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Calculation {
    pub rule_id: String,
    pub description: String,
    pub observed: f64,
    pub threshold: f64,
    pub passed: bool,
}

/// 可读解释
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityExplanation {
    pub reason: String,
    /// 每条规则一行，✓/✗ 前缀
    pub details: Vec<String>,
    pub rules_cited: Vec<String>,
    #[serde(default)]
    pub calculations: Vec<Calculation>,
}

/// 单个项目的资格评估结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramEligibilityResult {
    pub program_id: String,
    #[serde(default)]
    pub program_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    pub status: EligibilityStatus,
    pub confidence: ConfidenceLevel,
    /// 0–100
    pub confidence_score: u8,
    pub explanation: EligibilityExplanation,
    pub required_documents: Vec<String>,
    pub next_steps: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
    /// 参与评估的规则中的最高版本
    #[serde(default)]
    pub rules_version: Option<RuleVersion>,
    /// 收入硬性止损的结构化标记（取代对 reason 文本的嗅探）
    #[serde(default)]
    pub income_hard_stop: bool,
}

/// 跨项目归类结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorizedPrograms {
    pub qualified: Vec<ProgramEligibilityResult>,
    pub likely: Vec<ProgramEligibilityResult>,
    pub maybe: Vec<ProgramEligibilityResult>,
    pub not_qualified: Vec<ProgramEligibilityResult>,
    /// not_qualified 中因收入硬性止损而排除的项目 id 子桶
    pub income_hard_stops: Vec<String>,
}
