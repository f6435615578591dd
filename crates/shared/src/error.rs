//! 统一错误处理模块
//!
//! 定义系统中所有共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 每个错误变体都对应一个稳定的错误码，供导入结果与日志关联使用。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum EligibilityError {
    // ==================== 结构/格式错误 ====================
    #[error("规则格式无效: {path} - {message}")]
    InvalidFormat { path: String, message: String },

    #[error("JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),

    // ==================== 完整性错误 ====================
    #[error("包校验和不匹配: 期望 {expected}, 实际 {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    // ==================== 冲突错误 ====================
    #[error("规则 ID 重复: {rule_id}")]
    DuplicateId { rule_id: String },

    // ==================== 规则逻辑错误 ====================
    #[error("规则逻辑无效: {0}")]
    InvalidLogic(String),

    #[error("规则测试用例失败: {rule_id} - {message}")]
    TestFailed { rule_id: String, message: String },

    // ==================== 存储错误 ====================
    #[error("存储错误: {0}")]
    Database(String),

    #[error("规则未找到: rule_id={rule_id}")]
    RuleNotFound { rule_id: String },

    #[error("项目下没有任何规则: program_id={program_id}")]
    ProgramNotFound { program_id: String },

    // ==================== 版本/迁移错误 ====================
    #[error("版本号无效: '{0}'")]
    InvalidVersion(String),

    #[error("无可用迁移: 程序 {program_id} 从 {from} 到 {to}")]
    NoMigrationPath {
        program_id: String,
        from: String,
        to: String,
    },

    #[error("迁移执行失败: {0}")]
    MigrationFailed(String),

    // ==================== 资源/超时错误 ====================
    #[error("操作超时: {operation}")]
    Timeout { operation: String },

    #[error("资源压力过大，操作被延迟拒绝: {operation}")]
    ResourceExhausted { operation: String },

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, EligibilityError>;

impl EligibilityError {
    /// 获取稳定错误码
    ///
    /// 错误码写入导入结果的 errors 条目，供调用方程序化处理。
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFormat { .. } => "INVALID_FORMAT",
            Self::Json(_) => "INVALID_FORMAT",
            Self::ChecksumMismatch { .. } => "CHECKSUM_MISMATCH",
            Self::DuplicateId { .. } => "DUPLICATE_ID",
            Self::InvalidLogic(_) => "INVALID_FORMAT",
            Self::TestFailed { .. } => "TEST_FAILED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::RuleNotFound { .. } => "RULE_NOT_FOUND",
            Self::ProgramNotFound { .. } => "PROGRAM_NOT_FOUND",
            Self::InvalidVersion(_) => "INVALID_VERSION",
            Self::NoMigrationPath { .. } => "NO_MIGRATION_PATH",
            Self::MigrationFailed(_) => "MIGRATION_FAILED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::ResourceExhausted { .. } => "RESOURCE_EXHAUSTED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 仅瞬时故障（存储抖动、超时）可重试；结构性错误重试无意义。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Timeout { .. })
    }
}
