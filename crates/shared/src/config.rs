//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// 导入管线配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// 单次导入尝试的超时（秒），仅约束外层导入，不会中断进行中的规则评估
    pub timeout_seconds: u64,
    /// 存储瞬时故障的最大重试次数
    pub max_retries: u32,
    /// 首次重试前的等待（毫秒）
    pub initial_backoff_ms: u64,
    /// 退避上限（毫秒）
    pub max_backoff_ms: u64,
    /// 并发导入上限，超出时新导入等待（资源压力闸门）
    pub max_concurrent_imports: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_retries: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            max_concurrent_imports: 8,
        }
    }
}

/// 决策引擎配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 通过率达到该值（且未达 100%）时判定为 likely，低于该值为 maybe
    pub likely_threshold: f64,
    /// 单条规则评估耗时超过该值（毫秒）即标记为慢规则
    pub slow_rule_ms: u64,
    /// 归档/删除旧版本时保留的最近版本数
    pub version_retention: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            likely_threshold: 0.75,
            slow_rule_ms: 100,
            version_retention: 3,
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub service_name: String,
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "eligibility-engine".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub environment: String,
    pub import: ImportConfig,
    pub engine: EngineConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后者覆盖前者）：
    /// 1. 指定路径的配置文件（可选）
    /// 2. `ELIGIBILITY_` 前缀的环境变量，如 `ELIGIBILITY_IMPORT__TIMEOUT_SECONDS=60`
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(false));
        }

        builder = builder.add_source(
            Environment::with_prefix("ELIGIBILITY")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
