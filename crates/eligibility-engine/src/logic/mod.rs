//! 逻辑表达式评估
//!
//! 规则逻辑是以操作符为键的递归 JSON 结构（比较、布尔组合、成员测试、
//! 变量查找），外加一组领域操作符。领域操作符以显式、不可变的
//! [`OperatorSet`] 作为评估器实例的参数传入，不存在进程级共享可变注册表，
//! 并发批次之间没有竞争。
//!
//! 任何失败都不会越过 evaluate 边界：全部折叠为
//! `LogicOutcome { success: false, error: Some(..) }`。

mod ast;
mod evaluator;
mod operators;

pub use ast::{CompiledLogic, LogicNode, compile};
pub use evaluator::{Evaluator, LogicOutcome, is_truthy};
pub use operators::OperatorSet;

use thiserror::Error;

/// 评估器内部错误
///
/// 仅在 logic 模块内部与编译入口流动；评估入口把它折叠进 LogicOutcome。
#[derive(Debug, Clone, Error)]
pub enum LogicError {
    #[error("未知操作符: {0}")]
    UnknownOperator(String),

    #[error("操作符 {operator} 参数数量无效: 期望 {expected}, 实际 {actual}")]
    InvalidArity {
        operator: String,
        expected: String,
        actual: usize,
    },

    #[error("操作符 {operator} 参数类型无效: {message}")]
    InvalidArgument { operator: String, message: String },

    #[error("除以零")]
    DivisionByZero,

    #[error("正则表达式无效 '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error("领域操作符 {0} 执行失败: {1}")]
    CustomOperator(String, String),
}
