//! 逻辑表达式编译
//!
//! 把以操作符为键的 JSON 表达式树解析为类型化的执行树，同时完成
//! 操作符白名单与参数数量检查，并收集引用到的变量路径
//! （供 requiredFields 可达性检查使用）。

use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

use super::{LogicError, OperatorSet};

/// 比较操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// 算术操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
}

/// 类型化逻辑节点
#[derive(Debug, Clone)]
pub enum LogicNode {
    /// 字面量（对象以外的 JSON 值，或操作符参数中的字面数组）
    Literal(Value),
    /// 变量查找，支持点号路径与可选默认值
    Var {
        path: String,
        default: Option<Box<LogicNode>>,
    },
    /// 缺失字段检查，结果为缺失的变量名数组
    Missing(Vec<String>),
    Compare {
        op: CompareOp,
        args: Vec<LogicNode>,
    },
    And(Vec<LogicNode>),
    Or(Vec<LogicNode>),
    Not(Box<LogicNode>),
    /// if 链: [条件, 结果, 条件, 结果, ..., 兜底]
    If(Vec<LogicNode>),
    /// 成员测试：元素在数组中 / 子串在字符串中
    In {
        needle: Box<LogicNode>,
        haystack: Box<LogicNode>,
    },
    /// 正则匹配，模式在编译期预编译
    Matches {
        value: Box<LogicNode>,
        pattern: Regex,
    },
    Arith {
        op: ArithOp,
        args: Vec<LogicNode>,
    },
    /// 领域操作符调用
    Custom {
        name: String,
        args: Vec<LogicNode>,
    },
}

/// 编译后的逻辑表达式
#[derive(Debug, Clone)]
pub struct CompiledLogic {
    pub root: LogicNode,
    /// 表达式引用到的全部变量路径
    pub variables: HashSet<String>,
}

/// 编译表达式树
///
/// 未知操作符（核心集与领域集之外）一律拒绝。
pub fn compile(tree: &Value, operators: &OperatorSet) -> Result<CompiledLogic, LogicError> {
    let mut variables = HashSet::new();
    let root = compile_node(tree, operators, &mut variables)?;
    Ok(CompiledLogic { root, variables })
}

fn compile_node(
    value: &Value,
    operators: &OperatorSet,
    variables: &mut HashSet<String>,
) -> Result<LogicNode, LogicError> {
    let Value::Object(map) = value else {
        return Ok(LogicNode::Literal(value.clone()));
    };

    // 只有恰好一个键的对象才是操作符表达式，其余对象是字面数据
    // （例如 household_threshold 的 人数 → 阈值 表）
    if map.len() != 1 {
        return Ok(LogicNode::Literal(value.clone()));
    }

    let (op, raw_args) = map.iter().next().ok_or_else(|| LogicError::InvalidArgument {
        operator: "<expression>".to_string(),
        message: "空表达式对象".to_string(),
    })?;

    match op.as_str() {
        "var" => compile_var(raw_args, operators, variables),
        "missing" => compile_missing(raw_args, variables),
        "==" => compile_compare(CompareOp::Eq, op, raw_args, operators, variables),
        "!=" => compile_compare(CompareOp::Neq, op, raw_args, operators, variables),
        ">" => compile_compare(CompareOp::Gt, op, raw_args, operators, variables),
        ">=" => compile_compare(CompareOp::Gte, op, raw_args, operators, variables),
        "<" => compile_compare(CompareOp::Lt, op, raw_args, operators, variables),
        "<=" => compile_compare(CompareOp::Lte, op, raw_args, operators, variables),
        "and" => Ok(LogicNode::And(compile_args(
            op, raw_args, 1, usize::MAX, operators, variables,
        )?)),
        "or" => Ok(LogicNode::Or(compile_args(
            op, raw_args, 1, usize::MAX, operators, variables,
        )?)),
        "!" | "not" => {
            let mut args = compile_args(op, raw_args, 1, 1, operators, variables)?;
            Ok(LogicNode::Not(Box::new(args.remove(0))))
        }
        "if" => Ok(LogicNode::If(compile_args(
            op, raw_args, 2, usize::MAX, operators, variables,
        )?)),
        "in" => {
            let mut args = compile_args(op, raw_args, 2, 2, operators, variables)?;
            let haystack = args.remove(1);
            let needle = args.remove(0);
            Ok(LogicNode::In {
                needle: Box::new(needle),
                haystack: Box::new(haystack),
            })
        }
        "matches" => compile_matches(raw_args, operators, variables),
        "+" => compile_arith(ArithOp::Add, op, raw_args, 1, operators, variables),
        "-" => {
            let args = compile_args(op, raw_args, 1, 2, operators, variables)?;
            Ok(LogicNode::Arith {
                op: ArithOp::Sub,
                args,
            })
        }
        "*" => compile_arith(ArithOp::Mul, op, raw_args, 1, operators, variables),
        "/" => {
            let args = compile_args(op, raw_args, 2, 2, operators, variables)?;
            Ok(LogicNode::Arith {
                op: ArithOp::Div,
                args,
            })
        }
        "min" => compile_arith(ArithOp::Min, op, raw_args, 1, operators, variables),
        "max" => compile_arith(ArithOp::Max, op, raw_args, 1, operators, variables),
        name if operators.contains(name) => {
            let args = compile_args(name, raw_args, 0, usize::MAX, operators, variables)?;
            Ok(LogicNode::Custom {
                name: name.to_string(),
                args,
            })
        }
        unknown => Err(LogicError::UnknownOperator(unknown.to_string())),
    }
}

/// 操作符参数既可以是数组也可以是单值
fn raw_arg_list(raw: &Value) -> Vec<&Value> {
    match raw {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    }
}

fn compile_args(
    operator: &str,
    raw: &Value,
    min: usize,
    max: usize,
    operators: &OperatorSet,
    variables: &mut HashSet<String>,
) -> Result<Vec<LogicNode>, LogicError> {
    let items = raw_arg_list(raw);
    if items.len() < min || items.len() > max {
        let expected = if max == usize::MAX {
            format!(">= {}", min)
        } else if min == max {
            format!("{}", min)
        } else {
            format!("{}..={}", min, max)
        };
        return Err(LogicError::InvalidArity {
            operator: operator.to_string(),
            expected,
            actual: items.len(),
        });
    }

    items
        .into_iter()
        .map(|item| compile_node(item, operators, variables))
        .collect()
}

fn compile_var(
    raw: &Value,
    operators: &OperatorSet,
    variables: &mut HashSet<String>,
) -> Result<LogicNode, LogicError> {
    let items = raw_arg_list(raw);
    let path = items
        .first()
        .and_then(|v| v.as_str())
        .ok_or_else(|| LogicError::InvalidArgument {
            operator: "var".to_string(),
            message: "第一个参数必须是变量路径字符串".to_string(),
        })?;

    if items.len() > 2 {
        return Err(LogicError::InvalidArity {
            operator: "var".to_string(),
            expected: "1..=2".to_string(),
            actual: items.len(),
        });
    }

    variables.insert(path.to_string());

    let default = match items.get(1) {
        Some(v) => Some(Box::new(compile_node(v, operators, variables)?)),
        None => None,
    };

    Ok(LogicNode::Var {
        path: path.to_string(),
        default,
    })
}

fn compile_missing(raw: &Value, variables: &mut HashSet<String>) -> Result<LogicNode, LogicError> {
    let items = raw_arg_list(raw);
    let mut names = Vec::with_capacity(items.len());
    for item in items {
        let name = item.as_str().ok_or_else(|| LogicError::InvalidArgument {
            operator: "missing".to_string(),
            message: "参数必须是变量名字符串".to_string(),
        })?;
        variables.insert(name.to_string());
        names.push(name.to_string());
    }
    Ok(LogicNode::Missing(names))
}

fn compile_compare(
    op: CompareOp,
    name: &str,
    raw: &Value,
    operators: &OperatorSet,
    variables: &mut HashSet<String>,
) -> Result<LogicNode, LogicError> {
    // < 与 <= 允许三参数区间形式: {"<": [min, x, max]}
    let max_arity = match op {
        CompareOp::Lt | CompareOp::Lte => 3,
        _ => 2,
    };
    let args = compile_args(name, raw, 2, max_arity, operators, variables)?;
    Ok(LogicNode::Compare { op, args })
}

fn compile_matches(
    raw: &Value,
    operators: &OperatorSet,
    variables: &mut HashSet<String>,
) -> Result<LogicNode, LogicError> {
    let items = raw_arg_list(raw);
    if items.len() != 2 {
        return Err(LogicError::InvalidArity {
            operator: "matches".to_string(),
            expected: "2".to_string(),
            actual: items.len(),
        });
    }

    let pattern_str = items[1].as_str().ok_or_else(|| LogicError::InvalidArgument {
        operator: "matches".to_string(),
        message: "第二个参数必须是字面量正则字符串".to_string(),
    })?;

    let pattern = Regex::new(pattern_str).map_err(|e| LogicError::InvalidRegex {
        pattern: pattern_str.to_string(),
        message: e.to_string(),
    })?;

    let value = compile_node(items[0], operators, variables)?;
    Ok(LogicNode::Matches {
        value: Box::new(value),
        pattern,
    })
}

fn compile_arith(
    op: ArithOp,
    name: &str,
    raw: &Value,
    min: usize,
    operators: &OperatorSet,
    variables: &mut HashSet<String>,
) -> Result<LogicNode, LogicError> {
    let args = compile_args(name, raw, min, usize::MAX, operators, variables)?;
    Ok(LogicNode::Arith { op, args })
}
