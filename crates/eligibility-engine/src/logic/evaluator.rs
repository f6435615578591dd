//! 逻辑表达式评估器
//!
//! 对编译后的表达式树求值。未解析的变量产生 Null 哨兵值，
//! 在比较中按假值传播而不是抛错；其余失败折叠为 outcome 错误，
//! 任何情况下都不会 panic 越过 evaluate 边界。

use serde_json::Value;
use std::time::{Duration, Instant};

use crate::models::EvaluationProfile;

use super::ast::{ArithOp, CompareOp, CompiledLogic, LogicNode};
use super::{LogicError, OperatorSet, compile};

/// 单次评估结果
#[derive(Debug, Clone)]
pub struct LogicOutcome {
    pub success: bool,
    pub result: Value,
    pub error: Option<String>,
    pub execution_time: Duration,
}

impl LogicOutcome {
    /// 规则是否通过：评估成功且结果为真值
    pub fn passed(&self) -> bool {
        self.success && is_truthy(&self.result)
    }
}

/// 值的真值语义
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

/// 逻辑评估器
///
/// 每个实例持有自己的不可变领域操作符集，实例之间互不影响，
/// 并发评估无需串行化。
#[derive(Debug, Clone)]
pub struct Evaluator {
    operators: OperatorSet,
}

impl Evaluator {
    pub fn new(operators: OperatorSet) -> Self {
        Self { operators }
    }

    /// 福利领域标准评估器
    pub fn benefits() -> Self {
        Self::new(OperatorSet::benefits())
    }

    pub fn operators(&self) -> &OperatorSet {
        &self.operators
    }

    /// 评估表达式树
    ///
    /// 编译错误与求值错误均折叠为 `success: false`，不向外抛出。
    pub fn evaluate(&self, tree: &Value, data: &EvaluationProfile) -> LogicOutcome {
        let start = Instant::now();

        let result = compile(tree, &self.operators)
            .and_then(|compiled| self.eval_compiled(&compiled, data));

        match result {
            Ok(value) => LogicOutcome {
                success: true,
                result: value,
                error: None,
                execution_time: start.elapsed(),
            },
            Err(err) => LogicOutcome {
                success: false,
                result: Value::Null,
                error: Some(err.to_string()),
                execution_time: start.elapsed(),
            },
        }
    }

    /// 异步入口，语义与 [`Self::evaluate`] 一致
    pub async fn evaluate_async(&self, tree: &Value, data: &EvaluationProfile) -> LogicOutcome {
        self.evaluate(tree, data)
    }

    /// 批量评估：保持输入顺序，单条失败不影响其余
    pub fn evaluate_batch(&self, pairs: &[(Value, EvaluationProfile)]) -> Vec<LogicOutcome> {
        pairs
            .iter()
            .map(|(tree, data)| self.evaluate(tree, data))
            .collect()
    }

    /// 对已编译的表达式求值
    pub fn eval_compiled(
        &self,
        compiled: &CompiledLogic,
        data: &EvaluationProfile,
    ) -> Result<Value, LogicError> {
        self.eval_node(&compiled.root, data)
    }

    fn eval_node(&self, node: &LogicNode, data: &EvaluationProfile) -> Result<Value, LogicError> {
        match node {
            LogicNode::Literal(value) => Ok(value.clone()),
            LogicNode::Var { path, default } => {
                match lookup(data, path) {
                    Some(value) => Ok(value.clone()),
                    None => match default {
                        Some(node) => self.eval_node(node, data),
                        // 未解析变量 → Null 哨兵
                        None => Ok(Value::Null),
                    },
                }
            }
            LogicNode::Missing(names) => {
                let missing: Vec<Value> = names
                    .iter()
                    .filter(|name| {
                        lookup(data, name).is_none_or(|v| v.is_null())
                    })
                    .map(|name| Value::String(name.clone()))
                    .collect();
                Ok(Value::Array(missing))
            }
            LogicNode::Compare { op, args } => self.eval_compare(*op, args, data),
            LogicNode::And(args) => {
                for arg in args {
                    if !is_truthy(&self.eval_node(arg, data)?) {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            LogicNode::Or(args) => {
                for arg in args {
                    if is_truthy(&self.eval_node(arg, data)?) {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            LogicNode::Not(arg) => Ok(Value::Bool(!is_truthy(&self.eval_node(arg, data)?))),
            LogicNode::If(args) => self.eval_if(args, data),
            LogicNode::In { needle, haystack } => {
                let needle = self.eval_node(needle, data)?;
                let haystack = self.eval_node(haystack, data)?;
                Ok(Value::Bool(contains(&haystack, &needle)))
            }
            LogicNode::Matches { value, pattern } => {
                let value = self.eval_node(value, data)?;
                match value.as_str() {
                    Some(s) => Ok(Value::Bool(pattern.is_match(s))),
                    // 非字符串（含 Null 哨兵）按不匹配处理
                    None => Ok(Value::Bool(false)),
                }
            }
            LogicNode::Arith { op, args } => self.eval_arith(*op, args, data),
            LogicNode::Custom { name, args } => {
                let values: Vec<Value> = args
                    .iter()
                    .map(|arg| self.eval_node(arg, data))
                    .collect::<Result<_, _>>()?;

                let op = self
                    .operators
                    .get(name)
                    .ok_or_else(|| LogicError::UnknownOperator(name.clone()))?;

                op(&values)
                    .map_err(|e| LogicError::CustomOperator(name.clone(), e.to_string()))
            }
        }
    }

    fn eval_compare(
        &self,
        op: CompareOp,
        args: &[LogicNode],
        data: &EvaluationProfile,
    ) -> Result<Value, LogicError> {
        let values: Vec<Value> = args
            .iter()
            .map(|arg| self.eval_node(arg, data))
            .collect::<Result<_, _>>()?;

        let result = match op {
            CompareOp::Eq => loose_eq(&values[0], &values[1]),
            CompareOp::Neq => !loose_eq(&values[0], &values[1]),
            // 三参数区间形式: a op b && b op c
            _ => values
                .windows(2)
                .all(|pair| ordered(&pair[0], &pair[1], op)),
        };

        Ok(Value::Bool(result))
    }

    fn eval_if(&self, args: &[LogicNode], data: &EvaluationProfile) -> Result<Value, LogicError> {
        let mut index = 0;
        while index + 1 < args.len() {
            if is_truthy(&self.eval_node(&args[index], data)?) {
                return self.eval_node(&args[index + 1], data);
            }
            index += 2;
        }
        // 奇数个参数时最后一个是兜底分支
        if index < args.len() {
            return self.eval_node(&args[index], data);
        }
        Ok(Value::Null)
    }

    fn eval_arith(
        &self,
        op: ArithOp,
        args: &[LogicNode],
        data: &EvaluationProfile,
    ) -> Result<Value, LogicError> {
        let numbers: Vec<f64> = args
            .iter()
            .map(|arg| {
                let value = self.eval_node(arg, data)?;
                as_f64(&value).ok_or_else(|| LogicError::InvalidArgument {
                    operator: format!("{:?}", op),
                    message: format!("参数不是数值: {}", value),
                })
            })
            .collect::<Result<_, _>>()?;

        let result = match op {
            ArithOp::Add => numbers.iter().sum(),
            ArithOp::Sub => {
                if numbers.len() == 1 {
                    -numbers[0]
                } else {
                    numbers[0] - numbers[1]
                }
            }
            ArithOp::Mul => numbers.iter().product(),
            ArithOp::Div => {
                if numbers[1] == 0.0 {
                    return Err(LogicError::DivisionByZero);
                }
                numbers[0] / numbers[1]
            }
            ArithOp::Min => numbers.iter().copied().fold(f64::INFINITY, f64::min),
            ArithOp::Max => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        };

        Ok(Value::from(result))
    }
}

/// 变量查找：先按完整键匹配，再尝试点号路径（含数组索引）
fn lookup<'a>(data: &'a EvaluationProfile, path: &str) -> Option<&'a Value> {
    if let Some(value) = data.get(path) {
        return Some(value);
    }

    let mut parts = path.split('.');
    let mut current = data.get(parts.next()?)?;

    for part in parts {
        match current {
            Value::Object(map) => current = map.get(part)?,
            Value::Array(items) => {
                let index: usize = part.parse().ok()?;
                current = items.get(index)?;
            }
            _ => return None,
        }
    }

    Some(current)
}

/// 尝试把值转为 f64；数字字符串也接受
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// 宽松相等：数值统一为浮点比较（100 == 100.0），其余按结构相等
fn loose_eq(a: &Value, b: &Value) -> bool {
    if let (Some(fa), Some(fb)) = (as_f64(a), as_f64(b)) {
        return (fa - fb).abs() < f64::EPSILON;
    }
    a == b
}

/// 有序比较
///
/// 数值对与字符串对可比；任一侧为 Null 哨兵或类型不可比时整体为假，
/// 未解析变量由此按假值传播。
fn ordered(a: &Value, b: &Value, op: CompareOp) -> bool {
    use std::cmp::Ordering;

    let ordering = if let (Some(fa), Some(fb)) = (as_f64(a), as_f64(b)) {
        fa.partial_cmp(&fb)
    } else if let (Value::String(sa), Value::String(sb)) = (a, b) {
        Some(sa.cmp(sb))
    } else {
        None
    };

    let Some(ordering) = ordering else {
        return false;
    };

    match op {
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Gte => ordering != Ordering::Less,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Lte => ordering != Ordering::Greater,
        CompareOp::Eq | CompareOp::Neq => unreachable!("相等比较不走有序路径"),
    }
}

/// 成员测试：数组含元素（宽松相等）或字符串含子串
fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| loose_eq(item, needle)),
        Value::String(s) => needle.as_str().map(|sub| s.contains(sub)).unwrap_or(false),
        _ => false,
    }
}
