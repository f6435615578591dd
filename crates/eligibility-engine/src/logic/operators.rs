//! 领域操作符集
//!
//! 福利领域专用操作符的显式注册表。每个评估器实例持有自己的一份，
//! 构造完成后只读，评估期间不注册也不注销。

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::LogicError;

/// 领域操作符：纯函数 参数值列表 → 结果值
pub type DomainOp = Arc<dyn Fn(&[Value]) -> Result<Value, LogicError> + Send + Sync>;

/// 2024 年联邦贫困线（48 州），第一人基数与每增加一人的增量（年收入，美元）
const FPL_BASE: f64 = 15_060.0;
const FPL_PER_ADDITIONAL: f64 = 5_380.0;

/// 领域操作符集（不可变）
#[derive(Clone, Default)]
pub struct OperatorSet {
    ops: HashMap<String, DomainOp>,
}

impl OperatorSet {
    /// 空集：只有核心操作符可用
    pub fn empty() -> Self {
        Self::default()
    }

    /// 福利领域标准操作符集
    ///
    /// - `annualize`: 月值 → 年值
    /// - `fpl_percent`: (年收入, 家庭人数) → 收入占联邦贫困线百分比
    /// - `household_threshold`: (家庭人数, 按人数阈值表) → 阈值
    pub fn benefits() -> Self {
        Self::empty()
            .with_operator("annualize", |args| {
                let monthly = require_number("annualize", args, 0)?;
                Ok(Value::from(monthly * 12.0))
            })
            .with_operator("fpl_percent", |args| {
                let annual_income = require_number("fpl_percent", args, 0)?;
                let household_size = require_number("fpl_percent", args, 1)?;
                if household_size < 1.0 {
                    return Err(LogicError::InvalidArgument {
                        operator: "fpl_percent".to_string(),
                        message: "家庭人数必须 >= 1".to_string(),
                    });
                }
                let guideline = FPL_BASE + FPL_PER_ADDITIONAL * (household_size - 1.0);
                Ok(Value::from(annual_income / guideline * 100.0))
            })
            .with_operator("household_threshold", |args| {
                let size = require_number("household_threshold", args, 0)?;
                let table = args
                    .get(1)
                    .and_then(Value::as_object)
                    .ok_or_else(|| LogicError::InvalidArgument {
                        operator: "household_threshold".to_string(),
                        message: "第二个参数必须是 人数 → 阈值 对象".to_string(),
                    })?;

                let key = (size as u64).to_string();
                if let Some(value) = table.get(&key) {
                    return Ok(value.clone());
                }

                // 人数超出表范围时取最大键的阈值
                let max_entry = table
                    .iter()
                    .filter_map(|(k, v)| k.parse::<u64>().ok().map(|n| (n, v)))
                    .max_by_key(|(n, _)| *n);

                match max_entry {
                    Some((_, value)) => Ok(value.clone()),
                    None => Err(LogicError::InvalidArgument {
                        operator: "household_threshold".to_string(),
                        message: "阈值表为空或键不是数字".to_string(),
                    }),
                }
            })
    }

    /// 追加一个操作符（builder 风格）
    pub fn with_operator<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, LogicError> + Send + Sync + 'static,
    {
        self.ops.insert(name.into(), Arc::new(f));
        self
    }

    pub fn get(&self, name: &str) -> Option<&DomainOp> {
        self.ops.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.ops.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for OperatorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.names();
        names.sort();
        f.debug_struct("OperatorSet").field("ops", &names).finish()
    }
}

fn require_number(operator: &str, args: &[Value], index: usize) -> Result<f64, LogicError> {
    args.get(index)
        .and_then(Value::as_f64)
        .ok_or_else(|| LogicError::InvalidArgument {
            operator: operator.to_string(),
            message: format!("第 {} 个参数必须是数值", index + 1),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_annualize() {
        let ops = OperatorSet::benefits();
        let op = ops.get("annualize").unwrap();
        assert_eq!(op(&[json!(2500)]).unwrap(), json!(30000.0));
    }

    #[test]
    fn test_fpl_percent_single_person() {
        let ops = OperatorSet::benefits();
        let op = ops.get("fpl_percent").unwrap();
        let result = op(&[json!(15060), json!(1)]).unwrap();
        assert!((result.as_f64().unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_fpl_percent_rejects_zero_household() {
        let ops = OperatorSet::benefits();
        let op = ops.get("fpl_percent").unwrap();
        assert!(op(&[json!(10000), json!(0)]).is_err());
    }

    #[test]
    fn test_household_threshold_lookup() {
        let ops = OperatorSet::benefits();
        let op = ops.get("household_threshold").unwrap();
        let table = json!({"1": 1580, "2": 2137, "3": 2694});

        assert_eq!(op(&[json!(2), table.clone()]).unwrap(), json!(2137));
        // 超出表范围时取最大键
        assert_eq!(op(&[json!(9), table]).unwrap(), json!(2694));
    }

    #[test]
    fn test_custom_operator_registration() {
        let ops = OperatorSet::empty().with_operator("double", |args| {
            let n = require_number("double", args, 0)?;
            Ok(Value::from(n * 2.0))
        });

        assert!(ops.contains("double"));
        assert!(!ops.contains("annualize"));
        assert_eq!(ops.get("double").unwrap()(&[json!(21)]).unwrap(), json!(42.0));
    }
}
