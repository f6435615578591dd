//! 资格结论的可读解释
//!
//! 面向申请人生成英文解释：状态级 reason、逐规则的 ✓/✗ 明细行，
//! 以及从 收入 vs 阈值 形态的规则逻辑中抽取的结构化计算。
//! 字段名优先查标签表，未收录的 camelCase 字段回退为 Title Case。

use serde_json::Value;

use crate::models::{
    Calculation, EligibilityExplanation, EligibilityStatus, EvaluationProfile, RuleDefinition,
};

/// 单条规则的评估结论（管线产出，解释的输入）
#[derive(Debug, Clone)]
pub struct EvaluatedRule {
    pub definition: RuleDefinition,
    pub passed: bool,
    /// 评估错误文本（错误按未通过处理）
    pub error: Option<String>,
}

/// 常见画像字段的展示标签
const FIELD_LABELS: &[(&str, &str)] = &[
    ("monthlyIncome", "Monthly income"),
    ("annualIncome", "Annual income"),
    ("householdSize", "Household size"),
    ("age", "Age"),
    ("isDisabled", "Disability status"),
    ("isBlind", "Blindness status"),
    ("isPregnant", "Pregnancy status"),
    ("hasChildren", "Children in household"),
    ("isCitizen", "Citizenship status"),
    ("isResident", "State residency"),
    ("assets", "Countable assets"),
    ("isStudent", "Student status"),
    ("isVeteran", "Veteran status"),
];

/// 字段 → 展示标签，未收录时把 camelCase 转为 Title Case
pub fn field_label(field: &str) -> String {
    FIELD_LABELS
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, label)| (*label).to_string())
        .unwrap_or_else(|| title_case_camel(field))
}

fn title_case_camel(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 4);
    for (i, ch) in field.chars().enumerate() {
        if i == 0 {
            out.extend(ch.to_uppercase());
        } else if ch.is_uppercase() {
            out.push(' ');
            out.push(ch);
        } else {
            out.push(ch);
        }
    }
    out
}

/// 从 `{op: [{"var": field}, threshold]}` 形态的逻辑中抽取结构化计算
///
/// 只识别数值比较的顶层形态，复杂组合逻辑不强行拆解。
pub fn extract_calculation(
    rule: &RuleDefinition,
    profile: &EvaluationProfile,
    passed: bool,
) -> Option<Calculation> {
    let obj = rule.rule_logic.as_object()?;
    if obj.len() != 1 {
        return None;
    }
    let (op, args) = obj.iter().next()?;
    if !matches!(op.as_str(), "<=" | "<" | ">=" | ">") {
        return None;
    }

    let args = args.as_array()?;
    if args.len() != 2 {
        return None;
    }
    let field = args[0].get("var")?.as_str()?;
    let threshold = args[1].as_f64()?;
    let observed = profile.get(field).and_then(Value::as_f64)?;

    Some(Calculation {
        rule_id: rule.id.clone(),
        description: format!(
            "{}: {} vs limit {}",
            field_label(field),
            observed,
            threshold
        ),
        observed,
        threshold,
        passed,
    })
}

/// 规则明细行：✓/✗ 前缀 + 名称 + 通俗解释
pub fn rule_line(evaluated: &EvaluatedRule) -> String {
    let mark = if evaluated.passed { "✓" } else { "✗" };
    let detail = match (&evaluated.error, &evaluated.definition.explanation) {
        (Some(error), _) => format!("could not be checked ({})", error),
        (None, Some(explanation)) => explanation.clone(),
        (None, None) => {
            if evaluated.passed {
                "requirement met".to_string()
            } else {
                "requirement not met".to_string()
            }
        }
    };
    format!("{} {}: {}", mark, evaluated.definition.name, detail)
}

/// 汇总为面向申请人的完整解释
pub fn build(
    status: EligibilityStatus,
    income_hard_stop: bool,
    evaluated: &[EvaluatedRule],
    profile: &EvaluationProfile,
) -> EligibilityExplanation {
    let total = evaluated.len();
    let passed = evaluated.iter().filter(|e| e.passed).count();

    let reason = if income_hard_stop {
        "Household income exceeds the program limit, so other requirements were not checked."
            .to_string()
    } else {
        match status {
            EligibilityStatus::Qualified => {
                format!("You meet all {} requirements for this program.", total)
            }
            EligibilityStatus::Likely => format!(
                "You meet {} of {} requirements and are likely eligible.",
                passed, total
            ),
            EligibilityStatus::Maybe => format!(
                "You meet {} of {} requirements; eligibility is uncertain.",
                passed, total
            ),
            EligibilityStatus::NotQualified => format!(
                "You do not meet {} of the {} requirements for this program.",
                total - passed,
                total
            ),
            EligibilityStatus::Indeterminate => {
                "No applicable rules were available for this program.".to_string()
            }
        }
    };

    let details = evaluated.iter().map(rule_line).collect();
    let rules_cited = evaluated
        .iter()
        .map(|e| e.definition.id.clone())
        .collect();
    let calculations = evaluated
        .iter()
        .filter_map(|e| extract_calculation(&e.definition, profile, e.passed))
        .collect();

    EligibilityExplanation {
        reason,
        details,
        rules_cited,
        calculations,
    }
}
