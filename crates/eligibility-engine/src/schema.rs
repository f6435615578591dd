//! 规则 schema 校验
//!
//! 对原始 JSON 的规则/规则包做结构校验，返回类型化的值或字段级错误
//! （路径、消息、期望/实际）。包校验递归进入每条规则，路径带下标。
//!
//! 校验同时完成两类“落库前整形”：
//! - 未标注分类的规则在此推断一次分类并落在定义上，之后管线只读枚举；
//! - draft 且 active、取代链版本未递增等不变式违例以警告而非拒绝浮出。

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

use crate::models::{PackageMetadata, RuleClassification, RuleDefinition, RulePackage};

/// 字段级校验问题
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaIssue {
    /// 字段路径，如 `rules[2].version.major`
    pub path: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<String>,
}

impl SchemaIssue {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            expected: None,
            received: None,
        }
    }

    fn typed(
        path: impl Into<String>,
        message: impl Into<String>,
        expected: impl Into<String>,
        received: &Value,
    ) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            expected: Some(expected.into()),
            received: Some(type_name(received).to_string()),
        }
    }
}

/// 校验通过的值，附带非阻断警告
#[derive(Debug, Clone)]
pub struct Validated<T> {
    pub value: T,
    pub warnings: Vec<SchemaIssue>,
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// 规则定义校验
// ---------------------------------------------------------------------------

/// 校验规则定义
pub fn validate_rule_definition(raw: &Value) -> Result<Validated<RuleDefinition>, Vec<SchemaIssue>> {
    let issues = structural_rule_issues(raw, "");
    if !issues.is_empty() {
        return Err(issues);
    }

    let mut rule: RuleDefinition = serde_json::from_value(raw.clone())
        .map_err(|e| vec![SchemaIssue::new("", format!("反序列化失败: {}", e))])?;

    let mut warnings = Vec::new();
    finalize_rule(&mut rule, "", &mut warnings);

    Ok(Validated {
        value: rule,
        warnings,
    })
}

/// 必填字段与类型的结构检查，收集全部问题而不是遇错即停
fn structural_rule_issues(raw: &Value, prefix: &str) -> Vec<SchemaIssue> {
    let mut issues = Vec::new();
    let at = |field: &str| {
        if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", prefix, field)
        }
    };

    let Value::Object(map) = raw else {
        issues.push(SchemaIssue::typed(
            prefix.to_string(),
            "规则必须是 JSON 对象",
            "object",
            raw,
        ));
        return issues;
    };

    for field in ["id", "programId", "name"] {
        match map.get(field) {
            None => issues.push(SchemaIssue::new(at(field), "缺少必填字段")),
            Some(Value::String(s)) if s.trim().is_empty() => {
                issues.push(SchemaIssue::new(at(field), "不能为空字符串"))
            }
            Some(Value::String(_)) => {}
            Some(other) => issues.push(SchemaIssue::typed(
                at(field),
                "类型无效",
                "string",
                other,
            )),
        }
    }

    match map.get("ruleLogic") {
        None => issues.push(SchemaIssue::new(at("ruleLogic"), "缺少必填字段")),
        Some(Value::Object(_)) | Some(Value::Bool(_)) => {}
        Some(other) => issues.push(SchemaIssue::typed(
            at("ruleLogic"),
            "必须是表达式树对象或布尔字面量",
            "object",
            other,
        )),
    }

    match map.get("ruleType") {
        None => issues.push(SchemaIssue::new(at("ruleType"), "缺少必填字段")),
        Some(Value::String(s))
            if matches!(
                s.as_str(),
                "eligibility" | "benefit_amount" | "document_requirements" | "conditional"
            ) => {}
        Some(other) => issues.push(SchemaIssue::typed(
            at("ruleType"),
            "不是合法的规则类型",
            "eligibility | benefit_amount | document_requirements | conditional",
            other,
        )),
    }

    match map.get("version") {
        None => issues.push(SchemaIssue::new(at("version"), "缺少必填字段")),
        Some(Value::Object(version)) => {
            for field in ["major", "minor", "patch"] {
                match version.get(field) {
                    Some(v) if v.is_u64() => {}
                    Some(other) => issues.push(SchemaIssue::typed(
                        format!("{}.{}", at("version"), field),
                        "必须是非负整数",
                        "number",
                        other,
                    )),
                    None => issues.push(SchemaIssue::new(
                        format!("{}.{}", at("version"), field),
                        "缺少必填字段",
                    )),
                }
            }
        }
        Some(other) => issues.push(SchemaIssue::typed(
            at("version"),
            "必须是版本对象",
            "object {major, minor, patch, label?}",
            other,
        )),
    }

    issues
}

/// 非阻断整形：推断分类、检查 draft/active 不变式
fn finalize_rule(rule: &mut RuleDefinition, path_prefix: &str, warnings: &mut Vec<SchemaIssue>) {
    let at = |field: &str| {
        if path_prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", path_prefix, field)
        }
    };

    if rule.classification.is_none() {
        let inferred = infer_classification(rule);
        warnings.push(SchemaIssue::new(
            at("classification"),
            format!(
                "未显式标注分类，按 id/名称推断为 {:?}；建议作者显式标注",
                inferred
            ),
        ));
        rule.classification = Some(inferred);
    }

    if rule.draft && rule.active {
        warnings.push(SchemaIssue::new(
            at("draft"),
            "规则同时处于 draft 与 active 状态",
        ));
    }
}

/// 从 id 与名称推断分类，仅作为作者未标注时的回填
fn infer_classification(rule: &RuleDefinition) -> RuleClassification {
    let haystack = format!("{} {}", rule.id, rule.name).to_lowercase();

    const CATEGORICAL: [&str; 7] = [
        "age", "disab", "blind", "pregnan", "child", "citizen", "resident",
    ];

    if haystack.contains("income") {
        RuleClassification::Income
    } else if CATEGORICAL.iter().any(|kw| haystack.contains(kw)) {
        RuleClassification::Categorical
    } else if haystack.contains("document") || haystack.contains("verification") {
        RuleClassification::Document
    } else {
        RuleClassification::Other
    }
}

// ---------------------------------------------------------------------------
// 规则包校验
// ---------------------------------------------------------------------------

/// 校验规则包，递归校验每条规则
pub fn validate_rule_package(raw: &Value) -> Result<Validated<RulePackage>, Vec<SchemaIssue>> {
    let mut issues = Vec::new();

    let Value::Object(map) = raw else {
        return Err(vec![SchemaIssue::typed(
            "",
            "规则包必须是 JSON 对象",
            "object",
            raw,
        )]);
    };

    let metadata = match map.get("metadata") {
        None => {
            issues.push(SchemaIssue::new("metadata", "缺少必填字段"));
            None
        }
        Some(raw_metadata) => match serde_json::from_value::<PackageMetadata>(raw_metadata.clone())
        {
            Ok(metadata) => {
                if metadata.id.trim().is_empty() {
                    issues.push(SchemaIssue::new("metadata.id", "不能为空字符串"));
                }
                if metadata.name.trim().is_empty() {
                    issues.push(SchemaIssue::new("metadata.name", "不能为空字符串"));
                }
                Some(metadata)
            }
            Err(e) => {
                issues.push(SchemaIssue::new("metadata", format!("反序列化失败: {}", e)));
                None
            }
        },
    };

    let mut warnings = Vec::new();
    let mut rules: Vec<RuleDefinition> = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();

    match map.get("rules") {
        None => issues.push(SchemaIssue::new("rules", "缺少必填字段")),
        Some(Value::Array(raw_rules)) => {
            for (index, raw_rule) in raw_rules.iter().enumerate() {
                let prefix = format!("rules[{}]", index);
                let rule_issues = structural_rule_issues(raw_rule, &prefix);
                if !rule_issues.is_empty() {
                    issues.extend(rule_issues);
                    continue;
                }

                match serde_json::from_value::<RuleDefinition>(raw_rule.clone()) {
                    Ok(mut rule) => {
                        // id 在包内必须唯一
                        if !seen_ids.insert(rule.id.clone()) {
                            issues.push(SchemaIssue::new(
                                format!("{}.id", prefix),
                                format!("规则 id 在包内重复: {}", rule.id),
                            ));
                            continue;
                        }
                        finalize_rule(&mut rule, &prefix, &mut warnings);
                        rules.push(rule);
                    }
                    Err(e) => {
                        issues.push(SchemaIssue::new(prefix, format!("反序列化失败: {}", e)))
                    }
                }
            }
        }
        Some(other) => issues.push(SchemaIssue::typed("rules", "类型无效", "array", other)),
    }

    if !issues.is_empty() {
        return Err(issues);
    }

    let metadata = metadata.ok_or_else(|| vec![SchemaIssue::new("metadata", "缺少必填字段")])?;

    // 取代链版本必须严格递增（违例为警告）
    for rule in &rules {
        if let Some(superseded_id) = &rule.supersedes
            && let Some(old) = rules.iter().find(|r| &r.id == superseded_id)
            && rule.version.cmp_release(&old.version) != std::cmp::Ordering::Greater
        {
            warnings.push(SchemaIssue::new(
                format!("rules[{}].version", rules.iter().position(|r| r.id == rule.id).unwrap_or(0)),
                format!(
                    "取代链版本未严格递增: {} ({}) 取代 {} ({})",
                    rule.id, rule.version, superseded_id, old.version
                ),
            ));
        }
    }

    let package = RulePackage {
        metadata,
        rules,
        checksum: map.get("checksum").and_then(Value::as_str).map(String::from),
        signature: map.get("signature").and_then(Value::as_str).map(String::from),
    };

    Ok(Validated {
        value: package,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_rule(id: &str) -> Value {
        json!({
            "id": id,
            "programId": "snap",
            "name": format!("rule {}", id),
            "ruleLogic": {"==": [1, 1]},
            "ruleType": "eligibility",
            "version": {"major": 1, "minor": 0, "patch": 0}
        })
    }

    #[test]
    fn test_valid_rule_passes() {
        let validated = validate_rule_definition(&minimal_rule("r1")).unwrap();
        assert_eq!(validated.value.id, "r1");
    }

    #[test]
    fn test_missing_fields_reported_with_paths() {
        let raw = json!({"name": "incomplete"});
        let issues = validate_rule_definition(&raw).unwrap_err();

        let paths: Vec<&str> = issues.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"id"));
        assert!(paths.contains(&"programId"));
        assert!(paths.contains(&"ruleLogic"));
        assert!(paths.contains(&"ruleType"));
        assert!(paths.contains(&"version"));
    }

    #[test]
    fn test_type_errors_carry_expected_and_received() {
        let mut raw = minimal_rule("r1");
        raw["id"] = json!(42);
        let issues = validate_rule_definition(&raw).unwrap_err();

        let id_issue = issues.iter().find(|i| i.path == "id").unwrap();
        assert_eq!(id_issue.expected.as_deref(), Some("string"));
        assert_eq!(id_issue.received.as_deref(), Some("number"));
    }

    #[test]
    fn test_invalid_rule_type_rejected() {
        let mut raw = minimal_rule("r1");
        raw["ruleType"] = json!("vibes");
        assert!(validate_rule_definition(&raw).is_err());
    }

    #[test]
    fn test_draft_and_active_is_warning_not_rejection() {
        let mut raw = minimal_rule("r1");
        raw["draft"] = json!(true);
        raw["active"] = json!(true);

        let validated = validate_rule_definition(&raw).unwrap();
        assert!(
            validated
                .warnings
                .iter()
                .any(|w| w.message.contains("draft") && w.message.contains("active"))
        );
    }

    #[test]
    fn test_classification_inferred_and_stamped() {
        let mut raw = minimal_rule("snap-income-limit");
        raw["name"] = json!("SNAP gross income limit");
        let validated = validate_rule_definition(&raw).unwrap();
        assert_eq!(
            validated.value.classification,
            Some(RuleClassification::Income)
        );

        let mut raw = minimal_rule("ssi-age-or-disability");
        raw["name"] = json!("Age or disability requirement");
        let validated = validate_rule_definition(&raw).unwrap();
        assert_eq!(
            validated.value.classification,
            Some(RuleClassification::Categorical)
        );
    }

    #[test]
    fn test_explicit_classification_not_overridden() {
        let mut raw = minimal_rule("snap-income-limit");
        raw["classification"] = json!("other");
        let validated = validate_rule_definition(&raw).unwrap();
        assert_eq!(
            validated.value.classification,
            Some(RuleClassification::Other)
        );
    }

    fn minimal_package(rules: Vec<Value>) -> Value {
        json!({
            "metadata": {
                "id": "pkg-1",
                "name": "test package",
                "version": {"major": 1, "minor": 0, "patch": 0}
            },
            "rules": rules
        })
    }

    #[test]
    fn test_valid_package_passes() {
        let raw = minimal_package(vec![minimal_rule("r1"), minimal_rule("r2")]);
        let validated = validate_rule_package(&raw).unwrap();
        assert_eq!(validated.value.rules.len(), 2);
    }

    #[test]
    fn test_duplicate_id_within_package_rejected() {
        let raw = minimal_package(vec![minimal_rule("r1"), minimal_rule("r1")]);
        let issues = validate_rule_package(&raw).unwrap_err();
        assert!(issues.iter().any(|i| i.message.contains("重复")));
    }

    #[test]
    fn test_rule_errors_carry_indexed_paths() {
        let mut bad = minimal_rule("r2");
        bad["version"] = json!("1.0.0");
        let raw = minimal_package(vec![minimal_rule("r1"), bad]);

        let issues = validate_rule_package(&raw).unwrap_err();
        assert!(issues.iter().any(|i| i.path.starts_with("rules[1]")));
    }

    #[test]
    fn test_supersession_version_must_increase() {
        let mut newer = minimal_rule("r2");
        newer["supersedes"] = json!("r1");
        // 与被取代规则版本相同 → 警告
        let raw = minimal_package(vec![minimal_rule("r1"), newer]);

        let validated = validate_rule_package(&raw).unwrap();
        assert!(
            validated
                .warnings
                .iter()
                .any(|w| w.message.contains("严格递增"))
        );
    }
}
