//! 规则包校验和
//!
//! 对 `{metadata, rules}` 的规范化序列化做 SHA-256，用于检测包损坏或篡改。
//! 规范化 = 递归按键名排序后紧凑输出，保证键序无关的可复现性。

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use eligibility_shared::error::Result;

use crate::models::{PackageMetadata, RuleDefinition};

/// 递归按键名排序，返回规范化后的 Value
///
/// serde_json 的 Map 默认保留插入顺序，同一内容不同键序会产生
/// 不同的序列化字节，因此必须先排序再哈希。
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// 规范化 JSON 字符串
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn hash_content(content: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(content).as_bytes());
    hex::encode(hasher.finalize())
}

/// 计算规则包校验和（SHA-256 十六进制），导出侧封包时使用
pub fn package_checksum(metadata: &PackageMetadata, rules: &[RuleDefinition]) -> Result<String> {
    let content = serde_json::json!({
        "metadata": serde_json::to_value(metadata)?,
        "rules": serde_json::to_value(rules)?,
    });
    Ok(hash_content(&content))
}

/// 对包的原始线格式内容计算校验和，导入侧核对时使用
///
/// 核对必须针对作者封包时的原样 `{metadata, rules}`：反序列化再序列化
/// 会回填缺省字段（时间戳、推断的分类），让未被篡改的包出现假性不匹配。
/// checksum / signature 字段本身不参与哈希。
pub fn raw_package_checksum(raw: &Value) -> String {
    let content = serde_json::json!({
        "metadata": raw.get("metadata").cloned().unwrap_or(Value::Null),
        "rules": raw.get("rules").cloned().unwrap_or(Value::Null),
    });
    hash_content(&content)
}
