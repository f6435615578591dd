//! 规则版本模型
//!
//! 提供版本的解析、格式化、比较与递增。发布序比较（major → minor → patch）
//! 用于迁移范围选择、保留策略与取代链校验；完整序在此之上叠加显式的
//! 标签排序策略：正式版 > rc > beta > alpha > 其他标签。

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use eligibility_shared::error::EligibilityError;

/// 规则版本
///
/// JSON 形式为对象 `{"major": 1, "minor": 2, "patch": 3, "label": "beta"}`，
/// label 缺省表示正式发布版。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// 版本递增级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionLevel {
    Major,
    Minor,
    Patch,
}

impl RuleVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            label: None,
        }
    }

    pub fn with_label(major: u32, minor: u32, patch: u32, label: impl Into<String>) -> Self {
        Self {
            major,
            minor,
            patch,
            label: Some(label.into()),
        }
    }

    /// 解析点分版本字符串
    ///
    /// 接受 2–4 个点分段：`major.minor[.patch[.label]]`，patch 段也允许
    /// `3-beta` 形式携带标签。格式不合法时返回错误。
    pub fn parse(s: &str) -> Result<Self, EligibilityError> {
        let invalid = || EligibilityError::InvalidVersion(s.to_string());

        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() < 2 || parts.len() > 4 {
            return Err(invalid());
        }

        let major: u32 = parts[0].parse().map_err(|_| invalid())?;
        let minor: u32 = parts[1].parse().map_err(|_| invalid())?;

        let (patch, mut label) = match parts.get(2) {
            None => (0, None),
            Some(raw) => match raw.split_once('-') {
                Some((num, lbl)) if !lbl.is_empty() => {
                    (num.parse().map_err(|_| invalid())?, Some(lbl.to_string()))
                }
                Some(_) => return Err(invalid()),
                None => (raw.parse().map_err(|_| invalid())?, None),
            },
        };

        if let Some(fourth) = parts.get(3) {
            if fourth.is_empty() || label.is_some() {
                return Err(invalid());
            }
            label = Some((*fourth).to_string());
        }

        Ok(Self {
            major,
            minor,
            patch,
            label,
        })
    }

    /// 发布序比较：仅按 major → minor → patch，忽略标签
    ///
    /// 迁移范围选择、版本保留与取代链校验均使用发布序，
    /// 与规则包数据契约保持一致。
    pub fn cmp_release(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.patch.cmp(&other.patch))
    }

    /// 按级别递增版本，低阶字段清零，标签清除
    pub fn increment(&self, level: VersionLevel) -> Self {
        match level {
            VersionLevel::Major => Self::new(self.major + 1, 0, 0),
            VersionLevel::Minor => Self::new(self.major, self.minor + 1, 0),
            VersionLevel::Patch => Self::new(self.major, self.minor, self.patch + 1),
        }
    }

    /// 标签的排序权重：正式版最高，之后 rc > beta > alpha > 其他
    fn label_rank(&self) -> u8 {
        match self.label.as_deref() {
            None => 4,
            Some(l) if l.starts_with("rc") => 3,
            Some(l) if l.starts_with("beta") => 2,
            Some(l) if l.starts_with("alpha") => 1,
            Some(_) => 0,
        }
    }
}

impl Ord for RuleVersion {
    /// 完整序：发布序优先，同发布号时按标签策略排序，
    /// 同级标签之间按字典序。
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_release(other)
            .then(self.label_rank().cmp(&other.label_rank()))
            .then_with(|| self.label.cmp(&other.label))
    }
}

impl PartialOrd for RuleVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::str::FromStr for RuleVersion {
    type Err = EligibilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{}.{}.{}-{}", self.major, self.minor, self.patch, label),
            None => write!(f, "{}.{}.{}", self.major, self.minor, self.patch),
        }
    }
}
