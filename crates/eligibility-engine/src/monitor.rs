//! 规则评估性能监控
//!
//! 按规则累积评估次数、失败次数与耗时分布，超过慢阈值的评估记警告日志
//! 并标记，同时向 metrics 门面发计数器与直方图。统计只增不减，
//! reset 用于测试与长周期滚动。

use dashmap::DashMap;
use std::time::Duration;
use tracing::warn;

/// 单条规则的累积统计
#[derive(Debug, Clone, Default)]
pub struct RuleStats {
    pub evaluations: u64,
    pub failures: u64,
    pub slow_count: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
}

impl RuleStats {
    pub fn avg_duration(&self) -> Duration {
        if self.evaluations == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.evaluations as u32
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.evaluations == 0 {
            0.0
        } else {
            self.failures as f64 / self.evaluations as f64
        }
    }
}

/// 性能监控器
#[derive(Debug, Default)]
pub struct PerformanceMonitor {
    stats: DashMap<String, RuleStats>,
    slow_threshold: Duration,
}

impl PerformanceMonitor {
    pub fn new(slow_threshold: Duration) -> Self {
        Self {
            stats: DashMap::new(),
            slow_threshold,
        }
    }

    /// 记录一次规则评估
    pub fn record(&self, rule_id: &str, duration: Duration, success: bool) {
        let slow = duration > self.slow_threshold;

        {
            let mut entry = self.stats.entry(rule_id.to_string()).or_default();
            entry.evaluations += 1;
            entry.total_duration += duration;
            entry.max_duration = entry.max_duration.max(duration);
            if !success {
                entry.failures += 1;
            }
            if slow {
                entry.slow_count += 1;
            }
        }

        metrics::counter!("rule_evaluations_total", "rule_id" => rule_id.to_string())
            .increment(1);
        if !success {
            metrics::counter!("rule_evaluation_failures_total", "rule_id" => rule_id.to_string())
                .increment(1);
        }
        metrics::histogram!("rule_evaluation_duration_seconds", "rule_id" => rule_id.to_string())
            .record(duration.as_secs_f64());

        if slow {
            warn!(
                rule_id,
                duration_ms = duration.as_millis() as u64,
                threshold_ms = self.slow_threshold.as_millis() as u64,
                "规则评估超过慢阈值"
            );
        }
    }

    pub fn stats(&self, rule_id: &str) -> Option<RuleStats> {
        self.stats.get(rule_id).map(|s| s.clone())
    }

    /// 被标记过慢评估的规则 id 列表
    pub fn slow_rules(&self) -> Vec<String> {
        self.stats
            .iter()
            .filter(|entry| entry.slow_count > 0)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn reset(&self) {
        self.stats.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accumulates() {
        let monitor = PerformanceMonitor::new(Duration::from_millis(100));
        monitor.record("r1", Duration::from_millis(10), true);
        monitor.record("r1", Duration::from_millis(30), false);

        let stats = monitor.stats("r1").unwrap();
        assert_eq!(stats.evaluations, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.avg_duration(), Duration::from_millis(20));
        assert_eq!(stats.max_duration, Duration::from_millis(30));
        assert_eq!(stats.failure_rate(), 0.5);
    }

    #[test]
    fn test_slow_rule_flagged() {
        let monitor = PerformanceMonitor::new(Duration::from_millis(5));
        monitor.record("fast", Duration::from_millis(1), true);
        monitor.record("slow", Duration::from_millis(50), true);

        assert_eq!(monitor.slow_rules(), vec!["slow".to_string()]);
        assert_eq!(monitor.stats("slow").unwrap().slow_count, 1);
    }

    #[test]
    fn test_reset_clears_stats() {
        let monitor = PerformanceMonitor::new(Duration::from_millis(100));
        monitor.record("r1", Duration::from_millis(10), true);
        monitor.reset();
        assert!(monitor.stats("r1").is_none());
    }
}
