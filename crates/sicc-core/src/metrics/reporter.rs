//! Intelligence Reporter
//!
//! Append-only metric history with per-agent rolling statistics and a
//! narrative report (trend, top performer, recommendations).

use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::types::{
    AgentRollingStats, IntelligenceReport, MetricStats, MetricType, MetricsExport,
    PerformanceMetric, Trend,
};
use crate::agents::SubAgentType;

/// Minimum quality samples before a trend is reported
const MIN_TREND_SAMPLES: usize = 4;
/// Change in mean quality that counts as a trend
const TREND_DELTA: f64 = 0.05;
const LOW_ACCURACY: f64 = 0.6;
const SLOW_RESPONSE_MS: f64 = 5_000.0;

#[derive(Default)]
struct History {
    metrics: Vec<PerformanceMetric>,
    agents: BTreeMap<SubAgentType, AgentRollingStats>,
}

#[derive(Default)]
pub struct MetricsReporter {
    history: RwLock<History>,
}

impl MetricsReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample; returns false (recording nothing) when the value is
    /// outside the metric's domain
    pub async fn record(
        &self,
        metric_type: MetricType,
        value: f64,
        agent: Option<SubAgentType>,
        pattern_id: Option<&str>,
    ) -> bool {
        let mut metric = PerformanceMetric::new(metric_type, value);
        if let Some(agent) = agent {
            metric = metric.with_agent(agent);
        }
        if let Some(pattern_id) = pattern_id {
            metric = metric.with_pattern(pattern_id);
        }
        self.record_metric(metric).await
    }

    /// Record a prebuilt sample
    pub async fn record_metric(&self, metric: PerformanceMetric) -> bool {
        if !metric.metric_type.accepts(metric.value) {
            tracing::warn!(
                metric = %metric.metric_type,
                value = metric.value,
                "Rejected out-of-domain metric"
            );
            return false;
        }

        let mut history = self.history.write().await;
        if let Some(agent) = metric.agent {
            let stats = history.agents.entry(agent).or_default();
            if metric.metric_type.is_quality() {
                stats.mean = (stats.mean * stats.count as f64 + metric.value) / (stats.count + 1) as f64;
                stats.count += 1;
            }
            stats.last_recorded_at = Some(metric.recorded_at);
        }

        tracing::debug!(
            metric = %metric.metric_type,
            value = metric.value,
            agent = ?metric.agent,
            pattern_id = ?metric.pattern_id,
            "Recorded metric"
        );
        history.metrics.push(metric);
        true
    }

    /// Replay persisted samples, oldest first; returns how many were kept
    pub async fn restore(&self, mut metrics: Vec<PerformanceMetric>) -> usize {
        metrics.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        let mut restored = 0;
        for metric in metrics {
            if self.record_metric(metric).await {
                restored += 1;
            }
        }
        restored
    }

    pub async fn len(&self) -> usize {
        self.history.read().await.metrics.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.history.read().await.metrics.is_empty()
    }

    /// Count, mean, min and max per metric type, optionally scoped to one
    /// agent and a trailing window
    pub async fn get_stats(
        &self,
        agent: Option<SubAgentType>,
        window: Option<Duration>,
    ) -> BTreeMap<MetricType, MetricStats> {
        let history = self.history.read().await;
        let since = window.and_then(|w| Utc::now().checked_sub_signed(w));

        let mut values: BTreeMap<MetricType, Vec<f64>> = BTreeMap::new();
        for metric in history
            .metrics
            .iter()
            .filter(|m| agent.is_none() || m.agent == agent)
            .filter(|m| since.is_none_or(|s| m.recorded_at >= s))
        {
            values.entry(metric.metric_type).or_default().push(metric.value);
        }

        values
            .into_iter()
            .map(|(metric_type, values)| (metric_type, MetricStats::from_values(&values)))
            .collect()
    }

    pub async fn agent_stats(&self) -> BTreeMap<SubAgentType, AgentRollingStats> {
        self.history.read().await.agents.clone()
    }

    pub async fn generate_report(&self) -> IntelligenceReport {
        let now = Utc::now();
        let history = self.history.read().await;
        let metrics = &history.metrics;

        let total_patterns_learned = metrics
            .iter()
            .filter(|m| m.metric_type == MetricType::PatternApplication)
            .count();

        let day_ago = now - Duration::hours(24);
        let recent_applications = metrics
            .iter()
            .filter(|m| m.metric_type == MetricType::PatternApplication && m.recorded_at >= day_ago)
            .count();
        let learning_rate = recent_applications as f64 / 24.0;

        let accuracy_samples: Vec<f64> = metrics
            .iter()
            .filter(|m| {
                matches!(
                    m.metric_type,
                    MetricType::SuccessRate | MetricType::LearningAccuracy
                )
            })
            .map(|m| m.value)
            .collect();
        let system_accuracy = MetricStats::from_values(&accuracy_samples).avg.clamp(0.0, 1.0);

        let top_performing_agent = history
            .agents
            .iter()
            .filter(|(_, s)| s.count > 0)
            .fold(None::<(SubAgentType, f64)>, |best, (agent, s)| match best {
                Some((_, mean)) if mean >= s.mean => best,
                _ => Some((*agent, s.mean)),
            })
            .map(|(agent, _)| agent.as_str().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let trend = trend(metrics);

        let mut by_type: BTreeMap<MetricType, Vec<f64>> = BTreeMap::new();
        for metric in metrics {
            by_type.entry(metric.metric_type).or_default().push(metric.value);
        }
        let stats: BTreeMap<String, MetricStats> = by_type
            .into_iter()
            .map(|(t, v)| (t.as_str().to_string(), MetricStats::from_values(&v)))
            .collect();

        let mut recommendations = Vec::new();
        if !metrics.is_empty() {
            if !accuracy_samples.is_empty() && system_accuracy < LOW_ACCURACY {
                recommendations.push(format!(
                    "System accuracy is {:.0}%: review rejected and needs-review patterns",
                    system_accuracy * 100.0
                ));
            }
            if trend == Trend::Declining {
                recommendations
                    .push("Performance is declining: rerun the learning cycle on recent conversations".to_string());
            }
            if recent_applications == 0 {
                recommendations.push("No patterns applied in the last 24h: check admission thresholds".to_string());
            }
            if stats
                .get(MetricType::ResponseTime.as_str())
                .is_some_and(|s| s.avg > SLOW_RESPONSE_MS)
            {
                recommendations.push("Average response time is above 5s: tighten the LLM timeout".to_string());
            }
            if recommendations.is_empty() {
                recommendations.push("Performance is healthy: keep monitoring".to_string());
            }
        }

        IntelligenceReport {
            generated_at: now,
            total_metrics: metrics.len(),
            total_patterns_learned,
            learning_rate,
            system_accuracy,
            top_performing_agent,
            trend,
            stats,
            agent_stats: history
                .agents
                .iter()
                .map(|(a, s)| (a.as_str().to_string(), s.clone()))
                .collect(),
            recommendations,
        }
    }

    /// Snapshot of every metric, or those in the trailing window
    ///
    /// A window reaching further back than time can represent covers the
    /// whole history.
    pub async fn export(&self, window_hours: Option<u64>) -> MetricsExport {
        let now = Utc::now();
        let since = window_hours.and_then(|h| {
            i64::try_from(h)
                .ok()
                .and_then(Duration::try_hours)
                .and_then(|window| now.checked_sub_signed(window))
        });

        let metrics = self
            .history
            .read()
            .await
            .metrics
            .iter()
            .filter(|m| since.is_none_or(|s| m.recorded_at >= s))
            .cloned()
            .collect();

        MetricsExport {
            exported_at: now,
            window_hours,
            metrics,
        }
    }

    pub async fn reset(&self) {
        let mut history = self.history.write().await;
        history.metrics.clear();
        history.agents.clear();
    }
}

/// Compare the mean of the older and newer halves of quality samples
fn trend(metrics: &[PerformanceMetric]) -> Trend {
    let mut samples: Vec<&PerformanceMetric> = metrics
        .iter()
        .filter(|m| m.metric_type.is_quality() && m.metric_type != MetricType::PatternApplication)
        .collect();
    if samples.len() < MIN_TREND_SAMPLES {
        return Trend::Unknown;
    }
    samples.sort_by_key(|m| m.recorded_at);

    let mid = samples.len() / 2;
    let mean = |s: &[&PerformanceMetric]| s.iter().map(|m| m.value).sum::<f64>() / s.len() as f64;
    let delta = mean(&samples[mid..]) - mean(&samples[..mid]);

    if delta > TREND_DELTA {
        Trend::Improving
    } else if delta < -TREND_DELTA {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_rejects_out_of_domain() {
        let reporter = MetricsReporter::new();
        assert!(reporter.record(MetricType::SuccessRate, 0.8, None, None).await);

        assert!(!reporter.record(MetricType::SuccessRate, f64::NAN, None, None).await);
        assert!(!reporter.record(MetricType::SuccessRate, 1.5, None, None).await);
        assert!(!reporter.record(MetricType::ResponseTime, -1.0, None, None).await);
        assert!(!reporter.record(MetricType::ResponseTime, f64::INFINITY, None, None).await);

        assert_eq!(reporter.len().await, 1);
        let stats = reporter.get_stats(None, None).await;
        assert_eq!(stats[&MetricType::SuccessRate].avg, 0.8);
    }

    #[tokio::test]
    async fn test_stats_scoping() {
        let reporter = MetricsReporter::new();
        reporter.record(MetricType::SuccessRate, 1.0, Some(SubAgentType::Sales), None).await;
        reporter.record(MetricType::SuccessRate, 0.5, Some(SubAgentType::Support), None).await;
        reporter.record(MetricType::ResponseTime, 120.0, Some(SubAgentType::Sales), None).await;
        reporter
            .record_metric(
                PerformanceMetric::new(MetricType::SuccessRate, 0.0)
                    .with_agent(SubAgentType::Sales)
                    .at(Utc::now() - Duration::hours(48)),
            )
            .await;

        let all = reporter.get_stats(None, None).await;
        assert_eq!(all[&MetricType::SuccessRate].count, 3);
        assert_eq!(all[&MetricType::SuccessRate].min, 0.0);
        assert_eq!(all[&MetricType::SuccessRate].max, 1.0);

        let sales = reporter.get_stats(Some(SubAgentType::Sales), None).await;
        assert_eq!(sales[&MetricType::SuccessRate].count, 2);
        assert_eq!(sales[&MetricType::ResponseTime].avg, 120.0);

        let recent = reporter
            .get_stats(Some(SubAgentType::Sales), Some(Duration::hours(24)))
            .await;
        assert_eq!(recent[&MetricType::SuccessRate].count, 1);

        let rolling = reporter.agent_stats().await;
        assert_eq!(rolling[&SubAgentType::Sales].count, 2);
        assert!((rolling[&SubAgentType::Sales].mean - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_restore_rebuilds_agent_stats() {
        let base = Utc::now() - Duration::hours(2);
        let source = MetricsReporter::new();
        for (i, value) in [1.0, 0.5].into_iter().enumerate() {
            source
                .record_metric(
                    PerformanceMetric::new(MetricType::SuccessRate, value)
                        .with_agent(SubAgentType::Sales)
                        .at(base + Duration::minutes(i as i64)),
                )
                .await;
        }

        let mut persisted = source.export(None).await.metrics;
        persisted.reverse();
        persisted.push(PerformanceMetric::new(MetricType::SuccessRate, 7.0));

        let restored = MetricsReporter::new();
        assert_eq!(restored.restore(persisted).await, 2);
        assert_eq!(restored.agent_stats().await, source.agent_stats().await);
        assert_eq!(restored.export(None).await.metrics, source.export(None).await.metrics);
    }

    #[tokio::test]
    async fn test_empty_report() {
        let report = MetricsReporter::new().generate_report().await;
        assert_eq!(report.total_metrics, 0);
        assert_eq!(report.top_performing_agent, "unknown");
        assert_eq!(report.trend, Trend::Unknown);
        assert_eq!(report.system_accuracy, 0.0);
    }

    #[tokio::test]
    async fn test_report_counts_pattern_applications() {
        let reporter = MetricsReporter::new();
        for i in 0..3 {
            reporter
                .record(
                    MetricType::PatternApplication,
                    0.9,
                    Some(SubAgentType::Discovery),
                    Some(&format!("pat_{}", i)),
                )
                .await;
        }
        reporter.record(MetricType::SuccessRate, 0.9, Some(SubAgentType::Sales), None).await;

        let report = reporter.generate_report().await;
        assert_eq!(report.total_patterns_learned, 3);
        assert!((report.learning_rate - 3.0 / 24.0).abs() < 1e-9);
        assert!((0.0..=1.0).contains(&report.system_accuracy));
        assert!(!report.recommendations.is_empty());
        assert!(["discovery", "sales", "support", "unknown"].contains(&report.top_performing_agent.as_str()));
    }

    #[tokio::test]
    async fn test_trend_labels() {
        let base = Utc::now() - Duration::hours(10);

        let improving = MetricsReporter::new();
        for (i, v) in [0.2, 0.3, 0.8, 0.9].into_iter().enumerate() {
            improving
                .record_metric(
                    PerformanceMetric::new(MetricType::SuccessRate, v).at(base + Duration::hours(i as i64)),
                )
                .await;
        }
        assert_eq!(improving.generate_report().await.trend, Trend::Improving);

        let declining = MetricsReporter::new();
        for (i, v) in [0.9, 0.8, 0.3, 0.2].into_iter().enumerate() {
            declining
                .record_metric(
                    PerformanceMetric::new(MetricType::SuccessRate, v).at(base + Duration::hours(i as i64)),
                )
                .await;
        }
        let report = declining.generate_report().await;
        assert_eq!(report.trend, Trend::Declining);
        assert!(report.recommendations.iter().any(|r| r.contains("declining")));

        let stable = MetricsReporter::new();
        for i in 0..4 {
            stable
                .record_metric(
                    PerformanceMetric::new(MetricType::SuccessRate, 0.7).at(base + Duration::hours(i)),
                )
                .await;
        }
        assert_eq!(stable.generate_report().await.trend, Trend::Stable);
    }

    #[tokio::test]
    async fn test_top_agent() {
        let reporter = MetricsReporter::new();
        reporter.record(MetricType::SuccessRate, 0.4, Some(SubAgentType::Discovery), None).await;
        reporter.record(MetricType::SuccessRate, 0.9, Some(SubAgentType::Support), None).await;

        let report = reporter.generate_report().await;
        assert_eq!(report.top_performing_agent, "support");
    }

    #[tokio::test]
    async fn test_export_preserves_fields() {
        let reporter = MetricsReporter::new();
        reporter
            .record(MetricType::PatternApplication, 0.75, Some(SubAgentType::Sales), Some("pat_1"))
            .await;
        reporter
            .record_metric(
                PerformanceMetric::new(MetricType::ResponseTime, 300.0).at(Utc::now() - Duration::hours(5)),
            )
            .await;

        let export = reporter.export(None).await;
        assert_eq!(export.metrics.len(), 2);

        let json = serde_json::to_string(&export).unwrap();
        let parsed: MetricsExport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, export);
        assert_eq!(parsed.metrics[0].pattern_id.as_deref(), Some("pat_1"));
        assert_eq!(parsed.metrics[0].agent, Some(SubAgentType::Sales));

        let windowed = reporter.export(Some(1)).await;
        assert_eq!(windowed.metrics.len(), 1);

        for huge in [10_000_000_000, i64::MAX as u64, u64::MAX] {
            let export = reporter.export(Some(huge)).await;
            assert_eq!(export.metrics.len(), 2);
            assert_eq!(export.window_hours, Some(huge));
        }

        reporter.reset().await;
        assert!(reporter.is_empty().await);
    }
}
