//! Analytics aggregation, health reporting and export

use crate::{
    agents::{AgentMetricsRecord, AgentStatusView},
    config::HealthConfig,
    error::{MonitoringError, Result},
    events::{EventSeverity, SystemEvent},
    metrics::SystemMetrics,
    progress::DocumentGenerationStatus,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Counts and timings for one document type
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocumentTypeStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub average_generation_minutes: f64,
}

/// Completed-document activity of one calendar day
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyTrend {
    pub date: NaiveDate,
    pub documents: u64,
    pub average_generation_minutes: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentAnalytics {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub total_documents: u64,
    pub successful: u64,
    pub failed: u64,
    pub success_rate: f64,
    /// Mean generation time of successful documents
    pub average_generation_minutes: f64,
    pub by_type: BTreeMap<String, DocumentTypeStats>,
    pub daily_trends: Vec<DailyTrend>,
}

#[derive(Default)]
struct Tally {
    total: u64,
    successful: u64,
    success_minutes: f64,
}

impl Tally {
    fn add(&mut self, success: bool, minutes: f64) {
        self.total += 1;
        if success {
            self.successful += 1;
            self.success_minutes += minutes;
        }
    }

    fn failed(&self) -> u64 {
        self.total - self.successful
    }

    fn success_rate(&self) -> f64 {
        rate(self.successful, self.total)
    }

    fn average_minutes(&self) -> f64 {
        if self.successful == 0 {
            0.0
        } else {
            self.success_minutes / self.successful as f64
        }
    }
}

fn rate(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Aggregate documents completed within `[from, to]`
pub fn document_analytics<'a, I>(statuses: I, from: DateTime<Utc>, to: DateTime<Utc>) -> DocumentAnalytics
where
    I: IntoIterator<Item = &'a DocumentGenerationStatus>,
{
    let mut overall = Tally::default();
    let mut by_type: BTreeMap<String, Tally> = BTreeMap::new();
    let mut by_day: BTreeMap<NaiveDate, Tally> = BTreeMap::new();

    for status in statuses {
        for document in status.documents.values() {
            let Some(completed_at) = document.completed_at else {
                continue;
            };
            if completed_at < from || completed_at > to {
                continue;
            }

            let success = document.succeeded();
            let minutes = document
                .generation_time()
                .map(|d| d.num_milliseconds() as f64 / 60_000.0)
                .unwrap_or(0.0);

            overall.add(success, minutes);
            by_type
                .entry(document.document_type.clone())
                .or_default()
                .add(success, minutes);
            by_day
                .entry(completed_at.date_naive())
                .or_default()
                .add(success, minutes);
        }
    }

    DocumentAnalytics {
        from,
        to,
        total_documents: overall.total,
        successful: overall.successful,
        failed: overall.failed(),
        success_rate: overall.success_rate(),
        average_generation_minutes: overall.average_minutes(),
        by_type: by_type
            .into_iter()
            .map(|(doc_type, tally)| {
                let stats = DocumentTypeStats {
                    total: tally.total,
                    successful: tally.successful,
                    failed: tally.failed(),
                    success_rate: tally.success_rate(),
                    average_generation_minutes: tally.average_minutes(),
                };
                (doc_type, stats)
            })
            .collect(),
        daily_trends: by_day
            .into_iter()
            .map(|(date, tally)| DailyTrend {
                date,
                documents: tally.total,
                average_generation_minutes: tally.average_minutes(),
                success_rate: tally.success_rate(),
            })
            .collect(),
    }
}

/// Aggregated performance of one agent type
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentTypePerformance {
    pub agent_count: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub success_rate: f64,
    pub average_cpu_usage: f64,
    pub average_memory_usage: f64,
    pub average_response_time_ms: f64,
    /// Metrics samples inside the window
    pub samples: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentPerformanceAnalytics {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub total_agents: u64,
    pub total_tasks_completed: u64,
    pub total_tasks_failed: u64,
    pub overall_success_rate: f64,
    pub by_type: BTreeMap<String, AgentTypePerformance>,
}

/// Aggregate agents active within `[from, to]` by agent type.
///
/// Resource means only use metrics samples taken inside the window.
pub fn agent_performance<'a, A, M>(
    agents: A,
    metrics_history: M,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> AgentPerformanceAnalytics
where
    A: IntoIterator<Item = &'a AgentStatusView>,
    M: IntoIterator<Item = &'a AgentMetricsRecord>,
{
    #[derive(Default)]
    struct Acc {
        agents: u64,
        completed: u64,
        failed: u64,
        cpu: Vec<f64>,
        memory: Vec<f64>,
        response: Vec<f64>,
    }

    let mut by_type: BTreeMap<String, Acc> = BTreeMap::new();

    for agent in agents {
        if agent.started_at > to || agent.last_heartbeat < from {
            continue;
        }
        let acc = by_type.entry(agent.agent_type.clone()).or_default();
        acc.agents += 1;
        acc.completed += agent.tasks_completed;
        acc.failed += agent.tasks_failed;
    }

    for record in metrics_history {
        if record.timestamp < from || record.timestamp > to {
            continue;
        }
        let acc = by_type.entry(record.agent_type.clone()).or_default();
        acc.cpu.push(record.sample.cpu_usage);
        acc.memory.push(record.sample.memory_usage);
        acc.response.push(record.sample.response_time_ms);
    }

    let by_type: BTreeMap<String, AgentTypePerformance> = by_type
        .into_iter()
        .map(|(agent_type, acc)| {
            let perf = AgentTypePerformance {
                agent_count: acc.agents,
                tasks_completed: acc.completed,
                tasks_failed: acc.failed,
                success_rate: rate(acc.completed, acc.completed + acc.failed),
                average_cpu_usage: mean(&acc.cpu),
                average_memory_usage: mean(&acc.memory),
                average_response_time_ms: mean(&acc.response),
                samples: acc.cpu.len() as u64,
            };
            (agent_type, perf)
        })
        .collect();

    let total_tasks_completed = by_type.values().map(|p| p.tasks_completed).sum();
    let total_tasks_failed = by_type.values().map(|p| p.tasks_failed).sum();

    AgentPerformanceAnalytics {
        from,
        to,
        total_agents: by_type.values().map(|p| p.agent_count).sum(),
        total_tasks_completed,
        total_tasks_failed,
        overall_success_rate: rate(total_tasks_completed, total_tasks_completed + total_tasks_failed),
        by_type,
    }
}

/// Overall health verdict of the system
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Critical,
}

impl OverallHealth {
    /// Healthy when every service is, degraded from 75% healthy, critical below
    pub fn from_services(services: &BTreeMap<String, bool>) -> Self {
        let total = services.len();
        let healthy = services.values().filter(|up| **up).count();
        if healthy == total {
            OverallHealth::Healthy
        } else if healthy as f64 / total as f64 >= 0.75 {
            OverallHealth::Degraded
        } else {
            OverallHealth::Critical
        }
    }
}

/// Open problem surfaced in the health report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthIssue {
    pub severity: EventSeverity,
    pub source: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemHealthReport {
    pub generated_at: DateTime<Utc>,
    pub status: OverallHealth,
    pub healthy_services: usize,
    pub total_services: usize,
    pub services: BTreeMap<String, bool>,
    pub metrics: Option<SystemMetrics>,
    pub issues: Vec<HealthIssue>,
    pub recommendations: Vec<String>,
}

/// Build the health report from the latest sample and the event log
pub fn system_health_report<'a, E>(
    metrics: Option<&SystemMetrics>,
    events: E,
    thresholds: &HealthConfig,
    now: DateTime<Utc>,
) -> SystemHealthReport
where
    E: IntoIterator<Item = &'a SystemEvent>,
{
    let services = metrics.map(|m| m.services.clone()).unwrap_or_default();
    let lookback = now - chrono::Duration::hours(thresholds.issue_lookback_hours);

    let mut issues: Vec<HealthIssue> = events
        .into_iter()
        .filter(|e| e.severity >= EventSeverity::Error && e.timestamp >= lookback)
        .map(|e| HealthIssue {
            severity: e.severity,
            source: e.source.clone(),
            message: e.message.clone(),
            timestamp: e.timestamp,
        })
        .collect();
    issues.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    SystemHealthReport {
        generated_at: now,
        status: OverallHealth::from_services(&services),
        healthy_services: services.values().filter(|up| **up).count(),
        total_services: services.len(),
        recommendations: metrics
            .map(|m| recommendations(m, thresholds))
            .unwrap_or_default(),
        services,
        metrics: metrics.cloned(),
        issues,
    }
}

fn recommendations(metrics: &SystemMetrics, thresholds: &HealthConfig) -> Vec<String> {
    let mut out = Vec::new();
    if metrics.cpu_usage > thresholds.recommend_cpu_percent {
        out.push(format!(
            "CPU usage is high ({:.1}%). Consider reducing concurrent generations or adding capacity.",
            metrics.cpu_usage
        ));
    }
    if metrics.memory_percentage > thresholds.recommend_memory_percent {
        out.push(format!(
            "Memory usage is high ({:.1}%). Consider restarting long-running agents or adding memory.",
            metrics.memory_percentage
        ));
    }
    if metrics.disk_total > 0 && metrics.disk_available < thresholds.recommend_min_free_disk_bytes {
        out.push(format!(
            "Available disk space is low ({:.1} GiB). Clean up generated artifacts or expand storage.",
            metrics.disk_available as f64 / GIB
        ));
    }
    for (service, healthy) in &metrics.services {
        if !healthy {
            out.push(format!("Service '{}' is unhealthy. Check its logs.", service));
        }
    }
    out
}

/// Output format of an analytics export
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Pdf,
    Excel,
}

impl std::str::FromStr for ExportFormat {
    type Err = MonitoringError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            "pdf" => Ok(ExportFormat::Pdf),
            "excel" | "xlsx" => Ok(ExportFormat::Excel),
            other => Err(MonitoringError::validation(format!(
                "Unknown export format '{}'",
                other
            ))),
        }
    }
}

/// Everything an export contains
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyticsExport {
    pub generated_at: DateTime<Utc>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub document_analytics: DocumentAnalytics,
    pub agent_analytics: AgentPerformanceAnalytics,
}

impl AnalyticsExport {
    /// Render to bytes; PDF and Excel are not supported
    pub fn render(&self, format: ExportFormat) -> Result<Vec<u8>> {
        match format {
            ExportFormat::Json => Ok(serde_json::to_vec_pretty(self)?),
            ExportFormat::Csv => Ok(self.to_csv().into_bytes()),
            ExportFormat::Pdf => Err(MonitoringError::unsupported("PDF export")),
            ExportFormat::Excel => Err(MonitoringError::unsupported("Excel export")),
        }
    }

    fn to_csv(&self) -> String {
        let docs = &self.document_analytics;
        let agents = &self.agent_analytics;
        let mut rows: Vec<(String, String)> = vec![
            ("From".to_string(), self.from.to_rfc3339()),
            ("To".to_string(), self.to.to_rfc3339()),
            ("Total Documents".to_string(), docs.total_documents.to_string()),
            ("Successful Documents".to_string(), docs.successful.to_string()),
            ("Failed Documents".to_string(), docs.failed.to_string()),
            ("Document Success Rate".to_string(), format!("{:.2}", docs.success_rate)),
            (
                "Average Generation Time (minutes)".to_string(),
                format!("{:.2}", docs.average_generation_minutes),
            ),
        ];
        for (doc_type, stats) in &docs.by_type {
            rows.push((format!("Documents: {}", doc_type), stats.total.to_string()));
        }
        rows.extend([
            ("Total Agents".to_string(), agents.total_agents.to_string()),
            ("Tasks Completed".to_string(), agents.total_tasks_completed.to_string()),
            ("Tasks Failed".to_string(), agents.total_tasks_failed.to_string()),
            (
                "Agent Success Rate".to_string(),
                format!("{:.2}", agents.overall_success_rate),
            ),
        ]);
        for (agent_type, perf) in &agents.by_type {
            rows.push((
                format!("Tasks Completed: {}", agent_type),
                perf.tasks_completed.to_string(),
            ));
        }

        let mut out = String::from("Metric,Value\n");
        for (metric, value) in rows {
            let _ = writeln!(out, "{},{}", csv_field(&metric), csv_field(&value));
        }
        out
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentMetricsSample, AgentState};
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn day(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, d, h, 0, 0).unwrap()
    }

    fn project_with_documents() -> DocumentGenerationStatus {
        let mut status = DocumentGenerationStatus::new("p1", day(1, 8));
        status.start_document("BRD", day(1, 8));
        status.start_document("PRD", day(1, 8));
        status.start_document("TechSpec", day(2, 8));
        status.start_document("Roadmap", day(2, 8));

        // 60 minutes
        status.complete_document("BRD", true, None, day(1, 9)).unwrap();
        status
            .complete_document("PRD", false, Some("timeout".into()), day(1, 10))
            .unwrap();
        // 120 minutes
        status.complete_document("TechSpec", true, None, day(2, 10)).unwrap();
        status
    }

    #[test]
    fn test_document_analytics() {
        let status = project_with_documents();
        let analytics = document_analytics([&status], day(1, 0), day(3, 0));

        assert_eq!(analytics.total_documents, 3);
        assert_eq!(analytics.successful, 2);
        assert_eq!(analytics.failed, 1);
        assert!((analytics.success_rate - 66.666).abs() < 0.01);
        assert!((analytics.average_generation_minutes - 90.0).abs() < 1e-9);
        assert_eq!(analytics.by_type["PRD"].failed, 1);
        assert_eq!(analytics.by_type["BRD"].average_generation_minutes, 60.0);
        assert!(!analytics.by_type.contains_key("Roadmap"));

        assert_eq!(analytics.daily_trends.len(), 2);
        assert_eq!(analytics.daily_trends[0].documents, 2);
        assert_eq!(analytics.daily_trends[0].success_rate, 50.0);
        assert_eq!(analytics.daily_trends[1].average_generation_minutes, 120.0);
    }

    #[test]
    fn test_document_analytics_window() {
        let status = project_with_documents();
        let analytics = document_analytics([&status], day(2, 0), day(3, 0));
        assert_eq!(analytics.total_documents, 1);
        assert_eq!(analytics.by_type.len(), 1);

        let empty = document_analytics([&status], day(10, 0), day(11, 0));
        assert_eq!(empty.total_documents, 0);
        assert_eq!(empty.success_rate, 0.0);
    }

    #[test]
    fn test_agent_performance() {
        let now = day(1, 12);
        let writer = |completed, failed| AgentStatusView {
            tasks_completed: completed,
            tasks_failed: failed,
            state: AgentState::Running,
            ..AgentStatusView::new(Uuid::new_v4(), "Writer", "p1", now)
        };
        let agents = vec![writer(8, 2), writer(2, 0)];
        let record = |cpu: f64, at| AgentMetricsRecord {
            agent_id: agents[0].agent_id,
            agent_type: "Writer".to_string(),
            timestamp: at,
            sample: AgentMetricsSample {
                cpu_usage: cpu,
                memory_usage: 512.0,
                response_time_ms: 100.0,
                ..AgentMetricsSample::default()
            },
        };
        let history = vec![
            record(20.0, now),
            record(40.0, now),
            record(99.0, now - Duration::days(5)),
        ];

        let perf = agent_performance(&agents, &history, day(1, 0), day(2, 0));
        let writer_perf = &perf.by_type["Writer"];
        assert_eq!(writer_perf.agent_count, 2);
        assert_eq!(writer_perf.tasks_completed, 10);
        assert!((writer_perf.success_rate - 83.333).abs() < 0.01);
        assert_eq!(writer_perf.average_cpu_usage, 30.0);
        assert_eq!(writer_perf.samples, 2);
        assert_eq!(perf.total_agents, 2);
        assert_eq!(perf.total_tasks_failed, 2);
    }

    #[test]
    fn test_overall_health() {
        let services = |flags: &[bool]| -> BTreeMap<String, bool> {
            flags
                .iter()
                .enumerate()
                .map(|(i, up)| (format!("svc-{}", i), *up))
                .collect()
        };
        assert_eq!(OverallHealth::from_services(&services(&[])), OverallHealth::Healthy);
        assert_eq!(
            OverallHealth::from_services(&services(&[true, true, true, true])),
            OverallHealth::Healthy
        );
        assert_eq!(
            OverallHealth::from_services(&services(&[true, true, true, false])),
            OverallHealth::Degraded
        );
        assert_eq!(
            OverallHealth::from_services(&services(&[true, false])),
            OverallHealth::Critical
        );
    }

    #[test]
    fn test_health_report_issues_and_recommendations() {
        let now = day(3, 12);
        let metrics = SystemMetrics {
            timestamp: now,
            cpu_usage: 85.0,
            memory_used: 90,
            memory_total: 100,
            memory_percentage: 90.0,
            disk_used: 0,
            disk_total: 100 * GIB as u64,
            disk_available: 5 * GIB as u64,
            load_average: 1.0,
            process_count: 10,
            services: BTreeMap::from([("bus".to_string(), true)]),
        };
        let events = vec![
            SystemEvent::new("gen", "writer", "old failure", EventSeverity::Error, now - Duration::hours(30)),
            SystemEvent::new("gen", "writer", "fresh failure", EventSeverity::Critical, now - Duration::hours(1)),
            SystemEvent::new("gen", "writer", "just a warning", EventSeverity::Warning, now),
        ];

        let report = system_health_report(Some(&metrics), &events, &HealthConfig::default(), now);
        assert_eq!(report.status, OverallHealth::Healthy);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].message, "fresh failure");
        assert_eq!(report.recommendations.len(), 3);
        assert!(report.recommendations[0].contains("CPU"));
        assert!(report.recommendations[2].contains("disk"));
    }

    #[test]
    fn test_export_formats() {
        let status = project_with_documents();
        let export = AnalyticsExport {
            generated_at: day(3, 0),
            from: day(1, 0),
            to: day(3, 0),
            document_analytics: document_analytics([&status], day(1, 0), day(3, 0)),
            agent_analytics: agent_performance(
                &Vec::<AgentStatusView>::new(),
                &Vec::<AgentMetricsRecord>::new(),
                day(1, 0),
                day(3, 0),
            ),
        };

        let json: serde_json::Value =
            serde_json::from_slice(&export.render(ExportFormat::Json).unwrap()).unwrap();
        assert!(json.get("document_analytics").is_some());
        assert!(json.get("agent_analytics").is_some());

        let csv = String::from_utf8(export.render(ExportFormat::Csv).unwrap()).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("Metric,Value"));
        assert!(csv.contains("Total Documents,3\n"));
        assert!(csv.contains("Documents: BRD,1\n"));

        assert!(export.render(ExportFormat::Pdf).unwrap_err().is_unsupported());
        assert!(export.render(ExportFormat::Excel).unwrap_err().is_unsupported());
    }

    #[test]
    fn test_csv_field_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_export_format_parsing() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("xlsx".parse::<ExportFormat>().unwrap(), ExportFormat::Excel);
        assert!("docx".parse::<ExportFormat>().is_err());
    }
}
