//! End-to-end tests of the dashboard feed
//!
//! A monitoring service is driven the way generation workers and the
//! orchestrator would drive it, and the resulting state and published events
//! are checked.

use std::path::Path;
use agentdeck_monitoring::Clock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentdeck_monitoring::{
    AgentMetricsSample, BroadcastSink, ChangeType, ChannelEvent, DashboardEvent, ExportFormat,
    FileChangeEvent, ManualClock, ManualWatchSource, MonitoringConfig, MonitoringService,
    OverallHealth, ProjectPhase, RealtimeSink, ResourceMetric, ResourceSnapshot, StaticSampler,
    FnProbe,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

struct Harness {
    service: MonitoringService,
    clock: ManualClock,
    sink: BroadcastSink,
    sampler: Arc<StaticSampler>,
    watch: ManualWatchSource,
}

fn harness_with(config: MonitoringConfig) -> Harness {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 6, 8, 0, 0).unwrap());
    let sink = BroadcastSink::new(4096);
    let sampler = Arc::new(StaticSampler::new(ResourceSnapshot {
        cpu_usage: 35.0,
        memory_used: 8 * 1024 * 1024 * 1024,
        memory_total: 32 * 1024 * 1024 * 1024,
        disk_used: 200 * 1024 * 1024 * 1024,
        disk_total: 500 * 1024 * 1024 * 1024,
        load_average: 0.8,
        process_count: 240,
    }));
    let watch = ManualWatchSource::new();

    let service = MonitoringService::builder()
        .config(config)
        .clock(Arc::new(clock.clone()))
        .sampler(sampler.clone())
        .sink(Arc::new(sink.clone()))
        .watch_source(Arc::new(watch.clone()))
        .probe(Arc::new(FnProbe::new("generator", || true)))
        .build()
        .unwrap();

    Harness {
        service,
        clock,
        sink,
        sampler,
        watch,
    }
}

fn harness() -> Harness {
    harness_with(MonitoringConfig::default())
}

fn drain(receiver: &mut broadcast::Receiver<ChannelEvent>) -> Vec<ChannelEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn progress_drives_project_to_completion() {
    let h = harness();
    let mut published = h.sink.subscribe();

    h.service.start_document_monitoring("p1", "BRD").await.unwrap();
    for progress in [0.0, 40.0, 100.0] {
        h.clock.advance(chrono::Duration::minutes(5));
        h.service
            .update_progress("p1", "BRD", progress, "Generating")
            .await
            .unwrap();
    }

    let status = h.service.get_document_status("p1").unwrap();
    assert_eq!(status.overall_progress, 100.0);
    assert!(status.is_complete);
    assert!(!status.has_errors);
    assert!(status.documents["BRD"].completed_at.is_some());

    let project_updates: Vec<f64> = drain(&mut published)
        .into_iter()
        .filter(|e| e.channel == "project-p1")
        .filter_map(|e| match e.event {
            DashboardEvent::DocumentProgress(n) => Some(n.progress),
            _ => None,
        })
        .collect();
    assert_eq!(project_updates, vec![0.0, 0.0, 40.0, 100.0]);

    let history = h.service.get_progress_history("p1");
    assert_eq!(history.len(), 3);
    assert_eq!(history[1].progress, 40.0);
}

#[tokio::test]
async fn failed_document_flags_errors_and_still_completes() {
    let h = harness();
    h.service.start_document_monitoring("p2", "BRD").await.unwrap();
    h.service.start_document_monitoring("p2", "SRS").await.unwrap();
    h.service
        .update_progress("p2", "SRS", 30.0, "Generating")
        .await
        .unwrap();

    h.service
        .complete_document("p2", "SRS", false, Some("provider unavailable".to_string()))
        .await
        .unwrap();
    let status = h.service.get_document_status("p2").unwrap();
    assert!(status.has_errors);
    assert!(!status.is_complete);
    assert_eq!(status.documents["SRS"].progress, 30.0);
    assert_eq!(
        status.documents["SRS"].error.as_deref(),
        Some("provider unavailable")
    );

    h.service.complete_document("p2", "BRD", true, None).await.unwrap();
    let status = h.service.get_document_status("p2").unwrap();
    assert!(status.is_complete);
    assert_eq!(status.overall_progress, 65.0);

    let overview = h.service.get_project_overview("p2").unwrap();
    assert!(overview.has_errors);
    assert_eq!(overview.current_phase, ProjectPhase::DocumentGeneration);
}

#[tokio::test]
async fn progress_subscribers_see_updates_in_order() {
    let h = harness();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    h.service.subscribe_progress("p1", move |n| {
        recorder.lock().push(n.progress);
        Ok(())
    });
    h.service
        .subscribe_progress("p1", |_| panic!("dashboard widget crashed"));
    let other = Arc::new(AtomicUsize::new(0));
    let counter = other.clone();
    h.service.subscribe_progress("p3", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    h.service.start_document_monitoring("p1", "BRD").await.unwrap();
    for progress in [10.0, 20.0, 30.0] {
        h.service
            .update_progress("p1", "BRD", progress, "Generating")
            .await
            .unwrap();
    }

    assert_eq!(*seen.lock(), vec![0.0, 10.0, 20.0, 30.0]);
    assert_eq!(other.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unhealthy_agent_metrics_are_reported() {
    let h = harness();
    let agent = Uuid::new_v4();
    h.service
        .start_agent_monitoring(agent, "BrdWriter", "p1")
        .await
        .unwrap();

    let report = h
        .service
        .record_agent_metrics(
            agent,
            AgentMetricsSample {
                cpu_usage: 95.0,
                memory_usage: 512.0,
                response_time_ms: 300.0,
                requests_per_minute: 20.0,
                ..AgentMetricsSample::default()
            },
        )
        .await
        .unwrap();
    assert!(!report.is_healthy);

    let health = h.service.get_agent_health(agent).unwrap();
    assert!(!health.is_healthy);
    assert_eq!(health.agent_type, "BrdWriter");
    assert_eq!(h.service.get_agent_metrics_history(agent).len(), 1);
}

#[tokio::test]
async fn resource_history_evicts_oldest_sample() {
    let h = harness();
    for _ in 0..1001 {
        h.clock.advance(chrono::Duration::seconds(10));
        h.service.sample_now().await.unwrap();
    }

    let cpu = h.service.get_resource_usage(ResourceMetric::Cpu, None);
    assert_eq!(cpu.len(), 1000);
    let first_sample = Utc.with_ymd_and_hms(2024, 5, 6, 8, 0, 10).unwrap();
    assert_eq!(cpu[0].timestamp, first_sample + chrono::Duration::seconds(10));

    let recent = h.service.get_resource_usage(
        ResourceMetric::Memory,
        Some(h.clock.now() - chrono::Duration::seconds(25)),
    );
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[0].value, 25.0);
}

#[tokio::test]
async fn analytics_export_contains_both_sections() {
    let h = harness();
    let from = h.clock.now() - chrono::Duration::days(1);

    let agent = Uuid::new_v4();
    h.service
        .start_agent_monitoring(agent, "BrdWriter", "p1")
        .await
        .unwrap();
    h.service.record_agent_task(agent, true).await.unwrap();
    h.service.start_document_monitoring("p1", "BRD").await.unwrap();
    h.clock.advance(chrono::Duration::minutes(12));
    h.service.complete_document("p1", "BRD", true, None).await.unwrap();
    let to = h.clock.now() + chrono::Duration::days(1);

    let bytes = h.service.export_analytics(ExportFormat::Json, from, to).unwrap();
    let export: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(export["document_analytics"]["total_documents"], 1);
    assert_eq!(export["document_analytics"]["average_generation_minutes"], 12.0);
    assert_eq!(export["agent_analytics"]["total_tasks_completed"], 1);

    let csv = h.service.export_analytics(ExportFormat::Csv, from, to).unwrap();
    let csv = String::from_utf8(csv).unwrap();
    assert!(csv.starts_with("Metric,Value"));

    assert!(h
        .service
        .export_analytics(ExportFormat::Excel, from, to)
        .unwrap_err()
        .is_unsupported());
}

#[tokio::test]
async fn health_report_reflects_services_and_events() {
    let h = harness();
    h.sampler.set(ResourceSnapshot {
        cpu_usage: 92.0,
        memory_used: 1,
        memory_total: 2,
        disk_used: 10,
        disk_total: 20,
        load_average: 4.0,
        process_count: 10,
    });
    h.service
        .record_system_event(
            "provider_error",
            "generator",
            "Provider returned 503",
            agentdeck_monitoring::EventSeverity::Error,
            None,
        )
        .await
        .unwrap();

    let report = h.service.generate_system_health_report().await;
    assert_eq!(report.status, OverallHealth::Healthy);
    assert_eq!(report.total_services, 1);
    assert_eq!(report.issues.len(), 1);
    assert!(report.recommendations.iter().any(|r| r.contains("CPU")));
}

#[tokio::test]
async fn sink_failures_do_not_fail_updates() {
    struct BrokenSink;

    #[async_trait]
    impl RealtimeSink for BrokenSink {
        async fn publish(&self, _channel: &str, _event: &DashboardEvent) -> anyhow::Result<()> {
            anyhow::bail!("transport down")
        }
    }

    let service = MonitoringService::builder()
        .sampler(Arc::new(StaticSampler::default()))
        .sink(Arc::new(BrokenSink))
        .watch_source(Arc::new(ManualWatchSource::new()))
        .build()
        .unwrap();
    let mut all = service.subscribe_all();

    service.start_document_monitoring("p1", "BRD").await.unwrap();
    service
        .update_progress("p1", "BRD", 50.0, "Generating")
        .await
        .unwrap();

    let mut names = Vec::new();
    while let Ok(event) = all.try_recv() {
        names.push(event.name());
    }
    assert_eq!(
        names,
        vec!["document_progress", "document_progress", "project_progress"]
    );
}

#[tokio::test(start_paused = true)]
async fn sampling_loop_runs_until_stopped() {
    let h = harness();
    let mut all = h.service.subscribe_all();

    assert!(h.service.start());
    tokio::time::sleep(Duration::from_secs(25)).await;
    let sampled = h.service.get_resource_usage(ResourceMetric::Cpu, None).len();
    assert!(sampled >= 3);

    assert!(h.service.stop().await);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(
        h.service.get_resource_usage(ResourceMetric::Cpu, None).len(),
        sampled
    );

    match all.try_recv() {
        Ok(DashboardEvent::SystemMetrics(metrics)) => {
            assert_eq!(metrics.services.get("generator"), Some(&true));
        }
        other => panic!("expected a system metrics event, got {:?}", other),
    }
}

#[tokio::test]
async fn file_changes_reach_listeners_and_sink() {
    let h = harness();
    let mut published = h.sink.subscribe();
    let changes = Arc::new(Mutex::new(Vec::new()));
    let recorder = changes.clone();
    h.service.on_file_change(move |event| {
        recorder.lock().push(event.path.clone());
        Ok(())
    });

    assert!(h.service.start());
    assert!(h.service.start_watch("/projects/p1").unwrap());
    assert!(!h.service.start_watch("/projects/p1").unwrap());

    assert!(h.watch.emit(
        Path::new("/projects/p1"),
        FileChangeEvent::renamed("/projects/p1/brd.md", "/projects/p1/brd-v2.md")
    ));

    let forwarded = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match published.recv().await {
                Ok(event) if event.name == "file_changed" => break event,
                Ok(_) => continue,
                Err(e) => panic!("sink channel closed: {}", e),
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(forwarded.channel, "dashboard");
    match forwarded.event {
        DashboardEvent::FileChanged(event) => {
            assert_eq!(event.change_type, ChangeType::Renamed);
            assert_eq!(
                event.old_path.as_deref(),
                Some(Path::new("/projects/p1/brd.md"))
            );
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(changes.lock().len(), 1);

    assert!(h.service.stop_watch("/projects/p1"));
    assert!(!h.watch.emit(
        Path::new("/projects/p1"),
        FileChangeEvent::new("/projects/p1/brd.md", ChangeType::Deleted)
    ));
    h.service.stop().await;
}

#[tokio::test]
async fn file_changes_while_stopped_are_not_replayed() {
    let h = harness();
    let changes = Arc::new(AtomicUsize::new(0));
    let counter = changes.clone();
    h.service.on_file_change(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let change = || FileChangeEvent::new("/projects/p1/brd.md", ChangeType::Modified);

    assert!(h.service.start_watch("/projects/p1").unwrap());
    for _ in 0..100 {
        assert!(!h.watch.emit(Path::new("/projects/p1"), change()));
    }

    h.service.start();
    assert!(h.watch.emit(Path::new("/projects/p1"), change()));
    tokio::time::timeout(Duration::from_secs(5), async {
        while changes.load(Ordering::SeqCst) < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    h.service.stop().await;
    assert!(!h.watch.emit(Path::new("/projects/p1"), change()));

    h.service.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(changes.load(Ordering::SeqCst), 1);
    h.service.stop().await;
}

#[tokio::test]
async fn native_watcher_reports_file_creation() {
    let dir = tempfile::tempdir().unwrap();
    let service = MonitoringService::builder()
        .sampler(Arc::new(StaticSampler::default()))
        .build()
        .unwrap();
    let mut all = service.subscribe_all();

    service.start();
    assert!(service.start_watch(dir.path()).unwrap());
    std::fs::write(dir.path().join("brd.md"), "# Business requirements").unwrap();

    let event = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match all.recv().await {
                Ok(DashboardEvent::FileChanged(event)) => break event,
                Ok(_) => continue,
                Err(e) => panic!("event channel closed: {}", e),
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(
        event.path.file_name().and_then(|n| n.to_str()),
        Some("brd.md")
    );
    service.stop().await;
}
