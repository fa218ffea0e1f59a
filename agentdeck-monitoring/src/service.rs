//! Monitoring and aggregation service
//!
//! [`MonitoringService`] keeps the in-memory view the dashboard is built from:
//! document progress per project, agent status and health, sampled system
//! metrics and the system event log. Every mutation is fanned out as a
//! [`DashboardEvent`] to the realtime sink, to `subscribe_all` receivers and
//! to the registered callbacks.

use crate::{
    agents::{
        AgentHealthReport, AgentMetricsRecord, AgentMetricsSample, AgentState, AgentStatusView,
        HealthThresholds,
    },
    analytics::{
        agent_performance, document_analytics, system_health_report, AgentPerformanceAnalytics,
        AnalyticsExport, DocumentAnalytics, ExportFormat, SystemHealthReport,
    },
    clock::{Clock, SystemClock},
    config::MonitoringConfig,
    error::{MonitoringError, Result},
    events::{project_channel, DashboardEvent, EventFilter, EventSeverity, SystemEvent, DASHBOARD_CHANNEL},
    history::BoundedHistory,
    metrics::{
        run_probes, ResourceMetric, ResourceSampler, ResourceUsage, ServiceProbe, SysinfoSampler,
        SystemMetrics,
    },
    phase::{determine_project_phase, ProjectInfo, ProjectOverview, ProjectPhase},
    progress::{
        validate_progress, DocumentCompletion, DocumentGenerationStatus, DocumentProgress,
        ProgressHistoryEntry, ProgressNotification, ProjectProgressNotification,
    },
    sink::{NullSink, RealtimeSink},
    watcher::{FileChangeEvent, FileWatchService, FileWatchSource, NotifyWatchSource},
};
use agentdeck_core::AgentId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

pub type ProgressCallback = Arc<dyn Fn(&ProgressNotification) -> anyhow::Result<()> + Send + Sync>;
pub type MetricsCallback = Arc<dyn Fn(&SystemMetrics) -> anyhow::Result<()> + Send + Sync>;

struct ProgressSubscription {
    project_id: String,
    callback: ProgressCallback,
}

struct Inner {
    config: MonitoringConfig,
    clock: Arc<dyn Clock>,
    sampler: Arc<dyn ResourceSampler>,
    sink: Arc<dyn RealtimeSink>,
    probes: Vec<Arc<dyn ServiceProbe>>,
    thresholds: HealthThresholds,

    projects: DashMap<String, ProjectInfo>,
    documents: DashMap<String, DocumentGenerationStatus>,
    progress_history: DashMap<String, Arc<BoundedHistory<ProgressHistoryEntry>>>,

    agents: DashMap<AgentId, AgentStatusView>,
    agent_metrics: DashMap<AgentId, Arc<BoundedHistory<AgentMetricsRecord>>>,
    agent_health: DashMap<AgentId, AgentHealthReport>,

    latest_metrics: RwLock<Option<SystemMetrics>>,
    resources: HashMap<ResourceMetric, BoundedHistory<ResourceUsage>>,
    events: BoundedHistory<SystemEvent>,

    progress_subscribers: RwLock<HashMap<Uuid, ProgressSubscription>>,
    metrics_subscribers: RwLock<HashMap<Uuid, MetricsCallback>>,
    broadcaster: broadcast::Sender<DashboardEvent>,
    watcher: FileWatchService,
}

struct Running {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Aggregates progress, agent health and system metrics for the dashboard
pub struct MonitoringService {
    inner: Arc<Inner>,
    running: Mutex<Option<Running>>,
}

/// Builder for [`MonitoringService`]; every collaborator has a production default
pub struct MonitoringServiceBuilder {
    config: MonitoringConfig,
    clock: Option<Arc<dyn Clock>>,
    sampler: Option<Arc<dyn ResourceSampler>>,
    sink: Option<Arc<dyn RealtimeSink>>,
    watch_source: Option<Arc<dyn FileWatchSource>>,
    probes: Vec<Arc<dyn ServiceProbe>>,
}

impl Default for MonitoringServiceBuilder {
    fn default() -> Self {
        Self {
            config: MonitoringConfig::default(),
            clock: None,
            sampler: None,
            sink: None,
            watch_source: None,
            probes: Vec::new(),
        }
    }
}

impl MonitoringServiceBuilder {
    pub fn config(mut self, config: MonitoringConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn sampler(mut self, sampler: Arc<dyn ResourceSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn RealtimeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn watch_source(mut self, source: Arc<dyn FileWatchSource>) -> Self {
        self.watch_source = Some(source);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn ServiceProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn probes<I>(mut self, probes: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn ServiceProbe>>,
    {
        self.probes.extend(probes);
        self
    }

    pub fn build(self) -> Result<MonitoringService> {
        self.config.validate()?;

        let history = &self.config.history;
        let resources = ResourceMetric::ALL
            .iter()
            .map(|metric| (*metric, BoundedHistory::new(history.resource_capacity)))
            .collect();
        let events = BoundedHistory::new(history.event_log_capacity);
        let (broadcaster, _) = broadcast::channel(history.event_channel_capacity.max(1));
        let watcher = FileWatchService::new(
            self.watch_source
                .unwrap_or_else(|| Arc::new(NotifyWatchSource)),
            history.file_event_queue_capacity,
        );

        let inner = Inner {
            thresholds: HealthThresholds::from(&self.config.health),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            sampler: self
                .sampler
                .unwrap_or_else(|| Arc::new(SysinfoSampler::new())),
            sink: self.sink.unwrap_or_else(|| Arc::new(NullSink)),
            probes: self.probes,
            projects: DashMap::new(),
            documents: DashMap::new(),
            progress_history: DashMap::new(),
            agents: DashMap::new(),
            agent_metrics: DashMap::new(),
            agent_health: DashMap::new(),
            latest_metrics: RwLock::new(None),
            resources,
            events,
            progress_subscribers: RwLock::new(HashMap::new()),
            metrics_subscribers: RwLock::new(HashMap::new()),
            broadcaster,
            watcher,
            config: self.config,
        };

        Ok(MonitoringService {
            inner: Arc::new(inner),
            running: Mutex::new(None),
        })
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(MonitoringError::validation(format!(
            "{} cannot be empty",
            field
        )));
    }
    Ok(())
}

/// Run a subscriber callback, logging its error or panic instead of propagating
fn call_isolated<F>(subscriber: Uuid, kind: &'static str, callback: F)
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match std::panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(subscriber = %subscriber, kind, error = %e, "Subscriber callback failed"),
        Err(_) => error!(subscriber = %subscriber, kind, "Subscriber callback panicked"),
    }
}

impl Inner {
    async fn emit(&self, channel: &str, event: DashboardEvent) {
        metrics::counter!("dashboard_events_total", "event" => event.name()).increment(1);

        // no receivers is fine
        let _ = self.broadcaster.send(event.clone());

        let publish = AssertUnwindSafe(self.sink.publish(channel, &event)).catch_unwind();
        match publish.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(channel, event = event.name(), error = %e, "Realtime sink publish failed"),
            Err(_) => error!(channel, event = event.name(), "Realtime sink panicked"),
        }
    }

    async fn sample(&self) -> Result<SystemMetrics> {
        let snapshot = self.sampler.sample().await?;
        let services = run_probes(&self.probes, self.config.sampling.probe_timeout()).await;
        let metrics = SystemMetrics::from_snapshot(&snapshot, services, self.clock.now());

        for (metric, history) in &self.resources {
            history.push(ResourceUsage {
                metric: *metric,
                value: metric.value_of(&metrics),
                timestamp: metrics.timestamp,
            });
        }
        *self.latest_metrics.write() = Some(metrics.clone());
        metrics.publish_gauges();

        let callbacks: Vec<(Uuid, MetricsCallback)> = self
            .metrics_subscribers
            .read()
            .iter()
            .map(|(id, callback)| (*id, callback.clone()))
            .collect();
        for (id, callback) in callbacks {
            call_isolated(id, "metrics", || callback(&metrics));
        }

        debug!(
            cpu_usage = metrics.cpu_usage,
            memory_percentage = metrics.memory_percentage,
            "Sampled system metrics"
        );
        self.emit(DASHBOARD_CHANNEL, DashboardEvent::SystemMetrics(metrics.clone()))
            .await;
        Ok(metrics)
    }

    fn notify_progress(&self, notification: &ProgressNotification) {
        let callbacks: Vec<(Uuid, ProgressCallback)> = self
            .progress_subscribers
            .read()
            .iter()
            .filter(|(_, sub)| sub.project_id == notification.project_id)
            .map(|(id, sub)| (*id, sub.callback.clone()))
            .collect();
        for (id, callback) in callbacks {
            call_isolated(id, "progress", || callback(notification));
        }
    }

    fn record_progress_history(&self, notification: &ProgressNotification) {
        let capacity = self.config.history.progress_history_capacity;
        let history = self
            .progress_history
            .entry(notification.project_id.clone())
            .or_insert_with(|| Arc::new(BoundedHistory::new(capacity)))
            .clone();
        history.push(ProgressHistoryEntry::from(notification));
    }

    async fn emit_agent_status(&self, view: AgentStatusView) {
        let channel = project_channel(&view.project_id);
        self.emit(&channel, DashboardEvent::AgentStatus(view.clone()))
            .await;
        self.emit(DASHBOARD_CHANNEL, DashboardEvent::AgentStatus(view))
            .await;
    }

    fn project_overview(&self, project_id: &str) -> Option<ProjectOverview> {
        let info = self.projects.get(project_id).map(|p| p.value().clone());
        let status = self.documents.get(project_id).map(|s| s.value().clone());
        if info.is_none() && status.is_none() {
            return None;
        }

        let mut active_agents: Vec<AgentId> = self
            .agents
            .iter()
            .filter(|a| a.project_id == project_id && a.state.is_active())
            .map(|a| a.agent_id)
            .collect();
        active_agents.sort();

        let document_progress = status
            .as_ref()
            .map(|s| s.document_progress_map())
            .unwrap_or_default();
        let overall_progress = status.as_ref().map_or(0.0, |s| s.overall_progress);
        let current_phase =
            determine_project_phase(overall_progress, &document_progress, active_agents.len());

        let created_at = info
            .as_ref()
            .map(|i| i.created_at)
            .or_else(|| status.as_ref().map(|s| s.started_at))
            .unwrap_or_else(|| self.clock.now());

        Some(ProjectOverview {
            project_id: project_id.to_string(),
            project_name: info
                .as_ref()
                .map_or_else(|| project_id.to_string(), |i| i.name.clone()),
            project_type: info
                .as_ref()
                .map_or_else(|| "unknown".to_string(), |i| i.project_type.clone()),
            created_at,
            document_progress,
            overall_progress,
            has_errors: status.as_ref().map_or(false, |s| s.has_errors),
            active_agents,
            current_phase,
        })
    }
}

async fn sampling_loop(inner: Arc<Inner>, token: CancellationToken) {
    let mut ticker = tokio::time::interval(inner.config.sampling.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = inner.sample().await {
                    warn!(error = %e, "System metrics sampling failed");
                }
            }
        }
    }
    debug!("Sampling loop stopped");
}

async fn file_event_pump(inner: Arc<Inner>, token: CancellationToken) {
    while let Some(event) = inner.watcher.next_event_until(token.cancelled()).await {
        debug!(path = %event.path.display(), change = ?event.change_type, "File changed");
        inner.watcher.notify_listeners(&event);
        inner
            .emit(DASHBOARD_CHANNEL, DashboardEvent::FileChanged(event))
            .await;
    }
    debug!("File event pump stopped");
}

impl MonitoringService {
    pub fn builder() -> MonitoringServiceBuilder {
        MonitoringServiceBuilder::default()
    }

    /// Service with production collaborators
    pub fn new(config: MonitoringConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.inner.config
    }

    // Lifecycle

    /// Spawn the sampling loop and the file event pump.
    ///
    /// Must be called inside a tokio runtime. Returns false if already running.
    pub fn start(&self) -> bool {
        let mut running = self.running.lock();
        if running.is_some() {
            debug!("Monitoring service is already running");
            return false;
        }

        let token = CancellationToken::new();
        let mut tasks = Vec::with_capacity(2);
        if self.inner.config.sampling.enabled {
            tasks.push(tokio::spawn(sampling_loop(self.inner.clone(), token.clone())));
        }
        tasks.push(tokio::spawn(file_event_pump(self.inner.clone(), token.clone())));
        self.inner.watcher.resume();
        *running = Some(Running { token, tasks });

        info!(
            sampling = self.inner.config.sampling.enabled,
            interval_secs = self.inner.config.sampling.interval_secs,
            "Monitoring service started"
        );
        true
    }

    /// Cancel the background tasks and wait for them, discarding file changes
    /// that were not yet delivered. Returns false if not running.
    pub async fn stop(&self) -> bool {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return false;
        };

        running.token.cancel();
        for task in running.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Monitoring task ended abnormally");
            }
        }
        self.inner.watcher.pause().await;
        info!("Monitoring service stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Run one sampling cycle now
    pub async fn sample_now(&self) -> Result<SystemMetrics> {
        self.inner.sample().await
    }

    // Document progress

    /// Begin tracking a document, creating the project status on first use
    #[instrument(skip(self))]
    pub async fn start_document_monitoring(
        &self,
        project_id: &str,
        document_type: &str,
    ) -> Result<DocumentProgress> {
        require_non_empty("Project id", project_id)?;
        require_non_empty("Document type", document_type)?;

        let now = self.inner.clock.now();
        let (document, notification) = {
            let mut project = self
                .inner
                .documents
                .entry(project_id.to_string())
                .or_insert_with(|| DocumentGenerationStatus::new(project_id, now));
            let document = project.start_document(document_type, now).clone();
            let notification = ProgressNotification::new(&project, &document, now);
            (document, notification)
        };

        info!(project_id, document_type, "Started document monitoring");
        self.inner.notify_progress(&notification);
        self.inner
            .emit(
                &project_channel(project_id),
                DashboardEvent::DocumentProgress(notification),
            )
            .await;
        Ok(document)
    }

    /// Record progress for a document and recompute the project's overall progress
    pub async fn update_progress(
        &self,
        project_id: &str,
        document_type: &str,
        progress: f64,
        status: &str,
    ) -> Result<ProgressNotification> {
        require_non_empty("Project id", project_id)?;
        require_non_empty("Document type", document_type)?;
        validate_progress(progress)?;

        let now = self.inner.clock.now();
        let (notification, project_notification) = {
            let mut project = self
                .inner
                .documents
                .entry(project_id.to_string())
                .or_insert_with(|| DocumentGenerationStatus::new(project_id, now));
            let document = project
                .update_document(document_type, progress, status, now)?
                .clone();
            (
                ProgressNotification::new(&project, &document, now),
                ProjectProgressNotification::new(&project, now),
            )
        };

        debug!(
            project_id,
            document_type,
            progress,
            overall_progress = notification.overall_progress,
            "Document progress updated"
        );
        self.inner.record_progress_history(&notification);
        self.inner.notify_progress(&notification);
        self.inner
            .emit(
                &project_channel(project_id),
                DashboardEvent::DocumentProgress(notification.clone()),
            )
            .await;
        self.inner
            .emit(
                DASHBOARD_CHANNEL,
                DashboardEvent::ProjectProgress(project_notification),
            )
            .await;
        Ok(notification)
    }

    /// Mark a tracked document finished, successfully or not
    #[instrument(skip(self))]
    pub async fn complete_document(
        &self,
        project_id: &str,
        document_type: &str,
        success: bool,
        error: Option<String>,
    ) -> Result<DocumentProgress> {
        require_non_empty("Project id", project_id)?;
        require_non_empty("Document type", document_type)?;

        let now = self.inner.clock.now();
        let (document, notification, project_notification) = {
            let mut project = self
                .inner
                .documents
                .get_mut(project_id)
                .ok_or_else(|| MonitoringError::not_found("Project", project_id))?;
            let document = project
                .complete_document(document_type, success, error.clone(), now)?
                .clone();
            let notification = ProgressNotification::new(&project, &document, now);
            let project_notification = ProjectProgressNotification::new(&project, now);
            (document, notification, project_notification)
        };

        if success {
            info!(project_id, document_type, "Document generation completed");
        } else {
            warn!(
                project_id,
                document_type,
                error = error.as_deref().unwrap_or("unknown error"),
                "Document generation failed"
            );
        }

        self.inner.record_progress_history(&notification);
        self.inner.notify_progress(&notification);
        let completion = DocumentCompletion {
            project_id: project_id.to_string(),
            document_type: document_type.to_string(),
            success,
            error,
            timestamp: now,
        };
        self.inner
            .emit(
                &project_channel(project_id),
                DashboardEvent::DocumentCompleted(completion),
            )
            .await;
        self.inner
            .emit(
                DASHBOARD_CHANNEL,
                DashboardEvent::ProjectProgress(project_notification),
            )
            .await;
        Ok(document)
    }

    // Projects

    /// Add or replace the descriptive data of a project
    pub fn register_project(&self, info: ProjectInfo) -> Result<()> {
        require_non_empty("Project id", &info.project_id)?;
        debug!(project_id = %info.project_id, name = %info.name, "Registered project");
        self.inner.projects.insert(info.project_id.clone(), info);
        Ok(())
    }

    pub fn get_document_status(&self, project_id: &str) -> Option<DocumentGenerationStatus> {
        self.inner
            .documents
            .get(project_id)
            .map(|s| s.value().clone())
    }

    /// Progress records of a project, oldest first
    pub fn get_progress_history(&self, project_id: &str) -> Vec<ProgressHistoryEntry> {
        self.inner
            .progress_history
            .get(project_id)
            .map(|h| h.snapshot())
            .unwrap_or_default()
    }

    pub fn get_project_overview(&self, project_id: &str) -> Option<ProjectOverview> {
        self.inner.project_overview(project_id)
    }

    /// Overviews of every known project, ordered by id
    pub fn get_all_projects_status(&self) -> Vec<ProjectOverview> {
        let ids: BTreeSet<String> = self
            .inner
            .projects
            .iter()
            .map(|p| p.key().clone())
            .chain(self.inner.documents.iter().map(|d| d.key().clone()))
            .collect();

        ids.iter()
            .filter_map(|id| self.inner.project_overview(id))
            .collect()
    }

    pub fn project_phase(&self, project_id: &str) -> Option<ProjectPhase> {
        self.inner
            .project_overview(project_id)
            .map(|overview| overview.current_phase)
    }

    // Agents

    /// Start tracking an agent working on a project
    #[instrument(skip(self))]
    pub async fn start_agent_monitoring(
        &self,
        agent_id: AgentId,
        agent_type: &str,
        project_id: &str,
    ) -> Result<AgentStatusView> {
        require_non_empty("Agent type", agent_type)?;
        require_non_empty("Project id", project_id)?;

        let view = AgentStatusView::new(agent_id, agent_type, project_id, self.inner.clock.now());
        self.inner.agents.insert(agent_id, view.clone());

        info!(%agent_id, agent_type, project_id, "Started agent monitoring");
        self.inner.emit_agent_status(view.clone()).await;
        Ok(view)
    }

    /// Change a monitored agent's state and current task
    pub async fn update_agent_status(
        &self,
        agent_id: AgentId,
        state: AgentState,
        current_task: Option<String>,
    ) -> Result<AgentStatusView> {
        let now = self.inner.clock.now();
        let view = {
            let mut view = self
                .inner
                .agents
                .get_mut(&agent_id)
                .ok_or_else(|| MonitoringError::not_found("Agent", agent_id.to_string()))?;
            view.state = state;
            view.current_task = current_task;
            view.last_heartbeat = now;
            view.clone()
        };

        debug!(%agent_id, state = ?state, "Agent status updated");
        self.inner.emit_agent_status(view.clone()).await;
        Ok(view)
    }

    /// Count a finished task against a monitored agent
    pub async fn record_agent_task(&self, agent_id: AgentId, success: bool) -> Result<AgentStatusView> {
        let now = self.inner.clock.now();
        let view = {
            let mut view = self
                .inner
                .agents
                .get_mut(&agent_id)
                .ok_or_else(|| MonitoringError::not_found("Agent", agent_id.to_string()))?;
            if success {
                view.tasks_completed += 1;
            } else {
                view.tasks_failed += 1;
            }
            view.last_heartbeat = now;
            view.clone()
        };

        self.inner.emit_agent_status(view.clone()).await;
        Ok(view)
    }

    /// Store a metrics sample and classify the agent's health.
    ///
    /// Agents that were never monitored are accepted with type "unknown".
    pub async fn record_agent_metrics(
        &self,
        agent_id: AgentId,
        sample: AgentMetricsSample,
    ) -> Result<AgentHealthReport> {
        let values = [
            sample.cpu_usage,
            sample.memory_usage,
            sample.response_time_ms,
            sample.requests_per_minute,
        ];
        if values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(MonitoringError::validation(
                "Agent metrics must be finite and non-negative",
            ));
        }

        let now = self.inner.clock.now();
        let agent_type = match self.inner.agents.get_mut(&agent_id) {
            Some(mut view) => {
                view.last_heartbeat = now;
                view.agent_type.clone()
            }
            None => "unknown".to_string(),
        };

        let record = AgentMetricsRecord {
            agent_id,
            agent_type,
            timestamp: now,
            sample,
        };
        let capacity = self.inner.config.history.agent_metrics_capacity;
        let history = self
            .inner
            .agent_metrics
            .entry(agent_id)
            .or_insert_with(|| Arc::new(BoundedHistory::new(capacity)))
            .clone();
        history.push(record.clone());

        let report = self.inner.thresholds.classify(&record);
        self.inner.agent_health.insert(agent_id, report.clone());

        if !report.is_healthy {
            warn!(
                %agent_id,
                cpu_usage = report.cpu_usage,
                memory_usage = report.memory_usage,
                response_time_ms = report.average_response_time,
                "Agent is unhealthy"
            );
        }
        self.inner
            .emit(DASHBOARD_CHANNEL, DashboardEvent::AgentHealth(report.clone()))
            .await;
        Ok(report)
    }

    pub fn get_agent_health(&self, agent_id: AgentId) -> Option<AgentHealthReport> {
        self.inner
            .agent_health
            .get(&agent_id)
            .map(|r| r.value().clone())
    }

    pub fn get_agent_status(&self, agent_id: AgentId) -> Option<AgentStatusView> {
        self.inner.agents.get(&agent_id).map(|v| v.value().clone())
    }

    pub fn get_project_agents(&self, project_id: &str) -> Vec<AgentStatusView> {
        let mut agents: Vec<AgentStatusView> = self
            .inner
            .agents
            .iter()
            .filter(|v| v.project_id == project_id)
            .map(|v| v.value().clone())
            .collect();
        agents.sort_by_key(|v| v.started_at);
        agents
    }

    pub fn get_agent_metrics_history(&self, agent_id: AgentId) -> Vec<AgentMetricsRecord> {
        self.inner
            .agent_metrics
            .get(&agent_id)
            .map(|h| h.snapshot())
            .unwrap_or_default()
    }

    // System metrics and events

    pub fn get_system_metrics(&self) -> Option<SystemMetrics> {
        self.inner.latest_metrics.read().clone()
    }

    /// History of one resource series, optionally limited to samples since `since`
    pub fn get_resource_usage(
        &self,
        metric: ResourceMetric,
        since: Option<DateTime<Utc>>,
    ) -> Vec<ResourceUsage> {
        match self.inner.resources.get(&metric) {
            Some(history) => match since {
                Some(since) => history.filtered(|usage| usage.timestamp >= since),
                None => history.snapshot(),
            },
            None => Vec::new(),
        }
    }

    /// Append an event to the log, mirror it into tracing and publish it
    pub async fn record_system_event(
        &self,
        event_type: &str,
        source: &str,
        message: &str,
        severity: EventSeverity,
        data: Option<serde_json::Value>,
    ) -> Result<SystemEvent> {
        require_non_empty("Event type", event_type)?;
        require_non_empty("Event source", source)?;

        let mut event = SystemEvent::new(event_type, source, message, severity, self.inner.clock.now());
        if let Some(data) = data {
            event = event.with_data(data);
        }

        match severity {
            EventSeverity::Debug => debug!(event_type, source, "{}", message),
            EventSeverity::Info => info!(event_type, source, "{}", message),
            EventSeverity::Warning => warn!(event_type, source, "{}", message),
            EventSeverity::Error | EventSeverity::Critical => {
                error!(event_type, source, severity = %severity, "{}", message)
            }
        }
        metrics::counter!("system_events_total", "severity" => severity.to_string()).increment(1);

        self.inner.events.push(event.clone());
        self.inner
            .emit(DASHBOARD_CHANNEL, DashboardEvent::SystemEvent(event.clone()))
            .await;
        Ok(event)
    }

    /// Events matching `filter`, oldest first
    pub fn get_system_events(&self, filter: &EventFilter) -> Vec<SystemEvent> {
        let mut events = self.inner.events.filtered(|e| filter.matches(e));
        if let Some(limit) = filter.limit {
            let skip = events.len().saturating_sub(limit);
            events = events.split_off(skip);
        }
        events
    }

    // Analytics

    pub fn get_document_generation_analytics(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<DocumentAnalytics> {
        check_range(from, to)?;
        let statuses: Vec<DocumentGenerationStatus> = self
            .inner
            .documents
            .iter()
            .map(|s| s.value().clone())
            .collect();
        Ok(document_analytics(&statuses, from, to))
    }

    pub fn get_agent_performance_analytics(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<AgentPerformanceAnalytics> {
        check_range(from, to)?;
        let agents: Vec<AgentStatusView> = self
            .inner
            .agents
            .iter()
            .map(|v| v.value().clone())
            .collect();
        let histories: Vec<Arc<BoundedHistory<AgentMetricsRecord>>> = self
            .inner
            .agent_metrics
            .iter()
            .map(|h| h.value().clone())
            .collect();
        let records: Vec<AgentMetricsRecord> = histories
            .iter()
            .flat_map(|h| h.filtered(|r| r.timestamp >= from && r.timestamp <= to))
            .collect();
        Ok(agent_performance(&agents, &records, from, to))
    }

    /// Health report over the latest sample, sampling first if none exists yet
    pub async fn generate_system_health_report(&self) -> SystemHealthReport {
        let mut metrics = self.get_system_metrics();
        if metrics.is_none() {
            match self.inner.sample().await {
                Ok(sampled) => metrics = Some(sampled),
                Err(e) => warn!(error = %e, "Could not sample metrics for health report"),
            }
        }

        let events = self.inner.events.snapshot();
        system_health_report(
            metrics.as_ref(),
            &events,
            &self.inner.config.health,
            self.inner.clock.now(),
        )
    }

    /// Render document and agent analytics for `[from, to]`
    pub fn export_analytics(
        &self,
        format: ExportFormat,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<u8>> {
        let export = AnalyticsExport {
            generated_at: self.inner.clock.now(),
            from,
            to,
            document_analytics: self.get_document_generation_analytics(from, to)?,
            agent_analytics: self.get_agent_performance_analytics(from, to)?,
        };
        export.render(format)
    }

    // Subscriptions

    /// Call `callback` for every progress notification of `project_id`
    pub fn subscribe_progress<F>(&self, project_id: &str, callback: F) -> Uuid
    where
        F: Fn(&ProgressNotification) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.inner.progress_subscribers.write().insert(
            id,
            ProgressSubscription {
                project_id: project_id.to_string(),
                callback: Arc::new(callback),
            },
        );
        debug!(subscriber = %id, project_id, "Progress subscriber added");
        id
    }

    /// Call `callback` after every system metrics sample
    pub fn subscribe_metrics<F>(&self, callback: F) -> Uuid
    where
        F: Fn(&SystemMetrics) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.inner
            .metrics_subscribers
            .write()
            .insert(id, Arc::new(callback));
        debug!(subscriber = %id, "Metrics subscriber added");
        id
    }

    /// Receive every dashboard event published from now on
    pub fn subscribe_all(&self) -> broadcast::Receiver<DashboardEvent> {
        self.inner.broadcaster.subscribe()
    }

    /// Remove a progress, metrics or file-change subscription
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        self.inner.progress_subscribers.write().remove(&id).is_some()
            || self.inner.metrics_subscribers.write().remove(&id).is_some()
            || self.inner.watcher.remove_listener(id)
    }

    // File watching

    pub fn start_watch(&self, path: impl AsRef<Path>) -> Result<bool> {
        self.inner.watcher.start_watch(path)
    }

    pub fn stop_watch(&self, path: impl AsRef<Path>) -> bool {
        self.inner.watcher.stop_watch(path)
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.inner.watcher.watched_paths()
    }

    /// Call `callback` for every file change while the service is running
    pub fn on_file_change<F>(&self, callback: F) -> Uuid
    where
        F: Fn(&FileChangeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.watcher.add_listener(Arc::new(callback))
    }
}

impl Drop for MonitoringService {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.token.cancel();
        }
    }
}

fn check_range(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<()> {
    if from > to {
        return Err(MonitoringError::validation(format!(
            "Invalid range: {} is after {}",
            from, to
        )));
    }
    Ok(())
}
