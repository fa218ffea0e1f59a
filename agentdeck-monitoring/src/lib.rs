//! Agentdeck monitoring and aggregation
//!
//! This crate keeps the realtime dashboard view of the control plane:
//! - Per-project document progress with milestones and history
//! - Agent status, metrics history and health classification
//! - Project phase inference and project overviews
//! - Background system resource sampling with service probes
//! - Document, agent and system-health analytics with JSON/CSV export
//! - File-change watching
//! - Fan-out of every update to a realtime sink and to subscribers
//!
//! Logging and the Prometheus exporter are bootstrapped through
//! [`TracingSetup`].

pub mod agents;
pub mod analytics;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod metrics;
pub mod phase;
pub mod progress;
pub mod service;
pub mod sink;
pub mod telemetry;
pub mod watcher;

pub use agents::{
    AgentHealthReport, AgentMetricsRecord, AgentMetricsSample, AgentState, AgentStatusView,
    HealthThresholds,
};
pub use analytics::{
    AgentPerformanceAnalytics, DocumentAnalytics, ExportFormat, OverallHealth, SystemHealthReport,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::MonitoringConfig;
pub use error::{MonitoringError, Result};
pub use events::{
    project_channel, ChannelEvent, DashboardEvent, EventFilter, EventSeverity, SystemEvent,
    DASHBOARD_CHANNEL,
};
pub use history::BoundedHistory;
pub use metrics::{
    FnProbe, ResourceMetric, ResourceSampler, ResourceSnapshot, ResourceUsage, ServiceProbe,
    StaticSampler, SysinfoSampler, SystemMetrics,
};
pub use phase::{determine_project_phase, ProjectInfo, ProjectOverview, ProjectPhase};
pub use progress::{
    DocumentGenerationStatus, DocumentProgress, ProgressHistoryEntry, ProgressNotification,
    ProjectProgressNotification,
};
pub use service::{MonitoringService, MonitoringServiceBuilder};
pub use sink::{BroadcastSink, NullSink, RealtimeSink};
pub use telemetry::TracingSetup;
pub use watcher::{
    ChangeType, FileChangeEvent, FileChangeSender, FileWatchSource, ManualWatchSource,
    NotifyWatchSource, WatchGuard,
};
