//! Process wiring: registry, bus and monitoring in one place

use crate::{bridge::MonitoringBridge, config::Config, Result};
use agentdeck_core::{AgentId, AgentRegistry, AgentStatus, MessageBus};
use agentdeck_monitoring::{
    DashboardEvent, FnProbe, MonitoringService, MonitoringServiceBuilder, ServiceProbe,
};
use std::sync::{Arc, Weak};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};
use uuid::Uuid;

/// The running control plane
pub struct Server {
    config: Config,
    registry: Arc<AgentRegistry>,
    bus: Arc<MessageBus>,
    monitoring: Arc<MonitoringService>,
    bridge_id: AgentId,
}

impl Server {
    /// Create a server with production monitoring collaborators
    pub fn new(config: Config) -> Result<Self> {
        Self::with_monitoring(config, MonitoringService::builder())
    }

    /// Create a server whose monitoring service is built from `builder`.
    ///
    /// The monitoring configuration and the built-in service probes are
    /// applied on top of the builder.
    pub fn with_monitoring(config: Config, builder: MonitoringServiceBuilder) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(AgentRegistry::new());
        let bus = Arc::new(MessageBus::with_config(config.bus.clone()));
        let bridge_id = Uuid::new_v4();

        let monitoring = Arc::new(
            builder
                .config(config.monitoring.clone())
                .probes(builtin_probes(
                    Arc::downgrade(&registry),
                    Arc::downgrade(&bus),
                    bridge_id,
                ))
                .build()?,
        );
        bus.subscribe(bridge_id, Arc::new(MonitoringBridge::new(monitoring.clone())));

        info!(bridge_id = %bridge_id, "Control plane initialized");
        Ok(Self {
            config,
            registry,
            bus,
            monitoring,
            bridge_id,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn monitoring(&self) -> &Arc<MonitoringService> {
        &self.monitoring
    }

    /// Bus id under which monitoring reports are accepted
    pub fn bridge_id(&self) -> AgentId {
        self.bridge_id
    }

    /// Start background monitoring and the configured file watches
    pub fn start(&self) -> Result<()> {
        self.monitoring.start();
        for path in &self.config.server.watch_paths {
            self.monitoring.start_watch(path)?;
        }
        Ok(())
    }

    /// Run until Ctrl-C, streaming dashboard events to stdout when enabled
    pub async fn run(&self) -> Result<()> {
        self.start()?;

        let streamer = self.config.server.stream_events.then(|| {
            let events = self.monitoring.subscribe_all();
            tokio::spawn(async move {
                let mut stdout = tokio::io::stdout();
                if let Err(e) = stream_events(events, &mut stdout).await {
                    error!(error = %e, "Dashboard event stream failed");
                }
            })
        });

        info!("Agentdeck is running, press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");

        if let Some(streamer) = streamer {
            streamer.abort();
        }
        self.shutdown().await;
        Ok(())
    }

    /// Stop agents, watches and background monitoring, each bounded by the shutdown timeout
    pub async fn shutdown(&self) {
        let timeout = self.config.shutdown_timeout();

        match tokio::time::timeout(timeout, self.registry.stop_all()).await {
            Ok(stopped) => info!(stopped, "Agents stopped"),
            Err(_) => warn!(timeout_secs = timeout.as_secs(), "Timed out stopping agents"),
        }

        for path in self.monitoring.watched_paths() {
            self.monitoring.stop_watch(&path);
        }
        if tokio::time::timeout(timeout, self.monitoring.stop()).await.is_err() {
            warn!(timeout_secs = timeout.as_secs(), "Timed out stopping monitoring");
        }

        self.bus.unsubscribe(self.bridge_id);
        info!("Agentdeck shut down");
    }
}

/// Probes reporting on the control plane itself. They hold weak references
/// so the monitoring service does not keep the registry or bus alive.
fn builtin_probes(
    registry: Weak<AgentRegistry>,
    bus: Weak<MessageBus>,
    bridge_id: AgentId,
) -> Vec<Arc<dyn ServiceProbe>> {
    vec![
        Arc::new(FnProbe::new("agent_registry", move || {
            registry.upgrade().map_or(false, |registry| {
                registry
                    .get_all()
                    .iter()
                    .all(|agent| agent.status() != AgentStatus::Failed)
            })
        })),
        Arc::new(FnProbe::new("message_bus", move || {
            bus.upgrade()
                .map_or(false, |bus| bus.is_subscribed(bridge_id))
        })),
    ]
}

/// Write each event as one JSON line until the channel closes
pub async fn stream_events<W>(
    mut events: broadcast::Receiver<DashboardEvent>,
    out: &mut W,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        match events.recv().await {
            Ok(event) => {
                let mut line = serde_json::to_vec(&event).map_err(anyhow::Error::from)?;
                line.push(b'\n');
                out.write_all(&line).await?;
                out.flush().await?;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Dashboard event stream lagged behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentdeck_core::{AgentMessage, MessagePayload, MessageType};
    use agentdeck_monitoring::{
        EventFilter, EventSeverity, ManualWatchSource, StaticSampler, SystemEvent,
    };
    use chrono::Utc;

    fn test_server(watch: ManualWatchSource) -> Server {
        let mut config = Config::default();
        config.monitoring.sampling.enabled = false;
        config.server.watch_paths = vec!["/srv/projects".into()];
        let builder = MonitoringService::builder()
            .sampler(Arc::new(StaticSampler::default()))
            .watch_source(Arc::new(watch));
        Server::with_monitoring(config, builder).unwrap()
    }

    #[tokio::test]
    async fn test_progress_messages_reach_monitoring() {
        let server = test_server(ManualWatchSource::new());
        let message = AgentMessage::builder()
            .sender(Uuid::new_v4())
            .payload(MessagePayload::Progress {
                project_id: "p1".to_string(),
                document_type: "BRD".to_string(),
                progress: 40.0,
                status: "Generating".to_string(),
            })
            .build()
            .unwrap();

        let result = server.bus().publish(message).await;
        assert!(result.delivered);

        let status = server.monitoring().get_document_status("p1").unwrap();
        assert_eq!(status.documents["BRD"].progress, 40.0);
    }

    #[tokio::test]
    async fn test_notifications_become_system_events() {
        let server = test_server(ManualWatchSource::new());
        let message = AgentMessage::builder()
            .sender(Uuid::new_v4())
            .receiver(server.bridge_id())
            .message_type(MessageType::Notification)
            .content("BRD draft ready for review")
            .build()
            .unwrap();

        assert!(server.bus().publish(message).await.delivered);
        let events = server.monitoring().get_system_events(&EventFilter {
            event_type: Some("agent_notification".to_string()),
            ..EventFilter::default()
        });
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, EventSeverity::Info);
    }

    #[tokio::test]
    async fn test_builtin_probes_report_healthy() {
        let server = test_server(ManualWatchSource::new());
        let metrics = server.monitoring().sample_now().await.unwrap();
        assert_eq!(metrics.services.get("agent_registry"), Some(&true));
        assert_eq!(metrics.services.get("message_bus"), Some(&true));

        server.bus().unsubscribe(server.bridge_id());
        let metrics = server.monitoring().sample_now().await.unwrap();
        assert_eq!(metrics.services.get("message_bus"), Some(&false));
    }

    #[tokio::test]
    async fn test_start_and_shutdown_manage_watches() {
        let watch = ManualWatchSource::new();
        let server = test_server(watch.clone());

        server.start().unwrap();
        assert!(server.monitoring().is_running());
        assert!(watch.is_watching(std::path::Path::new("/srv/projects")));

        server.shutdown().await;
        assert!(!server.monitoring().is_running());
        assert!(!watch.is_watching(std::path::Path::new("/srv/projects")));
        assert!(!server.bus().is_subscribed(server.bridge_id()));
    }

    #[tokio::test]
    async fn test_stream_events_writes_json_lines() {
        let (sender, receiver) = broadcast::channel(8);
        for message in ["first", "second"] {
            let event = SystemEvent::new("test", "server", message, EventSeverity::Info, Utc::now());
            sender.send(DashboardEvent::SystemEvent(event)).unwrap();
        }
        drop(sender);

        let mut out: Vec<u8> = Vec::new();
        stream_events(receiver, &mut out).await.unwrap();

        let lines: Vec<serde_json::Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "system_event");
        assert_eq!(lines[1]["data"]["message"], "second");
    }
}
