//! Agent lifecycle and execution contract
//!
//! An [`Agent`] wraps a single injected [`UnitOfWork`] and governs it with a
//! small state machine:
//!
//! ```text
//! Idle ──start──▶ Starting ──▶ Running ──stop──▶ Stopping ──▶ Stopped
//!                    │            │                  │
//!                    └────────────┴──────────────────┴──▶ Failed
//! ```
//!
//! Cancellation is cooperative: every run of [`Agent::execute`] receives a
//! token linked to both the caller's token and the agent's internal token, so
//! [`Agent::stop`] cancels in-flight work.
//!
//! # Examples
//!
//! ```rust
//! use agentdeck_core::agent::*;
//! use async_trait::async_trait;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Outline;
//!
//! #[async_trait]
//! impl UnitOfWork for Outline {
//!     async fn execute(&self, _cancel: CancellationToken) -> anyhow::Result<TaskResult> {
//!         Ok(TaskResult::success("outline written"))
//!     }
//! }
//!
//! # tokio_test_block_on(async {
//! let agent = Agent::builder().name("outline-writer").work(Outline).build().unwrap();
//! agent.start().await.unwrap();
//! let result = agent.execute(CancellationToken::new()).await.unwrap();
//! assert!(result.success);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Unique identifier of an agent
pub type AgentId = Uuid;

/// Lifecycle status of an agent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AgentStatus {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
    Ready,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AgentStatus::Idle => "Idle",
            AgentStatus::Starting => "Starting",
            AgentStatus::Running => "Running",
            AgentStatus::Stopping => "Stopping",
            AgentStatus::Stopped => "Stopped",
            AgentStatus::Failed => "Failed",
            AgentStatus::Ready => "Ready",
        };
        f.write_str(name)
    }
}

/// Aggregate execution metrics of an agent
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentMetrics {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    /// Accumulated running time over every start/stop cycle
    pub total_execution_time: Duration,
    /// Mean duration of a single execution in milliseconds
    pub average_task_duration_ms: f64,
    /// Resident memory of the hosting process in bytes, sampled on stop
    pub memory_usage: u64,
    /// CPU usage of the hosting process in percent, sampled on stop
    pub cpu_usage: f32,
}

impl AgentMetrics {
    /// Number of executions that reached a verdict
    pub fn total_tasks(&self) -> u64 {
        self.tasks_completed + self.tasks_failed
    }

    /// Fold a new execution duration into the running average.
    ///
    /// Must be called after the completed/failed counter was incremented.
    fn record_task_duration(&mut self, duration: Duration) {
        let n = self.total_tasks();
        if n == 0 {
            return;
        }
        let n = n as f64;
        let new_duration = duration.as_secs_f64() * 1000.0;
        self.average_task_duration_ms =
            (self.average_task_duration_ms * (n - 1.0) + new_duration) / n;
    }
}

/// Outcome of one unit of work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    pub success: bool,
    pub message: String,
    pub error: Option<String>,
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl TaskResult {
    /// Create a successful result
    pub fn success<S: Into<String>>(message: S) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            data: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a logical failure; the agent keeps running
    pub fn failure<S1: Into<String>, S2: Into<String>>(message: S1, error: S2) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: Some(error.into()),
            data: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach an opaque payload to the result
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// The single operation a concrete worker implements.
///
/// The hooks run inside [`Agent::start`] and [`Agent::stop`]; an error from
/// either moves the agent to [`AgentStatus::Failed`].
#[async_trait]
pub trait UnitOfWork: Send + Sync + 'static {
    /// Perform the work, observing `cancel` at suspension points
    async fn execute(&self, cancel: CancellationToken) -> anyhow::Result<TaskResult>;

    async fn on_starting(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_stopping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Measures running time of the current start/stop cycle
#[derive(Debug, Clone, Default)]
struct Stopwatch {
    started_at: Option<Instant>,
    elapsed: Duration,
}

impl Stopwatch {
    fn restart(&mut self) {
        self.elapsed = Duration::ZERO;
        self.started_at = Some(Instant::now());
    }

    /// Stop the stopwatch and return the time of this cycle, or zero if it
    /// was not running
    fn stop(&mut self) -> Duration {
        match self.started_at.take() {
            Some(started_at) => {
                self.elapsed = started_at.elapsed();
                self.elapsed
            }
            None => Duration::ZERO,
        }
    }

    fn elapsed(&self) -> Duration {
        match self.started_at {
            Some(started_at) => started_at.elapsed(),
            None => self.elapsed,
        }
    }
}

#[derive(Debug)]
struct LifecycleState {
    status: AgentStatus,
    start_time: Option<DateTime<Utc>>,
    stop_time: Option<DateTime<Utc>>,
    stopwatch: Stopwatch,
    metrics: AgentMetrics,
    last_error: Option<String>,
    cancel: CancellationToken,
}

impl LifecycleState {
    fn new() -> Self {
        Self {
            status: AgentStatus::Idle,
            start_time: None,
            stop_time: None,
            stopwatch: Stopwatch::default(),
            metrics: AgentMetrics::default(),
            last_error: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Close the current running cycle and fold it into the metrics
    fn finish_cycle(&mut self, status: AgentStatus) {
        self.status = status;
        self.stop_time = Some(Utc::now());
        let cycle = self.stopwatch.stop();
        self.metrics.total_execution_time += cycle;
    }

    fn fail(&mut self, message: String) {
        self.last_error = Some(message);
        self.finish_cycle(AgentStatus::Failed);
    }
}

/// Serializable point-in-time view of an agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub name: String,
    pub kind: String,
    pub status: AgentStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    pub execution_time: Duration,
    pub metrics: AgentMetrics,
    pub last_error: Option<String>,
}

/// A worker governed by the lifecycle state machine
pub struct Agent {
    id: AgentId,
    name: String,
    kind: String,
    work_type: TypeId,
    work: Arc<dyn UnitOfWork>,
    state: RwLock<LifecycleState>,
    // serializes start/stop so hooks never interleave
    transition: Mutex<()>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("status", &self.status())
            .finish()
    }
}

impl Agent {
    /// Create a new agent around a unit of work
    pub fn new<W: UnitOfWork>(name: impl Into<String>, work: W) -> Result<Self> {
        Self::builder().name(name).work(work).build()
    }

    /// Create a builder for constructing an Agent
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Short type name of the injected unit of work
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Whether the injected unit of work is of type `W`
    pub fn is_kind_of<W: UnitOfWork>(&self) -> bool {
        self.work_type == TypeId::of::<W>()
    }

    pub fn status(&self) -> AgentStatus {
        self.state.read().status
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.state.read().start_time
    }

    pub fn stop_time(&self) -> Option<DateTime<Utc>> {
        self.state.read().stop_time
    }

    /// Running time of the current cycle, or of the last one once stopped
    pub fn execution_time(&self) -> Duration {
        self.state.read().stopwatch.elapsed()
    }

    pub fn metrics(&self) -> AgentMetrics {
        self.state.read().metrics.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.read().last_error.clone()
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        let state = self.state.read();
        AgentSnapshot {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind.clone(),
            status: state.status,
            start_time: state.start_time,
            stop_time: state.stop_time,
            execution_time: state.stopwatch.elapsed(),
            metrics: state.metrics.clone(),
            last_error: state.last_error.clone(),
        }
    }

    /// Start the agent.
    ///
    /// Starting an agent that is already running only logs a warning.
    pub async fn start(&self) -> Result<()> {
        let _transition = self.transition.lock().await;

        {
            let mut state = self.state.write();
            if state.status == AgentStatus::Running {
                warn!(agent_id = %self.id, name = %self.name, "Agent is already running");
                return Ok(());
            }
            debug!(agent_id = %self.id, from = %state.status, "Agent starting");
            state.status = AgentStatus::Starting;
            state.start_time = Some(Utc::now());
            state.stop_time = None;
            state.stopwatch.restart();
            state.cancel = CancellationToken::new();
        }

        if let Err(e) = self.work.on_starting().await {
            let message = e.to_string();
            self.state.write().fail(message.clone());
            error!(agent_id = %self.id, name = %self.name, error = %message, "Agent failed to start");
            return Err(Error::lifecycle("start", message));
        }

        self.state.write().status = AgentStatus::Running;
        info!(agent_id = %self.id, name = %self.name, kind = %self.kind, "Agent started");
        Ok(())
    }

    /// Stop the agent, cancelling any in-flight execution.
    ///
    /// Stopping an agent that is not running only logs a warning.
    pub async fn stop(&self) -> Result<()> {
        let _transition = self.transition.lock().await;

        {
            let mut state = self.state.write();
            if state.status != AgentStatus::Running {
                warn!(
                    agent_id = %self.id,
                    name = %self.name,
                    status = %state.status,
                    "Agent is not running; ignoring stop"
                );
                return Ok(());
            }
            state.status = AgentStatus::Stopping;
            state.cancel.cancel();
        }

        if let Err(e) = self.work.on_stopping().await {
            let message = e.to_string();
            self.state.write().fail(message.clone());
            error!(agent_id = %self.id, name = %self.name, error = %message, "Agent failed to stop");
            return Err(Error::lifecycle("stop", message));
        }

        let usage = sample_process_usage();
        let total = {
            let mut state = self.state.write();
            state.finish_cycle(AgentStatus::Stopped);
            if let Some((memory, cpu)) = usage {
                state.metrics.memory_usage = memory;
                state.metrics.cpu_usage = cpu;
            }
            state.metrics.total_execution_time
        };

        info!(
            agent_id = %self.id,
            name = %self.name,
            total_execution_ms = total.as_millis() as u64,
            "Agent stopped"
        );
        Ok(())
    }

    /// Run the unit of work once.
    ///
    /// Requires the agent to be running. `cancel` is linked with the agent's
    /// internal token; cancellation from either side moves the agent to
    /// [`AgentStatus::Stopped`] and yields [`Error::Cancelled`].
    pub async fn execute(&self, cancel: CancellationToken) -> Result<TaskResult> {
        let internal = {
            let state = self.state.read();
            if state.status != AgentStatus::Running {
                return Err(Error::invalid_state(format!(
                    "Agent {} must be running to execute (current status: {})",
                    self.name, state.status
                )));
            }
            state.cancel.clone()
        };

        let linked = internal.child_token();
        let started = Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            _ = linked.cancelled() => None,
            result = self.work.execute(linked.clone()) => Some(result),
        };
        let duration = started.elapsed();

        match outcome {
            None => Err(self.on_cancelled(&linked)),
            Some(Err(_)) if cancel.is_cancelled() || linked.is_cancelled() => {
                Err(self.on_cancelled(&linked))
            }
            Some(Ok(result)) => {
                let mut state = self.state.write();
                if result.success {
                    state.metrics.tasks_completed += 1;
                    metrics::counter!("agent_tasks_total", "outcome" => "completed").increment(1);
                } else {
                    state.metrics.tasks_failed += 1;
                    metrics::counter!("agent_tasks_total", "outcome" => "failed").increment(1);
                    debug!(
                        agent_id = %self.id,
                        error = ?result.error,
                        "Unit of work reported a failure"
                    );
                }
                state.metrics.record_task_duration(duration);
                Ok(result)
            }
            Some(Err(e)) => {
                let message = e.to_string();
                {
                    let mut state = self.state.write();
                    state.metrics.tasks_failed += 1;
                    state.metrics.record_task_duration(duration);
                    state.fail(message.clone());
                }
                metrics::counter!("agent_tasks_total", "outcome" => "error").increment(1);
                error!(agent_id = %self.id, name = %self.name, error = %message, "Unit of work failed");
                Err(Error::Execution(message))
            }
        }
    }

    fn on_cancelled(&self, linked: &CancellationToken) -> Error {
        linked.cancel();
        {
            let mut state = self.state.write();
            // a Stopping agent is finished by stop() once its hook returns
            if state.status == AgentStatus::Running {
                state.cancel.cancel();
                state.finish_cycle(AgentStatus::Stopped);
            }
        }
        metrics::counter!("agent_tasks_total", "outcome" => "cancelled").increment(1);
        info!(agent_id = %self.id, name = %self.name, "Agent execution cancelled");
        Error::cancelled("execute")
    }
}

/// Resident memory and CPU usage of the current process
fn sample_process_usage() -> Option<(u64, f32)> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    system.refresh_process(pid);
    system.process(pid).map(|p| (p.memory(), p.cpu_usage()))
}

/// Builder for constructing Agent instances with validation
pub struct AgentBuilder {
    id: Option<AgentId>,
    name: Option<String>,
    work: Option<(Arc<dyn UnitOfWork>, TypeId, &'static str)>,
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            id: None,
            name: None,
            work: None,
        }
    }

    /// Use a fixed id instead of a random one
    pub fn id(mut self, id: AgentId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Inject the unit of work the agent runs
    pub fn work<W: UnitOfWork>(mut self, work: W) -> Self {
        self.work = Some((Arc::new(work), TypeId::of::<W>(), std::any::type_name::<W>()));
        self
    }

    pub fn build(self) -> Result<Agent> {
        let name = self
            .name
            .ok_or_else(|| Error::validation("Agent name is required"))?;
        if name.trim().is_empty() {
            return Err(Error::validation("Agent name cannot be empty"));
        }
        let (work, work_type, type_name) = self
            .work
            .ok_or_else(|| Error::validation("Unit of work is required"))?;

        Ok(Agent {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            name,
            kind: short_type_name(type_name).to_string(),
            work_type,
            work,
            state: RwLock::new(LifecycleState::new()),
            transition: Mutex::new(()),
        })
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn short_type_name(type_name: &'static str) -> &'static str {
    let base = type_name.split('<').next().unwrap_or(type_name);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Succeed;

    #[async_trait]
    impl UnitOfWork for Succeed {
        async fn execute(&self, _cancel: CancellationToken) -> anyhow::Result<TaskResult> {
            Ok(TaskResult::success("done"))
        }
    }

    struct Reject;

    #[async_trait]
    impl UnitOfWork for Reject {
        async fn execute(&self, _cancel: CancellationToken) -> anyhow::Result<TaskResult> {
            Ok(TaskResult::failure("rejected", "provider said no"))
        }
    }

    struct Explode;

    #[async_trait]
    impl UnitOfWork for Explode {
        async fn execute(&self, _cancel: CancellationToken) -> anyhow::Result<TaskResult> {
            anyhow::bail!("provider unreachable")
        }
    }

    /// Sleeps for successive durations from a list
    struct Timed {
        durations: Vec<Duration>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UnitOfWork for Timed {
        async fn execute(&self, _cancel: CancellationToken) -> anyhow::Result<TaskResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.durations[call % self.durations.len()]).await;
            Ok(TaskResult::success("timed"))
        }
    }

    struct WaitForCancel;

    #[async_trait]
    impl UnitOfWork for WaitForCancel {
        async fn execute(&self, cancel: CancellationToken) -> anyhow::Result<TaskResult> {
            cancel.cancelled().await;
            anyhow::bail!("cancelled")
        }
    }

    /// Bails out after working for a while
    struct SlowExplode(Duration);

    #[async_trait]
    impl UnitOfWork for SlowExplode {
        async fn execute(&self, _cancel: CancellationToken) -> anyhow::Result<TaskResult> {
            tokio::time::sleep(self.0).await;
            anyhow::bail!("provider unreachable")
        }
    }

    /// Waits for cancellation; its stop hook blocks until released
    struct GatedStop {
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl UnitOfWork for GatedStop {
        async fn execute(&self, cancel: CancellationToken) -> anyhow::Result<TaskResult> {
            cancel.cancelled().await;
            anyhow::bail!("cancelled")
        }

        async fn on_stopping(&self) -> anyhow::Result<()> {
            self.release.notified().await;
            Ok(())
        }
    }

    struct BrokenHooks {
        fail_start: bool,
    }

    #[async_trait]
    impl UnitOfWork for BrokenHooks {
        async fn execute(&self, _cancel: CancellationToken) -> anyhow::Result<TaskResult> {
            Ok(TaskResult::success("ok"))
        }

        async fn on_starting(&self) -> anyhow::Result<()> {
            if self.fail_start {
                anyhow::bail!("no credentials")
            }
            Ok(())
        }

        async fn on_stopping(&self) -> anyhow::Result<()> {
            anyhow::bail!("flush failed")
        }
    }

    #[test]
    fn test_builder_validation() {
        assert!(Agent::builder().work(Succeed).build().unwrap_err().is_validation());
        assert!(Agent::builder().name("  ").work(Succeed).build().unwrap_err().is_validation());
        assert!(Agent::builder().name("writer").build().unwrap_err().is_validation());

        let agent = Agent::new("writer", Succeed).unwrap();
        assert_eq!(agent.status(), AgentStatus::Idle);
        assert_eq!(agent.kind(), "Succeed");
        assert!(agent.is_kind_of::<Succeed>());
        assert!(!agent.is_kind_of::<Reject>());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let agent = Agent::new("writer", Succeed).unwrap();
        agent.start().await.unwrap();
        assert_eq!(agent.status(), AgentStatus::Running);
        assert!(agent.start_time().is_some());

        agent.stop().await.unwrap();
        assert_eq!(agent.status(), AgentStatus::Stopped);
        assert!(agent.stop_time().is_some());

        // restart from Stopped
        agent.start().await.unwrap();
        assert_eq!(agent.status(), AgentStatus::Running);
        assert!(agent.stop_time().is_none());
    }

    #[tokio::test]
    async fn test_redundant_transitions_are_ignored() {
        let agent = Agent::new("writer", Succeed).unwrap();
        // stop while idle is a no-op
        agent.stop().await.unwrap();
        assert_eq!(agent.status(), AgentStatus::Idle);

        agent.start().await.unwrap();
        let first_start = agent.start_time();
        agent.start().await.unwrap();
        assert_eq!(agent.start_time(), first_start);
        assert_eq!(agent.status(), AgentStatus::Running);
    }

    #[tokio::test]
    async fn test_execute_requires_running() {
        let agent = Agent::new("writer", Succeed).unwrap();
        let err = agent.execute(CancellationToken::new()).await.unwrap_err();
        assert!(err.is_invalid_state());
        assert_eq!(agent.metrics().total_tasks(), 0);
    }

    #[tokio::test]
    async fn test_execute_success_increments_completed() {
        let agent = Agent::new("writer", Succeed).unwrap();
        agent.start().await.unwrap();

        let result = agent.execute(CancellationToken::new()).await.unwrap();
        assert!(result.success);
        assert_eq!(agent.metrics().tasks_completed, 1);
        assert_eq!(agent.metrics().tasks_failed, 0);
        assert_eq!(agent.status(), AgentStatus::Running);
    }

    #[tokio::test]
    async fn test_logical_failure_keeps_agent_running() {
        let agent = Agent::new("writer", Reject).unwrap();
        agent.start().await.unwrap();

        let result = agent.execute(CancellationToken::new()).await.unwrap();
        assert!(!result.success);
        assert_eq!(agent.metrics().tasks_failed, 1);
        assert_eq!(agent.status(), AgentStatus::Running);
    }

    #[tokio::test]
    async fn test_unhandled_error_fails_agent() {
        let agent = Agent::new("writer", Explode).unwrap();
        agent.start().await.unwrap();

        let err = agent.execute(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Execution(_)));
        assert_eq!(agent.status(), AgentStatus::Failed);
        assert_eq!(agent.metrics().tasks_failed, 1);
        assert_eq!(agent.last_error().as_deref(), Some("provider unreachable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_average_task_duration_is_running_mean() {
        let durations = vec![
            Duration::from_millis(10),
            Duration::from_millis(20),
            Duration::from_millis(60),
        ];
        let agent = Agent::new(
            "timed",
            Timed {
                durations: durations.clone(),
                calls: AtomicUsize::new(0),
            },
        )
        .unwrap();
        agent.start().await.unwrap();

        for _ in 0..3 {
            agent.execute(CancellationToken::new()).await.unwrap();
        }

        let metrics = agent.metrics();
        assert_eq!(metrics.tasks_completed, 3);
        assert!((metrics.average_task_duration_ms - 30.0).abs() < 1.0);
    }

    #[tokio::test]
    async fn test_external_cancellation_stops_agent() {
        let agent = Arc::new(Agent::new("waiter", WaitForCancel).unwrap());
        agent.start().await.unwrap();

        let token = CancellationToken::new();
        let task = {
            let agent = agent.clone();
            let token = token.clone();
            tokio::spawn(async move { agent.execute(token).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(agent.status(), AgentStatus::Stopped);
        assert_eq!(agent.metrics().total_tasks(), 0);
    }

    #[tokio::test]
    async fn test_stop_cancels_in_flight_execution() {
        let agent = Arc::new(Agent::new("waiter", WaitForCancel).unwrap());
        agent.start().await.unwrap();

        let task = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.execute(CancellationToken::new()).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        agent.stop().await.unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(agent.status(), AgentStatus::Stopped);
    }

    #[tokio::test]
    async fn test_agent_stays_stopping_until_stop_hook_returns() {
        let release = Arc::new(tokio::sync::Notify::new());
        let agent = Arc::new(
            Agent::new(
                "gated",
                GatedStop {
                    release: release.clone(),
                },
            )
            .unwrap(),
        );
        agent.start().await.unwrap();

        let execution = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.execute(CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let stopping = {
            let agent = agent.clone();
            tokio::spawn(async move { agent.stop().await })
        };

        let err = execution.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(agent.status(), AgentStatus::Stopping);
        assert!(agent.stop_time().is_none());

        release.notify_one();
        stopping.await.unwrap().unwrap();
        assert_eq!(agent.status(), AgentStatus::Stopped);
        assert!(agent.stop_time().is_some());
    }

    #[tokio::test]
    async fn test_failing_start_hook_marks_failed() {
        let agent = Agent::new("broken", BrokenHooks { fail_start: true }).unwrap();
        let err = agent.start().await.unwrap_err();
        assert!(matches!(err, Error::Lifecycle { .. }));
        assert_eq!(agent.status(), AgentStatus::Failed);
        assert_eq!(agent.last_error().as_deref(), Some("no credentials"));
    }

    #[tokio::test]
    async fn test_failing_stop_hook_marks_failed() {
        let agent = Agent::new("broken", BrokenHooks { fail_start: false }).unwrap();
        agent.start().await.unwrap();
        let err = agent.stop().await.unwrap_err();
        assert!(matches!(err, Error::Lifecycle { .. }));
        assert_eq!(agent.status(), AgentStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execution_time_accumulates_across_cycles() {
        let agent = Agent::new("writer", Succeed).unwrap();

        agent.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(agent.execution_time() >= Duration::from_millis(100));
        agent.stop().await.unwrap();

        agent.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        agent.stop().await.unwrap();

        let total = agent.metrics().total_execution_time;
        assert!(total >= Duration::from_millis(150));
        assert!(total < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_cycle_counts_toward_execution_time() {
        let agent = Agent::new("writer", SlowExplode(Duration::from_millis(40))).unwrap();
        agent.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        agent.execute(CancellationToken::new()).await.unwrap_err();
        assert_eq!(agent.status(), AgentStatus::Failed);
        assert!(agent.stop_time().is_some());

        let total = agent.metrics().total_execution_time;
        assert!(total >= Duration::from_millis(140));
        assert!(total < Duration::from_millis(200));
        assert_eq!(agent.execution_time(), total);
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("my_crate::writers::BrdWriter"), "BrdWriter");
        assert_eq!(short_type_name("my_crate::Wrapper<other::Inner>"), "Wrapper");
        assert_eq!(short_type_name("Plain"), "Plain");
    }
}
