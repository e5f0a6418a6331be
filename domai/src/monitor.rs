//! Monitor: wires runners, pipelines, sessions and the dispatcher together
//!
//! ```text
//!  ToolRunner ──mpsc──► Pipeline ──► SessionManager (context windows)
//!  (per tool)           (per tool)└─► Dispatcher ──► crisis / knowledge subscribers
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use domai_common::EventSource;
use log::{info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::MonitorConfig;
use crate::dispatch::Dispatcher;
use crate::domain::RunnerError;
use crate::parser::LineParser;
use crate::permissions::PermissionService;
use crate::pipeline::{Pipeline, PipelineCounters, PipelineStats};
use crate::runner::{RunnerState, ToolRunner, ToolSpec};
use crate::session::SessionManager;

/// Lines buffered between a runner and its pipeline
const LINE_CHANNEL_CAPACITY: usize = 1024;

struct ToolHandle {
    runner: Arc<ToolRunner>,
    pipeline: JoinHandle<PipelineStats>,
    counters: Arc<PipelineCounters>,
}

pub struct Monitor {
    config: MonitorConfig,
    permissions: Arc<dyn PermissionService>,
    dispatcher: Dispatcher,
    sessions: Arc<SessionManager>,
    tools: Mutex<HashMap<EventSource, ToolHandle>>,
}

impl Monitor {
    #[must_use]
    pub fn new(config: MonitorConfig, permissions: Arc<dyn PermissionService>) -> Self {
        Self {
            dispatcher: Dispatcher::new(config.dispatch.clone()),
            sessions: Arc::new(SessionManager::new(config.context.clone())),
            config,
            permissions,
            tools: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Start a catalog tool with the configured parameters
    ///
    /// # Errors
    /// See [`Monitor::start_spec`]; also `InvalidArgument` for a bad
    /// interface or capture filter.
    pub async fn start_tool(&self, tool: EventSource) -> Result<(), RunnerError> {
        let spec = ToolSpec::for_tool(tool, &self.config.tools)?;
        self.start_spec(spec).await
    }

    /// Start any tool spec; its output is parsed with the grammar of `spec.tool`
    ///
    /// # Errors
    /// `AlreadyRunning` if that tool is active, otherwise whatever
    /// [`ToolRunner::start`] reports.
    pub async fn start_spec(&self, spec: ToolSpec) -> Result<(), RunnerError> {
        let tool = spec.tool;
        let mut tools = self.tools.lock().await;
        if let Some(existing) = tools.get(&tool) {
            if !existing.runner.state().is_settled() {
                return Err(RunnerError::AlreadyRunning(tool));
            }
        }
        // A settled handle belongs to a failed or stopped run
        if let Some(old) = tools.remove(&tool) {
            old.runner.stop().await;
            let _ = old.pipeline.await;
        }

        let runner = Arc::new(ToolRunner::new(spec, self.config.runner.clone(), Arc::clone(&self.permissions)));
        let pipeline = Pipeline::new(
            LineParser::new(tool, self.config.parser.clone()),
            Arc::clone(&self.sessions),
            self.dispatcher.clone(),
        );
        let counters = pipeline.counters();

        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        runner.start(tx).await?;
        let pipeline = tokio::spawn(pipeline.run(rx));
        tools.insert(tool, ToolHandle { runner, pipeline, counters });
        Ok(())
    }

    /// Stop one tool and wait for its pipeline to flush
    pub async fn stop_tool(&self, tool: EventSource) -> Option<PipelineStats> {
        let handle = self.tools.lock().await.remove(&tool)?;
        handle.runner.stop().await;
        match handle.pipeline.await {
            Ok(stats) => {
                info!("{tool}: {} events from {} lines", stats.events, stats.lines);
                Some(stats)
            }
            Err(e) => {
                warn!("{tool} pipeline task failed: {e}");
                Some(handle.counters.snapshot())
            }
        }
    }

    /// Stop every tool and release waiting consumers
    pub async fn shutdown(&self) {
        let tools: Vec<EventSource> = self.tools.lock().await.keys().copied().collect();
        for tool in tools {
            self.stop_tool(tool).await;
        }
        self.dispatcher.close();
    }

    #[must_use]
    pub async fn runner(&self, tool: EventSource) -> Option<Arc<ToolRunner>> {
        self.tools.lock().await.get(&tool).map(|h| Arc::clone(&h.runner))
    }

    pub async fn runner_state(&self, tool: EventSource) -> Option<RunnerState> {
        self.tools.lock().await.get(&tool).map(|h| h.runner.state())
    }

    pub async fn stats(&self, tool: EventSource) -> Option<PipelineStats> {
        self.tools.lock().await.get(&tool).map(|h| h.counters.snapshot())
    }

    /// Tools with a handle, running or not
    pub async fn tools(&self) -> Vec<EventSource> {
        let mut tools: Vec<EventSource> = self.tools.lock().await.keys().copied().collect();
        tools.sort();
        tools
    }
}
