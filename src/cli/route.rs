//! CLI route: single route table and CLI context. Dispatches to the orchestrator and presentation.

use crate::agent::local::{LocalWorkspace, PLAN_FILE_KEY};
use crate::cli::output::{
    format_event_line, format_events_text, format_run_list_text, format_run_status_text,
    format_section_heading,
};
use crate::cli::parse::{Commands, ConfigCommands};
use crate::config::{ConfigLoader, FoundryConfig};
use crate::error::PipelineError;
use crate::pipeline::orchestrator::{Orchestrator, RunHandle, RunRequest};
use crate::pipeline::state::WorkflowState;
use crate::store::persistence::SledStore;
use crate::store::RunStore;
use crate::telemetry::{EventBus, EventIngestor, EventStore};
use crate::types::RunId;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Runtime context for CLI execution: loaded config, storage, and the async runtime.
pub struct CliContext {
    config: FoundryConfig,
    workspace_root: PathBuf,
    store: Arc<SledStore>,
    events: Arc<EventStore>,
    runtime: tokio::runtime::Runtime,
}

/// Options shared by commands that drive runs.
struct DriveOptions {
    enable_research: bool,
    quiet: bool,
}

impl CliContext {
    /// Create the context from workspace root and optional config path. Uses ConfigLoader only.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, PipelineError> {
        let config = match config_path {
            Some(ref path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&workspace_root)?,
        };
        Self::with_config(workspace_root, config)
    }

    pub fn with_config(workspace_root: PathBuf, config: FoundryConfig) -> Result<Self, PipelineError> {
        config.validate().map_err(|errors| {
            PipelineError::ConfigError(
                errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        })?;

        let db_path = config.storage.db_path();
        std::fs::create_dir_all(&db_path)?;
        let db = sled::open(&db_path).map_err(crate::error::StorageError::from)?;
        let store = SledStore::shared(db.clone())?;
        let events = EventStore::shared(db)?;
        let runtime = tokio::runtime::Runtime::new()?;
        info!(db_path = %db_path.display(), "Storage opened");

        Ok(Self {
            config,
            workspace_root,
            store,
            events,
            runtime,
        })
    }

    pub fn config(&self) -> &FoundryConfig {
        &self.config
    }

    /// Execute a CLI command via the single route table.
    pub fn execute(&self, command: &Commands) -> Result<String, PipelineError> {
        match command {
            Commands::Run {
                title,
                description,
                target,
                plan,
                metadata,
                no_research,
                quiet,
            } => {
                let mut request = RunRequest::new(title, description, target);
                for entry in metadata {
                    let (key, value) = parse_metadata(entry)?;
                    request = request.with_metadata(key, value);
                }
                let plan = self.resolve_path(plan);
                request = request.with_metadata(PLAN_FILE_KEY, plan.to_string_lossy());
                let options = DriveOptions {
                    enable_research: self.config.pipeline.enable_research && !no_research,
                    quiet: *quiet,
                };
                let state = self.drive(&options, |orchestrator| {
                    let handle = orchestrator.start(request)?;
                    Ok(vec![handle])
                })?;
                self.summarize(&state)
            }
            Commands::Resume { run_id, quiet } => {
                let run_id = RunId::from(run_id.as_str());
                let options = DriveOptions {
                    enable_research: self.config.pipeline.enable_research,
                    quiet: *quiet,
                };
                let state = self.drive(&options, |orchestrator| {
                    Ok(vec![orchestrator.resume(&run_id)?])
                })?;
                self.summarize(&state)
            }
            Commands::Recover => self.recover(),
            Commands::Status { run_id, format } => {
                let run_id = RunId::from(run_id.as_str());
                let record = self
                    .store
                    .get(&run_id)?
                    .ok_or_else(|| PipelineError::RunNotFound(run_id.clone()))?;
                if format == "json" {
                    to_json(&record)
                } else {
                    Ok(format_run_status_text(&record))
                }
            }
            Commands::List { format } => {
                let records = RunStore::list(self.store.as_ref())?;
                if format == "json" {
                    to_json(&records)
                } else {
                    Ok(format_run_list_text(&records))
                }
            }
            Commands::Events {
                run_id,
                after,
                format,
            } => {
                let run_id = RunId::from(run_id.as_str());
                let events = self
                    .events
                    .read_events_after(&run_id, after.unwrap_or(0))?;
                if format == "json" {
                    to_json(&events)
                } else {
                    Ok(format_events_text(&events))
                }
            }
            Commands::Config { command } => self.handle_config_command(command),
        }
    }

    fn handle_config_command(&self, command: &ConfigCommands) -> Result<String, PipelineError> {
        match command {
            ConfigCommands::Show { format } => {
                if format == "json" {
                    to_json(&self.config)
                } else {
                    toml::to_string_pretty(&self.config)
                        .map_err(|e| PipelineError::ConfigError(e.to_string()))
                }
            }
            ConfigCommands::Validate => {
                let global = ConfigLoader::global_config_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "-".to_string());
                Ok(format!(
                    "Configuration is valid\n  Global file: {}\n  Data dir: {}\n  Output root: {}",
                    global,
                    self.config.storage.data_dir.display(),
                    self.config.storage.output_root().display()
                ))
            }
        }
    }

    fn recover(&self) -> Result<String, PipelineError> {
        let options = DriveOptions {
            enable_research: self.config.pipeline.enable_research,
            quiet: true,
        };
        let mut failed = Vec::new();
        let states = self.drive_all(&options, |orchestrator| {
            let report = orchestrator.recover()?;
            failed = report.failed;
            Ok(report.resumed)
        })?;

        let mut out = String::new();
        out.push_str(&format!("{}\n\n", format_section_heading("Recovery")));
        if states.is_empty() && failed.is_empty() {
            out.push_str("Nothing to recover.\n");
            return Ok(out);
        }
        for state in &states {
            out.push_str(&format!("  {} {} -> {}\n", state.run_id, state.title, state.status()));
        }
        for (run_id, reason) in &failed {
            out.push_str(&format!("  {} failed: {}\n", run_id, reason));
        }
        Ok(out)
    }

    fn drive<F>(&self, options: &DriveOptions, start: F) -> Result<WorkflowState, PipelineError>
    where
        F: FnOnce(&Orchestrator) -> Result<Vec<RunHandle>, PipelineError>,
    {
        self.drive_all(options, start)?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::SupervisorFailed("run produced no state".to_string()))
    }

    /// Build an orchestrator wired to persistent storage, start runs with it, and wait for all of
    /// them. Ctrl-C requests a stop on every run being waited on.
    fn drive_all<F>(
        &self,
        options: &DriveOptions,
        start: F,
    ) -> Result<Vec<WorkflowState>, PipelineError>
    where
        F: FnOnce(&Orchestrator) -> Result<Vec<RunHandle>, PipelineError>,
    {
        self.runtime.block_on(async {
            let (bus, queue) = EventBus::with_persistence(EventBus::DEFAULT_CAPACITY);
            let ingestor = tokio::spawn(EventIngestor::new(Arc::clone(&self.events), queue).run());
            let printer = (!options.quiet).then(|| spawn_printer(&bus));

            let orchestrator = self.orchestrator(bus, options.enable_research);
            let result = match start(&orchestrator) {
                Ok(handles) => wait_all(&orchestrator, handles).await,
                Err(err) => Err(err),
            };
            drop(orchestrator);

            if let Err(err) = ingestor.await {
                warn!(error = %err, "event ingestor ended abnormally");
            }
            if let Some(printer) = printer {
                let _ = printer.await;
            }
            result
        })
    }

    fn orchestrator(&self, bus: EventBus, enable_research: bool) -> Orchestrator {
        let mut settings = self.config.pipeline_settings();
        settings.enable_research = enable_research;
        let agents = LocalWorkspace::new(self.config.storage.output_root()).agents();
        Orchestrator::builder(agents)
            .checkpoints(self.store.clone())
            .runs(self.store.clone())
            .events(Arc::new(bus))
            .gate(self.config.gate())
            .retry_policy(self.config.retry_policy())
            .settings(settings)
            .stop_grace(self.config.stop_grace())
            .build()
    }

    fn summarize(&self, state: &WorkflowState) -> Result<String, PipelineError> {
        let record = self
            .store
            .get(&state.run_id)?
            .ok_or_else(|| PipelineError::RunNotFound(state.run_id.clone()))?;
        let mut out = format_run_status_text(&record);
        if !state.artifacts.is_empty() {
            let run_dir = self.config.storage.output_root().join(state.run_id.as_str());
            out.push_str(&format!(
                "\n{} files written to {}\n",
                state.artifacts.len(),
                run_dir.display()
            ));
        }
        Ok(out)
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }
}

async fn wait_all(
    orchestrator: &Orchestrator,
    handles: Vec<RunHandle>,
) -> Result<Vec<WorkflowState>, PipelineError> {
    let run_ids: Vec<RunId> = handles.iter().map(|h| h.run_id().clone()).collect();
    let waiting = futures::future::join_all(handles.into_iter().map(RunHandle::wait));
    tokio::pin!(waiting);

    let results = tokio::select! {
        results = &mut waiting => results,
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    for run_id in &run_ids {
                        info!(run_id = %run_id, "Interrupt received, stopping run");
                        orchestrator.request_stop(run_id);
                    }
                }
                Err(err) => warn!(error = %err, "failed to listen for interrupt"),
            }
            waiting.await
        }
    };
    results.into_iter().collect()
}

fn spawn_printer(bus: &EventBus) -> JoinHandle<()> {
    let mut live = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match live.recv().await {
                Ok(event) => eprintln!("{}", format_event_line(&event)),
                Err(RecvError::Lagged(skipped)) => eprintln!("... {} events skipped", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn parse_metadata(entry: &str) -> Result<(String, String), PipelineError> {
    match entry.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(PipelineError::InvalidArgument(format!(
            "metadata must be KEY=VALUE, got `{}`",
            entry
        ))),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, PipelineError> {
    serde_json::to_string_pretty(value).map_err(|e| PipelineError::InvalidArgument(e.to_string()))
}
