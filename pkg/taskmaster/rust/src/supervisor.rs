// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::alert::Alerter;
use crate::command::Command;
use crate::config;
use crate::definition::Definitions;
use crate::error::{CommandError, ConfigError};
use crate::program::StopSummary;
use crate::registry::{Registry, ReloadReport};
use log::{debug, error, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Owns the registry for the lifetime of the daemon and dispatches control
/// commands against it. Reloads and start/restart take the registry
/// exclusively; status and stop only read it.
pub struct Supervisor {
    registry: RwLock<Registry>,
    config_path: PathBuf,
    closing: AtomicBool,
    /// Cancelled once shutdown has completed.
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(config_path: impl Into<PathBuf>, alerter: Arc<dyn Alerter>) -> Self {
        Self {
            registry: RwLock::new(Registry::new(alerter)),
            config_path: config_path.into(),
            closing: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Load the configuration file and start the initial program set.
    pub async fn launch(&self) -> Result<ReloadReport, ConfigError> {
        let definitions = config::load_config(&self.config_path)?;
        let report = self.registry.write().await.launch(definitions);
        info!("{report}");
        Ok(report)
    }

    /// Parse and run one control line. Always produces a response.
    pub async fn handle_command(&self, line: &str) -> String {
        let result = match Command::parse(line) {
            Ok(command) => self.execute(command).await,
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| {
            debug!("command `{}` failed: {e}", line.trim());
            format!("error: {e}")
        })
    }

    pub async fn execute(&self, command: Command) -> Result<String, CommandError> {
        self.ensure_open()?;
        debug!("executing {command:?}");
        match command {
            Command::Start(name) => {
                let mut registry = self.registry.write().await;
                self.ensure_open()?;
                let program = registry
                    .get_mut(&name)
                    .ok_or_else(|| CommandError::UnknownProgram(name.clone()))?;
                Ok(format!("{name}: {}", program.start()))
            }
            Command::Stop(name) => {
                let registry = self.registry.read().await;
                let program = registry
                    .get(&name)
                    .ok_or_else(|| CommandError::UnknownProgram(name.clone()))?;
                Ok(format!("{name}: {}", program.stop().await))
            }
            Command::Restart(name) => {
                let mut registry = self.registry.write().await;
                self.ensure_open()?;
                let program = registry
                    .get_mut(&name)
                    .ok_or_else(|| CommandError::UnknownProgram(name.clone()))?;
                Ok(format!("{name}: restarted, {}", program.restart()))
            }
            Command::Status => Ok(self.status().await),
            Command::Reload => {
                let definitions = config::load_config(&self.config_path).map_err(|e| {
                    error!("reload of {} failed: {e}", self.config_path.display());
                    CommandError::Reload(e.to_string())
                })?;
                Ok(self.apply(definitions).await?.to_string())
            }
            Command::Shutdown => Ok(format!("shutdown complete: {}", self.shutdown().await)),
            Command::List => Ok(self.registry.read().await.list().join("\n")),
            Command::LogLevel(level) => {
                log::set_max_level(level);
                info!("log level set to {level}");
                Ok(format!("log level set to {level}"))
            }
        }
    }

    /// Reconcile against an already validated definition set.
    pub async fn apply(&self, definitions: Definitions) -> Result<ReloadReport, CommandError> {
        let mut registry = self.registry.write().await;
        self.ensure_open()?;
        Ok(registry.reload(definitions))
    }

    /// One line per slot; empty when nothing is configured.
    pub async fn status(&self) -> String {
        self.registry
            .read()
            .await
            .status()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Stop every program and tear the registry down, then signal completion
    /// through the shutdown token.
    pub async fn shutdown(&self) -> StopSummary {
        self.closing.store(true, Ordering::SeqCst);
        let summary = self.registry.write().await.shutdown().await;
        self.shutdown.cancel();
        summary
    }

    fn ensure_open(&self) -> Result<(), CommandError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(CommandError::ShuttingDown);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::LogAlerter;
    use crate::command::VERBS;
    use std::path::Path;

    const SLEEPERS: &str = "\
programs:
  web:
    cmd: /bin/sleep 60
    numprocs: 2
    stoptime: 2
  idle:
    cmd: /bin/sleep 60
    autostart: false
    stoptime: 2
";

    fn supervisor(dir: &Path, yaml: &str) -> Supervisor {
        let path = dir.join("taskmaster.yaml");
        std::fs::write(&path, yaml).unwrap();
        Supervisor::new(path, Arc::new(LogAlerter))
    }

    #[tokio::test]
    async fn test_status_with_no_programs_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), "programs: {}\n");
        sup.launch().await.unwrap();
        assert_eq!(sup.handle_command("status").await, "");
        assert_eq!(sup.handle_command("list").await, "");
    }

    #[tokio::test]
    async fn test_launch_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), "programs:\n  web:\n    numprocs: 1\n");
        assert!(matches!(
            sup.launch().await,
            Err(ConfigError::Definition(_))
        ));
    }

    #[tokio::test]
    async fn test_launch_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let sup = Supervisor::new(dir.path().join("absent.yaml"), Arc::new(LogAlerter));
        assert!(matches!(sup.launch().await, Err(ConfigError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_status_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), SLEEPERS);
        sup.launch().await.unwrap();

        let status = sup.handle_command("status").await;
        let lines: Vec<&str> = status.lines().collect();
        assert_eq!(lines.len(), 3, "{status}");
        assert_eq!(lines[0], "idle-0: STOPPED");
        for (line, slot) in lines[1..].iter().zip(["web-0", "web-1"]) {
            assert!(line.starts_with(slot), "{status}");
            assert!(line.contains(" pid "), "{status}");
        }
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_verb_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), SLEEPERS);
        sup.launch().await.unwrap();
        let before = sup.status().await;

        let response = sup.handle_command("frobnicate").await;
        assert!(response.starts_with("error: unknown command `frobnicate`"));
        for verb in VERBS {
            assert!(response.contains(verb), "{response}");
        }
        assert_eq!(sup.status().await, before);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_arity_errors_are_responses() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), "programs: {}\n");
        sup.launch().await.unwrap();
        assert!(sup.handle_command("").await.starts_with("error: empty command"));
        assert!(
            sup.handle_command("start a b")
                .await
                .starts_with("error: too many arguments")
        );
    }

    #[tokio::test]
    async fn test_unknown_program() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), SLEEPERS);
        sup.launch().await.unwrap();
        for verb in ["start", "stop", "restart"] {
            assert_eq!(
                sup.handle_command(&format!("{verb} nope")).await,
                "error: unknown program `nope` (not in configuration)"
            );
        }
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_stop_restart() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), SLEEPERS);
        sup.launch().await.unwrap();

        assert_eq!(
            sup.handle_command("start idle").await,
            "idle: 1 started, 0 already running, 0 failed"
        );
        assert_eq!(sup.handle_command("start idle").await, "idle: already running");
        assert_eq!(
            sup.handle_command("stop idle").await,
            "idle: 1 stopped, 0 killed, 0 already stopped"
        );
        assert!(sup.status().await.contains("idle-0: STOPPED exit -15"));
        assert_eq!(
            sup.handle_command("restart web").await,
            "web: restarted, 2 started, 0 already running, 0 failed"
        );
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_reload_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), SLEEPERS);
        sup.launch().await.unwrap();

        std::fs::write(
            sup.config_path(),
            "programs:\n  web:\n    cmd: /bin/sleep 60\n    numprocs: 2\n    stoptime: 2\n  \
             extra:\n    cmd: /bin/sleep 60\n",
        )
        .unwrap();
        let response = sup.handle_command("reload").await;
        assert!(
            response.starts_with("reloaded: 1 added, 1 removed, 0 replaced, 0 updated, 1 unchanged"),
            "{response}"
        );
        assert!(sup.status().await.contains("extra-0"));
        assert!(!sup.status().await.contains("idle-0"));
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), SLEEPERS);
        sup.launch().await.unwrap();
        let before = sup.handle_command("list").await;

        std::fs::write(sup.config_path(), "programs: [not, a, mapping\n").unwrap();
        let response = sup.handle_command("reload").await;
        assert!(
            response.starts_with("error: reload failed, configuration unchanged"),
            "{response}"
        );
        assert_eq!(sup.handle_command("list").await, before);

        std::fs::remove_file(sup.config_path()).unwrap();
        assert!(sup.handle_command("reload").await.contains("does not exist"));
        assert_eq!(sup.handle_command("list").await, before);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_command() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), SLEEPERS);
        sup.launch().await.unwrap();
        let token = sup.shutdown_token();

        let response = sup.handle_command("shutdown").await;
        assert_eq!(
            response,
            "shutdown complete: 2 stopped, 0 killed, 0 already stopped"
        );
        assert!(token.is_cancelled());
        assert_eq!(
            sup.handle_command("status").await,
            "error: supervisor is shutting down"
        );
        assert!(matches!(
            sup.apply(Definitions::new()).await,
            Err(CommandError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_loglevel() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), "programs: {}\n");
        assert_eq!(
            sup.handle_command("loglevel debug").await,
            "log level set to DEBUG"
        );
        assert_eq!(log::max_level(), log::LevelFilter::Debug);
        assert!(
            sup.handle_command("loglevel loud")
                .await
                .starts_with("error: invalid log level")
        );
    }
}
