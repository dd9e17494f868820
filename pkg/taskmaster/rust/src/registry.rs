// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::alert::Alerter;
use crate::definition::Definitions;
use crate::process::ProcessInfo;
use crate::program::{self, Program, StopSummary};
use crate::reconcile::{self, ActionKind};
use log::info;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReloadReport {
    pub added: usize,
    pub removed: usize,
    pub replaced: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// One line per program that was touched.
    pub details: Vec<String>,
}

impl ReloadReport {
    pub fn is_noop(&self) -> bool {
        self.added + self.removed + self.replaced + self.updated == 0
    }
}

impl fmt::Display for ReloadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reloaded: {} added, {} removed, {} replaced, {} updated, {} unchanged",
            self.added, self.removed, self.replaced, self.updated, self.unchanged
        )?;
        for line in &self.details {
            write!(f, "\n{line}")?;
        }
        Ok(())
    }
}

/// Every supervised program, plus the definitions they were built from.
/// The definitions are the baseline for the next reload.
pub struct Registry {
    programs: BTreeMap<String, Program>,
    definitions: Definitions,
    alerter: Arc<dyn Alerter>,
}

impl Registry {
    pub fn new(alerter: Arc<dyn Alerter>) -> Self {
        Self {
            programs: BTreeMap::new(),
            definitions: Definitions::new(),
            alerter,
        }
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Program> {
        self.programs.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Program> {
        self.programs.get_mut(name)
    }

    pub fn definitions(&self) -> &Definitions {
        &self.definitions
    }

    /// Register the initial definition set and start every `autostart` program.
    pub fn launch(&mut self, definitions: Definitions) -> ReloadReport {
        info!("launching {} program(s)", definitions.len());
        self.reload(definitions)
    }

    /// Reconcile the live programs against `definitions`. The program and
    /// definition maps are swapped in together once every action was applied.
    pub fn reload(&mut self, definitions: Definitions) -> ReloadReport {
        let actions = reconcile::plan(&self.definitions, &definitions);
        let mut programs = std::mem::take(&mut self.programs);
        let mut report = ReloadReport::default();

        for action in actions {
            let name = action.name.as_str();
            match action.kind {
                ActionKind::Keep => report.unchanged += 1,
                ActionKind::Remove => {
                    if let Some(program) = programs.remove(name) {
                        let killed = program.kill();
                        report
                            .details
                            .push(format!("{name}: removed, {killed} process(es) killed"));
                    }
                    report.removed += 1;
                }
                ActionKind::Add => {
                    let Some(definition) = definitions.get(name) else {
                        continue;
                    };
                    let mut program = Program::new(Arc::clone(definition), Arc::clone(&self.alerter));
                    let line = if definition.autostart {
                        format!("{name}: added, {}", program.start())
                    } else {
                        format!("{name}: added, not started")
                    };
                    report.details.push(line);
                    programs.insert(name.to_string(), program);
                    report.added += 1;
                }
                ActionKind::Replace(_) | ActionKind::Update(_) => {
                    let (Some(program), Some(definition)) =
                        (programs.get_mut(name), definitions.get(name))
                    else {
                        continue;
                    };
                    if matches!(action.kind, ActionKind::Replace(_)) {
                        report.replaced += 1;
                    } else {
                        report.updated += 1;
                    }
                    let outcome = program.update(Arc::clone(definition));
                    report.details.push(format!("{name}: {outcome}"));
                }
            }
        }

        self.programs = programs;
        self.definitions = definitions;
        info!(
            "reload applied: {} added, {} removed, {} replaced, {} updated, {} unchanged",
            report.added, report.removed, report.replaced, report.updated, report.unchanged
        );
        report
    }

    /// Status of every slot of every program, ordered by program name then slot.
    pub fn status(&self) -> Vec<ProcessInfo> {
        self.programs.values().flat_map(Program::status).collect()
    }

    pub fn list(&self) -> Vec<String> {
        self.definitions
            .values()
            .map(|d| {
                format!(
                    "{}: cmd=\"{}\" numprocs={} autostart={} autorestart={}",
                    d.name, d.cmd, d.numprocs, d.autostart, d.autorestart
                )
            })
            .collect()
    }

    /// Stop every program, kill whatever is left, and empty the registry.
    pub async fn shutdown(&mut self) -> StopSummary {
        info!("shutting down {} program(s)", self.programs.len());
        let summary = program::shutdown_programs(self.programs.values()).await;
        self.programs.clear();
        self.definitions.clear();
        info!("all programs stopped: {summary}");
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::LogAlerter;
    use crate::definition::{AutoRestart, ProgramDefinition};
    use crate::state::ProcessStatus;
    use std::time::Duration;

    fn sleeper(name: &str, numprocs: usize) -> ProgramDefinition {
        let mut def = ProgramDefinition::new(name, "/bin/sleep 60");
        def.numprocs = numprocs;
        def.stoptime = Duration::from_secs(2);
        def
    }

    fn defs(programs: &[ProgramDefinition]) -> Definitions {
        programs
            .iter()
            .map(|p| (p.name.clone(), Arc::new(p.clone())))
            .collect()
    }

    fn registry() -> Registry {
        Registry::new(Arc::new(LogAlerter))
    }

    /// Every live pid in the registry, keyed by slot identity.
    fn pids(registry: &Registry) -> BTreeMap<String, Option<u32>> {
        registry
            .status()
            .into_iter()
            .map(|info| (info.identity, info.pid))
            .collect()
    }

    #[tokio::test]
    async fn test_launch_starts_autostart_programs_only() {
        let mut idle = sleeper("idle", 1);
        idle.autostart = false;
        let mut reg = registry();
        let report = reg.launch(defs(&[sleeper("web", 2), idle]));

        assert_eq!(report.added, 2);
        assert_eq!(reg.len(), 2);
        assert!(reg.get("web").unwrap().is_running());
        assert!(!reg.get("idle").unwrap().is_running());
        assert_eq!(reg.status().len(), 3);
        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_reload_is_idempotent() {
        let config = defs(&[sleeper("web", 2), sleeper("worker", 1)]);
        let mut reg = registry();
        reg.launch(config.clone());
        let before = pids(&reg);

        let report = reg.reload(config.clone());
        assert!(report.is_noop(), "{report}");
        assert_eq!(report.unchanged, 2);
        assert_eq!(pids(&reg), before);

        let report = reg.reload(config);
        assert!(report.is_noop());
        assert_eq!(pids(&reg), before);
        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_reload_startretries_change_touches_nothing() {
        let mut reg = registry();
        reg.launch(defs(&[sleeper("web", 2), sleeper("worker", 1)]));
        let before = pids(&reg);

        let mut web = sleeper("web", 2);
        web.startretries = 10;
        let report = reg.reload(defs(&[web, sleeper("worker", 1)]));
        assert_eq!(report.updated, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(pids(&reg), before);
        assert_eq!(reg.definitions()["web"].startretries, 10);
        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_reload_cmd_change_relaunches_only_that_program() {
        let mut reg = registry();
        reg.launch(defs(&[sleeper("web", 2), sleeper("worker", 1)]));
        let before = pids(&reg);

        let mut web = sleeper("web", 2);
        web.cmd = "/bin/sleep 120".into();
        let report = reg.reload(defs(&[web, sleeper("worker", 1)]));
        assert_eq!(report.replaced, 1);

        let after = pids(&reg);
        assert_eq!(after["worker-0"], before["worker-0"]);
        for slot in ["web-0", "web-1"] {
            assert!(after[slot].is_some());
            assert_ne!(after[slot], before[slot], "{slot} should be relaunched");
        }
        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_reload_numprocs_decrease() {
        let mut reg = registry();
        reg.launch(defs(&[sleeper("web", 4)]));
        let slot0 = pids(&reg)["web-0"];

        reg.reload(defs(&[sleeper("web", 1)]));
        let status = reg.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].identity, "web-0");
        assert_eq!(status[0].pid, slot0);
        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_reload_removes_and_adds() {
        let mut reg = registry();
        reg.launch(defs(&[sleeper("old", 1)]));
        let old = reg.get("old").unwrap().process(0).unwrap().clone();

        let report = reg.reload(defs(&[sleeper("new", 1)]));
        assert_eq!((report.removed, report.added), (1, 1));
        assert!(reg.get("old").is_none());
        assert!(reg.get("new").unwrap().is_running());
        assert_eq!(old.status(), ProcessStatus::Fatal);
        assert_eq!(reg.definitions().len(), 1);
        reg.shutdown().await;
    }

    #[tokio::test]
    async fn test_list_and_status_of_empty_registry() {
        let reg = registry();
        assert!(reg.status().is_empty());
        assert!(reg.list().is_empty());
    }

    #[tokio::test]
    async fn test_list_format() {
        let mut def = ProgramDefinition::new("web", "/bin/sleep 60");
        def.autostart = false;
        def.autorestart = AutoRestart::Always;
        let mut reg = registry();
        reg.launch(defs(&[def]));
        assert_eq!(
            reg.list(),
            ["web: cmd=\"/bin/sleep 60\" numprocs=1 autostart=false autorestart=always"]
        );
    }

    #[tokio::test]
    async fn test_shutdown_empties_registry() {
        let mut web = sleeper("web", 2);
        web.autorestart = AutoRestart::Always;
        let mut reg = registry();
        reg.launch(defs(&[web]));
        let processes: Vec<_> = reg.get("web").unwrap().processes().cloned().collect();

        let summary = reg.shutdown().await;
        assert_eq!(summary.stopped, 2);
        assert!(reg.is_empty());
        assert!(reg.definitions().is_empty());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(processes.iter().all(|p| p.pid().is_none()));
    }

    #[test]
    fn test_report_display() {
        let report = ReloadReport {
            added: 1,
            details: vec!["web: added, 1 started, 0 already running, 0 failed".into()],
            ..Default::default()
        };
        assert_eq!(
            report.to_string(),
            "reloaded: 1 added, 0 removed, 0 replaced, 0 updated, 0 unchanged\n\
             web: added, 1 started, 0 already running, 0 failed"
        );
    }
}
