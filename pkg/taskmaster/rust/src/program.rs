// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::alert::Alerter;
use crate::definition::{Field, ProgramDefinition, any_critical, join_fields};
use crate::process::{KillOutcome, Process, ProcessInfo, StartOutcome, StopOutcome};
use crate::state::ProcessStatus;
use log::{info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StartSummary {
    pub started: usize,
    pub already_running: usize,
    pub failed: usize,
}

impl fmt::Display for StartSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.started == 0 && self.failed == 0 && self.already_running > 0 {
            return write!(f, "already running");
        }
        write!(
            f,
            "{} started, {} already running, {} failed",
            self.started, self.already_running, self.failed
        )
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StopSummary {
    pub stopped: usize,
    pub killed: usize,
    pub already_stopped: usize,
    pub failed: usize,
}

impl StopSummary {
    fn merge(&mut self, other: StopSummary) {
        self.stopped += other.stopped;
        self.killed += other.killed;
        self.already_stopped += other.already_stopped;
        self.failed += other.failed;
    }
}

impl fmt::Display for StopSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} stopped, {} killed, {} already stopped",
            self.stopped, self.killed, self.already_stopped
        )?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Unchanged,
    /// A critical field changed: every slot was killed and the pool rebuilt.
    Relaunched {
        fields: Vec<Field>,
        started: Option<StartSummary>,
    },
    /// Only non-critical fields changed: live children were left alone.
    Updated {
        fields: Vec<Field>,
        added: usize,
        removed: usize,
    },
}

impl fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateOutcome::Unchanged => write!(f, "unchanged"),
            UpdateOutcome::Relaunched { fields, started } => {
                write!(f, "relaunched ({} changed)", join_fields(fields))?;
                match started {
                    Some(summary) => write!(f, ", {summary}"),
                    None => write!(f, ", not started"),
                }
            }
            UpdateOutcome::Updated {
                fields,
                added,
                removed,
            } => write!(
                f,
                "updated in place ({} changed), {added} slot(s) added, {removed} slot(s) removed",
                join_fields(fields)
            ),
        }
    }
}

/// All the slots of one configured program.
pub struct Program {
    definition: Arc<ProgramDefinition>,
    processes: BTreeMap<usize, Process>,
    alerter: Arc<dyn Alerter>,
}

impl Program {
    pub fn new(definition: Arc<ProgramDefinition>, alerter: Arc<dyn Alerter>) -> Self {
        Self {
            definition,
            processes: BTreeMap::new(),
            alerter,
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &Arc<ProgramDefinition> {
        &self.definition
    }

    pub fn process(&self, index: usize) -> Option<&Process> {
        self.processes.get(&index)
    }

    pub fn processes(&self) -> impl Iterator<Item = &Process> {
        self.processes.values()
    }

    /// True if any slot still owns a child.
    pub fn is_running(&self) -> bool {
        self.processes.values().any(|p| p.status().has_child())
    }

    /// Start every slot that is not already starting or running. Each slot
    /// gets a fresh `Process`; starts never wait on `starttime`.
    pub fn start(&mut self) -> StartSummary {
        let mut summary = StartSummary::default();
        for index in 0..self.definition.numprocs {
            if let Some(existing) = self.processes.get(&index) {
                let status = existing.status();
                if status.is_alive() {
                    summary.already_running += 1;
                    continue;
                }
                if status == ProcessStatus::Stopping {
                    warn!("[{}] still stopping, not started", existing.identity());
                    summary.failed += 1;
                    continue;
                }
                // Also cancels a retry that may be about to fire.
                existing.kill();
            }

            let process = self.new_process(index);
            match process.start() {
                StartOutcome::Started { .. } => summary.started += 1,
                StartOutcome::AlreadyRunning { .. } => summary.already_running += 1,
                StartOutcome::Cancelled | StartOutcome::Failed { .. } => summary.failed += 1,
            }
            self.processes.insert(index, process);
        }
        info!("[{}] start: {summary}", self.definition.name);
        summary
    }

    /// Gracefully stop every slot concurrently and wait for all of them.
    pub async fn stop(&self) -> StopSummary {
        let summary = stop_processes(self.processes.values().cloned()).await;
        info!("[{}] stop: {summary}", self.definition.name);
        summary
    }

    /// Kill, reset the retry budget, then start from scratch.
    pub fn restart(&mut self) -> StartSummary {
        self.kill();
        for process in self.processes.values() {
            process.reset();
        }
        self.start()
    }

    /// Force every slot to FATAL immediately. Returns how many children were signalled.
    pub fn kill(&self) -> usize {
        self.processes
            .values()
            .filter(|p| matches!(p.kill(), KillOutcome::Killed))
            .count()
    }

    /// Prevent every slot from restarting on its own.
    pub fn disable_restart(&self) {
        for process in self.processes.values() {
            process.disable_restart();
        }
    }

    /// Apply a new definition for this program with as little disruption as
    /// the changed fields allow.
    pub fn update(&mut self, definition: Arc<ProgramDefinition>) -> UpdateOutcome {
        let fields = self.definition.changed_fields(&definition);
        if fields.is_empty() {
            return UpdateOutcome::Unchanged;
        }
        let name = definition.name.clone();
        let was_running = self.is_running();

        if any_critical(&fields) {
            info!("[{name}] {} changed, relaunching", join_fields(&fields));
            self.kill();
            self.processes.clear();
            self.definition = definition;
            let started = (was_running || self.definition.autostart).then(|| self.start());
            return UpdateOutcome::Relaunched { fields, started };
        }

        info!("[{name}] {} changed, updating in place", join_fields(&fields));
        let old_numprocs = self.definition.numprocs;
        let numprocs = definition.numprocs;
        self.definition = Arc::clone(&definition);

        let excess: Vec<usize> = self.processes.range(numprocs..).map(|(i, _)| *i).collect();
        for index in excess.iter().rev() {
            if let Some(process) = self.processes.remove(index) {
                info!("[{}] removed from pool", process.identity());
                process.kill();
            }
        }
        for process in self.processes.values() {
            process.update(Arc::clone(&definition));
        }

        let mut added = 0;
        if numprocs > old_numprocs && (was_running || definition.autostart) {
            for index in old_numprocs..numprocs {
                let process = self.new_process(index);
                process.start();
                self.processes.insert(index, process);
                added += 1;
            }
        }

        UpdateOutcome::Updated {
            fields,
            added,
            removed: excess.len(),
        }
    }

    /// One entry per configured slot; slots without a process report STOPPED.
    pub fn status(&self) -> Vec<ProcessInfo> {
        (0..self.definition.numprocs)
            .map(|index| match self.processes.get(&index) {
                Some(process) => process.info(),
                None => ProcessInfo::stopped(self.identity(index)),
            })
            .collect()
    }

    fn identity(&self, index: usize) -> String {
        format!("{}-{index}", self.definition.name)
    }

    fn new_process(&self, index: usize) -> Process {
        Process::new(
            self.identity(index),
            Arc::clone(&self.definition),
            Arc::clone(&self.alerter),
        )
    }
}

/// Stop the given processes concurrently. A stop that fails to settle is
/// counted without affecting the others.
pub(crate) async fn stop_processes(processes: impl IntoIterator<Item = Process>) -> StopSummary {
    let mut set = JoinSet::new();
    for process in processes {
        process.disable_restart();
        set.spawn(async move { process.stop().await });
    }

    let mut summary = StopSummary::default();
    while let Some(result) = set.join_next().await {
        match result {
            Ok(StopOutcome::Stopped) => summary.stopped += 1,
            Ok(StopOutcome::Killed) => summary.killed += 1,
            Ok(StopOutcome::AlreadyStopped) => summary.already_stopped += 1,
            Err(e) => {
                warn!("stop task failed: {e}");
                summary.failed += 1;
            }
        }
    }
    summary
}

/// Stop and kill every process of every given program. Restarts are disabled
/// before any signal is sent.
pub(crate) async fn shutdown_programs<'a>(
    programs: impl IntoIterator<Item = &'a Program>,
) -> StopSummary {
    let programs: Vec<&Program> = programs.into_iter().collect();
    for program in &programs {
        program.disable_restart();
    }
    let mut summary =
        stop_processes(programs.iter().flat_map(|p| p.processes().cloned())).await;

    let mut leftovers = StopSummary::default();
    for program in &programs {
        leftovers.killed += program.kill();
    }
    if leftovers.killed > 0 {
        warn!("killed {} process(es) still alive after stop", leftovers.killed);
    }
    summary.merge(leftovers);
    summary
}
