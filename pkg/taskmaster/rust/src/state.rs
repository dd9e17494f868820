// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessStatus {
    /// Never started, or stopped on request.
    #[default]
    Stopped,
    /// Child spawned, `starttime` not yet elapsed.
    Starting,
    /// Child survived `starttime`.
    Running,
    /// Stop signal sent, waiting up to `stoptime`.
    Stopping,
    /// Exited with a code listed in `exitcodes`.
    Exited,
    /// Exited with an unexpected code, failed to spawn, or was killed.
    Fatal,
    /// Retry budget exhausted. Terminal until an explicit restart.
    Aborted,
}

impl ProcessStatus {
    /// A slot in one of these states owns a live child.
    pub fn has_child(self) -> bool {
        matches!(
            self,
            ProcessStatus::Starting | ProcessStatus::Running | ProcessStatus::Stopping
        )
    }

    /// Starting or running; a start request leaves these slots alone.
    pub fn is_alive(self) -> bool {
        matches!(self, ProcessStatus::Starting | ProcessStatus::Running)
    }

    pub(crate) fn can_transition_to(self, next: ProcessStatus) -> bool {
        use ProcessStatus::*;
        matches!(
            (self, next),
            (Stopped | Exited | Fatal | Aborted, Starting)
                | (Starting, Running)
                | (Starting | Running, Exited | Fatal | Stopping)
                | (Stopping, Stopped | Fatal)
                | (Exited | Fatal, Aborted)
        )
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Stopped => write!(f, "STOPPED"),
            ProcessStatus::Starting => write!(f, "STARTING"),
            ProcessStatus::Running => write!(f, "RUNNING"),
            ProcessStatus::Stopping => write!(f, "STOPPING"),
            ProcessStatus::Exited => write!(f, "EXITED"),
            ProcessStatus::Fatal => write!(f, "FATAL"),
            ProcessStatus::Aborted => write!(f, "ABORTED"),
        }
    }
}
