// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Validated, immutable description of one supervised program.

use nix::sys::signal::Signal;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_NUMPROCS: usize = 1;
pub const DEFAULT_UMASK: u32 = 0o022;
pub const DEFAULT_WORKING_DIR: &str = "/tmp";
pub const DEFAULT_STARTRETRIES: u32 = 3;
pub const DEFAULT_STARTTIME: Duration = Duration::ZERO;
pub const DEFAULT_STOPTIME: Duration = Duration::from_secs(10);
pub const DEFAULT_OUTPUT: &str = "/dev/null";

/// Literal output target that asks the supervisor to drain the stream into its logs.
pub const PIPE: &str = "PIPE";

/// Name → definition, the unit the reconciler diffs.
pub type Definitions = BTreeMap<String, Arc<ProgramDefinition>>;

/// When a slot is relaunched after its child exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AutoRestart {
    /// Never relaunch.
    Never,
    /// Relaunch after any exit.
    Always,
    /// Relaunch only when the exit code is not listed in `exitcodes`.
    #[default]
    Unexpected,
}

impl AutoRestart {
    /// Whether an exit classified as `expected` should be retried.
    pub fn should_retry(self, expected: bool) -> bool {
        match self {
            AutoRestart::Never => false,
            AutoRestart::Always => true,
            AutoRestart::Unexpected => !expected,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "never" | "false" | "no" => Some(AutoRestart::Never),
            "always" | "true" | "yes" => Some(AutoRestart::Always),
            "unexpected" => Some(AutoRestart::Unexpected),
            _ => None,
        }
    }
}

impl fmt::Display for AutoRestart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutoRestart::Never => write!(f, "never"),
            AutoRestart::Always => write!(f, "always"),
            AutoRestart::Unexpected => write!(f, "unexpected"),
        }
    }
}

/// Where a child's stdout or stderr goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// Drained line by line into the supervisor's log.
    Pipe,
    /// Opened for append for the lifetime of the child.
    File(PathBuf),
}

impl OutputTarget {
    pub fn parse(s: &str) -> Self {
        if s == PIPE {
            OutputTarget::Pipe
        } else {
            OutputTarget::File(PathBuf::from(s))
        }
    }
}

impl Default for OutputTarget {
    fn default() -> Self {
        OutputTarget::File(PathBuf::from(DEFAULT_OUTPUT))
    }
}

impl fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputTarget::Pipe => write!(f, "{PIPE}"),
            OutputTarget::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgramDefinition {
    pub name: String,
    /// Whitespace-tokenized; no shell interpretation.
    pub cmd: String,
    pub numprocs: usize,
    pub umask: u32,
    pub cwd: PathBuf,
    pub autostart: bool,
    pub autorestart: AutoRestart,
    pub exitcodes: BTreeSet<i32>,
    pub startretries: u32,
    pub starttime: Duration,
    pub stopsignal: Signal,
    pub stoptime: Duration,
    pub stdout: OutputTarget,
    pub stderr: OutputTarget,
    pub env: BTreeMap<String, String>,
    pub mail_alerting: bool,
}

impl ProgramDefinition {
    /// A definition with every optional attribute at its default.
    pub fn new(name: impl Into<String>, cmd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
            numprocs: DEFAULT_NUMPROCS,
            umask: DEFAULT_UMASK,
            cwd: PathBuf::from(DEFAULT_WORKING_DIR),
            autostart: true,
            autorestart: AutoRestart::default(),
            exitcodes: BTreeSet::from([0]),
            startretries: DEFAULT_STARTRETRIES,
            starttime: DEFAULT_STARTTIME,
            stopsignal: Signal::SIGTERM,
            stoptime: DEFAULT_STOPTIME,
            stdout: OutputTarget::default(),
            stderr: OutputTarget::default(),
            env: BTreeMap::new(),
            mail_alerting: false,
        }
    }

    /// Program path followed by its arguments.
    pub fn argv(&self) -> Vec<&str> {
        self.cmd.split_whitespace().collect()
    }

    pub fn is_expected_exit(&self, code: i32) -> bool {
        self.exitcodes.contains(&code)
    }

    /// Fields that differ between `self` and `other`, in declaration order.
    pub fn changed_fields(&self, other: &ProgramDefinition) -> Vec<Field> {
        let mut changed = Vec::new();
        let mut check = |field: Field, differs: bool| {
            if differs {
                changed.push(field);
            }
        };
        check(Field::Name, self.name != other.name);
        check(Field::Cmd, self.cmd != other.cmd);
        check(Field::Numprocs, self.numprocs != other.numprocs);
        check(Field::Umask, self.umask != other.umask);
        check(Field::Cwd, self.cwd != other.cwd);
        check(Field::Autostart, self.autostart != other.autostart);
        check(Field::Autorestart, self.autorestart != other.autorestart);
        check(Field::Exitcodes, self.exitcodes != other.exitcodes);
        check(Field::Startretries, self.startretries != other.startretries);
        check(Field::Starttime, self.starttime != other.starttime);
        check(Field::Stopsignal, self.stopsignal != other.stopsignal);
        check(Field::Stoptime, self.stoptime != other.stoptime);
        check(Field::Stdout, self.stdout != other.stdout);
        check(Field::Stderr, self.stderr != other.stderr);
        check(Field::Env, self.env != other.env);
        check(Field::MailAlerting, self.mail_alerting != other.mail_alerting);
        changed
    }
}

/// Tag for one attribute of a [`ProgramDefinition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Name,
    Cmd,
    Numprocs,
    Umask,
    Cwd,
    Autostart,
    Autorestart,
    Exitcodes,
    Startretries,
    Starttime,
    Stopsignal,
    Stoptime,
    Stdout,
    Stderr,
    Env,
    MailAlerting,
}

impl Field {
    /// A change to a critical field cannot be applied to a running child;
    /// the program has to be killed and relaunched.
    pub fn is_critical(self) -> bool {
        match self {
            Field::Name | Field::Cmd | Field::Cwd | Field::Umask | Field::Stdout | Field::Stderr => {
                true
            }
            Field::Numprocs
            | Field::Autostart
            | Field::Autorestart
            | Field::Exitcodes
            | Field::Startretries
            | Field::Starttime
            | Field::Stopsignal
            | Field::Stoptime
            | Field::Env
            | Field::MailAlerting => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Cmd => "cmd",
            Field::Numprocs => "numprocs",
            Field::Umask => "umask",
            Field::Cwd => "workingdir",
            Field::Autostart => "autostart",
            Field::Autorestart => "autorestart",
            Field::Exitcodes => "exitcodes",
            Field::Startretries => "startretries",
            Field::Starttime => "starttime",
            Field::Stopsignal => "stopsignal",
            Field::Stoptime => "stoptime",
            Field::Stdout => "stdout",
            Field::Stderr => "stderr",
            Field::Env => "env",
            Field::MailAlerting => "mail_alerting",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn any_critical(fields: &[Field]) -> bool {
    fields.iter().any(|f| f.is_critical())
}

pub(crate) fn join_fields(fields: &[Field]) -> String {
    fields
        .iter()
        .map(|f| f.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
