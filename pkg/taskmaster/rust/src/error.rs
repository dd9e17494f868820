// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::path::PathBuf;
use thiserror::Error;

/// The configuration source could not be turned into a definition set.
/// Live state is never touched when this is returned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file `{}` does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("configuration path `{}` is a directory", .0.display())]
    IsDirectory(PathBuf),

    #[error("failed to read configuration file `{}`: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error(transparent)]
    Definition(#[from] ProgramDefinitionError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid definition for program `{program}`: {reason}")]
pub struct ProgramDefinitionError {
    pub program: String,
    pub reason: String,
}

impl ProgramDefinitionError {
    pub fn new(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            reason: reason.into(),
        }
    }
}

/// A single slot could not be launched. Contained to that slot.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("[{identity}] empty command line")]
    EmptyCommand { identity: String },

    #[error("[{identity}] failed to open output `{}`: {source}", .path.display())]
    Output {
        identity: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[{identity}] failed to spawn `{command}`: {source}")]
    Spawn {
        identity: String,
        command: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command (available commands: {})", crate::command::VERBS.join(", "))]
    Empty,

    #[error("too many arguments: usage: {usage}")]
    TooManyArguments { usage: &'static str },

    #[error("not enough arguments: usage: {usage}")]
    MissingArgument { usage: &'static str },

    #[error("unknown command `{verb}` (available commands: {})", crate::command::VERBS.join(", "))]
    UnknownVerb { verb: String },

    #[error("unknown program `{0}` (not in configuration)")]
    UnknownProgram(String),

    #[error("invalid log level `{0}` (expected one of: off, error, warn, info, debug, trace)")]
    InvalidLogLevel(String),

    #[error("reload failed, configuration unchanged: {0}")]
    Reload(String),

    #[error("supervisor is shutting down")]
    ShuttingDown,
}
