// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::error::CommandError;
use log::LevelFilter;
use std::str::FromStr;

pub const VERBS: &[&str] = &[
    "start", "stop", "restart", "status", "reload", "shutdown", "list", "loglevel",
];

/// One line of the control protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start(String),
    Stop(String),
    Restart(String),
    Status,
    Reload,
    Shutdown,
    List,
    LogLevel(LevelFilter),
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (verb, arg) = match tokens.as_slice() {
            [] => return Err(CommandError::Empty),
            [verb] => (*verb, None),
            [verb, arg] => (*verb, Some(*arg)),
            [verb, ..] => {
                return Err(CommandError::TooManyArguments {
                    usage: usage(verb).unwrap_or("<command> [argument]"),
                });
            }
        };
        let Some(usage) = usage(verb) else {
            return Err(CommandError::UnknownVerb {
                verb: verb.to_string(),
            });
        };

        let with_name = |build: fn(String) -> Command| match arg {
            Some(name) => Ok(build(name.to_string())),
            None => Err(CommandError::MissingArgument { usage }),
        };
        let bare = |command: Command| match arg {
            Some(_) => Err(CommandError::TooManyArguments { usage }),
            None => Ok(command),
        };

        match verb {
            "start" => with_name(Command::Start),
            "stop" => with_name(Command::Stop),
            "restart" => with_name(Command::Restart),
            "status" => bare(Command::Status),
            "reload" => bare(Command::Reload),
            "shutdown" => bare(Command::Shutdown),
            "list" => bare(Command::List),
            "loglevel" => {
                let level = arg.ok_or(CommandError::MissingArgument { usage })?;
                LevelFilter::from_str(level)
                    .map(Command::LogLevel)
                    .map_err(|_| CommandError::InvalidLogLevel(level.to_string()))
            }
            _ => Err(CommandError::UnknownVerb {
                verb: verb.to_string(),
            }),
        }
    }
}

fn usage(verb: &str) -> Option<&'static str> {
    Some(match verb {
        "start" => "start <name>",
        "stop" => "stop <name>",
        "restart" => "restart <name>",
        "status" => "status",
        "reload" => "reload",
        "shutdown" => "shutdown",
        "list" => "list",
        "loglevel" => "loglevel <off|error|warn|info|debug|trace>",
        _ => return None,
    })
}
