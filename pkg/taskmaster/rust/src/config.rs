// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::definition::{
    AutoRestart, DEFAULT_OUTPUT, DEFAULT_STARTRETRIES, DEFAULT_WORKING_DIR, Definitions,
    OutputTarget, ProgramDefinition,
};
use crate::error::{ConfigError, ProgramDefinitionError};
use log::{debug, info};
use nix::sys::signal::Signal;
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

fn default_numprocs() -> usize {
    1
}

fn default_umask() -> Umask {
    Umask::Text("022".to_string())
}

fn default_workingdir() -> String {
    DEFAULT_WORKING_DIR.to_string()
}

fn default_true() -> bool {
    true
}

fn default_autorestart() -> Flexible {
    Flexible::Text("unexpected".to_string())
}

fn default_exitcodes() -> Vec<i32> {
    vec![0]
}

fn default_startretries() -> u32 {
    DEFAULT_STARTRETRIES
}

fn default_stopsignal() -> String {
    "TERM".to_string()
}

fn default_stoptime() -> f64 {
    10.0
}

fn default_output() -> String {
    DEFAULT_OUTPUT.to_string()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Umask {
    Number(u64),
    Text(String),
}

/// YAML scalar that may be written bare (`true`) or as a name (`always`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Flexible {
    Flag(bool),
    Text(String),
}

/// One entry under `programs:` as written in the file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProgramConfig {
    cmd: Option<String>,
    #[serde(default = "default_numprocs")]
    numprocs: usize,
    #[serde(default = "default_umask")]
    umask: Umask,
    #[serde(default = "default_workingdir")]
    workingdir: String,
    #[serde(default = "default_true")]
    autostart: bool,
    #[serde(default = "default_autorestart")]
    autorestart: Flexible,
    #[serde(default = "default_exitcodes")]
    exitcodes: Vec<i32>,
    #[serde(default = "default_startretries")]
    startretries: u32,
    #[serde(default)]
    starttime: f64,
    #[serde(default = "default_stopsignal")]
    stopsignal: String,
    #[serde(default = "default_stoptime")]
    stoptime: f64,
    #[serde(default = "default_output")]
    stdout: String,
    #[serde(default = "default_output")]
    stderr: String,
    #[serde(default)]
    env: BTreeMap<String, Value>,
    #[serde(default)]
    mail_alerting: bool,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    programs: Option<BTreeMap<String, Value>>,
}

/// Read and validate the configuration file at `path`.
///
/// Either every program in the file is valid and the whole set is returned,
/// or nothing is.
pub fn load_config(path: &Path) -> Result<Definitions, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    if path.is_dir() {
        return Err(ConfigError::IsDirectory(path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let definitions = parse_config(&contents)?;
    info!(
        "loaded {} program definition(s) from {}",
        definitions.len(),
        path.display()
    );
    Ok(definitions)
}

pub fn parse_config(contents: &str) -> Result<Definitions, ConfigError> {
    let file: ConfigFile =
        serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let programs = file
        .programs
        .ok_or_else(|| ConfigError::Parse("missing top-level `programs` mapping".to_string()))?;

    let mut definitions = Definitions::new();
    for (name, raw) in programs {
        let definition = define_program(&name, raw)?;
        debug!("defined program {name}");
        definitions.insert(name, Arc::new(definition));
    }
    Ok(definitions)
}

fn define_program(name: &str, raw: Value) -> Result<ProgramDefinition, ProgramDefinitionError> {
    let invalid = |reason: String| ProgramDefinitionError::new(name, reason);

    if name.trim().is_empty() {
        return Err(invalid("program name must not be empty".to_string()));
    }
    if name.chars().any(char::is_whitespace) {
        return Err(invalid("program name must not contain whitespace".to_string()));
    }

    let cfg: ProgramConfig = serde_yaml::from_value(raw).map_err(|e| invalid(e.to_string()))?;

    let cmd = cfg
        .cmd
        .ok_or_else(|| invalid("missing required field `cmd`".to_string()))?;
    if cmd.split_whitespace().next().is_none() {
        return Err(invalid("`cmd` must not be empty".to_string()));
    }
    if cfg.numprocs == 0 {
        return Err(invalid("`numprocs` must be >= 1".to_string()));
    }

    let umask = parse_umask(&cfg.umask).ok_or_else(|| {
        invalid(match &cfg.umask {
            // YAML already turned `0o22` into 18, so the digits no longer read as octal.
            Umask::Number(n) => format!(
                "`umask` must be an octal value between 000 and 777, got the integer {n}; \
                 quote it (umask: \"022\") to keep the octal digits"
            ),
            Umask::Text(s) => {
                format!("`umask` must be an octal value between 000 and 777, got `{s}`")
            }
        })
    })?;

    let autorestart = match &cfg.autorestart {
        Flexible::Flag(true) => AutoRestart::Always,
        Flexible::Flag(false) => AutoRestart::Never,
        Flexible::Text(s) => AutoRestart::parse(s).ok_or_else(|| {
            invalid(format!(
                "`autorestart` must be one of never, always, unexpected, got `{s}`"
            ))
        })?,
    };

    let stopsignal = parse_signal(&cfg.stopsignal)
        .ok_or_else(|| {
            invalid(format!(
                "`stopsignal` must be one of TERM, HUP, INT, QUIT, KILL, USR1, USR2, got `{}`",
                cfg.stopsignal
            ))
        })?;

    let starttime = parse_seconds(cfg.starttime)
        .ok_or_else(|| invalid(format!("invalid `starttime` {}", cfg.starttime)))?;
    let stoptime = parse_seconds(cfg.stoptime)
        .ok_or_else(|| invalid(format!("invalid `stoptime` {}", cfg.stoptime)))?;

    let mut env = BTreeMap::new();
    for (key, value) in cfg.env {
        let value = scalar_to_string(&value)
            .ok_or_else(|| invalid(format!("`env.{key}` must be a scalar value")))?;
        env.insert(key, value);
    }

    Ok(ProgramDefinition {
        name: name.to_string(),
        cmd,
        numprocs: cfg.numprocs,
        umask,
        cwd: cfg.workingdir.into(),
        autostart: cfg.autostart,
        autorestart,
        exitcodes: cfg.exitcodes.into_iter().collect(),
        startretries: cfg.startretries,
        starttime,
        stopsignal,
        stoptime,
        stdout: OutputTarget::parse(&cfg.stdout),
        stderr: OutputTarget::parse(&cfg.stderr),
        env,
        mail_alerting: cfg.mail_alerting,
    })
}

/// `"022"`, `"0o22"` and a bare YAML integer `022` (read back as digits) are all octal.
fn parse_umask(raw: &Umask) -> Option<u32> {
    let digits = match raw {
        Umask::Number(n) => n.to_string(),
        Umask::Text(s) => s.trim().trim_start_matches("0o").to_string(),
    };
    if digits.is_empty() {
        return None;
    }
    u32::from_str_radix(&digits, 8)
        .ok()
        .filter(|mask| *mask <= 0o777)
}

/// Signals a program may name as its `stopsignal`.
const STOP_SIGNALS: [Signal; 7] = [
    Signal::SIGTERM,
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGKILL,
    Signal::SIGUSR1,
    Signal::SIGUSR2,
];

/// Accepts `TERM` or `SIGTERM`, any case, limited to [`STOP_SIGNALS`].
fn parse_signal(raw: &str) -> Option<Signal> {
    let upper = raw.trim().to_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&name)
        .ok()
        .filter(|sig| STOP_SIGNALS.contains(sig))
}

fn parse_seconds(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}
