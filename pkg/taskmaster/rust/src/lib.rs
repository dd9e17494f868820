// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Process supervisor: keeps a configured set of programs running, restarts
//! them according to their policy, and applies configuration reloads with the
//! least possible disruption.

pub mod alert;
pub mod command;
pub mod config;
pub mod definition;
pub mod error;
pub mod process;
pub mod program;
pub mod reconcile;
pub mod registry;
pub mod server;
pub mod state;
pub mod supervisor;

pub use alert::{Alerter, LogAlerter};
pub use command::Command;
pub use definition::{Definitions, ProgramDefinition};
pub use error::{CommandError, ConfigError, ProcessError, ProgramDefinitionError};
pub use state::ProcessStatus;
pub use supervisor::Supervisor;
