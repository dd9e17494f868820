// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::Result;
use log::{error, warn};

/// Outbound notification for slots that exhausted their retry budget.
///
/// Only called for programs with `mail_alerting` set. Delivery failures are
/// logged by the caller and never affect supervision.
pub trait Alerter: Send + Sync {
    fn send_alert(&self, subject: &str, body: &str) -> Result<()>;
}

/// Writes alerts to the supervisor log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlerter;

impl Alerter for LogAlerter {
    fn send_alert(&self, subject: &str, body: &str) -> Result<()> {
        error!("ALERT: {subject}: {body}");
        Ok(())
    }
}

pub(crate) fn deliver(alerter: &dyn Alerter, subject: &str, body: &str) {
    if let Err(e) = alerter.send_alert(subject, body) {
        warn!("failed to deliver alert `{subject}`: {e:#}");
    }
}
