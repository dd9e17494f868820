// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Turns two definition snapshots into the minimal list of per-program actions.

use crate::definition::{Definitions, Field, any_critical, join_fields};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Keep,
    Add,
    Remove,
    /// At least one critical field changed.
    Replace(Vec<Field>),
    /// Only non-critical fields changed.
    Update(Vec<Field>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub name: String,
    pub kind: ActionKind,
}

impl Action {
    fn new(name: &str, kind: ActionKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.kind == ActionKind::Keep
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ActionKind::Keep => write!(f, "keep {}", self.name),
            ActionKind::Add => write!(f, "add {}", self.name),
            ActionKind::Remove => write!(f, "remove {}", self.name),
            ActionKind::Replace(fields) => {
                write!(f, "replace {} ({})", self.name, join_fields(fields))
            }
            ActionKind::Update(fields) => {
                write!(f, "update {} ({})", self.name, join_fields(fields))
            }
        }
    }
}

/// Removals first, then programs present in both snapshots, then additions.
/// Each group is ordered by name.
pub fn plan(old: &Definitions, new: &Definitions) -> Vec<Action> {
    let removed = old
        .keys()
        .filter(|name| !new.contains_key(*name))
        .map(|name| Action::new(name, ActionKind::Remove));

    let kept = old.iter().filter_map(|(name, before)| {
        let after = new.get(name)?;
        let fields = before.changed_fields(after);
        let kind = if fields.is_empty() {
            ActionKind::Keep
        } else if any_critical(&fields) {
            ActionKind::Replace(fields)
        } else {
            ActionKind::Update(fields)
        };
        Some(Action::new(name, kind))
    });

    let added = new
        .keys()
        .filter(|name| !old.contains_key(*name))
        .map(|name| Action::new(name, ActionKind::Add));

    removed.chain(kept).chain(added).collect()
}
