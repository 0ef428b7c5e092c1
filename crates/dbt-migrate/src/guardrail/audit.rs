//! Bounded audit trail of guardrail decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;

/// What a guardrail event was about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    InputCheck,
    OutputCheck,
    RateLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// One guardrail decision. The checked text is never retained, only its hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailEvent {
    pub kind: EventKind,
    pub severity: Severity,
    /// Hex SHA-256 of the checked text (or of the rate-limit key).
    pub subject_hash: String,
    pub blocked: bool,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl GuardrailEvent {
    pub fn new(kind: EventKind, severity: Severity, subject: &str, blocked: bool, detail: String) -> Self {
        Self {
            kind,
            severity,
            subject_hash: subject_hash(subject),
            blocked,
            detail,
            timestamp: Utc::now(),
        }
    }
}

/// Hex SHA-256 of `text`.
pub fn subject_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Ring buffer of events, oldest evicted first.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: VecDeque<GuardrailEvent>,
    max_entries: usize,
}

impl EventLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_entries.min(1024)),
            max_entries,
        }
    }

    pub fn record(&mut self, event: GuardrailEvent) {
        if self.max_entries == 0 {
            return;
        }
        while self.entries.len() >= self.max_entries {
            self.entries.pop_front();
        }
        self.entries.push_back(event);
    }

    pub fn entries(&self) -> impl Iterator<Item = &GuardrailEvent> {
        self.entries.iter()
    }

    pub fn blocked(&self) -> usize {
        self.entries.iter().filter(|e| e.blocked).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
