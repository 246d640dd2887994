//! Per-title ordinal assignment.
//!
//! Ordinals are handed out while pages are classified one at a time, before
//! any transfer starts. The ledger is never shared with download workers.

use std::collections::HashMap;

use super::ClassifiedLink;
use crate::model::{AttachmentCandidate, SourceRecord};

/// Running per-title counters for one harvest run.
#[derive(Debug, Default)]
pub struct OrdinalLedger {
    counters: HashMap<String, u32>,
}

impl OrdinalLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next ordinal for `title`, starting at 1.
    pub fn next(&mut self, title: &str) -> u32 {
        let counter = self.counters.entry(title.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Last ordinal handed out for `title` (0 if none).
    #[must_use]
    pub fn issued(&self, title: &str) -> u32 {
        self.counters.get(title).copied().unwrap_or(0)
    }

    /// Turns classified links into candidates, in link order.
    pub fn stamp(
        &mut self,
        record: &SourceRecord,
        links: Vec<ClassifiedLink>,
    ) -> Vec<AttachmentCandidate> {
        links
            .into_iter()
            .map(|link| AttachmentCandidate {
                url: link.url,
                filename_hint: link.filename_hint,
                source_title: record.title.clone(),
                source_url: record.url.clone(),
                source_index: record.index,
                ordinal: self.next(&record.title),
            })
            .collect()
    }
}
