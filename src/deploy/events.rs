//! Incremental reading of stack events.
//!
//! The provider returns events newest first, a page at a time, and offers no
//! way to ask for "events after X". [`EventStream`] takes a baseline when it
//! starts and then only yields events newer than everything it has already
//! delivered, oldest first.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

use crate::error::Result;
use crate::provider::StackProvider;
use crate::stack::StackEvent;

/// Deduplicating, ordered reader over a stack's event history.
#[derive(Debug)]
pub struct EventStream<'a, P: ?Sized> {
    provider: &'a P,
    stack: String,
    cursor: Option<DateTime<Utc>>,
    seen: HashMap<String, DateTime<Utc>>,
    failures: Vec<StackEvent>,
    delivered: usize,
}

impl<'a, P: StackProvider + ?Sized> EventStream<'a, P> {
    /// Starts a stream at the newest existing event.
    ///
    /// Historical events are never yielded.
    ///
    /// # Errors
    ///
    /// Returns an error if the baseline page cannot be read.
    pub async fn start(provider: &'a P, stack: &str) -> Result<Self> {
        let mut page = provider.describe_stack_events(stack, None).await?;
        let cursor = page.events.iter().map(|e| e.timestamp).max();
        let mut seen = HashMap::new();

        loop {
            seen.extend(
                page.events
                    .iter()
                    .filter(|e| Some(e.timestamp) == cursor)
                    .map(|e| (e.event_id.clone(), e.timestamp)),
            );
            // events sharing the newest timestamp may spill onto older pages
            let spills = page.events.iter().all(|e| Some(e.timestamp) == cursor);
            match page.next_token {
                Some(next) if spills && !page.events.is_empty() => {
                    page = provider.describe_stack_events(stack, Some(&next)).await?;
                }
                _ => break,
            }
        }

        debug!(stack, baseline = ?cursor, "Started event stream");
        Ok(Self {
            provider,
            stack: stack.to_string(),
            cursor,
            seen,
            failures: Vec::new(),
            delivered: 0,
        })
    }

    /// Fetches events newer than the cursor, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if a page cannot be read.
    pub async fn poll(&mut self) -> Result<Vec<StackEvent>> {
        let mut fetched = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let page = self
                .provider
                .describe_stack_events(&self.stack, token.as_deref())
                .await?;

            let reached_cursor = self
                .cursor
                .is_some_and(|cursor| page.events.iter().any(|e| e.timestamp < cursor));
            fetched.extend(page.events);

            match page.next_token {
                Some(next) if !reached_cursor => token = Some(next),
                _ => break,
            }
        }

        // pages are newest first
        fetched.reverse();
        fetched.sort_by_key(|e| e.timestamp);

        let mut fresh: Vec<StackEvent> = Vec::new();
        for event in fetched {
            let newer = self.cursor.is_none_or(|cursor| event.timestamp >= cursor);
            if newer && !self.seen.contains_key(&event.event_id)
                && !fresh.iter().any(|e| e.event_id == event.event_id)
            {
                fresh.push(event);
            }
        }

        if let Some(newest) = fresh.last().map(|e| e.timestamp) {
            self.cursor = Some(newest);
            self.seen.retain(|_, ts| *ts >= newest);
        }
        for event in &fresh {
            self.seen.insert(event.event_id.clone(), event.timestamp);
            if event.is_failure() {
                self.failures.push(event.clone());
            }
        }
        self.delivered += fresh.len();

        Ok(fresh)
    }

    /// Failure events observed so far.
    #[must_use]
    pub fn failures(&self) -> &[StackEvent] {
        &self.failures
    }

    /// Consumes the stream, returning its failure events.
    #[must_use]
    pub fn into_failures(self) -> Vec<StackEvent> {
        self.failures
    }

    /// Number of events delivered so far.
    #[must_use]
    pub const fn delivered(&self) -> usize {
        self.delivered
    }
}
