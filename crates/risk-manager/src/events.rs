//! Append-only risk event log.

use chrono::{DateTime, Utc};
use market_core::types::{RiskEvent, RiskEventType, Severity};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

const SUBSCRIBER_BUFFER: usize = 256;

/// Audit trail of risk events. Events are never removed, only resolved.
#[derive(Debug)]
pub struct RiskEventLog {
    events: Vec<RiskEvent>,
    tx: broadcast::Sender<RiskEvent>,
}

impl Default for RiskEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskEventLog {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self {
            events: Vec::new(),
            tx,
        }
    }

    /// Stream of newly appended events.
    pub fn subscribe(&self) -> broadcast::Receiver<RiskEvent> {
        self.tx.subscribe()
    }

    /// Append an event and return its ID.
    pub fn record(&mut self, event: RiskEvent) -> Uuid {
        match event.severity {
            Severity::Critical => error!(
                event_id = %event.id,
                event_type = %event.event_type,
                triggered_by = %event.triggered_by,
                actions = ?event.actions_taken,
                "{}",
                event.description
            ),
            Severity::Warning => warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                triggered_by = %event.triggered_by,
                "{}",
                event.description
            ),
            Severity::Info => info!(
                event_id = %event.id,
                event_type = %event.event_type,
                triggered_by = %event.triggered_by,
                "{}",
                event.description
            ),
        }

        let id = event.id;
        // No subscribers is fine.
        let _ = self.tx.send(event.clone());
        self.events.push(event);
        id
    }

    /// Mark an event resolved. Returns false if unknown or already resolved.
    pub fn resolve(&mut self, id: Uuid, at: DateTime<Utc>) -> bool {
        match self.events.iter_mut().find(|e| e.id == id) {
            Some(event) if event.resolved_at.is_none() => {
                event.resolved_at = Some(at);
                info!(event_id = %id, event_type = %event.event_type, "Risk event resolved");
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: Uuid) -> Option<&RiskEvent> {
        self.events.iter().find(|e| e.id == id)
    }

    pub fn all(&self) -> &[RiskEvent] {
        &self.events
    }

    /// Most recent `limit` events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<RiskEvent> {
        self.events.iter().rev().take(limit).cloned().collect()
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &RiskEvent> {
        self.events.iter().filter(|e| !e.is_resolved())
    }

    pub fn has_unresolved(&self, event_type: RiskEventType) -> bool {
        self.unresolved().any(|e| e.event_type == event_type)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
