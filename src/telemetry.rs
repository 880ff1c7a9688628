//! Telemetry Module for the ESI filter
//!
//! In Wasm, we emit structured logs that can be collected by
//! Envoy's access logging or external collectors.

use log::{info, warn};
use serde::Serialize;

/// Audit event types
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Response body will be translated
    TranslationStarted,
    /// Response passed through untouched
    TranslationSkipped,
    /// Variable stored by esi:assign
    VariableAssigned,
    /// esi:assign for a name that already exists
    VariableCollision,
    /// esi:include spliced in
    IncludeFetched,
    /// esi:include sub-request failed
    IncludeFailed,
    /// Tag longer than the configured limit
    TagOverflow,
    /// Body ended inside a tag
    UnterminatedTag,
}

/// Audit event for logging
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Event type
    pub event_type: AuditEventType,
    /// Envoy HTTP context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<u32>,
    /// Variable name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    /// Sub-request URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Sub-request status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Byte count (body, tag)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<usize>,
    /// Reason for action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    /// Create a new audit event
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_type,
            context_id: None,
            variable: None,
            url: None,
            status: None,
            bytes: None,
            reason: None,
        }
    }

    pub fn with_context_id(mut self, id: u32) -> Self {
        self.context_id = Some(id);
        self
    }

    pub fn with_variable(mut self, name: &str) -> Self {
        self.variable = Some(name.to_string());
        self
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_bytes(mut self, bytes: usize) -> Self {
        self.bytes = Some(bytes);
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    /// Log the event
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(json) => match self.event_type {
                AuditEventType::IncludeFailed
                | AuditEventType::TagOverflow
                | AuditEventType::UnterminatedTag => {
                    warn!("[ESI-AUDIT] {}", json);
                }
                _ => {
                    info!("[ESI-AUDIT] {}", json);
                }
            },
            Err(e) => {
                warn!("Failed to serialize audit event: {}", e);
            }
        }
    }
}

/// Translation enabled for a response
pub fn audit_started(content_type: &str) -> AuditEvent {
    AuditEvent::new(AuditEventType::TranslationStarted).with_reason(content_type)
}

/// Response left untouched
pub fn audit_skipped(reason: &str) -> AuditEvent {
    AuditEvent::new(AuditEventType::TranslationSkipped).with_reason(reason)
}

pub fn audit_assigned(name: &str) -> AuditEvent {
    AuditEvent::new(AuditEventType::VariableAssigned).with_variable(name)
}

pub fn audit_collision(name: &str) -> AuditEvent {
    AuditEvent::new(AuditEventType::VariableCollision)
        .with_variable(name)
        .with_reason("first write wins")
}

pub fn audit_fetched(url: &str, status: u16, bytes: usize) -> AuditEvent {
    AuditEvent::new(AuditEventType::IncludeFetched)
        .with_url(url)
        .with_status(status)
        .with_bytes(bytes)
}

pub fn audit_include_failed(url: &str, error: &str) -> AuditEvent {
    AuditEvent::new(AuditEventType::IncludeFailed)
        .with_url(url)
        .with_reason(error)
}

pub fn audit_tag_overflow(limit: usize) -> AuditEvent {
    AuditEvent::new(AuditEventType::TagOverflow)
        .with_bytes(limit)
        .with_reason("tag passed through literally")
}

pub fn audit_unterminated_tag(dropped: usize) -> AuditEvent {
    AuditEvent::new(AuditEventType::UnterminatedTag)
        .with_bytes(dropped)
        .with_reason("body ended inside a tag")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_serialization() {
        let event = audit_fetched("http://a/frag", 200, 12).with_context_id(7);

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("include_fetched"));
        assert!(json.contains("\"context_id\":7"));
        assert!(json.contains("http://a/frag"));
        assert!(!json.contains("variable"));
    }

    #[test]
    fn test_audit_collision() {
        let event = audit_collision("X");
        assert_eq!(event.variable.as_deref(), Some("X"));
        assert!(event.reason.as_ref().unwrap().contains("first write"));
    }

    #[test]
    fn test_audit_include_failed() {
        let event = audit_include_failed("/x", "No response");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("include_failed"));
        assert!(json.contains("No response"));
    }
}
