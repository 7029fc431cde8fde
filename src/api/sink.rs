//! Output seams: where scans, events and fixes go
//!
//! The message bus and time-series store live outside this crate. Each
//! output is a trait so the binary can write JSON lines and tests can
//! collect records in memory.

use crate::api::messages::ScanMessage;
use crate::core::{EmergencyEvent, PositionFix};
use crate::hardware::{CommError, CommResult};
use serde::Serialize;
use std::io::Write;
use std::sync::{Mutex, PoisonError};

/// Publishes forwarded scans to the locator transport
pub trait ScanPublisher: Send + Sync {
    fn publish_scan(&self, message: &ScanMessage) -> CommResult<()>;
}

/// Receives high-priority emergency events
pub trait EventSink: Send + Sync {
    fn emit_event(&self, event: &EmergencyEvent) -> CommResult<()>;
}

/// Persists position fixes
pub trait FixSink: Send + Sync {
    fn write_fix(&self, fix: &PositionFix) -> CommResult<()>;
}

/// In-memory sink, used by tests and the simulator
#[derive(Debug, Default)]
pub struct MemorySink {
    scans: Mutex<Vec<ScanMessage>>,
    events: Mutex<Vec<EmergencyEvent>>,
    fixes: Mutex<Vec<PositionFix>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scans(&self) -> Vec<ScanMessage> {
        self.scans.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn events(&self) -> Vec<EmergencyEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn fixes(&self) -> Vec<PositionFix> {
        self.fixes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Remove and return the collected scans
    pub fn take_scans(&self) -> Vec<ScanMessage> {
        std::mem::take(&mut *self.scans.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn take_events(&self) -> Vec<EmergencyEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl ScanPublisher for MemorySink {
    fn publish_scan(&self, message: &ScanMessage) -> CommResult<()> {
        self.scans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}

impl EventSink for MemorySink {
    fn emit_event(&self, event: &EmergencyEvent) -> CommResult<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

impl FixSink for MemorySink {
    fn write_fix(&self, fix: &PositionFix) -> CommResult<()> {
        self.fixes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fix.clone());
        Ok(())
    }
}

/// Writes every record as one JSON object per line
pub struct JsonLinesSink<W: Write + Send> {
    topic: String,
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(topic: impl Into<String>, out: W) -> Self {
        Self {
            topic: topic.into(),
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_line<T: Serialize>(&self, record: &T) -> CommResult<()> {
        let line = serde_json::to_string(record).map_err(|e| self.publish_failed(e.to_string()))?;
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "{}", line)
            .and_then(|_| out.flush())
            .map_err(|e| self.publish_failed(e.to_string()))
    }

    fn publish_failed(&self, details: String) -> CommError {
        CommError::PublishFailed {
            topic: self.topic.clone(),
            details,
        }
    }
}

impl<W: Write + Send> ScanPublisher for JsonLinesSink<W> {
    fn publish_scan(&self, message: &ScanMessage) -> CommResult<()> {
        self.write_line(message)
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn emit_event(&self, event: &EmergencyEvent) -> CommResult<()> {
        self.write_line(event)
    }
}

impl<W: Write + Send> FixSink for JsonLinesSink<W> {
    fn write_fix(&self, fix: &PositionFix) -> CommResult<()> {
        self.write_line(fix)
    }
}
