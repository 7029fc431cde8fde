//! Emergency escalation for forwarded scans

use crate::api::sink::EventSink;
use crate::core::{EmergencyEvent, Scan};
use crate::hardware::CommResult;
use std::sync::Arc;
use tracing::warn;

/// Raises one [`EmergencyEvent`] for every forwarded emergency scan.
///
/// Runs after deduplication, which never suppresses emergency scans, so
/// each emergency advertisement heard by an anchor yields one event.
pub struct EmergencyEscalator {
    sink: Arc<dyn EventSink>,
}

impl EmergencyEscalator {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Returns the emitted event, or `None` for non-emergency scans
    pub fn escalate(&self, scan: &Scan) -> CommResult<Option<EmergencyEvent>> {
        if !scan.emergency {
            return Ok(None);
        }

        let event = EmergencyEvent::button_pressed(scan);
        warn!(uid = %event.uid, anchor = %event.anchor_id, ts = event.ts, "emergency button pressed");
        self.sink.emit_event(&event)?;
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::sink::MemorySink;

    #[test]
    fn test_emergency_scan_raises_event() {
        let sink = Arc::new(MemorySink::new());
        let escalator = EmergencyEscalator::new(sink.clone());
        let scan = Scan::presence(1_000, "A2", "W-07", -62.0).with_emergency(true);

        let event = escalator.escalate(&scan).unwrap().unwrap();
        assert_eq!(event.event_type, "emergency_button");
        assert_eq!(event.severity, 2);
        assert_eq!(event.details, "pressed=true");
        assert_eq!(event.anchor_id, "A2");
        assert_eq!(sink.events(), vec![event]);
    }

    #[test]
    fn test_normal_scan_is_ignored() {
        let sink = Arc::new(MemorySink::new());
        let escalator = EmergencyEscalator::new(sink.clone());

        let scan = Scan::presence(1_000, "A2", "W-07", -62.0);
        assert_eq!(escalator.escalate(&scan).unwrap(), None);
        assert!(sink.events().is_empty());
    }
}
