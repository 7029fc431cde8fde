//! Anchor-side receive pipeline
//!
//! decode -> dedup -> escalate + publish, run once per advertisement
//! delivered by the radio stack. A scan's sequence is only recorded once it
//! reached the transport. When publishing fails on the transport, the
//! pipeline's link is re-established under its [`LinkSupervisor`]; if that
//! runs out of retries the pipeline latches [`CommError::RestartRequired`].

use crate::api::escalator::EmergencyEscalator;
use crate::api::messages::ScanMessage;
use crate::api::sink::{EventSink, ScanPublisher};
use crate::core::EmergencyEvent;
use crate::hardware::{
    CommError, CommResult, LinkSupervisor, RawAdvertisement, ScanObserver, TransportLink,
};
use crate::processing::{Deduplicator, ScanDecoder};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tracing::{debug, error, warn};

/// What happened to one advertisement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Not a tag advertisement
    Ignored,
    /// Repeat of the last forwarded sequence
    Suppressed,
    /// Published to the locator transport
    Forwarded { emergency: bool },
}

struct SupervisedLink {
    link: Mutex<Box<dyn TransportLink + Send>>,
    supervisor: LinkSupervisor,
}

/// One anchor's receive path
pub struct AnchorPipeline {
    decoder: ScanDecoder,
    dedup: Deduplicator,
    escalator: EmergencyEscalator,
    publisher: Arc<dyn ScanPublisher>,
    link: Option<SupervisedLink>,
    restart: Mutex<Option<CommError>>,
}

impl AnchorPipeline {
    pub fn new(
        anchor_id: impl Into<String>,
        publisher: Arc<dyn ScanPublisher>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            decoder: ScanDecoder::new(anchor_id),
            dedup: Deduplicator::new(),
            escalator: EmergencyEscalator::new(events),
            publisher,
            link: None,
            restart: Mutex::new(None),
        }
    }

    /// Supervise the message-bus connection the publisher writes through
    pub fn with_link(mut self, link: Box<dyn TransportLink + Send>, supervisor: LinkSupervisor) -> Self {
        self.link = Some(SupervisedLink {
            link: Mutex::new(link),
            supervisor,
        });
        self
    }

    pub fn anchor_id(&self) -> &str {
        self.decoder.anchor_id()
    }

    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }

    /// Set once the link could not be re-established; the process must restart
    pub fn restart_required(&self) -> Option<CommError> {
        self.restart.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Bring the link up, e.g. at startup. No-op without a link.
    pub fn connect(&self) -> CommResult<()> {
        self.reconnect(false)
    }

    /// Run one advertisement through the pipeline.
    ///
    /// For emergency scans the event and the scan are both attempted even if
    /// one of them fails; the first error is returned afterwards.
    pub fn handle(&self, advertisement: &RawAdvertisement) -> CommResult<ScanOutcome> {
        if let Some(e) = self.restart_required() {
            return Err(e);
        }
        let Some(scan) = self.decoder.decode(advertisement) else {
            return Ok(ScanOutcome::Ignored);
        };

        let message = ScanMessage::from(&scan);
        let mut escalation: CommResult<Option<EmergencyEvent>> = Ok(None);
        let published = self.dedup.forward_if_new(&scan, || {
            escalation = self.escalator.escalate(&scan);
            self.publish(&message)
        });

        let published = match published {
            Ok(None) => {
                debug!(anchor = %scan.anchor_id, uid = %scan.uid, seq = ?scan.adv_seq, "duplicate suppressed");
                return Ok(ScanOutcome::Suppressed);
            }
            Ok(Some(())) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = &escalation {
            warn!(anchor = %scan.anchor_id, uid = %scan.uid, error = %e, "emergency event not delivered");
        }
        escalation?;
        published?;

        debug!(
            anchor = %scan.anchor_id,
            uid = %scan.uid,
            seq = ?scan.adv_seq,
            rssi = scan.rssi,
            emergency = scan.emergency,
            "scan forwarded"
        );
        Ok(ScanOutcome::Forwarded {
            emergency: scan.emergency,
        })
    }

    /// Publish, recovering the link once on a transport failure
    fn publish(&self, message: &ScanMessage) -> CommResult<()> {
        let e = match self.publisher.publish_scan(message) {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if self.link.is_none() || !e.is_transport_failure() {
            return Err(e);
        }

        warn!(anchor = %self.anchor_id(), error = %e, "publish failed, re-establishing link");
        self.reconnect(true)?;
        self.publisher.publish_scan(message)
    }

    fn reconnect(&self, lost: bool) -> CommResult<()> {
        let Some(supervised) = &self.link else {
            return Ok(());
        };

        let mut link = supervised.link.lock().unwrap_or_else(PoisonError::into_inner);
        if lost {
            link.mark_lost();
        }
        let result = supervised.supervisor.ensure_connected(&mut **link, thread::sleep);
        match &result {
            Err(e) if matches!(e, CommError::RestartRequired { .. }) => {
                error!(anchor = %self.anchor_id(), endpoint = %link.endpoint(), error = %e, "transport unrecoverable");
                *self.restart.lock().unwrap_or_else(PoisonError::into_inner) = Some(e.clone());
            }
            _ => {}
        }
        result
    }
}

impl ScanObserver for AnchorPipeline {
    fn on_advertisement(&self, advertisement: RawAdvertisement) {
        if let Err(e) = self.handle(&advertisement) {
            warn!(
                anchor = %self.anchor_id(),
                error = %e,
                strategy = ?e.recovery_strategy(),
                "failed to forward scan"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::sink::MemorySink;
    use crate::hardware::{MockLink, ReconnectPolicy};
    use crate::processing::codec::{encode, TelemetryPayload};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    /// Publisher whose first `failures` calls fail on the transport
    struct FlakyPublisher {
        failures: AtomicU32,
        delivered: MemorySink,
    }

    impl FlakyPublisher {
        fn failing_for(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicU32::new(failures),
                delivered: MemorySink::new(),
            })
        }
    }

    impl ScanPublisher for FlakyPublisher {
        fn publish_scan(&self, message: &ScanMessage) -> CommResult<()> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(CommError::PublishFailed {
                    topic: "scans".to_string(),
                    details: "broker unreachable".to_string(),
                });
            }
            self.delivered.publish_scan(message)
        }
    }

    struct BrokenEventSink;

    impl EventSink for BrokenEventSink {
        fn emit_event(&self, _event: &EmergencyEvent) -> CommResult<()> {
            Err(CommError::PublishFailed {
                topic: "events".to_string(),
                details: "queue full".to_string(),
            })
        }
    }

    fn fast_policy(connect_timeout_ms: u64) -> LinkSupervisor {
        LinkSupervisor::new(ReconnectPolicy {
            retry_interval_ms: 1,
            connect_timeout_ms,
        })
    }

    fn advertisement(uid: &str, seq: u16, emergency: bool) -> RawAdvertisement {
        let payload = TelemetryPayload::from_readings(uid, seq, Some(3.9), Some(24.0), emergency, -4);
        RawAdvertisement::new(uid, -65.0)
            .with_timestamp(1_700_000_000_000)
            .with_manufacturer_data(encode(&payload).to_vec())
    }

    fn pipeline() -> (AnchorPipeline, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (AnchorPipeline::new("A1", sink.clone(), sink.clone()), sink)
    }

    #[test]
    fn test_repeated_broadcast_forwarded_once() {
        let (pipeline, sink) = pipeline();
        let adv = advertisement("W-01", 42, false);

        assert_eq!(pipeline.handle(&adv).unwrap(), ScanOutcome::Forwarded { emergency: false });
        assert_eq!(pipeline.handle(&adv).unwrap(), ScanOutcome::Suppressed);
        assert_eq!(pipeline.handle(&adv).unwrap(), ScanOutcome::Suppressed);

        let scans = sink.scans();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].anchor_id, "A1");
        assert_eq!(scans[0].adv_seq, Some(42));
        assert_eq!(scans[0].battery, Some(3.9));
    }

    #[test]
    fn test_emergency_repeats_all_escalate() {
        let (pipeline, sink) = pipeline();
        let adv = advertisement("W-01", 9, true);

        for _ in 0..3 {
            assert_eq!(pipeline.handle(&adv).unwrap(), ScanOutcome::Forwarded { emergency: true });
        }
        assert_eq!(sink.events().len(), 3);
        assert_eq!(sink.scans().len(), 3);
    }

    #[test]
    fn test_foreign_advertisement_ignored() {
        let (pipeline, sink) = pipeline();
        let adv = RawAdvertisement::new("Headphones", -40.0);

        assert_eq!(pipeline.handle(&adv).unwrap(), ScanOutcome::Ignored);
        assert!(sink.scans().is_empty());
    }

    #[test]
    fn test_presence_only_scan_always_forwarded() {
        let (pipeline, sink) = pipeline();
        let adv = RawAdvertisement::new("W-02", -80.0).with_manufacturer_data(vec![0xFF, 0xFF, 1, 2, 3]);

        pipeline.on_advertisement(adv.clone());
        pipeline.on_advertisement(adv);

        let scans = sink.scans();
        assert_eq!(scans.len(), 2);
        assert_eq!(scans[0].adv_seq, None);
    }

    #[test]
    fn test_concurrent_callbacks_forward_once() {
        let (pipeline, sink) = pipeline();
        let pipeline = Arc::new(pipeline);
        let adv = advertisement("W-03", 1_000, false);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pipeline = Arc::clone(&pipeline);
                let adv = adv.clone();
                thread::spawn(move || pipeline.on_advertisement(adv))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(sink.scans().len(), 1);
        assert_eq!(pipeline.dedup().last_seq("W-03"), Some(1_000));
    }

    #[test]
    fn test_failed_publish_is_retried_on_rebroadcast() {
        let publisher = FlakyPublisher::failing_for(1);
        let pipeline = AnchorPipeline::new("A1", publisher.clone(), Arc::new(MemorySink::new()));
        let adv = advertisement("W-01", 7, false);

        assert!(matches!(pipeline.handle(&adv), Err(CommError::PublishFailed { .. })));
        assert_eq!(pipeline.dedup().last_seq("W-01"), None);

        assert_eq!(pipeline.handle(&adv).unwrap(), ScanOutcome::Forwarded { emergency: false });
        assert_eq!(pipeline.handle(&adv).unwrap(), ScanOutcome::Suppressed);

        let delivered = publisher.delivered.scans();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].adv_seq, Some(7));
    }

    #[test]
    fn test_event_sink_failure_still_publishes_scan() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = AnchorPipeline::new("A1", sink.clone(), Arc::new(BrokenEventSink));

        let result = pipeline.handle(&advertisement("W-01", 3, true));
        assert!(matches!(result, Err(CommError::PublishFailed { ref topic, .. }) if topic == "events"));

        let scans = sink.scans();
        assert_eq!(scans.len(), 1);
        assert!(scans[0].emergency);
    }

    #[test]
    fn test_publish_failure_still_escalates() {
        let events = Arc::new(MemorySink::new());
        let pipeline = AnchorPipeline::new("A1", FlakyPublisher::failing_for(u32::MAX), events.clone());

        assert!(pipeline.handle(&advertisement("W-01", 3, true)).is_err());
        assert_eq!(events.events().len(), 1);
        assert_eq!(events.events()[0].uid, "W-01");
    }

    #[test]
    fn test_link_recovered_after_publish_failure() {
        let publisher = FlakyPublisher::failing_for(1);
        let pipeline = AnchorPipeline::new("A1", publisher.clone(), Arc::new(MemorySink::new()))
            .with_link(Box::new(MockLink::failing_for(2)), fast_policy(10));

        let outcome = pipeline.handle(&advertisement("W-01", 11, false)).unwrap();
        assert_eq!(outcome, ScanOutcome::Forwarded { emergency: false });
        assert_eq!(publisher.delivered.scans().len(), 1);
        assert_eq!(pipeline.restart_required(), None);
    }

    #[test]
    fn test_link_down_requires_restart() {
        let publisher = FlakyPublisher::failing_for(u32::MAX);
        let pipeline = AnchorPipeline::new("A1", publisher.clone(), Arc::new(MemorySink::new()))
            .with_link(Box::new(MockLink::failing_for(u32::MAX)), fast_policy(3));

        let restart = CommError::RestartRequired { attempts: 3, elapsed_ms: 2 };
        assert_eq!(pipeline.handle(&advertisement("W-01", 1, false)), Err(restart.clone()));
        assert_eq!(pipeline.restart_required(), Some(restart.clone()));

        // Latched: later advertisements are refused without touching the link
        assert_eq!(pipeline.handle(&advertisement("W-02", 1, false)), Err(restart));
        assert!(publisher.delivered.scans().is_empty());
    }

    #[test]
    fn test_connect_brings_link_up() {
        let (pipeline, _sink) = pipeline();
        pipeline.connect().unwrap();

        let supervised = AnchorPipeline::new("A1", Arc::new(MemorySink::new()), Arc::new(MemorySink::new()))
            .with_link(Box::new(MockLink::failing_for(u32::MAX)), fast_policy(2));
        assert!(matches!(supervised.connect(), Err(CommError::RestartRequired { .. })));
        assert!(supervised.restart_required().is_some());
    }
}
