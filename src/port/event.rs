use std::fmt::Display;

/// Events driving the port state machine, delivered by timers, the
/// receive path or the embedding application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Event {
    Null,
    Powerup,
    Initialize,
    StateChange,
    SyncIntervalTimeoutExpires,
    PDelayIntervalTimeoutExpires,
    SyncReceiptTimeoutExpires,
    QualificationTimeoutExpires,
    AnnounceReceiptTimeoutExpires,
    AnnounceIntervalTimeoutExpires,
    FaultDetected,
    PDelayDeferredProcessing,
    PDelayRespReceiptTimeoutExpires,
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Event::Null => "NULL",
            Event::Powerup => "POWERUP",
            Event::Initialize => "INITIALIZE",
            Event::StateChange => "STATE_CHANGE_EVENT",
            Event::SyncIntervalTimeoutExpires => "SYNC_INTERVAL_TIMEOUT_EXPIRES",
            Event::PDelayIntervalTimeoutExpires => "PDELAY_INTERVAL_TIMEOUT_EXPIRES",
            Event::SyncReceiptTimeoutExpires => "SYNC_RECEIPT_TIMEOUT_EXPIRES",
            Event::QualificationTimeoutExpires => "QUALIFICATION_TIMEOUT_EXPIRES",
            Event::AnnounceReceiptTimeoutExpires => "ANNOUNCE_RECEIPT_TIMEOUT_EXPIRES",
            Event::AnnounceIntervalTimeoutExpires => "ANNOUNCE_INTERVAL_TIMEOUT_EXPIRES",
            Event::FaultDetected => "FAULT_DETECTED",
            Event::PDelayDeferredProcessing => "PDELAY_DEFERRED_PROCESSING",
            Event::PDelayRespReceiptTimeoutExpires => "PDELAY_RESP_RECEIPT_TIMEOUT_EXPIRES",
        };
        f.write_str(name)
    }
}
