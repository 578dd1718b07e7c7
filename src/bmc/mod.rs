//! Best master clock selection

mod system_identity;

pub use system_identity::SystemIdentity;

use crate::datastructures::messages::AnnounceMessage;

/// Whether a received announce should replace the one a port currently
/// holds as its qualified announce
pub fn replaces_qualified(current: Option<&AnnounceMessage>, candidate: &AnnounceMessage) -> bool {
    match current {
        None => true,
        Some(current) => {
            current.header.source_port_identity == candidate.header.source_port_identity
                || SystemIdentity::from_announce(candidate)
                    .is_better_than(&SystemIdentity::from_announce(current))
        }
    }
}

/// Pick the best announce among the per port candidates (EBest from the
/// ERBest of each port). Returns the winning message together with the
/// key of the port it was received on. Ties keep the earliest candidate.
pub fn select_best<K>(
    candidates: impl IntoIterator<Item = (K, AnnounceMessage)>,
) -> Option<(K, AnnounceMessage)> {
    let mut best: Option<(K, AnnounceMessage, SystemIdentity)> = None;
    for (key, message) in candidates {
        let vector = SystemIdentity::from_announce(&message);
        match &best {
            Some((_, _, best_vector)) if !vector.is_better_than(best_vector) => {}
            _ => best = Some((key, message, vector)),
        }
    }
    best.map(|(key, message, _)| (key, message))
}
