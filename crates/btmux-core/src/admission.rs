//! Priority-based admission control.
//!
//! The admission controller is a pure decision function: it never mutates
//! the store, and its verdict is advisory. The caller evicts the named
//! session itself and must re-check that the candidate still exists, since
//! it may have disconnected between the decision and the eviction.

use crate::session::Session;
use btmux_types::Priority;

/// Maximum number of simultaneous device sessions.
pub const MAX_SESSIONS: usize = 7;

/// Verdict on a new connection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// A free slot exists; create the session.
    Admit,
    /// At capacity, but the named session is strictly lower priority than
    /// the request. Evict it, then create the session.
    AdmitAfterEviction { evicted_address: String },
    /// At capacity and every active session is at least as important as the
    /// request. Eviction must never reduce total system priority.
    Reject,
}

/// Decides whether a request at `new_priority` may occupy a slot given the
/// current active sessions.
///
/// Eviction policy: the candidate is the session with the numerically
/// largest priority ordinal (lowest actual priority); ties are broken by
/// oldest `connected_at`. The request is rejected unless it is strictly
/// higher priority than the candidate.
///
/// Note: the tie-break and the strictly-higher rule are the contract here;
/// if product requirements ever call for a different policy this is the
/// single place to change it.
pub fn decide(active: &[Session], new_priority: Priority) -> AdmissionDecision {
    decide_with_capacity(active, new_priority, MAX_SESSIONS)
}

/// Same as [`decide`], with an explicit capacity (the store's configured
/// maximum may differ from the default in tests).
pub fn decide_with_capacity(
    active: &[Session],
    new_priority: Priority,
    max_sessions: usize,
) -> AdmissionDecision {
    if active.len() < max_sessions {
        return AdmissionDecision::Admit;
    }

    let candidate = active
        .iter()
        .max_by(|a, b| {
            a.priority
                .ordinal()
                .cmp(&b.priority.ordinal())
                // Equal priority: prefer evicting the oldest connection.
                .then_with(|| b.connected_at.cmp(&a.connected_at))
        });

    match candidate {
        Some(victim) if new_priority.ordinal() < victim.priority.ordinal() => {
            AdmissionDecision::AdmitAfterEviction {
                evicted_address: victim.address.clone(),
            }
        }
        _ => AdmissionDecision::Reject,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btmux_types::{DeviceClass, TransportKind};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn session(address: &str, priority: Priority, connected_secs: i64) -> Session {
        Session::new(
            address,
            priority,
            DeviceClass::GenericIot,
            TransportKind::Ble,
            at(connected_secs),
        )
    }

    #[test]
    fn test_admit_under_capacity() {
        let active = vec![session("a", Priority::Low, 0)];
        assert_eq!(decide(&active, Priority::Low), AdmissionDecision::Admit);
    }

    #[test]
    fn test_full_store_evicts_oldest_lowest_priority() {
        // Priorities [0,1,1,2,2,3,3]; new request at priority 1 must target
        // the oldest of the two priority-3 sessions.
        let ordinals = [0u8, 1, 1, 2, 2, 3, 3];
        let active: Vec<Session> = ordinals
            .iter()
            .enumerate()
            .map(|(i, &p)| session(&format!("dev-{i}"), Priority::from_ordinal(p), i as i64))
            .collect();

        let decision = decide(&active, Priority::High);
        assert_eq!(
            decision,
            AdmissionDecision::AdmitAfterEviction {
                evicted_address: "dev-5".to_string()
            }
        );
    }

    #[test]
    fn test_reject_when_not_strictly_higher() {
        // All seven slots hold priority <= 2; a new priority-3 request must
        // be rejected.
        let active: Vec<Session> = (0..7)
            .map(|i| session(&format!("dev-{i}"), Priority::Medium, i))
            .collect();
        assert_eq!(decide(&active, Priority::Low), AdmissionDecision::Reject);

        // Equal priority is also a rejection: eviction must be a strict win.
        assert_eq!(decide(&active, Priority::Medium), AdmissionDecision::Reject);
    }

    #[test]
    fn test_equal_priority_tie_break_by_age() {
        let mut active: Vec<Session> = (0..7)
            .map(|i| session(&format!("dev-{i}"), Priority::Low, 10 - i))
            .collect();
        // dev-6 connected earliest (secs 4), so it is the eviction target.
        active.rotate_left(3); // order in the slice must not matter
        let decision = decide(&active, Priority::Critical);
        assert_eq!(
            decision,
            AdmissionDecision::AdmitAfterEviction {
                evicted_address: "dev-6".to_string()
            }
        );
    }

    #[test]
    fn test_never_exceeds_capacity_over_any_sequence() {
        // Replay a mixed admit/evict sequence and check the count bound.
        let mut active: Vec<Session> = Vec::new();
        let requests = [3u8, 2, 1, 0, 3, 2, 1, 0, 3, 2, 1, 0, 1, 2, 3];
        for (i, &ordinal) in requests.iter().enumerate() {
            let priority = Priority::from_ordinal(ordinal);
            match decide(&active, priority) {
                AdmissionDecision::Admit => {
                    active.push(session(&format!("req-{i}"), priority, i as i64));
                }
                AdmissionDecision::AdmitAfterEviction { evicted_address } => {
                    active.retain(|s| s.address != evicted_address);
                    active.push(session(&format!("req-{i}"), priority, i as i64));
                }
                AdmissionDecision::Reject => {}
            }
            assert!(active.len() <= MAX_SESSIONS);
        }
    }
}
