use crate::models::Liveness;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LivenessTransition {
    /// first heartbeat ever recorded for the device
    FirstSeen,
    /// the gap since the previous heartbeat exceeded the offline limit,
    /// the previous online streak is discarded
    StreakReset { gap: i64 },
    Continued,
}

/// Computes the liveness record after a heartbeat received at `now`.
///
/// A gap equal to `offline_limit` still counts as online; only a strictly
/// larger gap resets the streak.
pub fn advance(prev: Liveness, now: i64, offline_limit: i64) -> (Liveness, LivenessTransition) {
    if prev.last_heartbeat == 0 {
        let next = Liveness {
            first_heartbeat: now,
            last_heartbeat: now,
        };
        return (next, LivenessTransition::FirstSeen);
    }
    let gap = now - prev.last_heartbeat;
    if gap > offline_limit {
        let next = Liveness {
            first_heartbeat: now,
            last_heartbeat: now,
        };
        return (next, LivenessTransition::StreakReset { gap });
    }
    // rows migrated from the old schema may carry last without first
    let first_heartbeat = if prev.first_heartbeat == 0 {
        prev.last_heartbeat
    } else {
        prev.first_heartbeat
    };
    let next = Liveness {
        first_heartbeat,
        last_heartbeat: now.max(prev.last_heartbeat),
    };
    (next, LivenessTransition::Continued)
}
