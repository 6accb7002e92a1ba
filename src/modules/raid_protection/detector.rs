use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serenity::all::{GuildId, UserId};
use std::collections::VecDeque;

/// A pruned trailing window of event timestamps with a fired latch so a
/// saturated window reports a burst exactly once. The latch resets once
/// pruning takes the window back below the threshold.
#[derive(Debug, Default)]
struct Window {
    timestamps: VecDeque<DateTime<Utc>>,
    fired: bool,
}

impl Window {
    fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        while let Some(front) = self.timestamps.front() {
            if now.signed_duration_since(*front) >= window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn record(&mut self, now: DateTime<Utc>, window: Duration, threshold: usize) -> bool {
        self.prune(now, window);
        self.timestamps.push_back(now);

        if self.timestamps.len() >= threshold {
            if !self.fired {
                self.fired = true;
                return true;
            }
            return false;
        }

        self.fired = false;
        false
    }

    fn len(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        self.prune(now, window);
        self.timestamps.len()
    }
}

/// Sliding-window burst detection over guild joins and per-author messages.
///
/// Append-and-check is a synchronous critical section per map entry; callers
/// must not hold a returned guard across an await (none is exposed).
#[derive(Default)]
pub struct BurstDetector {
    joins: DashMap<GuildId, Window>,
    messages: DashMap<(GuildId, UserId), Window>,
}

impl BurstDetector {
    /// Records a member join. Returns `true` exactly once per burst, when
    /// the pruned window first reaches `threshold`.
    pub fn record_join(
        &self,
        guild_id: GuildId,
        now: DateTime<Utc>,
        threshold: usize,
        window: Duration,
    ) -> bool {
        self.joins
            .entry(guild_id)
            .or_default()
            .record(now, window, threshold)
    }

    /// Records a message from `author_id`. Same burst semantics as joins,
    /// keyed per (guild, author).
    pub fn record_message(
        &self,
        guild_id: GuildId,
        author_id: UserId,
        now: DateTime<Utc>,
        threshold: usize,
        window: Duration,
    ) -> bool {
        self.messages
            .entry((guild_id, author_id))
            .or_default()
            .record(now, window, threshold)
    }

    /// Current pruned join-window size for a guild.
    pub fn join_window_len(&self, guild_id: GuildId, now: DateTime<Utc>, window: Duration) -> usize {
        self.joins
            .get_mut(&guild_id)
            .map(|mut w| w.len(now, window))
            .unwrap_or(0)
    }

    /// Evicts windows that are empty after pruning against `retention`.
    /// Keeps the maps from accumulating an entry per guild/author forever.
    pub fn sweep(&self, now: DateTime<Utc>, retention: Duration) {
        self.joins.retain(|_, w| {
            w.prune(now, retention);
            !w.timestamps.is_empty()
        });
        self.messages.retain(|_, w| {
            w.prune(now, retention);
            !w.timestamps.is_empty()
        });
    }

    /// Number of tracked windows, for the stats surface.
    pub fn tracked_windows(&self) -> usize {
        self.joins.len() + self.messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn secs(n: i64) -> Duration {
        Duration::seconds(n)
    }

    fn guild() -> GuildId {
        GuildId::new(1000)
    }

    #[test]
    fn below_threshold_never_reports() {
        let detector = BurstDetector::default();

        for i in 0..4 {
            let fired = detector.record_join(guild(), t0() + secs(i), 5, secs(10));
            assert!(!fired, "join {} should not report a burst", i);
        }
    }

    #[test]
    fn burst_reports_exactly_once_at_threshold() {
        let detector = BurstDetector::default();

        for i in 0..4 {
            assert!(!detector.record_join(guild(), t0() + secs(i), 5, secs(10)));
        }

        // Fifth join within the window trips the threshold.
        assert!(detector.record_join(guild(), t0() + secs(4), 5, secs(10)));

        // The window stays saturated; no re-report.
        assert!(!detector.record_join(guild(), t0() + secs(5), 5, secs(10)));
        assert!(!detector.record_join(guild(), t0() + secs(6), 5, secs(10)));
    }

    #[test]
    fn latch_resets_once_window_drains() {
        let detector = BurstDetector::default();

        for i in 0..5 {
            detector.record_join(guild(), t0() + secs(i), 5, secs(10));
        }

        // Much later everything has aged out; a fresh burst reports again.
        let later = t0() + secs(60);
        for i in 0..4 {
            assert!(!detector.record_join(guild(), later + secs(i), 5, secs(10)));
        }
        assert!(detector.record_join(guild(), later + secs(4), 5, secs(10)));
    }

    #[test]
    fn stale_entries_are_evicted_from_the_window() {
        let detector = BurstDetector::default();

        for _ in 0..5 {
            detector.record_join(guild(), t0(), 6, secs(10));
        }

        // 11 seconds later, all five joins have aged out.
        assert_eq!(detector.join_window_len(guild(), t0() + secs(11), secs(10)), 0);
    }

    #[test]
    fn events_straddling_the_window_boundary_do_not_combine() {
        let detector = BurstDetector::default();

        for _ in 0..4 {
            assert!(!detector.record_join(guild(), t0(), 5, secs(10)));
        }

        // The fifth event arrives after the first four aged out.
        assert!(!detector.record_join(guild(), t0() + secs(11), 5, secs(10)));
        assert_eq!(detector.join_window_len(guild(), t0() + secs(11), secs(10)), 1);
    }

    #[test]
    fn message_windows_are_per_author() {
        let detector = BurstDetector::default();
        let spammer = UserId::new(1);
        let bystander = UserId::new(2);

        for i in 0..4 {
            assert!(!detector.record_message(guild(), spammer, t0() + secs(i), 5, secs(5)));
            assert!(!detector.record_message(guild(), bystander, t0() + secs(i), 5, secs(5)));
        }

        assert!(detector.record_message(guild(), spammer, t0() + secs(4), 5, secs(5)));
        // The bystander's window is independent and already pruned down.
        assert!(!detector.record_message(guild(), bystander, t0() + secs(9), 5, secs(5)));
    }

    #[test]
    fn sweep_drops_empty_windows() {
        let detector = BurstDetector::default();

        detector.record_join(guild(), t0(), 5, secs(10));
        detector.record_message(guild(), UserId::new(1), t0(), 5, secs(5));
        assert_eq!(detector.tracked_windows(), 2);

        detector.sweep(t0() + secs(601), secs(600));
        assert_eq!(detector.tracked_windows(), 0);
    }
}
