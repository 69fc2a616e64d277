use std::{collections::HashMap, sync::Mutex, time::Duration};

use chrono::{DateTime, Utc};

use crate::domain::UserId;

// ============== Authorization ==============

/// An empty allow-list admits nobody.
pub fn is_authorized(user_id: Option<UserId>, allowed_users: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    if allowed_users.is_empty() {
        return false;
    }
    allowed_users.contains(&user_id.0)
}

// ============== Cooldown ==============

/// Minimum spacing between privileged actions of the same requester.
///
/// Stores, per requester, the earliest time the next action is allowed.
/// Entries are overwritten, never removed.
#[derive(Debug)]
pub struct CooldownTracker {
    window: Duration,
    not_before: Mutex<HashMap<UserId, DateTime<Utc>>>,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            not_before: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn allow(&self, user_id: UserId) -> bool {
        self.allow_at(user_id, Utc::now())
    }

    /// Check and arm the cooldown in one step under the lock.
    pub fn allow_at(&self, user_id: UserId, now: DateTime<Utc>) -> bool {
        let mut map = self.not_before.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(next) = map.get(&user_id) {
            if now < *next {
                return false;
            }
        }
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::zero());
        map.insert(user_id, now + window);
        true
    }

    /// Time left until `user_id` may act again, if any.
    pub fn retry_after(&self, user_id: UserId) -> Option<Duration> {
        self.retry_after_at(user_id, Utc::now())
    }

    pub fn retry_after_at(&self, user_id: UserId, now: DateTime<Utc>) -> Option<Duration> {
        let map = self.not_before.lock().unwrap_or_else(|e| e.into_inner());
        let next = map.get(&user_id)?;
        (*next - now).to_std().ok().filter(|d| !d.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_blocks_within_window_then_reopens() {
        let t = CooldownTracker::new(Duration::from_secs(30));
        let u = UserId(7);
        let start = Utc::now();

        assert!(t.allow_at(u, start));
        assert!(!t.allow_at(u, start + chrono::Duration::seconds(10)));
        assert!(!t.allow_at(u, start + chrono::Duration::seconds(29)));
        assert!(t.allow_at(u, start + chrono::Duration::seconds(30)));
    }

    #[test]
    fn rejected_attempts_do_not_extend_the_window() {
        let t = CooldownTracker::new(Duration::from_secs(30));
        let u = UserId(1);
        let start = Utc::now();

        assert!(t.allow_at(u, start));
        assert!(!t.allow_at(u, start + chrono::Duration::seconds(20)));
        assert!(t.allow_at(u, start + chrono::Duration::seconds(31)));
    }

    #[test]
    fn requesters_are_independent() {
        let t = CooldownTracker::new(Duration::from_secs(30));
        let now = Utc::now();
        assert!(t.allow_at(UserId(1), now));
        assert!(t.allow_at(UserId(2), now));
        assert!(!t.allow_at(UserId(1), now));
    }

    #[test]
    fn retry_after_reports_remaining_time() {
        let t = CooldownTracker::new(Duration::from_secs(30));
        let u = UserId(3);
        let now = Utc::now();
        assert_eq!(t.retry_after_at(u, now), None);
        t.allow_at(u, now);
        assert_eq!(
            t.retry_after_at(u, now + chrono::Duration::seconds(12)),
            Some(Duration::from_secs(18))
        );
        assert_eq!(t.retry_after_at(u, now + chrono::Duration::seconds(40)), None);
    }

    #[test]
    fn concurrent_requests_admit_exactly_one() {
        let t = std::sync::Arc::new(CooldownTracker::new(Duration::from_secs(30)));
        let now = Utc::now();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = t.clone();
                std::thread::spawn(move || t.allow_at(UserId(9), now))
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }

    #[test]
    fn authorization_allow_list() {
        assert!(!is_authorized(Some(UserId(5)), &[]));
        assert!(is_authorized(Some(UserId(5)), &[5, 6]));
        assert!(!is_authorized(Some(UserId(4)), &[5, 6]));
        assert!(!is_authorized(None, &[]));
    }
}
