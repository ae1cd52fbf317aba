// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the due-time schedule, the ready queue and work-key
//! hashing.

#[cfg(test)]
mod tests {
    use crate::scheduler::{account_hash, ReadyQueue, Schedule, WorkKey};
    use crate::zones::ZoneId;
    use std::time::Duration;
    use tokio::time::Instant;

    fn work(account: &str, zone: &str) -> WorkKey {
        WorkKey {
            account: account.to_string(),
            zone: ZoneId::new(zone),
        }
    }

    #[tokio::test]
    async fn test_schedule_orders_by_due_time() {
        let schedule: Schedule<&str> = Schedule::new();
        let now = Instant::now();
        schedule.schedule_at("late", now + Duration::from_secs(10));
        schedule.schedule_at("early", now + Duration::from_secs(1));

        assert_eq!(schedule.next_due(), Some(now + Duration::from_secs(1)));
        assert_eq!(schedule.len(), 2);
    }

    #[tokio::test]
    async fn test_pop_due_returns_all_expired() {
        let schedule: Schedule<&str> = Schedule::new();
        let now = Instant::now();
        schedule.schedule_at("a", now - Duration::from_secs(2));
        schedule.schedule_at("b", now - Duration::from_secs(1));
        schedule.schedule_at("c", now + Duration::from_secs(60));

        let due = schedule.pop_due(now);
        assert_eq!(due, vec!["a", "b"]);
        assert_eq!(schedule.len(), 1);
    }

    #[tokio::test]
    async fn test_relocation_moves_entry() {
        let schedule: Schedule<&str> = Schedule::new();
        let now = Instant::now();
        schedule.schedule_at("zone", now + Duration::from_secs(60));
        // relocate earlier
        schedule.schedule_at("zone", now + Duration::from_secs(1));
        assert_eq!(schedule.len(), 1, "relocation must not duplicate the key");
        assert_eq!(schedule.next_due(), Some(now + Duration::from_secs(1)));

        // relocate later
        schedule.schedule_at("zone", now + Duration::from_secs(120));
        assert_eq!(schedule.next_due(), Some(now + Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn test_cancel() {
        let schedule: Schedule<&str> = Schedule::new();
        let now = Instant::now();
        schedule.schedule_at("zone", now + Duration::from_secs(5));
        assert!(schedule.cancel(&"zone"));
        assert!(!schedule.cancel(&"zone"));
        assert!(schedule.is_empty());
    }

    #[test]
    fn test_ready_queue_orders_by_provider_priority() {
        let ready = ReadyQueue::new();
        ready.push(1, work("secondary", "Z3"));
        ready.push(0, work("primary", "Z1"));
        ready.push(0, work("primary", "Z2"));

        assert_eq!(ready.pop(), Some(work("primary", "Z1")));
        assert_eq!(ready.pop(), Some(work("primary", "Z2")));
        assert_eq!(ready.pop(), Some(work("secondary", "Z3")));
        assert_eq!(ready.pop(), None);
    }

    #[test]
    fn test_ready_queue_fifo_within_priority() {
        let ready = ReadyQueue::new();
        for zone in ["Za", "Zb", "Zc"] {
            ready.push(2, work("acct", zone));
        }
        let drained: Vec<String> = std::iter::from_fn(|| ready.pop())
            .map(|key| key.zone.to_string())
            .collect();
        assert_eq!(drained, vec!["Za", "Zb", "Zc"]);
    }

    #[test]
    fn test_account_hash_stable_and_distinct() {
        let a = account_hash("prod", "aws-route53");
        let b = account_hash("prod", "aws-route53");
        let c = account_hash("staging", "aws-route53");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }
}
