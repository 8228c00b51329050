//! # Queue Router
//!
//! Deterministic (operation, priority) → queue lookup, seeded once from
//! configuration. Pairs absent from the route table fail with
//! `RoutingNotFound`; nothing ever falls back to a default queue.

use super::descriptor::QueueDescriptor;
use super::profile::PriorityProfile;
use crate::config::{PrioritiesConfig, QueuesConfig};
use crate::error::{FiscalError, FiscalResult};
use crate::models::{Operation, Priority};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct QueueRouter {
    routes: HashMap<(Operation, Priority), QueueDescriptor>,
    dead_letters: HashMap<Operation, QueueDescriptor>,
    profiles: HashMap<Priority, PriorityProfile>,
}

impl QueueRouter {
    pub fn from_config(queues: &QueuesConfig, priorities: &PrioritiesConfig) -> Self {
        let mut routes = HashMap::new();
        let mut dead_letters = HashMap::new();

        for operation in Operation::ALL {
            for priority in queues.routes.for_operation(operation) {
                routes.insert(
                    (operation, *priority),
                    QueueDescriptor::work(
                        &queues.prefix,
                        &queues.exchange,
                        queues.durable,
                        operation,
                        *priority,
                    ),
                );
            }
            dead_letters.insert(
                operation,
                QueueDescriptor::dead_letter(
                    &queues.prefix,
                    &queues.dead_letter_exchange,
                    queues.durable,
                    operation,
                ),
            );
        }

        let profiles = Priority::ALL
            .iter()
            .map(|p| (*p, PriorityProfile::from_config(*p, priorities.for_priority(*p))))
            .collect();

        Self {
            routes,
            dead_letters,
            profiles,
        }
    }

    pub fn resolve(&self, operation: Operation, priority: Priority) -> FiscalResult<&QueueDescriptor> {
        self.routes
            .get(&(operation, priority))
            .ok_or(FiscalError::RoutingNotFound {
                operation,
                priority,
            })
    }

    pub fn profile_for(&self, priority: Priority) -> &PriorityProfile {
        // Every tier is seeded in `from_config`
        &self.profiles[&priority]
    }

    pub fn dead_letter_for(&self, operation: Operation) -> &QueueDescriptor {
        &self.dead_letters[&operation]
    }

    /// Every work queue, highest priority first
    pub fn work_queues(&self) -> Vec<&QueueDescriptor> {
        let mut queues: Vec<&QueueDescriptor> = self.routes.values().collect();
        queues.sort_by(|a, b| {
            b.priority()
                .cmp(&a.priority())
                .then_with(|| a.operation().cmp(&b.operation()))
        });
        queues
    }

    /// Every queue the transport must declare, work queues first
    pub fn descriptors(&self) -> Vec<&QueueDescriptor> {
        let mut all = self.work_queues();
        let mut dead: Vec<&QueueDescriptor> = self.dead_letters.values().collect();
        dead.sort_by_key(|d| d.operation());
        all.extend(dead);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FiscalConfig;
    use std::time::Duration;

    fn router() -> QueueRouter {
        let config = FiscalConfig::default();
        QueueRouter::from_config(&config.queues, &config.priorities)
    }

    #[test]
    fn test_resolve_builds_deterministic_names() {
        let router = router();
        let descriptor = router.resolve(Operation::Emit, Priority::High).unwrap();
        assert_eq!(descriptor.queue_name, "fiscal.emit.high");
        assert_eq!(descriptor.routing_key, "emit.high");
        assert_eq!(descriptor.exchange, "fiscal.direct");
        assert!(descriptor.durable);
        assert!(!descriptor.auto_delete);
    }

    #[test]
    fn test_unknown_pair_is_not_defaulted() {
        let router = router();
        let err = router.resolve(Operation::Query, Priority::High).unwrap_err();
        assert!(matches!(
            err,
            FiscalError::RoutingNotFound {
                operation: Operation::Query,
                priority: Priority::High
            }
        ));
    }

    #[test]
    fn test_only_dead_letter_queues_auto_delete() {
        let router = router();
        for descriptor in router.descriptors() {
            assert_eq!(descriptor.auto_delete, descriptor.is_dead_letter());
        }
        let dlq = router.dead_letter_for(Operation::Void);
        assert_eq!(dlq.queue_name, "fiscal.void.dlq");
        assert_eq!(dlq.exchange, "fiscal.dlx");
        assert_eq!(dlq.routing_key, "void.dead");
    }

    #[test]
    fn test_higher_tiers_get_more_concurrency_and_shorter_ttl() {
        let router = router();
        let high = router.profile_for(Priority::High);
        let normal = router.profile_for(Priority::Normal);
        let low = router.profile_for(Priority::Low);
        assert!(high.max_concurrency > normal.max_concurrency);
        assert!(normal.max_concurrency > low.max_concurrency);
        assert!(high.ttl < normal.ttl && normal.ttl < low.ttl);
        assert!(high.invocation_timeout < low.invocation_timeout);
        assert_eq!(high.invocation_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_work_queues_are_ordered_by_priority() {
        let router = router();
        let priorities: Vec<Priority> = router
            .work_queues()
            .iter()
            .filter_map(|d| d.priority())
            .collect();
        let mut sorted = priorities.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(priorities, sorted);
        assert_eq!(router.descriptors().len(), router.work_queues().len() + 4);
    }
}
