use super::{
    document_state_machine::LEASE_EXPIRED_CODE,
    errors::{StateMachineError, StateMachineResult},
    events::OperationEvent,
    states::OperationState,
    StateTransition,
};
use crate::models::{ErrorEntry, OperationRecord};
use chrono::Utc;

/// Transition table for QUERY/EVENT/VOID sub-records.
///
/// Mirrors the document machine without cancellation; a successful VOID
/// cancels the parent document separately.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationStateMachine;

impl OperationStateMachine {
    pub fn determine_target_state(
        current_state: OperationState,
        event: &OperationEvent,
    ) -> StateMachineResult<OperationState> {
        let target = match (current_state, event) {
            (OperationState::Pending, OperationEvent::Start) => OperationState::Processing,
            (OperationState::Error, OperationEvent::Start) => OperationState::Processing,

            (OperationState::Processing, OperationEvent::Succeed { .. }) => {
                OperationState::Succeeded
            }
            (OperationState::Processing, OperationEvent::Reject { .. }) => {
                OperationState::Rejected
            }
            (OperationState::Processing, OperationEvent::Fail { .. }) => OperationState::Error,
            (OperationState::Processing, OperationEvent::Abandon { .. }) => {
                OperationState::Error
            }

            (OperationState::Error, OperationEvent::Reject { .. }) => OperationState::Rejected,
            (OperationState::Error, OperationEvent::DeadLetter { .. }) => {
                OperationState::DeadLettered
            }

            (OperationState::Pending, OperationEvent::Expire { .. }) => {
                OperationState::DeadLettered
            }
            (OperationState::Error, OperationEvent::Expire { .. }) => {
                OperationState::DeadLettered
            }

            (from_state, _) => {
                return Err(StateMachineError::invalid_transition(
                    from_state,
                    event.event_type(),
                ))
            }
        };

        Ok(target)
    }

    pub fn apply(
        record: &mut OperationRecord,
        event: &OperationEvent,
    ) -> StateMachineResult<StateTransition<OperationState>> {
        let from = record.state;
        let to = Self::determine_target_state(from, event)?;

        match event {
            OperationEvent::Start => {
                record.attempt_count += 1;
                record.next_attempt_at = None;
            }
            OperationEvent::Succeed {
                protocol_number,
                response,
            } => {
                record.protocol_number = protocol_number.clone();
                record.response = response.clone();
            }
            OperationEvent::Reject { code, message } => {
                if from == OperationState::Processing {
                    record
                        .errors
                        .push(ErrorEntry::new(record.attempt_count, code.clone(), message));
                }
                record.next_attempt_at = None;
            }
            OperationEvent::Fail {
                code,
                message,
                retry_at,
            } => {
                record
                    .errors
                    .push(ErrorEntry::new(record.attempt_count, code.clone(), message));
                record.next_attempt_at = *retry_at;
            }
            OperationEvent::Abandon { attempts, reason } => {
                record.attempt_count = record.attempt_count.max(*attempts);
                record.errors.push(ErrorEntry::new(
                    record.attempt_count,
                    Some(LEASE_EXPIRED_CODE.to_string()),
                    reason,
                ));
                record.next_attempt_at = None;
            }
            OperationEvent::DeadLetter { reason } | OperationEvent::Expire { reason } => {
                record.dead_letter_reason = Some(reason.clone());
                record.next_attempt_at = None;
            }
        }

        record.state = to;
        record.updated_at = Utc::now();

        Ok(StateTransition {
            from,
            to,
            event: event.event_type(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CorrelationId, Operation, Priority};

    #[test]
    fn test_operation_retry_cycle() {
        let mut record = OperationRecord::pending(CorrelationId::new(), Operation::Query, Priority::Low);

        OperationStateMachine::apply(&mut record, &OperationEvent::Start).unwrap();
        OperationStateMachine::apply(
            &mut record,
            &OperationEvent::Fail {
                code: None,
                message: "authority unavailable".to_string(),
                retry_at: None,
            },
        )
        .unwrap();
        OperationStateMachine::apply(&mut record, &OperationEvent::Start).unwrap();
        let transition = OperationStateMachine::apply(
            &mut record,
            &OperationEvent::Succeed {
                protocol_number: None,
                response: Some("100 - Autorizado o uso da NF-e".to_string()),
            },
        )
        .unwrap();

        assert_eq!(transition.to, OperationState::Succeeded);
        assert_eq!(record.attempt_count, 2);
        assert_eq!(record.errors.len(), 1);
    }

    #[test]
    fn test_terminal_operations_reject_further_events() {
        for state in [
            OperationState::Succeeded,
            OperationState::Rejected,
            OperationState::DeadLettered,
        ] {
            for event in [
                OperationEvent::Start,
                OperationEvent::DeadLetter {
                    reason: "late".to_string(),
                },
            ] {
                assert!(OperationStateMachine::determine_target_state(state, &event).is_err());
            }
        }
    }
}
