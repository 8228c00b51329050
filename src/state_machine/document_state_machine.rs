use super::{
    errors::{StateMachineError, StateMachineResult},
    events::DocumentEvent,
    states::DocumentState,
    StateTransition,
};
use crate::models::{DocumentStatusRecord, ErrorEntry};
use chrono::Utc;

/// Error code recorded for an attempt whose worker disappeared
pub const LEASE_EXPIRED_CODE: &str = "lease_expired";

/// Transition table and field effects for [`DocumentStatusRecord`].
///
/// Pure and synchronous: the status store wraps `apply` in its atomic
/// read-modify-write, so the machine never touches storage itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentStateMachine;

impl DocumentStateMachine {
    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: DocumentState,
        event: &DocumentEvent,
    ) -> StateMachineResult<DocumentState> {
        let target = match (current_state, event) {
            // Pick-up and retry
            (DocumentState::Pending, DocumentEvent::Start) => DocumentState::Processing,
            (DocumentState::Error, DocumentEvent::Start) => DocumentState::Processing,

            // Authority outcomes
            (DocumentState::Processing, DocumentEvent::Authorize { .. }) => {
                DocumentState::Authorized
            }
            (DocumentState::Processing, DocumentEvent::Reject { .. }) => DocumentState::Rejected,
            (DocumentState::Processing, DocumentEvent::Fail { .. }) => DocumentState::Error,
            (DocumentState::Processing, DocumentEvent::Abandon { .. }) => DocumentState::Error,

            // Exhaustion
            (DocumentState::Error, DocumentEvent::Reject { .. }) => DocumentState::Rejected,
            (DocumentState::Error, DocumentEvent::DeadLetter { .. }) => {
                DocumentState::DeadLettered
            }

            // Expiry before any worker could finish the attempt
            (DocumentState::Pending, DocumentEvent::Expire { .. }) => DocumentState::DeadLettered,
            (DocumentState::Error, DocumentEvent::Expire { .. }) => DocumentState::DeadLettered,

            (DocumentState::Authorized, DocumentEvent::Cancel { .. }) => DocumentState::Cancelled,

            (from_state, _) => {
                return Err(StateMachineError::invalid_transition(
                    from_state,
                    event.event_type(),
                ))
            }
        };

        Ok(target)
    }

    /// Apply `event` to `record`, mutating state and the audit fields.
    ///
    /// On error the record is left untouched.
    pub fn apply(
        record: &mut DocumentStatusRecord,
        event: &DocumentEvent,
    ) -> StateMachineResult<StateTransition<DocumentState>> {
        let from = record.state;
        let to = Self::determine_target_state(from, event)?;
        let now = Utc::now();

        match event {
            DocumentEvent::Start => {
                record.attempt_count += 1;
                record.next_attempt_at = None;
            }
            DocumentEvent::Authorize {
                protocol_number,
                authorized_xml,
            } => {
                record.protocol_number = Some(protocol_number.clone());
                record.authorized_xml = authorized_xml.clone();
                record.authorized_at = Some(now);
            }
            DocumentEvent::Reject { code, message } => {
                // Exhaustion from ERROR already recorded the failure
                if from == DocumentState::Processing {
                    record
                        .errors
                        .push(ErrorEntry::new(record.attempt_count, code.clone(), message));
                }
                record.next_attempt_at = None;
            }
            DocumentEvent::Fail {
                code,
                message,
                retry_at,
            } => {
                record
                    .errors
                    .push(ErrorEntry::new(record.attempt_count, code.clone(), message));
                record.next_attempt_at = *retry_at;
            }
            DocumentEvent::Abandon { attempts, reason } => {
                record.attempt_count = record.attempt_count.max(*attempts);
                record.errors.push(ErrorEntry::new(
                    record.attempt_count,
                    Some(LEASE_EXPIRED_CODE.to_string()),
                    reason,
                ));
                record.next_attempt_at = None;
            }
            DocumentEvent::DeadLetter { reason } | DocumentEvent::Expire { reason } => {
                record.dead_letter_reason = Some(reason.clone());
                record.next_attempt_at = None;
            }
            DocumentEvent::Cancel { reason } => {
                record.cancellation_reason = Some(reason.clone());
                record.cancelled_at = Some(now);
            }
        }

        record.state = to;
        record.updated_at = now;

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
    use crate::models::{AccessKey, CorrelationId, DocumentDraft, Priority, TenantId};

    fn pending_record() -> DocumentStatusRecord {
        let draft = DocumentDraft {
            access_key: AccessKey::parse("35241012345678000195550010000000021876543219").unwrap(),
            document_number: 2,
            series: 1,
            issued_at: Utc::now(),
            submitted_xml: "<NFe/>".to_string(),
        };
        DocumentStatusRecord::pending(
            TenantId::new("acme"),
            draft,
            CorrelationId::new(),
            Priority::Normal,
        )
    }

    fn fail() -> DocumentEvent {
        DocumentEvent::Fail {
            code: None,
            message: "connection reset".to_string(),
            retry_at: None,
        }
    }

    fn sample_events() -> Vec<DocumentEvent> {
        vec![
            DocumentEvent::Start,
            DocumentEvent::Authorize {
                protocol_number: "135240000000001".to_string(),
                authorized_xml: None,
            },
            DocumentEvent::Reject {
                code: Some("539".to_string()),
                message: "duplicate".to_string(),
            },
            fail(),
            DocumentEvent::Abandon {
                attempts: 2,
                reason: "lease lapsed".to_string(),
            },
            DocumentEvent::DeadLetter {
                reason: "exhausted".to_string(),
            },
            DocumentEvent::Expire {
                reason: "expired".to_string(),
            },
            DocumentEvent::Cancel {
                reason: "customer gave up the purchase".to_string(),
            },
        ]
    }

    #[test]
    fn test_transition_table_is_exhaustive() {
        let allowed = [
            (DocumentState::Pending, "start", DocumentState::Processing),
            (DocumentState::Error, "start", DocumentState::Processing),
            (DocumentState::Processing, "authorize", DocumentState::Authorized),
            (DocumentState::Processing, "reject", DocumentState::Rejected),
            (DocumentState::Processing, "fail", DocumentState::Error),
            (DocumentState::Processing, "abandon", DocumentState::Error),
            (DocumentState::Error, "reject", DocumentState::Rejected),
            (DocumentState::Error, "dead_letter", DocumentState::DeadLettered),
            (DocumentState::Pending, "expire", DocumentState::DeadLettered),
            (DocumentState::Error, "expire", DocumentState::DeadLettered),
            (DocumentState::Authorized, "cancel", DocumentState::Cancelled),
        ];

        for state in DocumentState::ALL {
            for event in sample_events() {
                let expected = allowed
                    .iter()
                    .find(|(from, name, _)| *from == state && *name == event.event_type())
                    .map(|(_, _, to)| *to);
                let result = DocumentStateMachine::determine_target_state(state, &event);
                match expected {
                    Some(to) => assert_eq!(result.unwrap(), to),
                    None => assert!(
                        matches!(result, Err(StateMachineError::InvalidTransition { .. })),
                        "{state} on {} should be rejected",
                        event.event_type()
                    ),
                }
            }
        }
    }

    #[test]
    fn test_start_consumes_attempt_and_clears_schedule() {
        let mut record = pending_record();
        DocumentStateMachine::apply(&mut record, &DocumentEvent::Start).unwrap();
        DocumentStateMachine::apply(
            &mut record,
            &DocumentEvent::Fail {
                code: None,
                message: "timeout".to_string(),
                retry_at: Some(Utc::now()),
            },
        )
        .unwrap();
        assert!(record.next_attempt_at.is_some());

        DocumentStateMachine::apply(&mut record, &DocumentEvent::Start).unwrap();
        assert_eq!(record.attempt_count, 2);
        assert!(record.next_attempt_at.is_none());
        assert_eq!(record.errors.len(), 1);
        assert_eq!(record.errors[0].attempt, 1);
    }

    #[test]
    fn test_exhaustion_does_not_duplicate_error_entries() {
        let mut record = pending_record();
        DocumentStateMachine::apply(&mut record, &DocumentEvent::Start).unwrap();
        DocumentStateMachine::apply(&mut record, &fail()).unwrap();
        let transition = DocumentStateMachine::apply(
            &mut record,
            &DocumentEvent::DeadLetter {
                reason: "retries exhausted".to_string(),
            },
        )
        .unwrap();

        assert_eq!(transition.from, DocumentState::Error);
        assert_eq!(transition.to, DocumentState::DeadLettered);
        assert_eq!(record.errors.len(), 1);
        assert_eq!(record.dead_letter_reason.as_deref(), Some("retries exhausted"));
    }

    #[test]
    fn test_abandon_raises_attempts_to_deliveries_seen() {
        let mut record = pending_record();
        DocumentStateMachine::apply(&mut record, &DocumentEvent::Start).unwrap();
        DocumentStateMachine::apply(
            &mut record,
            &DocumentEvent::Abandon {
                attempts: 4,
                reason: "visibility lease lapsed".to_string(),
            },
        )
        .unwrap();

        assert_eq!(record.state, DocumentState::Error);
        assert_eq!(record.attempt_count, 4);
        assert_eq!(record.errors[0].code.as_deref(), Some(LEASE_EXPIRED_CODE));

        // Never lowers the counter
        DocumentStateMachine::apply(&mut record, &DocumentEvent::Start).unwrap();
        DocumentStateMachine::apply(
            &mut record,
            &DocumentEvent::Abandon {
                attempts: 1,
                reason: "visibility lease lapsed".to_string(),
            },
        )
        .unwrap();
        assert_eq!(record.attempt_count, 5);
    }

    #[test]
    fn test_invalid_transition_leaves_record_untouched() {
        let mut record = pending_record();
        let before = record.clone();
        let result = DocumentStateMachine::apply(
            &mut record,
            &DocumentEvent::Cancel {
                reason: "not yet authorized".to_string(),
            },
        );
        assert!(result.is_err());
        assert_eq!(record, before);
    }

    #[test]
    fn test_authorize_then_cancel() {
        let mut record = pending_record();
        DocumentStateMachine::apply(&mut record, &DocumentEvent::Start).unwrap();
        DocumentStateMachine::apply(
            &mut record,
            &DocumentEvent::Authorize {
                protocol_number: "135240000000001".to_string(),
                authorized_xml: Some("<nfeProc/>".to_string()),
            },
        )
        .unwrap();
        assert!(record.authorized_at.is_some());

        DocumentStateMachine::apply(
            &mut record,
            &DocumentEvent::Cancel {
                reason: "customer gave up the purchase".to_string(),
            },
        )
        .unwrap();
        assert_eq!(record.state, DocumentState::Cancelled);
        assert_eq!(record.protocol_number.as_deref(), Some("135240000000001"));
        assert!(record.cancelled_at.is_some());
    }
}
