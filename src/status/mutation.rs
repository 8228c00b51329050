//! Mutations applied to a [`DocumentStatusRecord`] inside the store's atomic
//! read-modify-write.

use crate::models::{CorrelationId, DocumentStatusRecord, Operation, OperationRecord};
use crate::state_machine::{
    DocumentEvent, DocumentState, DocumentStateMachine, OperationEvent, OperationStateMachine,
    StateMachineError, StateMachineResult,
};

/// A single atomic change to a document record
#[derive(Debug, Clone, PartialEq)]
pub enum StatusMutation {
    /// Drive the document's own (emission) state machine
    Document(DocumentEvent),
    /// Register a new QUERY/EVENT/VOID sub-record in `PENDING`
    AppendOperation(OperationRecord),
    /// Drive a sub-record; `cascade` is applied to the document in the same
    /// write (a successful VOID cancels the document)
    Operation {
        correlation_id: CorrelationId,
        event: OperationEvent,
        cascade: Option<DocumentEvent>,
    },
    /// Several mutations applied in order within one atomic write
    Batch(Vec<StatusMutation>),
}

impl StatusMutation {
    pub fn operation(correlation_id: CorrelationId, event: OperationEvent) -> Self {
        Self::Operation {
            correlation_id,
            event,
            cascade: None,
        }
    }

    /// Correlation ids of every sub-record this mutation registers, batches
    /// included. Stores index these alongside the write.
    pub fn appended_operations(&self) -> Vec<CorrelationId> {
        match self {
            Self::AppendOperation(operation) => vec![operation.correlation_id],
            Self::Batch(mutations) => mutations
                .iter()
                .flat_map(StatusMutation::appended_operations)
                .collect(),
            Self::Document(_) | Self::Operation { .. } => Vec::new(),
        }
    }
}

/// Observable result of one applied transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedTransition {
    pub correlation_id: CorrelationId,
    pub operation: Operation,
    pub from_state: &'static str,
    pub to_state: &'static str,
    pub event: &'static str,
}

/// Record after a successful update plus the transitions it went through
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub record: DocumentStatusRecord,
    pub transitions: Vec<AppliedTransition>,
}

/// Apply `mutation` to `record`.
///
/// Callers run this against a copy and swap it in only on success, so a
/// rejected cascade never leaves a half-applied sub-record behind.
pub fn apply_mutation(
    record: &mut DocumentStatusRecord,
    mutation: &StatusMutation,
) -> StateMachineResult<Vec<AppliedTransition>> {
    let mut transitions = Vec::new();

    match mutation {
        StatusMutation::Document(event) => {
            let applied = DocumentStateMachine::apply(record, event)?;
            transitions.push(AppliedTransition {
                correlation_id: record.correlation_id,
                operation: Operation::Emit,
                from_state: applied.from.as_str(),
                to_state: applied.to.as_str(),
                event: applied.event,
            });
        }
        StatusMutation::AppendOperation(operation) => {
            if record.operation(&operation.correlation_id).is_some() {
                return Err(StateMachineError::InvalidTransition {
                    from: Some(operation.state.to_string()),
                    event: "append".to_string(),
                });
            }
            if operation.operation == Operation::Void {
                // At most one VOID in flight, checked within the write
                if record.state != DocumentState::Authorized {
                    return Err(StateMachineError::NotAuthorized {
                        access_key: record.access_key.to_string(),
                        operation: Operation::Void.to_string(),
                        state: record.state.to_string(),
                    });
                }
                if record.has_open_operation(Operation::Void) {
                    return Err(StateMachineError::OperationInFlight {
                        access_key: record.access_key.to_string(),
                        operation: Operation::Void.to_string(),
                    });
                }
            }
            record.operations.push(operation.clone());
            record.updated_at = operation.created_at;
        }
        StatusMutation::Operation {
            correlation_id,
            event,
            cascade,
        } => {
            let access_key = record.access_key.to_string();
            let sub_record = record.operation_mut(correlation_id).ok_or_else(|| {
                StateMachineError::UnknownOperation {
                    access_key,
                    correlation_id: correlation_id.to_string(),
                }
            })?;
            let kind = sub_record.operation;
            let applied = OperationStateMachine::apply(sub_record, event)?;
            transitions.push(AppliedTransition {
                correlation_id: *correlation_id,
                operation: kind,
                from_state: applied.from.as_str(),
                to_state: applied.to.as_str(),
                event: applied.event,
            });

            if let Some(document_event) = cascade {
                let applied = DocumentStateMachine::apply(record, document_event)?;
                transitions.push(AppliedTransition {
                    correlation_id: *correlation_id,
                    operation: kind,
                    from_state: applied.from.as_str(),
                    to_state: applied.to.as_str(),
                    event: applied.event,
                });
            } else {
                record.updated_at = chrono::Utc::now();
            }
        }
        StatusMutation::Batch(mutations) => {
            for inner in mutations {
                transitions.extend(apply_mutation(record, inner)?);
            }
        }
    }

    Ok(transitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccessKey, DocumentDraft, Priority, TenantId};
    use crate::state_machine::OperationState;
    use chrono::Utc;

    fn record() -> DocumentStatusRecord {
        DocumentStatusRecord::pending(
            TenantId::new("acme"),
            DocumentDraft {
                access_key: AccessKey::parse("35241012345678000195550010000000021876543219")
                    .unwrap(),
                document_number: 2,
                series: 1,
                issued_at: Utc::now(),
                submitted_xml: "<NFe/>".to_string(),
            },
            CorrelationId::new(),
            Priority::Normal,
        )
    }

    #[test]
    fn test_batch_collects_appended_operations() {
        let first = CorrelationId::new();
        let second = CorrelationId::new();
        let mutation = StatusMutation::Batch(vec![
            StatusMutation::AppendOperation(OperationRecord::pending(
                first,
                Operation::Query,
                Priority::Low,
            )),
            StatusMutation::Document(DocumentEvent::Start),
            StatusMutation::Batch(vec![StatusMutation::AppendOperation(
                OperationRecord::pending(second, Operation::Event, Priority::Normal),
            )]),
        ]);
        assert_eq!(mutation.appended_operations(), vec![first, second]);
        assert!(StatusMutation::Document(DocumentEvent::Start)
            .appended_operations()
            .is_empty());
    }

    #[test]
    fn test_batch_reports_every_transition() {
        let mut rec = record();
        let query = CorrelationId::new();
        let transitions = apply_mutation(
            &mut rec,
            &StatusMutation::Batch(vec![
                StatusMutation::Document(DocumentEvent::Start),
                StatusMutation::AppendOperation(OperationRecord::pending(
                    query,
                    Operation::Query,
                    Priority::Low,
                )),
            ]),
        )
        .unwrap();

        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].to_state, DocumentState::Processing.as_str());
        assert_eq!(rec.operation(&query).unwrap().state, OperationState::Pending);
    }

    fn authorized_record() -> DocumentStatusRecord {
        let mut rec = record();
        apply_mutation(&mut rec, &StatusMutation::Document(DocumentEvent::Start)).unwrap();
        apply_mutation(
            &mut rec,
            &StatusMutation::Document(DocumentEvent::Authorize {
                protocol_number: "135240000000001".to_string(),
                authorized_xml: None,
            }),
        )
        .unwrap();
        rec
    }

    fn void() -> OperationRecord {
        OperationRecord::pending(CorrelationId::new(), Operation::Void, Priority::High)
    }

    #[test]
    fn test_second_open_void_is_refused() {
        let mut rec = authorized_record();
        apply_mutation(&mut rec, &StatusMutation::AppendOperation(void())).unwrap();

        let before = rec.clone();
        let err = apply_mutation(&mut rec, &StatusMutation::AppendOperation(void())).unwrap_err();
        assert!(matches!(err, StateMachineError::OperationInFlight { .. }));
        assert_eq!(rec, before);

        // Other operation kinds are not limited
        let query = OperationRecord::pending(CorrelationId::new(), Operation::Query, Priority::Low);
        apply_mutation(&mut rec, &StatusMutation::AppendOperation(query)).unwrap();
        assert_eq!(rec.operations.len(), 2);
    }

    #[test]
    fn test_void_after_settled_void_is_accepted() {
        let mut rec = authorized_record();
        let first = void();
        let first_id = first.correlation_id;
        apply_mutation(&mut rec, &StatusMutation::AppendOperation(first)).unwrap();
        apply_mutation(&mut rec, &StatusMutation::operation(first_id, OperationEvent::Start))
            .unwrap();
        apply_mutation(
            &mut rec,
            &StatusMutation::operation(
                first_id,
                OperationEvent::Reject {
                    code: Some("220".to_string()),
                    message: "cancellation window closed".to_string(),
                },
            ),
        )
        .unwrap();

        apply_mutation(&mut rec, &StatusMutation::AppendOperation(void())).unwrap();
        assert_eq!(rec.operations.len(), 2);
    }

    #[test]
    fn test_void_requires_authorized_document() {
        let mut rec = record();
        let err = apply_mutation(&mut rec, &StatusMutation::AppendOperation(void())).unwrap_err();
        assert!(matches!(err, StateMachineError::NotAuthorized { .. }));
        assert!(rec.operations.is_empty());
    }

    #[test]
    fn test_unknown_operation_is_rejected() {
        let mut rec = record();
        let err = apply_mutation(
            &mut rec,
            &StatusMutation::operation(CorrelationId::new(), crate::state_machine::OperationEvent::Start),
        )
        .unwrap_err();
        assert!(matches!(err, crate::state_machine::StateMachineError::UnknownOperation { .. }));
    }
}
