/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! Outgoing request tracking and reply correlation.
//!
//! Every outbound request lives in a table entry that walks a one-way state
//! machine: unhandled, sending, sent, received, processing, finalized. The
//! table hands requests to the send pump, matches arriving replies against
//! what it tracked, and sweeps entries that outlive their deadline.

use crate::addressing::Hierarchy;
use crate::protocol::{ContentType, DataHandler};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// A request the application wants delivered to another service.
#[derive(Clone, Debug)]
pub struct DirectRequest {
    pub destination: Hierarchy,
    pub operation: String,
    pub payload: serde_json::Value,
    pub content_type: ContentType,
    pub data_handler: DataHandler,
}

/// Progress of a tracked request. Transitions only ever move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum RequestState {
    Unhandled,
    Sending,
    Sent,
    Received,
    Processing,
    Finalized,
}

/// What a reply handler receives once the responder has answered.
#[derive(Clone, Debug)]
pub struct RequestOutcome {
    pub request_id: Uuid,
    pub operation: String,
    pub source: Hierarchy,
    pub has_error: bool,
    pub payload: String,
}

/// Application callback invoked with the outcome of a tracked request.
pub type ResponseHandler = Box<dyn Fn(&RequestOutcome) + Send + Sync>;

/// Verdict when a reply arrives for a request id.
pub(crate) enum ReplyAcceptance {
    /// Nothing is waiting on this id. Duplicate deliveries land here too.
    Unknown,
    /// An entry exists but the reply contradicts it: wrong origin, wrong
    /// operation, or the request has not been sent yet.
    Rejected,
    /// The reply matches; the caller now owns the handler.
    Accepted(Option<ResponseHandler>),
}

struct ExternalRequest {
    request: DirectRequest,
    state: RequestState,
    sent_at: Option<Instant>,
    handler: Option<ResponseHandler>,
}

impl ExternalRequest {
    /// Forward-only transition. Returns whether the state actually moved.
    fn advance(&mut self, next: RequestState) -> bool {
        if next > self.state {
            self.state = next;
            true
        } else {
            false
        }
    }
}

/// A request that outlived its deadline, reported by the sweep.
pub(crate) struct ExpiredRequest {
    pub(crate) request_id: Uuid,
    pub(crate) operation: String,
    pub(crate) destination: Hierarchy,
}

struct TableInner {
    counter: u64,
    entries: HashMap<Uuid, ExternalRequest>,
}

/// Tracks requests from creation to finalization.
///
/// Request ids are deterministic: a v5 uuid over the owner's namespace and a
/// per-table counter. A runtime that re-creates its initial requests after a
/// restart therefore re-issues the same ids, letting responders recognize the
/// retransmission.
pub(crate) struct ExternalRequestTable {
    owner_namespace: Uuid,
    timeout: Duration,
    inner: Mutex<TableInner>,
}

impl ExternalRequestTable {
    pub(crate) fn new(owner: &Hierarchy) -> Self {
        Self::with_timeout(owner, DEFAULT_REQUEST_TIMEOUT)
    }

    pub(crate) fn with_timeout(owner: &Hierarchy, timeout: Duration) -> Self {
        Self {
            owner_namespace: Uuid::new_v5(&Uuid::NAMESPACE_OID, owner.dotted().as_bytes()),
            timeout,
            inner: Mutex::new(TableInner {
                counter: 0,
                entries: HashMap::new(),
            }),
        }
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, TableInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tracks a new request in the unhandled state and returns its id.
    pub(crate) fn insert(
        &self,
        request: DirectRequest,
        handler: Option<ResponseHandler>,
    ) -> Uuid {
        let mut inner = self.locked();
        inner.counter += 1;
        let request_id = Uuid::new_v5(
            &self.owner_namespace,
            inner.counter.to_string().as_bytes(),
        );
        inner.entries.insert(
            request_id,
            ExternalRequest {
                request,
                state: RequestState::Unhandled,
                sent_at: None,
                handler,
            },
        );
        request_id
    }

    /// Claims every unhandled request for sending. Each claimed entry moves to
    /// the sending state, so a second pump pass cannot pick it up again.
    pub(crate) fn take_unhandled(&self) -> Vec<(Uuid, DirectRequest)> {
        let mut inner = self.locked();
        let mut claimed = Vec::new();
        for (request_id, entry) in inner.entries.iter_mut() {
            if entry.state == RequestState::Unhandled {
                entry.state = RequestState::Sending;
                claimed.push((*request_id, entry.request.clone()));
            }
        }
        claimed
    }

    pub(crate) fn mark_sent(&self, request_id: &Uuid) -> bool {
        let mut inner = self.locked();
        inner.entries.get_mut(request_id).is_some_and(|entry| {
            let moved = entry.advance(RequestState::Sent);
            if moved {
                entry.sent_at = Some(Instant::now());
            }
            moved
        })
    }

    /// Matches an arriving reply against the tracked request. Only a request
    /// that is out on the wire can match; on acceptance the handler moves to
    /// the caller and the entry advances to received.
    pub(crate) fn accept_reply(
        &self,
        request_id: &Uuid,
        responder: &Hierarchy,
        operation: &str,
    ) -> ReplyAcceptance {
        let mut inner = self.locked();
        let Some(entry) = inner.entries.get_mut(request_id) else {
            return ReplyAcceptance::Unknown;
        };
        match entry.state {
            // Ids are deterministic across restarts, so stale traffic from an
            // earlier session can name an entry the pump has not sent yet.
            RequestState::Unhandled | RequestState::Sending => {
                return ReplyAcceptance::Rejected;
            }
            RequestState::Sent => {}
            // A reply for this id was already accepted.
            RequestState::Received | RequestState::Processing | RequestState::Finalized => {
                return ReplyAcceptance::Unknown;
            }
        }
        if entry.request.destination != *responder || entry.request.operation != operation {
            return ReplyAcceptance::Rejected;
        }
        entry.advance(RequestState::Received);
        ReplyAcceptance::Accepted(entry.handler.take())
    }

    pub(crate) fn begin_processing(&self, request_id: &Uuid) -> bool {
        let mut inner = self.locked();
        inner
            .entries
            .get_mut(request_id)
            .is_some_and(|entry| entry.advance(RequestState::Processing))
    }

    /// Marks the request finalized and drops it from the table.
    pub(crate) fn finalize(&self, request_id: &Uuid) -> bool {
        let mut inner = self.locked();
        let Some(entry) = inner.entries.get_mut(request_id) else {
            return false;
        };
        entry.advance(RequestState::Finalized);
        inner.entries.remove(request_id);
        true
    }

    /// Removes every sent entry whose reply is overdue. Expired requests are
    /// reported for logging; their handlers are never invoked. Entries that
    /// never reached the broker are left alone, the pump still owns them.
    pub(crate) fn sweep_expired(&self) -> Vec<ExpiredRequest> {
        let mut inner = self.locked();
        let deadline = self.timeout;
        let expired_ids: Vec<Uuid> = inner
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry.state == RequestState::Sent
                    && entry
                        .sent_at
                        .is_some_and(|sent_at| sent_at.elapsed() >= deadline)
            })
            .map(|(request_id, _)| *request_id)
            .collect();
        expired_ids
            .into_iter()
            .filter_map(|request_id| {
                inner.entries.remove(&request_id).map(|entry| ExpiredRequest {
                    request_id,
                    operation: entry.request.operation,
                    destination: entry.request.destination,
                })
            })
            .collect()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.locked().entries.len()
    }

    /// How many tracked requests have not reached the broker yet.
    pub(crate) fn unsent_count(&self) -> usize {
        self.locked()
            .entries
            .values()
            .filter(|entry| entry.state < RequestState::Sent)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DirectRequest, ExternalRequestTable, ReplyAcceptance, RequestOutcome, RequestState,
    };
    use crate::addressing::Hierarchy;
    use crate::protocol::{ContentType, DataHandler};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn caller() -> Hierarchy {
        Hierarchy::new("acme", "plant-one", "conveyor", None, "panel")
            .expect("caller address should validate")
    }

    fn responder() -> Hierarchy {
        Hierarchy::new("acme", "plant-one", "conveyor", None, "motor")
            .expect("responder address should validate")
    }

    fn request_to(destination: Hierarchy) -> DirectRequest {
        DirectRequest {
            destination,
            operation: "Motor.start".to_string(),
            payload: serde_json::json!({"rpm": 1200}),
            content_type: ContentType::Json,
            data_handler: DataHandler::Message,
        }
    }

    #[test]
    fn request_ids_are_deterministic_per_owner() {
        let first = ExternalRequestTable::new(&caller());
        let second = ExternalRequestTable::new(&caller());
        let other_owner = ExternalRequestTable::new(&responder());

        let a1 = first.insert(request_to(responder()), None);
        let a2 = first.insert(request_to(responder()), None);
        let b1 = second.insert(request_to(responder()), None);
        let b2 = second.insert(request_to(responder()), None);
        let c1 = other_owner.insert(request_to(caller()), None);

        assert_eq!(a1, b1);
        assert_eq!(a2, b2);
        assert_ne!(a1, a2);
        assert_ne!(a1, c1);
    }

    #[test]
    fn unhandled_requests_are_claimed_exactly_once() {
        let table = ExternalRequestTable::new(&caller());
        table.insert(request_to(responder()), None);
        table.insert(request_to(responder()), None);

        assert_eq!(table.take_unhandled().len(), 2);
        assert!(table.take_unhandled().is_empty());
    }

    #[test]
    fn states_never_move_backwards() {
        let table = ExternalRequestTable::new(&caller());
        let id = table.insert(request_to(responder()), None);
        table.take_unhandled();
        assert!(table.mark_sent(&id));

        // A late send confirmation after the reply arrived must not regress.
        match table.accept_reply(&id, &responder(), "Motor.start") {
            ReplyAcceptance::Accepted(_) => {}
            _ => panic!("matching reply should be accepted"),
        }
        assert!(!table.mark_sent(&id));
        assert!(table.begin_processing(&id));
        assert!(table.finalize(&id));
        assert_eq!(table.pending_count(), 0);
    }

    #[test]
    fn replies_from_the_wrong_responder_are_rejected() {
        let table = ExternalRequestTable::new(&caller());
        let id = table.insert(request_to(responder()), None);
        table.take_unhandled();
        table.mark_sent(&id);

        let impostor = Hierarchy::new("acme", "plant-one", "conveyor", None, "impostor")
            .expect("impostor address should validate");
        assert!(matches!(
            table.accept_reply(&id, &impostor, "Motor.start"),
            ReplyAcceptance::Rejected
        ));
        assert!(matches!(
            table.accept_reply(&id, &responder(), "Motor.stop"),
            ReplyAcceptance::Rejected
        ));

        // The mismatches above must not have consumed the real reply.
        assert!(matches!(
            table.accept_reply(&id, &responder(), "Motor.start"),
            ReplyAcceptance::Accepted(_)
        ));
    }

    #[test]
    fn early_replies_cannot_claim_an_unsent_request() {
        let table = ExternalRequestTable::new(&caller());
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let handler = Box::new(move |_outcome: &RequestOutcome| {
            counted.fetch_add(1, Ordering::Relaxed);
        });
        let id = table.insert(request_to(responder()), Some(handler));

        // A responder from an earlier session can know this id before the
        // pump has sent anything, because ids are deterministic.
        assert!(matches!(
            table.accept_reply(&id, &responder(), "Motor.start"),
            ReplyAcceptance::Rejected
        ));
        table.take_unhandled();
        assert!(matches!(
            table.accept_reply(&id, &responder(), "Motor.start"),
            ReplyAcceptance::Rejected
        ));
        assert_eq!(calls.load(Ordering::Relaxed), 0);
        assert_eq!(table.pending_count(), 1);

        // Once the request is actually out, the genuine reply still lands.
        assert!(table.mark_sent(&id));
        assert!(matches!(
            table.accept_reply(&id, &responder(), "Motor.start"),
            ReplyAcceptance::Accepted(Some(_))
        ));
    }

    #[test]
    fn duplicate_replies_fall_through_as_unknown() {
        let table = ExternalRequestTable::new(&caller());
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let handler = Box::new(move |_outcome: &RequestOutcome| {
            counted.fetch_add(1, Ordering::Relaxed);
        });

        let id = table.insert(request_to(responder()), Some(handler));
        table.take_unhandled();
        table.mark_sent(&id);

        let accepted = table.accept_reply(&id, &responder(), "Motor.start");
        let ReplyAcceptance::Accepted(Some(handler)) = accepted else {
            panic!("first reply should carry the handler");
        };
        handler(&RequestOutcome {
            request_id: id,
            operation: "Motor.start".to_string(),
            source: responder(),
            has_error: false,
            payload: "{}".to_string(),
        });
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        assert!(matches!(
            table.accept_reply(&id, &responder(), "Motor.start"),
            ReplyAcceptance::Unknown
        ));
    }

    #[test]
    fn unknown_request_ids_are_unknown() {
        let table = ExternalRequestTable::new(&caller());
        let stray = uuid::Uuid::new_v4();
        assert!(matches!(
            table.accept_reply(&stray, &responder(), "Motor.start"),
            ReplyAcceptance::Unknown
        ));
    }

    #[test]
    fn expired_requests_are_pruned_without_invoking_handlers() {
        let table = ExternalRequestTable::with_timeout(&caller(), Duration::from_millis(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let handler = Box::new(move |_outcome: &RequestOutcome| {
            counted.fetch_add(1, Ordering::Relaxed);
        });
        let id = table.insert(request_to(responder()), Some(handler));
        table.take_unhandled();
        table.mark_sent(&id);

        let expired = table.sweep_expired();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].request_id, id);
        assert_eq!(expired[0].operation, "Motor.start");
        assert_eq!(calls.load(Ordering::Relaxed), 0);
        assert_eq!(table.pending_count(), 0);
    }

    #[test]
    fn unsent_requests_never_expire() {
        let table = ExternalRequestTable::with_timeout(&caller(), Duration::from_millis(0));
        table.insert(request_to(responder()), None);
        assert!(table.sweep_expired().is_empty());
        assert_eq!(table.pending_count(), 1);
    }

    #[test]
    fn unexpired_requests_survive_the_sweep() {
        let table = ExternalRequestTable::with_timeout(&caller(), Duration::from_secs(300));
        let id = table.insert(request_to(responder()), None);
        table.take_unhandled();
        table.mark_sent(&id);
        assert!(table.sweep_expired().is_empty());
        assert_eq!(table.pending_count(), 1);
    }

    #[test]
    fn state_ordering_matches_the_lifecycle() {
        assert!(RequestState::Unhandled < RequestState::Sending);
        assert!(RequestState::Sending < RequestState::Sent);
        assert!(RequestState::Sent < RequestState::Received);
        assert!(RequestState::Received < RequestState::Processing);
        assert!(RequestState::Processing < RequestState::Finalized);
    }
}
