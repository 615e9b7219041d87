use crate::lock;
use seatguard_core::BoxFuture;
use seatguard_core::repository::{
    DeadLetterSink, DroppedMessage, RepositoryError, TicketRepository, UpsertOutcome,
};
use seatguard_core::types::{Ticket, TicketId};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Ticket table in a map, with scripted failures.
///
/// Upsert has the same semantics as the SQL statement: insert on first sight,
/// otherwise overwrite the status only.
#[derive(Default)]
pub struct InMemoryTicketRepository {
    tickets: Mutex<HashMap<TicketId, Ticket>>,
    scripted_failures: Mutex<VecDeque<RepositoryError>>,
    upsert_calls: AtomicUsize,
}

impl InMemoryTicketRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next upsert with `error`. Queued failures are used in order.
    pub fn fail_next(&self, error: RepositoryError) {
        lock(&self.scripted_failures).push_back(error);
    }

    /// Snapshot of every stored ticket.
    #[must_use]
    pub fn tickets(&self) -> Vec<Ticket> {
        lock(&self.tickets).values().cloned().collect()
    }

    /// Number of stored tickets.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.tickets).len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upsert calls seen so far, failed ones included.
    #[must_use]
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }
}

impl TicketRepository for InMemoryTicketRepository {
    fn upsert<'a>(&'a self, ticket: &'a Ticket) -> BoxFuture<'a, Result<UpsertOutcome, RepositoryError>> {
        Box::pin(async move {
            self.upsert_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = lock(&self.scripted_failures).pop_front() {
                return Err(error);
            }

            let mut tickets = lock(&self.tickets);
            if let Some(existing) = tickets.get_mut(&ticket.ticket_id) {
                existing.status = ticket.status;
                Ok(UpsertOutcome::Duplicate)
            } else {
                tickets.insert(ticket.ticket_id, ticket.clone());
                Ok(UpsertOutcome::Inserted)
            }
        })
    }

    fn find<'a>(&'a self, ticket_id: &'a TicketId) -> BoxFuture<'a, Result<Option<Ticket>, RepositoryError>> {
        Box::pin(async move { Ok(lock(&self.tickets).get(ticket_id).cloned()) })
    }
}

/// Dropped-message ledger in a vector.
#[derive(Default)]
pub struct InMemoryDeadLetters {
    entries: Mutex<Vec<DroppedMessage>>,
    failing: AtomicBool,
}

impl InMemoryDeadLetters {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every record call fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn entries(&self) -> Vec<DroppedMessage> {
        lock(&self.entries).clone()
    }
}

impl DeadLetterSink for InMemoryDeadLetters {
    fn record<'a>(&'a self, dropped: &'a DroppedMessage) -> BoxFuture<'a, Result<i64, RepositoryError>> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(RepositoryError::Transient("in-memory ledger is failing".into()));
            }
            let mut entries = lock(&self.entries);
            entries.push(dropped.clone());
            Ok(i64::try_from(entries.len()).unwrap_or(i64::MAX))
        })
    }
}
