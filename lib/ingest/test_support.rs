use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Notify;

use super::chain::HeaderLookup;
use super::error::QueryError;
use super::faults::{Fault, FaultReporter};
use super::ranges::OutdatedLedgers;
use super::session::SessionRunner;
use super::system::{System, SystemConfig};
use super::types::{LedgerHeader, Sequence, SessionError, SessionOutcome, SessionRequest};
use crate::ledger_state::{LedgerState, SharedLedgerState};

pub(crate) fn ledger_state(core_elder: u32, core_latest: u32, history_latest: u32) -> LedgerState {
    LedgerState {
        core_elder,
        core_latest,
        history_latest,
    }
}

pub(crate) fn test_config() -> SystemConfig {
    SystemConfig {
        importer_version: 10,
        session_timeout: None,
        max_stalled_reingest_iterations: 3,
    }
}

/// Headers for `[first, last]` where each ledger's `prev_hash` is its predecessor's hash.
pub(crate) fn linked_headers(first: Sequence, last: Sequence) -> Vec<LedgerHeader> {
    (first..=last)
        .map(|sequence| LedgerHeader {
            sequence,
            ledger_hash: format!("hash-{sequence}"),
            prev_hash: format!("hash-{}", sequence.saturating_sub(1)),
        })
        .collect()
}

#[derive(Default)]
pub(crate) struct MockHeaders {
    headers: Mutex<HashMap<Sequence, LedgerHeader>>,
    failure: Mutex<Option<QueryError>>,
    lookups: Mutex<Vec<Sequence>>,
}

impl MockHeaders {
    pub(crate) fn with_headers(headers: Vec<LedgerHeader>) -> Self {
        Self {
            headers: Mutex::new(headers.into_iter().map(|h| (h.sequence, h)).collect()),
            ..Self::default()
        }
    }

    pub(crate) fn fail_with(&self, err: QueryError) {
        *self.failure.lock().expect("failure mutex poisoned") = Some(err);
    }

    pub(crate) fn insert(&self, header: LedgerHeader) {
        self.headers
            .lock()
            .expect("headers mutex poisoned")
            .insert(header.sequence, header);
    }

    pub(crate) fn lookups(&self) -> Vec<Sequence> {
        self.lookups.lock().expect("lookups mutex poisoned").clone()
    }
}

impl HeaderLookup for MockHeaders {
    fn ledger_header_by_sequence<'a>(
        &'a self,
        sequence: Sequence,
    ) -> BoxFuture<'a, Result<Option<LedgerHeader>, QueryError>> {
        Box::pin(async move {
            self.lookups
                .lock()
                .expect("lookups mutex poisoned")
                .push(sequence);

            if let Some(err) = self.failure.lock().expect("failure mutex poisoned").clone() {
                return Err(err);
            }

            Ok(self
                .headers
                .lock()
                .expect("headers mutex poisoned")
                .get(&sequence)
                .cloned())
        })
    }
}

/// In-memory destination store: the outdated query reads it, the recording runner writes it.
#[derive(Default)]
pub(crate) struct FakeHistory {
    /// Sequence -> processing version of the stored row.
    rows: Mutex<BTreeMap<Sequence, i32>>,
    failure: Mutex<Option<QueryError>>,
    queries: Mutex<u32>,
    limit: Option<usize>,
}

impl FakeHistory {
    pub(crate) fn with_rows(rows: impl IntoIterator<Item = (Sequence, i32)>) -> Self {
        Self {
            rows: Mutex::new(rows.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Returns at most `limit` sequences per outdated query, like a `LIMIT` clause.
    pub(crate) fn capped_at(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn rows(&self) -> BTreeMap<Sequence, i32> {
        self.rows.lock().expect("rows mutex poisoned").clone()
    }

    pub(crate) fn queries(&self) -> u32 {
        *self.queries.lock().expect("queries mutex poisoned")
    }

    pub(crate) fn fail_with(&self, err: QueryError) {
        *self.failure.lock().expect("failure mutex poisoned") = Some(err);
    }

    fn apply(&self, request: &SessionRequest, version: i32, sticky: &HashSet<Sequence>) {
        let mut rows = self.rows.lock().expect("rows mutex poisoned");
        let range = request.range;

        if request.clear_existing {
            let stale: Vec<Sequence> = rows
                .range(range.first..=range.last)
                .map(|(sequence, _)| *sequence)
                .filter(|sequence| !sticky.contains(sequence))
                .collect();
            for sequence in stale {
                rows.remove(&sequence);
            }
        }

        for sequence in range.first..=range.last {
            rows.entry(sequence).or_insert(version);
        }
    }
}

impl OutdatedLedgers for FakeHistory {
    fn oldest_outdated_ledgers<'a>(
        &'a self,
        current_version: i32,
    ) -> BoxFuture<'a, Result<Vec<Sequence>, QueryError>> {
        Box::pin(async move {
            *self.queries.lock().expect("queries mutex poisoned") += 1;
            if let Some(err) = self.failure.lock().expect("failure mutex poisoned").clone() {
                return Err(err);
            }

            Ok(self
                .rows
                .lock()
                .expect("rows mutex poisoned")
                .iter()
                .filter(|(_, version)| **version < current_version)
                .map(|(sequence, _)| *sequence)
                .take(self.limit.unwrap_or(usize::MAX))
                .collect())
        })
    }
}

/// Lets a test hold a session open until it decides to release it.
#[derive(Default)]
pub(crate) struct SessionGate {
    pub(crate) entered: Notify,
    pub(crate) release: Notify,
}

#[derive(Default)]
pub(crate) struct RecordingRunner {
    requests: Mutex<Vec<SessionRequest>>,
    failures: Mutex<VecDeque<SessionError>>,
    history: Option<Arc<FakeHistory>>,
    version: i32,
    sticky: HashSet<Sequence>,
    gate: Option<Arc<SessionGate>>,
    delay: Option<Duration>,
    panic_message: Option<&'static str>,
}

impl RecordingRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Writes every session into `history` stamped with `version`.
    pub(crate) fn writing_to(mut self, history: Arc<FakeHistory>, version: i32) -> Self {
        self.history = Some(history);
        self.version = version;
        self
    }

    /// Sequences whose rows survive clear-existing mode untouched, modeling a broken session.
    pub(crate) fn never_clearing(mut self, sequences: impl IntoIterator<Item = Sequence>) -> Self {
        self.sticky = sequences.into_iter().collect();
        self
    }

    /// Fails the next sessions, in order, with these errors.
    pub(crate) fn failing_with(self, errors: Vec<SessionError>) -> Self {
        *self.failures.lock().expect("failures mutex poisoned") = errors.into_iter().collect();
        self
    }

    pub(crate) fn gated(mut self, gate: Arc<SessionGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn sleeping(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn panicking(mut self, message: &'static str) -> Self {
        self.panic_message = Some(message);
        self
    }

    pub(crate) fn requests(&self) -> Vec<SessionRequest> {
        self.requests.lock().expect("requests mutex poisoned").clone()
    }
}

impl SessionRunner for RecordingRunner {
    fn run<'a>(&'a self, request: &'a SessionRequest) -> BoxFuture<'a, SessionOutcome> {
        Box::pin(async move {
            self.requests
                .lock()
                .expect("requests mutex poisoned")
                .push(*request);

            if let Some(gate) = &self.gate {
                gate.entered.notify_one();
                gate.release.notified().await;
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(message) = self.panic_message {
                panic!("{message}");
            }

            let failure = self
                .failures
                .lock()
                .expect("failures mutex poisoned")
                .pop_front();
            if let Some(err) = failure {
                return SessionOutcome::failed(0, err);
            }

            if let Some(history) = &self.history {
                history.apply(request, self.version, &self.sticky);
            }
            SessionOutcome::succeeded(request.range.len())
        })
    }
}

#[derive(Default)]
pub(crate) struct RecordingFaults {
    faults: Mutex<Vec<Fault>>,
}

impl RecordingFaults {
    pub(crate) fn faults(&self) -> Vec<Fault> {
        self.faults.lock().expect("faults mutex poisoned").clone()
    }
}

impl FaultReporter for RecordingFaults {
    fn report(&self, fault: &Fault) {
        self.faults
            .lock()
            .expect("faults mutex poisoned")
            .push(fault.clone());
    }
}

/// Collaborators wired into a [`System`], kept so tests can script and inspect them.
pub(crate) struct Harness {
    pub(crate) state: Arc<SharedLedgerState>,
    pub(crate) headers: Arc<MockHeaders>,
    pub(crate) history: Arc<FakeHistory>,
    pub(crate) runner: Arc<RecordingRunner>,
    pub(crate) faults: Arc<RecordingFaults>,
}

impl Harness {
    pub(crate) fn new(state: LedgerState, history: Arc<FakeHistory>, runner: RecordingRunner) -> Self {
        Self {
            state: Arc::new(SharedLedgerState::new(state)),
            headers: Arc::new(MockHeaders::with_headers(linked_headers(1, 1_000))),
            history,
            runner: Arc::new(runner),
            faults: Arc::new(RecordingFaults::default()),
        }
    }

    pub(crate) fn system(&self, config: SystemConfig) -> System {
        System::new(
            self.state.clone(),
            self.headers.clone(),
            self.history.clone(),
            self.runner.clone(),
            self.faults.clone(),
            config,
        )
    }
}
