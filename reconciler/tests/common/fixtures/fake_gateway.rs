//! Scripted in-process payment gateway.
//!
//! Status answers are configured per ticket (last answer repeats); every
//! call is logged so tests can assert order and count.

use async_trait::async_trait;
use reconciler::errors::GatewayError;
use reconciler::{PaymentGateway, TransactionStatus};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    Status(String),
    Cancel(String),
}

#[derive(Default)]
struct State {
    statuses: HashMap<String, VecDeque<Result<TransactionStatus, GatewayError>>>,
    cancels: HashMap<String, VecDeque<Result<(), GatewayError>>>,
    failing_calls: usize,
    calls: Vec<GatewayCall>,
}

#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<State>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
}

/// Counts a call as in flight until its future completes or is dropped
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn unavailable() -> GatewayError {
    GatewayError::Status {
        ticket: "any".to_string(),
        status: 503,
    }
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps `delay` before answering
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn script_status(&self, ticket: &str, answer: Result<TransactionStatus, GatewayError>) {
        self.state
            .lock()
            .unwrap()
            .statuses
            .entry(ticket.to_string())
            .or_default()
            .push_back(answer);
    }

    pub fn confirm(&self, ticket: &str) {
        self.script_status(
            ticket,
            Ok(TransactionStatus::Confirmed {
                bank_timestamp: None,
            }),
        );
    }

    pub fn script_cancel(&self, ticket: &str, answer: Result<(), GatewayError>) {
        self.state
            .lock()
            .unwrap()
            .cancels
            .entry(ticket.to_string())
            .or_default()
            .push_back(answer);
    }

    /// The next `n` calls fail with HTTP 503 regardless of the script
    pub fn fail_next_calls(&self, n: usize) {
        self.state.lock().unwrap().failing_calls = n;
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn status_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                GatewayCall::Status(ticket) => Some(ticket),
                GatewayCall::Cancel(_) => None,
            })
            .collect()
    }

    /// Calls started and not yet finished or dropped
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn take_failure(state: &mut State) -> bool {
        if state.failing_calls > 0 {
            state.failing_calls -= 1;
            true
        } else {
            false
        }
    }
}

fn next_answer<T: Clone>(queue: Option<&mut VecDeque<T>>) -> Option<T> {
    let queue = queue?;
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn transaction_status(&self, ticket: &str) -> Result<TransactionStatus, GatewayError> {
        let _in_flight = InFlight::enter(&self.in_flight);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.calls.push(GatewayCall::Status(ticket.to_string()));
        if Self::take_failure(&mut state) {
            return Err(unavailable());
        }
        next_answer(state.statuses.get_mut(ticket)).unwrap_or(Ok(TransactionStatus::Pending))
    }

    async fn cancel_transaction(&self, ticket: &str) -> Result<(), GatewayError> {
        let _in_flight = InFlight::enter(&self.in_flight);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        state.calls.push(GatewayCall::Cancel(ticket.to_string()));
        if Self::take_failure(&mut state) {
            return Err(unavailable());
        }
        next_answer(state.cancels.get_mut(ticket)).unwrap_or(Ok(()))
    }
}
