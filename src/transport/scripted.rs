//! In-process transport that replays scripted responses.
//!
//! Each endpoint has a FIFO of steps; once it runs dry the endpoint's
//! standing response (if any) is used. Every request is recorded so callers
//! can assert on headers, bodies and ordering. Used by the test suites and
//! the demo binary.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Request, Response, Transport, TransportError};

#[derive(Debug, Clone)]
enum Step {
    Respond { response: Response, delay: Duration },
    Fail(TransportError),
}

#[derive(Debug, Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    standing: Mutex<HashMap<String, Response>>,
    log: Mutex<Vec<Request>>,
    unreachable: AtomicBool,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one response for `endpoint`.
    pub fn push(&self, endpoint: &str, response: Response) {
        self.push_step(endpoint, Step::Respond { response, delay: Duration::ZERO });
    }

    /// Queue one response that arrives after `delay`.
    pub fn push_delayed(&self, endpoint: &str, delay: Duration, response: Response) {
        self.push_step(endpoint, Step::Respond { response, delay });
    }

    /// Queue one transport-level failure.
    pub fn push_error(&self, endpoint: &str, error: TransportError) {
        self.push_step(endpoint, Step::Fail(error));
    }

    /// Response used whenever `endpoint` has no queued steps left.
    pub fn set_standing(&self, endpoint: &str, response: Response) {
        self.standing.lock().insert(endpoint.to_string(), response);
    }

    /// Simulate losing the network entirely.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::Release);
    }

    #[must_use]
    pub fn requests(&self) -> Vec<Request> {
        self.log.lock().clone()
    }

    #[must_use]
    pub fn requests_to(&self, endpoint: &str) -> Vec<Request> {
        self.log
            .lock()
            .iter()
            .filter(|r| r.endpoint == endpoint)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.log.lock().len()
    }

    fn push_step(&self, endpoint: &str, step: Step) {
        self.scripts
            .lock()
            .entry(endpoint.to_string())
            .or_default()
            .push_back(step);
    }

    fn next_step(&self, endpoint: &str) -> Option<Step> {
        if let Some(step) = self.scripts.lock().get_mut(endpoint).and_then(VecDeque::pop_front) {
            return Some(step);
        }
        self.standing
            .lock()
            .get(endpoint)
            .cloned()
            .map(|response| Step::Respond { response, delay: Duration::ZERO })
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        let endpoint = request.endpoint.clone();
        self.log.lock().push(request);

        if self.unreachable.load(Ordering::Acquire) {
            return Err(TransportError::Network("network unreachable".into()));
        }

        match self.next_step(&endpoint) {
            Some(Step::Respond { response, delay }) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(response)
            }
            Some(Step::Fail(error)) => Err(error),
            None => Err(TransportError::Network(format!("no scripted response for {}", endpoint))),
        }
    }
}
