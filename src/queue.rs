//! Bounded-concurrency request queue
//!
//! Tile fetches are dispatched in submission order with at most `limit` in
//! flight. Each fetch runs as a tokio task; its outcome is sent back over a
//! channel so the single control thread can apply it. Cancelling a queued
//! request drops it before it ever starts; cancelling a running one aborts
//! its task, which drops the underlying HTTP request.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::transport::{FetchError, Tile, TileRequest, TileTransport};
use crate::viewport::Coord;

type FetchFuture = Pin<Box<dyn Future<Output = Result<Tile, FetchError>> + Send>>;

/// Unique id of one submitted request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(pub u64);

/// How a request ended
#[derive(Debug)]
pub enum FetchOutcome {
    Loaded(Tile),
    Failed(FetchError),
    Cancelled,
}

/// Delivered once per submitted request
#[derive(Debug)]
pub struct Completion {
    pub ticket: Ticket,
    pub coord: Coord,
    pub outcome: FetchOutcome,
}

/// Snapshot of queue occupancy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub in_flight: usize,
    /// Most requests ever in flight at once
    pub high_water: usize,
    pub submitted: u64,
}

struct Job {
    ticket: Ticket,
    coord: Coord,
    future: FetchFuture,
}

#[derive(Default)]
struct QueueState {
    waiting: VecDeque<Job>,
    running: HashMap<Ticket, (Coord, AbortHandle)>,
    next_ticket: u64,
    high_water: usize,
}

struct Shared {
    limit: usize,
    runtime: Handle,
    completions: mpsc::UnboundedSender<Completion>,
    state: Mutex<QueueState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn send(&self, ticket: Ticket, coord: Coord, outcome: FetchOutcome) {
        // The receiver is gone only when the queue itself was dropped
        let _ = self.completions.send(Completion { ticket, coord, outcome });
    }

    /// Start waiting jobs while slots are free
    fn dispatch(self: &Arc<Self>, state: &mut QueueState) {
        while state.running.len() < self.limit {
            let Some(job) = state.waiting.pop_front() else {
                break;
            };

            let Job { ticket, coord, future } = job;
            log::debug!("Dispatching tile ({}, {}) as request {}", coord.x, coord.z, ticket.0);

            let shared = Arc::clone(self);
            let task = self.runtime.spawn(async move {
                let result = future.await;
                shared.finish(ticket, result);
            });

            state.running.insert(ticket, (coord, task.abort_handle()));
            state.high_water = state.high_water.max(state.running.len());
        }
    }

    fn finish(self: &Arc<Self>, ticket: Ticket, result: Result<Tile, FetchError>) {
        let coord = {
            let mut state = self.lock();
            // Absent means the request was cancelled while finishing
            let Some((coord, _)) = state.running.remove(&ticket) else {
                return;
            };
            self.dispatch(&mut state);
            coord
        };

        let outcome = match result {
            Ok(tile) => FetchOutcome::Loaded(tile),
            Err(e) => FetchOutcome::Failed(e),
        };
        self.send(ticket, coord, outcome);
    }

    /// True when the request was still queued or running
    fn cancel(self: &Arc<Self>, ticket: Ticket) -> bool {
        let coord = {
            let mut state = self.lock();

            if let Some(pos) = state.waiting.iter().position(|job| job.ticket == ticket) {
                state.waiting.remove(pos).map(|job| job.coord)
            } else if let Some((coord, task)) = state.running.remove(&ticket) {
                task.abort();
                self.dispatch(&mut state);
                Some(coord)
            } else {
                None
            }
        };

        let Some(coord) = coord else {
            return false;
        };
        log::debug!("Cancelled request {} for tile ({}, {})", ticket.0, coord.x, coord.z);
        self.send(ticket, coord, FetchOutcome::Cancelled);
        true
    }
}

/// Cancellable reference to a submitted request
#[derive(Clone)]
pub struct RequestHandle {
    ticket: Ticket,
    shared: Weak<Shared>,
}

impl RequestHandle {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// Cancel the request. Never blocks.
    ///
    /// Returns false if the request had already finished; its completion is
    /// then delivered as usual.
    pub fn cancel(&self) -> bool {
        self.shared
            .upgrade()
            .map_or(false, |shared| shared.cancel(self.ticket))
    }
}

impl PartialEq for RequestHandle {
    fn eq(&self, other: &Self) -> bool {
        self.ticket == other.ticket
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RequestHandle").field(&self.ticket.0).finish()
    }
}

/// FIFO dispatcher for tile fetches
pub struct RequestQueue<T: TileTransport> {
    transport: Arc<T>,
    shared: Arc<Shared>,
    completions: mpsc::UnboundedReceiver<Completion>,
    submitted: u64,
}

impl<T: TileTransport> RequestQueue<T> {
    /// Create a queue running fetches on `runtime`, at most `limit` at a time
    pub fn new(transport: T, limit: usize, runtime: Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            limit: limit.max(1),
            runtime,
            completions: tx,
            state: Mutex::new(QueueState::default()),
        });

        Self {
            transport: Arc::new(transport),
            shared,
            completions: rx,
            submitted: 0,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Queue a fetch; it starts as soon as a slot is free
    pub fn submit(&mut self, request: TileRequest) -> RequestHandle {
        let coord = request.coord;
        let transport = Arc::clone(&self.transport);
        let future: FetchFuture = Box::pin(async move { transport.fetch(request).await });

        let ticket = {
            let mut state = self.shared.lock();
            let ticket = Ticket(state.next_ticket);
            state.next_ticket += 1;
            state.waiting.push_back(Job { ticket, coord, future });
            self.shared.dispatch(&mut state);
            ticket
        };
        self.submitted += 1;

        RequestHandle {
            ticket,
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn cancel(&self, handle: &RequestHandle) -> bool {
        self.shared.cancel(handle.ticket)
    }

    /// Cancel everything queued or running
    pub fn cancel_all(&self) {
        let tickets: Vec<Ticket> = {
            let state = self.shared.lock();
            state
                .waiting
                .iter()
                .map(|job| job.ticket)
                .chain(state.running.keys().copied())
                .collect()
        };
        for ticket in tickets {
            self.shared.cancel(ticket);
        }
    }

    /// Next completion if one is ready
    pub fn try_next_completion(&mut self) -> Option<Completion> {
        self.completions.try_recv().ok()
    }

    /// Wait for the next completion
    pub async fn next_completion(&mut self) -> Option<Completion> {
        self.completions.recv().await
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.shared.lock();
        QueueStats {
            queued: state.waiting.len(),
            in_flight: state.running.len(),
            high_water: state.high_water,
            submitted: self.submitted,
        }
    }

    /// Nothing queued and nothing running
    pub fn is_idle(&self) -> bool {
        let state = self.shared.lock();
        state.waiting.is_empty() && state.running.is_empty()
    }
}

impl<T: TileTransport> Drop for RequestQueue<T> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.waiting.clear();
        for (_, (_, task)) in state.running.drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Transport that sleeps, records concurrency and answers with an empty tile
    #[derive(Default)]
    struct SlowTransport {
        delay_ms: u64,
        active: AtomicUsize,
        peak: AtomicUsize,
        started: Mutex<Vec<Coord>>,
        fail_x: Option<i64>,
    }

    impl TileTransport for SlowTransport {
        fn fetch(&self, request: TileRequest) -> impl Future<Output = Result<Tile, FetchError>> + Send {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.started.lock().unwrap().push(request.coord);
            let delay = Duration::from_millis(self.delay_ms);
            let fail = self.fail_x == Some(request.coord.x);

            // Decrement happens in a guard so aborted fetches release too
            struct Release<'a>(&'a AtomicUsize);
            impl Drop for Release<'_> {
                fn drop(&mut self) {
                    self.0.fetch_sub(1, Ordering::SeqCst);
                }
            }
            let release = Release(&self.active);

            async move {
                let _release = release;
                tokio::time::sleep(delay).await;
                if fail {
                    Err(FetchError::StatusError(500))
                } else {
                    Ok(Tile::default())
                }
            }
        }
    }

    fn request(x: i64, z: i64) -> TileRequest {
        TileRequest {
            coord: Coord::new(x, z),
            seed: 1,
            world_type: "default".to_string(),
            version: "1.16".to_string(),
        }
    }

    async fn collect(queue: &mut RequestQueue<SlowTransport>, n: usize) -> Vec<Completion> {
        let mut out = Vec::new();
        while out.len() < n {
            match queue.next_completion().await {
                Some(c) => out.push(c),
                None => break,
            }
        }
        out
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let transport = SlowTransport { delay_ms: 5, ..Default::default() };
        let mut queue = RequestQueue::new(transport, 3, Handle::current());

        for x in 0..20 {
            queue.submit(request(x, 0));
        }
        let stats = queue.stats();
        assert_eq!(stats.in_flight, 3);
        assert_eq!(stats.queued, 17);

        let done = collect(&mut queue, 20).await;
        assert_eq!(done.len(), 20);
        assert!(done.iter().all(|c| matches!(c.outcome, FetchOutcome::Loaded(_))));
        assert!(queue.stats().high_water <= 3);
        assert!(queue.transport().peak.load(Ordering::SeqCst) <= 3);
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn test_dispatch_in_submission_order() {
        let transport = SlowTransport { delay_ms: 1, ..Default::default() };
        let mut queue = RequestQueue::new(transport, 1, Handle::current());

        for x in 0..5 {
            queue.submit(request(x, 0));
        }
        collect(&mut queue, 5).await;

        let started = queue.transport().started.lock().unwrap().clone();
        let xs: Vec<i64> = started.iter().map(|c| c.x).collect();
        assert_eq!(xs, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_cancel_queued_request_never_dispatches() {
        let transport = SlowTransport { delay_ms: 5, ..Default::default() };
        let mut queue = RequestQueue::new(transport, 1, Handle::current());

        let _first = queue.submit(request(0, 0));
        let second = queue.submit(request(1, 0));
        second.cancel();

        let done = collect(&mut queue, 2).await;
        let cancelled: Vec<_> = done.iter().filter(|c| matches!(c.outcome, FetchOutcome::Cancelled)).collect();
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].ticket, second.ticket());

        let started = queue.transport().started.lock().unwrap().clone();
        assert_eq!(started, vec![Coord::new(0, 0)]);
    }

    #[tokio::test]
    async fn test_cancel_running_request_frees_slot() {
        let transport = SlowTransport { delay_ms: 10_000, ..Default::default() };
        let mut queue = RequestQueue::new(transport, 1, Handle::current());

        let first = queue.submit(request(0, 0));
        queue.submit(request(1, 0));
        assert_eq!(queue.stats().in_flight, 1);

        assert!(queue.cancel(&first));
        let done = collect(&mut queue, 1).await;
        assert!(matches!(done[0].outcome, FetchOutcome::Cancelled));
        assert_eq!(queue.stats().in_flight, 1);
        assert_eq!(queue.stats().queued, 0);

        // Cancelling twice is harmless
        assert!(!first.cancel());
        queue.cancel_all();
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn test_cancel_after_finish_keeps_result() {
        let transport = SlowTransport { delay_ms: 0, ..Default::default() };
        let mut queue = RequestQueue::new(transport, 1, Handle::current());

        let handle = queue.submit(request(0, 0));
        while !queue.is_idle() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert!(!handle.cancel());
        let done = collect(&mut queue, 1).await;
        assert!(matches!(done[0].outcome, FetchOutcome::Loaded(_)));
        assert!(queue.try_next_completion().is_none());
    }

    #[tokio::test]
    async fn test_failures_are_reported_per_request() {
        let transport = SlowTransport { delay_ms: 1, fail_x: Some(1), ..Default::default() };
        let mut queue = RequestQueue::new(transport, 4, Handle::current());

        for x in 0..3 {
            queue.submit(request(x, 0));
        }
        let done = collect(&mut queue, 3).await;
        let failed: Vec<_> = done
            .iter()
            .filter(|c| matches!(c.outcome, FetchOutcome::Failed(_)))
            .map(|c| c.coord)
            .collect();
        assert_eq!(failed, vec![Coord::new(1, 0)]);
    }
}
