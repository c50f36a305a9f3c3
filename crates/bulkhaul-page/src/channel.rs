//! Bounded single-producer, single-consumer page hand-off for one partition.
//!
//! The producer side is a [`PageOutput`], so a builder or filter chain can
//! write straight into it. Closing the channel is the cancellation
//! mechanism: it wakes every waiter and makes further `add`/`next_page`
//! calls fail with [`ChannelError::Closed`]. An endpoint dropped before it
//! completed counts as failed and force-closes the channel.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use bulkhaul_types::StageError;

use crate::error::ChannelError;
use crate::output::PageOutput;
use crate::page::Page;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Running,
    Completed,
    Failed,
}

impl Side {
    fn is_terminal(self) -> bool {
        self != Self::Running
    }
}

#[derive(Debug)]
struct ChannelState {
    queue: VecDeque<Page>,
    capacity: usize,
    producer: Side,
    consumer: Side,
    closed: bool,
    pages: u64,
    records: u64,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ChannelState>,
    cv: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, ChannelState>) -> MutexGuard<'a, ChannelState> {
        self.cv.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    fn close_locked(&self, state: &mut ChannelState) {
        if !state.closed {
            state.closed = true;
            state.queue.clear();
        }
        self.cv.notify_all();
    }
}

/// Channel connecting the two sides of a partition.
#[derive(Debug, Clone)]
pub struct PageChannel {
    shared: Arc<Shared>,
}

impl PageChannel {
    /// Channel holding at most `max_queued_pages` pages in flight.
    #[must_use]
    pub fn new(max_queued_pages: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ChannelState {
                    queue: VecDeque::new(),
                    capacity: max_queued_pages.max(1),
                    producer: Side::Running,
                    consumer: Side::Running,
                    closed: false,
                    pages: 0,
                    records: 0,
                }),
                cv: Condvar::new(),
            }),
        }
    }

    #[must_use]
    pub fn producer(&self) -> PageProducer {
        PageProducer {
            shared: Arc::clone(&self.shared),
        }
    }

    #[must_use]
    pub fn consumer(&self) -> PageConsumer {
        PageConsumer {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Unblock every waiting thread. Idempotent.
    pub fn close(&self) {
        let mut state = self.shared.lock();
        self.shared.close_locked(&mut state);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Block until both sides have completed or failed.
    pub fn join(&self) {
        let mut state = self.shared.lock();
        while !(state.producer.is_terminal() && state.consumer.is_terminal()) {
            state = self.shared.wait(state);
        }
    }

    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Pages accepted from the producer so far.
    #[must_use]
    pub fn pages_transferred(&self) -> u64 {
        self.shared.lock().pages
    }

    /// Records in the pages accepted from the producer so far.
    #[must_use]
    pub fn records_transferred(&self) -> u64 {
        self.shared.lock().records
    }
}

/// Writing end of a [`PageChannel`].
#[derive(Debug)]
pub struct PageProducer {
    shared: Arc<Shared>,
}

impl PageProducer {
    /// Queue a page, blocking while the channel is full.
    pub fn send(&self, page: Page) -> Result<(), ChannelError> {
        let mut state = self.shared.lock();
        loop {
            if state.closed {
                return Err(ChannelError::Closed);
            }
            if state.queue.len() < state.capacity {
                state.pages += 1;
                state.records += page.record_count() as u64;
                state.queue.push_back(page);
                self.shared.cv.notify_all();
                return Ok(());
            }
            state = self.shared.wait(state);
        }
    }

    /// Mark the producer done; the consumer drains what is queued and then
    /// sees end of stream. Idempotent.
    pub fn complete_producer(&self) {
        let mut state = self.shared.lock();
        if state.producer == Side::Running {
            state.producer = Side::Completed;
        }
        self.shared.cv.notify_all();
    }

    /// Mark the producer failed and close the channel.
    pub fn fail(&self) {
        let mut state = self.shared.lock();
        if state.producer == Side::Running {
            state.producer = Side::Failed;
        }
        self.shared.close_locked(&mut state);
    }

    fn is_running(&self) -> bool {
        self.shared.lock().producer == Side::Running
    }
}

impl PageOutput for PageProducer {
    fn add(&mut self, page: Page) -> Result<(), StageError> {
        self.send(page).map_err(StageError::from)
    }

    fn finish(&mut self) -> Result<(), StageError> {
        self.complete_producer();
        Ok(())
    }

    fn close(&mut self) {
        if self.is_running() {
            self.fail();
        }
    }
}

impl Drop for PageProducer {
    fn drop(&mut self) {
        if self.is_running() {
            self.fail();
        }
    }
}

/// Reading end of a [`PageChannel`].
#[derive(Debug)]
pub struct PageConsumer {
    shared: Arc<Shared>,
}

impl PageConsumer {
    /// Next page, `Ok(None)` at end of stream, or `Err(Closed)` once the
    /// channel has been closed.
    pub fn next_page(&self) -> Result<Option<Page>, ChannelError> {
        let mut state = self.shared.lock();
        loop {
            if state.closed {
                return Err(ChannelError::Closed);
            }
            if let Some(page) = state.queue.pop_front() {
                self.shared.cv.notify_all();
                return Ok(Some(page));
            }
            if state.producer == Side::Completed {
                return Ok(None);
            }
            state = self.shared.wait(state);
        }
    }

    /// Mark the consumer done. Idempotent.
    ///
    /// A consumer that completes while the producer is still running stops
    /// reading for good, so the channel is closed to release the producer.
    pub fn complete_consumer(&self) {
        let mut state = self.shared.lock();
        if state.consumer == Side::Running {
            state.consumer = Side::Completed;
        }
        if state.producer == Side::Running {
            self.shared.close_locked(&mut state);
        } else {
            self.shared.cv.notify_all();
        }
    }

    /// Mark the consumer failed and close the channel.
    pub fn fail(&self) {
        let mut state = self.shared.lock();
        if state.consumer == Side::Running {
            state.consumer = Side::Failed;
        }
        self.shared.close_locked(&mut state);
    }
}

impl Iterator for PageConsumer {
    type Item = Result<Page, ChannelError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_page().transpose()
    }
}

impl Drop for PageConsumer {
    fn drop(&mut self) {
        let running = self.shared.lock().consumer == Side::Running;
        if running {
            self.fail();
        }
    }
}
