use crate::config::Settings;
use crate::core::Transaction;
use log::debug;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

struct PoolState {
    backlog: VecDeque<Transaction>,
    closed: bool,
}

/// FIFO backlog of verified transactions waiting to be packed into a block.
///
/// Producers never block: once the backlog reaches `pack_size` a waiting
/// consumer is woken. [`MemoryPool::get_pack`] hands out a full pack as soon
/// as one is available, or whatever has accumulated when the timeout expires.
pub struct MemoryPool {
    inner: Mutex<PoolState>,
    ready: Condvar,
    pack_size: usize,
    pack_timeout: Duration,
}

impl MemoryPool {
    pub fn new(pack_size: usize, pack_timeout: Duration) -> MemoryPool {
        MemoryPool {
            inner: Mutex::new(PoolState {
                backlog: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
            pack_size: pack_size.max(1),
            pack_timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> MemoryPool {
        Self::new(settings.pack_size, settings.pack_timeout())
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_pack_size(&self) -> usize {
        self.pack_size
    }

    pub fn add(&self, tx: Transaction) {
        let mut state = self.state();
        state.backlog.push_back(tx);
        debug!("Transaction queued, backlog is {}", state.backlog.len());
        if state.backlog.len() >= self.pack_size {
            self.ready.notify_one();
        }
    }

    /// Puts transactions back at the head of the backlog, keeping their order.
    pub fn requeue(&self, txs: Vec<Transaction>) {
        if txs.is_empty() {
            return;
        }
        let mut state = self.state();
        for tx in txs.into_iter().rev() {
            state.backlog.push_front(tx);
        }
        if state.backlog.len() >= self.pack_size {
            self.ready.notify_one();
        }
    }

    /// Blocks until `pack_size` transactions are queued (returns exactly that
    /// many) or the pack timeout elapses (returns the whole backlog, possibly
    /// empty). Returns nothing once the pool is closed.
    pub fn get_pack(&self) -> Vec<Transaction> {
        let deadline = Instant::now() + self.pack_timeout;
        let mut state = self.state();
        loop {
            if state.closed {
                return vec![];
            }
            if state.backlog.len() >= self.pack_size {
                return state.backlog.drain(..self.pack_size).collect();
            }
            let now = Instant::now();
            if now >= deadline {
                return state.backlog.drain(..).collect();
            }
            let (guard, _) = self
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// Wakes every waiting consumer; later packs come back empty.
    pub fn close(&self) {
        self.state().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn len(&self) -> usize {
        self.state().backlog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().backlog.is_empty()
    }

    pub fn contains(&self, txid: &[u8]) -> bool {
        self.state().backlog.iter().any(|tx| tx.get_id() == txid)
    }
}
