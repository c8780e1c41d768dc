//! In-memory block source for pipeline and ingestion tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{BlockSource, SourceError};
use crate::types::{Block, Height};

#[derive(Clone, Default)]
pub(crate) struct MockSource {
    chain: Arc<Mutex<Vec<Block>>>,
    failing_tips: Arc<AtomicUsize>,
    failing_fetches: Arc<AtomicUsize>,
    fetched: Arc<Mutex<Vec<Height>>>,
    crash_at: Arc<Mutex<Option<Height>>>,
    fallback: Option<Box<MockSource>>,
}

impl MockSource {
    /// Blocks must be contiguous, `blocks[i].height == blocks[0].height + i`.
    pub(crate) fn new(blocks: Vec<Block>) -> Self {
        Self {
            chain: Arc::new(Mutex::new(blocks)),
            ..Self::default()
        }
    }

    pub(crate) fn with_fallback(mut self, fallback: MockSource) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }

    pub(crate) fn fail_next_tips(&self, n: usize) {
        self.failing_tips.store(n, Ordering::SeqCst);
    }

    pub(crate) fn fail_next_fetches(&self, n: usize) {
        self.failing_fetches.store(n, Ordering::SeqCst);
    }

    /// Makes `fetch_block(height)` panic, taking the producer task down.
    pub(crate) fn crash_at(&self, height: Height) {
        *self.crash_at.lock().unwrap() = Some(height);
    }

    /// Replaces every block at or above `from` with `blocks`.
    pub(crate) fn reorg(&self, from: Height, blocks: Vec<Block>) {
        let mut chain = self.chain.lock().unwrap();
        chain.retain(|b| b.height < from);
        chain.extend(blocks);
    }

    pub(crate) fn push(&self, block: Block) {
        self.chain.lock().unwrap().push(block);
    }

    /// Heights requested through `fetch_block`, successful or not.
    pub(crate) fn fetched(&self) -> Vec<Height> {
        self.fetched.lock().unwrap().clone()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl BlockSource for MockSource {
    async fn tip_height(&self) -> Result<Height, SourceError> {
        if Self::take_failure(&self.failing_tips) {
            return Err(SourceError::Transport("connection refused".into()));
        }
        let chain = self.chain.lock().unwrap();
        chain
            .last()
            .map(|b| b.height)
            .ok_or_else(|| SourceError::Rpc {
                code: -1,
                message: "empty chain".into(),
            })
    }

    async fn fetch_block(&self, height: Height) -> Result<Block, SourceError> {
        self.fetched.lock().unwrap().push(height);
        if *self.crash_at.lock().unwrap() == Some(height) {
            panic!("node client crashed at height {height}");
        }
        if Self::take_failure(&self.failing_fetches) {
            return Err(SourceError::Transport("timed out".into()));
        }
        let chain = self.chain.lock().unwrap();
        chain
            .iter()
            .find(|b| b.height == height)
            .cloned()
            .ok_or(SourceError::BeyondTip { height })
    }

    fn fallback(&self) -> Option<Self> {
        self.fallback.as_deref().cloned()
    }

    fn name(&self) -> &'static str {
        if self.fallback.is_some() { "mock-primary" } else { "mock" }
    }
}
