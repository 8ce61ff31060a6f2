//! Shared book registry and adapter capability used by the three concrete
//! feed variants (IncrementalWS, SnapshotWS, SnapshotPoll).

use crate::book::state::BookState;
use crate::symbol::{Market, Symbol, Venue};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BookKey {
    pub venue: Venue,
    pub market: Market,
    pub symbol: Symbol,
}

pub type BookHandle = Arc<RwLock<BookState>>;

/// Registry of live book state, keyed by (venue, market, symbol). Each
/// handle is mutated exclusively by its owning feed loop and read via
/// `top_n` snapshots by the metrics tick.
#[derive(Clone, Default)]
pub struct BookRegistry {
    books: Arc<DashMap<BookKey, BookHandle>>,
}

impl BookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self, key: BookKey) -> BookHandle {
        self.books
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(BookState::new())))
            .clone()
    }

    pub fn get(&self, key: &BookKey) -> Option<BookHandle> {
        self.books.get(key).map(|entry| entry.clone())
    }
}

/// Capability shared by all three book adapter variants: deliver a sorted
/// top-N snapshot of both sides to the engine on demand. The concrete
/// mutation strategy (incremental diff, full-snapshot diff, REST poll) lives
/// in each variant's own module; `BookRegistry` is how the engine reaches in
/// without caring which variant produced the data.
pub trait BookAdapter {
    fn key(&self) -> BookKey;
}
