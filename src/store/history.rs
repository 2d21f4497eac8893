//! Transaction history, newest first, with restartable cursors.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::postings::{row_to_transaction, TRANSACTION_COLUMNS};
use super::LedgerStore;
use crate::error::LedgerResult;
use crate::models::Transaction;

/// Largest page a single call will return.
pub const MAX_PAGE_SIZE: usize = 500;

/// Position in a user's history. Resuming from a cursor yields exactly the
/// entries older than the last one already seen, even if new entries were
/// posted in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryCursor {
    pub before_seq: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub entries: Vec<Transaction>,
    /// `None` once the oldest entry has been returned.
    pub next_cursor: Option<HistoryCursor>,
}

pub(crate) fn page(
    conn: &Connection,
    user_id: &str,
    cursor: Option<HistoryCursor>,
    limit: usize,
) -> LedgerResult<HistoryPage> {
    let limit = limit.clamp(1, MAX_PAGE_SIZE);
    // One extra row tells us whether another page exists.
    let fetch = (limit + 1) as i64;
    let before = cursor.map(|c| c.before_seq).unwrap_or(i64::MAX);

    let sql = format!(
        "SELECT {} FROM transactions WHERE user_id = ?1 AND seq < ?2 ORDER BY seq DESC LIMIT ?3",
        TRANSACTION_COLUMNS
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let mut entries = stmt
        .query_map(params![user_id, before, fetch], row_to_transaction)?
        .collect::<Result<Vec<_>, _>>()?;

    let next_cursor = if entries.len() > limit {
        entries.truncate(limit);
        entries.last().map(|t| HistoryCursor { before_seq: t.seq })
    } else {
        None
    };

    Ok(HistoryPage {
        entries,
        next_cursor,
    })
}

/// Lazily pages through a user's whole history, newest first.
pub struct HistoryIter<'a> {
    store: &'a LedgerStore,
    user_id: String,
    page_size: usize,
    buffer: VecDeque<Transaction>,
    cursor: Option<HistoryCursor>,
    exhausted: bool,
}

impl<'a> HistoryIter<'a> {
    pub(crate) fn new(store: &'a LedgerStore, user_id: &str, page_size: usize) -> Self {
        Self {
            store,
            user_id: user_id.to_string(),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            buffer: VecDeque::new(),
            cursor: None,
            exhausted: false,
        }
    }

    /// Resume after an entry seen earlier.
    pub fn starting_after(mut self, cursor: HistoryCursor) -> Self {
        self.cursor = Some(cursor);
        self
    }
}

impl Iterator for HistoryIter<'_> {
    type Item = LedgerResult<Transaction>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(t) = self.buffer.pop_front() {
            return Some(Ok(t));
        }
        if self.exhausted {
            return None;
        }

        match self
            .store
            .transaction_history(&self.user_id, self.cursor, self.page_size)
        {
            Ok(page) => {
                self.cursor = page.next_cursor;
                self.exhausted = page.next_cursor.is_none();
                self.buffer.extend(page.entries);
                self.buffer.pop_front().map(Ok)
            }
            Err(e) => {
                self.exhausted = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Reference, ReferenceType, TransactionType};
    use crate::store::{NewEntry, Overdraft};

    fn store_with_entries(n: i64) -> LedgerStore {
        let store = LedgerStore::open_memory().unwrap();
        store.open_account("u1", None).unwrap();
        store.open_account("u2", None).unwrap();
        for i in 1..=n {
            store
                .post_transaction(
                    NewEntry::new(
                        "u1",
                        TransactionType::Game,
                        i * 100,
                        Reference::new(ReferenceType::Game, format!("round-{}", i)),
                    ),
                    Overdraft::Reject,
                )
                .unwrap();
        }
        store
            .post_transaction(
                NewEntry::new(
                    "u2",
                    TransactionType::Game,
                    999,
                    Reference::new(ReferenceType::Game, "other"),
                ),
                Overdraft::Reject,
            )
            .unwrap();
        store
    }

    #[test]
    fn test_pages_are_reverse_chronological_and_finite() {
        let store = store_with_entries(5);

        let first = store.transaction_history("u1", None, 2).unwrap();
        assert_eq!(
            first.entries.iter().map(|t| t.amount).collect::<Vec<_>>(),
            vec![500, 400]
        );
        let second = store
            .transaction_history("u1", first.next_cursor, 2)
            .unwrap();
        assert_eq!(
            second.entries.iter().map(|t| t.amount).collect::<Vec<_>>(),
            vec![300, 200]
        );
        let third = store
            .transaction_history("u1", second.next_cursor, 2)
            .unwrap();
        assert_eq!(third.entries.len(), 1);
        assert!(third.next_cursor.is_none());
    }

    #[test]
    fn test_exact_page_boundary_has_no_dangling_cursor() {
        let store = store_with_entries(4);
        let first = store.transaction_history("u1", None, 4).unwrap();
        assert_eq!(first.entries.len(), 4);
        assert!(first.next_cursor.is_none());
    }

    #[test]
    fn test_cursor_is_stable_across_new_postings() {
        let store = store_with_entries(3);
        let first = store.transaction_history("u1", None, 1).unwrap();

        store
            .post_transaction(
                NewEntry::new(
                    "u1",
                    TransactionType::Game,
                    10_000,
                    Reference::new(ReferenceType::Game, "late"),
                ),
                Overdraft::Reject,
            )
            .unwrap();

        let rest: Vec<_> = store
            .history_iter("u1", 1)
            .starting_after(first.next_cursor.unwrap())
            .map(|r| r.unwrap().amount)
            .collect();
        assert_eq!(rest, vec![200, 100]);
    }

    #[test]
    fn test_iterator_walks_everything_once() {
        let store = store_with_entries(7);
        let amounts: Vec<_> = store
            .history_iter("u1", 3)
            .map(|r| r.unwrap().amount)
            .collect();
        assert_eq!(amounts, vec![700, 600, 500, 400, 300, 200, 100]);
    }
}
