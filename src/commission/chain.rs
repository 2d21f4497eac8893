//! Referral chain traversal
//!
//! The referral edge (`accounts.referred_by_user_id`) is walked one hop at a
//! time and never materialized. Every walk carries a visited set so a
//! corrupted, circular chain terminates instead of looping.

use rusqlite::Connection;
use std::collections::HashSet;

use crate::error::{LedgerError, LedgerResult};
use crate::store::accounts;

/// Visited-set guard for one upward walk.
#[derive(Debug, Clone)]
pub struct ReferralWalk {
    visited: HashSet<String>,
    path: Vec<String>,
}

impl ReferralWalk {
    /// Start a walk at `origin`. The origin counts as visited, so a chain that
    /// leads back to it is a cycle.
    pub fn new(origin: &str) -> Self {
        let mut visited = HashSet::new();
        visited.insert(origin.to_string());
        Self {
            visited,
            path: vec![origin.to_string()],
        }
    }

    /// Record a step to `user_id`. Returns `false` if it was already visited.
    pub fn step(&mut self, user_id: &str) -> bool {
        if !self.visited.insert(user_id.to_string()) {
            return false;
        }
        self.path.push(user_id.to_string());
        true
    }

    /// Users visited so far, origin first.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn depth(&self) -> usize {
        self.path.len() - 1
    }
}

/// Ancestors of `user_id`, nearest first.
///
/// Stops at the root, at a dangling edge (an ancestor with no account), or
/// before revisiting anyone.
pub(crate) fn ancestors(conn: &Connection, user_id: &str) -> LedgerResult<Vec<String>> {
    let mut walk = ReferralWalk::new(user_id);
    let mut current = user_id.to_string();
    loop {
        let next = match accounts::referrer_of(conn, &current) {
            Ok(Some(next)) => next,
            Ok(None) => break,
            Err(LedgerError::NotFound { .. }) if current != user_id => break,
            Err(e) => return Err(e),
        };
        if !walk.step(&next) {
            break;
        }
        current = next;
    }
    Ok(walk.path[1..].to_vec())
}

/// Reject linking `user_id` under `referrer_id` when the link would close a
/// cycle, i.e. `user_id` is already an ancestor of `referrer_id`.
pub(crate) fn check_link(conn: &Connection, user_id: &str, referrer_id: &str) -> LedgerResult<()> {
    if user_id == referrer_id {
        return Err(LedgerError::InvalidReferralChain {
            user_id: user_id.to_string(),
            reason: "a user cannot refer themselves".to_string(),
        });
    }
    if ancestors(conn, referrer_id)?.iter().any(|a| a == user_id) {
        return Err(LedgerError::InvalidReferralChain {
            user_id: user_id.to_string(),
            reason: format!("{} is already upline of {}", user_id, referrer_id),
        });
    }
    Ok(())
}
