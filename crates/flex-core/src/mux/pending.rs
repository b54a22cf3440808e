//! Pending asynchronous requests keyed by correlation id.
//!
//! Dials and pings share the same shape: an entry is inserted when the
//! request goes out, and removed exactly once, either by the matching reply
//! or by its timer. Whoever removes the entry resolves it.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

/// One outstanding request
#[derive(Debug)]
pub(crate) struct Pending<T, C> {
    pub(crate) context: C,
    started: Instant,
    token: u64,
    reply: oneshot::Sender<Result<T>>,
    timer: Option<AbortHandle>,
}

impl<T, C> Pending<T, C> {
    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Hand the result to the waiting caller. A caller that stopped waiting
    /// is not an error.
    pub(crate) fn resolve(self, result: Result<T>) {
        let _ = self.reply.send(result);
    }

    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Pending requests for one correlation domain
#[derive(Debug)]
pub(crate) struct PendingMap<T, C> {
    entries: HashMap<u16, Pending<T, C>>,
    next_token: u64,
}

impl<T, C> Default for PendingMap<T, C> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_token: 0,
        }
    }
}

impl<T, C> PendingMap<T, C> {
    /// Register a request under `id`.
    ///
    /// Returns the entry's token, which its timer must present to expire it.
    /// On a duplicate id the reply is handed back untouched.
    pub(crate) fn insert(
        &mut self,
        id: u16,
        context: C,
        reply: oneshot::Sender<Result<T>>,
    ) -> std::result::Result<u64, (Error, oneshot::Sender<Result<T>>)> {
        if self.entries.contains_key(&id) {
            return Err((Error::DuplicateRequest(id), reply));
        }
        self.next_token = self.next_token.wrapping_add(1);
        let token = self.next_token;
        self.entries.insert(
            id,
            Pending {
                context,
                started: Instant::now(),
                token,
                reply,
                timer: None,
            },
        );
        Ok(token)
    }

    /// Attach the timeout timer to an entry.
    pub(crate) fn arm(&mut self, id: u16, timer: AbortHandle) {
        match self.entries.get_mut(&id) {
            Some(entry) => entry.timer = Some(timer),
            None => timer.abort(),
        }
    }

    /// Remove an entry because its reply arrived.
    pub(crate) fn take(&mut self, id: u16) -> Option<Pending<T, C>> {
        let mut entry = self.entries.remove(&id)?;
        entry.disarm();
        Some(entry)
    }

    /// Remove an entry because its timer fired.
    ///
    /// A timer that lost the race to a reply, and whose id has since been
    /// reused, carries a stale token and removes nothing.
    pub(crate) fn expire(&mut self, id: u16, token: u64) -> Option<Pending<T, C>> {
        if self.entries.get(&id)?.token != token {
            return None;
        }
        self.entries.remove(&id)
    }

    /// Remove every entry.
    pub(crate) fn drain(&mut self) -> Vec<(u16, Pending<T, C>)> {
        self.entries
            .drain()
            .map(|(id, mut entry)| {
                entry.disarm();
                (id, entry)
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
