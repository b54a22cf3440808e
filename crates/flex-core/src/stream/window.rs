//! Credit-based send window.
//!
//! Each stream may have at most `credit` unacknowledged bytes in flight.
//! Writes queue in order; the head write is cut into fragments while credit
//! lasts, and the rest waits for the peer's data acks to return credit.

use crate::error::{Error, Result};
use crate::packet::MAX_PAYLOAD_SIZE;
use std::collections::VecDeque;
use tokio::sync::oneshot;

/// Default largest data frame payload (16 KiB)
pub const DEFAULT_MAX_FRAGMENT: usize = 16 * 1024;

/// Default credit granted to a new stream (512 KiB)
pub const DEFAULT_INITIAL_CREDIT: u32 = 512 * 1024;

/// Flow-control parameters for streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// Largest payload per data frame
    pub max_fragment: usize,
    /// Credit a stream starts with
    pub initial_credit: u32,
    /// Upper bound on credit after acks; `None` leaves it unbounded
    pub max_credit: Option<u32>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            max_fragment: DEFAULT_MAX_FRAGMENT,
            initial_credit: DEFAULT_INITIAL_CREDIT,
            max_credit: None,
        }
    }
}

impl WindowConfig {
    /// Check the parameters describe a usable window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the fragment size is zero or does
    /// not fit a frame, or the credit cap is below the initial credit.
    pub fn validate(&self) -> Result<()> {
        if self.max_fragment == 0 || self.max_fragment > MAX_PAYLOAD_SIZE {
            return Err(Error::InvalidConfig(
                format!("max_fragment must be 1..={MAX_PAYLOAD_SIZE}").into(),
            ));
        }
        if self.initial_credit == 0 {
            return Err(Error::InvalidConfig("initial_credit must be non-zero".into()));
        }
        if let Some(cap) = self.max_credit {
            if cap < self.initial_credit {
                return Err(Error::InvalidConfig(
                    "max_credit must not be below initial_credit".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Completion for one queued write
pub(crate) type WriteDone = oneshot::Sender<Result<()>>;

#[derive(Debug)]
struct WriteOp {
    data: Vec<u8>,
    offset: usize,
    done: Option<WriteDone>,
}

impl WriteOp {
    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn complete(&mut self, result: Result<()>) {
        if let Some(done) = self.done.take() {
            let _ = done.send(result);
        }
    }
}

/// Queue of pending writes plus the credit that gates them
#[derive(Debug)]
pub(crate) struct SendWindow {
    max_fragment: usize,
    max_credit: Option<u64>,
    credit: u64,
    queue: VecDeque<WriteOp>,
}

impl SendWindow {
    pub(crate) fn new(config: &WindowConfig) -> Self {
        Self {
            max_fragment: config.max_fragment.clamp(1, MAX_PAYLOAD_SIZE),
            max_credit: config.max_credit.map(u64::from),
            credit: u64::from(config.initial_credit),
            queue: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, data: Vec<u8>, done: Option<WriteDone>) {
        self.queue.push_back(WriteOp {
            data,
            offset: 0,
            done,
        });
    }

    pub(crate) fn add_credit(&mut self, bytes: u32) {
        self.credit = self.credit.saturating_add(u64::from(bytes));
        if let Some(cap) = self.max_credit {
            self.credit = self.credit.min(cap);
        }
    }

    /// Cut as many fragments as credit allows, completing writes whose last
    /// byte has been cut. Returned fragments must be sent in order.
    pub(crate) fn drain(&mut self) -> Vec<Vec<u8>> {
        let mut fragments = Vec::new();

        while let Some(head) = self.queue.front_mut() {
            if head.remaining() == 0 {
                head.complete(Ok(()));
                self.queue.pop_front();
                continue;
            }
            if self.credit == 0 {
                break;
            }

            let credit = usize::try_from(self.credit).unwrap_or(usize::MAX);
            let len = head.remaining().min(self.max_fragment).min(credit);
            fragments.push(head.data[head.offset..head.offset + len].to_vec());
            head.offset += len;
            self.credit -= len as u64;
        }

        fragments
    }

    pub(crate) fn fail_all(&mut self, err: &Error) {
        for mut op in self.queue.drain(..) {
            op.complete(Err(err.clone()));
        }
    }

    pub(crate) fn credit(&self) -> u64 {
        self.credit
    }

    pub(crate) fn queued_writes(&self) -> usize {
        self.queue.len()
    }
}
