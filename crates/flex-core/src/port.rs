//! Logical port allocation.
//!
//! Listen binds claim explicit ports anywhere in the full range. Outbound
//! dials draw from a narrower ephemeral sub-range using a rotating cursor,
//! so a just-released port is not handed out again immediately.

use crate::error::{Error, Result};
use std::collections::HashSet;

/// Lowest valid port
pub const PORT_MIN: u16 = 1;

/// Highest valid port
pub const PORT_MAX: u16 = u16::MAX;

/// Start of the default ephemeral range
pub const EPHEMERAL_MIN: u16 = 49152;

/// End of the default ephemeral range
pub const EPHEMERAL_MAX: u16 = u16::MAX;

/// Tracks used ports and hands out free ones.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    min: u16,
    max: u16,
    ephemeral: Option<(u16, u16)>,
    used: HashSet<u16>,
    cursor: u16,
}

impl PortAllocator {
    /// Allocator over `min..=max` with no ephemeral sub-range.
    #[must_use]
    pub fn new(min: u16, max: u16) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min,
            max,
            ephemeral: None,
            used: HashSet::new(),
            cursor: min,
        }
    }

    /// Restrict [`allocate`](Self::allocate) to `lo..=hi`, clamped into the
    /// full range. Explicit [`reserve`](Self::reserve) still covers the full range.
    #[must_use]
    pub fn with_ephemeral(mut self, lo: u16, hi: u16) -> Self {
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        let lo = lo.clamp(self.min, self.max);
        let hi = hi.clamp(self.min, self.max);
        self.ephemeral = Some((lo, hi));
        self.cursor = lo;
        self
    }

    fn alloc_range(&self) -> (u16, u16) {
        self.ephemeral.unwrap_or((self.min, self.max))
    }

    /// Claim the next free port after the cursor, wrapping at the range end.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PortsExhausted`] if a full cycle finds nothing free.
    pub fn allocate(&mut self) -> Result<u16> {
        let (lo, hi) = self.alloc_range();
        if self.cursor < lo || self.cursor > hi {
            self.cursor = lo;
        }

        let span = u32::from(hi - lo) + 1;
        for _ in 0..span {
            let port = self.cursor;
            self.cursor = if self.cursor >= hi { lo } else { self.cursor + 1 };
            if self.used.insert(port) {
                return Ok(port);
            }
        }

        Err(Error::PortsExhausted)
    }

    /// Claim a specific port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRangePort`] or [`Error::PortAlreadyInUse`].
    pub fn reserve(&mut self, port: u16) -> Result<()> {
        if port < self.min || port > self.max {
            return Err(Error::OutOfRangePort(port));
        }
        if !self.used.insert(port) {
            return Err(Error::PortAlreadyInUse(port));
        }
        Ok(())
    }

    /// Return a port to the pool. Releasing a free port is a no-op.
    pub fn release(&mut self, port: u16) {
        self.used.remove(&port);
    }

    /// Whether `port` is currently claimed.
    #[must_use]
    pub fn is_used(&self, port: u16) -> bool {
        self.used.contains(&port)
    }

    /// Number of claimed ports.
    #[must_use]
    pub fn used_count(&self) -> usize {
        self.used.len()
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(PORT_MIN, PORT_MAX).with_ephemeral(EPHEMERAL_MIN, EPHEMERAL_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_starts_at_ephemeral_min() {
        let mut ports = PortAllocator::default();
        assert_eq!(ports.allocate().unwrap(), EPHEMERAL_MIN);
        assert_eq!(ports.allocate().unwrap(), EPHEMERAL_MIN + 1);
    }

    #[test]
    fn test_allocate_skips_reserved() {
        let mut ports = PortAllocator::new(10, 20);
        ports.reserve(10).unwrap();
        ports.reserve(11).unwrap();
        assert_eq!(ports.allocate().unwrap(), 12);
    }

    #[test]
    fn test_cursor_rotates_past_released() {
        let mut ports = PortAllocator::new(1, 5);
        let first = ports.allocate().unwrap();
        ports.release(first);
        // The cursor has moved on, so the next port is a fresh one.
        assert_eq!(ports.allocate().unwrap(), first + 1);
    }

    #[test]
    fn test_exhaustion_then_release() {
        let mut ports = PortAllocator::new(100, 103);
        for _ in 0..4 {
            ports.allocate().unwrap();
        }
        assert_eq!(ports.allocate(), Err(Error::PortsExhausted));

        ports.release(102);
        assert_eq!(ports.allocate().unwrap(), 102);
        assert_eq!(ports.allocate(), Err(Error::PortsExhausted));
    }

    #[test]
    fn test_wraps_at_range_end() {
        let mut ports = PortAllocator::new(1, 3);
        assert_eq!(ports.allocate().unwrap(), 1);
        assert_eq!(ports.allocate().unwrap(), 2);
        ports.release(1);
        assert_eq!(ports.allocate().unwrap(), 3);
        assert_eq!(ports.allocate().unwrap(), 1);
    }

    #[test]
    fn test_reserve_errors() {
        let mut ports = PortAllocator::new(1000, 2000);
        assert_eq!(ports.reserve(999), Err(Error::OutOfRangePort(999)));
        assert_eq!(ports.reserve(2001), Err(Error::OutOfRangePort(2001)));
        ports.reserve(1500).unwrap();
        assert_eq!(ports.reserve(1500), Err(Error::PortAlreadyInUse(1500)));
    }

    #[test]
    fn test_reserve_outside_ephemeral_range() {
        let mut ports = PortAllocator::default();
        ports.reserve(8).unwrap();
        assert!(ports.is_used(8));
        assert_eq!(ports.allocate().unwrap(), EPHEMERAL_MIN);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut ports = PortAllocator::new(1, 10);
        ports.reserve(5).unwrap();
        ports.release(5);
        ports.release(5);
        assert!(!ports.is_used(5));
        assert_eq!(ports.used_count(), 0);
    }

    #[test]
    fn test_ephemeral_range_at_u16_max() {
        let mut ports = PortAllocator::new(1, u16::MAX).with_ephemeral(u16::MAX - 1, u16::MAX);
        assert_eq!(ports.allocate().unwrap(), u16::MAX - 1);
        assert_eq!(ports.allocate().unwrap(), u16::MAX);
        assert_eq!(ports.allocate(), Err(Error::PortsExhausted));
    }
}
