//! Transmit contexts.
//!
//! Every outbound transfer, CAN frame or control command, occupies one context from
//! submission until its write completion. The fixed number of contexts is the admission
//! control for the transmit path: when [`TxContextPool::acquire`] returns `None` the caller
//! has to stop queueing until a completion frees a context.
//!
//! [`TxContextPool::force_release_all`] starts a new epoch. Handles from an older epoch are
//! still owned by transfers the transport has not finished cancelling; releasing them later
//! must not free a context that was handed out again in the meantime.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::can::Frame;
use crate::udt1cri::constants::UDT1CRI_MAX_TX_URBS;

#[derive(Debug, Default)]
struct Context {
    in_use: bool,
    epoch: u64,
    dlc: u8,
    can: bool,
    echo: Option<Frame>,
}

/// Handle to an acquired context.
///
/// Not `Clone`: the handle travels with the transfer and is given back exactly once, by the
/// completion.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a slot that is never released stays in use forever"]
pub struct TxSlot {
    index: usize,
    epoch: u64,
}

impl TxSlot {
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Bookkeeping of an in-use context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotInfo {
    pub dlc: u8,
    pub is_can_frame: bool,
}

/// Contents of a context at the moment it was released.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotRecord {
    pub index: usize,
    pub dlc: u8,
    pub is_can_frame: bool,
    /// Frame to hand back to the network side once the transfer is done.
    pub echo: Option<Frame>,
}

#[derive(Debug)]
struct Contexts {
    slots: Vec<Context>,
    epoch: u64,
}

#[derive(Debug)]
pub struct TxContextPool {
    contexts: Mutex<Contexts>,
}

impl Default for TxContextPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TxContextPool {
    pub fn new() -> Self {
        Self {
            contexts: Mutex::new(Contexts {
                slots: (0..UDT1CRI_MAX_TX_URBS).map(|_| Context::default()).collect(),
                epoch: 0,
            }),
        }
    }

    fn contexts(&self) -> MutexGuard<'_, Contexts> {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// First free context, or `None` when all of them are in flight.
    pub fn acquire(&self) -> Option<TxSlot> {
        let mut contexts = self.contexts();
        let epoch = contexts.epoch;
        let (index, ctx) = contexts
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, ctx)| !ctx.in_use)?;
        ctx.in_use = true;
        ctx.epoch = epoch;
        Some(TxSlot { index, epoch })
    }

    /// Marks the context as carrying `frame`. Contexts without a frame carry control commands.
    pub fn bind_frame(&self, slot: &TxSlot, frame: Frame) {
        let mut contexts = self.contexts();
        let ctx = &mut contexts.slots[slot.index];
        if !ctx.in_use || ctx.epoch != slot.epoch {
            return;
        }
        ctx.dlc = frame.dlc();
        ctx.can = true;
        ctx.echo = Some(frame);
    }

    pub fn info(&self, index: usize) -> Option<SlotInfo> {
        let contexts = self.contexts();
        let ctx = contexts.slots.get(index)?;
        ctx.in_use.then_some(SlotInfo {
            dlc: ctx.dlc,
            is_can_frame: ctx.can,
        })
    }

    /// Gives the context back and returns what it held.
    ///
    /// Returns `None` without touching the pool when the context was already force-released,
    /// even if it has been acquired again since.
    pub fn release(&self, slot: TxSlot) -> Option<SlotRecord> {
        let mut contexts = self.contexts();
        let index = slot.index;
        let ctx = contexts.slots.get_mut(index)?;
        if !ctx.in_use || ctx.epoch != slot.epoch {
            return None;
        }

        let ctx = std::mem::take(ctx);
        Some(SlotRecord {
            index,
            dlc: ctx.dlc,
            is_can_frame: ctx.can,
            echo: ctx.echo,
        })
    }

    /// Releases every context still in use and returns their contents. Outstanding handles
    /// become stale.
    pub fn force_release_all(&self) -> Vec<SlotRecord> {
        let mut contexts = self.contexts();
        contexts.epoch += 1;
        contexts
            .slots
            .iter_mut()
            .enumerate()
            .filter(|(_, ctx)| ctx.in_use)
            .map(|(index, ctx)| {
                let ctx = std::mem::take(ctx);
                SlotRecord {
                    index,
                    dlc: ctx.dlc,
                    is_can_frame: ctx.can,
                    echo: ctx.echo,
                }
            })
            .collect()
    }

    pub fn in_use(&self) -> usize {
        self.contexts().slots.iter().filter(|ctx| ctx.in_use).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::Identifier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn frame(len: usize) -> Frame {
        Frame::new(0, Identifier::Standard(0x123), &vec![0xaa; len]).unwrap()
    }

    #[test]
    fn pool_bound() {
        let pool = TxContextPool::new();
        let slots: Vec<TxSlot> = (0..UDT1CRI_MAX_TX_URBS)
            .map(|_| pool.acquire().unwrap())
            .collect();

        assert_eq!(pool.in_use(), UDT1CRI_MAX_TX_URBS);
        assert!(pool.acquire().is_none());

        for (i, slot) in slots.iter().enumerate() {
            assert_eq!(slot.index(), i);
        }
        for slot in slots {
            pool.release(slot);
        }
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn slot_reuse_clears_state() {
        let pool = TxContextPool::new();
        let first = pool.acquire().unwrap();
        let _second = pool.acquire().unwrap();

        pool.bind_frame(&first, frame(5));
        assert_eq!(
            pool.info(0),
            Some(SlotInfo {
                dlc: 5,
                is_can_frame: true
            })
        );

        let record = pool.release(first).unwrap();
        assert_eq!(record.index, 0);
        assert_eq!(record.dlc, 5);
        assert!(record.is_can_frame);
        assert_eq!(record.echo, Some(frame(5)));
        assert_eq!(pool.info(0), None);

        let again = pool.acquire().unwrap();
        assert_eq!(again.index(), 0);
        assert_eq!(
            pool.info(0),
            Some(SlotInfo {
                dlc: 0,
                is_can_frame: false
            })
        );
    }

    #[test]
    fn stale_release_keeps_new_owner() {
        let pool = TxContextPool::new();
        let stale = pool.acquire().unwrap();
        pool.bind_frame(&stale, frame(1));
        assert_eq!(pool.force_release_all().len(), 1);

        let current = pool.acquire().unwrap();
        assert_eq!(current.index(), stale.index());
        pool.bind_frame(&stale, frame(7));
        pool.bind_frame(&current, frame(3));

        assert!(pool.release(stale).is_none());
        assert_eq!(pool.in_use(), 1);
        assert_eq!(
            pool.info(current.index()),
            Some(SlotInfo {
                dlc: 3,
                is_can_frame: true
            })
        );

        let record = pool.release(current).unwrap();
        assert_eq!(record.echo, Some(frame(3)));
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn force_release() {
        let pool = TxContextPool::new();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        pool.bind_frame(&b, frame(8));
        pool.release(c);

        let records = pool.force_release_all();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].index, a.index());
        assert!(!records[0].is_can_frame);
        assert_eq!(records[1].echo, Some(frame(8)));
        assert_eq!(pool.in_use(), 0);

        // Late completions of force-released contexts are no-ops
        assert!(pool.release(a).is_none());
        assert!(pool.release(b).is_none());
    }

    #[test]
    fn concurrent_acquire_release() {
        let pool = TxContextPool::new();
        let in_flight = AtomicUsize::new(0);
        let max_in_flight = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..32 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        if let Some(slot) = pool.acquire() {
                            let n = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                            max_in_flight.fetch_max(n, Ordering::SeqCst);
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                            assert!(pool.release(slot).is_some());
                        }
                    }
                });
            }
        });

        assert!(max_in_flight.load(Ordering::SeqCst) <= UDT1CRI_MAX_TX_URBS);
        assert_eq!(pool.in_use(), 0);
    }
}
