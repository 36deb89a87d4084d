use std::{
    cell::{Cell, RefCell},
    collections::HashSet,
};

use super::{SlotError, StreamId, DEFAULT_MAX_CONCURRENT_STREAMS, HIGHEST_ALLOWED_STREAM_ID};
use crate::util::DynamicSemaphore;

/// Hands out client stream ids for one connection while bounding how many
/// streams are open at the same time.
///
/// Ids start at 1 and grow by 2; an id is never handed out twice. The bound
/// follows the peer's MAX_CONCURRENT_STREAMS setting.
#[derive(Debug)]
pub struct StreamSlotAllocator {
    semaphore: DynamicSemaphore,
    // u64 so the step past the last valid id cannot overflow
    next_stream_id: Cell<u64>,
    open: RefCell<HashSet<StreamId>>,
}

impl Default for StreamSlotAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_STREAMS)
    }
}

impl StreamSlotAllocator {
    pub fn new(bound: usize) -> Self {
        Self::with_next_stream_id(bound, 1)
    }

    /// Start allocating at `next_stream_id` instead of 1, for a connection
    /// on which lower ids were already used.
    pub fn with_next_stream_id(bound: usize, next_stream_id: StreamId) -> Self {
        Self {
            semaphore: DynamicSemaphore::new(bound),
            next_stream_id: Cell::new(u64::from(next_stream_id | 1)),
            open: RefCell::new(HashSet::new()),
        }
    }

    /// Wait for a free slot and take the next stream id.
    pub async fn acquire(&self) -> Result<StreamId, SlotError> {
        if self.is_exhausted() {
            return Err(SlotError::Exhausted);
        }
        self.semaphore
            .acquire()
            .await
            .map_err(|_| SlotError::Closed)?;

        let stream_id = self.next_stream_id.get();
        if stream_id > u64::from(HIGHEST_ALLOWED_STREAM_ID) {
            #[cfg(feature = "logging")]
            tracing::debug!("stream ids exhausted while waiting for a slot");
            self.semaphore.release();
            return Err(SlotError::Exhausted);
        }
        self.next_stream_id.set(stream_id + 2);

        let stream_id = stream_id as StreamId;
        self.open.borrow_mut().insert(stream_id);
        Ok(stream_id)
    }

    /// Give the slot of `stream_id` back. Returns false if the stream does not
    /// hold a slot, e.g. because it was released already.
    pub fn release(&self, stream_id: StreamId) -> bool {
        if self.open.borrow_mut().remove(&stream_id) {
            self.semaphore.release();
            return true;
        }
        false
    }

    pub fn set_bound(&self, bound: usize) {
        #[cfg(feature = "logging")]
        tracing::debug!("stream slot bound {} -> {}", self.bound(), bound);
        self.semaphore.set_bound(bound);
    }

    pub fn bound(&self) -> usize {
        self.semaphore.bound()
    }

    pub fn is_busy(&self) -> bool {
        self.semaphore.is_exhausted()
    }

    /// Every stream id this allocator can produce has been produced.
    pub fn is_exhausted(&self) -> bool {
        self.next_stream_id.get() > u64::from(HIGHEST_ALLOWED_STREAM_ID)
    }

    pub fn in_flight(&self) -> usize {
        self.open.borrow().len()
    }

    /// Fail all waiters and refuse further allocations.
    pub fn destroy(&self) {
        self.open.borrow_mut().clear();
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use std::{rc::Rc, time::Duration};

    use super::*;

    #[monoio::test(timer_enabled = true)]
    async fn ids_are_odd_and_increasing() {
        let slots = StreamSlotAllocator::new(16);
        let mut last = 0;
        for _ in 0..16 {
            let id = slots.acquire().await.expect("slot");
            assert_eq!(id % 2, 1);
            assert!(id > last);
            last = id;
            slots.release(id);
        }
        assert_eq!(last, 31);
    }

    #[monoio::test(timer_enabled = true)]
    async fn first_acquire_uses_default_bound() {
        let slots = StreamSlotAllocator::default();
        assert_eq!(slots.bound(), DEFAULT_MAX_CONCURRENT_STREAMS);
        assert_eq!(slots.acquire().await, Ok(1));
        assert_eq!(slots.in_flight(), 1);
    }

    #[monoio::test(timer_enabled = true)]
    async fn bound_is_respected() {
        let slots = Rc::new(StreamSlotAllocator::new(2));
        let a = slots.acquire().await.expect("slot");
        let _b = slots.acquire().await.expect("slot");
        assert!(slots.is_busy());

        let waiter = {
            let slots = slots.clone();
            monoio::spawn(async move { slots.acquire().await })
        };
        monoio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(slots.in_flight(), 2);

        assert!(slots.release(a));
        assert_eq!(waiter.await, Ok(5));
        assert_eq!(slots.in_flight(), 2);
    }

    #[monoio::test(timer_enabled = true)]
    async fn raising_bound_wakes_waiter() {
        let slots = Rc::new(StreamSlotAllocator::new(1));
        slots.acquire().await.expect("slot");
        let waiter = {
            let slots = slots.clone();
            monoio::spawn(async move { slots.acquire().await })
        };
        monoio::time::sleep(Duration::from_millis(5)).await;
        slots.set_bound(10);
        assert_eq!(waiter.await, Ok(3));
        assert!(!slots.is_busy());
    }

    #[monoio::test(timer_enabled = true)]
    async fn exhaustion_does_not_wrap() {
        let slots = StreamSlotAllocator::with_next_stream_id(10, HIGHEST_ALLOWED_STREAM_ID);
        assert_eq!(slots.acquire().await, Ok(HIGHEST_ALLOWED_STREAM_ID));
        assert_eq!(slots.acquire().await, Err(SlotError::Exhausted));
        assert_eq!(slots.acquire().await, Err(SlotError::Exhausted));
        assert_eq!(slots.in_flight(), 1);
        assert!(slots.is_exhausted());
    }

    #[monoio::test(timer_enabled = true)]
    async fn release_is_idempotent() {
        let slots = StreamSlotAllocator::new(1);
        let id = slots.acquire().await.expect("slot");
        assert!(slots.release(id));
        assert!(!slots.release(id));
        assert!(!slots.release(99));
        assert_eq!(slots.in_flight(), 0);
        assert!(!slots.is_busy());
    }

    #[monoio::test(timer_enabled = true)]
    async fn destroy_fails_waiters() {
        let slots = Rc::new(StreamSlotAllocator::new(1));
        slots.acquire().await.expect("slot");
        let waiter = {
            let slots = slots.clone();
            monoio::spawn(async move { slots.acquire().await })
        };
        monoio::time::sleep(Duration::from_millis(5)).await;
        slots.destroy();
        assert_eq!(waiter.await, Err(SlotError::Closed));
        assert_eq!(slots.in_flight(), 0);
    }
}
