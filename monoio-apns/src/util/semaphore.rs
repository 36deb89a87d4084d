use std::{
    cell::RefCell,
    collections::BTreeMap,
    future::Future,
    pin::Pin,
    task::{Context, Poll, Waker},
};

use thiserror::Error as ThisError;

#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
#[error("semaphore closed")]
pub struct SemaphoreClosed;

/// Counting semaphore for a single thread whose bound can be changed while
/// permits are held.
///
/// Lowering the bound below the number of acquired permits never revokes
/// them; new acquirers simply wait until enough permits are released.
#[derive(Debug)]
pub struct DynamicSemaphore {
    state: RefCell<State>,
}

#[derive(Debug)]
struct State {
    bound: usize,
    acquired: usize,
    closed: bool,
    next_key: u64,
    waiters: BTreeMap<u64, Waker>,
}

impl DynamicSemaphore {
    pub fn new(bound: usize) -> Self {
        Self {
            state: RefCell::new(State {
                bound,
                acquired: 0,
                closed: false,
                next_key: 0,
                waiters: BTreeMap::new(),
            }),
        }
    }

    pub fn bound(&self) -> usize {
        self.state.borrow().bound
    }

    pub fn acquired(&self) -> usize {
        self.state.borrow().acquired
    }

    pub fn available(&self) -> usize {
        let state = self.state.borrow();
        state.bound.saturating_sub(state.acquired)
    }

    /// No permit can be handed out right now.
    pub fn is_exhausted(&self) -> bool {
        self.available() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    pub fn try_acquire(&self) -> Result<bool, SemaphoreClosed> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return Err(SemaphoreClosed);
        }
        if state.acquired < state.bound {
            state.acquired += 1;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn acquire(&self) -> Acquire<'_> {
        Acquire {
            semaphore: self,
            key: None,
        }
    }

    /// Acquire a permit which is given back when the guard drops.
    pub async fn acquire_permit(&self) -> Result<Permit<'_>, SemaphoreClosed> {
        self.acquire().await?;
        Ok(Permit { semaphore: self })
    }

    pub fn release(&self) {
        let wakers = {
            let mut state = self.state.borrow_mut();
            state.acquired = state.acquired.saturating_sub(1);
            if state.acquired < state.bound {
                std::mem::take(&mut state.waiters)
            } else {
                BTreeMap::new()
            }
        };
        wakers.into_values().for_each(Waker::wake);
    }

    pub fn set_bound(&self, bound: usize) {
        let wakers = {
            let mut state = self.state.borrow_mut();
            state.bound = bound;
            if state.acquired < state.bound {
                std::mem::take(&mut state.waiters)
            } else {
                BTreeMap::new()
            }
        };
        wakers.into_values().for_each(Waker::wake);
    }

    /// Fail every current and future acquirer.
    pub fn close(&self) {
        let wakers = {
            let mut state = self.state.borrow_mut();
            state.closed = true;
            std::mem::take(&mut state.waiters)
        };
        wakers.into_values().for_each(Waker::wake);
    }
}

pub struct Acquire<'a> {
    semaphore: &'a DynamicSemaphore,
    key: Option<u64>,
}

impl Future for Acquire<'_> {
    type Output = Result<(), SemaphoreClosed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = Pin::into_inner(self);
        let mut state = this.semaphore.state.borrow_mut();
        if let Some(key) = this.key.take() {
            state.waiters.remove(&key);
        }
        if state.closed {
            return Poll::Ready(Err(SemaphoreClosed));
        }
        if state.acquired < state.bound {
            state.acquired += 1;
            return Poll::Ready(Ok(()));
        }
        let key = state.next_key;
        state.next_key += 1;
        state.waiters.insert(key, cx.waker().clone());
        this.key = Some(key);
        Poll::Pending
    }
}

impl Drop for Acquire<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            if let Ok(mut state) = self.semaphore.state.try_borrow_mut() {
                state.waiters.remove(&key);
            }
        }
    }
}

pub struct Permit<'a> {
    semaphore: &'a DynamicSemaphore,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}
