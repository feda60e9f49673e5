//! Bounded per-session queues
//!
//! Each session owns a message queue, an event queue and a private event
//! queue. Pushes on a terminated queue fail with [`SwitchError::QueueTerminated`]
//! instead of blocking, and termination wakes every waiter. Items pushed with
//! priority sit in a lane that is always drained before the normal lane; each
//! lane is FIFO.

use crate::errors::{Result, SwitchError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug)]
struct Lanes<T> {
    priority: VecDeque<T>,
    normal: VecDeque<T>,
    terminated: bool,
}

impl<T> Lanes<T> {
    fn len(&self) -> usize {
        self.priority.len() + self.normal.len()
    }

    fn pop(&mut self) -> Option<T> {
        self.priority.pop_front().or_else(|| self.normal.pop_front())
    }
}

/// A bounded, terminable FIFO with an optional priority lane
#[derive(Debug)]
pub struct SessionQueue<T> {
    name: &'static str,
    capacity: usize,
    lanes: Mutex<Lanes<T>>,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> SessionQueue<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            lanes: Mutex::new(Lanes {
                priority: VecDeque::new(),
                normal: VecDeque::new(),
                terminated: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lanes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_terminated(&self) -> bool {
        self.lanes.lock().terminated
    }

    fn push_inner(&self, item: T, priority: bool) -> std::result::Result<(), (T, SwitchError)> {
        let mut lanes = self.lanes.lock();
        if lanes.terminated {
            return Err((item, SwitchError::QueueTerminated));
        }
        if lanes.len() >= self.capacity {
            return Err((
                item,
                SwitchError::QueueFull {
                    capacity: self.capacity,
                },
            ));
        }
        if priority {
            lanes.priority.push_back(item);
        } else {
            lanes.normal.push_back(item);
        }
        drop(lanes);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Push without waiting; fails when full or terminated
    pub fn try_push(&self, item: T) -> Result<()> {
        self.push_inner(item, false).map_err(|(_, e)| e)
    }

    /// Push into the priority lane without waiting
    pub fn try_push_priority(&self, item: T) -> Result<()> {
        self.push_inner(item, true).map_err(|(_, e)| e)
    }

    /// Push, waiting for room; fails once the queue is terminated
    pub async fn push(&self, item: T) -> Result<()> {
        let mut item = item;
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            match self.push_inner(item, false) {
                Ok(()) => return Ok(()),
                Err((_, SwitchError::QueueTerminated)) => return Err(SwitchError::QueueTerminated),
                Err((back, _)) => item = back,
            }
            notified.await;
        }
    }

    /// Pop without waiting. `Ok(None)` means empty; a terminated queue reports
    /// [`SwitchError::QueueTerminated`]
    pub fn try_pop(&self) -> Result<Option<T>> {
        let mut lanes = self.lanes.lock();
        match lanes.pop() {
            Some(item) => {
                drop(lanes);
                self.not_full.notify_one();
                Ok(Some(item))
            }
            None if lanes.terminated => Err(SwitchError::QueueTerminated),
            None => Ok(None),
        }
    }

    /// Remove the first item, priority lane first, that satisfies `pred`.
    /// Items that do not match keep their place.
    pub fn pop_where(&self, mut pred: impl FnMut(&T) -> bool) -> Option<T> {
        let mut lanes = self.lanes.lock();
        let item = match lanes.priority.iter().position(&mut pred) {
            Some(i) => lanes.priority.remove(i),
            None => {
                let i = lanes.normal.iter().position(&mut pred)?;
                lanes.normal.remove(i)
            }
        };
        drop(lanes);
        self.not_full.notify_one();
        item
    }

    /// Pop, waiting until an item arrives or the queue is terminated
    pub async fn pop(&self) -> Result<T> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(item) = self.try_pop()? {
                return Ok(item);
            }
            notified.await;
        }
    }

    /// Pop with a bound on the wait
    pub async fn pop_timeout(&self, timeout: Duration) -> Result<T> {
        match tokio::time::timeout(timeout, self.pop()).await {
            Ok(result) => result,
            Err(_) => Err(SwitchError::Timeout {
                millis: timeout.as_millis() as u64,
            }),
        }
    }

    /// Remove and return everything queued, priority lane first
    pub fn flush(&self) -> Vec<T> {
        let mut lanes = self.lanes.lock();
        let mut drained: Vec<T> = lanes.priority.drain(..).collect();
        drained.extend(lanes.normal.drain(..));
        drop(lanes);
        self.not_full.notify_waiters();
        drained
    }

    /// Refuse further pushes, wake all waiters and hand back what was queued
    pub fn terminate(&self) -> Vec<T> {
        let drained = {
            let mut lanes = self.lanes.lock();
            lanes.terminated = true;
            let mut drained: Vec<T> = lanes.priority.drain(..).collect();
            drained.extend(lanes.normal.drain(..));
            drained
        };
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
        if !drained.is_empty() {
            tracing::debug!(queue = self.name, dropped = drained.len(), "Queue terminated with pending items");
        }
        drained
    }
}
