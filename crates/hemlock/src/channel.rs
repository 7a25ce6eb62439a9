use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex},
};

use crate::{
    exception::{ExcKind, Exception},
    sync, task,
    value::Value,
};

#[derive(Debug)]
struct ChanState {
    queue: VecDeque<Value>,
    closed: bool,
    /// Count of values handed to receivers; rendezvous senders use this as a
    /// ticket to detect that their value was taken.
    taken: u64,
}

/// A bounded FIFO channel guarded by one mutex and two condition variables.
///
/// Capacity 0 gives rendezvous semantics: a send completes only once a
/// receiver has taken the value, so at most `k` sends ever complete before a
/// recv for a channel of capacity `k`. A send that completes happens-before
/// the matching recv completion (both cross the same mutex).
#[derive(Debug)]
pub(crate) struct Channel {
    capacity: usize,
    state: Mutex<ChanState>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl Channel {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            state: Mutex::new(ChanState {
                queue: VecDeque::new(),
                closed: false,
                taken: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        sync::lock(&self.state).closed
    }

    /// Sends a value, blocking while the channel is full (or, for capacity
    /// 0, until a receiver takes the value). Fails with `ClosedChannel` when
    /// the channel is or becomes closed before the value is delivered.
    pub fn send(&self, value: Value) -> Result<(), Exception> {
        let _blocked = task::blocked_guard();
        let mut state = sync::lock(&self.state);
        if self.capacity == 0 {
            // Rendezvous: wait for the slot, place the value, then wait for a
            // receiver to take it.
            while !state.queue.is_empty() && !state.closed {
                state = self.not_full.wait(state).unwrap_or_else(std::sync::PoisonError::into_inner);
            }
            if state.closed {
                return Err(Exception::new(ExcKind::ClosedChannel, "send on closed channel"));
            }
            state.queue.push_back(value);
            let ticket = state.taken;
            self.not_empty.notify_one();
            while state.taken == ticket {
                if state.closed {
                    // Nobody took it; withdraw the value so close-drain does
                    // not deliver from a failed send.
                    state.queue.pop_back();
                    return Err(Exception::new(ExcKind::ClosedChannel, "send on closed channel"));
                }
                state = self.not_full.wait(state).unwrap_or_else(std::sync::PoisonError::into_inner);
            }
            return Ok(());
        }
        while state.queue.len() >= self.capacity && !state.closed {
            state = self.not_full.wait(state).unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        if state.closed {
            return Err(Exception::new(ExcKind::ClosedChannel, "send on closed channel"));
        }
        state.queue.push_back(value);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Receives a value, blocking while the channel is empty. Returns `None`
    /// once the channel is closed and the buffer is drained.
    pub fn recv(&self) -> Option<Value> {
        let _blocked = task::blocked_guard();
        let mut state = sync::lock(&self.state);
        loop {
            if let Some(value) = state.queue.pop_front() {
                state.taken += 1;
                // Wake senders: rendezvous senders watch `taken`, bounded
                // senders watch the queue length.
                self.not_full.notify_all();
                return Some(value);
            }
            if state.closed {
                return None;
            }
            state = self.not_empty.wait(state).unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Closes the channel. Blocked senders fail with `ClosedChannel`;
    /// receivers drain the remaining buffer and then observe closure.
    pub fn close(&self) {
        let mut state = sync::lock(&self.state);
        state.closed = true;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};

    #[test]
    fn bounded_send_recv_fifo() {
        let ch = Channel::new(2);
        ch.send(Value::I64(1)).unwrap();
        ch.send(Value::I64(2)).unwrap();
        assert!(matches!(ch.recv(), Some(Value::I64(1))));
        assert!(matches!(ch.recv(), Some(Value::I64(2))));
    }

    #[test]
    fn send_fails_after_close() {
        let ch = Channel::new(1);
        ch.send(Value::I64(1)).unwrap();
        ch.close();
        assert_eq!(ch.send(Value::I64(2)).unwrap_err().kind(), ExcKind::ClosedChannel);
        // The buffer still drains.
        assert!(matches!(ch.recv(), Some(Value::I64(1))));
        assert!(ch.recv().is_none());
    }

    #[test]
    fn rendezvous_pairs_send_with_recv() {
        let ch = Channel::new(0);
        let sender = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || ch.send(Value::I64(7)))
        };
        assert!(matches!(ch.recv(), Some(Value::I64(7))));
        sender.join().unwrap().unwrap();
    }

    #[test]
    fn rendezvous_send_fails_when_closed_while_waiting() {
        let ch = Channel::new(0);
        let sender = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || ch.send(Value::I64(7)))
        };
        thread::sleep(Duration::from_millis(50));
        ch.close();
        assert_eq!(sender.join().unwrap().unwrap_err().kind(), ExcKind::ClosedChannel);
        // The withdrawn value must not be observable.
        assert!(ch.recv().is_none());
    }

    #[test]
    fn bounded_send_blocks_until_recv() {
        let ch = Channel::new(1);
        ch.send(Value::I64(1)).unwrap();
        let sender = {
            let ch = Arc::clone(&ch);
            thread::spawn(move || {
                ch.send(Value::I64(2)).unwrap();
            })
        };
        thread::sleep(Duration::from_millis(30));
        assert!(matches!(ch.recv(), Some(Value::I64(1))));
        assert!(matches!(ch.recv(), Some(Value::I64(2))));
        sender.join().unwrap();
    }
}
