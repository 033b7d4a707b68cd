use crate::error::{Error, Result};
use crate::probe::{PendingProbe, Reply};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// The queue of probes awaiting transmission.
///
/// A bounded FIFO owned by the engine and accessed only on the loop thread:
/// handlers push during dispatch and the engine pops between dispatches.
/// It is level-triggered readable whenever it is non-empty.
#[derive(Debug)]
pub(crate) struct SendQueue {
    items: VecDeque<PendingProbe>,
    capacity: usize,
}

impl SendQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a probe, failing if the queue is at capacity.
    pub fn push(&mut self, pending: PendingProbe) -> Result<()> {
        if self.items.len() >= self.capacity {
            return Err(Error::SendQueueFull);
        }
        self.items.push_back(pending);
        Ok(())
    }

    /// Requeue a probe at the front, ahead of younger probes.
    ///
    /// Used for the single transient-failure retry so the retried probe does
    /// not lose its place in the FIFO.  The slot it was popped from is still
    /// free, so this cannot exceed capacity.
    pub fn push_front(&mut self, pending: PendingProbe) {
        self.items.push_front(pending);
    }

    pub fn pop(&mut self) -> Option<PendingProbe> {
        self.items.pop_front()
    }

    pub fn is_readable(&self) -> bool {
        !self.items.is_empty()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// The queue of captured replies awaiting matching.
///
/// The push side is a cloneable [`ReplySink`] handed to the sniffer, which
/// may run on a dedicated capture thread; the engine drains on the loop
/// thread.  This is the only structure shared across threads.
#[derive(Debug)]
pub(crate) struct ReplyQueue {
    inner: Arc<Mutex<VecDeque<Reply>>>,
    capacity: usize,
}

impl ReplyQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// A handle the sniffer uses to push captured replies.
    pub fn sink(&self) -> ReplySink {
        ReplySink {
            inner: Arc::clone(&self.inner),
            capacity: self.capacity,
        }
    }

    pub fn pop(&self) -> Option<Reply> {
        self.inner.lock().pop_front()
    }

    pub fn is_readable(&self) -> bool {
        !self.inner.lock().is_empty()
    }
}

/// The push side of the receive queue.
///
/// Cloneable and thread-safe; handed to the sniffer at capture start.
#[derive(Debug, Clone)]
pub struct ReplySink {
    inner: Arc<Mutex<VecDeque<Reply>>>,
    capacity: usize,
}

impl ReplySink {
    /// Push a captured reply.
    ///
    /// The receive queue is a capture buffer, not a reliable channel: on
    /// overflow the oldest reply is discarded to make room.
    pub fn push(&self, reply: Reply) {
        let mut queue = self.inner.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
            tracing::debug!("receive queue full, dropped oldest reply");
        }
        queue.push_back(reply);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{Fields, Probe};
    use crate::types::InstanceId;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::SystemTime;

    fn pending(octet: u8) -> PendingProbe {
        PendingProbe {
            probe: Probe::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, octet))),
            origin: InstanceId(1),
        }
    }

    fn reply(marker: u8) -> Reply {
        Reply::new(vec![marker], Fields::new(), SystemTime::now())
    }

    #[test]
    fn test_send_queue_fifo() {
        let mut queue = SendQueue::new(4);
        assert!(!queue.is_readable());
        queue.push(pending(1)).unwrap();
        queue.push(pending(2)).unwrap();
        assert!(queue.is_readable());
        assert_eq!(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            queue.pop().unwrap().probe.dest()
        );
        assert_eq!(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            queue.pop().unwrap().probe.dest()
        );
        assert!(queue.pop().is_none());
        assert!(!queue.is_readable());
    }

    #[test]
    fn test_send_queue_full() {
        let mut queue = SendQueue::new(2);
        queue.push(pending(1)).unwrap();
        queue.push(pending(2)).unwrap();
        let err = queue.push(pending(3)).unwrap_err();
        assert!(matches!(err, Error::SendQueueFull));
        assert_eq!(2, queue.len());
    }

    #[test]
    fn test_send_queue_retry_requeue() {
        let mut queue = SendQueue::new(2);
        queue.push(pending(1)).unwrap();
        queue.push(pending(2)).unwrap();
        let popped = queue.pop().unwrap();
        queue.push_front(popped);
        assert_eq!(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            queue.pop().unwrap().probe.dest()
        );
    }

    #[test]
    fn test_reply_queue_fifo() {
        let queue = ReplyQueue::new(4);
        let sink = queue.sink();
        sink.push(reply(1));
        sink.push(reply(2));
        assert!(queue.is_readable());
        assert_eq!(vec![1], queue.pop().unwrap().bytes);
        assert_eq!(vec![2], queue.pop().unwrap().bytes);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_reply_queue_overflow_drops_oldest() {
        let queue = ReplyQueue::new(2);
        let sink = queue.sink();
        sink.push(reply(1));
        sink.push(reply(2));
        sink.push(reply(3));
        assert_eq!(vec![2], queue.pop().unwrap().bytes);
        assert_eq!(vec![3], queue.pop().unwrap().bytes);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_reply_queue_cross_thread_push() {
        let queue = ReplyQueue::new(16);
        let sink = queue.sink();
        let handle = std::thread::spawn(move || {
            for i in 0..8 {
                sink.push(reply(i));
            }
        });
        handle.join().unwrap();
        let mut count = 0;
        while queue.pop().is_some() {
            count += 1;
        }
        assert_eq!(8, count);
    }
}
