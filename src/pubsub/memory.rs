use super::{PubSubError, TopicClient, TopicSubscription, TopicValue};
use crate::context::CancellationToken;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// How long a blocked pull waits before re-checking cancellation and close.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

type TopicKey = (String, String);

#[derive(Default)]
struct BusState {
    subscribers: HashMap<TopicKey, Vec<(u64, Sender<TopicValue>)>>,
}

#[derive(Default)]
struct BusInner {
    state: Mutex<BusState>,
    changed: Condvar,
    next_id: AtomicU64,
}

impl BusInner {
    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, key: &TopicKey, id: u64) {
        let mut state = self.lock();
        if let Some(subs) = state.subscribers.get_mut(key) {
            subs.retain(|(sub_id, _)| *sub_id != id);
            if subs.is_empty() {
                state.subscribers.remove(key);
            }
        }
        self.changed.notify_all();
    }
}

/// An in-process topic service.
///
/// Every client handed out by [`MemoryTopicBus::client`] talks to the same
/// topics, so a server and a client transport in one process can reach each
/// other. Items published while nobody is subscribed are dropped, as they
/// would be by a real topic service.
#[derive(Clone, Default)]
pub struct MemoryTopicBus {
    inner: Arc<BusInner>,
}

impl MemoryTopicBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new client handle. Closing it does not affect other handles.
    pub fn client(&self) -> MemoryTopicClient {
        MemoryTopicClient {
            bus: self.inner.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscriber_count(&self, cache_name: &str, topic: &str) -> usize {
        let key = (cache_name.to_owned(), topic.to_owned());
        self.inner.lock().subscribers.get(&key).map_or(0, Vec::len)
    }

    /// Block until at least `count` subscriptions exist on the topic.
    /// Returns false if the timeout elapsed first.
    pub fn wait_for_subscribers(
        &self,
        cache_name: &str,
        topic: &str,
        count: usize,
        timeout: Duration,
    ) -> bool {
        let key = (cache_name.to_owned(), topic.to_owned());
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.lock();
        loop {
            if state.subscribers.get(&key).map_or(0, Vec::len) >= count {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .inner
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

pub struct MemoryTopicClient {
    bus: Arc<BusInner>,
    closed: Arc<AtomicBool>,
}

impl MemoryTopicClient {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl TopicClient for MemoryTopicClient {
    fn publish(
        &self,
        ctx: &CancellationToken,
        cache_name: &str,
        topic: &str,
        value: TopicValue,
    ) -> Result<(), PubSubError> {
        if self.is_closed() {
            return Err(PubSubError::Closed);
        }
        if ctx.is_cancelled() {
            return Err(PubSubError::Cancelled);
        }

        let key = (cache_name.to_owned(), topic.to_owned());
        let state = self.bus.lock();
        match state.subscribers.get(&key) {
            Some(subs) => {
                trace!("memory bus: delivering to {} subscriber(s) on {}", subs.len(), topic);
                for (_, sender) in subs {
                    // a receiver that went away is removed by its own drop
                    let _ = sender.send(value.clone());
                }
            }
            None => debug!("memory bus: no subscribers on {}/{}, dropping item", cache_name, topic),
        }
        Ok(())
    }

    fn subscribe(
        &self,
        cache_name: &str,
        topic: &str,
    ) -> Result<Box<dyn TopicSubscription>, PubSubError> {
        if self.is_closed() {
            return Err(PubSubError::Closed);
        }

        let key = (cache_name.to_owned(), topic.to_owned());
        let id = self.bus.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = channel();
        self.bus
            .lock()
            .subscribers
            .entry(key.clone())
            .or_default()
            .push((id, tx));
        self.bus.changed.notify_all();
        debug!("memory bus: subscription {} opened on {}/{}", id, cache_name, topic);

        Ok(Box::new(MemoryTopicSubscription {
            bus: self.bus.clone(),
            key,
            id,
            receiver: rx,
            closed: self.closed.clone(),
        }))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("memory bus: client closed");
        }
    }
}

pub struct MemoryTopicSubscription {
    bus: Arc<BusInner>,
    key: TopicKey,
    id: u64,
    receiver: Receiver<TopicValue>,
    closed: Arc<AtomicBool>,
}

impl TopicSubscription for MemoryTopicSubscription {
    fn item(&mut self, ctx: &CancellationToken) -> Result<TopicValue, PubSubError> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(PubSubError::Closed);
            }
            if ctx.is_cancelled() {
                return Err(PubSubError::Cancelled);
            }
            match self.receiver.recv_timeout(POLL_INTERVAL) {
                Ok(value) => return Ok(value),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(PubSubError::Closed),
            }
        }
    }
}

impl Drop for MemoryTopicSubscription {
    fn drop(&mut self) {
        self.bus.remove(&self.key, self.id);
    }
}
