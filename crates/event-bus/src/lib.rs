//! Topic-keyed subscription bus.
//!
//! Every registration owns its own unbounded queue, so `publish` never waits on
//! a subscriber and a slow callback only delays itself. Registrations are
//! released by dropping (or explicitly unsubscribing) the [`Subscription`]
//! handle; release is synchronous, so no event published after it returns can
//! reach the old registration.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use tabwright_core_types::SubscriptionId;

/// Payload types that can be routed by the bus.
pub trait Event: Clone + Send + Sync + fmt::Debug + 'static {
    /// Routing key, e.g. a protocol method name.
    fn topic(&self) -> &str;

    /// Optional narrower scope (a session id) used to filter scoped registrations.
    fn scope(&self) -> Option<&str> {
        None
    }
}

struct Sink<E> {
    id: SubscriptionId,
    scope: Option<String>,
    tx: mpsc::UnboundedSender<E>,
    closing: CancellationToken,
}

impl<E: Event> Sink<E> {
    fn accepts(&self, event: &E) -> bool {
        match self.scope.as_deref() {
            Some(scope) => event.scope() == Some(scope),
            None => true,
        }
    }
}

struct BusInner<E> {
    topics: DashMap<String, Vec<Sink<E>>>,
}

impl<E> BusInner<E> {
    fn remove(&self, topic: &str, id: SubscriptionId) {
        if let Some(mut sinks) = self.topics.get_mut(topic) {
            sinks.retain(|sink| sink.id != id);
        }
        self.topics.remove_if(topic, |_, sinks| sinks.is_empty());
    }
}

/// In-memory bus shared by the dispatcher and every subscriber.
pub struct EventBus<E: Event> {
    inner: Arc<BusInner<E>>,
}

impl<E: Event> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Event> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> EventBus<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: DashMap::new(),
            }),
        }
    }

    /// Queue `event` for every live registration on its topic. Returns how many
    /// registrations accepted it.
    pub fn publish(&self, event: E) -> usize {
        let topic = event.topic().to_string();
        let mut delivered = 0;
        if let Some(mut sinks) = self.inner.topics.get_mut(&topic) {
            sinks.retain(|sink| {
                if sink.closing.is_cancelled() {
                    return false;
                }
                if !sink.accepts(&event) {
                    return true;
                }
                match sink.tx.send(event.clone()) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(_) => false,
                }
            });
        } else {
            trace!(target: "event-bus", %topic, "no subscribers");
            return 0;
        }
        self.inner.topics.remove_if(&topic, |_, sinks| sinks.is_empty());
        delivered
    }

    /// Number of live registrations for `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .get(topic)
            .map(|sinks| sinks.len())
            .unwrap_or(0)
    }

    fn register(
        &self,
        topic: &str,
        scope: Option<&str>,
        tx: mpsc::UnboundedSender<E>,
        closing: CancellationToken,
    ) -> Subscription<E> {
        let id = SubscriptionId::new();
        self.inner
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(Sink {
                id,
                scope: scope.map(str::to_string),
                tx,
                closing: closing.clone(),
            });
        trace!(target: "event-bus", %topic, %id, "registered");
        Subscription {
            id,
            topic: topic.to_string(),
            closing,
            released: AtomicBool::new(false),
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Register a raw queue. The registration is live when this returns, so a
    /// caller can subscribe before issuing the command that triggers the event.
    pub fn sink(
        &self,
        topic: &str,
        scope: Option<&str>,
    ) -> (Subscription<E>, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.register(topic, scope, tx, CancellationToken::new());
        (subscription, rx)
    }

    /// Run `callback` for every event on `topic`, in arrival order, on a
    /// dedicated task. Must be called inside a tokio runtime.
    pub fn subscribe<F>(&self, topic: &str, scope: Option<&str>, mut callback: F) -> Subscription<E>
    where
        F: FnMut(E) + Send + 'static,
    {
        let (subscription, mut rx) = self.sink(topic, scope);
        let closing = subscription.closing.clone();
        let id = subscription.id;
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = closing.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(event) => event,
                        None => break,
                    },
                };
                if closing.is_cancelled() {
                    break;
                }
                callback(event);
            }
            trace!(target: "event-bus", %id, "delivery task finished");
        });
        subscription
    }

    /// Merge several topics into one ordered output.
    pub fn listen_many<I, S>(&self, topics: I, scope: Option<&str>) -> Listener<E>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let closing = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let subscriptions = topics
            .into_iter()
            .map(|topic| self.register(topic.as_ref(), scope, tx.clone(), closing.child_token()))
            .collect();
        Listener {
            rx,
            subscriptions,
            closing,
        }
    }

    /// Wait for the first event on `topic` for which `select` yields a value.
    ///
    /// Resolves to `None` once `max_wait` elapses. The registration is released
    /// on delivery, on expiry, and when the returned [`WatchOnce`] is dropped.
    pub fn watch_once<T, F>(
        &self,
        topic: &str,
        scope: Option<&str>,
        max_wait: Duration,
        mut select: F,
    ) -> WatchOnce<T>
    where
        T: Send + 'static,
        F: FnMut(&E) -> Option<T> + Send + 'static,
    {
        let (subscription, mut rx) = self.sink(topic, scope);
        let state = Arc::new(AtomicU8::new(WatchState::Pending as u8));
        let (mut tx, out) = oneshot::channel();
        let task_state = Arc::clone(&state);
        tokio::spawn(async move {
            let found = tokio::select! {
                found = async {
                    while let Some(event) = rx.recv().await {
                        if let Some(value) = select(&event) {
                            return Some(value);
                        }
                    }
                    None
                } => found,
                _ = tokio::time::sleep(max_wait) => None,
                _ = tx.closed() => None,
            };
            subscription.unsubscribe();
            match found {
                Some(value) if WatchState::advance(&task_state, WatchState::Delivered) => {
                    let _ = tx.send(value);
                }
                _ => {
                    WatchState::advance(&task_state, WatchState::Expired);
                    debug!(target: "event-bus", topic = %subscription.topic, "one-shot watch expired");
                }
            }
        });
        WatchOnce { rx: out, state }
    }
}

/// Handle to one registration. Dropping it unsubscribes.
pub struct Subscription<E> {
    id: SubscriptionId,
    topic: String,
    closing: CancellationToken,
    released: AtomicBool,
    bus: Weak<BusInner<E>>,
}

impl<E> Subscription<E> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_active(&self) -> bool {
        !self.released.load(Ordering::Acquire)
    }

    /// Remove this registration. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.closing.cancel();
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(&self.topic, self.id);
        }
        trace!(target: "event-bus", topic = %self.topic, id = %self.id, "unsubscribed");
    }
}

impl<E> fmt::Debug for Subscription<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("active", &self.is_active())
            .finish()
    }
}

impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Aggregated output of [`EventBus::listen_many`].
pub struct Listener<E> {
    rx: mpsc::UnboundedReceiver<E>,
    subscriptions: Vec<Subscription<E>>,
    closing: CancellationToken,
}

impl<E> Listener<E> {
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closing.is_cancelled()
    }

    /// Stop all forwarding and close the output. Already queued events can
    /// still be drained; after that `recv` yields `None`.
    pub fn unsubscribe_all(&mut self) {
        self.closing.cancel();
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        self.rx.close();
    }
}

impl<E> Drop for Listener<E> {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

/// Lifecycle of a one-shot watch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum WatchState {
    Pending = 0,
    Delivered = 1,
    Expired = 2,
}

impl WatchState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => WatchState::Delivered,
            2 => WatchState::Expired,
            _ => WatchState::Pending,
        }
    }

    /// Leave `Pending` exactly once.
    fn advance(cell: &AtomicU8, to: WatchState) -> bool {
        cell.compare_exchange(
            WatchState::Pending as u8,
            to as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_ok()
    }
}

/// Future returned by [`EventBus::watch_once`].
pub struct WatchOnce<T> {
    rx: oneshot::Receiver<T>,
    state: Arc<AtomicU8>,
}

impl<T> WatchOnce<T> {
    pub fn state(&self) -> WatchState {
        WatchState::from_raw(self.state.load(Ordering::Acquire))
    }
}

impl<T> Future for WatchOnce<T> {
    type Output = Option<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(Result::ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::{sleep, timeout};

    #[derive(Clone, Debug, PartialEq)]
    struct Note {
        topic: &'static str,
        scope: Option<&'static str>,
        seq: u32,
    }

    impl Event for Note {
        fn topic(&self) -> &str {
            self.topic
        }

        fn scope(&self) -> Option<&str> {
            self.scope
        }
    }

    fn note(topic: &'static str, seq: u32) -> Note {
        Note {
            topic,
            scope: None,
            seq,
        }
    }

    #[tokio::test]
    async fn sink_receives_events_in_arrival_order() {
        let bus = EventBus::new();
        let (_sub, mut rx) = bus.sink("Page.loadEventFired", None);

        for seq in 0..5 {
            assert_eq!(bus.publish(note("Page.loadEventFired", seq)), 1);
        }
        for seq in 0..5 {
            assert_eq!(rx.recv().await.unwrap().seq, seq);
        }
    }

    #[tokio::test]
    async fn scoped_registrations_only_see_their_scope() {
        let bus = EventBus::new();
        let (_a, mut rx_a) = bus.sink("Runtime.consoleAPICalled", Some("session-a"));
        let (_any, mut rx_any) = bus.sink("Runtime.consoleAPICalled", None);

        let event = Note {
            topic: "Runtime.consoleAPICalled",
            scope: Some("session-b"),
            seq: 7,
        };
        assert_eq!(bus.publish(event.clone()), 1);
        assert_eq!(rx_any.recv().await, Some(event));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_stops_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let sub = bus.subscribe("Target.targetCreated", None, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(note("Target.targetCreated", 1));
        sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert_eq!(bus.subscriber_count("Target.targetCreated"), 0);
        assert_eq!(bus.publish(note("Target.targetCreated", 2)), 0);
        sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn unsubscribe_racing_publish_never_delivers_afterwards() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let sub = bus.subscribe("Network.requestWillBeSent", None, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let publisher = {
            let bus = bus.clone();
            tokio::spawn(async move {
                for seq in 0..2_000 {
                    bus.publish(note("Network.requestWillBeSent", seq));
                    tokio::task::yield_now().await;
                }
            })
        };

        sleep(Duration::from_millis(1)).await;
        sub.unsubscribe();
        sleep(Duration::from_millis(20)).await;
        let settled = hits.load(Ordering::SeqCst);

        publisher.await.unwrap();
        sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), settled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_subscriber_does_not_stall_others() {
        let bus = EventBus::new();
        let _slow = bus.subscribe("Page.frameNavigated", None, |_| {
            std::thread::sleep(Duration::from_millis(200));
        });
        let (_fast, mut rx) = bus.sink("Page.frameNavigated", None);

        for seq in 0..3 {
            bus.publish(note("Page.frameNavigated", seq));
        }
        for seq in 0..3 {
            let got = timeout(Duration::from_millis(50), rx.recv())
                .await
                .expect("fast subscriber starved")
                .unwrap();
            assert_eq!(got.seq, seq);
        }
    }

    #[tokio::test]
    async fn listen_many_preserves_order_and_closes() {
        let bus = EventBus::new();
        let mut listener = bus.listen_many(["A.first", "B.second"], None);

        bus.publish(note("A.first", 1));
        bus.publish(note("B.second", 2));
        bus.publish(note("A.first", 3));

        let mut seen = Vec::new();
        for _ in 0..3 {
            let event = listener.recv().await.unwrap();
            seen.push((event.topic, event.seq));
        }
        assert_eq!(seen, vec![("A.first", 1), ("B.second", 2), ("A.first", 3)]);

        listener.unsubscribe_all();
        assert!(listener.is_closed());
        assert_eq!(bus.subscriber_count("A.first"), 0);
        assert_eq!(bus.subscriber_count("B.second"), 0);
        assert_eq!(bus.publish(note("A.first", 4)), 0);
        assert_eq!(listener.recv().await, None);
    }

    #[tokio::test]
    async fn watch_once_delivers_first_match_and_releases() {
        let bus = EventBus::new();
        let watch = bus.watch_once("Target.targetCreated", None, Duration::from_secs(5), |n: &Note| {
            (n.seq % 2 == 0).then_some(n.seq)
        });
        assert_eq!(bus.subscriber_count("Target.targetCreated"), 1);

        bus.publish(note("Target.targetCreated", 1));
        bus.publish(note("Target.targetCreated", 4));
        bus.publish(note("Target.targetCreated", 6));

        let state = Arc::clone(&watch.state);
        assert_eq!(watch.await, Some(4));
        assert_eq!(WatchState::from_raw(state.load(Ordering::Acquire)), WatchState::Delivered);
        assert_eq!(bus.subscriber_count("Target.targetCreated"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_once_expires_without_residual_subscription() {
        let bus = EventBus::new();
        let watch = bus.watch_once("Target.targetCreated", None, Duration::from_secs(3), |n: &Note| {
            Some(n.seq)
        });
        let state = Arc::clone(&watch.state);

        let started = tokio::time::Instant::now();
        assert_eq!(watch.await, None);
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(WatchState::from_raw(state.load(Ordering::Acquire)), WatchState::Expired);
        assert_eq!(bus.subscriber_count("Target.targetCreated"), 0);
        assert_eq!(bus.publish(note("Target.targetCreated", 9)), 0);
    }

    #[tokio::test]
    async fn dropping_watch_once_releases_subscription() {
        let bus = EventBus::new();
        let watch = bus.watch_once("Target.targetCreated", None, Duration::from_secs(60), |n: &Note| {
            Some(n.seq)
        });
        drop(watch);
        sleep(Duration::from_millis(20)).await;
        assert_eq!(bus.subscriber_count("Target.targetCreated"), 0);
    }
}
