use super::codec;
use super::lifecycle::{Lifecycle, TransportState};
use super::{CloseHandlerFn, ErrorHandlerFn, MessageHandlerFn, Role, Transport};
use crate::context::CancellationToken;
use crate::pubsub::{PubSubError, TopicClient, TopicSubscription, TopicValue};
use crate::types::{JsonRpcMessage, McpError};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread;
use tracing::{debug, trace};

/// A [`Transport`] that carries JSON-RPC over a pair of pub/sub topics.
///
/// The server and the client use mirrored topics (see [`Role`]), both scoped
/// by the same cache name, so one side's outbound topic is the other side's
/// inbound topic. Every message is published as one string item.
///
/// Inbound items are read by a single background thread, decoded and handed
/// to the message handler on that same thread, one at a time and in delivery
/// order. A slow handler therefore delays the next read.
///
/// # Examples
///
/// ```
/// use topic_mcp::context::CancellationToken;
/// use topic_mcp::pubsub::MemoryTopicBus;
/// use topic_mcp::transport::{TopicTransport, Transport};
///
/// let bus = MemoryTopicBus::new();
/// let transport = TopicTransport::server(bus.client(), "my-cache");
///
/// let ctx = CancellationToken::new();
/// transport.start(&ctx)?;
/// assert!(transport.start(&ctx).is_err());
///
/// transport.close()?;
/// transport.close()?;
/// # Ok::<(), topic_mcp::McpError>(())
/// ```
pub struct TopicTransport<C: TopicClient + 'static> {
    inner: Arc<Inner<C>>,
}

struct Inner<C: TopicClient> {
    role: Role,
    client: C,
    cache_name: String,
    lifecycle: Lifecycle,
}

impl<C: TopicClient + 'static> TopicTransport<C> {
    pub fn new(role: Role, client: C, cache_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                role,
                client,
                cache_name: cache_name.into(),
                lifecycle: Lifecycle::new("topic transport"),
            }),
        }
    }

    /// Transport for the side that serves requests.
    pub fn server(client: C, cache_name: impl Into<String>) -> Self {
        Self::new(Role::Server, client, cache_name)
    }

    /// Transport for the side that issues requests.
    pub fn client(client: C, cache_name: impl Into<String>) -> Self {
        Self::new(Role::Client, client, cache_name)
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn cache_name(&self) -> &str {
        &self.inner.cache_name
    }

    pub fn state(&self) -> TransportState {
        self.inner.lifecycle.state()
    }
}

impl<C: TopicClient + 'static> Transport for TopicTransport<C> {
    fn start(&self, ctx: &CancellationToken) -> Result<(), McpError> {
        self.inner.lifecycle.begin_start()?;

        let inner = self.inner.clone();
        let ctx = ctx.clone();
        let spawned = thread::Builder::new()
            .name(format!("mcp-{}-reader", self.inner.role))
            .spawn(move || inner.read_loop(ctx));

        if let Err(e) = spawned {
            self.inner.lifecycle.abort_start();
            return Err(McpError::Io(e));
        }
        debug!(
            "topic transport: {} reading from {}/{}",
            self.inner.role,
            self.inner.cache_name,
            self.inner.role.read_topic()
        );
        Ok(())
    }

    fn send(&self, ctx: &CancellationToken, message: &JsonRpcMessage) -> Result<(), McpError> {
        self.inner.send(ctx, message)
    }

    fn close(&self) -> Result<(), McpError> {
        self.inner.close();
        Ok(())
    }

    fn set_message_handler(&self, handler: MessageHandlerFn) {
        self.inner.lifecycle.set_message_handler(handler);
    }

    fn set_error_handler(&self, handler: ErrorHandlerFn) {
        self.inner.lifecycle.set_error_handler(handler);
    }

    fn set_close_handler(&self, handler: CloseHandlerFn) {
        self.inner.lifecycle.set_close_handler(handler);
    }
}

impl<C: TopicClient> Inner<C> {
    fn send(&self, ctx: &CancellationToken, message: &JsonRpcMessage) -> Result<(), McpError> {
        let data = codec::encode(message)?;
        let topic = self.role.send_topic();
        trace!("topic transport: sending on {}: {}", topic, data);

        self.client
            .publish(ctx, &self.cache_name, topic, TopicValue::String(data))
            .map_err(McpError::Publish)
    }

    fn close(&self) {
        if self.lifecycle.begin_close() {
            self.client.close();
            self.lifecycle.notify_closed();
        }
    }

    fn read_loop(&self, ctx: CancellationToken) {
        let topic = self.role.read_topic();
        let mut subscription = match self.client.subscribe(&self.cache_name, topic) {
            Ok(subscription) => subscription,
            Err(source) => {
                self.lifecycle.report(McpError::ConnectionSetup {
                    topic: topic.to_owned(),
                    source,
                });
                self.close();
                return;
            }
        };

        loop {
            if ctx.is_cancelled() {
                debug!("topic transport: context cancelled, closing");
                self.close();
                break;
            }
            if self.lifecycle.state() != TransportState::Running {
                break;
            }
            if self.read_next(&ctx, subscription.as_mut()).is_break() {
                // Nothing is reading any more, so stop looking alive.
                self.close();
                break;
            }
        }
        debug!("topic transport: read loop on {} exited", topic);
    }

    /// Pull one item and dispatch it. Breaks only when reading can no longer
    /// continue; the caller then closes the transport.
    fn read_next(
        &self,
        ctx: &CancellationToken,
        subscription: &mut dyn TopicSubscription,
    ) -> ControlFlow<()> {
        let item = match subscription.item(ctx) {
            Ok(item) => item,
            // cancellation is picked up by the caller on the next iteration
            Err(PubSubError::Cancelled) if ctx.is_cancelled() => return ControlFlow::Continue(()),
            Err(e) => {
                if self.lifecycle.is_running() {
                    self.lifecycle.report(McpError::Read(Box::new(McpError::PubSub(e))));
                }
                return ControlFlow::Break(());
            }
        };

        // An empty item is an end-of-stream marker, not a message.
        if item.is_empty() {
            trace!("topic transport: empty item, nothing to dispatch");
            return ControlFlow::Continue(());
        }

        match codec::decode(item.as_bytes()) {
            Ok(message) => {
                trace!(
                    "topic transport: handling {} on {}",
                    message.kind(),
                    self.role.read_topic()
                );
                self.lifecycle.dispatch(ctx, message);
            }
            Err(e) => self.lifecycle.report(McpError::Read(Box::new(e))),
        }
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::MemoryTopicBus;
    use crate::types::{JsonRpcNotification, JsonRpcResponse, RequestId};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc::{channel, Receiver};
    use std::sync::Mutex;
    use std::time::Duration;

    const CACHE: &str = "test-cache";
    const WAIT: Duration = Duration::from_secs(5);

    fn collect_messages<C: TopicClient>(
        transport: &TopicTransport<C>,
    ) -> Receiver<JsonRpcMessage> {
        let (tx, rx) = channel();
        let tx = Mutex::new(tx);
        transport.set_message_handler(Arc::new(
            move |_ctx: &CancellationToken, message: JsonRpcMessage| {
                let _ = tx.lock().unwrap().send(message);
            },
        ));
        rx
    }

    fn collect_errors<C: TopicClient>(transport: &TopicTransport<C>) -> Receiver<McpError> {
        let (tx, rx) = channel();
        let tx = Mutex::new(tx);
        transport.set_error_handler(Arc::new(move |err: McpError| {
            let _ = tx.lock().unwrap().send(err);
        }));
        rx
    }

    fn started(
        bus: &MemoryTopicBus,
        role: Role,
        ctx: &CancellationToken,
    ) -> Result<TopicTransport<crate::pubsub::MemoryTopicClient>, McpError> {
        let transport = TopicTransport::new(role, bus.client(), CACHE);
        transport.start(ctx)?;
        Ok(transport)
    }

    fn wait_until_closed<C: TopicClient>(transport: &TopicTransport<C>) -> bool {
        (0..250).any(|_| {
            if transport.state() == TransportState::Closed {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
            false
        })
    }

    #[test]
    fn client_notification_reaches_server() -> Result<(), McpError> {
        let bus = MemoryTopicBus::new();
        let ctx = CancellationToken::new();

        let server = TopicTransport::server(bus.client(), CACHE);
        let received = collect_messages(&server);
        server.start(&ctx)?;
        assert!(bus.wait_for_subscribers(CACHE, "mcp-server", 1, WAIT));

        let client = TopicTransport::client(bus.client(), CACHE);
        let message = codec::decode_str(r#"{"method":"get","params":{"key":"a"}}"#)?;
        client.send(&ctx, &message)?;

        match received.recv_timeout(WAIT).expect("server got nothing") {
            JsonRpcMessage::Notification(n) => {
                assert_eq!(n.method, "get");
                assert_eq!(n.params, Some(json!({"key": "a"})));
            }
            other => panic!("expected notification, got {:?}", other),
        }
        assert!(received.recv_timeout(Duration::from_millis(100)).is_err());

        server.close()?;
        Ok(())
    }

    #[test]
    fn server_response_reaches_client() -> Result<(), McpError> {
        let bus = MemoryTopicBus::new();
        let ctx = CancellationToken::new();

        let client = TopicTransport::client(bus.client(), CACHE);
        let received = collect_messages(&client);
        client.start(&ctx)?;
        assert!(bus.wait_for_subscribers(CACHE, "mcp-client", 1, WAIT));

        let server = TopicTransport::server(bus.client(), CACHE);
        server.send(&ctx, &codec::decode_str(r#"{"id":1,"result":"ok"}"#)?)?;

        match received.recv_timeout(WAIT).expect("client got nothing") {
            JsonRpcMessage::Response(r) => {
                assert_eq!(r.id, RequestId::Number(1));
                assert_eq!(r.result, json!("ok"));
            }
            other => panic!("expected response, got {:?}", other),
        }
        client.close()?;
        Ok(())
    }

    #[test]
    fn delivers_in_order() -> Result<(), McpError> {
        let bus = MemoryTopicBus::new();
        let ctx = CancellationToken::new();
        let server = TopicTransport::server(bus.client(), CACHE);
        let received = collect_messages(&server);
        server.start(&ctx)?;
        assert!(bus.wait_for_subscribers(CACHE, "mcp-server", 1, WAIT));

        let client = TopicTransport::client(bus.client(), CACHE);
        for i in 0..20 {
            client.send(&ctx, &JsonRpcResponse::new(i, json!(i)).into())?;
        }
        for i in 0..20 {
            let message = received.recv_timeout(WAIT).expect("missing message");
            assert_eq!(message.id(), Some(&RequestId::Number(i)));
        }
        server.close()?;
        Ok(())
    }

    #[test]
    fn empty_item_is_skipped_silently() -> Result<(), McpError> {
        let bus = MemoryTopicBus::new();
        let ctx = CancellationToken::new();
        let server = TopicTransport::server(bus.client(), CACHE);
        let received = collect_messages(&server);
        let errors = collect_errors(&server);
        server.start(&ctx)?;
        assert!(bus.wait_for_subscribers(CACHE, "mcp-server", 1, WAIT));

        let publisher = bus.client();
        publisher.publish(&ctx, CACHE, "mcp-server", TopicValue::String(String::new()))?;
        publisher.publish(&ctx, CACHE, "mcp-server", TopicValue::Bytes(Vec::new()))?;
        publisher.publish(&ctx, CACHE, "mcp-server", r#"{"method":"after"}"#.into())?;

        let message = received.recv_timeout(WAIT).expect("missing message");
        assert_eq!(message.method(), Some("after"));
        assert!(received.try_recv().is_err());
        assert!(errors.try_recv().is_err());
        server.close()?;
        Ok(())
    }

    #[test]
    fn malformed_item_is_reported_and_dropped() -> Result<(), McpError> {
        let bus = MemoryTopicBus::new();
        let ctx = CancellationToken::new();
        let server = TopicTransport::server(bus.client(), CACHE);
        let received = collect_messages(&server);
        let errors = collect_errors(&server);
        server.start(&ctx)?;
        assert!(bus.wait_for_subscribers(CACHE, "mcp-server", 1, WAIT));

        let publisher = bus.client();
        publisher.publish(&ctx, CACHE, "mcp-server", "{not json".into())?;
        publisher.publish(&ctx, CACHE, "mcp-server", r#"{"unrelated":true}"#.into())?;
        publisher.publish(&ctx, CACHE, "mcp-server", vec![0xff, 0x00].into())?;
        publisher.publish(&ctx, CACHE, "mcp-server", r#"{"method":"still-alive"}"#.into())?;

        for _ in 0..3 {
            let err = errors.recv_timeout(WAIT).expect("missing error");
            assert!(matches!(err, McpError::Read(_)));
            assert!(err.is_unrecognized(), "unexpected error: {}", err);
        }
        let message = received.recv_timeout(WAIT).expect("loop stopped reading");
        assert_eq!(message.method(), Some("still-alive"));
        server.close()?;
        Ok(())
    }

    #[test]
    fn second_start_fails_without_second_loop() -> Result<(), McpError> {
        let bus = MemoryTopicBus::new();
        let ctx = CancellationToken::new();
        let server = started(&bus, Role::Server, &ctx)?;
        assert!(bus.wait_for_subscribers(CACHE, "mcp-server", 1, WAIT));

        assert!(matches!(server.start(&ctx), Err(McpError::AlreadyStarted)));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(bus.subscriber_count(CACHE, "mcp-server"), 1);
        assert_eq!(server.state(), TransportState::Running);
        server.close()?;
        Ok(())
    }

    #[test]
    fn close_is_idempotent() -> Result<(), McpError> {
        let bus = MemoryTopicBus::new();
        let ctx = CancellationToken::new();
        let server = TopicTransport::server(bus.client(), CACHE);
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = closes.clone();
        server.set_close_handler(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let errors = collect_errors(&server);
        server.start(&ctx)?;
        assert!(bus.wait_for_subscribers(CACHE, "mcp-server", 1, WAIT));

        server.close()?;
        server.close()?;
        server.close()?;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(server.state(), TransportState::Closed);

        // the loop exits and releases its subscription without reporting
        let deadline = std::time::Instant::now() + WAIT;
        while bus.subscriber_count(CACHE, "mcp-server") > 0 {
            assert!(std::time::Instant::now() < deadline, "loop did not exit");
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(errors.try_recv().is_err());
        assert!(matches!(server.start(&ctx), Err(McpError::AlreadyStarted)));
        Ok(())
    }

    #[test]
    fn send_after_close_errors_without_panicking() -> Result<(), McpError> {
        let bus = MemoryTopicBus::new();
        let ctx = CancellationToken::new();
        let client = started(&bus, Role::Client, &ctx)?;
        client.close()?;

        let result = client.send(&ctx, &JsonRpcNotification::initialized().into());
        assert!(matches!(result, Err(McpError::Publish(PubSubError::Closed))));
        Ok(())
    }

    #[test]
    fn cancellation_closes_transport() -> Result<(), McpError> {
        let bus = MemoryTopicBus::new();
        let ctx = CancellationToken::new();
        let server = TopicTransport::server(bus.client(), CACHE);
        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();
        server.set_close_handler(Arc::new(move || flag.store(true, Ordering::SeqCst)));
        let errors = collect_errors(&server);
        server.start(&ctx)?;
        assert!(bus.wait_for_subscribers(CACHE, "mcp-server", 1, WAIT));

        ctx.cancel();
        let deadline = std::time::Instant::now() + WAIT;
        while !closed.load(Ordering::SeqCst) {
            assert!(std::time::Instant::now() < deadline, "transport never closed");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(server.state(), TransportState::Closed);
        assert!(errors.try_recv().is_err());
        Ok(())
    }

    struct FailingSubscribe;

    impl TopicClient for FailingSubscribe {
        fn publish(
            &self,
            _ctx: &CancellationToken,
            _cache_name: &str,
            _topic: &str,
            _value: TopicValue,
        ) -> Result<(), PubSubError> {
            Err(PubSubError::Publish("service unavailable".into()))
        }

        fn subscribe(
            &self,
            _cache_name: &str,
            _topic: &str,
        ) -> Result<Box<dyn TopicSubscription>, PubSubError> {
            Err(PubSubError::Subscribe("permission denied".into()))
        }

        fn close(&self) {}
    }

    #[test]
    fn subscribe_failure_is_reported() -> Result<(), McpError> {
        let server = TopicTransport::server(FailingSubscribe, CACHE);
        let errors = collect_errors(&server);
        server.start(&CancellationToken::new())?;

        match errors.recv_timeout(WAIT).expect("missing error") {
            McpError::ConnectionSetup { topic, .. } => assert_eq!(topic, "mcp-server"),
            other => panic!("unexpected error: {}", other),
        }
        assert!(wait_until_closed(&server));
        Ok(())
    }

    #[test]
    fn publish_error_is_returned_verbatim() {
        let client = TopicTransport::client(FailingSubscribe, CACHE);
        let err = client
            .send(&CancellationToken::new(), &JsonRpcNotification::initialized().into())
            .expect_err("publish should fail");
        assert!(matches!(err, McpError::Publish(PubSubError::Publish(_))));
        assert_eq!(err.to_string(), "Publish failed: service unavailable");
    }

    struct BrokenSubscription;

    impl TopicSubscription for BrokenSubscription {
        fn item(&mut self, _ctx: &CancellationToken) -> Result<TopicValue, PubSubError> {
            Err(PubSubError::Subscribe("stream reset".into()))
        }
    }

    struct BrokenStream {
        pulls: Arc<AtomicUsize>,
    }

    struct CountingSubscription {
        pulls: Arc<AtomicUsize>,
    }

    impl TopicSubscription for CountingSubscription {
        fn item(&mut self, ctx: &CancellationToken) -> Result<TopicValue, PubSubError> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            BrokenSubscription.item(ctx)
        }
    }

    impl TopicClient for BrokenStream {
        fn publish(
            &self,
            _ctx: &CancellationToken,
            _cache_name: &str,
            _topic: &str,
            _value: TopicValue,
        ) -> Result<(), PubSubError> {
            Ok(())
        }

        fn subscribe(
            &self,
            _cache_name: &str,
            _topic: &str,
        ) -> Result<Box<dyn TopicSubscription>, PubSubError> {
            Ok(Box::new(CountingSubscription {
                pulls: self.pulls.clone(),
            }))
        }

        fn close(&self) {}
    }

    #[test]
    fn pull_failure_stops_the_loop() -> Result<(), McpError> {
        let pulls = Arc::new(AtomicUsize::new(0));
        let server = TopicTransport::server(
            BrokenStream {
                pulls: pulls.clone(),
            },
            CACHE,
        );
        let errors = collect_errors(&server);
        let (closed_tx, closed_rx) = channel();
        let closed_tx = Mutex::new(closed_tx);
        server.set_close_handler(Arc::new(move || {
            let _ = closed_tx.lock().unwrap().send(());
        }));
        server.start(&CancellationToken::new())?;

        let err = errors.recv_timeout(WAIT).expect("missing error");
        assert!(matches!(err, McpError::Read(_)));
        assert!(!err.is_unrecognized());

        closed_rx.recv_timeout(WAIT).expect("close handler not called");
        assert_eq!(server.state(), TransportState::Closed);

        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(pulls.load(Ordering::SeqCst), 1);
        assert!(errors.try_recv().is_err());
        assert!(closed_rx.try_recv().is_err());
        Ok(())
    }
}
