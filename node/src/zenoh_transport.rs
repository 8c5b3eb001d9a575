//! `PubSubTransport` over a zenoh session.
//!
//! Zenoh has no broker-side retain, so retained publishes are served by a
//! queryable on the same key. The queryable answers with the newest payload
//! this session has seen there: its own last publish, overwritten by every
//! live sample that arrives later. A former publisher that keeps following
//! the key therefore serves the current value rather than its own last one.
//! `subscribe` issues one bounded `get` on the key and queues the first reply
//! ahead of live samples, which gives a late joiner the current state.

use async_trait::async_trait;
use canvas_env::{InboundMessage, PubSubTransport, TransportError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};
use zenoh::handlers::FifoChannelHandler;
use zenoh::pubsub::Subscriber;
use zenoh::query::Queryable;
use zenoh::sample::Sample;
use zenoh::{Session, Wait};

const RETAINED_QUERY_TIMEOUT: Duration = Duration::from_millis(500);

type RetainedSlot = Arc<Mutex<Vec<u8>>>;

pub struct ZenohTransport {
    config: zenoh::Config,
    session: Option<Session>,
    subscribers: Vec<Subscriber<FifoChannelHandler<Sample>>>,

    /// Last retained payload per key, shared with the answering queryable
    retained: HashMap<String, RetainedSlot>,
    queryables: Vec<Queryable<()>>,

    /// Retained replies waiting to be handed out before live samples
    pending: VecDeque<InboundMessage>,
}

impl ZenohTransport {
    pub fn new(config: zenoh::Config) -> Self {
        Self {
            config,
            session: None,
            subscribers: Vec::new(),
            retained: HashMap::new(),
            queryables: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    fn session(&self) -> Result<&Session, TransportError> {
        self.session.as_ref().ok_or(TransportError::NotConnected)
    }

    async fn serve_retained(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if let Some(slot) = self.retained.get(topic) {
            *lock(slot) = payload;
            return Ok(());
        }

        let slot: RetainedSlot = Arc::new(Mutex::new(payload));
        let served = slot.clone();
        let queryable = self
            .session()?
            .declare_queryable(topic)
            .callback(move |query| {
                let payload = lock(&served).clone();
                if let Err(e) = query.reply(query.key_expr().clone(), payload).wait() {
                    debug!(error = %e, "failed to answer retained query");
                }
            })
            .await
            .map_err(|e| TransportError::publish(topic, e.to_string()))?;

        self.queryables.push(queryable);
        self.retained.insert(topic.to_string(), slot);
        Ok(())
    }

    /// Overwrites the value served for `topic`, if this session serves one.
    fn refresh_retained(&self, topic: &str, payload: &[u8]) {
        if let Some(slot) = self.retained.get(topic) {
            *lock(slot) = payload.to_vec();
        }
    }

    async fn fetch_retained(&self, topic: &str) -> Result<Option<Vec<u8>>, TransportError> {
        let replies = self
            .session()?
            .get(topic)
            .timeout(RETAINED_QUERY_TIMEOUT)
            .await
            .map_err(|e| TransportError::subscribe(topic, e.to_string()))?;

        let first = tokio::time::timeout(RETAINED_QUERY_TIMEOUT, replies.recv_async()).await;
        match first {
            Ok(Ok(reply)) => Ok(reply.result().ok().map(|sample| sample.payload().to_bytes().into_owned())),
            // No retained value anywhere on the network yet.
            Ok(Err(_)) | Err(_) => Ok(None),
        }
    }
}

fn lock(slot: &RetainedSlot) -> std::sync::MutexGuard<'_, Vec<u8>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl PubSubTransport for ZenohTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let session = zenoh::open(self.config.clone())
            .await
            .map_err(|e| TransportError::connect(e.to_string()))?;
        info!(zid = %session.zid(), "zenoh session opened");
        self.session = Some(session);
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), TransportError> {
        if retain {
            self.serve_retained(topic, payload.clone()).await?;
        }
        self.session()?
            .put(topic, payload)
            .await
            .map_err(|e| TransportError::publish(topic, e.to_string()))
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let subscriber = self
            .session()?
            .declare_subscriber(topic)
            .await
            .map_err(|e| TransportError::subscribe(topic, e.to_string()))?;
        self.subscribers.push(subscriber);

        if let Some(payload) = self.fetch_retained(topic).await? {
            debug!(topic, bytes = payload.len(), "received retained value");
            self.pending.push_back(InboundMessage::new(topic, payload));
        }
        Ok(())
    }

    async fn try_recv(&mut self) -> Result<Option<InboundMessage>, TransportError> {
        if self.session.is_none() {
            return Err(TransportError::NotConnected);
        }
        if let Some(message) = self.pending.pop_front() {
            return Ok(Some(message));
        }

        for subscriber in &self.subscribers {
            let sample = subscriber
                .try_recv()
                .map_err(|e| TransportError::lost(e.to_string()))?;
            if let Some(sample) = sample {
                let message = InboundMessage::new(
                    sample.key_expr().as_str(),
                    sample.payload().to_bytes().into_owned(),
                );
                self.refresh_retained(&message.topic, &message.payload);
                return Ok(Some(message));
            }
        }
        Ok(None)
    }

    async fn disconnect(&mut self) {
        self.subscribers.clear();
        self.queryables.clear();
        self.retained.clear();
        self.pending.clear();

        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                debug!(error = %e, "error while closing zenoh session");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Peer session without scouting, so tests only see the peers they wire up.
    fn peer_config(listen: Option<&str>, connect: Option<&str>) -> zenoh::Config {
        let mut config = zenoh::Config::default();
        config.insert_json5("mode", r#""peer""#).unwrap();
        config.insert_json5("scouting/multicast/enabled", "false").unwrap();
        config.insert_json5("scouting/gossip/enabled", "false").unwrap();
        if let Some(endpoint) = listen {
            config
                .insert_json5("listen/endpoints", &format!(r#"["{}"]"#, endpoint))
                .unwrap();
        }
        if let Some(endpoint) = connect {
            config
                .insert_json5("connect/endpoints", &format!(r#"["{}"]"#, endpoint))
                .unwrap();
        }
        config
    }

    /// Lets declarations propagate between the sessions.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(750)).await;
    }

    /// Drains `transport` until `payload` arrives on `topic`.
    async fn received(transport: &mut ZenohTransport, topic: &str, payload: &[u8]) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            match transport.try_recv().await.unwrap() {
                Some(message) if message.topic == topic && message.payload == payload => return true,
                Some(_) => continue,
                None => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
        false
    }

    #[test]
    fn test_live_sample_refreshes_served_value() {
        let mut transport = ZenohTransport::new(zenoh::Config::default());
        let slot: RetainedSlot = Arc::new(Mutex::new(b"old".to_vec()));
        transport.retained.insert("canvas/shared-state".to_string(), slot.clone());

        transport.refresh_retained("canvas/shared-state", b"new");
        transport.refresh_retained("canvas/heartbeat", b"ignored");

        assert_eq!(*lock(&slot), b"new".to_vec());
        assert!(!transport.retained.contains_key("canvas/heartbeat"));
    }

    #[tokio::test]
    async fn test_try_recv_requires_connection() {
        let mut transport = ZenohTransport::new(zenoh::Config::default());
        assert_eq!(transport.try_recv().await, Err(TransportError::NotConnected));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_publish_reaches_peer() {
        let endpoint = "tcp/127.0.0.1:17461";
        let topic = "canvas-pubsub/heartbeat";
        let mut a = ZenohTransport::new(peer_config(Some(endpoint), None));
        let mut b = ZenohTransport::new(peer_config(None, Some(endpoint)));
        a.connect().await.unwrap();
        b.connect().await.unwrap();
        a.subscribe(topic).await.unwrap();
        settle().await;

        b.publish(topic, br#"{"id":1}"#.to_vec(), false).await.unwrap();
        assert!(received(&mut a, topic, br#"{"id":1}"#).await);

        a.disconnect().await;
        b.disconnect().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_late_subscriber_gets_retained_value() {
        let endpoint = "tcp/127.0.0.1:17462";
        let topic = "canvas-retain/shared-state";
        let mut leader = ZenohTransport::new(peer_config(Some(endpoint), None));
        let mut joiner = ZenohTransport::new(peer_config(None, Some(endpoint)));
        leader.connect().await.unwrap();
        leader.publish(topic, b"state-1".to_vec(), true).await.unwrap();
        leader.publish(topic, b"state-2".to_vec(), true).await.unwrap();

        joiner.connect().await.unwrap();
        settle().await;
        joiner.subscribe(topic).await.unwrap();

        let first = joiner.try_recv().await.unwrap().unwrap();
        assert_eq!(first.topic, topic);
        assert_eq!(first.payload, b"state-2".to_vec());

        leader.disconnect().await;
        joiner.disconnect().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_former_publisher_serves_newer_state() {
        let endpoint = "tcp/127.0.0.1:17463";
        let topic = "canvas-handover/shared-state";
        let mut former = ZenohTransport::new(peer_config(Some(endpoint), None));
        let mut current = ZenohTransport::new(peer_config(None, Some(endpoint)));
        former.connect().await.unwrap();
        current.connect().await.unwrap();
        former.subscribe(topic).await.unwrap();
        settle().await;

        former.publish(topic, b"state-old".to_vec(), true).await.unwrap();
        current.publish(topic, b"state-new".to_vec(), true).await.unwrap();
        assert!(received(&mut former, topic, b"state-new").await);

        // Only the former publisher is left to answer the joiner.
        current.disconnect().await;
        let mut joiner = ZenohTransport::new(peer_config(None, Some(endpoint)));
        joiner.connect().await.unwrap();
        settle().await;
        joiner.subscribe(topic).await.unwrap();

        let first = joiner.try_recv().await.unwrap().unwrap();
        assert_eq!(first.payload, b"state-new".to_vec());

        former.disconnect().await;
        joiner.disconnect().await;
    }
}
