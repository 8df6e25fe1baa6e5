use futures::StreamExt;
use redis::aio::PubSubSink;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::common::error::{Result, SyncError};
use crate::common::event::ChangeEvent;
use crate::common::utils::RetryPolicy;
use crate::storage::redis::redis_client::RedisClient;
use crate::traits::message_bus::{BusHandler, BusMessage, MessageBus};

type Subscriptions = Arc<Mutex<HashMap<String, Vec<BusHandler>>>>;

/// Redis pub/sub bus. Publishing goes through the shared multiplexed
/// connection; a background task owns the subscriber connection, reconnects
/// with backoff and re-subscribes every registered topic.
pub struct RedisBus {
    publisher: RedisClient,
    subscriptions: Subscriptions,
    sink: Arc<Mutex<Option<PubSubSink>>>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RedisBus {
    /// Spawns the subscriber task and waits for its first connection.
    pub async fn connect(publisher: RedisClient, retry: RetryPolicy) -> anyhow::Result<Self> {
        let subscriptions: Subscriptions = Arc::new(Mutex::new(HashMap::new()));
        let sink = Arc::new(Mutex::new(None));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (connected_tx, mut connected_rx) = watch::channel(false);

        let task = tokio::spawn(run_subscriber(
            publisher.client().clone(),
            subscriptions.clone(),
            sink.clone(),
            shutdown_rx,
            connected_tx,
            retry,
            publisher.op_timeout(),
        ));

        let wait = publisher.op_timeout() * 2;
        match timeout(wait, connected_rx.wait_for(|c| *c)).await {
            Ok(Ok(_)) => log::debug!("Bus subscriber connected"),
            _ => {
                shutdown_tx.send_replace(true);
                task.abort();
                return Err(anyhow::anyhow!(
                    "bus subscriber did not connect within {:?}",
                    wait
                ));
            }
        }

        Ok(Self {
            publisher,
            subscriptions,
            sink,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        })
    }
}

async fn dispatch(subscriptions: &Subscriptions, msg: redis::Msg) {
    let topic = msg.get_channel_name().to_string();
    let payload: String = match msg.get_payload() {
        Ok(p) => p,
        Err(e) => {
            log::warn!("Dropping non-text payload on {}: {}", topic, e);
            return;
        }
    };
    let handlers: Vec<BusHandler> = {
        let subs = subscriptions.lock().await;
        subs.get(&topic).cloned().unwrap_or_default()
    };
    for handler in handlers {
        handler(BusMessage {
            topic: topic.clone(),
            payload: payload.clone(),
        });
    }
}

async fn run_subscriber(
    client: redis::Client,
    subscriptions: Subscriptions,
    sink: Arc<Mutex<Option<PubSubSink>>>,
    mut shutdown: watch::Receiver<bool>,
    connected: watch::Sender<bool>,
    retry: RetryPolicy,
    op_timeout: Duration,
) {
    let mut attempt: u32 = 0;
    loop {
        if *shutdown.borrow() {
            break;
        }
        match timeout(op_timeout, client.get_async_pubsub()).await {
            Ok(Ok(pubsub)) => {
                let (mut new_sink, mut stream) = pubsub.split();
                let resubscribed = {
                    // Holding the registry lock keeps `subscribe` from racing
                    // the re-subscription.
                    let subs = subscriptions.lock().await;
                    let mut ok = true;
                    for topic in subs.keys() {
                        if let Err(e) = new_sink.subscribe(topic).await {
                            log::warn!("Failed to subscribe to {}: {}", topic, e);
                            ok = false;
                            break;
                        }
                    }
                    if ok {
                        *sink.lock().await = Some(new_sink);
                        if attempt > 0 {
                            log::info!("Bus reconnected, re-subscribed {} topic(s)", subs.len());
                        }
                    }
                    ok
                };

                if resubscribed {
                    attempt = 0;
                    connected.send_replace(true);
                    loop {
                        tokio::select! {
                            msg = stream.next() => match msg {
                                Some(msg) => dispatch(&subscriptions, msg).await,
                                None => break,
                            },
                            _ = shutdown.changed() => {
                                *sink.lock().await = None;
                                return;
                            }
                        }
                    }
                    *sink.lock().await = None;
                    connected.send_replace(false);
                    log::warn!("Bus subscriber connection lost, reconnecting");
                }
            }
            Ok(Err(e)) => log::warn!("Bus subscriber failed to connect: {}", e),
            Err(_) => log::warn!("Bus subscriber connection timed out"),
        }

        let delay = retry.delay_for(attempt);
        attempt = attempt.saturating_add(1);
        tokio::select! {
            _ = sleep(Duration::from_millis(delay)) => {}
            _ = shutdown.changed() => break,
        }
    }
    log::debug!("Bus subscriber stopped");
}

impl MessageBus for RedisBus {
    async fn publish(&self, topic: &str, event: &ChangeEvent) -> Result<()> {
        let payload = event.encode()?;
        match self.publisher.publish(topic, &payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                log::error!("Failed to publish {} for {}: {}", event.body.name(), event.server_id, e);
                Err(SyncError::BusUnavailable(format!("PUBLISH {}: {}", topic, e)))
            }
        }
    }

    async fn subscribe(&self, topic: &str, handler: BusHandler) -> Result<()> {
        let mut subs = self.subscriptions.lock().await;
        let handlers = subs.entry(topic.to_string()).or_default();
        let first = handlers.is_empty();
        handlers.push(handler);
        if first {
            let mut sink = self.sink.lock().await;
            if let Some(sink) = sink.as_mut() {
                // On failure the reconnect loop subscribes again.
                if let Err(e) = sink.subscribe(topic).await {
                    log::warn!("Subscribe to {} deferred until reconnect: {}", topic, e);
                }
            }
        }
        log::debug!("Subscribed to {}", topic);
        Ok(())
    }

    async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::warn!("Bus subscriber task ended abnormally: {}", e);
            }
        }
        log::info!("Bus shut down");
    }
}
