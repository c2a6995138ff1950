//! Persistent broker session with a blocking reconnect loop

use std::future::Future;
use std::time::Duration;

use flume::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::Message;

/// Wait between failed connection attempts. No cap, no jitter.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// A publish/subscribe session the command channel can drive.
///
/// Subscriptions do not survive a reconnect; the channel reissues them.
pub trait Broker: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    fn is_connected(&self) -> bool;

    fn connect(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn subscribe(&mut self, topic: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Service keep-alive and return at most one inbound message.
    /// An error means the session is gone.
    fn poll(&mut self) -> impl Future<Output = Result<Option<Message>, Self::Error>> + Send;

    /// Drop the current session, if any
    fn disconnect(&mut self);
}

pub struct CommandChannel<B> {
    broker: B,
    topic: String,
    reconnect_delay: Duration,
    tx: Sender<Message>,
}

impl<B: Broker> CommandChannel<B> {
    pub fn new(broker: B, topic: impl Into<String>, tx: Sender<Message>) -> Self {
        Self {
            broker,
            topic: topic.into(),
            reconnect_delay: RECONNECT_DELAY,
            tx,
        }
    }

    /// Retry until connected and subscribed. Blocks the caller indefinitely
    /// while the broker is unreachable.
    #[instrument(skip(self), fields(topic = %self.topic))]
    pub async fn ensure_connected(&mut self) {
        while !self.broker.is_connected() {
            info!("Attempting broker connection...");

            let result = match self.broker.connect().await {
                Ok(()) => self.broker.subscribe(&self.topic).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => info!("Connected, subscribed to {}", self.topic),
                Err(e) => {
                    self.broker.disconnect();
                    warn!(
                        "Connection failed, trying again in {:?}: {}",
                        self.reconnect_delay, e
                    );
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }
    }

    /// Keep the session alive and forward inbound messages until cancelled
    /// or the dispatcher goes away.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            if !self.broker.is_connected() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = self.ensure_connected() => {}
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.broker.poll() => match polled {
                    Ok(Some(message)) => {
                        if self.tx.send_async(message).await.is_err() {
                            info!("Dispatcher gone, closing command channel");
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Broker connection lost: {}", e);
                        metrics::counter!("bedcam_broker_reconnects").increment(1);
                        self.broker.disconnect();
                    }
                },
            }
        }

        self.broker.disconnect();
        info!("Command channel stopped");
    }
}
