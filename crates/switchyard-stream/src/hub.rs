use crate::event::{EventKind, StreamEvent};
use chrono::Utc;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tunables for the streaming hub.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Seconds between heartbeat rounds.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Upper bound of live subscribers on one channel.
    #[serde(default = "default_max_subscribers")]
    pub max_subscribers_per_channel: usize,
    /// Shared secret required to attach. `None` = open.
    #[serde(default)]
    pub token: Option<String>,
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_max_subscribers() -> usize {
    16
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            max_subscribers_per_channel: default_max_subscribers(),
            token: None,
        }
    }
}

impl HubConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

/// Why an attach was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttachError {
    #[error("invalid or missing stream token")]
    Unauthorized,
    #[error("channel already has {limit} subscribers")]
    ChannelFull { limit: usize },
}

/// What the hub pushes down a subscriber's queue.
#[derive(Debug, Clone, PartialEq)]
pub enum HubFrame {
    Event(StreamEvent),
    /// Liveness check; the transport answers by calling
    /// [`StreamingHub::acknowledge`].
    Ping,
    /// The hub dropped this subscriber; the transport closes the socket.
    Close,
}

/// Receiving half handed to the transport after a successful attach.
#[derive(Debug)]
pub struct Subscription {
    pub id: Uuid,
    pub channel_id: String,
    pub frames: mpsc::UnboundedReceiver<HubFrame>,
}

struct Subscriber {
    tx: mpsc::UnboundedSender<HubFrame>,
    alive: bool,
}

#[derive(Default)]
struct Channel {
    seq: u64,
    subscribers: HashMap<Uuid, Subscriber>,
}

/// Outcome of one heartbeat round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    pub pinged: usize,
    pub reaped: usize,
}

/// Per-job broadcast channels with sequencing and dead-peer detection.
///
/// Channels are created lazily on first attach and destroyed with their
/// sequence counter when the last subscriber leaves. There is no replay
/// buffer: a subscriber only sees events broadcast after it attached.
pub struct StreamingHub {
    config: HubConfig,
    channels: Mutex<HashMap<String, Channel>>,
}

impl StreamingHub {
    pub fn new(config: HubConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            channels: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Register a subscriber on `channel_id`.
    ///
    /// The token check happens before the channel table is touched, so a
    /// rejected attach never creates a channel.
    pub fn attach(
        &self,
        channel_id: &str,
        token: Option<&str>,
    ) -> Result<Subscription, AttachError> {
        if let Some(expected) = &self.config.token {
            let presented = token.unwrap_or("");
            if !validate_token(expected, presented) {
                warn!(channel = %channel_id, "Rejected stream attach: bad token");
                return Err(AttachError::Unauthorized);
            }
        }

        let mut channels = self.channels.lock();
        let live = channels
            .get(channel_id)
            .map(|c| c.subscribers.len())
            .unwrap_or(0);
        if live >= self.config.max_subscribers_per_channel {
            warn!(channel = %channel_id, live, "Rejected stream attach: channel full");
            return Err(AttachError::ChannelFull {
                limit: self.config.max_subscribers_per_channel,
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        channels
            .entry(channel_id.to_string())
            .or_default()
            .subscribers
            .insert(id, Subscriber { tx, alive: true });
        info!(channel = %channel_id, subscriber = %id, "Subscriber attached");

        Ok(Subscription {
            id,
            channel_id: channel_id.to_string(),
            frames: rx,
        })
    }

    /// Publish an event to every subscriber currently attached to
    /// `channel_id`. Returns the sequence number used, or `None` when the
    /// channel does not exist (nobody to deliver to).
    pub fn broadcast(
        &self,
        channel_id: &str,
        kind: EventKind,
        payload: Map<String, Value>,
    ) -> Option<u64> {
        let mut channels = self.channels.lock();
        let channel = channels.get_mut(channel_id)?;

        channel.seq += 1;
        let event = StreamEvent {
            kind,
            job_id: channel_id.to_string(),
            ts: Utc::now().timestamp_millis(),
            seq: channel.seq,
            payload,
        };

        let mut gone = Vec::new();
        for (id, sub) in &channel.subscribers {
            if sub.tx.send(HubFrame::Event(event.clone())).is_err() {
                gone.push(*id);
            }
        }
        for id in gone {
            channel.subscribers.remove(&id);
            debug!(channel = %channel_id, subscriber = %id, "Dropped closed subscriber");
        }

        let seq = channel.seq;
        if channel.subscribers.is_empty() {
            channels.remove(channel_id);
        }
        Some(seq)
    }

    /// Remove a subscriber. Destroys the channel when it was the last one.
    pub fn detach(&self, channel_id: &str, subscriber_id: Uuid) -> bool {
        let mut channels = self.channels.lock();
        let Some(channel) = channels.get_mut(channel_id) else {
            return false;
        };
        let removed = channel.subscribers.remove(&subscriber_id).is_some();
        if channel.subscribers.is_empty() {
            channels.remove(channel_id);
            debug!(channel = %channel_id, "Channel destroyed");
        }
        if removed {
            info!(channel = %channel_id, subscriber = %subscriber_id, "Subscriber detached");
        }
        removed
    }

    /// Record a pong from a subscriber.
    pub fn acknowledge(&self, channel_id: &str, subscriber_id: Uuid) {
        let mut channels = self.channels.lock();
        if let Some(sub) = channels
            .get_mut(channel_id)
            .and_then(|c| c.subscribers.get_mut(&subscriber_id))
        {
            sub.alive = true;
        }
    }

    /// Run one heartbeat round: subscribers that answered the previous ping
    /// get a new one, the rest are closed and removed.
    pub fn heartbeat(&self) -> HeartbeatReport {
        let mut report = HeartbeatReport::default();
        let mut channels = self.channels.lock();

        for (channel_id, channel) in channels.iter_mut() {
            channel.subscribers.retain(|id, sub| {
                if sub.alive {
                    sub.alive = false;
                    if sub.tx.send(HubFrame::Ping).is_ok() {
                        report.pinged += 1;
                        return true;
                    }
                }
                let _ = sub.tx.send(HubFrame::Close);
                warn!(channel = %channel_id, subscriber = %id, "Reaped unresponsive subscriber");
                report.reaped += 1;
                false
            });
        }
        channels.retain(|_, c| !c.subscribers.is_empty());

        report
    }

    /// Spawn the periodic heartbeat loop. The first round fires one full
    /// interval after start.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        let period = self.config.heartbeat_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let report = hub.heartbeat();
                if report.reaped > 0 {
                    info!(
                        pinged = report.pinged,
                        reaped = report.reaped,
                        "Heartbeat round"
                    );
                }
            }
        })
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn subscriber_count(&self, channel_id: &str) -> usize {
        self.channels
            .lock()
            .get(channel_id)
            .map(|c| c.subscribers.len())
            .unwrap_or(0)
    }

    pub fn has_channel(&self, channel_id: &str) -> bool {
        self.channels.lock().contains_key(channel_id)
    }
}

/// Constant-time comparison of the configured token with the presented one.
pub fn validate_token(expected: &str, presented: &str) -> bool {
    let a = expected.as_bytes();
    let b = presented.as_bytes();

    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
