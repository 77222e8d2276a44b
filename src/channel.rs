//! A joined channel: its membership roster and its bounded message feed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::message::Command;
use crate::network::{self, NetworkShared};

/// A message delivered on a channel's feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    /// Nickname of the member who sent it; absent for channel status
    /// events ("X has joined", "Y has quit", ...).
    pub sender: Option<String>,
    pub content: String,
}

/// Shared per-channel state. The dispatch task is the sole producer on
/// the queue; the roster itself lives in the session's registry so every
/// roster mutation happens under the session lock.
#[derive(Debug)]
pub(crate) struct ChannelShared {
    tag: String,
    closed: AtomicBool,
    tx: Mutex<Option<mpsc::Sender<ChannelMessage>>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<ChannelMessage>>,
    network: Weak<NetworkShared>,
}

impl ChannelShared {
    pub(crate) fn new(tag: String, network: Weak<NetworkShared>, depth: usize) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(depth);
        Arc::new(Self {
            tag,
            closed: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            network,
        })
    }

    pub(crate) fn tag(&self) -> &str {
        &self.tag
    }

    /// Sender handle for routing, or `None` once the channel is closed.
    pub(crate) fn sender(&self) -> Option<mpsc::Sender<ChannelMessage>> {
        self.tx.lock().unwrap().clone()
    }

    /// Stop the feed: consumers drain what is buffered, then see `None`.
    pub(crate) fn close_queue(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.tx.lock().unwrap().take();
    }
}

/// Handle to a joined channel, obtained from
/// [`Network::join_channel`](crate::Network::join_channel).
///
/// Clones share the same channel; the session's registry is the sole
/// owner of the underlying state.
#[derive(Debug, Clone)]
pub struct NetworkChannel {
    pub(crate) shared: Arc<ChannelShared>,
}

impl NetworkChannel {
    pub fn tag(&self) -> &str {
        self.shared.tag()
    }

    /// Send a message to this channel.
    pub async fn send_message(&self, content: &str) -> Result<()> {
        let network = self
            .shared
            .network
            .upgrade()
            .ok_or(Error::ConnectionClosed)?;
        network::send(
            &network,
            &Command::Privmsg {
                target: self.shared.tag.clone(),
                content: content.to_owned(),
            },
        )
        .await
    }

    /// Pull the next message, waiting until one arrives.
    ///
    /// Returns `None` once the channel has been parted or the session has
    /// torn down and the buffered messages are drained.
    pub async fn receive_message(&self) -> Option<ChannelMessage> {
        self.shared.rx.lock().await.recv().await
    }

    /// Snapshot of the nicknames known to occupy this channel.
    pub fn members(&self) -> Vec<String> {
        match self.shared.network.upgrade() {
            Some(network) => network.channel_members(&self.shared.tag),
            None => Vec::new(),
        }
    }

    /// Leave the channel.
    ///
    /// Idempotent: the first call closes the feed, sends the PART command
    /// exactly once and removes the channel from the session; any later
    /// call is a silent no-op success.
    pub async fn part(&self) -> Result<()> {
        if self
            .shared
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        self.shared.tx.lock().unwrap().take();

        let Some(network) = self.shared.network.upgrade() else {
            return Err(Error::ConnectionClosed);
        };
        let result = network::send(
            &network,
            &Command::Part {
                channel: self.shared.tag.clone(),
            },
        )
        .await;

        network.forget_room(&self.shared.tag);

        result
    }
}
