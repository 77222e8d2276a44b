//! Session orchestrator: owns the transport, the channel registry, and
//! the single background dispatch task that reads, decodes, and routes
//! inbound protocol traffic.

use std::collections::{HashMap, HashSet};
use std::io;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::channel::{ChannelMessage, ChannelShared, NetworkChannel};
use crate::error::{Error, Result};
use crate::message::{self, numeric, Command, MessageKind, Origin, ServerMessage};
use crate::transport::{BoxedWriter, Connection, LineReader};

/// Depth of every inbound queue. A full queue blocks the dispatch task —
/// and with it protocol processing for the whole session, keepalive
/// replies included — until the lagging consumer drains it.
pub(crate) const MESSAGES_BUF_SIZE: usize = 32;

/// A message delivered on the session-level feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkMessage {
    pub content: String,
}

struct RoomEntry {
    handle: Arc<ChannelShared>,
    users: HashSet<String>,
}

/// Channel registry plus the reverse member→rooms index.
///
/// Invariant: member M appears in room R's `users` exactly when
/// `occupancy[M]` contains R. Every mutator below updates both sides
/// before returning, so the invariant holds whenever the enclosing lock
/// is released.
#[derive(Default)]
struct Rooms {
    channels: HashMap<String, RoomEntry>,
    occupancy: HashMap<String, HashSet<String>>,
}

impl Rooms {
    fn add_users(&mut self, nicknames: &[String], tag: &str) -> Option<Arc<ChannelShared>> {
        let entry = self.channels.get_mut(tag)?;
        for nickname in nicknames {
            entry.users.insert(nickname.clone());
            self.occupancy
                .entry(nickname.clone())
                .or_default()
                .insert(tag.to_owned());
        }
        Some(entry.handle.clone())
    }

    fn remove_member(&mut self, nickname: &str, tag: &str) -> Option<Arc<ChannelShared>> {
        let entry = self.channels.get_mut(tag)?;
        entry.users.remove(nickname);
        if let Some(tags) = self.occupancy.get_mut(nickname) {
            tags.remove(tag);
            if tags.is_empty() {
                self.occupancy.remove(nickname);
            }
        }
        Some(entry.handle.clone())
    }

    /// Remove a member from every room they occupied (quit cascade).
    fn remove_everywhere(&mut self, nickname: &str) -> Vec<Arc<ChannelShared>> {
        let Some(tags) = self.occupancy.remove(nickname) else {
            return Vec::new();
        };
        let mut handles = Vec::new();
        for tag in tags {
            if let Some(entry) = self.channels.get_mut(&tag) {
                entry.users.remove(nickname);
                handles.push(entry.handle.clone());
            }
        }
        handles
    }

    /// Migrate a member's roster and reverse-index entries to a new
    /// nickname. A member unknown to any room migrates nothing.
    fn rename(&mut self, old: &str, new: &str) -> Vec<Arc<ChannelShared>> {
        let Some(tags) = self.occupancy.remove(old) else {
            return Vec::new();
        };
        let mut handles = Vec::new();
        for tag in &tags {
            if let Some(entry) = self.channels.get_mut(tag) {
                entry.users.remove(old);
                entry.users.insert(new.to_owned());
                handles.push(entry.handle.clone());
            }
        }
        self.occupancy.insert(new.to_owned(), tags);
        handles
    }

    /// Drop a room, removing only that room's tag from each member's
    /// reverse entry.
    fn forget(&mut self, tag: &str) {
        let Some(entry) = self.channels.remove(tag) else {
            return;
        };
        for nickname in &entry.users {
            if let Some(tags) = self.occupancy.get_mut(nickname) {
                tags.remove(tag);
                if tags.is_empty() {
                    self.occupancy.remove(nickname);
                }
            }
        }
    }

    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        for (tag, entry) in &self.channels {
            for nickname in &entry.users {
                if !self
                    .occupancy
                    .get(nickname)
                    .is_some_and(|tags| tags.contains(tag))
                {
                    return false;
                }
            }
        }
        for (nickname, tags) in &self.occupancy {
            if tags.is_empty() {
                return false;
            }
            for tag in tags {
                if !self
                    .channels
                    .get(tag)
                    .is_some_and(|entry| entry.users.contains(nickname))
                {
                    return false;
                }
            }
        }
        true
    }
}

/// State shared between the public handle, joined channels, and the
/// dispatch task.
pub(crate) struct NetworkShared {
    registered: AtomicBool,
    listener_started: AtomicBool,
    torn_down: AtomicBool,
    nickname: Mutex<String>,
    rooms: Mutex<Rooms>,
    reader: Mutex<Option<LineReader>>,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    feed_tx: Mutex<Option<mpsc::Sender<NetworkMessage>>>,
    feed_rx: tokio::sync::Mutex<mpsc::Receiver<NetworkMessage>>,
    shutdown: Notify,
}

impl NetworkShared {
    fn has_nickname(&self, nickname: &str) -> bool {
        *self.nickname.lock().unwrap() == nickname
    }

    fn set_nickname(&self, nickname: &str) {
        *self.nickname.lock().unwrap() = nickname.to_owned();
    }

    /// Adopt `new` if `old` is our current nickname. Returns whether the
    /// rename applied to us.
    fn replace_nickname(&self, old: &str, new: &str) -> bool {
        let mut nickname = self.nickname.lock().unwrap();
        if *nickname != old {
            return false;
        }
        *nickname = new.to_owned();
        true
    }

    fn channel_sender(&self, tag: &str) -> Option<mpsc::Sender<ChannelMessage>> {
        let rooms = self.rooms.lock().unwrap();
        rooms.channels.get(tag)?.handle.sender()
    }

    pub(crate) fn channel_members(&self, tag: &str) -> Vec<String> {
        let rooms = self.rooms.lock().unwrap();
        match rooms.channels.get(tag) {
            Some(entry) => entry.users.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Remove a room on voluntary leave; called from
    /// [`NetworkChannel::part`].
    pub(crate) fn forget_room(&self, tag: &str) {
        self.rooms.lock().unwrap().forget(tag);
    }
}

/// One connected, stateful protocol conversation with a server.
///
/// Clones share the same session. All operations are safe to call
/// concurrently; the dispatch task started by
/// [`start_listener`](Self::start_listener) is the sole producer on
/// every inbound queue.
#[derive(Clone)]
pub struct Network {
    shared: Arc<NetworkShared>,
}

impl Network {
    pub fn new(conn: Connection) -> Self {
        let (reader, writer) = conn.into_split();
        let (feed_tx, feed_rx) = mpsc::channel(MESSAGES_BUF_SIZE);
        Self {
            shared: Arc::new(NetworkShared {
                registered: AtomicBool::new(false),
                listener_started: AtomicBool::new(false),
                torn_down: AtomicBool::new(false),
                nickname: Mutex::new(String::new()),
                rooms: Mutex::new(Rooms::default()),
                reader: Mutex::new(Some(reader)),
                writer: tokio::sync::Mutex::new(Some(writer)),
                feed_tx: Mutex::new(Some(feed_tx)),
                feed_rx: tokio::sync::Mutex::new(feed_rx),
                shutdown: Notify::new(),
            }),
        }
    }

    /// Send the identity commands. Does not wait for the server's
    /// confirmation; [`is_registered`](Self::is_registered) flips once
    /// the welcome reply arrives.
    pub async fn register(&self, nickname: &str, realname: &str) -> Result<()> {
        send(
            &self.shared,
            &Command::Nick {
                nickname: nickname.to_owned(),
            },
        )
        .await?;

        let mut username = whoami::username();
        if username.is_empty() {
            username = nickname.to_owned();
        }
        send(
            &self.shared,
            &Command::User {
                username,
                realname: realname.to_owned(),
            },
        )
        .await
    }

    pub fn is_registered(&self) -> bool {
        self.shared.registered.load(Ordering::SeqCst)
    }

    /// The nickname the server last confirmed for us.
    pub fn nickname(&self) -> String {
        self.shared.nickname.lock().unwrap().clone()
    }

    /// Spawn the background dispatch task. Idempotent: at most one task
    /// runs per session; later calls are no-ops.
    pub fn start_listener(&self) {
        if self.shared.listener_started.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.shared.torn_down.load(Ordering::SeqCst) {
            return;
        }
        let Some(mut reader) = self.shared.reader.lock().unwrap().take() else {
            return;
        };

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shared.shutdown.notified() => break,
                    line = reader.read_line() => match line {
                        Ok(line) if line.truncated => {
                            warn!("message was truncated due to its size");
                            break;
                        }
                        Ok(line) => {
                            if line.text.is_empty() {
                                continue;
                            }
                            if dispatch(&shared, &line.text).await.is_break() {
                                break;
                            }
                        }
                        Err(err) => {
                            if err.kind() != io::ErrorKind::UnexpectedEof {
                                warn!("failed to read message from network: {err}");
                            }
                            break;
                        }
                    },
                }
            }
            teardown(&shared).await;
        });
    }

    /// Join a channel. Fails with [`Error::AlreadyJoined`] if this
    /// session already holds the channel. The roster fills in
    /// asynchronously when the server's NAMES reply arrives.
    pub async fn join_channel(&self, tag: &str) -> Result<NetworkChannel> {
        if self.shared.rooms.lock().unwrap().channels.contains_key(tag) {
            return Err(Error::AlreadyJoined(tag.to_owned()));
        }

        let handle = ChannelShared::new(
            tag.to_owned(),
            Arc::downgrade(&self.shared),
            MESSAGES_BUF_SIZE,
        );

        send(
            &self.shared,
            &Command::Join {
                channel: tag.to_owned(),
            },
        )
        .await?;

        let mut rooms = self.shared.rooms.lock().unwrap();
        match rooms.channels.entry(tag.to_owned()) {
            std::collections::hash_map::Entry::Occupied(_) => {
                return Err(Error::AlreadyJoined(tag.to_owned()))
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(RoomEntry {
                    handle: handle.clone(),
                    users: HashSet::new(),
                });
            }
        }
        drop(rooms);

        Ok(NetworkChannel { shared: handle })
    }

    /// Request a nickname change. A request matching the current nickname
    /// is a no-op success; otherwise the session's nickname field updates
    /// only when the server confirms the change.
    pub async fn change_nickname(&self, nickname: &str) -> Result<()> {
        if self.shared.has_nickname(nickname) {
            return Ok(());
        }
        send(
            &self.shared,
            &Command::Nick {
                nickname: nickname.to_owned(),
            },
        )
        .await
    }

    /// Terminate the session: send QUIT, then tear down. Teardown runs
    /// exactly once regardless of how many callers race it, and runs even
    /// when the QUIT write fails.
    pub async fn quit(&self, reason: &str) -> Result<()> {
        let result = send(
            &self.shared,
            &Command::Quit {
                reason: reason.to_owned(),
            },
        )
        .await;

        self.shared.shutdown.notify_one();
        teardown(&self.shared).await;

        result
    }

    /// Pull the next session-level message, waiting until one arrives.
    ///
    /// Returns `None` once the session has torn down and the buffered
    /// messages are drained.
    pub async fn receive_message(&self) -> Option<NetworkMessage> {
        self.shared.feed_rx.lock().await.recv().await
    }
}

/// Encode and write one command. Callers serialize through the writer
/// lock; a torn-down session reports [`Error::ConnectionClosed`].
pub(crate) async fn send(shared: &NetworkShared, command: &Command) -> Result<()> {
    let mut guard = shared.writer.lock().await;
    let writer = guard.as_mut().ok_or(Error::ConnectionClosed)?;
    writer
        .write_all(command.encode().as_bytes())
        .await
        .map_err(Error::Write)?;
    writer.flush().await.map_err(Error::Write)
}

/// One-time teardown shared by `quit()` and every dispatch-loop exit
/// path: close every channel feed, clear the registry and reverse index,
/// shut the transport, close the session feed.
async fn teardown(shared: &NetworkShared) {
    if shared
        .torn_down
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }

    let handles: Vec<Arc<ChannelShared>> = {
        let mut rooms = shared.rooms.lock().unwrap();
        let handles = rooms.channels.values().map(|e| e.handle.clone()).collect();
        rooms.channels.clear();
        rooms.occupancy.clear();
        handles
    };
    // No PART is sent here: the transport is going away with the session.
    for handle in handles {
        handle.close_queue();
    }

    if let Some(mut writer) = shared.writer.lock().await.take() {
        let _ = writer.shutdown().await;
    }

    shared.feed_tx.lock().unwrap().take();
}

async fn emit_session(shared: &NetworkShared, content: String) {
    let tx = shared.feed_tx.lock().unwrap().clone();
    if let Some(tx) = tx {
        let _ = tx.send(NetworkMessage { content }).await;
    }
}

async fn emit_channel(handle: &ChannelShared, msg: ChannelMessage) {
    if let Some(tx) = handle.sender() {
        let _ = tx.send(msg).await;
    }
}

fn status(content: String) -> ChannelMessage {
    ChannelMessage {
        sender: None,
        content,
    }
}

/// Decode one line and act on it. `Break` ends the dispatch loop.
async fn dispatch(shared: &Arc<NetworkShared>, raw_line: &str) -> ControlFlow<()> {
    let ServerMessage { origin, raw, kind } = message::decode(raw_line);

    match kind {
        MessageKind::Reply {
            code,
            target,
            content,
        } => return handle_reply(shared, code, &target, content, &raw).await,

        MessageKind::Quit => {
            let Origin::User { nickname, .. } = &origin else {
                return ControlFlow::Continue(());
            };
            let handles = shared.rooms.lock().unwrap().remove_everywhere(nickname);
            for handle in handles {
                emit_channel(&handle, status(format!("{nickname} has quit"))).await;
            }
        }

        MessageKind::Kick {
            channel,
            nickname,
            reason,
        } => {
            let Some(handle) = shared.rooms.lock().unwrap().remove_member(&nickname, &channel)
            else {
                return ControlFlow::Continue(());
            };
            let mut content = if shared.has_nickname(&nickname) {
                "You have been kicked from the channel".to_owned()
            } else {
                format!("{nickname} has been kicked from the channel")
            };
            if let Some(reason) = reason.filter(|r| !r.is_empty()) {
                content.push_str(". Reason: ");
                content.push_str(&reason);
            }
            emit_channel(&handle, status(content)).await;
        }

        MessageKind::Join { channel } => {
            let Origin::User { nickname, .. } = &origin else {
                return ControlFlow::Continue(());
            };
            let Some(handle) = shared
                .rooms
                .lock()
                .unwrap()
                .add_users(std::slice::from_ref(nickname), &channel)
            else {
                // The room is created locally by join_channel only.
                return ControlFlow::Continue(());
            };
            let content = if shared.has_nickname(nickname) {
                format!("You have joined {channel}")
            } else {
                format!("{nickname} has joined {channel}")
            };
            emit_channel(&handle, status(content)).await;
        }

        MessageKind::Part { channel } => {
            let Origin::User { nickname, .. } = &origin else {
                return ControlFlow::Continue(());
            };
            let Some(handle) = shared.rooms.lock().unwrap().remove_member(nickname, &channel)
            else {
                return ControlFlow::Continue(());
            };
            // Our own leave already produced local feedback in part().
            if shared.has_nickname(nickname) {
                return ControlFlow::Continue(());
            }
            emit_channel(&handle, status(format!("{nickname} has left {channel}"))).await;
        }

        MessageKind::Nick { nickname: new } => {
            let Origin::User { nickname: old, .. } = &origin else {
                return ControlFlow::Continue(());
            };
            let content = if shared.replace_nickname(old, &new) {
                let content = format!("You're now known as {new}");
                emit_session(shared, content.clone()).await;
                content
            } else {
                format!("{old} changed his nickname to {new}")
            };
            let handles = shared.rooms.lock().unwrap().rename(old, &new);
            for handle in handles {
                emit_channel(&handle, status(content.clone())).await;
            }
        }

        MessageKind::Privmsg { target, content } => {
            let Origin::User { nickname, .. } = &origin else {
                return ControlFlow::Continue(());
            };
            if !target.starts_with('#') {
                return ControlFlow::Continue(());
            }
            let Some(tx) = shared.channel_sender(&target) else {
                return ControlFlow::Continue(());
            };
            let _ = tx
                .send(ChannelMessage {
                    sender: Some(nickname.clone()),
                    content,
                })
                .await;
        }

        MessageKind::Ping => {
            let Origin::Server { name } = &origin else {
                return ControlFlow::Continue(());
            };
            if let Err(err) = send(shared, &Command::Pong {
                server: name.clone(),
            })
            .await
            {
                warn!("failed to send pong: {err}");
                return ControlFlow::Break(());
            }
        }

        MessageKind::Notice { content } => {
            emit_session(shared, content).await;
        }

        MessageKind::ServerError { content } => {
            let content = match content.split_once(" :") {
                Some((_, after)) => after.to_owned(),
                None => content,
            };
            emit_session(shared, format!("ERROR {content}")).await;
            return ControlFlow::Break(());
        }

        MessageKind::Mode { target, modes } => {
            // Channel mode reports are not surfaced, only our own.
            if target.starts_with('#') {
                return ControlFlow::Continue(());
            }
            emit_session(shared, format!("Your modes are {modes}")).await;
        }

        MessageKind::Unknown => {
            debug!("unknown message -> {raw}");
        }
    }

    ControlFlow::Continue(())
}

async fn handle_reply(
    shared: &Arc<NetworkShared>,
    code: u16,
    target: &str,
    content: String,
    raw: &str,
) -> ControlFlow<()> {
    use numeric::*;

    match code {
        // The welcome reply confirms registration and fixes our nickname,
        // then falls through to the informational feed like its peers.
        RPL_WELCOME
        | RPL_YOURHOST
        | RPL_CREATED
        | RPL_MYINFO
        | RPL_BOUNCE
        | RPL_LUSERCLIENT
        | RPL_LUSEROP
        | RPL_LUSERUNKNOWN
        | RPL_LUSERCHANNELS
        | RPL_LUSERME
        | RPL_ADMINME
        | RPL_LOCALUSERS
        | RPL_GLOBALUSERS
        | RPL_AWAY
        | RPL_MOTDSTART
        | RPL_MOTD
        | RPL_HOSTHIDDEN
        | ERR_NOMOTD
        | ERR_NICKCOLLISION
        | ERR_NOTREGISTERED
        | ERR_ALREADYREGISTERED => {
            if code == RPL_WELCOME {
                shared.registered.store(true, Ordering::SeqCst);
                shared.set_nickname(target);
            }
            let content = strip_nick_echo(shared, &content);
            emit_session(shared, content).await;
        }

        ERR_NOSUCHCHANNEL | ERR_NOTONCHANNEL => {
            emit_session(shared, content).await;
        }

        ERR_ERRONEUSNICKNAME => {
            let nickname = shared.nickname.lock().unwrap().clone();
            emit_session(shared, format!("Nickname {nickname} is invalid")).await;
        }

        ERR_NICKNAMEINUSE => {
            let nickname = match content.split_once(" :") {
                Some((before, _)) => before,
                None => content.as_str(),
            };
            emit_session(shared, format!("{nickname} is already in use")).await;
        }

        RPL_TOPIC | ERR_INVITEONLYCHAN | ERR_BANNEDFROMCHAN | ERR_CANNOTSENDTOCHAN => {
            let Some((tag, text)) = content.split_once(" :") else {
                return ControlFlow::Continue(());
            };
            let Some(tx) = shared.channel_sender(tag) else {
                return ControlFlow::Continue(());
            };
            let _ = tx.send(status(text.to_owned())).await;
        }

        RPL_NAMREPLY => {
            // content: "<symbol> <channel> :<[@+]nick> <[@+]nick> ..."
            let Some((header, list)) = content.split_once(" :") else {
                return ControlFlow::Continue(());
            };
            let Some(tag) = header.split(' ').nth(1) else {
                return ControlFlow::Continue(());
            };
            let nicknames: Vec<String> = list
                .split(' ')
                .filter(|s| !s.is_empty())
                .map(|s| s.trim_start_matches(['@', '+']).to_owned())
                .collect();
            shared.rooms.lock().unwrap().add_users(&nicknames, tag);
        }

        RPL_ENDOFNAMES | RPL_ENDOFMOTD | RPL_TOPICWHOTIME => {}

        ERR_RESTRICTED => {
            emit_session(shared, content).await;
            return ControlFlow::Break(());
        }

        _ => debug!("unknown reply -> {raw}"),
    }

    ControlFlow::Continue(())
}

/// Some servers echo our nickname at the head of informational numerics;
/// strip that echo and a following ` :` before surfacing the text.
fn strip_nick_echo(shared: &NetworkShared, content: &str) -> String {
    let nickname = shared.nickname.lock().unwrap();
    let content = match content.strip_prefix(nickname.as_str()) {
        Some(rest) if !nickname.is_empty() => rest,
        _ => content,
    };
    content.strip_prefix(" :").unwrap_or(content).to_owned()
}
