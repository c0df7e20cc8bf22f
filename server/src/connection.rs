//! One connected client: its inbox, its outbound queue and its current state.

use crate::config::WorldConfig;
use crate::hub::{Hub, SharedGameObjects};
use crate::protocol::{Msg, Packet};
use crate::states::{AuthOutcome, ClientState, Connected};
use crate::store::Store;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Work for a connection's state, handled in order by its inbox task.
pub enum Inbound {
    /// A message from `sender_id`, read off its socket or relayed
    Packet(Packet),
    /// Result of a credential check that ran on the blocking pool
    Auth(AuthOutcome),
}

pub struct Connection {
    id: AtomicU64,
    hub: Arc<Hub>,
    store: Arc<dyn Store>,
    outbound: mpsc::Sender<Packet>,
    inbox: mpsc::UnboundedSender<Inbound>,
    /// Taken by the inbox task once the connection is registered
    inbox_rx: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
    state: Mutex<Option<ClientState>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl Connection {
    /// New, not yet registered connection and the receiving end of its
    /// outbound queue.
    pub fn new(hub: Arc<Hub>) -> (Arc<Self>, mpsc::Receiver<Packet>) {
        let (outbound, outbound_rx) = mpsc::channel(hub.config().send_queue_capacity);
        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Self {
            id: AtomicU64::new(0),
            store: hub.store(),
            hub,
            outbound,
            inbox,
            inbox_rx: Mutex::new(Some(inbox_rx)),
            state: Mutex::new(None),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });
        (connection, outbound_rx)
    }

    /// 0 until the hub has registered the connection.
    pub fn id(&self) -> u64 {
        self.id.load(Ordering::Acquire)
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn world(&self) -> &WorldConfig {
        &self.hub.config().world
    }

    pub fn objects(&self) -> &SharedGameObjects {
        self.hub.objects()
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// Name of the active state, "None" when there is none.
    pub fn state_name(&self) -> &'static str {
        self.state
            .lock()
            .as_ref()
            .map(ClientState::name)
            .unwrap_or("None")
    }

    /// Fires once the connection starts closing.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Called by the hub once an id has been assigned. Enters `Connected` and
    /// starts working through the inbox.
    pub(crate) fn initialize(self: &Arc<Self>, id: u64) {
        self.id.store(id, Ordering::Release);
        self.set_state(Some(ClientState::Connected(Connected::default())));
        if let Some(inbox) = self.inbox_rx.lock().take() {
            tokio::spawn(run_inbox(self.clone(), inbox));
        }
    }

    /// Queue a message for this connection's state, as sent by `sender_id`.
    /// Never waits on the state, so the hub can fan out to everyone without
    /// being held up by any one client.
    pub fn deliver(&self, sender_id: u64, msg: Msg) {
        self.post(Inbound::Packet(Packet { sender_id, msg }));
    }

    pub(crate) fn post(&self, item: Inbound) {
        if self.inbox.send(item).is_err() {
            tracing::debug!("Client {}: inbox closed, dropping work", self.id());
        }
    }

    /// Run a message through the active state.
    ///
    /// Transitions the handler asks for are applied before returning. State
    /// handlers must not call back into `set_state` or `close` on their own
    /// connection.
    pub fn process_message(self: &Arc<Self>, sender_id: u64, msg: Msg) {
        let mut slot = self.state.lock();
        let Some(state) = slot.as_mut() else {
            tracing::debug!(
                "Client {}: no active state, dropping {} from {}",
                self.id(),
                msg.kind(),
                sender_id
            );
            return;
        };
        if let Some(next) = state.handle_message(self, sender_id, msg) {
            self.swap_state(&mut slot, Some(next));
        }
    }

    /// Hand a finished credential check to the active state.
    pub(crate) fn process_auth(self: &Arc<Self>, outcome: AuthOutcome) {
        let mut slot = self.state.lock();
        let Some(state) = slot.as_mut() else {
            tracing::debug!("Client {}: no active state, dropping credential result", self.id());
            return;
        };
        if let Some(next) = state.handle_auth(self, outcome) {
            self.swap_state(&mut slot, Some(next));
        }
    }

    /// Exit the current state, then enter `next`. `None` leaves the
    /// connection without a state, which is how teardown ends.
    pub fn set_state(self: &Arc<Self>, next: Option<ClientState>) {
        let mut slot = self.state.lock();
        self.swap_state(&mut slot, next);
    }

    fn swap_state(self: &Arc<Self>, slot: &mut Option<ClientState>, next: Option<ClientState>) {
        let prev_name = slot.as_ref().map(ClientState::name).unwrap_or("None");
        if let Some(mut prev) = slot.take() {
            prev.on_exit(self);
        }

        let next_name = next.as_ref().map(ClientState::name).unwrap_or("None");
        tracing::info!(
            "Client {}: switching from state {} to {}",
            self.id(),
            prev_name,
            next_name
        );

        *slot = next;
        if let Some(state) = slot.as_mut() {
            state.on_enter(self);
        }
    }

    /// Queue a message for this client, attributed to itself.
    pub fn send(&self, msg: Msg) {
        self.send_as(msg, self.id());
    }

    /// Queue a message for this client, attributed to `sender_id`. Drops the
    /// message when the queue is full.
    pub fn send_as(&self, msg: Msg, sender_id: u64) {
        match self.outbound.try_send(Packet { sender_id, msg }) {
            Ok(()) => {}
            Err(TrySendError::Full(packet)) => {
                tracing::warn!(
                    "Client {}: send queue full, dropping {} message",
                    self.id(),
                    packet.msg.kind()
                );
            }
            Err(TrySendError::Closed(packet)) => {
                tracing::debug!(
                    "Client {}: send queue closed, dropping {} message",
                    self.id(),
                    packet.msg.kind()
                );
            }
        }
    }

    /// Hand the message to a peer's state, as if the peer had received it
    /// from this connection.
    pub fn forward_to_peer(&self, msg: Msg, peer_id: u64) {
        if peer_id == self.id() {
            tracing::warn!("Client {}: refusing to forward {} to itself", peer_id, msg.kind());
            return;
        }
        match self.hub.client(peer_id) {
            Some(peer) => peer.deliver(self.id(), msg),
            None => tracing::debug!(
                "Client {}: peer {} is gone, dropping {}",
                self.id(),
                peer_id,
                msg.kind()
            ),
        }
    }

    /// Deliver to every other registered connection through the hub.
    pub fn broadcast(&self, msg: Msg) {
        self.hub.broadcast(Packet {
            sender_id: self.id(),
            msg,
        });
    }

    /// Tear the connection down. Safe to call any number of times from any
    /// task; only the first call does anything.
    pub fn close(self: &Arc<Self>, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Client {}: closing connection because: {}", self.id(), reason);

        self.set_state(None);
        self.hub.unregister(self.id());
        self.shutdown.cancel();
    }
}

/// Work through the inbox one item at a time until the connection closes.
async fn run_inbox(conn: Arc<Connection>, mut inbox: mpsc::UnboundedReceiver<Inbound>) {
    let shutdown = conn.shutdown_token();

    loop {
        let item = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            item = inbox.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        match item {
            Inbound::Packet(packet) => conn.process_message(packet.sender_id, packet.msg),
            Inbound::Auth(outcome) => conn.process_auth(outcome),
        }
    }
    tracing::debug!("Client {}: inbox stopped", conn.id());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::Player;
    use crate::protocol::ChatMsg;
    use crate::states::InGame;
    use crate::testing::{connect, drain, test_config, test_hub, test_hub_with};
    use std::time::Duration;
    use tokio::time::timeout;

    fn chat(text: &str) -> Msg {
        Msg::Chat(ChatMsg {
            msg: text.to_string(),
        })
    }

    fn enter_game(conn: &Arc<Connection>, name: &str) {
        conn.set_state(Some(ClientState::InGame(InGame::new(Player {
            name: name.to_string(),
            ..Default::default()
        }))));
    }

    #[tokio::test]
    async fn initialize_enters_connected_and_sends_id() {
        let (hub, _rx) = test_hub();
        let (conn, mut outbound) = connect(&hub);

        assert_eq!(conn.state_name(), "Connected");
        let packets = drain(&mut outbound);
        assert_eq!(packets.len(), 1);
        match &packets[0].msg {
            Msg::Id(id) => assert_eq!(id.id, conn.id()),
            other => panic!("Expected Id, got {:?}", other),
        }
        assert_eq!(packets[0].sender_id, conn.id());
    }

    #[tokio::test]
    async fn full_queue_drops_newest() {
        let mut config = test_config();
        config.send_queue_capacity = 2;
        let (hub, _rx) = test_hub_with(config);
        let (conn, mut outbound) = Connection::new(hub);

        conn.send(chat("one"));
        conn.send(chat("two"));
        conn.send(chat("three"));

        let texts: Vec<String> = drain(&mut outbound)
            .into_iter()
            .map(|p| match p.msg {
                Msg::Chat(c) => c.msg,
                other => panic!("Expected Chat, got {:?}", other),
            })
            .collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn send_as_keeps_origin() {
        let (hub, _rx) = test_hub();
        let (conn, mut outbound) = connect(&hub);
        drain(&mut outbound);

        conn.send_as(chat("relayed"), 77);
        let packets = drain(&mut outbound);
        assert_eq!(packets[0].sender_id, 77);
    }

    #[tokio::test]
    async fn message_before_initialize_is_dropped() {
        let (hub, _rx) = test_hub();
        let (conn, mut outbound) = Connection::new(hub);
        conn.process_message(0, Msg::HiscoreBoardRequest);
        assert_eq!(conn.state_name(), "None");
        assert!(drain(&mut outbound).is_empty());
    }

    #[tokio::test]
    async fn forward_runs_peer_handler_with_our_id() {
        let (hub, _rx) = test_hub();
        let (a, mut a_out) = connect(&hub);
        let (b, mut b_out) = connect(&hub);
        enter_game(&a, "a");
        enter_game(&b, "b");
        drain(&mut a_out);
        drain(&mut b_out);

        a.forward_to_peer(chat("psst"), b.id());

        let packet = timeout(Duration::from_secs(2), b_out.recv())
            .await
            .expect("forwarded message never arrived")
            .unwrap();
        assert_eq!(packet.sender_id, a.id());
        assert!(matches!(&packet.msg, Msg::Chat(c) if c.msg == "psst"));
        assert!(drain(&mut b_out).is_empty());
        assert!(drain(&mut a_out).is_empty());
    }

    #[tokio::test]
    async fn delivered_messages_are_handled_in_order() {
        let (hub, _rx) = test_hub();
        let (a, mut a_out) = connect(&hub);
        enter_game(&a, "a");
        drain(&mut a_out);

        for text in ["one", "two", "three"] {
            a.deliver(99, chat(text));
        }

        let mut texts = Vec::new();
        while texts.len() < 3 {
            let packet = timeout(Duration::from_secs(2), a_out.recv())
                .await
                .expect("delivered message never arrived")
                .unwrap();
            if let Msg::Chat(c) = packet.msg {
                assert_eq!(packet.sender_id, 99);
                texts.push(c.msg);
            }
        }
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn forward_to_self_or_missing_peer_is_dropped() {
        let (hub, _rx) = test_hub();
        let (a, mut a_out) = connect(&hub);
        enter_game(&a, "a");
        drain(&mut a_out);

        a.forward_to_peer(chat("echo"), a.id());
        a.forward_to_peer(chat("void"), 9999);
        assert!(drain(&mut a_out).is_empty());
    }

    #[tokio::test]
    async fn broadcast_goes_to_hub_with_own_id() {
        let (hub, mut rx) = test_hub();
        let (a, _a_out) = connect(&hub);
        a.broadcast(chat("hello all"));

        let packet = rx.broadcast_rx.try_recv().unwrap();
        assert_eq!(packet.sender_id, a.id());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (hub, mut rx) = test_hub();
        let (conn, _outbound) = connect(&hub);
        enter_game(&conn, "quitter");
        assert!(hub.objects().players.contains(conn.id()));

        conn.close("test");
        conn.close("again");

        assert!(conn.is_closed());
        assert!(conn.shutdown_token().is_cancelled());
        assert_eq!(conn.state_name(), "None");
        assert!(!hub.objects().players.contains(conn.id()));

        assert_eq!(rx.unregister_rx.try_recv().unwrap(), conn.id());
        assert!(rx.unregister_rx.try_recv().is_err());
    }
}
