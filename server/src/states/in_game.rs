use super::ClientState;
use crate::connection::Connection;
use crate::physics::{self, Rejection};
use crate::player::{Circle, Player, SharedPlayer};
use crate::protocol::{disconnect, player_msg, spores_batch, Msg};
use crate::spawn::spawn_coords;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Playing: owns a live player and the tasks that drive it.
pub struct InGame {
    player: SharedPlayer,
    /// Cancelled on exit, stops every task this stay started
    tasks: CancellationToken,
    update_loop_started: bool,
}

impl InGame {
    pub fn new(player: Player) -> Self {
        Self {
            player: Arc::new(Mutex::new(player)),
            tasks: CancellationToken::new(),
            update_loop_started: false,
        }
    }

    pub(super) fn on_enter(&mut self, conn: &Arc<Connection>) {
        let world = conn.world();
        let objects = conn.objects();

        let radius = world.player_start_radius;
        let (x, y) = spawn_coords(&mut rand::thread_rng(), radius, &[&objects.players], world);
        let state = {
            let mut player = self.player.lock();
            player.x = x;
            player.y = y;
            player.radius = radius;
            player.speed = world.player_speed;
            player_msg(conn.id(), &player)
        };

        tracing::info!(
            "Client {} [InGame]: spawned at ({:.1}, {:.1})",
            conn.id(),
            x,
            y
        );
        objects.players.add_with_id(self.player.clone(), conn.id());

        // Own state first, then everyone already in the world
        conn.send(state.clone());
        for (id, other) in objects.players.snapshot() {
            if id != conn.id() {
                let msg = player_msg(id, &other.lock());
                conn.send_as(msg, id);
            }
        }
        conn.broadcast(state);

        tokio::spawn(stream_spores(conn.clone(), self.tasks.child_token()));
    }

    pub(super) fn on_exit(&mut self, conn: &Arc<Connection>) {
        let player = {
            let player = self.player.lock();
            self.tasks.cancel();
            player.clone()
        };

        let objects = conn.objects();
        objects
            .players
            .remove_if(conn.id(), |p| Arc::ptr_eq(p, &self.player));

        let score = physics::score(player.radius);
        if score > player.best_score {
            let store = conn.hub().store();
            let id = conn.id();
            // The store may write to disk
            tokio::task::spawn_blocking(move || {
                match store.update_player_best_score(player.db_id, score) {
                    Ok(()) => tracing::info!(
                        "Client {} [InGame]: new best score {} for {}",
                        id,
                        score,
                        player.name
                    ),
                    Err(e) => tracing::error!("Error saving best score of {}: {}", player.name, e),
                }
            });
        }

        conn.broadcast(disconnect("left the game"));
    }

    pub(super) fn handle_message(
        &mut self,
        conn: &Arc<Connection>,
        sender_id: u64,
        msg: Msg,
    ) -> Option<ClientState> {
        let own = sender_id == conn.id();

        match msg {
            Msg::PlayerDirection(d) if own => self.set_direction(conn, d.direction),
            Msg::Chat(chat) if own => conn.broadcast(Msg::Chat(chat)),
            Msg::SporeConsumed(claim) if own => match self.consume_spore(conn, claim.spore_id) {
                Ok(()) => conn.broadcast(Msg::SporeConsumed(claim)),
                Err(e) => tracing::warn!(
                    "Client {} [InGame]: rejected spore claim: {}",
                    conn.id(),
                    e
                ),
            },
            Msg::PlayerConsumed(claim) if own => {
                match self.consume_player(conn, claim.player_id) {
                    Ok(()) => conn.broadcast(Msg::PlayerConsumed(claim)),
                    Err(e) => tracing::warn!(
                        "Client {} [InGame]: rejected player claim: {}",
                        conn.id(),
                        e
                    ),
                }
            }
            Msg::PlayerConsumed(claim) => {
                let eaten = claim.player_id == conn.id();
                conn.send_as(Msg::PlayerConsumed(claim), sender_id);
                if eaten {
                    tracing::info!(
                        "Client {} [InGame]: consumed by {}, respawning",
                        conn.id(),
                        sender_id
                    );
                    return Some(self.respawn());
                }
            }
            Msg::Player(_) | Msg::Spore(_) | Msg::Disconnect(_) if own => {
                tracing::debug!("Client {} [InGame]: ignoring own {}", conn.id(), msg.kind());
            }
            msg @ (Msg::Player(_)
            | Msg::Chat(_)
            | Msg::Spore(_)
            | Msg::SporeConsumed(_)
            | Msg::Disconnect(_)) => conn.send_as(msg, sender_id),
            Msg::PlayerDirection(_)
            | Msg::Id(_)
            | Msg::OkResponse
            | Msg::DenyResponse(_)
            | Msg::LoginRequest(_)
            | Msg::RegisterRequest(_)
            | Msg::SporesBatch(_)
            | Msg::HiscoreBoardRequest
            | Msg::HiscoreBoard(_)
            | Msg::FinishedBrowsingHiscores
            | Msg::SearchHiscore(_) => {
                tracing::debug!(
                    "Client {} [InGame]: ignoring {} from client {}",
                    conn.id(),
                    msg.kind(),
                    sender_id
                );
            }
        }
        None
    }

    fn set_direction(&mut self, conn: &Arc<Connection>, direction: f64) {
        if !direction.is_finite() {
            tracing::warn!("Client {} [InGame]: invalid direction {}", conn.id(), direction);
            return;
        }
        self.player.lock().direction = direction;

        if !self.update_loop_started {
            self.update_loop_started = true;
            tokio::spawn(update_loop(
                conn.clone(),
                self.player.clone(),
                self.tasks.child_token(),
            ));
        }
    }

    /// Validate and apply a claim that this player ate a spore.
    fn consume_spore(&self, conn: &Connection, spore_id: u64) -> Result<(), Rejection> {
        let spores = &conn.objects().spores;
        let spore = spores
            .get(spore_id)
            .ok_or(Rejection::SporeNotFound(spore_id))?;

        physics::check_within_reach(
            &self.player.lock(),
            spore.circle(),
            conn.world().consume_buffer,
        )?;

        // Whoever removes it first gets it
        spores
            .remove(spore_id)
            .ok_or(Rejection::SporeNotFound(spore_id))?;

        let mut player = self.player.lock();
        player.radius = physics::grown_radius(player.radius, spore.radius);
        Ok(())
    }

    /// Validate and apply a claim that this player ate another one.
    fn consume_player(&self, conn: &Connection, other_id: u64) -> Result<(), Rejection> {
        if other_id == conn.id() {
            return Err(Rejection::SelfConsumption);
        }

        let players = &conn.objects().players;
        let other = players
            .get(other_id)
            .ok_or(Rejection::PlayerNotFound(other_id))?;
        // Never hold both players' locks at once
        let target = other.circle();

        {
            let player = self.player.lock();
            let world = conn.world();
            physics::check_within_reach(&player, target, world.consume_buffer)?;
            physics::check_big_enough(player.radius, target.2, world.min_size_ratio)?;
        }

        players
            .remove_if(other_id, |p| Arc::ptr_eq(p, &other))
            .ok_or(Rejection::PlayerNotFound(other_id))?;

        let mut player = self.player.lock();
        player.radius = physics::grown_radius(player.radius, target.2);
        Ok(())
    }

    /// Fresh life for the same account. The size reached in this life
    /// counts towards the best score.
    fn respawn(&self) -> ClientState {
        let player = self.player.lock();
        let mut fresh = player.reset();
        fresh.best_score = fresh.best_score.max(physics::score(player.radius));
        ClientState::InGame(InGame::new(fresh))
    }
}

/// Send the current spores in batches, pausing between them.
async fn stream_spores(conn: Arc<Connection>, cancel: CancellationToken) {
    let world = *conn.world();
    let pause = Duration::from_secs_f64(world.spore_batch_pause);
    let spores = conn.objects().spores.snapshot();

    for (i, batch) in spores.chunks(world.spore_batch_size).enumerate() {
        if i > 0 {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        if cancel.is_cancelled() {
            return;
        }
        conn.send(spores_batch(batch));
    }
    tracing::debug!("Client {} [InGame]: sent {} spores", conn.id(), spores.len());
}

/// Move the player every tick and tell everyone, including the player.
async fn update_loop(conn: Arc<Connection>, player: SharedPlayer, cancel: CancellationToken) {
    let dt = conn.world().tick_interval;
    let period = Duration::from_secs_f64(dt);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let update = {
                    let mut player = player.lock();
                    // Exit cancels under this lock
                    if cancel.is_cancelled() {
                        break;
                    }
                    physics::integrate(&mut player, dt);
                    player_msg(conn.id(), &player)
                };
                conn.broadcast(update.clone());
                conn.send(update);
            }
        }
    }
    tracing::debug!("Client {} [InGame]: update loop stopped", conn.id());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, HubReceivers};
    use crate::player::Spore;
    use crate::protocol::{
        spore_msg, ChatMsg, Packet, PlayerConsumedMsg, PlayerDirectionMsg, SporeConsumedMsg,
    };
    use crate::testing::{connect, drain, test_hub};
    use std::sync::Barrier;
    use tokio::sync::mpsc;

    struct Client {
        conn: Arc<Connection>,
        rx: mpsc::Receiver<Packet>,
    }

    impl Client {
        fn join(hub: &Arc<Hub>, name: &str) -> Self {
            let (conn, mut rx) = connect(hub);
            conn.set_state(Some(ClientState::InGame(InGame::new(Player {
                name: name.to_string(),
                ..Default::default()
            }))));
            drain(&mut rx);
            Self { conn, rx }
        }

        fn id(&self) -> u64 {
            self.conn.id()
        }

        fn player(&self) -> SharedPlayer {
            self.conn.objects().players.get(self.id()).unwrap()
        }

        fn place(&self, x: f64, y: f64, radius: f64) {
            let player = self.player();
            let mut player = player.lock();
            player.x = x;
            player.y = y;
            player.radius = radius;
        }

        fn radius(&self) -> f64 {
            Circle::radius(&self.player())
        }

        fn says(&self, msg: Msg) {
            self.conn.process_message(self.id(), msg);
        }

        fn received(&mut self) -> Vec<Packet> {
            drain(&mut self.rx)
        }
    }

    fn broadcasts(rx: &mut HubReceivers) -> Vec<Packet> {
        let mut out = Vec::new();
        while let Ok(packet) = rx.broadcast_rx.try_recv() {
            out.push(packet);
        }
        out
    }

    fn eat_spore(id: u64) -> Msg {
        Msg::SporeConsumed(SporeConsumedMsg { spore_id: id })
    }

    fn eat_player(id: u64) -> Msg {
        Msg::PlayerConsumed(PlayerConsumedMsg { player_id: id })
    }

    #[tokio::test]
    async fn entering_spawns_and_reports_the_player() {
        let (hub, mut hub_rx) = test_hub();
        let (conn, mut rx) = connect(&hub);
        drain(&mut rx);
        conn.set_state(Some(ClientState::InGame(InGame::new(Player {
            name: "zed".to_string(),
            ..Default::default()
        }))));

        let player = hub.objects().players.get(conn.id()).unwrap();
        assert_eq!(player.lock().radius, 20.0);
        assert_eq!(player.lock().speed, 150.0);

        let sent = drain(&mut rx);
        assert!(matches!(&sent[0].msg, Msg::Player(p) if p.id == conn.id() && p.name == "zed"));
        assert!(broadcasts(&mut hub_rx)
            .iter()
            .any(|p| matches!(p.msg, Msg::Player(_)) && p.sender_id == conn.id()));
    }

    #[tokio::test]
    async fn entering_streams_spores_in_batches() {
        let (hub, _hub_rx) = test_hub();
        for i in 0..45 {
            hub.objects().spores.add(Spore {
                x: 10_000.0 + i as f64 * 50.0,
                y: 0.0,
                radius: 10.0,
            });
        }
        let (conn, mut rx) = connect(&hub);
        drain(&mut rx);
        conn.set_state(Some(ClientState::InGame(InGame::new(Player::default()))));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let sizes: Vec<usize> = drain(&mut rx)
            .into_iter()
            .filter_map(|p| match p.msg {
                Msg::SporesBatch(b) => Some(b.spores.len()),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![20, 20, 5]);
    }

    #[tokio::test]
    async fn spore_in_reach_is_eaten_once() {
        let (hub, mut hub_rx) = test_hub();
        let a = Client::join(&hub, "a");
        let b = Client::join(&hub, "b");
        a.place(0.0, 0.0, 20.0);
        b.place(60.0, 0.0, 20.0);
        let spore = hub.objects().spores.add(Spore {
            x: 30.0,
            y: 0.0,
            radius: 10.0,
        });
        broadcasts(&mut hub_rx);

        a.says(eat_spore(spore));
        b.says(eat_spore(spore));

        assert!(!hub.objects().spores.contains(spore));
        assert!((a.radius() - 500f64.sqrt()).abs() < 1e-9);
        assert_eq!(b.radius(), 20.0);

        let claims: Vec<Packet> = broadcasts(&mut hub_rx)
            .into_iter()
            .filter(|p| matches!(p.msg, Msg::SporeConsumed(_)))
            .collect();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].sender_id, a.id());
    }

    #[tokio::test]
    async fn simultaneous_spore_claims_have_one_winner() {
        let (hub, mut hub_rx) = test_hub();
        let a = Client::join(&hub, "a");
        let b = Client::join(&hub, "b");

        for _ in 0..50 {
            a.place(0.0, 0.0, 20.0);
            b.place(60.0, 0.0, 20.0);
            let spore = hub.objects().spores.add(Spore {
                x: 30.0,
                y: 0.0,
                radius: 10.0,
            });
            broadcasts(&mut hub_rx);

            let start = Barrier::new(2);
            std::thread::scope(|s| {
                for conn in [a.conn.clone(), b.conn.clone()] {
                    let start = &start;
                    s.spawn(move || {
                        start.wait();
                        conn.process_message(conn.id(), eat_spore(spore));
                    });
                }
            });

            assert!(!hub.objects().spores.contains(spore));
            let grown = [a.radius(), b.radius()]
                .into_iter()
                .filter(|r| *r > 20.0)
                .count();
            assert_eq!(grown, 1);
            let claims = broadcasts(&mut hub_rx)
                .into_iter()
                .filter(|p| matches!(p.msg, Msg::SporeConsumed(_)))
                .count();
            assert_eq!(claims, 1);
        }
    }

    #[tokio::test]
    async fn spore_out_of_reach_is_rejected() {
        let (hub, mut hub_rx) = test_hub();
        let a = Client::join(&hub, "a");
        a.place(0.0, 0.0, 20.0);
        let spore = hub.objects().spores.add(Spore {
            x: 100.0,
            y: 0.0,
            radius: 10.0,
        });
        broadcasts(&mut hub_rx);

        a.says(eat_spore(spore));
        a.says(eat_spore(9999));

        assert!(hub.objects().spores.contains(spore));
        assert_eq!(a.radius(), 20.0);
        assert!(broadcasts(&mut hub_rx).is_empty());
    }

    #[tokio::test]
    async fn eating_a_player_needs_the_size_ratio() {
        let (hub, mut hub_rx) = test_hub();
        let a = Client::join(&hub, "a");
        let b = Client::join(&hub, "b");
        a.place(0.0, 0.0, 20.0);
        b.place(25.0, 0.0, 14.0);
        broadcasts(&mut hub_rx);

        a.says(eat_player(b.id()));
        assert!(hub.objects().players.contains(b.id()));
        assert_eq!(a.radius(), 20.0);
        assert!(broadcasts(&mut hub_rx).is_empty());

        b.place(25.0, 0.0, 10.0);
        a.says(eat_player(b.id()));
        assert!(!hub.objects().players.contains(b.id()));
        assert!((a.radius() - 500f64.sqrt()).abs() < 1e-9);
        assert!(broadcasts(&mut hub_rx)
            .iter()
            .any(|p| matches!(&p.msg, Msg::PlayerConsumed(c) if c.player_id == b.id())));
    }

    #[tokio::test]
    async fn eating_yourself_or_a_stranger_is_rejected() {
        let (hub, mut hub_rx) = test_hub();
        let a = Client::join(&hub, "a");
        broadcasts(&mut hub_rx);

        a.says(eat_player(a.id()));
        a.says(eat_player(424242));
        assert!(hub.objects().players.contains(a.id()));
        assert!(broadcasts(&mut hub_rx).is_empty());
    }

    #[tokio::test]
    async fn victim_respawns_with_its_account() {
        let (hub, _hub_rx) = test_hub();
        let a = Client::join(&hub, "a");
        let mut b = Client::join(&hub, "b");
        {
            let player = b.player();
            let mut player = player.lock();
            player.best_score = 10;
            player.db_id = 3;
        }
        b.place(0.0, 0.0, 30.0);
        let before = b.player();

        // Relayed by the hub after a's claim was accepted
        hub.objects().players.remove(b.id());
        b.conn.process_message(a.id(), eat_player(b.id()));

        let received = b.received();
        assert!(matches!(&received[0].msg, Msg::PlayerConsumed(c) if c.player_id == b.id()));
        assert_eq!(received[0].sender_id, a.id());

        assert_eq!(b.conn.state_name(), "InGame");
        let after = b.player();
        assert!(!Arc::ptr_eq(&before, &after));
        let after = after.lock();
        assert_eq!(after.name, "b");
        assert_eq!(after.db_id, 3);
        assert_eq!(after.radius, 20.0);
        assert_eq!(after.best_score, physics::score(30.0));
    }

    #[tokio::test]
    async fn relayed_messages_keep_their_origin() {
        let (hub, _hub_rx) = test_hub();
        let mut a = Client::join(&hub, "a");
        let b = Client::join(&hub, "b");

        let chat = Msg::Chat(ChatMsg {
            msg: "yo".to_string(),
        });
        a.conn.process_message(b.id(), chat);
        let spore = Spore {
            x: 1.0,
            y: 2.0,
            radius: 9.0,
        };
        a.conn.process_message(0, spore_msg(7, &spore));

        let received = a.received();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].sender_id, b.id());
        assert_eq!(received[1].sender_id, 0);
    }

    #[tokio::test]
    async fn own_chat_is_broadcast_not_echoed() {
        let (hub, mut hub_rx) = test_hub();
        let mut a = Client::join(&hub, "a");
        broadcasts(&mut hub_rx);

        a.says(Msg::Chat(ChatMsg {
            msg: "hello".to_string(),
        }));
        assert!(a.received().is_empty());
        let sent = broadcasts(&mut hub_rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].sender_id, a.id());
    }

    #[tokio::test]
    async fn direction_starts_movement() {
        let (hub, _hub_rx) = test_hub();
        let mut a = Client::join(&hub, "a");
        a.place(0.0, 0.0, 20.0);

        a.says(Msg::PlayerDirection(PlayerDirectionMsg { direction: 0.0 }));
        tokio::time::sleep(Duration::from_millis(180)).await;

        let xs: Vec<f64> = a
            .received()
            .into_iter()
            .filter_map(|p| match p.msg {
                Msg::Player(p) => Some(p.x),
                _ => None,
            })
            .collect();
        assert!(!xs.is_empty());
        assert!(xs.windows(2).all(|w| w[1] > w[0]));
        assert!((xs[0] - 7.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn leaving_cleans_up_and_saves_score() {
        let (hub, mut hub_rx) = test_hub();
        let store = hub.store();
        let user = store.create_user("fay", "hash").unwrap();
        let record = store.create_player(user.id, "Fay", 0).unwrap();

        let (conn, mut rx) = connect(&hub);
        conn.set_state(Some(ClientState::InGame(InGame::new(Player {
            name: "Fay".to_string(),
            db_id: record.id,
            ..Default::default()
        }))));
        conn.process_message(
            conn.id(),
            Msg::PlayerDirection(PlayerDirectionMsg { direction: 1.0 }),
        );
        broadcasts(&mut hub_rx);

        conn.set_state(None);
        assert!(!hub.objects().players.contains(conn.id()));
        let saved = async {
            while store.get_player_by_user_id(user.id).unwrap().best_score != physics::score(20.0)
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(2), saved)
            .await
            .expect("best score was never saved");
        assert!(broadcasts(&mut hub_rx)
            .iter()
            .any(|p| matches!(p.msg, Msg::Disconnect(_))));

        // The update loop is gone
        drain(&mut rx);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(drain(&mut rx).is_empty());
    }
}
