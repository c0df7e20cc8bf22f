use crate::config::{ServerConfig, WorldConfig};
use crate::connection::Connection;
use crate::player::{SharedPlayer, Spore};
use crate::protocol::{spore_msg, Packet};
use crate::registry::Registry;
use crate::spawn::{spawn_coords, spore_radius};
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

/// Everything that lives in the world.
#[derive(Default)]
pub struct SharedGameObjects {
    /// Keyed by the owning connection's id
    pub players: Registry<SharedPlayer>,
    pub spores: Registry<Spore>,
}

/// A new connection waiting for its id.
pub struct Registration {
    pub connection: Arc<Connection>,
    pub response: oneshot::Sender<u64>,
}

/// Receiving ends of the hub's intake queues, consumed by [`run_hub`].
pub struct HubReceivers {
    pub(crate) register_rx: mpsc::UnboundedReceiver<Registration>,
    pub(crate) unregister_rx: mpsc::UnboundedReceiver<u64>,
    pub(crate) broadcast_rx: mpsc::UnboundedReceiver<Packet>,
}

/// Owns the set of connected clients and fans broadcasts out to them.
///
/// Only the hub loop adds or removes clients. Anyone may look clients up.
pub struct Hub {
    pub(crate) clients: Registry<Arc<Connection>>,
    objects: SharedGameObjects,
    store: Arc<dyn Store>,
    config: ServerConfig,
    register_tx: mpsc::UnboundedSender<Registration>,
    unregister_tx: mpsc::UnboundedSender<u64>,
    broadcast_tx: mpsc::UnboundedSender<Packet>,
}

impl Hub {
    pub fn new(config: ServerConfig, store: Arc<dyn Store>) -> (Arc<Self>, HubReceivers) {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::unbounded_channel();

        let hub = Arc::new(Self {
            clients: Registry::new(),
            objects: SharedGameObjects::default(),
            store,
            config,
            register_tx,
            unregister_tx,
            broadcast_tx,
        });
        let receivers = HubReceivers {
            register_rx,
            unregister_rx,
            broadcast_rx,
        };
        (hub, receivers)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn world(&self) -> &WorldConfig {
        &self.config.world
    }

    pub fn objects(&self) -> &SharedGameObjects {
        &self.objects
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn client(&self, id: u64) -> Option<Arc<Connection>> {
        self.clients.get(id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Queue the connection for registration and wait for its id. `None` if
    /// the hub loop is gone.
    pub async fn register(&self, connection: Arc<Connection>) -> Option<u64> {
        let (response, response_rx) = oneshot::channel();
        self.register_tx
            .send(Registration {
                connection,
                response,
            })
            .ok()?;
        response_rx.await.ok()
    }

    pub fn unregister(&self, id: u64) {
        if self.unregister_tx.send(id).is_err() {
            tracing::debug!("Hub is gone, cannot unregister client {}", id);
        }
    }

    /// Deliver to every registered connection except `packet.sender_id`.
    pub fn broadcast(&self, packet: Packet) {
        if let Err(e) = self.broadcast_tx.send(packet) {
            tracing::warn!("Hub is gone, dropping {} broadcast", e.0.msg.kind());
        }
    }

    /// A randomly sized spore at a free spot, not yet in the world.
    fn new_spore(&self) -> Spore {
        let mut rng = rand::thread_rng();
        let radius = spore_radius(&mut rng);
        let (x, y) = spawn_coords(
            &mut rng,
            radius,
            &[&self.objects.players, &self.objects.spores],
            self.world(),
        );
        Spore { x, y, radius }
    }

    /// Add one spore and announce it to everyone.
    fn spawn_spore(&self) -> u64 {
        let spore = self.new_spore();
        let id = self.objects.spores.add(spore);
        self.broadcast(Packet {
            sender_id: 0,
            msg: spore_msg(id, &spore),
        });
        id
    }

    /// Fill the world up to `max_spores`.
    fn seed_spores(&self) {
        let max = self.world().max_spores;
        while self.objects.spores.len() < max {
            let spore = self.new_spore();
            self.objects.spores.add(spore);
        }
        tracing::info!("Placed {} spores", self.objects.spores.len());
    }
}

/// Run the hub. Seeds the world, starts spore replenishment and then
/// serves the intake queues until they all close.
pub async fn run_hub(hub: Arc<Hub>, mut receivers: HubReceivers) {
    hub.seed_spores();
    let replenisher = tokio::spawn(replenish_spores(hub.clone()));
    tracing::info!("Awaiting client registrations");

    loop {
        tokio::select! {
            Some(Registration { connection, response }) = receivers.register_rx.recv() => {
                let id = hub.clients.add(connection.clone());
                connection.initialize(id);
                if response.send(id).is_err() {
                    tracing::debug!("Client {} went away before learning its id", id);
                }
            }

            Some(id) = receivers.unregister_rx.recv() => {
                if hub.clients.remove(id).is_some() {
                    tracing::info!("Client {} unregistered", id);
                }
            }

            Some(packet) = receivers.broadcast_rx.recv() => {
                hub.clients.for_each(|id, client| {
                    if id != packet.sender_id {
                        client.deliver(packet.sender_id, packet.msg.clone());
                    }
                });
            }

            else => break,
        }
    }

    replenisher.abort();
    tracing::info!("Hub loop ended");
}

/// Top the spore population back up, a bounded batch per period.
async fn replenish_spores(hub: Arc<Hub>) {
    let world = *hub.world();
    let period = Duration::from_secs_f64(world.replenish_interval);
    let pause = Duration::from_secs_f64(world.replenish_pause);

    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let remaining = hub.objects.spores.len();
        let missing = world.max_spores.saturating_sub(remaining);
        if missing == 0 {
            continue;
        }
        let batch = missing.min(world.replenish_batch);
        tracing::info!(
            "{} spores remain - going to replenish {} of {} missing",
            remaining,
            batch,
            missing
        );

        for _ in 0..batch {
            hub.spawn_spore();
            tokio::time::sleep(pause).await;
        }
    }
}
