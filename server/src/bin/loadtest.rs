//! Load test for the spore server.
//!
//! Spawns multiple bot clients that:
//! - Connect, register (or reuse) an account and log in
//! - Periodically change direction
//! - Receive and count player updates and spores
//!
//! Usage: cargo run --bin loadtest -- [OPTIONS]
//!
//! Options:
//!   --clients N         Number of clients to spawn (default: 50)
//!   --duration S        Test duration in seconds (default: 30)
//!   --turn-rate R       Direction changes per second per client (default: 1.0)
//!   --url URL           Server URL (default: ws://127.0.0.1:8080/ws)
//!   --name-prefix P     Bot account name prefix (default: bot)

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use spore_shared::protocol::{
    LoginRequestMsg, Msg, Packet, PlayerDirectionMsg, RegisterRequestMsg, PROTOCOL_VERSION,
};
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Parser, Debug, Clone)]
#[command(name = "loadtest", about = "Spore server load test")]
struct Args {
    #[arg(long, default_value_t = 50)]
    clients: u32,
    #[arg(long, default_value_t = 30)]
    duration: u64,
    #[arg(long, default_value_t = 1.0)]
    turn_rate: f64,
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,
    #[arg(long, default_value = "bot")]
    name_prefix: String,
}

// === Metrics ===

#[derive(Default)]
struct Metrics {
    connected: AtomicU64,
    in_game: AtomicU64,
    messages_received: AtomicU64,
    own_updates: AtomicU64,
    peer_updates: AtomicU64,
    spores_received: AtomicU64,
    spores_consumed: AtomicU64,
    directions_sent: AtomicU64,
    errors: AtomicU64,
    login_latency_sum_ms: AtomicU64,
    login_latency_count: AtomicU64,
}

// === Client task ===

async fn send(ws: &mut Socket, msg: Msg) -> bool {
    let packet = Packet { sender_id: 0, msg };
    match serde_json::to_string(&packet) {
        Ok(json) => ws.send(Message::Text(json.into())).await.is_ok(),
        Err(_) => false,
    }
}

/// Wait for the next message that `accept` takes, skipping the rest.
async fn wait_for<T>(ws: &mut Socket, mut accept: impl FnMut(Msg) -> Option<T>) -> Option<T> {
    while let Some(frame) = ws.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Ok(packet) = serde_json::from_str::<Packet>(&text) {
                    if let Some(found) = accept(packet.msg) {
                        return Some(found);
                    }
                }
            }
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

/// Register and log in. Returns the connection id.
async fn join(ws: &mut Socket, username: &str) -> Result<u64, String> {
    let id = wait_for(ws, |msg| match msg {
        Msg::Id(id) if id.protocol_version == PROTOCOL_VERSION => Some(id.id),
        Msg::Id(id) => {
            eprintln!(
                "Server speaks protocol {}, expected {}",
                id.protocol_version,
                PROTOCOL_VERSION
            );
            Some(id.id)
        }
        _ => None,
    })
    .await
    .ok_or("no id")?;

    let register = Msg::RegisterRequest(RegisterRequestMsg {
        username: username.to_string(),
        password: "loadtest".to_string(),
        color: 0,
    });
    if !send(ws, register).await {
        return Err("send register".to_string());
    }
    // A deny just means the account exists from an earlier run
    wait_for(ws, |msg| match msg {
        Msg::OkResponse | Msg::DenyResponse(_) => Some(()),
        _ => None,
    })
    .await
    .ok_or("no register answer")?;

    let login = Msg::LoginRequest(LoginRequestMsg {
        username: username.to_string(),
        password: "loadtest".to_string(),
    });
    if !send(ws, login).await {
        return Err("send login".to_string());
    }
    match wait_for(ws, |msg| match msg {
        Msg::OkResponse => Some(Ok(())),
        Msg::DenyResponse(d) => Some(Err(d.reason)),
        _ => None,
    })
    .await
    {
        Some(Ok(())) => Ok(id),
        Some(Err(reason)) => Err(reason),
        None => Err("no login answer".to_string()),
    }
}

async fn run_client(
    client_id: u32,
    args: Args,
    metrics: Arc<Metrics>,
    barrier: Arc<Barrier>,
) {
    let (mut ws, _) = match connect_async(&args.url).await {
        Ok(conn) => conn,
        Err(e) => {
            if client_id < 5 {
                eprintln!("Client {} failed to connect: {}", client_id, e);
            }
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            barrier.wait().await;
            return;
        }
    };
    metrics.connected.fetch_add(1, Ordering::Relaxed);

    let login_start = Instant::now();
    let username = format!("{}{}", args.name_prefix, client_id);
    let joined = tokio::time::timeout(Duration::from_secs(30), join(&mut ws, &username)).await;
    let my_id = match joined {
        Ok(Ok(id)) => id,
        Ok(Err(reason)) => {
            if client_id < 5 {
                eprintln!("Client {} could not join: {}", client_id, reason);
            }
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            metrics.connected.fetch_sub(1, Ordering::Relaxed);
            barrier.wait().await;
            return;
        }
        Err(_) => {
            if client_id < 5 {
                eprintln!("Client {} join timeout", client_id);
            }
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            metrics.connected.fetch_sub(1, Ordering::Relaxed);
            barrier.wait().await;
            return;
        }
    };
    metrics
        .login_latency_sum_ms
        .fetch_add(login_start.elapsed().as_millis() as u64, Ordering::Relaxed);
    metrics.login_latency_count.fetch_add(1, Ordering::Relaxed);
    metrics.in_game.fetch_add(1, Ordering::Relaxed);

    // Everyone starts moving together
    barrier.wait().await;

    let turn_interval = if args.turn_rate > 0.0 {
        Duration::from_secs_f64(1.0 / args.turn_rate)
    } else {
        Duration::from_secs(3600) // Effectively never
    };
    let mut turn_timer = tokio::time::interval(turn_interval);
    turn_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let test_end = Instant::now() + Duration::from_secs(args.duration);
    let mut rng = ChaCha8Rng::seed_from_u64(client_id as u64);

    while Instant::now() < test_end {
        tokio::select! {
            _ = turn_timer.tick() => {
                let direction = rng.gen::<f64>() * TAU;
                let msg = Msg::PlayerDirection(PlayerDirectionMsg { direction });
                if send(&mut ws, msg).await {
                    metrics.directions_sent.fetch_add(1, Ordering::Relaxed);
                } else {
                    metrics.errors.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }

            frame = ws.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        metrics.messages_received.fetch_add(1, Ordering::Relaxed);
                        let Ok(packet) = serde_json::from_str::<Packet>(&text) else {
                            metrics.errors.fetch_add(1, Ordering::Relaxed);
                            continue;
                        };
                        match packet.msg {
                            Msg::Player(p) if p.id == my_id => {
                                metrics.own_updates.fetch_add(1, Ordering::Relaxed);
                            }
                            Msg::Player(_) => {
                                metrics.peer_updates.fetch_add(1, Ordering::Relaxed);
                            }
                            Msg::SporesBatch(batch) => {
                                metrics.spores_received.fetch_add(batch.spores.len() as u64, Ordering::Relaxed);
                            }
                            Msg::Spore(_) => {
                                metrics.spores_received.fetch_add(1, Ordering::Relaxed);
                            }
                            Msg::SporeConsumed(_) => {
                                metrics.spores_consumed.fetch_add(1, Ordering::Relaxed);
                            }
                            _ => {}
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        if client_id < 3 {
                            eprintln!("Client {} stream ended", client_id);
                        }
                        break;
                    }
                    Some(Err(e)) => {
                        if client_id < 3 {
                            eprintln!("Client {} error: {}", client_id, e);
                        }
                        metrics.errors.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = ws.close(None).await;
    metrics.in_game.fetch_sub(1, Ordering::Relaxed);
    metrics.connected.fetch_sub(1, Ordering::Relaxed);
}

// === Main ===

#[tokio::main]
async fn main() {
    let args = Args::parse();

    println!("=== Spore Server Load Test ===");
    println!("Clients: {}", args.clients);
    println!("Duration: {}s", args.duration);
    println!("Turn rate: {}/s per client", args.turn_rate);
    println!("URL: {}", args.url);
    println!();

    let metrics = Arc::new(Metrics::default());
    let barrier = Arc::new(Barrier::new(args.clients as usize));

    let mut handles = Vec::with_capacity(args.clients as usize);
    println!("Spawning {} clients...", args.clients);
    let spawn_start = Instant::now();

    for client_id in 0..args.clients {
        let args = args.clone();
        let metrics = Arc::clone(&metrics);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(run_client(client_id, args, metrics, barrier)));

        // Stagger spawns slightly to avoid thundering herd
        if client_id % 50 == 49 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    println!("All clients spawned in {:?}", spawn_start.elapsed());
    println!();

    let duration_secs = args.duration;
    let metrics_clone = Arc::clone(&metrics);
    let stats_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        let start = Instant::now();

        loop {
            interval.tick().await;
            let elapsed = start.elapsed().as_secs();
            let m = &metrics_clone;
            println!(
                "[{:3}s] connected={}, in_game={}, msgs={}, own_updates={}, peer_updates={}, spores={}, errors={}",
                elapsed,
                m.connected.load(Ordering::Relaxed),
                m.in_game.load(Ordering::Relaxed),
                m.messages_received.load(Ordering::Relaxed),
                m.own_updates.load(Ordering::Relaxed),
                m.peer_updates.load(Ordering::Relaxed),
                m.spores_received.load(Ordering::Relaxed),
                m.errors.load(Ordering::Relaxed),
            );
        }
    });

    for handle in handles {
        let _ = handle.await;
    }
    stats_handle.abort();

    println!();
    println!("=== Final Results ===");
    let own_updates = metrics.own_updates.load(Ordering::Relaxed);
    let peer_updates = metrics.peer_updates.load(Ordering::Relaxed);
    let latency_sum = metrics.login_latency_sum_ms.load(Ordering::Relaxed);
    let latency_count = metrics.login_latency_count.load(Ordering::Relaxed);

    println!(
        "Total messages received: {}",
        metrics.messages_received.load(Ordering::Relaxed)
    );
    println!("Own player updates: {}", own_updates);
    println!("Peer player updates: {}", peer_updates);
    println!(
        "Spores received: {}",
        metrics.spores_received.load(Ordering::Relaxed)
    );
    println!(
        "Spores consumed by others: {}",
        metrics.spores_consumed.load(Ordering::Relaxed)
    );
    println!(
        "Directions sent: {}",
        metrics.directions_sent.load(Ordering::Relaxed)
    );
    println!("Total errors: {}", metrics.errors.load(Ordering::Relaxed));
    if latency_count > 0 {
        println!("Average join latency: {}ms", latency_sum / latency_count);
    }

    // One update per 50 ms tick while moving
    let joined = latency_count.max(1) as f64;
    let expected = duration_secs as f64 * 20.0;
    let per_client = own_updates as f64 / joined;
    println!();
    println!("Own updates per client: {:.1}", per_client);
    println!("Expected per client: {:.1}", expected);
    println!("Delivery rate: {:.1}%", per_client / expected * 100.0);
}
