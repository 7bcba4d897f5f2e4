use anyhow::{Context, Result};
use clap::Parser;
use glam::{Quat, Vec3};
use rkyv::{Archive, Deserialize, Serialize};

use replica::{
    Channel, ClientConfig, ClientEvent, Color, DataRouting, LoopbackNetwork, MemoryHost,
    NetworkManager, NetworkObject, ObjectEvent, ObjectId, PacketLossSimulation, Pose,
    RegistryEvent, ServerConfig, ServerEvent, TransformConfig, placed_object_id,
    receive_message,
};

const BALL_PREFAB: u32 = 1;
const CRATE_NAME: &str = "level/crate";

#[derive(Parser)]
#[command(name = "demo")]
#[command(about = "In-process host and clients replicating a small scene")]
struct Args {
    #[arg(short, long, default_value_t = 2)]
    clients: usize,

    #[arg(short, long, default_value_t = 240)]
    ticks: u32,

    #[arg(long, default_value_t = replica::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(long, default_value_t = 0.0, help = "Unreliable packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, default_value = "Demo")]
    server_name: String,
}

#[derive(Debug, Archive, Serialize, Deserialize)]
struct Chat {
    text: String,
}

type Peer = NetworkManager<MemoryHost>;

fn scene_host() -> MemoryHost {
    let mut host = MemoryHost::strict();
    host.register_prefab(BALL_PREFAB, Some(TransformConfig::default()));
    host.place(
        placed_object_id(CRATE_NAME),
        Pose::at(Vec3::new(0.0, 0.5, 0.0)),
    );
    host
}

fn register_crate(peer: &mut Peer) -> ObjectId {
    let id = placed_object_id(CRATE_NAME);
    peer.register(
        NetworkObject::placed(id)
            .with_distributed_authority(true)
            .with_transform(TransformConfig::default()),
    );
    id
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let network = LoopbackNetwork::with_loss(PacketLossSimulation::new(args.loss_percent));
    let dt = 1.0 / args.tick_rate.max(1) as f64;

    let mut host = Peer::new(scene_host(), args.tick_rate);
    let crate_id = register_crate(&mut host);
    host.start_host(
        ServerConfig {
            server_name: args.server_name.clone(),
            tick_rate: args.tick_rate,
            ..Default::default()
        },
        network.server_transport(),
        ClientConfig {
            username: "Host".to_string(),
            color: Color::new(255, 200, 0, 255),
        },
        network.client_transport(),
    )
    .context("starting host")?;

    let mut clients = Vec::with_capacity(args.clients);
    for i in 0..args.clients {
        let mut peer = Peer::new(scene_host(), args.tick_rate);
        register_crate(&mut peer);
        peer.start_client(
            ClientConfig {
                username: format!("Player{}", i + 1),
                color: Color::new(0, (40 * i % 256) as u8, 255, 255),
            },
            network.client_transport(),
        )
        .with_context(|| format!("connecting client {}", i + 1))?;
        clients.push(peer);
    }

    host.spawn(crate_id).context("spawning crate")?;
    let ball_id = host
        .instantiate(BALL_PREFAB, None)
        .context("instantiating ball")?;
    log::info!("Spawned crate {} and ball {}", crate_id, ball_id);

    for tick in 0..args.ticks {
        let t = tick as f32 * dt as f32;
        host.host_mut().set_pose(
            ball_id,
            Pose {
                position: Vec3::new(t.cos() * 3.0, 1.0, t.sin() * 3.0),
                rotation: Quat::from_rotation_y(t),
                ..Default::default()
            },
        );

        if let Some(first) = clients.first_mut() {
            if tick == args.ticks / 4 {
                if let Err(e) = first.request_authority(crate_id) {
                    log::warn!("Authority request failed: {}", e);
                }
            }
            if first.has_authority(crate_id) {
                let lift = Pose::at(Vec3::new(0.0, 0.5 + t.sin().abs(), 2.0));
                first.host_mut().set_pose(crate_id, lift);
            }
        }

        if tick == args.ticks / 2 {
            send_greeting(&mut host, tick)?;
        }

        host.update(dt);
        for peer in &mut clients {
            peer.update(dt);
        }

        report(&mut host, "host");
        for (i, peer) in clients.iter_mut().enumerate() {
            report(peer, &format!("client{}", i + 1));
        }
    }

    let host_ball = host.pose(ball_id).unwrap_or_default();
    for (i, peer) in clients.iter().enumerate() {
        let crate_pose = peer.pose(crate_id).unwrap_or_default();
        let ball_pose = peer.pose(ball_id).unwrap_or_default();
        log::info!(
            "client{}: crate at {:?}, ball at {:?} (host ball at {:?})",
            i + 1,
            crate_pose.position,
            ball_pose.position,
            host_ball.position
        );
    }

    let stats = network.stats();
    log::info!(
        "{} packets sent, {} dropped ({:.1}% loss)",
        stats.packets_sent,
        stats.packets_dropped,
        stats.loss_percent()
    );

    for peer in &mut clients {
        peer.stop();
    }
    host.stop();
    Ok(())
}

fn send_greeting(host: &mut Peer, tick: u32) -> Result<()> {
    let Some(client) = host.client() else {
        return Ok(());
    };
    let Some(me) = client.client_id() else {
        return Ok(());
    };
    let others: Vec<_> = client
        .registry()
        .ids()
        .into_iter()
        .filter(|&id| id != me)
        .collect();
    if others.is_empty() {
        return Ok(());
    }

    let chat = Chat {
        text: format!("hello from the host at tick {}", tick),
    };
    host.send_message(Channel::ReliableOrdered, DataRouting::ToClients(others), &chat)
        .context("sending chat")
}

fn report(peer: &mut Peer, name: &str) {
    if let Some(server) = peer.server_mut() {
        server.registry_mut().drain_events().for_each(drop);
        for event in server.drain_events() {
            match event {
                ServerEvent::ClientAuthenticated {
                    client_id,
                    username,
                } => log::info!("[{}] {} joined as client {}", name, username, client_id),
                ServerEvent::ClientDisconnected { client_id, reason } => {
                    log::info!("[{}] client {} {}", name, client_id, reason.as_str())
                }
                ServerEvent::AuthorityRejected {
                    object_id,
                    requester,
                    reason,
                } => log::info!(
                    "[{}] rejected client {} on object {}: {}",
                    name,
                    requester,
                    object_id,
                    reason
                ),
                other => log::debug!("[{}] {:?}", name, other),
            }
        }
    }

    if let Some(client) = peer.client_mut() {
        for event in client.registry_mut().drain_events() {
            match event {
                RegistryEvent::Updated { before, after } => log::info!(
                    "[{}] {} is now known as {}",
                    name,
                    before.username,
                    after.username
                ),
                other => log::trace!("[{}] {:?}", name, other),
            }
        }
        for event in client.drain_events() {
            match event {
                ClientEvent::Authenticated {
                    client_id,
                    server_name,
                    ..
                } => log::info!(
                    "[{}] authenticated as {} on '{}'",
                    name,
                    client_id,
                    server_name
                ),
                ClientEvent::DataReceived {
                    from,
                    hash,
                    payload,
                } => match receive_message::<Chat>(hash, &payload) {
                    Some(Ok(chat)) => log::info!("[{}] chat from {}: {}", name, from, chat.text),
                    Some(Err(e)) => log::warn!("[{}] bad chat payload: {}", name, e),
                    None => log::debug!("[{}] data {:#x} from {}", name, hash, from),
                },
                other => log::debug!("[{}] {:?}", name, other),
            }
        }
    }

    for event in peer.objects_mut().drain_events() {
        match event {
            ObjectEvent::AuthorityChanged {
                object_id,
                current,
                ..
            } => log::info!("[{}] object {} author is now {}", name, object_id, current),
            ObjectEvent::OwnershipChanged {
                object_id,
                current,
                ..
            } => log::info!("[{}] object {} owner is now {}", name, object_id, current),
            other => log::trace!("[{}] {:?}", name, other),
        }
    }
}
