use replica::net::{
    ChallengeAnswer, ClientTransport, LoopbackClientTransport, Packet, ServerUpdateKind,
    challenge_hash,
};
use replica::{
    Channel, Color, DisconnectReason, LoopbackNetwork, MemoryHost, NetworkServer, ObjectDirectory,
    Scene, ServerConfig, ServerEvent, TransportEvent,
};

const CHALLENGE: u64 = 0x1122334455667788;

struct World {
    objects: ObjectDirectory,
    host: MemoryHost,
}

impl World {
    fn new() -> Self {
        Self {
            objects: ObjectDirectory::new(),
            host: MemoryHost::new(),
        }
    }

    fn pump(&mut self, server: &mut NetworkServer) {
        let mut scene = Scene {
            objects: &mut self.objects,
            host: &mut self.host,
            now: 0.0,
        };
        server.update(&mut scene);
    }
}

fn start_server(network: &LoopbackNetwork, max_clients: usize) -> NetworkServer {
    let config = ServerConfig {
        server_name: "Arena".to_string(),
        max_clients,
        ..Default::default()
    };
    let mut server =
        NetworkServer::new(config, network.server_transport()).with_challenge_source(|| CHALLENGE);
    server.start().unwrap();
    server
}

fn received_packets(client: &mut LoopbackClientTransport) -> Vec<Packet> {
    client
        .poll_events()
        .into_iter()
        .filter_map(|event| match event {
            TransportEvent::Data { bytes, .. } => Some(Packet::deserialize(&bytes).unwrap()),
            _ => None,
        })
        .collect()
}

fn answer(client: &mut LoopbackClientTransport, hash: [u8; 32], username: &str) {
    let packet = Packet::ChallengeAnswer(ChallengeAnswer {
        hash,
        username: username.to_string(),
        color: Color::new(255, 0, 0, 255),
    });
    client
        .send(Channel::ReliableOrdered, &packet.serialize())
        .unwrap();
}

#[test]
fn test_challenge_answer_authenticates() {
    let network = LoopbackNetwork::new();
    let mut server = start_server(&network, 4);
    let mut world = World::new();
    let mut client = network.client_transport();
    client.connect().unwrap();

    world.pump(&mut server);
    let packets = received_packets(&mut client);
    assert_eq!(packets.len(), 1);
    let Packet::ConnectionChallenge(challenge) = &packets[0] else {
        panic!("expected a challenge, got {:?}", packets[0]);
    };
    assert_eq!(challenge.challenge, CHALLENGE);

    answer(&mut client, challenge_hash(challenge.challenge), "Alice");
    world.pump(&mut server);

    let packets = received_packets(&mut client);
    let Packet::ServerUpdate(update) = &packets[0] else {
        panic!("expected a server update, got {:?}", packets[0]);
    };
    assert_eq!(update.kind, ServerUpdateKind::Authenticated);
    assert_eq!(update.client_id, 1);
    assert_eq!(update.server_name, "Arena");
    assert_eq!(update.max_clients, 4);

    let alice = server.registry().get(1).unwrap();
    assert_eq!(alice.username, "Alice");
    assert_eq!(alice.color, Color::new(255, 0, 0, 255));
    assert!(server.connections().is_authenticated(1));

    let events: Vec<_> = server.drain_events().collect();
    assert!(events.contains(&ServerEvent::ClientAuthenticated {
        client_id: 1,
        username: "Alice".to_string(),
    }));
}

#[test]
fn test_wrong_hash_is_denied() {
    let network = LoopbackNetwork::new();
    let mut server = start_server(&network, 4);
    let mut world = World::new();
    let mut client = network.client_transport();
    client.connect().unwrap();

    world.pump(&mut server);
    received_packets(&mut client);

    let mut hash = challenge_hash(CHALLENGE);
    hash[0] ^= 0xFF;
    answer(&mut client, hash, "Mallory");
    world.pump(&mut server);

    assert!(server.registry().is_empty());
    assert_eq!(server.connections().total_count(), 0);
    let events: Vec<_> = server.drain_events().collect();
    assert!(events.contains(&ServerEvent::ConnectionDenied {
        connection_id: 1,
        reason: DisconnectReason::AuthenticationFailed,
    }));
    assert!(
        client
            .poll_events()
            .contains(&TransportEvent::Disconnected { connection_id: 1 })
    );
}

#[test]
fn test_packets_before_authentication_are_ignored() {
    let network = LoopbackNetwork::new();
    let mut server = start_server(&network, 4);
    let mut world = World::new();
    let mut client = network.client_transport();
    client.connect().unwrap();
    world.pump(&mut server);
    received_packets(&mut client);

    let update = Packet::ClientUpdate(replica::net::ClientUpdate {
        kind: replica::net::ClientUpdateKind::Updated,
        client_id: 1,
        username: Some("sneaky".to_string()),
        color: None,
    });
    client
        .send(Channel::ReliableOrdered, &update.serialize())
        .unwrap();
    world.pump(&mut server);

    assert!(server.registry().is_empty());
    assert!(!server.connections().is_authenticated(1));
}

#[test]
fn test_connections_beyond_capacity_are_refused() {
    let network = LoopbackNetwork::new();
    let mut server = start_server(&network, 1);
    let mut world = World::new();
    let mut first = network.client_transport();
    let mut second = network.client_transport();
    first.connect().unwrap();
    second.connect().unwrap();

    world.pump(&mut server);

    assert_eq!(server.connections().total_count(), 1);
    let events: Vec<_> = server.drain_events().collect();
    assert!(events.contains(&ServerEvent::ConnectionDenied {
        connection_id: 2,
        reason: DisconnectReason::ServerFull,
    }));
    assert!(
        second
            .poll_events()
            .contains(&TransportEvent::Disconnected { connection_id: 2 })
    );
}

#[test]
fn test_existing_members_are_replayed_to_joiner() {
    let network = LoopbackNetwork::new();
    let mut server = start_server(&network, 4);
    let mut world = World::new();

    let mut alice = network.client_transport();
    alice.connect().unwrap();
    world.pump(&mut server);
    received_packets(&mut alice);
    answer(&mut alice, challenge_hash(CHALLENGE), "Alice");
    world.pump(&mut server);
    received_packets(&mut alice);

    let mut bob = network.client_transport();
    bob.connect().unwrap();
    world.pump(&mut server);
    received_packets(&mut bob);
    answer(&mut bob, challenge_hash(CHALLENGE), "Bob");
    world.pump(&mut server);

    let to_bob = received_packets(&mut bob);
    assert!(matches!(&to_bob[0], Packet::ServerUpdate(u) if u.client_id == 2));
    assert!(matches!(
        &to_bob[1],
        Packet::ClientUpdate(u) if u.client_id == 1 && u.username.as_deref() == Some("Alice")
    ));

    let to_alice = received_packets(&mut alice);
    assert_eq!(to_alice.len(), 1);
    assert!(matches!(
        &to_alice[0],
        Packet::ClientUpdate(u) if u.client_id == 2 && u.username.as_deref() == Some("Bob")
    ));
}
