use std::collections::HashMap;

use sha2::{Digest, Sha256};

use super::protocol::{CHALLENGE_HASH_LEN, ConnectionId};

/// SHA-256 of the challenge's little-endian bytes.
pub fn challenge_hash(challenge: u64) -> [u8; CHALLENGE_HASH_LEN] {
    Sha256::digest(challenge.to_le_bytes()).into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Pending,
    Authenticated,
}

#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub state: ConnectionState,
    pub rtt_ms: f32,
    expected_hash: Option<[u8; CHALLENGE_HASH_LEN]>,
}

impl Connection {
    pub fn new(id: ConnectionId, expected_hash: [u8; CHALLENGE_HASH_LEN]) -> Self {
        Self {
            id,
            state: ConnectionState::Pending,
            rtt_ms: 0.0,
            expected_hash: Some(expected_hash),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == ConnectionState::Authenticated
    }

    /// Consumes the pending challenge. Only an exact match authenticates.
    pub fn verify_answer(&mut self, hash: &[u8; CHALLENGE_HASH_LEN]) -> bool {
        match self.expected_hash.take() {
            Some(expected) if expected == *hash => {
                self.state = ConnectionState::Authenticated;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug)]
pub struct ConnectionManager {
    connections: HashMap<ConnectionId, Connection>,
    max_clients: usize,
}

impl ConnectionManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            connections: HashMap::new(),
            max_clients,
        }
    }

    pub fn create_pending(
        &mut self,
        id: ConnectionId,
        expected_hash: [u8; CHALLENGE_HASH_LEN],
    ) -> Result<&mut Connection, &'static str> {
        if self.connections.contains_key(&id) {
            return Err("Connection already exists");
        }
        if self.connections.len() >= self.max_clients {
            return Err("Server full");
        }
        Ok(self
            .connections
            .entry(id)
            .or_insert_with(|| Connection::new(id, expected_hash)))
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }

    pub fn is_authenticated(&self, id: ConnectionId) -> bool {
        self.connections
            .get(&id)
            .is_some_and(Connection::is_authenticated)
    }

    /// Authenticated connection ids in ascending order.
    pub fn authenticated_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .connections
            .values()
            .filter(|c| c.is_authenticated())
            .map(|c| c.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn connected_count(&self) -> usize {
        self.connections
            .values()
            .filter(|c| c.is_authenticated())
            .count()
    }

    pub fn pending_count(&self) -> usize {
        self.connections.len() - self.connected_count()
    }

    pub fn total_count(&self) -> usize {
        self.connections.len()
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    pub fn clear(&mut self) {
        self.connections.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_enforced() {
        let mut connections = ConnectionManager::new(1);
        assert!(connections.create_pending(1, [0; 32]).is_ok());
        assert_eq!(
            connections.create_pending(2, [0; 32]).err(),
            Some("Server full")
        );
    }

    #[test]
    fn answer_must_match_exactly() {
        let mut connection = Connection::new(1, [7; 32]);
        let mut wrong = [7; 32];
        wrong[31] = 8;
        assert!(!connection.verify_answer(&wrong));
        assert!(!connection.is_authenticated());
        // the challenge is single use
        assert!(!connection.verify_answer(&[7; 32]));
    }

    #[test]
    fn matching_answer_authenticates() {
        let mut connections = ConnectionManager::new(4);
        connections.create_pending(3, [1; 32]).unwrap();
        assert!(connections.get_mut(3).unwrap().verify_answer(&[1; 32]));
        assert_eq!(connections.authenticated_ids(), vec![3]);
        assert_eq!(connections.pending_count(), 0);
    }

    #[test]
    fn challenge_hash_is_sha256_of_le_bytes() {
        let hash = challenge_hash(0x1122334455667788);
        assert_eq!(hash, challenge_hash(0x1122334455667788));
        assert_ne!(hash, challenge_hash(0x8877665544332211));
        // sha256 of eight zero bytes
        assert_eq!(
            &challenge_hash(0)[..4],
            &[0xaf, 0x55, 0x70, 0xf5]
        );
    }
}
