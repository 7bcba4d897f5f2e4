use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::net::{ClientId, ClientUpdate, ClientUpdateKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::new(255, 255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::WHITE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: ClientId,
    pub username: String,
    pub color: Color,
}

impl ClientInfo {
    pub fn new(id: ClientId, username: impl Into<String>, color: Color) -> Self {
        Self {
            id,
            username: username.into(),
            color,
        }
    }

    pub fn connected_update(&self) -> ClientUpdate {
        ClientUpdate {
            kind: ClientUpdateKind::Connected,
            client_id: self.id,
            username: Some(self.username.clone()),
            color: Some(self.color),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Connected(ClientInfo),
    Disconnected(ClientInfo),
    Updated { before: ClientInfo, after: ClientInfo },
}

/// Directory of connected peers. The server owns the canonical copy; each
/// client keeps a mirror fed by `ClientUpdate` packets.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: BTreeMap<ClientId, ClientInfo>,
    events: VecDeque<RegistryEvent>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, info: ClientInfo) {
        match self.clients.insert(info.id, info.clone()) {
            Some(before) if before != info => self.events.push_back(RegistryEvent::Updated {
                before,
                after: info,
            }),
            Some(_) => {}
            None => self.events.push_back(RegistryEvent::Connected(info)),
        }
    }

    pub fn remove(&mut self, id: ClientId) -> Option<ClientInfo> {
        let removed = self.clients.remove(&id)?;
        self.events
            .push_back(RegistryEvent::Disconnected(removed.clone()));
        Some(removed)
    }

    /// Changes the given fields of an existing entry; returns false for unknown ids.
    pub fn update(
        &mut self,
        id: ClientId,
        username: Option<&str>,
        color: Option<Color>,
    ) -> bool {
        let Some(info) = self.clients.get_mut(&id) else {
            return false;
        };
        let before = info.clone();
        if let Some(username) = username {
            info.username = username.to_string();
        }
        if let Some(color) = color {
            info.color = color;
        }
        if *info != before {
            let after = info.clone();
            self.events
                .push_back(RegistryEvent::Updated { before, after });
        }
        true
    }

    /// Applies a replicated `ClientUpdate`. Connected entries without a
    /// username or color fall back to an empty name and white.
    pub fn apply(&mut self, update: &ClientUpdate) {
        match update.kind {
            ClientUpdateKind::Connected => {
                let info = ClientInfo {
                    id: update.client_id,
                    username: update.username.clone().unwrap_or_default(),
                    color: update.color.unwrap_or_default(),
                };
                self.insert(info);
            }
            ClientUpdateKind::Disconnected => {
                self.remove(update.client_id);
            }
            ClientUpdateKind::Updated => {
                if !self.update(update.client_id, update.username.as_deref(), update.color) {
                    log::debug!("Update for unknown client {}", update.client_id);
                }
            }
        }
    }

    pub fn get(&self, id: ClientId) -> Option<&ClientInfo> {
        self.clients.get(&id)
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientInfo> {
        self.clients.values()
    }

    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Removes every entry, reporting each as disconnected.
    pub fn clear(&mut self) {
        for (_, info) in std::mem::take(&mut self.clients) {
            self.events.push_back(RegistryEvent::Disconnected(info));
        }
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = RegistryEvent> + '_ {
        self.events.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> ClientInfo {
        ClientInfo::new(1, "Alice", Color::new(255, 0, 0, 255))
    }

    #[test]
    fn connect_update_disconnect_events() {
        let mut registry = ClientRegistry::new();
        registry.insert(alice());
        assert!(registry.update(1, Some("Alicia"), None));
        registry.remove(1);

        let events: Vec<_> = registry.drain_events().collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], RegistryEvent::Connected(alice()));
        assert!(matches!(
            &events[1],
            RegistryEvent::Updated { after, .. } if after.username == "Alicia"
        ));
        assert!(matches!(&events[2], RegistryEvent::Disconnected(info) if info.id == 1));
        assert!(registry.is_empty());
    }

    #[test]
    fn unchanged_update_is_silent() {
        let mut registry = ClientRegistry::new();
        registry.insert(alice());
        registry.drain_events().for_each(drop);

        assert!(registry.update(1, Some("Alice"), None));
        assert_eq!(registry.drain_events().count(), 0);
    }

    #[test]
    fn mirror_converges_from_updates() {
        let mut server = ClientRegistry::new();
        let mut mirror = ClientRegistry::new();

        server.insert(alice());
        server.insert(ClientInfo::new(2, "Bob", Color::WHITE));
        for info in server.iter() {
            mirror.apply(&info.connected_update());
        }
        server.update(2, None, Some(Color::new(0, 0, 255, 255)));
        mirror.apply(&ClientUpdate {
            kind: ClientUpdateKind::Updated,
            client_id: 2,
            username: None,
            color: Some(Color::new(0, 0, 255, 255)),
        });

        let a: Vec<_> = server.iter().cloned().collect();
        let b: Vec<_> = mirror.iter().cloned().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn update_for_unknown_client_is_ignored() {
        let mut registry = ClientRegistry::new();
        assert!(!registry.update(9, Some("ghost"), None));
        assert!(registry.is_empty());
    }
}
