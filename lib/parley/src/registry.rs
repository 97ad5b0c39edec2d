use crate::entity::{Chat, ChatId, Client, ClientId};
use crate::logging;
use indexmap::IndexMap;
use mio::net::TcpStream;
use std::net::SocketAddr;

/// All currently connected clients, keyed by their stable ID in admission
/// order. IDs start at 1 and are never reused, so they double as the socket
/// tokens handed to the readiness layer.
pub struct Clients {
    data: IndexMap<ClientId, Client>,
    next_id: ClientId,
    log: logging::Logger,
}

impl Clients {
    pub fn new(log: logging::Logger) -> Clients {
        Clients {
            data: IndexMap::new(),
            next_id: 1,
            log,
        }
    }

    /// Admits a freshly accepted, still unregistered connection.
    pub fn admit(&mut self, stream: TcpStream, address: SocketAddr) -> ClientId {
        let id = self.next_id;
        self.next_id += 1;

        self.data.insert(id, Client::new(id, stream, address));

        logging::info!(self.log, "created client"; "client_id" => id, "address" => %address);

        id
    }

    #[inline]
    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.data.get(&id)
    }

    #[inline]
    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut Client> {
        self.data.get_mut(&id)
    }

    /// Looks a client up by display name; only registered clients match.
    pub fn by_name(&self, name: &str) -> Option<ClientId> {
        self.data
            .values()
            .find(|client| client.name() == Some(name))
            .map(|client| client.id)
    }

    /// True when any known client already carries the name.
    #[inline]
    pub fn name_taken(&self, name: &str) -> bool {
        self.by_name(name).is_some()
    }

    /// Registered display names other than the caller's, in admission order.
    pub fn peer_names(&self, excluding: ClientId) -> Vec<String> {
        self.data
            .values()
            .filter(|client| client.id != excluding)
            .filter_map(|client| client.name().map(str::to_string))
            .collect()
    }

    pub fn remove(&mut self, id: ClientId) -> Option<Client> {
        let client = self.data.shift_remove(&id);

        if client.is_some() {
            logging::info!(self.log, "deleted client from storage"; "client_id" => id);
        }

        client
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// All dialog requests and live conversations, in creation order.
pub struct Chats {
    data: IndexMap<ChatId, Chat>,
    next_id: ChatId,
    log: logging::Logger,
}

impl Chats {
    pub fn new(log: logging::Logger) -> Chats {
        Chats {
            data: IndexMap::new(),
            next_id: 1,
            log,
        }
    }

    /// Opens a pending chat. Callers are responsible for the one-pending-
    /// per-ordered-pair rule; see the dispatcher.
    pub fn open(&mut self, initiator: ClientId, target: ClientId) -> ChatId {
        let id = self.next_id;
        self.next_id += 1;

        self.data.insert(id, Chat::new(id, initiator, target));

        logging::info!(self.log, "created chat between clients";
                       "chat_id" => id,
                       "initiator" => initiator,
                       "target" => target);

        id
    }

    #[inline]
    pub fn get(&self, id: ChatId) -> Option<&Chat> {
        self.data.get(&id)
    }

    pub fn approve(&mut self, id: ChatId) {
        if let Some(chat) = self.data.get_mut(&id) {
            chat.approve();
            logging::info!(self.log, "chat approved"; "chat_id" => id);
        }
    }

    /// The single active chat the client is a member of, if any.
    pub fn active_of(&self, client: ClientId) -> Option<&Chat> {
        self.data
            .values()
            .find(|chat| chat.is_approved() && chat.involves(client))
    }

    /// The pending chat for the exact ordered (initiator, target) pair.
    pub fn pending_from(&self, initiator: ClientId, target: ClientId) -> Option<ChatId> {
        self.data
            .values()
            .find(|chat| {
                !chat.is_approved() && chat.initiator == initiator && chat.target == target
            })
            .map(|chat| chat.id)
    }

    /// Pending chats targeting the client, in creation order.
    pub fn pending_for(&self, target: ClientId) -> Vec<&Chat> {
        self.data
            .values()
            .filter(|chat| !chat.is_approved() && chat.target == target)
            .collect()
    }

    /// Every chat in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Chat> {
        self.data.values()
    }

    pub fn remove(&mut self, id: ChatId) -> Option<Chat> {
        let chat = self.data.shift_remove(&id);

        if chat.is_some() {
            logging::info!(self.log, "chat removed from storage"; "chat_id" => id);
        }

        chat
    }

    /// Removes every chat the client belongs to, pending or active.
    pub fn remove_of(&mut self, client: ClientId) -> Vec<Chat> {
        let ids: Vec<ChatId> = self
            .data
            .values()
            .filter(|chat| chat.involves(client))
            .map(|chat| chat.id)
            .collect();

        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{discard_logger, loopback_client};

    fn clients_with(names: &[&str]) -> (Clients, Vec<ClientId>) {
        let mut clients = Clients::new(discard_logger());
        let mut ids = Vec::new();

        for &name in names {
            let (stream, _peer, address) = loopback_client();
            let id = clients.admit(stream, address);
            clients.get_mut(id).unwrap().set_name(name);
            ids.push(id);
        }

        (clients, ids)
    }

    #[test]
    fn test_admit_assigns_increasing_ids() {
        let mut clients = Clients::new(discard_logger());

        let (stream_a, _peer_a, addr_a) = loopback_client();
        let (stream_b, _peer_b, addr_b) = loopback_client();

        let first = clients.admit(stream_a, addr_a);
        let second = clients.admit(stream_b, addr_b);

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(clients.len(), 2);
    }

    #[test]
    fn test_unregistered_client_is_invisible_by_name() {
        let mut clients = Clients::new(discard_logger());

        let (stream, _peer, address) = loopback_client();
        let id = clients.admit(stream, address);

        assert!(!clients.get(id).unwrap().is_registered());
        assert!(clients.by_name("alice").is_none());
        assert!(!clients.name_taken("alice"));
    }

    #[test]
    fn test_by_name_finds_registered_client() {
        let (clients, ids) = clients_with(&["alice", "bob"]);

        assert_eq!(clients.by_name("alice"), Some(ids[0]));
        assert_eq!(clients.by_name("bob"), Some(ids[1]));
        assert!(clients.by_name("carol").is_none());
        assert!(clients.name_taken("alice"));
    }

    #[test]
    fn test_peer_names_excludes_caller_and_unregistered() {
        let (mut clients, ids) = clients_with(&["alice", "bob"]);

        let (stream, _peer, address) = loopback_client();
        clients.admit(stream, address);

        assert_eq!(clients.peer_names(ids[0]), vec!["bob".to_string()]);
        assert_eq!(clients.peer_names(ids[1]), vec!["alice".to_string()]);
    }

    #[test]
    fn test_remove_client() {
        let (mut clients, ids) = clients_with(&["alice"]);

        assert!(clients.remove(ids[0]).is_some());
        assert!(clients.remove(ids[0]).is_none());
        assert!(clients.by_name("alice").is_none());
        assert!(clients.is_empty());
    }

    #[test]
    fn test_open_chat_is_pending() {
        let mut chats = Chats::new(discard_logger());

        let id = chats.open(1, 2);

        assert!(!chats.get(id).unwrap().is_approved());
        assert_eq!(chats.pending_from(1, 2), Some(id));
        assert!(chats.pending_from(2, 1).is_none());
        assert!(chats.active_of(1).is_none());
    }

    #[test]
    fn test_approve_makes_chat_active_for_both_members() {
        let mut chats = Chats::new(discard_logger());

        let id = chats.open(1, 2);
        chats.approve(id);

        assert_eq!(chats.active_of(1).unwrap().id, id);
        assert_eq!(chats.active_of(2).unwrap().id, id);
        assert!(chats.pending_from(1, 2).is_none());
    }

    #[test]
    fn test_pending_for_preserves_creation_order() {
        let mut chats = Chats::new(discard_logger());

        let first = chats.open(2, 1);
        let second = chats.open(3, 1);
        let third = chats.open(4, 1);
        chats.remove(second);

        let pending: Vec<ChatId> = chats.pending_for(1).iter().map(|chat| chat.id).collect();

        assert_eq!(pending, vec![first, third]);
    }

    #[test]
    fn test_pending_for_ignores_active_chats() {
        let mut chats = Chats::new(discard_logger());

        let pending = chats.open(2, 1);
        let active = chats.open(3, 1);
        chats.approve(active);

        let listed: Vec<ChatId> = chats.pending_for(1).iter().map(|chat| chat.id).collect();

        assert_eq!(listed, vec![pending]);
    }

    #[test]
    fn test_remove_of_drops_pending_and_active() {
        let mut chats = Chats::new(discard_logger());

        let active = chats.open(1, 2);
        chats.approve(active);
        chats.open(3, 1);
        let unrelated = chats.open(3, 4);

        let removed = chats.remove_of(1);

        assert_eq!(removed.len(), 2);
        assert_eq!(chats.len(), 1);
        assert!(chats.get(unrelated).is_some());
        assert!(chats.active_of(2).is_none());
        assert!(chats.pending_for(1).is_empty());
    }
}
