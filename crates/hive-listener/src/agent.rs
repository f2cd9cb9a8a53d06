//! Agent-bus adapter.
//!
//! The broker relays between connected clients and a collocated agent bus.
//! [`AgentBus`] is a broadcast channel of [`BusMessage`]s; the external
//! agent bridge (OVOS, a test harness, ...) subscribes to it and emits into
//! it. [`AgentBridge`] is the listener-side consumer: it watches for
//! `hive.send.downstream` requests and plays catch-all for agent replies
//! addressed to connected peers.

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use hive_types::bus::{BusMessage, Destination, MessageContext};
use hive_wire::message::{HiveMessage, HiveMessageType, HivePayload};

use crate::connection::PeerTable;

/// Bus topics consumed and produced by the listener.
pub mod topics {
    /// Consumed: an agent asks the broker to send a message downstream.
    pub const SEND_DOWNSTREAM: &str = "hive.send.downstream";
    /// Produced: payload that must continue upstream (propagate/escalate).
    pub const SEND_UPSTREAM: &str = "hive.send.upstream";
    /// Produced: a client connected.
    pub const CLIENT_CONNECT: &str = "hive.client.connect";
    /// Produced: a client disconnected.
    pub const CLIENT_DISCONNECT: &str = "hive.client.disconnect";
    /// Produced: a connection was rejected.
    pub const CONNECTION_ERROR: &str = "hive.client.connection.error";
    /// Produced: a send was addressed to an unknown peer.
    pub const SEND_ERROR: &str = "hive.client.send.error";
}

/// Broadcast bus carrying agent messages in both directions.
#[derive(Clone)]
pub struct AgentBus {
    sender: broadcast::Sender<BusMessage>,
}

impl AgentBus {
    /// Create a bus with the given subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit a message to all subscribers. Lossy when nobody listens.
    pub fn emit(&self, message: BusMessage) {
        let _ = self.sender.send(message);
    }

    /// Subscribe to bus traffic.
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }
}

impl Default for AgentBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Listener-side consumer of agent-bus traffic.
///
/// Holds an accessor clone of the peer table rather than the listener
/// itself, which keeps the ownership graph acyclic.
#[derive(Clone)]
pub struct AgentBridge {
    peers: PeerTable,
    bus: AgentBus,
}

impl AgentBridge {
    pub fn new(peers: PeerTable, bus: AgentBus) -> Self {
        Self { peers, bus }
    }

    /// Route one bus event.
    pub fn handle_event(&self, message: &BusMessage) {
        if message.msg_type == topics::SEND_DOWNSTREAM {
            self.handle_downstream(message);
        } else {
            self.handle_catchall(message);
        }
    }

    /// An agent asks the broker to send a HiveMessage downstream.
    ///
    /// Payload: `{payload, peer, msg_type}`. PROPAGATE and BROADCAST fan
    /// out to every connection; ESCALATE is ignored (escalations only flow
    /// from slave to master); anything else goes point-to-point.
    pub fn handle_downstream(&self, message: &BusMessage) {
        let msg_type = message
            .data
            .get("msg_type")
            .and_then(|v| serde_json::from_value::<HiveMessageType>(v.clone()).ok());
        let Some(msg_type) = msg_type else {
            warn!("downstream request without a valid msg_type");
            return;
        };
        let payload = message
            .data
            .get("payload")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let peer = message
            .data
            .get("peer")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let payload: HivePayload =
            serde_json::from_value(payload).unwrap_or(HivePayload::Json(serde_json::Value::Null));
        let mut envelope = HiveMessage::new(msg_type, payload);
        envelope.target_peers = peer.clone().into_iter().collect();

        match msg_type {
            HiveMessageType::Propagate | HiveMessageType::Broadcast => {
                for (peer_id, conn) in self.peers.snapshot() {
                    let mut copy = envelope.clone();
                    copy.target_peers = vec![peer_id.clone()];
                    if let Err(e) = conn.send(&copy) {
                        warn!(peer = %peer_id, error = %e, "downstream fan-out send failed");
                    }
                }
            }
            HiveMessageType::Escalate => {
                // escalations flow only from slave to master, never the
                // reverse; a slave-side bridge handles those
            }
            _ => {
                let Some(peer_id) = peer else {
                    warn!("downstream request without a peer");
                    return;
                };
                match self.peers.get(&peer_id) {
                    Some(conn) => {
                        if let Err(e) = conn.send(&envelope) {
                            warn!(peer = %peer_id, error = %e, "downstream send failed");
                        }
                    }
                    None => {
                        error!(peer = %peer_id, "that client is not connected");
                        self.bus.emit(send_error(&peer_id));
                    }
                }
            }
        }
    }

    /// Catch-all: forward agent messages to the connected peers named in
    /// their destination. Clients only ever see replies addressed to them.
    pub fn handle_catchall(&self, message: &BusMessage) {
        let Some(destination) = &message.context.destination else {
            return;
        };
        let targets = destination.targets();
        if targets.is_empty() {
            return;
        }

        for (peer_id, conn) in self.peers.snapshot() {
            if !targets.iter().any(|t| t == &peer_id) {
                continue;
            }
            debug!(msg_type = %message.msg_type, peer = %peer_id, "forwarding agent message");
            let mut forwarded = message.clone();
            forwarded.context.source = Some("hive".to_string());

            let mut envelope = HiveMessage::bus(forwarded);
            envelope.source_peer = Some(peer_id.clone());
            envelope.target_peers = targets.clone();
            if let Err(e) = conn.send(&envelope) {
                warn!(peer = %peer_id, error = %e, "agent forward failed");
            }
        }
    }
}

fn send_error(peer: &str) -> BusMessage {
    BusMessage {
        msg_type: topics::SEND_ERROR.to_string(),
        data: serde_json::json!({
            "error": "That client is not connected",
            "peer": peer,
        }),
        context: MessageContext {
            destination: Some(Destination::One("hive".into())),
            ..MessageContext::default()
        },
    }
}

/// Drive a bridge from a bus subscription until the bus closes.
pub async fn run_bridge(bridge: AgentBridge, mut rx: broadcast::Receiver<BusMessage>) {
    loop {
        match rx.recv().await {
            Ok(message) => bridge.handle_event(&message),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "agent bridge lagging, dropped bus messages");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ClientConnection;
    use crate::testutil::MockTransport;
    use hive_crypto::x25519::NodeSecret;
    use hive_db::ClientRecord;
    use std::sync::Arc;

    fn connected_peer(
        table: &PeerTable,
        peer_id: &str,
        key: &str,
    ) -> (Arc<MockTransport>, Arc<ClientConnection>) {
        let transport = Arc::new(MockTransport::new());
        let conn = Arc::new(ClientConnection::new(
            "agent",
            key,
            transport.clone(),
            NodeSecret::generate(),
        ));
        conn.apply_record(&ClientRecord::new(1, key, "peer"))
            .expect("apply");
        table.insert(peer_id.to_string(), conn.clone());
        (transport, conn)
    }

    fn downstream(msg_type: &str, peer: Option<&str>) -> BusMessage {
        let mut data = serde_json::json!({
            "msg_type": msg_type,
            "payload": {"type": "speak", "data": {"utterance": "hi"}},
        });
        if let Some(peer) = peer {
            data["peer"] = peer.into();
        }
        BusMessage {
            msg_type: topics::SEND_DOWNSTREAM.into(),
            data,
            context: MessageContext::default(),
        }
    }

    #[test]
    fn test_downstream_direct_send() {
        let table = PeerTable::new();
        let bus = AgentBus::default();
        let (transport, _conn) = connected_peer(&table, "peer-1", "key-1");

        let bridge = AgentBridge::new(table, bus);
        bridge.handle_downstream(&downstream("bus", Some("peer-1")));

        let sent = transport.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].msg_type, HiveMessageType::Bus);
    }

    #[test]
    fn test_downstream_unknown_peer_emits_error() {
        let table = PeerTable::new();
        let bus = AgentBus::default();
        let mut rx = bus.subscribe();

        let bridge = AgentBridge::new(table, bus);
        bridge.handle_downstream(&downstream("bus", Some("ghost")));

        let err = rx.try_recv().expect("error emission");
        assert_eq!(err.msg_type, topics::SEND_ERROR);
        assert_eq!(err.data["peer"], "ghost");
    }

    #[test]
    fn test_downstream_broadcast_fans_out() {
        let table = PeerTable::new();
        let bus = AgentBus::default();
        let (t1, _c1) = connected_peer(&table, "peer-1", "key-1");
        let (t2, _c2) = connected_peer(&table, "peer-2", "key-2");

        let bridge = AgentBridge::new(table, bus);
        bridge.handle_downstream(&downstream("broadcast", None));

        assert_eq!(t1.sent_messages().len(), 1);
        assert_eq!(t2.sent_messages().len(), 1);
    }

    #[test]
    fn test_downstream_escalate_ignored() {
        let table = PeerTable::new();
        let bus = AgentBus::default();
        let (t1, _c1) = connected_peer(&table, "peer-1", "key-1");

        let bridge = AgentBridge::new(table, bus);
        bridge.handle_downstream(&downstream("escalate", Some("peer-1")));
        assert!(t1.sent_messages().is_empty());
    }

    #[test]
    fn test_catchall_client_isolation() {
        let table = PeerTable::new();
        let bus = AgentBus::default();
        let (t1, _c1) = connected_peer(&table, "peer-1", "key-1");
        let (t2, _c2) = connected_peer(&table, "peer-2", "key-2");

        let mut reply = BusMessage::new("speak");
        reply.context.destination = Some(Destination::One("peer-1".into()));

        let bridge = AgentBridge::new(table, bus);
        bridge.handle_catchall(&reply);

        let sent = t1.sent_messages();
        assert_eq!(sent.len(), 1);
        let bus_msg = sent[0].payload.as_bus().expect("bus payload");
        assert_eq!(bus_msg.context.source.as_deref(), Some("hive"));
        assert!(t2.sent_messages().is_empty());
    }

    #[test]
    fn test_catchall_without_destination_is_dropped() {
        let table = PeerTable::new();
        let bus = AgentBus::default();
        let (t1, _c1) = connected_peer(&table, "peer-1", "key-1");

        let bridge = AgentBridge::new(table, bus);
        bridge.handle_catchall(&BusMessage::new("speak"));
        assert!(t1.sent_messages().is_empty());
    }
}
