//! Inbound packet dispatch (§4.10): one `tokio` task per source peer,
//! fed by an unbounded channel, so packets from the same peer are handled
//! in arrival order while different peers run in parallel. Each task runs
//! the full pipeline: `Security.validate` → type switch → `MessageHandler`
//! (which itself calls into `FragmentManager`) → `update_last_seen` →
//! `RelayEngine`.

use std::sync::Arc;
use std::time::Duration;

use bitchat_codec::Packet;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{instrument, warn};

use crate::delegate::MeshDelegate;
use crate::error::DropCounters;
use crate::fragment::FragmentManager;
use crate::gossip::GossipSync;
use crate::message_handler::MessageHandler;
use crate::noise_sessions::NoiseSessions;
use crate::peer_registry::PeerRegistry;
use crate::relay;
use crate::security::{Security, Verdict};
use crate::store_forward::StoreForward;
use crate::types::PeerId;

/// A packet the dispatcher decided needs to go back out, either to every
/// peer or to one peer specifically (handshake replies, delivery acks). A
/// relayed broadcast carries the address it arrived on, so the transport
/// that re-broadcasts it can skip echoing it back to that same link (§4.9).
#[derive(Clone, Debug)]
pub enum Outbound {
    Broadcast(Packet, Option<String>),
    ToPeer(PeerId, Packet),
}

/// Everything a per-peer worker task needs, shared across every worker via
/// one `Arc`. Nothing here is peer-specific; the per-peer state lives
/// inside the components themselves (`DashMap`-keyed by `PeerId`).
pub struct DispatchContext {
    pub local_id: PeerId,
    pub registry: Arc<PeerRegistry>,
    pub fragments: Arc<FragmentManager>,
    pub noise: Arc<NoiseSessions>,
    pub security: Arc<Security>,
    pub store_forward: Arc<StoreForward>,
    pub gossip: Arc<GossipSync>,
    pub delegate: Arc<dyn MeshDelegate>,
    pub counters: Arc<DropCounters>,
    pub outbound: mpsc::UnboundedSender<Outbound>,
}

struct InboundJob {
    packet: Packet,
    from_address: Option<String>,
}

pub struct PacketDispatcher {
    ctx: Arc<DispatchContext>,
    queues: DashMap<PeerId, mpsc::UnboundedSender<InboundJob>>,
    workers: DashMap<PeerId, JoinHandle<()>>,
}

impl PacketDispatcher {
    pub fn new(ctx: Arc<DispatchContext>) -> Self {
        Self {
            ctx,
            queues: DashMap::new(),
            workers: DashMap::new(),
        }
    }

    /// Enqueues `packet` onto its sender's worker, spawning the worker on
    /// first contact.
    pub fn dispatch(&self, packet: Packet) {
        self.dispatch_from(packet, None);
    }

    /// Like [`Self::dispatch`], but also records the link the packet
    /// arrived on, so a relay of it can skip echoing back to that same
    /// link (§4.9).
    #[instrument(skip(self, packet), fields(sender_id = ?packet.sender_id))]
    pub fn dispatch_from(&self, packet: Packet, from_address: Option<String>) {
        let sender_id = packet.sender_id;
        let queue = self.queues.entry(sender_id).or_insert_with(|| self.spawn_worker(sender_id));
        if queue.send(InboundJob { packet, from_address }).is_err() {
            warn!(?sender_id, "dispatch worker gone, dropping packet");
        }
    }

    fn spawn_worker(&self, peer_id: PeerId) -> mpsc::UnboundedSender<InboundJob> {
        let (tx, mut rx) = mpsc::unbounded_channel::<InboundJob>();
        let ctx = Arc::clone(&self.ctx);

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                process_one(&ctx, job.packet, job.from_address).await;
            }
        });
        self.workers.insert(peer_id, handle);
        tx
    }

    /// Closes every worker's queue and waits up to 200ms per worker for it
    /// to drain and exit (§5's shutdown contract).
    pub async fn shutdown(&self) {
        self.queues.clear();
        let peer_ids: Vec<PeerId> = self.workers.iter().map(|e| *e.key()).collect();
        let handles: Vec<(PeerId, JoinHandle<()>)> = peer_ids.into_iter().filter_map(|id| self.workers.remove(&id)).collect();
        for (peer_id, handle) in handles {
            if tokio::time::timeout(Duration::from_millis(200), handle).await.is_err() {
                warn!(?peer_id, "dispatch worker did not shut down within 200ms");
            }
        }
    }

    pub fn active_worker_count(&self) -> usize {
        self.workers.len()
    }
}

async fn process_one(ctx: &DispatchContext, packet: Packet, from_address: Option<String>) {
    let verdict = ctx.security.validate(&packet, &ctx.local_id, &ctx.registry, &ctx.counters);
    if verdict != Verdict::Accept {
        return;
    }

    let outcome = MessageHandler::handle(
        &packet,
        &ctx.local_id,
        &ctx.registry,
        &ctx.fragments,
        &ctx.noise,
        &ctx.security,
        &ctx.store_forward,
        &ctx.gossip,
        ctx.delegate.as_ref(),
        &ctx.counters,
    );

    ctx.registry.update_last_seen(packet.sender_id);

    if let Some(candidate) = outcome.gossip_candidate {
        ctx.gossip.on_public_packet_seen(candidate);
    }

    for reply in outcome.emit {
        let target = if reply.is_broadcast() { None } else { reply.recipient_id };
        let routed = match target {
            Some(peer_id) => Outbound::ToPeer(peer_id, reply),
            None => Outbound::Broadcast(reply, None),
        };
        let _ = ctx.outbound.send(routed);
    }

    let active_peer_count = ctx.registry.active_peer_ids(Duration::from_secs(180)).len();
    if relay::should_relay(&packet, &ctx.local_id, active_peer_count) {
        let _ = ctx.outbound.send(Outbound::Broadcast(relay::prepare_relay(&packet), from_address));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitchat_codec::constants::message_type;
    use bitchat_codec::ChatMessageTlv;
    use bitchat_crypto::LocalIdentity;
    use bytes::Bytes;
    use rand::rngs::OsRng;
    use std::sync::Mutex;

    struct NullDelegate {
        received: Mutex<Vec<String>>,
    }

    impl MeshDelegate for NullDelegate {
        fn on_message_received(&self, message: crate::delegate::BitchatMessage) {
            self.received.lock().unwrap().push(message.text);
        }
        fn on_peer_list_updated(&self, _peers: Vec<PeerId>) {}
        fn on_channel_leave(&self, _channel: &str, _from: PeerId) {}
        fn on_delivery_ack(&self, _message_id: u64, _from: PeerId) {}
        fn on_read_receipt(&self, _message_id: u64, _from: PeerId) {}
        fn decrypt_channel_message(&self, _ciphertext: &[u8], _channel: &str) -> Option<String> {
            None
        }
        fn get_nickname(&self) -> Option<String> {
            None
        }
        fn is_favorite(&self, _peer_id: &PeerId) -> bool {
            false
        }
    }

    fn context() -> (Arc<DispatchContext>, mpsc::UnboundedReceiver<Outbound>) {
        let identity = Arc::new(LocalIdentity::generate(&mut OsRng, "local"));
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(DispatchContext {
            local_id: [1; 8],
            registry: Arc::new(PeerRegistry::new()),
            fragments: Arc::new(FragmentManager::new()),
            noise: Arc::new(NoiseSessions::new(identity)),
            security: Arc::new(Security::new(500, Duration::from_secs(300))),
            store_forward: Arc::new(StoreForward::new(100, Duration::from_secs(3600))),
            gossip: Arc::new(GossipSync::new(500)),
            delegate: Arc::new(NullDelegate { received: Mutex::new(Vec::new()) }),
            counters: Arc::new(DropCounters::new()),
            outbound: outbound_tx,
        });
        (ctx, outbound_rx)
    }

    #[tokio::test]
    async fn broadcast_message_is_processed_and_relayed() {
        let (ctx, mut outbound_rx) = context();
        let dispatcher = PacketDispatcher::new(Arc::clone(&ctx));

        let body = ChatMessageTlv { channel: None, text: "hi".into() };
        let packet = Packet::new_broadcast(message_type::MESSAGE, 5, now(), [2; 8], Bytes::from(body.encode()));
        dispatcher.dispatch(packet);

        let relayed = tokio::time::timeout(Duration::from_millis(500), outbound_rx.recv())
            .await
            .expect("relay should be emitted")
            .expect("channel open");
        match relayed {
            Outbound::Broadcast(p, _) => assert_eq!(p.ttl, 4),
            other => panic!("expected a broadcast relay, got {other:?}"),
        }
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn relay_carries_the_inbound_link_address() {
        let (ctx, mut outbound_rx) = context();
        let dispatcher = PacketDispatcher::new(Arc::clone(&ctx));

        let body = ChatMessageTlv { channel: None, text: "hi".into() };
        let packet = Packet::new_broadcast(message_type::MESSAGE, 5, now(), [2; 8], Bytes::from(body.encode()));
        dispatcher.dispatch_from(packet, Some("aa:bb".to_string()));

        let relayed = tokio::time::timeout(Duration::from_millis(500), outbound_rx.recv())
            .await
            .expect("relay should be emitted")
            .expect("channel open");
        match relayed {
            Outbound::Broadcast(_, relay_address) => assert_eq!(relay_address.as_deref(), Some("aa:bb")),
            other => panic!("expected a broadcast relay, got {other:?}"),
        }
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn one_worker_spawned_per_sender() {
        let (ctx, _rx) = context();
        let dispatcher = PacketDispatcher::new(ctx);
        let body = ChatMessageTlv { channel: None, text: "x".into() }.encode();
        dispatcher.dispatch(Packet::new_broadcast(message_type::MESSAGE, 1, now(), [2; 8], Bytes::from(body.clone())));
        dispatcher.dispatch(Packet::new_broadcast(message_type::MESSAGE, 1, now(), [3; 8], Bytes::from(body)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.active_worker_count(), 2);
        dispatcher.shutdown().await;
    }

    fn now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64
    }
}
