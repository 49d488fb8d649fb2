//! `MeshCore` (C11): the engine root. Owns every component, every
//! registered [`Transport`], and the periodic background tasks (announce,
//! peer/fragment/store-forward GC). Exposes the public send/receive API
//! (§4.11).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bitchat_codec::constants::message_type;
use bitchat_codec::{ChatMessageTlv, IdentityAnnouncement, Packet};
use bitchat_crypto::LocalIdentity;
use bytes::Bytes;
use once_cell::sync::OnceCell;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::config::MeshConfig;
use crate::delegate::MeshDelegate;
use crate::dispatcher::{DispatchContext, Outbound, PacketDispatcher};
use crate::error::DropCounters;
use crate::fragment::FragmentManager;
use crate::gossip::GossipSync;
use crate::noise_sessions::NoiseSessions;
use crate::peer_registry::{PeerRegistry, PeerRemovedDelegate};
use crate::security::Security;
use crate::store_forward::StoreForward;
use crate::transport::{InboundEvent, RoutedPacket, Transport};
use crate::types::PeerId;

/// Process-wide accessor for the running engine (§9's "no cyclic `Weak`
/// references back into `MeshCore`" guidance): a single `OnceCell`, never
/// implicitly populated. Hosts that need a global handle (e.g. an FFI
/// boundary) call [`MeshServiceHolder::install`] once at startup.
pub struct MeshServiceHolder;

static MESH_SERVICE: OnceCell<Arc<MeshCore>> = OnceCell::new();

impl MeshServiceHolder {
    pub fn install(mesh: Arc<MeshCore>) -> Result<(), Arc<MeshCore>> {
        MESH_SERVICE.set(mesh)
    }

    pub fn get() -> Option<Arc<MeshCore>> {
        MESH_SERVICE.get().cloned()
    }

    pub fn is_installed() -> bool {
        MESH_SERVICE.get().is_some()
    }
}

struct RegistryGcDelegate;
impl PeerRemovedDelegate for RegistryGcDelegate {
    fn on_peer_removed(&self, peer_id: PeerId) {
        info!(?peer_id, "peer garbage collected");
    }
}

pub struct MeshCore {
    config: MeshConfig,
    identity: Arc<LocalIdentity>,
    local_id: PeerId,

    registry: Arc<PeerRegistry>,
    fragments: Arc<FragmentManager>,
    noise: Arc<NoiseSessions>,
    security: Arc<Security>,
    store_forward: Arc<StoreForward>,
    gossip: Arc<GossipSync>,
    counters: Arc<DropCounters>,
    delegate: Arc<dyn MeshDelegate>,

    transports: Vec<Arc<dyn Transport>>,
    dispatcher: Arc<PacketDispatcher>,

    outbound_rx_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    periodic_tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl MeshCore {
    pub fn new(
        config: MeshConfig,
        identity: LocalIdentity,
        local_id: PeerId,
        delegate: Arc<dyn MeshDelegate>,
        transports: Vec<Arc<dyn Transport>>,
    ) -> Arc<Self> {
        let identity = Arc::new(identity);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let ctx = Arc::new(DispatchContext {
            local_id,
            registry: Arc::new(PeerRegistry::new()),
            fragments: Arc::new(FragmentManager::new()),
            noise: Arc::new(NoiseSessions::new(Arc::clone(&identity))),
            security: Arc::new(Security::new(config.seen_capacity, config.message_max_clock_skew())),
            store_forward: Arc::new(StoreForward::new(config.store_forward_max, config.store_forward_ttl())),
            gossip: Arc::new(GossipSync::new(config.gcs_max_bytes)),
            delegate: Arc::clone(&delegate),
            counters: Arc::new(DropCounters::new()),
            outbound: outbound_tx,
        });

        let dispatcher = Arc::new(PacketDispatcher::new(Arc::clone(&ctx)));

        let mesh = Arc::new(Self {
            config,
            identity,
            local_id,
            registry: Arc::clone(&ctx.registry),
            fragments: Arc::clone(&ctx.fragments),
            noise: Arc::clone(&ctx.noise),
            security: Arc::clone(&ctx.security),
            store_forward: Arc::clone(&ctx.store_forward),
            gossip: Arc::clone(&ctx.gossip),
            counters: Arc::clone(&ctx.counters),
            delegate,
            transports,
            dispatcher,
            outbound_rx_task: std::sync::Mutex::new(None),
            periodic_tasks: std::sync::Mutex::new(Vec::new()),
        });

        let relay_task = mesh.clone().spawn_outbound_relay(outbound_rx);
        *mesh.outbound_rx_task.lock().expect("outbound task mutex poisoned") = Some(relay_task);

        mesh
    }

    /// Starts every periodic background task (§4.11, §5): announce,
    /// peer/fragment GC, and store-forward cleanup.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.periodic_tasks.lock().expect("periodic tasks mutex poisoned");

        let announce_mesh = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(announce_mesh.config.announce_interval());
            loop {
                ticker.tick().await;
                announce_mesh.send_announce();
            }
        }));

        let gc_mesh = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(gc_mesh.config.cleanup_interval());
            loop {
                ticker.tick().await;
                gc_mesh.registry.gc_stale_peers(gc_mesh.config.stale_peer(), &RegistryGcDelegate);
                gc_mesh.store_forward.gc();
            }
        }));

        let fragment_gc_mesh = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            loop {
                ticker.tick().await;
                fragment_gc_mesh.fragments.gc(fragment_gc_mesh.config.fragment_timeout());
            }
        }));
    }

    /// Stops periodic tasks and drains the dispatcher (§5's shutdown
    /// contract).
    pub async fn stop(&self) {
        for handle in self.periodic_tasks.lock().expect("periodic tasks mutex poisoned").drain(..) {
            handle.abort();
        }
        self.dispatcher.shutdown().await;
        if let Some(handle) = self.outbound_rx_task.lock().expect("outbound task mutex poisoned").take() {
            handle.abort();
        }
    }

    /// Feeds one inbound event from a transport into the dispatcher.
    #[instrument(skip(self, packet))]
    pub fn process_incoming(&self, packet: Packet) {
        self.dispatcher.dispatch(packet);
    }

    /// Like [`Self::process_incoming`], but also records the link the
    /// packet arrived on (§4.9's relay loop avoidance).
    #[instrument(skip(self, packet))]
    pub fn process_incoming_from(&self, from_address: String, packet: Packet) {
        self.dispatcher.dispatch_from(packet, Some(from_address));
    }

    pub fn send_message(&self, content: &str, channel: Option<String>) {
        let body = ChatMessageTlv { channel, text: content.to_string() }.encode();
        let packet = self.sign(Packet::new_broadcast(message_type::MESSAGE, self.config.max_ttl, now_millis(), self.local_id, Bytes::from(body)));
        self.broadcast(packet, None);
    }

    pub fn send_private(&self, content: &str, recipient: PeerId, message_id: u64) -> bool {
        if !self.noise.has_established(&recipient) {
            return false;
        }
        let payload = bitchat_codec::payloads::NoisePayload::PrivateMessage(bitchat_codec::payloads::PrivateMessageTlv {
            message_id,
            text: content.to_string(),
        })
        .encode();
        let Some(ciphertext) = self.noise.encrypt(&recipient, &payload) else {
            return false;
        };
        let packet = Packet::new_unicast(
            message_type::NOISE_ENCRYPTED,
            self.config.max_ttl,
            now_millis(),
            self.local_id,
            recipient,
            Bytes::from(ciphertext),
        );
        self.send_or_cache(packet, recipient);
        true
    }

    pub fn send_read_receipt(&self, message_id: u64, recipient: PeerId) -> bool {
        let payload = bitchat_codec::payloads::NoisePayload::ReadReceipt { message_id }.encode();
        let Some(ciphertext) = self.noise.encrypt(&recipient, &payload) else {
            return false;
        };
        let packet = Packet::new_unicast(
            message_type::NOISE_ENCRYPTED,
            self.config.max_ttl,
            now_millis(),
            self.local_id,
            recipient,
            Bytes::from(ciphertext),
        );
        self.send_or_cache(packet, recipient);
        true
    }

    pub fn send_announce(&self) {
        let announcement = IdentityAnnouncement {
            nickname: self.delegate.get_nickname().unwrap_or_else(|| self.identity.nickname().to_string()),
            signing_public_key: self.identity.verifying_key().to_bytes(),
            x25519_public_key: *self.identity.x25519_public().as_bytes(),
        };
        let packet = self.sign(Packet::new_broadcast(
            message_type::ANNOUNCE,
            self.config.max_ttl,
            now_millis(),
            self.local_id,
            Bytes::from(announcement.encode()),
        ));
        self.broadcast(packet, None);
    }

    pub fn send_announcement_to(&self, peer_id: PeerId) {
        let announcement = IdentityAnnouncement {
            nickname: self.delegate.get_nickname().unwrap_or_else(|| self.identity.nickname().to_string()),
            signing_public_key: self.identity.verifying_key().to_bytes(),
            x25519_public_key: *self.identity.x25519_public().as_bytes(),
        };
        let packet = self.sign(Packet::new_unicast(
            message_type::ANNOUNCE,
            self.config.max_ttl,
            now_millis(),
            self.local_id,
            peer_id,
            Bytes::from(announcement.encode()),
        ));
        self.send_to_transports(peer_id, packet);
    }

    pub fn send_file_broadcast(&self, file_name: &str, mime_type: &str, data: Vec<u8>) {
        let payload = bitchat_codec::payloads::FileTransferTlv {
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
            data,
        }
        .encode();
        let packet = self.sign(Packet::new_broadcast(message_type::FILE_TRANSFER, self.config.max_ttl, now_millis(), self.local_id, Bytes::from(payload)));
        self.broadcast(packet, None);
    }

    pub fn send_file_private(&self, peer_id: PeerId, file_name: &str, mime_type: &str, data: Vec<u8>) -> bool {
        let inner = bitchat_codec::payloads::NoisePayload::FileTransfer(bitchat_codec::payloads::FileTransferTlv {
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
            data,
        })
        .encode();
        let Some(ciphertext) = self.noise.encrypt(&peer_id, &inner) else {
            return false;
        };
        let packet = Packet::new_unicast(message_type::NOISE_ENCRYPTED, self.config.max_ttl, now_millis(), self.local_id, peer_id, Bytes::from(ciphertext));
        self.send_or_cache(packet, peer_id);
        true
    }

    pub fn cancel_file_transfer(&self, transfer_id: &str) -> bool {
        self.transports.iter().any(|t| t.cancel_transfer(transfer_id))
    }

    /// Drains every packet `StoreForward` cached for `peer_id` and sends
    /// them in ascending-timestamp order with ~100ms spacing (§4.6, S5),
    /// so a just-reconnected favorite doesn't get its whole backlog at
    /// once. Runs on its own task since the spacing is a real sleep.
    pub fn flush_cached_for(self: &Arc<Self>, peer_id: PeerId) {
        let mesh = Arc::clone(self);
        tokio::spawn(async move {
            let cached = mesh.store_forward.send_cached(&peer_id);
            let mut first = true;
            for packet in cached {
                if !first {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                first = false;
                mesh.send_to_transports(peer_id, packet);
            }
        });
    }

    pub fn drop_counters(&self) -> crate::error::DropCountersSnapshot {
        self.counters.snapshot()
    }

    /// Every outbound packet except `NOISE_ENCRYPTED` is signed with the
    /// local Ed25519 identity key (§6.2's signing policy — encrypted
    /// payloads authenticate themselves via the AEAD tag instead).
    fn sign(&self, mut packet: Packet) -> Packet {
        if packet.packet_type != message_type::NOISE_ENCRYPTED {
            let signature = self.identity.sign(&packet.to_binary_for_signing());
            packet.signature = Some(signature.to_bytes());
        }
        packet
    }

    /// Encodes `packet` and, if it exceeds `config.fragment_threshold`,
    /// splits it into signed `FRAGMENT_START/CONTINUE/END` packets instead
    /// (§4.3); otherwise returns it unchanged. Preserves the original's
    /// `ttl`, `sender_id`, `timestamp`, and (for unicast packets)
    /// `recipient_id`, since fragments of a private message must still
    /// route to the same peer.
    fn fragment_or_pass(&self, packet: Packet) -> Vec<Packet> {
        let encoded = bitchat_codec::wire::encode(&packet);
        let frames = self.fragments.create_fragments(&encoded, packet.packet_type, self.config.fragment_threshold);
        if frames.is_empty() {
            return vec![packet];
        }
        let total = frames.len();
        frames
            .into_iter()
            .enumerate()
            .map(|(i, frame)| {
                let outer_type = if i == 0 {
                    message_type::FRAGMENT_START
                } else if i + 1 == total {
                    message_type::FRAGMENT_END
                } else {
                    message_type::FRAGMENT_CONTINUE
                };
                let payload = Bytes::from(frame.encode());
                let outer = match packet.recipient_id {
                    Some(recipient) if !packet.is_broadcast() => {
                        Packet::new_unicast(outer_type, packet.ttl, packet.timestamp, packet.sender_id, recipient, payload)
                    }
                    _ => Packet::new_broadcast(outer_type, packet.ttl, packet.timestamp, packet.sender_id, payload),
                };
                self.sign(outer)
            })
            .collect()
    }

    fn broadcast(&self, packet: Packet, relay_address: Option<String>) {
        for out in self.fragment_or_pass(packet) {
            for transport in &self.transports {
                let routed = match &relay_address {
                    Some(addr) => RoutedPacket::relayed_from(out.clone(), addr.clone()),
                    None => RoutedPacket::new(out.clone()),
                };
                transport.broadcast(routed);
            }
        }
    }

    fn send_to_transports(&self, peer_id: PeerId, packet: Packet) {
        for transport in &self.transports {
            if transport.send_to_peer(peer_id, packet.clone()) {
                return;
            }
        }
        warn!(?peer_id, "no transport could deliver packet");
    }

    /// Sends directly if a favorite-aware caller wants delivery; otherwise
    /// caches for later flush via `send_cached` (§4.6). Here we send best
    /// effort and additionally cache when the recipient is a favorite, so
    /// an offline peer still receives it once it reconnects. Oversize
    /// payloads are fragmented first so each frame is cached/sent on its
    /// own (§4.3).
    fn send_or_cache(&self, packet: Packet, recipient: PeerId) {
        let is_favorite = self.delegate.is_favorite(&recipient);
        for out in self.fragment_or_pass(packet) {
            if is_favorite {
                self.store_forward.cache(out.clone(), true);
            }
            self.send_to_transports(recipient, out);
        }
    }

    /// Sends our gossip filter to a newly direct-connected peer after
    /// `INITIAL_EXCHANGE_DELAY`, so a divergent `SeenSet` on either side
    /// converges after one exchange (§4.8, S6).
    fn schedule_gossip_exchange(self: &Arc<Self>, peer_id: PeerId) {
        let mesh = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(crate::gossip::INITIAL_EXCHANGE_DELAY).await;
            let packet = mesh.sign(mesh.gossip.on_new_peer_direct(mesh.local_id, peer_id, now_millis()));
            mesh.send_to_transports(peer_id, packet);
        });
    }

    fn spawn_outbound_relay(self: Arc<Self>, mut outbound_rx: mpsc::UnboundedReceiver<Outbound>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(item) = outbound_rx.recv().await {
                match item {
                    Outbound::Broadcast(packet, relay_address) => self.broadcast(packet, relay_address),
                    Outbound::ToPeer(peer_id, packet) => self.send_to_transports(peer_id, packet),
                }
            }
        })
    }
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Consumes one transport's merged `InboundEvent` stream, translating it
/// into `MeshCore::process_incoming` calls and peer bookkeeping. A host
/// builds the channel with [`crate::transport::inbound_channel`], hands the
/// sender half to its `Transport` impl(s), and spawns this with the
/// receiver half — kept free-standing so it can run on whatever task the
/// host prefers.
pub async fn run_inbound_loop(mesh: Arc<MeshCore>, mut rx: mpsc::UnboundedReceiver<InboundEvent>, address_peers: Arc<std::sync::Mutex<HashMap<String, PeerId>>>) {
    while let Some(event) = rx.recv().await {
        match event {
            InboundEvent::PacketReceived { from_address, packet } => mesh.process_incoming_from(from_address, packet),
            InboundEvent::PeerConnected { address } => {
                let peer_id = address_peers.lock().expect("address map mutex poisoned").get(&address).copied();
                if let Some(peer_id) = peer_id {
                    mesh.registry.set_direct(peer_id, true);
                    mesh.flush_cached_for(peer_id);
                    mesh.schedule_gossip_exchange(peer_id);
                }
            }
            InboundEvent::PeerDisconnected { address } => {
                if let Some(peer_id) = address_peers.lock().expect("address map mutex poisoned").get(&address) {
                    mesh.registry.set_direct(*peer_id, false);
                }
            }
            InboundEvent::RssiUpdate { address, rssi } => {
                if let Some(peer_id) = address_peers.lock().expect("address map mutex poisoned").get(&address) {
                    mesh.registry.update_rssi(*peer_id, rssi);
                }
            }
        }
    }
}
