use super::error::DhtError;
use super::limiter::FriendsLimiter;
use super::message::{self, Packet, Query, QueryKind, Reply};
use super::node::{Contact, ContactAddr, NodeId};
use super::store::{Announcement, AnnouncementStore};
use super::token::TokenIssuer;
use crate::bencode::Value;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Well-known public routers used to seed the crawl.
pub const BOOTSTRAP_NODES: &[&str] = &[
    "router.bittorrent.com:6881",
    "dht.transmissionbt.com:6881",
    "router.utorrent.com:6881",
];

/// Each seed is pushed this many times at startup, each with a fresh
/// random id. The seed's real id is unknown; any id triggers discovery.
const BOOTSTRAP_ROUNDS: usize = 3;

/// Receive buffer size; DHT datagrams are far smaller in practice.
const RECV_BUFFER: usize = 2048;

/// Announcement store capacity as a multiple of friends-per-second.
const STORE_CAPACITY_FACTOR: usize = 10;

#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Local UDP bind address.
    pub listen_addr: String,
    /// Rate (and burst) of newly discovered nodes admitted per second.
    /// Also sizes the announcement store at 10x this value.
    pub max_friends_per_sec: usize,
    /// `host:port` seed nodes.
    pub bootstraps: Vec<String>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:6881".to_string(),
            max_friends_per_sec: 200,
            bootstraps: BOOTSTRAP_NODES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// A passive DHT observation node.
///
/// The crawler is reactive and stateless between messages: it answers
/// `get_peers` with a forged neighboring id and a token, accepts
/// token-bearing `announce_peer` queries into the [`AnnouncementStore`],
/// and feeds nodes from reply compact lists through the rate limiter into
/// a discovery channel that a single task drains with `find_node` queries.
///
/// # Examples
///
/// ```no_run
/// use rsniff::dht::{Crawler, CrawlerConfig};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), rsniff::DhtError> {
/// let crawler = Arc::new(Crawler::bind(CrawlerConfig::default()).await?);
/// let store = crawler.announcements();
///
/// let engine = crawler.clone();
/// tokio::spawn(async move { engine.run().await });
///
/// store.ready().await;
/// for announcement in store.drain() {
///     println!("{}", announcement.info_hash_hex);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Crawler {
    socket: Arc<UdpSocket>,
    local_id: NodeId,
    tokens: TokenIssuer,
    limiter: FriendsLimiter,
    store: Arc<AnnouncementStore>,
    bootstraps: Vec<String>,
    discoveries: mpsc::Sender<Contact>,
    pending: Mutex<Option<mpsc::Receiver<Contact>>>,
    shutdown: watch::Sender<bool>,
}

impl Crawler {
    /// Binds the UDP socket and assembles the crawl state.
    pub async fn bind(config: CrawlerConfig) -> Result<Self, DhtError> {
        let socket = UdpSocket::bind(&config.listen_addr).await?;
        let local_addr = socket.local_addr()?;
        let local_id = NodeId::generate();

        // Capacity 1: a flood of discovered nodes stalls the read loop
        // rather than growing an unbounded frontier.
        let (discoveries, pending) = mpsc::channel(1);
        let (shutdown, _) = watch::channel(false);

        info!("dht crawler bound to {} with id {}", local_addr, local_id);

        Ok(Self {
            socket: Arc::new(socket),
            local_id,
            tokens: TokenIssuer::new(),
            limiter: FriendsLimiter::new(config.max_friends_per_sec),
            store: Arc::new(AnnouncementStore::new(
                config.max_friends_per_sec * STORE_CAPACITY_FACTOR,
            )),
            bootstraps: config.bootstraps,
            discoveries,
            pending: Mutex::new(Some(pending)),
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DhtError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    /// The store harvested announcements land in.
    ///
    /// The consumer should wait on [`AnnouncementStore::ready`] and drain
    /// everything on each wake-up; a saturated store drops new events.
    pub fn announcements(&self) -> Arc<AnnouncementStore> {
        self.store.clone()
    }

    /// Resolves once the transport has died.
    pub async fn closed(&self) {
        let mut shutdown = self.shutdown.subscribe();
        while !*shutdown.borrow_and_update() {
            if shutdown.changed().await.is_err() {
                return;
            }
        }
    }

    /// Drives the crawl until the socket fails.
    ///
    /// Spawns the bootstrap and discovery tasks, then reads and dispatches
    /// datagrams inline on this task. The first socket read error tears
    /// everything down: both helper tasks observe the shutdown signal and
    /// exit, and the error is returned to the caller.
    pub async fn run(&self) -> Result<(), DhtError> {
        let receiver = self
            .pending
            .lock()
            .take()
            .ok_or(DhtError::AlreadyRunning)?;

        let bootstrap = tokio::spawn(bootstrap_task(
            self.bootstraps.clone(),
            self.discoveries.clone(),
            self.shutdown.subscribe(),
        ));
        let discovery = tokio::spawn(discovery_task(
            self.socket.clone(),
            self.local_id,
            receiver,
            self.shutdown.subscribe(),
        ));

        let mut buf = vec![0u8; RECV_BUFFER];
        let result = loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, from)) => match Packet::parse(&buf[..len]) {
                    Ok(packet) => self.dispatch(packet, from).await,
                    Err(e) => debug!("dropping datagram from {}: {}", from, e),
                },
                Err(e) => break Err(DhtError::Io(e)),
            }
        };

        // Unblocks the helper tasks, including any parked channel send.
        let _ = self.shutdown.send(true);
        let _ = bootstrap.await;
        let _ = discovery.await;

        result
    }

    async fn dispatch(&self, packet: Packet, from: SocketAddr) {
        match packet {
            Packet::Query(query) => self.on_query(query, from).await,
            Packet::Reply(reply) => self.on_reply(reply).await,
        }
    }

    async fn on_query(&self, query: Query, from: SocketAddr) {
        let Query {
            transaction_id,
            kind,
            raw,
        } = query;

        match kind {
            QueryKind::GetPeers { id } => self.on_get_peers(&transaction_id, &id, from).await,
            QueryKind::AnnouncePeer {
                info_hash,
                token,
                port,
                implied_port,
            } => self.on_announce_peer(info_hash, token, port, implied_port, raw, from),
            QueryKind::Other => {}
        }
    }

    /// Answers `get_peers` claiming to know nothing: empty node list, an id
    /// forged next to the requester's, and a token that authorizes a later
    /// announce from the same address.
    async fn on_get_peers(&self, transaction_id: &Bytes, requester: &NodeId, from: SocketAddr) {
        let id = NodeId::neighbor(requester, &self.local_id);
        let token = self.tokens.generate(from.ip());

        match message::get_peers_reply(transaction_id, &id, &token) {
            Ok(data) => {
                let _ = self.socket.send_to(&data, from).await;
            }
            Err(e) => debug!("failed to encode get_peers reply: {}", e),
        }
    }

    /// Harvests an `announce_peer`. Dropped silently when the store is
    /// full or the token does not match the source address; no reply is
    /// ever sent.
    fn on_announce_peer(
        &self,
        info_hash: [u8; 20],
        token: Bytes,
        port: Option<u16>,
        implied_port: Option<i64>,
        raw: BTreeMap<Bytes, Value>,
        from: SocketAddr,
    ) {
        if self.store.is_full() {
            return;
        }

        if !self.tokens.validate(&token, from.ip()) {
            debug!("dropping announce from {}: bad token", from);
            return;
        }

        // The peer serves on the UDP source port unless implied_port is
        // present and zero with an explicit port given.
        let peer_port = match (implied_port, port) {
            (Some(0), Some(explicit)) => explicit,
            _ => from.port(),
        };
        let peer = SocketAddr::new(from.ip(), peer_port);

        let announcement = Announcement::new(raw, from, peer, info_hash);
        debug!("harvested {} from {}", announcement.info_hash_hex, from);
        self.store.push(announcement);
    }

    /// Feeds nodes from a reply's compact list through the limiter into
    /// the discovery channel.
    ///
    /// The send stalls the read loop when the discovery task is behind;
    /// the socket buffer absorbs the difference or datagrams are lost.
    async fn on_reply(&self, reply: Reply) {
        for contact in reply.nodes {
            if !self.limiter.allow() {
                continue;
            }

            if self.discoveries.send(contact).await.is_err() {
                return;
            }
        }
    }
}

async fn bootstrap_task(
    seeds: Vec<String>,
    discoveries: mpsc::Sender<Contact>,
    mut shutdown: watch::Receiver<bool>,
) {
    for _ in 0..BOOTSTRAP_ROUNDS {
        for seed in &seeds {
            let contact = Contact {
                id: NodeId::generate(),
                addr: ContactAddr::Name(seed.clone()),
            };

            tokio::select! {
                result = discoveries.send(contact) => {
                    if result.is_err() {
                        return;
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    }
}

/// The sole origin of outbound `find_node` queries: takes contacts off the
/// discovery channel one at a time and fires a query at each, claiming an
/// id forged next to the contact's own.
async fn discovery_task(
    socket: Arc<UdpSocket>,
    local_id: NodeId,
    mut discoveries: mpsc::Receiver<Contact>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let contact = tokio::select! {
            contact = discoveries.recv() => match contact {
                Some(contact) => contact,
                None => return,
            },
            _ = shutdown.changed() => return,
        };

        let Some(addr) = contact.addr.resolve().await else {
            debug!("could not resolve {:?}", contact.addr);
            continue;
        };

        let transaction_id: [u8; 2] = rand::random();
        let id = NodeId::neighbor(&contact.id, &local_id);
        let target = NodeId::generate();

        match message::find_node_query(&transaction_id, &id, &target) {
            Ok(data) => {
                let _ = socket.send_to(&data, addr).await;
            }
            Err(e) => debug!("failed to encode find_node: {}", e),
        }
    }
}
