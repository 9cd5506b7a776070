use super::error::DhtError;
use rand::Rng as _;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::lookup_host;

/// Bytes of shared prefix copied from the target when forging a
/// neighboring identity.
const CLOSENESS: usize = 15;

/// Size of one compact node record: 20-byte id, IPv4 octets, port.
const COMPACT_NODE_LEN: usize = 26;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub [u8; 20]);

impl NodeId {
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        rand::rng().fill(&mut id);
        Self(id)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DhtError> {
        if bytes.len() != 20 {
            return Err(DhtError::InvalidNodeId);
        }
        let mut id = [0u8; 20];
        id.copy_from_slice(bytes);
        Ok(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Forges an id adjacent to `target`: the first 15 bytes come from
    /// `target`, the last 5 from `local`. Standard nodes judge closeness
    /// by shared prefix, so presenting this id keeps them talking to us.
    /// Not a real XOR-metric computation.
    pub fn neighbor(target: &NodeId, local: &NodeId) -> NodeId {
        let mut id = [0u8; 20];
        id[..CLOSENESS].copy_from_slice(&target.0[..CLOSENESS]);
        id[CLOSENESS..].copy_from_slice(&local.0[CLOSENESS..]);
        NodeId(id)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// One crawl target: a node we intend to send a `find_node` to.
///
/// Contacts are ephemeral. They flow once through the discovery channel
/// and are consumed; nothing is retained or retried.
#[derive(Debug, Clone)]
pub struct Contact {
    pub id: NodeId,
    pub addr: ContactAddr,
}

/// Where a contact can be reached.
#[derive(Debug, Clone)]
pub enum ContactAddr {
    /// Already-resolved address from a compact node record.
    Addr(SocketAddr),
    /// A `host:port` seed string, resolved on use.
    Name(String),
}

impl ContactAddr {
    /// Resolves to a socket address, or `None` when resolution fails.
    pub async fn resolve(&self) -> Option<SocketAddr> {
        match self {
            ContactAddr::Addr(addr) => Some(*addr),
            ContactAddr::Name(name) => lookup_host(name.as_str()).await.ok()?.next(),
        }
    }
}

impl From<SocketAddr> for ContactAddr {
    fn from(addr: SocketAddr) -> Self {
        ContactAddr::Addr(addr)
    }
}

impl Contact {
    /// Decodes a compact node list: back-to-back 26-byte records of
    /// 20-byte id, IPv4 octets and big-endian port.
    ///
    /// A total length that is not a multiple of 26 yields an empty list;
    /// partial records are never produced.
    pub fn decode_list(data: &[u8]) -> Vec<Contact> {
        if data.len() % COMPACT_NODE_LEN != 0 {
            return Vec::new();
        }

        data.chunks_exact(COMPACT_NODE_LEN)
            .filter_map(|record| {
                let id = NodeId::from_bytes(&record[..20]).ok()?;
                let ip = Ipv4Addr::new(record[20], record[21], record[22], record[23]);
                let port = u16::from_be_bytes([record[24], record[25]]);
                Some(Contact {
                    id,
                    addr: ContactAddr::Addr(SocketAddr::new(IpAddr::V4(ip), port)),
                })
            })
            .collect()
    }
}
