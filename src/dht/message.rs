use super::error::DhtError;
use super::node::{Contact, NodeId};
use crate::bencode::{decode, encode, Value};
use bytes::Bytes;
use std::collections::BTreeMap;

/// One decoded datagram, reduced to what the crawler reacts to.
#[derive(Debug, Clone)]
pub enum Packet {
    Query(Query),
    Reply(Reply),
}

/// An inbound query (`y == "q"`).
#[derive(Debug, Clone)]
pub struct Query {
    /// Opaque transaction id, echoed verbatim in any reply.
    pub transaction_id: Bytes,
    pub kind: QueryKind,
    /// The full decoded message, carried into an accepted announcement.
    pub raw: BTreeMap<Bytes, Value>,
}

/// Closed set of query names the crawler recognizes.
#[derive(Debug, Clone)]
pub enum QueryKind {
    GetPeers {
        /// The requester's node id.
        id: NodeId,
    },
    AnnouncePeer {
        info_hash: [u8; 20],
        token: Bytes,
        port: Option<u16>,
        implied_port: Option<i64>,
    },
    /// A well-formed query we do not answer (`ping`, `find_node`,
    /// vendor extensions). Dispatch treats this as a no-op.
    Other,
}

/// An inbound reply or error (`y` in `r`/`e`). Only the compact node list
/// matters to the crawler; everything else is discarded at parse time.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub nodes: Vec<Contact>,
}

enum Class {
    Query,
    Reply,
}

impl Packet {
    /// Parses a raw datagram.
    ///
    /// Anything malformed is an error the dispatch loop drops; decode
    /// failures never propagate further.
    pub fn parse(data: &[u8]) -> Result<Packet, DhtError> {
        let dict = decode(data)?
            .into_dict()
            .ok_or_else(|| DhtError::InvalidMessage("not a dictionary".into()))?;

        let class = match dict.get(b"y".as_slice()).and_then(|v| v.as_str()) {
            Some("q") => Class::Query,
            Some("r") | Some("e") => Class::Reply,
            _ => return Err(DhtError::InvalidMessage("bad message class".into())),
        };

        match class {
            Class::Query => Self::parse_query(dict),
            Class::Reply => Ok(Packet::Reply(Self::parse_reply(&dict))),
        }
    }

    fn parse_query(dict: BTreeMap<Bytes, Value>) -> Result<Packet, DhtError> {
        let transaction_id = dict
            .get(b"t".as_slice())
            .and_then(|v| v.as_bytes())
            .cloned()
            .ok_or_else(|| DhtError::InvalidMessage("missing transaction id".into()))?;

        let name = dict
            .get(b"q".as_slice())
            .and_then(|v| v.as_str())
            .ok_or_else(|| DhtError::InvalidMessage("missing query name".into()))?;

        let args = dict
            .get(b"a".as_slice())
            .and_then(|v| v.as_dict())
            .ok_or_else(|| DhtError::InvalidMessage("missing query args".into()))?;

        let kind = match name {
            "get_peers" => {
                let id = args
                    .get(b"id".as_slice())
                    .and_then(|v| v.as_bytes())
                    .and_then(|b| NodeId::from_bytes(b).ok())
                    .ok_or_else(|| DhtError::InvalidMessage("missing requester id".into()))?;
                QueryKind::GetPeers { id }
            }
            "announce_peer" => {
                let info_hash = args
                    .get(b"info_hash".as_slice())
                    .and_then(|v| v.as_bytes())
                    .filter(|b| b.len() == 20)
                    .map(|b| {
                        let mut hash = [0u8; 20];
                        hash.copy_from_slice(b);
                        hash
                    })
                    .ok_or_else(|| DhtError::InvalidMessage("missing info_hash".into()))?;

                let token = args
                    .get(b"token".as_slice())
                    .and_then(|v| v.as_bytes())
                    .cloned()
                    .ok_or_else(|| DhtError::InvalidMessage("missing token".into()))?;

                let port = args
                    .get(b"port".as_slice())
                    .and_then(|v| v.as_integer())
                    .and_then(|p| u16::try_from(p).ok());

                let implied_port = args
                    .get(b"implied_port".as_slice())
                    .and_then(|v| v.as_integer());

                QueryKind::AnnouncePeer {
                    info_hash,
                    token,
                    port,
                    implied_port,
                }
            }
            _ => QueryKind::Other,
        };

        Ok(Packet::Query(Query {
            transaction_id,
            kind,
            raw: dict,
        }))
    }

    fn parse_reply(dict: &BTreeMap<Bytes, Value>) -> Reply {
        let nodes = dict
            .get(b"r".as_slice())
            .and_then(|v| v.get(b"nodes"))
            .and_then(|v| v.as_bytes())
            .map(|data| Contact::decode_list(data))
            .unwrap_or_default();

        Reply { nodes }
    }
}

/// Encodes a `find_node` query claiming the forged `id`.
pub fn find_node_query(
    transaction_id: &[u8],
    id: &NodeId,
    target: &NodeId,
) -> Result<Vec<u8>, DhtError> {
    let mut args = BTreeMap::new();
    args.insert(
        Bytes::from_static(b"id"),
        Value::Bytes(Bytes::copy_from_slice(id.as_bytes())),
    );
    args.insert(
        Bytes::from_static(b"target"),
        Value::Bytes(Bytes::copy_from_slice(target.as_bytes())),
    );

    let mut dict = BTreeMap::new();
    dict.insert(
        Bytes::from_static(b"t"),
        Value::Bytes(Bytes::copy_from_slice(transaction_id)),
    );
    dict.insert(Bytes::from_static(b"y"), Value::string("q"));
    dict.insert(Bytes::from_static(b"q"), Value::string("find_node"));
    dict.insert(Bytes::from_static(b"a"), Value::Dict(args));

    Ok(encode(&Value::Dict(dict))?)
}

/// Encodes the reply to `get_peers`: an empty node list plus a token.
///
/// The crawler always claims ignorance while still handing out a valid
/// token, which primes the requester to send an `announce_peer` later.
pub fn get_peers_reply(
    transaction_id: &Bytes,
    id: &NodeId,
    token: &Bytes,
) -> Result<Vec<u8>, DhtError> {
    let mut values = BTreeMap::new();
    values.insert(
        Bytes::from_static(b"id"),
        Value::Bytes(Bytes::copy_from_slice(id.as_bytes())),
    );
    values.insert(Bytes::from_static(b"nodes"), Value::Bytes(Bytes::new()));
    values.insert(Bytes::from_static(b"token"), Value::Bytes(token.clone()));

    let mut dict = BTreeMap::new();
    dict.insert(
        Bytes::from_static(b"t"),
        Value::Bytes(transaction_id.clone()),
    );
    dict.insert(Bytes::from_static(b"y"), Value::string("r"));
    dict.insert(Bytes::from_static(b"r"), Value::Dict(values));

    Ok(encode(&Value::Dict(dict))?)
}
