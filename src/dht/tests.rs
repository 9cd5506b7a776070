use super::*;
use crate::bencode::{decode, encode, Value};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

fn localhost(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

fn compact_record(id: [u8; 20], addr: SocketAddr) -> Vec<u8> {
    let mut record = Vec::with_capacity(26);
    record.extend_from_slice(&id);
    match addr {
        SocketAddr::V4(v4) => {
            record.extend_from_slice(&v4.ip().octets());
            record.extend_from_slice(&v4.port().to_be_bytes());
        }
        SocketAddr::V6(_) => panic!("ipv4 only"),
    }
    record
}

fn encode_query(tid: &str, name: &str, args: BTreeMap<Bytes, Value>) -> Vec<u8> {
    let mut dict = BTreeMap::new();
    dict.insert(Bytes::from_static(b"t"), Value::string(tid));
    dict.insert(Bytes::from_static(b"y"), Value::string("q"));
    dict.insert(Bytes::from_static(b"q"), Value::string(name));
    dict.insert(Bytes::from_static(b"a"), Value::Dict(args));
    encode(&Value::Dict(dict)).unwrap()
}

fn sample_announcement(fill: u8) -> Announcement {
    let addr = localhost(6881);
    Announcement::new(BTreeMap::new(), addr, addr, [fill; 20])
}

#[test]
fn test_node_id_generate() {
    assert_ne!(NodeId::generate().0, NodeId::generate().0);
}

#[test]
fn test_node_id_from_bytes_length() {
    assert!(NodeId::from_bytes(&[1u8; 20]).is_ok());
    assert!(NodeId::from_bytes(&[1u8; 19]).is_err());
    assert!(NodeId::from_bytes(&[1u8; 21]).is_err());
}

#[test]
fn test_neighbor_id_prefix_and_suffix() {
    let target = NodeId([0xAB; 20]);
    let mut local_bytes = [0u8; 20];
    for (i, byte) in local_bytes.iter_mut().enumerate() {
        *byte = i as u8;
    }
    let local = NodeId(local_bytes);

    let forged = NodeId::neighbor(&target, &local);
    assert_eq!(&forged.0[..15], &target.0[..15]);
    assert_eq!(&forged.0[15..], &local.0[15..]);
}

#[test]
fn test_decode_list_rejects_unaligned_input() {
    assert!(Contact::decode_list(&[0u8; 1]).is_empty());
    assert!(Contact::decode_list(&[0u8; 25]).is_empty());
    assert!(Contact::decode_list(&[0u8; 27]).is_empty());
    assert!(Contact::decode_list(&[0u8; 53]).is_empty());
}

#[test]
fn test_decode_list_reconstructs_records() {
    let a = compact_record([0x01; 20], "10.1.2.3:6881".parse().unwrap());
    let b = compact_record([0x02; 20], "192.168.0.9:65535".parse().unwrap());
    let data: Vec<u8> = a.into_iter().chain(b).collect();

    let contacts = Contact::decode_list(&data);
    assert_eq!(contacts.len(), 2);

    assert_eq!(contacts[0].id.0, [0x01; 20]);
    match &contacts[0].addr {
        ContactAddr::Addr(addr) => assert_eq!(*addr, "10.1.2.3:6881".parse().unwrap()),
        other => panic!("unexpected addr {:?}", other),
    }

    assert_eq!(contacts[1].id.0, [0x02; 20]);
    match &contacts[1].addr {
        ContactAddr::Addr(addr) => assert_eq!(*addr, "192.168.0.9:65535".parse().unwrap()),
        other => panic!("unexpected addr {:?}", other),
    }
}

#[test]
fn test_decode_list_empty_input() {
    assert!(Contact::decode_list(&[]).is_empty());
}

#[test]
fn test_token_roundtrip() {
    let issuer = TokenIssuer::with_secret([7u8; 20]);
    let ip: IpAddr = "203.0.113.7".parse().unwrap();

    let token = issuer.generate(ip);
    assert_eq!(token.len(), 20);
    assert!(issuer.validate(&token, ip));
}

#[test]
fn test_token_differs_per_ip() {
    let issuer = TokenIssuer::with_secret([7u8; 20]);
    let a: IpAddr = "203.0.113.7".parse().unwrap();
    let b: IpAddr = "203.0.113.8".parse().unwrap();

    assert_ne!(issuer.generate(a), issuer.generate(b));
    assert!(!issuer.validate(&issuer.generate(a), b));
}

#[test]
fn test_token_bound_to_secret() {
    let ip: IpAddr = "198.51.100.1".parse().unwrap();
    let current = TokenIssuer::with_secret([1u8; 20]);
    let other = TokenIssuer::with_secret([2u8; 20]);

    assert!(!current.validate(&other.generate(ip), ip));
}

#[test]
fn test_limiter_burst_then_deny() {
    let limiter = FriendsLimiter::new(3);
    assert!(limiter.allow());
    assert!(limiter.allow());
    assert!(limiter.allow());
    assert!(!limiter.allow());
}

#[test]
fn test_limiter_refills_over_time() {
    let limiter = FriendsLimiter::new(1);
    assert!(limiter.allow());
    assert!(!limiter.allow());

    std::thread::sleep(Duration::from_millis(1100));
    assert!(limiter.allow());
    assert!(!limiter.allow());
}

#[test]
fn test_store_capacity_bound() {
    let store = AnnouncementStore::new(2);
    assert!(store.push(sample_announcement(1)));
    assert!(store.push(sample_announcement(2)));
    assert!(!store.push(sample_announcement(3)));
    assert_eq!(store.len(), 2);

    // FIFO: the refused entry never displaced anything.
    assert_eq!(store.pop().unwrap().info_hash, [1u8; 20]);
    assert_eq!(store.pop().unwrap().info_hash, [2u8; 20]);
    assert!(store.pop().is_none());
}

#[test]
fn test_announcement_hex() {
    let announcement = sample_announcement(0x11);
    assert_eq!(announcement.info_hash_hex, "11".repeat(20));
}

#[tokio::test]
async fn test_store_wakeup_coalesces() {
    let store = AnnouncementStore::new(8);
    store.push(sample_announcement(1));
    store.push(sample_announcement(2));

    // Two pushes, one stored permit.
    timeout(Duration::from_millis(100), store.ready())
        .await
        .expect("first wake-up");
    assert!(timeout(Duration::from_millis(100), store.ready())
        .await
        .is_err());

    assert_eq!(store.drain().len(), 2);
    assert!(store.is_empty());
}

#[test]
fn test_parse_get_peers_query() {
    let mut args = BTreeMap::new();
    args.insert(
        Bytes::from_static(b"id"),
        Value::Bytes(Bytes::copy_from_slice(&[0xAA; 20])),
    );
    let data = encode_query("aa", "get_peers", args);

    match Packet::parse(&data).unwrap() {
        Packet::Query(query) => {
            assert_eq!(query.transaction_id.as_ref(), b"aa");
            match query.kind {
                QueryKind::GetPeers { id } => assert_eq!(id.0, [0xAA; 20]),
                other => panic!("unexpected kind {:?}", other),
            }
        }
        other => panic!("unexpected packet {:?}", other),
    }
}

#[test]
fn test_parse_get_peers_requires_id() {
    let data = encode_query("aa", "get_peers", BTreeMap::new());
    assert!(Packet::parse(&data).is_err());
}

#[test]
fn test_parse_announce_peer_query() {
    let mut args = BTreeMap::new();
    args.insert(
        Bytes::from_static(b"info_hash"),
        Value::Bytes(Bytes::copy_from_slice(&[0x11; 20])),
    );
    args.insert(
        Bytes::from_static(b"token"),
        Value::Bytes(Bytes::from_static(b"tok")),
    );
    args.insert(Bytes::from_static(b"implied_port"), Value::Integer(0));
    args.insert(Bytes::from_static(b"port"), Value::Integer(7777));
    let data = encode_query("bb", "announce_peer", args);

    match Packet::parse(&data).unwrap() {
        Packet::Query(query) => match query.kind {
            QueryKind::AnnouncePeer {
                info_hash,
                token,
                port,
                implied_port,
            } => {
                assert_eq!(info_hash, [0x11; 20]);
                assert_eq!(token.as_ref(), b"tok");
                assert_eq!(port, Some(7777));
                assert_eq!(implied_port, Some(0));
            }
            other => panic!("unexpected kind {:?}", other),
        },
        other => panic!("unexpected packet {:?}", other),
    }
}

#[test]
fn test_parse_announce_peer_rejects_short_hash() {
    let mut args = BTreeMap::new();
    args.insert(
        Bytes::from_static(b"info_hash"),
        Value::Bytes(Bytes::from_static(b"short")),
    );
    args.insert(
        Bytes::from_static(b"token"),
        Value::Bytes(Bytes::from_static(b"tok")),
    );
    let data = encode_query("cc", "announce_peer", args);
    assert!(Packet::parse(&data).is_err());
}

#[test]
fn test_parse_unknown_query_is_noop_kind() {
    let mut args = BTreeMap::new();
    args.insert(
        Bytes::from_static(b"id"),
        Value::Bytes(Bytes::copy_from_slice(&[0x01; 20])),
    );
    let data = encode_query("dd", "ping", args);

    match Packet::parse(&data).unwrap() {
        Packet::Query(query) => assert!(matches!(query.kind, QueryKind::Other)),
        other => panic!("unexpected packet {:?}", other),
    }
}

#[test]
fn test_parse_reply_with_nodes() {
    let record = compact_record([0x05; 20], "10.0.0.5:1234".parse().unwrap());

    let mut reply = BTreeMap::new();
    reply.insert(
        Bytes::from_static(b"nodes"),
        Value::Bytes(Bytes::from(record)),
    );
    let mut dict = BTreeMap::new();
    dict.insert(Bytes::from_static(b"t"), Value::string("ee"));
    dict.insert(Bytes::from_static(b"y"), Value::string("r"));
    dict.insert(Bytes::from_static(b"r"), Value::Dict(reply));
    let data = encode(&Value::Dict(dict)).unwrap();

    match Packet::parse(&data).unwrap() {
        Packet::Reply(reply) => {
            assert_eq!(reply.nodes.len(), 1);
            assert_eq!(reply.nodes[0].id.0, [0x05; 20]);
        }
        other => panic!("unexpected packet {:?}", other),
    }
}

#[test]
fn test_parse_error_message_is_empty_reply() {
    let mut dict = BTreeMap::new();
    dict.insert(Bytes::from_static(b"t"), Value::string("ff"));
    dict.insert(Bytes::from_static(b"y"), Value::string("e"));
    dict.insert(
        Bytes::from_static(b"e"),
        Value::List(vec![Value::Integer(201), Value::string("generic")]),
    );
    let data = encode(&Value::Dict(dict)).unwrap();

    match Packet::parse(&data).unwrap() {
        Packet::Reply(reply) => assert!(reply.nodes.is_empty()),
        other => panic!("unexpected packet {:?}", other),
    }
}

#[test]
fn test_parse_rejects_garbage() {
    assert!(Packet::parse(b"").is_err());
    assert!(Packet::parse(b"not bencode").is_err());
    assert!(Packet::parse(b"i42e").is_err());
    assert!(Packet::parse(b"d1:y1:xe").is_err());
}

#[test]
fn test_find_node_query_shape() {
    let id = NodeId([0x0A; 20]);
    let target = NodeId([0x0B; 20]);
    let data = super::message::find_node_query(b"zz", &id, &target).unwrap();

    let value = decode(&data).unwrap();
    assert_eq!(value.get(b"y").and_then(|v| v.as_str()), Some("q"));
    assert_eq!(value.get(b"q").and_then(|v| v.as_str()), Some("find_node"));
    let args = value.get(b"a").unwrap();
    assert_eq!(
        args.get(b"id").and_then(|v| v.as_bytes()).unwrap().as_ref(),
        &[0x0A; 20]
    );
    assert_eq!(
        args.get(b"target")
            .and_then(|v| v.as_bytes())
            .unwrap()
            .as_ref(),
        &[0x0B; 20]
    );
}

async fn spawn_crawler(max_friends_per_sec: usize) -> (Arc<Crawler>, SocketAddr) {
    let config = CrawlerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        max_friends_per_sec,
        bootstraps: Vec::new(),
    };
    let crawler = Arc::new(Crawler::bind(config).await.unwrap());
    let addr = crawler.local_addr().unwrap();

    let engine = crawler.clone();
    tokio::spawn(async move {
        let _ = engine.run().await;
    });

    (crawler, addr)
}

async fn recv_datagram(socket: &UdpSocket) -> Vec<u8> {
    let mut buf = [0u8; 2048];
    let (len, _) = timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for datagram")
        .unwrap();
    buf[..len].to_vec()
}

#[tokio::test]
async fn test_get_peers_token_announce_roundtrip() {
    let (crawler, addr) = spawn_crawler(10).await;
    let store = crawler.announcements();

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let source = socket.local_addr().unwrap();

    let mut args = BTreeMap::new();
    args.insert(
        Bytes::from_static(b"id"),
        Value::Bytes(Bytes::copy_from_slice(&[0xAA; 20])),
    );
    socket
        .send_to(&encode_query("aa", "get_peers", args), addr)
        .await
        .unwrap();

    let reply = decode(&recv_datagram(&socket).await).unwrap();
    assert_eq!(reply.get(b"t").and_then(|v| v.as_str()), Some("aa"));
    assert_eq!(reply.get(b"y").and_then(|v| v.as_str()), Some("r"));

    let values = reply.get(b"r").unwrap();
    let nodes = values.get(b"nodes").and_then(|v| v.as_bytes()).unwrap();
    assert!(nodes.is_empty());

    // The crawler claims an id forged next to ours.
    let claimed = values.get(b"id").and_then(|v| v.as_bytes()).unwrap();
    assert_eq!(&claimed[..15], &[0xAA; 15]);

    let token = values.get(b"token").and_then(|v| v.as_bytes()).unwrap();
    assert_eq!(token.len(), 20);

    // Announce without implied_port: peer port must be the UDP source port.
    let mut args = BTreeMap::new();
    args.insert(
        Bytes::from_static(b"info_hash"),
        Value::Bytes(Bytes::copy_from_slice(&[0x11; 20])),
    );
    args.insert(Bytes::from_static(b"token"), Value::Bytes(token.clone()));
    socket
        .send_to(&encode_query("bb", "announce_peer", args), addr)
        .await
        .unwrap();

    timeout(Duration::from_secs(5), store.ready())
        .await
        .expect("announcement wake-up");
    let harvested = store.drain();
    assert_eq!(harvested.len(), 1);
    assert_eq!(harvested[0].info_hash, [0x11; 20]);
    assert_eq!(harvested[0].info_hash_hex, "11".repeat(20));
    assert_eq!(harvested[0].peer.port(), source.port());
    assert_eq!(harvested[0].peer.ip(), source.ip());
    assert_eq!(harvested[0].source, source);
    assert!(harvested[0].raw.contains_key(b"a".as_slice()));

    // implied_port of zero with an explicit port overrides the source port.
    let mut args = BTreeMap::new();
    args.insert(
        Bytes::from_static(b"info_hash"),
        Value::Bytes(Bytes::copy_from_slice(&[0x22; 20])),
    );
    args.insert(Bytes::from_static(b"token"), Value::Bytes(token.clone()));
    args.insert(Bytes::from_static(b"implied_port"), Value::Integer(0));
    args.insert(Bytes::from_static(b"port"), Value::Integer(7777));
    socket
        .send_to(&encode_query("cc", "announce_peer", args), addr)
        .await
        .unwrap();

    timeout(Duration::from_secs(5), store.ready())
        .await
        .expect("announcement wake-up");
    let harvested = store.drain();
    assert_eq!(harvested.len(), 1);
    assert_eq!(harvested[0].peer.port(), 7777);
}

#[tokio::test]
async fn test_announce_with_bad_token_is_dropped() {
    let (crawler, addr) = spawn_crawler(10).await;
    let store = crawler.announcements();

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let mut args = BTreeMap::new();
    args.insert(
        Bytes::from_static(b"info_hash"),
        Value::Bytes(Bytes::copy_from_slice(&[0x33; 20])),
    );
    args.insert(
        Bytes::from_static(b"token"),
        Value::Bytes(Bytes::from_static(b"forged")),
    );
    socket
        .send_to(&encode_query("aa", "announce_peer", args), addr)
        .await
        .unwrap();

    // Dispatch is serialized on the read loop: once the get_peers that
    // follows is answered, the announce has been processed.
    let mut args = BTreeMap::new();
    args.insert(
        Bytes::from_static(b"id"),
        Value::Bytes(Bytes::copy_from_slice(&[0x01; 20])),
    );
    socket
        .send_to(&encode_query("bb", "get_peers", args), addr)
        .await
        .unwrap();
    recv_datagram(&socket).await;

    assert!(store.is_empty());
}

#[tokio::test]
async fn test_reply_nodes_gated_by_limiter() {
    let (_crawler, addr) = spawn_crawler(1).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let here = socket.local_addr().unwrap();

    // Two well-formed records, both pointing back at us; burst is 1.
    let mut nodes = compact_record([0x42; 20], here);
    nodes.extend(compact_record([0x43; 20], here));

    let mut reply = BTreeMap::new();
    reply.insert(Bytes::from_static(b"nodes"), Value::Bytes(Bytes::from(nodes)));
    let mut dict = BTreeMap::new();
    dict.insert(Bytes::from_static(b"t"), Value::string("zz"));
    dict.insert(Bytes::from_static(b"y"), Value::string("r"));
    dict.insert(Bytes::from_static(b"r"), Value::Dict(reply));
    socket
        .send_to(&encode(&Value::Dict(dict)).unwrap(), addr)
        .await
        .unwrap();

    // Exactly one find_node comes back, aimed at the admitted contact.
    let query = decode(&recv_datagram(&socket).await).unwrap();
    assert_eq!(query.get(b"q").and_then(|v| v.as_str()), Some("find_node"));
    let args = query.get(b"a").unwrap();
    let claimed = args.get(b"id").and_then(|v| v.as_bytes()).unwrap();
    assert_eq!(&claimed[..15], &[0x42; 15]);
    let target = args.get(b"target").and_then(|v| v.as_bytes()).unwrap();
    assert_eq!(target.len(), 20);

    let mut buf = [0u8; 2048];
    assert!(
        timeout(Duration::from_millis(500), socket.recv_from(&mut buf))
            .await
            .is_err(),
        "second contact should have been dropped by the limiter"
    );
}
