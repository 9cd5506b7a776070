//! rsniff - a passive BitTorrent DHT crawler
//!
//! Joins the mainline DHT as an always-expanding observation node and
//! harvests `announce_peer` events: which infohashes peers are currently
//! sharing, and where those peers can be reached. It downloads nothing,
//! keeps no routing table, and answers every `get_peers` with an empty
//! node list plus a valid token, priming the requester to announce to it.
//!
//! # Modules
//!
//! - [`bencode`] - BEP-3 bencode encoding/decoding
//! - [`dht`] - the crawl engine, wire codec, token scheme and harvest queue
//!
//! # Example
//!
//! ```no_run
//! use rsniff::{Crawler, CrawlerConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), rsniff::DhtError> {
//! let crawler = Arc::new(Crawler::bind(CrawlerConfig::default()).await?);
//! let store = crawler.announcements();
//!
//! let engine = crawler.clone();
//! tokio::spawn(async move { engine.run().await });
//!
//! loop {
//!     store.ready().await;
//!     for announcement in store.drain() {
//!         println!("{} {}", announcement.info_hash_hex, announcement.peer);
//!     }
//! }
//! # }
//! ```

pub mod bencode;
pub mod dht;

pub use bencode::{decode, encode, BencodeError, Value};
pub use dht::{
    Announcement, AnnouncementStore, Contact, ContactAddr, Crawler, CrawlerConfig, DhtError,
    FriendsLimiter, NodeId, Packet, Query, QueryKind, Reply, TokenIssuer,
};
