//! DHT crawl engine (BEP-5 subset)
//!
//! A passive observation node for the mainline BitTorrent DHT. It keeps
//! widening its view of the swarm with `find_node` queries and harvests
//! `announce_peer` events into a bounded store. It is not a full DHT node:
//! no routing table, no iterative lookups, no persistence.

mod crawler;
mod error;
mod limiter;
mod message;
mod node;
mod store;
mod token;

pub use crawler::{Crawler, CrawlerConfig, BOOTSTRAP_NODES};
pub use error::DhtError;
pub use limiter::FriendsLimiter;
pub use message::{Packet, Query, QueryKind, Reply};
pub use node::{Contact, ContactAddr, NodeId};
pub use store::{Announcement, AnnouncementStore};
pub use token::TokenIssuer;

#[cfg(test)]
mod tests;
