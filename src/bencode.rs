//! Bencode encoding and decoding (BEP-3)
//!
//! Every DHT datagram is a bencoded dictionary. This module provides the
//! [`Value`] tree plus a strict [`decode`] and a canonical [`encode`].

mod decode;
mod encode;
mod error;
mod value;

pub use decode::decode;
pub use encode::encode;
pub use error::BencodeError;
pub use value::Value;
