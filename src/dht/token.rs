use bytes::Bytes;
use rand::Rng as _;
use sha1::{Digest, Sha1};
use std::net::IpAddr;

/// Issues and checks the opaque tokens handed out in `get_peers` replies.
///
/// A token is `Sha1(ip || secret)` under a process-lifetime random secret,
/// so validity is a pure function of the source address: no per-request
/// state is kept. The scheme deters casual off-path spoofing only. It is
/// deliberately not bound to a nonce or timestamp; mainline peers
/// re-announce with tokens that can be minutes old, and rotating the
/// secret would reject them.
pub struct TokenIssuer {
    secret: [u8; 20],
}

impl TokenIssuer {
    pub fn new() -> Self {
        let mut secret = [0u8; 20];
        rand::rng().fill(&mut secret);
        Self { secret }
    }

    /// Builds an issuer over a fixed secret, for deterministic tests.
    pub fn with_secret(secret: [u8; 20]) -> Self {
        Self { secret }
    }

    pub fn generate(&self, ip: IpAddr) -> Bytes {
        let mut hasher = Sha1::new();
        match ip {
            IpAddr::V4(v4) => hasher.update(v4.octets()),
            IpAddr::V6(v6) => hasher.update(v6.octets()),
        }
        hasher.update(self.secret);
        Bytes::copy_from_slice(&hasher.finalize())
    }

    pub fn validate(&self, token: &[u8], ip: IpAddr) -> bool {
        self.generate(ip).as_ref() == token
    }
}

impl Default for TokenIssuer {
    fn default() -> Self {
        Self::new()
    }
}
