//! Network protocols spoken through a proxy.
//!
//! `socks` opens tunnelled streams, `whois` runs RFC 3912 queries over them.

/// SOCKS4/SOCKS5 tunnel establishment
pub mod socks;

/// WHOIS protocol implementation
pub mod whois;

pub use socks::{ProxyConnector, ProxyStream, SocksConnector};
pub use whois::{
    parse_iana_refer_response, parse_registrar_referral, ProxiedWhoisClient, WhoisLookup,
};
