//! Proxied TCP connections over SOCKS4 and SOCKS5.
//!
//! The rest of the library only sees the `ProxyConnector` trait, so tests and
//! alternative transports can stand in for the real SOCKS handshake.

use crate::error::{TransportError, TransportErrorKind};
use crate::proxy::{ProxyEndpoint, ProxyType};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_socks::tcp::{Socks4Stream, Socks5Stream};

/// A bidirectional byte stream routed through a proxy.
pub trait ProxyStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ProxyStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Opens TCP connections to a target through a given proxy.
#[async_trait]
pub trait ProxyConnector: Send + Sync {
    async fn open(
        &self,
        endpoint: &ProxyEndpoint,
        host: &str,
        port: u16,
    ) -> Result<Box<dyn ProxyStream>, TransportError>;
}

/// `ProxyConnector` backed by `tokio-socks`.
#[derive(Debug, Clone)]
pub struct SocksConnector {
    /// Timeout for the TCP connect plus SOCKS handshake
    connect_timeout: Duration,
}

impl SocksConnector {
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn handshake(
        endpoint: &ProxyEndpoint,
        host: &str,
        port: u16,
    ) -> Result<Box<dyn ProxyStream>, tokio_socks::Error> {
        let proxy = (endpoint.host.as_str(), endpoint.port);
        let target = (host, port);

        let stream: Box<dyn ProxyStream> = match (endpoint.proxy_type, &endpoint.auth) {
            (ProxyType::Socks5, Some(auth)) => Box::new(
                Socks5Stream::connect_with_password(proxy, target, &auth.username, &auth.password)
                    .await?,
            ),
            (ProxyType::Socks5, None) => Box::new(Socks5Stream::connect(proxy, target).await?),
            (ProxyType::Socks4, _) => Box::new(Socks4Stream::connect(proxy, target).await?),
        };
        Ok(stream)
    }
}

impl Default for SocksConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProxyConnector for SocksConnector {
    async fn open(
        &self,
        endpoint: &ProxyEndpoint,
        host: &str,
        port: u16,
    ) -> Result<Box<dyn ProxyStream>, TransportError> {
        let handshake = Self::handshake(endpoint, host, port);
        match tokio::time::timeout(self.connect_timeout, handshake).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(classify_socks_error(&e, endpoint, host, port)),
            Err(_) => Err(TransportError::timeout(
                &format!("SOCKS connect via {} to {}:{}", endpoint.address(), host, port),
                self.connect_timeout,
            )),
        }
    }
}

/// Map a `tokio-socks` failure onto the transport taxonomy.
///
/// Failures to reach or negotiate with the proxy itself are
/// `ProxyUnreachable`; replies saying the proxy could not reach the target
/// are `TargetUnreachable`.
fn classify_socks_error(
    err: &tokio_socks::Error,
    endpoint: &ProxyEndpoint,
    host: &str,
    port: u16,
) -> TransportError {
    use tokio_socks::Error;

    let kind = match err {
        Error::ProxyServerUnreachable
        | Error::Io(_)
        | Error::GeneralSocksServerFailure
        | Error::NoAcceptableAuthMethods
        | Error::PasswordAuthFailure(_)
        | Error::InvalidResponseVersion => TransportErrorKind::ProxyUnreachable,
        Error::HostUnreachable
        | Error::NetworkUnreachable
        | Error::ConnectionRefused
        | Error::ConnectionNotAllowedByRuleset
        | Error::TtlExpired => TransportErrorKind::TargetUnreachable,
        _ => TransportErrorKind::Protocol,
    };

    TransportError::new(
        kind,
        format!(
            "SOCKS error via {} to {}:{}: {}",
            endpoint.address(),
            host,
            port,
            err
        ),
    )
}
