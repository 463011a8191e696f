//! TCP connector for joining a room

use super::peer::TcpChannel;
use super::server::{TcpHost, DEFAULT_PORT};
use super::{Channel, ChannelError, Connector, Listener};
use std::net::{SocketAddr, ToSocketAddrs};
use tracing::debug;

/// Opens TCP links and listeners
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&mut self, address: &str) -> Result<Box<dyn Channel>, ChannelError> {
        let addr = parse_address(address)?;
        debug!(%addr, "connecting");
        Ok(Box::new(TcpChannel::connect(addr)))
    }

    fn bind(&mut self, port: u16) -> Result<Box<dyn Listener>, ChannelError> {
        Ok(Box::new(TcpHost::bind(port)?))
    }
}

/// Parse an address string into a SocketAddr
///
/// Handles formats:
/// - "192.168.1.100:55333" -> parse directly
/// - "192.168.1.100" -> add default port
/// - "hostname:55333" -> resolve and use port
/// - "hostname" -> resolve and use default port
pub fn parse_address(addr: &str) -> Result<SocketAddr, ChannelError> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(ChannelError::InvalidAddress(addr.to_string()));
    }
    let with_port = if addr.contains(':') {
        addr.to_string()
    } else {
        format!("{}:{}", addr, DEFAULT_PORT)
    };
    with_port
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ChannelError::InvalidAddress(addr.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::Envelope;
    use crate::network::ChannelEvent;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_parse_address_with_port() {
        let addr = parse_address("127.0.0.1:55333").unwrap();
        assert_eq!(addr.port(), 55333);
    }

    #[test]
    fn test_parse_address_without_port() {
        let addr = parse_address("127.0.0.1").unwrap();
        assert_eq!(addr.port(), DEFAULT_PORT);
    }

    #[test]
    fn test_parse_address_rejects_empty() {
        assert!(matches!(
            parse_address("  "),
            Err(ChannelError::InvalidAddress(_))
        ));
        assert!(parse_address("127.0.0.1:notaport").is_err());
    }

    #[test]
    fn test_connector_links_to_host() {
        let mut connector = TcpConnector;
        let mut host = connector.bind(55430).unwrap();
        let port = host.local_addr().rsplit(':').next().unwrap().to_string();

        let mut client = connector.connect(&format!("127.0.0.1:{}", port)).unwrap();
        let mut accepted = Vec::new();
        let mut client_events = Vec::new();
        for _ in 0..40 {
            accepted.extend(host.accept());
            client_events.extend(client.poll());
            if !accepted.is_empty() && !client_events.is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        assert!(matches!(client_events.first(), Some(ChannelEvent::Open)));
        assert_eq!(accepted.len(), 1);

        client.send(&Envelope::Keepalive { sent_at_ms: 3 }).unwrap();
        let server = &mut accepted[0];
        let mut received = Vec::new();
        for _ in 0..40 {
            received.extend(server.poll());
            if received.len() >= 2 {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        assert!(received
            .iter()
            .any(|e| matches!(e, ChannelEvent::Data(Envelope::Keepalive { sent_at_ms: 3 }))));
    }
}
