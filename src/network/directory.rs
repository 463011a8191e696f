//! Room directory: find a host by a short room code
//!
//! The LAN implementation advertises the host over mDNS-SD with the room code
//! as the instance name.

use super::protocol::PROTOCOL_VERSION;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use rand::Rng;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// mDNS service type for Alias rooms
pub const SERVICE_TYPE: &str = "_alias._tcp.local.";

/// How long `resolve` browses before giving up
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Room directory failures
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("mDNS: {0}")]
    Mdns(#[from] mdns_sd::Error),
    #[error("no room {0} found on the network")]
    NotFound(String),
    #[error("room {0} is not registered here")]
    NotRegistered(String),
}

/// Maps room codes to host addresses
pub trait RoomDirectory {
    /// Publish a host address and get the code peers can join with
    fn register(&mut self, address: SocketAddr) -> Result<String, DirectoryError>;
    /// Look up the host address for a room code
    fn resolve(&mut self, code: &str) -> Result<SocketAddr, DirectoryError>;
    /// Withdraw a registered room
    fn remove(&mut self, code: &str) -> Result<(), DirectoryError>;
}

/// Generate a room code like "SWIFT-ORBIT"
pub fn generate_room_code() -> String {
    const ADJECTIVES: &[&str] = &[
        "SWIFT", "BOLD", "WILD", "FAST", "KEEN", "EPIC", "NOVA", "STAR", "CALM", "LOUD",
    ];
    const NOUNS: &[&str] = &[
        "ORBIT", "BLAZE", "STORM", "QUEST", "RUSH", "DASH", "BOLT", "ZOOM", "OWL", "FOX",
    ];

    let mut rng = rand::rng();
    let adj = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.random_range(0..NOUNS.len())];
    format!("{}-{}", adj, noun)
}

/// Normalize user-typed codes ("swift orbit" -> "SWIFT-ORBIT")
pub fn normalize_room_code(code: &str) -> String {
    code.split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .map(str::to_uppercase)
        .collect::<Vec<_>>()
        .join("-")
}

/// LAN room directory over mDNS-SD
pub struct MdnsDirectory {
    daemon: ServiceDaemon,
    session_id: String,
    registered: Vec<String>,
}

impl MdnsDirectory {
    pub fn new(session_id: &str) -> Result<Self, DirectoryError> {
        Ok(Self {
            daemon: ServiceDaemon::new()?,
            session_id: session_id.to_string(),
            registered: Vec::new(),
        })
    }

    /// Stop advertising everything and shut the daemon down
    pub fn shutdown(mut self) -> Result<(), DirectoryError> {
        for code in self.registered.clone() {
            self.remove(&code)?;
        }
        self.daemon.shutdown()?;
        Ok(())
    }
}

impl RoomDirectory for MdnsDirectory {
    fn register(&mut self, address: SocketAddr) -> Result<String, DirectoryError> {
        let code = generate_room_code();
        let version = PROTOCOL_VERSION.to_string();
        let properties = [
            ("version", version.as_str()),
            ("room", code.as_str()),
            ("session", self.session_id.as_str()),
        ];
        let hostname = format!("{}.local.", self.session_id);
        let service_info = ServiceInfo::new(
            SERVICE_TYPE,
            &code,
            &hostname,
            (),
            address.port(),
            &properties[..],
        )?
        .enable_addr_auto();

        self.daemon.register(service_info)?;
        self.registered.push(code.clone());
        info!(room = %code, port = address.port(), "room registered");
        Ok(code)
    }

    fn resolve(&mut self, code: &str) -> Result<SocketAddr, DirectoryError> {
        let code = normalize_room_code(code);
        let receiver = self.daemon.browse(SERVICE_TYPE)?;
        let deadline = Instant::now() + RESOLVE_TIMEOUT;

        let mut found = None;
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            let Ok(event) = receiver.recv_timeout(left) else {
                break;
            };
            if let ServiceEvent::ServiceResolved(info) = event {
                let room = info
                    .get_properties()
                    .get_property_val_str("room")
                    .unwrap_or_default();
                if room != code {
                    continue;
                }
                // IPv6 link-local addresses need a scope id, so prefer IPv4
                let mut addresses: Vec<IpAddr> =
                    info.get_addresses().iter().map(|a| a.to_ip_addr()).collect();
                addresses.sort_by_key(|addr| match addr {
                    IpAddr::V4(_) => 0,
                    IpAddr::V6(_) => 1,
                });
                if let Some(ip) = addresses.first() {
                    found = Some(SocketAddr::new(*ip, info.get_port()));
                    break;
                }
            }
        }
        let _ = self.daemon.stop_browse(SERVICE_TYPE);

        match found {
            Some(addr) => {
                debug!(room = %code, %addr, "room resolved");
                Ok(addr)
            }
            None => Err(DirectoryError::NotFound(code)),
        }
    }

    fn remove(&mut self, code: &str) -> Result<(), DirectoryError> {
        let pos = self
            .registered
            .iter()
            .position(|c| c == code)
            .ok_or_else(|| DirectoryError::NotRegistered(code.to_string()))?;
        self.registered.remove(pos);
        let fullname = format!("{}.{}", code, SERVICE_TYPE);
        // The returned receiver only reports unregister status; not needed
        let _ = self.daemon.unregister(&fullname)?;
        info!(room = %code, "room removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Directory held in a map, for exercising the contract
    #[derive(Default)]
    struct MapDirectory {
        rooms: HashMap<String, SocketAddr>,
    }

    impl RoomDirectory for MapDirectory {
        fn register(&mut self, address: SocketAddr) -> Result<String, DirectoryError> {
            let code = generate_room_code();
            self.rooms.insert(code.clone(), address);
            Ok(code)
        }

        fn resolve(&mut self, code: &str) -> Result<SocketAddr, DirectoryError> {
            let code = normalize_room_code(code);
            self.rooms
                .get(&code)
                .copied()
                .ok_or(DirectoryError::NotFound(code))
        }

        fn remove(&mut self, code: &str) -> Result<(), DirectoryError> {
            self.rooms
                .remove(code)
                .map(|_| ())
                .ok_or_else(|| DirectoryError::NotRegistered(code.to_string()))
        }
    }

    #[test]
    fn test_room_code_shape() {
        let code = generate_room_code();
        let parts: Vec<&str> = code.split('-').collect();
        assert_eq!(parts.len(), 2);
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c == '-'));
    }

    #[test]
    fn test_normalize_room_code() {
        assert_eq!(normalize_room_code("swift orbit"), "SWIFT-ORBIT");
        assert_eq!(normalize_room_code(" Bold-Blaze "), "BOLD-BLAZE");
        assert_eq!(normalize_room_code("epic_fox"), "EPIC-FOX");
    }

    #[test]
    fn test_directory_contract() {
        let mut directory = MapDirectory::default();
        let addr: SocketAddr = "192.168.1.20:55333".parse().unwrap();
        let code = directory.register(addr).unwrap();

        assert_eq!(directory.resolve(&code.to_lowercase()).unwrap(), addr);
        directory.remove(&code).unwrap();
        assert!(matches!(
            directory.resolve(&code),
            Err(DirectoryError::NotFound(_))
        ));
        assert!(matches!(
            directory.remove(&code),
            Err(DirectoryError::NotRegistered(_))
        ));
    }

    #[test]
    fn test_service_type_format() {
        assert!(SERVICE_TYPE.starts_with('_'));
        assert!(SERVICE_TYPE.ends_with(".local."));
    }
}
