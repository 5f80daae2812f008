use crate::error::{LedgerError, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

const TCP_WRITE_TIMEOUT: u64 = 1000;

/// Wire envelope: one JSON object per connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub addr_from: String,
    pub command: String,
    pub payload: Vec<u8>,
}

/// Outbound side of the node: fire-and-forget delivery of `command` + `payload`.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, command: &str, payload: &[u8]) -> Result<()>;
}

/// Drops everything. Used when a node has no peers.
pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
    fn broadcast(&self, command: &str, payload: &[u8]) -> Result<()> {
        debug!("Not broadcasting {command} ({} bytes), no peers", payload.len());
        Ok(())
    }
}

/// Sends a [`Package`] to every known peer over a fresh TCP connection.
pub struct TcpBroadcaster {
    node_addr: String,
    peers: Vec<String>,
}

impl TcpBroadcaster {
    /// Peers are deduplicated and sorted; our own address is skipped.
    pub fn new(node_addr: &str, peers: impl IntoIterator<Item = String>) -> TcpBroadcaster {
        let mut peers: Vec<String> = peers
            .into_iter()
            .filter(|peer| peer.as_str() != node_addr)
            .collect();
        peers.sort();
        peers.dedup();
        TcpBroadcaster {
            node_addr: node_addr.to_string(),
            peers,
        }
    }

    pub fn get_peers(&self) -> &[String] {
        self.peers.as_slice()
    }
}

impl Broadcaster for TcpBroadcaster {
    /// Fails only when there were peers and none of them could be reached.
    fn broadcast(&self, command: &str, payload: &[u8]) -> Result<()> {
        let pkg = Package {
            addr_from: self.node_addr.clone(),
            command: command.to_string(),
            payload: payload.to_vec(),
        };

        let mut failures = 0;
        for peer in &self.peers {
            if let Err(e) = send_data(peer, &pkg) {
                warn!("Failed to send {command} to {peer}: {e}");
                failures += 1;
            }
        }
        if !self.peers.is_empty() && failures == self.peers.len() {
            return Err(LedgerError::Network(format!(
                "no peer accepted {command}"
            )));
        }
        Ok(())
    }
}

pub fn send_data(addr: &str, pkg: &Package) -> Result<()> {
    let socket_addr: SocketAddr = addr
        .parse()
        .map_err(|e| LedgerError::Network(format!("Invalid peer address {addr}: {e}")))?;
    debug!("Sending {} to {addr}", pkg.command);

    let stream = TcpStream::connect_timeout(&socket_addr, Duration::from_millis(TCP_WRITE_TIMEOUT))
        .map_err(|e| LedgerError::Network(format!("Failed to connect to {addr}: {e}")))?;
    stream
        .set_write_timeout(Some(Duration::from_millis(TCP_WRITE_TIMEOUT)))
        .map_err(|e| LedgerError::Network(format!("Failed to set write timeout: {e}")))?;
    serde_json::to_writer(&stream, pkg)
        .map_err(|e| LedgerError::Network(format!("Failed to send data: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_peers_are_sorted_without_self() {
        let broadcaster = TcpBroadcaster::new(
            "127.0.0.1:3000",
            vec![
                "127.0.0.1:3002".to_string(),
                "127.0.0.1:3000".to_string(),
                "127.0.0.1:3001".to_string(),
                "127.0.0.1:3002".to_string(),
            ],
        );
        assert_eq!(broadcaster.get_peers(), ["127.0.0.1:3001", "127.0.0.1:3002"]);
    }

    #[test]
    fn test_broadcast_delivers_package() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let peer = listener.local_addr().unwrap().to_string();
        let receiver = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            serde_json::from_reader::<_, Package>(stream).unwrap()
        });

        let broadcaster = TcpBroadcaster::new("127.0.0.1:3000", vec![peer]);
        broadcaster.broadcast("block", &[1, 2, 3]).unwrap();

        let pkg = receiver.join().unwrap();
        assert_eq!(pkg.command, "block");
        assert_eq!(pkg.addr_from, "127.0.0.1:3000");
        assert_eq!(pkg.payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_unreachable_peers_fail() {
        // bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .to_string();
        let broadcaster = TcpBroadcaster::new("127.0.0.1:3000", vec![addr]);

        assert!(matches!(
            broadcaster.broadcast("heartbeat", b"x"),
            Err(LedgerError::Network(_))
        ));
        assert!(TcpBroadcaster::new("127.0.0.1:3000", vec![])
            .broadcast("heartbeat", b"x")
            .is_ok());
    }
}
