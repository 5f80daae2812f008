use crate::core::Transaction;
use crate::error::{LedgerError, Result};
use crate::miner::{Miner, ShutdownToken};
use crate::network::broadcaster::{send_data, Package};
use log::{debug, error, info, warn};
use serde_json::Deserializer;
use std::io::{self, BufReader, ErrorKind, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

pub const TX_COMMAND: &str = "tx";

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const READ_POLL_INTERVAL: Duration = Duration::from_millis(250);
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Inbound side of a mining node: accepts packages until the miner shuts down
/// and feeds transactions into its pool.
pub struct Server<'a> {
    miner: &'a Miner,
}

impl<'a> Server<'a> {
    pub fn new(miner: &'a Miner) -> Server<'a> {
        Server { miner }
    }

    /// Serves every connection on its own scoped thread; returns once the
    /// miner is stopped and all sessions have ended.
    pub fn run(&self, listener: TcpListener) -> Result<()> {
        listener.set_nonblocking(true)?;
        info!("Server listening on {}", listener.local_addr()?);

        let shutdown = self.miner.shutdown_token();
        thread::scope(|scope| {
            while !shutdown.is_cancelled() {
                match listener.accept() {
                    Ok((stream, peer_addr)) => {
                        scope.spawn(move || {
                            if let Err(e) = self.handle_connection(stream, peer_addr) {
                                warn!("Error serving {peer_addr}: {e}");
                            }
                        });
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        shutdown.wait_timeout(ACCEPT_POLL_INTERVAL);
                    }
                    Err(e) => error!("Failed to accept connection: {e}"),
                }
            }
        });
        info!("Server stopped");
        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream, peer_addr: SocketAddr) -> Result<()> {
        stream.set_nonblocking(false)?;

        let reader = BufReader::new(SessionReader::new(&stream, self.miner.shutdown_token()));
        for pkg in Deserializer::from_reader(reader).into_iter::<Package>() {
            let pkg = pkg.map_err(|e| {
                LedgerError::Network(format!("Failed to deserialize package: {e}"))
            })?;
            debug!("Received {} from {peer_addr}", pkg.command);

            match pkg.command.as_str() {
                TX_COMMAND => {
                    if let Err(e) = self.miner.handle_tx(&pkg.payload) {
                        warn!("Dropping transaction from {}: {e}", pkg.addr_from);
                    }
                }
                other => debug!("Ignoring {other} from {}", pkg.addr_from),
            }
        }
        Ok(())
    }
}

// Reads from one peer until the session runs out, the peer stays silent for
// READ_TIMEOUT, or the node shuts down.
struct SessionReader<'s> {
    stream: &'s TcpStream,
    shutdown: ShutdownToken,
    deadline: Instant,
    last_data: Instant,
}

impl<'s> SessionReader<'s> {
    fn new(stream: &'s TcpStream, shutdown: ShutdownToken) -> SessionReader<'s> {
        let now = Instant::now();
        SessionReader {
            stream,
            shutdown,
            deadline: now + SESSION_TIMEOUT,
            last_data: now,
        }
    }
}

impl Read for SessionReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.shutdown.is_cancelled() {
                return Err(io::Error::new(ErrorKind::TimedOut, "node is shutting down"));
            }
            let now = Instant::now();
            if now >= self.deadline {
                return Err(io::Error::new(ErrorKind::TimedOut, "session time exhausted"));
            }
            if now.duration_since(self.last_data) >= READ_TIMEOUT {
                return Err(io::Error::new(ErrorKind::TimedOut, "peer went silent"));
            }

            self.stream
                .set_read_timeout(Some(READ_POLL_INTERVAL.min(self.deadline - now)))?;
            let mut stream = self.stream;
            match stream.read(buf) {
                Ok(n) => {
                    self.last_data = Instant::now();
                    return Ok(n);
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) => return Err(e),
            }
        }
    }
}

/// Hands a signed transaction to a mining node.
pub fn send_tx(addr: &str, node_addr: &str, tx: &Transaction) -> Result<()> {
    let pkg = Package {
        addr_from: node_addr.to_string(),
        command: TX_COMMAND.to_string(),
        payload: tx.serialize()?,
    };
    send_data(addr, &pkg)
}
