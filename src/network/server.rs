//! TCP listener for hosting a room

use super::peer::TcpChannel;
use super::{Channel, ChannelError, Listener};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default port for hosting
pub const DEFAULT_PORT: u16 = 55333;

/// Maximum port to try when auto-incrementing
const MAX_PORT: u16 = 55433;

/// Accepts replica connections on a background thread
pub struct TcpHost {
    /// Local address the listener is bound to
    addr: SocketAddr,
    /// Streams accepted by the acceptor thread
    accepted_rx: Receiver<TcpStream>,
    /// Tells the acceptor thread to exit
    stop: Arc<AtomicBool>,
}

impl TcpHost {
    /// Bind on `start_port`, moving up one port at a time while it is taken
    pub fn bind(start_port: u16) -> Result<Self, ChannelError> {
        let mut port = start_port;
        let listener = loop {
            match TcpListener::bind(("0.0.0.0", port)) {
                Ok(l) => break l,
                Err(e)
                    if e.kind() == io::ErrorKind::AddrInUse
                        && port < MAX_PORT.max(start_port) =>
                {
                    port += 1;
                }
                Err(e) => {
                    return Err(ChannelError::Bind {
                        port: start_port,
                        source: e,
                    })
                }
            }
        };

        let bind_err = |source| ChannelError::Bind { port, source };
        let addr = listener.local_addr().map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;

        let (accepted_tx, accepted_rx) = channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        // Spawn acceptor thread
        thread::spawn(move || {
            accept_loop(listener, accepted_tx, stop_flag);
        });
        info!(%addr, "listening for peers");

        Ok(TcpHost {
            addr,
            accepted_rx,
            stop,
        })
    }

    /// Get the port the listener is bound to
    #[cfg(test)]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Listener for TcpHost {
    fn accept(&mut self) -> Vec<Box<dyn Channel>> {
        let mut channels: Vec<Box<dyn Channel>> = Vec::new();
        loop {
            match self.accepted_rx.try_recv() {
                Ok(stream) => match TcpChannel::from_stream(stream) {
                    Ok(channel) => {
                        debug!(remote = %channel.remote(), "peer connected");
                        channels.push(Box::new(channel));
                    }
                    Err(e) => warn!(error = %e, "could not set up accepted link"),
                },
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        channels
    }

    fn local_addr(&self) -> String {
        self.addr.to_string()
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

impl Drop for TcpHost {
    fn drop(&mut self) {
        self.close();
    }
}

fn accept_loop(listener: TcpListener, tx: Sender<TcpStream>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                // Accepted sockets inherit non-blocking mode on some platforms
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                if tx.send(stream).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(_) => break,
        }
    }
    debug!("acceptor stopped");
}
