//! TCP peer link
//!
//! One reader thread and one writer thread per link. The event loop only sees
//! the mpsc ends through [`Channel::poll`] and [`Channel::send`].

use super::protocol::{decode_bytes, encode, Envelope, MAX_LINE_BYTES};
use super::{Channel, ChannelError, ChannelEvent};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// How long an outgoing connect may take
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A link to a remote session over TCP
pub struct TcpChannel {
    remote: String,
    /// Outgoing lines, picked up by the writer thread
    tx: Sender<String>,
    /// Events from the link threads
    rx: Receiver<ChannelEvent>,
    /// Set once the link is up; used to shut the socket down on close
    stream: Arc<Mutex<Option<TcpStream>>>,
    closed: Arc<AtomicBool>,
    finished: bool,
}

impl TcpChannel {
    /// Wrap an accepted stream. Reports `Open` on the first poll.
    pub fn from_stream(stream: TcpStream) -> Result<Self, ChannelError> {
        let remote = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let (channel, out_rx, event_tx) = Self::parts(remote);
        run_link(stream, out_rx, event_tx, channel.stream.clone(), channel.closed.clone());
        Ok(channel)
    }

    /// Connect in the background. Reports `Open` or `Error` on a later poll.
    pub fn connect(addr: SocketAddr) -> Self {
        let (channel, out_rx, event_tx) = Self::parts(addr.to_string());
        let slot = channel.stream.clone();
        let closed = channel.closed.clone();

        thread::spawn(move || match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => run_link(stream, out_rx, event_tx, slot, closed),
            Err(e) => {
                let _ = event_tx.send(ChannelEvent::Error(ChannelError::Unreachable {
                    addr: addr.to_string(),
                    source: e,
                }));
            }
        });
        channel
    }

    fn parts(remote: String) -> (Self, Receiver<String>, Sender<ChannelEvent>) {
        let (out_tx, out_rx) = channel::<String>();
        let (event_tx, event_rx) = channel::<ChannelEvent>();
        let channel = TcpChannel {
            remote,
            tx: out_tx,
            rx: event_rx,
            stream: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
            finished: false,
        };
        (channel, out_rx, event_tx)
    }
}

/// Start the reader and writer threads for an established stream
fn run_link(
    stream: TcpStream,
    outgoing: Receiver<String>,
    events: Sender<ChannelEvent>,
    slot: Arc<Mutex<Option<TcpStream>>>,
    closed: Arc<AtomicBool>,
) {
    let setup = stream
        .set_nodelay(true)
        .and_then(|_| stream.set_read_timeout(Some(Duration::from_millis(100))))
        .and_then(|_| stream.set_write_timeout(Some(Duration::from_secs(5))))
        .and_then(|_| Ok((stream.try_clone()?, stream.try_clone()?)));
    let (read_stream, mut write_stream) = match setup {
        Ok(pair) => pair,
        Err(e) => {
            let _ = events.send(ChannelEvent::Error(ChannelError::Unreachable {
                addr: stream
                    .peer_addr()
                    .map(|a| a.to_string())
                    .unwrap_or_default(),
                source: e,
            }));
            return;
        }
    };
    if let Ok(mut guard) = slot.lock() {
        *guard = Some(stream);
    }
    let _ = events.send(ChannelEvent::Open);

    // Writer thread
    thread::spawn(move || {
        while let Ok(line) = outgoing.recv() {
            if write_stream.write_all(line.as_bytes()).is_err() {
                break;
            }
        }
    });

    // Reader thread
    thread::spawn(move || {
        let mut reader = BufReader::new(read_stream);
        let mut line = Vec::new();
        loop {
            if closed.load(Ordering::Relaxed) {
                break;
            }
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => {
                    let _ = events.send(ChannelEvent::Closed);
                    break;
                }
                Ok(_) if line.ends_with(b"\n") => {
                    match decode_bytes(&line) {
                        Ok(envelope) => {
                            if events.send(ChannelEvent::Data(envelope)).is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!(error = %e, "dropping undecodable line"),
                    }
                    line.clear();
                }
                Ok(_) => {
                    // Partial line at EOF; the next read reports the close
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    // Partial data stays in `line` until the newline arrives
                    if line.len() > MAX_LINE_BYTES {
                        debug!(bytes = line.len(), "dropping oversized line");
                        line.clear();
                    }
                    continue;
                }
                Err(_) => {
                    let _ = events.send(ChannelEvent::Closed);
                    break;
                }
            }
        }
    });
}

impl Channel for TcpChannel {
    fn send(&mut self, envelope: &Envelope) -> Result<(), ChannelError> {
        if self.finished || self.closed.load(Ordering::Relaxed) {
            return Err(ChannelError::Closed);
        }
        let line = encode(envelope)?;
        self.tx.send(line).map_err(|_| ChannelError::Closed)
    }

    fn poll(&mut self) -> Vec<ChannelEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    let terminal = matches!(event, ChannelEvent::Closed | ChannelEvent::Error(_));
                    events.push(event);
                    if terminal {
                        self.finished = true;
                        break;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    events.push(ChannelEvent::Closed);
                    self.finished = true;
                    break;
                }
            }
        }
        events
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
        self.finished = true;
        if let Ok(mut guard) = self.stream.lock() {
            if let Some(stream) = guard.take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
    }

    fn remote(&self) -> String {
        self.remote.clone()
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        self.close();
    }
}
