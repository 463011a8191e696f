//! In-process links for deterministic session tests
//!
//! Everything runs on the calling thread. Messages still go through the line
//! codec so the wire format is exercised.

use super::protocol::{decode, encode, Envelope};
use super::{Channel, ChannelError, ChannelEvent, Connector, Listener};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::rc::{Rc, Weak};

enum Pending {
    Open,
    Line(String),
    Closed,
    Unreachable(String),
}

type Inbox = Rc<RefCell<VecDeque<Pending>>>;

/// One end of an in-memory link
pub struct MemoryChannel {
    remote: String,
    inbox: Inbox,
    peer: Option<Weak<RefCell<VecDeque<Pending>>>>,
    closed: bool,
}

impl Channel for MemoryChannel {
    fn send(&mut self, envelope: &Envelope) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        let peer = self
            .peer
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(ChannelError::Closed)?;
        peer.borrow_mut().push_back(Pending::Line(encode(envelope)?));
        Ok(())
    }

    fn poll(&mut self) -> Vec<ChannelEvent> {
        let mut events = Vec::new();
        if self.closed {
            return events;
        }
        while let Some(pending) = self.inbox.borrow_mut().pop_front() {
            match pending {
                Pending::Open => events.push(ChannelEvent::Open),
                Pending::Line(line) => {
                    if let Ok(envelope) = decode(&line) {
                        events.push(ChannelEvent::Data(envelope));
                    }
                }
                Pending::Closed => {
                    events.push(ChannelEvent::Closed);
                    self.closed = true;
                    break;
                }
                Pending::Unreachable(addr) => {
                    events.push(ChannelEvent::Error(ChannelError::Unreachable {
                        addr,
                        source: io::Error::new(io::ErrorKind::ConnectionRefused, "nobody listening"),
                    }));
                    self.closed = true;
                    break;
                }
            }
        }
        events
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(peer) = self.peer.take().and_then(|p| p.upgrade()) {
            peer.borrow_mut().push_back(Pending::Closed);
        }
    }

    fn remote(&self) -> String {
        self.remote.clone()
    }
}

#[derive(Default)]
struct NetState {
    listeners: HashMap<String, Rc<RefCell<Vec<MemoryChannel>>>>,
    failing_binds: u32,
    links: Vec<(Weak<RefCell<VecDeque<Pending>>>, Weak<RefCell<VecDeque<Pending>>>)>,
    next_client: u32,
}

/// A shared in-memory network. Clone to hand it to several sessions.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Rc<RefCell<NetState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector { net: self.clone() }
    }

    /// Make the next `count` bind attempts fail
    pub fn fail_next_binds(&self, count: u32) {
        self.inner.borrow_mut().failing_binds = count;
    }

    /// Drop every live link, as if the network went away
    pub fn sever_all(&self) {
        let links = std::mem::take(&mut self.inner.borrow_mut().links);
        for (a, b) in links {
            for inbox in [a, b].iter().filter_map(Weak::upgrade) {
                inbox.borrow_mut().push_back(Pending::Closed);
            }
        }
    }

    /// Whether anyone is listening on `address`
    pub fn is_listening(&self, address: &str) -> bool {
        self.inner.borrow().listeners.contains_key(address)
    }
}

/// Connector over a [`MemoryNetwork`]
pub struct MemoryConnector {
    net: MemoryNetwork,
}

impl Connector for MemoryConnector {
    fn connect(&mut self, address: &str) -> Result<Box<dyn Channel>, ChannelError> {
        let mut state = self.net.inner.borrow_mut();
        let client_inbox: Inbox = Rc::new(RefCell::new(VecDeque::new()));

        let Some(queue) = state.listeners.get(address).cloned() else {
            client_inbox
                .borrow_mut()
                .push_back(Pending::Unreachable(address.to_string()));
            return Ok(Box::new(MemoryChannel {
                remote: address.to_string(),
                inbox: client_inbox,
                peer: None,
                closed: false,
            }));
        };

        state.next_client += 1;
        let client_name = format!("mem-client-{}", state.next_client);
        let server_inbox: Inbox = Rc::new(RefCell::new(VecDeque::new()));
        client_inbox.borrow_mut().push_back(Pending::Open);
        server_inbox.borrow_mut().push_back(Pending::Open);
        state
            .links
            .push((Rc::downgrade(&client_inbox), Rc::downgrade(&server_inbox)));

        queue.borrow_mut().push(MemoryChannel {
            remote: client_name,
            inbox: server_inbox.clone(),
            peer: Some(Rc::downgrade(&client_inbox)),
            closed: false,
        });
        Ok(Box::new(MemoryChannel {
            remote: address.to_string(),
            inbox: client_inbox,
            peer: Some(Rc::downgrade(&server_inbox)),
            closed: false,
        }))
    }

    fn bind(&mut self, port: u16) -> Result<Box<dyn Listener>, ChannelError> {
        let mut state = self.net.inner.borrow_mut();
        if state.failing_binds > 0 {
            state.failing_binds -= 1;
            return Err(ChannelError::Bind {
                port,
                source: io::Error::new(io::ErrorKind::AddrInUse, "port taken"),
            });
        }
        let addr = format!("mem:{}", port);
        let queue = Rc::new(RefCell::new(Vec::new()));
        state.listeners.insert(addr.clone(), queue.clone());
        Ok(Box::new(MemoryListener {
            addr,
            queue,
            net: self.net.clone(),
        }))
    }
}

/// Listener over a [`MemoryNetwork`]
pub struct MemoryListener {
    addr: String,
    queue: Rc<RefCell<Vec<MemoryChannel>>>,
    net: MemoryNetwork,
}

impl Listener for MemoryListener {
    fn accept(&mut self) -> Vec<Box<dyn Channel>> {
        self.queue
            .borrow_mut()
            .drain(..)
            .map(|c| Box::new(c) as Box<dyn Channel>)
            .collect()
    }

    fn local_addr(&self) -> String {
        self.addr.clone()
    }

    fn close(&mut self) {
        self.net.inner.borrow_mut().listeners.remove(&self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_exchanges_envelopes() {
        let net = MemoryNetwork::new();
        let mut connector = net.connector();
        let mut listener = connector.bind(1).unwrap();
        let mut client = connector.connect("mem:1").unwrap();
        let mut server = listener.accept().pop().unwrap();

        assert!(matches!(client.poll().as_slice(), [ChannelEvent::Open]));
        client.send(&Envelope::Keepalive { sent_at_ms: 4 }).unwrap();
        let events = server.poll();
        assert!(matches!(events[0], ChannelEvent::Open));
        assert!(matches!(
            events[1],
            ChannelEvent::Data(Envelope::Keepalive { sent_at_ms: 4 })
        ));
    }

    #[test]
    fn test_unknown_address_is_unreachable() {
        let net = MemoryNetwork::new();
        let mut client = net.connector().connect("mem:9").unwrap();
        assert!(matches!(
            client.poll().as_slice(),
            [ChannelEvent::Error(ChannelError::Unreachable { .. })]
        ));
    }

    #[test]
    fn test_sever_closes_both_ends() {
        let net = MemoryNetwork::new();
        let mut connector = net.connector();
        let mut listener = connector.bind(1).unwrap();
        let mut client = connector.connect("mem:1").unwrap();
        let mut server = listener.accept().pop().unwrap();
        client.poll();
        server.poll();

        net.sever_all();
        assert!(matches!(client.poll().as_slice(), [ChannelEvent::Closed]));
        assert!(matches!(server.poll().as_slice(), [ChannelEvent::Closed]));
        assert!(client.send(&Envelope::Keepalive { sent_at_ms: 0 }).is_err());
    }

    #[test]
    fn test_failing_binds() {
        let net = MemoryNetwork::new();
        net.fail_next_binds(1);
        let mut connector = net.connector();
        assert!(connector.bind(1).is_err());
        assert!(connector.bind(1).is_ok());
        assert!(net.is_listening("mem:1"));
    }
}
