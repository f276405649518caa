use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::endpoint::DatagramSocket;
use super::stats::PacketLossSimulation;

#[derive(Debug)]
struct DelayedDatagram {
    release_time: Instant,
    data: Vec<u8>,
    addr: SocketAddr,
}

impl PartialEq for DelayedDatagram {
    fn eq(&self, other: &Self) -> bool {
        self.release_time == other.release_time
    }
}

impl Eq for DelayedDatagram {}

impl PartialOrd for DelayedDatagram {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedDatagram {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        other.release_time.cmp(&self.release_time)
    }
}

/// Wraps a real socket and impairs what it sends: loss, duplication and
/// latency with jitter. Delayed datagrams go out on the next socket call
/// after their release time.
#[derive(Debug)]
pub struct LossySocket<S> {
    inner: S,
    conditions: PacketLossSimulation,
    rng: ChaCha8Rng,
    delayed: BinaryHeap<DelayedDatagram>,
}

impl<S: DatagramSocket> LossySocket<S> {
    pub fn new(inner: S, conditions: PacketLossSimulation, seed: u64) -> Self {
        Self {
            inner,
            conditions,
            rng: ChaCha8Rng::seed_from_u64(seed),
            delayed: BinaryHeap::new(),
        }
    }

    pub fn conditions(&self) -> &PacketLossSimulation {
        &self.conditions
    }

    pub fn delayed_count(&self) -> usize {
        self.delayed.len()
    }

    fn release_due(&mut self, now: Instant) -> io::Result<()> {
        while self
            .delayed
            .peek()
            .is_some_and(|delayed| delayed.release_time <= now)
        {
            if let Some(delayed) = self.delayed.pop() {
                self.inner.send_to(&delayed.data, delayed.addr)?;
            }
        }
        Ok(())
    }
}

impl<S: DatagramSocket> DatagramSocket for LossySocket<S> {
    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        let now = Instant::now();
        self.release_due(now)?;

        if self.conditions.should_drop(&mut self.rng) {
            return Ok(data.len());
        }

        let copies = if self.conditions.should_duplicate(&mut self.rng) {
            2
        } else {
            1
        };
        for _ in 0..copies {
            let delay = Duration::from_millis(self.conditions.delay_ms(&mut self.rng) as u64);
            if delay.is_zero() {
                self.inner.send_to(data, addr)?;
            } else {
                self.delayed.push(DelayedDatagram {
                    release_time: now + delay,
                    data: data.to_vec(),
                    addr,
                });
            }
        }
        Ok(data.len())
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        self.release_due(Instant::now())?;
        self.inner.recv_from(buf)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[derive(Debug)]
struct LinkState {
    conditions: PacketLossSimulation,
    rng: ChaCha8Rng,
    in_flight: HashMap<SocketAddr, VecDeque<(SocketAddr, Vec<u8>)>>,
    delivered: u64,
    dropped: u64,
}

impl LinkState {
    fn transmit(&mut self, from: SocketAddr, to: SocketAddr, data: &[u8]) {
        if self.conditions.should_drop(&mut self.rng) {
            self.dropped += 1;
            return;
        }
        let copies = if self.conditions.should_duplicate(&mut self.rng) {
            2
        } else {
            1
        };
        let queue = self.in_flight.entry(to).or_default();
        for _ in 0..copies {
            queue.push_back((from, data.to_vec()));
        }
    }

    fn take(&mut self, addr: SocketAddr) -> Option<(SocketAddr, Vec<u8>)> {
        let reorder = self.conditions.should_reorder(&mut self.rng);
        let queue = self.in_flight.get_mut(&addr)?;
        let index = if reorder && queue.len() > 1 {
            self.rng.gen_range(0..queue.len())
        } else {
            0
        };
        let datagram = queue.remove(index)?;
        self.delivered += 1;
        Some(datagram)
    }
}

/// In-memory datagram network for deterministic tests. Every socket bound
/// on the same link can reach every other one; impairments are drawn from a
/// seeded RNG so a failing case replays exactly.
#[derive(Debug, Clone)]
pub struct SimulatedLink {
    state: Rc<RefCell<LinkState>>,
}

impl SimulatedLink {
    pub fn new(conditions: PacketLossSimulation, seed: u64) -> Self {
        Self {
            state: Rc::new(RefCell::new(LinkState {
                conditions,
                rng: ChaCha8Rng::seed_from_u64(seed),
                in_flight: HashMap::new(),
                delivered: 0,
                dropped: 0,
            })),
        }
    }

    pub fn reliable() -> Self {
        Self::new(PacketLossSimulation::default(), 0)
    }

    pub fn bind(&self, addr: SocketAddr) -> SimulatedSocket {
        self.state.borrow_mut().in_flight.entry(addr).or_default();
        SimulatedSocket {
            addr,
            link: Rc::clone(&self.state),
        }
    }

    pub fn set_conditions(&self, conditions: PacketLossSimulation) {
        self.state.borrow_mut().conditions = conditions;
    }

    pub fn in_flight(&self) -> usize {
        self.state.borrow().in_flight.values().map(VecDeque::len).sum()
    }

    pub fn delivered(&self) -> u64 {
        self.state.borrow().delivered
    }

    pub fn dropped(&self) -> u64 {
        self.state.borrow().dropped
    }
}

#[derive(Debug)]
pub struct SimulatedSocket {
    addr: SocketAddr,
    link: Rc<RefCell<LinkState>>,
}

impl DatagramSocket for SimulatedSocket {
    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.link.borrow_mut().transmit(self.addr, addr, data);
        Ok(data.len())
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let Some((from, data)) = self.link.borrow_mut().take(self.addr) else {
            return Ok(None);
        };
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        Ok(Some((len, from)))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    fn drain(socket: &mut SimulatedSocket) -> Vec<Vec<u8>> {
        let mut buf = [0u8; 64];
        let mut out = Vec::new();
        while let Some((len, _)) = socket.recv_from(&mut buf).unwrap() {
            out.push(buf[..len].to_vec());
        }
        out
    }

    #[test]
    fn reliable_link_delivers_in_order() {
        let link = SimulatedLink::reliable();
        let mut a = link.bind(addr(1));
        let mut b = link.bind(addr(2));

        for byte in 0..5u8 {
            a.send_to(&[byte], addr(2)).unwrap();
        }

        assert_eq!(link.in_flight(), 5);
        assert_eq!(drain(&mut b), (0..5u8).map(|b| vec![b]).collect::<Vec<_>>());
        assert!(drain(&mut a).is_empty());
    }

    #[test]
    fn source_address_is_reported() {
        let link = SimulatedLink::reliable();
        let mut a = link.bind(addr(1));
        let mut b = link.bind(addr(2));

        a.send_to(b"x", addr(2)).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(b.recv_from(&mut buf).unwrap(), Some((1, addr(1))));
    }

    #[test]
    fn impaired_link_is_reproducible() {
        let conditions = PacketLossSimulation {
            enabled: true,
            loss_percent: 20.0,
            duplicate_percent: 20.0,
            reorder_percent: 50.0,
            ..Default::default()
        };

        let run = |seed| {
            let link = SimulatedLink::new(conditions.clone(), seed);
            let mut a = link.bind(addr(1));
            let mut b = link.bind(addr(2));
            for byte in 0..40u8 {
                a.send_to(&[byte], addr(2)).unwrap();
            }
            drain(&mut b)
        };

        assert_eq!(run(9), run(9));
        assert_ne!(run(9), (0..40u8).map(|b| vec![b]).collect::<Vec<_>>());
    }

    #[test]
    fn lossy_socket_delays_until_release() {
        let link = SimulatedLink::reliable();
        let inner = link.bind(addr(1));
        let mut receiver = link.bind(addr(2));
        let mut lossy = LossySocket::new(
            inner,
            PacketLossSimulation {
                enabled: true,
                min_latency_ms: 20,
                max_latency_ms: 20,
                ..Default::default()
            },
            1,
        );

        lossy.send_to(b"late", addr(2)).unwrap();
        assert_eq!(lossy.delayed_count(), 1);
        assert!(drain(&mut receiver).is_empty());

        std::thread::sleep(Duration::from_millis(25));
        let mut buf = [0u8; 8];
        assert!(lossy.recv_from(&mut buf).unwrap().is_none());
        assert_eq!(lossy.delayed_count(), 0);
        assert_eq!(drain(&mut receiver), vec![b"late".to_vec()]);
    }
}
