//! Message-passing façade for the SPMD balancing pass.
//!
//! Messages are contiguous byte slices. Handles are waitable and
//! non-blocking; the collectives call `.wait()` before trusting a buffer.
//! Two backends ship: [`NoComm`] for single-rank/serial use, and
//! [`LocalComm`] which simulates N ranks inside one process over a shared
//! mailbox. The mailbox belongs to a [`LocalUniverse`] value rather than a
//! process-wide static, so independent passes (e.g. parallel tests) cannot
//! cross-talk.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;

/// Non-blocking point-to-point interface (minimal by design).
pub trait Communicator: Send + Sync + 'static {
    type SendHandle: Wait;
    type RecvHandle: Wait;

    /// This process's rank in `0..size()`.
    fn rank(&self) -> usize;
    /// Number of participating ranks.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16) -> Self::RecvHandle;
}

/// Anything that can be waited on.
pub trait Wait {
    /// Block until completion; returns the received bytes for receives.
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Compile-time no-op comm for single-rank runs and serial unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16) {}
}

// --- LocalComm: N simulated ranks in one process -------------------------

type Key = (usize, usize, u16); // (src, dst, tag)
type Mailbox = DashMap<Key, VecDeque<Bytes>>;

/// Shared state for one group of [`LocalComm`] endpoints.
#[derive(Debug, Default)]
pub struct LocalUniverse {
    mailbox: Mailbox,
}

impl LocalUniverse {
    /// Endpoints for `size` ranks sharing one mailbox.
    pub fn comms(size: usize) -> Vec<LocalComm> {
        let universe = Arc::new(Self::default());
        (0..size)
            .map(|rank| LocalComm {
                rank,
                size,
                universe: Arc::clone(&universe),
            })
            .collect()
    }
}

/// One rank's endpoint into a [`LocalUniverse`].
#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    universe: Arc<LocalUniverse>,
}

/// Pending receive: spins (with yield) until the matching message arrives.
pub struct LocalRecv {
    universe: Arc<LocalUniverse>,
    key: Key,
}

impl Wait for LocalRecv {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            if let Some(mut queue) = self.universe.mailbox.get_mut(&self.key) {
                if let Some(msg) = queue.pop_front() {
                    return Some(msg.to_vec());
                }
            }
            std::thread::yield_now();
        }
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalRecv;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        let key = (self.rank, peer, tag);
        self.universe
            .mailbox
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16) -> LocalRecv {
        LocalRecv {
            universe: Arc::clone(&self.universe),
            key: (peer, self.rank, tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_roundtrip_two_ranks() {
        let comms = LocalUniverse::comms(2);
        let recv = comms[1].irecv(0, 7);
        comms[0].isend(1, 7, &[1, 2, 3, 4]);
        let data = recv.wait().expect("message from rank 0");
        assert_eq!(data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn messages_with_same_key_stay_ordered() {
        let comms = LocalUniverse::comms(2);
        comms[0].isend(1, 3, &[1]);
        comms[0].isend(1, 3, &[2]);
        assert_eq!(comms[1].irecv(0, 3).wait(), Some(vec![1]));
        assert_eq!(comms[1].irecv(0, 3).wait(), Some(vec![2]));
    }

    #[test]
    fn universes_are_isolated() {
        let a = LocalUniverse::comms(2);
        let b = LocalUniverse::comms(2);
        a[0].isend(1, 9, &[42]);
        // b's mailbox never sees a's message
        b[0].isend(1, 9, &[7]);
        assert_eq!(b[1].irecv(0, 9).wait(), Some(vec![7]));
        assert_eq!(a[1].irecv(0, 9).wait(), Some(vec![42]));
    }

    #[test]
    fn cross_thread_delivery() {
        let comms = LocalUniverse::comms(2);
        let c1 = comms[1].clone();
        let handle = std::thread::spawn(move || c1.irecv(0, 1).wait());
        std::thread::sleep(std::time::Duration::from_millis(5));
        comms[0].isend(1, 1, &[9]);
        assert_eq!(handle.join().unwrap(), Some(vec![9]));
    }
}
