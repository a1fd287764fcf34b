//! Tree-structured collectives over the process topology.
//!
//! Ranks form a binary spanning tree (parent `(r-1)/2`, children `2r+1` and
//! `2r+2`, visited in that fixed order), so reductions and broadcasts are
//! reproducible for a given rank count. The balancing pass is a strict
//! two-phase gather-then-scatter discipline; that ordering is structural
//! here: every up-tree operation returns a [`GatherToken`] and the matching
//! down-tree operation consumes it, so a scatter cannot be issued before its
//! gather has completed.

use crate::comm::communicator::{Communicator, Wait};
use crate::comm::CommError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Binary spanning tree over ranks `0..size`.
#[derive(Clone, Copy, Debug)]
pub struct ProcessTree {
    pub rank: usize,
    pub size: usize,
}

impl ProcessTree {
    pub fn new(rank: usize, size: usize) -> Self {
        debug_assert!(rank < size.max(1));
        Self { rank, size }
    }

    pub fn parent(&self) -> Option<usize> {
        (self.rank > 0).then(|| (self.rank - 1) / 2)
    }

    /// Children in fixed ascending order (the reproducibility guarantee).
    pub fn children(&self) -> Vec<usize> {
        [2 * self.rank + 1, 2 * self.rank + 2]
            .into_iter()
            .filter(|&c| c < self.size)
            .collect()
    }

    pub fn is_root(&self) -> bool {
        self.rank == 0
    }
}

/// Proof that an up-tree phase completed; consumed by the matching
/// down-tree phase.
#[derive(Debug)]
pub struct GatherToken {
    tag: u16,
}

impl GatherToken {
    /// Tag of the completed gather phase.
    pub fn gathered_tag(&self) -> u16 {
        self.tag
    }
}

/// Collectives for one rank, bound to its communicator and tree position.
pub struct TreeComm<'a, C: Communicator> {
    comm: &'a C,
    pub tree: ProcessTree,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CommError> {
    bincode::serialize(value).map_err(|e| CommError::Codec(e.to_string()))
}

fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T, CommError> {
    bincode::deserialize(buf).map_err(|e| CommError::Codec(e.to_string()))
}

impl<'a, C: Communicator> TreeComm<'a, C> {
    pub fn new(comm: &'a C) -> Self {
        let tree = ProcessTree::new(comm.rank(), comm.size());
        Self { comm, tree }
    }

    /// Up-tree reduction. Every rank combines its `local` value with its
    /// children's subtree values (in fixed child order) and forwards the
    /// result to its parent. Returns the subtree value, the per-child
    /// subtree values, and the phase token.
    pub fn reduce_up<T>(
        &self,
        tag: u16,
        local: T,
        mut combine: impl FnMut(T, &T) -> T,
    ) -> Result<(T, Vec<T>, GatherToken), CommError>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut child_values = Vec::new();
        for child in self.tree.children() {
            let buf = self
                .comm
                .irecv(child, tag)
                .wait()
                .ok_or_else(|| CommError::Codec("missing reduction message".into()))?;
            child_values.push(decode::<T>(&buf)?);
        }
        let mut subtree = local;
        for cv in &child_values {
            subtree = combine(subtree, cv);
        }
        if let Some(parent) = self.tree.parent() {
            self.comm.isend(parent, tag, &encode(&subtree)?).wait();
        }
        Ok((subtree, child_values, GatherToken { tag }))
    }

    /// Down-tree scatter of per-subtree values. The root supplies its own
    /// value; every other rank receives one from its parent. `split` maps a
    /// received value to this rank's share plus one forwarded value per
    /// child, in fixed child order.
    pub fn scatter_down<T, S>(
        &self,
        tag: u16,
        token: GatherToken,
        root_value: Option<T>,
        mut split: impl FnMut(T) -> (S, Vec<T>),
    ) -> Result<S, CommError>
    where
        T: Serialize + DeserializeOwned,
        S: Sized,
    {
        // a scatter only follows a completed gather, on its own tag
        debug_assert_ne!(token.gathered_tag(), tag, "scatter reuses the gather tag");
        let incoming = match self.tree.parent() {
            None => root_value
                .ok_or_else(|| CommError::Codec("root scatter without a root value".into()))?,
            Some(parent) => {
                let buf = self
                    .comm
                    .irecv(parent, tag)
                    .wait()
                    .ok_or_else(|| CommError::Codec("missing scatter message".into()))?;
                decode::<T>(&buf)?
            }
        };
        let children = self.tree.children();
        let (share, forwards) = split(incoming);
        if forwards.len() != children.len() {
            return Err(CommError::Codec(format!(
                "scatter split produced {} forwards for {} children",
                forwards.len(),
                children.len()
            )));
        }
        for (child, value) in children.into_iter().zip(forwards) {
            self.comm.isend(child, tag, &encode(&value)?).wait();
        }
        Ok(share)
    }

    /// Down-tree broadcast of one identical value to every rank.
    pub fn broadcast<T>(
        &self,
        tag: u16,
        token: GatherToken,
        root_value: Option<T>,
    ) -> Result<T, CommError>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        // a broadcast only follows a completed gather, on its own tag
        debug_assert_ne!(token.gathered_tag(), tag, "broadcast reuses the gather tag");
        let value = match self.tree.parent() {
            None => root_value
                .ok_or_else(|| CommError::Codec("root broadcast without a root value".into()))?,
            Some(parent) => {
                let buf = self
                    .comm
                    .irecv(parent, tag)
                    .wait()
                    .ok_or_else(|| CommError::Codec("missing broadcast message".into()))?;
                decode::<T>(&buf)?
            }
        };
        for child in self.tree.children() {
            self.comm.isend(child, tag, &encode(&value)?).wait();
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::LocalUniverse;

    #[test]
    fn tree_shape_is_binary_and_deterministic() {
        let t = ProcessTree::new(0, 5);
        assert_eq!(t.parent(), None);
        assert_eq!(t.children(), vec![1, 2]);
        let t = ProcessTree::new(1, 5);
        assert_eq!(t.parent(), Some(0));
        assert_eq!(t.children(), vec![3, 4]);
        let t = ProcessTree::new(4, 5);
        assert_eq!(t.parent(), Some(1));
        assert!(t.children().is_empty());
    }

    #[test]
    fn reduce_up_sums_across_five_ranks() {
        let comms = LocalUniverse::comms(5);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let tc = TreeComm::new(&comm);
                    let (subtree, _, _) = tc
                        .reduce_up(1, comm.rank() as u64 + 1, |a, b| a + *b)
                        .unwrap();
                    (comm.rank(), subtree)
                })
            })
            .collect();
        for h in handles {
            let (rank, subtree) = h.join().unwrap();
            if rank == 0 {
                assert_eq!(subtree, 1 + 2 + 3 + 4 + 5);
            }
        }
    }

    #[test]
    fn scatter_down_distributes_ranges() {
        // reduce counts, then scatter contiguous id ranges back down
        let comms = LocalUniverse::comms(5);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let tc = TreeComm::new(&comm);
                    let local = 2u64; // two items per rank
                    let (subtree, child_counts, token) =
                        tc.reduce_up(1, local, |a, b| a + *b).unwrap();
                    let start = tc
                        .scatter_down(2, token, tc.tree.is_root().then_some(1u64), |start| {
                            // my items first, then each child's subtree range
                            let mut next = start + local;
                            let mut forwards = Vec::new();
                            for c in &child_counts {
                                forwards.push(next);
                                next += *c;
                            }
                            (start, forwards)
                        })
                        .unwrap();
                    let _ = subtree;
                    (comm.rank(), start, local)
                })
            })
            .collect();
        let mut claimed: Vec<u64> = Vec::new();
        for h in handles {
            let (_, start, count) = h.join().unwrap();
            for i in 0..count {
                claimed.push(start + i);
            }
        }
        claimed.sort_unstable();
        assert_eq!(claimed, (1..=10).collect::<Vec<_>>());
    }
}
