//! Pairwise interface exchange across process boundaries.
//!
//! An [`Interface`] is a fixed, ordered list of local elements that touch
//! one remote rank. Both sides of a rank pair register their links in
//! matching order when the per-rank forests are seeded, so link `i` here is
//! geometrically the same boundary as link `i` over there. `exchange` is a
//! symmetric gather/scatter: one record per link is produced locally, sent,
//! and the matching remote record is consumed per link. All sends are posted
//! before any receive is waited on, so the exchange cannot deadlock on the
//! buffered backends.

use crate::comm::communicator::{Communicator, Wait};
use crate::comm::CommError;
use crate::topology::id::ElementId;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// All boundary links between this rank and one peer, in exchange order.
#[derive(Clone, Debug)]
pub struct Interface {
    pub peer: usize,
    pub links: Vec<ElementId>,
}

/// Symmetric, order-matched gather/scatter over every interface.
///
/// `gather` produces one record per local link (in order); `scatter`
/// receives the peer's record for the matching link.
pub fn exchange<C, T>(
    comm: &C,
    interfaces: &[Interface],
    tag: u16,
    mut gather: impl FnMut(ElementId) -> T,
    mut scatter: impl FnMut(ElementId, T) -> Result<(), CommError>,
) -> Result<(), CommError>
where
    C: Communicator,
    T: Serialize + DeserializeOwned,
{
    let mut pending = Vec::with_capacity(interfaces.len());
    for iface in interfaces {
        let records: Vec<T> = iface.links.iter().map(|&e| gather(e)).collect();
        let buf = bincode::serialize(&records).map_err(|e| CommError::Codec(e.to_string()))?;
        comm.isend(iface.peer, tag, &buf).wait();
        pending.push(comm.irecv(iface.peer, tag));
    }
    for (iface, recv) in interfaces.iter().zip(pending) {
        let buf = recv
            .wait()
            .ok_or_else(|| CommError::Codec("missing interface message".into()))?;
        let records: Vec<T> =
            bincode::deserialize(&buf).map_err(|e| CommError::Codec(e.to_string()))?;
        if records.len() != iface.links.len() {
            return Err(CommError::Codec(format!(
                "interface to rank {} carried {} records for {} links",
                iface.peer,
                records.len(),
                iface.links.len()
            )));
        }
        for (&local, record) in iface.links.iter().zip(records) {
            scatter(local, record)?;
        }
    }
    Ok(())
}
