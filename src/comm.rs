//! Rank-addressed message passing between country workers.
//!
//! A [`mesh`] is a full matrix of channels, one per ordered pair of ranks
//! (self-channels included, which keeps the collectives uniform). A send
//! deposits the message in the destination's mailbox and never blocks; a
//! receive blocks until the named peer's next message arrives. Since every
//! worker posts all of its sends before its first receive of a round, no
//! circular wait can form.

use anyhow::{Context, Result, bail};
use std::sync::mpsc::{Receiver, Sender, channel};

/// Build the channel mesh for `size` ranks, one endpoint per rank.
pub fn mesh<T>(size: usize) -> Vec<Endpoint<T>> {
    let mut txs: Vec<Vec<Sender<T>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
    let mut rxs: Vec<Vec<Receiver<T>>> = Vec::with_capacity(size);
    for _ in 0..size {
        let mut inbound = Vec::with_capacity(size);
        for tx in txs.iter_mut() {
            let (sender, receiver) = channel();
            tx.push(sender);
            inbound.push(receiver);
        }
        rxs.push(inbound);
    }

    txs.into_iter()
        .zip(rxs)
        .enumerate()
        .map(|(rank, (txs, rxs))| Endpoint { rank, txs, rxs })
        .collect()
}

/// One rank's view of the mesh.
pub struct Endpoint<T> {
    rank: usize,
    txs: Vec<Sender<T>>,
    rxs: Vec<Receiver<T>>,
}

impl<T> Endpoint<T> {
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.txs.len()
    }

    /// Deposit a message in `to`'s mailbox without blocking.
    pub fn send(&self, to: usize, value: T) -> Result<()> {
        if self.txs[to].send(value).is_err() {
            bail!("rank {to} is gone, cannot send from rank {}", self.rank);
        }
        Ok(())
    }

    /// Block until the next message from `from` arrives.
    pub fn recv(&self, from: usize) -> Result<T> {
        self.rxs[from]
            .recv()
            .with_context(|| format!("rank {from} is gone, cannot receive at rank {}", self.rank))
    }

    /// Distribute one value per rank from the root; returns this rank's.
    pub fn scatter(&self, root: usize, values: Option<Vec<T>>) -> Result<T> {
        if self.rank == root {
            let values = values.context("scatter needs the values at the root")?;
            if values.len() != self.size() {
                bail!(
                    "scatter needs exactly {} values, got {}",
                    self.size(),
                    values.len()
                );
            }
            for (to, value) in values.into_iter().enumerate() {
                self.send(to, value)?;
            }
        }
        self.recv(root)
    }

    /// Collect every rank's value at the root, in rank order.
    pub fn gather(&self, root: usize, value: T) -> Result<Option<Vec<T>>> {
        self.send(root, value)?;
        if self.rank != root {
            return Ok(None);
        }
        let all = (0..self.size())
            .map(|from| self.recv(from))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(all))
    }
}

impl<T: Clone> Endpoint<T> {
    /// Send the root's value to every rank; returns it on every rank.
    pub fn broadcast(&self, root: usize, value: Option<T>) -> Result<T> {
        if self.rank == root {
            let value = value.context("broadcast needs the value at the root")?;
            for to in 0..self.size() {
                self.send(to, value.clone())?;
            }
        }
        self.recv(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn point_to_point_is_source_matched() {
        let mut endpoints = mesh::<u32>(2);
        let e1 = endpoints.pop().unwrap();
        let e0 = endpoints.pop().unwrap();

        thread::scope(|s| {
            s.spawn(move || {
                e0.send(1, 7).unwrap();
                assert_eq!(e0.recv(1).unwrap(), 9);
            });
            e1.send(0, 9).unwrap();
            assert_eq!(e1.recv(0).unwrap(), 7);
        });
    }

    #[test]
    fn self_send_is_allowed() {
        let endpoints = mesh::<u32>(1);
        let e0 = &endpoints[0];
        e0.send(0, 5).unwrap();
        assert_eq!(e0.recv(0).unwrap(), 5);
    }

    #[test]
    fn collectives_move_values_through_the_root() {
        let endpoints = mesh::<u64>(3);

        thread::scope(|s| {
            let handles: Vec<_> = endpoints
                .into_iter()
                .map(|e| {
                    s.spawn(move || {
                        let part = e
                            .scatter(0, (e.rank() == 0).then(|| vec![10, 20, 30]))
                            .unwrap();
                        let gathered = e.gather(0, part * 2).unwrap();
                        let total = gathered.map(|parts| parts.iter().sum::<u64>());
                        let total = e.broadcast(0, total).unwrap();
                        (part, total)
                    })
                })
                .collect();

            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert_eq!(results, vec![(10, 120), (20, 120), (30, 120)]);
        });
    }

    #[test]
    fn disconnected_peer_is_an_error() {
        let mut endpoints = mesh::<u32>(2);
        let e1 = endpoints.pop().unwrap();
        let e0 = endpoints.pop().unwrap();
        drop(e1);

        assert!(e0.send(1, 1).is_err());
        assert!(e0.recv(1).is_err());
    }
}
