//! Unreliable link for testing purposes.
#![deny(missing_docs)]
use async_trait::async_trait;
use link::{Datagram, Link, Loopback};
use rand::rngs::OsRng;
use rand::Rng;
use std::collections::VecDeque;
use std::io::Result;
use std::sync::{Arc, Mutex};

/// A link that loses, delays and duplicates datagrams.
pub struct LossyLink {
    px: f64,
    pq: f64,
    delayed: Arc<Mutex<VecDeque<Vec<u8>>>>,
    inner: Loopback,
}

#[async_trait]
impl Link for LossyLink {
    async fn recv(&self) -> Result<Datagram> {
        self.inner.recv().await
    }

    async fn send(&self, buf: Vec<u8>) -> Result<()> {
        // Datagrams held back by earlier sends go out first, which
        // makes them arrive late or as duplicates.
        loop {
            let held = { self.delayed.lock().unwrap().pop_front() };
            if let Some(held) = held {
                self.inner.send(held).await?;
            } else {
                break;
            }
        }
        let fate: f64 = OsRng.gen();
        if fate < self.px {
            self.inner.send(buf.clone()).await?;
        }
        if fate < self.pq {
            self.delayed.lock().unwrap().push_back(buf);
        }
        Ok(())
    }

    fn mps(&self) -> u32 {
        self.inner.mps()
    }

    fn local_ip(&self) -> std::net::IpAddr {
        self.inner.local_ip()
    }

    fn remote_ip(&self) -> std::net::IpAddr {
        self.inner.remote_ip()
    }

    fn local_label(&self) -> &[u8] {
        self.inner.local_label()
    }

    fn remote_label(&self) -> &[u8] {
        self.inner.remote_label()
    }
}

/// Lossy link builder.
pub struct LossyLinkBuilder {
    px: f64,
    pq: f64,
}

impl LossyLinkBuilder {
    /// Creates a builder for a lossy link pair.
    ///
    /// The px parameter defines the probability of a datagram being
    /// transmitted, the pq parameter the probability of it being
    /// queued for later. Combining them produces links that are
    /// reliable (px=1.0, pq=0.0), simulate network partitions
    /// (px=0.0, pq=0.0), deliver every datagram twice (px=1.0,
    /// pq=1.0) or anything in between.
    pub fn new(px: f64, pq: f64) -> LossyLinkBuilder {
        assert!((0.0..=1.0).contains(&px));
        assert!((0.0..=1.0).contains(&pq));
        LossyLinkBuilder { px, pq }
    }

    /// Builds the two cross-connected lossy links.
    pub fn split(&self, mps: u32) -> (LossyLink, LossyLink) {
        let (a, b) = Loopback::pair(mps);
        let a = LossyLink {
            px: self.px,
            pq: self.pq,
            delayed: Default::default(),
            inner: a,
        };
        let b = LossyLink {
            px: self.px,
            pq: self.pq,
            delayed: Default::default(),
            inner: b,
        };
        (a, b)
    }
}

/// Enumerates the error conditions during transmission.
pub enum Tx {
    /// Successful transmission.
    Success,
    /// Datagram is delayed and will be received out of order.
    Delay,
    /// Datagram will be received twice.
    Duplicate,
    /// Datagram is dropped.
    Drop,
}

impl LossyLinkBuilder {
    /// Returns the probability of an error condition occurring.
    pub fn probability(&self, cond: Tx) -> f64 {
        match cond {
            Tx::Success => self.px * (1.0 - self.pq),
            Tx::Delay => (1.0 - self.px) * self.pq,
            Tx::Duplicate => self.px * self.pq,
            Tx::Drop => (1.0 - self.px) * (1.0 - self.pq),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::task;
    use failure::Error;

    async fn reliable() -> Result<()> {
        let (a, b) = LossyLinkBuilder::new(1.0, 0.0).split(1500);
        a.send(b"ping".to_vec()).await?;
        assert_eq!(b.recv().await?.buf, b"ping");
        Ok(())
    }

    #[test]
    fn test_reliable() {
        task::block_on(reliable()).unwrap();
    }

    async fn duplicating() -> Result<()> {
        let (a, b) = LossyLinkBuilder::new(1.0, 1.0).split(1500);
        a.send(b"ping".to_vec()).await?;
        a.send(b"pong".to_vec()).await?;
        assert_eq!(b.recv().await?.buf, b"ping");
        // The held-back copy goes out ahead of the next datagram.
        assert_eq!(b.recv().await?.buf, b"ping");
        assert_eq!(b.recv().await?.buf, b"pong");
        Ok(())
    }

    #[test]
    fn test_duplicating() {
        task::block_on(duplicating()).unwrap();
    }

    #[test]
    fn test_probabilities() -> std::result::Result<(), Error> {
        let b = LossyLinkBuilder::new(0.5, 0.5);
        let total = b.probability(Tx::Success)
            + b.probability(Tx::Delay)
            + b.probability(Tx::Duplicate)
            + b.probability(Tx::Drop);
        assert!((total - 1.0).abs() < 1e-9);
        Ok(())
    }
}
