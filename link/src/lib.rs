//! Defines the `Link` trait.
//!
//! A link moves whole datagrams between two endpoints and reports the
//! addressing facts the header codec needs: the IP addresses on both
//! sides, the IP protocol number carried in the pseudo header and the
//! maximum packet size. IP fragmentation and routing are entirely the
//! link's business.
#![deny(missing_docs)]
use async_std::channel::{unbounded, Receiver, Sender};
use async_trait::async_trait;
use std::io::{Error, ErrorKind, Result};
use std::net::IpAddr;

/// IP protocol number assigned to DCCP.
pub const PROTO_DCCP: u8 = 33;

/// A raw datagram handed up by the link, together with the addressing
/// facts needed to verify the header checksum.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Datagram {
    /// The full DCCP datagram.
    pub buf: Vec<u8>,
    /// Source IP address of the enclosing IP packet.
    pub src_ip: IpAddr,
    /// Destination IP address of the enclosing IP packet.
    pub dst_ip: IpAddr,
    /// IP protocol number of the enclosing IP packet.
    pub proto: u8,
}

/// Link trait is used to decouple the connection from the wire.
#[async_trait]
pub trait Link: Send + Sync {
    /// Receive the next datagram from the link.
    async fn recv(&self) -> Result<Datagram>;

    /// Send a fully serialized datagram to the link.
    async fn send(&self, buf: Vec<u8>) -> Result<()>;

    /// Maximum packet size the link will carry.
    fn mps(&self) -> u32;

    /// Local IP address, used when computing outbound checksums.
    fn local_ip(&self) -> IpAddr;

    /// Remote IP address, used when computing outbound checksums.
    fn remote_ip(&self) -> IpAddr;

    /// Opaque label identifying the local endpoint.
    fn local_label(&self) -> &[u8];

    /// Opaque label identifying the remote endpoint.
    fn remote_label(&self) -> &[u8];
}

/// Monotonic clock used by the whole stack.
pub mod time {
    use std::sync::OnceLock;
    use std::time::Instant;

    static EPOCH: OnceLock<Instant> = OnceLock::new();

    /// Nanoseconds since an arbitrary process-local epoch. Never zero,
    /// so a zero timestamp can mean "unset" everywhere.
    pub fn now() -> u64 {
        let epoch = *EPOCH.get_or_init(Instant::now);
        epoch.elapsed().as_nanos() as u64 + 1
    }
}

/// In-memory link pair for tests and local stacks.
pub struct Loopback {
    tx: Sender<Datagram>,
    rx: Receiver<Datagram>,
    local_ip: IpAddr,
    remote_ip: IpAddr,
    local_label: Vec<u8>,
    remote_label: Vec<u8>,
    mps: u32,
}

impl Loopback {
    /// Creates two cross-connected links with distinct synthetic
    /// addresses. Dropping one side makes `recv` on the other return
    /// an error, which the connection treats as link failure.
    pub fn pair(mps: u32) -> (Loopback, Loopback) {
        let a_ip: IpAddr = "127.0.0.1".parse().unwrap();
        let b_ip: IpAddr = "127.0.0.2".parse().unwrap();
        let (a_tx, b_rx) = unbounded();
        let (b_tx, a_rx) = unbounded();
        let a = Loopback {
            tx: a_tx,
            rx: a_rx,
            local_ip: a_ip,
            remote_ip: b_ip,
            local_label: b"loopback:a".to_vec(),
            remote_label: b"loopback:b".to_vec(),
            mps,
        };
        let b = Loopback {
            tx: b_tx,
            rx: b_rx,
            local_ip: b_ip,
            remote_ip: a_ip,
            local_label: b"loopback:b".to_vec(),
            remote_label: b"loopback:a".to_vec(),
            mps,
        };
        (a, b)
    }
}

#[async_trait]
impl Link for Loopback {
    async fn recv(&self) -> Result<Datagram> {
        self.rx
            .recv()
            .await
            .map_err(|_| Error::new(ErrorKind::BrokenPipe, "link closed"))
    }

    async fn send(&self, buf: Vec<u8>) -> Result<()> {
        let dg = Datagram {
            buf,
            src_ip: self.local_ip,
            dst_ip: self.remote_ip,
            proto: PROTO_DCCP,
        };
        self.tx
            .send(dg)
            .await
            .map_err(|_| Error::new(ErrorKind::BrokenPipe, "link closed"))
    }

    fn mps(&self) -> u32 {
        self.mps
    }

    fn local_ip(&self) -> IpAddr {
        self.local_ip
    }

    fn remote_ip(&self) -> IpAddr {
        self.remote_ip
    }

    fn local_label(&self) -> &[u8] {
        &self.local_label
    }

    fn remote_label(&self) -> &[u8] {
        &self.remote_label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::task;
    use failure::Error;

    async fn loopback() -> std::result::Result<(), Error> {
        let (a, b) = Loopback::pair(1500);
        a.send(b"ping".to_vec()).await?;
        let dg = b.recv().await?;
        assert_eq!(dg.buf, b"ping");
        assert_eq!(dg.src_ip, a.local_ip());
        assert_eq!(dg.dst_ip, b.local_ip());
        assert_eq!(dg.proto, PROTO_DCCP);
        Ok(())
    }

    #[test]
    fn test_loopback() {
        task::block_on(loopback()).unwrap();
    }

    async fn closed() -> std::result::Result<(), Error> {
        let (a, b) = Loopback::pair(1500);
        drop(b);
        assert!(a.send(b"ping".to_vec()).await.is_err());
        assert!(a.recv().await.is_err());
        Ok(())
    }

    #[test]
    fn test_closed() {
        task::block_on(closed()).unwrap();
    }

    #[test]
    fn test_clock_never_zero() {
        assert!(time::now() > 0);
        assert!(time::now() <= time::now());
    }
}
