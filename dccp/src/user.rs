//! The user-facing side of a connection.

use crate::conn::{mtu_from_mps, Conn};
use crate::socket::State;
use crate::{Error, Result};
use header::{PacketType, ResetCode};

impl Conn {
    /// Returns the maximum size of an application-level data block
    /// that can be passed to `write_segment`. This is an informative
    /// number: larger segments are sent anyway but may be dropped by
    /// the link layer or a router.
    pub fn get_mtu(&self) -> u32 {
        let mps = self.inner.link.mps();
        let mut lk = self.inner.lk.lock().unwrap();
        lk.socket.set_mps(mps);
        mtu_from_mps(mps)
    }

    /// Blocks until the segment is accepted by the write loop. After
    /// teardown every call fails with `Error::Ebadf`.
    pub async fn write_segment(&self, b: Vec<u8>) -> Result<()> {
        let tx = self.inner.write_tx.lock().unwrap().clone();
        match tx {
            Some(tx) => tx.send(b).await.map_err(|_| Error::Ebadf),
            None => Err(Error::Ebadf),
        }
    }

    /// Blocks until the next segment of application data is received
    /// and returns it. If the connection was never established or
    /// was aborted the result is `Error::Io`; after a normal close it
    /// is `Error::Eof`. Successive calls keep returning the same
    /// error.
    pub async fn read_segment(&self) -> Result<Vec<u8>> {
        match self.inner.read_rx.recv().await {
            Ok(b) => Ok(b),
            Err(_) => Err(self
                .inner
                .error()
                .expect("torn connection missing error")),
        }
    }

    /// The sticky error, if the connection has one.
    pub fn error(&self) -> Option<Error> {
        self.inner.error()
    }

    /// Closes the connection, RFC 4340 section 8.3.
    pub fn close(&self) -> Result<()> {
        let mut lk = self.inner.lk.lock().unwrap();
        match lk.socket.state() {
            State::Listen | State::Request | State::Respond => {
                self.inner.reset_with(&mut lk, ResetCode::Closed, Error::Eof);
                Ok(())
            }
            State::PartOpen | State::Open => {
                self.inner.inject(self.inner.packet(PacketType::Close));
                self.inner.goto_closing(&mut lk);
                Ok(())
            }
            State::CloseReq | State::Closing | State::TimeWait | State::Closed => {
                Err(lk.err.expect("closed connection missing error"))
            }
        }
    }

    /// Aborts the connection, sending the peer a Reset.
    pub fn abort(&self) {
        self.inner.abort();
    }

    /// Opaque label of the local endpoint of the underlying link.
    pub fn local_label(&self) -> Vec<u8> {
        self.inner.link.local_label().to_vec()
    }

    /// Opaque label of the remote endpoint of the underlying link.
    pub fn remote_label(&self) -> Vec<u8> {
        self.inner.link.remote_label().to_vec()
    }
}
