//! Per-connection protocol variables.

use crate::RTT_DEFAULT;
use rand::rngs::OsRng;
use rand::Rng;
use std::fmt;

/// Sequence numbers this far from GSR still count as in-window.
const SEQ_WINDOW: u64 = 1000;

/// The nine states of a DCCP endpoint.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    /// No connection.
    Closed,
    /// Server waiting for a Request.
    Listen,
    /// Client sent a Request, waiting for the Response.
    Request,
    /// Server answered a Request, waiting for the Ack.
    Respond,
    /// Client received the Response; not yet seen an ack from the
    /// server.
    PartOpen,
    /// Data may flow in both directions.
    Open,
    /// Server asked the client to close.
    CloseReq,
    /// Close sent, waiting for the Reset.
    Closing,
    /// Quiet period before the connection record is dropped.
    TimeWait,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            State::Closed => "CLOSED",
            State::Listen => "LISTEN",
            State::Request => "REQUEST",
            State::Respond => "RESPOND",
            State::PartOpen => "PARTOPEN",
            State::Open => "OPEN",
            State::CloseReq => "CLOSEREQ",
            State::Closing => "CLOSING",
            State::TimeWait => "TIMEWAIT",
        };
        f.write_str(s)
    }
}

/// The per-connection sequence variables and negotiated parameters.
/// Mutated only under the connection lock; every sequence update is
/// monotone.
#[derive(Clone, Debug)]
pub struct Socket {
    state: State,
    server: bool,
    service_code: u32,
    iss: u64,
    isr: u64,
    gss: u64,
    gsr: u64,
    gar: u64,
    osr: u64,
    rtt: u64,
    mps: u32,
}

impl Default for Socket {
    fn default() -> Socket {
        Socket {
            state: State::Closed,
            server: false,
            service_code: 0,
            iss: 0,
            isr: 0,
            gss: 0,
            gsr: 0,
            gar: 0,
            osr: 0,
            rtt: RTT_DEFAULT,
            mps: 0,
        }
    }
}

impl Socket {
    /// Current connection state.
    pub fn state(&self) -> State {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: State) {
        self.state = state;
    }

    /// Whether this is the passive end of the connection.
    pub fn is_server(&self) -> bool {
        self.server
    }

    pub(crate) fn set_server(&mut self, server: bool) {
        self.server = server;
    }

    /// Service code agreed during the handshake.
    pub fn service_code(&self) -> u32 {
        self.service_code
    }

    pub(crate) fn set_service_code(&mut self, service_code: u32) {
        self.service_code = service_code;
    }

    /// Picks a random initial sequence number and primes GSS so that
    /// the first packet sent carries exactly ISS.
    pub(crate) fn choose_iss(&mut self) -> u64 {
        let iss = u64::from(OsRng.gen::<u32>()) + 1;
        self.iss = iss;
        self.gss = iss - 1;
        iss
    }

    /// Initial sequence number sent.
    pub fn iss(&self) -> u64 {
        self.iss
    }

    /// Initial sequence number received.
    pub fn isr(&self) -> u64 {
        self.isr
    }

    pub(crate) fn set_isr(&mut self, isr: u64) {
        self.isr = isr;
    }

    /// Greatest sequence number sent.
    pub fn gss(&self) -> u64 {
        self.gss
    }

    /// Allocates the sequence number for the next outgoing packet.
    /// Strictly increasing across the life of the connection.
    pub(crate) fn next_gss(&mut self) -> u64 {
        self.gss += 1;
        self.gss
    }

    /// Greatest in-window sequence number received.
    pub fn gsr(&self) -> u64 {
        self.gsr
    }

    pub(crate) fn set_gsr(&mut self, seq_no: u64) {
        self.gsr = self.gsr.max(seq_no);
    }

    /// Greatest acknowledgement number received.
    pub fn gar(&self) -> u64 {
        self.gar
    }

    pub(crate) fn set_gar(&mut self, ack_no: u64) {
        self.gar = self.gar.max(ack_no);
    }

    /// First sequence number the peer saw from us being acknowledged.
    pub fn osr(&self) -> u64 {
        self.osr
    }

    pub(crate) fn set_osr(&mut self, seq_no: u64) {
        if self.osr == 0 {
            self.osr = seq_no;
        }
    }

    /// Current round-trip estimate in nanoseconds.
    pub fn rtt(&self) -> u64 {
        self.rtt
    }

    pub(crate) fn set_rtt(&mut self, rtt: u64) {
        if rtt > 0 {
            self.rtt = rtt;
        }
    }

    /// Maximum packet size reported by the link.
    pub fn mps(&self) -> u32 {
        self.mps
    }

    pub(crate) fn set_mps(&mut self, mps: u32) {
        self.mps = mps;
    }

    /// Whether an inbound sequence number lands inside the receive
    /// window around GSR. Anything outside is dropped by the
    /// dispatcher.
    pub fn in_seq_window(&self, seq_no: u64) -> bool {
        if self.gsr == 0 {
            return true;
        }
        seq_no + SEQ_WINDOW > self.gsr && seq_no <= self.gsr + SEQ_WINDOW
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choose_iss_primes_gss() {
        let mut s = Socket::default();
        let iss = s.choose_iss();
        assert!(iss > 0);
        assert_eq!(s.next_gss(), iss);
        assert_eq!(s.next_gss(), iss + 1);
    }

    #[test]
    fn test_gss_strictly_monotone() {
        let mut s = Socket::default();
        s.choose_iss();
        let mut prev = 0;
        for _ in 0..100 {
            let n = s.next_gss();
            assert!(n > prev);
            prev = n;
        }
    }

    #[test]
    fn test_gsr_gar_monotone() {
        let mut s = Socket::default();
        s.set_gsr(10);
        s.set_gsr(5);
        assert_eq!(s.gsr(), 10);
        s.set_gar(7);
        s.set_gar(3);
        assert_eq!(s.gar(), 7);
    }

    #[test]
    fn test_osr_set_once() {
        let mut s = Socket::default();
        s.set_osr(42);
        s.set_osr(77);
        assert_eq!(s.osr(), 42);
    }

    #[test]
    fn test_seq_window() {
        let mut s = Socket::default();
        // Everything is in-window until the first packet arrives.
        assert!(s.in_seq_window(1_000_000));
        s.set_gsr(10_000);
        assert!(s.in_seq_window(10_001));
        assert!(s.in_seq_window(9_500));
        assert!(!s.in_seq_window(10_000 + SEQ_WINDOW + 1));
        assert!(!s.in_seq_window(10_000 - SEQ_WINDOW));
    }

    #[test]
    fn test_rtt_ignores_zero_sample() {
        let mut s = Socket::default();
        assert_eq!(s.rtt(), RTT_DEFAULT);
        s.set_rtt(0);
        assert_eq!(s.rtt(), RTT_DEFAULT);
        s.set_rtt(5);
        assert_eq!(s.rtt(), 5);
    }
}
