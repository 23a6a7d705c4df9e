//! # TFRC rate calculator
//! Sender-side computation of the allowed sending rate for CCID3.
//! The calculator is a pure transducer: it owns no timers and does no
//! I/O, all time is supplied by the caller as monotonic nanoseconds.
//! Feedback packets drive `on_read`, which applies slow-start
//! doubling, the TCP throughput equation and the receive-rate history
//! set, and returns the new allowed rate in bytes per second.
//!
//! The throughput equation is evaluated through a precomputed lookup
//! table indexed by the inverse loss event rate, so the per-feedback
//! path uses only integer arithmetic.
#![deny(missing_docs)]
mod qtable;

use crate::qtable::q;

/// Maximum size of the initial window in bytes.
pub const X_MAX_INIT_WIN: u32 = 4380;
/// Maximum backoff interval in ns: the sending rate never drops below
/// one segment per this interval.
pub const X_MAX_BACKOFF_INTERVAL: u64 = 64_000_000_000;
/// Maximum receive rate, in bytes per second.
pub const X_RECV_MAX: u32 = i32::MAX as u32;
/// Number of slots in the receive-rate history set.
pub const X_RECV_SET_SIZE: usize = 3;

/// Computes the allowed sending rate of the sender.
#[derive(Clone, Debug, Default)]
pub struct RateCalculator {
    /// Current allowed sending rate, in bytes per second.
    x: u32,
    /// Time last doubled during slow start, or zero before the first
    /// feedback packet.
    tld: u64,
    /// Receive limit, in bytes per second.
    recv_limit: u32,
    x_recv_set: XRecvSet,
}

impl RateCalculator {
    /// Resets the calculator for new use. The allowed rate before the
    /// first feedback packet arrives is one segment per second.
    pub fn init(&mut self, _now: u64, ss: u32) {
        self.x = ss;
        self.tld = 0;
        // X_recv_set starts out empty, which reads as an infinite
        // receive limit, so the sending rate is not limited by the
        // receive rate until real reports arrive.
        self.recv_limit = X_RECV_MAX;
        self.x_recv_set.init();
    }

    /// Current allowed sending rate in bytes per second.
    pub fn x(&self) -> u32 {
        self.x
    }

    /// Handles the very first feedback packet, which supplies the
    /// first RTT estimate.
    fn on_first_read(&mut self, now: u64, ss: u32, rtt: u64) -> u32 {
        self.tld = now;
        self.x = init_rate(ss, rtt);
        self.x
    }

    /// Called for every feedback packet; returns the new allowed
    /// sending rate in bytes per second.
    ///
    /// `x_recv` is the receive rate reported by the peer.
    /// `loss_rate_inv` is the inverse of the loss event rate, zero
    /// while no loss event has been observed yet and at least one
    /// afterwards. `data_limited` says whether the entire interval
    /// covered by the feedback was limited by application supply, and
    /// `new_loss` whether the feedback reports a new loss event or an
    /// increase in the loss event rate; both predicates are the
    /// caller's.
    pub fn on_read(
        &mut self,
        now: u64,
        ss: u32,
        mut x_recv: u32,
        rtt: u64,
        loss_rate_inv: u32,
        data_limited: bool,
        new_loss: bool,
    ) -> u32 {
        if self.tld == 0 {
            return self.on_first_read(now, ss, rtt);
        }
        if data_limited {
            if new_loss {
                self.x_recv_set.halve();
                x_recv = (u64::from(x_recv) * 85 / 100) as u32;
                self.x_recv_set.maximize(now, x_recv);
                self.recv_limit = self.x_recv_set.max();
            } else {
                self.x_recv_set.maximize(now, x_recv);
                self.recv_limit = self.x_recv_set.max().saturating_mul(2);
            }
        } else {
            self.x_recv_set.update(now, x_recv, rtt);
            self.recv_limit = self.x_recv_set.max().saturating_mul(2);
        }
        if loss_rate_inv > 0 {
            // Post slow start.
            let x_eq = thru_eq(ss, rtt, loss_rate_inv);
            self.x = x_eq
                .min(self.recv_limit)
                .max((1_000_000_000 * u64::from(ss) / X_MAX_BACKOFF_INTERVAL) as u32);
        } else if now - self.tld >= rtt {
            // Initial slow start.
            self.x = self
                .x
                .saturating_mul(2)
                .min(self.recv_limit)
                .max(init_rate(ss, rtt));
            self.tld = now;
        }
        self.x
    }
}

/// The allowed initial sending rate: one initial window per round
/// trip, never less than one byte per second.
pub fn init_rate(ss: u32, rtt: u64) -> u32 {
    assert!(ss > 0 && rtt > 0, "unknown SS or RTT");
    let win = (4 * ss).min((2 * ss).max(X_MAX_INIT_WIN));
    ((1_000_000_000 * u64::from(win) / rtt).max(1)).min(u64::from(u32::MAX)) as u32
}

/// The TCP throughput equation for the regime b=1 and t_RTO=4*RTT,
/// in bytes per second.
fn thru_eq(ss: u32, rtt: u64, loss_rate_inv: u32) -> u32 {
    let bps = 1_000 * 1_000_000_000 * u64::from(ss) / (rtt * q(loss_rate_inv));
    bps.min(u64::from(u32::MAX)) as u32
}

#[derive(Clone, Copy, Debug, Default)]
struct XRecvEntry {
    /// Receive rate in bytes per second.
    rate: u32,
    /// Entry timestamp, zero when the slot is empty.
    time: u64,
}

/// The set of recently reported receive rates (RFC 5348 X_recv_set).
#[derive(Clone, Debug, Default)]
struct XRecvSet {
    set: [XRecvEntry; X_RECV_SET_SIZE],
}

impl XRecvSet {
    fn init(&mut self) {
        self.set = Default::default();
    }

    /// Halves every rate in the set, occupied or not.
    fn halve(&mut self) {
        for e in self.set.iter_mut() {
            e.rate /= 2;
        }
    }

    /// The highest rate among occupied slots, or the maximum receive
    /// rate if the set is empty.
    fn max(&self) -> u32 {
        let mut r = None;
        for e in self.set.iter() {
            if e.time == 0 {
                continue;
            }
            if r.map_or(true, |r| e.rate > r) {
                r = Some(e.rate);
            }
        }
        r.unwrap_or(X_RECV_MAX)
    }

    /// Collapses the set to a single slot holding the largest of the
    /// occupied rates and the incoming rate, stamped with now.
    fn maximize(&mut self, now: u64, mut x_recv: u32) {
        for e in self.set.iter_mut() {
            if e.time > 0 {
                x_recv = x_recv.max(e.rate);
            }
            *e = XRecvEntry::default();
        }
        self.set[0] = XRecvEntry {
            rate: x_recv,
            time: now,
        };
    }

    /// Records a new rate, evicting entries older than two round-trip
    /// times and otherwise replacing the oldest slot.
    fn update(&mut self, now: u64, x_recv: u32, rtt: u64) {
        for e in self.set.iter_mut() {
            if e.time > 0 && now - e.time > 2 * rtt {
                *e = XRecvEntry::default();
            }
        }
        let mut j = 0;
        for (i, e) in self.set.iter().enumerate() {
            if e.time == 0 {
                j = i;
                break;
            }
            if e.time < self.set[j].time {
                j = i;
            }
        }
        self.set[j] = XRecvEntry {
            rate: x_recv,
            time: now,
        };
    }

    #[cfg(test)]
    fn occupied(&self) -> usize {
        self.set.iter().filter(|e| e.time > 0).count()
    }
}
