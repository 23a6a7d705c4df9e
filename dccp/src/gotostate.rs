//! State transitions and the timer tasks they arm.
//!
//! Every timer is a spawned task that sleeps, then re-checks the
//! state it guards. If the connection has moved on, the timer exits
//! without effect.

use crate::backoff::BackOff;
use crate::conn::{Inner, Locked};
use crate::socket::State;
use crate::Error;
use async_std::task;
use futures_timer::Delay;
use header::{PacketType, ResetCode};
use link::time;
use log::debug;
use std::sync::Arc;
use std::time::Duration;

impl Inner {
    pub(crate) fn goto_listen(self: &Arc<Self>, lk: &mut Locked) {
        lk.socket.set_server(true);
        lk.socket.set_state(State::Listen);
        let inner = self.clone();
        let timeout = self.cfg.listen_timeout;
        task::spawn(async move {
            Delay::new(Duration::from_nanos(timeout)).await;
            if inner.state() != State::Listen {
                return;
            }
            debug!("LISTEN timed out");
            inner.abort_quietly();
        });
    }

    pub(crate) fn goto_request(self: &Arc<Self>, lk: &mut Locked) {
        lk.socket.set_server(false);
        lk.socket.set_state(State::Request);
        lk.socket.set_service_code(self.cfg.service_code);
        let iss = lk.socket.choose_iss();
        lk.socket.set_gar(iss);
        lk.request_stamp = time::now();
        self.inject(self.generate_request());

        // Resend the Request with exponential backoff until the
        // Response arrives or the budget runs out.
        let inner = self.clone();
        let (first, budget, cap) = self.cfg.request_backoff;
        task::spawn(async move {
            let mut b = BackOff::new(first, budget, cap);
            loop {
                let expired = b.sleep().await.is_err();
                if inner.state() != State::Request {
                    break;
                }
                if expired {
                    inner.abort();
                    break;
                }
                debug!("resend Request");
                let h = inner.generate_request();
                inner.inject(h);
            }
        });
    }

    pub(crate) fn goto_respond(self: &Arc<Self>, lk: &mut Locked, service_code: u32, seq_no: u64) {
        lk.socket.set_state(State::Respond);
        let iss = lk.socket.choose_iss();
        lk.socket.set_gar(iss);
        lk.socket.set_isr(seq_no);
        lk.socket.set_gsr(seq_no);
        lk.socket.set_service_code(service_code);
        lk.respond_stamp = time::now();

        let inner = self.clone();
        let timeout = self.cfg.respond_timeout;
        task::spawn(async move {
            Delay::new(Duration::from_nanos(timeout)).await;
            if inner.state() == State::Respond {
                debug!("RESPOND timed out");
                inner.abort_quietly();
            }
        });
    }

    pub(crate) fn goto_partopen(self: &Arc<Self>, lk: &mut Locked) {
        lk.socket.set_state(State::PartOpen);
        self.notify_writer();

        // PARTOPEN timer, RFC 4340 section 8.1.5. Deviation: besides
        // the Ack we emit a Sync. The forced SyncAck moves us to OPEN
        // even when no DataAck arrives from the server.
        let inner = self.clone();
        let (first, budget, cap) = self.cfg.partopen_backoff;
        task::spawn(async move {
            let mut b = BackOff::new(first, budget, cap);
            loop {
                let expired = b.sleep().await.is_err();
                if inner.state() != State::PartOpen {
                    break;
                }
                if expired {
                    inner.abort();
                    break;
                }
                inner.inject(inner.packet(PacketType::Ack));
                inner.inject(inner.packet(PacketType::Sync));
            }
        });
    }

    pub(crate) fn goto_open(&self, lk: &mut Locked, seq_no: u64) {
        lk.socket.set_osr(seq_no);
        lk.socket.set_state(State::Open);
        let now = time::now();
        lk.recv_stamp = now;
        lk.feedback_recv_stamp = now;
        self.notify_writer();
    }

    pub(crate) fn goto_closing(self: &Arc<Self>, lk: &mut Locked) {
        self.teardown_user(lk);
        lk.socket.set_state(State::Closing);

        // Re-send Close until the Reset arrives; exhaustion moves to
        // TIMEWAIT anyway. The first period is two round-trip times,
        // floored at a millisecond so local links do not spin.
        let inner = self.clone();
        let first = (2 * lk.socket.rtt()).max(1_000_000);
        let (budget, cap) = self.cfg.closing_backoff;
        task::spawn(async move {
            let mut b = BackOff::new(first, budget, cap);
            loop {
                let expired = b.sleep().await.is_err();
                if inner.state() != State::Closing {
                    break;
                }
                if expired {
                    let mut lk = inner.lk.lock().unwrap();
                    inner.goto_timewait(&mut lk);
                    break;
                }
                debug!("resend Close");
                inner.inject(inner.packet(PacketType::Close));
            }
        });
    }

    pub(crate) fn goto_timewait(self: &Arc<Self>, lk: &mut Locked) {
        self.teardown_user(lk);
        lk.socket.set_state(State::TimeWait);
        let inner = self.clone();
        let timeout = 2 * self.cfg.msl;
        task::spawn(async move {
            Delay::new(Duration::from_nanos(timeout)).await;
            if inner.state() == State::TimeWait {
                inner.abort_quietly();
            }
        });
    }

    pub(crate) fn goto_closed(&self, lk: &mut Locked) {
        self.teardown_user(lk);
        lk.socket.set_state(State::Closed);
        self.close_writer();
    }

    /// Aborts the connection, announcing it to the peer.
    pub(crate) fn abort(self: &Arc<Self>) {
        self.abort_with(ResetCode::Aborted);
    }

    pub(crate) fn abort_with(self: &Arc<Self>, code: ResetCode) {
        let mut lk = self.lk.lock().unwrap();
        if lk.socket.state() == State::Closed {
            return;
        }
        if lk.err.is_none() {
            lk.err = Some(Error::Io);
        }
        self.inject(self.generate_reset(code));
        self.goto_closed(&mut lk);
    }

    /// Tears the connection down without announcing it.
    pub(crate) fn abort_quietly(self: &Arc<Self>) {
        let mut lk = self.lk.lock().unwrap();
        if lk.socket.state() == State::Closed {
            return;
        }
        if lk.err.is_none() {
            lk.err = Some(Error::Io);
        }
        self.goto_closed(&mut lk);
    }

    /// Announces a Reset with the given code and closes with the
    /// given sticky error.
    pub(crate) fn reset_with(&self, lk: &mut Locked, code: ResetCode, err: Error) {
        if lk.err.is_none() {
            lk.err = Some(err);
        }
        self.inject(self.generate_reset(code));
        self.goto_closed(lk);
    }
}
