//! Inbound packet dispatch.
//!
//! The read loop hands every successfully decoded packet to
//! `on_packet`, which runs the state table under the connection lock.
//! Anything not listed for the current state is dropped.

use crate::conn::{Inner, Locked};
use crate::socket::State;
use crate::Error;
use header::{
    GenericHeader, Opt, PacketType, ResetCode, OPT_LOSS_EVENT_RATE, OPT_RECEIVE_RATE,
};
use log::{debug, trace};
use std::sync::Arc;

impl Inner {
    pub(crate) fn on_packet(self: &Arc<Self>, h: GenericHeader, now: u64) {
        if h.dest_port != self.cfg.local_port || h.source_port != self.cfg.remote_port {
            debug!("dropping packet for {}:{}", h.source_port, h.dest_port);
            return;
        }
        let mut lk = self.lk.lock().unwrap();
        trace!("{} <- {:?} seq {}", lk.socket.state(), h.ty, h.seq_no);
        match lk.socket.state() {
            State::Closed => {}
            State::Listen => self.on_listen(&mut lk, h),
            State::Request => self.on_request(&mut lk, h, now),
            State::Respond => self.on_respond(&mut lk, h, now),
            State::PartOpen => self.on_partopen(&mut lk, h, now),
            State::Open => self.on_open(&mut lk, h, now),
            State::CloseReq => self.on_closereq(&mut lk, h),
            State::Closing => self.on_closing(&mut lk, h),
            State::TimeWait => {}
        }
    }

    fn on_listen(self: &Arc<Self>, lk: &mut Locked, h: GenericHeader) {
        if h.ty != PacketType::Request {
            return;
        }
        let service_code = h.service_code.unwrap_or(0);
        if service_code != self.cfg.service_code {
            debug!("refusing service code {}", service_code);
            lk.socket.set_gsr(h.seq_no);
            self.inject(self.generate_reset(ResetCode::BadServiceCode));
            return;
        }
        self.goto_respond(lk, service_code, h.seq_no);
        self.inject(self.generate_response(service_code));
    }

    fn on_request(self: &Arc<Self>, lk: &mut Locked, h: GenericHeader, now: u64) {
        match h.ty {
            PacketType::Response => {
                // The Response must acknowledge one of our Requests.
                match h.ack_no {
                    Some(a) if a >= lk.socket.iss() && a <= lk.socket.gss() => {
                        lk.socket.set_gar(a)
                    }
                    _ => return,
                }
                lk.socket.set_isr(h.seq_no);
                lk.socket.set_gsr(h.seq_no);
                lk.socket.set_rtt(now.saturating_sub(lk.request_stamp));
                self.inject(self.packet(PacketType::Ack));
                self.goto_partopen(lk);
            }
            PacketType::Reset => self.on_reset(lk, &h),
            _ => {}
        }
    }

    fn on_respond(self: &Arc<Self>, lk: &mut Locked, h: GenericHeader, now: u64) {
        match h.ty {
            PacketType::Ack | PacketType::DataAck => {
                if !lk.socket.in_seq_window(h.seq_no) {
                    return;
                }
                // Only an acknowledgement of our ISS confirms the
                // handshake.
                match h.ack_no {
                    Some(a) if a >= lk.socket.iss() => lk.socket.set_gar(a),
                    _ => return,
                }
                lk.socket.set_rtt(now.saturating_sub(lk.respond_stamp));
                self.goto_open(lk, h.seq_no);
                self.take_data(lk, &h, now);
            }
            // The Response got lost; the client asks again.
            PacketType::Request => {
                let service_code = lk.socket.service_code();
                self.inject(self.generate_response(service_code));
            }
            PacketType::Reset => self.on_reset(lk, &h),
            _ => {}
        }
    }

    fn on_partopen(self: &Arc<Self>, lk: &mut Locked, h: GenericHeader, now: u64) {
        if !lk.socket.in_seq_window(h.seq_no) {
            return;
        }
        match h.ty {
            PacketType::DataAck | PacketType::Sync | PacketType::SyncAck => {
                if let Some(a) = h.ack_no {
                    lk.socket.set_gar(a);
                }
                self.goto_open(lk, h.seq_no);
                self.on_feedback(lk, &h, now);
                self.take_data(lk, &h, now);
                if h.ty == PacketType::Sync {
                    self.inject_sync_ack(h.seq_no);
                }
            }
            // Data alone carries no acknowledgement, so it cannot
            // move us to OPEN, but its payload is not thrown away.
            PacketType::Data => self.take_data(lk, &h, now),
            PacketType::Ack => {
                if let Some(a) = h.ack_no {
                    lk.socket.set_gar(a);
                }
                lk.socket.set_gsr(h.seq_no);
                self.on_feedback(lk, &h, now);
            }
            PacketType::CloseReq => {
                lk.socket.set_gsr(h.seq_no);
                self.inject(self.packet(PacketType::Close));
                self.goto_closing(lk);
            }
            PacketType::Close => {
                lk.socket.set_gsr(h.seq_no);
                self.reset_with(lk, ResetCode::Closed, Error::Eof);
            }
            PacketType::Reset => self.on_reset(lk, &h),
            _ => {}
        }
    }

    fn on_open(self: &Arc<Self>, lk: &mut Locked, h: GenericHeader, now: u64) {
        if !lk.socket.in_seq_window(h.seq_no) {
            return;
        }
        match h.ty {
            PacketType::Data => self.take_data(lk, &h, now),
            PacketType::Ack | PacketType::DataAck => {
                if let Some(a) = h.ack_no {
                    lk.socket.set_gar(a);
                }
                self.on_feedback(lk, &h, now);
                self.take_data(lk, &h, now);
            }
            PacketType::Sync => {
                lk.socket.set_gsr(h.seq_no);
                self.inject_sync_ack(h.seq_no);
            }
            PacketType::SyncAck => {
                if let Some(a) = h.ack_no {
                    lk.socket.set_gar(a);
                }
                lk.socket.set_gsr(h.seq_no);
            }
            PacketType::CloseReq => {
                lk.socket.set_gsr(h.seq_no);
                self.inject(self.packet(PacketType::Close));
                self.goto_closing(lk);
            }
            PacketType::Close => {
                lk.socket.set_gsr(h.seq_no);
                self.reset_with(lk, ResetCode::Closed, Error::Eof);
            }
            PacketType::Reset => self.on_reset(lk, &h),
            PacketType::Request | PacketType::Response => {}
        }
    }

    fn on_closereq(self: &Arc<Self>, lk: &mut Locked, h: GenericHeader) {
        match h.ty {
            PacketType::Close => self.reset_with(lk, ResetCode::Closed, Error::Eof),
            PacketType::Reset => self.on_reset(lk, &h),
            _ => {}
        }
    }

    fn on_closing(self: &Arc<Self>, lk: &mut Locked, h: GenericHeader) {
        match h.ty {
            PacketType::Reset => self.on_reset(lk, &h),
            // Simultaneous close: answer the peer's Close and finish.
            PacketType::Close => {
                lk.socket.set_gsr(h.seq_no);
                self.inject(self.generate_reset(ResetCode::Closed));
                self.goto_timewait(lk);
            }
            _ => {}
        }
    }

    fn on_reset(self: &Arc<Self>, lk: &mut Locked, h: &GenericHeader) {
        let code = h.reset.map(|r| r[0]).unwrap_or(0);
        let err = if code == ResetCode::Closed as u8 {
            Error::Eof
        } else {
            Error::Io
        };
        if lk.err.is_none() {
            lk.err = Some(err);
        }
        if lk.socket.state() == State::Closing {
            self.goto_timewait(lk);
        } else {
            self.goto_closed(lk);
        }
    }

    fn inject_sync_ack(&self, seq_no: u64) {
        // A SyncAck acknowledges the Sync itself, not GSR.
        let mut h = self.packet(PacketType::SyncAck);
        h.ack_no = Some(seq_no);
        self.inject(h);
    }

    /// Advances GSR and, for data-bearing packets that advance the
    /// sequence, delivers the payload and reports the receive rate
    /// back to the sender. Reordered or duplicated payloads are
    /// dropped, which keeps delivery in sequence order.
    fn take_data(&self, lk: &mut Locked, h: &GenericHeader, now: u64) {
        let newer = h.seq_no > lk.socket.gsr();
        lk.socket.set_gsr(h.seq_no);
        if h.data.is_empty() {
            return;
        }
        if !newer {
            debug!("dropping out-of-order segment {}", h.seq_no);
            return;
        }
        lk.recv_bytes += h.data.len() as u64;
        if let Some(tx) = self.read_tx.lock().unwrap().as_ref() {
            tx.try_send(h.data.clone()).ok();
        }

        let elapsed = now.saturating_sub(lk.recv_stamp).max(1);
        let rate = (lk.recv_bytes.saturating_mul(1_000_000_000) / elapsed)
            .min(u64::from(u32::MAX)) as u32;
        lk.recv_bytes = 0;
        lk.recv_stamp = now;
        let mut ack = self.packet(PacketType::Ack);
        ack.options
            .push(Opt::with_data(OPT_RECEIVE_RATE, rate.to_be_bytes().to_vec()));
        self.inject(ack);
    }

    /// Feeds a feedback packet into the rate calculator. A feedback
    /// packet is any ack-bearing packet carrying a Receive Rate
    /// option.
    fn on_feedback(&self, lk: &mut Locked, h: &GenericHeader, now: u64) {
        let mut x_recv = None;
        let mut loss_rate_inv = 0;
        for opt in &h.options {
            match opt.ty {
                OPT_RECEIVE_RATE if opt.data.len() == 4 => {
                    x_recv = Some(u32::from_be_bytes([
                        opt.data[0],
                        opt.data[1],
                        opt.data[2],
                        opt.data[3],
                    ]));
                }
                OPT_LOSS_EVENT_RATE if opt.data.len() == 4 => {
                    loss_rate_inv = u32::from_be_bytes([
                        opt.data[0],
                        opt.data[1],
                        opt.data[2],
                        opt.data[3],
                    ]);
                }
                _ => {}
            }
        }
        let x_recv = match x_recv {
            Some(r) => r,
            None => return,
        };
        let ss = self.segment_size();
        let rtt = lk.socket.rtt();
        let interval = now.saturating_sub(lk.feedback_recv_stamp).max(1);
        // The interval was data limited if we sent less than the
        // allowed rate would have carried.
        let allowed = u64::from(lk.rate.x()).saturating_mul(interval) / 1_000_000_000;
        let data_limited = lk.bytes_since_feedback < allowed;
        // A drop of the reported inverse rate means the loss event
        // rate went up.
        let new_loss = loss_rate_inv > 0
            && (lk.last_loss_rate_inv == 0 || loss_rate_inv < lk.last_loss_rate_inv);
        let x = lk
            .rate
            .on_read(now, ss, x_recv, rtt, loss_rate_inv, data_limited, new_loss);
        trace!("allowed rate {} B/s", x);
        if loss_rate_inv > 0 {
            lk.last_loss_rate_inv = loss_rate_inv;
        }
        lk.bytes_since_feedback = 0;
        lk.feedback_recv_stamp = now;
    }
}
