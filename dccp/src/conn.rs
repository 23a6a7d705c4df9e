//! Connection object and its read and write loops.

use crate::socket::{Socket, State};
use crate::{
    Error, CLOSING_BACKOFF_FREQ, CLOSING_BACKOFF_MAX, LISTEN_TIMEOUT, MSL,
    PARTOPEN_BACKOFF_FIRST, PARTOPEN_BACKOFF_MAX, REQUEST_BACKOFF_FIRST, REQUEST_BACKOFF_FREQ,
    REQUEST_BACKOFF_MAX, RESPOND_TIMEOUT,
};
use async_std::channel::{bounded, unbounded, Receiver, Sender};
use async_std::task;
use ccid3::RateCalculator;
use futures::future::{select, Either};
use futures_timer::Delay;
use header::{
    fixed_header_size, read_generic_header, write_generic_header, GenericHeader, PacketType,
    ResetCode, MAX_DATA_OPTION_SIZE,
};
use link::{time, Link, PROTO_DCCP};
use log::debug;
use pin_utils::pin_mut;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Timer and handshake parameters of a connection.
#[derive(Clone, Debug)]
pub(crate) struct Config {
    pub service_code: u32,
    pub local_port: u16,
    pub remote_port: u16,
    pub allow_short_seq_no: bool,
    /// First period, total budget and per-retry cap of the Request
    /// backoff.
    pub request_backoff: (u64, u64, u64),
    /// First period, total budget and per-retry cap of the PARTOPEN
    /// timer.
    pub partopen_backoff: (u64, u64, u64),
    /// Total budget and per-retry cap of the Close backoff; the first
    /// period is two round-trip times.
    pub closing_backoff: (u64, u64),
    pub respond_timeout: u64,
    pub listen_timeout: u64,
    pub msl: u64,
}

/// Builder for connections.
#[derive(Clone, Debug)]
pub struct ConnBuilder {
    cfg: Config,
}

impl ConnBuilder {
    /// Creates a builder for connections offering or requesting the
    /// given service code. All timers default to the protocol
    /// constants.
    pub fn new(service_code: u32) -> ConnBuilder {
        ConnBuilder {
            cfg: Config {
                service_code,
                local_port: 0,
                remote_port: 0,
                allow_short_seq_no: false,
                request_backoff: (
                    REQUEST_BACKOFF_FIRST,
                    REQUEST_BACKOFF_MAX,
                    REQUEST_BACKOFF_FREQ,
                ),
                partopen_backoff: (
                    PARTOPEN_BACKOFF_FIRST,
                    PARTOPEN_BACKOFF_MAX,
                    PARTOPEN_BACKOFF_MAX,
                ),
                closing_backoff: (CLOSING_BACKOFF_MAX, CLOSING_BACKOFF_FREQ),
                respond_timeout: RESPOND_TIMEOUT,
                listen_timeout: LISTEN_TIMEOUT,
                msl: MSL,
            },
        }
    }

    /// Local and remote port carried in every header.
    pub fn set_ports(mut self, local: u16, remote: u16) -> Self {
        self.cfg.local_port = local;
        self.cfg.remote_port = remote;
        self
    }

    /// Permit 24-bit sequence numbers on Data, Ack and DataAck.
    pub fn set_allow_short_seq_no(mut self, allow: bool) -> Self {
        self.cfg.allow_short_seq_no = allow;
        self
    }

    /// Request resend backoff: first period, total budget, cap.
    pub fn set_request_backoff(mut self, first: u64, budget: u64, cap: u64) -> Self {
        self.cfg.request_backoff = (first, budget, cap);
        self
    }

    /// PARTOPEN timer backoff: first period, total budget, cap.
    pub fn set_partopen_backoff(mut self, first: u64, budget: u64, cap: u64) -> Self {
        self.cfg.partopen_backoff = (first, budget, cap);
        self
    }

    /// Close resend backoff: total budget and cap. The first period
    /// is always two round-trip times.
    pub fn set_closing_backoff(mut self, budget: u64, cap: u64) -> Self {
        self.cfg.closing_backoff = (budget, cap);
        self
    }

    /// How long the server waits in RESPOND for the confirming Ack.
    pub fn set_respond_timeout(mut self, timeout: u64) -> Self {
        self.cfg.respond_timeout = timeout;
        self
    }

    /// How long the server waits in LISTEN for a Request.
    pub fn set_listen_timeout(mut self, timeout: u64) -> Self {
        self.cfg.listen_timeout = timeout;
        self
    }

    /// Maximum segment lifetime, which scales the TIMEWAIT quiet
    /// period.
    pub fn set_msl(mut self, msl: u64) -> Self {
        self.cfg.msl = msl;
        self
    }

    /// Actively opens a connection over the link.
    pub fn client<L: Link + 'static>(&self, link: L) -> Conn {
        Conn::start(self.cfg.clone(), Arc::new(link), false)
    }

    /// Passively waits for a connection over the link.
    pub fn server<L: Link + 'static>(&self, link: L) -> Conn {
        Conn::start(self.cfg.clone(), Arc::new(link), true)
    }
}

/// Everything guarded by the connection lock.
pub(crate) struct Locked {
    pub socket: Socket,
    pub rate: RateCalculator,
    /// Sticky terminal error; once set it never changes.
    pub err: Option<Error>,
    /// When the Request was first sent, for the RTT sample.
    pub request_stamp: u64,
    /// When the Response was sent, for the RTT sample.
    pub respond_stamp: u64,
    /// Data bytes sent since the last feedback packet.
    pub bytes_since_feedback: u64,
    /// When the last feedback packet was processed.
    pub feedback_recv_stamp: u64,
    /// Inverse loss event rate from the last feedback packet.
    pub last_loss_rate_inv: u32,
    /// Data bytes received since the last receive-rate report.
    pub recv_bytes: u64,
    /// Start of the current receive-rate measurement window.
    pub recv_stamp: u64,
}

/// What the write loop wakes up for: a control packet to emit, or a
/// state change that may unblock application data.
pub(crate) enum WriterEvent {
    Emit(GenericHeader),
    StateChanged,
}

pub(crate) struct Inner {
    pub link: Arc<dyn Link>,
    pub cfg: Config,
    pub lk: Mutex<Locked>,
    ctrl_tx: Mutex<Option<Sender<WriterEvent>>>,
    pub write_tx: Mutex<Option<Sender<Vec<u8>>>>,
    pub read_tx: Mutex<Option<Sender<Vec<u8>>>>,
    pub read_rx: Receiver<Vec<u8>>,
}

impl Inner {
    pub fn state(&self) -> State {
        self.lk.lock().unwrap().socket.state()
    }

    pub fn error(&self) -> Option<Error> {
        self.lk.lock().unwrap().err
    }

    /// Queues a control packet for the write loop. Never blocks; the
    /// queue is unbounded and survives until the connection closes.
    pub fn inject(&self, h: GenericHeader) {
        if let Some(tx) = self.ctrl_tx.lock().unwrap().as_ref() {
            tx.try_send(WriterEvent::Emit(h)).ok();
        }
    }

    /// Wakes the write loop so it can observe a state change.
    pub fn notify_writer(&self) {
        if let Some(tx) = self.ctrl_tx.lock().unwrap().as_ref() {
            tx.try_send(WriterEvent::StateChanged).ok();
        }
    }

    /// Closes the user-facing channels. The sticky error is in place
    /// before the channels close, so blocked readers and writers
    /// always observe it.
    pub fn teardown_user(&self, lk: &mut Locked) {
        if lk.err.is_none() {
            lk.err = Some(Error::Eof);
        }
        *self.write_tx.lock().unwrap() = None;
        *self.read_tx.lock().unwrap() = None;
    }

    /// Drops the control queue, which lets the write loop drain and
    /// exit.
    pub fn close_writer(&self) {
        *self.ctrl_tx.lock().unwrap() = None;
    }

    pub fn on_link_failure(self: &Arc<Self>) {
        let mut lk = self.lk.lock().unwrap();
        if lk.socket.state() == State::Closed {
            return;
        }
        if lk.err.is_none() {
            lk.err = Some(Error::Io);
        }
        self.goto_closed(&mut lk);
    }

    /// An empty header of the given type; sequence and
    /// acknowledgement numbers are stamped by the write loop.
    pub fn packet(&self, ty: PacketType) -> GenericHeader {
        GenericHeader {
            source_port: self.cfg.local_port,
            dest_port: self.cfg.remote_port,
            ccval: 0,
            cscov: 0,
            ty,
            x: true,
            seq_no: 0,
            ack_no: None,
            service_code: None,
            reset: None,
            options: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn generate_request(&self) -> GenericHeader {
        let mut h = self.packet(PacketType::Request);
        h.service_code = Some(self.cfg.service_code);
        h
    }

    pub fn generate_response(&self, service_code: u32) -> GenericHeader {
        let mut h = self.packet(PacketType::Response);
        h.service_code = Some(service_code);
        h
    }

    pub fn generate_reset(&self, code: ResetCode) -> GenericHeader {
        let mut h = self.packet(PacketType::Reset);
        h.reset = Some([code as u8, 0, 0, 0]);
        h
    }

    /// Stamps the next GSS and, for ack-bearing types without an
    /// explicit acknowledgement, the current GSR, then serializes.
    pub fn stamp_and_encode(
        &self,
        lk: &mut Locked,
        h: &mut GenericHeader,
    ) -> header::Result<Vec<u8>> {
        h.seq_no = lk.socket.next_gss();
        if h.ty.has_ack_no() && h.ack_no.is_none() {
            h.ack_no = Some(lk.socket.gsr());
        }
        write_generic_header(
            h,
            self.link.local_ip(),
            self.link.remote_ip(),
            PROTO_DCCP,
            self.cfg.allow_short_seq_no,
        )
    }

    /// Segment size used by the rate calculator: the user MTU.
    pub fn segment_size(&self) -> u32 {
        mtu_from_mps(self.link.mps())
    }
}

/// The user MTU: what the link carries, minus the data option budget
/// and the largest fixed header a data packet can have.
pub(crate) fn mtu_from_mps(mps: u32) -> u32 {
    mps.saturating_sub(MAX_DATA_OPTION_SIZE + fixed_header_size(PacketType::DataAck, true) as u32)
        .max(1)
}

/// A DCCP connection endpoint.
///
/// Cloning yields another handle to the same connection.
pub struct Conn {
    pub(crate) inner: Arc<Inner>,
}

impl Clone for Conn {
    fn clone(&self) -> Conn {
        Conn {
            inner: self.inner.clone(),
        }
    }
}

impl Conn {
    fn start(cfg: Config, link: Arc<dyn Link>, server: bool) -> Conn {
        let (ctrl_tx, ctrl_rx) = unbounded();
        let (write_tx, write_rx) = bounded(1);
        let (read_tx, read_rx) = unbounded();
        let mut socket = Socket::default();
        socket.set_mps(link.mps());
        let ss = mtu_from_mps(link.mps());
        let inner = Arc::new(Inner {
            link,
            cfg,
            lk: Mutex::new(Locked {
                socket,
                rate: RateCalculator::default(),
                err: None,
                request_stamp: 0,
                respond_stamp: 0,
                bytes_since_feedback: 0,
                feedback_recv_stamp: 0,
                last_loss_rate_inv: 0,
                recv_bytes: 0,
                recv_stamp: 0,
            }),
            ctrl_tx: Mutex::new(Some(ctrl_tx)),
            write_tx: Mutex::new(Some(write_tx)),
            read_tx: Mutex::new(Some(read_tx)),
            read_rx,
        });
        {
            let mut lk = inner.lk.lock().unwrap();
            lk.rate.init(time::now(), ss);
            if server {
                inner.goto_listen(&mut lk);
            } else {
                inner.goto_request(&mut lk);
            }
        }
        task::spawn(read_loop(inner.clone()));
        task::spawn(write_loop(inner.clone(), ctrl_rx, write_rx));
        Conn { inner }
    }
}

/// Consumes datagrams from the link, decodes them lock free and
/// dispatches the result under the connection lock. Per-packet codec
/// errors drop the packet; a link failure tears the connection down.
async fn read_loop(inner: Arc<Inner>) {
    loop {
        if inner.state() == State::Closed {
            break;
        }
        let dg = match inner.link.recv().await {
            Ok(dg) => dg,
            Err(e) => {
                debug!("link read: {}", e);
                inner.on_link_failure();
                break;
            }
        };
        let now = time::now();
        match read_generic_header(
            &dg.buf,
            dg.src_ip,
            dg.dst_ip,
            dg.proto,
            inner.cfg.allow_short_seq_no,
        ) {
            Ok(h) => inner.on_packet(h, now),
            Err(e) => debug!("dropping packet: {}", e),
        }
    }
}

enum Step {
    Ctrl(WriterEvent),
    App(Vec<u8>),
}

/// Picks the next unit of work for the write loop. Control packets
/// win over application data; application data is only consumed in
/// the states that may carry it.
async fn next_step(
    data_ok: bool,
    ctrl_rx: &Receiver<WriterEvent>,
    app_rx: &Receiver<Vec<u8>>,
) -> Option<Step> {
    if !data_ok {
        return ctrl_rx.recv().await.ok().map(Step::Ctrl);
    }
    if let Ok(ev) = ctrl_rx.try_recv() {
        return Some(Step::Ctrl(ev));
    }
    let ctrl = ctrl_rx.recv();
    let app = app_rx.recv();
    pin_mut!(ctrl);
    pin_mut!(app);
    match select(ctrl, app).await {
        Either::Left((Ok(ev), _)) => Some(Step::Ctrl(ev)),
        Either::Left((Err(_), _)) => None,
        Either::Right((Ok(b), _)) => Some(Step::App(b)),
        // The application side is torn down; keep serving control
        // packets until the queue closes.
        Either::Right((Err(_), _)) => ctrl_rx.recv().await.ok().map(Step::Ctrl),
    }
}

/// Emits control packets and application segments. Sequence numbers
/// are stamped under the lock in emission order, so GSS is strictly
/// increasing on the wire. The lock is never held across a send.
async fn write_loop(inner: Arc<Inner>, ctrl_rx: Receiver<WriterEvent>, app_rx: Receiver<Vec<u8>>) {
    loop {
        let data_ok = matches!(inner.state(), State::PartOpen | State::Open);
        let step = match next_step(data_ok, &ctrl_rx, &app_rx).await {
            Some(step) => step,
            None => break,
        };
        match step {
            Step::Ctrl(WriterEvent::StateChanged) => continue,
            Step::Ctrl(WriterEvent::Emit(mut h)) => {
                let buf = {
                    let mut lk = inner.lk.lock().unwrap();
                    inner.stamp_and_encode(&mut lk, &mut h)
                };
                match buf {
                    Ok(buf) => {
                        if inner.link.send(buf).await.is_err() {
                            inner.on_link_failure();
                        }
                    }
                    Err(e) => debug!("encode {:?}: {}", h.ty, e),
                }
            }
            Step::App(b) => {
                let (buf, delay) = {
                    let mut lk = inner.lk.lock().unwrap();
                    let mut h = inner.packet(PacketType::DataAck);
                    h.data = b;
                    lk.bytes_since_feedback += h.data.len() as u64;
                    // The allowed sending rate paces data emission.
                    let x = u64::from(lk.rate.x()).max(1);
                    let delay = h.data.len() as u64 * 1_000_000_000 / x;
                    (inner.stamp_and_encode(&mut lk, &mut h), delay)
                };
                match buf {
                    Ok(buf) => {
                        if delay > 0 {
                            Delay::new(Duration::from_nanos(delay)).await;
                        }
                        if inner.link.send(buf).await.is_err() {
                            inner.on_link_failure();
                        }
                    }
                    Err(e) => debug!("encode segment: {}", e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use link::Loopback;
    use test_link::LossyLinkBuilder;

    const SC: u32 = 42;

    fn builder() -> (ConnBuilder, ConnBuilder) {
        let client = ConnBuilder::new(SC)
            .set_ports(100, 200)
            .set_partopen_backoff(5_000_000, 240_000_000_000, 5_000_000);
        let server = ConnBuilder::new(SC).set_ports(200, 100);
        (client, server)
    }

    fn pair() -> (Conn, Conn) {
        let (a, b) = Loopback::pair(1500);
        let (cb, sb) = builder();
        (cb.client(a), sb.server(b))
    }

    async fn read_or_timeout(conn: &Conn, ms: u64) -> Option<Vec<u8>> {
        let read = conn.read_segment();
        let timeout = Delay::new(Duration::from_millis(ms));
        pin_mut!(read);
        pin_mut!(timeout);
        match select(read, timeout).await {
            Either::Left((Ok(b), _)) => Some(b),
            Either::Left((Err(_), _)) => None,
            Either::Right(_) => None,
        }
    }

    async fn open_and_transfer() -> Result<()> {
        let (client, server) = pair();
        client.write_segment(b"ping".to_vec()).await?;
        assert_eq!(server.read_segment().await?, b"ping");
        server.write_segment(b"pong".to_vec()).await?;
        assert_eq!(client.read_segment().await?, b"pong");
        Ok(())
    }

    #[test]
    fn test_open_and_transfer() {
        task::block_on(open_and_transfer()).unwrap();
    }

    async fn close_connection() -> Result<()> {
        let (client, server) = pair();
        client.write_segment(b"ping".to_vec()).await?;
        server.read_segment().await?;
        client.close()?;
        // The peer observes a normal close.
        assert_eq!(server.read_segment().await, Err(Error::Eof));
        assert_eq!(server.error(), Some(Error::Eof));
        // Our side keeps returning the sticky error.
        assert_eq!(client.read_segment().await, Err(Error::Eof));
        assert_eq!(client.write_segment(b"x".to_vec()).await, Err(Error::Ebadf));
        assert_eq!(client.close(), Err(Error::Eof));
        Ok(())
    }

    #[test]
    fn test_close_connection() {
        task::block_on(close_connection()).unwrap();
    }

    async fn request_times_out() -> Result<()> {
        let (a, _b) = Loopback::pair(1500);
        let client = ConnBuilder::new(SC)
            .set_request_backoff(2_000_000, 10_000_000, 4_000_000)
            .client(a);
        // Nobody answers: the Request backoff runs out and the
        // connection dies with an i/o error.
        assert_eq!(client.read_segment().await, Err(Error::Io));
        assert_eq!(client.error(), Some(Error::Io));
        assert_eq!(client.write_segment(b"x".to_vec()).await, Err(Error::Ebadf));
        assert_eq!(client.close(), Err(Error::Io));
        Ok(())
    }

    #[test]
    fn test_request_times_out() {
        task::block_on(request_times_out()).unwrap();
    }

    async fn listen_times_out() -> Result<()> {
        let (_a, b) = Loopback::pair(1500);
        let server = ConnBuilder::new(SC)
            .set_listen_timeout(5_000_000)
            .server(b);
        assert_eq!(server.read_segment().await, Err(Error::Io));
        Ok(())
    }

    #[test]
    fn test_listen_times_out() {
        task::block_on(listen_times_out()).unwrap();
    }

    async fn partopen_sync_moves_to_open() -> Result<()> {
        let (client, server) = pair();
        // No data flows, so no DataAck will ever reach the client;
        // the Sync emitted by the PARTOPEN timer forces a SyncAck
        // that completes the handshake anyway.
        Delay::new(Duration::from_millis(200)).await;
        assert_eq!(client.inner.state(), State::Open);
        assert_eq!(server.inner.state(), State::Open);
        Ok(())
    }

    #[test]
    fn test_partopen_sync_moves_to_open() {
        task::block_on(partopen_sync_moves_to_open()).unwrap();
    }

    async fn bad_service_code_is_refused() -> Result<()> {
        let (a, b) = Loopback::pair(1500);
        let client = ConnBuilder::new(99).set_ports(100, 200).client(a);
        let server = ConnBuilder::new(SC).set_ports(200, 100).server(b);
        assert_eq!(client.read_segment().await, Err(Error::Io));
        // The server keeps listening.
        assert_eq!(server.inner.state(), State::Listen);
        Ok(())
    }

    #[test]
    fn test_bad_service_code_is_refused() {
        task::block_on(bad_service_code_is_refused()).unwrap();
    }

    async fn abort_resets_peer() -> Result<()> {
        let (client, server) = pair();
        client.write_segment(b"ping".to_vec()).await?;
        server.read_segment().await?;
        client.abort();
        assert_eq!(server.read_segment().await, Err(Error::Io));
        assert_eq!(client.error(), Some(Error::Io));
        Ok(())
    }

    #[test]
    fn test_abort_resets_peer() {
        task::block_on(abort_resets_peer()).unwrap();
    }

    #[test]
    fn test_get_mtu() {
        let (client, _server) = pair();
        // MPS minus the data option budget and the largest data
        // header.
        assert_eq!(client.get_mtu(), 1500 - 24 - 24);
    }

    async fn gss_strictly_increasing_on_wire() -> Result<()> {
        let (a, b) = Loopback::pair(1500);
        let _client = ConnBuilder::new(SC)
            .set_request_backoff(1_000_000, 50_000_000, 1_000_000)
            .client(a);
        let mut prev = 0;
        for i in 0..5 {
            let dg = b.recv().await.unwrap();
            let h = read_generic_header(&dg.buf, dg.src_ip, dg.dst_ip, dg.proto, false).unwrap();
            assert_eq!(h.ty, PacketType::Request);
            if i > 0 {
                assert!(h.seq_no > prev);
            }
            prev = h.seq_no;
        }
        Ok(())
    }

    #[test]
    fn test_gss_strictly_increasing_on_wire() {
        task::block_on(gss_strictly_increasing_on_wire()).unwrap();
    }

    async fn duplicating_link_delivers_once() -> Result<()> {
        let (a, b) = LossyLinkBuilder::new(1.0, 1.0).split(1500);
        let (cb, sb) = builder();
        let client = cb.client(a);
        let server = sb.server(b);
        for i in 0..3u8 {
            client.write_segment(vec![i]).await?;
        }
        for i in 0..3u8 {
            assert_eq!(server.read_segment().await?, vec![i]);
        }
        // Every datagram crossed the link twice, but duplicated
        // payloads do not reach the application.
        assert_eq!(read_or_timeout(&server, 50).await, None);
        Ok(())
    }

    #[test]
    fn test_duplicating_link_delivers_once() {
        task::block_on(duplicating_link_delivers_once()).unwrap();
    }
}
