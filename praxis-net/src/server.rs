//! Server-side communicator.
//!
//! Owns the listener socket, two worker threads per connection (sender and
//! receiver), the shared inbound game-message queue, the pause gate, and the
//! single-shot auction timer. Every inbound message is posted to the event
//! channel for the session driver; game messages are additionally placed on
//! the inbound queue for retrieval by controller logic via [`Communicator::recv`].
//!
//! Ordering: each connection's sender drains a FIFO queue, so outbound
//! messages leave in `send` order; each receiver enqueues inbound messages
//! in arrival order. The `connect` event for a socket is posted before its
//! receive worker starts, so it always precedes that client's first message.

use std::collections::VecDeque;
use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{error, info, warn};

use praxis_types::SeatId;

use crate::framing::{read_message, write_message};
use crate::protocol::{GameMessage, Message};

/// Seconds of sender idleness before a keepalive ping goes out.
pub const PING_INTERVAL: Duration = Duration::from_secs(2);

/// Seconds of receiver silence before a peer counts as disconnected.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

const SYNC_PROBES: usize = 4;
const SYNC_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Identifier of one TCP connection. Stable for the socket's lifetime;
/// distinct from the seat the connection may later be bound to.
pub type ConnectionId = u64;

/// An inbound game message paired with its origin. `None` marks messages
/// synthesized by the coordinator itself (timer expiry).
pub type GameItem = (Option<Arc<Connection>>, GameMessage);

/// A network event delivered to the session driver.
pub struct NetEvent {
    pub conn: Arc<Connection>,
    pub message: Message,
}

enum SenderCmd {
    Send(Message),
    Stop,
}

/// Everything needed to talk to one client: the socket, the outbound FIFO,
/// the sync-reply queue, and the measured clock offset.
pub struct Connection {
    id: ConnectionId,
    addr: SocketAddr,
    stream: TcpStream,
    seat: Mutex<Option<SeatId>>,
    out_tx: Sender<SenderCmd>,
    sync_tx: Sender<f64>,
    sync_rx: Mutex<Receiver<f64>>,
    clock_offset: Mutex<f64>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The seat this connection is bound to, if any. Bound at allocation
    /// and rebound on relogin.
    pub fn seat(&self) -> Option<SeatId> {
        *self.seat.lock().unwrap()
    }

    pub fn bind_seat(&self, seat: Option<SeatId>) {
        *self.seat.lock().unwrap() = seat;
    }

    /// Server-to-client clock offset in seconds, established by the sync
    /// handshake before any game message is exchanged.
    pub fn clock_offset(&self) -> f64 {
        *self.clock_offset.lock().unwrap()
    }

    fn enqueue(&self, message: Message) {
        // A dead sender means the connection is already torn down.
        let _ = self.out_tx.send(SenderCmd::Send(message));
    }

    /// Stop the sender and shut the socket down; the receive worker then
    /// terminates and synthesizes the disconnect event.
    pub fn close(&self) {
        let _ = self.out_tx.send(SenderCmd::Stop);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    /// Learn the offset between our clock and the client's: four probes,
    /// keep the estimate from the round trip with the smallest latency.
    fn run_clock_sync(&self) {
        let rx = self.sync_rx.lock().unwrap();
        let mut best_rtt = f64::INFINITY;
        for _ in 0..SYNC_PROBES {
            let st1 = unix_now();
            self.enqueue(Message::Sync { ct: None });
            let ct = match rx.recv_timeout(SYNC_REPLY_TIMEOUT) {
                Ok(ct) => ct,
                Err(_) => {
                    warn!("connection {}: no sync reply", self.id);
                    continue;
                }
            };
            let st2 = unix_now();
            let rtt = st2 - st1;
            if rtt < best_rtt {
                best_rtt = rtt;
                *self.clock_offset.lock().unwrap() = ct + rtt / 2.0 - st2;
            }
        }
        info!(
            "connection {}: synchronized, clock offset {:+.4}s",
            self.id,
            self.clock_offset()
        );
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Inbound game-message queue shared by all receive workers.
struct GameQueue {
    items: Mutex<VecDeque<GameItem>>,
    cond: Condvar,
}

impl GameQueue {
    fn new() -> Self {
        GameQueue {
            items: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
        }
    }

    fn push(&self, item: GameItem) {
        self.items.lock().unwrap().push_back(item);
        self.cond.notify_one();
    }

    fn pop(&self) -> GameItem {
        let mut items = self.items.lock().unwrap();
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            items = self.cond.wait(items).unwrap();
        }
    }

    fn pop_nowait(&self) -> Option<GameItem> {
        self.items.lock().unwrap().pop_front()
    }
}

/// The pause gate. While paused, callers asking for game messages and
/// callers sending game messages park here; everything else passes.
struct PauseGate {
    paused: Mutex<bool>,
    cond: Condvar,
}

impl PauseGate {
    fn new() -> Self {
        PauseGate {
            paused: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn pause(&self) {
        *self.paused.lock().unwrap() = true;
    }

    fn resume(&self) {
        *self.paused.lock().unwrap() = false;
        self.cond.notify_all();
    }

    fn is_paused(&self) -> bool {
        *self.paused.lock().unwrap()
    }

    fn block_while_paused(&self) {
        let mut paused = self.paused.lock().unwrap();
        while *paused {
            paused = self.cond.wait(paused).unwrap();
        }
    }
}

struct TimerState {
    generation: u64,
    running: bool,
    interval: f64,
    started_at: Option<Instant>,
    time_left_at_cancel: f64,
}

/// Single-shot auction timer. Expiry enqueues a `timeup` game message;
/// cancellation is idempotent and records the remaining seconds.
struct AuctionTimer {
    state: Mutex<TimerState>,
    cond: Condvar,
}

impl AuctionTimer {
    fn new() -> Self {
        AuctionTimer {
            state: Mutex::new(TimerState {
                generation: 0,
                running: false,
                interval: 0.0,
                started_at: None,
                time_left_at_cancel: 0.0,
            }),
            cond: Condvar::new(),
        }
    }
}

/// Accept loop plus per-connection workers, shared game queue, pause gate,
/// and auction timer.
pub struct Communicator {
    event_tx: Sender<NetEvent>,
    game_queue: Arc<GameQueue>,
    pause_gate: Arc<PauseGate>,
    timer: Arc<AuctionTimer>,
    next_id: Arc<AtomicU64>,
}

impl Communicator {
    /// Build a communicator. The returned receiver yields one event per
    /// connect, per inbound message, and per disconnect.
    pub fn new() -> (Self, Receiver<NetEvent>) {
        let (event_tx, event_rx) = mpsc::channel();
        let comm = Communicator {
            event_tx,
            game_queue: Arc::new(GameQueue::new()),
            pause_gate: Arc::new(PauseGate::new()),
            timer: Arc::new(AuctionTimer::new()),
            next_id: Arc::new(AtomicU64::new(0)),
        };
        (comm, event_rx)
    }

    /// Start accepting client connections on the given IPv4 port.
    /// Non-blocking; returns the bound address (useful with port 0).
    pub fn accept_connections(&self, port: u16) -> io::Result<SocketAddr> {
        use socket2::{Domain, Socket, Type};

        let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        let bind_addr: SocketAddr = ([0, 0, 0, 0], port).into();
        socket.bind(&bind_addr.into())?;
        socket.listen(16)?;
        let listener: TcpListener = socket.into();
        let local = listener.local_addr()?;
        info!("listening on {}", local);

        let event_tx = self.event_tx.clone();
        let game_queue = Arc::clone(&self.game_queue);
        let counter = Arc::clone(&self.next_id);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        error!("accept error: {}", e);
                        break;
                    }
                };
                let id = counter.fetch_add(1, Ordering::SeqCst);
                // Each socket is wired up on its own thread: the clock-sync
                // handshake blocks until the client answers, and the accept
                // loop must keep taking connections in the meantime.
                let event_tx = event_tx.clone();
                let game_queue = Arc::clone(&game_queue);
                thread::spawn(move || {
                    if let Err(e) = setup_connection(id, stream, event_tx, game_queue) {
                        error!("connection {}: setup failed: {}", id, e);
                    }
                });
            }
        });

        Ok(local)
    }

    /// Block until a game message is available. While paused, blocks until
    /// resumed. All messages returned here are game messages; every other
    /// type reaches the driver through the event channel only.
    pub fn recv(&self) -> GameItem {
        self.pause_gate.block_while_paused();
        self.game_queue.pop()
    }

    /// Non-blocking variant of [`recv`](Self::recv), still subject to the
    /// pause gate.
    pub fn recv_nowait(&self) -> Option<GameItem> {
        self.pause_gate.block_while_paused();
        self.game_queue.pop_nowait()
    }

    /// Queue a message for one connection. Game messages park at the pause
    /// gate while paused; every other type bypasses it so the reconnection
    /// protocol can complete mid-pause.
    pub fn send(&self, conn: &Connection, message: Message) {
        if matches!(message, Message::Gm(_)) {
            self.pause_gate.block_while_paused();
        }
        conn.enqueue(message);
    }

    /// Pause: game-message receives and sends block until [`resume`](Self::resume).
    /// Cancels any running auction timer, recording the seconds it had left.
    /// No effect if already paused.
    pub fn pause(&self) {
        if self.pause_gate.is_paused() {
            return;
        }
        self.pause_gate.pause();
        self.cancel_timer();
    }

    /// No effect if not paused.
    pub fn resume(&self) {
        self.pause_gate.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.pause_gate.is_paused()
    }

    /// Start the single-shot auction timer. After `interval_secs`, a
    /// `timeup` game message is enqueued as if a client had sent it.
    pub fn start_timer(&self, interval_secs: u32) {
        let generation;
        {
            let mut st = self.timer.state.lock().unwrap();
            st.generation += 1;
            generation = st.generation;
            st.running = true;
            st.interval = interval_secs as f64;
            st.started_at = Some(Instant::now());
        }

        let timer = Arc::clone(&self.timer);
        let queue = Arc::clone(&self.game_queue);
        thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(interval_secs as u64);
            let mut st = timer.state.lock().unwrap();
            loop {
                if st.generation != generation || !st.running {
                    return;
                }
                let now = Instant::now();
                if now >= deadline {
                    st.running = false;
                    drop(st);
                    queue.push((None, GameMessage::Timeup));
                    return;
                }
                let (guard, _) = timer.cond.wait_timeout(st, deadline - now).unwrap();
                st = guard;
            }
        });
    }

    /// Cancel the timer without the `timeup` message, recording the seconds
    /// remaining. No effect if the timer is not running.
    pub fn cancel_timer(&self) {
        let mut st = self.timer.state.lock().unwrap();
        if st.running {
            st.running = false;
            if let Some(started) = st.started_at {
                st.time_left_at_cancel = (st.interval - started.elapsed().as_secs_f64()).max(0.0);
            }
            info!("timer cancelled, {:.2}s left", st.time_left_at_cancel);
        }
        self.timer.cond.notify_all();
    }

    /// Seconds remaining on the most recently started timer.
    pub fn time_left(&self) -> f64 {
        let st = self.timer.state.lock().unwrap();
        match st.started_at {
            Some(started) => st.interval - started.elapsed().as_secs_f64(),
            None => 0.0,
        }
    }

    /// Seconds that were left on the timer when it was last cancelled.
    pub fn time_left_at_cancel(&self) -> f64 {
        self.timer.state.lock().unwrap().time_left_at_cancel
    }
}

/// Wire up one accepted socket: read timeout, connect event, sender worker,
/// receive worker, then the clock-sync handshake. Runs on a per-connection
/// setup thread, not the accept loop. The connect event goes out before the
/// receive worker starts so it cannot lose the race against the client's
/// first message.
fn setup_connection(
    id: ConnectionId,
    stream: TcpStream,
    event_tx: Sender<NetEvent>,
    game_queue: Arc<GameQueue>,
) -> io::Result<()> {
    let addr = stream.peer_addr()?;
    stream.set_read_timeout(Some(IDLE_TIMEOUT))?;

    let (out_tx, out_rx) = mpsc::channel();
    let (sync_tx, sync_rx) = mpsc::channel();
    let conn = Arc::new(Connection {
        id,
        addr,
        stream: stream.try_clone()?,
        seat: Mutex::new(None),
        out_tx,
        sync_tx,
        sync_rx: Mutex::new(sync_rx),
        clock_offset: Mutex::new(0.0),
    });
    info!("connection {} accepted from {}", id, addr);

    if event_tx
        .send(NetEvent {
            conn: Arc::clone(&conn),
            message: Message::Connect,
        })
        .is_err()
    {
        return Ok(());
    }

    let write_stream = stream.try_clone()?;
    let sender_conn = id;
    thread::spawn(move || sender_worker(sender_conn, write_stream, out_rx));

    let read_conn = Arc::clone(&conn);
    let read_stream = stream;
    thread::spawn(move || receive_worker(read_conn, read_stream, event_tx, game_queue));

    conn.run_clock_sync();
    Ok(())
}

/// Drain the outbound FIFO onto the socket, pinging when idle.
fn sender_worker(id: ConnectionId, mut stream: TcpStream, out_rx: Receiver<SenderCmd>) {
    loop {
        match out_rx.recv_timeout(PING_INTERVAL) {
            Ok(SenderCmd::Send(message)) => {
                if let Err(e) = write_message(&mut stream, &message) {
                    warn!("connection {}: send failed, terminating: {}", id, e);
                    break;
                }
            }
            Ok(SenderCmd::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                if let Err(e) = write_message(&mut stream, &Message::Ping) {
                    warn!("connection {}: ping failed, terminating: {}", id, e);
                    break;
                }
            }
        }
    }
}

/// Read frames until the peer goes away, routing game messages onto the
/// shared queue and sync replies to the connection's sync queue. Every
/// message is also posted to the driver's event channel. Termination
/// synthesizes a disconnect event.
fn receive_worker(
    conn: Arc<Connection>,
    stream: TcpStream,
    event_tx: Sender<NetEvent>,
    game_queue: Arc<GameQueue>,
) {
    let mut reader = BufReader::new(stream);
    loop {
        match read_message::<_, Message>(&mut reader) {
            Ok(message) => {
                match &message {
                    Message::Gm(gm) => {
                        game_queue.push((Some(Arc::clone(&conn)), gm.clone()));
                    }
                    Message::Sync { ct: Some(ct) } => {
                        let _ = conn.sync_tx.send(*ct);
                    }
                    _ => {}
                }
                if event_tx
                    .send(NetEvent {
                        conn: Arc::clone(&conn),
                        message,
                    })
                    .is_err()
                {
                    return;
                }
            }
            Err(e) => {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    info!("connection {}: peer closed", conn.id);
                } else {
                    warn!("connection {}: read failed: {}", conn.id, e);
                }
                break;
            }
        }
    }

    conn.close();
    let _ = event_tx.send(NetEvent {
        conn,
        message: Message::Disconnect,
    });
}
