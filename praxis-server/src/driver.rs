//! The session coordinator.
//!
//! One event-loop thread digests connection events (connect, login,
//! relogin, ready, chat, disconnect); one driver thread walks the session
//! through init, the ready barrier, and the round loop, calling into the
//! game controller. Controller code runs only on the driver thread, so
//! controllers see their round logic single-threaded; the seat table and
//! the controller's shared state are what reconnection reads while the
//! driver is parked at the pause gate.

use std::collections::{HashMap, HashSet};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use log::{error, info, warn};

use praxis_net::protocol::{GameMessage, Message};
use praxis_net::server::{Communicator, Connection, NetEvent};
use praxis_types::{SeatId, SessionParams};

use crate::controllers::{self, Controller};
use crate::error::SessionError;
use crate::history::{make_session_id, write_status, ChatLog, ChatRow, HistoryWriter};
use crate::seats::{SeatSnapshot, SeatStatus, SeatTable};

/// Seconds a freshly connected client has to log in.
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Decides whether a chat line from the first seat is forwarded to the
/// second.
pub type ChatFilter = Arc<dyn Fn(&SeatSnapshot, &SeatSnapshot) -> bool + Send + Sync>;

#[derive(Default)]
struct ChatConfig {
    enabled: bool,
    filter: Option<ChatFilter>,
}

/// Shared run-state flags and counters.
pub struct RunState {
    running: AtomicBool,
    start_enabled: Mutex<bool>,
    start_cv: Condvar,
    finished: Mutex<bool>,
    finished_cv: Condvar,
    unpause_enabled: AtomicBool,
    auto_advance: AtomicBool,
    match_num: AtomicUsize,
    round_num: AtomicUsize,
    session_id: Mutex<String>,
    chat: Mutex<ChatConfig>,
    login_cancels: Mutex<HashMap<SeatId, Arc<AtomicBool>>>,
}

impl RunState {
    fn new() -> Self {
        RunState {
            running: AtomicBool::new(false),
            start_enabled: Mutex::new(false),
            start_cv: Condvar::new(),
            finished: Mutex::new(false),
            finished_cv: Condvar::new(),
            unpause_enabled: AtomicBool::new(true),
            auto_advance: AtomicBool::new(false),
            match_num: AtomicUsize::new(0),
            round_num: AtomicUsize::new(0),
            session_id: Mutex::new(String::new()),
            chat: Mutex::new(ChatConfig::default()),
            login_cancels: Mutex::new(HashMap::new()),
        }
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::SeqCst);
    }

    pub fn match_num(&self) -> usize {
        self.match_num.load(Ordering::SeqCst)
    }

    pub(crate) fn set_match_num(&self, value: usize) {
        self.match_num.store(value, Ordering::SeqCst);
    }

    pub fn round_num(&self) -> usize {
        self.round_num.load(Ordering::SeqCst)
    }

    fn inc_round(&self) {
        self.round_num.fetch_add(1, Ordering::SeqCst);
    }

    pub fn session_id(&self) -> String {
        self.session_id.lock().unwrap().clone()
    }

    fn enable_start(&self) {
        *self.start_enabled.lock().unwrap() = true;
        self.start_cv.notify_all();
    }

    fn disable_start(&self) {
        *self.start_enabled.lock().unwrap() = false;
    }

    /// Wait for every seat to be logged in (the operator's Start becoming
    /// available). Returns false on timeout.
    pub fn wait_start_enabled(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut enabled = self.start_enabled.lock().unwrap();
        while !*enabled {
            let left = match deadline.checked_duration_since(std::time::Instant::now()) {
                Some(left) => left,
                None => return false,
            };
            let (guard, _) = self.start_cv.wait_timeout(enabled, left).unwrap();
            enabled = guard;
        }
        true
    }

    fn set_finished(&self) {
        *self.finished.lock().unwrap() = true;
        self.finished_cv.notify_all();
    }

    /// Wait for the session to reach end-of-experiment. Returns false on
    /// timeout.
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut finished = self.finished.lock().unwrap();
        while !*finished {
            let left = match deadline.checked_duration_since(std::time::Instant::now()) {
                Some(left) => left,
                None => return false,
            };
            let (guard, _) = self.finished_cv.wait_timeout(finished, left).unwrap();
            finished = guard;
        }
        true
    }

    pub fn unpause_enabled(&self) -> bool {
        self.unpause_enabled.load(Ordering::SeqCst)
    }

    fn set_unpause_enabled(&self, value: bool) {
        self.unpause_enabled.store(value, Ordering::SeqCst);
    }

    pub fn auto_advance(&self) -> bool {
        self.auto_advance.load(Ordering::SeqCst)
    }

    pub fn set_auto_advance(&self, value: bool) {
        self.auto_advance.store(value, Ordering::SeqCst);
    }
}

struct Channels {
    ready_tx: Sender<SeatId>,
    ready_rx: Mutex<Receiver<SeatId>>,
    next_tx: Sender<()>,
    next_rx: Mutex<Receiver<()>>,
}

/// Session artifacts opened at start.
struct SessionLog {
    session_id: String,
    history: HistoryWriter,
    chat: ChatLog,
}

/// Either one message for everyone or one per seat, for
/// [`Coordinator::ask_all`] and [`Coordinator::tell_all`].
pub enum Ask {
    Broadcast(Message),
    PerSeat(Vec<Message>),
}

impl Ask {
    fn for_seat(&self, seat: SeatId) -> Message {
        match self {
            Ask::Broadcast(m) => m.clone(),
            Ask::PerSeat(v) => v[seat].clone(),
        }
    }
}

/// Handle to one session: the operator entry points, and the context
/// threaded through controller hooks.
#[derive(Clone)]
pub struct Coordinator {
    pub(crate) comm: Arc<Communicator>,
    seats: Arc<SeatTable>,
    pub(crate) run: Arc<RunState>,
    pub(crate) params: Arc<SessionParams>,
    pub(crate) output_dir: PathBuf,
    controller: Arc<dyn Controller>,
    channels: Arc<Channels>,
    logs: Arc<Mutex<Option<SessionLog>>>,
}

impl Coordinator {
    /// Build a coordinator for the given parameters. Controller parameters
    /// (including every match's scoring formula) are validated here, before
    /// any connection is accepted.
    pub fn new(params: SessionParams, output_dir: PathBuf) -> Result<Self, SessionError> {
        let params = Arc::new(params);
        let controller = controllers::build(&params)?;
        let seats = Arc::new(SeatTable::new(controller.num_players()));

        let (comm, events) = Communicator::new();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (next_tx, next_rx) = std::sync::mpsc::channel();

        let coord = Coordinator {
            comm: Arc::new(comm),
            seats,
            run: Arc::new(RunState::new()),
            params,
            output_dir,
            controller,
            channels: Arc::new(Channels {
                ready_tx,
                ready_rx: Mutex::new(ready_rx),
                next_tx,
                next_rx: Mutex::new(next_rx),
            }),
            logs: Arc::new(Mutex::new(None)),
        };

        let loop_coord = coord.clone();
        thread::spawn(move || event_loop(loop_coord, events));

        Ok(coord)
    }

    pub fn seats(&self) -> &SeatTable {
        &self.seats
    }

    pub fn run_state(&self) -> &RunState {
        &self.run
    }

    /// Start listening for participant connections.
    pub fn accept_connections(&self, port: u16) -> io::Result<SocketAddr> {
        self.comm.accept_connections(port)
    }

    /// Start the session: validate the survey file, probe the output
    /// directory by dumping the parameters, open the session artifacts,
    /// and launch the driver thread.
    pub fn start_session(&self) -> Result<(), SessionError> {
        if self.run.running() {
            return Err(SessionError::State("session already running".into()));
        }
        if !self.seats.all_named() {
            return Err(SessionError::State(
                "not every seat is connected and logged in".into(),
            ));
        }
        if let Some(path) = self.controller.survey_file() {
            std::fs::File::open(&path).map_err(|e| {
                SessionError::State(format!("survey file {} unreadable: {}", path.display(), e))
            })?;
        }

        let session_id = make_session_id();
        info!("Session ID = {}", session_id);
        *self.run.session_id.lock().unwrap() = session_id.clone();

        let dump = self
            .output_dir
            .join(format!("{}-parameters.toml", session_id));
        self.params.save(&dump).map_err(|e| {
            SessionError::State(format!("output directory not writable: {}", e))
        })?;
        let chat = ChatLog::create(&self.output_dir, &session_id, &self.params.experiment_id)
            .map_err(|e| SessionError::State(format!("output directory not writable: {}", e)))?;
        let history = HistoryWriter::new(
            &session_id,
            &self.params.experiment_id,
            &self.output_dir,
            &self.params,
        );
        *self.logs.lock().unwrap() = Some(SessionLog {
            session_id,
            history,
            chat,
        });

        let rounding = self.controller.rounding();
        self.seats.with_all(|slots| {
            for seat in slots.iter_mut().flatten() {
                seat.rounding = rounding;
            }
        });

        let coord = self.clone();
        thread::spawn(move || {
            if let Err(e) = drive_session(&coord) {
                error!("session aborted: {}", e);
            }
            coord.run.set_finished();
        });
        Ok(())
    }

    /// Pause the session: game traffic gates shut, the auction timer is
    /// cancelled, and clients are told to freeze.
    pub fn pause(&self) {
        self.comm.pause();
        self.send_to_connected(Message::Pause);
    }

    /// Resume a paused session. Refused while any seat is disconnected.
    pub fn resume(&self) -> bool {
        if !self.run.unpause_enabled() {
            warn!("cannot resume: a seat is still disconnected");
            return false;
        }
        if !self.comm.is_paused() {
            return true;
        }
        self.comm.resume();
        self.controller.on_unpause(self);
        true
    }

    /// Let the driver advance past the end-of-round wait.
    pub fn next_round(&self) {
        let _ = self.channels.next_tx.send(());
    }

    /// Forcibly drop a seat's connection.
    pub fn drop_connection(&self, seat: SeatId) {
        if let Some(conn) = self.seats.connection(seat) {
            conn.close();
        }
    }

    /// Enable or disable chat forwarding. With no filter, lines go to the
    /// sender's whole group (or everyone, for ungrouped seats).
    pub fn enable_chat(&self, enabled: bool, filter: Option<ChatFilter>) {
        let mut chat = self.run.chat.lock().unwrap();
        chat.enabled = enabled;
        chat.filter = filter;
    }

    /// Send to one seat's current connection; quietly skipped for seats
    /// with no live connection.
    pub(crate) fn send_to_seat(&self, seat: SeatId, message: Message) {
        match self.seats.connection(seat) {
            Some(conn) => self.comm.send(&conn, message),
            None => warn!("seat {} has no connection; dropping message", seat),
        }
    }

    fn send_to_connected(&self, message: Message) {
        for seat in 0..self.seats.len() {
            if let Some(conn) = self.seats.connection(seat) {
                self.comm.send(&conn, message.clone());
            }
        }
    }

    /// Send to every seat and collect exactly one game-message reply per
    /// seat, in seat order. Duplicate replies are discarded; seat status
    /// strings track the exchange.
    pub fn ask_all(
        &self,
        messages: Ask,
        sent_status: &str,
        rcvd_status: &str,
    ) -> Vec<GameMessage> {
        let n = self.seats.len();
        let mut replies: Vec<Option<GameMessage>> = (0..n).map(|_| None).collect();

        for seat in 0..n {
            let message = messages.for_seat(seat);
            self.seats.with_seat(seat, |s| {
                s.status = SeatStatus::Custom(sent_status.to_string());
                s.reply_received = false;
                s.unanswered_message = Some(message.clone());
            });
            self.send_to_seat(seat, message);
        }

        let mut received = 0;
        while received < n {
            let (origin, reply) = self.comm.recv();
            let Some(conn) = origin else {
                // A stray timer expiry has no seat to answer for.
                warn!("discarding unattributed game message during ask");
                continue;
            };
            let Some(seat) = conn.seat() else {
                continue;
            };
            if replies[seat].is_some() {
                // Late duplicate from a seat that already answered.
                continue;
            }
            replies[seat] = Some(reply);
            received += 1;
            self.seats.with_seat(seat, |s| {
                s.status = SeatStatus::Custom(rcvd_status.to_string());
                s.reply_received = true;
                s.unanswered_message = None;
            });
        }

        replies.into_iter().flatten().collect()
    }

    /// Send to every seat without awaiting replies.
    pub fn tell_all(&self, messages: Ask) {
        for seat in 0..self.seats.len() {
            self.send_to_seat(seat, messages.for_seat(seat));
        }
    }

    pub fn broadcast(&self, message: Message) {
        self.tell_all(Ask::Broadcast(message));
    }

    /// Flush the round's persistence. Failures are logged and retried at
    /// the next round boundary; the session proceeds.
    pub(crate) fn flush_round(&self) {
        let mut guard = self.logs.lock().unwrap();
        let Some(logs) = guard.as_mut() else {
            return;
        };
        let histories = self.seats.histories();
        if let Err(e) = logs.history.write(&histories) {
            warn!("history write failed (retrying next round): {}", e);
        }
        if let Err(e) = write_status(
            &self.output_dir,
            &logs.session_id,
            self.run.round_num(),
            self.controller.show_up_payment(),
            &self.seats.snapshots(),
        ) {
            warn!("status write failed: {}", e);
        }
        if let Err(e) = logs.chat.flush() {
            warn!("chat write failed: {}", e);
        }
    }

    /// Reject a connection: user-visible error, then drop. The short grace
    /// lets the sender worker flush the error frame first.
    fn reject(&self, conn: &Arc<Connection>, text: &str) {
        self.comm.send(
            conn,
            Message::Error {
                error_string: text.to_string(),
            },
        );
        let conn = Arc::clone(conn);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            conn.close();
        });
    }
}

/// The driver thread body: init, ready barrier, round loop, payout.
fn drive_session(coord: &Coordinator) -> Result<(), SessionError> {
    let n = coord.seats.len();
    let gui_class = coord.controller.gui_class().to_string();

    for seat in 0..n {
        let name = coord.seats.name(seat).unwrap_or_default();
        let extras = coord.controller.init_extras(seat);
        coord.send_to_seat(
            seat,
            Message::Init {
                gui_class: gui_class.clone(),
                id: seat,
                name,
                extras,
            },
        );
    }

    // Every client must confirm its interface exists before the first
    // round; otherwise early game messages would hit half-built clients.
    {
        let ready_rx = coord.channels.ready_rx.lock().unwrap();
        let mut ready: HashSet<SeatId> = HashSet::new();
        while ready.len() < n {
            let seat = ready_rx
                .recv()
                .map_err(|_| SessionError::State("event loop terminated".into()))?;
            if ready.insert(seat) {
                info!("Client {} is ready.", seat);
            }
        }
    }

    coord.run.set_running(true);
    coord.controller.init_clients(coord)?;

    loop {
        let round = coord.run.round_num();
        info!("Round {}", round + 1);
        coord.broadcast(Message::Round { round });

        let cont = coord.controller.run_round(coord)?;

        for seat in 0..n {
            let earnings = coord.seats.earnings(seat);
            coord.send_to_seat(seat, Message::Earnings { earnings });
        }

        coord.controller.post_round(coord)?;
        coord.flush_round();

        if !cont {
            break;
        }
        if !coord.run.auto_advance() {
            let next_rx = coord.channels.next_rx.lock().unwrap();
            next_rx
                .recv()
                .map_err(|_| SessionError::State("operator channel closed".into()))?;
        }
        coord.run.inc_round();
    }

    info!("All rounds finished.");
    let show_up = coord.controller.show_up_payment();
    let rounding = coord.controller.rounding();
    let survey = coord.controller.survey_file().is_some().then_some(true);
    for seat in 0..n {
        let earnings = coord.seats.earnings(seat);
        let total_payment = rounding.apply(earnings) + show_up;
        coord.send_to_seat(
            seat,
            Message::EndOfExperiment {
                earnings,
                show_up_payment: show_up,
                rounding,
                total_payment,
                survey,
            },
        );
    }
    coord.run.set_running(false);
    Ok(())
}

/// The event-loop thread body: session state machine transitions driven by
/// connection events.
fn event_loop(coord: Coordinator, events: Receiver<NetEvent>) {
    for event in events {
        let conn = event.conn;
        match event.message {
            Message::Connect => on_connect(&coord, conn),
            Message::Login { name } => on_login(&coord, conn, name),
            Message::Relogin { id } => on_relogin(&coord, conn, id),
            Message::Ready => on_ready(&coord, conn),
            Message::Chat { message, .. } => on_chat(&coord, conn, message),
            Message::Disconnect => on_disconnect(&coord, conn),
            Message::Gm(_) | Message::Ping | Message::Sync { .. } => {}
            other => {
                // Server-to-client types arriving inbound are protocol
                // violations: drop pre-running, log-and-discard after.
                if coord.run.running() {
                    warn!(
                        "connection {}: discarding unexpected {:?}",
                        conn.id(),
                        message_type(&other)
                    );
                } else {
                    coord.reject(&conn, "unexpected message");
                }
            }
        }
    }
}

fn message_type(message: &Message) -> &'static str {
    match message {
        Message::Connect => "connect",
        Message::Login { .. } => "login",
        Message::LoginPrompt => "loginPrompt",
        Message::ReloginPrompt { .. } => "reloginPrompt",
        Message::Relogin { .. } => "relogin",
        Message::Ready => "ready",
        Message::Chat { .. } => "chat",
        Message::Pause => "pause",
        Message::Disconnect => "disconnect",
        Message::Error { .. } => "error",
        Message::Init { .. } => "init",
        Message::Reinit { .. } => "reinit",
        Message::Round { .. } => "round",
        Message::Earnings { .. } => "earnings",
        Message::EndOfExperiment { .. } => "endOfExperiment",
        Message::Sync { .. } => "sync",
        Message::Ping => "ping",
        Message::Gm(_) => "gm",
    }
}

fn on_connect(coord: &Coordinator, conn: Arc<Connection>) {
    if coord.run.running() {
        // A connection mid-run is a reconnect attempt; it only makes sense
        // while some seat is actually disconnected.
        let disconnected = coord.seats().disconnected();
        if disconnected.is_empty() {
            coord.reject(&conn, "The session is already running.");
            return;
        }
        coord.comm.send(
            &conn,
            Message::ReloginPrompt {
                disconnected_clients: disconnected,
            },
        );
        return;
    }

    match coord.seats.allocate(Arc::clone(&conn)) {
        Ok(seat) => {
            conn.bind_seat(Some(seat));
            info!("connection {} seated as client {}", conn.id(), seat);
            coord.comm.send(&conn, Message::LoginPrompt);
            start_login_timer(coord, seat, conn);
        }
        Err(_) => {
            warn!("connection {}: no free seat", conn.id());
            coord.reject(&conn, "The session is full.");
        }
    }
}

fn start_login_timer(coord: &Coordinator, seat: SeatId, conn: Arc<Connection>) {
    let cancel = Arc::new(AtomicBool::new(false));
    coord
        .run
        .login_cancels
        .lock()
        .unwrap()
        .insert(seat, Arc::clone(&cancel));

    let coord = coord.clone();
    thread::spawn(move || {
        thread::sleep(LOGIN_TIMEOUT);
        if !cancel.load(Ordering::SeqCst) {
            warn!("seat {}: login timed out", seat);
            coord.reject(&conn, "Login timed out.");
        }
    });
}

fn cancel_login_timer(coord: &Coordinator, seat: SeatId) {
    if let Some(cancel) = coord.run.login_cancels.lock().unwrap().remove(&seat) {
        cancel.store(true, Ordering::SeqCst);
    }
}

fn on_login(coord: &Coordinator, conn: Arc<Connection>, name: String) {
    if coord.run.running() {
        // Probably a disconnected client that picked Log In instead of
        // Reconnect.
        coord.comm.send(
            &conn,
            Message::Error {
                error_string: "The session is already running; reconnect instead.".into(),
            },
        );
        return;
    }
    let Some(seat) = conn.seat() else {
        coord.reject(&conn, "Not connected to a seat.");
        return;
    };

    let trimmed = name.trim();
    let failure = if trimmed.is_empty() {
        Some("Please enter a name.")
    } else if coord.seats.name_taken(trimmed, seat) {
        Some("That name is already taken.")
    } else {
        None
    };

    if let Some(text) = failure {
        warn!("seat {}: login rejected ({})", seat, text);
        cancel_login_timer(coord, seat);
        coord.seats.release(seat);
        conn.bind_seat(None);
        coord.reject(&conn, text);
        return;
    }

    cancel_login_timer(coord, seat);
    coord.seats.with_seat(seat, |s| {
        s.name = trimmed.to_string();
        s.status = SeatStatus::Custom("Logged in".into());
    });
    info!("seat {} logged in as {:?}", seat, trimmed);

    if coord.seats.all_named() {
        info!("All clients logged in.");
        coord.run.enable_start();
    }
}

fn on_relogin(coord: &Coordinator, conn: Arc<Connection>, seat: SeatId) {
    if !coord.run.running() {
        coord.reject(&conn, "Nothing to reconnect to.");
        return;
    }
    match coord.seats.reassign(seat, Arc::clone(&conn)) {
        Ok(()) => {
            conn.bind_seat(Some(seat));
            info!("seat {} rebound to connection {}", seat, conn.id());
            let extras = coord.controller.reinit_extras(coord, seat);
            coord.comm.send(
                &conn,
                Message::Reinit {
                    gui_class: coord.controller.gui_class().to_string(),
                    id: seat,
                    name: coord.seats.name(seat).unwrap_or_default(),
                    match_num: coord.run.match_num(),
                    round_num: coord.run.round_num(),
                    extras,
                },
            );
        }
        Err(_) => {
            // Chosen seat is not actually disconnected; ask again.
            coord.comm.send(
                &conn,
                Message::ReloginPrompt {
                    disconnected_clients: coord.seats.disconnected(),
                },
            );
        }
    }
}

fn on_ready(coord: &Coordinator, conn: Arc<Connection>) {
    if !coord.run.running() {
        if let Some(seat) = conn.seat() {
            let _ = coord.channels.ready_tx.send(seat);
        }
        return;
    }
    // A ready while running means a reconnected client has rebuilt its
    // interface; once nobody is left disconnected, the operator may
    // unpause.
    if !coord.seats.any_disconnected() {
        coord.run.set_unpause_enabled(true);
        info!("all seats reconnected; unpause enabled");
    }
}

fn on_chat(coord: &Coordinator, conn: Arc<Connection>, text: String) {
    let (enabled, filter) = {
        let chat = coord.run.chat.lock().unwrap();
        (chat.enabled, chat.filter.clone())
    };
    if !enabled {
        return;
    }
    let Some(seat) = conn.seat() else {
        return;
    };
    let sender = coord.seats.snapshot(seat);

    for other in 0..coord.seats.len() {
        if other == seat {
            continue;
        }
        let snapshot = coord.seats.snapshot(other);
        // Group-scoped: an ungrouped sender reaches everyone.
        if sender.group.is_some() && snapshot.group != sender.group {
            continue;
        }
        if let Some(filter) = &filter {
            if !filter(&sender, &snapshot) {
                continue;
            }
        }
        coord.send_to_seat(
            other,
            Message::Chat {
                id: Some(seat),
                message: text.clone(),
            },
        );
    }

    if let Some(logs) = coord.logs.lock().unwrap().as_mut() {
        logs.chat.append(ChatRow {
            round: coord.run.round_num(),
            seat,
            group: sender.group,
            message: text,
        });
    }
}

fn on_disconnect(coord: &Coordinator, conn: Arc<Connection>) {
    let Some(seat) = conn.seat() else {
        return;
    };

    if coord.run.running() {
        // Ignore the death notice of a connection that was already
        // replaced by a relogin.
        let is_current = coord
            .seats
            .connection(seat)
            .map(|current| current.id() == conn.id())
            .unwrap_or(false);
        if !is_current {
            return;
        }
        warn!("seat {} disconnected; pausing session", seat);
        coord.seats.set_status(seat, SeatStatus::Disconnected);
        coord.seats.clear_connection(seat);
        coord.run.set_unpause_enabled(false);
        coord.pause();
        return;
    }

    // Pre-running, the seat simply frees up again.
    cancel_login_timer(coord, seat);
    coord.seats.release(seat);
    conn.bind_seat(None);
    info!("seat {} released (disconnected before start)", seat);
    if !coord.seats.all_named() {
        coord.run.disable_start();
    }
}
