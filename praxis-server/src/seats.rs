//! The session table: one slot per participant seat.
//!
//! The table is the single source of truth for seat status and the current
//! connection binding; every other component reads through it. It is guarded
//! by one mutex held only across individual operations; there are no
//! cross-operation invariants to hold a lock over.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use praxis_net::protocol::Message;
use praxis_net::server::Connection;
use praxis_types::{Account, Color, GroupId, Money, RoundingPolicy, SeatId};

use crate::error::SessionError;
use crate::history::ClientHistory;

/// Seat status. Controllers set free-form strings while a round runs
/// ("Waiting for blue production choice").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeatStatus {
    WaitingForConnection,
    Connected,
    Disconnected,
    Custom(String),
}

impl std::fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeatStatus::WaitingForConnection => f.write_str("Waiting for connection"),
            SeatStatus::Connected => f.write_str("Connected"),
            SeatStatus::Disconnected => f.write_str("Disconnected"),
            SeatStatus::Custom(s) => f.write_str(s),
        }
    }
}

/// Everything the coordinator knows about one seat. Controller-scratch
/// fields (color, account, events, payoffs) live here too, so a reconnect
/// can be served from the table while the controller thread is parked.
pub struct ClientSession {
    pub id: SeatId,
    pub name: String,
    pub status: SeatStatus,
    pub earnings: Money,
    pub rounding: RoundingPolicy,
    pub connection: Option<Arc<Connection>>,
    pub group: Option<GroupId>,
    /// Set false when an ask goes out, true when this seat's reply lands.
    pub reply_received: bool,
    /// The outstanding ask, if any; reconnecting clients get it re-posed.
    pub unanswered_message: Option<Message>,
    pub color: Option<Color>,
    pub acct: Account,
    /// `events[match][round]` is the controller event log for the history file.
    pub events: Vec<Vec<BTreeMap<String, String>>>,
    /// Per-match experiment-currency scores.
    pub payoffs: Vec<i64>,
    pub history: ClientHistory,
}

impl ClientSession {
    fn new(id: SeatId, connection: Arc<Connection>) -> Self {
        ClientSession {
            id,
            name: String::new(),
            status: SeatStatus::Connected,
            earnings: Money::ZERO,
            rounding: RoundingPolicy::Penny,
            connection: Some(connection),
            group: None,
            reply_received: false,
            unanswered_message: None,
            color: None,
            acct: Account::default(),
            events: Vec::new(),
            payoffs: Vec::new(),
            history: ClientHistory::new(),
        }
    }
}

/// Read-only copy of a seat's display data, for the status file and chat
/// filters.
#[derive(Debug, Clone)]
pub struct SeatSnapshot {
    pub id: SeatId,
    pub name: String,
    pub status: SeatStatus,
    pub earnings: Money,
    pub rounding: RoundingPolicy,
    pub address: Option<String>,
    pub group: Option<GroupId>,
    pub color: Option<Color>,
}

/// Fixed-length array of seats, sized before connections are accepted.
pub struct SeatTable {
    slots: Mutex<Vec<Option<ClientSession>>>,
}

impl SeatTable {
    pub fn new(num_seats: usize) -> Self {
        let mut slots = Vec::with_capacity(num_seats);
        slots.resize_with(num_seats, || None);
        SeatTable {
            slots: Mutex::new(slots),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bind a connection to the lowest-numbered free slot.
    pub fn allocate(&self, connection: Arc<Connection>) -> Result<SeatId, SessionError> {
        let mut slots = self.slots.lock().unwrap();
        for (i, slot) in slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(ClientSession::new(i, connection));
                return Ok(i);
            }
        }
        Err(SessionError::Capacity)
    }

    /// Replace the connection of a disconnected seat.
    pub fn reassign(&self, seat: SeatId, connection: Arc<Connection>) -> Result<(), SessionError> {
        let mut slots = self.slots.lock().unwrap();
        match slots.get_mut(seat).and_then(|s| s.as_mut()) {
            Some(session) if session.status == SeatStatus::Disconnected => {
                session.connection = Some(connection);
                session.status = SeatStatus::Connected;
                Ok(())
            }
            Some(_) => Err(SessionError::Protocol(format!(
                "seat {} is not disconnected",
                seat
            ))),
            None => Err(SessionError::Protocol(format!("seat {} is empty", seat))),
        }
    }

    /// Free a slot again. Only legal before the session is running.
    pub fn release(&self, seat: SeatId) {
        if let Some(slot) = self.slots.lock().unwrap().get_mut(seat) {
            *slot = None;
        }
    }

    /// Run a closure against one occupied seat.
    pub fn with_seat<R>(&self, seat: SeatId, f: impl FnOnce(&mut ClientSession) -> R) -> Option<R> {
        let mut slots = self.slots.lock().unwrap();
        slots.get_mut(seat).and_then(|s| s.as_mut()).map(f)
    }

    /// Run a closure against the whole table.
    pub fn with_all<R>(&self, f: impl FnOnce(&mut [Option<ClientSession>]) -> R) -> R {
        let mut slots = self.slots.lock().unwrap();
        f(&mut slots)
    }

    pub fn status(&self, seat: SeatId) -> Option<SeatStatus> {
        self.with_seat(seat, |s| s.status.clone())
    }

    pub fn set_status(&self, seat: SeatId, status: SeatStatus) {
        self.with_seat(seat, |s| s.status = status);
    }

    pub fn name(&self, seat: SeatId) -> Option<String> {
        self.with_seat(seat, |s| s.name.clone())
    }

    pub fn connection(&self, seat: SeatId) -> Option<Arc<Connection>> {
        self.with_seat(seat, |s| s.connection.clone()).flatten()
    }

    pub fn clear_connection(&self, seat: SeatId) {
        self.with_seat(seat, |s| s.connection = None);
    }

    pub fn earnings(&self, seat: SeatId) -> Money {
        self.with_seat(seat, |s| s.earnings).unwrap_or(Money::ZERO)
    }

    pub fn acct(&self, seat: SeatId) -> Account {
        self.with_seat(seat, |s| s.acct).unwrap_or_default()
    }

    /// True once every slot is occupied by a named seat.
    pub fn all_named(&self) -> bool {
        let slots = self.slots.lock().unwrap();
        !slots.is_empty()
            && slots
                .iter()
                .all(|s| s.as_ref().is_some_and(|c| !c.name.is_empty()))
    }

    /// Whether a name is already taken by a different seat.
    pub fn name_taken(&self, name: &str, except: SeatId) -> bool {
        let slots = self.slots.lock().unwrap();
        slots
            .iter()
            .flatten()
            .any(|c| c.id != except && c.name == name)
    }

    /// `(id, name)` of every disconnected seat, for the relogin prompt.
    pub fn disconnected(&self) -> Vec<(SeatId, String)> {
        let slots = self.slots.lock().unwrap();
        slots
            .iter()
            .flatten()
            .filter(|c| c.status == SeatStatus::Disconnected)
            .map(|c| (c.id, c.name.clone()))
            .collect()
    }

    pub fn any_disconnected(&self) -> bool {
        !self.disconnected().is_empty()
    }

    /// Snapshot one seat (a placeholder for still-empty slots).
    pub fn snapshot(&self, seat: SeatId) -> SeatSnapshot {
        let slots = self.slots.lock().unwrap();
        match slots.get(seat).and_then(|s| s.as_ref()) {
            Some(c) => SeatSnapshot {
                id: c.id,
                name: c.name.clone(),
                status: c.status.clone(),
                earnings: c.earnings,
                rounding: c.rounding,
                address: c.connection.as_ref().map(|conn| conn.addr().ip().to_string()),
                group: c.group,
                color: c.color,
            },
            None => SeatSnapshot {
                id: seat,
                name: String::new(),
                status: SeatStatus::WaitingForConnection,
                earnings: Money::ZERO,
                rounding: RoundingPolicy::Penny,
                address: None,
                group: None,
                color: None,
            },
        }
    }

    pub fn snapshots(&self) -> Vec<SeatSnapshot> {
        (0..self.len()).map(|i| self.snapshot(i)).collect()
    }

    /// Clone of every seat's history, in seat order, for the history writer.
    pub fn histories(&self) -> Vec<ClientHistory> {
        let slots = self.slots.lock().unwrap();
        slots
            .iter()
            .map(|s| {
                s.as_ref()
                    .map(|c| c.history.clone())
                    .unwrap_or_default()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use praxis_net::server::Communicator;
    use praxis_net::ClientConnector;

    /// Build a real connection pair; the table only stores the handle.
    fn test_connection() -> Arc<Connection> {
        let (comm, events) = Communicator::new();
        let addr = comm.accept_connections(0).unwrap();
        let _client = ClientConnector::connect(&addr.to_string()).unwrap();
        let ev = events
            .recv_timeout(std::time::Duration::from_secs(5))
            .unwrap();
        ev.conn
    }

    #[test]
    fn allocate_fills_lowest_slot_first() {
        let table = SeatTable::new(2);
        let a = test_connection();
        let b = test_connection();

        assert_eq!(table.allocate(a).unwrap(), 0);
        assert_eq!(table.allocate(b).unwrap(), 1);

        let c = test_connection();
        assert!(matches!(table.allocate(c), Err(SessionError::Capacity)));
    }

    #[test]
    fn release_reopens_the_slot() {
        let table = SeatTable::new(1);
        let a = test_connection();
        table.allocate(a).unwrap();
        table.release(0);

        let b = test_connection();
        assert_eq!(table.allocate(b).unwrap(), 0);
    }

    #[test]
    fn reassign_requires_disconnected_status() {
        let table = SeatTable::new(1);
        let a = test_connection();
        table.allocate(a).unwrap();

        let b = test_connection();
        assert!(table.reassign(0, b.clone()).is_err());

        table.set_status(0, SeatStatus::Disconnected);
        table.reassign(0, b).unwrap();
        assert_eq!(table.status(0), Some(SeatStatus::Connected));
    }

    #[test]
    fn name_bookkeeping() {
        let table = SeatTable::new(2);
        let a = test_connection();
        let b = test_connection();
        table.allocate(a).unwrap();
        table.allocate(b).unwrap();

        assert!(!table.all_named());
        table.with_seat(0, |s| s.name = "Alice".into());
        assert!(table.name_taken("Alice", 1));
        assert!(!table.name_taken("Alice", 0));
        table.with_seat(1, |s| s.name = "Bob".into());
        assert!(table.all_named());
    }
}
