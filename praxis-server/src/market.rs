//! Per-group auction market state.
//!
//! A book holds the standing best bid and best ask. Bids must strictly
//! improve the standing bid and asks must strictly undercut the standing
//! ask; when the two sides meet or cross, a transaction happens at the
//! amount that was just accepted and the book resets.

use std::path::{Path, PathBuf};

use praxis_types::{Color, GroupId, Money, SeatId};

use crate::error::PersistError;

/// Best bid and best ask for one group. Empty sides stand in for the
/// -inf/+inf initial sentinels.
#[derive(Debug, Clone, Default)]
pub struct MarketBook {
    high_bid: Option<(Money, SeatId)>,
    low_ask: Option<(Money, SeatId)>,
}

impl MarketBook {
    pub fn reset(&mut self) {
        self.high_bid = None;
        self.low_ask = None;
    }

    pub fn high_bid(&self) -> Option<(Money, SeatId)> {
        self.high_bid
    }

    pub fn low_ask(&self) -> Option<(Money, SeatId)> {
        self.low_ask
    }

    /// Whether `amount` strictly exceeds the standing bid.
    pub fn improves_bid(&self, amount: Money) -> bool {
        match self.high_bid {
            Some((bid, _)) => amount > bid,
            None => true,
        }
    }

    /// Whether `amount` strictly undercuts the standing ask.
    pub fn improves_ask(&self, amount: Money) -> bool {
        match self.low_ask {
            Some((ask, _)) => amount < ask,
            None => true,
        }
    }

    pub fn place_bid(&mut self, amount: Money, seat: SeatId) {
        self.high_bid = Some((amount, seat));
    }

    pub fn place_ask(&mut self, amount: Money, seat: SeatId) {
        self.low_ask = Some((amount, seat));
    }

    /// Buyer and seller when the book has crossed (`highBid >= lowAsk`).
    pub fn crossed(&self) -> Option<(SeatId, SeatId)> {
        match (self.high_bid, self.low_ask) {
            (Some((bid, buyer)), Some((ask, seller))) if bid >= ask => Some((buyer, seller)),
            _ => None,
        }
    }
}

/// One market event, as it appears in the market history file. Also
/// serialized into `reinit` payloads so a reconnected client can rebuild
/// its market view.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MarketEvent {
    pub action: MarketAction,
    pub buyer: Option<SeatId>,
    pub bid: Option<Money>,
    pub accept: Option<Money>,
    pub ask: Option<Money>,
    pub seller: Option<SeatId>,
    /// Seconds along the session's auction timeline.
    pub time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketAction {
    Bid,
    Ask,
    Accept,
}

impl MarketAction {
    pub fn as_str(self) -> &'static str {
        match self {
            MarketAction::Bid => "bid",
            MarketAction::Ask => "ask",
            MarketAction::Accept => "accept",
        }
    }
}

impl MarketEvent {
    pub fn bid(buyer: SeatId, amount: Money, time: f64) -> Self {
        MarketEvent {
            action: MarketAction::Bid,
            buyer: Some(buyer),
            bid: Some(amount),
            accept: None,
            ask: None,
            seller: None,
            time,
        }
    }

    pub fn ask(seller: SeatId, amount: Money, time: f64) -> Self {
        MarketEvent {
            action: MarketAction::Ask,
            buyer: None,
            bid: None,
            accept: None,
            ask: Some(amount),
            seller: Some(seller),
            time,
        }
    }

    pub fn accept(buyer: SeatId, seller: SeatId, amount: Money, time: f64) -> Self {
        MarketEvent {
            action: MarketAction::Accept,
            buyer: Some(buyer),
            bid: None,
            accept: Some(amount),
            ask: None,
            seller: Some(seller),
            time,
        }
    }
}

/// Market events for one round, split by auction color.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RoundMarketEvents {
    pub blue: Vec<MarketEvent>,
    pub red: Vec<MarketEvent>,
}

impl RoundMarketEvents {
    pub fn for_color(&self, color: Color) -> &Vec<MarketEvent> {
        match color {
            Color::Blue => &self.blue,
            Color::Red => &self.red,
        }
    }

    pub fn for_color_mut(&mut self, color: Color) -> &mut Vec<MarketEvent> {
        match color {
            Color::Blue => &mut self.blue,
            Color::Red => &mut self.red,
        }
    }
}

/// Appends market events to `<sessionID>-market-history.csv`. The header
/// row is written once at creation.
pub struct MarketHistoryWriter {
    path: PathBuf,
}

const MARKET_HEADERS: [&str; 11] = [
    "Match", "Round", "Group", "Market", "Action", "Buyer", "Bid", "Accept", "Ask", "Seller",
    "Time",
];

impl MarketHistoryWriter {
    pub fn create(output_dir: &Path, session_id: &str) -> Result<Self, PersistError> {
        let path = output_dir.join(format!("{}-market-history.csv", session_id));
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(MARKET_HEADERS)?;
        writer.flush()?;
        Ok(MarketHistoryWriter { path })
    }

    /// Append one round's events for one group and color. Match, round, and
    /// group numbers are one-based in the file.
    pub fn append_round(
        &self,
        match_num: usize,
        round_num: usize,
        group: GroupId,
        color: Color,
        events: &[MarketEvent],
    ) -> Result<(), PersistError> {
        let file = std::fs::OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::Writer::from_writer(file);
        for event in events {
            let fmt_seat = |s: Option<SeatId>| s.map(|v| v.to_string()).unwrap_or_default();
            let fmt_money = |m: Option<Money>| m.map(|v| v.to_string()).unwrap_or_default();
            writer.write_record([
                (match_num + 1).to_string(),
                (round_num + 1).to_string(),
                group.to_string(),
                color.to_string(),
                event.action.as_str().to_string(),
                fmt_seat(event.buyer),
                fmt_money(event.bid),
                fmt_money(event.accept),
                fmt_money(event.ask),
                fmt_seat(event.seller),
                format!("{:.3}", event.time),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(s: &str) -> Money {
        s.parse().unwrap()
    }

    #[test]
    fn bids_must_strictly_improve() {
        let mut book = MarketBook::default();
        assert!(book.improves_bid(m("0.10")));
        book.place_bid(m("1.00"), 0);
        assert!(!book.improves_bid(m("1.00")));
        assert!(!book.improves_bid(m("0.90")));
        assert!(book.improves_bid(m("1.10")));
    }

    #[test]
    fn asks_must_strictly_undercut() {
        let mut book = MarketBook::default();
        assert!(book.improves_ask(m("99.00")));
        book.place_ask(m("2.00"), 1);
        assert!(!book.improves_ask(m("2.00")));
        assert!(!book.improves_ask(m("2.10")));
        assert!(book.improves_ask(m("1.90")));
    }

    #[test]
    fn book_crosses_when_bid_meets_ask() {
        let mut book = MarketBook::default();
        book.place_bid(m("1.00"), 0);
        book.place_ask(m("1.50"), 1);
        assert!(book.crossed().is_none());

        book.place_bid(m("1.50"), 0);
        assert_eq!(book.crossed(), Some((0, 1)));

        book.reset();
        assert!(book.crossed().is_none());
        assert!(book.high_bid().is_none());
        assert!(book.low_ask().is_none());
    }

    #[test]
    fn market_file_has_stable_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MarketHistoryWriter::create(dir.path(), "240101000000").unwrap();
        let events = vec![
            MarketEvent::bid(2, m("1.00"), 0.5),
            MarketEvent::accept(2, 1, m("1.50"), 2.0),
        ];
        writer
            .append_round(0, 0, 0, Color::Blue, &events)
            .unwrap();

        let text = std::fs::read_to_string(
            dir.path().join("240101000000-market-history.csv"),
        )
        .unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Match,Round,Group,Market,Action,Buyer,Bid,Accept,Ask,Seller,Time"
        );
        assert_eq!(lines.next().unwrap(), "1,1,0,blue,bid,2,1.00,,,,0.500");
        assert_eq!(lines.next().unwrap(), "1,1,0,blue,accept,2,,1.50,,1,2.000");
    }
}
