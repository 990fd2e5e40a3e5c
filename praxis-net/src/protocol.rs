//! Wire protocol for coordinator/client communication.
//!
//! Every frame carries one `Message`, tagged by `type`. Game traffic rides
//! inside the `gm` variant, tagged by `subtype`; only game messages are
//! visible to controller logic through the communicator's inbound queue.
//! Unrecognized tags fail to decode and are logged and discarded by the
//! transport.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use praxis_types::{Account, Color, Money, ProductionFunction, RoundingPolicy, SeatId};

/// Top-level protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Message {
    /// Synthesized locally when a socket is accepted; never sent by a peer.
    Connect,
    /// Client announces the participant's name.
    Login { name: String },
    /// Server asks a freshly connected client to log in.
    LoginPrompt,
    /// Server offers a reconnecting client the seats that are free to claim.
    #[serde(rename_all = "camelCase")]
    ReloginPrompt {
        disconnected_clients: Vec<(SeatId, String)>,
    },
    /// Reconnecting client claims a disconnected seat.
    Relogin { id: SeatId },
    /// Client interface is built and ready for the round to begin or resume.
    Ready,
    Chat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<SeatId>,
        message: String,
    },
    Pause,
    /// Synthesized locally when a connection's workers terminate.
    Disconnect,
    #[serde(rename_all = "camelCase")]
    Error { error_string: String },
    /// Per-seat initialization sent when the session starts.
    Init {
        #[serde(rename = "GUIclass")]
        gui_class: String,
        id: SeatId,
        name: String,
        #[serde(flatten)]
        extras: Map<String, Value>,
    },
    /// Re-initialization for a reconnected seat; `extras` carries whatever
    /// state the controller needs the client to rebuild the current round.
    Reinit {
        #[serde(rename = "GUIclass")]
        gui_class: String,
        id: SeatId,
        name: String,
        #[serde(rename = "match")]
        match_num: usize,
        #[serde(rename = "round")]
        round_num: usize,
        #[serde(flatten)]
        extras: Map<String, Value>,
    },
    Round { round: usize },
    Earnings { earnings: Money },
    #[serde(rename_all = "camelCase")]
    EndOfExperiment {
        earnings: Money,
        show_up_payment: Money,
        rounding: RoundingPolicy,
        total_payment: Money,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        survey: Option<bool>,
    },
    /// Clock probe. The server sends `ct: None`; the client answers
    /// immediately with its wall-clock time in seconds.
    Sync {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ct: Option<f64>,
    },
    Ping,
    Gm(GameMessage),
}

/// Game message: the only traffic controller logic sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subtype", rename_all = "camelCase")]
pub enum GameMessage {
    /// Match setup for one seat: its color and the group's blue seat ids.
    #[serde(rename = "initmatch")]
    #[serde(rename_all = "camelCase")]
    InitMatch {
        color: Color,
        chat: u8,
        blue_ids: Vec<SeatId>,
    },
    /// Start of a production phase. Seats of the auction color receive the
    /// schedule; money-shock targets receive the realized amount.
    #[serde(rename_all = "camelCase")]
    Production {
        color: Color,
        time_limit: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prod_shock: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pf: Option<ProductionFunction>,
        money_shock: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        money_shock_amount: Option<Money>,
    },
    /// Client reply to `production`: the chosen schedule index, or `None`
    /// from seats that do not produce this phase.
    Choice {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        choice: Option<i64>,
    },
    /// Confirmation of a production outcome.
    #[serde(rename_all = "camelCase")]
    ProductionChoice {
        color: Color,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        green: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        produced: Option<i64>,
    },
    /// An auction is open for `color`, running for `auction_time` seconds.
    #[serde(rename_all = "camelCase")]
    Auction { color: Color, auction_time: u32 },
    /// A bid. Clients omit `id`; the coordinator fills it in on broadcast.
    Bid {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<SeatId>,
        amount: Money,
    },
    /// An ask. Clients omit `id`; the coordinator fills it in on broadcast.
    Ask {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<SeatId>,
        amount: Money,
    },
    #[serde(rename_all = "camelCase")]
    Transaction {
        #[serde(rename = "buyerID")]
        buyer_id: SeatId,
        #[serde(rename = "sellerID")]
        seller_id: SeatId,
        amount: Money,
    },
    /// Balance update for one seat.
    AcctUpdate { acct: Account },
    /// The auction timer expired.
    Timeup,
    /// In-game validation failure, reflected only to the offending seat.
    Error { error: GameErrorCode },
    /// Prompt used by request/reply games.
    Question { prompt: String },
    /// Reply used by request/reply games.
    Answer { amount: i64 },
}

/// Validation codes for rejected market actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameErrorCode {
    BidTooLow,
    AskTooHigh,
    NotEnoughDollars,
    NotEnoughChips,
}
