//! The island experiment: a two-color production-and-trade economy.
//!
//! Each round runs, per color: a production-choice phase (with optional
//! production and money shocks), then a timed continuous double auction in
//! which the other color's seats bid for one unit at a time. Scores come
//! from a configurable formula over dollars and chip counts.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::{info, warn};
use serde_json::{Map, Value};

use praxis_net::protocol::{GameErrorCode, GameMessage, Message};
use praxis_net::server::Connection;
use praxis_types::{
    Color, Money, ProductionFunction, RoundingPolicy, SeatId, SessionParams,
};

use crate::driver::{Ask, ChatFilter, Coordinator};
use crate::error::SessionError;
use crate::formula::Formula;
use crate::groups::{self, Group};
use crate::market::{MarketEvent, MarketHistoryWriter};
use crate::shock::random_divide;

use super::Controller;

/// Per-color pair of values.
#[derive(Debug, Clone, Default)]
struct ByColor<T> {
    blue: T,
    red: T,
}

impl<T> ByColor<T> {
    fn get(&self, color: Color) -> &T {
        match color {
            Color::Blue => &self.blue,
            Color::Red => &self.red,
        }
    }
}

/// One money shock: aggregate quantity, the round it precedes, and which
/// colors receive it.
#[derive(Debug, Clone)]
struct MoneyShock {
    quantity: Money,
    round: usize,
    hits_blue: bool,
    hits_red: bool,
}

impl MoneyShock {
    fn hits(&self, color: Color) -> bool {
        match color {
            Color::Blue => self.hits_blue,
            Color::Red => self.hits_red,
        }
    }
}

/// Parsed, validated parameters for one match.
struct MatchConfig {
    chat: u8,
    auction_time: u32,
    prod_choice_time_limit: u32,
    pf: ByColor<ProductionFunction>,
    pf_shock: ByColor<ProductionFunction>,
    pf_shock_rounds: ByColor<Vec<usize>>,
    reset_balances: bool,
    starting_dollars: Money,
    formula: Formula,
    /// Shocks applied before the keyed color's auction.
    money_shocks: ByColor<Vec<MoneyShock>>,
    allow_negative_dollars: bool,
}

fn parse_ints(text: &str, what: &str) -> Result<Vec<i64>, SessionError> {
    text.split_whitespace()
        .map(|t| {
            t.parse::<i64>()
                .map_err(|_| SessionError::State(format!("bad integer {:?} in {}", t, what)))
        })
        .collect()
}

/// One-based round lists in the parameters become zero-based indices.
fn parse_rounds(text: &str, what: &str) -> Result<Vec<usize>, SessionError> {
    parse_ints(text, what)?
        .into_iter()
        .map(|r| {
            if r >= 1 {
                Ok((r - 1) as usize)
            } else {
                Err(SessionError::State(format!("round {} in {} is not positive", r, what)))
            }
        })
        .collect()
}

fn parse_pf(xs: &str, ys: &str, what: &str) -> Result<ProductionFunction, SessionError> {
    let xs = parse_ints(xs, what)?;
    let ys = parse_ints(ys, what)?;
    Ok(xs.into_iter().zip(ys).collect())
}

fn parse_money(text: &str, what: &str) -> Result<Money, SessionError> {
    text.trim()
        .parse::<Money>()
        .map_err(|_| SessionError::State(format!("bad amount {:?} in {}", text, what)))
}

impl MatchConfig {
    fn parse(params: &praxis_types::MatchParams) -> Result<MatchConfig, SessionError> {
        let pf = ByColor {
            blue: parse_pf(
                params.custom_or("pf_blue_x", "0 1 3 6 10 15"),
                params.custom_or("pf_blue_y", "15 10 6 3 1 0"),
                "pf_blue",
            )?,
            red: parse_pf(
                params.custom_or("pf_red_x", "0 1 2 3 4 5"),
                params.custom_or("pf_red_y", "5 4 3 2 1 0"),
                "pf_red",
            )?,
        };
        let pf_shock = ByColor {
            blue: parse_pf(
                params.custom_or("pf_shock_blue_x", "0 1 3 6 10"),
                params.custom_or("pf_shock_blue_y", "10 6 3 1 0"),
                "pf_shock_blue",
            )?,
            red: parse_pf(
                params.custom_or("pf_shock_red_x", "0 1 2 3 4"),
                params.custom_or("pf_shock_red_y", "4 3 2 1 0"),
                "pf_shock_red",
            )?,
        };
        let pf_shock_rounds = ByColor {
            blue: parse_rounds(params.custom_or("pf_shockRounds_blue", ""), "pf_shockRounds_blue")?,
            red: parse_rounds(params.custom_or("pf_shockRounds_red", ""), "pf_shockRounds_red")?,
        };

        let formula_src = params.custom_or("scoring_formula", "d + 10 * (min(b, r, g))");
        let formula = Formula::parse(formula_src)
            .map_err(|e| SessionError::State(e.to_string()))?;

        let mut money_shocks = ByColor::<Vec<MoneyShock>>::default();
        for color in Color::ALL {
            let key = format!("moneyShocks_{}Mkt", color);
            let quantities: Vec<Money> = params
                .custom_or(&key, "")
                .split_whitespace()
                .map(|t| parse_money(t, &key))
                .collect::<Result<_, _>>()?;
            let rounds =
                parse_rounds(params.custom_or(&format!("{}_rounds", key), ""), &key)?;
            let whos = parse_ints(params.custom_or(&format!("{}_who", key), ""), &key)?;
            if quantities.len() != rounds.len() || quantities.len() != whos.len() {
                return Err(SessionError::State(format!(
                    "{}: quantities, rounds, and targets differ in length",
                    key
                )));
            }
            let shocks = quantities
                .into_iter()
                .zip(rounds)
                .zip(whos)
                .map(|((quantity, round), who)| MoneyShock {
                    quantity,
                    round,
                    hits_blue: who == 1 || who == 3,
                    hits_red: who == 2 || who == 3,
                })
                .collect();
            match color {
                Color::Blue => money_shocks.blue = shocks,
                Color::Red => money_shocks.red = shocks,
            }
        }

        let auction_time: u32 = params
            .custom_or("auctionTime", "30")
            .trim()
            .parse()
            .map_err(|_| SessionError::State("bad auctionTime".into()))?;
        if auction_time == 0 {
            return Err(SessionError::State("auctionTime must be positive".into()));
        }

        Ok(MatchConfig {
            chat: params
                .custom_or("enableChat", "0")
                .trim()
                .parse()
                .map_err(|_| SessionError::State("bad enableChat".into()))?,
            auction_time,
            prod_choice_time_limit: params
                .custom_or("prodChoiceTimeLimit", "15")
                .trim()
                .parse()
                .map_err(|_| SessionError::State("bad prodChoiceTimeLimit".into()))?,
            pf,
            pf_shock,
            pf_shock_rounds,
            reset_balances: params.custom_or("resetBalances", "1").trim() != "0",
            starting_dollars: parse_money(
                params.custom_or("startingDollars", "10"),
                "startingDollars",
            )?,
            formula,
            money_shocks,
            allow_negative_dollars: params.custom_or("allowNegativeDollars", "0").trim() != "0",
        })
    }
}

/// Shared state the round loop mutates and the reconnection path reads.
/// The lock is held only across short sections, never across a blocking
/// receive.
#[derive(Default)]
struct IslandState {
    groups: Vec<Group>,
    current_match: usize,
    match_round: usize,
    /// Auction-timeline origin: seconds of completed auction time so far.
    base_time: f64,
    color: Option<Color>,
    production_choices_made: Vec<Color>,
    auction_in_progress: bool,
    mkt_writer: Option<MarketHistoryWriter>,
}

pub struct IslandControl {
    params: Arc<SessionParams>,
    configs: Vec<MatchConfig>,
    num_groups: usize,
    state: Mutex<IslandState>,
}

impl IslandControl {
    pub fn new(params: &Arc<SessionParams>) -> Result<Self, SessionError> {
        let configs = params
            .matches
            .iter()
            .map(MatchConfig::parse)
            .collect::<Result<Vec<_>, _>>()?;
        // Group count is an experiment-level parameter taken from the
        // first match.
        let num_groups: usize = params.matches[0]
            .custom_or("numGroups", "1")
            .trim()
            .parse()
            .map_err(|_| SessionError::State("bad numGroups".into()))?;
        if num_groups == 0 {
            return Err(SessionError::State("numGroups must be positive".into()));
        }
        Ok(IslandControl {
            params: Arc::clone(params),
            configs,
            num_groups,
            state: Mutex::new(IslandState::default()),
        })
    }

    /// The seat colors, fetched without the state lock held.
    fn seat_colors(&self, ctx: &Coordinator) -> Vec<Option<Color>> {
        (0..ctx.seats().len())
            .map(|seat| ctx.seats().with_seat(seat, |s| s.color).flatten())
            .collect()
    }

    fn update_round_score(&self, ctx: &Coordinator, cfg: &MatchConfig, seat: SeatId) {
        let acct = ctx.seats().acct(seat);
        match cfg
            .formula
            .eval(acct.dollars.to_f64(), acct.blue, acct.red, acct.green)
        {
            Ok(score) => {
                ctx.seats().with_seat(seat, |s| s.acct.round_score = score);
            }
            Err(e) => warn!("seat {}: {}", seat, e),
        }
    }

    fn send_acct_update(&self, ctx: &Coordinator, seat: SeatId) {
        let acct = ctx.seats().acct(seat);
        ctx.send_to_seat(seat, Message::Gm(GameMessage::AcctUpdate { acct }));
    }

    fn send_to_group(&self, ctx: &Coordinator, members: &[SeatId], message: GameMessage) {
        for &seat in members {
            ctx.send_to_seat(seat, Message::Gm(message.clone()));
        }
    }

    fn record_event(&self, ctx: &Coordinator, seat: SeatId, key: &str, value: String) {
        ctx.seats().with_seat(seat, |s| {
            if let Some(round) = s.events.last_mut().and_then(|m| m.last_mut()) {
                round.insert(key.to_string(), value);
            }
        });
    }

    /// Set up a match: chat policy, account resets, event/market history
    /// structure, and the per-seat `initmatch` message. Also validates the
    /// match's money shocks against the actual group composition, so a
    /// mis-parameterized shock fails here rather than mid-round.
    fn init_match(&self, ctx: &Coordinator) -> Result<(), SessionError> {
        let match_idx = self.state.lock().unwrap().current_match;
        let cfg = &self.configs[match_idx];
        let match_params = &self.params.matches[match_idx];
        info!(
            "match {}: scoring formula {:?}",
            match_idx + 1,
            cfg.formula.source()
        );
        ctx.run_state().set_match_num(match_idx);

        let same_color: ChatFilter = Arc::new(|from, to| from.color == to.color);
        let filter = match cfg.chat {
            1 => Some(same_color),
            _ => None,
        };
        ctx.enable_chat(cfg.chat > 0, filter);

        let colors = self.seat_colors(ctx);
        self.validate_money_shocks(cfg, &colors)?;

        // Per-seat match setup.
        let practice = match_params.practice;
        for seat in 0..ctx.seats().len() {
            ctx.seats().with_seat(seat, |s| {
                s.acct.dollars = cfg.starting_dollars;
                s.acct.blue = 0;
                s.acct.red = 0;
                s.acct.green = 0;
                s.acct.match_score = 0;
                s.events.push(Vec::new());
                s.payoffs.push(0);
                s.history.start_match(Vec::new(), practice, s.group);
            });
            self.update_round_score(ctx, cfg, seat);
        }

        // Per-group match setup and the initmatch announcements.
        let announcements: Vec<(SeatId, GameMessage)> = {
            let mut st = self.state.lock().unwrap();
            let mut out = Vec::new();
            for group in &mut st.groups {
                group.mkt_hist.push(Vec::new());
                for &seat in &group.seats {
                    let color = colors[seat].unwrap_or(Color::Blue);
                    out.push((
                        seat,
                        GameMessage::InitMatch {
                            color,
                            chat: cfg.chat,
                            blue_ids: group.blue_ids.clone(),
                        },
                    ));
                }
            }
            out
        };
        for (seat, message) in announcements {
            ctx.send_to_seat(seat, Message::Gm(message));
        }
        Ok(())
    }

    /// Every shock in this match must partition into its recipients:
    /// whole units, at least one recipient per group, and no more
    /// recipients than units.
    fn validate_money_shocks(
        &self,
        cfg: &MatchConfig,
        colors: &[Option<Color>],
    ) -> Result<(), SessionError> {
        let st = self.state.lock().unwrap();
        for market in Color::ALL {
            for shock in cfg.money_shocks.get(market) {
                if shock.quantity.cents() % 100 != 0 || shock.quantity == Money::ZERO {
                    return Err(SessionError::State(format!(
                        "money shock {} is not a whole nonzero amount",
                        shock.quantity
                    )));
                }
                let units = (shock.quantity.cents() / 100).unsigned_abs();
                for group in &st.groups {
                    let recipients = group
                        .seats
                        .iter()
                        .filter(|&&seat| {
                            colors[seat].map(|c| shock.hits(c)).unwrap_or(false)
                        })
                        .count();
                    if recipients == 0 {
                        return Err(SessionError::State(format!(
                            "money shock before the {} auction has no recipients in group {}",
                            market, group.id
                        )));
                    }
                    if recipients as u64 > units {
                        return Err(SessionError::State(format!(
                            "money shock {} has more recipients ({}) than units in group {}",
                            shock.quantity, recipients, group.id
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// The production-choice phase for one color, including any production
    /// shock and any money shock scheduled before this auction.
    fn production_phase(
        &self,
        ctx: &Coordinator,
        cfg: &MatchConfig,
        color: Color,
    ) -> Result<(), SessionError> {
        let match_round = self.state.lock().unwrap().match_round;
        let prod_shock = cfg.pf_shock_rounds.get(color).contains(&match_round);
        let pf = if prod_shock {
            cfg.pf_shock.get(color)
        } else {
            cfg.pf.get(color)
        };

        let colors = self.seat_colors(ctx);

        // Work out this round's money shock, partitioned per group.
        let mut shock_by_seat: BTreeMap<SeatId, Money> = BTreeMap::new();
        {
            let st = self.state.lock().unwrap();
            if let Some(shock) = cfg
                .money_shocks
                .get(color)
                .iter()
                .find(|s| s.round == match_round)
            {
                let units = (shock.quantity.cents() / 100).unsigned_abs();
                let negative = shock.quantity.is_negative();
                let mut rng = rand::thread_rng();
                for group in &st.groups {
                    let targets: Vec<SeatId> = group
                        .seats
                        .iter()
                        .copied()
                        .filter(|&seat| colors[seat].map(|c| shock.hits(c)).unwrap_or(false))
                        .collect();
                    let parts = random_divide(&mut rng, units, targets.len());
                    let amounts: Vec<Money> = parts
                        .into_iter()
                        .map(|p| {
                            let amount = Money::from_units(p as i64);
                            if negative {
                                -amount
                            } else {
                                amount
                            }
                        })
                        .collect();
                    for (&seat, &amount) in targets.iter().zip(&amounts) {
                        shock_by_seat.insert(seat, amount);
                    }
                }
            }
        }

        // Build one production message per seat, applying money shocks as
        // we go.
        let mut messages = Vec::with_capacity(ctx.seats().len());
        for seat in 0..ctx.seats().len() {
            let produces = colors[seat] == Some(color);
            let mut prod_shock_field = None;
            let mut pf_field = None;
            if produces {
                prod_shock_field = Some(prod_shock);
                pf_field = Some(pf.clone());
                self.record_event(
                    ctx,
                    seat,
                    "prodShock",
                    if prod_shock { "1" } else { "0" }.to_string(),
                );
            }

            let mut money_shock = false;
            let mut realized_field = None;
            if let Some(&amount) = shock_by_seat.get(&seat) {
                money_shock = true;
                let realized = ctx
                    .seats()
                    .with_seat(seat, |s| {
                        let before = s.acct.dollars;
                        s.acct.dollars += amount;
                        if !cfg.allow_negative_dollars && s.acct.dollars.is_negative() {
                            s.acct.dollars = Money::ZERO;
                            // Only the part that could actually be taken.
                            Money::ZERO - before
                        } else {
                            amount
                        }
                    })
                    .unwrap_or(amount);
                realized_field = Some(realized);
                self.record_event(ctx, seat, &format!("moneyShock_{}Mkt", color), "1".into());
                self.record_event(
                    ctx,
                    seat,
                    &format!("moneyShockAmt_{}Mkt", color),
                    amount.to_string(),
                );
                self.record_event(
                    ctx,
                    seat,
                    &format!("moneyShockAmountRealized_{}Mkt", color),
                    realized.to_string(),
                );
            }

            messages.push(Message::Gm(GameMessage::Production {
                color,
                time_limit: cfg.prod_choice_time_limit,
                prod_shock: prod_shock_field,
                pf: pf_field,
                money_shock,
                money_shock_amount: realized_field,
            }));
        }

        let replies = ctx.ask_all(
            Ask::PerSeat(messages),
            &format!("Waiting for {} production choice", color),
            "Ready",
        );

        for (seat, reply) in replies.into_iter().enumerate() {
            let mut green_field = None;
            let mut produced_field = None;
            if colors[seat] == Some(color) && !pf.is_empty() {
                // Absent or empty choices fall back to the middle of the
                // schedule; out-of-range choices clamp to the endpoints.
                let chosen = match reply {
                    GameMessage::Choice { choice: Some(i) } => i,
                    _ => (pf.len() / 2) as i64,
                };
                let index = chosen.clamp(0, pf.len() as i64 - 1) as usize;
                let (green, produced) = pf[index];
                ctx.seats().with_seat(seat, |s| {
                    s.acct.green += green;
                    *s.acct.chips_mut(color) += produced;
                });
                self.update_round_score(ctx, cfg, seat);
                self.record_event(ctx, seat, "productionChoice_green", green.to_string());
                self.record_event(
                    ctx,
                    seat,
                    &format!("productionChoice_{}", color),
                    produced.to_string(),
                );
                green_field = Some(green);
                produced_field = Some(produced);
            }

            self.send_acct_update(ctx, seat);
            // Confirmation goes out whether or not the seat produced.
            ctx.send_to_seat(
                seat,
                Message::Gm(GameMessage::ProductionChoice {
                    color,
                    green: green_field,
                    produced: produced_field,
                }),
            );
        }
        Ok(())
    }

    /// The timed matching loop for one color's auction.
    fn auction_phase(
        &self,
        ctx: &Coordinator,
        cfg: &MatchConfig,
        color: Color,
    ) -> Result<(), SessionError> {
        {
            let mut st = self.state.lock().unwrap();
            for group in &mut st.groups {
                group.book.reset();
            }
        }

        ctx.broadcast(Message::Gm(GameMessage::Auction {
            color,
            auction_time: cfg.auction_time,
        }));
        ctx.comm.start_timer(cfg.auction_time);

        let colors = self.seat_colors(ctx);

        loop {
            let (origin, gm) = ctx.comm.recv();

            // Market events are stamped along a timeline that pauses
            // between auctions: the accumulated auction time so far plus
            // how far into this auction we are.
            let elapsed = cfg.auction_time as f64 - ctx.comm.time_left().max(0.0);
            let msg_time = self.state.lock().unwrap().base_time + elapsed.max(0.0);

            match gm {
                GameMessage::Timeup => {
                    self.state.lock().unwrap().base_time += cfg.auction_time as f64;
                    ctx.broadcast(Message::Gm(GameMessage::Timeup));
                    info!("{} auction over", color);
                    return Ok(());
                }
                GameMessage::Bid { amount, .. } => {
                    let Some((seat, group_id)) = self.sender_seat(origin) else {
                        continue;
                    };
                    if !amount.is_positive() {
                        continue;
                    }
                    let amount = amount.quantize_tenth();
                    if colors[seat] == Some(color) {
                        // Sellers don't bid.
                        continue;
                    }
                    let improves = {
                        let st = self.state.lock().unwrap();
                        st.groups[group_id].book.improves_bid(amount)
                    };
                    if !improves {
                        self.send_game_error(ctx, seat, GameErrorCode::BidTooLow);
                        continue;
                    }
                    if ctx.seats().acct(seat).dollars < amount {
                        self.send_game_error(ctx, seat, GameErrorCode::NotEnoughDollars);
                        continue;
                    }

                    let members = {
                        let mut st = self.state.lock().unwrap();
                        let group = &mut st.groups[group_id];
                        group.book.place_bid(amount, seat);
                        if let Some(round) =
                            group.mkt_hist.last_mut().and_then(|m| m.last_mut())
                        {
                            round
                                .for_color_mut(color)
                                .push(MarketEvent::bid(seat, amount, msg_time));
                        }
                        group.seats.clone()
                    };
                    self.send_to_group(
                        ctx,
                        &members,
                        GameMessage::Bid {
                            id: Some(seat),
                            amount,
                        },
                    );
                    self.settle_if_crossed(ctx, cfg, color, group_id, amount, msg_time);
                }
                GameMessage::Ask { amount, .. } => {
                    let Some((seat, group_id)) = self.sender_seat(origin) else {
                        continue;
                    };
                    if !amount.is_positive() {
                        continue;
                    }
                    let amount = amount.quantize_tenth();
                    if colors[seat] != Some(color) {
                        // Buyers don't ask.
                        continue;
                    }
                    let improves = {
                        let st = self.state.lock().unwrap();
                        st.groups[group_id].book.improves_ask(amount)
                    };
                    if !improves {
                        self.send_game_error(ctx, seat, GameErrorCode::AskTooHigh);
                        continue;
                    }
                    if ctx.seats().acct(seat).chips(color) < 1 {
                        self.send_game_error(ctx, seat, GameErrorCode::NotEnoughChips);
                        continue;
                    }

                    let members = {
                        let mut st = self.state.lock().unwrap();
                        let group = &mut st.groups[group_id];
                        group.book.place_ask(amount, seat);
                        if let Some(round) =
                            group.mkt_hist.last_mut().and_then(|m| m.last_mut())
                        {
                            round
                                .for_color_mut(color)
                                .push(MarketEvent::ask(seat, amount, msg_time));
                        }
                        group.seats.clone()
                    };
                    self.send_to_group(
                        ctx,
                        &members,
                        GameMessage::Ask {
                            id: Some(seat),
                            amount,
                        },
                    );
                    self.settle_if_crossed(ctx, cfg, color, group_id, amount, msg_time);
                }
                _ => {
                    // Not a bid or ask: discarded.
                    continue;
                }
            }
        }
    }

    fn sender_seat(&self, origin: Option<Arc<Connection>>) -> Option<(SeatId, usize)> {
        let conn = origin?;
        let seat = conn.seat()?;
        let st = self.state.lock().unwrap();
        let group = st.groups.iter().position(|g| g.seats.contains(&seat))?;
        Some((seat, group))
    }

    fn send_game_error(&self, ctx: &Coordinator, seat: SeatId, error: GameErrorCode) {
        ctx.send_to_seat(seat, Message::Gm(GameMessage::Error { error }));
    }

    /// When the best bid meets or crosses the best ask, one unit moves at
    /// the amount that was just accepted, and the group's book resets.
    fn settle_if_crossed(
        &self,
        ctx: &Coordinator,
        cfg: &MatchConfig,
        color: Color,
        group_id: usize,
        amount: Money,
        msg_time: f64,
    ) {
        let crossed = {
            let st = self.state.lock().unwrap();
            st.groups[group_id].book.crossed()
        };
        let Some((buyer, seller)) = crossed else {
            return;
        };

        ctx.seats().with_seat(buyer, |s| {
            *s.acct.chips_mut(color) += 1;
            s.acct.dollars -= amount;
        });
        ctx.seats().with_seat(seller, |s| {
            *s.acct.chips_mut(color) -= 1;
            s.acct.dollars += amount;
        });
        self.update_round_score(ctx, cfg, buyer);
        self.update_round_score(ctx, cfg, seller);

        let members = {
            let mut st = self.state.lock().unwrap();
            let group = &mut st.groups[group_id];
            if let Some(round) = group.mkt_hist.last_mut().and_then(|m| m.last_mut()) {
                round
                    .for_color_mut(color)
                    .push(MarketEvent::accept(buyer, seller, amount, msg_time));
            }
            group.book.reset();
            group.seats.clone()
        };
        self.send_to_group(
            ctx,
            &members,
            GameMessage::Transaction {
                buyer_id: buyer,
                seller_id: seller,
                amount,
            },
        );
        self.send_acct_update(ctx, buyer);
        self.send_acct_update(ctx, seller);
    }

    /// Recompute a seat's real-currency earnings from its per-match
    /// scores. Practice matches pay nothing.
    fn update_earnings(&self, ctx: &Coordinator, seat: SeatId) {
        let payoffs = ctx
            .seats()
            .with_seat(seat, |s| s.payoffs.clone())
            .unwrap_or_default();
        let mut total = 0.0;
        for (m, score) in payoffs.iter().enumerate() {
            if let Some(match_params) = self.params.matches.get(m) {
                if !match_params.practice {
                    total += *score as f64 * match_params.exchange_rate;
                }
            }
        }
        ctx.seats()
            .with_seat(seat, |s| s.earnings = Money::from_f64(total));
    }
}

impl Controller for IslandControl {
    fn gui_class(&self) -> &str {
        "IslandGUI"
    }

    fn num_players(&self) -> usize {
        self.params.num_players
    }

    fn rounding(&self) -> RoundingPolicy {
        self.params.rounding
    }

    fn show_up_payment(&self) -> Money {
        self.params.show_up_payment()
    }

    fn survey_file(&self) -> Option<PathBuf> {
        self.params.survey_file.clone()
    }

    fn init_clients(&self, ctx: &Coordinator) -> Result<(), SessionError> {
        let seat_ids: Vec<SeatId> = (0..ctx.seats().len()).collect();
        let mut groups = groups::group_seats_random(&seat_ids, self.num_groups);

        // Alternate colors within each group; the blue seats are announced
        // so chat lines can be color-marked client-side.
        for group in &mut groups {
            group.blue_ids.clear();
            for (i, &seat) in group.seats.iter().enumerate() {
                let color = if i % 2 == 0 { Color::Blue } else { Color::Red };
                if color == Color::Blue {
                    group.blue_ids.push(seat);
                }
                ctx.seats().with_seat(seat, |s| {
                    s.color = Some(color);
                    s.group = Some(group.id);
                });
            }
        }

        let writer = MarketHistoryWriter::create(&ctx.output_dir, &ctx.run_state().session_id())?;

        let mut st = self.state.lock().unwrap();
        st.groups = groups;
        st.mkt_writer = Some(writer);
        st.base_time = 0.0;
        Ok(())
    }

    fn run_round(&self, ctx: &Coordinator) -> Result<bool, SessionError> {
        let (match_idx, match_round) = {
            let st = self.state.lock().unwrap();
            (st.current_match, st.match_round)
        };
        if match_round == 0 {
            self.init_match(ctx)?;
        }
        let cfg = &self.configs[match_idx];

        // Fresh per-round reconnect state and a fresh market-history round.
        {
            let mut st = self.state.lock().unwrap();
            st.production_choices_made.clear();
            st.auction_in_progress = false;
            for group in &mut st.groups {
                if let Some(current) = group.mkt_hist.last_mut() {
                    current.push(Default::default());
                }
            }
        }

        if cfg.reset_balances {
            for seat in 0..ctx.seats().len() {
                ctx.seats().with_seat(seat, |s| {
                    s.acct.blue = 0;
                    s.acct.red = 0;
                    s.acct.green = 0;
                });
                self.update_round_score(ctx, cfg, seat);
            }
        }

        for seat in 0..ctx.seats().len() {
            ctx.seats().with_seat(seat, |s| {
                if let Some(current) = s.events.last_mut() {
                    current.push(BTreeMap::new());
                }
            });
            self.send_acct_update(ctx, seat);
        }

        // Blue production then auction, then the same for red.
        for color in Color::ALL {
            self.state.lock().unwrap().color = Some(color);
            self.production_phase(ctx, cfg, color)?;
            {
                let mut st = self.state.lock().unwrap();
                st.production_choices_made.push(color);
                st.auction_in_progress = true;
            }
            self.auction_phase(ctx, cfg, color)?;
            self.state.lock().unwrap().auction_in_progress = false;
        }

        // Fold the round into match scores, payoffs, and earnings.
        for seat in 0..ctx.seats().len() {
            ctx.seats().with_seat(seat, |s| {
                if cfg.reset_balances {
                    s.acct.match_score += s.acct.round_score;
                } else {
                    s.acct.match_score = s.acct.round_score;
                }
                if let Some(payoff) = s.payoffs.last_mut() {
                    *payoff = s.acct.match_score;
                }
            });
            self.update_earnings(ctx, seat);
            self.send_acct_update(ctx, seat);
        }

        // History row: account and events become output columns.
        let colors = self.seat_colors(ctx);
        for seat in 0..ctx.seats().len() {
            ctx.seats().with_seat(seat, |s| {
                let mut output = BTreeMap::new();
                if let Some(color) = colors[seat] {
                    output.insert("color".to_string(), color.to_string());
                }
                output.insert("dollars".to_string(), s.acct.dollars.to_string());
                output.insert("blue".to_string(), s.acct.blue.to_string());
                output.insert("red".to_string(), s.acct.red.to_string());
                output.insert("green".to_string(), s.acct.green.to_string());
                output.insert("roundScore".to_string(), s.acct.round_score.to_string());
                output.insert("matchScore".to_string(), s.acct.match_score.to_string());
                if let Some(events) = s.events.last().and_then(|m| m.last()) {
                    output.extend(events.clone());
                }
                s.history.add_round(Vec::new());
                s.history.add_round_output(output);
            });
        }

        // Market events of this round go to their own file.
        {
            let st = self.state.lock().unwrap();
            if let Some(writer) = &st.mkt_writer {
                for group in &st.groups {
                    if let Some(round) = group.mkt_hist.last().and_then(|m| m.last()) {
                        for color in Color::ALL {
                            if let Err(e) = writer.append_round(
                                match_idx,
                                match_round,
                                group.id,
                                color,
                                round.for_color(color),
                            ) {
                                warn!("market history write failed: {}", e);
                            }
                        }
                    }
                }
            }
        }

        let mut st = self.state.lock().unwrap();
        st.match_round += 1;
        let match_done = st.match_round >= self.params.matches[match_idx].num_rounds;
        if match_done {
            st.current_match += 1;
            st.match_round = 0;
        }
        let game_done = match_done && st.current_match >= self.params.matches.len();
        Ok(!game_done)
    }

    fn on_unpause(&self, ctx: &Coordinator) {
        let (in_auction, color) = {
            let st = self.state.lock().unwrap();
            (st.auction_in_progress, st.color)
        };
        if !in_auction {
            return;
        }
        let Some(color) = color else {
            return;
        };
        // The pause cancelled the auction timer; restart it for whatever
        // was left and re-announce so clients resync their countdowns.
        let time_left = ctx.comm.time_left_at_cancel().round().max(0.0) as u32;
        ctx.broadcast(Message::Gm(GameMessage::Auction {
            color,
            auction_time: time_left,
        }));
        ctx.comm.start_timer(time_left);
    }

    fn reinit_extras(&self, ctx: &Coordinator, seat: SeatId) -> Map<String, Value> {
        let mut extras = Map::new();
        let (acct, events, group, color, unanswered) = ctx
            .seats()
            .with_seat(seat, |s| {
                (
                    s.acct,
                    s.events.clone(),
                    s.group,
                    s.color,
                    s.unanswered_message.clone(),
                )
            })
            .unwrap_or_default();

        let st = self.state.lock().unwrap();
        if let Ok(value) = serde_json::to_value(acct) {
            extras.insert("acct".into(), value);
        }
        if let Ok(value) = serde_json::to_value(&events) {
            extras.insert("events".into(), value);
        }
        if let Some(group) = group.and_then(|id| st.groups.iter().find(|g| g.id == id)) {
            if let Ok(value) = serde_json::to_value(&group.mkt_hist) {
                extras.insert("mktHist".into(), value);
            }
            let cfg = &self.configs[st.current_match.min(self.configs.len() - 1)];
            if let Some(color) = color {
                if let Ok(value) = serde_json::to_value(GameMessage::InitMatch {
                    color,
                    chat: cfg.chat,
                    blue_ids: group.blue_ids.clone(),
                }) {
                    extras.insert("matchInitMessage".into(), value);
                }
            }
        }
        if let Ok(value) = serde_json::to_value(&st.production_choices_made) {
            extras.insert("productionChoicesMade".into(), value);
        }
        extras.insert("auctionInProgress".into(), st.auction_in_progress.into());
        if let Some(message) = unanswered {
            if let Ok(value) = serde_json::to_value(&message) {
                extras.insert("unansweredMessage".into(), value);
            }
        }
        extras
    }
}
