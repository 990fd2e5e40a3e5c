mod common;

use praxis_net::client::ClientConnector;
use praxis_net::protocol::{GameErrorCode, GameMessage, Message};
use praxis_types::{Color, Money};

use common::{become_ready, island_params, login, pump, start_coordinator, STEP};

fn money(s: &str) -> Money {
    s.parse().unwrap()
}

/// Wait for a specific game message.
fn pump_gm<F: Fn(&GameMessage) -> bool>(
    client: &ClientConnector,
    pred: F,
    what: &str,
) -> GameMessage {
    let message = pump(
        client,
        |m| matches!(m, Message::Gm(gm) if pred(gm)),
        what,
    );
    match message {
        Message::Gm(gm) => gm,
        _ => unreachable!(),
    }
}

/// Start a two-seat island session and sort the clients into (blue, red)
/// using their initmatch announcements.
fn start_pair(
    auction_time: u32,
) -> (
    praxis_server::Coordinator,
    ClientConnector,
    ClientConnector,
    tempfile::TempDir,
) {
    let (coordinator, addr, dir) = start_coordinator(island_params(2, auction_time, &[]));
    let a = login(&addr, "Ann");
    let b = login(&addr, "Ben");
    assert!(coordinator.run_state().wait_start_enabled(STEP));
    coordinator.run_state().set_auto_advance(true);
    coordinator.start_session().unwrap();
    become_ready(&a);
    become_ready(&b);

    let color_a = match pump_gm(&a, |gm| matches!(gm, GameMessage::InitMatch { .. }), "initmatch") {
        GameMessage::InitMatch { color, .. } => color,
        _ => unreachable!(),
    };
    let color_b = match pump_gm(&b, |gm| matches!(gm, GameMessage::InitMatch { .. }), "initmatch") {
        GameMessage::InitMatch { color, .. } => color,
        _ => unreachable!(),
    };
    assert_ne!(color_a, color_b, "one seat of each color");
    if color_a == Color::Blue {
        (coordinator, a, b, dir)
    } else {
        (coordinator, b, a, dir)
    }
}

/// Drive both seats through the production phase for one color. The
/// producer picks index 0 of its schedule.
fn produce(blue: &ClientConnector, red: &ClientConnector, color: Color) {
    for (client, produces) in [(blue, color == Color::Blue), (red, color == Color::Red)] {
        let production = pump_gm(
            client,
            |gm| matches!(gm, GameMessage::Production { color: c, .. } if *c == color),
            "production",
        );
        if let GameMessage::Production { pf, .. } = &production {
            assert_eq!(pf.is_some(), produces, "only producers get the schedule");
        }
        let choice = if produces { Some(0) } else { None };
        client.send(Message::Gm(GameMessage::Choice { choice }));
        pump_gm(
            client,
            |gm| matches!(gm, GameMessage::ProductionChoice { color: c, .. } if *c == color),
            "production confirmation",
        );
    }
}

#[test]
fn auction_matches_bids_and_asks_into_a_transaction() {
    let (coordinator, blue, red, dir) = start_pair(3);

    // Blue production: index 0 of the default schedule yields 15 blue
    // chips and no green.
    produce(&blue, &red, Color::Blue);

    for client in [&blue, &red] {
        let auction = pump_gm(
            client,
            |gm| matches!(gm, GameMessage::Auction { .. }),
            "auction open",
        );
        assert_eq!(
            auction,
            GameMessage::Auction {
                color: Color::Blue,
                auction_time: 3
            }
        );
    }

    // Too-big and non-improving bids are reflected back as errors.
    red.send(Message::Gm(GameMessage::Bid {
        id: None,
        amount: money("100.00"),
    }));
    let err = pump_gm(&red, |gm| matches!(gm, GameMessage::Error { .. }), "rich bid");
    assert_eq!(
        err,
        GameMessage::Error {
            error: GameErrorCode::NotEnoughDollars
        }
    );

    red.send(Message::Gm(GameMessage::Bid {
        id: None,
        amount: money("1.00"),
    }));
    let bid = pump_gm(&blue, |gm| matches!(gm, GameMessage::Bid { .. }), "bid seen");
    let GameMessage::Bid { id: bidder, amount } = bid else {
        unreachable!();
    };
    assert_eq!(amount, money("1.00"));
    let red_seat = bidder.unwrap();
    let blue_seat = 1 - red_seat;

    red.send(Message::Gm(GameMessage::Bid {
        id: None,
        amount: money("1.00"),
    }));
    let err = pump_gm(&red, |gm| matches!(gm, GameMessage::Error { .. }), "equal bid");
    assert_eq!(
        err,
        GameMessage::Error {
            error: GameErrorCode::BidTooLow
        }
    );

    blue.send(Message::Gm(GameMessage::Ask {
        id: None,
        amount: money("1.50"),
    }));
    pump_gm(&red, |gm| matches!(gm, GameMessage::Ask { .. }), "ask seen");

    // The crossing bid trades at the accepted amount.
    red.send(Message::Gm(GameMessage::Bid {
        id: None,
        amount: money("1.50"),
    }));
    for client in [&blue, &red] {
        let tx = pump_gm(
            client,
            |gm| matches!(gm, GameMessage::Transaction { .. }),
            "transaction",
        );
        assert_eq!(
            tx,
            GameMessage::Transaction {
                buyer_id: red_seat,
                seller_id: blue_seat,
                amount: money("1.50")
            }
        );
    }

    // Settled balances: one blue chip and 1.50 moved between the seats.
    let blue_acct = coordinator.seats().acct(blue_seat);
    assert_eq!(blue_acct.dollars, money("11.50"));
    assert_eq!(blue_acct.blue, 14);
    let red_acct = coordinator.seats().acct(red_seat);
    assert_eq!(red_acct.dollars, money("8.50"));
    assert_eq!(red_acct.blue, 1);

    // The auction runs out its clock; the timeup is broadcast.
    pump_gm(&blue, |gm| matches!(gm, GameMessage::Timeup), "blue timeup");
    pump_gm(&red, |gm| matches!(gm, GameMessage::Timeup), "blue timeup");

    // Red's phase: default choices, no trades, wait out the clock.
    produce(&blue, &red, Color::Red);
    pump_gm(&blue, |gm| matches!(gm, GameMessage::Timeup), "red timeup");

    for client in [&blue, &red] {
        pump(client, |m| matches!(m, Message::Earnings { .. }), "earnings");
        pump(
            client,
            |m| matches!(m, Message::EndOfExperiment { .. }),
            "end of experiment",
        );
    }
    assert!(coordinator.run_state().wait_finished(STEP));

    // The market log carries the whole tape in order.
    let session_id = coordinator.run_state().session_id();
    let market = common::read_artifact(dir.path(), &session_id, "market-history.csv");
    let lines: Vec<&str> = market.lines().collect();
    assert_eq!(
        lines[0],
        "Match,Round,Group,Market,Action,Buyer,Bid,Accept,Ask,Seller,Time"
    );
    let actions: Vec<&str> = lines[1..]
        .iter()
        .map(|l| l.split(',').nth(4).unwrap())
        .collect();
    assert_eq!(actions, vec!["bid", "ask", "accept"]);
    assert!(lines[3].contains(&format!("accept,{},,1.50,,{}", red_seat, blue_seat)));
}

#[test]
fn timer_expiry_ends_a_quiet_auction() {
    let (coordinator, blue, red, _dir) = start_pair(2);

    produce(&blue, &red, Color::Blue);
    pump_gm(&blue, |gm| matches!(gm, GameMessage::Auction { .. }), "auction open");

    let start = std::time::Instant::now();
    pump_gm(&blue, |gm| matches!(gm, GameMessage::Timeup), "timeup");
    let elapsed = start.elapsed();
    assert!(elapsed.as_secs_f64() >= 1.9, "ended after {:?}", elapsed);

    produce(&blue, &red, Color::Red);
    pump_gm(&red, |gm| matches!(gm, GameMessage::Timeup), "red timeup");
    assert!(coordinator.run_state().wait_finished(STEP));
}

#[test]
fn pausing_an_auction_resumes_with_the_remaining_clock() {
    let (coordinator, blue, red, _dir) = start_pair(30);

    produce(&blue, &red, Color::Blue);
    pump_gm(&blue, |gm| matches!(gm, GameMessage::Auction { .. }), "auction open");
    pump_gm(&red, |gm| matches!(gm, GameMessage::Auction { .. }), "auction open");

    std::thread::sleep(std::time::Duration::from_millis(1200));
    coordinator.pause();
    pump(&blue, |m| matches!(m, Message::Pause), "pause notice");

    assert!(coordinator.resume());
    let reopened = pump_gm(
        &blue,
        |gm| matches!(gm, GameMessage::Auction { .. }),
        "auction reopened",
    );
    let GameMessage::Auction { auction_time, .. } = reopened else {
        unreachable!();
    };
    assert!(
        auction_time >= 27 && auction_time <= 29,
        "remaining clock was {}",
        auction_time
    );
}

#[test]
fn money_shock_splits_whole_units_across_recipients() {
    let params = island_params(
        4,
        1,
        &[
            ("moneyShocks_blueMkt", "10"),
            ("moneyShocks_blueMkt_rounds", "1"),
            ("moneyShocks_blueMkt_who", "3"),
        ],
    );
    let (coordinator, addr, _dir) = start_coordinator(params);

    let clients: Vec<ClientConnector> = ["P0", "P1", "P2", "P3"]
        .iter()
        .map(|name| login(&addr, name))
        .collect();
    assert!(coordinator.run_state().wait_start_enabled(STEP));
    coordinator.run_state().set_auto_advance(true);
    coordinator.start_session().unwrap();
    for client in &clients {
        become_ready(client);
    }

    // Everyone is hit by the shock before the blue auction; the realized
    // amounts are positive whole units summing to the aggregate.
    let mut total = Money::ZERO;
    for client in &clients {
        let production = pump_gm(
            client,
            |gm| matches!(gm, GameMessage::Production { color: Color::Blue, .. }),
            "blue production",
        );
        let GameMessage::Production {
            money_shock,
            money_shock_amount,
            ..
        } = production
        else {
            unreachable!();
        };
        assert!(money_shock);
        let amount = money_shock_amount.unwrap();
        assert!(amount.is_positive());
        assert_eq!(amount.cents() % 100, 0, "whole units only");
        total += amount;
        client.send(Message::Gm(GameMessage::Choice { choice: None }));
    }
    assert_eq!(total, money("10.00"));

    // Account balances reflect the shock on top of starting dollars.
    let mut balance_total = Money::ZERO;
    for seat in 0..4 {
        balance_total += coordinator.seats().acct(seat).dollars;
    }
    assert_eq!(balance_total, money("50.00"));
}

#[test]
fn shock_with_more_recipients_than_units_refuses_to_start_the_round() {
    let params = island_params(
        4,
        1,
        &[
            ("moneyShocks_blueMkt", "2"),
            ("moneyShocks_blueMkt_rounds", "1"),
            ("moneyShocks_blueMkt_who", "3"),
        ],
    );
    let (coordinator, addr, _dir) = start_coordinator(params);
    let clients: Vec<ClientConnector> = ["P0", "P1", "P2", "P3"]
        .iter()
        .map(|name| login(&addr, name))
        .collect();
    assert!(coordinator.run_state().wait_start_enabled(STEP));
    coordinator.run_state().set_auto_advance(true);
    coordinator.start_session().unwrap();
    for client in &clients {
        become_ready(client);
    }

    // Match init rejects the shock, so the session aborts before any
    // production message goes out.
    assert!(coordinator.run_state().wait_finished(STEP));
    assert!(clients[0]
        .recv_message(std::time::Duration::from_millis(500))
        .map(|m| !matches!(m, Message::Gm(GameMessage::Production { .. })))
        .unwrap_or(true));
}
