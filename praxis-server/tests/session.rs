mod common;

use std::time::Duration;

use praxis_net::client::ClientConnector;
use praxis_net::protocol::{GameMessage, Message};
use praxis_server::seats::SeatStatus;
use praxis_types::Money;

use common::{become_ready, login, pump, quiz_params, start_coordinator, wait_until, STEP};

fn money(s: &str) -> Money {
    s.parse().unwrap()
}

#[test]
fn quiz_session_runs_one_round_end_to_end() {
    let (coordinator, addr, dir) = start_coordinator(quiz_params(2, 1));

    let alice = login(&addr, "Alice");
    let bob = login(&addr, "Bob");
    assert!(coordinator.run_state().wait_start_enabled(STEP));

    coordinator.run_state().set_auto_advance(true);
    coordinator.start_session().unwrap();

    become_ready(&alice);
    become_ready(&bob);

    for client in [&alice, &bob] {
        let round = pump(client, |m| matches!(m, Message::Round { .. }), "round");
        assert_eq!(round, Message::Round { round: 0 });
        pump(
            client,
            |m| matches!(m, Message::Gm(GameMessage::Question { .. })),
            "question",
        );
    }

    // Chat is on for this game; lines are forwarded with the sender's id.
    alice.send(Message::Chat {
        id: None,
        message: "good luck".into(),
    });
    let line = pump(&bob, |m| matches!(m, Message::Chat { .. }), "chat line");
    assert_eq!(
        line,
        Message::Chat {
            id: Some(0),
            message: "good luck".into()
        }
    );

    alice.send(Message::Gm(GameMessage::Answer { amount: 5 }));
    bob.send(Message::Gm(GameMessage::Answer { amount: 7 }));

    let earnings_a = pump(&alice, |m| matches!(m, Message::Earnings { .. }), "earnings");
    assert_eq!(
        earnings_a,
        Message::Earnings {
            earnings: money("0.05")
        }
    );
    let earnings_b = pump(&bob, |m| matches!(m, Message::Earnings { .. }), "earnings");
    assert_eq!(
        earnings_b,
        Message::Earnings {
            earnings: money("0.07")
        }
    );

    for client in [&alice, &bob] {
        let end = pump(
            client,
            |m| matches!(m, Message::EndOfExperiment { .. }),
            "endOfExperiment",
        );
        if let Message::EndOfExperiment {
            show_up_payment,
            survey,
            ..
        } = end
        {
            assert_eq!(show_up_payment, Money::ZERO);
            assert_eq!(survey, None);
        }
    }

    assert!(coordinator.run_state().wait_finished(STEP));

    // One history row per seat, round 1, with the answered amounts.
    let session_id = coordinator.run_state().session_id();
    let history = common::read_artifact(dir.path(), &session_id, "history.csv");
    let lines: Vec<&str> = history.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].ends_with("amount,earnings"));
    assert!(lines[1].contains(",1,0,") && lines[1].ends_with("5,0.05"));
    assert!(lines[2].contains(",1,1,") && lines[2].ends_with("7,0.07"));

    // Status snapshot, chat transcript, and parameter dump exist.
    let status = common::read_artifact(dir.path(), &session_id, "status.csv");
    assert!(status.contains("Alice"));
    let chat = common::read_artifact(dir.path(), &session_id, "chat.csv");
    assert!(chat.lines().any(|l| l.ends_with("0,,good luck")));
    assert!(dir
        .path()
        .join(format!("{}-parameters.toml", session_id))
        .exists());
}

#[test]
fn duplicate_names_are_rejected_and_seat_freed() {
    let (coordinator, addr, _dir) = start_coordinator(quiz_params(2, 1));

    let _alice = login(&addr, "Alice");
    wait_until(
        || coordinator.seats().name(0) == Some("Alice".into()),
        "first login",
    );

    let impostor = login(&addr, "Alice");
    let err = pump(
        &impostor,
        |m| matches!(m, Message::Error { .. }),
        "name collision error",
    );
    assert_eq!(
        err,
        Message::Error {
            error_string: "That name is already taken.".into()
        }
    );
    pump(
        &impostor,
        |m| matches!(m, Message::Disconnect),
        "impostor dropped",
    );

    // The seat is free again for a proper login.
    let _bob = login(&addr, "Bob");
    assert!(coordinator.run_state().wait_start_enabled(STEP));
}

#[test]
fn a_full_table_turns_connections_away() {
    let (coordinator, addr, _dir) = start_coordinator(quiz_params(1, 1));

    let _alice = login(&addr, "Alice");
    assert!(coordinator.run_state().wait_start_enabled(STEP));

    let latecomer = ClientConnector::connect(&addr).unwrap();
    let err = pump(
        &latecomer,
        |m| matches!(m, Message::Error { .. }),
        "capacity error",
    );
    assert_eq!(
        err,
        Message::Error {
            error_string: "The session is full.".into()
        }
    );
    let start = std::time::Instant::now();
    pump(
        &latecomer,
        |m| matches!(m, Message::Disconnect),
        "latecomer dropped",
    );
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn disconnect_pauses_and_relogin_resumes() {
    let (coordinator, addr, _dir) = start_coordinator(quiz_params(2, 1));

    let alice = login(&addr, "Alice");
    let bob = login(&addr, "Bob");
    assert!(coordinator.run_state().wait_start_enabled(STEP));

    coordinator.run_state().set_auto_advance(true);
    coordinator.start_session().unwrap();
    become_ready(&alice);
    become_ready(&bob);

    // Mid-ask: Alice answers, Bob's socket dies.
    pump(
        &bob,
        |m| matches!(m, Message::Gm(GameMessage::Question { .. })),
        "question",
    );
    alice.send(Message::Gm(GameMessage::Answer { amount: 5 }));
    bob.close();

    wait_until(
        || coordinator.seats().status(1) == Some(SeatStatus::Disconnected),
        "seat 1 disconnected",
    );
    assert!(!coordinator.run_state().unpause_enabled());
    assert!(!coordinator.resume());
    pump(&alice, |m| matches!(m, Message::Pause), "pause notice");

    // A replacement connects and is offered Bob's seat.
    let bob2 = ClientConnector::connect(&addr).unwrap();
    let prompt = pump(
        &bob2,
        |m| matches!(m, Message::ReloginPrompt { .. }),
        "reloginPrompt",
    );
    assert_eq!(
        prompt,
        Message::ReloginPrompt {
            disconnected_clients: vec![(1, "Bob".into())]
        }
    );

    bob2.send(Message::Relogin { id: 1 });
    let reinit = pump(&bob2, |m| matches!(m, Message::Reinit { .. }), "reinit");
    let Message::Reinit {
        id,
        name,
        round_num,
        extras,
        ..
    } = reinit
    else {
        unreachable!();
    };
    assert_eq!(id, 1);
    assert_eq!(name, "Bob");
    assert_eq!(round_num, 0);
    // The outstanding ask rides along so the client can re-pose it.
    assert!(extras.contains_key("unansweredMessage"));

    bob2.send(Message::Ready);
    wait_until(
        || coordinator.run_state().unpause_enabled(),
        "unpause re-enabled",
    );
    assert!(coordinator.resume());

    bob2.send(Message::Gm(GameMessage::Answer { amount: 7 }));

    let earnings = pump(&bob2, |m| matches!(m, Message::Earnings { .. }), "earnings");
    assert_eq!(
        earnings,
        Message::Earnings {
            earnings: money("0.07")
        }
    );
    pump(
        &alice,
        |m| matches!(m, Message::EndOfExperiment { .. }),
        "end for alice",
    );
    assert!(coordinator.run_state().wait_finished(STEP));
}

#[test]
fn relogin_for_a_live_seat_is_reprompted() {
    let (coordinator, addr, _dir) = start_coordinator(quiz_params(2, 1));

    let alice = login(&addr, "Alice");
    let bob = login(&addr, "Bob");
    assert!(coordinator.run_state().wait_start_enabled(STEP));
    coordinator.run_state().set_auto_advance(true);
    coordinator.start_session().unwrap();
    become_ready(&alice);
    become_ready(&bob);
    pump(
        &bob,
        |m| matches!(m, Message::Gm(GameMessage::Question { .. })),
        "question",
    );

    bob.close();
    wait_until(
        || coordinator.seats().status(1) == Some(SeatStatus::Disconnected),
        "seat 1 disconnected",
    );

    // Claiming Alice's live seat only gets the prompt again.
    let bob2 = ClientConnector::connect(&addr).unwrap();
    pump(
        &bob2,
        |m| matches!(m, Message::ReloginPrompt { .. }),
        "first prompt",
    );
    bob2.send(Message::Relogin { id: 0 });
    let prompt = pump(
        &bob2,
        |m| matches!(m, Message::ReloginPrompt { .. }),
        "second prompt",
    );
    assert_eq!(
        prompt,
        Message::ReloginPrompt {
            disconnected_clients: vec![(1, "Bob".into())]
        }
    );
}

#[test]
fn login_times_out_when_the_client_stays_silent() {
    let (_coordinator, addr, _dir) = start_coordinator(quiz_params(1, 1));

    let silent = ClientConnector::connect(&addr).unwrap();
    pump(&silent, |m| matches!(m, Message::LoginPrompt), "loginPrompt");

    // No login within the window: error, then the connection drops.
    let err = pump(&silent, |m| matches!(m, Message::Error { .. }), "timeout error");
    assert_eq!(
        err,
        Message::Error {
            error_string: "Login timed out.".into()
        }
    );
    pump(&silent, |m| matches!(m, Message::Disconnect), "dropped");
}
