#![allow(dead_code)]
//! Test harness for coordinator integration tests.

use std::path::Path;
use std::time::{Duration, Instant};

use praxis_net::client::ClientConnector;
use praxis_net::protocol::Message;
use praxis_server::Coordinator;
use praxis_types::{MatchParams, SessionParams};

pub const STEP: Duration = Duration::from_secs(10);

/// Parameters for a quiz session.
pub fn quiz_params(num_players: usize, num_rounds: usize) -> SessionParams {
    SessionParams {
        game_type: "quiz".into(),
        experiment_id: "test".into(),
        num_players,
        show_up_payment: 0.0,
        rounding: Default::default(),
        survey_file: None,
        matches: vec![MatchParams {
            num_rounds,
            exchange_rate: 1.0,
            practice: false,
            custom: Default::default(),
        }],
    }
}

/// Parameters for an island session with short phase timers.
pub fn island_params(
    num_players: usize,
    auction_time: u32,
    custom: &[(&str, &str)],
) -> SessionParams {
    let mut map: std::collections::BTreeMap<String, String> = [
        ("numGroups", "1"),
        ("prodChoiceTimeLimit", "5"),
        ("startingDollars", "10"),
        ("resetBalances", "1"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    map.insert("auctionTime".into(), auction_time.to_string());
    for (k, v) in custom {
        map.insert(k.to_string(), v.to_string());
    }
    SessionParams {
        game_type: "island".into(),
        experiment_id: "test".into(),
        num_players,
        show_up_payment: 0.0,
        rounding: Default::default(),
        survey_file: None,
        matches: vec![MatchParams {
            num_rounds: 1,
            exchange_rate: 1.0,
            practice: false,
            custom: map,
        }],
    }
}

/// Bring up a coordinator on an ephemeral port.
pub fn start_coordinator(
    params: SessionParams,
) -> (Coordinator, String, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = Coordinator::new(params, dir.path().to_path_buf()).unwrap();
    let addr = coordinator.accept_connections(0).unwrap().to_string();
    (coordinator, addr, dir)
}

/// Connect a client and complete the login exchange.
pub fn login(addr: &str, name: &str) -> ClientConnector {
    let client = ClientConnector::connect(addr).unwrap();
    let prompt = pump(&client, |m| matches!(m, Message::LoginPrompt), "loginPrompt");
    assert_eq!(prompt, Message::LoginPrompt);
    client.login(name);
    client
}

/// Read messages until one matches, panicking on timeout. Non-matching
/// messages (account updates, confirmations) are skipped.
pub fn pump<F: Fn(&Message) -> bool>(
    client: &ClientConnector,
    pred: F,
    what: &str,
) -> Message {
    let deadline = Instant::now() + STEP;
    loop {
        let left = deadline
            .checked_duration_since(Instant::now())
            .unwrap_or_else(|| panic!("timed out waiting for {}", what));
        match client.recv_message(left) {
            Some(message) if pred(&message) => return message,
            Some(_) => continue,
            None => panic!("timed out waiting for {}", what),
        }
    }
}

/// Poll a condition until it holds.
pub fn wait_until<F: Fn() -> bool>(pred: F, what: &str) {
    let deadline = Instant::now() + STEP;
    while !pred() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Answer the init message with a ready, as a real client interface would.
pub fn become_ready(client: &ClientConnector) {
    pump(client, |m| matches!(m, Message::Init { .. }), "init");
    client.send(Message::Ready);
}

/// Read one CSV artifact from the output directory.
pub fn read_artifact(dir: &Path, session_id: &str, suffix: &str) -> String {
    std::fs::read_to_string(dir.join(format!("{}-{}", session_id, suffix)))
        .unwrap_or_else(|e| panic!("cannot read {}: {}", suffix, e))
}
