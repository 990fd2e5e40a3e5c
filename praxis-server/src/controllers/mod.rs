//! Game controllers.
//!
//! A controller owns the game-specific logic of a session: what happens in
//! a round, how seats earn, and what a reconnecting client needs to rebuild
//! its view. Controller hooks run on the driver thread only, so round logic
//! reads as straight-line code; any state a controller shares with the
//! reconnection path is behind its own interior lock.
//!
//! Controllers are constructed through a name-keyed registry; the game
//! type in the parameter file picks the constructor.

pub mod island;
pub mod quiz;

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Map, Value};

use praxis_types::{Money, RoundingPolicy, SeatId, SessionParams};

use crate::driver::Coordinator;
use crate::error::SessionError;

pub use island::IslandControl;
pub use quiz::QuizControl;

/// The contract between the session driver and a game.
pub trait Controller: Send + Sync {
    /// Client interface class named in the `init` message.
    fn gui_class(&self) -> &str;

    fn num_players(&self) -> usize;

    fn rounding(&self) -> RoundingPolicy;

    fn show_up_payment(&self) -> Money;

    fn survey_file(&self) -> Option<PathBuf>;

    /// Extra fields attached to each seat's `init` message.
    fn init_extras(&self, _seat: SeatId) -> Map<String, Value> {
        Map::new()
    }

    /// Called once, after every seat has confirmed `ready`.
    fn init_clients(&self, ctx: &Coordinator) -> Result<(), SessionError>;

    /// The body of one round. Returns false iff this was the last round.
    fn run_round(&self, ctx: &Coordinator) -> Result<bool, SessionError>;

    /// Called after earnings have been sent and persistence flushed.
    fn post_round(&self, _ctx: &Coordinator) -> Result<(), SessionError> {
        Ok(())
    }

    /// Restart any time-dependent state after an unpause; the communicator
    /// remembers how many seconds the cancelled timer had left.
    fn on_unpause(&self, _ctx: &Coordinator) {}

    /// Extra fields attached to a reconnecting seat's `reinit` message.
    /// The default re-poses any outstanding ask.
    fn reinit_extras(&self, ctx: &Coordinator, seat: SeatId) -> Map<String, Value> {
        let mut extras = Map::new();
        if let Some(unanswered) = ctx
            .seats()
            .with_seat(seat, |s| s.unanswered_message.clone())
            .flatten()
        {
            if let Ok(value) = serde_json::to_value(&unanswered) {
                extras.insert("unansweredMessage".into(), value);
            }
        }
        extras
    }
}

/// Construct the controller named by the parameters. Controller parameters
/// are validated here, before a session can start.
pub fn build(params: &Arc<SessionParams>) -> Result<Arc<dyn Controller>, SessionError> {
    match params.game_type.as_str() {
        "island" => Ok(Arc::new(IslandControl::new(params)?)),
        "quiz" => Ok(Arc::new(QuizControl::new(params)?)),
        other => Err(SessionError::State(format!(
            "unknown game type {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use praxis_types::MatchParams;

    fn quiz_params() -> Arc<SessionParams> {
        Arc::new(SessionParams {
            game_type: "quiz".into(),
            experiment_id: String::new(),
            num_players: 2,
            show_up_payment: 5.0,
            rounding: RoundingPolicy::Penny,
            survey_file: None,
            matches: vec![MatchParams {
                num_rounds: 3,
                exchange_rate: 1.0,
                practice: false,
                custom: Default::default(),
            }],
        })
    }

    #[test]
    fn registry_builds_known_controllers() {
        let controller = build(&quiz_params()).unwrap();
        assert_eq!(controller.gui_class(), "QuizGUI");
        assert_eq!(controller.num_players(), 2);
        assert_eq!(controller.show_up_payment(), "5.00".parse().unwrap());
    }

    #[test]
    fn registry_rejects_unknown_game_types() {
        let mut params = (*quiz_params()).clone();
        params.game_type = "roulette".into();
        assert!(matches!(
            build(&Arc::new(params)),
            Err(SessionError::State(_))
        ));
    }

    #[test]
    fn island_formula_errors_surface_at_build_time() {
        let mut params = (*quiz_params()).clone();
        params.game_type = "island".into();
        params.matches[0]
            .custom
            .insert("scoring_formula".into(), "open('x')".into());
        assert!(build(&Arc::new(params)).is_err());
    }
}
