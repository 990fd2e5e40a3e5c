//! A minimal request/reply game, mostly useful for testing the plumbing:
//! every round each seat is asked how much money it wants, and earns a
//! hundredth of whatever it answers.

use std::path::PathBuf;
use std::sync::Arc;

use praxis_net::protocol::{GameMessage, Message};
use praxis_types::{Money, RoundingPolicy, SessionParams};

use crate::driver::{Ask, Coordinator};
use crate::error::SessionError;

use super::Controller;

pub struct QuizControl {
    params: Arc<SessionParams>,
    num_rounds: usize,
}

impl QuizControl {
    pub fn new(params: &Arc<SessionParams>) -> Result<Self, SessionError> {
        let num_rounds = params
            .matches
            .first()
            .map(|m| m.num_rounds)
            .ok_or_else(|| SessionError::State("quiz needs at least one match".into()))?;
        Ok(QuizControl {
            params: Arc::clone(params),
            num_rounds,
        })
    }
}

impl Controller for QuizControl {
    fn gui_class(&self) -> &str {
        "QuizGUI"
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
        ctx.enable_chat(true, None);
        ctx.seats().with_all(|slots| {
            for seat in slots.iter_mut().flatten() {
                seat.history
                    .start_match(vec!["amount".into(), "earnings".into()], false, None);
            }
        });
        Ok(())
    }

    fn run_round(&self, ctx: &Coordinator) -> Result<bool, SessionError> {
        let prompt = Message::Gm(GameMessage::Question {
            prompt: "How much money do you want?".into(),
        });
        let replies = ctx.ask_all(Ask::Broadcast(prompt), "Waiting for client reply", "Ready");

        for (seat, reply) in replies.iter().enumerate() {
            let amount = match reply {
                GameMessage::Answer { amount } => *amount,
                _ => 0,
            };
            ctx.seats().with_seat(seat, |s| {
                s.earnings += Money::from_cents(amount);
                let earned = s.earnings;
                s.history
                    .add_round(vec![amount.to_string(), earned.to_string()]);
            });
        }

        Ok(ctx.run_state().round_num() + 1 < self.num_rounds)
    }
}
