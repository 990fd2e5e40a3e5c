//! Seat grouping.
//!
//! Groups are a fixed partition of seats made once per session; per-group
//! state (the auction book, market history, shock bookkeeping) is scoped
//! here so outcomes in one group never leak into another.

use rand::seq::SliceRandom;

use praxis_types::{GroupId, SeatId};

use crate::market::{MarketBook, RoundMarketEvents};

/// One group of seats and its market-scoped state.
#[derive(Debug, Clone, Default)]
pub struct Group {
    pub id: GroupId,
    pub seats: Vec<SeatId>,
    /// Blue seats, sent to clients so chat lines can be color-marked.
    pub blue_ids: Vec<SeatId>,
    pub book: MarketBook,
    /// `mkt_hist[match][round]` holds the market events, split by color.
    pub mkt_hist: Vec<Vec<RoundMarketEvents>>,
}

impl Group {
    fn new(id: GroupId) -> Self {
        Group {
            id,
            ..Group::default()
        }
    }
}

/// Partition seats sequentially into `num_groups` groups. All groups get
/// the same number of seats except possibly the last, which takes the
/// leftovers.
pub fn group_seats_simple(seats: &[SeatId], num_groups: usize) -> Vec<Group> {
    let num_groups = num_groups.clamp(1, seats.len().max(1));
    let mut group_size = seats.len() / num_groups;
    if seats.len() % num_groups > 0 {
        group_size += 1;
    }

    let mut groups = Vec::with_capacity(num_groups);
    for id in 0..num_groups {
        let mut group = Group::new(id);
        group.seats = seats
            .iter()
            .skip(id * group_size)
            .take(group_size)
            .copied()
            .collect();
        groups.push(group);
    }
    groups
}

/// Shuffle the seats, then partition them sequentially.
pub fn group_seats_random(seats: &[SeatId], num_groups: usize) -> Vec<Group> {
    let mut shuffled = seats.to_vec();
    shuffled.shuffle(&mut rand::thread_rng());
    group_seats_simple(&shuffled, num_groups)
}
