//! Assignment and pricing policy
//!
//! Pure functions over an injected random source, so callers can pin a
//! seeded generator and tests stay deterministic.

use rand::seq::SliceRandom;
use rand::Rng;

use super::model::User;

/// Cost charged to the assignee when a task enters their queue.
pub const PRICE_MIN: i64 = 10;
pub const PRICE_MAX: i64 = 20;

/// Payout earned when the task is completed.
pub const REWARD_MIN: i64 = 20;
pub const REWARD_MAX: i64 = 40;

/// Draw `(price, reward)` for a task at first sight. Both are fixed for
/// the life of the task.
pub fn price_task<R: Rng + ?Sized>(rng: &mut R) -> (i64, i64) {
    (
        rng.gen_range(PRICE_MIN..=PRICE_MAX),
        rng.gen_range(REWARD_MIN..=REWARD_MAX),
    )
}

/// Pick an assignee uniformly at random from the eligible set.
///
/// Selection is independent per call: a reshuffle may pick the current
/// assignee again. Returns `None` when nobody is eligible.
pub fn choose_assignee<'a, R: Rng + ?Sized>(rng: &mut R, eligible: &'a [User]) -> Option<&'a User> {
    eligible.choose(rng)
}

/// Whether a user may have tasks assigned to them. Privileged roles stay
/// out of the pool regardless of activity.
pub fn is_eligible(user: &User) -> bool {
    user.is_active && !user.role.is_privileged()
}
