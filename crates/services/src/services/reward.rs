//! ZLTO payout for a completed usage, drawn from the program's reward pool.

use db::models::{program::Program, referral_link::ReferralLink};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RewardAllocation {
    pub referee: Decimal,
    pub referrer: Decimal,
}

impl RewardAllocation {
    pub fn total(&self) -> Decimal {
        self.referee + self.referrer
    }
}

/// True when the program-wide cap or the link's per-referrer cap was already hit before
/// this completion. Such completions still count but earn nothing.
pub fn cap_reached(program: &Program, link: &ReferralLink) -> bool {
    let program_capped = program.completion_limit_reached();
    let referrer_capped = program
        .completion_limit_referee
        .is_some_and(|limit| link.completion_total >= limit);
    program_capped || referrer_capped
}

/// Split the payout using the program's current reward settings. The referee is paid
/// first; the referrer gets what is left of the pool, which may be a partial amount.
pub fn allocate(program: &Program, cap_reached: bool) -> RewardAllocation {
    if cap_reached {
        return RewardAllocation::default();
    }

    let referee_amount = program.zlto_reward_referee.unwrap_or_default().max(Decimal::ZERO);
    let referrer_amount = program.zlto_reward_referrer.unwrap_or_default().max(Decimal::ZERO);

    let Some(mut balance) = program.zlto_reward_balance() else {
        return RewardAllocation {
            referee: referee_amount,
            referrer: referrer_amount,
        };
    };

    if balance <= Decimal::ZERO {
        return RewardAllocation::default();
    }

    let referee = referee_amount.min(balance);
    balance -= referee;
    let referrer = referrer_amount.min(balance);

    RewardAllocation { referee, referrer }
}

/// Add a payout to a running cumulative; a zero payout leaves an unset cumulative unset
pub fn accumulate(cumulative: Option<Decimal>, amount: Decimal) -> Option<Decimal> {
    if amount > Decimal::ZERO {
        Some(cumulative.unwrap_or_default() + amount)
    } else {
        cumulative
    }
}

/// Stored form of a payout: `None` when nothing was paid
pub fn paid(amount: Decimal) -> Option<Decimal> {
    (amount > Decimal::ZERO).then_some(amount)
}
