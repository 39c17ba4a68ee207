// Tiered pairwise rating deltas.
//
// The absolute rating difference between the two players picks a tier in the
// winners' table and in the losers' table. The winner is "strong" when rated
// at least as high as the loser and "weak" on an upset.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Strong,
    Weak,
}

/// One rating-difference range. `max: None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTier {
    pub min: u32,
    pub max: Option<u32>,
    pub strong_delta: i32,
    pub weak_delta: i32,
}

impl RuleTier {
    pub fn new(min: u32, max: Option<u32>, strong_delta: i32, weak_delta: i32) -> Self {
        RuleTier {
            min,
            max,
            strong_delta,
            weak_delta,
        }
    }

    pub fn covers(&self, diff: u32) -> bool {
        diff >= self.min && self.max.map_or(true, |max| diff <= max)
    }

    pub fn delta(&self, role: Role) -> i32 {
        match role {
            Role::Strong => self.strong_delta,
            Role::Weak => self.weak_delta,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingChange {
    pub winner_delta: i32,
    pub loser_delta: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTable {
    pub winners: Vec<RuleTier>,
    pub losers: Vec<RuleTier>,
}

impl RuleTable {
    /// The league default: 0-50, 51-100, 101-200, 201+.
    pub fn standard() -> Self {
        let tiers = vec![
            RuleTier::new(0, Some(50), 25, 25),
            RuleTier::new(51, Some(100), 20, 30),
            RuleTier::new(101, Some(200), 15, 35),
            RuleTier::new(201, None, 10, 40),
        ];
        RuleTable {
            winners: tiers.clone(),
            losers: tiers,
        }
    }

    /// Both tables must start at 0, be contiguous and end unbounded.
    pub fn validate(&self) -> CoreResult<()> {
        validate_tiers("winners", &self.winners)?;
        validate_tiers("losers", &self.losers)
    }

    /// Rating change for a decided match. Fails when either table has no
    /// tier for the difference.
    pub fn calculate(&self, winner_rating: i32, loser_rating: i32) -> CoreResult<RatingChange> {
        let diff = winner_rating.abs_diff(loser_rating);
        let role = if winner_rating >= loser_rating {
            Role::Strong
        } else {
            Role::Weak
        };
        let winner_tier = find_tier(&self.winners, diff)?;
        let loser_tier = find_tier(&self.losers, diff)?;
        Ok(RatingChange {
            winner_delta: winner_tier.delta(role),
            loser_delta: -loser_tier.delta(role),
        })
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::standard()
    }
}

fn find_tier(tiers: &[RuleTier], diff: u32) -> CoreResult<&RuleTier> {
    tiers
        .iter()
        .find(|t| t.covers(diff))
        .ok_or_else(|| ConfigError::UncoveredRatingDifference(diff).into())
}

fn validate_tiers(name: &str, tiers: &[RuleTier]) -> CoreResult<()> {
    let invalid = |reason: String| ConfigError::RuleTable(format!("{name} table: {reason}"));

    let Some(first) = tiers.first() else {
        return Err(invalid("no tiers".into()).into());
    };
    if first.min != 0 {
        return Err(invalid(format!("first tier starts at {}, not 0", first.min)).into());
    }
    for (i, tier) in tiers.iter().enumerate() {
        let last = i + 1 == tiers.len();
        match tier.max {
            Some(max) if max < tier.min => {
                return Err(invalid(format!("tier {}-{} is empty", tier.min, max)).into());
            }
            Some(max) if last => {
                return Err(invalid(format!("differences above {max} are not covered")).into());
            }
            None if !last => {
                return Err(invalid(format!("unbounded tier at {} is not last", tier.min)).into());
            }
            _ => {}
        }
        if let Some(next) = tiers.get(i + 1) {
            let expected = tier.max.map(|max| max + 1);
            if expected != Some(next.min) {
                return Err(invalid(format!(
                    "tier starting at {} does not follow the previous tier",
                    next.min
                ))
                .into());
            }
        }
    }
    Ok(())
}
