//! Logical rewrite rules.
//!
//! The logical rules form a pipeline with a fixed order:
//!
//! 1. [`DecorrelateRule`] turns `Apply` nodes into joins where the inner side no longer
//! depends on the outer row.
//! 2. [`PredicatePushDownRule`] moves filters as close to the data sources as possible.
//! 3. [`ColumnPruningRule`] drops output columns nobody reads.
//! 4. [`BuildKeyInfoRule`] derives unique keys of every node.
//! 5. [`EliminateAggRule`] replaces aggregations grouping by a unique key with projections.
//! 6. [`AggPushDownRule`] splits aggregations over inner joins into a partial stage below
//! the join and a final stage above it.
//!
//! Each rule rewrites the plan arena in place and never changes the output schema of the
//! root. Which rules run is decided by an [`OptFlags`] set: the caller's flags intersected
//! with the flags the plan builder computed for the shape it built.
mod agg_push_down;
pub use agg_push_down::*;
mod column_pruning;
pub use column_pruning::*;
mod decorrelate;
pub use decorrelate::*;
mod eliminate_agg;
pub use eliminate_agg::*;
mod key_info;
pub use key_info::*;
pub(crate) use key_info::derive_keys;
mod predicate_push_down;
pub use predicate_push_down::*;

use std::fmt::{Debug, Formatter};

use enum_dispatch::enum_dispatch;
use enumset::{EnumSet, EnumSetType};
use strum_macros::{AsRefStr, EnumString};

use crate::error::OptResult;
use crate::optimizer::OptimizerContext;
use crate::plan::LogicalPlan;

/// A logical rule rewrites the whole plan at once.
#[enum_dispatch(RuleImpl)]
pub trait LogicalRule {
    fn apply(&self, plan: &mut LogicalPlan, ctx: &mut OptimizerContext) -> OptResult<()>;

    /// Flag enabling this rule.
    fn rule_id(&self) -> RuleId;
}

#[enum_dispatch]
#[derive(Clone, AsRefStr)]
pub enum RuleImpl {
    DecorrelateRule,
    PredicatePushDownRule,
    ColumnPruningRule,
    BuildKeyInfoRule,
    EliminateAggRule,
    AggPushDownRule,
}

impl Debug for RuleImpl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.as_ref())
    }
}

/// Declaration order is the pipeline order, and the bit of the rule in [`OptFlags`].
#[derive(EnumSetType, Debug, AsRefStr, EnumString)]
pub enum RuleId {
    Decorrelate,
    PredicatePushDown,
    ColumnPruning,
    BuildKeyInfo,
    EliminateAgg,
    AggPushDown,
}

pub type OptFlags = EnumSet<RuleId>;

/// Flags from a raw bitmask, unknown bits are ignored.
pub fn flags_from_bits(bits: u64) -> OptFlags {
    OptFlags::from_u64_truncated(bits)
}

pub fn flags_to_bits(flags: OptFlags) -> u64 {
    flags.as_u64()
}

#[rustfmt::skip::macros(lazy_static)]
lazy_static! {
    static ref LOGICAL_RULES: Vec<RuleImpl> = vec![
        DecorrelateRule::new().into(),
        PredicatePushDownRule::new().into(),
        ColumnPruningRule::new().into(),
        BuildKeyInfoRule::new().into(),
        EliminateAggRule::new().into(),
        AggPushDownRule::new().into(),
    ];
}

/// Every logical rule, in pipeline order.
pub fn logical_rules() -> &'static [RuleImpl] {
    &LOGICAL_RULES
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_rule_order_matches_flag_bits() {
        let ids: Vec<RuleId> = logical_rules().iter().map(|r| r.rule_id()).collect();
        assert_eq!(OptFlags::all().iter().collect::<Vec<_>>(), ids);
        assert_eq!(1, flags_to_bits(RuleId::Decorrelate.into()));
        assert_eq!(1 << 5, flags_to_bits(RuleId::AggPushDown.into()));
    }

    #[test]
    fn test_flags_from_bits() {
        let flags = flags_from_bits(0b101 | (1 << 40));
        assert_eq!(RuleId::Decorrelate | RuleId::ColumnPruning, flags);
        assert_eq!(0b101, flags_to_bits(flags));
        assert_eq!(OptFlags::all(), flags_from_bits(u64::MAX));
    }

    #[test]
    fn test_rule_names() {
        assert_eq!("PredicatePushDown", RuleId::PredicatePushDown.as_ref());
        assert_eq!(RuleId::EliminateAgg, RuleId::from_str("EliminateAgg").unwrap());
        assert_eq!("\"DecorrelateRule\"", format!("{:?}", logical_rules()[0]));
    }
}
