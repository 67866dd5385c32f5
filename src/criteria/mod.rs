//! Rule-based song selection. Stored include/exclude objects are compiled
//! into a typed [`RuleSet`] once, then evaluated against songs by
//! [`matches`] without any string lookups.

mod matcher;
mod rules;

pub use matcher::{filter_matching, matches};
pub(crate) use rules::id_from_json;
pub use rules::{
    Feature, FieldFilter, FieldKind, InvalidReason, NumericRange, RuleSet, RuleWarning,
};
