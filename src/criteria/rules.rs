use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Every field a rule can constrain, keyed by the name used in the stored
/// JSON object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldKind {
    Tags,
    TagGroups,
    Artists,
    Albums,
    Genres,
    Folders,
    Paths,
    Energy,
    Valence,
    Danceability,
    Tempo,
    Duration,
    Year,
}

impl FieldKind {
    pub const ALL: [FieldKind; 13] = [
        FieldKind::Tags,
        FieldKind::TagGroups,
        FieldKind::Artists,
        FieldKind::Albums,
        FieldKind::Genres,
        FieldKind::Folders,
        FieldKind::Paths,
        FieldKind::Energy,
        FieldKind::Valence,
        FieldKind::Danceability,
        FieldKind::Tempo,
        FieldKind::Duration,
        FieldKind::Year,
    ];

    pub fn key(self) -> &'static str {
        match self {
            FieldKind::Tags => "tags",
            FieldKind::TagGroups => "tag_groups",
            FieldKind::Artists => "artists",
            FieldKind::Albums => "albums",
            FieldKind::Genres => "genres",
            FieldKind::Folders => "folders",
            FieldKind::Paths => "paths",
            FieldKind::Energy => "energy",
            FieldKind::Valence => "valence",
            FieldKind::Danceability => "danceability",
            FieldKind::Tempo => "tempo",
            FieldKind::Duration => "duration",
            FieldKind::Year => "year",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.key() == key)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Numeric song attributes that range rules can constrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Energy,
    Valence,
    Danceability,
    Tempo,
    Duration,
    Year,
}

impl Feature {
    pub fn kind(self) -> FieldKind {
        match self {
            Feature::Energy => FieldKind::Energy,
            Feature::Valence => FieldKind::Valence,
            Feature::Danceability => FieldKind::Danceability,
            Feature::Tempo => FieldKind::Tempo,
            Feature::Duration => FieldKind::Duration,
            Feature::Year => FieldKind::Year,
        }
    }
}

/// Inclusive bounds; a missing bound leaves that side open.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NumericRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl NumericRange {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    /// An unset value is never inside a range, whichever bounds are given.
    pub fn contains(&self, value: Option<f64>) -> bool {
        let Some(value) = value else {
            return false;
        };
        if let Some(min) = self.min {
            if value < min {
                return false;
            }
        }
        if let Some(max) = self.max {
            if value > max {
                return false;
            }
        }
        true
    }
}

/// Why a stored rule could not be turned into a typed filter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidReason {
    #[error("unrecognized field")]
    UnknownField,
    #[error("expected a list of ids")]
    ExpectedIdList,
    #[error("expected a list of strings")]
    ExpectedStringList,
    #[error("expected an object with optional \"min\" and \"max\"")]
    ExpectedRange,
    #[error("\"{0}\" bound is not a number")]
    InvalidBound(&'static str),
    #[error("rules must be a JSON object")]
    NotAnObject,
}

/// One compiled rule. Each variant carries the typed payload for its field;
/// `Invalid` keeps whatever could not be understood so it can be reported
/// and written back untouched. An `Invalid` rule never matches.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldFilter {
    Tags(BTreeSet<i64>),
    TagGroups(BTreeSet<i64>),
    Artists(Vec<String>),
    Albums(Vec<String>),
    Genres(Vec<String>),
    Folders(Vec<String>),
    Paths(Vec<String>),
    Range(Feature, NumericRange),
    Invalid {
        key: String,
        raw: Value,
        reason: InvalidReason,
    },
}

impl FieldFilter {
    /// Compile a single `key: value` entry of a stored rule object.
    pub fn compile(key: &str, raw: &Value) -> Self {
        let Some(kind) = FieldKind::from_key(key) else {
            return Self::invalid(key, raw, InvalidReason::UnknownField);
        };

        let range = |feature| compile_range(raw).map(|range| FieldFilter::Range(feature, range));
        let compiled = match kind {
            FieldKind::Tags => compile_ids(key, raw).map(FieldFilter::Tags),
            FieldKind::TagGroups => compile_ids(key, raw).map(FieldFilter::TagGroups),
            FieldKind::Artists => compile_strings(key, raw).map(FieldFilter::Artists),
            FieldKind::Albums => compile_strings(key, raw).map(FieldFilter::Albums),
            FieldKind::Genres => compile_strings(key, raw).map(FieldFilter::Genres),
            FieldKind::Folders => compile_strings(key, raw).map(FieldFilter::Folders),
            FieldKind::Paths => compile_strings(key, raw).map(FieldFilter::Paths),
            FieldKind::Energy => range(Feature::Energy),
            FieldKind::Valence => range(Feature::Valence),
            FieldKind::Danceability => range(Feature::Danceability),
            FieldKind::Tempo => range(Feature::Tempo),
            FieldKind::Duration => range(Feature::Duration),
            FieldKind::Year => range(Feature::Year),
        };

        compiled.unwrap_or_else(|reason| Self::invalid(key, raw, reason))
    }

    fn invalid(key: &str, raw: &Value, reason: InvalidReason) -> Self {
        debug!(key, %reason, "ignoring rule entry");
        FieldFilter::Invalid {
            key: key.to_string(),
            raw: raw.clone(),
            reason,
        }
    }

    /// The field this rule constrains, `None` when the rule is invalid.
    pub fn kind(&self) -> Option<FieldKind> {
        match self {
            FieldFilter::Tags(_) => Some(FieldKind::Tags),
            FieldFilter::TagGroups(_) => Some(FieldKind::TagGroups),
            FieldFilter::Artists(_) => Some(FieldKind::Artists),
            FieldFilter::Albums(_) => Some(FieldKind::Albums),
            FieldFilter::Genres(_) => Some(FieldKind::Genres),
            FieldFilter::Folders(_) => Some(FieldKind::Folders),
            FieldFilter::Paths(_) => Some(FieldKind::Paths),
            FieldFilter::Range(feature, _) => Some(feature.kind()),
            FieldFilter::Invalid { .. } => None,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            FieldFilter::Invalid { key, .. } => key,
            other => other.kind().map(FieldKind::key).unwrap_or_default(),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            FieldFilter::Tags(ids) | FieldFilter::TagGroups(ids) => {
                Value::Array(ids.iter().map(|id| Value::from(*id)).collect())
            }
            FieldFilter::Artists(values)
            | FieldFilter::Albums(values)
            | FieldFilter::Genres(values)
            | FieldFilter::Folders(values)
            | FieldFilter::Paths(values) => {
                Value::Array(values.iter().map(|value| Value::from(value.as_str())).collect())
            }
            FieldFilter::Range(_, range) => {
                let mut object = Map::new();
                if let Some(min) = range.min {
                    object.insert("min".to_string(), number_json(min));
                }
                if let Some(max) = range.max {
                    object.insert("max".to_string(), number_json(max));
                }
                Value::Object(object)
            }
            FieldFilter::Invalid { raw, .. } => raw.clone(),
        }
    }
}

/// A rule that was kept but will never match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleWarning {
    pub key: String,
    pub reason: InvalidReason,
}

impl fmt::Display for RuleWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.key.is_empty() {
            write!(f, "{}", self.reason)
        } else {
            write!(f, "{}: {}", self.key, self.reason)
        }
    }
}

/// Compiled form of an include or exclude clause. It is stored as a JSON
/// object and compiled on load; compiling never fails.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub struct RuleSet {
    filters: Vec<FieldFilter>,
}

impl RuleSet {
    pub fn new(filters: Vec<FieldFilter>) -> Self {
        Self { filters }
    }

    pub fn compile(raw: &Value) -> Self {
        match raw {
            Value::Null => Self::default(),
            Value::Object(entries) => Self {
                filters: entries
                    .iter()
                    .map(|(key, value)| FieldFilter::compile(key, value))
                    .collect(),
            },
            other => Self {
                filters: vec![FieldFilter::invalid("", other, InvalidReason::NotAnObject)],
            },
        }
    }

    pub fn filters(&self) -> &[FieldFilter] {
        &self.filters
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn warnings(&self) -> Vec<RuleWarning> {
        self.filters
            .iter()
            .filter_map(|filter| match filter {
                FieldFilter::Invalid { key, reason, .. } => Some(RuleWarning {
                    key: key.clone(),
                    reason: reason.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn to_json(&self) -> Value {
        if let [FieldFilter::Invalid {
            raw,
            reason: InvalidReason::NotAnObject,
            ..
        }] = self.filters.as_slice()
        {
            return raw.clone();
        }

        let mut object = Map::new();
        for filter in &self.filters {
            object.insert(filter.key().to_string(), filter.to_json());
        }
        Value::Object(object)
    }
}

impl From<Value> for RuleSet {
    fn from(raw: Value) -> Self {
        RuleSet::compile(&raw)
    }
}

impl From<RuleSet> for Value {
    fn from(rules: RuleSet) -> Self {
        rules.to_json()
    }
}

fn compile_ids(key: &str, raw: &Value) -> Result<BTreeSet<i64>, InvalidReason> {
    let Value::Array(items) = raw else {
        return Err(InvalidReason::ExpectedIdList);
    };

    let mut ids = BTreeSet::new();
    let mut skipped = 0usize;
    for item in items {
        match id_from_json(item) {
            Some(id) => {
                ids.insert(id);
            }
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(key, skipped, "skipped non-integer ids");
    }
    Ok(ids)
}

fn compile_strings(key: &str, raw: &Value) -> Result<Vec<String>, InvalidReason> {
    let Value::Array(items) = raw else {
        return Err(InvalidReason::ExpectedStringList);
    };

    let values: Vec<String> = items
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_owned)
        .collect();
    if values.len() < items.len() {
        debug!(key, skipped = items.len() - values.len(), "skipped non-string values");
    }
    Ok(values)
}

fn compile_range(raw: &Value) -> Result<NumericRange, InvalidReason> {
    let Value::Object(bounds) = raw else {
        return Err(InvalidReason::ExpectedRange);
    };
    Ok(NumericRange {
        min: bound(bounds, "min")?,
        max: bound(bounds, "max")?,
    })
}

fn bound(bounds: &Map<String, Value>, name: &'static str) -> Result<Option<f64>, InvalidReason> {
    match bounds.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or(InvalidReason::InvalidBound(name)),
    }
}

/// Accept `10` as well as `10.0`; anything fractional is not an id.
pub(crate) fn id_from_json(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|float| float.fract() == 0.0 && float.abs() < 9.0e15)
            .map(|float| float as i64)
    })
}

/// Keep whole numbers looking like integers when rules are written back.
fn number_json(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compiles_every_known_field() {
        let rules = RuleSet::compile(&json!({
            "tags": [1, 2],
            "tag_groups": [7],
            "artists": ["Nina Simone"],
            "albums": ["Pastel Blues"],
            "genres": ["Jazz"],
            "folders": ["/music/jazz"],
            "paths": ["live"],
            "energy": {"min": 0.2, "max": 0.8},
            "valence": {"min": 0.1},
            "danceability": {"max": 0.9},
            "tempo": {"min": 90, "max": 130},
            "duration": {},
            "year": {"min": 1960, "max": null},
        }));

        assert_eq!(rules.filters().len(), 13);
        assert!(rules.warnings().is_empty());
        let kinds: BTreeSet<FieldKind> = rules.filters().iter().filter_map(FieldFilter::kind).collect();
        assert_eq!(kinds.len(), FieldKind::ALL.len());
    }

    #[test]
    fn test_unknown_and_mistyped_fields_become_invalid() {
        let rules = RuleSet::compile(&json!({
            "moods": ["happy"],
            "tags": {"min": 1},
            "energy": [0.5],
            "tempo": {"min": "fast"},
        }));

        let mut warnings: Vec<String> = rules.warnings().iter().map(ToString::to_string).collect();
        warnings.sort();
        assert_eq!(
            warnings,
            vec![
                "energy: expected an object with optional \"min\" and \"max\"".to_string(),
                "moods: unrecognized field".to_string(),
                "tags: expected a list of ids".to_string(),
                "tempo: \"min\" bound is not a number".to_string(),
            ]
        );
    }

    #[test]
    fn test_list_entries_of_wrong_type_are_skipped() {
        let rules = RuleSet::compile(&json!({
            "tags": [3, "three", 4.0, 4.5, null],
            "artists": ["Björk", 12, null],
        }));

        assert_eq!(
            rules.filters(),
            &[
                FieldFilter::Artists(vec!["Björk".to_string()]),
                FieldFilter::Tags(BTreeSet::from([3, 4])),
            ]
        );
        assert!(rules.warnings().is_empty());
    }

    #[test]
    fn test_null_and_non_object_rule_sets() {
        assert!(RuleSet::compile(&Value::Null).is_empty());

        let rules = RuleSet::compile(&json!([1, 2, 3]));
        assert_eq!(rules.filters().len(), 1);
        assert_eq!(rules.warnings()[0].reason, InvalidReason::NotAnObject);
        assert_eq!(rules.to_json(), json!([1, 2, 3]));
    }

    #[test]
    fn test_serialization_keeps_invalid_entries() {
        let stored = r#"{"moods":["calm"],"tags":[5],"year":{"min":1990}}"#;
        let rules: RuleSet = serde_json::from_str(stored).unwrap();
        let written = serde_json::to_value(&rules).unwrap();
        assert_eq!(
            written,
            json!({"moods": ["calm"], "tags": [5], "year": {"min": 1990}})
        );
    }

    #[test]
    fn test_range_bounds_are_inclusive_and_reject_unset_values() {
        let range = NumericRange::new(Some(0.5), Some(0.8));
        assert!(range.contains(Some(0.5)));
        assert!(range.contains(Some(0.8)));
        assert!(!range.contains(Some(0.81)));
        assert!(!range.contains(None));

        let open = NumericRange::default();
        assert!(open.contains(Some(-1.0e9)));
        assert!(!open.contains(None));
    }

    #[test]
    fn test_field_kind_keys_round_trip() {
        for kind in FieldKind::ALL {
            assert_eq!(FieldKind::from_key(kind.key()), Some(kind));
        }
        assert_eq!(FieldKind::from_key("Tags"), None);
    }

    #[test]
    fn test_range_keys_compile_to_their_feature() {
        for key in ["energy", "valence", "danceability", "tempo", "duration", "year"] {
            let filter = FieldFilter::compile(key, &json!({"min": 1}));
            let FieldFilter::Range(feature, range) = filter else {
                panic!("{key} should compile to a range");
            };
            assert_eq!(feature.kind().key(), key);
            assert_eq!(range, NumericRange::new(Some(1.0), None));
        }
    }
}
