//! Research state definition and per-field merge rules
//!
//! A `ResearchState` is created once per run and only ever advanced through
//! `apply_update`, which dispatches every entry of a `StateUpdate` on the
//! field's fixed `MergePolicy`:
//!
//! | field            | policy     |
//! |------------------|------------|
//! | `plan`           | Replace    |
//! | `research_notes` | Accumulate |
//! | `report`         | Replace    |
//! | `score`          | Replace    |
//! | `loop_count`     | Replace    |
//!
//! `task` is set at creation and cannot be updated.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ResearchError;

/// Highest score a grade can carry
pub const MAX_SCORE: u8 = 100;

/// How a field combines an incoming value with its current value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// New value overwrites the old one
    Replace,
    /// New entries are appended after the existing ones, in arrival order
    Accumulate,
}

/// Updatable fields of `ResearchState`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Plan,
    ResearchNotes,
    Report,
    Score,
    LoopCount,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Plan,
        Field::ResearchNotes,
        Field::Report,
        Field::Score,
        Field::LoopCount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Plan => "plan",
            Field::ResearchNotes => "research_notes",
            Field::Report => "report",
            Field::Score => "score",
            Field::LoopCount => "loop_count",
        }
    }

    /// The merge policy declared for this field
    pub fn policy(&self) -> MergePolicy {
        match self {
            Field::ResearchNotes => MergePolicy::Accumulate,
            Field::Plan | Field::Report | Field::Score | Field::LoopCount => MergePolicy::Replace,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = ResearchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan" => Ok(Field::Plan),
            "research_notes" => Ok(Field::ResearchNotes),
            "report" => Ok(Field::Report),
            "score" => Ok(Field::Score),
            "loop_count" => Ok(Field::LoopCount),
            "task" => Err(ResearchError::configuration(
                "state field `task` is immutable after creation",
            )),
            other => Err(ResearchError::configuration(format!(
                "unknown state field `{}`",
                other
            ))),
        }
    }
}

/// Value carried by one update entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Lines(Vec<String>),
    Integer(u32),
    Text(String),
}

impl FieldValue {
    fn kind(&self) -> &'static str {
        match self {
            FieldValue::Lines(_) => "list of strings",
            FieldValue::Integer(_) => "integer",
            FieldValue::Text(_) => "string",
        }
    }
}

/// One `(field, value)` pair of a partial update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldUpdate {
    pub field: Field,
    pub value: FieldValue,
}

/// Partial update produced by a stage, applied in entry order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    entries: Vec<FieldUpdate>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the plan
    pub fn plan(self, steps: Vec<String>) -> Self {
        self.push(Field::Plan, FieldValue::Lines(steps))
    }

    /// Append research notes
    pub fn notes(self, notes: Vec<String>) -> Self {
        self.push(Field::ResearchNotes, FieldValue::Lines(notes))
    }

    /// Replace the report
    pub fn report(self, report: impl Into<String>) -> Self {
        self.push(Field::Report, FieldValue::Text(report.into()))
    }

    /// Replace the score
    pub fn score(self, score: u32) -> Self {
        self.push(Field::Score, FieldValue::Integer(score))
    }

    /// Replace the loop counter
    pub fn loop_count(self, count: u32) -> Self {
        self.push(Field::LoopCount, FieldValue::Integer(count))
    }

    fn push(mut self, field: Field, value: FieldValue) -> Self {
        self.entries.push(FieldUpdate { field, value });
        self
    }

    /// Parse an update from a JSON object keyed by field name.
    ///
    /// Every key must name an updatable field and every value must have the
    /// field's shape; anything else is a configuration error.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ResearchError> {
        let object = value.as_object().ok_or_else(|| {
            ResearchError::configuration("state update must be a JSON object")
        })?;

        let mut update = StateUpdate::new();
        for (key, raw) in object {
            let field: Field = key.parse()?;
            let value = match field {
                Field::Plan | Field::ResearchNotes => {
                    let items = raw.as_array().ok_or_else(|| type_mismatch(field, "list of strings"))?;
                    let lines = items
                        .iter()
                        .map(|item| {
                            item.as_str()
                                .map(str::to_string)
                                .ok_or_else(|| type_mismatch(field, "list of strings"))
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    FieldValue::Lines(lines)
                }
                Field::Report => FieldValue::Text(
                    raw.as_str()
                        .ok_or_else(|| type_mismatch(field, "string"))?
                        .to_string(),
                ),
                Field::Score | Field::LoopCount => {
                    let n = raw
                        .as_u64()
                        .and_then(|n| u32::try_from(n).ok())
                        .ok_or_else(|| type_mismatch(field, "non-negative integer"))?;
                    FieldValue::Integer(n)
                }
            };
            update = update.push(field, value);
        }
        Ok(update)
    }

    pub fn entries(&self) -> &[FieldUpdate] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any entry targets `field`
    pub fn touches(&self, field: Field) -> bool {
        self.entries.iter().any(|e| e.field == field)
    }

    /// Last value written to `field`, if any
    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.field == field)
            .map(|e| &e.value)
    }

    /// Drop every entry targeting `field`
    pub fn without(mut self, field: Field) -> Self {
        self.entries.retain(|e| e.field != field);
        self
    }

    /// Total number of notes this update appends
    pub fn appended_notes(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.field == Field::ResearchNotes)
            .map(|e| match &e.value {
                FieldValue::Lines(lines) => lines.len(),
                _ => 0,
            })
            .sum()
    }
}

fn type_mismatch(field: Field, expected: &str) -> ResearchError {
    ResearchError::configuration(format!(
        "state field `{}` expects a {}",
        field, expected
    ))
}

/// Canonical record threaded through one research run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchState {
    /// Original query
    pub task: String,
    /// Current research plan
    pub plan: Vec<String>,
    /// Every note gathered so far, in call order
    pub research_notes: Vec<String>,
    /// Latest written report
    pub report: Option<String>,
    /// Latest grade (0 until the first grade is merged)
    pub score: u8,
    /// Number of research iterations started
    pub loop_count: u32,
    /// Whether a grade has been merged at least once
    #[serde(default)]
    pub graded: bool,
}

impl ResearchState {
    /// Create a fresh state for a task
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            plan: Vec::new(),
            research_notes: Vec::new(),
            report: None,
            score: 0,
            loop_count: 0,
            graded: false,
        }
    }

    /// Latest grade, once one exists
    pub fn grade(&self) -> Option<u8> {
        self.graded.then_some(self.score)
    }

    /// Apply a partial update and return the next state.
    ///
    /// The current state is left untouched; on error nothing is merged.
    pub fn apply_update(&self, update: &StateUpdate) -> Result<Self, ResearchError> {
        let mut next = self.clone();
        for entry in update.entries() {
            match entry.field.policy() {
                MergePolicy::Replace => next.replace(entry.field, &entry.value)?,
                MergePolicy::Accumulate => next.accumulate(entry.field, &entry.value)?,
            }
        }
        Ok(next)
    }

    fn replace(&mut self, field: Field, value: &FieldValue) -> Result<(), ResearchError> {
        match (field, value) {
            (Field::Plan, FieldValue::Lines(steps)) => self.plan = steps.clone(),
            (Field::Report, FieldValue::Text(report)) => self.report = Some(report.clone()),
            (Field::Score, FieldValue::Integer(score)) => {
                self.score = u8::try_from(*score)
                    .ok()
                    .filter(|s| *s <= MAX_SCORE)
                    .ok_or_else(|| {
                        ResearchError::configuration(format!(
                            "score {} outside 0..={}",
                            score, MAX_SCORE
                        ))
                    })?;
                self.graded = true;
            }
            (Field::LoopCount, FieldValue::Integer(count)) => {
                if *count < self.loop_count {
                    return Err(ResearchError::configuration(format!(
                        "loop_count cannot decrease ({} -> {})",
                        self.loop_count, count
                    )));
                }
                self.loop_count = *count;
            }
            (field, value) => {
                return Err(ResearchError::configuration(format!(
                    "cannot replace `{}` with a {}",
                    field,
                    value.kind()
                )))
            }
        }
        Ok(())
    }

    fn accumulate(&mut self, field: Field, value: &FieldValue) -> Result<(), ResearchError> {
        match (field, value) {
            (Field::ResearchNotes, FieldValue::Lines(notes)) => {
                self.research_notes.extend(notes.iter().cloned());
                Ok(())
            }
            (field, value) => Err(ResearchError::configuration(format!(
                "cannot append a {} to `{}`",
                value.kind(),
                field
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_state() {
        let state = ResearchState::new("AAPL outlook");
        assert_eq!(state.task, "AAPL outlook");
        assert!(state.plan.is_empty());
        assert!(state.research_notes.is_empty());
        assert!(state.report.is_none());
        assert_eq!(state.score, 0);
        assert_eq!(state.loop_count, 0);
        assert_eq!(state.grade(), None);
    }

    #[test]
    fn test_field_policies() {
        assert_eq!(Field::ResearchNotes.policy(), MergePolicy::Accumulate);
        for field in Field::ALL.iter().filter(|f| **f != Field::ResearchNotes) {
            assert_eq!(field.policy(), MergePolicy::Replace, "{}", field);
        }
    }

    #[test]
    fn test_field_parse() {
        for field in Field::ALL {
            assert_eq!(field.as_str().parse::<Field>().unwrap(), field);
        }
        assert!(matches!(
            "bogus".parse::<Field>(),
            Err(ResearchError::Configuration(_))
        ));
        assert!(matches!(
            "task".parse::<Field>(),
            Err(ResearchError::Configuration(_))
        ));
    }

    #[test]
    fn test_apply_update_replace_and_accumulate() {
        let state = ResearchState::new("X");
        let update = StateUpdate::new()
            .plan(vec!["Check filings".into(), "Search news".into()])
            .notes(vec!["note1".into()])
            .report("draft")
            .score(72)
            .loop_count(1);

        let next = state.apply_update(&update).unwrap();
        assert_eq!(next.plan, vec!["Check filings", "Search news"]);
        assert_eq!(next.research_notes, vec!["note1"]);
        assert_eq!(next.report.as_deref(), Some("draft"));
        assert_eq!(next.grade(), Some(72));
        assert_eq!(next.loop_count, 1);

        // Original is untouched
        assert!(state.research_notes.is_empty());
    }

    #[test]
    fn test_replace_is_idempotent() {
        let update = StateUpdate::new().score(64);
        let once = ResearchState::new("X").apply_update(&update).unwrap();
        let twice = once.apply_update(&update).unwrap();
        assert_eq!(once.score, 64);
        assert_eq!(twice.score, 64);
    }

    #[test]
    fn test_accumulate_concatenates_each_apply() {
        let update = StateUpdate::new().notes(vec!["note1".into()]);
        let once = ResearchState::new("X").apply_update(&update).unwrap();
        let twice = once.apply_update(&update).unwrap();
        assert_eq!(twice.research_notes, vec!["note1", "note1"]);
    }

    #[test]
    fn test_plan_replaced_wholesale() {
        let state = ResearchState::new("X")
            .apply_update(&StateUpdate::new().plan(vec!["a".into(), "b".into()]))
            .unwrap();
        let state = state
            .apply_update(&StateUpdate::new().plan(vec!["c".into()]))
            .unwrap();
        assert_eq!(state.plan, vec!["c"]);
    }

    #[test]
    fn test_notes_accumulate_in_entry_order() {
        let update = StateUpdate::new()
            .notes(vec!["a".into(), "b".into()])
            .notes(vec!["c".into()]);
        let state = ResearchState::new("X").apply_update(&update).unwrap();
        assert_eq!(state.research_notes, vec!["a", "b", "c"]);
        assert_eq!(update.appended_notes(), 3);
    }

    #[test]
    fn test_score_out_of_range_rejected() {
        let state = ResearchState::new("X");
        let err = state.apply_update(&StateUpdate::new().score(101)).unwrap_err();
        assert!(matches!(err, ResearchError::Configuration(_)));
    }

    #[test]
    fn test_loop_count_cannot_decrease() {
        let state = ResearchState::new("X")
            .apply_update(&StateUpdate::new().loop_count(2))
            .unwrap();
        assert!(state
            .apply_update(&StateUpdate::new().loop_count(1))
            .is_err());
        assert_eq!(
            state
                .apply_update(&StateUpdate::new().loop_count(3))
                .unwrap()
                .loop_count,
            3
        );
    }

    #[test]
    fn test_failed_update_merges_nothing() {
        let state = ResearchState::new("X");
        let update = StateUpdate::new().notes(vec!["kept?".into()]).score(500);
        assert!(state.apply_update(&update).is_err());
        assert!(state.research_notes.is_empty());
    }

    #[test]
    fn test_from_json() {
        let update = StateUpdate::from_json(&json!({
            "research_notes": ["revenue up 12%"],
            "score": 80
        }))
        .unwrap();
        let state = ResearchState::new("X").apply_update(&update).unwrap();
        assert_eq!(state.research_notes, vec!["revenue up 12%"]);
        assert_eq!(state.score, 80);
    }

    #[test]
    fn test_from_json_unknown_field_fails_fast() {
        let err = StateUpdate::from_json(&json!({"sentiment": "bullish"})).unwrap_err();
        assert!(err.to_string().contains("unknown state field `sentiment`"));

        let err = StateUpdate::from_json(&json!({"task": "other"})).unwrap_err();
        assert!(err.to_string().contains("immutable"));
    }

    #[test]
    fn test_from_json_type_mismatch() {
        assert!(StateUpdate::from_json(&json!({"score": "high"})).is_err());
        assert!(StateUpdate::from_json(&json!({"plan": "one step"})).is_err());
        assert!(StateUpdate::from_json(&json!({"research_notes": [1, 2]})).is_err());
        assert!(StateUpdate::from_json(&json!(["not", "an", "object"])).is_err());
    }

    #[test]
    fn test_update_helpers() {
        let update = StateUpdate::new().notes(vec!["n".into()]).loop_count(4);
        assert!(update.touches(Field::LoopCount));
        assert_eq!(update.get(Field::LoopCount), Some(&FieldValue::Integer(4)));

        let stripped = update.without(Field::LoopCount);
        assert!(!stripped.touches(Field::LoopCount));
        assert_eq!(stripped.entries().len(), 1);
    }

    #[test]
    fn test_state_serialization() {
        let state = ResearchState::new("X")
            .apply_update(&StateUpdate::new().score(90))
            .unwrap();
        let json = serde_json::to_string(&state).unwrap();
        let restored: ResearchState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);
    }
}
