use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Answers, Id, Question};

/// Whether a user may submit more than one response to the same form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionPolicy {
    #[default]
    AllowMany,
    OnePerUser,
}

impl SubmissionPolicy {
    pub fn one_per_user(self) -> bool {
        matches!(self, SubmissionPolicy::OnePerUser)
    }
}

impl FromStr for SubmissionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "allow_many" | "many" => Ok(SubmissionPolicy::AllowMany),
            "one_per_user" | "once" => Ok(SubmissionPolicy::OnePerUser),
            other => Err(format!("unknown submission policy '{other}'")),
        }
    }
}

impl fmt::Display for SubmissionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionPolicy::AllowMany => f.write_str("allow_many"),
            SubmissionPolicy::OnePerUser => f.write_str("one_per_user"),
        }
    }
}

fn is_answered(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => items.iter().any(is_answered),
        Value::Object(cells) => cells.values().any(is_answered),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// Required questions lacking a usable answer, in display order. Answer shapes
/// are not checked against the question type and unknown keys are allowed.
pub fn missing_required(questions: &[Question], answers: &Answers) -> Vec<Id> {
    let mut required: Vec<&Question> = questions.iter().filter(|q| q.required).collect();
    required.sort_by_key(|q| (q.order_number, q.id));
    required
        .into_iter()
        .filter(|q| !answers.get(&q.id.to_string()).is_some_and(is_answered))
        .map(|q| q.id)
        .collect()
}

/// One message per missing question, for the aggregated validation error.
pub fn describe_missing(questions: &[Question], missing: &[Id]) -> Vec<String> {
    missing
        .iter()
        .map(|id| match questions.iter().find(|q| q.id == *id) {
            Some(q) => format!("question {id} ('{}') requires an answer", q.text),
            None => format!("question {id} requires an answer"),
        })
        .collect()
}
