//! Per-question statistics folded over every response to a form.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::models::{Id, Question, QuestionKind, Response};

/// Free-text answers kept per question.
pub const SAMPLE_LIMIT: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SummaryReport {
    pub form_id: Id,
    pub total_submissions: usize,
    pub questions: Vec<QuestionSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QuestionSummary {
    pub question_id: Id,
    pub question_text: String,
    pub total_responses: u64,
    #[serde(flatten)]
    pub stats: QuestionStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionStats {
    SingleChoice { option_counts: BTreeMap<String, u64> },
    MultiChoice { option_counts: BTreeMap<String, u64> },
    Dropdown { option_counts: BTreeMap<String, u64> },
    Rating { average: f64 },
    Likert { average: f64 },
    LikertMatrix { averages: BTreeMap<String, f64> },
    Text { sample_responses: Vec<String> },
}

#[derive(Debug, Default, Clone, Copy)]
struct Mean {
    // wide enough that any number of i64 answers cannot overflow
    sum: i128,
    count: u64,
}

impl Mean {
    fn add(&mut self, v: i64) {
        self.sum += i128::from(v);
        self.count += 1;
    }

    fn value(self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum as f64 / self.count as f64
        }
    }
}

/// Builds the report. Questions come out by ascending `order_number` (ties by
/// id); `responses` are folded in the order given, which only matters for
/// which free-text answers get sampled.
pub fn summarize(form_id: Id, questions: &[Question], responses: &[Response]) -> SummaryReport {
    let mut ordered: Vec<&Question> = questions.iter().collect();
    ordered.sort_by_key(|q| (q.order_number, q.id));

    let questions = ordered
        .into_iter()
        .map(|q| summarize_question(q, responses))
        .collect();

    SummaryReport { form_id, total_submissions: responses.len(), questions }
}

fn summarize_question(question: &Question, responses: &[Response]) -> QuestionSummary {
    let key = question.id.to_string();
    let answers = responses.iter().filter_map(|r| r.answers.get(&key));

    let (total_responses, stats) = match &question.kind {
        QuestionKind::SingleChoice { options, .. } => {
            let (n, counts) = tally(options, answers);
            (n, QuestionStats::SingleChoice { option_counts: counts })
        }
        QuestionKind::MultiChoice { options } => {
            let (n, counts) = tally(options, answers);
            (n, QuestionStats::MultiChoice { option_counts: counts })
        }
        QuestionKind::Dropdown { options, .. } => {
            let (n, counts) = tally(options, answers);
            (n, QuestionStats::Dropdown { option_counts: counts })
        }
        QuestionKind::Rating => {
            let mean = numeric_mean(answers);
            (mean.count, QuestionStats::Rating { average: mean.value() })
        }
        QuestionKind::Likert => {
            let mean = numeric_mean(answers);
            (mean.count, QuestionStats::Likert { average: mean.value() })
        }
        QuestionKind::LikertMatrix { rows } => {
            let (n, averages) = matrix_means(rows, answers);
            (n, QuestionStats::LikertMatrix { averages })
        }
        QuestionKind::Text => {
            let (n, sample_responses) = sample_text(answers);
            (n, QuestionStats::Text { sample_responses })
        }
    };

    QuestionSummary {
        question_id: question.id,
        question_text: question.text.clone(),
        total_responses,
        stats,
    }
}

/// Literal label for a scalar answer; `None` for blanks and nested values.
fn scalar_label(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Every declared option starts at zero; answers outside the declared set
/// are counted under their literal value (write-in "other" answers). Any
/// non-null answer counts as a response, even one with no usable label.
fn tally<'a>(
    options: &[String],
    answers: impl Iterator<Item = &'a Value>,
) -> (u64, BTreeMap<String, u64>) {
    let mut counts: BTreeMap<String, u64> = options.iter().map(|o| (o.clone(), 0)).collect();
    let mut answered = 0;
    for answer in answers.filter(|v| !v.is_null()) {
        answered += 1;
        let labels: Vec<String> = match answer {
            Value::Array(items) => items.iter().filter_map(scalar_label).collect(),
            other => scalar_label(other).into_iter().collect(),
        };
        for label in labels {
            *counts.entry(label).or_insert(0) += 1;
        }
    }
    (answered, counts)
}

fn parse_int(v: &Value) -> Option<i64> {
    match v {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

fn numeric_mean<'a>(answers: impl Iterator<Item = &'a Value>) -> Mean {
    let mut mean = Mean::default();
    for v in answers.filter_map(parse_int) {
        mean.add(v);
    }
    mean
}

/// Averages per declared row. Rows the question no longer declares are ignored.
fn matrix_means<'a>(
    rows: &[String],
    answers: impl Iterator<Item = &'a Value>,
) -> (u64, BTreeMap<String, f64>) {
    let mut means: BTreeMap<&str, Mean> = rows.iter().map(|r| (r.as_str(), Mean::default())).collect();
    let mut answered = 0;
    for answer in answers {
        let Value::Object(cells) = answer else { continue };
        let mut counted = false;
        for (row, cell) in cells {
            if let (Some(mean), Some(v)) = (means.get_mut(row.as_str()), parse_int(cell)) {
                mean.add(v);
                counted = true;
            }
        }
        if counted {
            answered += 1;
        }
    }
    let averages = means.into_iter().map(|(row, m)| (row.to_string(), m.value())).collect();
    (answered, averages)
}

fn sample_text<'a>(answers: impl Iterator<Item = &'a Value>) -> (u64, Vec<String>) {
    let mut samples = Vec::new();
    let mut answered = 0;
    for text in answers.filter_map(scalar_label) {
        answered += 1;
        if samples.len() < SAMPLE_LIMIT {
            samples.push(text);
        }
    }
    (answered, samples)
}
