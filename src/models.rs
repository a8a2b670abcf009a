use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

pub type Id = i64;

/// Answers keyed by question id (decimal string), exactly as submitted.
pub type Answers = Map<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Form {
    pub id: Id,
    pub event_id: Id,
    pub creator_id: Id,
    pub title: String,
    pub description: Option<String>,
    pub banner_image: Option<String>,
    pub version: i64, // bumped on every update, used as an etag
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewForm {
    pub event_id: Id,
    pub title: String,
    pub description: Option<String>,
    pub banner_image: Option<String>,
}

/// Partial update. Basic fields left out keep their stored value; a present
/// `sections` / `questions` array replaces that child set wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateForm {
    pub title: Option<String>,
    pub description: Option<String>,
    pub banner_image: Option<String>,
    pub event_id: Option<Id>,
    pub sections: Option<Vec<SectionInput>>,
    pub questions: Option<Vec<QuestionInput>>,
    /// Rejects the update with 409 when the stored version differs.
    pub expected_version: Option<i64>,
}

impl UpdateForm {
    pub fn touches_basic_fields(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.banner_image.is_some()
            || self.event_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Section {
    pub id: Id,
    pub form_id: Id,
    pub title: String,
    pub description: Option<String>,
    pub order_number: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SectionInput {
    pub id: Option<Id>,
    /// Client-local placeholder other items in the same payload may point at.
    pub client_key: Option<String>,
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub order_number: i32,
}

/// Reference to a section from an update payload: a stored id or the
/// `client_key` of a section submitted alongside.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum SectionRef {
    Id(Id),
    Key(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DropdownVariant {
    #[default]
    Plain,
    WithOther,
    Countries,
}

/// Question type together with the settings only that type carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    Text,
    SingleChoice {
        options: Vec<String>,
        /// Option label -> section the respondent jumps to.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        jumps: BTreeMap<String, SectionRef>,
    },
    MultiChoice {
        options: Vec<String>,
    },
    Dropdown {
        options: Vec<String>,
        #[serde(default)]
        variant: DropdownVariant,
    },
    Rating,
    Likert,
    LikertMatrix {
        rows: Vec<String>,
    },
}

impl QuestionKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            QuestionKind::Text => "text",
            QuestionKind::SingleChoice { .. } => "single_choice",
            QuestionKind::MultiChoice { .. } => "multi_choice",
            QuestionKind::Dropdown { .. } => "dropdown",
            QuestionKind::Rating => "rating",
            QuestionKind::Likert => "likert",
            QuestionKind::LikertMatrix { .. } => "likert_matrix",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Question {
    pub id: Id,
    pub form_id: Id,
    pub section_id: Option<Id>,
    pub text: String,
    pub required: bool,
    pub order_number: i32,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuestionInput {
    pub id: Option<Id>,
    pub section: Option<SectionRef>,
    pub text: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub order_number: i32,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

/// Question row ready to be written: every section reference resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionDraft {
    pub id: Option<Id>,
    pub section_id: Option<Id>,
    pub text: String,
    pub required: bool,
    pub order_number: i32,
    pub kind: QuestionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Response {
    pub id: Id,
    pub form_id: Id,
    pub user_id: Id,
    #[schema(value_type = Object)]
    pub answers: Answers,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewResponse {
    #[schema(value_type = Object)]
    pub answers: Answers,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FormWithQuestions {
    #[serde(flatten)]
    pub form: Form,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SectionWithQuestions {
    /// `None` for the implicit main section holding unsectioned questions.
    pub id: Option<Id>,
    pub title: String,
    pub description: Option<String>,
    pub order_number: Option<i32>,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FormLayout {
    #[serde(flatten)]
    pub form: Form,
    pub sections: Vec<SectionWithQuestions>,
}

pub const MAIN_SECTION_TITLE: &str = "main";

impl FormLayout {
    /// Groups questions under their sections. Unsectioned questions (or ones
    /// pointing at a section that no longer exists) go into a leading main section.
    pub fn build(form: Form, mut sections: Vec<Section>, mut questions: Vec<Question>) -> Self {
        sections.sort_by_key(|s| (s.order_number, s.id));
        questions.sort_by_key(|q| (q.order_number, q.id));

        let mut grouped: Vec<SectionWithQuestions> = sections
            .into_iter()
            .map(|s| SectionWithQuestions {
                id: Some(s.id),
                title: s.title,
                description: s.description,
                order_number: Some(s.order_number),
                questions: Vec::new(),
            })
            .collect();

        let mut main = Vec::new();
        for q in questions {
            match grouped.iter_mut().find(|s| s.id.is_some() && s.id == q.section_id) {
                Some(section) => section.questions.push(q),
                None => main.push(q),
            }
        }
        if !main.is_empty() {
            grouped.insert(
                0,
                SectionWithQuestions {
                    id: None,
                    title: MAIN_SECTION_TITLE.to_string(),
                    description: None,
                    order_number: None,
                    questions: main,
                },
            );
        }
        Self { form, sections: grouped }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FormListQuery {
    pub event_id: Option<Id>,
}
