use crate::auth::{Caller, Role};
use crate::error::ApiErrorBody;
use crate::models::{
    DropdownVariant, Form, FormLayout, FormWithQuestions, NewForm, NewResponse, Question, QuestionInput,
    QuestionKind, Response, Section, SectionInput, SectionRef, SectionWithQuestions, UpdateForm,
};
use crate::routes::SubmittedForms;
use crate::summary::{QuestionStats, QuestionSummary, SummaryReport};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_forms,
        crate::routes::create_form,
        crate::routes::get_form,
        crate::routes::get_form_layout,
        crate::routes::update_form,
        crate::routes::delete_form,
        crate::routes::list_sections,
        crate::routes::list_section_questions,
        crate::routes::submit_response,
        crate::routes::list_responses,
        crate::routes::form_summary,
        crate::routes::submitted_forms,
        crate::routes::auth_me,
    ),
    components(schemas(
        Form, NewForm, UpdateForm, FormWithQuestions, FormLayout, SectionWithQuestions,
        Section, SectionInput, SectionRef, Question, QuestionInput, QuestionKind, DropdownVariant,
        Response, NewResponse, SummaryReport, QuestionSummary, QuestionStats,
        SubmittedForms, Caller, Role, ApiErrorBody
    )),
    tags(
        (name = "forms", description = "Form definitions, sections and questions"),
        (name = "responses", description = "Submissions and summary statistics"),
    )
)]
pub struct ApiDoc;
