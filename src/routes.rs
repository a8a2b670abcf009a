use std::sync::Arc;

use actix_web::{web, HttpResponse};
use futures_util::try_join;
use serde::Serialize;
use tracing::info;

use crate::auth::{Auth, Caller};
use crate::config::AppConfig;
use crate::error::{json_error_handler, path_error_handler, query_error_handler, ApiError, ApiErrorBody};
use crate::models::*;
use crate::repo::Repo;
use crate::submission::{describe_missing, missing_required};
use crate::summary::{summarize, SummaryReport};

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .app_data(web::QueryConfig::default().error_handler(query_error_handler))
            .app_data(web::PathConfig::default().error_handler(path_error_handler))
            .service(
                web::resource("/forms")
                    .route(web::get().to(list_forms))
                    .route(web::post().to(create_form)),
            )
            .service(
                web::resource("/forms/{id}")
                    .route(web::get().to(get_form))
                    .route(web::put().to(update_form))
                    .route(web::delete().to(delete_form)),
            )
            .service(web::resource("/forms/{id}/layout").route(web::get().to(get_form_layout)))
            .service(web::resource("/forms/{id}/sections").route(web::get().to(list_sections)))
            .service(
                web::resource("/forms/{id}/responses")
                    .route(web::get().to(list_responses))
                    .route(web::post().to(submit_response)),
            )
            .service(web::resource("/forms/{id}/summary").route(web::get().to(form_summary)))
            .service(web::resource("/sections/{id}/questions").route(web::get().to(list_section_questions)))
            .service(web::resource("/users/{id}/submitted-forms").route(web::get().to(submitted_forms)))
            .service(web::resource("/auth/me").route(web::get().to(auth_me))),
    );
}

#[derive(Clone)]
pub struct AppState { pub repo: Arc<dyn Repo>, pub config: Arc<AppConfig> }

/// Loads a form and checks the caller may see its responses or change it.
async fn managed_form(data: &AppState, caller: &Caller, id: Id) -> Result<Form, ApiError> {
    let form = data.repo.get_form(id).await?;
    if !caller.can_manage(&form) {
        return Err(ApiError::Forbidden);
    }
    Ok(form)
}

fn require_text(field: &str, value: &str, errors: &mut Vec<String>) {
    if value.trim().is_empty() {
        errors.push(format!("{field} must not be empty"));
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/forms",
    params(("event_id" = Option<Id>, Query, description = "Only forms of this event")),
    responses((status = 200, description = "List forms", body = [Form]))
)]
pub async fn list_forms(data: web::Data<AppState>, query: web::Query<FormListQuery>) -> Result<HttpResponse, ApiError> {
    let forms = data.repo.list_forms(query.event_id).await?;
    Ok(HttpResponse::Ok().json(forms))
}

#[utoipa::path(
    post,
    path = "/api/v1/forms",
    request_body = NewForm,
    responses(
        (status = 201, description = "Form created", body = Form),
        (status = 400, description = "Invalid input", body = ApiErrorBody),
        (status = 401, description = "Authentication required")
    )
)]
pub async fn create_form(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewForm>,
) -> Result<HttpResponse, ApiError> {
    let mut errors = Vec::new();
    require_text("title", &payload.title, &mut errors);
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }
    let form = data.repo.create_form(auth.0.id, payload.into_inner()).await?;
    info!(form_id = form.id, creator_id = form.creator_id, "form created");
    metrics::increment_counter!("forms_created_total");
    Ok(HttpResponse::Created().json(form))
}

#[utoipa::path(
    get,
    path = "/api/v1/forms/{id}",
    params(("id" = Id, Path, description = "Form id")),
    responses(
        (status = 200, description = "Form with its questions", body = FormWithQuestions),
        (status = 404, description = "Form not found")
    )
)]
pub async fn get_form(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let (form, questions) = try_join!(data.repo.get_form(id), data.repo.list_questions(id))?;
    Ok(HttpResponse::Ok().json(FormWithQuestions { form, questions }))
}

#[utoipa::path(
    get,
    path = "/api/v1/forms/{id}/layout",
    params(("id" = Id, Path, description = "Form id")),
    responses(
        (status = 200, description = "Form with sections and nested questions", body = FormLayout),
        (status = 404, description = "Form not found")
    )
)]
pub async fn get_form_layout(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let (form, sections, questions) = try_join!(
        data.repo.get_form(id),
        data.repo.list_sections(id),
        data.repo.list_questions(id)
    )?;
    Ok(HttpResponse::Ok().json(FormLayout::build(form, sections, questions)))
}

#[utoipa::path(
    put,
    path = "/api/v1/forms/{id}",
    request_body = UpdateForm,
    params(("id" = Id, Path, description = "Form id")),
    responses(
        (status = 200, description = "Form updated", body = Form),
        (status = 400, description = "Invalid sections or questions", body = ApiErrorBody),
        (status = 403, description = "Forbidden – creator or admin only"),
        (status = 404, description = "Form not found"),
        (status = 409, description = "Version mismatch")
    )
)]
pub async fn update_form(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateForm>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    managed_form(&data, &auth.0, id).await?;

    let upd = payload.into_inner();
    let mut errors = Vec::new();
    if let Some(title) = &upd.title {
        require_text("title", title, &mut errors);
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }
    let (sections, questions) = (
        upd.sections.as_ref().map(Vec::len),
        upd.questions.as_ref().map(Vec::len),
    );
    let form = data.repo.update_form(id, upd).await?;
    info!(form_id = id, version = form.version, ?sections, ?questions, "form updated");
    metrics::increment_counter!("form_updates_total");
    Ok(HttpResponse::Ok().json(form))
}

#[utoipa::path(
    delete,
    path = "/api/v1/forms/{id}",
    params(("id" = Id, Path, description = "Form id")),
    responses(
        (status = 204, description = "Form deleted"),
        (status = 403, description = "Forbidden – creator or admin only"),
        (status = 404, description = "Form not found")
    )
)]
pub async fn delete_form(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    managed_form(&data, &auth.0, id).await?;
    data.repo.delete_form(id).await?;
    info!(form_id = id, by = auth.0.id, "form deleted");
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/api/v1/forms/{id}/sections",
    params(("id" = Id, Path, description = "Form id")),
    responses(
        (status = 200, description = "Sections in display order", body = [Section]),
        (status = 404, description = "Form not found")
    )
)]
pub async fn list_sections(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let sections = data.repo.list_sections(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(sections))
}

#[utoipa::path(
    get,
    path = "/api/v1/sections/{id}/questions",
    params(("id" = Id, Path, description = "Section id")),
    responses(
        (status = 200, description = "Questions of the section", body = [Question]),
        (status = 404, description = "Section not found")
    )
)]
pub async fn list_section_questions(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let questions = data.repo.list_section_questions(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(questions))
}

#[utoipa::path(
    post,
    path = "/api/v1/forms/{id}/responses",
    request_body = NewResponse,
    params(("id" = Id, Path, description = "Form id")),
    responses(
        (status = 201, description = "Response stored", body = Response),
        (status = 400, description = "Required questions unanswered", body = ApiErrorBody),
        (status = 404, description = "Form not found"),
        (status = 409, description = "Already submitted (one-per-user policy)")
    )
)]
pub async fn submit_response(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewResponse>,
) -> Result<HttpResponse, ApiError> {
    let form_id = path.into_inner();
    let questions = data.repo.list_questions(form_id).await?;
    let answers = payload.into_inner().answers;

    let missing = missing_required(&questions, &answers);
    if !missing.is_empty() {
        return Err(ApiError::Validation(describe_missing(&questions, &missing)));
    }

    let policy = data.config.submission_policy;
    let response = data.repo
        .create_response(form_id, auth.0.id, answers, policy.one_per_user())
        .await?;
    info!(form_id, user_id = auth.0.id, response_id = response.id, "response submitted");
    metrics::increment_counter!("form_responses_submitted_total");
    Ok(HttpResponse::Created().json(response))
}

#[utoipa::path(
    get,
    path = "/api/v1/forms/{id}/responses",
    params(("id" = Id, Path, description = "Form id")),
    responses(
        (status = 200, description = "All responses, newest first", body = [Response]),
        (status = 403, description = "Forbidden – creator or admin only"),
        (status = 404, description = "Form not found")
    )
)]
pub async fn list_responses(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    managed_form(&data, &auth.0, id).await?;
    let responses = data.repo.list_responses(id).await?;
    Ok(HttpResponse::Ok().json(responses))
}

#[utoipa::path(
    get,
    path = "/api/v1/forms/{id}/summary",
    params(("id" = Id, Path, description = "Form id")),
    responses(
        (status = 200, description = "Per-question statistics", body = SummaryReport),
        (status = 403, description = "Forbidden – creator or admin only"),
        (status = 404, description = "Form not found")
    )
)]
pub async fn form_summary(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    managed_form(&data, &auth.0, id).await?;
    let (questions, responses) = try_join!(data.repo.list_questions(id), data.repo.list_responses(id))?;
    let report: SummaryReport = summarize(id, &questions, &responses);
    metrics::increment_counter!("form_summaries_total");
    Ok(HttpResponse::Ok().json(report))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SubmittedForms {
    pub user_id: Id,
    pub form_ids: Vec<Id>,
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/submitted-forms",
    params(("id" = Id, Path, description = "User id")),
    responses(
        (status = 200, description = "Forms the user has responded to", body = SubmittedForms),
        (status = 403, description = "Forbidden – self or admin only")
    )
)]
pub async fn submitted_forms(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let user_id = path.into_inner();
    if auth.0.id != user_id && !auth.0.is_admin() {
        return Err(ApiError::Forbidden);
    }
    let form_ids = data.repo.submitted_form_ids(user_id).await?;
    Ok(HttpResponse::Ok().json(SubmittedForms { user_id, form_ids }))
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current caller", body = Caller),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn auth_me(auth: Auth) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(auth.0))
}
