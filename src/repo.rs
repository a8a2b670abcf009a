use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::models::*;
use crate::reconcile::{self, ReconcileError};

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict: {0}")] Conflict(String),
    #[error("invalid: {0:?}")] Invalid(Vec<String>),
    #[error("internal: {0}")] Internal(String),
}

impl From<ReconcileError> for RepoError {
    fn from(e: ReconcileError) -> Self {
        RepoError::Invalid(e.0)
    }
}

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            other => RepoError::Internal(other.to_string()),
        }
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

pub(crate) fn version_conflict(expected: i64, actual: i64) -> RepoError {
    RepoError::Conflict(format!(
        "form was modified concurrently (expected version {expected}, found {actual})"
    ))
}

pub(crate) fn already_submitted() -> RepoError {
    RepoError::Conflict("you have already submitted a response to this form".into())
}

#[async_trait]
pub trait FormRepo: Send + Sync {
    async fn list_forms(&self, event_id: Option<Id>) -> RepoResult<Vec<Form>>;
    async fn get_form(&self, id: Id) -> RepoResult<Form>;
    async fn create_form(&self, creator_id: Id, new: NewForm) -> RepoResult<Form>;
    /// Basic fields plus wholesale replacement of sections and/or questions,
    /// applied all-or-nothing.
    async fn update_form(&self, id: Id, upd: UpdateForm) -> RepoResult<Form>;
    async fn delete_form(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait SectionRepo: Send + Sync {
    async fn list_sections(&self, form_id: Id) -> RepoResult<Vec<Section>>;
}

#[async_trait]
pub trait QuestionRepo: Send + Sync {
    async fn list_questions(&self, form_id: Id) -> RepoResult<Vec<Question>>;
    async fn list_section_questions(&self, section_id: Id) -> RepoResult<Vec<Question>>;
}

#[async_trait]
pub trait ResponseRepo: Send + Sync {
    async fn create_response(
        &self,
        form_id: Id,
        user_id: Id,
        answers: Answers,
        one_per_user: bool,
    ) -> RepoResult<Response>;
    /// Newest first.
    async fn list_responses(&self, form_id: Id) -> RepoResult<Vec<Response>>;
    async fn submitted_form_ids(&self, user_id: Id) -> RepoResult<Vec<Id>>;
}

pub trait Repo: FormRepo + SectionRepo + QuestionRepo + ResponseRepo {}

impl<T> Repo for T where T: FormRepo + SectionRepo + QuestionRepo + ResponseRepo {}

/// Child writes for one form update.
pub(crate) struct UpdatePlan {
    pub sections: Option<reconcile::ChildPlan<SectionInput>>,
    /// Ids handed to `sections.inserts`, index for index.
    pub new_section_ids: Vec<Id>,
    pub questions: Option<reconcile::ChildPlan<QuestionDraft>>,
}

/// Validates `upd` against the stored children and works out every write the
/// update needs. `alloc` hands out ids for new sections so placeholders can
/// be resolved before anything is written.
pub(crate) fn plan_update(
    upd: &mut UpdateForm,
    existing_sections: &[Id],
    existing_questions: &[Id],
    mut alloc: impl FnMut() -> Id,
) -> RepoResult<UpdatePlan> {
    reconcile::check_inputs(upd.sections.as_deref(), upd.questions.as_deref())?;

    let mut live: HashSet<Id> = existing_sections.iter().copied().collect();
    let mut key_map = HashMap::new();
    let mut new_section_ids = Vec::new();

    let sections = match upd.sections.take() {
        Some(incoming) => {
            let plan = reconcile::plan_children(existing_sections, incoming)?;
            for id in &plan.deletes {
                live.remove(id);
            }
            for s in &plan.inserts {
                let id = alloc();
                live.insert(id);
                new_section_ids.push(id);
                if let Some(key) = &s.client_key {
                    key_map.insert(key.clone(), id);
                }
            }
            for (id, s) in &plan.updates {
                if let Some(key) = &s.client_key {
                    key_map.insert(key.clone(), *id);
                }
            }
            Some(plan)
        }
        None => None,
    };

    let questions = match upd.questions.take() {
        Some(incoming) => {
            let drafts = reconcile::resolve_question_sections(incoming, &key_map, &live)?;
            Some(reconcile::plan_children(existing_questions, drafts)?)
        }
        None => None,
    };

    Ok(UpdatePlan { sections, new_section_ids, questions })
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

    const SNAPSHOT_FILE: &str = "forms.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        forms: HashMap<Id, Form>,
        sections: HashMap<Id, Section>,
        questions: HashMap<Id, Question>,
        responses: HashMap<Id, Response>,
        next_id: Id,
    }

    impl State {
        fn next_id(&mut self) -> Id {
            self.next_id += 1;
            self.next_id
        }

        fn child_ids<T>(map: &HashMap<Id, T>, belongs: impl Fn(&T) -> bool) -> Vec<Id> {
            let mut ids: Vec<Id> = map.iter().filter(|(_, v)| belongs(v)).map(|(id, _)| *id).collect();
            ids.sort_unstable();
            ids
        }
    }

    /// `RwLock`-guarded store. A whole form update happens under one write
    /// guard, so readers never observe a half-applied update.
    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
    }

    impl Default for InMemRepo {
        fn default() -> Self {
            Self::new()
        }
    }

    impl InMemRepo {
        /// Purely in memory.
        pub fn new() -> Self {
            Self { state: Arc::new(RwLock::new(State::default())), snapshot_path: None }
        }

        /// Loads `<dir>/forms.json` if present and rewrites it after every change.
        pub fn with_snapshot_dir(dir: impl AsRef<Path>) -> Self {
            let path = dir.as_ref().join(SNAPSHOT_FILE);
            let state = Self::load_state_from(&path);
            Self { state: Arc::new(RwLock::new(state)), snapshot_path: Some(Arc::new(path)) }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        tracing::info!("Loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse snapshot '{}': {e}. Starting empty.", path.display());
                        State::default()
                    }
                },
                Err(e) => {
                    tracing::info!("No snapshot at '{}': {e}. Starting empty.", path.display());
                    State::default()
                }
            }
        }

        fn persist(&self) {
            let Some(path) = &self.snapshot_path else { return };
            match serde_json::to_vec_pretty(&*self.read()) {
                Ok(bytes) => {
                    if let Some(dir) = path.parent() {
                        let _ = std::fs::create_dir_all(dir);
                    }
                    if let Err(e) = std::fs::write(path.as_path(), bytes) {
                        tracing::error!("Failed to write snapshot '{}': {e}", path.display());
                    }
                }
                Err(e) => tracing::error!("Failed to serialise snapshot: {e}"),
            }
        }

        // A panic while holding the guard leaves plain data behind; keep serving it.
        fn read(&self) -> RwLockReadGuard<'_, State> {
            self.state.read().unwrap_or_else(|e| e.into_inner())
        }

        fn write(&self) -> RwLockWriteGuard<'_, State> {
            self.state.write().unwrap_or_else(|e| e.into_inner())
        }
    }

    #[async_trait]
    impl FormRepo for InMemRepo {
        async fn list_forms(&self, event_id: Option<Id>) -> RepoResult<Vec<Form>> {
            let s = self.read();
            let mut v: Vec<Form> = s.forms
                .values()
                .filter(|f| event_id.map_or(true, |e| f.event_id == e))
                .cloned()
                .collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id))); // newest first
            Ok(v)
        }

        async fn get_form(&self, id: Id) -> RepoResult<Form> {
            self.read().forms.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn create_form(&self, creator_id: Id, new: NewForm) -> RepoResult<Form> {
            let mut s = self.write();
            let id = s.next_id();
            let form = Form {
                id,
                event_id: new.event_id,
                creator_id,
                title: new.title,
                description: new.description,
                banner_image: new.banner_image,
                version: 1,
                created_at: Utc::now(),
            };
            s.forms.insert(id, form.clone());
            drop(s); // release lock before persisting
            self.persist();
            Ok(form)
        }

        async fn update_form(&self, id: Id, mut upd: UpdateForm) -> RepoResult<Form> {
            let mut s = self.write();

            // ── 1. validate everything before touching state ───────────
            let current = s.forms.get(&id).cloned().ok_or(RepoError::NotFound)?;
            if let Some(expected) = upd.expected_version {
                if expected != current.version {
                    return Err(version_conflict(expected, current.version));
                }
            }
            let existing_sections = State::child_ids(&s.sections, |x| x.form_id == id);
            let existing_questions = State::child_ids(&s.questions, |x| x.form_id == id);
            let mut next = s.next_id;
            let plan = plan_update(&mut upd, &existing_sections, &existing_questions, || {
                next += 1;
                next
            })?;
            s.next_id = next;

            // ── 2. sections first, new ids were reserved above ─────────
            if let Some(sections) = plan.sections {
                for sid in &sections.deletes {
                    s.sections.remove(sid);
                }
                for (sid, input) in sections.updates {
                    if let Some(existing) = s.sections.get_mut(&sid) {
                        existing.title = input.title;
                        existing.description = input.description;
                        existing.order_number = input.order_number;
                    }
                }
                for (input, sid) in sections.inserts.into_iter().zip(plan.new_section_ids) {
                    s.sections.insert(sid, Section {
                        id: sid,
                        form_id: id,
                        title: input.title,
                        description: input.description,
                        order_number: input.order_number,
                    });
                }
                if plan.questions.is_none() {
                    for q in s.questions.values_mut().filter(|q| q.form_id == id) {
                        reconcile::detach_deleted_sections(q, &sections.deletes);
                    }
                }
            }

            // ── 3. questions ───────────────────────────────────────────
            if let Some(questions) = plan.questions {
                for qid in &questions.deletes {
                    s.questions.remove(qid);
                }
                let writes: Vec<(Option<Id>, QuestionDraft)> = questions.updates
                    .into_iter()
                    .map(|(qid, d)| (Some(qid), d))
                    .chain(questions.inserts.into_iter().map(|d| (None, d)))
                    .collect();
                for (qid, draft) in writes {
                    let qid = qid.unwrap_or_else(|| s.next_id());
                    s.questions.insert(qid, Question {
                        id: qid,
                        form_id: id,
                        section_id: draft.section_id,
                        text: draft.text,
                        required: draft.required,
                        order_number: draft.order_number,
                        kind: draft.kind,
                    });
                }
            }

            // ── 4. basic fields, only those present ────────────────────
            let form = s.forms.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(title) = upd.title { form.title = title; }
            if let Some(description) = upd.description { form.description = Some(description); }
            if let Some(banner) = upd.banner_image { form.banner_image = Some(banner); }
            if let Some(event_id) = upd.event_id { form.event_id = event_id; }
            form.version += 1;

            let updated = form.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_form(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write();
            s.forms.remove(&id).ok_or(RepoError::NotFound)?;
            s.sections.retain(|_, x| x.form_id != id);
            s.questions.retain(|_, x| x.form_id != id);
            s.responses.retain(|_, x| x.form_id != id);
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl SectionRepo for InMemRepo {
        async fn list_sections(&self, form_id: Id) -> RepoResult<Vec<Section>> {
            let s = self.read();
            if !s.forms.contains_key(&form_id) { return Err(RepoError::NotFound); }
            let mut v: Vec<Section> = s.sections.values().filter(|x| x.form_id == form_id).cloned().collect();
            v.sort_by_key(|x| (x.order_number, x.id));
            Ok(v)
        }
    }

    #[async_trait]
    impl QuestionRepo for InMemRepo {
        async fn list_questions(&self, form_id: Id) -> RepoResult<Vec<Question>> {
            let s = self.read();
            if !s.forms.contains_key(&form_id) { return Err(RepoError::NotFound); }
            let mut v: Vec<Question> = s.questions.values().filter(|q| q.form_id == form_id).cloned().collect();
            v.sort_by_key(|q| (q.order_number, q.id));
            Ok(v)
        }

        async fn list_section_questions(&self, section_id: Id) -> RepoResult<Vec<Question>> {
            let s = self.read();
            if !s.sections.contains_key(&section_id) { return Err(RepoError::NotFound); }
            let mut v: Vec<Question> = s.questions
                .values()
                .filter(|q| q.section_id == Some(section_id))
                .cloned()
                .collect();
            v.sort_by_key(|q| (q.order_number, q.id));
            Ok(v)
        }
    }

    #[async_trait]
    impl ResponseRepo for InMemRepo {
        async fn create_response(
            &self,
            form_id: Id,
            user_id: Id,
            answers: Answers,
            one_per_user: bool,
        ) -> RepoResult<Response> {
            let mut s = self.write();
            if !s.forms.contains_key(&form_id) { return Err(RepoError::NotFound); }
            if one_per_user && s.responses.values().any(|r| r.form_id == form_id && r.user_id == user_id) {
                return Err(already_submitted());
            }
            let id = s.next_id();
            let response = Response { id, form_id, user_id, answers, submitted_at: Utc::now() };
            s.responses.insert(id, response.clone());
            drop(s);
            self.persist();
            Ok(response)
        }

        async fn list_responses(&self, form_id: Id) -> RepoResult<Vec<Response>> {
            let s = self.read();
            if !s.forms.contains_key(&form_id) { return Err(RepoError::NotFound); }
            let mut v: Vec<Response> = s.responses.values().filter(|r| r.form_id == form_id).cloned().collect();
            v.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at).then(b.id.cmp(&a.id)));
            Ok(v)
        }

        async fn submitted_form_ids(&self, user_id: Id) -> RepoResult<Vec<Id>> {
            let s = self.read();
            let mut ids: Vec<Id> = s.responses.values().filter(|r| r.user_id == user_id).map(|r| r.form_id).collect();
            ids.sort_unstable();
            ids.dedup();
            Ok(ids)
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::types::Json;
    use sqlx::{PgConnection, Pool, Postgres};

    const FORM_COLUMNS: &str =
        "id, event_id, creator_id, title, description, banner_image, version, created_at";
    const QUESTION_COLUMNS: &str =
        "id, form_id, section_id, question_text, required, order_number, kind";

    #[derive(sqlx::FromRow)]
    struct QuestionRow {
        id: Id,
        form_id: Id,
        section_id: Option<Id>,
        question_text: String,
        required: bool,
        order_number: i32,
        kind: Json<QuestionKind>,
    }

    impl From<QuestionRow> for Question {
        fn from(r: QuestionRow) -> Self {
            Question {
                id: r.id,
                form_id: r.form_id,
                section_id: r.section_id,
                text: r.question_text,
                required: r.required,
                order_number: r.order_number,
                kind: r.kind.0,
            }
        }
    }

    #[derive(sqlx::FromRow)]
    struct ResponseRow {
        id: Id,
        form_id: Id,
        user_id: Id,
        answers: Json<Answers>,
        submitted_at: chrono::DateTime<chrono::Utc>,
    }

    impl From<ResponseRow> for Response {
        fn from(r: ResponseRow) -> Self {
            Response {
                id: r.id,
                form_id: r.form_id,
                user_id: r.user_id,
                answers: r.answers.0,
                submitted_at: r.submitted_at,
            }
        }
    }

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
            sqlx::migrate!("./migrations").run(&self.pool).await
        }

        async fn form_exists(conn: &mut PgConnection, id: Id) -> RepoResult<bool> {
            let found: Option<(Id,)> = sqlx::query_as("SELECT id FROM forms WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;
            Ok(found.is_some())
        }

        async fn child_ids(conn: &mut PgConnection, table: &str, form_id: Id) -> RepoResult<Vec<Id>> {
            let rows: Vec<(Id,)> = sqlx::query_as(&format!(
                "SELECT id FROM {table} WHERE form_id = $1 ORDER BY id"
            ))
            .bind(form_id)
            .fetch_all(&mut *conn)
            .await?;
            Ok(rows.into_iter().map(|(id,)| id).collect())
        }

        async fn write_question(
            conn: &mut PgConnection,
            form_id: Id,
            id: Option<Id>,
            d: &QuestionDraft,
        ) -> RepoResult<()> {
            let query = match id {
                Some(qid) => sqlx::query(
                    "UPDATE form_questions SET section_id = $3, question_text = $4, question_type = $5, \
                     required = $6, order_number = $7, kind = $8 WHERE id = $1 AND form_id = $2",
                )
                .bind(qid),
                None => sqlx::query(
                    "INSERT INTO form_questions (form_id, section_id, question_text, question_type, required, order_number, kind) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                ),
            };
            query
                .bind(form_id)
                .bind(d.section_id)
                .bind(&d.text)
                .bind(d.kind.type_name())
                .bind(d.required)
                .bind(d.order_number)
                .bind(Json(&d.kind))
                .execute(&mut *conn)
                .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl FormRepo for PgRepo {
        async fn list_forms(&self, event_id: Option<Id>) -> RepoResult<Vec<Form>> {
            let recs = sqlx::query_as::<_, Form>(&format!(
                "SELECT {FORM_COLUMNS} FROM forms WHERE ($1::BIGINT IS NULL OR event_id = $1) \
                 ORDER BY created_at DESC, id DESC"
            ))
            .bind(event_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(recs)
        }

        async fn get_form(&self, id: Id) -> RepoResult<Form> {
            let rec = sqlx::query_as::<_, Form>(&format!("SELECT {FORM_COLUMNS} FROM forms WHERE id = $1"))
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
            Ok(rec)
        }

        async fn create_form(&self, creator_id: Id, new: NewForm) -> RepoResult<Form> {
            let rec = sqlx::query_as::<_, Form>(&format!(
                "INSERT INTO forms (event_id, creator_id, title, description, banner_image) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING {FORM_COLUMNS}"
            ))
            .bind(new.event_id)
            .bind(creator_id)
            .bind(&new.title)
            .bind(&new.description)
            .bind(&new.banner_image)
            .fetch_one(&self.pool)
            .await?;
            Ok(rec)
        }

        async fn update_form(&self, id: Id, mut upd: UpdateForm) -> RepoResult<Form> {
            let mut tx = self.pool.begin().await?;

            // lock the parent row so concurrent updates serialise
            let current = sqlx::query_as::<_, Form>(&format!(
                "SELECT {FORM_COLUMNS} FROM forms WHERE id = $1 FOR UPDATE"
            ))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RepoError::NotFound)?;
            if let Some(expected) = upd.expected_version {
                if expected != current.version {
                    return Err(version_conflict(expected, current.version));
                }
            }

            let existing_sections = Self::child_ids(&mut *tx, "form_sections", id).await?;
            let existing_questions = Self::child_ids(&mut *tx, "form_questions", id).await?;

            // Reserve section ids up front so placeholders resolve before any write.
            let wanted = upd.sections.as_ref().map_or(0, |incoming| {
                incoming.iter().filter(|s| !s.id.is_some_and(|sid| existing_sections.contains(&sid))).count()
            });
            let reserved: Vec<(Id,)> = sqlx::query_as(
                "SELECT nextval(pg_get_serial_sequence('form_sections', 'id')) FROM generate_series(1, $1)",
            )
            .bind(wanted as i64)
            .fetch_all(&mut *tx)
            .await?;
            let mut reserved = reserved.into_iter().map(|(sid,)| sid);
            let plan = plan_update(&mut upd, &existing_sections, &existing_questions, || {
                reserved.next().unwrap_or_default()
            })?;

            if let Some(sections) = &plan.sections {
                if !sections.deletes.is_empty() {
                    sqlx::query("DELETE FROM form_sections WHERE form_id = $1 AND id = ANY($2)")
                        .bind(id)
                        .bind(&sections.deletes)
                        .execute(&mut *tx)
                        .await?;
                }
                for (sid, s) in &sections.updates {
                    sqlx::query(
                        "UPDATE form_sections SET title = $3, description = $4, order_number = $5 \
                         WHERE id = $1 AND form_id = $2",
                    )
                    .bind(sid)
                    .bind(id)
                    .bind(&s.title)
                    .bind(&s.description)
                    .bind(s.order_number)
                    .execute(&mut *tx)
                    .await?;
                }
                for (s, sid) in sections.inserts.iter().zip(&plan.new_section_ids) {
                    sqlx::query(
                        "INSERT INTO form_sections (id, form_id, title, description, order_number) \
                         VALUES ($1, $2, $3, $4, $5)",
                    )
                    .bind(sid)
                    .bind(id)
                    .bind(&s.title)
                    .bind(&s.description)
                    .bind(s.order_number)
                    .execute(&mut *tx)
                    .await?;
                }
                if plan.questions.is_none() && !sections.deletes.is_empty() {
                    // section_id is cleared by the FK; stale jump targets live in `kind`
                    let rows = sqlx::query_as::<_, QuestionRow>(&format!(
                        "SELECT {QUESTION_COLUMNS} FROM form_questions WHERE form_id = $1"
                    ))
                    .bind(id)
                    .fetch_all(&mut *tx)
                    .await?;
                    for row in rows {
                        let mut q = Question::from(row);
                        if reconcile::detach_deleted_sections(&mut q, &sections.deletes) {
                            sqlx::query("UPDATE form_questions SET section_id = $2, kind = $3 WHERE id = $1")
                                .bind(q.id)
                                .bind(q.section_id)
                                .bind(Json(&q.kind))
                                .execute(&mut *tx)
                                .await?;
                        }
                    }
                }
            }

            if let Some(questions) = &plan.questions {
                if !questions.deletes.is_empty() {
                    sqlx::query("DELETE FROM form_questions WHERE form_id = $1 AND id = ANY($2)")
                        .bind(id)
                        .bind(&questions.deletes)
                        .execute(&mut *tx)
                        .await?;
                }
                for (qid, d) in &questions.updates {
                    Self::write_question(&mut *tx, id, Some(*qid), d).await?;
                }
                for d in &questions.inserts {
                    Self::write_question(&mut *tx, id, None, d).await?;
                }
            }

            let rec = sqlx::query_as::<_, Form>(&format!(
                "UPDATE forms SET title = COALESCE($2, title), description = COALESCE($3, description), \
                 banner_image = COALESCE($4, banner_image), event_id = COALESCE($5, event_id), \
                 version = version + 1 WHERE id = $1 RETURNING {FORM_COLUMNS}"
            ))
            .bind(id)
            .bind(upd.title.as_ref())
            .bind(upd.description.as_ref())
            .bind(upd.banner_image.as_ref())
            .bind(upd.event_id)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(rec)
        }

        async fn delete_form(&self, id: Id) -> RepoResult<()> {
            // sections, questions and responses go with it (ON DELETE CASCADE)
            let res = sqlx::query("DELETE FROM forms WHERE id = $1").bind(id).execute(&self.pool).await?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SectionRepo for PgRepo {
        async fn list_sections(&self, form_id: Id) -> RepoResult<Vec<Section>> {
            let mut conn = self.pool.acquire().await?;
            if !Self::form_exists(&mut *conn, form_id).await? { return Err(RepoError::NotFound); }
            let recs = sqlx::query_as::<_, Section>(
                "SELECT id, form_id, title, description, order_number FROM form_sections \
                 WHERE form_id = $1 ORDER BY order_number, id",
            )
            .bind(form_id)
            .fetch_all(&mut *conn)
            .await?;
            Ok(recs)
        }
    }

    #[async_trait]
    impl QuestionRepo for PgRepo {
        async fn list_questions(&self, form_id: Id) -> RepoResult<Vec<Question>> {
            let mut conn = self.pool.acquire().await?;
            if !Self::form_exists(&mut *conn, form_id).await? { return Err(RepoError::NotFound); }
            let rows = sqlx::query_as::<_, QuestionRow>(&format!(
                "SELECT {QUESTION_COLUMNS} FROM form_questions WHERE form_id = $1 ORDER BY order_number, id"
            ))
            .bind(form_id)
            .fetch_all(&mut *conn)
            .await?;
            Ok(rows.into_iter().map(Question::from).collect())
        }

        async fn list_section_questions(&self, section_id: Id) -> RepoResult<Vec<Question>> {
            let mut conn = self.pool.acquire().await?;
            let found: Option<(Id,)> = sqlx::query_as("SELECT id FROM form_sections WHERE id = $1")
                .bind(section_id)
                .fetch_optional(&mut *conn)
                .await?;
            if found.is_none() { return Err(RepoError::NotFound); }
            let rows = sqlx::query_as::<_, QuestionRow>(&format!(
                "SELECT {QUESTION_COLUMNS} FROM form_questions WHERE section_id = $1 ORDER BY order_number, id"
            ))
            .bind(section_id)
            .fetch_all(&mut *conn)
            .await?;
            Ok(rows.into_iter().map(Question::from).collect())
        }
    }

    #[async_trait]
    impl ResponseRepo for PgRepo {
        async fn create_response(
            &self,
            form_id: Id,
            user_id: Id,
            answers: Answers,
            one_per_user: bool,
        ) -> RepoResult<Response> {
            let mut tx = self.pool.begin().await?;
            let locked: Option<(Id,)> = sqlx::query_as("SELECT id FROM forms WHERE id = $1 FOR UPDATE")
                .bind(form_id)
                .fetch_optional(&mut *tx)
                .await?;
            if locked.is_none() { return Err(RepoError::NotFound); }
            if one_per_user {
                let (exists,): (bool,) = sqlx::query_as(
                    "SELECT EXISTS (SELECT 1 FROM form_responses WHERE form_id = $1 AND user_id = $2)",
                )
                .bind(form_id)
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;
                if exists { return Err(already_submitted()); }
            }
            let row = sqlx::query_as::<_, ResponseRow>(
                "INSERT INTO form_responses (form_id, user_id, answers) VALUES ($1, $2, $3) \
                 RETURNING id, form_id, user_id, answers, submitted_at",
            )
            .bind(form_id)
            .bind(user_id)
            .bind(Json(&answers))
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(row.into())
        }

        async fn list_responses(&self, form_id: Id) -> RepoResult<Vec<Response>> {
            let mut conn = self.pool.acquire().await?;
            if !Self::form_exists(&mut *conn, form_id).await? { return Err(RepoError::NotFound); }
            let rows = sqlx::query_as::<_, ResponseRow>(
                "SELECT id, form_id, user_id, answers, submitted_at FROM form_responses \
                 WHERE form_id = $1 ORDER BY submitted_at DESC, id DESC",
            )
            .bind(form_id)
            .fetch_all(&mut *conn)
            .await?;
            Ok(rows.into_iter().map(Response::from).collect())
        }

        async fn submitted_form_ids(&self, user_id: Id) -> RepoResult<Vec<Id>> {
            let rows: Vec<(Id,)> = sqlx::query_as(
                "SELECT DISTINCT form_id FROM form_responses WHERE user_id = $1 ORDER BY form_id",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().map(|(id,)| id).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(id: Option<Id>, key: Option<&str>) -> SectionInput {
        SectionInput {
            id,
            client_key: key.map(str::to_string),
            title: "s".into(),
            description: None,
            order_number: 0,
        }
    }

    #[test]
    fn plan_update_reserves_ids_before_resolving_questions() {
        let mut upd = UpdateForm {
            sections: Some(vec![section(Some(2), None), section(None, Some("new"))]),
            questions: Some(vec![QuestionInput {
                id: None,
                section: Some(SectionRef::Key("new".into())),
                text: "where?".into(),
                required: false,
                order_number: 0,
                kind: QuestionKind::Text,
            }]),
            ..Default::default()
        };
        let mut next = 100;
        let plan = plan_update(&mut upd, &[1, 2, 3], &[], || {
            next += 1;
            next
        })
        .unwrap();
        assert_eq!(plan.new_section_ids, vec![101]);
        assert_eq!(plan.sections.unwrap().deletes, vec![1, 3]);
        assert_eq!(plan.questions.unwrap().inserts[0].section_id, Some(101));
        assert!(upd.sections.is_none() && upd.questions.is_none());
    }

    #[test]
    fn questions_cannot_point_at_deleted_sections() {
        let mut upd = UpdateForm {
            sections: Some(vec![]),
            questions: Some(vec![QuestionInput {
                id: None,
                section: Some(SectionRef::Id(1)),
                text: "q".into(),
                required: false,
                order_number: 0,
                kind: QuestionKind::Rating,
            }]),
            ..Default::default()
        };
        let err = plan_update(&mut upd, &[1], &[], || 0).err().unwrap();
        assert!(matches!(err, RepoError::Invalid(ref errs) if errs.len() == 1));
    }
}
