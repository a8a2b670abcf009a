//! Planning for the "replace children" form update.
//!
//! Incoming child arrays are diffed against the ids already stored for the
//! form: matching ids become updates, everything else an insert, and stored
//! ids missing from the payload are deleted. Sections are applied first so
//! questions can be re-pointed from client placeholders to real ids.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::models::{Id, Question, QuestionDraft, QuestionInput, QuestionKind, SectionInput, SectionRef};

/// Anything carrying an optional stored id.
pub trait ChildItem {
    fn child_id(&self) -> Option<Id>;
}

impl ChildItem for SectionInput {
    fn child_id(&self) -> Option<Id> {
        self.id
    }
}

impl ChildItem for QuestionDraft {
    fn child_id(&self) -> Option<Id> {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChildPlan<T> {
    pub updates: Vec<(Id, T)>,
    pub inserts: Vec<T>,
    pub deletes: Vec<Id>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("invalid form update")]
pub struct ReconcileError(pub Vec<String>);

pub fn plan_children<T: ChildItem>(
    existing: &[Id],
    incoming: Vec<T>,
) -> Result<ChildPlan<T>, ReconcileError> {
    let stored: HashSet<Id> = existing.iter().copied().collect();
    let mut seen = HashSet::new();
    let mut errors = Vec::new();
    let mut updates = Vec::new();
    let mut inserts = Vec::new();

    for item in incoming {
        match item.child_id() {
            Some(id) if !seen.insert(id) => errors.push(format!("id {id} appears more than once")),
            Some(id) if stored.contains(&id) => updates.push((id, item)),
            _ => inserts.push(item),
        }
    }
    if !errors.is_empty() {
        return Err(ReconcileError(errors));
    }

    // keep the caller's order for deletes, deduplicated
    let mut deletes = Vec::new();
    let mut dropped = BTreeSet::new();
    for id in existing {
        if !seen.contains(id) && dropped.insert(*id) {
            deletes.push(*id);
        }
    }
    Ok(ChildPlan { updates, inserts, deletes })
}

/// Shape checks on a replacement payload that serde cannot express.
pub fn check_inputs(
    sections: Option<&[SectionInput]>,
    questions: Option<&[QuestionInput]>,
) -> Result<(), ReconcileError> {
    let mut errors = Vec::new();
    let mut keys = HashSet::new();
    for s in sections.unwrap_or_default() {
        if s.title.trim().is_empty() {
            errors.push("section title must not be empty".to_string());
        }
        if let Some(key) = &s.client_key {
            if !keys.insert(key.as_str()) {
                errors.push(format!("section placeholder '{key}' is used twice"));
            }
        }
    }
    for q in questions.unwrap_or_default() {
        if q.text.trim().is_empty() {
            errors.push("question text must not be empty".to_string());
            continue;
        }
        let ctx = format!("question '{}'", q.text);
        match &q.kind {
            QuestionKind::SingleChoice { options, .. }
            | QuestionKind::MultiChoice { options }
            | QuestionKind::Dropdown { options, .. } => {
                if options.is_empty() {
                    errors.push(format!("{ctx}: at least one option is required"));
                }
                let distinct: HashSet<&String> = options.iter().collect();
                if distinct.len() != options.len() {
                    errors.push(format!("{ctx}: options must be unique"));
                }
            }
            QuestionKind::LikertMatrix { rows } => {
                if rows.is_empty() {
                    errors.push(format!("{ctx}: at least one row is required"));
                }
                let distinct: HashSet<&String> = rows.iter().collect();
                if distinct.len() != rows.len() {
                    errors.push(format!("{ctx}: rows must be unique"));
                }
            }
            QuestionKind::Text | QuestionKind::Rating | QuestionKind::Likert => {}
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ReconcileError(errors))
    }
}

/// Resolves every section reference in `questions` against the sections that
/// will exist once the section step has run.
///
/// `key_map` maps `client_key` placeholders to the ids assigned on insert;
/// `live_sections` is the full set of section ids belonging to the form.
pub fn resolve_question_sections(
    questions: Vec<QuestionInput>,
    key_map: &HashMap<String, Id>,
    live_sections: &HashSet<Id>,
) -> Result<Vec<QuestionDraft>, ReconcileError> {
    let mut errors = Vec::new();
    let resolve = |r: &SectionRef, errors: &mut Vec<String>, ctx: &str| -> Option<Id> {
        match r {
            SectionRef::Id(id) if live_sections.contains(id) => Some(*id),
            SectionRef::Id(id) => {
                errors.push(format!("{ctx}: section {id} is not part of this form"));
                None
            }
            SectionRef::Key(key) => match key_map.get(key) {
                Some(id) => Some(*id),
                None => {
                    errors.push(format!("{ctx}: unknown section placeholder '{key}'"));
                    None
                }
            },
        }
    };

    let mut drafts = Vec::with_capacity(questions.len());
    for q in questions {
        let ctx = format!("question '{}'", q.text);
        let section_id = q.section.as_ref().and_then(|r| resolve(r, &mut errors, &ctx));
        let kind = match q.kind {
            QuestionKind::SingleChoice { options, jumps } => {
                let mut resolved = jumps.clone();
                for (option, target) in &jumps {
                    if !options.contains(option) {
                        errors.push(format!("{ctx}: jump for undeclared option '{option}'"));
                        continue;
                    }
                    if let Some(id) = resolve(target, &mut errors, &ctx) {
                        resolved.insert(option.clone(), SectionRef::Id(id));
                    }
                }
                QuestionKind::SingleChoice { options, jumps: resolved }
            }
            other => other,
        };
        drafts.push(QuestionDraft {
            id: q.id,
            section_id,
            text: q.text,
            required: q.required,
            order_number: q.order_number,
            kind,
        });
    }

    if errors.is_empty() {
        Ok(drafts)
    } else {
        Err(ReconcileError(errors))
    }
}

/// Clears references to sections removed by the section step from a stored
/// question that is not itself being rewritten. Returns whether it changed.
pub fn detach_deleted_sections(question: &mut Question, deleted: &[Id]) -> bool {
    let mut changed = false;
    if question.section_id.is_some_and(|id| deleted.contains(&id)) {
        question.section_id = None;
        changed = true;
    }
    if let QuestionKind::SingleChoice { jumps, .. } = &mut question.kind {
        let before = jumps.len();
        jumps.retain(|_, target| !matches!(target, SectionRef::Id(id) if deleted.contains(id)));
        changed |= jumps.len() != before;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn section(id: Option<Id>, title: &str) -> SectionInput {
        SectionInput {
            id,
            client_key: None,
            title: title.into(),
            description: None,
            order_number: 0,
        }
    }

    fn question(section: Option<SectionRef>, kind: QuestionKind) -> QuestionInput {
        QuestionInput {
            id: None,
            section,
            text: "q".into(),
            required: false,
            order_number: 0,
            kind,
        }
    }

    #[test]
    fn sections_are_updated_inserted_and_deleted() {
        let plan = plan_children(
            &[1, 2, 3],
            vec![section(Some(2), "kept"), section(None, "new")],
        )
        .unwrap();
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].0, 2);
        assert_eq!(plan.updates[0].1.title, "kept");
        assert_eq!(plan.inserts.len(), 1);
        assert_eq!(plan.inserts[0].title, "new");
        assert_eq!(plan.deletes, vec![1, 3]);
    }

    #[test]
    fn unknown_id_is_treated_as_insert() {
        let plan = plan_children(&[1], vec![section(Some(42), "foreign")]).unwrap();
        assert!(plan.updates.is_empty());
        assert_eq!(plan.inserts.len(), 1);
        assert_eq!(plan.deletes, vec![1]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = plan_children(&[1], vec![section(Some(1), "a"), section(Some(1), "b")]).unwrap_err();
        assert_eq!(err.0.len(), 1);
    }

    #[test]
    fn empty_payload_deletes_everything() {
        let plan = plan_children::<SectionInput>(&[4, 5], vec![]).unwrap();
        assert_eq!(plan.deletes, vec![4, 5]);
    }

    #[test]
    fn placeholders_are_repointed_to_new_ids() {
        let key_map = HashMap::from([("fresh".to_string(), 77)]);
        let live = HashSet::from([5, 77]);
        let mut jumps = BTreeMap::new();
        jumps.insert("Yes".to_string(), SectionRef::Key("fresh".into()));
        jumps.insert("No".to_string(), SectionRef::Id(5));
        let drafts = resolve_question_sections(
            vec![
                question(Some(SectionRef::Key("fresh".into())), QuestionKind::Text),
                question(
                    None,
                    QuestionKind::SingleChoice { options: vec!["Yes".into(), "No".into()], jumps },
                ),
            ],
            &key_map,
            &live,
        )
        .unwrap();
        assert_eq!(drafts[0].section_id, Some(77));
        assert_eq!(drafts[1].section_id, None);
        match &drafts[1].kind {
            QuestionKind::SingleChoice { jumps, .. } => {
                assert_eq!(jumps["Yes"], SectionRef::Id(77));
                assert_eq!(jumps["No"], SectionRef::Id(5));
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn bad_references_are_reported_together() {
        let mut jumps = BTreeMap::new();
        jumps.insert("Maybe".to_string(), SectionRef::Id(1));
        let err = resolve_question_sections(
            vec![
                question(Some(SectionRef::Key("missing".into())), QuestionKind::Rating),
                question(Some(SectionRef::Id(9)), QuestionKind::Likert),
                question(None, QuestionKind::SingleChoice { options: vec!["Yes".into()], jumps }),
            ],
            &HashMap::new(),
            &HashSet::from([1]),
        )
        .unwrap_err();
        assert_eq!(err.0.len(), 3);
    }

    #[test]
    fn deleted_sections_detach_stored_questions() {
        let mut jumps = BTreeMap::new();
        jumps.insert("Yes".to_string(), SectionRef::Id(3));
        jumps.insert("No".to_string(), SectionRef::Id(4));
        let mut q = Question {
            id: 1,
            form_id: 1,
            section_id: Some(3),
            text: "go on?".into(),
            required: true,
            order_number: 0,
            kind: QuestionKind::SingleChoice { options: vec!["Yes".into(), "No".into()], jumps },
        };
        assert!(detach_deleted_sections(&mut q, &[3]));
        assert_eq!(q.section_id, None);
        match &q.kind {
            QuestionKind::SingleChoice { jumps, .. } => {
                assert_eq!(jumps.len(), 1);
                assert_eq!(jumps["No"], SectionRef::Id(4));
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert!(!detach_deleted_sections(&mut q, &[3]));
    }

    #[test]
    fn malformed_questions_are_rejected() {
        let sections = vec![section(None, " ")];
        let questions = vec![
            question(None, QuestionKind::MultiChoice { options: vec![] }),
            question(None, QuestionKind::Dropdown { options: vec!["a".into(), "a".into()], variant: Default::default() }),
            question(None, QuestionKind::LikertMatrix { rows: vec![] }),
            question(None, QuestionKind::Rating),
        ];
        let err = check_inputs(Some(&sections), Some(&questions)).unwrap_err();
        assert_eq!(err.0.len(), 4);
        assert!(check_inputs(None, None).is_ok());
    }
}
