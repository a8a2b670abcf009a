#![cfg(feature = "inmem-store")]

use eventforms::{
    models::{NewForm, QuestionInput, QuestionKind, SectionInput, SectionRef, UpdateForm},
    repo::{inmem::InMemRepo, FormRepo, QuestionRepo, RepoError, ResponseRepo, SectionRepo},
};
use serde_json::json;

fn new_form(event_id: i64) -> NewForm {
    NewForm { event_id, title: "Feedback".into(), description: None, banner_image: None }
}

fn section(id: Option<i64>, key: Option<&str>, title: &str, order_number: i32) -> SectionInput {
    SectionInput {
        id,
        client_key: key.map(str::to_string),
        title: title.into(),
        description: None,
        order_number,
    }
}

fn question(id: Option<i64>, section: Option<SectionRef>, text: &str, kind: QuestionKind) -> QuestionInput {
    QuestionInput { id, section, text: text.into(), required: false, order_number: 0, kind }
}

fn answers(v: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    v.as_object().cloned().unwrap()
}

#[tokio::test]
async fn form_crud_and_event_filter() {
    let r = InMemRepo::new();

    // starts empty
    assert!(r.list_forms(None).await.unwrap().is_empty());

    let a = r.create_form(1, new_form(10)).await.unwrap();
    let b = r.create_form(1, new_form(20)).await.unwrap();
    assert_eq!(a.version, 1);
    assert_eq!(a.creator_id, 1);

    assert_eq!(r.list_forms(None).await.unwrap().len(), 2);
    let only_b = r.list_forms(Some(20)).await.unwrap();
    assert_eq!(only_b.len(), 1);
    assert_eq!(only_b[0].id, b.id);

    // partial update leaves other fields alone
    let updated = r
        .update_form(a.id, UpdateForm { description: Some("About the event".into()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(updated.title, "Feedback");
    assert_eq!(updated.event_id, 10);
    assert_eq!(updated.description.as_deref(), Some("About the event"));
    assert_eq!(updated.version, 2);

    r.delete_form(a.id).await.unwrap();
    assert!(matches!(r.get_form(a.id).await.unwrap_err(), RepoError::NotFound));
    assert!(matches!(r.delete_form(a.id).await.unwrap_err(), RepoError::NotFound));
}

#[tokio::test]
async fn sections_reconcile_to_exact_set() {
    let r = InMemRepo::new();
    let form = r.create_form(1, new_form(1)).await.unwrap();

    r.update_form(form.id, UpdateForm {
        sections: Some(vec![
            section(None, None, "one", 1),
            section(None, None, "two", 2),
            section(None, None, "three", 3),
        ]),
        ..Default::default()
    })
    .await
    .unwrap();
    let existing = r.list_sections(form.id).await.unwrap();
    assert_eq!(existing.len(), 3);
    let second = existing[1].id;

    r.update_form(form.id, UpdateForm {
        sections: Some(vec![section(Some(second), None, "two (renamed)", 2), section(None, None, "new", 9)]),
        ..Default::default()
    })
    .await
    .unwrap();
    let after = r.list_sections(form.id).await.unwrap();
    let titles: Vec<_> = after.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, vec!["two (renamed)", "new"]);
    assert_eq!(after[0].id, second);
    assert!(after.iter().all(|s| s.id != existing[0].id && s.id != existing[2].id));
}

#[tokio::test]
async fn new_section_placeholders_are_resolved_for_questions() {
    let r = InMemRepo::new();
    let form = r.create_form(1, new_form(1)).await.unwrap();

    let mut jumps = std::collections::BTreeMap::new();
    jumps.insert("Yes".to_string(), SectionRef::Key("details".into()));
    r.update_form(form.id, UpdateForm {
        sections: Some(vec![section(None, Some("details"), "Details", 1)]),
        questions: Some(vec![
            question(None, None, "Attending?", QuestionKind::SingleChoice {
                options: vec!["Yes".into(), "No".into()],
                jumps,
            }),
            question(None, Some(SectionRef::Key("details".into())), "Dietary needs", QuestionKind::Text),
        ]),
        ..Default::default()
    })
    .await
    .unwrap();

    let sections = r.list_sections(form.id).await.unwrap();
    let details = sections[0].id;
    let in_section = r.list_section_questions(details).await.unwrap();
    assert_eq!(in_section.len(), 1);
    assert_eq!(in_section[0].text, "Dietary needs");

    let all = r.list_questions(form.id).await.unwrap();
    let attending = all.iter().find(|q| q.text == "Attending?").unwrap();
    match &attending.kind {
        QuestionKind::SingleChoice { jumps, .. } => assert_eq!(jumps["Yes"], SectionRef::Id(details)),
        other => panic!("unexpected kind {other:?}"),
    }
}

#[tokio::test]
async fn failed_update_changes_nothing() {
    let r = InMemRepo::new();
    let form = r.create_form(1, new_form(1)).await.unwrap();
    r.update_form(form.id, UpdateForm {
        sections: Some(vec![section(None, None, "keep me", 1)]),
        ..Default::default()
    })
    .await
    .unwrap();

    // sections would be replaced, but the question points at an unknown placeholder
    let err = r
        .update_form(form.id, UpdateForm {
            title: Some("Renamed".into()),
            sections: Some(vec![]),
            questions: Some(vec![question(None, Some(SectionRef::Key("nope".into())), "q", QuestionKind::Rating)]),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Invalid(_)));

    let current = r.get_form(form.id).await.unwrap();
    assert_eq!(current.title, "Feedback");
    assert_eq!(current.version, 2);
    assert_eq!(r.list_sections(form.id).await.unwrap().len(), 1);
    assert!(r.list_questions(form.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn stale_version_is_a_conflict() {
    let r = InMemRepo::new();
    let form = r.create_form(1, new_form(1)).await.unwrap();
    r.update_form(form.id, UpdateForm { expected_version: Some(1), title: Some("v2".into()), ..Default::default() })
        .await
        .unwrap();
    let err = r
        .update_form(form.id, UpdateForm { expected_version: Some(1), title: Some("lost".into()), ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict(_)));
    assert_eq!(r.get_form(form.id).await.unwrap().title, "v2");
}

#[tokio::test]
async fn deleting_a_section_detaches_untouched_questions() {
    let r = InMemRepo::new();
    let form = r.create_form(1, new_form(1)).await.unwrap();
    r.update_form(form.id, UpdateForm {
        sections: Some(vec![section(None, Some("s"), "Only", 1)]),
        questions: Some(vec![question(None, Some(SectionRef::Key("s".into())), "q", QuestionKind::Likert)]),
        ..Default::default()
    })
    .await
    .unwrap();

    r.update_form(form.id, UpdateForm { sections: Some(vec![]), ..Default::default() }).await.unwrap();
    let questions = r.list_questions(form.id).await.unwrap();
    assert_eq!(questions.len(), 1);
    assert_eq!(questions[0].section_id, None);
}

#[tokio::test]
async fn responses_newest_first_and_policy() {
    let r = InMemRepo::new();
    let form = r.create_form(1, new_form(1)).await.unwrap();

    let first = r.create_response(form.id, 5, answers(json!({"1": "a"})), false).await.unwrap();
    let second = r.create_response(form.id, 5, answers(json!({"1": "b"})), false).await.unwrap();
    let listed = r.list_responses(form.id).await.unwrap();
    assert_eq!(listed.iter().map(|x| x.id).collect::<Vec<_>>(), vec![second.id, first.id]);

    let err = r.create_response(form.id, 5, answers(json!({})), true).await.unwrap_err();
    assert!(matches!(err, RepoError::Conflict(_)));
    r.create_response(form.id, 6, answers(json!({})), true).await.unwrap();

    assert_eq!(r.submitted_form_ids(5).await.unwrap(), vec![form.id]);
    assert!(r.submitted_form_ids(99).await.unwrap().is_empty());

    let missing = r.create_response(9999, 5, answers(json!({})), false).await.unwrap_err();
    assert!(matches!(missing, RepoError::NotFound));
}

#[tokio::test]
async fn deleting_a_form_cascades() {
    let r = InMemRepo::new();
    let form = r.create_form(1, new_form(1)).await.unwrap();
    r.update_form(form.id, UpdateForm {
        questions: Some(vec![question(None, None, "q", QuestionKind::Text)]),
        ..Default::default()
    })
    .await
    .unwrap();
    r.create_response(form.id, 3, answers(json!({"x": "y"})), false).await.unwrap();

    r.delete_form(form.id).await.unwrap();
    assert!(matches!(r.list_questions(form.id).await.unwrap_err(), RepoError::NotFound));
    assert!(r.submitted_form_ids(3).await.unwrap().is_empty());
}

#[tokio::test]
async fn snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let r = InMemRepo::with_snapshot_dir(dir.path());
        let form = r.create_form(1, new_form(4)).await.unwrap();
        r.update_form(form.id, UpdateForm {
            questions: Some(vec![question(None, None, "Rate us", QuestionKind::Rating)]),
            ..Default::default()
        })
        .await
        .unwrap();
        form.id
    };

    let reopened = InMemRepo::with_snapshot_dir(dir.path());
    assert_eq!(reopened.get_form(id).await.unwrap().event_id, 4);
    let questions = reopened.list_questions(id).await.unwrap();
    assert_eq!(questions[0].kind, QuestionKind::Rating);

    // ids keep counting up after reload
    let next = reopened.create_form(1, new_form(4)).await.unwrap();
    assert!(next.id > questions[0].id);
}
