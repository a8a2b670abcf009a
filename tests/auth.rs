#![cfg(feature = "inmem-store")]

use actix_web::{dev::Payload, test, web, FromRequest};
use eventforms::{
    auth::{create_jwt, Auth, Caller, Role},
    error::ApiError,
    models::Form,
    repo::inmem::InMemRepo,
    AppConfig, AppState,
};
use std::sync::Arc;

const SECRET: &str = "test-secret-must-be-32-bytes-long!!";

fn state() -> web::Data<AppState> {
    web::Data::new(AppState {
        repo: Arc::new(InMemRepo::new()),
        config: Arc::new(AppConfig::new(SECRET)),
    })
}

async fn extract(header: Option<String>) -> Result<Auth, ApiError> {
    let mut req = test::TestRequest::default().app_data(state());
    if let Some(h) = header {
        req = req.insert_header(("Authorization", h));
    }
    let req = req.to_http_request();
    let mut pl = Payload::None;
    Auth::from_request(&req, &mut pl).await
}

#[actix_web::test]
async fn jwt_roundtrip_ok() {
    let token = create_jwt(42, Role::User, SECRET, 1).expect("token");
    let auth = extract(Some(format!("Bearer {token}"))).await.expect("extract");
    assert_eq!(auth.0, Caller { id: 42, role: Role::User });
}

#[actix_web::test]
async fn extractor_rejects_invalid_token() {
    let err = extract(Some("Bearer notatoken".into())).await.err().unwrap();
    assert!(matches!(err, ApiError::Unauthorized));
}

#[actix_web::test]
async fn extractor_rejects_missing_header() {
    assert!(matches!(extract(None).await.err().unwrap(), ApiError::Unauthorized));
}

#[actix_web::test]
async fn token_signed_with_other_secret_is_rejected() {
    let token = create_jwt(1, Role::Admin, "another-secret-that-is-also-32-bytes!", 1).unwrap();
    assert!(extract(Some(format!("Bearer {token}"))).await.is_err());
}

#[actix_web::test]
async fn expired_token_is_rejected() {
    // well beyond the default validation leeway
    let token = create_jwt(1, Role::User, SECRET, -2).unwrap();
    assert!(extract(Some(format!("Bearer {token}"))).await.is_err());
}

#[actix_web::test]
async fn oversized_ttl_is_capped_not_a_panic() {
    let token = create_jwt(3, Role::User, SECRET, i64::MAX).unwrap();
    let auth = extract(Some(format!("Bearer {token}"))).await.expect("extract");
    assert_eq!(auth.0.id, 3);
    assert!(create_jwt(3, Role::User, SECRET, i64::MIN).is_ok());
}

#[core::prelude::v1::test]
fn creator_and_admin_can_manage() {
    let form = Form {
        id: 1,
        event_id: 1,
        creator_id: 7,
        title: "t".into(),
        description: None,
        banner_image: None,
        version: 1,
        created_at: chrono::Utc::now(),
    };
    assert!(Caller { id: 7, role: Role::User }.can_manage(&form));
    assert!(Caller { id: 8, role: Role::Admin }.can_manage(&form));
    assert!(!Caller { id: 8, role: Role::User }.can_manage(&form));
}
