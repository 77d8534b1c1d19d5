mod common;

use std::sync::Arc;

use application::{AccountRepository, Clock, SessionRepository};
use chrono::Duration;
use common::test_app;
use domain::{
    ActiveSession, ProfileUpdate, RepositoryError, ServerErrorCode, SessionToken, UniqueKey,
};
use futures::future::join_all;

const PHONE: &str = "13912345678";

#[tokio::test]
async fn code_is_single_use() {
    let app = test_app(10);
    app.accounts.send_verification_code(PHONE).await.unwrap();
    let code = app.sms.last_code(PHONE).unwrap();

    let outcome = app.accounts.login(PHONE, &code).await.unwrap();
    assert_eq!(outcome.account.id.as_str().len(), 12);

    app.accounts.logout(&outcome.account.id).await.unwrap();
    let err = app.accounts.login(PHONE, &code).await.unwrap_err();
    assert!(err.is(ServerErrorCode::InvalidCode));
}

#[tokio::test]
async fn resend_blocked_within_interval() {
    let app = test_app(10);
    app.accounts.send_verification_code(PHONE).await.unwrap();
    let first = app.sms.last_code(PHONE).unwrap();

    let err = app.accounts.send_verification_code(PHONE).await.unwrap_err();
    assert!(err.is(ServerErrorCode::TooFrequent));

    app.clock.advance(Duration::seconds(61));
    app.accounts.send_verification_code(PHONE).await.unwrap();
    let second = app.sms.last_code(PHONE).unwrap();

    // 重发后旧验证码失效
    assert_ne!(first, second);
    let err = app.accounts.validate_code(PHONE, &first).await.unwrap_err();
    assert!(err.is(ServerErrorCode::InvalidCode));
    app.accounts.validate_code(PHONE, &second).await.unwrap();
}

#[tokio::test]
async fn expired_code_rejected() {
    let app = test_app(10);
    app.accounts.send_verification_code(PHONE).await.unwrap();
    let code = app.sms.last_code(PHONE).unwrap();

    app.clock.advance(Duration::minutes(6));
    let err = app.accounts.login(PHONE, &code).await.unwrap_err();
    assert!(err.is(ServerErrorCode::InvalidCode));
}

#[tokio::test]
async fn second_login_rejected_until_logout() {
    let app = test_app(10);
    let account_id = app.login(PHONE).await;

    app.clock.advance(Duration::seconds(61));
    app.accounts.send_verification_code(PHONE).await.unwrap();
    let code = app.sms.last_code(PHONE).unwrap();
    let err = app.accounts.login(PHONE, &code).await.unwrap_err();
    assert!(err.is(ServerErrorCode::AlreadyLoggedIn));

    assert!(app.accounts.logout(&account_id).await.unwrap());
    assert!(!app.accounts.logout(&account_id).await.unwrap());

    app.clock.advance(Duration::seconds(61));
    let again = app.login(PHONE).await;
    assert_eq!(again, account_id);
}

#[tokio::test]
async fn token_resolves_until_logout_or_expiry() {
    let app = test_app(10);
    app.accounts.send_verification_code(PHONE).await.unwrap();
    let code = app.sms.last_code(PHONE).unwrap();
    let outcome = app.accounts.login(PHONE, &code).await.unwrap();

    let resolved = app.accounts.resolve_token(&outcome.token).await.unwrap();
    assert_eq!(resolved, outcome.account.id);

    app.clock.advance(Duration::days(8));
    let err = app.accounts.resolve_token(&outcome.token).await.unwrap_err();
    assert!(err.is(ServerErrorCode::TokenInvalid));

    assert_eq!(app.accounts.sweep_expired_sessions().await.unwrap(), 1);
    assert!(app
        .store
        .find_by_token(&outcome.token)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn expired_session_allows_new_login() {
    let app = test_app(10);
    let account_id = app.login(PHONE).await;

    app.clock.advance(Duration::days(8));
    let again = app.login(PHONE).await;
    assert_eq!(again, account_id);
}

#[tokio::test]
async fn profile_updates_keep_unset_fields() {
    let app = test_app(10);
    let account_id = app.login(PHONE).await;

    app.accounts
        .update_profile(
            &account_id,
            &account_id,
            ProfileUpdate {
                nickname: Some("alice".to_string()),
                gender: Some("female".to_string()),
            },
        )
        .await
        .unwrap();
    let updated = app
        .accounts
        .update_profile(
            &account_id,
            &account_id,
            ProfileUpdate {
                nickname: Some(String::new()),
                gender: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.nickname, "alice");
    assert_eq!(updated.gender, "female");

    let stored = app.store.find_by_phone(&updated.phone_number).await.unwrap().unwrap();
    assert_eq!(stored.nickname, "alice");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_login_creates_one_account() {
    let app = Arc::new(test_app(10));
    app.accounts.send_verification_code(PHONE).await.unwrap();
    let code = app.sms.last_code(PHONE).unwrap();

    let tasks = (0..8).map(|_| {
        let app = app.clone();
        let code = code.clone();
        tokio::spawn(async move { app.accounts.login(PHONE, &code).await })
    });
    let results = join_all(tasks).await;

    let successes: Vec<_> = results
        .into_iter()
        .filter_map(|result| match result.unwrap() {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                assert!(err.is(ServerErrorCode::InvalidCode));
                None
            }
        })
        .collect();
    assert_eq!(successes.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_session_creation_keeps_one() {
    let app = Arc::new(test_app(10));
    let account_id = app.login(PHONE).await;
    app.accounts.logout(&account_id).await.unwrap();

    let now = app.clock.now();
    let tasks = (0..8).map(|i| {
        let app = app.clone();
        let session = ActiveSession::issue(
            account_id.clone(),
            SessionToken::new(format!("token-{}", i)),
            now,
            Duration::hours(1),
        );
        tokio::spawn(async move { app.store.create_exclusive(session, now).await })
    });
    let results = join_all(tasks).await;

    let mut created = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => created += 1,
            Err(err) => assert_eq!(err, RepositoryError::Conflict(UniqueKey::ActiveSession)),
        }
    }
    assert_eq!(created, 1);
}
