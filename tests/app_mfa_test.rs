mod common;

use std::collections::HashSet;

use koami_auth::error::AppError;
use koami_auth::models::User;
use koami_auth::services::AppMfaService;
use koami_auth::services::app_mfa::AppSetup;
use koami_auth::services::token::hash_token;

use common::{TestApp, spawn_app};

async fn setup_and_code(app: &TestApp, user: &User) -> (AppSetup, String) {
    let app_mfa = app.state.app_mfa().unwrap();
    let setup = app_mfa.setup(user).unwrap();
    let code = app_mfa.provider().current_code(&setup.secret).unwrap();
    (setup, code)
}

fn mfa(app: &TestApp) -> &AppMfaService {
    app.state.app_mfa().unwrap()
}

#[tokio::test]
async fn test_setup_does_not_persist_and_enable_commits() {
    let app = spawn_app(&[]).await;
    let user = app.create_user("a@example.com", &[], true).await;

    let (setup, code) = setup_and_code(&app, &user).await;
    assert!(setup.qr_code_data_uri.starts_with("data:image/png;base64,"));
    assert_eq!(setup.recovery_codes.as_ref().unwrap().len(), 8);

    // セットアップだけでは何も保存されない
    let reloaded = app.reload(&user).await;
    assert!(!reloaded.has_app_authentication());
    assert!(reloaded.app_authentication_recovery_codes.is_none());

    let codes = mfa(&app)
        .enable(&reloaded, &setup.encrypted, &code)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(Some(&codes), setup.recovery_codes.as_ref());

    let enrolled = app.reload(&user).await;
    assert!(enrolled.has_app_authentication());
    let stored = enrolled.recovery_code_hashes().unwrap().unwrap();
    let expected: Vec<String> = codes.iter().map(|c| hash_token(c)).collect();
    assert_eq!(stored, expected);

    // 保存済みシークレットでログイン時のコード検証が通る
    let secret = mfa(&app).provider().stored_secret(&enrolled).unwrap().unwrap();
    assert_eq!(secret, setup.secret);
}

#[tokio::test]
async fn test_envelope_of_other_user_is_forbidden() {
    let app = spawn_app(&[]).await;
    let owner = app.create_user("owner@example.com", &[], true).await;
    let attacker = app.create_user("attacker@example.com", &[], true).await;

    let (setup, code) = setup_and_code(&app, &owner).await;

    let result = mfa(&app).enable(&attacker, &setup.encrypted, &code).await;
    assert!(matches!(result, Err(AppError::Forbidden)));

    // 誤ったコードでも同じく Forbidden
    let result = mfa(&app).enable(&attacker, &setup.encrypted, "000000").await;
    assert!(matches!(result, Err(AppError::Forbidden)));

    assert!(!app.reload(&attacker).await.has_app_authentication());
}

#[tokio::test]
async fn test_tampered_envelope_is_rejected() {
    let app = spawn_app(&[]).await;
    let user = app.create_user("a@example.com", &[], true).await;
    let (setup, code) = setup_and_code(&app, &user).await;

    let mut chars: Vec<char> = setup.encrypted.chars().collect();
    chars[20] = if chars[20] == 'A' { 'B' } else { 'A' };
    let tampered: String = chars.into_iter().collect();

    let result = mfa(&app).enable(&user, &tampered, &code).await;
    assert!(matches!(result, Err(AppError::EnvelopeInvalid)));

    let result = mfa(&app).enable(&user, "not-an-envelope", &code).await;
    assert!(matches!(result, Err(AppError::EnvelopeInvalid)));
}

#[tokio::test]
async fn test_expired_envelope_is_rejected() {
    let app = spawn_app(&[("MFA_SETUP_TTL_SECS", "-1")]).await;
    let user = app.create_user("a@example.com", &[], true).await;
    let (setup, code) = setup_and_code(&app, &user).await;

    let result = mfa(&app).enable(&user, &setup.encrypted, &code).await;
    assert!(matches!(result, Err(AppError::EnvelopeInvalid)));
}

#[tokio::test]
async fn test_wrong_code_is_validation_error() {
    let app = spawn_app(&[]).await;
    let user = app.create_user("a@example.com", &[], true).await;
    let (setup, code) = setup_and_code(&app, &user).await;
    let wrong = if code == "000000" { "111111" } else { "000000" };

    let result = mfa(&app).enable(&user, &setup.encrypted, wrong).await;
    match result {
        Err(AppError::Validation { field, .. }) => assert_eq!(field, "code"),
        other => panic!("unexpected: {other:?}"),
    }
    assert!(!app.reload(&user).await.has_app_authentication());
}

#[tokio::test]
async fn test_setup_when_enrolled_is_conflict() {
    let app = spawn_app(&[]).await;
    let user = app.create_user("a@example.com", &[], true).await;
    let (setup, code) = setup_and_code(&app, &user).await;
    mfa(&app).enable(&user, &setup.encrypted, &code).await.unwrap();

    let enrolled = app.reload(&user).await;
    assert!(matches!(
        mfa(&app).setup(&enrolled),
        Err(AppError::AppAuthenticationAlreadyEnabled)
    ));
}

#[tokio::test]
async fn test_disable_then_enable_leaves_no_stale_codes() {
    let app = spawn_app(&[]).await;
    let user = app.create_user("a@example.com", &[], true).await;

    let (first, code) = setup_and_code(&app, &user).await;
    let first_codes = mfa(&app)
        .enable(&user, &first.encrypted, &code)
        .await
        .unwrap()
        .unwrap();

    mfa(&app).disable(&app.reload(&user).await).await.unwrap();
    let disabled = app.reload(&user).await;
    assert!(disabled.app_authentication_secret.is_none());
    assert!(disabled.app_authentication_recovery_codes.is_none());

    let (second, code) = setup_and_code(&app, &disabled).await;
    let second_codes = mfa(&app)
        .enable(&disabled, &second.encrypted, &code)
        .await
        .unwrap()
        .unwrap();

    let stored: HashSet<String> = app
        .reload(&user)
        .await
        .recovery_code_hashes()
        .unwrap()
        .unwrap()
        .into_iter()
        .collect();
    let expected: HashSet<String> = second_codes.iter().map(|c| hash_token(c)).collect();
    assert_eq!(stored, expected);
    for old in &first_codes {
        assert!(!stored.contains(&hash_token(old)));
    }
}

#[tokio::test]
async fn test_non_recoverable_enable_stores_no_codes() {
    let app = spawn_app(&[("MFA_APP_RECOVERABLE", "false")]).await;
    let user = app.create_user("a@example.com", &[], true).await;

    let (setup, code) = setup_and_code(&app, &user).await;
    assert!(setup.recovery_codes.is_none());

    let codes = mfa(&app).enable(&user, &setup.encrypted, &code).await.unwrap();
    assert!(codes.is_none());

    let enrolled = app.reload(&user).await;
    assert!(enrolled.has_app_authentication());
    assert!(enrolled.app_authentication_recovery_codes.is_none());

    assert!(matches!(
        mfa(&app).regenerate_recovery_codes(&enrolled).await,
        Err(AppError::NotFound)
    ));
}

#[tokio::test]
async fn test_regenerate_recovery_codes() {
    let app = spawn_app(&[]).await;
    let user = app.create_user("a@example.com", &[], true).await;

    assert!(matches!(
        mfa(&app).regenerate_recovery_codes(&user).await,
        Err(AppError::AppAuthenticationNotEnabled)
    ));

    let (setup, code) = setup_and_code(&app, &user).await;
    let old_codes = mfa(&app)
        .enable(&user, &setup.encrypted, &code)
        .await
        .unwrap()
        .unwrap();

    let new_codes = mfa(&app)
        .regenerate_recovery_codes(&app.reload(&user).await)
        .await
        .unwrap();
    assert_eq!(new_codes.len(), 8);
    assert_ne!(new_codes, old_codes);

    let enrolled = app.reload(&user).await;
    let provider = mfa(&app).provider();

    // 古いコードは使えない
    assert!(
        !provider
            .consume_recovery_code(&app.state.user_repo, &enrolled, &old_codes[0])
            .await
            .unwrap()
    );

    // 新しいコードは1回だけ使える
    assert!(
        provider
            .consume_recovery_code(&app.state.user_repo, &enrolled, &new_codes[0])
            .await
            .unwrap()
    );
    let after = app.reload(&user).await;
    assert!(
        !provider
            .consume_recovery_code(&app.state.user_repo, &after, &new_codes[0])
            .await
            .unwrap()
    );
    assert_eq!(after.recovery_code_hashes().unwrap().unwrap().len(), 7);
}

#[tokio::test]
async fn test_second_enable_with_stale_user_is_conflict() {
    let app = spawn_app(&[]).await;
    let stale = app.create_user("a@example.com", &[], true).await;

    // 同じ読み込み済みユーザーで2回セットアップ
    let (first, first_code) = setup_and_code(&app, &stale).await;
    let (second, second_code) = setup_and_code(&app, &stale).await;

    let first_codes = mfa(&app)
        .enable(&stale, &first.encrypted, &first_code)
        .await
        .unwrap()
        .unwrap();

    let result = mfa(&app)
        .enable(&stale, &second.encrypted, &second_code)
        .await;
    assert!(matches!(
        result,
        Err(AppError::AppAuthenticationAlreadyEnabled)
    ));

    // 最初の登録がそのまま残る
    let enrolled = app.reload(&stale).await;
    let secret = mfa(&app).provider().stored_secret(&enrolled).unwrap().unwrap();
    assert_eq!(secret, first.secret);
    let expected: Vec<String> = first_codes.iter().map(|c| hash_token(c)).collect();
    assert_eq!(enrolled.recovery_code_hashes().unwrap().unwrap(), expected);
}

#[tokio::test]
async fn test_regenerate_after_concurrent_disable_is_refused() {
    let app = spawn_app(&[]).await;
    let user = app.create_user("a@example.com", &[], true).await;
    let (setup, code) = setup_and_code(&app, &user).await;
    mfa(&app).enable(&user, &setup.encrypted, &code).await.unwrap();

    let stale = app.reload(&user).await;
    mfa(&app).disable(&stale).await.unwrap();

    let result = mfa(&app).regenerate_recovery_codes(&stale).await;
    assert!(matches!(result, Err(AppError::AppAuthenticationNotEnabled)));

    // 無効化済みユーザーにコードだけ残らない
    let state = app.reload(&user).await;
    assert!(state.app_authentication_secret.is_none());
    assert!(state.app_authentication_recovery_codes.is_none());

    let entries = app.state.activity_repo.latest(10).await.unwrap();
    assert!(
        entries
            .iter()
            .all(|e| e.event != "app_authentication.recovery_codes_regenerated")
    );
}

#[tokio::test]
async fn test_concurrent_enable_and_disable_never_mix() {
    let app = spawn_app(&[]).await;
    let user = app.create_user("a@example.com", &[], true).await;

    for _ in 0..5 {
        let current = app.reload(&user).await;
        if current.has_app_authentication() {
            mfa(&app).disable(&current).await.unwrap();
        }
        let current = app.reload(&user).await;
        let (setup, code) = setup_and_code(&app, &current).await;

        let (enabled, disabled) = tokio::join!(
            mfa(&app).enable(&current, &setup.encrypted, &code),
            mfa(&app).disable(&current),
        );
        assert!(enabled.is_ok());
        assert!(disabled.is_ok());

        let state = app.reload(&user).await;
        assert_eq!(
            state.app_authentication_secret.is_some(),
            state.app_authentication_recovery_codes.is_some()
        );
    }
}

#[tokio::test]
async fn test_service_account_is_internal_error() {
    let app = spawn_app(&[]).await;
    let service = app.create_service_account("svc@example.com").await;

    assert!(matches!(
        mfa(&app).setup(&service),
        Err(AppError::MissingCapability("app_authentication"))
    ));
    assert!(matches!(
        mfa(&app).disable(&service).await,
        Err(AppError::MissingCapability(_))
    ));
}

#[tokio::test]
async fn test_activity_recorded_in_same_transaction() {
    let app = spawn_app(&[]).await;
    let user = app.create_user("a@example.com", &[], true).await;
    let (setup, code) = setup_and_code(&app, &user).await;
    mfa(&app).enable(&user, &setup.encrypted, &code).await.unwrap();
    mfa(&app).disable(&app.reload(&user).await).await.unwrap();

    let entries = app.state.activity_repo.latest(10).await.unwrap();
    let events: Vec<&str> = entries.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(
        events,
        vec!["app_authentication.disabled", "app_authentication.enabled"]
    );
    assert_eq!(entries[0].subject_id, Some(user.id));
}
