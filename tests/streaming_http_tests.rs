mod common;

use axum::http::StatusCode;

// Every case here terminates before the handler opens the SSE body, so the
// oneshot+collect helper in `common` never blocks on an infinite stream.
// Happy-path subscriptions are exercised at the unit level in
// `stream_resolver` and `filter`, not through the router.

#[tokio::test]
async fn health_check_is_ok_without_auth() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool).await;

    let (status, _) = common::get(app, "/api/v1/streaming/health").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn user_stream_without_token_is_unauthorized() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool).await;

    let (status, body) = common::get(app, "/api/v1/streaming/user").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authentication required");
}

#[tokio::test]
async fn user_stream_with_unknown_token_is_unauthorized() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool).await;

    let (status, _) = common::get_authed(app, "/api/v1/streaming/user", "not-a-real-token").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn user_stream_with_insufficient_scope_is_unauthorized() {
    let pool = common::test_pool().await;
    let account_id = common::insert_account(&pool, None).await;
    let token = common::insert_token(&pool, account_id, "follow").await;
    let app = common::create_test_app(pool).await;

    let (status, _) = common::get_authed(app, "/api/v1/streaming/user", &token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn user_notification_stream_requires_notification_scope() {
    let pool = common::test_pool().await;
    let account_id = common::insert_account(&pool, None).await;
    let token = common::insert_token(&pool, account_id, "read:statuses").await;
    let app = common::create_test_app(pool).await;

    let (status, _) =
        common::get_authed(app, "/api/v1/streaming/user/notification", &token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn hashtag_without_tag_param_is_not_found() {
    let pool = common::test_pool().await;
    let account_id = common::insert_account(&pool, None).await;
    let token = common::insert_token(&pool, account_id, "read").await;
    let app = common::create_test_app(pool).await;

    let (status, _) = common::get_authed(app, "/api/v1/streaming/hashtag", &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_stream_for_someone_elses_list_is_not_found() {
    let pool = common::test_pool().await;
    let owner = common::insert_account(&pool, None).await;
    let other = common::insert_account(&pool, None).await;
    let list_id = common::insert_list(&pool, owner).await;
    let token = common::insert_token(&pool, other, "read").await;
    let app = common::create_test_app(pool).await;

    let (status, _) =
        common::get_authed(app, &format!("/api/v1/streaming/list?list={list_id}"), &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_stream_without_list_param_is_not_found() {
    let pool = common::test_pool().await;
    let account_id = common::insert_account(&pool, None).await;
    let token = common::insert_token(&pool, account_id, "read").await;
    let app = common::create_test_app(pool).await;

    let (status, _) = common::get_authed(app, "/api/v1/streaming/list", &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn root_alias_without_stream_param_is_not_found() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool).await;

    let (status, _) = common::get(app, "/api/v1/streaming").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn root_alias_with_unknown_stream_name_is_not_found() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool).await;

    let (status, _) = common::get(app, "/api/v1/streaming?stream=bogus").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn public_stream_requires_auth_when_always_require_auth_is_set() {
    let pool = common::test_pool().await;
    let config = common::test_config_with_always_require_auth();
    let app = common::create_test_app_with_config(pool, config).await;

    let (status, _) = common::get(app, "/api/v1/streaming/public").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn direct_stream_without_token_is_unauthorized() {
    let pool = common::test_pool().await;
    let app = common::create_test_app(pool).await;

    let (status, _) = common::get(app, "/api/v1/streaming/direct").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
