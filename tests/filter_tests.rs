mod common;

use serde_json::json;
use streaming_gateway::filter::{self, Decision, SubscriptionOptions};
use streaming_gateway::models::{AccountCtx, UpstreamEvent};

fn viewer_ctx(account_id: uuid::Uuid) -> AccountCtx {
    AccountCtx {
        account_id: Some(account_id),
        chosen_languages: None,
        scopes: vec!["read".into(), "read:statuses".into(), "read:notifications".into()],
        device_id: None,
    }
}

fn filtered_options() -> SubscriptionOptions {
    SubscriptionOptions {
        needs_filtering: true,
        notification_only: false,
    }
}

fn update_from(author: uuid::Uuid, mentions: &[uuid::Uuid], acct: &str) -> UpstreamEvent {
    UpstreamEvent {
        event: "update".into(),
        payload: json!({
            "id": "1",
            "language": null,
            "account": { "id": author.to_string(), "acct": acct },
            "mentions": mentions.iter().map(|m| json!({ "id": m.to_string() })).collect::<Vec<_>>(),
        }),
        queued_at: 0,
    }
}

#[tokio::test]
async fn drops_status_from_blocked_author() {
    let pool = common::test_pool().await;
    let viewer = common::insert_account(&pool, None).await;
    let author = common::insert_account(&pool, None).await;
    common::insert_block(&pool, viewer, author).await;

    let event = update_from(author, &[], "author");
    let decision = filter::decide(&pool, &viewer_ctx(viewer), filtered_options(), &event).await;
    assert_eq!(decision, Decision::Drop);
}

#[tokio::test]
async fn drops_status_when_author_blocked_viewer() {
    let pool = common::test_pool().await;
    let viewer = common::insert_account(&pool, None).await;
    let author = common::insert_account(&pool, None).await;
    common::insert_block(&pool, author, viewer).await;

    let event = update_from(author, &[], "author");
    let decision = filter::decide(&pool, &viewer_ctx(viewer), filtered_options(), &event).await;
    assert_eq!(decision, Decision::Drop);
}

#[tokio::test]
async fn drops_status_mentioning_a_muted_account() {
    let pool = common::test_pool().await;
    let viewer = common::insert_account(&pool, None).await;
    let author = common::insert_account(&pool, None).await;
    let mentioned = common::insert_account(&pool, None).await;
    common::insert_mute(&pool, viewer, mentioned).await;

    let event = update_from(author, &[mentioned], "author");
    let decision = filter::decide(&pool, &viewer_ctx(viewer), filtered_options(), &event).await;
    assert_eq!(decision, Decision::Drop);
}

#[tokio::test]
async fn drops_status_from_domain_blocked_server() {
    let pool = common::test_pool().await;
    let viewer = common::insert_account(&pool, None).await;
    let author = common::insert_account(&pool, None).await;
    common::insert_domain_block(&pool, viewer, "blocked.example").await;

    let event = update_from(author, &[], "author@blocked.example");
    let decision = filter::decide(&pool, &viewer_ctx(viewer), filtered_options(), &event).await;
    assert_eq!(decision, Decision::Drop);
}

#[tokio::test]
async fn delivers_when_no_relationship_blocks_it() {
    let pool = common::test_pool().await;
    let viewer = common::insert_account(&pool, None).await;
    let author = common::insert_account(&pool, None).await;

    let event = update_from(author, &[], "author@unrelated.example");
    let decision = filter::decide(&pool, &viewer_ctx(viewer), filtered_options(), &event).await;
    assert_eq!(decision, Decision::Deliver);
}

#[tokio::test]
async fn language_filter_drops_before_any_query_runs() {
    let pool = common::test_pool().await;
    let viewer = common::insert_account(&pool, Some(vec!["en"])).await;
    let author = common::insert_account(&pool, None).await;

    let event = UpstreamEvent {
        event: "update".into(),
        payload: json!({
            "id": "1",
            "language": "fr",
            "account": { "id": author.to_string(), "acct": "author" },
            "mentions": [],
        }),
        queued_at: 0,
    };
    let decision = filter::decide(&pool, &viewer_ctx(viewer), filtered_options(), &event).await;
    assert_eq!(decision, Decision::Drop);
}
