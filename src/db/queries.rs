use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{ListRow, TokenRow};

/// Resolve a bearer token to its owning account, granted scopes, chosen
/// languages and device id in one join, filtered to non-revoked tokens
/// (§4.1). Returns `None` for an unknown or revoked token.
pub async fn resolve_token(pool: &PgPool, token: &str) -> AppResult<Option<TokenRow>> {
    let row = sqlx::query_as::<_, TokenRow>(
        "SELECT u.id AS account_id, t.scopes, u.chosen_languages, d.device_id
         FROM oauth_access_tokens t
         JOIN accounts u ON u.id = t.account_id
         LEFT JOIN oauth_devices d ON d.token_id = t.id
         WHERE t.token = $1 AND t.revoked_at IS NULL",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Look up a list by id (§4.2). Authorization is the caller's job — this
/// just fetches the row so the caller can compare `account_id`.
pub async fn find_list(pool: &PgPool, list_id: Uuid) -> AppResult<Option<ListRow>> {
    let row = sqlx::query_as::<_, ListRow>("SELECT id, account_id FROM lists WHERE id = $1")
        .bind(list_id)
        .fetch_optional(pool)
        .await?;

    Ok(row)
}

/// The combined blocks/mutes query from §4.6 step (d): any row means the
/// viewer must not see this status.
///
/// `targets` is `[author_id, ...mention_ids]`. The query checks, in one
/// round trip:
///   - the viewer blocks any target, or the author blocks the viewer
///   - the viewer mutes any target
pub async fn viewer_blocks_or_mutes(
    pool: &PgPool,
    viewer: Uuid,
    author: Uuid,
    targets: &[Uuid],
) -> AppResult<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(
             SELECT 1 FROM blocks
             WHERE (account_id = $1 AND target_account_id = ANY($3))
                OR (account_id = $2 AND target_account_id = $1)
             UNION
             SELECT 1 FROM mutes
             WHERE account_id = $1 AND target_account_id = ANY($3)
         )",
    )
    .bind(viewer)
    .bind(author)
    .bind(targets)
    .fetch_one(pool)
    .await?;

    Ok(exists)
}

/// §4.6 step (e): has the viewer domain-blocked the author's server.
pub async fn viewer_domain_blocks(pool: &PgPool, viewer: Uuid, domain: &str) -> AppResult<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(
             SELECT 1 FROM account_domain_blocks
             WHERE account_id = $1 AND domain = $2
         )",
    )
    .bind(viewer)
    .bind(domain)
    .fetch_one(pool)
    .await?;

    Ok(exists)
}
