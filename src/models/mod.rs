use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

// ============================================================================
// Account identity
// ============================================================================

/// The identity attached to a request: either an authenticated account with
/// its granted scopes, or the anonymous viewer used for public streams when
/// auth is not required.
#[derive(Debug, Clone)]
pub struct AccountCtx {
    pub account_id: Option<Uuid>,
    pub chosen_languages: Option<Vec<String>>,
    pub scopes: Vec<String>,
    pub device_id: Option<String>,
}

impl AccountCtx {
    pub fn anonymous() -> Self {
        AccountCtx {
            account_id: None,
            chosen_languages: None,
            scopes: Vec::new(),
            device_id: None,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.account_id.is_none()
    }

    /// `{read, read:notifications} ∩ scopes ≠ ∅`
    pub fn allow_notifications(&self) -> bool {
        self.has_any_scope(&["read", "read:notifications"])
    }

    pub fn has_any_scope(&self, required: &[&str]) -> bool {
        if required.is_empty() {
            return true;
        }
        required.iter().any(|r| self.scopes.iter().any(|s| s == r))
    }
}

/// Row fetched by the Auth Resolver's single join query (§4.1).
#[derive(Debug, sqlx::FromRow)]
pub struct TokenRow {
    pub account_id: Uuid,
    pub scopes: String,
    pub chosen_languages: Option<Vec<String>>,
    pub device_id: Option<String>,
}

/// Row fetched by the List Authorizer (§4.2).
#[derive(Debug, sqlx::FromRow)]
pub struct ListRow {
    pub id: Uuid,
    pub account_id: Uuid,
}

// ============================================================================
// Upstream event envelope
// ============================================================================

/// The JSON object published on an upstream channel (§3, §6 "Upstream
/// message contract"). `payload` is either a status object (for
/// `event = "update"`) or an opaque string/object for other event kinds —
/// decoded lazily via [`StatusPayload::from_value`] only when filtering
/// requires it.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamEvent {
    pub event: String,
    pub payload: Value,
    #[serde(default)]
    pub queued_at: i64,
}

/// The subset of a status payload the Visibility Filter inspects. Not every
/// upstream event carries this shape — only `event = "update"` does.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusPayload {
    pub id: String,
    pub language: Option<String>,
    pub account: StatusAccount,
    #[serde(default)]
    pub mentions: Vec<StatusMention>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusAccount {
    pub id: String,
    pub acct: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusMention {
    pub id: String,
}

impl StatusPayload {
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Domain portion of `account.acct` (`user@domain`); empty for local
    /// accounts, which have no `@domain` suffix.
    pub fn domain(&self) -> &str {
        self.acct_domain(&self.account.acct)
    }

    fn acct_domain<'a>(&self, acct: &'a str) -> &'a str {
        acct.split_once('@').map(|(_, d)| d).unwrap_or("")
    }

    /// `[account.id, ...mentions[*].id]` — the accounts whose block/mute
    /// relationships against the viewer are relevant to this status.
    pub fn targets(&self) -> Vec<String> {
        let mut targets = vec![self.account.id.clone()];
        targets.extend(self.mentions.iter().map(|m| m.id.clone()));
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_empty_for_local_account() {
        let p = status_payload_with_acct("alice");
        assert_eq!(p.domain(), "");
    }

    #[test]
    fn domain_parsed_for_remote_account() {
        let p = status_payload_with_acct("alice@example.test");
        assert_eq!(p.domain(), "example.test");
    }

    #[test]
    fn targets_includes_author_and_mentions() {
        let p = StatusPayload {
            id: "1".into(),
            language: None,
            account: StatusAccount {
                id: "7".into(),
                acct: "alice".into(),
            },
            mentions: vec![StatusMention { id: "9".into() }, StatusMention { id: "10".into() }],
        };
        assert_eq!(p.targets(), vec!["7", "9", "10"]);
    }

    #[test]
    fn allow_notifications_true_for_read_scope() {
        let ctx = AccountCtx {
            account_id: Some(Uuid::new_v4()),
            chosen_languages: None,
            scopes: vec!["read".into()],
            device_id: None,
        };
        assert!(ctx.allow_notifications());
    }

    #[test]
    fn allow_notifications_false_without_either_scope() {
        let ctx = AccountCtx {
            account_id: Some(Uuid::new_v4()),
            chosen_languages: None,
            scopes: vec!["read:statuses".into()],
            device_id: None,
        };
        assert!(!ctx.allow_notifications());
    }

    #[test]
    fn anonymous_has_no_scopes() {
        let ctx = AccountCtx::anonymous();
        assert!(ctx.is_anonymous());
        assert!(!ctx.has_any_scope(&["read"]));
    }

    fn status_payload_with_acct(acct: &str) -> StatusPayload {
        StatusPayload {
            id: "1".into(),
            language: None,
            account: StatusAccount {
                id: "1".into(),
                acct: acct.into(),
            },
            mentions: vec![],
        }
    }
}
