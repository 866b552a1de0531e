//! Per-call context: who is calling, when, and from where.

use chrono::{DateTime, Utc};

use crate::azid::{AzidText, SessionId, TerminalId, TerminalIdNum, UserId};

/// Authorization attached to a call, derived from a validated access token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Authorization {
    session: SessionId,
}

impl Authorization {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn from_session(session: SessionId) -> Self {
        Self { session }
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    pub fn is_valid(&self) -> bool {
        self.session.is_statically_valid()
    }

    /// The caller acts on behalf of a user.
    pub fn is_user_context(&self) -> bool {
        self.is_valid() && self.user_id().is_statically_valid()
    }

    pub fn terminal_id(&self) -> TerminalId {
        self.session.terminal()
    }

    pub fn user_id(&self) -> UserId {
        self.session.terminal().user()
    }

    pub fn actor(&self) -> Actor {
        if !self.is_valid() {
            return Actor::default();
        }
        let user = self.user_id();
        Actor {
            user_id: user.is_statically_valid().then_some(user),
            terminal_id: Some(self.terminal_id().id_num()),
        }
    }
}

/// Audit actor: the user and terminal acting in a call, if any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Option<UserId>,
    pub terminal_id: Option<TerminalIdNum>,
}

/// Everything the engine needs to know about the call it serves.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub authorization: Authorization,
    pub receive_time: DateTime<Utc>,
    pub origin_address: Option<String>,
    pub accept_language: Vec<String>,
}

impl CallContext {
    pub fn new(authorization: Authorization) -> Self {
        Self {
            authorization,
            receive_time: Utc::now(),
            origin_address: None,
            accept_language: Vec::new(),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(Authorization::anonymous())
    }

    pub fn with_origin(mut self, origin_address: impl Into<String>) -> Self {
        self.origin_address = Some(origin_address.into());
        self
    }

    pub fn with_accept_language(mut self, languages: Vec<String>) -> Self {
        self.accept_language = languages;
        self
    }

    pub fn actor(&self) -> Actor {
        self.authorization.actor()
    }
}

/// Parses an `Accept-Language` header value into tags ordered by quality.
pub fn parse_accept_language(header: &str) -> Vec<String> {
    let mut tags: Vec<(String, f32)> = header
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.trim().split(';');
            let tag = pieces.next()?.trim();
            if tag.is_empty() || tag == "*" {
                return None;
            }
            let quality = pieces
                .find_map(|p| p.trim().strip_prefix("q="))
                .and_then(|q| q.parse::<f32>().ok())
                .unwrap_or(1.0);
            Some((tag.to_string(), quality))
        })
        .collect();
    tags.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    tags.into_iter().map(|(tag, _)| tag).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azid::{ApplicationId, SessionIdNum};

    #[test]
    fn test_anonymous_authorization() {
        let auth = Authorization::anonymous();
        assert!(!auth.is_valid());
        assert!(!auth.is_user_context());
        assert_eq!(auth.actor(), Actor::default());
    }

    #[test]
    fn test_user_authorization() {
        let terminal = TerminalId::new(
            ApplicationId::from_primitive(0x2000_0101),
            UserId::from_primitive(77),
            TerminalIdNum::from_primitive(88),
        );
        let auth = Authorization::from_session(SessionId::new(
            terminal,
            SessionIdNum::from_primitive(5),
        ));
        assert!(auth.is_user_context());
        assert_eq!(auth.user_id(), UserId::from_primitive(77));
        assert_eq!(
            auth.actor(),
            Actor {
                user_id: Some(UserId::from_primitive(77)),
                terminal_id: Some(TerminalIdNum::from_primitive(88)),
            }
        );
    }

    #[test]
    fn test_parse_accept_language() {
        assert_eq!(
            parse_accept_language("id;q=0.8, en-US, *;q=0.1, en;q=0.9"),
            vec!["en-US", "en", "id"]
        );
        assert!(parse_accept_language("").is_empty());
    }
}
