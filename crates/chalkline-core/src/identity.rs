//! Signed-in identity as reported by the identity provider.

use crate::stroke::ANONYMOUS;
use serde::{Deserialize, Serialize};

/// The current user, as handed over on sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            display_name: None,
            avatar_url: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_avatar(mut self, url: impl Into<String>) -> Self {
        self.avatar_url = Some(url.into());
        self
    }

    /// Name shown to other peers: display name, else the local part of the
    /// email, else "Anonymous".
    pub fn presence_name(&self) -> String {
        let non_empty = |s: &&str| !s.trim().is_empty();
        self.display_name
            .as_deref()
            .filter(non_empty)
            .or_else(|| {
                self.email
                    .as_deref()
                    .and_then(|e| e.split('@').next())
                    .filter(non_empty)
            })
            .unwrap_or("Anonymous")
            .to_string()
    }
}

/// Author id for strokes drawn under the given identity.
pub fn author_id(identity: Option<&Identity>) -> &str {
    identity.map_or(ANONYMOUS, |i| i.id.as_str())
}
