// Inbound export payload: every field optional, empty body means "everything visible".
use serde::Deserialize;

use crate::core::error::{Error, ErrorKind};
use crate::core::model::{BadgeInput, ScopeFilter};

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ExportRequest {
    pub scopes: Option<Vec<String>>,
    pub resource_types: Option<Vec<String>>,
    pub badges: Option<Vec<BadgeInput>>,
    pub badge_filter_operator: Option<String>,
}

impl ExportRequest {
    pub fn from_body(body: &[u8]) -> Result<Self, Error> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let request: Option<Self> = serde_json::from_slice(body).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("invalid export request body")
                .with_hint("Send a JSON object with optional scopes, resource_types, badges, and badge_filter_operator.")
                .with_source(err)
        })?;
        Ok(request.unwrap_or_default())
    }

    pub fn into_filter(self) -> ScopeFilter {
        ScopeFilter {
            scopes: self.scopes.unwrap_or_default(),
            resource_types: self.resource_types.unwrap_or_default(),
            badges: self.badges.unwrap_or_default(),
            badge_operator: self.badge_filter_operator,
        }
    }
}
