// Session and permission collaborators plus the authorization boundary.
use std::collections::BTreeSet;

use crate::core::error::Error;
use crate::core::model::{AuthorizedScope, User};

/// Resolves a caller's identity from session credentials.
pub trait SessionResolver: Send + Sync {
    fn resolve_session(&self, token: &str) -> Option<User>;
}

/// Narrows candidate accounts to those the user may view.
pub trait PermissionFilter: Send + Sync {
    fn filter_viewable(
        &self,
        candidates: &BTreeSet<u64>,
        user: &User,
    ) -> Result<BTreeSet<u64>, Error>;
}

/// Applies the permission filter to a candidate set.
///
/// The filter is consulted even for an empty candidate set, and its answer is
/// intersected with the candidates so the result can never exceed either.
pub fn authorize(
    candidates: BTreeSet<u64>,
    user: &User,
    permissions: &dyn PermissionFilter,
) -> Result<AuthorizedScope, Error> {
    let viewable = permissions.filter_viewable(&candidates, user)?;
    let accounts: BTreeSet<u64> = candidates.intersection(&viewable).copied().collect();
    tracing::debug!(
        user = %user.user_id,
        candidates = candidates.len(),
        authorized = accounts.len(),
        "resolved authorized scope"
    );
    Ok(AuthorizedScope::from_accounts(accounts))
}
