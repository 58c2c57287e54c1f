//! Release access checks shared by every handler that needs a caller.

use std::sync::Arc;

use buildrop_crypto::PUBLIC_INSTALL_SUBJECT;

use super::jwt::JwtManager;
use crate::storage::{App, Database, DatabaseError};

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("not a member of the owning organization")]
    Forbidden,

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[derive(Clone)]
pub struct AccessControl {
    jwt: Arc<JwtManager>,
    db: Database,
}

impl AccessControl {
    pub const fn new(jwt: Arc<JwtManager>, db: Database) -> Self {
        Self { jwt, db }
    }

    /// User id carried by a valid session bearer token.
    pub fn authenticate(&self, bearer: Option<&str>) -> Result<String, AccessError> {
        let token = bearer.ok_or(AccessError::Unauthenticated)?;
        match self.jwt.validate(token) {
            Ok(claims) => Ok(claims.sub),
            Err(e) => {
                tracing::debug!(error = %e, "Session token rejected");
                Err(AccessError::Unauthenticated)
            }
        }
    }

    /// Authenticate the session and require membership in `app`'s
    /// organization. Returns the user id.
    pub async fn authorize_session(
        &self,
        bearer: Option<&str>,
        app: &App,
    ) -> Result<String, AccessError> {
        let user_id = self.authenticate(bearer)?;
        if self.db.is_member(&app.organization_id, &user_id).await? {
            Ok(user_id)
        } else {
            Err(AccessError::Forbidden)
        }
    }

    /// Whether a token subject may still install from `app`. Public links
    /// are not bound to a user and always pass.
    pub async fn subject_has_access(&self, subject: &str, app: &App) -> Result<bool, DatabaseError> {
        if subject == PUBLIC_INSTALL_SUBJECT {
            return Ok(true);
        }
        self.db.is_member(&app.organization_id, subject).await
    }
}
