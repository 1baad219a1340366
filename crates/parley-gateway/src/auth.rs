use std::sync::Arc;

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

use parley_db::Database;
use parley_types::api::Claims;
use parley_types::models::UserIdentity;

use crate::error::AuthError;

/// Turns a bearer credential into a verified identity.
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(&self, credential: &str) -> Result<UserIdentity, AuthError>;
}

/// HS256 JWT issuer/verifier backed by the user table.
pub struct JwtAuthenticator {
    db: Arc<Database>,
    secret: String,
    token_ttl: chrono::Duration,
}

impl JwtAuthenticator {
    pub fn new(db: Arc<Database>, secret: impl Into<String>, token_ttl: chrono::Duration) -> Self {
        Self {
            db,
            secret: secret.into(),
            token_ttl,
        }
    }

    pub fn issue_token(&self, user_id: i64) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (chrono::Utc::now() + self.token_ttl).timestamp() as usize,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
    }

    /// Checks signature and expiry only; does not touch the database.
    pub fn verify_token(&self, token: &str) -> Result<i64, AuthError> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )?;

        token_data
            .claims
            .sub
            .parse()
            .map_err(|_| AuthError::MalformedSubject(token_data.claims.sub))
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, credential: &str) -> Result<UserIdentity, AuthError> {
        let user_id = self.verify_token(credential)?;

        let user = self
            .db
            .get_user_by_id(user_id)
            .map_err(|e| AuthError::Lookup(e.to_string()))?
            .ok_or(AuthError::UnknownUser(user_id))?;

        Ok(UserIdentity {
            id: user.id,
            public_key: user.public_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator() -> (JwtAuthenticator, i64) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let id = db.create_user("alice", "alice@example.com", "hash", "alice-pk").unwrap();
        (JwtAuthenticator::new(db, "test-secret", chrono::Duration::minutes(5)), id)
    }

    #[test]
    fn issued_token_authenticates() {
        let (auth, id) = authenticator();
        let token = auth.issue_token(id).unwrap();

        let identity = auth.authenticate(&token).unwrap();
        assert_eq!(identity, UserIdentity { id, public_key: "alice-pk".into() });
    }

    #[test]
    fn rejects_garbage_and_foreign_tokens() {
        let (auth, id) = authenticator();
        assert!(matches!(auth.authenticate("not-a-jwt"), Err(AuthError::InvalidToken(_))));

        let other = JwtAuthenticator::new(
            Arc::new(Database::open_in_memory().unwrap()),
            "other-secret",
            chrono::Duration::minutes(5),
        );
        let foreign = other.issue_token(id).unwrap();
        assert!(matches!(auth.authenticate(&foreign), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn rejects_expired_token() {
        let (auth, id) = authenticator();
        let expired = JwtAuthenticator::new(
            Arc::new(Database::open_in_memory().unwrap()),
            "test-secret",
            chrono::Duration::minutes(-10),
        )
        .issue_token(id)
        .unwrap();
        assert!(matches!(auth.authenticate(&expired), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn rejects_deleted_user() {
        let (auth, _) = authenticator();
        let token = auth.issue_token(4242).unwrap();
        assert!(matches!(auth.authenticate(&token), Err(AuthError::UnknownUser(4242))));
    }
}
