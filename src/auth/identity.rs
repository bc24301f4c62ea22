use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::auth::User;
use crate::error::{unauthorized_error, Error};

/// Resolves a bearer credential, already validated upstream, to the user it was issued to.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, bearer: &str) -> Result<User, Error>;
}

pub type DynIdentity = Arc<dyn IdentityProvider>;

#[derive(Debug, Default, Clone)]
pub struct StaticIdentityProvider {
    tokens: HashMap<String, User>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, token: impl Into<String>, user: User) -> Self {
        self.tokens.insert(token.into(), user);
        self
    }

    /// Loads a JSON object mapping bearer tokens to `{ "id": ..., "roles": [...] }`.
    #[tracing::instrument]
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        let tokens: HashMap<String, User> = serde_json::from_str(&contents)?;

        tracing::info!("loaded {} identities", tokens.len());

        Ok(Self { tokens })
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn resolve(&self, bearer: &str) -> Result<User, Error> {
        self.tokens
            .get(bearer)
            .cloned()
            .ok_or_else(unauthorized_error)
    }
}

#[test]
fn resolves_known_tokens_only() {
    use tokio_test::block_on;
    use uuid::Uuid;

    let passenger = User::passenger(Uuid::new_v4());
    let provider = StaticIdentityProvider::new().with_user("p-token", passenger.clone());

    assert_eq!(block_on(provider.resolve("p-token")).unwrap(), passenger);
    assert!(block_on(provider.resolve("nope"))
        .unwrap_err()
        .is_unauthorized_error());
}

#[test]
fn token_file_format() {
    let json = r#"{
        "abc": { "id": "6f1c8a36-6c0e-4c33-9c55-3d2b1b0b8e11", "roles": ["driver"] }
    }"#;

    let tokens: HashMap<String, User> = serde_json::from_str(json).unwrap();
    assert!(tokens["abc"].has_role(crate::auth::Role::Driver));
}
