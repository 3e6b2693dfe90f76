use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// What the identity service tells us about a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("User not found: {0}")]
    NotFound(String),

    #[error("Identity service unavailable: {0}")]
    Unavailable(String),
}

/// The external identity service. Lunchbox never owns user records; it only
/// asks who someone is and whether they may open rounds.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn may_open_round(&self, user_id: &str) -> Result<bool, IdentityError>;

    async fn get_user(&self, user_id: &str) -> Result<UserProfile, IdentityError>;
}

/// `IdentityLookup` over the identity service's REST API.
pub struct HttpIdentityLookup {
    client: reqwest::Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserDto {
    user_id: String,
    username: String,
    #[serde(default)]
    email: Option<String>,
}

impl HttpIdentityLookup {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Identity URL {} cannot be used as a base", base_url);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    /// `{base}/api/users/{user_id}[/{suffix}]`, with the id percent-encoded.
    fn user_url(&self, user_id: &str, suffix: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        // Checked in `new`
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["api", "users", user_id]);
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        url
    }

    async fn fetch<T: serde::de::DeserializeOwned>(&self, user_id: &str, url: Url) -> Result<T, IdentityError> {
        debug!("Identity lookup: GET {}", url);
        let response = self.client.get(url).send().await.map_err(unavailable)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(IdentityError::NotFound(user_id.to_string()));
        }
        response
            .error_for_status()
            .map_err(unavailable)?
            .json::<T>()
            .await
            .map_err(unavailable)
    }
}

#[async_trait]
impl IdentityLookup for HttpIdentityLookup {
    async fn may_open_round(&self, user_id: &str) -> Result<bool, IdentityError> {
        let url = self.user_url(user_id, Some("can-initiate"));
        self.fetch(user_id, url).await
    }

    async fn get_user(&self, user_id: &str) -> Result<UserProfile, IdentityError> {
        let url = self.user_url(user_id, None);
        let dto: UserDto = self.fetch(user_id, url).await?;
        Ok(UserProfile {
            id: dto.user_id,
            display_name: dto.username,
            email: dto.email,
        })
    }
}

fn unavailable(e: reqwest::Error) -> IdentityError {
    IdentityError::Unavailable(e.to_string())
}
