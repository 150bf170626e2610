//! Identity-provider directory, used only to remove accounts.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::Secret;

const AUTHORITY: &str = "https://login.microsoftonline.com";
const GRAPH_API: &str = "https://graph.microsoft.com/v1.0";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Identity directory not configured")]
    NotConfigured,

    #[error("Directory transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Directory request failed ({status}): {body}")]
    Api { status: u16, body: String },
}

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Delete the directory account for `email`.  Returns `false` if the
    /// directory had no such account.
    async fn delete_user(&self, email: &str) -> Result<bool, DirectoryError>;
}

/// Microsoft Graph client using the client-credentials flow.
pub struct GraphDirectory {
    client: reqwest::Client,
    tenant_id: String,
    client_id: String,
    client_secret: Secret,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl GraphDirectory {
    pub fn new(client: reqwest::Client, tenant_id: String, client_id: String, client_secret: Secret) -> Self {
        Self {
            client,
            tenant_id,
            client_id,
            client_secret,
        }
    }

    async fn access_token(&self) -> Result<String, DirectoryError> {
        let url = format!("{AUTHORITY}/{}/oauth2/v2.0/token", self.tenant_id);
        let response = self
            .client
            .post(url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose()),
                ("scope", GRAPH_SCOPE),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json::<TokenResponse>().await?.access_token)
    }
}

#[async_trait]
impl IdentityDirectory for GraphDirectory {
    async fn delete_user(&self, email: &str) -> Result<bool, DirectoryError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .delete(format!("{GRAPH_API}/users/{email}"))
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !status.is_success() {
            return Err(DirectoryError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        tracing::info!(email, "deleted directory account");
        Ok(true)
    }
}

pub struct DisabledDirectory;

#[async_trait]
impl IdentityDirectory for DisabledDirectory {
    async fn delete_user(&self, _email: &str) -> Result<bool, DirectoryError> {
        Err(DirectoryError::NotConfigured)
    }
}
