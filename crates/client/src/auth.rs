//! Login and identity calls.

use {
    engage_protocol::paths,
    serde::{Deserialize, Serialize},
    tracing::info,
};

use crate::{
    error::ApiError,
    gateway::ApiClient,
    session::{Credential, User},
};

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

impl ApiClient {
    /// Authenticate and install the returned credential.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let response: LoginResponse = self
            .post(paths::LOGIN, &LoginRequest { email, password })
            .await?;
        let credential = Credential::new(response.token).with_user(response.user.clone());
        if !credential.is_valid() {
            return Err(ApiError::new(500, "login response carried no token"));
        }
        self.session().set_credential(credential);
        info!(user = %response.user.email, "logged in");
        Ok(response.user)
    }

    /// Fetch the current identity and refresh the stored user.
    pub async fn me(&self) -> Result<User, ApiError> {
        let user: User = self.get(paths::ME).await?;
        self.session().set_user(user.clone());
        Ok(user)
    }
}
