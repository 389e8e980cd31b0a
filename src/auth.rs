use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

/// One shared password for every club administrator; the user name is
/// not checked.
#[derive(Debug)]
pub struct PitchbookAuthSource {
    password: String,
}

impl PitchbookAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for PitchbookAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        tracing::debug!(user = ?login.user(), "password requested");
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
