use log::debug;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("response missing {0}")]
    Missing(&'static str),
    #[error("worker pool shut down")]
    Runtime,
}

/// A node credential known to the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenInfo {
    pub name: String,
    /// Creation time in epoch milliseconds.
    pub timestamp: i64,
}

#[derive(Deserialize)]
struct TokenListBody {
    tokens: Vec<TokenInfo>,
}

/// Blocking REST client for the account and credential endpoints.
///
/// `ureq` is synchronous, so every request runs on the blocking pool. The
/// client itself is stateless; authenticated calls take the bearer token
/// obtained from [`Backend::login`].
pub struct Backend {
    base: String,
}

impl Backend {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    async fn get(&self, path: &str) -> Result<(u16, Vec<u8>), ApiError> {
        let url = self.endpoint(path);
        tokio::task::spawn_blocking(move || run_get(&url))
            .await
            .map_err(|_| ApiError::Runtime)?
    }

    async fn post(
        &self,
        path: &str,
        bearer: Option<String>,
        body: Value,
    ) -> Result<(u16, Vec<u8>), ApiError> {
        let url = self.endpoint(path);
        tokio::task::spawn_blocking(move || run_post(&url, bearer, &body))
            .await
            .map_err(|_| ApiError::Runtime)?
    }

    /// Whether a username is still free to register.
    pub async fn username_available(&self, username: &str) -> Result<bool, ApiError> {
        let path = format!("/user/available?name={}", urlencoding::encode(username));
        let (status, _) = self.get(&path).await?;
        match status {
            200 => Ok(true),
            404 | 409 => Ok(false),
            other => Err(ApiError::Status(other)),
        }
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let body = json!({ "username": username, "password": password });
        let (status, _) = self.post("/user/reg", None, body).await?;
        match status {
            200 | 201 => Ok(()),
            other => Err(ApiError::Status(other)),
        }
    }

    /// Authenticates the account and returns the bearer token for the
    /// credential endpoints.
    pub async fn login(&self, username: &str, password: &str) -> Result<String, ApiError> {
        let body = json!({ "username": username, "password": password });
        let (status, body) = self.post("/user/auth", None, body).await?;
        if status != 200 {
            return Err(ApiError::Status(status));
        }
        let value: Value = serde_json::from_slice(&body)?;
        value
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ApiError::Missing("token"))
    }

    pub async fn token_list(&self, bearer: &str) -> Result<Vec<TokenInfo>, ApiError> {
        let (status, body) = self
            .post("/token/list", Some(bearer.to_string()), Value::Null)
            .await?;
        if status != 200 {
            return Err(ApiError::Status(status));
        }
        let parsed: TokenListBody = serde_json::from_slice(&body)?;
        Ok(parsed.tokens)
    }

    pub async fn token_create(&self, bearer: &str, name: &str) -> Result<(), ApiError> {
        let body = json!({ "name": name });
        let (status, _) = self
            .post("/token/create", Some(bearer.to_string()), body)
            .await?;
        match status {
            200 | 201 => Ok(()),
            other => Err(ApiError::Status(other)),
        }
    }

    /// Mints a session token for a named credential. The result is what
    /// [`crate::client::Client::launch`] expects.
    pub async fn token_generate(&self, bearer: &str, name: &str) -> Result<String, ApiError> {
        let body = json!({ "name": name });
        let (status, body) = self
            .post("/token/generate", Some(bearer.to_string()), body)
            .await?;
        if status != 201 {
            return Err(ApiError::Status(status));
        }
        let value: Value = serde_json::from_slice(&body)?;
        value
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ApiError::Missing("token"))
    }
}

fn run_get(url: &str) -> Result<(u16, Vec<u8>), ApiError> {
    match ureq::get(url).call() {
        Ok(response) => read_response(url, response),
        Err(ureq::Error::StatusCode(code)) => {
            debug!(target: "Client/Api", "GET {url} -> {code}");
            Ok((code, Vec::new()))
        }
        Err(e) => Err(ApiError::Transport(e.to_string())),
    }
}

fn run_post(url: &str, bearer: Option<String>, body: &Value) -> Result<(u16, Vec<u8>), ApiError> {
    let payload = if body.is_null() {
        Vec::new()
    } else {
        serde_json::to_vec(body)?
    };
    let mut request = ureq::post(url).header("Content-Type", "application/json");
    if let Some(token) = bearer {
        request = request.header("Authorization", &format!("Bearer {token}"));
    }
    match request.send(&payload[..]) {
        Ok(response) => read_response(url, response),
        Err(ureq::Error::StatusCode(code)) => {
            debug!(target: "Client/Api", "POST {url} -> {code}");
            Ok((code, Vec::new()))
        }
        Err(e) => Err(ApiError::Transport(e.to_string())),
    }
}

fn read_response(
    url: &str,
    response: ureq::http::Response<ureq::Body>,
) -> Result<(u16, Vec<u8>), ApiError> {
    let status = response.status().as_u16();
    debug!(target: "Client/Api", "{url} -> {status}");
    let body = response
        .into_body()
        .read_to_vec()
        .map_err(|e| ApiError::Transport(e.to_string()))?;
    Ok((status, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_join_cleanly() {
        let backend = Backend::new("https://api.pondlink.net/");
        assert_eq!(
            backend.endpoint("/user/auth"),
            "https://api.pondlink.net/user/auth"
        );
        assert_eq!(
            backend.endpoint("token/list"),
            "https://api.pondlink.net/token/list"
        );
    }

    #[test]
    fn token_list_body_deserializes() {
        let body = r#"{"tokens":[{"name":"pond-a","timestamp":1755700000000}]}"#;
        let parsed: TokenListBody = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.tokens.len(), 1);
        assert_eq!(parsed.tokens[0].name, "pond-a");
    }
}
