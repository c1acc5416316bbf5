use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use bms_engine::{Caller, EngineConfig, Environment, Role};
use serde::Serialize;
use uuid::Uuid;

/// Request ID stored as a request extension.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Optional header naming the acting user; defaults to the role name.
pub const USER_HEADER: &str = "x-user-id";

/// Bearer tokens and the role each one grants.
#[derive(Debug, Clone)]
pub struct AuthState {
    api_keys: Arc<HashMap<String, Role>>,
    pub enabled: bool,
}

impl AuthState {
    /// In development, no configured keys disables auth and every caller
    /// acts as admin. Elsewhere, no keys fails startup.
    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        let keys: HashMap<String, Role> = config
            .api_keys
            .iter()
            .map(|key| (key.token.clone(), key.role))
            .collect();

        if keys.is_empty() {
            if config.environment == Environment::Development {
                tracing::warn!("BMS_API_KEYS not set; bearer auth disabled in development environment");
                return Ok(Self::disabled());
            }
            anyhow::bail!("BMS_API_KEYS is required outside development; provide token:role pairs");
        }

        Ok(Self {
            api_keys: Arc::new(keys),
            enabled: true,
        })
    }

    pub fn disabled() -> Self {
        Self {
            api_keys: Arc::new(HashMap::new()),
            enabled: false,
        }
    }

    pub fn with_keys(keys: impl IntoIterator<Item = (String, Role)>) -> Self {
        Self {
            api_keys: Arc::new(keys.into_iter().collect()),
            enabled: true,
        }
    }

    fn role_for(&self, token: &str) -> Option<Role> {
        self.api_keys.get(token).copied()
    }
}

#[derive(Debug, Serialize)]
struct MiddlewareErrorBody {
    error: MiddlewareError,
    meta: MiddlewareMeta,
}

#[derive(Debug, Serialize)]
struct MiddlewareError {
    code: &'static str,
    message: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MiddlewareMeta {
    request_id: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}

/// Use the incoming `x-request-id` or generate one, and echo it back on
/// the response.
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);

    req.extensions_mut().insert(RequestId(id.clone()));

    let mut res = next.run(req).await;

    if let Ok(val) = HeaderValue::from_str(&id) {
        res.headers_mut().insert("x-request-id", val);
    }

    res
}

/// Resolves the bearer token to a [`Caller`] extension, or answers 401.
pub async fn require_bearer_auth(
    State(auth): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Response {
    let role = if auth.enabled {
        match extract_bearer_token(req.headers().get(AUTHORIZATION)).and_then(|t| auth.role_for(t)) {
            Some(role) => role,
            None => {
                let request_id = req
                    .extensions()
                    .get::<RequestId>()
                    .map(|id| id.0.clone())
                    .unwrap_or_default();
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(MiddlewareErrorBody {
                        error: MiddlewareError {
                            code: "unauthorized",
                            message: "missing or invalid bearer token",
                        },
                        meta: MiddlewareMeta {
                            request_id,
                            timestamp: chrono::Utc::now(),
                        },
                    }),
                )
                    .into_response();
            }
        }
    } else {
        Role::Admin
    };

    let name = req
        .headers()
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map_or_else(|| role.as_str().to_string(), String::from);
    req.extensions_mut().insert(Caller::new(name, role));

    next.run(req).await
}

fn extract_bearer_token(value: Option<&HeaderValue>) -> Option<&str> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bms_engine::ApiKey;

    #[test]
    fn extract_bearer_token_accepts_valid_header() {
        let header = HeaderValue::from_static("Bearer test-token");
        assert_eq!(extract_bearer_token(Some(&header)), Some("test-token"));
    }

    #[test]
    fn extract_bearer_token_rejects_non_bearer_header() {
        let header = HeaderValue::from_static("Basic abc123");
        assert_eq!(extract_bearer_token(Some(&header)), None);
    }

    #[test]
    fn auth_state_disables_when_no_keys_in_dev() {
        let state = AuthState::from_config(&EngineConfig::default()).unwrap();
        assert!(!state.enabled);
    }

    #[test]
    fn auth_state_requires_keys_in_production() {
        let config = EngineConfig {
            environment: Environment::Production,
            ..EngineConfig::default()
        };
        assert!(AuthState::from_config(&config).is_err());

        let config = EngineConfig {
            environment: Environment::Production,
            api_keys: vec![ApiKey {
                token: "t".into(),
                role: Role::Validator,
            }],
            ..EngineConfig::default()
        };
        let state = AuthState::from_config(&config).unwrap();
        assert_eq!(state.role_for("t"), Some(Role::Validator));
        assert_eq!(state.role_for("x"), None);
    }
}
