//! Request gateway: every authenticated REST exchange goes through
//! [`ApiClient::send`].
//!
//! Success yields the decoded body. Failure always yields an [`ApiError`];
//! the only side effect the gateway performs on its own is tearing down the
//! session when a credentialed call is answered with 401.

use std::{sync::Arc, time::Duration};

use {
    engage_config::{EngageConfig, ExecutionContext, ServiceEndpoint},
    reqwest::{
        Method, RequestBuilder, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue},
    },
    secrecy::ExposeSecret,
    serde::{Serialize, de::DeserializeOwned},
    serde_json::Value,
    tracing::{debug, info, warn},
};

use crate::{
    error::{ApiError, Failure, Result, classify},
    session::{Credential, SessionContext},
};

/// Where the login flow starts.
pub const LOGIN_ROUTE: &str = "/login";
/// Location prefix that requires a session.
pub const AUTHENTICATED_AREA: &str = "/dashboard";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Navigation primitive of the embedding front end.
pub trait Navigator: Send + Sync {
    /// Send the user to the login entry point.
    fn goto_login(&self);

    /// Current location, if the front end has one.
    fn current_path(&self) -> Option<String> {
        None
    }

    /// Force a full reload at `path`.
    fn reload(&self, _path: &str) {}
}

/// Per-call options. Defaults to a bodiless `GET`.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
    /// Overrides for the default headers. Applied in order.
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    timeout: Duration,
    endpoint: ServiceEndpoint,
    context: ExecutionContext,
    session: SessionContext,
    navigator: Option<Arc<dyn Navigator>>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("context", &self.context)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    pub fn new(
        endpoint: ServiceEndpoint,
        context: ExecutionContext,
        session: SessionContext,
    ) -> Result<Self> {
        Self::with_timeout(endpoint, context, session, DEFAULT_TIMEOUT)
    }

    /// `timeout` bounds each gateway exchange. Requests built directly on
    /// [`http`](Self::http) only inherit it as a connect timeout, so
    /// long-lived streams stay usable.
    pub fn with_timeout(
        endpoint: ServiceEndpoint,
        context: ExecutionContext,
        session: SessionContext,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().connect_timeout(timeout).build()?;
        Ok(Self {
            http,
            timeout,
            endpoint,
            context,
            session,
            navigator: None,
        })
    }

    pub fn from_config(
        config: &EngageConfig,
        context: ExecutionContext,
        session: SessionContext,
    ) -> Result<Self> {
        let endpoint = config.endpoint(context)?;
        Self::with_timeout(endpoint, context, session, config.api.request_timeout())
    }

    #[must_use]
    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    pub fn context(&self) -> ExecutionContext {
        self.context
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Absolute URL for a relative path.
    pub fn url(&self, path: &str) -> Result<String, ApiError> {
        self.endpoint
            .url(path)
            .map_err(|e| ApiError::new(500, e.to_string()))
    }

    /// Attach the current bearer token, if any.
    pub fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.session.current_credential() {
            Some(credential) if credential.is_valid() => {
                request.bearer_auth(credential.token().expose_secret())
            },
            _ => request,
        }
    }

    // ── Exchanges ───────────────────────────────────────────────────────

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(path, RequestOptions::new(Method::GET)).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, ApiError> {
        self.send(path, RequestOptions::new(Method::POST).json(to_value(body)?))
            .await
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, ApiError> {
        self.send(path, RequestOptions::new(Method::PUT).json(to_value(body)?))
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(path, RequestOptions::new(Method::DELETE)).await
    }

    pub async fn send<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        let value = self.send_raw(path, options).await?;
        serde_json::from_value(value).map_err(|e| {
            warn!(path, error = %e, "unexpected response shape");
            classify(Failure::Transport {
                message: format!("invalid response body: {e}"),
                connect: false,
            })
        })
    }

    /// Like [`send`](Self::send) but returns the body as JSON. An empty body
    /// is `null`; a non-JSON body is returned as a string.
    pub async fn send_raw(&self, path: &str, options: RequestOptions) -> Result<Value, ApiError> {
        let url = self.url(path)?;
        // Read once; the 401 reaction depends on the state at call time.
        let credential = self.session.current_credential().filter(Credential::is_valid);
        let headers = build_headers(credential.as_ref(), &options.headers)?;

        let mut request = self
            .http
            .request(options.method.clone(), &url)
            .timeout(self.timeout)
            .headers(headers);
        if let Some(body) = &options.body {
            request = request.body(body.to_string());
        }

        debug!(method = %options.method, path, authorized = credential.is_some(), "api request");
        #[cfg(feature = "metrics")]
        crate::metrics::request(&options.method);

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let failure = Failure::from_reqwest(&e);
                warn!(method = %options.method, path, error = %e, "api request failed");
                return Err(self.fail(failure));
            },
        };

        let status = response.status();
        if status.is_success() {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| self.fail(Failure::from_reqwest(&e)))?;
            return Ok(decode_body(&bytes));
        }

        let body = response.text().await;
        if status == StatusCode::UNAUTHORIZED && credential.is_some() {
            self.end_session().await;
        }
        let failure = match body {
            Ok(body) => Failure::Status {
                status: status.as_u16(),
                body,
            },
            Err(e) => {
                warn!(method = %options.method, path, %status, error = %e, "failed to read error body");
                Failure::from_reqwest(&e)
            },
        };
        let err = self.fail(failure);
        warn!(method = %options.method, path, status = err.status_code, error = %err, "api error response");
        Err(err)
    }

    fn fail(&self, failure: Failure) -> ApiError {
        let err = classify(failure);
        #[cfg(feature = "metrics")]
        crate::metrics::failure(&err);
        err
    }

    // ── Session loss ────────────────────────────────────────────────────

    /// Best-effort server logout, then local clear. Never fails.
    pub async fn logout(&self) {
        if self.context.is_client() {
            self.notify_logout().await;
        }
        if self.session.clear() {
            info!("session cleared");
        }
    }

    async fn notify_logout(&self) {
        let url = match self.url(engage_protocol::paths::LOGOUT) {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "cannot build logout url");
                return;
            },
        };
        let request = self
            .authorize(self.http.post(url))
            .timeout(self.timeout)
            .header(CONTENT_TYPE, "application/json");
        match request.send().await {
            Ok(response) if response.status().is_success() => debug!("server logout acknowledged"),
            Ok(response) => warn!(status = %response.status(), "server logout rejected"),
            Err(e) => warn!(error = %e, "server logout failed"),
        }
    }

    async fn end_session(&self) {
        warn!("credential rejected by server, ending session");
        self.logout().await;

        if !self.context.is_client() {
            return;
        }
        let Some(navigator) = &self.navigator else {
            return;
        };
        navigator.goto_login();
        if navigator
            .current_path()
            .is_some_and(|path| path.starts_with(AUTHENTICATED_AREA))
        {
            navigator.reload(LOGIN_ROUTE);
        }
    }
}

fn build_headers(
    credential: Option<&Credential>,
    overrides: &[(String, String)],
) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(credential) = credential {
        let value = HeaderValue::from_str(&format!("Bearer {}", credential.token().expose_secret()))
            .map_err(|_| ApiError::new(500, "credential is not a valid header value"))?;
        headers.insert(AUTHORIZATION, value);
    }

    for (name, value) in overrides {
        // An empty override would remove a default; keep the default instead.
        if value.is_empty() {
            continue;
        }
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ApiError::new(500, format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ApiError::new(500, format!("invalid value for header '{name}': {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn decode_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

fn to_value(body: &impl Serialize) -> Result<Value, ApiError> {
    serde_json::to_value(body).map_err(|e| ApiError::new(500, format!("invalid request body: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_include_json_and_bearer() {
        let credential = Credential::new("tok");
        let headers = build_headers(Some(&credential), &[]).unwrap();
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers[AUTHORIZATION], "Bearer tok");
    }

    #[test]
    fn overrides_replace_but_do_not_remove() {
        let credential = Credential::new("tok");
        let headers = build_headers(Some(&credential), &[
            ("content-type".into(), "application/merge-patch+json".into()),
            ("authorization".into(), String::new()),
            ("x-tenant".into(), "t-9".into()),
        ])
        .unwrap();
        assert_eq!(headers[CONTENT_TYPE], "application/merge-patch+json");
        assert_eq!(headers[AUTHORIZATION], "Bearer tok");
        assert_eq!(headers["x-tenant"], "t-9");
    }

    #[test]
    fn no_credential_no_authorization() {
        let headers = build_headers(None, &[]).unwrap();
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn invalid_header_name_is_an_api_error() {
        let err = build_headers(None, &[("bad header".into(), "x".into())]).unwrap_err();
        assert_eq!(err.status_code, 500);
    }

    #[test]
    fn body_decoding() {
        assert_eq!(decode_body(b""), Value::Null);
        assert_eq!(decode_body(b" \n"), Value::Null);
        assert_eq!(decode_body(br#"{"ok":true}"#), serde_json::json!({"ok": true}));
        assert_eq!(decode_body(b"OK"), Value::String("OK".into()));
    }
}
