use crate::{
    error::{Error, Result},
    Application, ApplicationCreateRequest, ApplicationList, ApplicationQuery, Applications,
};
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fmt, future::Future, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the API server, e.g. `https://argocd-server.argocd.svc`.
    pub server: String,
    pub username: String,
    pub password: String,
    pub insecure: bool,
    pub timeout: Duration,
}

/// An Argo CD client that holds a session token and renews it when the server
/// stops accepting it.
///
/// Every call is attempted with the current session. If the server rejects the
/// session, the caller takes the session lock, logs in again unless another
/// caller already did so, and retries exactly once. A second rejection is
/// returned as is.
pub struct HttpClient {
    config: ClientConfig,
    session: Mutex<Arc<Session>>,
}

/// An HTTP client bound to one session token.
struct Session {
    generation: u64,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

/// Error body produced by the API gateway.
#[derive(Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<i32>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    error: String,
}

// === impl ClientConfig ===

impl ClientConfig {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server.trim_end_matches('/'), path)
    }

    fn http_builder(&self) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .danger_accept_invalid_certs(self.insecure)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("insecure", &self.insecure)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

// === impl HttpClient ===

impl HttpClient {
    /// Logs in and returns a client bound to the new session.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let token = login(&config).await?;
        let session = Session::new(&config, &token, 0)?;
        info!(server = %config.server, "Authenticated with Argo CD");
        Ok(Self {
            config,
            session: Mutex::new(Arc::new(session)),
        })
    }

    async fn call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let session = self.session.lock().await.clone();
        match op(session.clone()).await {
            Err(error) if error.is_unauthorized() => {
                debug!(%error, generation = session.generation, "Session rejected");
                let session = self.renew(&session).await?;
                op(session).await
            }
            res => res,
        }
    }

    /// Replaces `stale` with a fresh session. Callers that lose the race reuse
    /// the session installed by the winner.
    async fn renew(&self, stale: &Session) -> Result<Arc<Session>> {
        let mut current = self.session.lock().await;
        if current.generation != stale.generation {
            return Ok(current.clone());
        }

        let token = login(&self.config).await?;
        let session = Arc::new(Session::new(&self.config, &token, stale.generation + 1)?);
        *current = session.clone();
        info!(generation = session.generation, "Renewed Argo CD session");
        Ok(session)
    }
}

#[async_trait::async_trait]
impl Applications for HttpClient {
    async fn create_application(&self, request: ApplicationCreateRequest) -> Result<Application> {
        let url = self.config.url("/api/v1/applications");
        let upsert = if request.upsert { "true" } else { "false" };
        let app = &request.application;
        self.call(|session| {
            let req = session
                .http
                .post(&url)
                .query(&[("upsert", upsert)])
                .json(app);
            async move { decode(req).await }
        })
        .await
    }

    async fn get_application(&self, query: &ApplicationQuery) -> Result<Application> {
        if query.is_empty() {
            return Err(Error::EmptyQuery);
        }
        let name = query.name().ok_or(Error::MissingIdentity)?;
        let url = self.config.url(&format!("/api/v1/applications/{name}"));
        let params = query.params();
        self.call(|session| {
            let req = session.http.get(&url).query(&params);
            async move { decode(req).await }
        })
        .await
    }

    async fn list_applications(&self, query: &ApplicationQuery) -> Result<Vec<Application>> {
        let url = self.config.url("/api/v1/applications");
        let mut params = query.params();
        if let Some(name) = query.name() {
            params.push(("name", name));
        }
        let list = self
            .call(|session| {
                let req = session.http.get(&url).query(&params);
                async move { decode::<ApplicationList>(req).await }
            })
            .await?;
        Ok(list.into_items())
    }

    async fn delete_application(&self, name: &str, namespace: &str) -> Result<()> {
        if name.is_empty() || namespace.is_empty() {
            return Err(Error::MissingIdentity);
        }
        let url = self.config.url(&format!("/api/v1/applications/{name}"));
        self.call(|session| {
            let req = session
                .http
                .delete(&url)
                .query(&[("appNamespace", namespace), ("cascade", "true")]);
            async move { send(req).await.map(|_| ()) }
        })
        .await
    }
}

// === impl Session ===

impl Session {
    fn new(config: &ClientConfig, token: &str, generation: u64) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| Error::InvalidToken)?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, auth);

        let http = config.http_builder().default_headers(headers).build()?;
        Ok(Self { generation, http })
    }
}

async fn login(config: &ClientConfig) -> Result<String> {
    let http = config.http_builder().build()?;
    let rsp = http
        .post(config.url("/api/v1/session"))
        .json(&LoginRequest {
            username: &config.username,
            password: &config.password,
        })
        .send()
        .await?;

    let status = rsp.status();
    if !status.is_success() {
        let message = rsp.text().await.unwrap_or_default();
        return Err(Error::Login { status, message });
    }

    let LoginResponse { token } = rsp.json().await?;
    Ok(token)
}

async fn send(req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let rsp = req.send().await?;
    let status = rsp.status();
    if status.is_success() {
        return Ok(rsp);
    }

    let body = rsp.text().await.unwrap_or_default();
    let ErrorBody {
        code,
        message,
        error,
    } = serde_json::from_str(&body).unwrap_or_default();
    let message = [message, error]
        .into_iter()
        .find(|m| !m.is_empty())
        .unwrap_or(body);
    Err(Error::from_response(status, code, message))
}

async fn decode<T: DeserializeOwned>(req: reqwest::RequestBuilder) -> Result<T> {
    let rsp = send(req).await?;
    Ok(rsp.json().await?)
}
