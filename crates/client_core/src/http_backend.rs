use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use shared::{
    domain::DocumentId,
    error::{ApiError, CoreError, CoreResult},
    protocol::{Analysis, Document, ProfileUpdate, Session, UploadFile, UploadOutcome},
};
use url::Url;

use crate::{AnalysisFetch, AuthProvider, HistoryFetch, ReplyGenerator, UploadTransport};

#[derive(Debug, Serialize)]
struct CredentialsRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct ProfileRequest<'a> {
    user_id: &'a str,
    #[serde(flatten)]
    update: &'a ProfileUpdate,
}

#[derive(Debug, Serialize)]
struct UploadRequest<'a> {
    document_id: &'a DocumentId,
    name: &'a str,
    content_type: &'a str,
    content_b64: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    reply: String,
}

/// REST client for a document-analysis backend. Implements every remote
/// collaborator the application shell needs.
pub struct HttpBackend {
    http: Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base_url =
            Url::parse(base_url).with_context(|| format!("invalid api base url '{base_url}'"))?;
        // Without a trailing slash `join` would replace the last path segment.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http: Client::new(),
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("failed to build url for '{path}'"))
    }

    /// `documents/<id>/<action>`, with the id escaped as a single segment.
    fn document_endpoint(&self, document_id: &DocumentId, action: &str) -> Result<Url> {
        let mut url = self.endpoint("documents")?;
        url.path_segments_mut()
            .map_err(|()| anyhow!("api base url '{}' cannot hold a path", self.base_url))?
            .push(document_id.as_str())
            .push(action);
        Ok(url)
    }

    async fn post_credentials(&self, path: &str, email: &str, password: &str) -> CoreResult<Session> {
        let url = self.endpoint(path).map_err(CoreError::transport)?;
        let res = self
            .http
            .post(url)
            .json(&CredentialsRequest { email, password })
            .send()
            .await
            .map_err(CoreError::transport)?;
        if res.status() == StatusCode::UNAUTHORIZED {
            return Err(CoreError::InvalidCredentials);
        }
        let res = ensure_success(res).await.map_err(CoreError::transport)?;
        res.json::<Session>().await.map_err(CoreError::transport)
    }
}

#[async_trait]
impl AuthProvider for HttpBackend {
    async fn sign_in(&self, email: &str, password: &str) -> CoreResult<Session> {
        self.post_credentials("auth/login", email, password).await
    }

    async fn sign_up(&self, email: &str, password: &str) -> CoreResult<Session> {
        self.post_credentials("auth/signup", email, password).await
    }

    async fn sign_out(&self) -> CoreResult<()> {
        let url = self.endpoint("auth/logout").map_err(CoreError::transport)?;
        let res = self.http.post(url).send().await.map_err(CoreError::transport)?;
        ensure_success(res).await.map_err(CoreError::transport)?;
        Ok(())
    }

    async fn update_profile(&self, session: &Session, update: &ProfileUpdate) -> CoreResult<()> {
        let url = self.endpoint("auth/profile").map_err(CoreError::transport)?;
        let res = self
            .http
            .patch(url)
            .json(&ProfileRequest {
                user_id: session.id.as_str(),
                update,
            })
            .send()
            .await
            .map_err(CoreError::transport)?;
        if res.status() == StatusCode::UNAUTHORIZED {
            return Err(CoreError::NoActiveSession);
        }
        ensure_success(res).await.map_err(CoreError::transport)?;
        Ok(())
    }
}

#[async_trait]
impl UploadTransport for HttpBackend {
    async fn submit(&self, document_id: &DocumentId, file: &UploadFile) -> Result<UploadOutcome> {
        let res = self
            .http
            .post(self.endpoint("documents")?)
            .json(&UploadRequest {
                document_id,
                name: &file.name,
                content_type: &file.content_type,
                content_b64: STANDARD.encode(&file.bytes),
            })
            .send()
            .await?;
        let res = ensure_success(res)
            .await
            .with_context(|| format!("upload of {} rejected", file.name))?;
        Ok(res.json().await?)
    }
}

#[async_trait]
impl AnalysisFetch for HttpBackend {
    async fn fetch(&self, document_id: &DocumentId) -> Result<Option<Analysis>> {
        let url = self.document_endpoint(document_id, "analysis")?;
        let res = self.http.get(url).send().await?;
        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let res = ensure_success(res).await?;
        Ok(Some(res.json().await?))
    }
}

#[async_trait]
impl ReplyGenerator for HttpBackend {
    async fn reply(&self, document_id: &DocumentId, user_text: &str) -> Result<String> {
        let url = self.document_endpoint(document_id, "chat")?;
        let res = self
            .http
            .post(url)
            .json(&ChatRequest { message: user_text })
            .send()
            .await?;
        let res = ensure_success(res).await?;
        let body: ChatResponse = res.json().await?;
        Ok(body.reply)
    }
}

#[async_trait]
impl HistoryFetch for HttpBackend {
    async fn fetch_history(&self) -> Result<Vec<Document>> {
        let res = self
            .http
            .get(self.endpoint("documents")?)
            .send()
            .await?;
        let res = ensure_success(res).await?;
        Ok(res.json().await?)
    }
}

/// Passes 2xx responses through. Anything else becomes an error carrying the
/// server's `ApiError` message when the body holds one.
async fn ensure_success(res: Response) -> Result<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    match res.json::<ApiError>().await {
        Ok(api) => bail!("server returned {status}: {}", api.message),
        Err(_) => bail!("server returned {status}"),
    }
}

#[cfg(test)]
#[path = "tests/http_backend_tests.rs"]
mod tests;
