use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    config::Config,
    library::{EntryDetail, EntrySummary, LibraryInfo},
    semantic::{BroadIndexStatus, ComparisonRow, MatchResult, SearchError},
};

use super::{backend::*, errors::AppError};

/// Talks to a running daemon.
pub struct RemoteBackend {
    remote_addr: String,
    client: reqwest::Client,
}

impl RemoteBackend {
    pub fn new(addr: &str) -> RemoteBackend {
        let remote_addr = addr.strip_suffix('/').unwrap_or(addr).to_string();

        RemoteBackend {
            remote_addr,
            client: reqwest::Client::new(),
        }
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        log::debug!("GET {}{}", self.remote_addr, url);
        self.client.get(format!("{}{}", self.remote_addr, url))
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        log::debug!("POST {}{}", self.remote_addr, url);
        self.client.post(format!("{}{}", self.remote_addr, url))
    }

    /// Library routes, ids percent-encoded as path segments.
    fn library_url(&self, segments: &[&str]) -> Result<reqwest::Url, AppError> {
        let mut url = reqwest::Url::parse(&self.remote_addr).map_err(anyhow::Error::from)?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("invalid remote address: {}", self.remote_addr))?
            .pop_if_empty()
            .extend(["api", "libraries"])
            .extend(segments);
        Ok(url)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum WebResponse<T> {
    Error {
        error: String,
        /// Present when the broad index was not ready
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<BroadIndexStatus>,
    },
    Data(T),
}

async fn handle_response<T>(response: reqwest::Response) -> Result<T, AppError>
where
    T: DeserializeOwned,
{
    let text = response.text().await?;

    let web_response = serde_json::from_str::<WebResponse<T>>(&text).map_err(|err| {
        log::error!("{err}. tried to parse: {text:?}");
        anyhow::Error::from(err)
    })?;

    match web_response {
        WebResponse::Data(data) => Ok(data),
        WebResponse::Error {
            status: Some(status),
            ..
        } => Err(SearchError::BroadIndexUnavailable(status).into()),
        WebResponse::Error { error, .. } => Err(AppError::Remote(error)),
    }
}

#[async_trait]
impl SearchBackend for RemoteBackend {
    async fn libraries(&self) -> Result<Vec<LibraryInfo>, AppError> {
        let resp = self.get("/api/libraries").send().await?;
        handle_response(resp).await
    }

    async fn entries(&self, library_id: String) -> Result<Vec<EntrySummary>, AppError> {
        let url = self.library_url(&[&library_id, "entries"])?;
        log::debug!("GET {url}");
        let resp = self.client.get(url).send().await?;
        handle_response(resp).await
    }

    async fn entry(&self, library_id: String, entry_id: String) -> Result<EntryDetail, AppError> {
        let url = self.library_url(&[&library_id, "entries", &entry_id])?;
        log::debug!("GET {url}");
        let resp = self.client.get(url).send().await?;
        handle_response(resp).await
    }

    async fn broad_index_status(&self) -> Result<BroadIndexStatus, AppError> {
        let resp = self.get("/api/broad_index/status").send().await?;
        handle_response(resp).await
    }

    async fn build_broad_index(&self) -> Result<BroadIndexStatus, AppError> {
        let resp = self.post("/api/broad_index/build").send().await?;
        handle_response(resp).await
    }

    async fn search_embedding(&self, request: SearchRequest) -> Result<Vec<MatchResult>, AppError> {
        let resp = self
            .post("/api/search/embedding")
            .json(&request)
            .send()
            .await?;
        Ok(handle_response::<SearchResponse>(resp).await?.results)
    }

    async fn search_broad(&self, request: SearchRequest) -> Result<Vec<MatchResult>, AppError> {
        let resp = self.post("/api/search/broad").json(&request).send().await?;
        Ok(handle_response::<SearchResponse>(resp).await?.results)
    }

    async fn search_fragment(
        &self,
        request: FragmentSearchRequest,
    ) -> Result<Vec<MatchResult>, AppError> {
        let resp = self
            .post("/api/search/fragment")
            .json(&request)
            .send()
            .await?;
        Ok(handle_response::<SearchResponse>(resp).await?.results)
    }

    async fn compare(
        &self,
        request: FragmentSearchRequest,
    ) -> Result<Vec<ComparisonRow>, AppError> {
        let resp = self
            .post("/api/search/compare")
            .json(&request)
            .send()
            .await?;
        Ok(handle_response::<CompareResponse>(resp).await?.rows)
    }

    async fn config(&self) -> Result<Config, AppError> {
        let resp = self.get("/api/config").send().await?;
        handle_response(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_web_response_error_with_status() {
        let parsed: WebResponse<SearchResponse> = serde_json::from_str(
            r#"{"error": "broad index is not ready", "status": {"state": "building", "progress": 40, "message": "x"}}"#,
        )
        .unwrap();
        assert!(matches!(
            parsed,
            WebResponse::Error {
                status: Some(BroadIndexStatus::Building { progress: 40, .. }),
                ..
            }
        ));
    }

    #[test]
    fn test_web_response_data() {
        let parsed: WebResponse<BroadIndexStatus> =
            serde_json::from_str(r#"{"state": "error", "message": "corpus missing"}"#).unwrap();
        assert!(matches!(
            parsed,
            WebResponse::Data(BroadIndexStatus::Error { .. })
        ));

        let parsed: WebResponse<SearchResponse> =
            serde_json::from_str(r#"{"results": []}"#).unwrap();
        assert!(matches!(parsed, WebResponse::Data(r) if r.results.is_empty()));
    }

    #[test]
    fn test_trailing_slash_is_stripped() {
        let backend = RemoteBackend::new("http://localhost:8080/");
        assert_eq!(backend.remote_addr, "http://localhost:8080");
    }

    #[test]
    fn test_library_url_encodes_ids() {
        let backend = RemoteBackend::new("http://localhost:8080/");
        let url = backend
            .library_url(&["ecrfs", "entries", "Compound A/1"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/api/libraries/ecrfs/entries/Compound%20A%2F1"
        );
    }
}
