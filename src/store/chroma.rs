use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;

use crate::config::StoreConfig;

use super::{
    check_aligned, GetRequest, GetResult, Include, Metadata, QueryResponse, StoreError,
    VectorStore,
};

/// Client for one collection on a Chroma server (v2 REST API).
pub struct ChromaStore {
    client: Client,
    collection_url: String,
    collection_name: String,
}

#[derive(Deserialize, Debug)]
struct CollectionInfo {
    id: String,
    name: String,
}

impl ChromaStore {
    /// Connect and get-or-create the configured collection.
    pub fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let base = config.url.strip_suffix('/').unwrap_or(&config.url);
        let collections_url = format!(
            "{base}/api/v2/tenants/{}/databases/{}/collections",
            config.tenant, config.database
        );

        log::info!("opening collection '{}' at {base}", config.collection);
        let resp = client
            .post(&collections_url)
            .json(&json!({
                "name": config.collection,
                "get_or_create": true,
            }))
            .send()?;
        let info: CollectionInfo = handle_response(resp)?;
        log::debug!("collection '{}' has id {}", info.name, info.id);

        Ok(Self {
            client,
            collection_url: format!("{collections_url}/{}", info.id),
            collection_name: info.name,
        })
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    fn post(&self, op: &str) -> RequestBuilder {
        let url = format!("{}/{op}", self.collection_url);
        log::debug!("POST {url}");
        self.client.post(url)
    }

    fn write(
        &self,
        op: &str,
        ids: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[Metadata],
    ) -> Result<(), StoreError> {
        check_aligned(ids, embeddings, metadatas)?;
        let resp = self
            .post(op)
            .json(&json!({
                "ids": ids,
                "embeddings": embeddings,
                "metadatas": metadatas,
            }))
            .send()?;
        expect_success(resp)
    }
}

fn expect_success(response: Response) -> Result<(), StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    Err(StoreError::Status {
        status: status.as_u16(),
        body: response.text().unwrap_or_default(),
    })
}

fn handle_response<T>(response: Response) -> Result<T, StoreError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let text = response.text()?;

    if !status.is_success() {
        return Err(StoreError::Status {
            status: status.as_u16(),
            body: text,
        });
    }

    serde_json::from_str::<T>(&text).map_err(|err| {
        log::error!("{err}. tried to parse: {text:?}");
        err.into()
    })
}

impl VectorStore for ChromaStore {
    fn get(&self, request: &GetRequest) -> Result<GetResult, StoreError> {
        let mut body = json!({ "include": request.include });
        if let Some(limit) = request.limit {
            body["limit"] = json!(limit);
        }
        if let Some(offset) = request.offset {
            body["offset"] = json!(offset);
        }

        let resp = self.post("get").json(&body).send()?;
        handle_response(resp)
    }

    fn add(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[Metadata],
    ) -> Result<(), StoreError> {
        self.write("add", ids, embeddings, metadatas)
    }

    fn update(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[Metadata],
    ) -> Result<(), StoreError> {
        self.write("update", ids, embeddings, metadatas)
    }

    fn delete(&self, ids: &[String]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let resp = self.post("delete").json(&json!({ "ids": ids })).send()?;
        expect_success(resp)
    }

    fn query(
        &self,
        query_embeddings: &[Vec<f32>],
        n_results: usize,
    ) -> Result<QueryResponse, StoreError> {
        let resp = self
            .post("query")
            .json(&json!({
                "query_embeddings": query_embeddings,
                "n_results": n_results,
                "include": [Include::Metadatas, Include::Distances],
            }))
            .send()?;
        handle_response(resp)
    }

    fn count(&self) -> Result<usize, StoreError> {
        let url = format!("{}/count", self.collection_url);
        log::debug!("GET {url}");
        let resp = self.client.get(url).send()?;
        handle_response(resp)
    }
}
