//! Backend API client.
//!
//! `HubApi` is the seam the controller talks to; `HttpApi` is the reqwest
//! implementation against the Global Music Hub backend. Every call is a
//! single request: no retries, no caching.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use crate::model::{Comment, Country, Health, NewComment, Station, TargetType};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid backend url {url:?}: {reason}")]
    BaseUrl { url: String, reason: String },
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },
    #[error("malformed response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait HubApi: Send + Sync {
    async fn popular_stations(&self, limit: usize) -> Result<Vec<Station>, ApiError>;

    async fn countries(&self) -> Result<Vec<Country>, ApiError>;

    async fn stations_by_country(
        &self,
        country: &str,
        limit: usize,
    ) -> Result<Vec<Station>, ApiError>;

    async fn search_stations(&self, query: &str, limit: usize) -> Result<Vec<Station>, ApiError>;

    async fn comments(
        &self,
        target_id: &str,
        target_type: TargetType,
    ) -> Result<Vec<Comment>, ApiError>;

    /// The created comment is echoed by the backend but callers only need
    /// success or failure.
    async fn post_comment(&self, comment: &NewComment) -> Result<(), ApiError>;

    async fn health(&self) -> Result<Health, ApiError>;
}

#[derive(Clone)]
pub struct HttpApi {
    client: Client,
    base: Url,
}

impl HttpApi {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let base = Url::parse(base_url.trim()).map_err(|e| ApiError::BaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(ApiError::BaseUrl {
                url: base_url.to_string(),
                reason: "not a hierarchical url".to_string(),
            });
        }
        let client = Client::builder()
            .user_agent(concat!("music-hub/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, base })
    }

    /// Append path segments to the base URL. Segments are percent-encoded,
    /// so a country like `"Côte d'Ivoire"` stays a single segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let endpoint = url.path().to_string();
        debug!("GET {} {:?}", endpoint, query);
        let response = self.client.get(url).query(query).send().await?;
        decode(&endpoint, response).await
    }
}

async fn decode<T: DeserializeOwned>(
    endpoint: &str,
    response: reqwest::Response,
) -> Result<T, ApiError> {
    let status = response.status();
    if !status.is_success() {
        return Err(ApiError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
        });
    }
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|source| ApiError::Decode {
        endpoint: endpoint.to_string(),
        source,
    })
}

#[async_trait]
impl HubApi for HttpApi {
    async fn popular_stations(&self, limit: usize) -> Result<Vec<Station>, ApiError> {
        let url = self.endpoint(&["api", "stations", "popular"]);
        self.get_json(url, &[("limit", limit.to_string())]).await
    }

    async fn countries(&self) -> Result<Vec<Country>, ApiError> {
        let url = self.endpoint(&["api", "countries"]);
        self.get_json(url, &[]).await
    }

    async fn stations_by_country(
        &self,
        country: &str,
        limit: usize,
    ) -> Result<Vec<Station>, ApiError> {
        let url = self.endpoint(&["api", "stations", "by-country", country]);
        self.get_json(url, &[("limit", limit.to_string())]).await
    }

    async fn search_stations(&self, query: &str, limit: usize) -> Result<Vec<Station>, ApiError> {
        let url = self.endpoint(&["api", "stations", "search"]);
        self.get_json(url, &[("q", query.to_string()), ("limit", limit.to_string())])
            .await
    }

    async fn comments(
        &self,
        target_id: &str,
        target_type: TargetType,
    ) -> Result<Vec<Comment>, ApiError> {
        let url = self.endpoint(&["api", "comments", target_id]);
        self.get_json(url, &[("target_type", target_type.as_str().to_string())])
            .await
    }

    async fn post_comment(&self, comment: &NewComment) -> Result<(), ApiError> {
        let url = self.endpoint(&["api", "comments"]);
        let endpoint = url.path().to_string();
        debug!("POST {} target={}", endpoint, comment.target_id);
        let response = self.client.post(url).json(comment).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    async fn health(&self) -> Result<Health, ApiError> {
        let url = self.endpoint(&["api", "health"]);
        self.get_json(url, &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Path, Query},
        http::StatusCode,
        routing::get,
        Json, Router,
    };
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn station_json(id: &str, name: &str, country: &str) -> serde_json::Value {
        serde_json::json!({
            "stationuuid": id,
            "name": name,
            "country": country,
            "url": format!("http://{id}.example/stream"),
            "favicon": "",
            "votes": 10,
            "bitrate": 128,
            "tags": "pop"
        })
    }

    #[tokio::test]
    async fn popular_forwards_limit() {
        let app = Router::new().route(
            "/api/stations/popular",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q.get("limit").map(String::as_str), Some("30"));
                Json(vec![station_json("a", "Radio A", "US")])
            }),
        );
        let api = HttpApi::new(&serve(app).await).unwrap();
        let stations = api.popular_stations(30).await.unwrap();
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].name, "Radio A");
    }

    #[tokio::test]
    async fn by_country_encodes_path_segment() {
        let app = Router::new().route(
            "/api/stations/by-country/:country",
            get(|Path(country): Path<String>| async move {
                Json(vec![station_json("b", "Radio B", &country)])
            }),
        );
        let api = HttpApi::new(&serve(app).await).unwrap();
        let stations = api.stations_by_country("United States", 30).await.unwrap();
        assert_eq!(stations[0].country, "United States");
    }

    #[tokio::test]
    async fn health_reads_status() {
        let app = Router::new().route(
            "/api/health",
            get(|| async {
                Json(serde_json::json!({
                    "status": "healthy",
                    "timestamp": "2024-05-01T12:00:00"
                }))
            }),
        );
        let api = HttpApi::new(&serve(app).await).unwrap();
        let health = api.health().await.unwrap();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.timestamp.as_deref(), Some("2024-05-01T12:00:00"));
    }

    #[tokio::test]
    async fn search_sends_query_text() {
        let app = Router::new().route(
            "/api/stations/search",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                let text = q.get("q").cloned().unwrap_or_default();
                Json(vec![station_json("s", &text, "DE")])
            }),
        );
        let api = HttpApi::new(&serve(app).await).unwrap();
        let stations = api.search_stations("jazz & soul", 5).await.unwrap();
        assert_eq!(stations[0].name, "jazz & soul");
    }

    #[tokio::test]
    async fn comments_round_trip_through_backend() {
        let store: Arc<Mutex<Vec<serde_json::Value>>> = Arc::default();
        let post_store = store.clone();
        let get_store = store.clone();
        let app = Router::new()
            .route(
                "/api/comments",
                axum::routing::post(move |Json(body): Json<NewComment>| {
                    let store = post_store.clone();
                    async move {
                        let created = serde_json::json!({
                            "id": "c1",
                            "content": body.content,
                            "author": body.author,
                            "target_id": body.target_id,
                            "target_type": body.target_type,
                            "timestamp": "2024-05-01T12:00:00.000000"
                        });
                        store.lock().unwrap().push(created.clone());
                        Json(created)
                    }
                }),
            )
            .route(
                "/api/comments/:target_id",
                get(
                    move |Path(target_id): Path<String>,
                          Query(q): Query<HashMap<String, String>>| {
                        let store = get_store.clone();
                        async move {
                            assert_eq!(q.get("target_type").map(String::as_str), Some("station"));
                            let items: Vec<_> = store
                                .lock()
                                .unwrap()
                                .iter()
                                .filter(|c| c["target_id"] == target_id.as_str())
                                .cloned()
                                .collect();
                            Json(items)
                        }
                    },
                ),
            );
        let api = HttpApi::new(&serve(app).await).unwrap();
        api.post_comment(&NewComment {
            content: "Great station!".into(),
            author: "Anonymous".into(),
            target_id: "a".into(),
            target_type: TargetType::Station,
        })
        .await
        .unwrap();

        let thread = api.comments("a", TargetType::Station).await.unwrap();
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].content, "Great station!");
        assert!(api.comments("b", TargetType::Station).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn server_error_maps_to_status() {
        let app = Router::new().route(
            "/api/countries",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let api = HttpApi::new(&serve(app).await).unwrap();
        match api.countries().await {
            Err(ApiError::Status { status, .. }) => assert_eq!(status, 500),
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_body_maps_to_decode() {
        let app = Router::new().route("/api/countries", get(|| async { "not json" }));
        let api = HttpApi::new(&serve(app).await).unwrap();
        assert!(matches!(
            api.countries().await,
            Err(ApiError::Decode { .. })
        ));
    }

    #[test]
    fn base_path_is_preserved() {
        let api = HttpApi::new("http://hub.example/backend/").unwrap();
        let url = api.endpoint(&["api", "countries"]);
        assert_eq!(url.as_str(), "http://hub.example/backend/api/countries");
    }

    #[test]
    fn rejects_non_hierarchical_base() {
        assert!(matches!(
            HttpApi::new("mailto:someone@example.com"),
            Err(ApiError::BaseUrl { .. })
        ));
        assert!(HttpApi::new("not a url").is_err());
    }
}
