// src/remote/http.rs - HTTP/JSON implementation of the simulation service
//
// Speaks the REST layout of the simulation backend:
//   scenarios/                      GET  (list, optional DRF pagination)
//   scenarios/{id}/                 GET
//   simulations/                    POST {"scenario": id}
//   simulations/{id}/               GET
//   simulations/{id}/transcript/    GET  {"transcript": [...]}
//   simulations/{id}/send_message/  POST {"content": text}
//   simulations/{id}/end_simulation/ POST
//   simulations/{id}/live_metrics/  GET
//   simulations/{id}/analysis/      GET
//
// 404 maps to `NotFound`; any other failure is a `RemoteFailure`.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use super::{EndSessionAck, ExchangeResult, MessagePage, ScenarioFilter, SimulationService};
use crate::infra::config::RemoteConfig;
use crate::infra::errors::{ResourceKind, SimError};
use crate::session::types::{LiveMetrics, Message, Scenario, Session, SessionAnalysis};

/// Guard against a misbehaving `next` chain on scenario listing.
const MAX_LIST_PAGES: usize = 50;

pub struct HttpSimulationService {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

/// Either a bare JSON array or a DRF-style paginated envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Paged {
        results: Vec<T>,
        #[serde(default)]
        next: Option<String>,
    },
    Plain(Vec<T>),
}

/// Transcript action body. Entries may carry extra annotations, which are ignored.
#[derive(Deserialize)]
struct TranscriptBody {
    #[serde(default)]
    transcript: Vec<Message>,
}

impl<T> Listing<T> {
    fn into_parts(self) -> (Vec<T>, Option<String>) {
        match self {
            Listing::Paged { results, next } => (results, next),
            Listing::Plain(items) => (items, None),
        }
    }
}

impl HttpSimulationService {
    pub fn new(config: &RemoteConfig) -> Result<Self, SimError> {
        let base_url = normalize_base_url(&config.base_url)?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(format!("simcoach/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SimError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token: config.token.clone(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, SimError> {
        self.base_url
            .join(path)
            .map_err(|e| SimError::Config(format!("Invalid endpoint '{path}': {e}")))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request and decode its JSON body. `subject` names the resource
    /// a 404 refers to.
    async fn fetch<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        subject: (ResourceKind, &str),
        what: &str,
    ) -> Result<T, SimError> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| transport_error(what, e))?;

        let status = response.status();
        if let Some(err) = status_error(status, subject, what) {
            return Err(err);
        }

        response.json::<T>().await.map_err(|e| SimError::RemoteFailure {
            message: format!("{what}: malformed response body: {e}"),
            status: Some(status.as_u16()),
            timed_out: e.is_timeout(),
        })
    }
}

#[async_trait]
impl SimulationService for HttpSimulationService {
    async fn list_scenarios(&self, filter: &ScenarioFilter) -> Result<Vec<Scenario>, SimError> {
        let mut url = self.endpoint("scenarios/")?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(ref category) = filter.category {
                query.append_pair("category", category);
            }
            if let Some(difficulty) = filter.difficulty {
                query.append_pair("difficulty", difficulty.as_str());
            }
            if let Some(ref search) = filter.search {
                query.append_pair("search", search);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        let mut scenarios = Vec::new();
        let mut next = Some(url);
        let mut pages = 0;
        while let Some(page_url) = next.take() {
            let listing: Listing<Scenario> = self
                .fetch(
                    self.client.get(page_url),
                    (ResourceKind::Scenario, "*"),
                    "list scenarios",
                )
                .await?;
            let (items, next_url) = listing.into_parts();
            scenarios.extend(items);

            pages += 1;
            if pages >= MAX_LIST_PAGES {
                tracing::warn!("Scenario listing exceeded {MAX_LIST_PAGES} pages, truncating");
                break;
            }
            next = match next_url {
                Some(raw) => Some(Url::parse(&raw).map_err(|e| {
                    SimError::remote(format!("list scenarios: invalid next link '{raw}': {e}"))
                })?),
                None => None,
            };
        }

        tracing::debug!("Listed {} scenario(s)", scenarios.len());
        Ok(scenarios)
    }

    async fn get_scenario(&self, scenario_id: &str) -> Result<Scenario, SimError> {
        let url = self.endpoint(&format!("scenarios/{scenario_id}/"))?;
        self.fetch(
            self.client.get(url),
            (ResourceKind::Scenario, scenario_id),
            "get scenario",
        )
        .await
    }

    async fn create_session(&self, scenario_id: &str) -> Result<Session, SimError> {
        let url = self.endpoint("simulations/")?;
        self.fetch(
            self.client
                .post(url)
                .json(&serde_json::json!({ "scenario": scenario_id })),
            (ResourceKind::Scenario, scenario_id),
            "create session",
        )
        .await
    }

    async fn get_session(&self, session_id: &str) -> Result<Session, SimError> {
        let url = self.endpoint(&format!("simulations/{session_id}/"))?;
        self.fetch(
            self.client.get(url),
            (ResourceKind::Session, session_id),
            "get session",
        )
        .await
    }

    async fn get_messages(&self, session_id: &str, page: u32) -> Result<MessagePage, SimError> {
        // The transcript comes back whole on the first page.
        if page > 1 {
            return Ok(MessagePage::default());
        }
        let url = self.endpoint(&format!("simulations/{session_id}/transcript/"))?;
        let body: TranscriptBody = self
            .fetch(
                self.client.get(url),
                (ResourceKind::Session, session_id),
                "get transcript",
            )
            .await?;
        Ok(MessagePage {
            messages: body.transcript,
            next_page: None,
        })
    }

    async fn send_message(&self, session_id: &str, text: &str) -> Result<ExchangeResult, SimError> {
        let url = self.endpoint(&format!("simulations/{session_id}/send_message/"))?;
        self.fetch(
            self.client
                .post(url)
                .json(&serde_json::json!({ "content": text })),
            (ResourceKind::Session, session_id),
            "send message",
        )
        .await
    }

    async fn end_session(&self, session_id: &str) -> Result<EndSessionAck, SimError> {
        let url = self.endpoint(&format!("simulations/{session_id}/end_simulation/"))?;
        self.fetch(
            self.client.post(url),
            (ResourceKind::Session, session_id),
            "end session",
        )
        .await
    }

    async fn live_metrics(&self, session_id: &str) -> Result<LiveMetrics, SimError> {
        let url = self.endpoint(&format!("simulations/{session_id}/live_metrics/"))?;
        self.fetch(
            self.client.get(url),
            (ResourceKind::Session, session_id),
            "live metrics",
        )
        .await
    }

    async fn get_analysis(&self, session_id: &str) -> Result<SessionAnalysis, SimError> {
        let url = self.endpoint(&format!("simulations/{session_id}/analysis/"))?;
        self.fetch(
            self.client.get(url),
            (ResourceKind::Session, session_id),
            "get analysis",
        )
        .await
    }
}

/// Parse the base URL and make sure relative joins append to its path.
fn normalize_base_url(raw: &str) -> Result<Url, SimError> {
    let mut url =
        Url::parse(raw.trim()).map_err(|e| SimError::Config(format!("Invalid base_url '{raw}': {e}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn status_error(status: StatusCode, subject: (ResourceKind, &str), what: &str) -> Option<SimError> {
    if status.is_success() {
        return None;
    }
    if status == StatusCode::NOT_FOUND {
        let (kind, id) = subject;
        return Some(SimError::not_found(kind, id));
    }
    Some(SimError::RemoteFailure {
        message: format!("{what} returned {status}"),
        status: Some(status.as_u16()),
        timed_out: false,
    })
}

fn transport_error(what: &str, e: reqwest::Error) -> SimError {
    SimError::RemoteFailure {
        message: format!("{what}: {e}"),
        status: e.status().map(|s| s.as_u16()),
        timed_out: e.is_timeout(),
    }
}
