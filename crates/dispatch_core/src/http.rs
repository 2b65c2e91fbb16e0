//! JSON-over-HTTP implementation of every collaborator trait.
//!
//! One [`HttpBackend`] talks to the dispatch REST API. Requests carry the configured
//! bearer token and are bounded by the client timeout. Connection failures, timeouts and
//! 5xx responses surface as transient errors; 4xx and undecodable bodies are fatal.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::city::{CityProfileTable, WireCityProfile};
use crate::config::DispatchConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::geo::GridPoint;
use crate::order::{NewOrder, Order, OrderStatus};
use crate::providers::{
    BulkOrderFinder, CityProfileProvider, NearestVehicleFinder, OrderSearch, OrderStore,
    VehiclePositionProvider, VehicleSnapshot,
};

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    bearer_token: Option<String>,
    timeout: Duration,
}

#[derive(Deserialize)]
struct MovingFlag {
    moving: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AssignBody<'a> {
    vehicle_id: &'a str,
}

#[derive(Serialize)]
struct StatusBody<'a> {
    status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

impl HttpBackend {
    pub fn new(config: &DispatchConfig) -> DispatchResult<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|err| {
            DispatchError::InvalidPayload(format!("invalid base url `{}`: {err}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(DispatchError::InvalidPayload(format!(
                "base url `{}` cannot carry paths",
                config.base_url
            )));
        }
        let timeout = config.request_timeout();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| {
                DispatchError::Transport(format!("failed to build HTTP client: {err}"))
            })?;
        Ok(Self {
            client,
            base_url,
            bearer_token: config.bearer_token.clone(),
            timeout,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let builder = self.client.request(method, self.endpoint(segments));
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send and decode; `None` for `204 No Content` and `404 Not Found`.
    async fn send_optional<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> DispatchResult<Option<T>> {
        let response = builder.send().await.map_err(|err| self.transport_error(err))?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DispatchError::Backend {
                status: status.as_u16(),
                message: truncate(message),
            });
        }
        response
            .json::<Option<T>>()
            .await
            .map_err(|err| self.transport_error(err))
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> DispatchResult<T> {
        let response = builder.send().await.map_err(|err| self.transport_error(err))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DispatchError::Backend {
                status: status.as_u16(),
                message: truncate(message),
            });
        }
        response.json::<T>().await.map_err(|err| self.transport_error(err))
    }

    fn transport_error(&self, err: reqwest::Error) -> DispatchError {
        if err.is_timeout() {
            DispatchError::Timeout {
                operation: "http request",
                timeout: self.timeout,
            }
        } else if err.is_decode() {
            DispatchError::InvalidPayload(err.to_string())
        } else {
            DispatchError::Transport(err.to_string())
        }
    }
}

fn truncate(mut message: String) -> String {
    const MAX_LEN: usize = 512;
    if message.len() > MAX_LEN {
        let mut end = MAX_LEN;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    message
}

fn not_found_as_missing_order(order_id: &str, err: DispatchError) -> DispatchError {
    match err {
        DispatchError::Backend { status: 404, .. } => DispatchError::OrderNotFound(order_id.into()),
        other => other,
    }
}

#[async_trait]
impl CityProfileProvider for HttpBackend {
    async fn fetch_profiles(&self) -> DispatchResult<CityProfileTable> {
        let wire: BTreeMap<String, WireCityProfile> = self
            .send_json(self.request(Method::GET, &["cities", "profiles"]))
            .await?;
        CityProfileTable::from_wire(wire)
    }
}

#[async_trait]
impl NearestVehicleFinder for HttpBackend {
    async fn nearest_vehicle(
        &self,
        city_id: &str,
        pickup: GridPoint,
    ) -> DispatchResult<Option<VehicleSnapshot>> {
        let builder = self.request(Method::GET, &["vehicles", "nearest"]).query(&[
            ("cityId", city_id.to_string()),
            ("x", pickup.x.to_string()),
            ("y", pickup.y.to_string()),
        ]);
        self.send_optional(builder).await
    }
}

#[async_trait]
impl BulkOrderFinder for HttpBackend {
    async fn pending_orders(&self, search: &OrderSearch) -> DispatchResult<Vec<String>> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(city_id) = &search.city_id {
            query.push(("cityId", city_id.clone()));
        }
        if let Some(limit) = search.limit {
            query.push(("limit", limit.to_string()));
        }
        let builder = self
            .request(Method::GET, &["orders", "pending"])
            .query(&query);
        self.send_json(builder).await
    }
}

#[async_trait]
impl VehiclePositionProvider for HttpBackend {
    async fn snapshot(&self, vehicle_id: &str) -> DispatchResult<VehicleSnapshot> {
        self.send_json(self.request(Method::GET, &["vehicles", vehicle_id]))
            .await
    }

    async fn is_moving(&self, vehicle_id: &str) -> DispatchResult<bool> {
        let flag: MovingFlag = self
            .send_json(self.request(Method::GET, &["vehicles", vehicle_id, "moving"]))
            .await?;
        Ok(flag.moving)
    }
}

#[async_trait]
impl OrderStore for HttpBackend {
    async fn get(&self, order_id: &str) -> DispatchResult<Order> {
        self.send_json(self.request(Method::GET, &["orders", order_id]))
            .await
            .map_err(|err| not_found_as_missing_order(order_id, err))
    }

    async fn create(&self, order: NewOrder) -> DispatchResult<Order> {
        self.send_json(self.request(Method::POST, &["orders"]).json(&order))
            .await
    }

    async fn assign(&self, order_id: &str, vehicle_id: &str) -> DispatchResult<Order> {
        let builder = self
            .request(Method::PUT, &["orders", order_id, "vehicle"])
            .json(&AssignBody { vehicle_id });
        self.send_json(builder)
            .await
            .map_err(|err| not_found_as_missing_order(order_id, err))
    }

    async fn update_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        reason: Option<&str>,
    ) -> DispatchResult<Order> {
        let builder = self
            .request(Method::PUT, &["orders", order_id, "status"])
            .json(&StatusBody { status, reason });
        self.send_json(builder)
            .await
            .map_err(|err| not_found_as_missing_order(order_id, err))
    }
}
