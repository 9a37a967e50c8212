//! Google Maps Platform 客户端（Geocoding / Places (New) / Routes / Roads / Time Zone，
//! 以及同一把 Key 的 Weather / Air Quality / Pollen）
//!
//! 只负责 HTTP 往返与状态检查，结果整形留给各工具。未配置 API Key 时所有调用返回 Unavailable。

use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};

use crate::core::{GeoPoint, ToolError};

const GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";
const PLACES_NEARBY_URL: &str = "https://places.googleapis.com/v1/places:searchNearby";
const PLACES_TEXT_URL: &str = "https://places.googleapis.com/v1/places:searchText";
const PLACE_DETAILS_URL: &str = "https://places.googleapis.com/v1/places";
const ROUTES_URL: &str = "https://routes.googleapis.com/directions/v2:computeRoutes";
const ROUTE_MATRIX_URL: &str = "https://routes.googleapis.com/distanceMatrix/v2:computeRouteMatrix";
const ROADS_SNAP_URL: &str = "https://roads.googleapis.com/v1/snapToRoads";
const TIME_ZONE_URL: &str = "https://maps.googleapis.com/maps/api/timezone/json";
pub const WEATHER_URL: &str = "https://weather.googleapis.com/v1/currentConditions:lookup";
pub const AIR_QUALITY_URL: &str = "https://airquality.googleapis.com/v1/currentConditions:lookup";
pub const POLLEN_URL: &str = "https://pollen.googleapis.com/v1/forecast:lookup";

pub struct MapsClient {
    client: Client,
    api_key: Option<String>,
}

impl MapsClient {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();
        Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    fn key(&self) -> Result<&str, ToolError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ToolError::Unavailable("tools.google_maps_api_key not configured".into()))
    }

    /// 地名 → 坐标；无结果时 Ok(None)
    pub async fn geocode(&self, address: &str) -> Result<Option<GeoPoint>, ToolError> {
        let key = self.key()?;
        let data: Value = self
            .client
            .get(GEOCODE_URL)
            .query(&[("address", address), ("key", key)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let loc = &data["results"][0]["geometry"]["location"];
        match (loc["lat"].as_f64(), loc["lng"].as_f64()) {
            (Some(lat), Some(lon)) => Ok(Some(GeoPoint(lat, lon))),
            _ => {
                tracing::warn!(address = %address, status = %data["status"], "geocode returned no result");
                Ok(None)
            }
        }
    }

    /// places:searchNearby，返回原始 places 数组
    pub async fn search_nearby(
        &self,
        center: GeoPoint,
        radius_m: u32,
        included_types: &[&str],
        field_mask: &str,
    ) -> Result<Vec<Value>, ToolError> {
        let key = self.key()?;
        let mut body = json!({
            "maxResultCount": 20,
            "locationRestriction": {
                "circle": {
                    "center": {"latitude": center.lat(), "longitude": center.lon()},
                    "radius": radius_m as f64,
                }
            }
        });
        if !included_types.is_empty() {
            body["includedPrimaryTypes"] = json!(included_types);
        }
        let resp = self
            .client
            .post(PLACES_NEARBY_URL)
            .header("X-Goog-Api-Key", key)
            .header("X-Goog-FieldMask", field_mask)
            .json(&body)
            .send()
            .await?;
        let data = checked_json(resp, "places").await?;
        Ok(data["places"].as_array().cloned().unwrap_or_default())
    }

    /// places:searchText，以 center 为偏好区域做关键词检索
    pub async fn search_text(
        &self,
        query: &str,
        center: GeoPoint,
        radius_m: u32,
        field_mask: &str,
    ) -> Result<Vec<Value>, ToolError> {
        let key = self.key()?;
        let body = json!({
            "textQuery": query,
            "locationBias": {
                "circle": {
                    "center": {"latitude": center.lat(), "longitude": center.lon()},
                    "radius": radius_m as f64,
                }
            }
        });
        let resp = self
            .client
            .post(PLACES_TEXT_URL)
            .header("X-Goog-Api-Key", key)
            .header("X-Goog-FieldMask", field_mask)
            .json(&body)
            .send()
            .await?;
        let data = checked_json(resp, "places").await?;
        Ok(data["places"].as_array().cloned().unwrap_or_default())
    }

    /// directions/v2:computeRoutes（TRAFFIC_AWARE）
    pub async fn compute_routes(
        &self,
        origin: &str,
        dest: &str,
        travel_mode: &str,
        alternatives: bool,
        field_mask: &str,
    ) -> Result<Vec<Value>, ToolError> {
        let key = self.key()?;
        let mut body = json!({
            "origin": {"address": origin},
            "destination": {"address": dest},
            "travelMode": travel_mode,
            "computeAlternativeRoutes": alternatives,
        });
        // 路况感知只对机动车模式有效
        if matches!(travel_mode, "DRIVE" | "TWO_WHEELER") {
            body["routingPreference"] = json!("TRAFFIC_AWARE");
        }
        let resp = self
            .client
            .post(ROUTES_URL)
            .header("X-Goog-Api-Key", key)
            .header("X-Goog-FieldMask", field_mask)
            .json(&body)
            .send()
            .await?;
        let data = checked_json(resp, "routes").await?;
        Ok(data["routes"].as_array().cloned().unwrap_or_default())
    }

    /// distanceMatrix/v2:computeRouteMatrix；返回矩阵元素数组（每项含 originIndex / destinationIndex）
    pub async fn compute_route_matrix(
        &self,
        origins: &[GeoPoint],
        destinations: &[GeoPoint],
        travel_mode: &str,
    ) -> Result<Vec<Value>, ToolError> {
        let key = self.key()?;
        let waypoint = |p: &GeoPoint| {
            json!({"waypoint": {"location": {"latLng": {"latitude": p.lat(), "longitude": p.lon()}}}})
        };
        let mut body = json!({
            "origins": origins.iter().map(waypoint).collect::<Vec<_>>(),
            "destinations": destinations.iter().map(waypoint).collect::<Vec<_>>(),
            "travelMode": travel_mode,
        });
        if matches!(travel_mode, "DRIVE" | "TWO_WHEELER") {
            body["routingPreference"] = json!("TRAFFIC_AWARE");
        }
        let resp = self
            .client
            .post(ROUTE_MATRIX_URL)
            .header("X-Goog-Api-Key", key)
            .header(
                "X-Goog-FieldMask",
                "originIndex,destinationIndex,duration,staticDuration,distanceMeters,condition",
            )
            .json(&body)
            .send()
            .await?;
        // 该接口直接返回 JSON 数组
        match checked_json(resp, "route matrix").await? {
            Value::Array(elements) => Ok(elements),
            _ => Ok(Vec::new()),
        }
    }

    /// places/{id}：单个地点详情
    pub async fn place_details(&self, place_id: &str, field_mask: &str) -> Result<Value, ToolError> {
        let key = self.key()?;
        let resp = self
            .client
            .get(format!("{PLACE_DETAILS_URL}/{place_id}"))
            .header("X-Goog-Api-Key", key)
            .header("X-Goog-FieldMask", field_mask)
            .send()
            .await?;
        checked_json(resp, "place details").await
    }

    /// roads snapToRoads
    pub async fn snap_to_roads(&self, points: &[GeoPoint], interpolate: bool) -> Result<Vec<Value>, ToolError> {
        let key = self.key()?;
        let path = points
            .iter()
            .map(|p| format!("{},{}", p.lat(), p.lon()))
            .collect::<Vec<_>>()
            .join("|");
        let interpolate = if interpolate { "true" } else { "false" };
        let resp = self
            .client
            .get(ROADS_SNAP_URL)
            .query(&[("path", path.as_str()), ("interpolate", interpolate), ("key", key)])
            .send()
            .await?;
        let data = checked_json(resp, "roads").await?;
        Ok(data["snappedPoints"].as_array().cloned().unwrap_or_default())
    }

    /// Time Zone API；timestamp 为 Unix 秒
    pub async fn time_zone(&self, at: GeoPoint, timestamp: i64) -> Result<Value, ToolError> {
        let key = self.key()?;
        let location = format!("{},{}", at.lat(), at.lon());
        let timestamp = timestamp.to_string();
        let data: Value = self
            .client
            .get(TIME_ZONE_URL)
            .query(&[("location", location.as_str()), ("timestamp", timestamp.as_str()), ("key", key)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(data)
    }

    /// Weather / Air Quality / Pollen 共用的按坐标查询（GET，location.latitude / location.longitude）
    pub async fn lookup_at(&self, url: &str, at: GeoPoint, api: &str) -> Result<Value, ToolError> {
        let key = self.key()?;
        let lat = at.lat().to_string();
        let lon = at.lon().to_string();
        let resp = self
            .client
            .get(url)
            .query(&[("location.latitude", lat.as_str()), ("location.longitude", lon.as_str()), ("key", key)])
            .send()
            .await?;
        checked_json(resp, api).await
    }
}

async fn checked_json(resp: reqwest::Response, api: &str) -> Result<Value, ToolError> {
    let status = resp.status();
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    if !status.is_success() {
        let detail = body["error"]["message"].as_str().unwrap_or("no detail");
        return Err(ToolError::Upstream(format!("{api} {status}: {detail}")));
    }
    Ok(body)
}

/// Routes API 的时长字符串（"1234s"）→ 秒
pub fn duration_secs(v: &Value) -> Option<f64> {
    v.as_str()?.trim_end_matches('s').parse::<f64>().ok()
}

/// 按评分、评论数排序（均降序）后截取前 n 个
pub fn top_rated(mut places: Vec<Value>, n: usize) -> Vec<Value> {
    let score = |p: &Value| {
        let rating = p["rating"].as_f64().unwrap_or(0.0);
        let count = p["userRatingCount"].as_f64().unwrap_or(0.0);
        (rating, (count + 1.0).ln())
    };
    places.sort_by(|a, b| {
        let (ra, ca) = score(a);
        let (rb, cb) = score(b);
        rb.total_cmp(&ra).then(cb.total_cmp(&ca))
    });
    places.truncate(n);
    places
}

/// Places (New) 条目 → 统一的候选结构
pub fn place_summary(p: &Value) -> Value {
    json!({
        "id": p["id"],
        "name": p["displayName"]["text"],
        "address": p["formattedAddress"],
        "rating": p["rating"],
        "user_ratings_total": p["userRatingCount"],
        "open_now": p["currentOpeningHours"]["openNow"],
        "lat": p["location"]["latitude"],
        "lon": p["location"]["longitude"],
    })
}
