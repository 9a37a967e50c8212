//! 附近地点工具：find_nearby_locker / places_search_nearby / get_nearby_merchants /
//! place_details / mark_as_placed

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::{GeoPoint, ToolError};
use crate::tools::maps::{place_summary, top_rated, MapsClient};
use crate::tools::params::{
    self, LockerSearchParams, MarkPlacedParams, NearbyMerchantsParams, NearbySearchParams, PlaceDetailsParams,
};
use crate::tools::{Observation, Tool};

/// 可代收包裹的地点类型
const LOCKER_TYPES: [&str; 2] = ["post_office", "convenience_store"];

const FIELD_MASK: &str = "places.id,places.displayName,places.formattedAddress,places.rating,\
places.userRatingCount,places.currentOpeningHours.openNow,places.location";

const MAX_RESULTS: usize = 5;

/// find_nearby_locker：地名地理编码后在半径内检索代收点
pub struct FindLockerTool {
    maps: Arc<MapsClient>,
    default_radius_m: u32,
}

impl FindLockerTool {
    pub fn new(maps: Arc<MapsClient>, default_radius_m: u32) -> Self {
        Self { maps, default_radius_m }
    }
}

#[async_trait]
impl Tool for FindLockerTool {
    fn name(&self) -> &str {
        "find_nearby_locker"
    }

    fn description(&self) -> &str {
        "Find up to 5 parcel-friendly locations (post offices, convenience stores) near a place name."
    }

    fn parameters_schema(&self) -> Value {
        params::schema::<LockerSearchParams>()
    }

    async fn invoke(&self, params: Value) -> Result<Observation, ToolError> {
        let p: LockerSearchParams = params::parse(params)?;
        let place = p.place_name.trim();
        if place.is_empty() {
            return Err(ToolError::InvalidParams("missing_place_name".into()));
        }
        let Some(center) = self.maps.geocode(place).await? else {
            return Ok(Observation::error("geocode_failed").with("lockers", json!([])));
        };
        let radius = p.radius_m.unwrap_or(self.default_radius_m);
        let raw = self.maps.search_nearby(center, radius, &LOCKER_TYPES, FIELD_MASK).await?;
        let lockers: Vec<Value> = top_rated(raw, MAX_RESULTS).iter().map(place_summary).collect();
        tracing::info!(place = %place, found = lockers.len(), "locker search");
        Ok(Observation::new()
            .with("status", "ok")
            .with("count", lockers.len())
            .with("lockers", lockers)
            .with("center", center_json(center))
            .with("query_place", place)
            .with("used_radius_m", radius))
    }
}

/// places_search_nearby：坐标附近按类型或关键词检索
pub struct NearbySearchTool {
    maps: Arc<MapsClient>,
    default_radius_m: u32,
}

impl NearbySearchTool {
    pub fn new(maps: Arc<MapsClient>, default_radius_m: u32) -> Self {
        Self { maps, default_radius_m }
    }
}

#[async_trait]
impl Tool for NearbySearchTool {
    fn name(&self) -> &str {
        "places_search_nearby"
    }

    fn description(&self) -> &str {
        "Find up to 5 nearby places around a coordinate by keyword or place types."
    }

    fn parameters_schema(&self) -> Value {
        params::schema::<NearbySearchParams>()
    }

    async fn invoke(&self, params: Value) -> Result<Observation, ToolError> {
        let p: NearbySearchParams = params::parse(params)?;
        let center = GeoPoint(p.lat, p.lon);
        let radius = p.radius_m.unwrap_or(self.default_radius_m);
        let keyword = p.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty());

        let raw = match (keyword, p.included_types.is_empty()) {
            (Some(kw), true) => self.maps.search_text(kw, center, radius, FIELD_MASK).await?,
            _ => {
                let types: Vec<&str> = if p.included_types.is_empty() {
                    LOCKER_TYPES.to_vec()
                } else {
                    p.included_types.iter().map(String::as_str).collect()
                };
                self.maps.search_nearby(center, radius, &types, FIELD_MASK).await?
            }
        };
        let places: Vec<Value> = top_rated(raw, MAX_RESULTS).iter().map(place_summary).collect();
        Ok(Observation::new()
            .with("count", places.len())
            .with("places", places)
            .with("center", center_json(center))
            .with("used_keyword", json!(keyword))
            .with("used_types", json!(p.included_types)))
    }
}

/// get_nearby_merchants：附近可替换的餐厅
pub struct NearbyMerchantsTool {
    maps: Arc<MapsClient>,
}

impl NearbyMerchantsTool {
    pub fn new(maps: Arc<MapsClient>) -> Self {
        Self { maps }
    }
}

#[async_trait]
impl Tool for NearbyMerchantsTool {
    fn name(&self) -> &str {
        "get_nearby_merchants"
    }

    fn description(&self) -> &str {
        "Find up to 5 alternate restaurants near the given coordinates."
    }

    fn parameters_schema(&self) -> Value {
        params::schema::<NearbyMerchantsParams>()
    }

    async fn invoke(&self, params: Value) -> Result<Observation, ToolError> {
        let p: NearbyMerchantsParams = params::parse(params)?;
        let center = GeoPoint(p.lat, p.lon);
        let raw = self
            .maps
            .search_nearby(center, p.radius_m.unwrap_or(2000), &["restaurant"], FIELD_MASK)
            .await?;
        let merchants: Vec<Value> = top_rated(raw, MAX_RESULTS).iter().map(place_summary).collect();
        Ok(Observation::new()
            .with("count", merchants.len())
            .with("merchants", merchants))
    }
}

const DETAILS_MASK: &str = "id,displayName,formattedAddress,nationalPhoneNumber,websiteUri,\
rating,userRatingCount,currentOpeningHours.openNow,priceLevel";

/// place_details：按 place id 查询电话、网站、营业状态
pub struct PlaceDetailsTool {
    maps: Arc<MapsClient>,
}

impl PlaceDetailsTool {
    pub fn new(maps: Arc<MapsClient>) -> Self {
        Self { maps }
    }
}

pub fn details_summary(p: &Value) -> Value {
    json!({
        "id": p["id"],
        "name": p["displayName"]["text"],
        "address": p["formattedAddress"],
        "phone": p["nationalPhoneNumber"],
        "website": p["websiteUri"],
        "rating": p["rating"],
        "userRatingCount": p["userRatingCount"],
        "openNow": p["currentOpeningHours"]["openNow"],
        "priceLevel": p["priceLevel"],
    })
}

#[async_trait]
impl Tool for PlaceDetailsTool {
    fn name(&self) -> &str {
        "place_details"
    }

    fn description(&self) -> &str {
        "Details (phone, website, opening state) of a place by its id."
    }

    fn parameters_schema(&self) -> Value {
        params::schema::<PlaceDetailsParams>()
    }

    async fn invoke(&self, params: Value) -> Result<Observation, ToolError> {
        let p: PlaceDetailsParams = params::parse(params)?;
        let id = p.place_id.trim();
        if id.is_empty() || id.contains('/') {
            return Err(ToolError::InvalidParams(format!("bad place_id: {:?}", p.place_id)));
        }
        let data = self.maps.place_details(id, DETAILS_MASK).await?;
        Ok(Observation::from_value(details_summary(&data)))
    }
}

/// mark_as_placed：记录订单已放入代收点（只记日志，无外部系统）
pub struct MarkPlacedTool;

#[async_trait]
impl Tool for MarkPlacedTool {
    fn name(&self) -> &str {
        "mark_as_placed"
    }

    fn description(&self) -> &str {
        "Mark an order as placed into the selected locker."
    }

    fn parameters_schema(&self) -> Value {
        params::schema::<MarkPlacedParams>()
    }

    async fn invoke(&self, params: Value) -> Result<Observation, ToolError> {
        let p: MarkPlacedParams = params::parse(params)?;
        if p.locker_id.trim().is_empty() || p.order_id.trim().is_empty() {
            return Err(ToolError::InvalidParams("locker_id and order_id are required".into()));
        }
        tracing::info!(order_id = %p.order_id, locker_id = %p.locker_id, "order placed into locker");
        Ok(Observation::new()
            .with("status", "ok")
            .with("order_id", p.order_id)
            .with("locker_id", p.locker_id))
    }
}

fn center_json(center: GeoPoint) -> Value {
    json!({"lat": center.lat(), "lon": center.lon()})
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn offline_maps() -> Arc<MapsClient> {
        Arc::new(MapsClient::new(None, Duration::from_secs(1)))
    }

    #[tokio::test]
    async fn test_blank_place_name_is_invalid() {
        let tool = FindLockerTool::new(offline_maps(), 1500);
        let err = tool.invoke(json!({"place_name": "  "})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_unconfigured_maps_is_unavailable() {
        let tool = NearbyMerchantsTool::new(offline_maps());
        let err = tool.invoke(json!({"lat": 12.9, "lon": 77.6})).await.unwrap_err();
        assert!(matches!(err, ToolError::Unavailable(_)));

        let tool = NearbySearchTool::new(offline_maps(), 1500);
        let err = tool.invoke(json!({"lat": 12.9, "lon": 77.6, "keyword": "parcel locker"})).await.unwrap_err();
        assert!(matches!(err, ToolError::Unavailable(_)));
    }

    #[test]
    fn test_details_summary() {
        let s = details_summary(&json!({
            "id": "p9",
            "displayName": {"text": "Anna Nagar Post Office"},
            "nationalPhoneNumber": "044 2626 0000",
            "currentOpeningHours": {"openNow": false}
        }));
        assert_eq!(s["name"], "Anna Nagar Post Office");
        assert_eq!(s["openNow"], false);
        assert!(s["website"].is_null());
    }

    #[tokio::test]
    async fn test_place_details_rejects_path_like_ids() {
        let tool = PlaceDetailsTool::new(offline_maps());
        let err = tool.invoke(json!({"place_id": "../x"})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_mark_as_placed() {
        let obs = MarkPlacedTool.invoke(json!({"locker_id": "L1", "order_id": "o7"})).await.unwrap();
        assert_eq!(obs.get("status"), Some(&json!("ok")));
        assert_eq!(obs.get("locker_id"), Some(&json!("L1")));
        assert!(MarkPlacedTool.invoke(json!({"locker_id": "", "order_id": "o7"})).await.is_err());
    }

    #[test]
    fn test_schema_requires_coordinates() {
        let tool = NearbySearchTool::new(offline_maps(), 1500);
        let schema = tool.parameters_schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("lat")));
        assert!(required.contains(&json!("lon")));
    }
}
