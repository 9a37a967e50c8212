//! 工具参数结构
//!
//! 每个工具先把 JSON params 反序列化为这里的结构再执行；schema 由 schemars 从同一结构生成，
//! 保证 catalog 中展示的参数格式与实际校验一致。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::core::ToolError;

/// 反序列化参数；失败即 InvalidParams
pub fn parse<T: DeserializeOwned>(params: Value) -> Result<T, ToolError> {
    let params = if params.is_null() { Value::Object(Default::default()) } else { params };
    Ok(serde_json::from_value(params)?)
}

/// 参数结构的 JSON Schema
pub fn schema<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

fn default_title() -> String {
    "Order Update".to_string()
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct NotifyCustomerParams {
    /// 设备推送令牌
    #[serde(default)]
    pub fcm_token: Option<String>,
    pub message: String,
    #[serde(default)]
    pub voucher: bool,
    #[serde(default = "default_title")]
    pub title: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct NotifyBothParams {
    #[serde(default)]
    pub driver_token: Option<String>,
    #[serde(default)]
    pub passenger_token: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct NotifyResolutionParams {
    #[serde(default)]
    pub driver_token: Option<String>,
    #[serde(default)]
    pub customer_token: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct OrderParams {
    pub order_id: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct EvidenceParams {
    pub order_id: String,
    /// 图片引用：data: URL、文件路径或 http(s) 地址
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DriverParams {
    pub driver_id: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MerchantParams {
    pub merchant_id: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PackagingFeedbackParams {
    pub merchant_id: String,
    pub feedback: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ContactRecipientParams {
    pub recipient_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SafeDropParams {
    pub address: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RerouteParams {
    pub driver_id: String,
    pub driver_lat: f64,
    pub driver_lon: f64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AssignParams {
    pub driver_id: String,
    pub driver_lat: f64,
    pub driver_lon: f64,
    #[serde(default)]
    pub radius_km: Option<f64>,
    #[serde(default)]
    pub max_total_minutes: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FlightParams {
    pub flight_no: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct LockerSearchParams {
    pub place_name: String,
    #[serde(default)]
    pub radius_m: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct NearbySearchParams {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub radius_m: Option<u32>,
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub included_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct NearbyMerchantsParams {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub radius_m: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RouteParams {
    /// 起点地名或 "lat,lon"
    #[serde(default)]
    pub origin_any: Option<String>,
    #[serde(default)]
    pub dest_any: Option<String>,
    /// DRIVE / TWO_WHEELER / WALK / BICYCLE / TRANSIT
    #[serde(default)]
    pub travel_mode: Option<String>,
    #[serde(default)]
    pub scenario_text: Option<String>,
}

/// 只需坐标的查询（天气、空气质量、花粉）
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct LatLonParams {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TimeZoneParams {
    pub lat: f64,
    pub lon: f64,
    /// Unix 秒；缺省为当前时间
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GeocodeParams {
    pub query: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PlaceDetailsParams {
    pub place_id: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MarkPlacedParams {
    pub locker_id: String,
    pub order_id: String,
}

fn default_interpolate() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RoadsSnapParams {
    /// [[lat, lon], ...]
    pub points: Vec<Vec<f64>>,
    #[serde(default = "default_interpolate")]
    pub interpolate: bool,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RouteMatrixParams {
    /// 每项为 [lat, lon] 或地名
    pub origins: Vec<Value>,
    pub destinations: Vec<Value>,
    #[serde(default)]
    pub travel_mode: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_rejects_wrong_shape() {
        let err = parse::<RerouteParams>(json!({"driver_id": "d1", "driver_lat": "north"})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }

    #[test]
    fn test_parse_fills_defaults() {
        let p: NotifyCustomerParams = parse(json!({"fcm_token": null, "message": "hi"})).unwrap();
        assert_eq!(p.title, "Order Update");
        assert!(!p.voucher);
        assert!(p.fcm_token.is_none());
        let e: EvidenceParams = parse(json!({"order_id": "o1", "notes": null})).unwrap();
        assert!(e.images.is_empty());
        let r: RoadsSnapParams = parse(json!({"points": [[12.9, 77.6]]})).unwrap();
        assert!(r.interpolate);
    }

    #[test]
    fn test_schema_lists_fields() {
        let s = schema::<RerouteParams>();
        let props = s["properties"].as_object().unwrap();
        assert!(props.contains_key("driver_lat"));
        assert!(s["required"].as_array().unwrap().contains(&json!("driver_id")));
    }
}
