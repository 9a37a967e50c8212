//! 环境工具：check_weather / air_quality / pollen_forecast / time_zone / geocode_place
//!
//! 天气、空气质量与花粉走 Google 的同名 API，与地图共用一把 Key；结果整形为扁平字段，
//! 原始响应放在 raw 里供排查。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::{GeoPoint, ToolError};
use crate::tools::maps::{MapsClient, AIR_QUALITY_URL, POLLEN_URL, WEATHER_URL};
use crate::tools::params::{self, GeocodeParams, LatLonParams, TimeZoneParams};
use crate::tools::{Observation, Tool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvOp {
    Weather,
    AirQuality,
    Pollen,
    TimeZone,
}

impl EnvOp {
    pub const ALL: [EnvOp; 4] = [EnvOp::Weather, EnvOp::AirQuality, EnvOp::Pollen, EnvOp::TimeZone];
}

/// currentConditions → 温度、风速与一句话天气
pub fn weather_summary(data: &Value) -> Value {
    let cc = &data["currentConditions"];
    // 新版接口把当前天气直接放在顶层
    let cc = if cc.is_null() { data } else { cc };
    json!({
        "tempC": cc["temperature"]["degrees"].as_f64().or_else(|| cc["temperature"]["value"].as_f64()),
        "temperatureUnit": cc["temperature"]["unit"].as_str().or_else(|| cc["temperature"]["unitCode"].as_str()),
        "windSpeed": cc["wind"]["speed"]["value"],
        "windUnit": cc["wind"]["speed"]["unit"].as_str().or_else(|| cc["wind"]["speed"]["unitCode"].as_str()),
        "shortText": cc["weatherCondition"]["description"]["text"].as_str().or_else(|| cc["shortPhrase"].as_str()),
        "raw": cc,
    })
}

/// 取 indexes 的第一项
pub fn air_quality_summary(data: &Value) -> Value {
    let aq = &data["indexes"][0];
    json!({
        "code": aq["code"],
        "aqi": aq["aqi"],
        "category": aq["category"],
        "dominantPollutant": aq["dominantPollutant"],
        "raw": data,
    })
}

pub fn time_zone_summary(data: &Value) -> Value {
    let id = data["timeZoneId"].as_str().filter(|s| !s.is_empty());
    json!({
        "timeZoneId": id,
        "timeZoneName": data["timeZoneName"],
        "rawOffset": data["rawOffset"],
        "dstOffset": data["dstOffset"],
        "status": data["status"],
        "found": id.is_some(),
    })
}

fn check_coordinates(lat: f64, lon: f64) -> Result<GeoPoint, ToolError> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err(ToolError::InvalidParams(format!("coordinates out of range: {lat},{lon}")));
    }
    Ok(GeoPoint(lat, lon))
}

pub struct EnvTool {
    op: EnvOp,
    maps: Arc<MapsClient>,
}

impl EnvTool {
    pub fn new(op: EnvOp, maps: Arc<MapsClient>) -> Self {
        Self { op, maps }
    }

    pub fn all(maps: Arc<MapsClient>) -> Vec<Self> {
        EnvOp::ALL.iter().map(|op| Self::new(*op, maps.clone())).collect()
    }
}

#[async_trait]
impl Tool for EnvTool {
    fn name(&self) -> &str {
        match self.op {
            EnvOp::Weather => "check_weather",
            EnvOp::AirQuality => "air_quality",
            EnvOp::Pollen => "pollen_forecast",
            EnvOp::TimeZone => "time_zone",
        }
    }

    fn description(&self) -> &str {
        match self.op {
            EnvOp::Weather => "Current weather at a coordinate (Google Weather API).",
            EnvOp::AirQuality => "Current air quality index at a coordinate (Air Quality API).",
            EnvOp::Pollen => "Pollen forecast at a coordinate (Pollen API).",
            EnvOp::TimeZone => "Time zone and UTC offsets at a coordinate (Time Zone API).",
        }
    }

    fn parameters_schema(&self) -> Value {
        match self.op {
            EnvOp::TimeZone => params::schema::<TimeZoneParams>(),
            _ => params::schema::<LatLonParams>(),
        }
    }

    async fn invoke(&self, params: Value) -> Result<Observation, ToolError> {
        let data = match self.op {
            EnvOp::TimeZone => {
                let p: TimeZoneParams = params::parse(params)?;
                let at = check_coordinates(p.lat, p.lon)?;
                let ts = p.timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp());
                time_zone_summary(&self.maps.time_zone(at, ts).await?)
            }
            op => {
                let p: LatLonParams = params::parse(params)?;
                let at = check_coordinates(p.lat, p.lon)?;
                match op {
                    EnvOp::Weather => weather_summary(&self.maps.lookup_at(WEATHER_URL, at, "weather").await?),
                    EnvOp::AirQuality => {
                        air_quality_summary(&self.maps.lookup_at(AIR_QUALITY_URL, at, "air quality").await?)
                    }
                    _ => json!({"found": true, "raw": self.maps.lookup_at(POLLEN_URL, at, "pollen").await?}),
                }
            }
        };
        Ok(Observation::from_value(data))
    }
}

/// geocode_place：地名 → 坐标
pub struct GeocodeTool {
    maps: Arc<MapsClient>,
}

impl GeocodeTool {
    pub fn new(maps: Arc<MapsClient>) -> Self {
        Self { maps }
    }
}

#[async_trait]
impl Tool for GeocodeTool {
    fn name(&self) -> &str {
        "geocode_place"
    }

    fn description(&self) -> &str {
        "Geocode a place name or address to coordinates."
    }

    fn parameters_schema(&self) -> Value {
        params::schema::<GeocodeParams>()
    }

    async fn invoke(&self, params: Value) -> Result<Observation, ToolError> {
        let p: GeocodeParams = params::parse(params)?;
        let query = p.query.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidParams("missing query".into()));
        }
        Ok(match self.maps.geocode(query).await? {
            Some(pt) => Observation::new()
                .with("found", true)
                .with("lat", pt.lat())
                .with("lon", pt.lon())
                .with("query", query),
            None => Observation::new().with("found", false).with("query", query),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn offline() -> Arc<MapsClient> {
        Arc::new(MapsClient::new(None, Duration::from_secs(1)))
    }

    #[test]
    fn test_weather_summary_reads_both_layouts() {
        let nested = weather_summary(&json!({
            "currentConditions": {
                "temperature": {"value": 31.5, "unitCode": "CELSIUS"},
                "wind": {"speed": {"value": 12, "unitCode": "KILOMETERS_PER_HOUR"}},
                "shortPhrase": "Heavy rain"
            }
        }));
        assert_eq!(nested["tempC"], 31.5);
        assert_eq!(nested["shortText"], "Heavy rain");

        let flat = weather_summary(&json!({
            "temperature": {"degrees": 24.0, "unit": "CELSIUS"},
            "weatherCondition": {"description": {"text": "Sunny"}},
        }));
        assert_eq!(flat["tempC"], 24.0);
        assert_eq!(flat["temperatureUnit"], "CELSIUS");
        assert_eq!(flat["shortText"], "Sunny");
        assert!(flat["windSpeed"].is_null());
    }

    #[test]
    fn test_air_quality_takes_first_index() {
        let s = air_quality_summary(&json!({
            "indexes": [
                {"code": "uaqi", "aqi": 61, "category": "Good air quality", "dominantPollutant": "pm25"},
                {"code": "ind_cpcb", "aqi": 140}
            ]
        }));
        assert_eq!(s["code"], "uaqi");
        assert_eq!(s["aqi"], 61);
        assert!(air_quality_summary(&json!({}))["aqi"].is_null());
    }

    #[test]
    fn test_time_zone_found_flag() {
        let s = time_zone_summary(&json!({"timeZoneId": "Asia/Kolkata", "rawOffset": 19800, "status": "OK"}));
        assert_eq!(s["found"], true);
        let s = time_zone_summary(&json!({"status": "ZERO_RESULTS"}));
        assert_eq!(s["found"], false);
    }

    #[tokio::test]
    async fn test_env_tools_validate_before_network() {
        let tools = EnvTool::all(offline());
        let names: Vec<_> = tools.iter().map(|t| t.name().to_string()).collect();
        assert_eq!(names, ["check_weather", "air_quality", "pollen_forecast", "time_zone"]);

        let err = tools[0].invoke(json!({"lat": 120.0, "lon": 80.0})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
        let err = tools[1].invoke(json!({"lat": 13.0, "lon": 80.2})).await.unwrap_err();
        assert!(matches!(err, ToolError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_geocode_requires_query() {
        let tool = GeocodeTool::new(offline());
        let err = tool.invoke(json!({"query": "  "})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
        let err = tool.invoke(json!({"query": "Chennai Central"})).await.unwrap_err();
        assert!(matches!(err, ToolError::Unavailable(_)));
    }
}
