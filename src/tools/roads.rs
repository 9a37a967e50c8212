//! 道路工具：roads_snap / compute_route_matrix

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::{GeoPoint, ToolError};
use crate::tools::maps::{duration_secs, MapsClient};
use crate::tools::params::{self, RoadsSnapParams, RouteMatrixParams};
use crate::tools::routes::travel_mode;
use crate::tools::{Observation, Tool};

/// snapToRoads 回显的点数上限
const MAX_SNAPPED: usize = 5;

/// Routes API 单次矩阵的元素上限（起点数 × 终点数）
const MAX_MATRIX_ELEMENTS: usize = 100;

pub struct RoadsSnapTool {
    maps: Arc<MapsClient>,
}

impl RoadsSnapTool {
    pub fn new(maps: Arc<MapsClient>) -> Self {
        Self { maps }
    }
}

#[async_trait]
impl Tool for RoadsSnapTool {
    fn name(&self) -> &str {
        "roads_snap"
    }

    fn description(&self) -> &str {
        "Snap GPS points to the nearest roads."
    }

    fn parameters_schema(&self) -> Value {
        params::schema::<RoadsSnapParams>()
    }

    async fn invoke(&self, params: Value) -> Result<Observation, ToolError> {
        let p: RoadsSnapParams = params::parse(params)?;
        if p.points.is_empty() || p.points.iter().any(|pt| pt.len() != 2) {
            return Err(ToolError::InvalidParams("invalid_points".into()));
        }
        let points: Vec<GeoPoint> = p.points.iter().map(|pt| GeoPoint(pt[0], pt[1])).collect();
        let mut snapped = self.maps.snap_to_roads(&points, p.interpolate).await?;
        snapped.truncate(MAX_SNAPPED);
        Ok(Observation::new()
            .with("count", snapped.len())
            .with("snappedPoints", snapped))
    }
}

pub struct RouteMatrixTool {
    maps: Arc<MapsClient>,
}

impl RouteMatrixTool {
    pub fn new(maps: Arc<MapsClient>) -> Self {
        Self { maps }
    }

    /// [lat, lon]、"lat,lon" 或地名（需地理编码）→ 坐标
    async fn coerce_point(&self, v: &Value) -> Result<Option<GeoPoint>, ToolError> {
        match v {
            Value::Array(pair) if pair.len() == 2 => Ok(pair[0].as_f64().zip(pair[1].as_f64()).map(|(a, b)| GeoPoint(a, b))),
            Value::String(s) if !s.trim().is_empty() => match GeoPoint::parse(s) {
                Some(pt) => Ok(Some(pt)),
                None => self.maps.geocode(s.trim()).await,
            },
            _ => Ok(None),
        }
    }

    async fn coerce_all(&self, values: &[Value]) -> Result<Option<Vec<GeoPoint>>, ToolError> {
        let mut out = Vec::with_capacity(values.len());
        for v in values {
            match self.coerce_point(v).await? {
                Some(pt) => out.push(pt),
                None => return Ok(None),
            }
        }
        Ok(Some(out))
    }
}

/// 矩阵元素 → 按 (origin, destination) 排序的扁平条目
pub fn matrix_summary(elements: &[Value]) -> Vec<Value> {
    let mut rows: Vec<Value> = elements
        .iter()
        .map(|e| {
            let secs = duration_secs(&e["duration"]);
            json!({
                "origin": e["originIndex"].as_u64().unwrap_or(0),
                "destination": e["destinationIndex"].as_u64().unwrap_or(0),
                "durationMin": secs.map(|s| (s / 60.0).round() as i64),
                "distanceKm": e["distanceMeters"].as_f64().map(|m| (m / 100.0).round() / 10.0),
                "routeExists": e["condition"].as_str().map(|c| c == "ROUTE_EXISTS").unwrap_or(secs.is_some()),
            })
        })
        .collect();
    rows.sort_by_key(|r| (r["origin"].as_u64().unwrap_or(0), r["destination"].as_u64().unwrap_or(0)));
    rows
}

#[async_trait]
impl Tool for RouteMatrixTool {
    fn name(&self) -> &str {
        "compute_route_matrix"
    }

    fn description(&self) -> &str {
        "Travel time and distance for every origin/destination pair (Routes API)."
    }

    fn parameters_schema(&self) -> Value {
        params::schema::<RouteMatrixParams>()
    }

    async fn invoke(&self, params: Value) -> Result<Observation, ToolError> {
        let p: RouteMatrixParams = params::parse(params)?;
        if p.origins.is_empty() || p.destinations.is_empty() {
            return Err(ToolError::InvalidParams("missing_origins_or_destinations".into()));
        }
        if p.origins.len() * p.destinations.len() > MAX_MATRIX_ELEMENTS {
            return Err(ToolError::InvalidParams(format!(
                "matrix too large: {} x {}",
                p.origins.len(),
                p.destinations.len()
            )));
        }
        let (Some(origins), Some(destinations)) =
            (self.coerce_all(&p.origins).await?, self.coerce_all(&p.destinations).await?)
        else {
            return Ok(Observation::error("bad_points"));
        };
        let mode = travel_mode(p.travel_mode.as_deref());
        let elements = self.maps.compute_route_matrix(&origins, &destinations, &mode).await?;
        let rows = matrix_summary(&elements);
        Ok(Observation::new()
            .with("status", "ok")
            .with("mode", mode.to_lowercase())
            .with("count", rows.len())
            .with("matrix", rows))
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
    fn test_matrix_summary_sorted_and_flattened() {
        let rows = matrix_summary(&[
            json!({"originIndex": 1, "destinationIndex": 0, "duration": "600s", "distanceMeters": 5200, "condition": "ROUTE_EXISTS"}),
            json!({"originIndex": 0, "destinationIndex": 0, "condition": "ROUTE_NOT_FOUND"}),
        ]);
        assert_eq!(rows[0]["origin"], 0);
        assert_eq!(rows[0]["routeExists"], false);
        assert!(rows[0]["durationMin"].is_null());
        assert_eq!(rows[1]["durationMin"], 10);
        assert_eq!(rows[1]["distanceKm"], 5.2);
    }

    #[tokio::test]
    async fn test_matrix_rejects_empty_and_bad_points() {
        let tool = RouteMatrixTool::new(offline());
        let err = tool.invoke(json!({"origins": [], "destinations": [[1.0, 2.0]]})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));

        let obs = tool
            .invoke(json!({"origins": [[13.0, 80.2]], "destinations": [{"lat": 1}]}))
            .await
            .unwrap();
        assert_eq!(obs.error_message(), Some("bad_points"));

        // 坐标齐全时才需要 Key
        let err = tool
            .invoke(json!({"origins": ["13.0,80.2"], "destinations": [[12.9, 77.6]]}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_snap_validates_point_shape() {
        let tool = RoadsSnapTool::new(offline());
        let err = tool.invoke(json!({"points": [[13.0]]})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
        let err = tool.invoke(json!({"points": [[13.0, 80.2]]})).await.unwrap_err();
        assert!(matches!(err, ToolError::Unavailable(_)));
    }
}
