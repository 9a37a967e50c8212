//! 路线工具：check_traffic / calculate_alternative_route（Routes API）
//!
//! 起终点只接受可读地名；参数里没有时从 scenario_text 中解析 "origin=A, dest=B" 或 "A to B"。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::context::{only_place_name, parse_route_text};
use crate::core::ToolError;
use crate::tools::maps::{duration_secs, MapsClient};
use crate::tools::params::{self, RouteParams};
use crate::tools::{Observation, Tool};

const TRAFFIC_MASK: &str = "routes.duration,routes.staticDuration,routes.distanceMeters";
const ALTERNATIVES_MASK: &str =
    "routes.duration,routes.distanceMeters,routes.routeLabels,routes.polyline.encodedPolyline";

/// 解析后的起终点与出行方式
#[derive(Debug, Clone, PartialEq)]
pub struct RouteQuery {
    pub origin: String,
    pub dest: String,
    pub travel_mode: String,
}

impl RouteQuery {
    pub fn from_params(p: &RouteParams) -> Result<Self, ToolError> {
        let mut origin = p.origin_any.as_deref().and_then(only_place_name).map(String::from);
        let mut dest = p.dest_any.as_deref().and_then(only_place_name).map(String::from);
        if origin.is_none() || dest.is_none() {
            if let Some((o, d)) = p.scenario_text.as_deref().and_then(parse_route_text) {
                origin = origin.or(Some(o));
                dest = dest.or(Some(d));
            }
        }
        match (origin, dest) {
            (Some(origin), Some(dest)) => Ok(Self {
                origin,
                dest,
                travel_mode: travel_mode(p.travel_mode.as_deref()),
            }),
            _ => Err(ToolError::InvalidParams("missing_place_names".into())),
        }
    }
}

/// 归一化为 Routes API 的 travelMode
pub fn travel_mode(raw: Option<&str>) -> String {
    let mode = match raw.unwrap_or("DRIVE").trim().to_uppercase().as_str() {
        "WALK" | "WALKING" => "WALK",
        "BIKE" | "BICYCLE" | "BICYCLING" => "BICYCLE",
        "TRANSIT" => "TRANSIT",
        "TWO_WHEELER" => "TWO_WHEELER",
        _ => "DRIVE",
    };
    mode.to_string()
}

fn minutes(secs: f64) -> i64 {
    (secs / 60.0).round() as i64
}

/// 首条路线的路况延误：duration 与 staticDuration 之差（分钟，不小于 0）
pub fn traffic_summary(routes: &[Value]) -> Option<Value> {
    let r = routes.first()?;
    let traffic = duration_secs(&r["duration"])?;
    let baseline = duration_secs(&r["staticDuration"]).unwrap_or(traffic);
    Some(json!({
        "durationMin": minutes(baseline),
        "durationTrafficMin": minutes(traffic),
        "delayMin": minutes((traffic - baseline).max(0.0)),
        "distanceKm": (r["distanceMeters"].as_f64().unwrap_or(0.0) / 10.0).round() / 100.0,
    }))
}

/// 默认路线与最快路线之差即为改道收益
pub fn alternatives_summary(routes: &[Value]) -> Option<Value> {
    let mut default_min = None;
    let mut best_min = i64::MAX;
    let mut out = Vec::new();
    for r in routes {
        let Some(secs) = duration_secs(&r["duration"]) else {
            continue;
        };
        let duration = minutes(secs);
        let label = r["routeLabels"][0].as_str().unwrap_or("DEFAULT_ROUTE");
        if label == "DEFAULT_ROUTE" && default_min.is_none() {
            default_min = Some(duration);
        }
        best_min = best_min.min(duration);
        out.push(json!({
            "summary": label,
            "durationMin": duration,
            "distanceKm": (r["distanceMeters"].as_f64().unwrap_or(0.0) / 100.0).round() / 10.0,
            "polyline": r["polyline"]["encodedPolyline"],
        }));
    }
    if out.is_empty() {
        return None;
    }
    let improvement = (default_min.unwrap_or(best_min) - best_min).max(0);
    Some(json!({"improvementMin": improvement, "bestMin": best_min, "routes": out}))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOp {
    Traffic,
    Alternatives,
}

pub struct RouteTool {
    op: RouteOp,
    maps: Arc<MapsClient>,
}

impl RouteTool {
    pub fn new(op: RouteOp, maps: Arc<MapsClient>) -> Self {
        Self { op, maps }
    }
}

#[async_trait]
impl Tool for RouteTool {
    fn name(&self) -> &str {
        match self.op {
            RouteOp::Traffic => "check_traffic",
            RouteOp::Alternatives => "calculate_alternative_route",
        }
    }

    fn description(&self) -> &str {
        match self.op {
            RouteOp::Traffic => "Traffic-aware ETA and delay between two place names.",
            RouteOp::Alternatives => "Main and alternate routes; reports minutes saved by the fastest.",
        }
    }

    fn parameters_schema(&self) -> Value {
        params::schema::<RouteParams>()
    }

    async fn invoke(&self, params: Value) -> Result<Observation, ToolError> {
        let p: RouteParams = params::parse(params)?;
        let q = RouteQuery::from_params(&p)?;
        let (mask, alternatives) = match self.op {
            RouteOp::Traffic => (TRAFFIC_MASK, false),
            RouteOp::Alternatives => (ALTERNATIVES_MASK, true),
        };
        let routes = self
            .maps
            .compute_routes(&q.origin, &q.dest, &q.travel_mode, alternatives, mask)
            .await?;
        let summary = match self.op {
            RouteOp::Traffic => traffic_summary(&routes),
            RouteOp::Alternatives => alternatives_summary(&routes),
        };
        let Some(summary) = summary else {
            return Ok(Observation::error("no_routes_found")
                .with("origin_place", q.origin)
                .with("dest_place", q.dest));
        };
        let mut obs = Observation::from_value(summary);
        obs.insert("status", "ok");
        obs.insert("origin_place", q.origin);
        obs.insert("dest_place", q.dest);
        obs.insert("mode", q.travel_mode.to_lowercase());
        Ok(obs)
    }
}
