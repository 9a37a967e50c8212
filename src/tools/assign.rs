//! 订单簿：司机改派与短单分配
//!
//! 待分配订单来自 JSON 文件（`{"orders": [...]}`），未配置时使用内置示例。
//! 距离用 haversine，耗时按基准车速估算；分配后写回文件。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::core::ToolError;
use crate::tools::params::{self, AssignParams, MerchantParams, RerouteParams};
use crate::tools::{Observation, Tool};

/// 基准车速（km/h）
pub const BASELINE_SPEED_KMPH: f64 = 40.0;
pub const DEFAULT_RADIUS_KM: f64 = 6.0;
pub const DEFAULT_MAX_TOTAL_MINUTES: f64 = 25.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub status: String,
    pub pickup: Stop,
    pub dropoff: Stop,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OrdersFile {
    #[serde(default)]
    orders: Vec<Order>,
}

/// 分配结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub order: Order,
    pub dist_to_pickup_km: f64,
    pub job_minutes: f64,
    pub total_minutes: f64,
}

pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const R: f64 = 6371.0088;
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlmb = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlmb / 2.0).sin().powi(2);
    2.0 * R * a.sqrt().asin()
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// 按基准车速估算行程分钟数（保留一位小数）
pub fn estimate_trip_minutes(from: &Stop, to: &Stop) -> f64 {
    round1(haversine_km(from.lat, from.lon, to.lat, to.lon) / BASELINE_SPEED_KMPH * 60.0)
}

pub struct OrderBook {
    orders: Mutex<Vec<Order>>,
    path: Option<PathBuf>,
}

impl OrderBook {
    pub fn new(orders: Vec<Order>) -> Self {
        Self {
            orders: Mutex::new(orders),
            path: None,
        }
    }

    /// 从文件加载；文件不存在时为空订单簿，之后的分配会创建该文件
    pub async fn open(path: PathBuf) -> Result<Self, ToolError> {
        let orders = match tokio::fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str::<OrdersFile>(&text)
                .map_err(|e| ToolError::Failed(format!("orders file {}: {e}", path.display())))?
                .orders,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(ToolError::Failed(format!("orders file {}: {e}", path.display()))),
        };
        Ok(Self {
            orders: Mutex::new(orders),
            path: Some(path),
        })
    }

    /// 内置示例订单（班加罗尔市中心附近）
    pub fn sample() -> Self {
        let stop = |lat, lon, address: &str| Stop { lat, lon, address: address.to_string() };
        Self::new(vec![
            Order {
                id: "ORD-1001".into(),
                status: "pending".into(),
                pickup: stop(12.9719, 77.6412, "Indiranagar 100ft Rd"),
                dropoff: stop(12.9784, 77.6408, "HAL 2nd Stage"),
                assigned_to: None,
            },
            Order {
                id: "ORD-1002".into(),
                status: "pending".into(),
                pickup: stop(12.9352, 77.6245, "Koramangala 5th Block"),
                dropoff: stop(12.9279, 77.6271, "Koramangala 8th Block"),
                assigned_to: None,
            },
            Order {
                id: "ORD-1003".into(),
                status: "pending".into(),
                pickup: stop(13.1986, 77.7066, "Kempegowda Airport"),
                dropoff: stop(12.9716, 77.5946, "MG Road"),
                assigned_to: None,
            },
        ])
    }

    pub async fn orders(&self) -> Vec<Order> {
        self.orders.lock().await.clone()
    }

    /// 选出司机附近总耗时最短的待分配订单并标记为 assigned；写回失败时内存中的订单不变
    pub async fn assign_short_nearby(
        &self,
        driver_id: &str,
        lat: f64,
        lon: f64,
        radius_km: f64,
        max_total_minutes: f64,
    ) -> Result<Option<Assignment>, ToolError> {
        let mut orders = self.orders.lock().await;
        let driver = Stop { lat, lon, address: String::new() };

        let best = orders
            .iter()
            .enumerate()
            .filter(|(_, o)| o.status == "pending")
            .filter_map(|(i, o)| {
                let dist = haversine_km(lat, lon, o.pickup.lat, o.pickup.lon);
                if dist > radius_km {
                    return None;
                }
                let job = estimate_trip_minutes(&o.pickup, &o.dropoff);
                let total = round1(job + estimate_trip_minutes(&driver, &o.pickup));
                (total <= max_total_minutes).then_some((i, dist, job, total))
            })
            .min_by(|a, b| a.3.total_cmp(&b.3));

        let Some((i, dist, job, total)) = best else {
            return Ok(None);
        };
        let mut next = orders.clone();
        next[i].status = "assigned".to_string();
        next[i].assigned_to = Some(driver_id.to_string());
        let assignment = Assignment {
            order: next[i].clone(),
            dist_to_pickup_km: round2(dist),
            job_minutes: job,
            total_minutes: total,
        };
        self.persist(&next).await?;
        *orders = next;
        Ok(Some(assignment))
    }

    async fn persist(&self, orders: &[Order]) -> Result<(), ToolError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let body = serde_json::to_string_pretty(&json!({ "orders": orders }))
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        tokio::fs::write(path, body)
            .await
            .map_err(|e| ToolError::Failed(format!("write {}: {e}", path.display())))
    }
}

/// 订单簿上的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOp {
    Reroute,
    AssignShort,
    MerchantStatus,
}

pub struct DispatchTool {
    op: DispatchOp,
    book: Arc<OrderBook>,
}

impl DispatchTool {
    pub fn new(op: DispatchOp, book: Arc<OrderBook>) -> Self {
        Self { op, book }
    }

    pub fn all(book: Arc<OrderBook>) -> Vec<DispatchTool> {
        [DispatchOp::Reroute, DispatchOp::AssignShort, DispatchOp::MerchantStatus]
            .into_iter()
            .map(|op| DispatchTool::new(op, book.clone()))
            .collect()
    }
}

#[async_trait]
impl Tool for DispatchTool {
    fn name(&self) -> &str {
        match self.op {
            DispatchOp::Reroute => "reroute_driver",
            DispatchOp::AssignShort => "assign_short_nearby_order",
            DispatchOp::MerchantStatus => "get_merchant_status",
        }
    }

    fn description(&self) -> &str {
        match self.op {
            DispatchOp::Reroute => "Reroute driver to a selected short nearby order.",
            DispatchOp::AssignShort => "Assign a quick nearby order from the order book.",
            DispatchOp::MerchantStatus => "Merchant backlog/prep time.",
        }
    }

    fn parameters_schema(&self) -> Value {
        match self.op {
            DispatchOp::Reroute => params::schema::<RerouteParams>(),
            DispatchOp::AssignShort => params::schema::<AssignParams>(),
            DispatchOp::MerchantStatus => params::schema::<MerchantParams>(),
        }
    }

    async fn invoke(&self, params: Value) -> Result<Observation, ToolError> {
        let obs = match self.op {
            DispatchOp::Reroute => {
                let p: RerouteParams = params::parse(params)?;
                let assignment = self
                    .book
                    .assign_short_nearby(&p.driver_id, p.driver_lat, p.driver_lon, DEFAULT_RADIUS_KM, DEFAULT_MAX_TOTAL_MINUTES)
                    .await?;
                match assignment {
                    None => json!({"driver_id": p.driver_id, "rerouted": false, "reason": "no_quick_orders_found"}),
                    Some(a) => {
                        let task = format!(
                            "Pickup {} at {} → drop at {} (≈{} min)",
                            a.order.id, a.order.pickup.address, a.order.dropoff.address, a.total_minutes
                        );
                        json!({"driver_id": p.driver_id, "rerouted": true, "newTask": task, "assignment": a})
                    }
                }
            }
            DispatchOp::AssignShort => {
                let p: AssignParams = params::parse(params)?;
                let assignment = self
                    .book
                    .assign_short_nearby(
                        &p.driver_id,
                        p.driver_lat,
                        p.driver_lon,
                        p.radius_km.unwrap_or(DEFAULT_RADIUS_KM),
                        p.max_total_minutes.unwrap_or(DEFAULT_MAX_TOTAL_MINUTES),
                    )
                    .await?;
                match assignment {
                    None => json!({"assigned": false, "reason": "no_quick_orders_found"}),
                    Some(a) => {
                        let mut v = serde_json::to_value(&a)?;
                        v["assigned"] = json!(true);
                        v["driver_id"] = json!(p.driver_id);
                        v
                    }
                }
            }
            DispatchOp::MerchantStatus => {
                let p: MerchantParams = params::parse(params)?;
                json!({"merchant_id": p.merchant_id, "prepTimeMin": 40, "backlogOrders": 12, "response": true})
            }
        };
        Ok(Observation::from_value(obs))
    }
}
