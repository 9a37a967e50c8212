//! 工具层：Tool trait、注册表、调用器与各业务工具
//!
//! 编排器只通过 [`ToolInvoker`] 调用工具，工具失败在调用器内折叠为 error Observation。

pub mod assign;
pub mod environment;
pub mod flight;
pub mod invoker;
pub mod maps;
pub mod mediation;
pub mod notify;
pub mod observation;
pub mod params;
pub mod places;
pub mod registry;
pub mod roads;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

pub use assign::{DispatchOp, DispatchTool, OrderBook};
pub use environment::{EnvOp, EnvTool, GeocodeTool};
pub use flight::FlightStatusTool;
pub use invoker::{ToolInfo, ToolInvoker};
pub use maps::MapsClient;
pub use mediation::{DeskOp, DeskTool, MediationDesk};
pub use notify::{NotifyBothTool, NotifyCustomerTool, NotifyResolutionTool, PushGateway};
pub use observation::Observation;
pub use places::{FindLockerTool, MarkPlacedTool, NearbyMerchantsTool, NearbySearchTool, PlaceDetailsTool};
pub use registry::{Tool, ToolRegistry};
pub use roads::{RoadsSnapTool, RouteMatrixTool};
pub use routes::{RouteOp, RouteTool};

use crate::config::AppConfig;
use crate::core::ToolError;
use crate::llm::LlmClient;

/// 按配置注册全部业务工具
///
/// 订单文件读取失败时返回错误；地图与推送凭据缺失不影响注册，调用时才报 Unavailable。
pub async fn default_registry(config: &AppConfig, llm: Arc<dyn LlmClient>) -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    let tools = &config.tools;

    let push = Arc::new(PushGateway::new(&config.push));
    registry.register(NotifyCustomerTool::new(push.clone()));
    registry.register(NotifyBothTool::new(push.clone()));
    registry.register(NotifyResolutionTool::new(push));

    let book = match &tools.orders_file {
        Some(path) => OrderBook::open(path.clone()).await?,
        None => OrderBook::sample(),
    };
    for tool in DispatchTool::all(Arc::new(book)) {
        registry.register(tool);
    }

    for tool in DeskTool::all(Arc::new(MediationDesk::new(llm))) {
        registry.register(tool);
    }

    let maps = Arc::new(MapsClient::new(
        tools.google_maps_api_key.clone(),
        Duration::from_secs(tools.timeout_secs.max(1)),
    ));
    registry.register(FindLockerTool::new(maps.clone(), tools.default_radius_m));
    registry.register(NearbySearchTool::new(maps.clone(), tools.default_radius_m));
    registry.register(NearbyMerchantsTool::new(maps.clone()));
    registry.register(PlaceDetailsTool::new(maps.clone()));
    registry.register(MarkPlacedTool);
    registry.register(RouteTool::new(RouteOp::Traffic, maps.clone()));
    registry.register(RouteTool::new(RouteOp::Alternatives, maps.clone()));
    registry.register(RouteMatrixTool::new(maps.clone()));
    registry.register(RoadsSnapTool::new(maps.clone()));
    for tool in EnvTool::all(maps.clone()) {
        registry.register(tool);
    }
    registry.register(GeocodeTool::new(maps));
    registry.register(FlightStatusTool);

    tracing::info!(tools = registry.len(), "tool registry ready");
    Ok(registry)
}
