//! 推送通知工具：notify_customer / notify_passenger_and_driver / notify_resolution
//!
//! PushGateway 封装 FCM v1 `messages:send`（WebPush 信封）。dry_run 时只记日志并模拟送达；
//! 占位 / 空白令牌直接返回 `{delivered: false, reason}`，不发请求。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::PushSection;
use crate::core::ToolError;
use crate::tools::params::{self, NotifyBothParams, NotifyCustomerParams, NotifyResolutionParams};
use crate::tools::{Observation, Tool};

const PLACEHOLDER_TOKENS: [&str; 5] = ["token", "customer_token", "driver_token", "passenger_token", "str"];

/// 单次推送的结果
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub delivered: bool,
    pub detail: Value,
}

pub struct PushGateway {
    client: Client,
    dry_run: bool,
    project_id: Option<String>,
    access_token: Option<String>,
}

impl PushGateway {
    pub fn new(section: &PushSection) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(section.timeout_secs.max(1)))
            .build()
            .unwrap_or_default();
        Self {
            client,
            dry_run: section.dry_run,
            project_id: section.project_id.clone(),
            access_token: section.access_token.clone(),
        }
    }

    /// 仅模拟送达（测试与本地演示）
    pub fn dry_run() -> Self {
        Self::new(&PushSection::default())
    }

    pub fn is_placeholder(token: Option<&str>) -> bool {
        let t = token.unwrap_or("").trim().to_lowercase();
        t.is_empty() || PLACEHOLDER_TOKENS.contains(&t.as_str())
    }

    pub async fn send(
        &self,
        token: Option<&str>,
        title: &str,
        body: &str,
        data: Value,
    ) -> Result<Delivery, ToolError> {
        if self.dry_run {
            tracing::info!(title = %title, "push dry run, simulating delivery");
            return Ok(Delivery {
                delivered: true,
                detail: json!({"dryRun": true}),
            });
        }
        if Self::is_placeholder(token) {
            return Ok(Delivery {
                delivered: false,
                detail: json!({"reason": "missing_or_placeholder_device_token"}),
            });
        }
        let project = self
            .project_id
            .as_deref()
            .ok_or_else(|| ToolError::Unavailable("push.project_id not configured".into()))?;
        let access = self
            .access_token
            .as_deref()
            .ok_or_else(|| ToolError::Unavailable("push.access_token not configured".into()))?;

        let url = format!("https://fcm.googleapis.com/v1/projects/{project}/messages:send");
        let message = json!({
            "message": {
                "token": token.unwrap_or_default(),
                "webpush": {
                    "headers": {"Urgency": "high"},
                    "notification": {"title": title, "body": body, "requireInteraction": true},
                    "data": data,
                }
            }
        });
        tracing::info!(title = %title, "sending webpush");
        let resp = self.client.post(&url).bearer_auth(access).json(&message).send().await?;
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if !status.is_success() || body.get("name").is_none() {
            return Err(ToolError::Upstream(format!("fcm {status}: {body}")));
        }
        Ok(Delivery {
            delivered: true,
            detail: json!({"fcmResponse": body}),
        })
    }
}

/// notify_customer
pub struct NotifyCustomerTool {
    gateway: Arc<PushGateway>,
}

impl NotifyCustomerTool {
    pub fn new(gateway: Arc<PushGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for NotifyCustomerTool {
    fn name(&self) -> &str {
        "notify_customer"
    }

    fn description(&self) -> &str {
        "Push notify customer (FCM v1)."
    }

    fn parameters_schema(&self) -> Value {
        params::schema::<NotifyCustomerParams>()
    }

    async fn invoke(&self, params: Value) -> Result<Observation, ToolError> {
        let p: NotifyCustomerParams = params::parse(params)?;
        let d = self
            .gateway
            .send(
                p.fcm_token.as_deref(),
                &p.title,
                &p.message,
                json!({"voucher": p.voucher.to_string()}),
            )
            .await?;
        let mut obs = Observation::from_value(d.detail);
        obs.insert("delivered", d.delivered);
        Ok(obs)
    }
}

/// notify_passenger_and_driver：缺失一方令牌时该方记为未送达
pub struct NotifyBothTool {
    gateway: Arc<PushGateway>,
}

impl NotifyBothTool {
    pub fn new(gateway: Arc<PushGateway>) -> Self {
        Self { gateway }
    }

    async fn send_if_present(&self, token: Option<&str>, message: &str) -> Result<bool, ToolError> {
        match token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => Ok(self.gateway.send(Some(t), "Route Update", message, json!({})).await?.delivered),
            None => Ok(false),
        }
    }
}

#[async_trait]
impl Tool for NotifyBothTool {
    fn name(&self) -> &str {
        "notify_passenger_and_driver"
    }

    fn description(&self) -> &str {
        "Push notify both driver and passenger (FCM v1)."
    }

    fn parameters_schema(&self) -> Value {
        params::schema::<NotifyBothParams>()
    }

    async fn invoke(&self, params: Value) -> Result<Observation, ToolError> {
        let p: NotifyBothParams = params::parse(params)?;
        let driver = self.send_if_present(p.driver_token.as_deref(), &p.message).await?;
        let passenger = self.send_if_present(p.passenger_token.as_deref(), &p.message).await?;
        Ok(Observation::new()
            .with("driverDelivered", driver)
            .with("passengerDelivered", passenger))
    }
}

/// notify_resolution：向司机与顾客发送最终处理结果
pub struct NotifyResolutionTool {
    gateway: Arc<PushGateway>,
}

impl NotifyResolutionTool {
    pub fn new(gateway: Arc<PushGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl Tool for NotifyResolutionTool {
    fn name(&self) -> &str {
        "notify_resolution"
    }

    fn description(&self) -> &str {
        "Sends a final resolution notification to both driver and customer."
    }

    fn parameters_schema(&self) -> Value {
        params::schema::<NotifyResolutionParams>()
    }

    async fn invoke(&self, params: Value) -> Result<Observation, ToolError> {
        let p: NotifyResolutionParams = params::parse(params)?;
        let driver = self
            .gateway
            .send(p.driver_token.as_deref(), "Dispute Resolution", &p.message, json!({}))
            .await?;
        let customer = self
            .gateway
            .send(p.customer_token.as_deref(), "Dispute Resolution", &p.message, json!({}))
            .await?;
        Ok(Observation::new()
            .with("driver_notified", driver.delivered)
            .with("customer_notified", customer.delivered))
    }
}
