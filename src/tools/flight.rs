//! check_flight_status：航班状态（演示实现，固定返回延误 45 分钟）

use async_trait::async_trait;
use serde_json::Value;

use crate::core::ToolError;
use crate::tools::params::{self, FlightParams};
use crate::tools::{Observation, Tool};

pub struct FlightStatusTool;

#[async_trait]
impl Tool for FlightStatusTool {
    fn name(&self) -> &str {
        "check_flight_status"
    }

    fn description(&self) -> &str {
        "Flight status lookup by flight number."
    }

    fn parameters_schema(&self) -> Value {
        params::schema::<FlightParams>()
    }

    async fn invoke(&self, params: Value) -> Result<Observation, ToolError> {
        let p: FlightParams = params::parse(params)?;
        let flight = p.flight_no.trim().to_uppercase();
        if flight.is_empty() {
            return Err(ToolError::InvalidParams("missing flight_no".into()));
        }
        Ok(Observation::new()
            .with("flight", flight)
            .with("status", "DELAYED")
            .with("delayMin", 45))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_flight_status() {
        let obs = FlightStatusTool.invoke(json!({"flight_no": "ai202"})).await.unwrap();
        assert_eq!(obs.get("flight"), Some(&json!("AI202")));
        assert_eq!(obs.get("delayMin"), Some(&json!(45)));
    }

    #[tokio::test]
    async fn test_null_flight_number_is_invalid() {
        let err = FlightStatusTool.invoke(json!({"flight_no": null})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParams(_)));
    }
}
