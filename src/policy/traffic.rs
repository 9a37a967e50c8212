//! traffic：拥堵测量 → 备选路线 → 航班状态 → 通知司机与乘客

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::core::RunContext;

use super::step::{Clarification, StepDescriptor};
use super::table::{always, Branch, PolicyTable, Rule, Slot};

pub static TABLE: PolicyTable = PolicyTable {
    slots: &[
        Slot {
            index: 0,
            rules: &[
                Rule { label: "route known", guard: route_known, branch: Branch::Step(route_ready) },
                Rule { label: "ask route", guard: always, branch: Branch::Step(ask_route) },
            ],
        },
        Slot {
            index: 1,
            rules: &[Rule { label: "check congestion", guard: always, branch: Branch::Step(check_traffic) }],
        },
        Slot {
            index: 2,
            rules: &[Rule { label: "reroute", guard: always, branch: Branch::Step(alternative_route) }],
        },
        Slot {
            index: 3,
            rules: &[
                Rule { label: "flight mentioned", guard: has_flight, branch: Branch::Step(check_flight) },
                Rule { label: "no flight", guard: always, branch: Branch::Step(skip_flight) },
            ],
        },
        Slot {
            index: 4,
            rules: &[Rule { label: "notify both", guard: always, branch: Branch::Step(notify_both) }],
        },
    ],
};

/// 起点或终点已有可读地名，或用户已回答过路线问题
fn route_known(ctx: &RunContext) -> bool {
    ctx.origin_name().is_some() || ctx.dest_name().is_some() || ctx.answers.is_answered("route_text")
}

fn route_ready(_: &RunContext) -> StepDescriptor {
    StepDescriptor::noop("route known", "Origin/destination names available.")
}

fn ask_route(_: &RunContext) -> StepDescriptor {
    StepDescriptor::ask(
        "ask for route",
        Clarification::new(
            "route_text",
            "Please provide pickup and drop as place names only, e.g. \"origin=SRMIST Chennai, dest=Chennai International Airport\".",
            "text",
        ),
        "Need origin/destination names to proceed.",
    )
}

/// 地名优先，其次 "lat,lon"
fn place_any(place: Option<&str>, point: Option<crate::core::GeoPoint>) -> Value {
    match (place.map(str::trim).filter(|s| !s.is_empty()), point) {
        (Some(p), _) => json!(p),
        (None, Some(pt)) => json!(format!("{},{}", pt.lat(), pt.lon())),
        (None, None) => Value::Null,
    }
}

fn route_params(ctx: &RunContext) -> Value {
    json!({
        "origin_any": place_any(ctx.origin_place.as_deref(), ctx.origin),
        "dest_any": place_any(ctx.dest_place.as_deref(), ctx.dest),
        "travel_mode": ctx.mode.as_deref().unwrap_or("DRIVE").to_uppercase(),
        "scenario_text": ctx.scenario_text,
    })
}

fn check_traffic(ctx: &RunContext) -> StepDescriptor {
    StepDescriptor::new("check congestion", "check_traffic", route_params(ctx))
        .asserting("delayMin>=0")
        .because("Measure baseline ETA and traffic delay.")
}

fn alternative_route(ctx: &RunContext) -> StepDescriptor {
    StepDescriptor::new("reroute", "calculate_alternative_route", route_params(ctx))
        .asserting("improvementMin>=0")
        .because("Compute alternatives and pick the fastest route.")
}

static FLIGHT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bflight\s+(?:no\.?\s*|number\s+)?([a-z0-9]{2}\s?\d{1,4}[a-z]?)\b").unwrap()
});

/// 场景文本中的航班号（如 "flight AI202"）
pub fn flight_number(text: &str) -> Option<String> {
    let caps = FLIGHT_RE.captures(text)?;
    Some(caps.get(1)?.as_str().replace(' ', "").to_uppercase())
}

fn has_flight(ctx: &RunContext) -> bool {
    flight_number(&ctx.scenario_text).is_some()
}

fn check_flight(ctx: &RunContext) -> StepDescriptor {
    StepDescriptor::new(
        "check flight status",
        "check_flight_status",
        json!({ "flight_no": flight_number(&ctx.scenario_text) }),
    )
    .because("Checking flight status to provide passenger context.")
}

fn skip_flight(_: &RunContext) -> StepDescriptor {
    StepDescriptor::noop("skip flight check", "No flight number in scenario.")
}

fn notify_both(ctx: &RunContext) -> StepDescriptor {
    let mut message =
        "We've detected heavy traffic and found a faster route. Your ETA has been updated.".to_string();
    if let Some(status) = ctx.flight_status.as_ref() {
        if status.get("status").and_then(Value::as_str) == Some("DELAYED") {
            let flight = status.get("flight").and_then(Value::as_str).unwrap_or("");
            let delay = status.get("delayMin").cloned().unwrap_or(Value::Null);
            message.push_str(&format!(
                " FYI: We noticed your flight {flight} is also delayed by {delay} minutes."
            ));
        }
    }
    StepDescriptor::new(
        "inform both parties",
        "notify_passenger_and_driver",
        json!({
            "driver_token": ctx.driver_token,
            "passenger_token": ctx.passenger_token,
            "message": message,
        }),
    )
    .asserting("delivered==true")
    .because("Notify both parties with the updated route/ETA and flight status if available.")
    .finish("Reroute applied; driver and passenger notified with all context.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::step::{FinishReason, ASK_USER, NOOP};

    #[test]
    fn test_asks_for_route_without_place_names() {
        let mut ctx = RunContext::new("stuck in traffic");
        ctx.origin_place = Some("12.9,77.6".into());
        let step = TABLE.next(0, &ctx).unwrap();
        assert_eq!(step.tool, ASK_USER);
        assert_eq!(step.params["question_id"], "route_text");

        ctx.dest_place = Some("Airport".into());
        assert_eq!(TABLE.next(0, &ctx).unwrap().tool, NOOP);
    }

    #[test]
    fn test_route_params_fall_back_to_coordinates() {
        let mut ctx = RunContext::new("jam");
        ctx.origin = Some(crate::core::GeoPoint(13.0, 80.2));
        ctx.dest_place = Some("Chennai Airport".into());
        let step = TABLE.next(1, &ctx).unwrap();
        assert_eq!(step.params["origin_any"], "13,80.2");
        assert_eq!(step.params["dest_any"], "Chennai Airport");
        assert_eq!(step.params["travel_mode"], "DRIVE");
        assert_eq!(step.assertion.as_deref(), Some("delayMin>=0"));
    }

    #[test]
    fn test_flight_number_extraction() {
        assert_eq!(flight_number("passenger on flight AI202 tonight"), Some("AI202".into()));
        assert_eq!(flight_number("Flight 6E 2341 boards at 9"), Some("6E2341".into()));
        assert_eq!(flight_number("has a flight to catch"), None);
    }

    #[test]
    fn test_notification_mentions_delayed_flight() {
        let mut ctx = RunContext::new("flight AI202");
        ctx.flight_status = Some(json!({"flight": "AI202", "status": "DELAYED", "delayMin": 45}));
        let step = TABLE.next(4, &ctx).unwrap();
        assert_eq!(step.finish_reason, FinishReason::Final);
        let message = step.params["message"].as_str().unwrap();
        assert!(message.contains("AI202 is also delayed by 45 minutes"));
        assert!(TABLE.next(5, &ctx).is_none());
    }
}
