//! merchant_capacity：延迟告知 → 司机改派 → 附近替代商家 → 用户选择 → 告知结果

use serde_json::{json, Value};

use crate::core::{Candidate, RunContext};

use super::step::{Clarification, StepDescriptor};
use super::table::{always, Branch, PolicyTable, Rule, Slot};

/// 「保持原商家」选项
pub const KEEP_CURRENT: &str = "NO • Continue with this restaurant";

pub static TABLE: PolicyTable = PolicyTable {
    slots: &[
        Slot {
            index: 0,
            rules: &[Rule { label: "delay notice", guard: always, branch: Branch::Step(delay_notice) }],
        },
        Slot {
            index: 1,
            rules: &[
                Rule { label: "reroute driver", guard: has_location, branch: Branch::Step(reroute_driver) },
                Rule { label: "no location", guard: always, branch: Branch::Step(skip_reroute) },
            ],
        },
        Slot {
            index: 2,
            rules: &[
                Rule { label: "nearby alternates", guard: has_location, branch: Branch::Step(nearby_merchants) },
                Rule { label: "no location", guard: always, branch: Branch::Step(no_alternates) },
            ],
        },
        Slot {
            index: 3,
            rules: &[
                Rule { label: "no alternates", guard: no_merchants, branch: Branch::Done },
                Rule { label: "choice made", guard: choice_made, branch: Branch::Step(choice_recorded) },
                Rule { label: "ask choice", guard: always, branch: Branch::Step(ask_choice) },
            ],
        },
        Slot {
            index: 4,
            rules: &[Rule { label: "inform choice", guard: always, branch: Branch::Step(inform_choice) }],
        },
    ],
};

fn has_location(ctx: &RunContext) -> bool {
    ctx.origin_or_dest().is_some()
}

fn no_merchants(ctx: &RunContext) -> bool {
    ctx.merchants.as_ref().map(Vec::is_empty).unwrap_or(true)
}

fn choice_made(ctx: &RunContext) -> bool {
    ctx.answers.is_answered("alt_choice")
}

fn delay_notice(ctx: &RunContext) -> StepDescriptor {
    let step = StepDescriptor::new(
        "notify customer about delay",
        "notify_customer",
        json!({
            "fcm_token": ctx.customer_token,
            "title": "Delay notice",
            "message": "The restaurant is experiencing a long prep time (~40 min). We're minimizing delays and will keep you updated. A small voucher has been applied for the inconvenience.",
            "voucher": true,
        }),
    )
    .because("Proactively inform customer and offer voucher.");
    if ctx.customer_token.as_deref().map(|t| !t.trim().is_empty()).unwrap_or(false) {
        step.asserting("delivered==true")
    } else {
        step
    }
}

fn reroute_driver(ctx: &RunContext) -> StepDescriptor {
    let Some(at) = ctx.origin_or_dest() else {
        return skip_reroute(ctx);
    };
    StepDescriptor::new(
        "reroute driver to quick nearby order",
        "reroute_driver",
        json!({
            "driver_id": ctx.driver_id.as_deref().unwrap_or("driver_demo"),
            "driver_lat": at.lat(),
            "driver_lon": at.lon(),
        }),
    )
    .because("Reduce driver idle time with a short nearby order.")
}

fn skip_reroute(_: &RunContext) -> StepDescriptor {
    StepDescriptor::noop("skip reroute (no coords)", "No driver location; skipping reroute.")
}

fn nearby_merchants(ctx: &RunContext) -> StepDescriptor {
    let Some(at) = ctx.origin_or_dest() else {
        return no_alternates(ctx);
    };
    StepDescriptor::new(
        "get nearby alternates",
        "get_nearby_merchants",
        json!({ "lat": at.lat(), "lon": at.lon(), "radius_m": 2000 }),
    )
    .asserting("merchants>0")
    .because("Fetch up to 5 faster restaurants.")
}

fn no_alternates(_: &RunContext) -> StepDescriptor {
    StepDescriptor::noop("skip fetching alternates", "Cannot proceed with alternatives.")
        .finish("Cannot fetch alternates without location.")
}

fn choice_recorded(_: &RunContext) -> StepDescriptor {
    StepDescriptor::noop("alternate chosen", "Customer already picked.")
}

fn ask_choice(ctx: &RunContext) -> StepDescriptor {
    let options = ctx
        .merchants
        .iter()
        .flatten()
        .map(|m| m.name.clone())
        .chain(std::iter::once(KEEP_CURRENT.to_string()));
    StepDescriptor::ask(
        "clarify alternate",
        Clarification::new(
            "alt_choice",
            "Prep time is long. Pick an alternate or choose NO:",
            "string",
        )
        .with_options(options),
        "Offer alternates.",
    )
}

/// 客户对替代商家的选择
#[derive(Debug, PartialEq)]
enum Choice<'a> {
    Keep,
    Switch(&'a Candidate),
    /// 不在候选里的名称，原样转告
    Named(String),
}

/// 按名称、id 或选项序号（从 1 起，与展示顺序一致）解析回答；最后一个序号即 KEEP_CURRENT
fn resolve_choice<'a>(merchants: &'a [Candidate], answer: Option<&Value>) -> Choice<'a> {
    let raw = match answer {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Choice::Keep,
    };
    if raw.is_empty() || raw.to_uppercase().starts_with("NO") {
        return Choice::Keep;
    }
    if let Ok(index) = raw.parse::<usize>() {
        return match index {
            i if (1..=merchants.len()).contains(&i) => Choice::Switch(&merchants[i - 1]),
            i if i == merchants.len() + 1 => Choice::Keep,
            _ => Choice::Named(raw),
        };
    }
    merchants
        .iter()
        .find(|m| m.name.eq_ignore_ascii_case(&raw))
        .or_else(|| merchants.iter().find(|m| m.id == raw))
        .map(Choice::Switch)
        .unwrap_or(Choice::Named(raw))
}

fn inform_choice(ctx: &RunContext) -> StepDescriptor {
    let merchants = ctx.merchants.as_deref().unwrap_or(&[]);
    let mut params = json!({
        "fcm_token": ctx.customer_token,
        "title": "Order Update",
    });
    let message = match resolve_choice(merchants, ctx.answers.get("alt_choice")) {
        Choice::Switch(m) => {
            params["merchant_id"] = json!(m.id);
            format!("We've switched your order to {} to minimize delays.", m.name)
        }
        Choice::Named(name) => format!("We've switched your order to {name} to minimize delays."),
        Choice::Keep => "We'll keep your current restaurant and will let you know once the food is ready for pickup."
            .to_string(),
    };
    params["message"] = json!(message);
    StepDescriptor::new("inform customer of choice", "notify_customer", params)
        .asserting("delivered==true")
        .because("Finalize based on the customer's choice.")
        .finish("Customer notified of their choice.")
}
