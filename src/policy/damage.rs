//! damage_dispute：启动调解 → 收集照片 → 证据分析 → 退款 / 拒绝 → 司机免责 → 商家包装反馈 → 告知结果

use serde_json::json;

use crate::core::{EvidenceAnalysis, RunContext};

use super::step::{Clarification, StepDescriptor};
use super::table::{always, Branch, PolicyTable, Rule, Slot};

/// 自动退款所需的最低置信度
pub const REFUND_CONFIDENCE: f64 = 0.55;

const DECLINE_MESSAGE: &str = "After reviewing the photos, we don't see sufficient evidence to issue a refund right now. If you have additional photos or context, please reply here.";
const REFUND_MESSAGE: &str = "A full refund has been issued for your order. We apologize for the damage.";

pub static TABLE: PolicyTable = PolicyTable {
    slots: &[
        Slot {
            index: 0,
            rules: &[Rule { label: "start mediation", guard: always, branch: Branch::Step(start_mediation) }],
        },
        Slot {
            index: 1,
            rules: &[
                Rule { label: "evidence present", guard: has_evidence, branch: Branch::Step(evidence_ready) },
                Rule { label: "request images", guard: always, branch: Branch::Step(request_images) },
            ],
        },
        Slot {
            index: 2,
            rules: &[Rule { label: "collect evidence", guard: always, branch: Branch::Step(collect_evidence) }],
        },
        Slot {
            index: 3,
            rules: &[Rule { label: "analyze evidence", guard: always, branch: Branch::Step(analyze_evidence) }],
        },
        Slot {
            index: 4,
            rules: &[
                Rule { label: "refund", guard: refund_supported, branch: Branch::Step(issue_refund) },
                Rule { label: "decline", guard: always, branch: Branch::Step(decline_refund) },
            ],
        },
        Slot {
            index: 5,
            rules: &[
                Rule { label: "exonerate driver", guard: driver_not_at_fault, branch: Branch::Step(exonerate_driver) },
                Rule { label: "driver at fault", guard: always, branch: Branch::Step(skip_exoneration) },
            ],
        },
        Slot {
            index: 6,
            rules: &[
                Rule { label: "packaging feedback", guard: refund_reasonable, branch: Branch::Step(merchant_feedback) },
                Rule { label: "no feedback", guard: always, branch: Branch::Step(skip_feedback) },
            ],
        },
        Slot {
            index: 7,
            rules: &[Rule { label: "notify resolution", guard: always, branch: Branch::Step(notify_resolution) }],
        },
    ],
};

fn order_id(ctx: &RunContext) -> &str {
    ctx.order_id.as_deref().unwrap_or("order_demo")
}

fn analysis(ctx: &RunContext) -> EvidenceAnalysis {
    ctx.analysis.clone().unwrap_or_default()
}

fn has_evidence(ctx: &RunContext) -> bool {
    !ctx.evidence().is_empty()
}

fn refund_reasonable(ctx: &RunContext) -> bool {
    analysis(ctx).refund_reasonable
}

fn refund_supported(ctx: &RunContext) -> bool {
    let a = analysis(ctx);
    a.refund_reasonable && a.confidence >= REFUND_CONFIDENCE
}

fn driver_not_at_fault(ctx: &RunContext) -> bool {
    analysis(ctx).fault.as_deref() != Some("driver")
}

fn start_mediation(ctx: &RunContext) -> StepDescriptor {
    StepDescriptor::new(
        "start mediation",
        "initiate_mediation_flow",
        json!({ "order_id": order_id(ctx) }),
    )
    .asserting("flow==started")
    .because("Start structured mediation.")
}

fn evidence_ready(_: &RunContext) -> StepDescriptor {
    StepDescriptor::noop("evidence on file", "Photos already provided.")
}

fn request_images(_: &RunContext) -> StepDescriptor {
    StepDescriptor::ask(
        "request images",
        Clarification::new(
            "evidence_images",
            "Please upload clear photos of the spilled package (seal, bag, spillage close-ups).",
            "image[]",
        ),
        "Need photos to analyze.",
    )
}

fn evidence_params(ctx: &RunContext) -> serde_json::Value {
    json!({
        "order_id": order_id(ctx),
        "images": ctx.evidence(),
        "notes": ctx.notes(),
    })
}

fn collect_evidence(ctx: &RunContext) -> StepDescriptor {
    StepDescriptor::new("collect evidence", "collect_evidence", evidence_params(ctx))
        .asserting("photos>0")
        .because("Persist evidence.")
}

fn analyze_evidence(ctx: &RunContext) -> StepDescriptor {
    StepDescriptor::new("analyze evidence", "analyze_evidence", evidence_params(ctx))
        .asserting("status!=none")
        .because("Decide likely fault.")
}

fn issue_refund(ctx: &RunContext) -> StepDescriptor {
    StepDescriptor::new(
        "refund customer",
        "issue_instant_refund",
        json!({ "order_id": order_id(ctx) }),
    )
    .asserting("refunded==true")
    .because("Goodwill refund.")
}

fn decline_refund(ctx: &RunContext) -> StepDescriptor {
    StepDescriptor::new(
        "decline refund",
        "notify_customer",
        json!({
            "fcm_token": ctx.customer_token,
            "title": "Dispute Resolution",
            "message": DECLINE_MESSAGE,
            "voucher": false,
        }),
    )
    .asserting("delivered==true")
    .because("Evidence does not support a refund.")
    .finish("Refund declined; customer asked for more evidence.")
}

fn exonerate_driver(ctx: &RunContext) -> StepDescriptor {
    StepDescriptor::new(
        "exonerate driver",
        "exonerate_driver",
        json!({ "driver_id": ctx.driver_id.as_deref().unwrap_or("driver_demo") }),
    )
    .asserting("cleared==true")
    .because("Exonerating driver.")
}

fn skip_exoneration(_: &RunContext) -> StepDescriptor {
    StepDescriptor::noop("skip driver exoneration", "No driver exoneration required.")
}

fn merchant_feedback(ctx: &RunContext) -> StepDescriptor {
    let feedback = analysis(ctx)
        .packaging_feedback
        .filter(|f| !f.trim().is_empty())
        .unwrap_or_else(|| "Evidence-backed report: seal/leakage suggests packaging issue.".to_string());
    StepDescriptor::new(
        "feedback to merchant",
        "log_merchant_packaging_feedback",
        json!({
            "merchant_id": ctx.merchant_id.as_deref().unwrap_or("merchant_demo"),
            "feedback": feedback,
        }),
    )
    .asserting("feedbackLogged==true")
    .because("Log packaging issue.")
}

fn skip_feedback(_: &RunContext) -> StepDescriptor {
    StepDescriptor::noop("skip merchant feedback", "No merchant feedback required.")
}

fn notify_resolution(ctx: &RunContext) -> StepDescriptor {
    let message = if ctx.refunded.unwrap_or(false) {
        REFUND_MESSAGE
    } else {
        DECLINE_MESSAGE
    };
    StepDescriptor::new(
        "notify resolution",
        "notify_customer",
        json!({
            "fcm_token": ctx.customer_token,
            "title": "Dispute Resolution",
            "message": message,
            "voucher": false,
        }),
    )
    .asserting("delivered==true")
    .because("Finalizing the dispute.")
    .finish("Resolution communicated to customer.")
}
