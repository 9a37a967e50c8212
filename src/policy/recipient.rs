//! recipient_unavailable：联系收件人 → 代收许可 → 储物柜许可与检索 → 选柜 → 确认

use serde_json::json;

use crate::core::RunContext;

use super::step::{Clarification, StepDescriptor};
use super::table::{always, Branch, PolicyTable, Rule, Slot};

const LOCKER_KEYWORD: &str = "parcel locker OR package pickup OR amazon locker OR smart locker";

pub static TABLE: PolicyTable = PolicyTable {
    slots: &[
        Slot {
            index: 0,
            rules: &[Rule { label: "reach out", guard: always, branch: Branch::Step(contact_recipient) }],
        },
        Slot {
            index: 1,
            rules: &[
                Rule { label: "permission known", guard: safe_drop_answered, branch: Branch::Step(safe_drop_known) },
                Rule { label: "ask safe drop", guard: always, branch: Branch::Step(ask_safe_drop) },
            ],
        },
        Slot {
            index: 2,
            rules: &[
                Rule { label: "safe drop", guard: safe_drop_approved, branch: Branch::Step(suggest_safe_drop) },
                Rule { label: "locker permission known", guard: locker_answered, branch: Branch::Step(locker_known) },
                Rule { label: "ask locker", guard: always, branch: Branch::Step(ask_locker) },
            ],
        },
        Slot {
            index: 3,
            rules: &[
                Rule { label: "already finished", guard: safe_drop_approved, branch: Branch::Done },
                Rule { label: "locker declined", guard: locker_declined, branch: Branch::Step(escalate_declined) },
                Rule { label: "lockers known", guard: lockers_fetched, branch: Branch::Step(lockers_ready) },
                Rule { label: "find by place", guard: has_dest_name, branch: Branch::Step(find_locker_by_place) },
                Rule { label: "find by coords", guard: has_location, branch: Branch::Step(find_locker_by_coords) },
                Rule { label: "insufficient data", guard: always, branch: Branch::Step(insufficient_data) },
            ],
        },
        Slot {
            index: 4,
            rules: &[
                Rule { label: "no lockers", guard: no_lockers, branch: Branch::Step(escalate_no_lockers) },
                Rule { label: "locker chosen", guard: locker_chosen, branch: Branch::Step(locker_recorded) },
                Rule { label: "ask locker choice", guard: always, branch: Branch::Step(ask_locker_choice) },
            ],
        },
        Slot {
            index: 5,
            rules: &[
                Rule { label: "confirm locker", guard: locker_chosen, branch: Branch::Step(confirm_locker) },
                Rule { label: "nothing chosen", guard: always, branch: Branch::Done },
            ],
        },
    ],
};

/// 只有能读成是/否的回答才算答过；"maybe" 之类会再问一次
fn safe_drop_answered(ctx: &RunContext) -> bool {
    ctx.answers.flag("safe_drop_ok").is_some()
}

fn safe_drop_approved(ctx: &RunContext) -> bool {
    ctx.answers.flag("safe_drop_ok") == Some(true)
}

fn locker_answered(ctx: &RunContext) -> bool {
    ctx.answers.flag("locker_ok").is_some()
}

fn locker_declined(ctx: &RunContext) -> bool {
    ctx.answers.flag("locker_ok") != Some(true)
}

fn lockers_fetched(ctx: &RunContext) -> bool {
    ctx.lockers.is_some()
}

fn no_lockers(ctx: &RunContext) -> bool {
    ctx.lockers.as_ref().map(Vec::is_empty).unwrap_or(true)
}

fn locker_chosen(ctx: &RunContext) -> bool {
    ctx.answers.is_answered("chosen_locker_id")
}

fn has_dest_name(ctx: &RunContext) -> bool {
    ctx.dest_name().is_some()
}

fn has_location(ctx: &RunContext) -> bool {
    ctx.dest_or_origin().is_some()
}

fn contact_recipient(ctx: &RunContext) -> StepDescriptor {
    StepDescriptor::new(
        "reach out via chat",
        "contact_recipient_via_chat",
        json!({
            "recipient_id": ctx.recipient_id.as_deref().unwrap_or("recipient_demo"),
            "message": "Driver has arrived. How should we proceed?",
        }),
    )
    .asserting("messagesent!=none")
    .because("Start chat to coordinate.")
}

fn safe_drop_known(_: &RunContext) -> StepDescriptor {
    StepDescriptor::noop("safe-drop permission known", "Recipient already answered.")
}

fn ask_safe_drop(_: &RunContext) -> StepDescriptor {
    StepDescriptor::ask(
        "clarify",
        Clarification::new(
            "safe_drop_ok",
            "Recipient unavailable. Is it OK to leave the package with the building concierge or a neighbour?",
            "boolean",
        )
        .with_options(["yes", "no"]),
        "Ask for safe-drop permission.",
    )
}

fn suggest_safe_drop(ctx: &RunContext) -> StepDescriptor {
    let address = ctx
        .dest_place
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("Building concierge");
    StepDescriptor::new(
        "suggest safe drop",
        "suggest_safe_drop_off",
        json!({ "address": address }),
    )
    .asserting("suggested==true")
    .because("Proceed with safe drop.")
    .finish("Safe-drop approved; driver will leave package with concierge.")
}

fn locker_known(_: &RunContext) -> StepDescriptor {
    StepDescriptor::noop("locker permission known", "Recipient already answered.")
}

fn ask_locker(_: &RunContext) -> StepDescriptor {
    StepDescriptor::ask(
        "clarify",
        Clarification::new(
            "locker_ok",
            "Safe-drop not allowed. Should I route to the nearest parcel/post-office locker instead?",
            "boolean",
        )
        .with_options(["yes", "no"]),
        "Offer locker fallback.",
    )
}

fn notify(ctx: &RunContext, title: &str, message: String) -> StepDescriptor {
    StepDescriptor::new(
        "notify",
        "notify_customer",
        json!({
            "fcm_token": ctx.customer_token,
            "title": title,
            "message": message,
            "voucher": false,
        }),
    )
    .asserting("delivered==true")
}

fn escalate_declined(ctx: &RunContext) -> StepDescriptor {
    notify(
        ctx,
        "Delivery attempt",
        "Delivery attempted; safe-drop and locker options were declined. Our support team will contact you to reschedule.".to_string(),
    )
    .because("Recipient declined every fallback.")
    .escalate("Recipient declined safe-drop and locker; escalated to support.")
}

fn lockers_ready(_: &RunContext) -> StepDescriptor {
    StepDescriptor::noop("lockers on file", "Locker candidates already fetched.")
}

fn find_locker_by_place(ctx: &RunContext) -> StepDescriptor {
    StepDescriptor::new(
        "find locker",
        "find_nearby_locker",
        json!({ "place_name": ctx.dest_name(), "radius_m": 1500 }),
    )
    .asserting("lockers>0")
    .because("Search lockers.")
}

fn find_locker_by_coords(ctx: &RunContext) -> StepDescriptor {
    let Some(at) = ctx.dest_or_origin() else {
        return insufficient_data(ctx);
    };
    StepDescriptor::new(
        "find locker (coords)",
        "places_search_nearby",
        json!({
            "lat": at.lat(),
            "lon": at.lon(),
            "radius_m": 1500,
            "keyword": LOCKER_KEYWORD,
        }),
    )
    .asserting("count>0")
    .because("Search lockers by coordinates.")
}

fn insufficient_data(ctx: &RunContext) -> StepDescriptor {
    notify(
        ctx,
        "Delivery attempt",
        "Delivery attempted; no safe-drop and no lockers could be suggested. Please advise next steps.".to_string(),
    )
    .because("Notify customer due to insufficient data.")
    .finish("Awaiting recipient guidance (no location for lockers).")
}

fn escalate_no_lockers(ctx: &RunContext) -> StepDescriptor {
    notify(
        ctx,
        "Delivery attempt",
        "Delivery attempted; no parcel lockers were found nearby. Our support team will contact you.".to_string(),
    )
    .because("No locker candidates.")
    .escalate("No lockers available; escalated to support.")
}

fn locker_recorded(_: &RunContext) -> StepDescriptor {
    StepDescriptor::noop("locker chosen", "Recipient already picked a locker.")
}

fn ask_locker_choice(ctx: &RunContext) -> StepDescriptor {
    let options = ctx.lockers.iter().flatten().map(|l| l.name.clone());
    StepDescriptor::ask(
        "clarify",
        Clarification::new("chosen_locker_id", "Select a locker for the driver:", "string").with_options(options),
        "Ask which locker.",
    )
}

/// 所选储物柜的名称；回答可能是名称也可能是 id
fn chosen_locker_name(ctx: &RunContext) -> String {
    let chosen = ctx.answers.text("chosen_locker_id").unwrap_or_default();
    ctx.lockers
        .iter()
        .flatten()
        .find(|l| l.id == chosen || l.name.eq_ignore_ascii_case(chosen))
        .map(|l| l.name.clone())
        .unwrap_or_else(|| chosen.to_string())
}

fn confirm_locker(ctx: &RunContext) -> StepDescriptor {
    let name = chosen_locker_name(ctx);
    notify(
        ctx,
        "Package secured",
        format!("Your parcel has been placed in locker {name}. Pick-up code sent via SMS/Email."),
    )
    .because("Confirm locker drop-off.")
    .finish("Locker selected and customer notified.")
}
