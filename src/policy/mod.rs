//! 策略引擎
//!
//! `next(category, step_index, context)` 是纯函数：只读上下文，不做 I/O，
//! 相同输入总是得到相同的 StepDescriptor。暂停后的续跑正是依赖这一点，
//! 所有决策状态都必须在 RunContext 中，而不能藏在引擎内部。
//!
//! - **step**: StepDescriptor / FinishReason / Clarification
//! - **table**: 声明式策略表（槽位 + 守卫规则）
//! - **traffic / merchant / damage / recipient**: 各类别的表

pub mod damage;
pub mod merchant;
pub mod recipient;
pub mod step;
pub mod table;
pub mod traffic;

pub use step::{Clarification, FinishReason, StepDescriptor, ASK_USER, NOOP};
pub use table::PolicyTable;

use crate::classify::Category;
use crate::core::RunContext;

/// 编排器取下一步的来源；内置实现是 [`PolicyEngine`]
pub trait StepSource: Send + Sync {
    fn next_step(&self, category: Category, step_index: usize, ctx: &RunContext) -> Option<StepDescriptor>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyEngine;

impl PolicyEngine {
    pub fn new() -> Self {
        Self
    }

    /// 类别对应的策略表；无表的类别只做分类
    pub fn table(category: Category) -> Option<&'static PolicyTable> {
        match category {
            Category::Traffic => Some(&traffic::TABLE),
            Category::MerchantCapacity => Some(&merchant::TABLE),
            Category::DamageDispute => Some(&damage::TABLE),
            Category::RecipientUnavailable => Some(&recipient::TABLE),
            Category::PaymentIssue
            | Category::AddressIssue
            | Category::Weather
            | Category::Safety
            | Category::Other
            | Category::Unknown => None,
        }
    }

    pub fn next(&self, category: Category, step_index: usize, ctx: &RunContext) -> Option<StepDescriptor> {
        Self::table(category)?.next(step_index, ctx)
    }
}

impl StepSource for PolicyEngine {
    fn next_step(&self, category: Category, step_index: usize, ctx: &RunContext) -> Option<StepDescriptor> {
        self.next(category, step_index, ctx)
    }
}
