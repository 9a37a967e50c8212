//! 声明式策略表
//!
//! 每个类别一张表：按步序排列的槽位，每个槽位是一组带守卫的规则。
//! 查找 = 取 step_index 对应槽位，返回首个守卫通过的规则产出的描述符；
//! 无槽位或无规则通过时返回 None（流程结束）。

use crate::core::RunContext;

use super::step::StepDescriptor;

pub type Guard = fn(&RunContext) -> bool;
pub type Producer = fn(&RunContext) -> StepDescriptor;

pub enum Branch {
    Step(Producer),
    /// 本槽位无事可做，流程结束
    Done,
}

pub struct Rule {
    pub label: &'static str,
    pub guard: Guard,
    pub branch: Branch,
}

pub struct Slot {
    pub index: usize,
    pub rules: &'static [Rule],
}

pub struct PolicyTable {
    pub slots: &'static [Slot],
}

impl PolicyTable {
    /// 选中的规则（测试与调试用）
    pub fn select(&self, step_index: usize, ctx: &RunContext) -> Option<&'static Rule> {
        let slot = self.slots.iter().find(|s| s.index == step_index)?;
        slot.rules.iter().find(|r| (r.guard)(ctx))
    }

    pub fn next(&self, step_index: usize, ctx: &RunContext) -> Option<StepDescriptor> {
        match self.select(step_index, ctx)?.branch {
            Branch::Step(produce) => Some(produce(ctx)),
            Branch::Done => None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// 兜底守卫
pub fn always(_: &RunContext) -> bool {
    true
}
