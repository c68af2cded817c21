//! 热重载相关定义
//! Hot-reload related definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// 蓝绿部署槽位名称
/// Blue/green deployment slot name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SlotName {
    Blue,
    Green,
}

impl SlotName {
    /// 另一个槽位
    /// The other slot
    pub fn other(self) -> Self {
        match self {
            SlotName::Blue => SlotName::Green,
            SlotName::Green => SlotName::Blue,
        }
    }

    pub fn index(self) -> usize {
        match self {
            SlotName::Blue => 0,
            SlotName::Green => 1,
        }
    }

    pub fn from_index(index: usize) -> Self {
        if index == 0 {
            SlotName::Blue
        } else {
            SlotName::Green
        }
    }
}

impl fmt::Display for SlotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotName::Blue => write!(f, "BLUE"),
            SlotName::Green => write!(f, "GREEN"),
        }
    }
}

/// 热重载事件
/// Hot-reload event
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ReloadEvent {
    /// 事务开始
    /// Transaction started
    TransactionStarted {
        transaction_id: String,
        unit_ids: Vec<String>,
        target_slot: SlotName,
    },
    /// 单元已加载到目标槽位
    /// Unit loaded into the target slot
    UnitLoaded {
        transaction_id: String,
        unit_id: String,
        checksum: String,
    },
    /// 事务已提交
    /// Transaction committed
    TransactionCommitted {
        transaction_id: String,
        unit_ids: Vec<String>,
        active_slot: SlotName,
        duration: Duration,
    },
    /// 事务已回滚
    /// Transaction rolled back
    TransactionRolledBack {
        transaction_id: String,
        unit_id: Option<String>,
        error: String,
    },
    /// 切换阶段失败，槽位指针已恢复
    /// Switching failed and the slot pointer was restored
    TransactionFailed {
        transaction_id: String,
        error: String,
    },
    /// Agent 状态已保存
    /// Agent state preserved
    StatePreserved { agent: String },
    /// Agent 状态已恢复
    /// Agent state restored
    StateRestored { agent: String },
    /// Agent 已被替换
    /// Agent replaced
    AgentReloaded {
        agent: String,
        unit_id: String,
        state_restored: bool,
    },
    /// Agent 替换失败，已离线
    /// Agent swap failed and the agent is offline
    AgentReloadFailed {
        agent: String,
        unit_id: String,
        error: String,
    },
}
