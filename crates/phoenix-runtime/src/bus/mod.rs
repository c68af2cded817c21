//! 带暂停缓冲的消息总线
//! Message bus with per-agent pause buffers
//!
//! 每个 Agent 拥有一个邮箱。投递与恢复冲刷都在持有邮箱锁时进行，
//! 因此恢复期间到达的新消息一定排在缓冲消息之后。
//! Every agent owns a mailbox. Delivery and the resume flush both run while
//! holding the mailbox lock, so traffic arriving during a flush is queued
//! behind the buffered messages.

use async_trait::async_trait;
use dashmap::DashMap;
use phoenix_kernel::{AgentMessage, BusError, BusResult, MessageBus, Orchestrator};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 单个 Agent 的邮箱
/// Mailbox of a single agent
#[derive(Debug, Default)]
struct Mailbox {
    paused: bool,
    buffer: VecDeque<AgentMessage>,
}

/// 进程内消息总线
/// In-process message bus
///
/// 直接投递时调用当前注册实例的 `handle_message`。
/// Direct delivery calls `handle_message` on the currently registered instance.
pub struct AgentMessageBus {
    orchestrator: Arc<dyn Orchestrator>,
    mailboxes: DashMap<String, Arc<Mutex<Mailbox>>>,
    delivered: AtomicU64,
}

impl AgentMessageBus {
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self {
            orchestrator,
            mailboxes: DashMap::new(),
            delivered: AtomicU64::new(0),
        }
    }

    fn mailbox(&self, agent: &str) -> Arc<Mutex<Mailbox>> {
        self.mailboxes
            .entry(agent.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Mailbox::default())))
            .clone()
    }

    /// 是否处于暂停状态
    /// Whether delivery to the agent is paused
    pub async fn is_paused(&self, agent: &str) -> bool {
        match self.mailboxes.get(agent).map(|m| m.clone()) {
            Some(mailbox) => mailbox.lock().await.paused,
            None => false,
        }
    }

    /// 已投递消息总数
    /// Total messages delivered
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    async fn deliver(&self, message: AgentMessage) -> BusResult<()> {
        let recipient = message.recipient.clone();
        let handle = self
            .orchestrator
            .lookup_agent(&recipient)
            .await
            .ok_or_else(|| BusError::RecipientNotFound(recipient.clone()))?;

        if !handle.status.is_running() {
            return Err(BusError::DeliveryFailed {
                agent: recipient,
                message: format!("agent is {}", handle.status),
            });
        }

        handle
            .instance
            .write()
            .await
            .handle_message(message)
            .await
            .map_err(|e| BusError::DeliveryFailed {
                agent: recipient,
                message: e.to_string(),
            })?;
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl MessageBus for AgentMessageBus {
    async fn send(&self, message: AgentMessage) -> BusResult<()> {
        let mailbox = self.mailbox(&message.recipient);
        let mut mailbox = mailbox.lock().await;

        if mailbox.paused {
            debug!("Buffering message {} for paused agent {}", message.id, message.recipient);
            mailbox.buffer.push_back(message);
            return Ok(());
        }
        self.deliver(message).await
    }

    async fn pause_delivery(&self, agent: &str) -> BusResult<()> {
        let mailbox = self.mailbox(agent);
        let mut mailbox = mailbox.lock().await;
        if !mailbox.paused {
            mailbox.paused = true;
            info!("Paused delivery to agent {}", agent);
        }
        Ok(())
    }

    async fn resume_delivery(&self, agent: &str) -> BusResult<usize> {
        let mailbox = self.mailbox(agent);
        let mut mailbox = mailbox.lock().await;
        if !mailbox.paused {
            return Err(BusError::NotPaused(agent.to_string()));
        }

        let mut flushed = 0;
        while let Some(message) = mailbox.buffer.pop_front() {
            if let Err(e) = self.deliver(message.clone()).await {
                // keep the message and stay paused
                mailbox.buffer.push_front(message);
                warn!(
                    "Flush to agent {} stopped after {} message(s): {}",
                    agent, flushed, e
                );
                return Err(e);
            }
            flushed += 1;
        }

        mailbox.paused = false;
        info!("Resumed delivery to agent {} ({} flushed)", agent, flushed);
        Ok(flushed)
    }

    async fn buffer_size(&self, agent: &str) -> usize {
        match self.mailboxes.get(agent).map(|m| m.clone()) {
            Some(mailbox) => mailbox.lock().await.buffer.len(),
            None => 0,
        }
    }
}
