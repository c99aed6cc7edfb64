use chrono::{DateTime, Utc};
use dashmap::DashMap;
use poise::serenity_prelude::{ChannelId, GuildId, UserId};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::task::JoinHandle;

use crate::default_struct;

default_struct! {
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    pub locked: bool,
    pub hidden: bool,
    /// 0 means unlimited.
    pub user_limit: u32,
    pub activity_detection: bool,
    pub user_activity: bool = true,
    pub camera_allowed: bool = true,
    pub custom_status: Option<String>,
}
}

#[derive(Debug, Clone)]
pub struct PendingDeletion {
    pub ticket: u64,
    pub due_at: DateTime<Utc>,
    handle: Arc<JoinHandle<()>>,
}

impl PendingDeletion {
    fn cancel(&self) {
        self.handle.abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Active,
    PendingDelete,
}

#[derive(Debug, Clone)]
pub struct ChannelRecord {
    pub channel_id: ChannelId,
    pub guild_id: GuildId,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub settings: ChannelSettings,
    pub pending_deletion: Option<PendingDeletion>,
}

impl ChannelRecord {
    pub fn new(
        channel_id: ChannelId,
        guild_id: GuildId,
        owner_id: UserId,
        name: impl Into<String>,
        settings: ChannelSettings,
    ) -> Self {
        Self {
            channel_id,
            guild_id,
            owner_id,
            created_at: Utc::now(),
            name: name.into(),
            settings,
            pending_deletion: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        if self.pending_deletion.is_some() {
            ChannelState::PendingDelete
        } else {
            ChannelState::Active
        }
    }
}

/// The member acting on a channel, as resolved from an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub is_admin: bool,
}

impl Actor {
    pub fn member(id: UserId) -> Self {
        Self {
            id,
            is_admin: false,
        }
    }

    pub fn admin(id: UserId) -> Self {
        Self { id, is_admin: true }
    }
}

/// Authoritative store of temporary channels. Every operation completes
/// without suspending, so callers never hold an entry across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    records: Arc<DashMap<ChannelId, ChannelRecord>>,
    tickets: Arc<AtomicU64>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, channel: ChannelId) -> Option<ChannelRecord> {
        self.records.get(&channel).map(|r| r.clone())
    }

    /// Inserts or replaces the record for its channel. A replaced record's
    /// pending deletion is cancelled.
    pub fn put(&self, record: ChannelRecord) {
        if let Some(previous) = self.records.insert(record.channel_id, record) {
            if let Some(pending) = previous.pending_deletion {
                pending.cancel();
            }
        }
    }

    pub fn remove(&self, channel: ChannelId) -> Option<ChannelRecord> {
        let (_, record) = self.records.remove(&channel)?;
        if let Some(pending) = &record.pending_deletion {
            pending.cancel();
        }
        Some(record)
    }

    pub fn is_temporary(&self, channel: ChannelId) -> bool {
        self.records.contains_key(&channel)
    }

    pub fn has_control(&self, actor: &Actor, channel: ChannelId) -> bool {
        if actor.is_admin {
            return true;
        }
        self.records
            .get(&channel)
            .is_some_and(|r| r.owner_id == actor.id)
    }

    pub fn update<F, R>(&self, channel: ChannelId, f: F) -> Option<R>
    where
        F: FnOnce(&mut ChannelRecord) -> R,
    {
        self.records.get_mut(&channel).map(|mut r| f(r.value_mut()))
    }

    /// Replaces the channel's pending deletion with a freshly spawned one.
    /// `spawn` receives the new ticket and runs while the entry is locked, so
    /// the task cannot observe the record before its ticket is stored.
    pub fn schedule<F>(&self, channel: ChannelId, due_at: DateTime<Utc>, spawn: F) -> Option<u64>
    where
        F: FnOnce(u64) -> JoinHandle<()>,
    {
        let mut record = self.records.get_mut(&channel)?;
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = Arc::new(spawn(ticket));

        if let Some(previous) = record.pending_deletion.replace(PendingDeletion {
            ticket,
            due_at,
            handle,
        }) {
            previous.cancel();
        }
        Some(ticket)
    }

    /// Clears the pending deletion if `ticket` still owns it. A scheduled task
    /// calls this first so it never acts on a superseded schedule.
    pub fn take_pending(&self, channel: ChannelId, ticket: u64) -> bool {
        self.update(channel, |record| {
            let owned = record
                .pending_deletion
                .as_ref()
                .is_some_and(|pending| pending.ticket == ticket);
            if owned {
                record.pending_deletion = None;
            }
            owned
        })
        .unwrap_or(false)
    }

    pub fn cancel_pending(&self, channel: ChannelId) -> bool {
        self.update(channel, |record| match record.pending_deletion.take() {
            Some(pending) => {
                pending.cancel();
                true
            }
            None => false,
        })
        .unwrap_or(false)
    }

    pub fn in_guild(&self, guild: GuildId) -> Vec<ChannelRecord> {
        self.records
            .iter()
            .filter(|r| r.guild_id == guild)
            .map(|r| r.clone())
            .collect()
    }

    pub fn all(&self) -> Vec<ChannelRecord> {
        self.records.iter().map(|r| r.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
