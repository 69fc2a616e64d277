use std::{fmt, time::Duration};

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// A channel that resolved successfully on the platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelTarget {
    /// Marked id, negative per Bot API convention (`-100...` for channels).
    pub id: i64,
    pub title: Option<String>,
}

impl ChannelTarget {
    pub fn new(id: i64, title: Option<String>) -> Self {
        Self { id, title }
    }

    /// Human label used in prompts and summaries.
    pub fn label(&self) -> String {
        match &self.title {
            Some(t) if !t.trim().is_empty() => format!("{t} ({})", self.id),
            _ => self.id.to_string(),
        }
    }
}

/// Which credentials a flow runs with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Personal account over MTProto: full history access.
    User,
    /// The bot's own account: permission-gated access.
    Admin,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::User => "user",
            Mode::Admin => "admin",
        }
    }
}

/// Own rights in a channel, as reported by the platform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Permissions {
    pub is_admin: bool,
    pub can_delete: bool,
}

impl Permissions {
    pub fn allows_bulk_delete(&self) -> bool {
        self.is_admin && self.can_delete
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeletionStats {
    pub deleted_count: u64,
    pub error_count: u64,
}

/// Result of one deleter run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeletionReport {
    pub stats: DeletionStats,
    /// True when the run stopped before the id sequence was exhausted.
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl DeletionReport {
    pub fn summary(&self) -> String {
        let head = if self.cancelled {
            "Deletion stopped early."
        } else {
            "Deletion complete."
        };
        format!(
            "{head}\nDeleted messages: {}\nErrors encountered: {}\nElapsed: {}",
            self.stats.deleted_count,
            self.stats.error_count,
            format_duration(self.elapsed)
        )
    }
}

impl fmt::Display for DeletionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deleted={} errors={}",
            self.deleted_count, self.error_count
        )
    }
}

pub fn format_duration(d: Duration) -> String {
    let seconds = d.as_secs();
    let hours = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        return format!("{hours}h {mins}m {secs}s");
    }
    if mins > 0 {
        return format!("{mins}m {secs}s");
    }
    format!("{secs}s")
}
