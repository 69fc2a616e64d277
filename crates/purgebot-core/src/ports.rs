use async_trait::async_trait;

use crate::{
    domain::{ChannelTarget, Permissions},
    errors::DeleteError,
    Result,
};

/// What a channel session can do on the platform.
#[derive(Clone, Copy, Debug)]
pub struct SessionCapabilities {
    /// Whether existing message ids can be enumerated. When false, deletion
    /// has to guess ids from a dense range.
    pub can_list_history: bool,
    /// Largest number of ids accepted by one delete request.
    pub max_batch_size: usize,
}

/// Lazy, restartable sequence of message ids in a channel.
#[async_trait]
pub trait MessageCursor: Send {
    async fn next(&mut self) -> Result<Option<i32>>;
}

/// Hexagonal port for an authenticated session that can act on a channel.
///
/// Implemented over MTProto (user credentials) and the Bot API (bot credentials).
#[async_trait]
pub trait ChannelSession: Send + Sync {
    fn capabilities(&self) -> SessionCapabilities;

    /// Fails with `Error::ChannelAccess` when the channel is unknown or private.
    async fn resolve_channel(&self, id: i64) -> Result<ChannelTarget>;

    /// Start a fresh enumeration. Each call restarts from the newest message.
    async fn list_messages(&self, channel: &ChannelTarget) -> Result<Box<dyn MessageCursor>>;

    async fn delete_messages(
        &self,
        channel: &ChannelTarget,
        ids: &[i32],
        permanent: bool,
    ) -> std::result::Result<(), DeleteError>;

    async fn get_own_permissions(&self, channel: &ChannelTarget) -> Result<Permissions>;

    /// Release the underlying connection. Must be safe to call more than once.
    async fn disconnect(&self);
}

/// Outcome of submitting a login code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignIn {
    Authorized,
    PasswordRequired { hint: Option<String> },
}

/// A freshly opened personal-account session that still has to log in.
#[async_trait]
pub trait UserSession: Send + Sync {
    async fn is_authorized(&self) -> Result<bool>;

    /// Ask the platform to send a login code to `phone`.
    async fn request_code(&self, phone: &str) -> Result<()>;

    async fn submit_code(&self, code: &str) -> Result<SignIn>;

    async fn submit_password(&self, password: &str) -> Result<()>;

    /// The same session viewed as a channel capability.
    fn channel(&self) -> &dyn ChannelSession;
}

/// Opens personal-account sessions from api credentials.
#[async_trait]
pub trait UserConnector: Send + Sync {
    async fn connect(&self, api_id: i32, api_hash: &str) -> Result<Box<dyn UserSession>>;
}
