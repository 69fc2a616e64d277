//! MTProto adapter (layer-client) for personal-account sessions.
//!
//! Each user-mode flow opens its own throwaway client with an in-memory
//! session. Nothing is persisted; `disconnect` logs the session out so it
//! does not linger in the account's active sessions list.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use layer_client::{
    Client, Config as ClientConfig, InMemoryBackend, InvocationError, LoginToken, MessageIter,
    NoRetries, PasswordToken, SignInError,
};
use layer_tl_types as tl;
use tokio::sync::Mutex;

use purgebot_core::{
    domain::{ChannelTarget, Permissions},
    errors::{DeleteError, Error},
    ports::{ChannelSession, MessageCursor, SessionCapabilities, SignIn, UserConnector, UserSession},
    Result,
};

/// Offset Telegram adds to channel ids in their marked (`-100...`) form.
const CHANNEL_ID_OFFSET: i64 = 1_000_000_000_000;

/// Ids per `channels.deleteMessages` call.
const MAX_DELETE_BATCH: usize = 100;

/// Longest flood wait the history cursor sits out before giving up.
const MAX_LISTING_FLOOD_WAIT: Duration = Duration::from_secs(300);

/// Raw channel id candidates for a marked id, most likely first.
///
/// `-1001234567890` is channel `1234567890`. Shorter ids are also tried with
/// just the sign dropped.
pub fn raw_channel_ids(marked: i64) -> Vec<i64> {
    let abs = marked.unsigned_abs() as i64;
    let mut out = Vec::with_capacity(2);
    if abs > CHANNEL_ID_OFFSET {
        out.push(abs - CHANNEL_ID_OFFSET);
    }
    out.push(abs);
    out
}

fn flood_wait(e: &InvocationError) -> Option<Duration> {
    e.flood_wait_seconds().map(Duration::from_secs)
}

fn delete_error(e: InvocationError) -> DeleteError {
    match flood_wait(&e) {
        Some(wait) => DeleteError::FloodWait(wait),
        None => DeleteError::Other(e.to_string()),
    }
}

fn auth_error(e: InvocationError) -> Error {
    if let Some(wait) = flood_wait(&e) {
        return Error::Authentication(format!(
            "too many login attempts, try again in {}s",
            wait.as_secs()
        ));
    }
    if e.is("PHONE_NUMBER_*") {
        return Error::Authentication("the phone number was rejected".to_string());
    }
    if e.is("PASSWORD_HASH_INVALID") {
        return Error::Authentication("wrong two-step verification password".to_string());
    }
    if e.is("API_ID_*") {
        return Error::Authentication("the API ID / API hash pair is invalid".to_string());
    }
    Error::Authentication(e.to_string())
}

fn sign_in_error(e: SignInError) -> Error {
    match e {
        SignInError::InvalidCode => Error::Authentication("invalid or expired code".to_string()),
        SignInError::SignUpRequired => {
            Error::Authentication("this phone number has no Telegram account".to_string())
        }
        SignInError::PasswordRequired(_) => {
            Error::Authentication("two-step verification password required".to_string())
        }
        SignInError::Other(e) => auth_error(e),
    }
}

#[derive(Clone, Debug, Default)]
pub struct LayerConnector;

impl LayerConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UserConnector for LayerConnector {
    async fn connect(&self, api_id: i32, api_hash: &str) -> Result<Box<dyn UserSession>> {
        let (client, _shutdown) = Client::connect(ClientConfig {
            api_id,
            api_hash: api_hash.to_string(),
            retry_policy: Arc::new(NoRetries),
            session_backend: Arc::new(InMemoryBackend::new()),
            ..Default::default()
        })
        .await
        .map_err(|e| Error::Authentication(format!("could not reach Telegram: {e}")))?;

        tracing::info!(api_id, "opened MTProto session");
        Ok(Box::new(LayerSession::new(client)))
    }
}

/// What the dialog listing told us about a channel.
#[derive(Clone, Copy, Debug)]
struct ChannelEntry {
    channel_id: i64,
    access_hash: i64,
    permissions: Permissions,
}

pub struct LayerSession {
    client: Client,
    login: Mutex<Option<LoginToken>>,
    password: Mutex<Option<PasswordToken>>,
    channels: StdMutex<HashMap<i64, ChannelEntry>>,
    released: AtomicBool,
}

impl LayerSession {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            login: Mutex::new(None),
            password: Mutex::new(None),
            channels: StdMutex::new(HashMap::new()),
            released: AtomicBool::new(false),
        }
    }

    fn entry(&self, channel: &ChannelTarget) -> Result<ChannelEntry> {
        let map = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        map.get(&channel.id).copied().ok_or_else(|| {
            Error::ChannelAccess(format!("channel {} was not resolved", channel.id))
        })
    }
}

fn channel_permissions(c: &tl::types::Channel) -> Permissions {
    let can_delete = c
        .admin_rights
        .as_ref()
        .map(|r| match r {
            tl::enums::ChatAdminRights::ChatAdminRights(r) => r.delete_messages,
        })
        .unwrap_or(false);
    Permissions {
        is_admin: c.creator || c.admin_rights.is_some(),
        can_delete: c.creator || can_delete,
    }
}

#[async_trait]
impl UserSession for LayerSession {
    async fn is_authorized(&self) -> Result<bool> {
        self.client.is_authorized().await.map_err(auth_error)
    }

    async fn request_code(&self, phone: &str) -> Result<()> {
        let token = self
            .client
            .request_login_code(phone)
            .await
            .map_err(auth_error)?;
        *self.login.lock().await = Some(token);
        tracing::info!("login code requested");
        Ok(())
    }

    async fn submit_code(&self, code: &str) -> Result<SignIn> {
        let login = self.login.lock().await;
        let Some(token) = login.as_ref() else {
            return Err(Error::Authentication("no login code was requested".to_string()));
        };

        match self.client.sign_in(token, code).await {
            Ok(_) => Ok(SignIn::Authorized),
            Err(SignInError::PasswordRequired(pw)) => {
                let hint = pw.hint().map(str::to_string);
                *self.password.lock().await = Some(*pw);
                Ok(SignIn::PasswordRequired { hint })
            }
            Err(e) => Err(sign_in_error(e)),
        }
    }

    async fn submit_password(&self, password: &str) -> Result<()> {
        let Some(token) = self.password.lock().await.take() else {
            return Err(Error::Authentication(
                "no two-step verification was requested".to_string(),
            ));
        };
        self.client
            .check_password(token, password.as_bytes())
            .await
            .map_err(auth_error)?;
        Ok(())
    }

    fn channel(&self) -> &dyn ChannelSession {
        self
    }
}

#[async_trait]
impl ChannelSession for LayerSession {
    fn capabilities(&self) -> SessionCapabilities {
        SessionCapabilities {
            can_list_history: true,
            max_batch_size: MAX_DELETE_BATCH,
        }
    }

    async fn resolve_channel(&self, id: i64) -> Result<ChannelTarget> {
        let candidates = raw_channel_ids(id);
        let mut dialogs = self.client.iter_dialogs();

        while let Some(dialog) = dialogs
            .next(&self.client)
            .await
            .map_err(|e| Error::ChannelAccess(e.to_string()))?
        {
            match &dialog.chat {
                Some(tl::enums::Chat::Channel(c)) if candidates.contains(&c.id) => {
                    let entry = ChannelEntry {
                        channel_id: c.id,
                        access_hash: c.access_hash.unwrap_or_default(),
                        permissions: channel_permissions(c),
                    };
                    self.channels
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(id, entry);
                    tracing::debug!(channel = id, permissions = ?entry.permissions, "channel resolved");
                    return Ok(ChannelTarget::new(id, Some(c.title.clone())));
                }
                Some(tl::enums::Chat::ChannelForbidden(c)) if candidates.contains(&c.id) => {
                    return Err(Error::ChannelAccess(
                        "you no longer have access to this channel".to_string(),
                    ));
                }
                _ => {}
            }
        }

        Err(Error::ChannelAccess(
            "channel not found among your chats".to_string(),
        ))
    }

    async fn list_messages(&self, channel: &ChannelTarget) -> Result<Box<dyn MessageCursor>> {
        let entry = self.entry(channel)?;
        let peer = tl::enums::Peer::Channel(tl::types::PeerChannel {
            channel_id: entry.channel_id,
        });
        Ok(Box::new(LayerCursor {
            iter: self.client.iter_messages(peer),
            client: self.client.clone(),
        }))
    }

    async fn delete_messages(
        &self,
        channel: &ChannelTarget,
        ids: &[i32],
        _permanent: bool,
    ) -> std::result::Result<(), DeleteError> {
        // Channel deletions always apply to every participant.
        let entry = self
            .entry(channel)
            .map_err(|e| DeleteError::Other(e.to_string()))?;
        let req = tl::functions::channels::DeleteMessages {
            channel: tl::enums::InputChannel::InputChannel(tl::types::InputChannel {
                channel_id: entry.channel_id,
                access_hash: entry.access_hash,
            }),
            id: ids.to_vec(),
        };
        self.client.invoke(&req).await.map_err(delete_error)?;
        Ok(())
    }

    async fn get_own_permissions(&self, channel: &ChannelTarget) -> Result<Permissions> {
        Ok(self.entry(channel)?.permissions)
    }

    async fn disconnect(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.client.sign_out().await {
            Ok(_) => tracing::info!("MTProto session logged out"),
            Err(e) => tracing::warn!("MTProto logout failed: {e}"),
        }
    }
}

/// Newest-first walk over a channel's history, 100 messages per page.
struct LayerCursor {
    client: Client,
    iter: MessageIter,
}

#[async_trait]
impl MessageCursor for LayerCursor {
    async fn next(&mut self) -> Result<Option<i32>> {
        loop {
            match self.iter.next(&self.client).await {
                Ok(msg) => return Ok(msg.map(|m| m.id())),
                Err(e) => match flood_wait(&e) {
                    Some(wait) if wait <= MAX_LISTING_FLOOD_WAIT => {
                        tracing::warn!("history listing flood wait: sleeping {}s", wait.as_secs());
                        tokio::time::sleep(wait).await;
                    }
                    _ => return Err(Error::External(format!("history listing failed: {e}"))),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use layer_client::RpcError;

    use super::*;

    fn rpc(code: i32, message: &str) -> InvocationError {
        InvocationError::Rpc(RpcError::from_telegram(code, message))
    }

    #[test]
    fn marked_channel_ids_unmark() {
        assert_eq!(raw_channel_ids(-1001234567890), vec![1234567890, 1001234567890]);
        assert_eq!(raw_channel_ids(-100123456789), vec![100123456789]);
    }

    #[test]
    fn flood_wait_becomes_retryable_delete_error() {
        assert_eq!(
            delete_error(rpc(420, "FLOOD_WAIT_30")),
            DeleteError::FloodWait(Duration::from_secs(30))
        );
        assert!(matches!(
            delete_error(rpc(400, "MESSAGE_DELETE_FORBIDDEN")),
            DeleteError::Other(_)
        ));
    }

    #[test]
    fn login_errors_are_authentication_failures() {
        let e = auth_error(rpc(400, "PHONE_NUMBER_INVALID"));
        assert!(e.to_string().contains("phone number was rejected"));
        let e = sign_in_error(SignInError::InvalidCode);
        assert!(matches!(e, Error::Authentication(_)));
        assert!(e.user_message().contains("Authentication failed"));
    }
}
