//! Conversation state machines that collect and validate everything a bulk
//! deletion needs before it may start.
//!
//! A flow never blocks waiting for the next reply: it stores its stage and
//! partial data, and each inbound message resumes it through `on_input`.
//! Every call returns a [`Step`]: keep prompting, hand a confirmed job to the
//! deleter, or end with an [`Outcome`].

use std::{fmt, sync::Arc};

use crate::{
    deleter::Strategy,
    domain::{ChannelTarget, Mode},
    errors::{Error, ValidationError},
    ports::{ChannelSession, SignIn, UserConnector, UserSession},
    validation::{
        normalize_code, validate_api_hash, validate_api_id, validate_channel_id, validate_code,
        validate_confirmation, validate_max_id, validate_phone, ADMIN_CONFIRM_PHRASE,
        USER_CONFIRM_PHRASE,
    },
};

/// Terminal result of a flow that did not reach the deleter.
#[derive(Debug)]
pub enum Outcome {
    /// Deliberate abort: wrong confirmation phrase or `/cancel`.
    Cancelled,
    /// No reply within the idle window.
    TimedOut,
    /// A field failed validation.
    Invalid(String),
    Failed(Error),
}

impl Outcome {
    pub fn message(&self) -> String {
        match self {
            Outcome::Cancelled => "Operation cancelled. No messages were deleted.".to_string(),
            Outcome::TimedOut => {
                "⌛ Timed out waiting for your reply. Start over with /start.".to_string()
            }
            Outcome::Invalid(what) => format!("❌ {what}. Start over with /start."),
            Outcome::Failed(e) => e.user_message(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Cancelled => "cancelled",
            Outcome::TimedOut => "timed_out",
            Outcome::Invalid(_) => "invalid_input",
            Outcome::Failed(Error::Authentication(_)) => "authentication_error",
            Outcome::Failed(Error::ChannelAccess(_)) => "access_error",
            Outcome::Failed(Error::Permission(_)) => "permission_error",
            Outcome::Failed(_) => "error",
        }
    }
}

/// The session a confirmed job deletes with.
pub enum SessionHandle {
    /// Created by this flow; must be released when the job ends.
    Owned(Box<dyn UserSession>),
    /// The bot's ambient session; never released by a flow.
    Shared(Arc<dyn ChannelSession>),
}

impl SessionHandle {
    pub fn channel(&self) -> &dyn ChannelSession {
        match self {
            SessionHandle::Owned(s) => s.channel(),
            SessionHandle::Shared(s) => s.as_ref(),
        }
    }

    pub async fn release(self) {
        if let SessionHandle::Owned(s) = self {
            s.channel().disconnect().await;
        }
    }
}

/// A confirmed, fully validated bulk deletion.
pub struct DeletionJob {
    pub mode: Mode,
    pub session: SessionHandle,
    pub channel: ChannelTarget,
    pub strategy: Strategy,
}

impl fmt::Debug for DeletionJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeletionJob")
            .field("mode", &self.mode)
            .field("channel", &self.channel)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum Step {
    Prompt(String),
    Run(DeletionJob),
    End(Outcome),
}

// ============== User mode ==============

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserStage {
    AwaitApiId,
    AwaitApiHash,
    AwaitPhone,
    AwaitChannel,
    AwaitCode,
    AwaitPassword,
    AwaitConfirm,
}

/// Personal-account credentials, collected one field per turn.
///
/// The login code and the two-step password are handed straight to the
/// session and never kept here.
#[derive(Clone, Default)]
pub struct Credentials {
    pub api_id: Option<i32>,
    pub api_hash: Option<String>,
    pub phone: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_id", &self.api_id)
            .field("api_hash", &self.api_hash.as_ref().map(|_| "<redacted>"))
            .field("phone", &self.phone)
            .finish()
    }
}

pub struct UserFlow {
    stage: UserStage,
    creds: Credentials,
    channel_id: Option<i64>,
    connector: Arc<dyn UserConnector>,
    session: Option<Box<dyn UserSession>>,
    channel: Option<ChannelTarget>,
}

impl UserFlow {
    pub fn new(connector: Arc<dyn UserConnector>) -> Self {
        Self {
            stage: UserStage::AwaitApiId,
            creds: Credentials::default(),
            channel_id: None,
            connector,
            session: None,
            channel: None,
        }
    }

    pub fn intro() -> &'static str {
        "👤 User mode: deletes every message using your own account.\n\n\
         Send your API ID (a number from my.telegram.org).\n\
         Use /cancel at any time to stop."
    }

    pub fn stage(&self) -> UserStage {
        self.stage
    }

    pub fn credentials(&self) -> &Credentials {
        &self.creds
    }

    pub async fn on_input(&mut self, raw: &str) -> Step {
        // Everything but the password is a structured field.
        let text = raw.trim();
        match self.stage {
            UserStage::AwaitApiId => match validate_api_id(text) {
                Ok(id) => {
                    self.creds.api_id = Some(id);
                    self.stage = UserStage::AwaitApiHash;
                    Step::Prompt("Now send your API hash (32 hex characters).".to_string())
                }
                Err(e) => self.invalid(format!("Invalid API ID: {e}")).await,
            },
            UserStage::AwaitApiHash => {
                if !validate_api_hash(text) {
                    return self.invalid("Invalid API hash format".to_string()).await;
                }
                self.creds.api_hash = Some(text.to_string());
                self.stage = UserStage::AwaitPhone;
                Step::Prompt(
                    "Send the phone number of the account, in international format (e.g. +14155552671)."
                        .to_string(),
                )
            }
            UserStage::AwaitPhone => {
                if !validate_phone(text) {
                    return self.invalid("Invalid phone number format".to_string()).await;
                }
                self.creds.phone = Some(text.to_string());
                self.stage = UserStage::AwaitChannel;
                Step::Prompt("Send the channel ID (e.g. -10012345678).".to_string())
            }
            UserStage::AwaitChannel => match validate_channel_id(text) {
                Ok(id) => {
                    self.channel_id = Some(id);
                    self.authenticate().await
                }
                Err(e) => self.invalid(channel_id_message(&e)).await,
            },
            UserStage::AwaitCode => {
                if !validate_code(text) {
                    return self.invalid("Invalid code format".to_string()).await;
                }
                let res = match self.session_ref() {
                    Ok(s) => s.submit_code(&normalize_code(text)).await,
                    Err(e) => Err(e),
                };
                match res {
                    Ok(SignIn::Authorized) => self.resolve_and_confirm().await,
                    Ok(SignIn::PasswordRequired { hint }) => {
                        self.stage = UserStage::AwaitPassword;
                        let hint = hint
                            .filter(|h| !h.trim().is_empty())
                            .map(|h| format!(" (hint: {h})"))
                            .unwrap_or_default();
                        Step::Prompt(format!(
                            "🔐 This account has two-step verification. Send your password{hint}."
                        ))
                    }
                    Err(e) => self.fail(e).await,
                }
            }
            UserStage::AwaitPassword => {
                if raw.is_empty() {
                    return self.invalid("Empty password".to_string()).await;
                }
                let res = match self.session_ref() {
                    Ok(s) => s.submit_password(raw).await,
                    Err(e) => Err(e),
                };
                match res {
                    Ok(()) => self.resolve_and_confirm().await,
                    Err(e) => self.fail(e).await,
                }
            }
            UserStage::AwaitConfirm => {
                if !validate_confirmation(text, USER_CONFIRM_PHRASE) {
                    self.abort().await;
                    return Step::End(Outcome::Cancelled);
                }
                match (self.session.take(), self.channel.take()) {
                    (Some(session), Some(channel)) => {
                        self.creds = Credentials::default();
                        Step::Run(DeletionJob {
                            mode: Mode::User,
                            session: SessionHandle::Owned(session),
                            channel,
                            strategy: Strategy::History,
                        })
                    }
                    (session, _) => {
                        if let Some(s) = session {
                            s.channel().disconnect().await;
                        }
                        self.fail(missing_session()).await
                    }
                }
            }
        }
    }

    /// Open a fresh session and log in, or ask for the login code.
    async fn authenticate(&mut self) -> Step {
        let (Some(api_id), Some(api_hash), Some(phone)) = (
            self.creds.api_id,
            self.creds.api_hash.clone(),
            self.creds.phone.clone(),
        ) else {
            return self.fail(missing_session()).await;
        };

        let session = match self.connector.connect(api_id, &api_hash).await {
            Ok(s) => s,
            Err(e) => return self.fail(e).await,
        };
        self.session = Some(session);

        let authorized = match self.session_ref() {
            Ok(s) => s.is_authorized().await,
            Err(e) => Err(e),
        };
        match authorized {
            Ok(true) => return self.resolve_and_confirm().await,
            Ok(false) => {}
            Err(e) => return self.fail(e).await,
        }

        let requested = match self.session_ref() {
            Ok(s) => s.request_code(&phone).await,
            Err(e) => Err(e),
        };
        if let Err(e) = requested {
            return self.fail(e).await;
        }
        self.stage = UserStage::AwaitCode;
        Step::Prompt(
            "📨 A login code was sent to your Telegram app. Send it here with spaces between \
             the digits (e.g. 1 2 3 4 5) so Telegram does not invalidate it."
                .to_string(),
        )
    }

    async fn resolve_and_confirm(&mut self) -> Step {
        let Some(id) = self.channel_id else {
            return self.fail(missing_session()).await;
        };
        let resolved = match self.session_ref() {
            Ok(s) => s.channel().resolve_channel(id).await,
            Err(e) => Err(e),
        };
        let channel = match resolved {
            Ok(c) => c,
            Err(e) => return self.fail(e).await,
        };
        let prompt = format!(
            "⚠️ Channel: {}\n\nEvery message in this channel will be permanently deleted. \
             This cannot be undone.\n\nType \"{USER_CONFIRM_PHRASE}\" to proceed. Anything else cancels.",
            channel.label()
        );
        self.channel = Some(channel);
        self.stage = UserStage::AwaitConfirm;
        Step::Prompt(prompt)
    }

    fn session_ref(&self) -> Result<&dyn UserSession, Error> {
        self.session.as_deref().ok_or_else(missing_session)
    }

    /// Release the session and drop everything collected so far.
    pub async fn abort(&mut self) {
        self.creds = Credentials::default();
        self.channel = None;
        if let Some(s) = self.session.take() {
            s.channel().disconnect().await;
        }
    }

    async fn invalid(&mut self, what: String) -> Step {
        self.abort().await;
        Step::End(Outcome::Invalid(what))
    }

    async fn fail(&mut self, e: Error) -> Step {
        tracing::warn!(stage = ?self.stage, "user flow failed: {e}");
        self.abort().await;
        Step::End(Outcome::Failed(e))
    }
}

fn missing_session() -> Error {
    Error::External("flow state is incomplete".to_string())
}

fn channel_id_message(e: &ValidationError) -> String {
    match e {
        ValidationError::NotNegative => "Invalid channel ID: must be negative".to_string(),
        _ => "Invalid channel ID: bad format".to_string(),
    }
}

// ============== Admin mode ==============

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdminStage {
    AwaitChannel,
    AwaitMaxId,
    AwaitConfirm,
}

pub struct AdminFlow {
    stage: AdminStage,
    session: Arc<dyn ChannelSession>,
    channel: Option<ChannelTarget>,
    strategy: Option<Strategy>,
}

impl AdminFlow {
    pub fn new(session: Arc<dyn ChannelSession>) -> Self {
        Self {
            stage: AdminStage::AwaitChannel,
            session,
            channel: None,
            strategy: None,
        }
    }

    pub fn intro() -> &'static str {
        "🛡 Admin mode: deletes messages using this bot's own rights.\n\
         Make sure I'm an admin in the channel with permission to delete messages.\n\n\
         Send the channel ID (e.g. -10012345678).\n\
         Use /cancel at any time to stop."
    }

    pub fn stage(&self) -> AdminStage {
        self.stage
    }

    pub async fn on_input(&mut self, raw: &str) -> Step {
        // Everything but the password is a structured field.
        let text = raw.trim();
        match self.stage {
            AdminStage::AwaitChannel => {
                let id = match validate_channel_id(text) {
                    Ok(id) => id,
                    Err(e) => return Step::End(Outcome::Invalid(channel_id_message(&e))),
                };
                let channel = match self.session.resolve_channel(id).await {
                    Ok(c) => c,
                    Err(e) => return fail_admin(e),
                };
                let perms = match self.session.get_own_permissions(&channel).await {
                    Ok(p) => p,
                    Err(e) => return fail_admin(e),
                };
                if !perms.allows_bulk_delete() {
                    let why = if perms.is_admin {
                        "I lack the 'Delete messages' admin right in this channel"
                    } else {
                        "I am not an administrator of this channel"
                    };
                    return fail_admin(Error::Permission(why.to_string()));
                }

                let label = channel.label();
                self.channel = Some(channel);
                if self.session.capabilities().can_list_history {
                    self.strategy = Some(Strategy::History);
                    self.stage = AdminStage::AwaitConfirm;
                    return Step::Prompt(confirm_prompt(&label, None));
                }
                self.stage = AdminStage::AwaitMaxId;
                Step::Prompt(format!(
                    "✅ Channel: {label}\n\nNow send the maximum message ID in that channel. \
                     For example, if the latest post has ID 150, enter 150."
                ))
            }
            AdminStage::AwaitMaxId => match validate_max_id(text) {
                Ok(max_id) => {
                    self.strategy = Some(Strategy::Range { max_id });
                    self.stage = AdminStage::AwaitConfirm;
                    let label = self
                        .channel
                        .as_ref()
                        .map(ChannelTarget::label)
                        .unwrap_or_default();
                    Step::Prompt(confirm_prompt(&label, Some(max_id)))
                }
                Err(_) => Step::End(Outcome::Invalid(
                    "Invalid input: maximum message ID must be a positive number".to_string(),
                )),
            },
            AdminStage::AwaitConfirm => {
                if !validate_confirmation(text, ADMIN_CONFIRM_PHRASE) {
                    return Step::End(Outcome::Cancelled);
                }
                match (self.channel.take(), self.strategy.take()) {
                    (Some(channel), Some(strategy)) => Step::Run(DeletionJob {
                        mode: Mode::Admin,
                        session: SessionHandle::Shared(self.session.clone()),
                        channel,
                        strategy,
                    }),
                    _ => fail_admin(missing_session()),
                }
            }
        }
    }

    pub fn abort(&mut self) {
        self.channel = None;
        self.strategy = None;
    }
}

fn fail_admin(e: Error) -> Step {
    tracing::warn!("admin flow failed: {e}");
    Step::End(Outcome::Failed(e))
}

fn confirm_prompt(label: &str, max_id: Option<i32>) -> String {
    let scope = match max_id {
        Some(m) => format!("Message IDs 1 to {m} will be permanently deleted."),
        None => "Every message will be permanently deleted.".to_string(),
    };
    format!(
        "⚠️ Channel: {label}\n\n{scope} This cannot be undone.\n\n\
         Type \"{ADMIN_CONFIRM_PHRASE}\" to proceed. Anything else cancels."
    )
}

// ============== Either flow ==============

pub enum Flow {
    User(UserFlow),
    Admin(AdminFlow),
}

impl Flow {
    pub fn mode(&self) -> Mode {
        match self {
            Flow::User(_) => Mode::User,
            Flow::Admin(_) => Mode::Admin,
        }
    }

    pub fn intro(&self) -> &'static str {
        match self {
            Flow::User(_) => UserFlow::intro(),
            Flow::Admin(_) => AdminFlow::intro(),
        }
    }

    pub async fn on_input(&mut self, text: &str) -> Step {
        match self {
            Flow::User(f) => f.on_input(text).await,
            Flow::Admin(f) => f.on_input(text).await,
        }
    }

    pub async fn abort(&mut self) {
        match self {
            Flow::User(f) => f.abort().await,
            Flow::Admin(f) => f.abort(),
        }
    }
}
