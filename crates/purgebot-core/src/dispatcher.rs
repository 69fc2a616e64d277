//! Per-requester routing of inbound updates to flows and deletion runs.

use std::{collections::HashMap, mem, sync::Arc, time::Duration};

use tokio::{
    sync::{watch, Mutex, MutexGuard},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    deleter::{BatchDeleter, DeletePolicy},
    domain::{ChatId, DeletionStats, MessageRef, Mode, UserId},
    flow::{AdminFlow, DeletionJob, Flow, Outcome, Step, UserFlow},
    messaging::{
        port::MessagingPort,
        types::{IncomingUpdate, Menu},
    },
    ports::{ChannelSession, UserConnector},
    security::{is_authorized, CooldownTracker},
    utils::{AuditEvent, AuditLogger},
};

const USER_MODE_LABEL: &str = "User Mode";
const ADMIN_MODE_LABEL: &str = "Admin Mode";

const WELCOME: &str = "👋 I bulk-delete messages from a Telegram channel.\n\n\
User Mode logs in with your own account and can remove every message.\n\
Admin Mode uses this bot's admin rights in the channel.\n\n\
Choose a mode:";

const RUNNING_NOTICE: &str =
    "⏳ A deletion is still running. Send /cancel to stop it after the current batch.";

const BUSY_NOTICE: &str = "⏳ Still working on your previous reply. Send /cancel to stop.";

#[derive(Clone, Debug)]
pub struct DispatcherSettings {
    pub allowed_users: Vec<i64>,
    pub cooldown: Duration,
    pub user_flow_timeout: Duration,
    pub admin_flow_timeout: Duration,
    /// Minimum spacing between edits of the progress message.
    pub progress_interval: Duration,
    pub policy: DeletePolicy,
}

impl DispatcherSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            allowed_users: cfg.allowed_users.clone(),
            cooldown: cfg.cooldown,
            user_flow_timeout: cfg.user_flow_timeout,
            admin_flow_timeout: cfg.admin_flow_timeout,
            progress_interval: Duration::from_secs(5),
            policy: cfg.delete_policy(),
        }
    }
}

enum State {
    Idle,
    Awaiting(Flow),
    /// The flow is handling a reply outside the conversation lock.
    Busy { cancel: CancellationToken },
    Running { cancel: CancellationToken },
}

struct Conversation {
    chat_id: ChatId,
    username: Option<String>,
    state: State,
    last_activity: Instant,
}

/// Everything needed to finish a run after the conversation lock is released.
struct RunContext {
    user_id: UserId,
    username: Option<String>,
    chat_id: ChatId,
    progress: Option<MessageRef>,
}

pub struct Dispatcher {
    settings: DispatcherSettings,
    messenger: Arc<dyn MessagingPort>,
    connector: Arc<dyn UserConnector>,
    bot_session: Arc<dyn ChannelSession>,
    cooldown: CooldownTracker,
    deleter: BatchDeleter,
    audit: Arc<AuditLogger>,
    conversations: Mutex<HashMap<UserId, Arc<Mutex<Conversation>>>>,
}

impl Dispatcher {
    pub fn new(
        settings: DispatcherSettings,
        messenger: Arc<dyn MessagingPort>,
        connector: Arc<dyn UserConnector>,
        bot_session: Arc<dyn ChannelSession>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            cooldown: CooldownTracker::new(settings.cooldown),
            deleter: BatchDeleter::new(settings.policy),
            settings,
            messenger,
            connector,
            bot_session,
            audit,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    pub async fn handle(self: &Arc<Self>, update: IncomingUpdate) {
        let user_id = update.user_id();
        let chat_id = update.chat_id();

        if !is_authorized(Some(user_id), &self.settings.allowed_users) {
            tracing::info!(user_id = user_id.0, "rejected unauthorized user");
            self.audit
                .record(AuditEvent::auth(user_id, update.username(), false));
            self.say(chat_id, "⛔ You are not authorized to use this bot.")
                .await;
            return;
        }

        let slot = self.conversation(user_id, chat_id).await;
        let mut conv = slot.lock().await;
        conv.chat_id = chat_id;
        conv.username = update.username().map(str::to_string);
        self.expire_if_idle(user_id, &mut conv, Instant::now()).await;

        match update {
            IncomingUpdate::Command(cmd) => match cmd.name.as_str() {
                "start" | "help" => self.show_menu(chat_id).await,
                "cancel" => self.cancel(user_id, &mut conv).await,
                "user" => self.begin(user_id, &mut conv, Mode::User).await,
                "admin" | "deleteall" => self.begin(user_id, &mut conv, Mode::Admin).await,
                other => {
                    tracing::debug!(command = other, "unknown command");
                    self.say(
                        chat_id,
                        "Unknown command. Use /start to choose a mode or /cancel to stop.",
                    )
                    .await;
                }
            },
            IncomingUpdate::Text(msg) => match parse_mode_choice(&msg.text) {
                Some(mode) => self.begin(user_id, &mut conv, mode).await,
                None => self.on_text(user_id, conv, &slot, &msg.text).await,
            },
        }
    }

    /// Abort every flow idle for longer than its timeout. Busy conversations
    /// are skipped; they are checked again on their next event.
    pub async fn sweep_idle(&self) -> usize {
        let slots: Vec<(UserId, Arc<Mutex<Conversation>>)> = {
            let map = self.conversations.lock().await;
            map.iter().map(|(k, v)| (*k, v.clone())).collect()
        };

        let now = Instant::now();
        let mut expired = 0;
        for (user_id, slot) in slots {
            let Ok(mut conv) = slot.try_lock() else {
                continue;
            };
            if self.expire_if_idle(user_id, &mut conv, now).await {
                expired += 1;
            }
        }
        expired
    }

    pub fn spawn_idle_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let this = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let Some(this) = this.upgrade() else {
                    return;
                };
                let expired = this.sweep_idle().await;
                if expired > 0 {
                    tracing::info!(expired, "idle flows timed out");
                }
            }
        })
    }

    async fn conversation(&self, user_id: UserId, chat_id: ChatId) -> Arc<Mutex<Conversation>> {
        let mut map = self.conversations.lock().await;
        map.entry(user_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(Conversation {
                    chat_id,
                    username: None,
                    state: State::Idle,
                    last_activity: Instant::now(),
                }))
            })
            .clone()
    }

    fn timeout_for(&self, mode: Mode) -> Duration {
        match mode {
            Mode::User => self.settings.user_flow_timeout,
            Mode::Admin => self.settings.admin_flow_timeout,
        }
    }

    async fn expire_if_idle(&self, user_id: UserId, conv: &mut Conversation, now: Instant) -> bool {
        let State::Awaiting(flow) = &conv.state else {
            return false;
        };
        let mode = flow.mode();
        if now.saturating_duration_since(conv.last_activity) < self.timeout_for(mode) {
            return false;
        }

        if let State::Awaiting(mut flow) = mem::replace(&mut conv.state, State::Idle) {
            flow.abort().await;
        }
        tracing::info!(user_id = user_id.0, mode = mode.as_str(), "flow timed out");
        self.end_flow(user_id, conv, mode, Outcome::TimedOut).await;
        true
    }

    async fn show_menu(&self, chat_id: ChatId) {
        let menu = Menu::one_per_row(&[USER_MODE_LABEL, ADMIN_MODE_LABEL]);
        if let Err(e) = self.messenger.send_menu(chat_id, WELCOME, &menu).await {
            tracing::warn!(chat_id = chat_id.0, "failed to send menu: {e}");
        }
    }

    async fn begin(&self, user_id: UserId, conv: &mut Conversation, mode: Mode) {
        match conv.state {
            State::Running { .. } => return self.say(conv.chat_id, RUNNING_NOTICE).await,
            State::Busy { .. } => return self.say(conv.chat_id, BUSY_NOTICE).await,
            State::Idle | State::Awaiting(_) => {}
        }

        if !self.cooldown.allow(user_id) {
            let wait = self
                .cooldown
                .retry_after(user_id)
                .unwrap_or(self.cooldown.window());
            self.audit.record(AuditEvent::rate_limit(
                user_id,
                conv.username.as_deref(),
                wait.as_secs_f64(),
            ));
            self.say(
                conv.chat_id,
                &format!(
                    "⏳ Please wait {}s before starting a new operation.",
                    wait.as_secs().max(1)
                ),
            )
            .await;
            return;
        }

        if let State::Awaiting(mut old) = mem::replace(&mut conv.state, State::Idle) {
            old.abort().await;
            self.audit.record(AuditEvent::flow_ended(
                user_id,
                conv.username.as_deref(),
                old.mode(),
                "replaced",
                None,
            ));
        }

        let flow = match mode {
            Mode::User => Flow::User(UserFlow::new(self.connector.clone())),
            Mode::Admin => Flow::Admin(AdminFlow::new(self.bot_session.clone())),
        };
        let intro = flow.intro();
        conv.state = State::Awaiting(flow);
        conv.last_activity = Instant::now();

        tracing::info!(user_id = user_id.0, mode = mode.as_str(), "flow started");
        self.audit.record(AuditEvent::flow_started(
            user_id,
            conv.username.as_deref(),
            mode,
        ));
        self.say(conv.chat_id, intro).await;
    }

    /// Feed one reply to the pending flow.
    ///
    /// The flow may spend a long time in platform calls, so it runs with the
    /// conversation unlocked and marked busy; `/cancel` interrupts it.
    async fn on_text(
        self: &Arc<Self>,
        user_id: UserId,
        mut conv: MutexGuard<'_, Conversation>,
        slot: &Mutex<Conversation>,
        text: &str,
    ) {
        let reply = match conv.state {
            State::Awaiting(_) => None,
            State::Busy { .. } => Some(BUSY_NOTICE),
            State::Running { .. } => Some(RUNNING_NOTICE),
            State::Idle => Some("Choose a mode first with /start."),
        };
        if let Some(reply) = reply {
            self.say(conv.chat_id, reply).await;
            return;
        }

        let cancel = CancellationToken::new();
        let busy = State::Busy {
            cancel: cancel.clone(),
        };
        let State::Awaiting(mut flow) = mem::replace(&mut conv.state, busy) else {
            return;
        };
        drop(conv);

        let mode = flow.mode();
        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            step = flow.on_input(text) => Some(step),
        };

        let mut conv = slot.lock().await;
        conv.last_activity = Instant::now();
        let step = match step {
            Some(step) if !cancel.is_cancelled() => step,
            interrupted => {
                tracing::info!(user_id = user_id.0, mode = mode.as_str(), "flow interrupted");
                if let Some(Step::Run(job)) = interrupted {
                    job.session.release().await;
                }
                flow.abort().await;
                Step::End(Outcome::Cancelled)
            }
        };

        match step {
            Step::Prompt(prompt) => {
                conv.state = State::Awaiting(flow);
                self.say(conv.chat_id, &prompt).await;
            }
            Step::End(outcome) => {
                conv.state = State::Idle;
                self.end_flow(user_id, &conv, mode, outcome).await;
            }
            Step::Run(job) => self.start_run(user_id, &mut conv, job).await,
        }
    }

    async fn cancel(&self, user_id: UserId, conv: &mut Conversation) {
        match &conv.state {
            State::Idle => self.say(conv.chat_id, "Nothing to cancel.").await,
            // The interrupted flow reports its own cancellation.
            State::Busy { cancel } => {
                if cancel.is_cancelled() {
                    self.say(conv.chat_id, "Already stopping.").await;
                } else {
                    cancel.cancel();
                }
            }
            State::Running { cancel } => {
                let reply = if cancel.is_cancelled() {
                    "Already stopping."
                } else {
                    cancel.cancel();
                    tracing::info!(user_id = user_id.0, "run cancellation requested");
                    "⏹ Stopping after the current batch…"
                };
                self.say(conv.chat_id, reply).await;
            }
            State::Awaiting(_) => {
                if let State::Awaiting(mut flow) = mem::replace(&mut conv.state, State::Idle) {
                    let mode = flow.mode();
                    flow.abort().await;
                    self.end_flow(user_id, conv, mode, Outcome::Cancelled).await;
                }
            }
        }
    }

    async fn end_flow(&self, user_id: UserId, conv: &Conversation, mode: Mode, outcome: Outcome) {
        let error = match &outcome {
            Outcome::Failed(e) => Some(e.to_string()),
            Outcome::Invalid(what) => Some(what.clone()),
            _ => None,
        };
        self.audit.record(AuditEvent::flow_ended(
            user_id,
            conv.username.as_deref(),
            mode,
            outcome.kind(),
            error.as_deref(),
        ));
        self.say(conv.chat_id, &outcome.message()).await;
    }

    async fn start_run(self: &Arc<Self>, user_id: UserId, conv: &mut Conversation, job: DeletionJob) {
        let cancel = CancellationToken::new();
        conv.state = State::Running {
            cancel: cancel.clone(),
        };

        let progress = match self
            .messenger
            .send_text(conv.chat_id, &progress_text(&job.channel.label(), None))
            .await
        {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::warn!(chat_id = conv.chat_id.0, "failed to send progress message: {e}");
                None
            }
        };

        let ctx = RunContext {
            user_id,
            username: conv.username.clone(),
            chat_id: conv.chat_id,
            progress,
        };
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_job(ctx, job, cancel).await });
    }

    async fn run_job(self: Arc<Self>, ctx: RunContext, job: DeletionJob, cancel: CancellationToken) {
        let label = job.channel.label();
        let (tx, rx) = watch::channel(DeletionStats::default());
        let reporter = ctx.progress.map(|msg| {
            tokio::spawn(report_progress(
                self.messenger.clone(),
                msg,
                rx,
                self.settings.progress_interval,
                label.clone(),
            ))
        });

        let result = self
            .deleter
            .run(
                job.session.channel(),
                &job.channel,
                job.strategy,
                &cancel,
                Some(&tx),
            )
            .await;

        if let Some(handle) = reporter {
            handle.abort();
        }
        job.session.release().await;

        self.audit.record(AuditEvent::deletion(
            ctx.user_id,
            ctx.username.as_deref(),
            job.mode,
            job.channel.id,
            result.as_ref(),
        ));
        let text = match &result {
            Ok(report) => format!("Channel: {label}\n{}", report.summary()),
            Err(e) => {
                tracing::error!(channel = job.channel.id, "deletion run failed: {e}");
                e.user_message()
            }
        };
        self.say(ctx.chat_id, &text).await;

        let slot = {
            let map = self.conversations.lock().await;
            map.get(&ctx.user_id).cloned()
        };
        if let Some(slot) = slot {
            let mut conv = slot.lock().await;
            if matches!(conv.state, State::Running { .. }) {
                conv.state = State::Idle;
                conv.last_activity = Instant::now();
            }
        }
    }

    async fn say(&self, chat_id: ChatId, text: &str) {
        if let Err(e) = self.messenger.send_text(chat_id, text).await {
            tracing::warn!(chat_id = chat_id.0, "failed to send message: {e}");
        }
    }
}

fn parse_mode_choice(text: &str) -> Option<Mode> {
    let t = text.trim();
    if t.eq_ignore_ascii_case(USER_MODE_LABEL) {
        return Some(Mode::User);
    }
    if t.eq_ignore_ascii_case(ADMIN_MODE_LABEL) {
        return Some(Mode::Admin);
    }
    None
}

fn progress_text(label: &str, stats: Option<DeletionStats>) -> String {
    let mut out = format!("🗑 Deleting messages in {label}…");
    if let Some(s) = stats {
        out.push_str(&format!(
            "\nDeleted so far: {}\nErrors: {}",
            s.deleted_count, s.error_count
        ));
    }
    out.push_str("\nSend /cancel to stop.");
    out
}

async fn report_progress(
    messenger: Arc<dyn MessagingPort>,
    msg: MessageRef,
    mut rx: watch::Receiver<DeletionStats>,
    every: Duration,
    label: String,
) {
    while rx.changed().await.is_ok() {
        let stats = *rx.borrow_and_update();
        if let Err(e) = messenger
            .edit_text(msg, &progress_text(&label, Some(stats)))
            .await
        {
            tracing::debug!("progress edit failed: {e}");
        }
        tokio::time::sleep(every).await;
    }
}
