//! Rate-limited batch deletion.
//!
//! Every delete is best-effort: a failing batch is counted and skipped, a
//! flood-control signal is waited out and the same batch retried. Only the
//! inability to enumerate the channel at all is reported as an error.

use std::{ops::RangeInclusive, time::Duration};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{ChannelTarget, DeletionReport, DeletionStats},
    errors::{DeleteError, Error},
    pacing::{Pacer, Wait},
    ports::{ChannelSession, MessageCursor},
    Result,
};

/// Where candidate message ids come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Enumerate messages that actually exist.
    History,
    /// Guess ids `1..=max_id`. Assumes ids are dense; anything missing just
    /// shows up as a per-item error.
    Range { max_id: i32 },
}

#[derive(Clone, Copy, Debug)]
pub struct DeletePolicy {
    /// Ids per request for the history strategy.
    pub batch_size: usize,
    /// Spacing between history batches.
    pub batch_delay: Duration,
    /// Spacing between single-id requests of the range strategy.
    pub range_delay: Duration,
    /// Remove for everyone rather than only for the caller.
    pub permanent: bool,
}

impl Default for DeletePolicy {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_delay: Duration::from_secs(1),
            range_delay: Duration::from_millis(100),
            permanent: true,
        }
    }
}

/// Receives running totals after every batch.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, stats: DeletionStats);
}

impl ProgressSink for tokio::sync::watch::Sender<DeletionStats> {
    fn on_progress(&self, stats: DeletionStats) {
        self.send_replace(stats);
    }
}

enum IdSource {
    Cursor(Box<dyn MessageCursor>),
    Range(RangeInclusive<i32>),
}

impl IdSource {
    async fn next(&mut self) -> Option<i32> {
        match self {
            IdSource::Range(r) => r.next(),
            IdSource::Cursor(c) => match c.next().await {
                Ok(id) => id,
                Err(e) => {
                    tracing::error!("history listing failed mid-run, stopping enumeration: {e}");
                    None
                }
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct BatchDeleter {
    policy: DeletePolicy,
}

impl BatchDeleter {
    pub fn new(policy: DeletePolicy) -> Self {
        Self { policy }
    }

    pub async fn run(
        &self,
        session: &dyn ChannelSession,
        channel: &ChannelTarget,
        strategy: Strategy,
        cancel: &CancellationToken,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<DeletionReport> {
        let started = Instant::now();
        let caps = session.capabilities();

        let (mut source, batch_size, mut pacer) = match strategy {
            Strategy::History => {
                if !caps.can_list_history {
                    return Err(Error::Unsupported(
                        "this session cannot list channel history".to_string(),
                    ));
                }
                let cursor = session.list_messages(channel).await?;
                let size = self.policy.batch_size.min(caps.max_batch_size).max(1);
                (
                    IdSource::Cursor(cursor),
                    size,
                    Pacer::new(self.policy.batch_delay),
                )
            }
            Strategy::Range { max_id } => (
                IdSource::Range(1..=max_id),
                1,
                Pacer::new(self.policy.range_delay),
            ),
        };

        tracing::info!(
            channel = channel.id,
            ?strategy,
            batch_size,
            "starting bulk deletion"
        );

        let mut stats = DeletionStats::default();
        let mut cancelled = false;
        let mut batch: Vec<i32> = Vec::with_capacity(batch_size);
        let mut batch_no = 0u64;
        let mut exhausted = false;

        while !exhausted {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            while batch.len() < batch_size {
                match source.next().await {
                    Some(id) => batch.push(id),
                    None => {
                        exhausted = true;
                        break;
                    }
                }
            }
            if batch.is_empty() {
                break;
            }

            batch_no += 1;
            let wait = self
                .delete_batch(session, channel, &batch, batch_no, &mut stats, &mut pacer, cancel)
                .await;
            batch.clear();

            if let Some(p) = progress {
                p.on_progress(stats);
            }
            if wait == Wait::Cancelled {
                cancelled = true;
                break;
            }
        }

        let report = DeletionReport {
            stats,
            cancelled,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            channel = channel.id,
            deleted = stats.deleted_count,
            errors = stats.error_count,
            cancelled,
            "bulk deletion finished"
        );
        Ok(report)
    }

    /// One batch, retried for as long as the server asks us to wait.
    #[allow(clippy::too_many_arguments)]
    async fn delete_batch(
        &self,
        session: &dyn ChannelSession,
        channel: &ChannelTarget,
        ids: &[i32],
        batch_no: u64,
        stats: &mut DeletionStats,
        pacer: &mut Pacer,
        cancel: &CancellationToken,
    ) -> Wait {
        let n = ids.len() as u64;
        loop {
            if pacer.ready(cancel).await == Wait::Cancelled {
                return Wait::Cancelled;
            }

            match session
                .delete_messages(channel, ids, self.policy.permanent)
                .await
            {
                Ok(()) => {
                    pacer.succeeded();
                    stats.deleted_count += n;
                    tracing::info!(
                        channel = channel.id,
                        batch = batch_no,
                        size = n,
                        total = stats.deleted_count,
                        "batch deleted"
                    );
                    return Wait::Elapsed;
                }
                Err(DeleteError::FloodWait(wait)) => {
                    tracing::warn!(
                        channel = channel.id,
                        batch = batch_no,
                        "flood wait: sleeping {}s before retrying",
                        wait.as_secs()
                    );
                    if pacer.flood_wait(wait, cancel).await == Wait::Cancelled {
                        return Wait::Cancelled;
                    }
                }
                Err(DeleteError::Other(e)) => {
                    stats.error_count += n;
                    tracing::warn!(
                        channel = channel.id,
                        batch = batch_no,
                        first_id = ids.first().copied().unwrap_or_default(),
                        size = n,
                        "delete failed: {e}"
                    );
                    return Wait::Elapsed;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;

    use super::*;
    use crate::{domain::Permissions, ports::SessionCapabilities};

    /// In-memory channel session with scripted failures.
    pub(crate) struct FakeSession {
        pub caps: SessionCapabilities,
        pub ids: Vec<i32>,
        pub permissions: Permissions,
        pub resolvable: bool,
        /// Every k-th delete call fails with a generic error.
        pub fail_every: Option<usize>,
        /// Ids that always fail.
        pub fail_ids: Vec<i32>,
        /// Flood waits handed out on the given call numbers (1-based).
        pub flood_on_calls: Vec<(usize, Duration)>,
        /// Cursor fails after yielding this many ids.
        pub cursor_fails_after: Option<usize>,
        pub calls: Mutex<Vec<Vec<i32>>>,
        pub disconnects: Mutex<usize>,
    }

    impl FakeSession {
        pub(crate) fn listing(ids: Vec<i32>) -> Self {
            Self {
                caps: SessionCapabilities {
                    can_list_history: true,
                    max_batch_size: 100,
                },
                ids,
                permissions: Permissions {
                    is_admin: true,
                    can_delete: true,
                },
                resolvable: true,
                fail_every: None,
                fail_ids: vec![],
                flood_on_calls: vec![],
                cursor_fails_after: None,
                calls: Mutex::new(vec![]),
                disconnects: Mutex::new(0),
            }
        }

        pub(crate) fn bot(permissions: Permissions) -> Self {
            Self {
                caps: SessionCapabilities {
                    can_list_history: false,
                    max_batch_size: 1,
                },
                permissions,
                ..Self::listing(vec![])
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub(crate) fn disconnect_count(&self) -> usize {
            *self.disconnects.lock().unwrap()
        }
    }

    struct FakeCursor {
        ids: VecDeque<i32>,
        fail_after: Option<usize>,
        yielded: usize,
    }

    #[async_trait]
    impl MessageCursor for FakeCursor {
        async fn next(&mut self) -> Result<Option<i32>> {
            if Some(self.yielded) == self.fail_after {
                return Err(Error::External("connection lost".into()));
            }
            self.yielded += 1;
            Ok(self.ids.pop_front())
        }
    }

    #[async_trait]
    impl ChannelSession for FakeSession {
        fn capabilities(&self) -> SessionCapabilities {
            self.caps
        }

        async fn resolve_channel(&self, id: i64) -> Result<ChannelTarget> {
            if self.resolvable {
                Ok(ChannelTarget::new(id, Some("Test channel".into())))
            } else {
                Err(Error::ChannelAccess("channel not found".into()))
            }
        }

        async fn list_messages(&self, _channel: &ChannelTarget) -> Result<Box<dyn MessageCursor>> {
            // Newest first, like the platform.
            let mut ids: Vec<i32> = self.ids.clone();
            ids.sort_unstable_by(|a, b| b.cmp(a));
            Ok(Box::new(FakeCursor {
                ids: ids.into(),
                fail_after: self.cursor_fails_after,
                yielded: 0,
            }))
        }

        async fn delete_messages(
            &self,
            _channel: &ChannelTarget,
            ids: &[i32],
            permanent: bool,
        ) -> std::result::Result<(), DeleteError> {
            assert!(permanent);
            let call_no = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(ids.to_vec());
                calls.len()
            };
            if let Some((_, d)) = self.flood_on_calls.iter().find(|(n, _)| *n == call_no) {
                return Err(DeleteError::FloodWait(*d));
            }
            if let Some(k) = self.fail_every {
                if call_no % k == 0 {
                    return Err(DeleteError::Other("MESSAGE_DELETE_FORBIDDEN".into()));
                }
            }
            if ids.iter().any(|id| self.fail_ids.contains(id)) {
                return Err(DeleteError::Other("message to delete not found".into()));
            }
            Ok(())
        }

        async fn get_own_permissions(&self, _channel: &ChannelTarget) -> Result<Permissions> {
            Ok(self.permissions)
        }

        async fn disconnect(&self) {
            *self.disconnects.lock().unwrap() += 1;
        }
    }

    fn channel() -> ChannelTarget {
        ChannelTarget::new(-100123456789, None)
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<DeletionStats>>,
    }

    impl ProgressSink for Recorder {
        fn on_progress(&self, stats: DeletionStats) {
            self.seen.lock().unwrap().push(stats);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deletes_everything_when_nothing_fails() {
        let session = FakeSession::listing((1..=250).collect());
        let deleter = BatchDeleter::new(DeletePolicy::default());
        let report = deleter
            .run(&session, &channel(), Strategy::History, &CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(report.stats.deleted_count, 250);
        assert_eq!(report.stats.error_count, 0);
        assert!(!report.cancelled);

        let calls = session.calls.lock().unwrap();
        assert_eq!(
            calls.iter().map(Vec::len).collect::<Vec<_>>(),
            vec![100, 100, 50]
        );
        assert_eq!(calls[0][0], 250);
    }

    #[tokio::test(start_paused = true)]
    async fn every_kth_failure_is_counted_and_run_completes() {
        let mut session = FakeSession::listing((1..=1000).collect());
        session.fail_every = Some(3);
        let deleter = BatchDeleter::new(DeletePolicy::default());
        let report = deleter
            .run(&session, &channel(), Strategy::History, &CancellationToken::new(), None)
            .await
            .unwrap();

        // 10 calls of 100 ids; calls 3, 6 and 9 fail.
        assert_eq!(session.call_count(), 10);
        assert_eq!(report.stats.error_count, 300);
        assert_eq!(report.stats.deleted_count, 700);
    }

    #[tokio::test(start_paused = true)]
    async fn flood_wait_retries_same_batch_once_counted() {
        let mut session = FakeSession::listing((1..=150).collect());
        session.flood_on_calls = vec![(2, Duration::from_secs(42))];
        let deleter = BatchDeleter::new(DeletePolicy::default());

        let start = Instant::now();
        let report = deleter
            .run(&session, &channel(), Strategy::History, &CancellationToken::new(), None)
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_secs(42));
        assert_eq!(report.stats.deleted_count, 150);
        assert_eq!(report.stats.error_count, 0);

        let calls = session.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1], calls[2]);
    }

    #[tokio::test(start_paused = true)]
    async fn range_strategy_deletes_one_id_at_a_time() {
        let mut session = FakeSession::bot(Permissions {
            is_admin: true,
            can_delete: true,
        });
        session.fail_ids = vec![3, 7];
        let deleter = BatchDeleter::new(DeletePolicy::default());

        let start = Instant::now();
        let report = deleter
            .run(
                &session,
                &channel(),
                Strategy::Range { max_id: 10 },
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(report.stats.deleted_count, 8);
        assert_eq!(report.stats.error_count, 2);
        let calls = session.calls.lock().unwrap();
        assert_eq!(calls.len(), 10);
        assert!(calls.iter().all(|c| c.len() == 1));
        assert_eq!(calls[0], vec![1]);
        // Only the 7 requests that follow a success wait 100ms.
        assert_eq!(start.elapsed(), Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_ids_are_not_paced() {
        let mut session = FakeSession::bot(Permissions {
            is_admin: true,
            can_delete: true,
        });
        session.fail_ids = (1..=10).collect();
        let deleter = BatchDeleter::new(DeletePolicy::default());

        let start = Instant::now();
        let report = deleter
            .run(
                &session,
                &channel(),
                Strategy::Range { max_id: 10 },
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(report.stats.error_count, 10);
        assert_eq!(report.stats.deleted_count, 0);
        assert_eq!(session.call_count(), 10);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn history_on_bot_session_is_unsupported() {
        let session = FakeSession::bot(Permissions::default());
        let deleter = BatchDeleter::new(DeletePolicy::default());
        let err = deleter
            .run(&session, &channel(), Strategy::History, &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
        assert_eq!(session.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_between_batches() {
        let session = FakeSession::listing((1..=500).collect());
        let deleter = BatchDeleter::new(DeletePolicy::default());
        let cancel = CancellationToken::new();

        struct CancelAfterFirst(CancellationToken);
        impl ProgressSink for CancelAfterFirst {
            fn on_progress(&self, _stats: DeletionStats) {
                self.0.cancel();
            }
        }
        let sink = CancelAfterFirst(cancel.clone());

        let report = deleter
            .run(&session, &channel(), Strategy::History, &cancel, Some(&sink))
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.stats.deleted_count, 100);
        assert_eq!(session.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cursor_failure_keeps_partial_stats() {
        let mut session = FakeSession::listing((1..=300).collect());
        session.cursor_fails_after = Some(150);
        let deleter = BatchDeleter::new(DeletePolicy::default());
        let recorder = Arc::new(Recorder::default());

        let report = deleter
            .run(
                &session,
                &channel(),
                Strategy::History,
                &CancellationToken::new(),
                Some(recorder.as_ref()),
            )
            .await
            .unwrap();

        assert_eq!(report.stats.deleted_count, 150);
        assert!(!report.cancelled);
        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.windows(2).all(|w| w[0].deleted_count <= w[1].deleted_count));
    }
}
