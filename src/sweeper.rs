use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Local, NaiveDate, NaiveTime};
use cron::Schedule;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{AppResult, clock::Clock, db::ChatSession, sessions::SessionLifecycleManager};

/// What the sweep needs from the session store.
#[async_trait]
pub trait SweepTarget: Send + Sync {
    async fn open_sessions_on(&self, date: NaiveDate) -> AppResult<Vec<ChatSession>>;

    async fn close(&self, session_id: i64) -> AppResult<()>;
}

#[async_trait]
impl SweepTarget for SessionLifecycleManager {
    async fn open_sessions_on(&self, date: NaiveDate) -> AppResult<Vec<ChatSession>> {
        SessionLifecycleManager::open_sessions_on(self, date).await
    }

    async fn close(&self, session_id: i64) -> AppResult<()> {
        SessionLifecycleManager::close(self, session_id).await.map(|_| ())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub closed: usize,
    /// Open, but created at or after the check time.
    pub skipped: usize,
    pub failed: usize,
}

/// Force-closes today's sessions that are still open past the check time.
pub struct SessionSweeper<T> {
    target: Arc<T>,
    clock: Arc<dyn Clock>,
    close_check_time: NaiveTime,
}

impl<T: SweepTarget + 'static> SessionSweeper<T> {
    pub fn new(target: Arc<T>, clock: Arc<dyn Clock>, close_check_time: NaiveTime) -> Self {
        Self { target, clock, close_check_time }
    }

    /// One run. Only failing to list the sessions aborts it; a session that
    /// fails to close is logged and the rest are still processed.
    pub async fn sweep(&self) -> AppResult<SweepReport> {
        let today = self.clock.today();
        let threshold = today.and_time(self.close_check_time);
        let mut report = SweepReport::default();

        for session in self.target.open_sessions_on(today).await? {
            if session.created_at >= threshold {
                report.skipped += 1;
                continue;
            }

            match self.target.close(session.id).await {
                Ok(()) => report.closed += 1,
                Err(err) => {
                    warn!(session_id = session.id, room_id = session.room_id, error = %err, "failed to close stale session");
                    report.failed += 1;
                }
            }
        }

        info!(%today, closed = report.closed, skipped = report.skipped, failed = report.failed, "session sweep finished");
        Ok(report)
    }

    /// Runs the sweep on every tick of `schedule` until the task is aborted.
    pub fn spawn(self, schedule: Schedule) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut after = Local::now();
            loop {
                let Some(next) = schedule.after(&after).next() else {
                    warn!("sweep schedule has no upcoming runs");
                    break;
                };
                debug!(next_run = %next, "sweep scheduled");

                let wait = (next - Local::now()).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;

                if let Err(err) = self.sweep().await {
                    error!(error = %err, "session sweep failed");
                }
                after = next;
            }
        })
    }
}
