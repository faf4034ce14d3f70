use chrono::{DateTime, Utc};
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

use super::mutes::MuteSystem;
use super::reminders::ReminderSystem;

/// Default wall-clock interval between polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Fixed-interval poller that fires due mutes and reminders.
pub struct ActionPoller {
    mutes: Arc<MuteSystem>,
    reminders: Arc<ReminderSystem>,
    interval: Duration,
    shutdown_signal: Arc<AtomicBool>,
}

impl ActionPoller {
    pub fn new(mutes: Arc<MuteSystem>, reminders: Arc<ReminderSystem>) -> Self {
        Self::with_interval(mutes, reminders, POLL_INTERVAL)
    }

    pub fn with_interval(mutes: Arc<MuteSystem>, reminders: Arc<ReminderSystem>, interval: Duration) -> Self {
        Self {
            mutes,
            reminders,
            interval,
            shutdown_signal: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Run one poll. Failures in one kind of action do not stop the other.
    pub async fn tick(&self, now: DateTime<Utc>) -> (usize, usize) {
        let mutes = match self.mutes.process_due(now).await {
            Ok(count) => count,
            Err(e) => {
                error!("Mute poll failed: {:#}", e);
                0
            }
        };
        let reminders = match self.reminders.process_due(now).await {
            Ok(count) => count,
            Err(e) => {
                error!("Reminder poll failed: {:#}", e);
                0
            }
        };
        (mutes, reminders)
    }

    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let poller = Arc::clone(self);

        tokio::spawn(async move {
            info!("Action poller started ({}s interval)", poller.interval.as_secs());
            let mut ticker = tokio::time::interval(poller.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                if poller.shutdown_signal.load(Ordering::Relaxed) {
                    info!("Action poller received shutdown signal");
                    break;
                }

                let (mutes, reminders) = poller.tick(Utc::now()).await;
                if mutes + reminders > 0 {
                    debug!("Poll fired {} mutes and {} reminders", mutes, reminders);
                }
            }
        })
    }

    pub async fn shutdown(&self) {
        info!("Signaling action poller shutdown...");
        self.shutdown_signal.store(true, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::mutes::MuteRequest;
    use crate::config::{BotSettings, SettingsStore};
    use crate::platforms::testing::{test_member, test_message, test_user, FakePlatform, TEST_GUILD};
    use crate::storage::Database;
    use chrono::TimeZone;
    use std::collections::HashMap;

    struct Fixture {
        platform: Arc<FakePlatform>,
        poller: Arc<ActionPoller>,
        mutes: Arc<MuteSystem>,
        reminders: Arc<ReminderSystem>,
        db: Database,
        _dir: tempfile::TempDir,
    }

    async fn fixture(interval: Duration) -> Fixture {
        let platform = Arc::new(FakePlatform::new());
        platform.add_member(test_member(test_user(20), vec![])).await;
        let db = Database::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::with_settings(
            dir.path().join("settings.yaml"),
            BotSettings {
                action_channel_id: 44,
                mute_role_ids: HashMap::from([(TEST_GUILD, 66)]),
                ..Default::default()
            },
        );
        let mutes = Arc::new(MuteSystem::new(db.clone(), platform.clone(), settings.clone()));
        let reminders = Arc::new(ReminderSystem::new(db.clone(), platform.clone(), settings));
        let poller = Arc::new(ActionPoller::with_interval(mutes.clone(), reminders.clone(), interval));
        Fixture {
            platform,
            poller,
            mutes,
            reminders,
            db,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_mute_scheduled_then_polled_fires_once() {
        let f = fixture(POLL_INTERVAL).await;
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        f.mutes
            .add_mute(MuteRequest {
                guild_id: TEST_GUILD,
                staff_id: 10,
                target_id: 20,
                args: "3d reason text",
                token: "7000".to_string(),
                issued_at: t,
            })
            .await
            .unwrap();

        let mut reminder = test_message(7001, 8, test_user(10), "");
        reminder.timestamp = t;
        f.reminders.add_reminder(&reminder, "1 day stretch").await.unwrap();

        let after = t + chrono::Duration::days(3) + chrono::Duration::minutes(1);
        assert_eq!(f.poller.tick(after).await, (1, 1));
        assert_eq!(f.poller.tick(after).await, (0, 0));

        assert!(f.db.get_mute("7000").unwrap().is_none());
        assert!(f.db.list_reminders().unwrap().is_empty());
        let state = f.platform.state.lock().await;
        assert_eq!(state.role_revokes, vec![(TEST_GUILD, 20, 66)]);
    }

    #[tokio::test]
    async fn test_started_poller_stops_on_shutdown() {
        let f = fixture(Duration::from_millis(10)).await;
        let handle = f.poller.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        f.poller.shutdown().await;
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("poller exits after shutdown")
            .unwrap();
    }
}
