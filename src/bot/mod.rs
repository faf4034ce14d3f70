use anyhow::{anyhow, Result};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::config::{FunResponseConfig, SettingsStore};
use crate::platforms::PlatformConnection;
use crate::storage::Database;
use crate::types::ChatEvent;

pub mod admission;
pub mod commands;
pub mod duration;
pub mod filter;
pub mod filter_commands;
pub mod fun;
pub mod highlights;
pub mod mentions;
pub mod moderation_commands;
pub mod mute_commands;
pub mod mutes;
pub mod permissions;
pub mod reminder_commands;
pub mod reminders;
pub mod responses;
pub mod role_commands;
pub mod role_requests;
pub mod scheduler;
pub mod settings_commands;
pub mod shutdown;
pub mod welcome;

use admission::AdmissionSystem;
use commands::CommandSystem;
use filter::{FilterEngine, FilterSystem};
use filter_commands::FilterCommands;
use fun::FunResponder;
use highlights::HighlightBoard;
use mentions::MentionAuditor;
use moderation_commands::ModerationCommands;
use mute_commands::MuteCommands;
use mutes::MuteSystem;
use reminder_commands::ReminderCommands;
use reminders::ReminderSystem;
use role_commands::RoleCommands;
use role_requests::RoleRequestSystem;
use scheduler::ActionPoller;
use settings_commands::SettingsCommands;
use welcome::WelcomeSystem;

/// Pending filter scans before new messages are dropped.
const FILTER_QUEUE_CAPACITY: usize = 256;

/// Every feature system an inbound event may be routed to.
struct Systems {
    commands: CommandSystem,
    filter: FilterSystem,
    auditor: Arc<MentionAuditor>,
    mutes: Arc<MuteSystem>,
    highlights: HighlightBoard,
    roles: Arc<RoleRequestSystem>,
    admission: AdmissionSystem,
    welcome: WelcomeSystem,
    fun: FunResponder,
}

fn log_failure(system: &str, result: Result<impl Sized>) {
    if let Err(e) = result {
        error!("{} failed: {:#}", system, e);
    }
}

impl Systems {
    async fn dispatch(&self, event: ChatEvent) {
        debug!("Dispatching {}", event.name());

        match event {
            ChatEvent::Ready { user } => {
                info!("Connected as {} ({})", user.tag(), user.id);
            }
            ChatEvent::MessageCreated(message) => {
                log_failure("Filter", self.filter.handle_message_created(&message).await);
                log_failure("Mention auditor", self.auditor.handle_message_created(&message).await);
                log_failure("Admission", self.admission.handle_message_created(&message).await);

                match self.commands.process_message(&message).await {
                    Ok(true) => {}
                    Ok(false) => log_failure("Fun responder", self.fun.handle_message_created(&message, Utc::now()).await),
                    Err(e) => error!("Command dispatch failed: {:#}", e),
                }
            }
            ChatEvent::MessageUpdated { before, after } => {
                log_failure("Filter", self.filter.handle_message_updated(before.as_ref(), &after).await);
                log_failure(
                    "Mention auditor",
                    self.auditor.handle_message_updated(before.as_ref(), &after).await,
                );
            }
            ChatEvent::MessageDeleted { channel_id, message_id, .. } => {
                log_failure("Highlight board", self.highlights.handle_message_deleted(channel_id, message_id).await);
            }
            ChatEvent::ReactionAdded(reaction) => {
                log_failure("Highlight board", self.highlights.handle_reaction_added(&reaction).await);
                log_failure("Role requests", self.roles.handle_reaction(&reaction, true).await);
            }
            ChatEvent::ReactionRemoved(reaction) => {
                log_failure("Role requests", self.roles.handle_reaction(&reaction, false).await);
            }
            ChatEvent::ReactionsCleared { channel_id, message_id, .. } => {
                log_failure(
                    "Highlight board",
                    self.highlights.handle_reactions_cleared(channel_id, message_id).await,
                );
            }
            ChatEvent::MemberAdded(member) => {
                log_failure("Mute evasion check", self.mutes.handle_member_added(&member).await);
                log_failure("Welcome", self.welcome.handle_member_added(&member.user).await);
            }
            ChatEvent::MemberRemoved { user, .. } => {
                log_failure("Welcome", self.welcome.handle_member_removed(&user).await);
            }
            ChatEvent::MemberUpdated { roles_before, member } => {
                if let Some(roles_before) = roles_before {
                    log_failure("Admission", self.admission.handle_member_updated(&roles_before, &member).await);
                }
            }
            ChatEvent::Heartbeat => {
                log_failure("Fun responder", self.fun.handle_heartbeat(Utc::now()).await);
            }
        }
    }
}

/// Core bot engine: owns the platform connection, the feature systems and the poller.
pub struct ChatBot {
    platform: Arc<dyn PlatformConnection>,
    systems: Arc<Systems>,
    poller: Arc<ActionPoller>,
    shutdown_signal: Arc<AtomicBool>,
}

impl ChatBot {
    pub async fn new(
        platform: Arc<dyn PlatformConnection>,
        settings: SettingsStore,
        db: Database,
        fun_responses: &[FunResponseConfig],
    ) -> Result<Self> {
        let engine = Arc::new(FilterEngine::new(db.clone()).await?);
        let filter = FilterSystem::start(
            Arc::clone(&engine),
            Arc::clone(&platform),
            settings.clone(),
            FILTER_QUEUE_CAPACITY,
        );
        let auditor = Arc::new(MentionAuditor::new(Arc::clone(&platform), settings.clone()));
        let mutes = Arc::new(MuteSystem::new(db.clone(), Arc::clone(&platform), settings.clone()));
        let reminders = Arc::new(ReminderSystem::new(db.clone(), Arc::clone(&platform), settings.clone()));
        let roles = Arc::new(RoleRequestSystem::new(db.clone(), Arc::clone(&platform), settings.clone()));

        let mut commands = CommandSystem::new(Arc::clone(&platform), settings.clone());
        commands.register(Arc::new(FilterCommands::new(Arc::clone(&engine), Arc::clone(&platform))));
        commands.register(Arc::new(MuteCommands::new(Arc::clone(&mutes), Arc::clone(&platform))));
        commands.register(Arc::new(ReminderCommands::new(Arc::clone(&reminders), Arc::clone(&platform))));
        commands.register(Arc::new(ModerationCommands::new(
            Arc::clone(&auditor),
            Arc::clone(&platform),
            settings.clone(),
        )));
        commands.register(Arc::new(RoleCommands::new(Arc::clone(&roles), Arc::clone(&platform))));
        commands.register(Arc::new(SettingsCommands::new(settings.clone(), Arc::clone(&platform))));

        let systems = Systems {
            commands,
            filter,
            auditor,
            mutes: Arc::clone(&mutes),
            highlights: HighlightBoard::new(db, Arc::clone(&platform), settings.clone()),
            roles,
            admission: AdmissionSystem::new(engine, Arc::clone(&platform), settings.clone()).await,
            welcome: WelcomeSystem::new(Arc::clone(&platform), settings.clone()),
            fun: FunResponder::new(Arc::clone(&platform), settings, fun_responses),
        };

        Ok(Self {
            platform,
            systems: Arc::new(systems),
            poller: Arc::new(ActionPoller::new(mutes, reminders)),
            shutdown_signal: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Connect, start the action poller and spawn the event loop. Returns immediately.
    pub async fn start(&self) -> Result<()> {
        info!("Starting chat bot...");

        // Subscribe before connecting so the first events are not missed
        let receiver = self
            .platform
            .get_event_receiver()
            .ok_or_else(|| anyhow!("{} does not provide an event stream", self.platform.platform_name()))?;
        self.platform.connect().await?;

        self.poller.start();
        self.start_event_processor(receiver);

        info!("Chat bot started on {}", self.platform.platform_name());
        Ok(())
    }

    fn start_event_processor(&self, mut receiver: broadcast::Receiver<ChatEvent>) {
        let systems = Arc::clone(&self.systems);
        let shutdown_signal = Arc::clone(&self.shutdown_signal);

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        let systems = Arc::clone(&systems);
                        tokio::spawn(async move { systems.dispatch(event).await });
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event receiver lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Event receiver closed");
                        break;
                    }
                }

                if shutdown_signal.load(Ordering::Relaxed) {
                    info!("Event processor received shutdown signal");
                    break;
                }
            }
        });
    }

    pub async fn is_connected(&self) -> bool {
        self.platform.is_connected().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down chat bot...");
        self.shutdown_signal.store(true, Ordering::Relaxed);
        self.poller.shutdown().await;

        if let Err(e) = self.platform.disconnect().await {
            error!("Failed to disconnect from {}: {}", self.platform.platform_name(), e);
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        info!("Chat bot shutdown complete");
        Ok(())
    }
}
