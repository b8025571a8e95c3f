use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use crate::characters::CharacterRegistry;
use crate::config::AppConfig;
use crate::environment;
use crate::llm::{LlmClient, Message};
use crate::lookup::EnvironmentLookup;
use crate::memory::VectorMemory;
use crate::runtime::BackendEvent;
use crate::state::{StateStore, Story};

pub const SCHEDULE_FILE: &str = "schedule.json";

const TASK_CHECKIN_MORNING: &str = "checkin_morning";
const TASK_CHECKIN_NIGHT: &str = "checkin_night";
const TASK_FLASHBACK: &str = "flashback";
const TASK_STORY: &str = "story";

const ERROR_RETRY_SECS: u64 = 60;
const FLASHBACK_PEEK_LIMIT: usize = 10;

/// Persisted next-fire times, keyed by task name. Surviving restarts is
/// the point: an overdue entry fires late instead of being skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleState {
    pub next_fire: HashMap<String, DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeartbeatTask {
    CheckinMorning,
    CheckinNight,
    Flashback,
}

impl HeartbeatTask {
    fn key(self) -> &'static str {
        match self {
            HeartbeatTask::CheckinMorning => TASK_CHECKIN_MORNING,
            HeartbeatTask::CheckinNight => TASK_CHECKIN_NIGHT,
            HeartbeatTask::Flashback => TASK_FLASHBACK,
        }
    }
}

/// Autonomous behavior: daily check-ins, memory flashbacks, and story
/// posts, driven by a persisted schedule and monotonic sleeps.
pub struct Scheduler {
    config: Arc<AppConfig>,
    llm: LlmClient,
    store: Arc<StateStore>,
    memory: Arc<VectorMemory>,
    lookup: Arc<dyn EnvironmentLookup>,
    registry: Arc<CharacterRegistry>,
    events: flume::Sender<BackendEvent>,
}

impl Scheduler {
    pub fn new(
        config: Arc<AppConfig>,
        llm: LlmClient,
        store: Arc<StateStore>,
        memory: Arc<VectorMemory>,
        lookup: Arc<dyn EnvironmentLookup>,
        registry: Arc<CharacterRegistry>,
        events: flume::Sender<BackendEvent>,
    ) -> Self {
        Self {
            config,
            llm,
            store,
            memory,
            lookup,
            registry,
            events,
        }
    }

    /// Spawn the heartbeat and story loops as independent tasks.
    pub fn spawn(self: Arc<Self>) {
        let heartbeat = self.clone();
        tokio::spawn(async move {
            tracing::info!("Heartbeat scheduler started");
            heartbeat.run_heartbeat_loop().await;
        });

        let story = self;
        tokio::spawn(async move {
            tracing::info!("Story scheduler started");
            story.run_story_loop().await;
        });
    }

    async fn run_heartbeat_loop(&self) {
        loop {
            let now = Utc::now();
            let due = match self.advance_heartbeat_schedule(now).await {
                Ok(due) => due,
                Err(e) => {
                    tracing::error!("Heartbeat schedule error: {}", e);
                    sleep(Duration::from_secs(ERROR_RETRY_SECS)).await;
                    continue;
                }
            };

            let mut failed = false;
            for task in due {
                let result = match task {
                    HeartbeatTask::CheckinMorning => self.run_checkin("Morning").await,
                    HeartbeatTask::CheckinNight => self.run_checkin("Late Night").await,
                    HeartbeatTask::Flashback => self.run_flashback().await,
                };
                if let Err(e) = result {
                    tracing::error!("Heartbeat task {:?} failed: {}", task, e);
                    failed = true;
                }
            }

            if failed {
                sleep(Duration::from_secs(ERROR_RETRY_SECS)).await;
                continue;
            }

            let wait = self
                .time_until_next(&[TASK_CHECKIN_MORNING, TASK_CHECKIN_NIGHT, TASK_FLASHBACK])
                .await;
            sleep(wait).await;
        }
    }

    async fn run_story_loop(&self) {
        loop {
            let now = Utc::now();
            let next = match self.advance_story_schedule(now).await {
                Ok(next) => next,
                Err(e) => {
                    tracing::error!("Story schedule error: {}", e);
                    sleep(Duration::from_secs(ERROR_RETRY_SECS)).await;
                    continue;
                }
            };

            if let Some(next) = next {
                let wait = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                sleep(wait.max(Duration::from_secs(1))).await;
                continue;
            }

            // story was due: post, then loop to pick the next random delay
            if let Err(e) = self.run_story().await {
                tracing::error!("Story error: {}", e);
                sleep(Duration::from_secs(ERROR_RETRY_SECS)).await;
            }
        }
    }

    /// Seed missing heartbeat entries and collect+reschedule the due ones,
    /// all under the schedule file's lock.
    async fn advance_heartbeat_schedule(&self, now: DateTime<Utc>) -> Result<Vec<HeartbeatTask>> {
        let tasks = [
            (HeartbeatTask::CheckinMorning, self.config.checkin_morning_hour),
            (HeartbeatTask::CheckinNight, self.config.checkin_night_hour),
            (HeartbeatTask::Flashback, self.config.flashback_hour),
        ];

        self.store
            .update(SCHEDULE_FILE, move |schedule: &mut ScheduleState| {
                let mut due = Vec::new();
                for (task, hour) in tasks {
                    let next = next_daily_occurrence(now, hour);
                    match schedule.next_fire.get(task.key()) {
                        None => {
                            schedule.next_fire.insert(task.key().to_string(), next);
                        }
                        Some(at) if *at <= now => {
                            due.push(task);
                            schedule.next_fire.insert(task.key().to_string(), next);
                        }
                        Some(_) => {}
                    }
                }
                due
            })
            .await
    }

    /// Returns `Some(next)` when the story is not yet due, `None` when it
    /// just became due (and the next random delay has been persisted).
    async fn advance_story_schedule(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let delay = story_delay(
            &mut StdRng::from_entropy(),
            self.config.story_min_delay_secs,
            self.config.story_max_delay_secs,
        );

        self.store
            .update(SCHEDULE_FILE, move |schedule: &mut ScheduleState| {
                match schedule.next_fire.get(TASK_STORY).copied() {
                    None => {
                        let next = now + ChronoDuration::seconds(delay as i64);
                        schedule.next_fire.insert(TASK_STORY.to_string(), next);
                        Some(next)
                    }
                    Some(at) if at <= now => {
                        let next = now + ChronoDuration::seconds(delay as i64);
                        schedule.next_fire.insert(TASK_STORY.to_string(), next);
                        None
                    }
                    Some(at) => Some(at),
                }
            })
            .await
    }

    async fn time_until_next(&self, keys: &[&str]) -> Duration {
        let schedule: ScheduleState = self.store.get(SCHEDULE_FILE).await;
        let now = Utc::now();
        let earliest = keys
            .iter()
            .filter_map(|key| schedule.next_fire.get(*key))
            .min()
            .copied();

        match earliest {
            Some(at) if at > now => (at - now)
                .to_std()
                .unwrap_or(Duration::from_secs(ERROR_RETRY_SECS)),
            Some(_) => Duration::from_secs(1),
            None => Duration::from_secs(ERROR_RETRY_SECS),
        }
    }

    /// Send a short unsolicited check-in when the user has been silent
    /// longer than the configured gap.
    async fn run_checkin(&self, context: &str) -> Result<()> {
        let character = self.registry.default_character();
        let state = self.store.character_state(character).await;

        let gap = Utc::now() - state.last_seen;
        if gap <= ChronoDuration::hours(self.config.checkin_gap_hours) {
            tracing::debug!("Skipping {} check-in, user active recently", context);
            return Ok(());
        }

        let prompt = format!(
            "It is {}. You haven't heard from the user in a while. Send a short, casual text checking in. (e.g. 'Morning, coffee?' or 'You still up?').",
            context
        );
        let messages = [
            Message::system(format!("You are {}. Keep it very short.", character.name)),
            Message::user(prompt),
        ];
        let reply = self.llm.chat(&messages).await?;

        // advance last_seen so the other trigger hour doesn't double-send
        self.store
            .update_character_state(character, |state| {
                state.last_seen = Utc::now();
            })
            .await?;
        self.store.push_pending(reply.clone()).await?;

        tracing::info!("{} auto-message queued: {}", character.name, reply);
        let _ = self.events.send(BackendEvent::AutoMessageQueued(reply));
        Ok(())
    }

    /// Bring up one randomly chosen recent memory.
    async fn run_flashback(&self) -> Result<()> {
        let character = self.registry.default_character();
        let memories = self.memory.peek_recent(FLASHBACK_PEEK_LIMIT)?;
        let Some(memory) = choose(&memories, &mut StdRng::from_entropy()) else {
            tracing::debug!("No memories available for flashback");
            return Ok(());
        };

        let prompt = format!(
            "You are {}. You just remembered the user said this a while ago: '{}'. Ask them about it naturally. (e.g. 'Btw whatever happened with...?'). Keep it short.",
            character.name, memory.text
        );
        let messages = [
            Message::system(format!("You are {}.", character.name)),
            Message::user(prompt),
        ];
        let reply = self.llm.chat(&messages).await?;

        self.store.push_pending(reply.clone()).await?;

        tracing::info!("{} flashback queued: {}", character.name, reply);
        let _ = self.events.send(BackendEvent::AutoMessageQueued(reply));
        Ok(())
    }

    /// Overwrite the story singleton with a fresh caption.
    async fn run_story(&self) -> Result<()> {
        let character = self.registry.default_character();
        let state = self.store.character_state(character).await;
        let weather = self.lookup.weather().await;
        let trending = self.lookup.trending_topic().await;
        let environment = environment::snapshot_now(weather, trending);

        let prompt = format!(
            "You are {}. It is {}. Your mood is {}.\n\
             Write a SHORT, cynical, or funny \"Instagram Story\" caption about what you are doing right now.\n\
             Examples: \"Why is the gym always full at 5pm?\", \"Client just asked to 'make the logo pop'. I quit.\", \"3am thoughts: Do penguins have knees?\"\n\
             Output ONLY the text. No quotes.",
            character.name,
            environment.summary(),
            state.mood
        );
        let text = self.llm.generate(&prompt).await?.trim().to_string();

        self.store
            .set_story(Story {
                text: text.clone(),
                timestamp: Utc::now(),
                image: None,
            })
            .await?;

        tracing::info!("New story posted: {}", text);
        let _ = self.events.send(BackendEvent::StoryPosted(text));
        Ok(())
    }
}

/// Next local wall-clock occurrence of `hour:00` strictly after `after`.
pub fn next_daily_occurrence(after: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let after_local = after.with_timezone(&Local);
    let mut date = after_local.date_naive();

    loop {
        if let Some(naive) = date.and_hms_opt(hour.min(23), 0, 0) {
            if let Some(candidate) = Local.from_local_datetime(&naive).earliest() {
                if candidate > after_local {
                    return candidate.with_timezone(&Utc);
                }
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => return after + ChronoDuration::hours(24),
        }
    }
}

/// Uniform delay in seconds for the next story post.
pub fn story_delay<R: Rng>(rng: &mut R, min_secs: u64, max_secs: u64) -> u64 {
    if min_secs >= max_secs {
        return min_secs;
    }
    rng.gen_range(min_secs..=max_secs)
}

fn choose<'a, T, R: Rng>(items: &'a [T], rng: &mut R) -> Option<&'a T> {
    if items.is_empty() {
        None
    } else {
        items.get(rng.gen_range(0..items.len()))
    }
}
