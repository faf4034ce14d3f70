// src/bot/filter.rs - Mask/exclude word filter with a bounded scan queue

use anyhow::Result;
use log::{debug, error, info, warn};
use regex::{Regex, RegexBuilder};
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, RwLock};

use crate::config::SettingsStore;
use crate::platforms::PlatformConnection;
use crate::storage::{Database, FilterKind};
use crate::types::{BotError, ChatMessage, ChatUser, Embed, OutgoingMessage, Snowflake};

use super::responses::{self, NEGATIVE_COLOR};

/// Longest annotated excerpt kept before truncation.
pub const MAX_PREVIEW_CHARS: usize = 950;

const MARK_START: &str = "\u{1b}[4;35m";
const MARK_END: &str = "\u{1b}[0m";
const TRUNCATED_SUFFIX: &str = "\u{1b}[2;31m...\nMessage is too long to preview.\u{1b}[0m";

fn ansi_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\x1b\[[\d;]+m").expect("ansi regex is valid"))
}

fn format_char_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\p{Cf}").expect("format char regex is valid"))
}

/// Lowercase without changing any character's UTF-8 width, so byte offsets
/// computed on the folded text stay valid on the original.
pub fn fold_case(text: &str) -> String {
    text.chars()
        .map(|c| {
            let mut lower = c.to_lowercase();
            match (lower.next(), lower.next()) {
                (Some(l), None) if l.len_utf8() == c.len_utf8() => l,
                _ => c,
            }
        })
        .collect()
}

/// True when some exclusion phrase occurrence fully contains the match
/// `word` starting at byte `index` of `text`.
pub fn is_excluded(phrases: &[String], text: &str, word: &str, index: usize) -> bool {
    if phrases.is_empty() {
        return false;
    }

    let folded = fold_case(text);
    let match_end = index + word.len();

    phrases.iter().filter(|p| !p.is_empty()).any(|phrase| {
        let mut cursor = 0;
        while cursor <= folded.len() {
            let Some(relative) = folded[cursor..].find(phrase.as_str()) else {
                break;
            };
            let start = cursor + relative;
            let end = start + phrase.len();
            if start <= index && match_end <= end && end <= folded.len() && folded[start..end] == **phrase {
                return true;
            }
            cursor = end;
        }
        false
    })
}

/// Snapshot of the filter rules with masks compiled.
#[derive(Debug, Default)]
pub struct FilterCache {
    masks: Vec<String>,
    excludes: Vec<String>,
    /// Case-folded excludes used for matching.
    exclude_phrases: Vec<String>,
    patterns: Vec<Regex>,
}

impl FilterCache {
    pub fn build(mut masks: Vec<String>, excludes: Vec<String>) -> Self {
        masks.sort();
        masks.reverse();

        let patterns = masks
            .iter()
            .filter_map(|mask| {
                match RegexBuilder::new(mask).case_insensitive(true).multi_line(true).build() {
                    Ok(regex) => Some(regex),
                    Err(e) => {
                        warn!("Skipping malformed filter mask '{}': {}", mask, e);
                        None
                    }
                }
            })
            .collect();

        let exclude_phrases = excludes.iter().map(|e| fold_case(e)).collect();

        Self {
            masks,
            excludes,
            exclude_phrases,
            patterns,
        }
    }

    pub fn contains(&self, kind: FilterKind, item: &str) -> bool {
        match kind {
            FilterKind::Mask => self.masks.iter().any(|m| m == item),
            FilterKind::Exclude => self.excludes.iter().any(|e| e == item),
        }
    }

    pub fn contains_any(&self, item: &str) -> bool {
        self.contains(FilterKind::Mask, item) || self.contains(FilterKind::Exclude, item)
    }

    pub fn masks(&self) -> &[String] {
        &self.masks
    }

    pub fn excludes(&self) -> &[String] {
        &self.excludes
    }

    pub fn compiled_patterns(&self) -> Vec<String> {
        self.patterns.iter().map(|p| p.as_str().to_string()).collect()
    }

    pub fn is_excluded(&self, text: &str, word: &str, index: usize) -> bool {
        is_excluded(&self.exclude_phrases, text, word, index)
    }

    /// Unexcluded matches in mask order, plus the annotated excerpt.
    pub fn get_bad_words(&self, message: &str) -> (Vec<String>, String) {
        let clean = ansi_regex().replace_all(message, "");

        let mut words = Vec::new();
        let mut spans = Vec::new();
        for pattern in &self.patterns {
            for m in pattern.find_iter(&clean) {
                if m.start() == m.end() || self.is_excluded(&clean, m.as_str(), m.start()) {
                    continue;
                }
                words.push(m.as_str().to_string());
                spans.push((m.start(), m.end()));
            }
        }

        (words, annotate(&clean, spans))
    }
}

fn annotate(text: &str, mut spans: Vec<(usize, usize)>) -> String {
    spans.sort_unstable();

    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some(last) if start < last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }

    let mut annotated = String::with_capacity(text.len() + merged.len() * (MARK_START.len() + MARK_END.len()));
    let mut last = 0;
    for (start, end) in merged {
        annotated.push_str(&text[last..start]);
        annotated.push_str(MARK_START);
        annotated.push_str(&text[start..end]);
        annotated.push_str(MARK_END);
        last = end;
    }
    annotated.push_str(&text[last..]);

    let stripped = format_char_regex().replace_all(&annotated, "").into_owned();
    if stripped.chars().count() > MAX_PREVIEW_CHARS {
        let preview = responses::truncate_chars(&stripped, MAX_PREVIEW_CHARS);
        format!("{}{}", without_partial_escape(&preview), TRUNCATED_SUFFIX)
    } else {
        stripped
    }
}

/// Drop a trailing escape sequence that was cut before its final `m`.
fn without_partial_escape(text: &str) -> &str {
    match text.rfind('\u{1b}') {
        Some(idx) if !text[idx..].contains('m') => &text[..idx],
        _ => text,
    }
}

/// Raised when a scanned message contains at least one unexcluded match.
#[derive(Debug, Clone)]
pub struct FilterTriggered {
    pub message: ChatMessage,
    pub channel_id: Snowflake,
    pub author: ChatUser,
    pub bad_words: Vec<String>,
    pub annotated: String,
}

/// Filter rules backed by the store, mirrored into a swappable cache.
pub struct FilterEngine {
    db: Database,
    cache: RwLock<Arc<FilterCache>>,
}

impl FilterEngine {
    pub async fn new(db: Database) -> Result<Self> {
        let engine = Self {
            db,
            cache: RwLock::new(Arc::new(FilterCache::default())),
        };
        engine.rebuild().await?;
        Ok(engine)
    }

    /// Reload every rule and swap in a freshly compiled cache.
    pub async fn rebuild(&self) -> Result<()> {
        let mut guard = self.cache.write().await;
        *guard = Arc::new(self.load_cache()?);
        info!(
            "Filter cache rebuilt: {} masks, {} excludes",
            guard.masks.len(),
            guard.excludes.len()
        );
        Ok(())
    }

    fn load_cache(&self) -> Result<FilterCache> {
        let masks = self.db.filter_rules(FilterKind::Mask)?;
        let excludes = self.db.filter_rules(FilterKind::Exclude)?;
        Ok(FilterCache::build(masks, excludes))
    }

    pub async fn snapshot(&self) -> Arc<FilterCache> {
        Arc::clone(&*self.cache.read().await)
    }

    pub async fn get_bad_words(&self, message: &str) -> (Vec<String>, String) {
        self.snapshot().await.get_bad_words(message)
    }

    /// Add a rule. Fails when the string exists as either a mask or an exclude.
    pub async fn add_rule(&self, kind: FilterKind, item: &str) -> Result<()> {
        let mut guard = self.cache.write().await;
        if guard.contains_any(item) || !self.db.add_filter_rule(kind, item)? {
            return Err(BotError::validation(
                format!("Unable to add {}", kind.label()),
                format!("the provided {} `{}` exists already as an exclude or mask...", kind.label(), item),
            )
            .into());
        }
        *guard = Arc::new(self.load_cache()?);
        info!("Added filter {} '{}'", kind.label(), item);
        Ok(())
    }

    /// Remove a rule. Fails when it does not exist with that kind.
    pub async fn remove_rule(&self, kind: FilterKind, item: &str) -> Result<()> {
        let mut guard = self.cache.write().await;
        if !guard.contains(kind, item) || !self.db.remove_filter_rule(kind, item)? {
            return Err(BotError::not_found(
                format!("Unable to remove {}", kind.label()),
                format!("the provided {} `{}` does not exist...", kind.label(), item),
            )
            .into());
        }
        *guard = Arc::new(self.load_cache()?);
        info!("Removed filter {} '{}'", kind.label(), item);
        Ok(())
    }

    pub async fn list(&self, kind: FilterKind) -> Vec<String> {
        let cache = self.snapshot().await;
        match kind {
            FilterKind::Mask => cache.masks().to_vec(),
            FilterKind::Exclude => cache.excludes().to_vec(),
        }
    }

    /// Scan a message and build the event when anything matched.
    pub async fn check_message(&self, message: &ChatMessage) -> Option<FilterTriggered> {
        let (bad_words, annotated) = self.get_bad_words(&message.content).await;
        if bad_words.is_empty() {
            return None;
        }
        Some(FilterTriggered {
            message: message.clone(),
            channel_id: message.channel_id,
            author: message.author.clone(),
            bad_words,
            annotated,
        })
    }
}

/// Gates messages, feeds the scan worker and hands hits to the notifier.
pub struct FilterSystem {
    engine: Arc<FilterEngine>,
    platform: Arc<dyn PlatformConnection>,
    settings: SettingsStore,
    scan_tx: mpsc::Sender<ChatMessage>,
}

impl FilterSystem {
    /// Spawn the scan worker and the notifier, returning the submit side.
    pub fn start(
        engine: Arc<FilterEngine>,
        platform: Arc<dyn PlatformConnection>,
        settings: SettingsStore,
        queue_capacity: usize,
    ) -> Self {
        let (scan_tx, scan_rx) = mpsc::channel::<ChatMessage>(queue_capacity);
        let (event_tx, event_rx) = mpsc::channel::<FilterTriggered>(queue_capacity);

        tokio::spawn(Self::run_scanner(Arc::clone(&engine), scan_rx, event_tx));
        tokio::spawn(FilterNotifier::new(Arc::clone(&platform), settings.clone()).run(event_rx));

        Self {
            engine,
            platform,
            settings,
            scan_tx,
        }
    }

    async fn run_scanner(
        engine: Arc<FilterEngine>,
        mut scan_rx: mpsc::Receiver<ChatMessage>,
        event_tx: mpsc::Sender<FilterTriggered>,
    ) {
        info!("Filter worker started");
        while let Some(message) = scan_rx.recv().await {
            if let Some(event) = engine.check_message(&message).await {
                debug!("Filter hit in message {}: {:?}", message.id, event.bad_words);
                if event_tx.send(event).await.is_err() {
                    warn!("Filter notifier stopped, dropping event");
                }
            }
        }
        info!("Filter worker stopped");
    }

    pub fn engine(&self) -> &Arc<FilterEngine> {
        &self.engine
    }

    async fn should_scan(&self, message: &ChatMessage) -> Result<bool> {
        let settings = self.settings.get().await;
        if settings.filter_channel_id == 0 || message.is_private() || !message.kind.is_user_content() {
            return Ok(false);
        }
        if self.platform.current_user_id().await == Some(message.author.id) {
            return Ok(false);
        }
        let channel = self.platform.get_channel(message.channel_id).await?;
        Ok(!settings.excluded_channels.contains(&channel.effective_id()))
    }

    pub async fn handle_message_created(&self, message: &ChatMessage) -> Result<()> {
        if self.should_scan(message).await? {
            self.submit(message.clone());
        }
        Ok(())
    }

    pub async fn handle_message_updated(&self, before: Option<&ChatMessage>, after: &ChatMessage) -> Result<()> {
        if before.map(|b| b.content == after.content).unwrap_or(false) {
            return Ok(());
        }
        self.handle_message_created(after).await
    }

    fn submit(&self, message: ChatMessage) {
        if let Err(e) = self.scan_tx.try_send(message) {
            warn!("Filter queue rejected message: {}", e);
        }
    }
}

/// Drains filter events and posts them to the filter channel.
pub struct FilterNotifier {
    platform: Arc<dyn PlatformConnection>,
    settings: SettingsStore,
}

impl FilterNotifier {
    pub fn new(platform: Arc<dyn PlatformConnection>, settings: SettingsStore) -> Self {
        Self { platform, settings }
    }

    pub async fn run(self, mut events: mpsc::Receiver<FilterTriggered>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.notify(&event).await {
                error!("Failed to send filter notification: {}", e);
            }
        }
    }

    pub async fn notify(&self, event: &FilterTriggered) -> Result<()> {
        let channel = self.settings.get().await.filter_channel_id;
        if channel == 0 {
            return Ok(());
        }
        self.platform
            .send_message(channel, &OutgoingMessage::embed(Self::build_embed(event)))
            .await?;
        Ok(())
    }

    pub fn build_embed(event: &FilterTriggered) -> Embed {
        let words: String = event.bad_words.iter().map(|w| format!("{} ", w)).collect();

        Embed::new("Filter: Word Detected")
            .color(NEGATIVE_COLOR)
            .description(format!("Filter Trigger(s):```{}```Excerpt:```{}```", words, event.annotated))
            .field("Author ID", event.author.id.to_string(), true)
            .field("Author Username", event.author.tag(), true)
            .field("Author Mention", event.author.mention(), true)
            .field("Channel", crate::types::channel_mention(event.channel_id), true)
            .field("Timestamp (UTC)", responses::format_date(event.message.timestamp), true)
            .field("Link", event.message.url(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BotSettings;
    use crate::platforms::testing::{test_message, test_user, FakePlatform, BOT_USER};
    use std::time::Duration;

    fn cache(masks: &[&str], excludes: &[&str]) -> FilterCache {
        FilterCache::build(
            masks.iter().map(|s| s.to_string()).collect(),
            excludes.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_exclusion_contains_match() {
        let cache = cache(&["damn"], &["goddamnit"]);
        let (words, annotated) = cache.get_bad_words("goddamnit");
        assert!(words.is_empty());
        assert_eq!(annotated, "goddamnit");
    }

    #[test]
    fn test_match_outside_exclusion_is_reported() {
        let cache = cache(&["damn"], &["goddamnit"]);
        let (words, annotated) = cache.get_bad_words("goddamnit, damn it");
        assert_eq!(words, vec!["damn"]);
        assert_eq!(annotated, format!("goddamnit, {}damn{} it", MARK_START, MARK_END));
    }

    #[test]
    fn test_no_excludes_fast_path() {
        assert!(!is_excluded(&[], "anything", "any", 0));
    }

    #[test]
    fn test_exclusion_scans_past_non_containing_occurrence() {
        let phrases = vec!["class".to_string()];
        // "ass" at 14 is inside the second "class" only
        assert!(is_excluded(&phrases, "class of the class", "ass", 15));
        assert!(!is_excluded(&phrases, "class ass", "ass", 6));
    }

    #[test]
    fn test_exclusion_is_case_insensitive() {
        let cache = cache(&["damn"], &["GodDamnIt"]);
        assert!(cache.get_bad_words("GODDAMNIT").0.is_empty());
    }

    #[test]
    fn test_annotation_with_multiple_masks() {
        let cache = cache(&["bad", "worse"], &[]);
        let (words, annotated) = cache.get_bad_words("bad and worse");
        // masks run in descending order
        assert_eq!(words, vec!["worse", "bad"]);
        assert_eq!(
            annotated,
            format!("{m}bad{e} and {m}worse{e}", m = MARK_START, e = MARK_END)
        );
    }

    #[test]
    fn test_overlapping_matches_are_merged() {
        let cache = cache(&["abc", "bcd"], &[]);
        let (words, annotated) = cache.get_bad_words("xabcdx");
        assert_eq!(words.len(), 2);
        assert_eq!(annotated, format!("x{}abcd{}x", MARK_START, MARK_END));
    }

    #[test]
    fn test_clean_message_is_unchanged_except_format_chars() {
        let cache = cache(&["damn"], &[]);
        let (words, annotated) = cache.get_bad_words("hello\u{200b} there");
        assert!(words.is_empty());
        assert_eq!(annotated, "hello there");

        let (_, annotated) = cache.get_bad_words("");
        assert_eq!(annotated, "");
    }

    #[test]
    fn test_incoming_ansi_codes_are_stripped() {
        let cache = cache(&["damn"], &[]);
        let (words, annotated) = cache.get_bad_words("\u{1b}[1;31mda\u{1b}[0mmn");
        assert_eq!(words, vec!["damn"]);
        assert_eq!(annotated, format!("{}damn{}", MARK_START, MARK_END));
    }

    #[test]
    fn test_long_message_is_truncated() {
        let cache = cache(&["zzz"], &[]);
        let text = "a".repeat(2000);
        let (_, annotated) = cache.get_bad_words(&text);
        assert!(annotated.ends_with(TRUNCATED_SUFFIX));
        assert_eq!(annotated.chars().count(), MAX_PREVIEW_CHARS + TRUNCATED_SUFFIX.chars().count());
    }

    #[test]
    fn test_truncation_does_not_split_highlight_code() {
        let cache = cache(&["zzz"], &[]);
        let text = format!("{}zzz{}", "a".repeat(MAX_PREVIEW_CHARS - 4), "a".repeat(100));
        let (_, annotated) = cache.get_bad_words(&text);
        assert_eq!(annotated, format!("{}{}", "a".repeat(MAX_PREVIEW_CHARS - 4), TRUNCATED_SUFFIX));

        let text = format!("{}zzz{}", "a".repeat(MAX_PREVIEW_CHARS - 12), "a".repeat(100));
        let (_, annotated) = cache.get_bad_words(&text);
        assert_eq!(
            annotated,
            format!("{}{}zzz{}", "a".repeat(MAX_PREVIEW_CHARS - 12), MARK_START, TRUNCATED_SUFFIX)
        );
    }

    #[test]
    fn test_malformed_mask_is_skipped() {
        let cache = cache(&["(unclosed", "ok"], &[]);
        assert_eq!(cache.compiled_patterns(), vec!["ok"]);
        assert_eq!(cache.get_bad_words("ok then").0, vec!["ok"]);
    }

    #[test]
    fn test_fold_case_keeps_offsets() {
        let text = "İstanbul DAMN";
        assert_eq!(fold_case(text).len(), text.len());
        assert!(fold_case(text).ends_with("damn"));
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.add_filter_rule(FilterKind::Mask, "alpha").unwrap();
        db.add_filter_rule(FilterKind::Mask, "zeta").unwrap();
        let engine = FilterEngine::new(db).await.unwrap();

        let first = engine.snapshot().await.compiled_patterns();
        engine.rebuild().await.unwrap();
        let second = engine.snapshot().await.compiled_patterns();
        assert_eq!(first, second);
        assert_eq!(first, vec!["zeta", "alpha"]);
    }

    #[tokio::test]
    async fn test_add_rejects_cross_kind_duplicates() {
        let engine = FilterEngine::new(Database::open_in_memory().unwrap()).await.unwrap();
        engine.add_rule(FilterKind::Mask, "heck").await.unwrap();

        let err = engine.add_rule(FilterKind::Exclude, "heck").await.unwrap_err();
        assert!(matches!(err.downcast_ref::<BotError>(), Some(BotError::Validation { .. })));

        let err = engine.remove_rule(FilterKind::Exclude, "heck").await.unwrap_err();
        assert!(matches!(err.downcast_ref::<BotError>(), Some(BotError::NotFound { .. })));

        assert_eq!(engine.get_bad_words("oh heck").await.0, vec!["heck"]);
        engine.remove_rule(FilterKind::Mask, "heck").await.unwrap();
        assert!(engine.get_bad_words("oh heck").await.0.is_empty());
    }

    #[tokio::test]
    async fn test_filter_hit_reaches_filter_channel() {
        let db = Database::open_in_memory().unwrap();
        db.add_filter_rule(FilterKind::Mask, "damn").unwrap();
        let engine = Arc::new(FilterEngine::new(db).await.unwrap());

        let platform = Arc::new(FakePlatform::new());
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::with_settings(
            dir.path().join("settings.yaml"),
            BotSettings {
                filter_channel_id: 42,
                excluded_channels: vec![7],
                ..Default::default()
            },
        );
        let system = FilterSystem::start(engine, platform.clone(), settings, 16);

        let excluded = test_message(1, 7, test_user(10), "damn");
        let from_bot = test_message(2, 8, test_user(BOT_USER), "damn");
        let hit = test_message(3, 8, test_user(10), "well damn");
        system.handle_message_created(&excluded).await.unwrap();
        system.handle_message_created(&from_bot).await.unwrap();
        system.handle_message_created(&hit).await.unwrap();

        let mut sent = Vec::new();
        for _ in 0..50 {
            sent = platform.sent_to(42).await;
            if !sent.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sent.len(), 1);
        let embed = &sent[0].embeds[0];
        assert_eq!(embed.title.as_deref(), Some("Filter: Word Detected"));
        assert_eq!(embed.field_value("Author ID"), Some("10"));
        assert!(embed.description.as_deref().unwrap_or("").contains("damn "));
    }

    #[tokio::test]
    async fn test_unchanged_edit_is_ignored() {
        let engine = Arc::new(FilterEngine::new(Database::open_in_memory().unwrap()).await.unwrap());
        let platform = Arc::new(FakePlatform::new());
        let dir = tempfile::tempdir().unwrap();
        let settings = SettingsStore::with_settings(
            dir.path().join("settings.yaml"),
            BotSettings {
                filter_channel_id: 42,
                ..Default::default()
            },
        );
        let system = FilterSystem::start(engine, platform, settings, 1);

        let message = test_message(1, 8, test_user(10), "same");
        assert!(!system.should_scan(&test_message(1, 8, test_user(BOT_USER), "x")).await.unwrap());
        system.handle_message_updated(Some(&message), &message).await.unwrap();
        assert!(system.should_scan(&message).await.unwrap());
    }
}
