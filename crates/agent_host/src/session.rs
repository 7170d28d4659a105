//! Session State
//!
//! Owns the chat history, the selected mode and skill, the response being
//! streamed for the current turn and the single live runner. Only this type
//! mutates the history; workers just send events over the turn's channel.

use providers::{clean_reply, InferenceRunner, RunnerHandle};
use services::{extract_text, ScoredChunk, VectorStore};
use shared::agent_api::{PromptMode, SkillTag};
use shared::events::{Notice, RunnerEvent, SessionUpdate};
use shared::history::ChatHistory;
use shared::settings::AppSettings;
use shared::AssistantError;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::mpsc::{sync_channel, Receiver, TryRecvError};
use std::sync::Arc;
use uuid::Uuid;

use crate::assembler::{AssembledPrompt, ContextAssembler};
use crate::optimizer::{PromptOptimizer, SkillOptimizer};
use crate::token_counter::{TokenCounter, TokenMeter};

/// Room for this many undelivered runner events before the worker waits
const EVENT_BUFFER: usize = 64;

/// Chunks listed by [`Session::preview_chunks`]
pub const PREVIEW_CHUNKS: usize = 5;
/// Characters kept per previewed chunk
pub const PREVIEW_CHARS: usize = 300;

struct ActiveTurn {
    id: Uuid,
    mode: PromptMode,
    handle: RunnerHandle,
    events: Receiver<RunnerEvent>,
    response: String,
    /// File-injection turns are shown but not recorded in the history
    record: bool,
}

pub struct Session {
    settings: AppSettings,
    history: ChatHistory,
    mode: PromptMode,
    skill: SkillTag,
    counter: Arc<dyn TokenCounter>,
    assembler: ContextAssembler,
    runner: Box<dyn InferenceRunner>,
    store: Option<Box<dyn VectorStore>>,
    active: Option<ActiveTurn>,
    pending: VecDeque<SessionUpdate>,
}

impl Session {
    pub fn new(
        settings: AppSettings,
        runner: Box<dyn InferenceRunner>,
        counter: Arc<dyn TokenCounter>,
    ) -> Self {
        let assembler = ContextAssembler::new(
            counter.clone(),
            Box::new(SkillOptimizer::new()),
            settings.budget,
        );
        Self {
            history: ChatHistory::with_system(settings.system_prompt.clone()),
            mode: settings.default_mode,
            skill: settings.default_skill,
            counter,
            assembler,
            runner,
            store: None,
            active: None,
            pending: VecDeque::new(),
            settings,
        }
    }

    pub fn with_optimizer(mut self, optimizer: Box<dyn PromptOptimizer>) -> Self {
        self.assembler = ContextAssembler::new(self.counter.clone(), optimizer, self.settings.budget);
        self
    }

    pub fn with_vector_store(mut self, store: Box<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub fn mode(&self) -> PromptMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PromptMode) {
        tracing::info!("prompt mode set to {}", mode);
        self.mode = mode;
    }

    pub fn skill(&self) -> SkillTag {
        self.skill
    }

    pub fn set_skill(&mut self, skill: SkillTag) {
        tracing::info!("skill set to {}", skill);
        self.skill = skill;
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    /// Whether a turn's worker is still producing output
    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .map(|turn| turn.handle.is_running())
            .unwrap_or(false)
    }

    /// Whether a turn has been started and not yet completed
    pub fn has_active_turn(&self) -> bool {
        self.active.is_some()
    }

    /// Response streamed so far for the current turn
    pub fn streamed_response(&self) -> &str {
        self.active
            .as_ref()
            .map(|turn| turn.response.as_str())
            .unwrap_or("")
    }

    /// Count tokens of draft input against the ceiling
    pub fn token_meter(&self, text: &str) -> TokenMeter {
        TokenMeter::measure(self.counter.as_ref(), text, &self.settings.budget)
    }

    /// Start a turn for `message`.
    ///
    /// A running turn is terminated first and its partial response dropped.
    /// Returns the new turn's id; on error no process has been started.
    pub fn submit(&mut self, message: &str) -> Result<Uuid, AssistantError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(AssistantError::EmptyMessage);
        }
        self.cancel();

        let chunks = self.retrieve(message);
        let prompt: AssembledPrompt =
            self.assembler
                .prepare(&self.history, message, self.mode, self.skill, &chunks)?;

        self.write_debug_prompt(&prompt.text);
        self.assembler.enforce_ceiling(prompt.token_count)?;

        tracing::info!(
            "starting {} turn: {} tokens, {} context chunks",
            self.mode,
            prompt.token_count,
            chunks.len()
        );
        self.history.push_user(message);
        self.launch(prompt.text, true)
    }

    /// Send a file's contents as the whole prompt, bypassing assembly.
    ///
    /// The ceiling check still applies. Neither the file nor the answer is
    /// added to the history.
    pub fn submit_file(&mut self, path: &Path) -> Result<Uuid, AssistantError> {
        self.cancel();

        let contents = extract_text(path).map_err(|e| AssistantError::file_access(path, e))?;
        let prompt = format!(
            "SYSTEM: {}\nUSER:\n{}\nASSISTANT:",
            self.settings.system_prompt, contents
        );

        let token_count = self.assembler.measure(&prompt);
        self.write_debug_prompt(&prompt);
        self.assembler.enforce_ceiling(token_count)?;

        tracing::info!("starting file turn for {}: {} tokens", path.display(), token_count);
        self.launch(prompt, false)
    }

    /// Terminate the running turn, if any. Its partial response is discarded.
    pub fn cancel(&mut self) -> bool {
        match self.active.take() {
            Some(mut turn) => {
                turn.handle.terminate();
                tracing::info!("cancelled turn {}", turn.id);
                true
            }
            None => false,
        }
    }

    /// Drain whatever the worker has sent so far without blocking
    pub fn poll_updates(&mut self) -> Vec<SessionUpdate> {
        loop {
            let Some(turn) = self.active.as_mut() else {
                break;
            };
            match turn.events.try_recv() {
                Ok(event) => self.handle_event(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.finish_turn(),
            }
        }
        self.pending.drain(..).collect()
    }

    /// Block for the next update of the current turn.
    /// Returns `None` once nothing is in flight and every update was handed out.
    pub fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            if let Some(update) = self.pending.pop_front() {
                return Some(update);
            }
            let turn = self.active.as_mut()?;
            match turn.events.recv() {
                Ok(event) => self.handle_event(event),
                Err(_) => self.finish_turn(),
            }
        }
    }

    /// Index one file into the vector store
    pub fn ingest_file(&self, path: &Path) -> Result<Notice, AssistantError> {
        let store = self.store()?;
        let stats = store
            .ingest_file(path)
            .map_err(|e| AssistantError::file_access(path, format!("{:#}", e)))?;
        Ok(Notice::FileVectorized {
            name: display_name(path),
            chunks: stats.chunks,
        })
    }

    /// Index every text file under `path`
    pub fn ingest_folder(&self, path: &Path) -> Result<Notice, AssistantError> {
        let store = self.store()?;
        let stats = store
            .ingest_folder(path)
            .map_err(|e| AssistantError::file_access(path, format!("{:#}", e)))?;
        if stats.errors > 0 {
            tracing::warn!("{} files under {} could not be indexed", stats.errors, path.display());
        }
        Ok(Notice::FolderVectorized {
            name: display_name(path),
            chunks: stats.chunks,
        })
    }

    /// First stored chunks, each cut to [`PREVIEW_CHARS`] characters
    pub fn preview_chunks(&self) -> Result<Vec<String>, AssistantError> {
        let chunks = self
            .store()?
            .all_chunks()
            .map_err(|e| AssistantError::Retrieval(format!("{:#}", e)))?;
        Ok(chunks
            .into_iter()
            .take(PREVIEW_CHUNKS)
            .map(|c| c.text.chars().take(PREVIEW_CHARS).collect())
            .collect())
    }

    /// Read a file so its text can be submitted as a message
    pub fn load_file_text(&self, path: &Path) -> Result<String, AssistantError> {
        let text = extract_text(path).map_err(|e| AssistantError::file_access(path, e))?;
        tracing::info!("loaded {} ({} chars)", path.display(), text.len());
        Ok(text)
    }

    fn store(&self) -> Result<&dyn VectorStore, AssistantError> {
        self.store
            .as_deref()
            .ok_or_else(|| AssistantError::Retrieval("no vector store configured".to_string()))
    }

    /// Context for a message; retrieval problems only cost the context
    fn retrieve(&self, message: &str) -> Vec<ScoredChunk> {
        let Some(store) = self.store.as_deref() else {
            return Vec::new();
        };
        match store.query(message, self.settings.retrieval.top_k) {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!("retrieval failed, continuing without context: {:#}", e);
                Vec::new()
            }
        }
    }

    fn write_debug_prompt(&self, text: &str) {
        let path = &self.settings.debug_prompt_path;
        if path.is_empty() {
            return;
        }
        if let Err(e) = std::fs::write(path, text) {
            tracing::warn!("could not write {}: {}", path, e);
        }
    }

    fn launch(&mut self, prompt: String, record: bool) -> Result<Uuid, AssistantError> {
        let (tx, rx) = sync_channel(EVENT_BUFFER);
        let handle = self
            .runner
            .start(prompt, tx)
            .map_err(|e| AssistantError::ProcessLaunch {
                executable: self.settings.inference.executable.clone(),
                message: format!("{:#}", e),
            })?;

        let id = handle.id();
        self.active = Some(ActiveTurn {
            id,
            mode: self.mode,
            handle,
            events: rx,
            response: String::new(),
            record,
        });
        Ok(id)
    }

    fn handle_event(&mut self, event: RunnerEvent) {
        let Some(turn) = self.active.as_mut() else {
            return;
        };
        match event {
            RunnerEvent::Fragment(text) => {
                turn.response.push_str(&text);
                self.pending.push_back(SessionUpdate::Fragment(text));
            }
            RunnerEvent::Separator => {
                turn.response.push('\n');
                self.pending.push_back(SessionUpdate::Fragment("\n".to_string()));
            }
            RunnerEvent::LaunchFailed {
                executable,
                message,
            } => {
                let err = AssistantError::ProcessLaunch {
                    executable,
                    message,
                };
                tracing::warn!("{}", err);
                self.pending.push_back(SessionUpdate::Notice(Notice::from(&err)));
            }
            RunnerEvent::Exited {
                code,
                saw_end_marker,
            } => {
                tracing::info!(
                    "turn {} exited with {:?}, end marker seen: {}",
                    turn.id,
                    code,
                    saw_end_marker
                );
                self.finish_turn();
            }
        }
    }

    /// Close out the active turn: record the response or report that there was none
    fn finish_turn(&mut self) {
        let Some(turn) = self.active.take() else {
            return;
        };
        let response = clean_reply(&turn.response, &self.settings.stream);
        turn.handle.join();

        if response.is_empty() {
            self.pending.push_back(SessionUpdate::Notice(Notice::NoResponse));
        } else if turn.record {
            self.history.push_assistant(response.clone());
        }

        self.pending.push_back(SessionUpdate::Completed {
            turn_id: turn.id,
            mode: turn.mode,
            response,
        });
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use parking_lot::Mutex;
    use services::{HashingEmbedder, SqliteVectorStore};
    use shared::settings::TokenBudget;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc::SyncSender;

    /// Replays a fixed list of events and remembers every prompt it was given
    struct ScriptedRunner {
        script: Vec<RunnerEvent>,
        launches: Arc<AtomicUsize>,
        prompts: Arc<Mutex<Vec<String>>>,
        hold: Option<Arc<AtomicBool>>,
    }

    impl ScriptedRunner {
        fn new(script: Vec<RunnerEvent>) -> Self {
            Self {
                script,
                launches: Arc::new(AtomicUsize::new(0)),
                prompts: Arc::new(Mutex::new(Vec::new())),
                hold: None,
            }
        }
    }

    impl InferenceRunner for ScriptedRunner {
        fn start(&self, prompt: String, events: SyncSender<RunnerEvent>) -> Result<RunnerHandle> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().push(prompt);
            let script = self.script.clone();
            let hold = self.hold.clone();
            let cancelled = Arc::new(AtomicBool::new(false));
            let worker = std::thread::spawn({
                let cancelled = cancelled.clone();
                move || {
                    if let Some(hold) = hold {
                        while !hold.load(Ordering::SeqCst) && !cancelled.load(Ordering::SeqCst) {
                            std::thread::sleep(std::time::Duration::from_millis(5));
                        }
                    }
                    for event in script {
                        if events.send(event).is_err() {
                            return;
                        }
                    }
                }
            });
            Ok(RunnerHandle::new(cancelled, Arc::new(Mutex::new(None)), worker))
        }
    }

    fn settings(dir: &Path) -> AppSettings {
        AppSettings {
            debug_prompt_path: dir.join("last_prompt_debug.txt").display().to_string(),
            ..Default::default()
        }
    }

    fn word_counter() -> Arc<dyn TokenCounter> {
        Arc::new(|text: &str| text.split_whitespace().count())
    }

    fn answer_script() -> Vec<RunnerEvent> {
        vec![
            RunnerEvent::Fragment("ASSISTANT: Answer: Paris\n".into()),
            RunnerEvent::Fragment("is the capital.\n".into()),
            RunnerEvent::Separator,
            RunnerEvent::Exited {
                code: Some(0),
                saw_end_marker: false,
            },
        ]
    }

    fn drain(session: &mut Session) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        while let Some(update) = session.next_update() {
            updates.push(update);
        }
        updates
    }

    #[test]
    fn test_turn_appends_user_and_response() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(answer_script());
        let prompts = runner.prompts.clone();
        let mut session = Session::new(settings(dir.path()), Box::new(runner), word_counter());

        let id = session.submit("  capital of France?  ").unwrap();
        let updates = drain(&mut session);

        assert_eq!(
            updates[0],
            SessionUpdate::Fragment("ASSISTANT: Answer: Paris\n".into())
        );
        assert_eq!(updates[2], SessionUpdate::Fragment("\n".into()));
        match updates.last().unwrap() {
            SessionUpdate::Completed {
                turn_id,
                mode,
                response,
            } => {
                assert_eq!(*turn_id, id);
                assert_eq!(*mode, PromptMode::Answer);
                assert_eq!(response, "Paris\nis the capital.");
            }
            other => panic!("unexpected update: {other:?}"),
        }

        let rendered = session.history().render();
        assert_eq!(
            rendered,
            "SYSTEM: You are a helpful assistant.\nUSER: capital of France?\n\
             ASSISTANT: Paris\nis the capital."
        );
        assert!(!session.has_active_turn());

        let prompt = prompts.lock()[0].clone();
        assert!(prompt.ends_with("USER: capital of France?\nASSISTANT: Answer:"));
        let debug = std::fs::read_to_string(dir.path().join("last_prompt_debug.txt")).unwrap();
        assert_eq!(debug, prompt);
    }

    #[test]
    fn test_over_length_never_launches() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.budget = TokenBudget::new(12, 4);
        let runner = ScriptedRunner::new(answer_script());
        let launches = runner.launches.clone();
        let mut session = Session::new(settings, Box::new(runner), word_counter());

        let err = session
            .submit("this message has far too many words to fit in twelve tokens")
            .unwrap_err();

        assert!(matches!(err, AssistantError::OverLength { ceiling: 12, .. }));
        assert_eq!(launches.load(Ordering::SeqCst), 0);
        assert_eq!(session.history().len(), 1);
        assert!(session.next_update().is_none());
        // The rejected prompt is still written for inspection
        assert!(dir.path().join("last_prompt_debug.txt").exists());
    }

    #[test]
    fn test_silent_process_reports_no_response() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(vec![
            RunnerEvent::Separator,
            RunnerEvent::Exited {
                code: Some(1),
                saw_end_marker: false,
            },
        ]);
        let mut session = Session::new(settings(dir.path()), Box::new(runner), word_counter());

        session.submit("hello").unwrap();
        let updates = drain(&mut session);

        assert!(updates.contains(&SessionUpdate::Notice(Notice::NoResponse)));
        assert!(matches!(
            updates.last(),
            Some(SessionUpdate::Completed { response, .. }) if response.is_empty()
        ));
        // Only the seed and the user's line; no empty assistant turn
        assert_eq!(session.history().len(), 2);
    }

    #[test]
    fn test_launch_failure_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(vec![
            RunnerEvent::LaunchFailed {
                executable: "llama-cli".into(),
                message: "No such file or directory".into(),
            },
            RunnerEvent::Exited {
                code: None,
                saw_end_marker: false,
            },
        ]);
        let mut session = Session::new(settings(dir.path()), Box::new(runner), word_counter());

        session.submit("hello").unwrap();
        let updates = drain(&mut session);

        match &updates[0] {
            SessionUpdate::Notice(notice @ Notice::LaunchFailed { message }) => {
                assert!(notice.is_error());
                assert!(message.contains("No such file or directory"));
            }
            other => panic!("unexpected update: {other:?}"),
        }
        assert!(updates.contains(&SessionUpdate::Notice(Notice::NoResponse)));
    }

    #[test]
    fn test_new_turn_cancels_running_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = ScriptedRunner::new(answer_script());
        let release = Arc::new(AtomicBool::new(false));
        runner.hold = Some(release.clone());
        let launches = runner.launches.clone();
        let mut session = Session::new(settings(dir.path()), Box::new(runner), word_counter());

        let first = session.submit("first").unwrap();
        assert!(session.is_running());
        let second = session.submit("second").unwrap();
        assert_ne!(first, second);
        assert_eq!(launches.load(Ordering::SeqCst), 2);

        release.store(true, Ordering::SeqCst);
        let updates = drain(&mut session);
        let completed: Vec<_> = updates
            .iter()
            .filter_map(|u| match u {
                SessionUpdate::Completed { turn_id, .. } => Some(*turn_id),
                _ => None,
            })
            .collect();
        assert_eq!(completed, vec![second]);
        // Both user lines are kept, only one answer
        assert_eq!(session.history().len(), 4);
    }

    #[test]
    fn test_poll_updates_is_non_blocking() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = ScriptedRunner::new(answer_script());
        let release = Arc::new(AtomicBool::new(false));
        runner.hold = Some(release.clone());
        let mut session = Session::new(settings(dir.path()), Box::new(runner), word_counter());

        session.submit("hello").unwrap();
        assert!(session.poll_updates().is_empty());

        release.store(true, Ordering::SeqCst);
        let mut seen = Vec::new();
        while session.has_active_turn() {
            seen.extend(session.poll_updates());
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        seen.extend(session.poll_updates());
        assert!(matches!(seen.last(), Some(SessionUpdate::Completed { .. })));
    }

    #[test]
    fn test_assistant_mode_and_skill_reach_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(answer_script());
        let prompts = runner.prompts.clone();
        let mut session = Session::new(settings(dir.path()), Box::new(runner), word_counter());
        session.set_mode(PromptMode::Assistant);
        session.set_skill(SkillTag::Sql);

        session.submit("list tables").unwrap();
        let updates = drain(&mut session);

        assert!(matches!(
            updates.last(),
            Some(SessionUpdate::Completed { mode: PromptMode::Assistant, .. })
        ));
        let prompt = prompts.lock()[0].clone();
        assert!(prompt.starts_with("SYSTEM: You are an expert in SQL"));
        assert!(prompt.ends_with("USER: list tables\nASSISTANT:"));
    }

    #[test]
    fn test_retrieved_chunks_in_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("pi.txt");
        std::fs::write(&doc, "The status LED is wired to GPIO 47.").unwrap();

        let store =
            SqliteVectorStore::in_memory(Box::new(HashingEmbedder::default()), 200, 40).unwrap();
        let runner = ScriptedRunner::new(answer_script());
        let prompts = runner.prompts.clone();
        let mut session = Session::new(settings(dir.path()), Box::new(runner), word_counter())
            .with_vector_store(Box::new(store));

        let notice = session.ingest_file(&doc).unwrap();
        assert_eq!(
            notice,
            Notice::FileVectorized {
                name: "pi.txt".into(),
                chunks: 1
            }
        );
        assert_eq!(session.preview_chunks().unwrap().len(), 1);

        session.submit("which GPIO is the status LED on").unwrap();
        drain(&mut session);

        let prompt = prompts.lock()[0].clone();
        assert!(prompt.contains("Use the following context:\nThe status LED is wired to GPIO 47."));
    }

    #[test]
    fn test_file_turn_bypasses_history() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("question.txt");
        std::fs::write(&doc, "Summarise this file.").unwrap();
        let runner = ScriptedRunner::new(answer_script());
        let prompts = runner.prompts.clone();
        let mut session = Session::new(settings(dir.path()), Box::new(runner), word_counter());

        session.submit_file(&doc).unwrap();
        drain(&mut session);

        assert_eq!(
            prompts.lock()[0],
            "SYSTEM: You are a helpful assistant.\nUSER:\nSummarise this file.\nASSISTANT:"
        );
        assert_eq!(session.history().len(), 1);
    }

    #[test]
    fn test_file_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new(answer_script());
        let launches = runner.launches.clone();
        let mut session = Session::new(settings(dir.path()), Box::new(runner), word_counter());
        let missing = dir.path().join("missing.txt");

        let err = session.submit_file(&missing).unwrap_err();
        assert!(err.to_string().contains("missing.txt"));
        assert_eq!(launches.load(Ordering::SeqCst), 0);

        let err = session.load_file_text(&missing).unwrap_err();
        assert!(matches!(err, AssistantError::FileAccess { .. }));

        // No store configured
        assert!(matches!(
            session.ingest_folder(dir.path()),
            Err(AssistantError::Retrieval(_))
        ));

        // Still usable afterwards
        session.submit("hello").unwrap();
        assert!(matches!(
            drain(&mut session).last(),
            Some(SessionUpdate::Completed { .. })
        ));
    }

    #[test]
    fn test_preview_truncates_chunks() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..7 {
            let long_line = format!("doc{} {}", i, "x".repeat(400));
            std::fs::write(dir.path().join(format!("doc{}.txt", i)), long_line).unwrap();
        }
        let store =
            SqliteVectorStore::in_memory(Box::new(HashingEmbedder::default()), 200, 40).unwrap();
        let session = Session::new(
            settings(dir.path()),
            Box::new(ScriptedRunner::new(Vec::new())),
            word_counter(),
        )
        .with_vector_store(Box::new(store));

        assert!(session.preview_chunks().unwrap().is_empty());
        let notice = session.ingest_folder(dir.path()).unwrap();
        assert!(matches!(notice, Notice::FolderVectorized { chunks: 7, .. }));

        let preview = session.preview_chunks().unwrap();
        assert_eq!(preview.len(), PREVIEW_CHUNKS);
        assert!(preview.iter().all(|c| c.chars().count() == PREVIEW_CHARS));
    }

    #[test]
    fn test_token_meter_uses_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.budget = TokenBudget::new(4, 0);
        let session = Session::new(settings, Box::new(ScriptedRunner::new(Vec::new())), word_counter());

        let meter = session.token_meter("a b c d e");
        assert_eq!(meter.count, 5);
        assert_eq!(meter.level, crate::token_counter::MeterLevel::Over);
    }

    // The only test here that launches a process, so no other test thread
    // forks while the script is open for writing.
    #[cfg(unix)]
    #[test]
    fn test_multi_turn_through_echoing_process() {
        use providers::LlamaCliRunner;
        use shared::settings::InferenceSettings;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("llama-cli");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\n\
                 turns='{}'\n\
                 n=$(( $(cat \"$turns\" 2>/dev/null || echo 0) + 1 ))\n\
                 echo \"$n\" > \"$turns\"\n\
                 while [ $# -gt 0 ]; do\n\
                   if [ \"$1\" = \"--file\" ]; then cat \"$2\"; fi\n\
                   shift\n\
                 done\n\
                 echo \" fresh answer $n\"\n\
                 echo ' [end of text]'\n",
                dir.path().join("turns").display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut settings = settings(dir.path());
        settings.inference = InferenceSettings {
            executable: script.display().to_string(),
            ..InferenceSettings::default()
        };
        let runner = LlamaCliRunner::new(settings.inference.clone(), settings.stream.clone());
        let mut session = Session::new(settings, Box::new(runner), word_counter());

        fn reply_to(session: &mut Session, message: &str) -> String {
            session.submit(message).unwrap();
            match drain(session).pop() {
                Some(SessionUpdate::Completed { response, .. }) => response,
                other => panic!("unexpected update: {other:?}"),
            }
        }

        assert_eq!(reply_to(&mut session, "first question"), "fresh answer 1");
        assert_eq!(reply_to(&mut session, "second question"), "fresh answer 2");
        session.set_mode(PromptMode::Assistant);
        assert_eq!(reply_to(&mut session, "third question"), "fresh answer 3");

        let rendered = session.history().render();
        assert!(rendered.ends_with(
            "USER: first question\nASSISTANT: fresh answer 1\n\
             USER: second question\nASSISTANT: fresh answer 2\n\
             USER: third question\nASSISTANT: fresh answer 3"
        ));
        assert!(!rendered.contains("ASSISTANT: ASSISTANT:"));
        assert!(!rendered.contains("[end of text]"));
    }
}
