use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clients::AssistantBackend;
use crate::models::{ChatMessage, ChatPayload, APOLOGY, GREETING};
use crate::utils::Liveness;

struct ChatInner {
    backend: Arc<dyn AssistantBackend>,
    transcript: Mutex<IndexMap<Uuid, ChatMessage>>,
    in_flight: AtomicBool,
    liveness: Liveness,
    timeout: Duration,
    updates: watch::Sender<Vec<ChatMessage>>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl ChatInner {
    fn notify(&self) {
        let snapshot: Vec<ChatMessage> = lock(&self.transcript).values().cloned().collect();
        self.updates.send_replace(snapshot);
    }

    fn resolve(&self, placeholder: Uuid, payload: ChatPayload) {
        if !self.liveness.is_alive() {
            debug!("Chat shut down, dropping answer");
            return;
        }
        if let Some(message) = lock(&self.transcript).get_mut(&placeholder) {
            message.payload = payload;
            message.loading = false;
        }
        self.in_flight.store(false, Ordering::SeqCst);
        self.notify();
    }
}

/// Linear assistant transcript with at most one question in flight.
///
/// `send_message` appends the question plus a loading placeholder right away;
/// the placeholder is later replaced in place by the answer or an apology.
#[derive(Clone)]
pub struct ChatController {
    inner: Arc<ChatInner>,
}

impl ChatController {
    pub fn new(backend: Arc<dyn AssistantBackend>, timeout: Duration) -> Self {
        let greeting = ChatMessage::assistant(ChatPayload::Text(GREETING.to_string()));
        let mut transcript = IndexMap::new();
        transcript.insert(greeting.id, greeting.clone());
        let (updates, _) = watch::channel(vec![greeting]);
        Self {
            inner: Arc::new(ChatInner {
                backend,
                transcript: Mutex::new(transcript),
                in_flight: AtomicBool::new(false),
                liveness: Liveness::new(),
                timeout,
                updates,
                pending: Mutex::new(None),
            }),
        }
    }

    /// Ask a question. Returns false, changing nothing, when `text` is blank,
    /// a question is already in flight, or the controller was shut down.
    pub fn send_message(&self, text: &str) -> bool {
        if text.trim().is_empty() || !self.inner.liveness.is_alive() {
            return false;
        }
        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Chat busy, ignoring message");
            return false;
        }

        let question = ChatMessage::user(text);
        let placeholder = ChatMessage::placeholder();
        let placeholder_id = placeholder.id;
        {
            let mut transcript = lock(&self.inner.transcript);
            transcript.insert(question.id, question);
            transcript.insert(placeholder_id, placeholder);
        }
        self.inner.notify();

        let inner = self.inner.clone();
        let question = text.to_string();
        let task = tokio::spawn(async move {
            let payload = match tokio::time::timeout(inner.timeout, inner.backend.ask(&question)).await {
                Ok(Ok(answer)) => answer,
                Ok(Err(e)) => {
                    warn!("Assistant request failed: {}", e);
                    ChatPayload::Text(APOLOGY.to_string())
                }
                Err(_) => {
                    warn!("Assistant request timed out after {:?}", inner.timeout);
                    ChatPayload::Text(APOLOGY.to_string())
                }
            };
            inner.resolve(placeholder_id, payload);
        });
        *lock(&self.inner.pending) = Some(task);
        true
    }

    pub fn transcript(&self) -> Vec<ChatMessage> {
        lock(&self.inner.transcript).values().cloned().collect()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<ChatMessage>> {
        self.inner.updates.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Stop accepting questions and drop any answer still on its way
    pub fn shutdown(&self) {
        if !self.inner.liveness.kill() {
            return;
        }
        if let Some(task) = lock(&self.inner.pending).take() {
            task.abort();
        }
        info!("Chat controller shut down");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollabError;
    use crate::models::{ChatSender, RenderedMessage};
    use crate::BoxFuture;
    use serde_json::json;
    use std::collections::VecDeque;
    use tokio::time::sleep;

    struct ScriptedBackend {
        delay: Duration,
        replies: Mutex<VecDeque<Result<ChatPayload, CollabError>>>,
    }

    impl ScriptedBackend {
        fn new(delay: Duration, replies: Vec<Result<ChatPayload, CollabError>>) -> Arc<Self> {
            Arc::new(Self {
                delay,
                replies: Mutex::new(replies.into()),
            })
        }
    }

    impl AssistantBackend for ScriptedBackend {
        fn ask<'a>(&'a self, _question: &'a str) -> BoxFuture<'a, Result<ChatPayload, CollabError>> {
            let reply = self.replies.lock().unwrap().pop_front();
            Box::pin(async move {
                sleep(self.delay).await;
                reply.unwrap_or(Err(CollabError::Status(503)))
            })
        }
    }

    async fn idle(chat: &ChatController) -> Vec<ChatMessage> {
        let mut rx = chat.subscribe();
        let transcript = rx.wait_for(|t| t.iter().all(|m| !m.loading)).await.unwrap();
        transcript.clone()
    }

    #[tokio::test(start_paused = true)]
    async fn transcript_starts_with_greeting() {
        let chat = ChatController::new(ScriptedBackend::new(Duration::ZERO, vec![]), Duration::from_secs(10));
        let transcript = chat.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].sender, ChatSender::Assistant);
        assert_eq!(transcript[0].render(), RenderedMessage::RichText(GREETING.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn placeholder_is_replaced_in_place() {
        let backend = ScriptedBackend::new(
            Duration::from_millis(200),
            vec![Ok(ChatPayload::Text("Use a hash map.".into()))],
        );
        let chat = ChatController::new(backend, Duration::from_secs(10));

        assert!(chat.send_message("How do I dedupe a list?"));
        let pending = chat.transcript();
        assert_eq!(pending.len(), 3);
        assert_eq!(pending[1].sender, ChatSender::User);
        assert!(pending[2].loading);
        assert!(chat.is_busy());

        let done = idle(&chat).await;
        assert_eq!(done.len(), 3);
        assert_eq!(done[2].id, pending[2].id);
        assert_eq!(done[2].render(), RenderedMessage::RichText("Use a hash map.".into()));
        assert!(!chat.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn blank_or_concurrent_messages_are_rejected() {
        let backend = ScriptedBackend::new(Duration::from_secs(1), vec![Ok(ChatPayload::Text("ok".into()))]);
        let chat = ChatController::new(backend, Duration::from_secs(10));

        assert!(!chat.send_message("   "));
        assert!(chat.send_message("first"));
        assert!(!chat.send_message("second"));
        assert_eq!(chat.transcript().len(), 3);
        assert_eq!(chat.transcript().iter().filter(|m| m.loading).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn structured_answer_renders_literally() {
        let backend = ScriptedBackend::new(
            Duration::from_millis(10),
            vec![Ok(ChatPayload::Structured(json!({ "steps": ["sort", "scan"] })))],
        );
        let chat = ChatController::new(backend, Duration::from_secs(10));
        chat.send_message("Explain the algorithm");

        let done = idle(&chat).await;
        assert!(matches!(done[2].render(), RenderedMessage::Literal(dump) if dump.contains("\"sort\"")));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_apologizes_and_reenables() {
        let backend = ScriptedBackend::new(
            Duration::from_millis(10),
            vec![Err(CollabError::Status(500)), Ok(ChatPayload::Text("Recovered".into()))],
        );
        let chat = ChatController::new(backend, Duration::from_secs(10));

        chat.send_message("first try");
        let done = idle(&chat).await;
        assert_eq!(done[2].render(), RenderedMessage::RichText(APOLOGY.to_string()));

        assert!(chat.send_message("second try"));
        let done = idle(&chat).await;
        assert_eq!(done.len(), 5);
        assert_eq!(done[4].render(), RenderedMessage::RichText("Recovered".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out() {
        let backend = ScriptedBackend::new(Duration::from_secs(60), vec![Ok(ChatPayload::Text("late".into()))]);
        let chat = ChatController::new(backend, Duration::from_secs(10));

        chat.send_message("anyone there?");
        let done = idle(&chat).await;
        assert_eq!(done[2].render(), RenderedMessage::RichText(APOLOGY.to_string()));
        assert!(!chat.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_ignores_late_answer() {
        let backend = ScriptedBackend::new(Duration::from_secs(1), vec![Ok(ChatPayload::Text("late".into()))]);
        let chat = ChatController::new(backend, Duration::from_secs(10));

        chat.send_message("question");
        chat.shutdown();
        sleep(Duration::from_secs(5)).await;
        assert!(chat.transcript()[2].loading);
        assert!(!chat.send_message("another"));
    }
}
