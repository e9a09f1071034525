use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::adapter::{DocumentAdapter, DocumentHandle, ViewTarget};
use crate::analysis::AnalysisClient;
use crate::chat::ChatController;
use crate::clients::{AiServiceClient, AssistantBackend, CodeAnalyzer};
use crate::config::Config;
use crate::error::CollabError;
use crate::models::Identity;
use crate::presence::PresenceBroadcaster;
use crate::session::{new_client_id, Session};
use crate::store::{RelayTransport, RoomTransport};

/// Everything one user needs to work in a room: the bound document, presence,
/// debounced analysis of the content and the assistant chat.
pub struct CollaborativeEditor {
    session: Session,
    document: DocumentHandle,
    presence: PresenceBroadcaster,
    analysis: AnalysisClient,
    chat: ChatController,
    cursor_follower: JoinHandle<()>,
}

impl CollaborativeEditor {
    /// Join `room_id`, announce `identity` and bind `target` once it is mounted
    pub async fn open(
        config: &Config,
        transport: &dyn RoomTransport,
        room_id: &str,
        identity: &Identity,
        target: Arc<dyn ViewTarget>,
        analyzer: Arc<dyn CodeAnalyzer>,
        assistant: Arc<dyn AssistantBackend>,
    ) -> Result<Self, CollabError> {
        let session = Session::enter(transport, room_id, new_client_id()).await?;

        let presence = PresenceBroadcaster::new(session.clone());
        presence.publish_local(identity)?;

        let document = match DocumentAdapter::new(config.undo_merge_interval())
            .attach(target, &session)
            .await
        {
            Ok(document) => document,
            Err(e) => {
                session.leave();
                return Err(e);
            }
        };

        let analysis = AnalysisClient::new(analyzer, config.analysis_debounce(), config.request_timeout());
        analysis.follow(document.subscribe_content());
        let chat = ChatController::new(assistant, config.request_timeout());
        let cursor_follower = tokio::spawn(forward_cursor(document.subscribe_cursor(), presence.clone()));

        info!("{} opened room {}", identity.name, room_id);
        Ok(Self {
            session,
            document,
            presence,
            analysis,
            chat,
            cursor_follower,
        })
    }

    /// Open a room through the configured relay and AI service
    pub async fn open_remote(
        config: &Config,
        room_id: &str,
        identity: &Identity,
        target: Arc<dyn ViewTarget>,
    ) -> Result<Self, CollabError> {
        let transport = RelayTransport::new(config.relay_url.as_str());
        let ai = Arc::new(AiServiceClient::new(&config.ai_service_url, config.request_timeout())?);
        Self::open(config, &transport, room_id, identity, target, ai.clone(), ai).await
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn document(&self) -> &DocumentHandle {
        &self.document
    }

    pub fn presence(&self) -> &PresenceBroadcaster {
        &self.presence
    }

    pub fn analysis(&self) -> &AnalysisClient {
        &self.analysis
    }

    pub fn chat(&self) -> &ChatController {
        &self.chat
    }

    /// Move the local caret; the room hears about it like any other move
    pub fn set_cursor(&self, pos: usize) -> Result<(), CollabError> {
        self.document.set_cursor(pos)
    }

    pub fn close(self) {
        self.cursor_follower.abort();
        self.analysis.shutdown();
        self.chat.shutdown();
        self.document.detach();
        self.session.leave();
        info!("Closed room {}", self.session.room_id());
    }
}

impl Drop for CollaborativeEditor {
    fn drop(&mut self) {
        self.cursor_follower.abort();
    }
}

/// Republish every caret move of the bound document as presence
async fn forward_cursor(mut cursor: watch::Receiver<Option<usize>>, presence: PresenceBroadcaster) {
    while cursor.changed().await.is_ok() {
        let position = *cursor.borrow_and_update();
        if let Err(e) = presence.set_cursor(position) {
            debug!("Cursor move not published: {}", e);
        }
    }
}
