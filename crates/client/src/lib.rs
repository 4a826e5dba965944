//! Process-scoped wiring for the Careline chat core.
//!
//! Exactly one `ChatClient` exists per authenticated session. Surfaces
//! (widget, room screen, queue view, modal) receive it by injection instead
//! of constructing their own connections; its lifecycle is tied to
//! login/logout so no socket or frame handler outlives the session.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use careline_config::AppConfig;
use careline_sessions::{
    HttpRoomApi, MessageDispatcher, NotificationBridge, Notifier, RoomApi, RoomDirectory,
    RoomSession, SessionResult, UserRef,
};
use careline_transport::{SubscriptionManager, Transport, WsTransport};

pub mod telemetry {
    use anyhow::Result;
    use tracing::Level;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_max_level(Level::INFO)
            .with_env_filter(env_filter)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

pub struct ChatClient {
    current_user: UserRef,
    session_config: careline_config::SessionConfig,
    transport: Arc<dyn Transport>,
    subscriptions: Arc<SubscriptionManager>,
    api: Arc<dyn RoomApi>,
    directory: Arc<RoomDirectory>,
    bridge: Arc<NotificationBridge>,
    dispatcher: Arc<MessageDispatcher>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl ChatClient {
    /// Build the production client from configuration
    pub fn new(
        config: &AppConfig,
        user: UserRef,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(WsTransport::new(config.transport.clone()));
        let api: Arc<dyn RoomApi> = Arc::new(HttpRoomApi::new(&config.rest)?);

        Ok(Self::with_parts(
            transport,
            api,
            user,
            notifier,
            config.session.clone(),
        ))
    }

    /// Build the client from pre-constructed collaborators. Used by tests
    /// and by hosts that supply their own transport.
    pub fn with_parts(
        transport: Arc<dyn Transport>,
        api: Arc<dyn RoomApi>,
        user: UserRef,
        notifier: Arc<dyn Notifier>,
        session_config: careline_config::SessionConfig,
    ) -> Self {
        let subscriptions = Arc::new(SubscriptionManager::new(transport.clone()));
        let directory = Arc::new(RoomDirectory::new(api.clone(), subscriptions.clone()));
        let bridge = Arc::new(NotificationBridge::new(notifier, user.id.clone()));
        let dispatcher = Arc::new(MessageDispatcher::new(
            transport.clone(),
            directory.clone(),
            bridge.clone(),
            user.clone(),
        ));

        Self {
            current_user: user,
            session_config,
            transport,
            subscriptions,
            api,
            directory,
            bridge,
            dispatcher,
            dispatch_task: Mutex::new(None),
        }
    }

    pub fn current_user(&self) -> &UserRef {
        &self.current_user
    }

    pub fn directory(&self) -> &Arc<RoomDirectory> {
        &self.directory
    }

    pub fn dispatcher(&self) -> &Arc<MessageDispatcher> {
        &self.dispatcher
    }

    pub fn bridge(&self) -> &Arc<NotificationBridge> {
        &self.bridge
    }

    /// Connect the transport and start routing inbound frames. Calling
    /// while already logged in is a no-op.
    pub async fn login(&self) -> SessionResult<()> {
        let mut task = self.dispatch_task.lock().await;
        if task.is_some() {
            return Ok(());
        }

        self.transport.connect(&self.current_user.id).await?;
        *task = Some(self.dispatcher.clone().spawn());
        info!(user_id = %self.current_user.id, "chat client logged in");
        Ok(())
    }

    /// Deterministic teardown: stop routing, release every subscription,
    /// disconnect the socket. Runs the full sequence on every path so no
    /// handler survives into the next session.
    pub async fn logout(&self) {
        if let Some(task) = self.dispatch_task.lock().await.take() {
            task.abort();
        }

        self.dispatcher.clear_sessions().await;
        self.subscriptions.release_all().await;
        self.transport.disconnect().await;
        info!(user_id = %self.current_user.id, "chat client logged out");
    }

    /// Open (or join) a room session. A session already open in another
    /// surface is shared; the subscription manager tracks each consumer.
    ///
    /// A failed history fetch is demoted to a warning here: the session is
    /// live-only until the next open, which the surface may tolerate.
    pub async fn open_room(&self, room_id: &str) -> SessionResult<Arc<RoomSession>> {
        if let Some(existing) = self.dispatcher.session(room_id).await {
            self.subscriptions.ensure_subscribed(room_id).await?;
            return Ok(existing);
        }

        let session = Arc::new(RoomSession::new(
            room_id,
            self.current_user.clone(),
            self.api.clone(),
            self.directory.clone(),
            self.subscriptions.clone(),
            &self.session_config,
        ));
        self.dispatcher.register_session(session.clone()).await;

        match session.open().await {
            Ok(()) => {}
            Err(careline_sessions::SessionError::HistoryUnavailable { room_id, reason }) => {
                warn!(room_id = %room_id, reason = %reason, "room opened live-only, history unavailable");
            }
            Err(e) => {
                self.dispatcher.remove_session(room_id).await;
                return Err(e);
            }
        }

        Ok(session)
    }

    /// Release one surface's view of a room. The session stops routing only
    /// when the last consumer leaves.
    pub async fn close_room_view(&self, room_id: &str) {
        if let Some(session) = self.dispatcher.session(room_id).await {
            session.release().await;
        }

        if !self.subscriptions.is_subscribed(room_id).await {
            self.dispatcher.remove_session(room_id).await;
        }
    }
}
