//! Shared application state.

use std::sync::Arc;

use domain::{ChatRelay, ChatService, FeedbackService, IdentityService, OrderService};
use event_store::EventStore;
use media::{ImageProcessor, ImageStore, InMemoryImageStore};
use projections::{OrderBoardView, ProjectionProcessor, UserDirectoryView};

use crate::error::ApiError;

/// Services and read models accessible from all handlers.
pub struct AppState<S: EventStore> {
    pub identity: IdentityService<S>,
    pub orders: OrderService<S>,
    pub feedback: FeedbackService<S>,
    pub chats: ChatService<S>,
    pub processor: ProjectionProcessor<S>,
    pub board: OrderBoardView,
    pub directory: UserDirectoryView,
    pub images: Arc<dyn ImageStore>,
    pub image_processor: ImageProcessor,
}

impl<S: EventStore + Clone + 'static> AppState<S> {
    /// Wires every service to `store` and registers the read models.
    pub fn new(store: S, image_processor: ImageProcessor) -> Self {
        let board = OrderBoardView::new();
        let directory = UserDirectoryView::new();

        let mut processor = ProjectionProcessor::new(store.clone());
        processor.register(Box::new(board.clone()));
        processor.register(Box::new(directory.clone()));

        Self {
            identity: IdentityService::new(store.clone()),
            orders: OrderService::new(store.clone()),
            feedback: FeedbackService::new(store.clone()),
            chats: ChatService::new(store, Arc::new(ChatRelay::default())),
            processor,
            board,
            directory,
            images: Arc::new(InMemoryImageStore::new()),
            image_processor,
        }
    }
}

impl<S: EventStore> AppState<S> {
    /// Brings the read models up to date before a query.
    pub async fn refresh_views(&self) -> Result<(), ApiError> {
        self.processor.run_catch_up().await?;
        Ok(())
    }
}
