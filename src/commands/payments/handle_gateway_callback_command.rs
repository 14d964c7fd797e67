use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

use crate::{
    commands::Command,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    services::payments::{GatewayCallback, PaymentService, RecordedPayment},
};

/// Applies a processor notification that has already been verified and
/// parsed into a [`GatewayCallback`].
#[derive(Debug, Serialize, Deserialize)]
pub struct HandleGatewayCallbackCommand {
    pub callback: GatewayCallback,
}

#[async_trait]
impl Command for HandleGatewayCallbackCommand {
    type Result = RecordedPayment;

    #[instrument(skip(self, db_pool, event_sender), fields(gateway = %self.callback.gateway))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        PaymentService::new(db_pool, Some(event_sender))
            .handle_gateway_callback(self.callback.clone())
            .await
    }
}
