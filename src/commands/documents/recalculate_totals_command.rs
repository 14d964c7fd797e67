use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::{
    commands::Command,
    db::DbPool,
    entities::DocumentKind,
    errors::ServiceError,
    events::EventSender,
    services::documents::DocumentService,
    totals::DocumentTotals,
};

/// Recomputes the stored totals of one document from its lines.
#[derive(Debug, Serialize, Deserialize)]
pub struct RecalculateTotalsCommand {
    pub kind: DocumentKind,
    pub document_id: i32,
}

#[async_trait]
impl Command for RecalculateTotalsCommand {
    type Result = DocumentTotals;

    #[instrument(skip(self, db_pool, event_sender), fields(kind = %self.kind, document_id = self.document_id))]
    async fn execute(
        &self,
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
    ) -> Result<Self::Result, ServiceError> {
        // totals never assign a number, one attempt is enough
        let documents = DocumentService::new(db_pool, Some(event_sender), 1);
        let totals = documents
            .calculate_totals_for(self.kind, self.document_id)
            .await?;
        info!(total_amount = %totals.total_amount, "Document totals recalculated");
        Ok(totals)
    }
}
