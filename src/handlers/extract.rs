//! Shared extraction handler: turns the host's raw parameter pairs into the
//! typed protocol request. Registered first on every endpoint.

use async_trait::async_trait;

use crate::config::AppState;
use crate::error::ServerError;
use crate::pipeline::{EventHandler, ExtractContext};
use crate::protocol::{Message, Request};

pub struct ExtractProtocolRequest;

#[async_trait]
impl EventHandler<ExtractContext> for ExtractProtocolRequest {
    async fn handle(
        &self,
        context: &mut ExtractContext,
        _state: &AppState,
    ) -> Result<(), ServerError> {
        if let Some(pairs) = context.transaction.raw_parameters.take() {
            context.transaction.request = Request::new(Message::from_pairs(pairs));
        }
        tracing::debug!(
            endpoint = ?context.transaction.endpoint_type,
            request = ?context.transaction.request.message(),
            "request extracted"
        );
        Ok(())
    }
}
