//! The pipeline dispatcher.
//!
//! For each stage the dispatcher walks the sorted descriptor list, applies
//! filters, and invokes handlers sequentially until the context turns
//! terminal or the list is exhausted. The outer `process_request` wires the
//! stages together with the handled/skipped/rejected decision semantics.

use crate::config::AppState;
use crate::error::ServerError;
use crate::pipeline::context::{
    ApplyContext, Disposition, ExtractContext, HandleContext, StageContext, ValidateContext,
};
use crate::pipeline::descriptor::HandlerDescriptor;
use crate::protocol::constants::params;
use crate::protocol::Transaction;

/// What the pipeline decided about a request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PipelineOutcome {
    /// Processing ran to completion; render the response as directed.
    Completed(Disposition),
    /// A handler produced the response itself; render it verbatim.
    Handled,
    /// The request is not this server's to answer; the host takes over.
    Skipped,
}

/// The finished transaction plus the rendering decision.
pub struct ProcessedRequest {
    pub transaction: Transaction,
    pub outcome: PipelineOutcome,
}

/// Runs one stage's handlers over the context.
pub async fn dispatch<C: StageContext + Send>(
    descriptors: &[HandlerDescriptor<C>],
    context: &mut C,
    state: &AppState,
) -> Result<(), ServerError> {
    for descriptor in descriptors {
        if context.transaction().is_cancelled() {
            return Err(ServerError::Cancelled);
        }
        if context.is_terminal() {
            break;
        }
        if !descriptor
            .filters
            .iter()
            .all(|filter| filter.applies(context.transaction()))
        {
            continue;
        }

        tracing::trace!(handler = descriptor.name, "invoking handler");
        descriptor.handler.handle(context, state).await?;
    }
    Ok(())
}

/// Drives a transaction through extract → validate → handle → apply.
pub async fn process_request(
    state: &AppState,
    transaction: Transaction,
) -> Result<ProcessedRequest, ServerError> {
    let stages = state
        .registry
        .for_endpoint(transaction.endpoint_type)
        .ok_or_else(|| {
            ServerError::Configuration(format!(
                "no pipeline registered for {:?} endpoint",
                transaction.endpoint_type
            ))
        })?;

    // Extract.
    let mut extract = ExtractContext::new(transaction);
    dispatch(&stages.extract, &mut extract, state).await?;
    if extract.is_request_skipped() {
        return Ok(ProcessedRequest {
            transaction: extract.transaction,
            outcome: PipelineOutcome::Skipped,
        });
    }
    if extract.is_request_handled() {
        return Ok(ProcessedRequest {
            transaction: extract.transaction,
            outcome: PipelineOutcome::Handled,
        });
    }

    // Validate.
    let mut validate = ValidateContext::new(extract.transaction);
    dispatch(&stages.validate, &mut validate, state).await?;
    if let Some(rejection) = validate.take_rejection() {
        return process_error(state, validate.transaction, rejection).await;
    }

    // Handle.
    let mut handle = HandleContext::new(validate.transaction);
    dispatch(&stages.handle, &mut handle, state).await?;
    if let Some(rejection) = handle.take_rejection() {
        return process_error(state, handle.transaction, rejection).await;
    }
    if handle.is_request_skipped() {
        return Ok(ProcessedRequest {
            transaction: handle.transaction,
            outcome: PipelineOutcome::Skipped,
        });
    }
    if handle.is_request_handled() && handle.transaction.response.message().is_empty() {
        // A handler claimed the request without producing a response; the
        // host renders whatever it prepared out of band.
        return Ok(ProcessedRequest {
            transaction: handle.transaction,
            outcome: PipelineOutcome::Handled,
        });
    }

    apply_response(state, handle.transaction).await
}

/// Dispatches the error event: writes the accumulated error fields onto the
/// response, then lets the apply stage shape the failure the same way it
/// shapes a success (redirect-based endpoints report errors via redirect once
/// the redirect target itself has been validated).
pub async fn process_error(
    state: &AppState,
    mut transaction: Transaction,
    rejection: crate::error::ProtocolError,
) -> Result<ProcessedRequest, ServerError> {
    tracing::debug!(
        endpoint = ?transaction.endpoint_type,
        error = %rejection.code,
        description = rejection.description.as_deref().unwrap_or_default(),
        "request rejected"
    );

    transaction.response.set_error(
        rejection.code.as_str(),
        rejection.description.as_deref(),
        rejection.uri.as_deref(),
    );
    // State is echoed on error responses too.
    let request_state = transaction.request.state().map(str::to_owned);
    if let Some(value) = request_state {
        transaction.response.set(params::STATE, value);
    }

    apply_response(state, transaction).await
}

async fn apply_response(
    state: &AppState,
    transaction: Transaction,
) -> Result<ProcessedRequest, ServerError> {
    let stages = state
        .registry
        .for_endpoint(transaction.endpoint_type)
        .ok_or_else(|| {
            ServerError::Configuration(format!(
                "no pipeline registered for {:?} endpoint",
                transaction.endpoint_type
            ))
        })?;

    let mut apply = ApplyContext::new(transaction);
    dispatch(&stages.apply, &mut apply, state).await?;

    Ok(ProcessedRequest {
        transaction: apply.transaction,
        outcome: PipelineOutcome::Completed(apply.disposition),
    })
}
