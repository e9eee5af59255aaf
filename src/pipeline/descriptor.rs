//! Handler descriptors: the pipeline as data.
//!
//! Each descriptor names a handler, fixes its position in the stage order and
//! lists the filters that gate it. The built-in handlers space their orders by
//! 1000 so deployments can slot custom handlers between them.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::AppState;
use crate::error::ServerError;
use crate::pipeline::context::StageContext;
use crate::protocol::constants::params;
use crate::protocol::Transaction;

/// Spacing between consecutive built-in handler orders.
pub const ORDER_STEP: i64 = 1000;

/// An event handler for a stage context.
#[async_trait]
pub trait EventHandler<C: StageContext + Send>: Send + Sync {
    async fn handle(&self, context: &mut C, state: &AppState) -> Result<(), ServerError>;
}

/// Predicates deciding whether a handler runs for a given transaction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Filter {
    /// The handler needs the entity stores; skipped in degraded mode.
    RequireDegradedModeDisabled,
    /// The handler checks requested scopes against the scope registry.
    RequireScopeValidationEnabled,
    /// The handler only applies when the request names a client.
    RequireClientIdParameter,
    /// The handler needs host-provided raw parameters to work on.
    RequireRawRequest,
    /// The handler defers the endpoint to the host application.
    RequireUserinfoPassthroughEnabled,
    /// Endpoint-permission enforcement can be switched off globally.
    RequireEndpointPermissionsEnabled,
    /// Grant-type permission enforcement can be switched off globally.
    RequireGrantTypePermissionsEnabled,
    /// Response-type permission enforcement can be switched off globally.
    RequireResponseTypePermissionsEnabled,
    /// Scope permission enforcement can be switched off globally.
    RequireScopePermissionsEnabled,
}

impl Filter {
    pub fn applies(&self, transaction: &Transaction) -> bool {
        let options = transaction.options();
        match self {
            Filter::RequireDegradedModeDisabled => !options.degraded_mode,
            Filter::RequireScopeValidationEnabled => !options.disable_scope_validation,
            Filter::RequireClientIdParameter => transaction.request.has(params::CLIENT_ID),
            Filter::RequireRawRequest => transaction.raw_parameters.is_some(),
            Filter::RequireUserinfoPassthroughEnabled => options.enable_userinfo_passthrough,
            Filter::RequireEndpointPermissionsEnabled => !options.ignore_endpoint_permissions,
            Filter::RequireGrantTypePermissionsEnabled => !options.ignore_grant_type_permissions,
            Filter::RequireResponseTypePermissionsEnabled => {
                !options.ignore_response_type_permissions
            }
            Filter::RequireScopePermissionsEnabled => !options.ignore_scope_permissions,
        }
    }
}

/// A registered handler with its dispatch metadata.
pub struct HandlerDescriptor<C: StageContext + Send> {
    pub name: &'static str,
    pub order: i64,
    pub filters: Vec<Filter>,
    /// Built-in handlers that the protocol cannot run without.
    pub required: bool,
    pub handler: Arc<dyn EventHandler<C>>,
}

impl<C: StageContext + Send> HandlerDescriptor<C> {
    pub fn new(
        name: &'static str,
        order: i64,
        handler: impl EventHandler<C> + 'static,
    ) -> Self {
        Self {
            name,
            order,
            filters: Vec::new(),
            required: false,
            handler: Arc::new(handler),
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// The ordered handler lists for one endpoint's four stages.
#[derive(Default)]
pub struct StagePipelines {
    pub extract: Vec<HandlerDescriptor<crate::pipeline::context::ExtractContext>>,
    pub validate: Vec<HandlerDescriptor<crate::pipeline::context::ValidateContext>>,
    pub handle: Vec<HandlerDescriptor<crate::pipeline::context::HandleContext>>,
    pub apply: Vec<HandlerDescriptor<crate::pipeline::context::ApplyContext>>,
}

impl StagePipelines {
    /// Sorts every stage by ascending order. Called once when the registry
    /// is sealed; dispatch assumes sorted lists.
    pub fn sort(&mut self) {
        self.extract.sort_by_key(|d| d.order);
        self.validate.sort_by_key(|d| d.order);
        self.handle.sort_by_key(|d| d.order);
        self.apply.sort_by_key(|d| d.order);
    }

    /// Removes an optional handler by name. Required handlers stay put.
    pub fn remove(&mut self, name: &str) -> bool {
        let mut removed = false;
        self.extract.retain(|d| {
            let keep = d.required || d.name != name;
            removed |= !keep;
            keep
        });
        self.validate.retain(|d| {
            let keep = d.required || d.name != name;
            removed |= !keep;
            keep
        });
        self.handle.retain(|d| {
            let keep = d.required || d.name != name;
            removed |= !keep;
            keep
        });
        self.apply.retain(|d| {
            let keep = d.required || d.name != name;
            removed |= !keep;
            keep
        });
        removed
    }
}
