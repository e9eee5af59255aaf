//! The event pipeline: contexts, descriptors and the dispatcher.

pub mod context;
pub mod descriptor;
pub mod dispatcher;

pub use context::{
    ApplyContext, Disposition, ExtractContext, HandleContext, StageContext, ValidateContext,
};
pub use descriptor::{EventHandler, Filter, HandlerDescriptor, StagePipelines, ORDER_STEP};
pub use dispatcher::{dispatch, process_request, PipelineOutcome, ProcessedRequest};

use crate::protocol::EndpointType;

/// The sealed table of handlers, one stage set per endpoint.
#[derive(Default)]
pub struct HandlerRegistry {
    pub authorization: StagePipelines,
    pub token: StagePipelines,
    pub introspection: StagePipelines,
    pub revocation: StagePipelines,
    pub userinfo: StagePipelines,
    pub logout: StagePipelines,
}

impl HandlerRegistry {
    pub fn for_endpoint(&self, endpoint: EndpointType) -> Option<&StagePipelines> {
        match endpoint {
            EndpointType::Authorization => Some(&self.authorization),
            EndpointType::Token => Some(&self.token),
            EndpointType::Introspection => Some(&self.introspection),
            EndpointType::Revocation => Some(&self.revocation),
            EndpointType::Userinfo => Some(&self.userinfo),
            EndpointType::Logout => Some(&self.logout),
            // Discovery documents are static projections of the options; the
            // host serves them without a pipeline.
            EndpointType::Configuration
            | EndpointType::Cryptography
            | EndpointType::Unknown => None,
        }
    }

    /// Sorts every stage of every endpoint. Call once after the host has
    /// attached its handlers.
    pub fn seal(mut self) -> Self {
        self.authorization.sort();
        self.token.sort();
        self.introspection.sort();
        self.revocation.sort();
        self.userinfo.sort();
        self.logout.sort();
        self
    }
}
