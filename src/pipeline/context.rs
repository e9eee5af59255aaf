//! Event contexts: one per pipeline stage, carrying the decision flags the
//! dispatcher short-circuits on.
//!
//! Every context owns the transaction for the duration of its stage; the
//! dispatcher hands it to the next stage when the previous one completes.
//! That ownership transfer is what makes the single-threaded-per-transaction
//! rule structural rather than conventional.

use crate::error::{ErrorCode, ProtocolError};
use crate::protocol::{Principal, Transaction};

/// How the response should leave the server, decided by the apply stage.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum Disposition {
    /// Render the response message as a JSON body.
    #[default]
    Json,
    /// 302 redirect to the given absolute location.
    Redirect { location: String },
    /// Auto-submitting HTML form posting the response parameters.
    FormPost { action: String },
    /// A signed JWT body (`application/jwt`), used for signed userinfo.
    Jwt { token: String },
}

/// Shared handled/skipped flags (request-processing events).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
enum RequestState {
    #[default]
    Continue,
    Handled,
    Skipped,
}

/// A stage context the dispatcher can drive.
pub trait StageContext {
    fn transaction(&self) -> &Transaction;

    /// Whether dispatch should stop before the next handler.
    fn is_terminal(&self) -> bool;
}

/// Extraction stage: builds the typed request from raw parameters.
#[derive(Debug)]
pub struct ExtractContext {
    pub transaction: Transaction,
    state: RequestState,
}

impl ExtractContext {
    pub fn new(transaction: Transaction) -> Self {
        Self {
            transaction,
            state: RequestState::Continue,
        }
    }

    /// Marks the request fully handled; the host renders the current
    /// response without further processing.
    pub fn handle_request(&mut self) {
        self.state = RequestState::Handled;
    }

    /// Marks the request outside this server's responsibility.
    pub fn skip_request(&mut self) {
        self.state = RequestState::Skipped;
    }

    pub fn is_request_handled(&self) -> bool {
        self.state == RequestState::Handled
    }

    pub fn is_request_skipped(&self) -> bool {
        self.state == RequestState::Skipped
    }
}

impl StageContext for ExtractContext {
    fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    fn is_terminal(&self) -> bool {
        self.state != RequestState::Continue
    }
}

/// Validation stage: enforces the protocol rules, failing fast.
#[derive(Debug)]
pub struct ValidateContext {
    pub transaction: Transaction,
    /// The client identifier being validated, once known.
    pub client_id: Option<String>,
    rejection: Option<ProtocolError>,
}

impl ValidateContext {
    pub fn new(transaction: Transaction) -> Self {
        Self {
            transaction,
            client_id: None,
            rejection: None,
        }
    }

    pub fn reject(&mut self, code: ErrorCode, description: impl Into<String>) {
        self.rejection = Some(ProtocolError::new(code, description));
    }

    pub fn reject_with(&mut self, error: ProtocolError) {
        self.rejection = Some(error);
    }

    pub fn is_rejected(&self) -> bool {
        self.rejection.is_some()
    }

    pub fn rejection(&self) -> Option<&ProtocolError> {
        self.rejection.as_ref()
    }

    pub fn take_rejection(&mut self) -> Option<ProtocolError> {
        self.rejection.take()
    }
}

impl StageContext for ValidateContext {
    fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    fn is_terminal(&self) -> bool {
        self.rejection.is_some()
    }
}

/// Handling stage: turns a validated request into a grant decision.
#[derive(Debug)]
pub struct HandleContext {
    pub transaction: Transaction,
    /// The authenticated principal, attached by a host handler.
    pub principal: Option<Principal>,
    /// Logout endpoint only: whether the host approved the sign-out.
    pub is_logout_allowed: bool,
    state: RequestState,
    rejection: Option<ProtocolError>,
}

impl HandleContext {
    pub fn new(transaction: Transaction) -> Self {
        Self {
            transaction,
            principal: None,
            is_logout_allowed: false,
            state: RequestState::Continue,
            rejection: None,
        }
    }

    pub fn handle_request(&mut self) {
        self.state = RequestState::Handled;
    }

    pub fn skip_request(&mut self) {
        self.state = RequestState::Skipped;
    }

    pub fn is_request_handled(&self) -> bool {
        self.state == RequestState::Handled
    }

    pub fn is_request_skipped(&self) -> bool {
        self.state == RequestState::Skipped
    }

    pub fn reject(&mut self, code: ErrorCode, description: impl Into<String>) {
        self.rejection = Some(ProtocolError::new(code, description));
    }

    pub fn is_rejected(&self) -> bool {
        self.rejection.is_some()
    }

    pub fn take_rejection(&mut self) -> Option<ProtocolError> {
        self.rejection.take()
    }
}

impl StageContext for HandleContext {
    fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    fn is_terminal(&self) -> bool {
        self.state != RequestState::Continue || self.rejection.is_some()
    }
}

/// Apply stage: shapes the final response and picks its disposition.
#[derive(Debug)]
pub struct ApplyContext {
    pub transaction: Transaction,
    pub disposition: Disposition,
    state: RequestState,
}

impl ApplyContext {
    pub fn new(transaction: Transaction) -> Self {
        Self {
            transaction,
            disposition: Disposition::Json,
            state: RequestState::Continue,
        }
    }

    pub fn handle_request(&mut self) {
        self.state = RequestState::Handled;
    }

    pub fn is_request_handled(&self) -> bool {
        self.state == RequestState::Handled
    }
}

impl StageContext for ApplyContext {
    fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    fn is_terminal(&self) -> bool {
        self.state == RequestState::Handled
    }
}
