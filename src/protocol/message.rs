//! Protocol messages: the case-sensitive parameter map plus the typed
//! request/response views over it.
//!
//! A [`Message`] preserves insertion order and compares parameter names
//! byte-for-byte. [`Request`] and [`Response`] wrap a message with the typed
//! accessors the endpoint handlers work against, including the space-separated
//! scope set and the flow predicates from RFC 6749 and OIDC Core.

use std::fmt;
use std::ops::{Deref, DerefMut};

use indexmap::IndexMap;

use crate::protocol::constants::{
    grant_types, params, response_modes, response_types, SENSITIVE_PARAMS,
};
use crate::protocol::parameter::Parameter;

/// An ordered-insertion, case-sensitive mapping from parameter name to value.
#[derive(Clone, Default, PartialEq)]
pub struct Message {
    entries: IndexMap<String, Parameter>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a message from raw name/value pairs, as decoded from a query
    /// string or form body. A name that repeats becomes a single multi-valued
    /// parameter, preserving the order of its values.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut message = Message::new();
        for (name, value) in pairs {
            match message.entries.entry(name) {
                indexmap::map::Entry::Vacant(slot) => {
                    slot.insert(Parameter::String(value));
                }
                indexmap::map::Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    let mut values = match std::mem::replace(existing, Parameter::Null) {
                        Parameter::String(prior) => vec![prior],
                        Parameter::Array(prior) => prior,
                        other => other.values().into_iter().map(str::to_owned).collect(),
                    };
                    values.push(value);
                    *existing = Parameter::Array(values);
                }
            }
        }
        message
    }

    /// Adds a parameter only if the name is not already present.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<Parameter>) {
        let name = name.into();
        if !self.entries.contains_key(&name) {
            self.entries.insert(name, value.into());
        }
    }

    /// Sets a parameter, replacing any existing value. Setting a null or
    /// empty value removes the entry instead.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Parameter>) {
        let name = name.into();
        let value = value.into();
        if value.is_empty() {
            self.entries.shift_remove(&name);
        } else {
            self.entries.insert(name, value);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.entries.get(name)
    }

    /// Returns the parameter as a string slice, if present and string-valued.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.entries.get(name).and_then(Parameter::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<Parameter> {
        self.entries.shift_remove(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Serializes the message to a JSON object, preserving parameter order.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, value) in &self.entries {
            map.insert(name.clone(), value.to_json());
        }
        serde_json::Value::Object(map)
    }
}

impl fmt::Debug for Message {
    /// Debug output with credential-bearing parameters redacted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in &self.entries {
            if SENSITIVE_PARAMS.contains(&name.as_str()) {
                map.entry(name, &"[redacted]");
            } else {
                map.entry(name, value);
            }
        }
        map.finish()
    }
}

/// Splits a space-separated parameter into its member values.
fn split_values(value: Option<&str>) -> Vec<&str> {
    value.map(|v| v.split_whitespace().collect()).unwrap_or_default()
}

/// Whether a space-separated parameter contains a given member.
fn contains_value(parameter: Option<&str>, value: &str) -> bool {
    split_values(parameter).iter().any(|v| *v == value)
}

/// The inbound protocol request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Request {
    message: Message,
}

impl Request {
    pub fn new(message: Message) -> Self {
        Self { message }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn client_id(&self) -> Option<&str> {
        self.get_str(params::CLIENT_ID)
    }

    pub fn client_secret(&self) -> Option<&str> {
        self.get_str(params::CLIENT_SECRET)
    }

    pub fn redirect_uri(&self) -> Option<&str> {
        self.get_str(params::REDIRECT_URI)
    }

    pub fn scope(&self) -> Option<&str> {
        self.get_str(params::SCOPE)
    }

    pub fn response_type(&self) -> Option<&str> {
        self.get_str(params::RESPONSE_TYPE)
    }

    pub fn response_mode(&self) -> Option<&str> {
        self.get_str(params::RESPONSE_MODE)
    }

    pub fn code(&self) -> Option<&str> {
        self.get_str(params::CODE)
    }

    pub fn code_verifier(&self) -> Option<&str> {
        self.get_str(params::CODE_VERIFIER)
    }

    pub fn code_challenge(&self) -> Option<&str> {
        self.get_str(params::CODE_CHALLENGE)
    }

    pub fn code_challenge_method(&self) -> Option<&str> {
        self.get_str(params::CODE_CHALLENGE_METHOD)
    }

    pub fn grant_type(&self) -> Option<&str> {
        self.get_str(params::GRANT_TYPE)
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.get_str(params::REFRESH_TOKEN)
    }

    pub fn access_token(&self) -> Option<&str> {
        self.get_str(params::ACCESS_TOKEN)
    }

    pub fn token(&self) -> Option<&str> {
        self.get_str(params::TOKEN)
    }

    pub fn token_type_hint(&self) -> Option<&str> {
        self.get_str(params::TOKEN_TYPE_HINT)
    }

    pub fn nonce(&self) -> Option<&str> {
        self.get_str(params::NONCE)
    }

    pub fn prompt(&self) -> Option<&str> {
        self.get_str(params::PROMPT)
    }

    pub fn state(&self) -> Option<&str> {
        self.get_str(params::STATE)
    }

    pub fn id_token_hint(&self) -> Option<&str> {
        self.get_str(params::ID_TOKEN_HINT)
    }

    pub fn post_logout_redirect_uri(&self) -> Option<&str> {
        self.get_str(params::POST_LOGOUT_REDIRECT_URI)
    }

    pub fn username(&self) -> Option<&str> {
        self.get_str(params::USERNAME)
    }

    pub fn password(&self) -> Option<&str> {
        self.get_str(params::PASSWORD)
    }

    /// Requested resource indicators / audiences (multi-valued).
    pub fn resources(&self) -> Vec<&str> {
        let mut resources: Vec<&str> = self
            .get(params::RESOURCE)
            .map(Parameter::values)
            .unwrap_or_default();
        resources.extend(
            self.get(params::AUDIENCE)
                .map(Parameter::values)
                .unwrap_or_default(),
        );
        resources
    }

    /// The requested scope set, split on whitespace.
    pub fn scopes(&self) -> Vec<&str> {
        split_values(self.scope())
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        contains_value(self.scope(), scope)
    }

    pub fn has_prompt_value(&self, prompt: &str) -> bool {
        contains_value(self.prompt(), prompt)
    }

    pub fn has_response_type(&self, response_type: &str) -> bool {
        contains_value(self.response_type(), response_type)
    }

    /// response_type is exactly `code` (RFC 6749 §4.1).
    pub fn is_authorization_code_flow(&self) -> bool {
        let values = split_values(self.response_type());
        values.len() == 1 && values[0] == response_types::CODE
    }

    /// response_type is a non-empty combination of `id_token` and `token`
    /// without `code` (RFC 6749 §4.2, OIDC Core §3.2).
    pub fn is_implicit_flow(&self) -> bool {
        let values = split_values(self.response_type());
        !values.is_empty()
            && values
                .iter()
                .all(|v| *v == response_types::ID_TOKEN || *v == response_types::TOKEN)
    }

    /// response_type combines `code` with `id_token` and/or `token`
    /// (OIDC Core §3.3).
    pub fn is_hybrid_flow(&self) -> bool {
        let values = split_values(self.response_type());
        values.iter().any(|v| *v == response_types::CODE)
            && values
                .iter()
                .any(|v| *v == response_types::ID_TOKEN || *v == response_types::TOKEN)
            && values.iter().all(|v| {
                *v == response_types::CODE
                    || *v == response_types::ID_TOKEN
                    || *v == response_types::TOKEN
            })
    }

    pub fn is_authorization_code_grant_type(&self) -> bool {
        self.grant_type() == Some(grant_types::AUTHORIZATION_CODE)
    }

    pub fn is_client_credentials_grant_type(&self) -> bool {
        self.grant_type() == Some(grant_types::CLIENT_CREDENTIALS)
    }

    pub fn is_password_grant_type(&self) -> bool {
        self.grant_type() == Some(grant_types::PASSWORD)
    }

    pub fn is_refresh_token_grant_type(&self) -> bool {
        self.grant_type() == Some(grant_types::REFRESH_TOKEN)
    }

    pub fn is_device_code_grant_type(&self) -> bool {
        self.grant_type() == Some(grant_types::DEVICE_CODE)
    }

    pub fn is_query_response_mode(&self) -> bool {
        self.response_mode() == Some(response_modes::QUERY)
    }

    pub fn is_fragment_response_mode(&self) -> bool {
        self.response_mode() == Some(response_modes::FRAGMENT)
    }

    pub fn is_form_post_response_mode(&self) -> bool {
        self.response_mode() == Some(response_modes::FORM_POST)
    }
}

impl Deref for Request {
    type Target = Message;

    fn deref(&self) -> &Message {
        &self.message
    }
}

impl DerefMut for Request {
    fn deref_mut(&mut self) -> &mut Message {
        &mut self.message
    }
}

/// The outbound protocol response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Response {
    message: Message,
}

impl Response {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn error(&self) -> Option<&str> {
        self.get_str(params::ERROR)
    }

    pub fn error_description(&self) -> Option<&str> {
        self.get_str(params::ERROR_DESCRIPTION)
    }

    pub fn error_uri(&self) -> Option<&str> {
        self.get_str(params::ERROR_URI)
    }

    pub fn set_error(&mut self, error: &str, description: Option<&str>, uri: Option<&str>) {
        self.set(params::ERROR, error);
        self.set(params::ERROR_DESCRIPTION, description.map(str::to_owned));
        self.set(params::ERROR_URI, uri.map(str::to_owned));
    }

    pub fn access_token(&self) -> Option<&str> {
        self.get_str(params::ACCESS_TOKEN)
    }

    pub fn set_access_token(&mut self, token: &str) {
        self.set(params::ACCESS_TOKEN, token);
    }

    pub fn token_type(&self) -> Option<&str> {
        self.get_str(params::TOKEN_TYPE)
    }

    pub fn set_token_type(&mut self, token_type: &str) {
        self.set(params::TOKEN_TYPE, token_type);
    }

    pub fn expires_in(&self) -> Option<i64> {
        self.get(params::EXPIRES_IN).and_then(Parameter::as_i64)
    }

    pub fn set_expires_in(&mut self, seconds: i64) {
        self.set(params::EXPIRES_IN, seconds);
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.get_str(params::REFRESH_TOKEN)
    }

    pub fn set_refresh_token(&mut self, token: &str) {
        self.set(params::REFRESH_TOKEN, token);
    }

    pub fn id_token(&self) -> Option<&str> {
        self.get_str(params::ID_TOKEN)
    }

    pub fn set_id_token(&mut self, token: &str) {
        self.set(params::ID_TOKEN, token);
    }

    pub fn code(&self) -> Option<&str> {
        self.get_str(params::CODE)
    }

    pub fn set_code(&mut self, code: &str) {
        self.set(params::CODE, code);
    }

    pub fn state(&self) -> Option<&str> {
        self.get_str(params::STATE)
    }

    pub fn set_state(&mut self, state: Option<&str>) {
        self.set(params::STATE, state.map(str::to_owned));
    }

    pub fn scope(&self) -> Option<&str> {
        self.get_str(params::SCOPE)
    }

    pub fn set_scope(&mut self, scope: &str) {
        self.set(params::SCOPE, scope);
    }

    pub fn active(&self) -> Option<bool> {
        self.get(params::ACTIVE).and_then(Parameter::as_bool)
    }

    pub fn set_active(&mut self, active: bool) {
        self.set(params::ACTIVE, active);
    }
}

impl Deref for Response {
    type Target = Message;

    fn deref(&self) -> &Message {
        &self.message
    }
}

impl DerefMut for Response {
    fn deref_mut(&mut self) -> &mut Message {
        &mut self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(pairs: &[(&str, &str)]) -> Request {
        Request::new(Message::from_pairs(
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())),
        ))
    }

    #[test]
    fn test_add_is_noop_when_present() {
        let mut message = Message::new();
        message.add("scope", "openid");
        message.add("scope", "profile");
        assert_eq!(message.get_str("scope"), Some("openid"));
    }

    #[test]
    fn test_set_removes_on_empty() {
        let mut message = Message::new();
        message.set("state", "xyz");
        assert!(message.has("state"));
        message.set("state", Parameter::Null);
        assert!(!message.has("state"));
        message.set("state", "");
        assert!(!message.has("state"));
    }

    #[test]
    fn test_parameter_names_are_case_sensitive() {
        let mut message = Message::new();
        message.set("client_id", "c1");
        assert!(message.has("client_id"));
        assert!(!message.has("Client_Id"));
        assert_eq!(message.get("CLIENT_ID"), None);
    }

    #[test]
    fn test_from_pairs_collapses_repeats_into_array() {
        let message = Message::from_pairs(vec![
            ("resource".to_string(), "https://api1".to_string()),
            ("scope".to_string(), "openid".to_string()),
            ("resource".to_string(), "https://api2".to_string()),
        ]);

        assert_eq!(
            message.get("resource"),
            Some(&Parameter::Array(vec![
                "https://api1".to_string(),
                "https://api2".to_string()
            ]))
        );
        assert_eq!(message.count(), 2);
        // Insertion order is preserved.
        let names: Vec<&str> = message.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["resource", "scope"]);
    }

    #[test]
    fn test_debug_redacts_sensitive_parameters() {
        let mut message = Message::new();
        message.set("client_id", "c1");
        message.set("client_secret", "hunter2");
        message.set("code", "opaque-code");

        let output = format!("{message:?}");
        assert!(output.contains("c1"));
        assert!(!output.contains("hunter2"));
        assert!(!output.contains("opaque-code"));
        assert!(output.contains("[redacted]"));
    }

    #[test]
    fn test_scope_set_accessors() {
        let request = request_with(&[("scope", "openid profile email")]);
        assert_eq!(request.scopes(), vec!["openid", "profile", "email"]);
        assert!(request.has_scope("profile"));
        assert!(!request.has_scope("Profile"));
        assert!(!request.has_scope("phone"));
    }

    #[test]
    fn test_flow_predicates() {
        assert!(request_with(&[("response_type", "code")]).is_authorization_code_flow());
        assert!(!request_with(&[("response_type", "code id_token")]).is_authorization_code_flow());

        assert!(request_with(&[("response_type", "id_token")]).is_implicit_flow());
        assert!(request_with(&[("response_type", "id_token token")]).is_implicit_flow());
        assert!(!request_with(&[("response_type", "code")]).is_implicit_flow());

        assert!(request_with(&[("response_type", "code id_token")]).is_hybrid_flow());
        assert!(request_with(&[("response_type", "code token id_token")]).is_hybrid_flow());
        assert!(!request_with(&[("response_type", "code")]).is_hybrid_flow());
        assert!(!request_with(&[("response_type", "code unknown")]).is_hybrid_flow());
    }

    #[test]
    fn test_prompt_and_response_type_membership() {
        let request = request_with(&[
            ("prompt", "login consent"),
            ("response_type", "code id_token"),
        ]);
        assert!(request.has_prompt_value("login"));
        assert!(request.has_prompt_value("consent"));
        assert!(!request.has_prompt_value("none"));
        assert!(request.has_response_type("id_token"));
        assert!(!request.has_response_type("token"));
    }

    #[test]
    fn test_resources_merges_resource_and_audience() {
        let request = Request::new(Message::from_pairs(vec![
            ("resource".to_string(), "https://api1".to_string()),
            ("resource".to_string(), "https://api2".to_string()),
            ("audience".to_string(), "worker".to_string()),
        ]));
        assert_eq!(
            request.resources(),
            vec!["https://api1", "https://api2", "worker"]
        );
    }

    #[test]
    fn test_response_typed_accessors() {
        let mut response = Response::new();
        response.set_access_token("at");
        response.set_token_type("Bearer");
        response.set_expires_in(3600);
        response.set_active(false);
        response.set_state(Some("xyz"));

        assert_eq!(response.access_token(), Some("at"));
        assert_eq!(response.token_type(), Some("Bearer"));
        assert_eq!(response.expires_in(), Some(3600));
        assert_eq!(response.active(), Some(false));
        assert_eq!(response.state(), Some("xyz"));

        response.set_state(None);
        assert_eq!(response.state(), None);
    }
}
