//! Wire-level vocabulary shared by the endpoints.
//!
//! Parameter names, grant types, response types and the other literal strings
//! defined by RFC 6749, RFC 7636, RFC 7662, RFC 7009 and OpenID Connect Core.

/// Parameter names used in protocol requests and responses.
pub mod params {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const ACTIVE: &str = "active";
    pub const ASSERTION: &str = "assertion";
    pub const AUDIENCE: &str = "audience";
    pub const CLIENT_ASSERTION: &str = "client_assertion";
    pub const CLIENT_ASSERTION_TYPE: &str = "client_assertion_type";
    pub const CLIENT_ID: &str = "client_id";
    pub const CLIENT_SECRET: &str = "client_secret";
    pub const CODE: &str = "code";
    pub const CODE_CHALLENGE: &str = "code_challenge";
    pub const CODE_CHALLENGE_METHOD: &str = "code_challenge_method";
    pub const CODE_VERIFIER: &str = "code_verifier";
    pub const ERROR: &str = "error";
    pub const ERROR_DESCRIPTION: &str = "error_description";
    pub const ERROR_URI: &str = "error_uri";
    pub const EXPIRES_IN: &str = "expires_in";
    pub const GRANT_TYPE: &str = "grant_type";
    pub const ID_TOKEN: &str = "id_token";
    pub const ID_TOKEN_HINT: &str = "id_token_hint";
    pub const NONCE: &str = "nonce";
    pub const PASSWORD: &str = "password";
    pub const POST_LOGOUT_REDIRECT_URI: &str = "post_logout_redirect_uri";
    pub const PROMPT: &str = "prompt";
    pub const REDIRECT_URI: &str = "redirect_uri";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const REQUEST: &str = "request";
    pub const REQUEST_URI: &str = "request_uri";
    pub const RESOURCE: &str = "resource";
    pub const RESPONSE_MODE: &str = "response_mode";
    pub const RESPONSE_TYPE: &str = "response_type";
    pub const SCOPE: &str = "scope";
    pub const STATE: &str = "state";
    pub const TOKEN: &str = "token";
    pub const TOKEN_TYPE: &str = "token_type";
    pub const TOKEN_TYPE_HINT: &str = "token_type_hint";
    pub const USERNAME: &str = "username";
}

/// Parameters whose values must never appear in logs or debug output.
pub const SENSITIVE_PARAMS: &[&str] = &[
    params::ACCESS_TOKEN,
    params::REFRESH_TOKEN,
    params::ID_TOKEN,
    params::ID_TOKEN_HINT,
    params::CODE,
    params::CLIENT_SECRET,
    params::ASSERTION,
    params::CLIENT_ASSERTION,
    params::PASSWORD,
    params::TOKEN,
];

pub mod grant_types {
    pub const AUTHORIZATION_CODE: &str = "authorization_code";
    pub const CLIENT_CREDENTIALS: &str = "client_credentials";
    pub const DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";
    pub const PASSWORD: &str = "password";
    pub const REFRESH_TOKEN: &str = "refresh_token";
}

pub mod response_types {
    pub const CODE: &str = "code";
    pub const ID_TOKEN: &str = "id_token";
    pub const NONE: &str = "none";
    pub const TOKEN: &str = "token";
}

pub mod response_modes {
    pub const FORM_POST: &str = "form_post";
    pub const FRAGMENT: &str = "fragment";
    pub const QUERY: &str = "query";
}

pub mod prompts {
    pub const CONSENT: &str = "consent";
    pub const LOGIN: &str = "login";
    pub const NONE: &str = "none";
    pub const SELECT_ACCOUNT: &str = "select_account";
}

pub mod scopes {
    pub const ADDRESS: &str = "address";
    pub const EMAIL: &str = "email";
    pub const OFFLINE_ACCESS: &str = "offline_access";
    pub const OPENID: &str = "openid";
    pub const PHONE: &str = "phone";
    pub const PROFILE: &str = "profile";
}

pub mod code_challenge_methods {
    pub const PLAIN: &str = "plain";
    pub const S256: &str = "S256";
}

pub mod token_type_hints {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const AUTHORIZATION_CODE: &str = "authorization_code";
    pub const ID_TOKEN: &str = "id_token";
    pub const REFRESH_TOKEN: &str = "refresh_token";
}

pub mod token_types {
    pub const BEARER: &str = "Bearer";
}

/// Standard OIDC claims emitted by the userinfo endpoint, grouped by the
/// scope that unlocks them.
pub mod claims {
    pub const ADDRESS: &str = "address";
    pub const BIRTHDATE: &str = "birthdate";
    pub const EMAIL: &str = "email";
    pub const EMAIL_VERIFIED: &str = "email_verified";
    pub const FAMILY_NAME: &str = "family_name";
    pub const GIVEN_NAME: &str = "given_name";
    pub const NAME: &str = "name";
    pub const PHONE_NUMBER: &str = "phone_number";
    pub const PHONE_NUMBER_VERIFIED: &str = "phone_number_verified";
    pub const PREFERRED_USERNAME: &str = "preferred_username";
    pub const PROFILE: &str = "profile";
    pub const SUBJECT: &str = "sub";
    pub const WEBSITE: &str = "website";
}
