//! Registry of per-server OAuth descriptors plus the PKCE/state/nonce
//! helpers used to start an authorization-code flow.

use dashmap::DashMap;
use oauth2::{CsrfToken, Nonce, PkceCodeChallenge, PkceCodeVerifier};
use portal_types::{ServerConfig, ServerName};

/// A started (but not yet completed) authorization attempt. The portal
/// stores this keyed by `state` until the provider redirects back with a
/// matching `code`/`state` pair.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub server_name: ServerName,
    pub authorize_url: String,
    pub state: String,
    pub nonce: String,
    pub pkce_verifier: String,
}

/// The interceptor's view of the server catalog: each OAuth-configured server's
/// provider descriptor (endpoints, client id, scopes). Populated from the
/// same `ServerConfig` the relational store persists.
#[derive(Default)]
pub struct ProviderRegistry {
    servers: DashMap<ServerName, ServerConfig>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: ServerName, config: ServerConfig) {
        self.servers.insert(name, config);
    }

    pub fn get(&self, name: &ServerName) -> Option<ServerConfig> {
        self.servers.get(name).map(|c| c.clone())
    }

    pub fn is_oauth_configured(&self, name: &ServerName) -> bool {
        self.servers.contains_key(name)
    }

    pub fn remove(&self, name: &ServerName) -> Option<ServerConfig> {
        self.servers.remove(name).map(|(_, c)| c)
    }

    /// Builds the authorization URL plus the PKCE verifier and CSRF/nonce
    /// state the caller must persist until the redirect comes back
    ///.
    pub fn start_authorization(&self, name: &ServerName) -> Option<AuthorizationRequest> {
        let config = self.get(name)?;
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let state = CsrfToken::new_random();
        let nonce = Nonce::new_random();

        let mut url = url::Url::parse(&config.authorization_endpoint).ok()?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &config.client_id)
            .append_pair("redirect_uri", &config.redirect_uri)
            .append_pair("scope", &config.scopes.join(" "))
            .append_pair("state", state.secret())
            .append_pair("code_challenge", challenge.as_str())
            .append_pair("code_challenge_method", "S256");

        Some(AuthorizationRequest {
            server_name: name.clone(),
            authorize_url: url.to_string(),
            state: state.secret().clone(),
            nonce: nonce.secret().clone(),
            pkce_verifier: verifier.secret().clone(),
        })
    }

    /// Re-wraps a persisted verifier string for the token exchange call.
    pub fn verifier(secret: String) -> PkceCodeVerifier {
        PkceCodeVerifier::new(secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> ServerConfig {
        ServerConfig {
            provider_type: "generic".into(),
            client_id: "client-123".into(),
            client_secret: Some("shh".into()),
            scopes: vec!["mcp:tools".into(), "offline_access".into()],
            redirect_uri: "https://portal.example.com/oauth/callback".into(),
            authorization_endpoint: "https://idp.example.com/authorize".into(),
            token_endpoint: "https://idp.example.com/token".into(),
            registration_endpoint: None,
        }
    }

    #[test]
    fn start_authorization_builds_pkce_url_with_state() {
        let registry = ProviderRegistry::new();
        let name = ServerName::new("alpha");
        registry.register(name.clone(), sample_config());

        let req = registry.start_authorization(&name).unwrap();
        assert!(req.authorize_url.contains("code_challenge="));
        assert!(req.authorize_url.contains("code_challenge_method=S256"));
        assert!(req.authorize_url.contains(&format!("state={}", req.state)));
        assert!(!req.pkce_verifier.is_empty());
    }

    #[test]
    fn unconfigured_server_has_no_authorization() {
        let registry = ProviderRegistry::new();
        assert!(registry
            .start_authorization(&ServerName::new("not-there"))
            .is_none());
        assert!(!registry.is_oauth_configured(&ServerName::new("not-there")));
    }
}
