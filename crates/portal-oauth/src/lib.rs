//! OAuthInterceptor + DcrBridge: proactive/reactive token refresh for
//! outbound MCP calls, and RFC 7591 Dynamic Client Registration against the
//! identity provider.

pub mod dcr;
pub mod error;
pub mod interceptor;
pub mod provider;
pub mod singleflight;

pub use dcr::{DcrBridge, DcrPatch, DcrRequest, DcrResponse, ProviderClient, ProviderRegistration, ProviderSecret};
pub use error::{OAuthError, OAuthResult};
pub use interceptor::{OAuthInterceptor, OutboundRequest, OutboundResponse};
pub use provider::{AuthorizationRequest, ProviderRegistry};
pub use singleflight::SingleFlight;
