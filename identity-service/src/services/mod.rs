pub mod auth;
pub mod cache;
pub mod database;
pub mod email;
pub mod error;
pub mod google;
pub mod jwt;
pub mod memory;

pub use auth::{AuthService, GoogleLoginOutcome};
pub use cache::{EphemeralStore, InMemoryEphemeralStore, RedisStore};
pub use database::{CredentialStore, PgCredentialStore, StoreError};
pub use email::{EmailProvider, EmailService, MockEmailService};
pub use error::ServiceError;
pub use google::{FederatedProfile, GoogleOAuthClient, IdentityProvider, MockIdentityProvider};
pub use jwt::{AccessTokenClaims, JwtService, TokenCodec, TokenError};
pub use memory::InMemoryCredentialStore;
