pub mod cache;
pub mod database;
pub mod engine;
pub mod error;
pub mod grants;
pub mod jwt;
pub mod memory;
pub mod session;
pub mod store;
pub mod terminal;
pub mod user;
pub mod verification;

pub use database::Database;
pub use engine::{EngineSettings, IamCore};
pub use error::IamError;
pub use grants::{AuthorizationCodeIssued, GrantRequest};
pub use jwt::{AccessTokenClaims, JwtService, RefreshTokenClaims};
pub use memory::MemoryStore;
pub use session::TokenSet;
pub use store::{StoreError, Stores};
pub use terminal::{
    AuthorizationConfirmed, AuthorizationStarted, RegisteredTerminal, TerminalRegistration,
};
pub use verification::{VerificationMethod, Verifier, VerifierConfig};
