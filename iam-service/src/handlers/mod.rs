pub mod context;
pub mod health;
pub mod oauth;
pub mod terminals;

pub use context::{AuthenticatedClient, RequestContext};
