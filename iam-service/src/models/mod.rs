pub mod application;
pub mod contact;
pub mod context;
pub mod session;
pub mod terminal;
pub mod user;
pub mod verification;

pub use application::{Application, ApplicationSeed};
pub use contact::{Contact, ContactError, EmailAddress, PhoneNumber};
pub use context::{parse_accept_language, Actor, Authorization, CallContext};
pub use session::SessionRecord;
pub use terminal::{NewTerminal, TerminalRecord, VerificationType};
pub use user::{ContactOwner, UserRecord};
pub use verification::{NewVerification, StartedVerification, VerificationRecord};
