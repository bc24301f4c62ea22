pub mod authorizor;
mod dispatch;
mod identity;
mod user;

pub use dispatch::Dispatch;
pub use identity::{DynIdentity, IdentityProvider, StaticIdentityProvider};
pub use user::{Role, User};
