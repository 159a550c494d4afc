pub mod identity;
pub mod session;
pub mod token;

pub use identity::Identity;
pub use session::Session;
pub use token::AuthToken;
