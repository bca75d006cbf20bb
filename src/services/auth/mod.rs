pub mod authorization;
pub mod password;
pub mod token;

pub use authorization::AuthorizationService;
pub use password::{ChangePasswordRequest, PasswordService};
pub use token::TokenManager;
