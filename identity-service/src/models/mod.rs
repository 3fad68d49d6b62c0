pub mod oauth_state;
pub mod refresh_token;
pub mod user;

pub use oauth_state::OAuthStateData;
pub use refresh_token::RefreshToken;
pub use user::{NewUser, User, UserProfile};
