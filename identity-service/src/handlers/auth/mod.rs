pub mod registration;
pub mod session;
pub mod social;

pub use registration::{register, resend_otp, verify_otp};
pub use session::{login, logout, logout_all, refresh};
pub use social::{google_callback, google_login};

pub const REGISTER_SUCCESS: &str = "Registration successful. OTP has been sent to email";
pub const VERIFY_OTP_SUCCESS: &str = "Verification successful";
pub const RESEND_OTP_SUCCESS: &str = "If the account is awaiting verification, a new OTP has been sent";
pub const LOGIN_SUCCESS: &str = "Login successful";
pub const REFRESH_SUCCESS: &str = "Token refresh successful";
pub const LOGOUT_SUCCESS: &str = "Logout successful";
pub const LOGOUT_ALL_SUCCESS: &str = "All sessions revoked";
