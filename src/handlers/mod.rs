pub mod admin;
pub mod health;
pub mod impersonation;
pub mod login;
pub mod logout;
pub mod register;
pub mod two_factor;

pub use admin::{
    auth_layout, list_activity, show_setting_value, show_settings, update_setting_value,
    update_settings,
};
pub use health::health_check;
pub use login::login;
pub use logout::logout;
pub use register::register;
pub use two_factor::{
    disable_app_authentication, disable_email_authentication, enable_app_authentication,
    enable_email_authentication, regenerate_recovery_codes, security_state,
    setup_app_authentication, start_email_authentication,
};
