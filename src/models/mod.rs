pub mod activity;
pub mod session;
pub mod settings;
pub mod user;

pub use activity::ActivityEntry;
pub use session::Session;
pub use settings::{
    ApplicationDetailsSettings, ApplicationFeaturesSettings, ApplicationSecuritySettings,
    AuthLayout, SettingsGroup,
};
pub use user::{AccountType, Capability, Role, User};
