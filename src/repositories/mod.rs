pub mod activity;
pub mod email_challenge;
pub mod session;
pub mod settings;
pub mod user;

pub use activity::ActivityRepository;
pub use email_challenge::EmailChallengeRepository;
pub use session::SessionRepository;
pub use settings::SettingsRepository;
pub use user::{NewUser, UserRepository};
