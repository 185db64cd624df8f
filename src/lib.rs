pub mod clock;
pub mod configuration;
pub mod controller;
pub mod error_handling;
pub mod session_management;
pub mod status_parsing;
pub mod storage;
pub mod web_interface;

pub use controller::Controller;
pub use session_management::SessionManager;
