pub mod command;
pub mod constants;
pub mod session;
pub mod status;
