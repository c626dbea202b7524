pub mod access_rule;
pub mod impersonation;
pub mod security_event;
pub mod user;
