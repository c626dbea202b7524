pub mod auth;
pub mod health;
pub mod impersonation;
pub mod permissions;
pub mod security_events;
