pub mod chat;
pub mod diagnosis;
pub mod notice;
pub mod user;
