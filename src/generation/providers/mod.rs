pub mod chat;
pub mod vertex;
