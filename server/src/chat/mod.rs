pub mod conversations;
pub mod messages;
pub mod send;
pub mod store;
