pub mod dispatcher;
pub mod push;
pub mod routes;
pub mod store;
