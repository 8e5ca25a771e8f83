//! Rentals real-time messaging server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod auth;
pub mod bus;
pub mod chat;
pub mod config;
pub mod contracts;
pub mod db;
pub mod error;
pub mod events;
pub mod notifications;
pub mod properties;
pub mod routes;
pub mod state;
pub mod users;
pub mod ws;
