//! Real-time collaborative code editing: a Loro-backed shared document with
//! presence, local-only undo, debounced code analysis and an assistant chat,
//! plus the WebSocket relay that connects editors to each other.

pub mod adapter;
pub mod analysis;
pub mod chat;
pub mod clients;
pub mod config;
pub mod docs;
pub mod editor;
pub mod error;
pub mod handlers;
pub mod models;
pub mod presence;
pub mod routes;
pub mod session;
pub mod store;
pub mod undo;
pub mod utils;
pub mod websocket;

use std::future::Future;
use std::pin::Pin;

pub use error::CollabError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
