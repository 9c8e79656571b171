//! `docrag-server` exposes document retrieval over HTTP with a small
//! question-answering page.

pub mod protocol;
pub mod server;

pub use server::{AppState, ServerConfig, app_router, run_server};
