pub mod app;
pub mod config;
pub mod server;
pub mod share;

pub use app::{start, start_within, App, AppOptions, INIT_TIMEOUT};
pub use server::{build_router, AppState};
