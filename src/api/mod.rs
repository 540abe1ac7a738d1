pub mod handlers;
pub mod server;
pub mod ws;

pub use handlers::AppState;
pub use server::{build_router, cors_layer, run_server};
