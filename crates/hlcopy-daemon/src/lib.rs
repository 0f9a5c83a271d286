pub mod api_types;
pub mod handlers;
pub mod routes;
pub mod state;

pub use handlers::DaemonHandlers;
pub use state::AppState;
