pub mod auth;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod quota;
pub mod routes;
pub mod state;
pub mod utils;

pub use auth::{AuthorizationResult, PeerAddrs, PolicyStore};
pub use quota::{QuotaContext, QuotaTracker};
pub use routes::create_app;
pub use state::AppState;
pub use utils::{ApiError, Config};
