pub mod autopilot;
pub mod handlers;
pub mod middleware;
pub mod poller;
pub mod routes;
pub mod tasks;

pub use routes::create_router;
