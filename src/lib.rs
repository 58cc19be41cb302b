pub mod airports;
pub mod config;
pub mod errors;
pub mod geodesy;
pub mod leg;
pub mod reconciler;
pub mod render;
pub mod session;
pub mod store;
pub mod surface;
pub mod telemetry;
pub mod theme;
