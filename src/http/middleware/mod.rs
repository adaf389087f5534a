//! Request middleware, outermost first: access log, then chaos.

pub mod access_log;
pub mod chaos;

pub use access_log::access_log;
pub use chaos::chaos_middleware;
