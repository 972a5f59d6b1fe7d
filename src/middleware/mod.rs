pub mod audit;
pub mod auth;
pub mod metrics;
pub mod rate_limit;
pub mod rbac;
