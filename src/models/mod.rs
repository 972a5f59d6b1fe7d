pub mod approval;
pub mod audit;
pub mod notification;
pub mod user;
