pub mod analytics;
pub mod attribution;
pub mod auth;
pub mod catalog;
pub mod checkout;
pub mod notification;
pub mod order;
pub mod usage;
