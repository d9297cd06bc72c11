pub mod analytics_service;
pub mod api_client;
pub mod attribution_service;
pub mod auth_service;
pub mod checkout_service;
pub mod compatibility;
pub mod dashboard;
pub mod event_reporter;
pub mod geo_service;
pub mod local_state_service;
pub mod order_service;
pub mod summary_service;
pub mod usage_service;
