pub mod analytics_event_repository;
pub mod local_state_repository;
