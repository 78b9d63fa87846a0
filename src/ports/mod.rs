//! Collaborator contracts the domain depends on.

pub mod calendar_port;
pub mod config_port;
pub mod data_port;
pub mod model_port;
pub mod report_port;
