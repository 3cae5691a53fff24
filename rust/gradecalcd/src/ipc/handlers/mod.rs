pub mod calc_config;
pub mod core;
pub mod grading;
pub mod schemes;
