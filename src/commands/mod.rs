pub mod check_config;
pub mod indicator;
pub mod optimize;
pub mod replay;
