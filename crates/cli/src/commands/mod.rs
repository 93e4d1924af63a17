pub mod config_cmd;
pub mod process;
pub mod status;
