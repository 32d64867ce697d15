pub mod command;
pub mod retention;
