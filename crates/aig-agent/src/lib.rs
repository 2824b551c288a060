pub mod agent_loop;
pub mod callbacks;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod handler;
pub mod health;
pub mod plan;
pub mod preflight;
pub mod process;
pub mod progress;
pub mod session;
