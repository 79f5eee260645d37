pub mod address;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod loan;
pub mod local;
pub mod money;
pub mod orchestrator;
pub mod sync;
pub mod telemetry;
pub mod utils;
pub mod validator;
pub mod wire;
