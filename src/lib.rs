pub mod env;
pub mod error;
pub mod k8s;
pub mod reload;
pub mod server;
pub mod supervisor;
pub mod watcher;
