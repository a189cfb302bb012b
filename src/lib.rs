pub mod config;
pub mod network;
pub mod operations;

// Public exports
pub use config::Config;
pub use operations::{
    get_operations_status, AdminCommandRunner, CollectContext, OperationRecord, OperationsStatus,
};
