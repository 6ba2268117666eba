pub mod api;
pub mod config;
pub mod keys;
pub mod ledger;
pub mod observability;
pub mod pipeline;
pub mod queue;
pub mod rpc;
pub mod seed;
pub mod suggest;
pub mod worker;
