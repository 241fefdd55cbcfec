//! Stock message filters

mod trace;
mod worker_reply;

pub use trace::{TraceCollection, TraceMessageFilter};
pub use worker_reply::WorkerReplyFilter;
