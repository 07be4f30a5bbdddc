//! # lowq
//!
//! A durable task queue in a single SQLite file. Any number of producer
//! processes push work; at most one detached worker process drains it.
//!
//! Exclusivity is a row in the database guarded by a UNIQUE constraint:
//! a worker that manages to insert it owns the backlog until it deletes it
//! again. There is no lock manager, heartbeat or lease.
//!
//! The default worker is the producer's own executable re-run in the
//! background, so `main` hands over to the worker hook before anything else:
//!
//! ```no_run
//! use lowq::{QueueConfig, TaskQueue};
//!
//! fn main() -> lowq::Result<()> {
//!     // Never returns in the detached worker process.
//!     lowq::worker::run_if_worker(|path: String| -> std::io::Result<()> {
//!         println!("thumbnailing {path}");
//!         Ok(())
//!     });
//!
//!     let queue = TaskQueue::new(QueueConfig::new("thumbs.db"))?;
//!     queue.push(["img/1.png", "img/2.png"])?;
//!     queue.start(&queue.worker_command()?)?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod detach;
mod drain;
pub mod error;
pub mod model;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod storage;
pub mod telemetry;
pub mod worker;

pub use codec::{Codec, CodecKind};
pub use config::QueueConfig;
pub use detach::WorkerCommand;
pub use error::{Error, Result};
pub use model::{PushReport, QueueStatus, WorkerExit};
pub use processor::{CommandProcessor, Processor};
pub use queue::TaskQueue;
pub use worker::Worker;
