//! The drain loop run by the marker-holding worker.
//!
//! Each pass first tries to release the marker if the backlog is empty, in
//! one atomic statement. If the release did not happen the marker must still
//! be there; a worker whose marker was removed stops, since a new worker may
//! already hold a fresh one. Otherwise the oldest entry is decoded and
//! processed, then deleted. A failure leaves the entry in place and releases
//! the marker unconditionally.

use opentelemetry::KeyValue;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::codec::Codec;
use crate::error::Result;
use crate::model::WorkerExit;
use crate::processor::Processor;
use crate::storage::Storage;
use crate::telemetry::{metrics, work::start_item_span};

/// Drain the backlog. Must only be called while holding the marker.
///
/// Returns `Drained` on idle release, `Released` on processing failure and
/// `MarkerLost` if the marker was removed underneath the loop.
/// Storage errors propagate with the marker still held; the caller decides
/// how to release it.
pub(crate) fn drain<T, C, P>(storage: &Storage, codec: &C, processor: &mut P) -> Result<WorkerExit>
where
    T: DeserializeOwned,
    C: Codec,
    P: Processor<T>,
{
    let mut processed = 0;

    loop {
        if storage.release_if_idle()? {
            info!(processed, "backlog empty, deactivated");
            return Ok(WorkerExit::Drained { processed });
        }

        if !storage.is_active()? {
            warn!(processed, "status marker removed while work is pending, stopping");
            return Ok(WorkerExit::MarkerLost { processed });
        }

        // The backlog may have been emptied by a worker that claimed a
        // replacement marker; the next pass settles it.
        let Some(entry) = storage.oldest_work()? else {
            continue;
        };

        let span = start_item_span(entry.id);
        let _enter = span.enter();
        info!("processing");

        let outcome = codec
            .decode::<T>(&entry.payload)
            .map_err(|e| e.to_string())
            .and_then(|item| processor.process(item).map_err(|e| e.to_string()));

        match outcome {
            Ok(()) => {
                storage.delete_work(entry.id)?;
                processed += 1;
                metrics::work_processed().add(1, &[KeyValue::new("result", "ok")]);
                info!("deleted");
            }
            Err(error) => {
                metrics::work_processed().add(1, &[KeyValue::new("result", "error")]);
                warn!(%error, "processing failed, deactivating");
                storage.release_all()?;
                return Ok(WorkerExit::Released {
                    processed,
                    entry: entry.id,
                    error,
                });
            }
        }
    }
}
