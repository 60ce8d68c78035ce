//! Result reporting port.

use futures_util::future::BoxFuture;

use piecework_types::error::DispatchError;
use piecework_types::job::JobReport;

/// Sends the single report of a job back to whoever queued it.
///
/// The report is addressed by `(worker_server_id, request_id)` carried in the
/// report itself. Implementations must not retry indefinitely; redelivery is
/// the queue's concern.
pub trait ResultReporter: Send + Sync {
    fn report<'a>(&'a self, report: &'a JobReport) -> BoxFuture<'a, Result<(), DispatchError>>;
}
