use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::error::EngineError;

/// Send a request carrying a one-shot reply channel and wait for the reply
/// for at most `after`.
///
/// A closed mailbox or a dropped reply sender is [`EngineError::Stopped`];
/// an elapsed deadline is [`EngineError::Timeout`]. The request is not
/// retracted on timeout.
pub(crate) async fn ask<M, T>(
    tx: &mpsc::UnboundedSender<M>,
    target: &str,
    operation: &'static str,
    after: Duration,
    make: impl FnOnce(oneshot::Sender<T>) -> M,
) -> Result<T, EngineError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(make(reply_tx))
        .map_err(|_| EngineError::Stopped(target.to_owned()))?;
    match tokio::time::timeout(after, reply_rx).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) => Err(EngineError::Stopped(target.to_owned())),
        Err(_) => Err(EngineError::Timeout { operation, after }),
    }
}
