#![forbid(unsafe_code)]

use crate::coordinator::ControlEvent;
use crate::error::Error;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Signal listeners that translate process signals into run events.
///
/// * `SIGINT`, `SIGTERM`: stop the run.
/// * `SIGUSR1`: take a snapshot now.
/// * `SIGUSR2`: log the run state.
///
/// Handlers only forward; no work happens in signal context.
pub struct SignalForwarder {
    interrupt: Signal,
    terminate: Signal,
    sample: Signal,
    dump: Signal,
}

impl SignalForwarder {
    /// Register the listeners. Call this before launching the subject so that
    /// an early `SIGUSR1` is not fatal to the monitor.
    pub fn install() -> Result<Self, Error> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            sample: signal(SignalKind::user_defined1())?,
            dump: signal(SignalKind::user_defined2())?,
        })
    }

    /// Forward signals until an interrupt arrives or the receiving side goes
    /// away.
    pub async fn forward(
        mut self,
        cancel: CancellationToken,
        control_tx: mpsc::UnboundedSender<ControlEvent>,
    ) {
        loop {
            let event = tokio::select! {
                _ = self.interrupt.recv() => None,
                _ = self.terminate.recv() => None,
                _ = self.sample.recv() => Some(ControlEvent::SampleNow),
                _ = self.dump.recv() => Some(ControlEvent::DumpStatus),
                () = cancel.cancelled() => return,
            };

            let Some(event) = event else {
                info!("received termination signal, shutting down");
                cancel.cancel();
                return;
            };
            debug!(?event, "received signal event");
            if control_tx.send(event).is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::{Signal as NixSignal, raise};
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn user_signals_become_control_events() {
        let forwarder = SignalForwarder::install().unwrap();
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(forwarder.forward(cancel.clone(), tx));

        raise(NixSignal::SIGUSR2).unwrap();
        let event = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(event, Some(ControlEvent::DumpStatus));

        raise(NixSignal::SIGUSR1).unwrap();
        let event = timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(event, Some(ControlEvent::SampleNow));

        cancel.cancel();
        timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    }
}
