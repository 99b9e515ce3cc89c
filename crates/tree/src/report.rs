use std::sync::Arc;

use arbor_network_primitives::stream::StreamReceiver;
use arbor_primitives::message::MessageType;
use parking_lot::Mutex;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::membership::ChildReport;

/// Reads one child's upward reports for as long as its stream lives.
///
/// The child entry is left in place when the stream fails: a dead child is
/// only detected, and removed, by the next broadcast that cannot reach it.
pub(crate) async fn run_report_loop(
    report: Arc<Mutex<ChildReport>>,
    mut receiver: StreamReceiver,
    token: CancellationToken,
) {
    let child = receiver.remote_peer();

    loop {
        let message = select! {
            () = token.cancelled() => return,
            message = receiver.recv() => message,
        };

        let message = match message {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!(%child, "child closed its report stream");
                return;
            }
            Err(err) => {
                error!(%child, %err, "error reading message from child");
                return;
            }
        };

        match message.kind {
            MessageType::State => {
                let mut report = report.lock();
                report.size = message.num_peers.saturating_add(1);
                report.children = message.peers;

                debug!(%child, size = report.size, "child reported state");
            }
            MessageType::Part => warn!(%child, "got 'Part' message from child"),
            kind => warn!(%child, ?kind, "got unexpected message from child"),
        }
    }
}
