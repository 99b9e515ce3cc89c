use libp2p::kad::{Event, QueryResult};
use owo_colors::OwoColorize;
use tracing::debug;

use super::{EventHandler, EventLoop};

impl EventHandler<Event> for EventLoop {
    async fn handle(&mut self, event: Event) {
        debug!("{}: {:?}", "kad".yellow(), event);

        if let Event::OutboundQueryProgressed {
            id,
            result: QueryResult::Bootstrap(result),
            step,
            ..
        } = event
        {
            // Bootstrap reports once per bucket refresh; settle on the last step.
            if !step.last {
                return;
            }

            if let Some(sender) = self.pending_bootstrap.remove(&id) {
                let _ignored = sender.send(result.map(|_| ()).map_err(Into::into));
            }
        }
    }
}
