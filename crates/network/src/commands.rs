use std::collections::hash_map::Entry;

use arbor_network_primitives::config::split_peer_addr;
use eyre::eyre;

use crate::client::Command;
use crate::EventLoop;

#[allow(
    clippy::multiple_inherent_impl,
    reason = "Currently necessary due to code structure"
)]
impl EventLoop {
    pub(crate) fn handle_command(&mut self, command: Command) {
        match command {
            Command::ListenOn { addr, sender } => {
                let result = self.swarm.listen_on(addr).map(|_| ()).map_err(Into::into);
                let _ignored = sender.send(result);
            }
            Command::Dial { peer_addr, sender } => {
                let Some((peer_id, addr)) = split_peer_addr(&peer_addr) else {
                    let _ignored = sender.send(Err(eyre!("No peer ID in address: {}", peer_addr)));
                    return;
                };

                if self.swarm.is_connected(&peer_id) {
                    let _ignored = sender.send(Ok(()));
                    return;
                }

                match self.pending_dial.entry(peer_id) {
                    Entry::Occupied(_) => {
                        let _ignored = sender.send(Err(eyre!("Already dialing {}", peer_id)));
                    }
                    Entry::Vacant(entry) => {
                        let _ignored = self
                            .swarm
                            .behaviour_mut()
                            .kad
                            .add_address(&peer_id, addr);

                        match self.swarm.dial(peer_addr) {
                            Ok(()) => {
                                let _ignored = entry.insert(sender);
                            }
                            Err(err) => {
                                let _ignored = sender.send(Err(err.into()));
                            }
                        }
                    }
                }
            }
            Command::Bootstrap { sender } => match self.swarm.behaviour_mut().kad.bootstrap() {
                Ok(query_id) => {
                    let _ignored = self.pending_bootstrap.insert(query_id, sender);
                }
                Err(err) => {
                    let _ignored = sender.send(Err(err.into()));
                }
            },
            Command::PeerCount { sender } => {
                let _ignored = sender.send(self.swarm.connected_peers().count());
            }
        }
    }
}
