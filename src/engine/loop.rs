/// The engine event loop.
///
/// Everything the engine does happens on this single task: commands from
/// handles, inbound transport messages, the two heartbeat timers, and the
/// closure signals are multiplexed through one `select!`, so state is never
/// shared and never locked.
use std::ops::ControlFlow;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::transport::Inbound;

use super::state::State;
use super::{Command, PeerSnapshot};

pub(super) async fn run(
    mut state: State,
    mut commands: mpsc::Receiver<Command>,
    mut inbox: mpsc::UnboundedReceiver<Inbound>,
    mut own_closed: watch::Receiver<bool>,
    parent_closed: Option<watch::Receiver<bool>>,
) {
    state.register().await;

    // First tick lands one full period out; registration itself was the
    // initial checkin announcement.
    let period = state.config.ping_interval;
    let mut send_ping = interval_at(Instant::now() + period, period);
    send_ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut liveness = interval_at(Instant::now() + period, period);
    liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut parent_watch = parent_closed;

    tracing::debug!(id = %state.id, channel = %state.channel_name, "engine started");

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                if handle_command(&mut state, command).await.is_break() {
                    break;
                }
            }
            Some(msg) = inbox.recv() => {
                state.handle_inbound(msg).await;
            }
            _ = send_ping.tick() => {
                state.heartbeat_tick().await;
            }
            _ = liveness.tick() => {
                state.liveness_tick();
            }
            changed = own_closed.changed() => {
                match changed {
                    Ok(()) if *own_closed.borrow() => {
                        state.handle_closing().await;
                        break;
                    }
                    Ok(()) => {}
                    Err(_) => break,
                }
            }
            _ = parent_gone(&mut parent_watch), if parent_watch.is_some() => {
                parent_watch = None;
                state.notify_parent_closed();
            }
        }
    }

    tracing::debug!(id = %state.id, "engine stopped");
}

/// Resolves once the watched parent context closes. With `None` (no parent,
/// or already reported) the caller disables the select arm.
async fn parent_gone(watch: &mut Option<watch::Receiver<bool>>) {
    match watch {
        Some(rx) => loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        },
        None => std::future::pending().await,
    }
}

async fn handle_command(state: &mut State, command: Command) -> ControlFlow<()> {
    match command {
        Command::SendToChild { id, data, reply } => {
            let _ = reply.send(state.send_to_child(id, data).await);
        }
        Command::SendToChildren { data, reply } => {
            let _ = reply.send(state.send_to_children(data).await);
        }
        Command::SendToParent { data, reply } => {
            let _ = reply.send(state.send_to_parent(data).await);
        }
        Command::OpenChild { url, reply } => {
            let _ = reply.send(state.open_child(&url).await);
        }
        Command::CloseChild { id, reply } => {
            let _ = reply.send(state.close_child(&id).await);
        }
        Command::CloseSelf { reply } => {
            let _ = reply.send(state.close_self().await);
            // The closure protocol runs when the transport signal arrives.
        }
        Command::Children { reply } => {
            let _ = reply.send(state.children.all());
        }
        Command::OpenChildren { reply } => {
            let _ = reply.send(state.children.open());
        }
        Command::ClosedChildren { reply } => {
            let _ = reply.send(state.children.closed());
        }
        Command::Snapshot { reply } => {
            let _ = reply.send(PeerSnapshot {
                id: state.id.clone(),
                created: state.created,
                status: state.status,
                last_checkin: state.last_checkin,
                last_parent_checkin: state.last_parent_checkin,
                channel_name: state.channel_name.clone(),
                has_parent: state.parent.is_some(),
            });
        }
        Command::Shutdown => return ControlFlow::Break(()),
    }
    ControlFlow::Continue(())
}
