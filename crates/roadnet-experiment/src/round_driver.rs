//! Round driver and settlement observer actors.
//!
//! These bridge the coordinator's actor messages to the experiment harness
//! by forwarding them into tokio channels.

use acton_reactive::prelude::*;
use tokio::sync::mpsc;

use negotiation_kernel::messages::{RoundComplete, TravellerSettled};

/// State for the round driver actor.
#[derive(Default, Clone)]
pub struct RoundDriverState {
    /// Channel sender for forwarding round results
    pub tx: Option<mpsc::Sender<RoundComplete>>,
}

impl std::fmt::Debug for RoundDriverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundDriverState")
            .field("has_tx", &self.tx.is_some())
            .finish()
    }
}

/// Actor that receives RoundComplete messages and forwards them to a channel.
///
/// The harness registers this actor with the coordinator via
/// RegisterRoundDriver, then sends one Round at a time and waits on the
/// channel for the matching RoundComplete.
pub struct RoundDriverActor {
    tx: mpsc::Sender<RoundComplete>,
}

impl RoundDriverActor {
    pub fn new(tx: mpsc::Sender<RoundComplete>) -> Self {
        Self { tx }
    }

    /// Spawn the actor in the runtime.
    ///
    /// Returns the handle to pass to the coordinator in RegisterRoundDriver.
    pub async fn spawn(self, runtime: &mut ActorRuntime) -> ActorHandle {
        let mut actor = runtime.new_actor_with_name::<RoundDriverState>("RoundDriver".to_string());

        actor.model.tx = Some(self.tx);

        actor.act_on::<RoundComplete>(|actor, context| {
            let result = context.message().clone();
            let tx = actor.model.tx.clone();

            Reply::pending(async move {
                if let Some(tx) = tx {
                    // Receiver may have been dropped
                    let _ = tx.send(result).await;
                }
            })
        });

        actor.start().await
    }
}

/// State for the settlement observer.
#[derive(Default, Clone)]
pub struct SettlementObserverState {
    pub tx: Option<mpsc::UnboundedSender<TravellerSettled>>,
}

impl std::fmt::Debug for SettlementObserverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementObserverState")
            .field("has_tx", &self.tx.is_some())
            .finish()
    }
}

/// Actor that subscribes to TravellerSettled broadcasts.
pub struct SettlementObserver {
    tx: mpsc::UnboundedSender<TravellerSettled>,
}

impl SettlementObserver {
    pub fn new(tx: mpsc::UnboundedSender<TravellerSettled>) -> Self {
        Self { tx }
    }

    /// Spawn the actor; it must be running before the first Round.
    pub async fn spawn(self, runtime: &mut ActorRuntime) {
        let mut actor = runtime
            .new_actor_with_name::<SettlementObserverState>("SettlementObserver".to_string());

        actor.model.tx = Some(self.tx);

        // Subscribe BEFORE starting
        actor.handle().subscribe::<TravellerSettled>().await;

        actor.act_on::<TravellerSettled>(|actor, context| {
            if let Some(tx) = &actor.model.tx {
                let _ = tx.send(context.message().clone());
            }
            Reply::ready()
        });

        actor.start().await;
    }
}
