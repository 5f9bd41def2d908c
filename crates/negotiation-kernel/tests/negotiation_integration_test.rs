//! Integration tests for the actor-driven negotiation.
//!
//! Tests the full flow of:
//! - RegisterRoundDriver -> Round -> RoundComplete
//! - TravellerSettled broadcasts reaching a broker subscriber
//! - Final SimulationReport matching the synchronous Router

use std::sync::Arc;

use acton_reactive::prelude::*;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{timeout, Duration};

use negotiation_kernel::messages::{RegisterRoundDriver, Round, RoundComplete, TravellerSettled};
use negotiation_kernel::{
    NegotiationBuilder, NegotiationConfig, NegotiationStatus, Road, RoadNetwork, ScheduleStrategy,
    Simulation, TravellerId, TravellerSpec,
};
use negotiation_kernel::protocol::LocationId;

fn line_network() -> Arc<RoadNetwork> {
    let roads = [(1, 1, 2), (2, 2, 3), (3, 3, 4)].map(|(id, from, to)| Road {
        id: LocationId(id),
        from,
        to,
        distance: 10.0,
        speed_limit: 100,
    });
    Arc::new(RoadNetwork::from_roads(roads).unwrap())
}

fn specs() -> Vec<TravellerSpec> {
    (1..=3)
        .map(|id| TravellerSpec {
            id: TravellerId(id),
            source: 1,
            destination: 4,
            start: 0,
            speed: 1,
            length: 0,
        })
        .collect()
}

/// Round driver state: forwards RoundComplete to the test
#[derive(Default, Clone)]
struct DriverState {
    tx: Option<mpsc::Sender<RoundComplete>>,
}

impl std::fmt::Debug for DriverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverState")
            .field("has_tx", &self.tx.is_some())
            .finish()
    }
}

/// Observer state: records every TravellerSettled broadcast
#[derive(Default, Clone)]
struct ObserverState {
    settled: Arc<RwLock<Vec<TravellerSettled>>>,
}

impl std::fmt::Debug for ObserverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverState").finish()
    }
}

async fn spawn_driver(runtime: &mut ActorRuntime, tx: mpsc::Sender<RoundComplete>) -> ActorHandle {
    let mut actor = runtime.new_actor_with_name::<DriverState>("TestRoundDriver".to_string());
    actor.model.tx = Some(tx);

    actor.act_on::<RoundComplete>(|actor, context| {
        let msg = context.message().clone();
        let tx = actor.model.tx.clone();
        Reply::pending(async move {
            if let Some(tx) = tx {
                let _ = tx.send(msg).await;
            }
        })
    });

    actor.start().await
}

async fn spawn_observer(
    runtime: &mut ActorRuntime,
    settled: Arc<RwLock<Vec<TravellerSettled>>>,
) -> ActorHandle {
    let mut actor = runtime.new_actor_with_name::<ObserverState>("TestObserver".to_string());
    actor.model.settled = settled;

    // Subscribe BEFORE starting
    actor.handle().subscribe::<TravellerSettled>().await;

    actor.mutate_on::<TravellerSettled>(|actor, context| {
        let msg = context.message().clone();
        let settled = actor.model.settled.clone();
        Reply::pending(async move {
            settled.write().await.push(msg);
        })
    });

    actor.start().await
}

/// Send Round until the coordinator reports completion.
async fn drive(coordinator: &ActorHandle, rx: &mut mpsc::Receiver<RoundComplete>) -> Vec<RoundComplete> {
    let mut rounds = Vec::new();
    for _ in 0..100 {
        coordinator.send(Round).await;
        let round = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("round timed out")
            .expect("driver channel closed");
        let complete = round.report.complete;
        rounds.push(round);
        if complete {
            break;
        }
    }
    rounds
}

#[tokio::test]
async fn test_actor_negotiation_matches_router() {
    let config = NegotiationConfig::default();
    let expected = Simulation::with_config(config.clone(), line_network())
        .add_travellers(specs())
        .run();

    let mut runtime = ActonApp::launch_async().await;

    let settled = Arc::new(RwLock::new(Vec::new()));
    spawn_observer(&mut runtime, settled.clone()).await;

    let (tx, mut rx) = mpsc::channel(16);
    let driver = spawn_driver(&mut runtime, tx).await;

    let coordinator = NegotiationBuilder::new(config, line_network())
        .add_travellers(specs())
        .spawn(&mut runtime)
        .await;
    coordinator.send(RegisterRoundDriver { handle: driver }).await;

    let rounds = drive(&coordinator, &mut rx).await;
    let last = rounds.last().expect("at least one round");
    assert!(last.report.complete);

    let report = last.simulation.clone().expect("final report on completion");
    assert_eq!(report, expected);
    assert_eq!(report.finalized + report.terminated, 3);

    // Ticks advance by one per round until completion
    for (index, round) in rounds.iter().enumerate() {
        assert_eq!(round.report.tick, index + 1);
    }

    // Broadcasts are delivered asynchronously
    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = settled.read().await;
    assert_eq!(settled.len(), 3);
    let mut ids: Vec<_> = settled.iter().map(|s| s.outcome.traveller).collect();
    ids.sort();
    assert_eq!(ids, vec![TravellerId(1), TravellerId(2), TravellerId(3)]);
    assert!(settled
        .iter()
        .filter(|s| s.outcome.status == NegotiationStatus::Finalize)
        .all(|s| s.outcome.final_cost.is_some()));

    runtime.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn test_tick_limit_completes_run() {
    let config = NegotiationConfig {
        max_ticks: 2,
        strategy: ScheduleStrategy::Priority,
        ..NegotiationConfig::default()
    };

    let mut runtime = ActonApp::launch_async().await;
    let (tx, mut rx) = mpsc::channel(16);
    let driver = spawn_driver(&mut runtime, tx).await;

    let coordinator = NegotiationBuilder::new(config, line_network())
        .add_travellers(specs())
        .spawn(&mut runtime)
        .await;
    coordinator.send(RegisterRoundDriver { handle: driver }).await;

    let rounds = drive(&coordinator, &mut rx).await;
    assert_eq!(rounds.len(), 2);

    let report = rounds[1].simulation.clone().expect("final report");
    assert_eq!(report.finalized, 0);
    assert_eq!(report.terminated, 3);
    assert_eq!(report.ticks, 2);

    runtime.shutdown_all().await.unwrap();
}
