use lanpair::{
    ConnectionState, DescriptionFormat, Delivery, LoopbackEngine, Peer, PeerConfig, PeerEvent,
    Readiness, RestartPolicy, Role, SessionError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

fn peer(engine: &LoopbackEngine, config: PeerConfig) -> Peer {
    Peer::with_engine(config, Arc::new(engine.clone())).unwrap()
}

async fn wait_for_state(peer: &Peer, state: ConnectionState) {
    timeout(WAIT, async {
        while peer.state() != state {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("state {state} not reached, stuck at {}", peer.state()));
}

async fn connected_pair(config: PeerConfig) -> (LoopbackEngine, Peer, Peer) {
    let engine = LoopbackEngine::new();
    let host = peer(&engine, config.clone());
    let joiner = peer(&engine, config);

    let offer = timeout(WAIT, host.start_host()).await.unwrap().unwrap();
    assert_eq!(host.local_offer(), offer);
    let answer = timeout(WAIT, joiner.join_host(&offer)).await.unwrap().unwrap();
    assert_eq!(joiner.local_answer(), answer);
    host.accept_remote_answer(&answer).await.unwrap();

    wait_for_state(&host, ConnectionState::ChannelOpen).await;
    wait_for_state(&joiner, ConnectionState::ChannelOpen).await;
    (engine, host, joiner)
}

fn collect(peer: &Peer) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    peer.on_message_received(move |msg| {
        let _ = tx.send(msg);
    });
    rx
}

async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn ping_reaches_joiner() {
    let (_engine, host, joiner) = connected_pair(PeerConfig::default()).await;
    let mut at_joiner = collect(&joiner);
    let mut at_host = collect(&host);

    assert_eq!(host.role(), Some(Role::Host));
    assert_eq!(joiner.role(), Some(Role::Joiner));
    assert_eq!(host.channel_readiness(), Readiness::Open);
    assert_eq!(joiner.channel_readiness(), Readiness::Open);

    assert_eq!(host.send_message("ping").await.unwrap(), Delivery::Sent);
    assert_eq!(next(&mut at_joiner).await, "ping");

    assert_eq!(joiner.send_data("pong").await.unwrap(), Delivery::Sent);
    assert_eq!(next(&mut at_host).await, "pong");
}

#[tokio::test]
async fn replaced_handler_receives_alone() {
    let (_engine, host, joiner) = connected_pair(PeerConfig::default()).await;
    let mut first = collect(&joiner);
    host.send_message("one").await.unwrap();
    assert_eq!(next(&mut first).await, "one");

    let mut second = collect(&joiner);
    host.send_message("two").await.unwrap();
    assert_eq!(next(&mut second).await, "two");

    sleep(Duration::from_millis(20)).await;
    // the first handler was dropped together with its sender
    assert!(first.recv().await.is_none());
}

#[tokio::test]
async fn send_before_open_is_reported_not_fatal() {
    let engine = LoopbackEngine::new();
    let host = peer(&engine, PeerConfig::default());
    let mut events = host.subscribe();

    assert_eq!(host.send_message("nobody").await.unwrap(), Delivery::NotOpen);
    assert_eq!(events.recv().await.unwrap(), PeerEvent::SendDropped { session: None });

    timeout(WAIT, host.start_host()).await.unwrap().unwrap();
    assert_eq!(host.state(), ConnectionState::AwaitingRemote);
    assert_eq!(host.send_message("early").await.unwrap(), Delivery::NotOpen);
    assert_eq!(host.state(), ConnectionState::AwaitingRemote);
    assert_eq!(host.channel_readiness(), Readiness::Connecting);

    let session = host.session_id();
    let mut dropped = false;
    while let Ok(event) = events.try_recv() {
        dropped |= event == PeerEvent::SendDropped { session: session.clone() };
    }
    assert!(dropped);
}

#[tokio::test]
async fn compact_descriptions_connect() {
    let config = PeerConfig::default().with_format(DescriptionFormat::Compact);
    let engine = LoopbackEngine::new();
    let host = peer(&engine, config.clone());
    let joiner = peer(&engine, config);

    let offer = timeout(WAIT, host.start_host()).await.unwrap().unwrap();
    assert!(!offer.starts_with('{'));
    let answer = timeout(WAIT, joiner.join_host(&offer)).await.unwrap().unwrap();
    assert!(!answer.starts_with('{'));
    host.set_answer(&answer).await.unwrap();
    wait_for_state(&joiner, ConnectionState::ChannelOpen).await;

    let mut inbox = collect(&joiner);
    host.send_message("ping").await.unwrap();
    assert_eq!(next(&mut inbox).await, "ping");
}

#[tokio::test]
async fn malformed_offer_keeps_joiner_new() {
    let engine = LoopbackEngine::new();
    let host = peer(&engine, PeerConfig::default());
    let joiner = peer(&engine, PeerConfig::default().with_restart(RestartPolicy::Reject));

    let err = joiner.accept_remote_offer("not json").await.unwrap_err();
    assert!(err.is_decode());
    assert_eq!(joiner.state(), ConnectionState::New);

    // the untouched session is reused, so the retry is not refused
    let offer = timeout(WAIT, host.start_host()).await.unwrap().unwrap();
    timeout(WAIT, joiner.join_host(&offer)).await.unwrap().unwrap();
    assert_eq!(joiner.state(), ConnectionState::DescriptionExchanged);
}

#[tokio::test]
async fn wrong_role_operations_are_invalid_state() {
    let engine = LoopbackEngine::new();
    let peer = peer(&engine, PeerConfig::default());
    assert!(peer.accept_remote_answer("{}").await.unwrap_err().is_invalid_state());
    assert_eq!(peer.state(), ConnectionState::New);

    let offer = timeout(WAIT, peer.start_host()).await.unwrap().unwrap();
    // an offer is not an answer
    assert!(peer.accept_remote_answer(&offer).await.unwrap_err().is_decode());
    assert_eq!(peer.state(), ConnectionState::AwaitingRemote);
    assert_eq!(peer.local_answer(), "");
}

#[tokio::test]
async fn restart_replaces_live_session_by_default() {
    let engine = LoopbackEngine::new();
    let host = peer(&engine, PeerConfig::default());

    let first_offer = timeout(WAIT, host.start_host()).await.unwrap().unwrap();
    let first_id = host.session_id().unwrap();
    let second_offer = timeout(WAIT, host.start_host()).await.unwrap().unwrap();

    assert_ne!(host.session_id().unwrap(), first_id);
    assert_ne!(first_offer, second_offer);
    assert!(engine.connections()[0].is_closed());
    assert_eq!(host.state(), ConnectionState::AwaitingRemote);

    // the replacement negotiates normally
    let joiner = peer(&engine, PeerConfig::default());
    let answer = timeout(WAIT, joiner.join_host(&second_offer)).await.unwrap().unwrap();
    host.accept_remote_answer(&answer).await.unwrap();
    wait_for_state(&host, ConnectionState::ChannelOpen).await;
}

#[tokio::test]
async fn reject_policy_refuses_while_live() {
    let engine = LoopbackEngine::new();
    let host = peer(&engine, PeerConfig::default().with_restart(RestartPolicy::Reject));

    timeout(WAIT, host.start_host()).await.unwrap().unwrap();
    let id = host.session_id();
    match host.start_host().await {
        Err(SessionError::InvalidState { state, .. }) => {
            assert_eq!(state, ConnectionState::AwaitingRemote)
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(host.session_id(), id);

    host.close().await;
    assert_eq!(host.state(), ConnectionState::Closed);
    timeout(WAIT, host.start_host()).await.unwrap().unwrap();
    assert_ne!(host.session_id(), id);
}

#[tokio::test]
async fn rejected_answer_fails_fast_afterwards() {
    let engine = LoopbackEngine::new();
    let host = peer(&engine, PeerConfig::default());
    let joiner = peer(&engine, PeerConfig::default());
    let mut events = host.subscribe();

    let offer = timeout(WAIT, host.start_host()).await.unwrap().unwrap();
    let answer = timeout(WAIT, joiner.join_host(&offer)).await.unwrap().unwrap();

    engine.reject_remote_descriptions(true);
    assert!(matches!(
        host.accept_remote_answer(&answer).await,
        Err(SessionError::NegotiationRejected(_))
    ));
    assert_eq!(host.state(), ConnectionState::Failed);
    assert!(host.accept_remote_answer(&answer).await.unwrap_err().is_invalid_state());
    assert!(host.send_message("late").await.unwrap_err().is_invalid_state());
    assert_eq!(host.state(), ConnectionState::Failed);

    let mut failed = false;
    while let Ok(event) = events.try_recv() {
        failed |= matches!(event, PeerEvent::Failed { .. });
    }
    assert!(failed);
}

#[tokio::test]
async fn closing_one_side_closes_the_other() {
    let (_engine, host, joiner) = connected_pair(PeerConfig::default()).await;
    let mut events = joiner.subscribe();

    host.close().await;
    assert_eq!(host.state(), ConnectionState::Closed);
    wait_for_state(&joiner, ConnectionState::Closed).await;
    assert_eq!(joiner.channel_readiness(), Readiness::Closed);

    let event = timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(PeerEvent::Disconnected { session }) => break session,
                Ok(_) => continue,
                Err(err) => panic!("event stream ended: {err}"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(Some(event), joiner.session_id());

    assert!(joiner.send_message("gone").await.unwrap_err().is_invalid_state());
}

#[tokio::test]
async fn connected_event_follows_open() {
    let engine = LoopbackEngine::new();
    let host = peer(&engine, PeerConfig::default());
    let joiner = peer(&engine, PeerConfig::default());
    let mut events = host.subscribe();

    let offer = timeout(WAIT, host.start_host()).await.unwrap().unwrap();
    let answer = timeout(WAIT, joiner.join_host(&offer)).await.unwrap().unwrap();
    host.accept_remote_answer(&answer).await.unwrap();

    let mut states = Vec::new();
    timeout(WAIT, async {
        loop {
            match events.recv().await.unwrap() {
                PeerEvent::StateChanged { state, .. } => states.push(state),
                PeerEvent::Connected { .. } => break,
                _ => {}
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(
        states,
        vec![
            ConnectionState::DescriptionCreated,
            ConnectionState::AwaitingRemote,
            ConnectionState::DescriptionExchanged,
            ConnectionState::ChannelOpen,
        ]
    );
}

#[tokio::test]
async fn unreadable_offer_leaves_live_host_untouched() {
    for restart in [RestartPolicy::Replace, RestartPolicy::Reject] {
        let engine = LoopbackEngine::new();
        let host = peer(&engine, PeerConfig::default().with_restart(restart));
        let offer = timeout(WAIT, host.start_host()).await.unwrap().unwrap();
        let id = host.session_id();

        assert!(host.accept_remote_offer("not json").await.unwrap_err().is_decode());
        assert!(host.join_host("{\"type\":\"offer\"").await.unwrap_err().is_decode());
        // an answer handed to the offer path is a decode error as well
        let joiner = peer(&engine, PeerConfig::default());
        let answer = timeout(WAIT, joiner.join_host(&offer)).await.unwrap().unwrap();
        assert!(host.join_host(&answer).await.unwrap_err().is_decode());

        assert_eq!(host.session_id(), id, "{restart:?}");
        assert_eq!(host.role(), Some(Role::Host));
        assert_eq!(host.state(), ConnectionState::AwaitingRemote);
        assert_eq!(host.local_offer(), offer);
        assert!(!engine.connections()[0].is_closed());

        // the negotiation it was in the middle of still completes
        host.accept_remote_answer(&answer).await.unwrap();
        wait_for_state(&host, ConnectionState::ChannelOpen).await;
    }
}
