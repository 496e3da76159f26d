//! Whatever happened before it, a disconnect leaves no call, edge, or open port behind

mod common;

use proptest::prelude::*;

use common::{check_media_log, harness};
use sipua_core::engine::EngineEvent;
use sipua_core::loopback::{LoopbackBehavior, LoopbackEngine};
use sipua_core::{
    AccountConfig, AgentConfig, CallHandle, CallInfo, CallState, MediaPlan, MediaStatus,
    MediaType, TransportConfig, UserAgent,
};

#[derive(Debug, Clone)]
enum Op {
    /// Non-terminal call state reported by the engine
    State(CallState),
    /// Re-INVITE with the given audio status
    Renegotiate(MediaStatus),
    /// Same media state delivered again
    Redeliver,
}

fn non_terminal_state() -> impl Strategy<Value = CallState> {
    prop_oneof![
        Just(CallState::Early),
        Just(CallState::Connecting),
        Just(CallState::Confirmed),
    ]
}

fn media_status() -> impl Strategy<Value = MediaStatus> {
    prop_oneof![
        Just(MediaStatus::Active),
        Just(MediaStatus::LocalHold),
        Just(MediaStatus::RemoteHold),
        Just(MediaStatus::None),
    ]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        non_terminal_state().prop_map(Op::State),
        media_status().prop_map(Op::Renegotiate),
        Just(Op::Redeliver),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn disconnect_always_releases_everything(ops in prop::collection::vec(op(), 0..8)) {
        let mut h = harness(LoopbackBehavior::default());
        let handle = h.engine.inject_incoming_call(h.account, "sip:alice@example.com").unwrap();
        h.pump();
        prop_assert_eq!(h.agent.total_calls(), 1);

        for op in &ops {
            match op {
                Op::State(state) => {
                    let info = CallInfo::new(handle, *state)
                        .with_remote_uri("sip:alice@example.com");
                    h.agent.dispatch(EngineEvent::CallState { handle, info });
                }
                Op::Renegotiate(status) => {
                    h.engine.renegotiate_media(handle, &[(MediaType::Audio, *status)]).unwrap();
                }
                Op::Redeliver => {
                    if let Some(info) = h.engine.call_info(handle) {
                        h.agent.dispatch(EngineEvent::CallMediaState { handle, info });
                    }
                }
            }
            h.pump();
            prop_assert_eq!(h.agent.total_calls(), 1);
            let edges = h.edges();
            prop_assert!(edges == 0 || edges == 3, "unexpected edge count {}", edges);
        }

        h.engine.remote_hangup(handle).unwrap();
        h.pump();

        prop_assert_eq!(h.agent.total_calls(), 0);
        prop_assert!(h.agent.registry().is_empty());
        prop_assert_eq!(h.agent.registry().stats().total_removed, 1);
        // every edge the core started, the core stopped before closing its ports
        let log = check_media_log(&h.recording.media_ops());
        prop_assert!(log.is_ok(), "{:?}", log);
        prop_assert!(h.engine.connections().is_empty());
        prop_assert_eq!(h.engine.open_port_count(), 0);

        // a straggler for the removed call is ignored
        let orphans = h.agent.stats().orphan_events;
        h.agent.dispatch(EngineEvent::CallState {
            handle,
            info: CallInfo::new(handle, CallState::Disconnected),
        });
        prop_assert_eq!(h.agent.stats().orphan_events, orphans + 1);
        prop_assert_eq!(h.agent.registry().stats().total_removed, 1);
    }

    #[test]
    fn unknown_handles_never_create_calls(raw in 1000u32..5000, state in non_terminal_state()) {
        let (engine, mut events) = LoopbackEngine::new();
        let mut agent = UserAgent::new(engine, AgentConfig::default());
        agent.create_transport(&TransportConfig::default()).unwrap();
        agent
            .add_account(
                AccountConfig::new("sip:ff@127.0.0.1").with_media(MediaPlan::disabled()),
                None,
            )
            .unwrap();
        agent.pump(&mut events);

        let handle = CallHandle(raw);
        agent.dispatch(EngineEvent::CallState { handle, info: CallInfo::new(handle, state) });
        agent.dispatch(EngineEvent::CallMediaState { handle, info: CallInfo::new(handle, state) });

        prop_assert_eq!(agent.total_calls(), 0);
        prop_assert_eq!(agent.stats().orphan_events, 2);
    }
}
