//! Reconciliation of local lock state against commands and feed events.
//!
//! [`reduce`] is a pure function: it takes the current [`LockState`] and
//! one [`LockEvent`] and returns the next state together with the
//! [`Effect`]s the caller must perform. The change feed is the only input
//! that can move a client into or out of `ACQUIRED`; RPC completions only
//! ever report failure.

use super::record::LockRecord;
use super::status::{LockStatus, RemoteStatus};
use crate::config::StaleLockPolicy;
use crate::identity::{Identity, InstanceId};

/// Fixed inputs of every reduction.
#[derive(Debug, Clone)]
pub struct ReducerContext {
    pub identity: Identity,
    pub stale_lock_policy: StaleLockPolicy,
}

impl ReducerContext {
    pub fn new(identity: Identity, stale_lock_policy: StaleLockPolicy) -> Self {
        Self {
            identity,
            stale_lock_policy,
        }
    }
}

/// Local lock state of one client instance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LockState {
    pub status: LockStatus,
    /// Set only while `status` is `Acquired`
    pub acquired_by_instance_id: Option<InstanceId>,
    /// URL the playback controller is currently playing
    pub current_stream_url: Option<String>,
    /// URL to start once the lock is acquired
    pub pending_stream_url: Option<String>,
    /// A release RPC failed, so the record may still name this device
    pub release_pending: bool,
}

impl LockState {
    fn enter(&mut self, status: LockStatus) {
        self.status = status;
        if status == LockStatus::Acquired {
            self.release_pending = false;
        } else {
            self.acquired_by_instance_id = None;
        }
    }

    fn stop_playback(&mut self, effects: &mut Vec<Effect>) {
        self.current_stream_url = None;
        effects.push(Effect::StopPlayback);
    }
}

/// Inputs to the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEvent {
    /// User asked for the playback slot
    RequestLock,
    /// Give up the slot
    ReleaseLock,
    /// Stop playing and give up the slot, only effective while acquired
    StopAndRelease,
    /// Play a stream, acquiring the slot first if needed
    Play { url: String },
    /// Committed record mutation delivered by the change feed
    RemoteUpdate(LockRecord),
    /// One-time read performed right after subscribing
    Snapshot(Option<LockRecord>),
    /// request-lock RPC failed
    RequestFailed,
    /// release-lock RPC failed
    ReleaseFailed,
    /// Change feed reported an error or the initial read failed
    SubscriptionFailed,
}

/// Side effects requested by a reduction, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StopPlayback,
    StartPlayback { url: String },
    CallRequestLock,
    CallReleaseLock,
    /// Re-enter the reducer with [`LockEvent::ReleaseLock`]
    ReleaseLock,
}

/// Result of a reduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: LockState,
    pub effects: Vec<Effect>,
}

/// Computes the next state and effects for one event.
pub fn reduce(mut state: LockState, event: &LockEvent, context: &ReducerContext) -> Transition {
    let mut effects = Vec::new();

    match event {
        LockEvent::RequestLock => request(&mut state, &mut effects),
        LockEvent::ReleaseLock => release(&mut state, &mut effects),
        LockEvent::StopAndRelease => {
            if state.status == LockStatus::Acquired {
                state.stop_playback(&mut effects);
                release(&mut state, &mut effects);
            }
        }
        LockEvent::Play { url } => play(&mut state, url, &mut effects),
        LockEvent::RemoteUpdate(record) => reconcile(&mut state, record, context, &mut effects),
        LockEvent::Snapshot(record) => {
            if state.status == LockStatus::Initial {
                seed(&mut state, record.as_ref(), context, &mut effects);
            }
        }
        LockEvent::ReleaseFailed => {
            state.release_pending = true;
            state.pending_stream_url = None;
            state.enter(LockStatus::Error);
        }
        LockEvent::RequestFailed | LockEvent::SubscriptionFailed => {
            state.pending_stream_url = None;
            state.enter(LockStatus::Error);
        }
    }

    Transition { state, effects }
}

fn request(state: &mut LockState, effects: &mut Vec<Effect>) {
    if state.status.has_request_in_flight() {
        return;
    }
    state.enter(LockStatus::Requesting);
    effects.push(Effect::CallRequestLock);
}

fn release(state: &mut LockState, effects: &mut Vec<Effect>) {
    state.pending_stream_url = None;
    state.release_pending = false;
    state.enter(LockStatus::Releasing);
    effects.push(Effect::CallReleaseLock);
}

fn play(state: &mut LockState, url: &str, effects: &mut Vec<Effect>) {
    match state.status {
        LockStatus::Acquired => {
            state.current_stream_url = Some(url.to_string());
            effects.push(Effect::StartPlayback {
                url: url.to_string(),
            });
        }
        status if status.allows_play() => {
            state.pending_stream_url = Some(url.to_string());
            request(state, effects);
        }
        _ => {}
    }
}

fn reconcile(
    state: &mut LockState,
    record: &LockRecord,
    context: &ReducerContext,
    effects: &mut Vec<Effect>,
) {
    let me = &context.identity;
    if !record.is_locked_by(&me.device_id) {
        state.release_pending = false;
    }

    match record.status {
        RemoteStatus::Locked => {
            let mine = record.is_locked_by(&me.device_id);
            match state.status {
                LockStatus::Requesting | LockStatus::Pending if mine => {
                    state.enter(LockStatus::Acquired);
                    state.acquired_by_instance_id = Some(me.instance_id.clone());
                    if let Some(url) = state.pending_stream_url.take() {
                        state.current_stream_url = Some(url.clone());
                        effects.push(Effect::StartPlayback { url });
                    }
                }
                // Echo of our own commit (heartbeat, re-lock).
                LockStatus::Acquired if mine => {}
                LockStatus::LockedByOther => {}
                _ => {
                    state.stop_playback(effects);
                    state.pending_stream_url = None;
                    state.enter(LockStatus::LockedByOther);
                }
            }
        }
        RemoteStatus::AwaitingRelease => {
            let held_by_me = record.is_locked_by(&me.device_id);
            let requested_by_me = record.is_requested_by(&me.device_id);
            let holding_instance = state.release_pending
                || state.acquired_by_instance_id.as_ref() == Some(&me.instance_id);
            if held_by_me
                && requested_by_me
                && state.release_pending
                && state.status == LockStatus::Requesting
            {
                // Handover to ourselves: finish the release that failed earlier.
                state.release_pending = false;
                state.enter(LockStatus::Pending);
                effects.push(Effect::CallReleaseLock);
            } else if held_by_me && holding_instance {
                state.release_pending = false;
                state.stop_playback(effects);
                state.enter(LockStatus::AwaitingMyRelease);
                effects.push(Effect::ReleaseLock);
            } else if requested_by_me && state.status == LockStatus::Requesting {
                state.enter(LockStatus::Pending);
            }
        }
        RemoteStatus::Available => {
            state.stop_playback(effects);
            state.pending_stream_url = None;
            state.enter(LockStatus::Available);
        }
    }
}

fn seed(
    state: &mut LockState,
    record: Option<&LockRecord>,
    context: &ReducerContext,
    effects: &mut Vec<Effect>,
) {
    let Some(record) = record else {
        state.enter(LockStatus::Available);
        return;
    };

    match record.status {
        RemoteStatus::Available => state.enter(LockStatus::Available),
        RemoteStatus::Locked | RemoteStatus::AwaitingRelease => {
            let stale = record.is_locked_by(&context.identity.device_id);
            match context.stale_lock_policy {
                StaleLockPolicy::Release if stale => release(state, effects),
                _ => state.enter(LockStatus::LockedByOther),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::identity::{DeviceId, UserId};

    fn context() -> ReducerContext {
        ReducerContext::new(
            Identity::new(DeviceId::new("device-me"), InstanceId::new("instance-me")),
            StaleLockPolicy::Release,
        )
    }

    fn user() -> UserId {
        UserId::new("user-1")
    }

    fn me() -> DeviceId {
        DeviceId::new("device-me")
    }

    fn other() -> DeviceId {
        DeviceId::new("device-other")
    }

    fn state_with(status: LockStatus) -> LockState {
        LockState {
            status,
            acquired_by_instance_id: (status == LockStatus::Acquired)
                .then(|| InstanceId::new("instance-me")),
            ..Default::default()
        }
    }

    fn apply(state: LockState, event: LockEvent) -> Transition {
        reduce(state, &event, &context())
    }

    #[test]
    fn test_request_lock_waits_for_feed() {
        let transition = apply(state_with(LockStatus::Available), LockEvent::RequestLock);
        assert_eq!(transition.state.status, LockStatus::Requesting);
        assert_eq!(transition.effects, vec![Effect::CallRequestLock]);
    }

    #[test]
    fn test_request_lock_ignored_while_holding() {
        let transition = apply(state_with(LockStatus::Acquired), LockEvent::RequestLock);
        assert_eq!(transition.state.status, LockStatus::Acquired);
        assert!(transition.effects.is_empty());
    }

    #[test]
    fn test_request_lock_recovers_from_error() {
        let transition = apply(state_with(LockStatus::Error), LockEvent::RequestLock);
        assert_eq!(transition.state.status, LockStatus::Requesting);
    }

    #[test]
    fn test_own_lock_acquires_with_instance() {
        let transition = apply(
            state_with(LockStatus::Requesting),
            LockEvent::RemoteUpdate(LockRecord::locked(user(), me())),
        );
        assert_eq!(transition.state.status, LockStatus::Acquired);
        assert_eq!(
            transition.state.acquired_by_instance_id,
            Some(InstanceId::new("instance-me"))
        );
        assert!(transition.effects.is_empty());
    }

    #[test]
    fn test_self_echo_does_not_demote() {
        let transition = apply(
            state_with(LockStatus::Acquired),
            LockEvent::RemoteUpdate(LockRecord::locked(user(), me())),
        );
        assert_eq!(transition.state.status, LockStatus::Acquired);
        assert!(transition.effects.is_empty());
    }

    #[test]
    fn test_foreign_lock_stops_playback() {
        let mut state = state_with(LockStatus::Available);
        state.current_stream_url = Some("http://provider/live/1.ts".to_string());

        let transition = apply(
            state,
            LockEvent::RemoteUpdate(LockRecord::locked(user(), other())),
        );

        assert_eq!(transition.state.status, LockStatus::LockedByOther);
        assert_eq!(transition.state.current_stream_url, None);
        assert_eq!(transition.effects, vec![Effect::StopPlayback]);
    }

    #[test]
    fn test_foreign_lock_demotes_acquired() {
        let transition = apply(
            state_with(LockStatus::Acquired),
            LockEvent::RemoteUpdate(LockRecord::locked(user(), other())),
        );
        assert_eq!(transition.state.status, LockStatus::LockedByOther);
        assert_eq!(transition.state.acquired_by_instance_id, None);
        assert_eq!(transition.effects, vec![Effect::StopPlayback]);
    }

    #[test]
    fn test_own_device_lock_without_request_is_someone_else() {
        // A sibling instance of this device acquired it.
        let transition = apply(
            state_with(LockStatus::Available),
            LockEvent::RemoteUpdate(LockRecord::locked(user(), me())),
        );
        assert_eq!(transition.state.status, LockStatus::LockedByOther);
    }

    #[test]
    fn test_awaiting_release_makes_holder_yield() {
        let transition = apply(
            state_with(LockStatus::Acquired),
            LockEvent::RemoteUpdate(LockRecord::awaiting_release(user(), me(), other())),
        );
        assert_eq!(transition.state.status, LockStatus::AwaitingMyRelease);
        assert_eq!(transition.state.acquired_by_instance_id, None);
        assert_eq!(
            transition.effects,
            vec![Effect::StopPlayback, Effect::ReleaseLock]
        );
    }

    #[test]
    fn test_duplicate_awaiting_release_fires_once() {
        let record = LockRecord::awaiting_release(user(), me(), other());
        let first = apply(
            state_with(LockStatus::Acquired),
            LockEvent::RemoteUpdate(record.clone()),
        );
        let second = apply(first.state.clone(), LockEvent::RemoteUpdate(record));

        assert_eq!(second.state, first.state);
        assert!(second.effects.is_empty());
    }

    #[test]
    fn test_sibling_instance_does_not_yield() {
        // Same device, but this instance never acquired.
        let transition = apply(
            state_with(LockStatus::LockedByOther),
            LockEvent::RemoteUpdate(LockRecord::awaiting_release(user(), me(), other())),
        );
        assert_eq!(transition.state.status, LockStatus::LockedByOther);
        assert!(transition.effects.is_empty());
    }

    #[test]
    fn test_requester_goes_pending() {
        let transition = apply(
            state_with(LockStatus::Requesting),
            LockEvent::RemoteUpdate(LockRecord::awaiting_release(user(), other(), me())),
        );
        assert_eq!(transition.state.status, LockStatus::Pending);
    }

    #[test]
    fn test_third_party_handover_is_ignored() {
        let transition = apply(
            state_with(LockStatus::LockedByOther),
            LockEvent::RemoteUpdate(LockRecord::awaiting_release(
                user(),
                other(),
                DeviceId::new("device-third"),
            )),
        );
        assert_eq!(transition.state.status, LockStatus::LockedByOther);
        assert!(transition.effects.is_empty());
    }

    #[test]
    fn test_available_always_stops() {
        let transition = apply(
            state_with(LockStatus::Releasing),
            LockEvent::RemoteUpdate(LockRecord::available(user())),
        );
        assert_eq!(transition.state.status, LockStatus::Available);
        assert_eq!(transition.effects, vec![Effect::StopPlayback]);
    }

    #[test]
    fn test_stop_and_release_only_when_acquired() {
        let idle = apply(state_with(LockStatus::Available), LockEvent::StopAndRelease);
        assert_eq!(idle.state.status, LockStatus::Available);
        assert!(idle.effects.is_empty());

        let mut playing = state_with(LockStatus::Acquired);
        playing.current_stream_url = Some("http://provider/movie/9.mkv".to_string());
        let transition = apply(playing, LockEvent::StopAndRelease);
        assert_eq!(transition.state.status, LockStatus::Releasing);
        assert_eq!(transition.state.current_stream_url, None);
        assert_eq!(
            transition.effects,
            vec![Effect::StopPlayback, Effect::CallReleaseLock]
        );
    }

    #[test]
    fn test_play_while_acquired_starts_immediately() {
        let transition = apply(
            state_with(LockStatus::Acquired),
            LockEvent::Play {
                url: "http://provider/live/7.ts".to_string(),
            },
        );
        assert_eq!(
            transition.state.current_stream_url.as_deref(),
            Some("http://provider/live/7.ts")
        );
        assert_eq!(
            transition.effects,
            vec![Effect::StartPlayback {
                url: "http://provider/live/7.ts".to_string()
            }]
        );
    }

    #[test]
    fn test_play_while_available_starts_after_acquire() {
        let url = "http://provider/live/7.ts".to_string();
        let requested = apply(
            state_with(LockStatus::Available),
            LockEvent::Play { url: url.clone() },
        );
        assert_eq!(requested.state.status, LockStatus::Requesting);
        assert_eq!(requested.effects, vec![Effect::CallRequestLock]);

        let acquired = apply(
            requested.state,
            LockEvent::RemoteUpdate(LockRecord::locked(user(), me())),
        );
        assert_eq!(acquired.state.status, LockStatus::Acquired);
        assert_eq!(acquired.state.pending_stream_url, None);
        assert_eq!(acquired.state.current_stream_url, Some(url.clone()));
        assert_eq!(acquired.effects, vec![Effect::StartPlayback { url }]);
    }

    #[test]
    fn test_failures_enter_error_and_drop_pending_play() {
        let mut state = state_with(LockStatus::Requesting);
        state.pending_stream_url = Some("http://provider/live/1.ts".to_string());

        let transition = apply(state, LockEvent::RequestFailed);

        assert_eq!(transition.state.status, LockStatus::Error);
        assert_eq!(transition.state.pending_stream_url, None);
    }

    #[test]
    fn test_failed_release_remembers_hold() {
        let transition = apply(state_with(LockStatus::Releasing), LockEvent::ReleaseFailed);
        assert_eq!(transition.state.status, LockStatus::Error);
        assert!(transition.state.release_pending);

        let failed_request = apply(state_with(LockStatus::Requesting), LockEvent::RequestFailed);
        assert!(!failed_request.state.release_pending);
    }

    #[test]
    fn test_retry_after_failed_release_hands_lock_to_self() {
        let failed = apply(state_with(LockStatus::Releasing), LockEvent::ReleaseFailed);
        let retried = apply(failed.state, LockEvent::RequestLock);
        assert_eq!(retried.effects, vec![Effect::CallRequestLock]);

        let handover = apply(
            retried.state,
            LockEvent::RemoteUpdate(LockRecord::awaiting_release(user(), me(), me())),
        );
        assert_eq!(handover.state.status, LockStatus::Pending);
        assert!(!handover.state.release_pending);
        assert_eq!(handover.effects, vec![Effect::CallReleaseLock]);

        let acquired = apply(
            handover.state,
            LockEvent::RemoteUpdate(LockRecord::locked(user(), me())),
        );
        assert_eq!(acquired.state.status, LockStatus::Acquired);
    }

    #[test]
    fn test_failed_release_still_yields_to_requester() {
        let failed = apply(state_with(LockStatus::Releasing), LockEvent::ReleaseFailed);
        let record = LockRecord::awaiting_release(user(), me(), other());

        let yielded = apply(failed.state, LockEvent::RemoteUpdate(record.clone()));
        assert_eq!(yielded.state.status, LockStatus::AwaitingMyRelease);
        assert_eq!(
            yielded.effects,
            vec![Effect::StopPlayback, Effect::ReleaseLock]
        );

        let repeated = apply(yielded.state.clone(), LockEvent::RemoteUpdate(record));
        assert_eq!(repeated.state, yielded.state);
        assert!(repeated.effects.is_empty());
    }

    #[test]
    fn test_foreign_record_clears_release_marker() {
        let failed = apply(state_with(LockStatus::Releasing), LockEvent::ReleaseFailed);
        let transition = apply(
            failed.state,
            LockEvent::RemoteUpdate(LockRecord::locked(user(), other())),
        );
        assert_eq!(transition.state.status, LockStatus::LockedByOther);
        assert!(!transition.state.release_pending);
    }

    #[test]
    fn test_snapshot_seeds_only_initial_state() {
        let seeded = apply(LockState::default(), LockEvent::Snapshot(None));
        assert_eq!(seeded.state.status, LockStatus::Available);

        let late = apply(
            state_with(LockStatus::Requesting),
            LockEvent::Snapshot(Some(LockRecord::locked(user(), other()))),
        );
        assert_eq!(late.state.status, LockStatus::Requesting);
    }

    #[test]
    fn test_snapshot_held_elsewhere() {
        let transition = apply(
            LockState::default(),
            LockEvent::Snapshot(Some(LockRecord::locked(user(), other()))),
        );
        assert_eq!(transition.state.status, LockStatus::LockedByOther);
        assert!(transition.effects.is_empty());
    }

    #[test]
    fn test_snapshot_stale_own_lock_is_released() {
        let transition = apply(
            LockState::default(),
            LockEvent::Snapshot(Some(LockRecord::locked(user(), me()))),
        );
        assert_eq!(transition.state.status, LockStatus::Releasing);
        assert_eq!(transition.effects, vec![Effect::CallReleaseLock]);
    }

    #[test]
    fn test_snapshot_stale_own_lock_observed() {
        let context = ReducerContext {
            stale_lock_policy: StaleLockPolicy::Observe,
            ..context()
        };
        let transition = reduce(
            LockState::default(),
            &LockEvent::Snapshot(Some(LockRecord::locked(user(), me()))),
            &context,
        );
        assert_eq!(transition.state.status, LockStatus::LockedByOther);
        assert!(transition.effects.is_empty());
    }

    const ALL_STATUSES: [LockStatus; 9] = [
        LockStatus::Initial,
        LockStatus::Available,
        LockStatus::Requesting,
        LockStatus::Pending,
        LockStatus::Acquired,
        LockStatus::AwaitingMyRelease,
        LockStatus::Releasing,
        LockStatus::LockedByOther,
        LockStatus::Error,
    ];

    fn device_strategy() -> impl Strategy<Value = DeviceId> {
        prop::sample::select(vec!["device-me", "device-other", "device-third"])
            .prop_map(DeviceId::new)
    }

    fn record_strategy() -> impl Strategy<Value = LockRecord> {
        prop_oneof![
            Just(LockRecord::available(UserId::new("user-1"))),
            device_strategy().prop_map(|holder| LockRecord::locked(UserId::new("user-1"), holder)),
            (device_strategy(), device_strategy()).prop_map(|(holder, requester)| {
                LockRecord::awaiting_release(UserId::new("user-1"), holder, requester)
            }),
        ]
    }

    fn state_strategy() -> impl Strategy<Value = LockState> {
        (
            prop::sample::select(ALL_STATUSES.to_vec()),
            prop::option::of(Just("http://provider/live/1.ts".to_string())),
            any::<bool>(),
        )
            .prop_map(|(status, url, release_pending)| {
                let mut state = state_with(status);
                state.current_stream_url = url;
                state.release_pending = release_pending && status != LockStatus::Acquired;
                state
            })
    }

    proptest! {
        #[test]
        fn prop_remote_update_is_idempotent(state in state_strategy(), record in record_strategy()) {
            let event = LockEvent::RemoteUpdate(record);
            let once = apply(state, event.clone());
            let twice = apply(once.state.clone(), event);
            prop_assert_eq!(twice.state, once.state);
        }

        #[test]
        fn prop_snapshot_is_idempotent(record in prop::option::of(record_strategy())) {
            let event = LockEvent::Snapshot(record);
            let once = apply(LockState::default(), event.clone());
            let twice = apply(once.state.clone(), event);
            prop_assert_eq!(twice.state, once.state);
            prop_assert!(twice.effects.is_empty());
        }

        #[test]
        fn prop_acquired_never_demoted_by_own_lock(
            url in prop::option::of(Just("http://provider/live/1.ts".to_string()))
        ) {
            let mut state = state_with(LockStatus::Acquired);
            state.current_stream_url = url;
            let transition = apply(
                state,
                LockEvent::RemoteUpdate(LockRecord::locked(UserId::new("user-1"), DeviceId::new("device-me"))),
            );
            prop_assert_eq!(transition.state.status, LockStatus::Acquired);
        }

        #[test]
        fn prop_acquired_implies_instance(state in state_strategy(), record in record_strategy()) {
            let transition = apply(state, LockEvent::RemoteUpdate(record));
            let acquired = transition.state.status == LockStatus::Acquired;
            prop_assert_eq!(acquired, transition.state.acquired_by_instance_id.is_some());
        }
    }
}
