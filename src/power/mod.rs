// Copyright 2022 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The two power-save state machines and the sleep-confirm handshake.
//!
//! Both machines share one state/event alphabet and are expressed as pure
//! transition functions returning the next state plus entry actions. A thin
//! driver loop applies the actions and re-enters the machine with `Enter`
//! whenever the state changed, mirroring the self-transition loop of the
//! firmware protocol.

use {
    crate::{
        dispatcher::Context,
        driver::HsAction,
        events::PsAction,
        types::{
            BssRole, ClientState, PsMode, PsState, WlanEvent, HOST_SLEEP_CANCEL,
            WAKE_ON_ALL_BROADCAST, WAKE_ON_ARP_BROADCAST, WAKE_ON_MAC_EVENT, WAKE_ON_MGMT_FRAME,
            WAKE_ON_MULTICAST, WAKE_ON_UNICAST,
        },
    },
    log::{debug, error, warn},
};

/// Driver-side wakeup flag encoding.
pub(crate) const DRV_WAKE_ON_ALL_BROADCAST: u32 = 1 << 0;
pub(crate) const DRV_WAKE_ON_UNICAST: u32 = 1 << 1;
pub(crate) const DRV_WAKE_ON_MAC_EVENT: u32 = 1 << 2;
pub(crate) const DRV_WAKE_ON_MULTICAST: u32 = 1 << 3;
pub(crate) const DRV_WAKE_ON_ARP_BROADCAST: u32 = 1 << 4;
pub(crate) const DRV_WAKE_ON_MGMT_FRAME: u32 = 1 << 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PsFsmState {
    Init,
    Configuring,
    Awake,
    PreSleep,
    Sleep,
    PreDisable,
    Disabling,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PsFsmEvent {
    Enter,
    Enable,
    EnableDone,
    Awake,
    Sleep,
    SleepConfirm,
    Disable,
    DisableDone,
}

/// Entry/transition actions requested by the pure transition functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PsFsmAction {
    SendEnterPs,
    SendExitPs,
    /// Run the host-sleep aware sleep-confirm protocol.
    SleepConfirmHandshake,
    /// Send a plain sleep confirm without host-sleep configuration.
    PlainSleepConfirm,
    MarkAwake,
    ClearSleepConfirmRequest,
}

/// IEEE power-save transition function. `prev` is the state the machine
/// occupied before the last change; the exit command on `Disabling` entry
/// depends on it.
fn ieee_transition(
    state: PsFsmState,
    prev: PsFsmState,
    event: PsFsmEvent,
    sta_connected: bool,
) -> (PsFsmState, &'static [PsFsmAction]) {
    use {PsFsmAction::*, PsFsmEvent as E, PsFsmState as S};
    match (state, event) {
        (S::Init, E::Enable) => (S::Init, &[SendEnterPs]),
        (S::Init, E::EnableDone) => (S::Configuring, &[]),

        (S::Configuring, E::Awake) => (S::Awake, &[]),
        (S::Configuring, E::Sleep) => (S::PreSleep, &[]),
        (S::Configuring, E::Disable) => (S::Disabling, &[]),

        (S::Awake, E::Enter) => (S::Awake, &[MarkAwake]),
        (S::Awake, E::Sleep) => (S::PreSleep, &[]),
        (S::Awake, E::Disable) => (S::Disabling, &[]),

        (S::PreSleep, E::Enter) => (S::PreSleep, &[SleepConfirmHandshake]),
        (S::PreSleep, E::Sleep) => (S::PreSleep, &[SleepConfirmHandshake]),
        (S::PreSleep, E::SleepConfirm) => (S::Sleep, &[]),
        (S::PreSleep, E::Disable) => (S::Disabling, &[ClearSleepConfirmRequest]),

        (S::Sleep, E::Enter) => (S::Sleep, &[ClearSleepConfirmRequest]),
        (S::Sleep, E::Awake) => (S::Awake, &[]),
        // We already sent the sleep confirm but the firmware is still up.
        (S::Sleep, E::Sleep) => (S::PreSleep, &[]),
        (S::Sleep, E::Disable) => {
            if sta_connected {
                (S::PreDisable, &[])
            } else {
                (S::Disabling, &[])
            }
        }

        (S::PreDisable, E::Enter) => (S::Disabling, &[]),

        (S::Disabling, E::Enter) => match prev {
            S::Configuring | S::Awake | S::Sleep | S::PreDisable => (S::Disabling, &[SendExitPs]),
            _ => (S::Disabling, &[]),
        },
        (S::Disabling, E::Awake) => {
            if prev == S::PreSleep {
                (S::Disabling, &[SendExitPs])
            } else {
                (S::Disabling, &[])
            }
        }
        (S::Disabling, E::DisableDone) => (S::Init, &[]),

        (state, _) => (state, &[]),
    }
}

/// Deep-sleep transition function. No host-sleep handshake and no
/// prev-state dependence.
fn deep_sleep_transition(
    state: PsFsmState,
    event: PsFsmEvent,
) -> (PsFsmState, &'static [PsFsmAction]) {
    use {PsFsmAction::*, PsFsmEvent as E, PsFsmState as S};
    match (state, event) {
        (S::Init, E::Enable) => (S::Init, &[SendEnterPs]),
        (S::Init, E::EnableDone) => (S::Configuring, &[]),

        (S::Configuring, E::Sleep) => (S::PreSleep, &[]),

        (S::Awake, E::Enter) => (S::Awake, &[MarkAwake]),
        (S::Awake, E::Sleep) => (S::PreSleep, &[]),

        (S::PreSleep, E::Enter) => (S::PreSleep, &[PlainSleepConfirm]),
        (S::PreSleep, E::SleepConfirm) => (S::Sleep, &[ClearSleepConfirmRequest]),

        (S::Sleep, E::Awake) => (S::Awake, &[]),
        (S::Sleep, E::Disable) => (S::PreDisable, &[]),

        (S::PreDisable, E::Enter) => (S::Disabling, &[]),

        (S::Disabling, E::Enter) => (S::Disabling, &[SendExitPs]),
        (S::Disabling, E::DisableDone) => (S::Init, &[]),

        (state, _) => (state, &[]),
    }
}

fn apply_ieee_action(ctx: &mut Context<'_>, action: PsFsmAction) {
    match action {
        PsFsmAction::SendEnterPs => {
            if let Err(e) = ctx.driver.enter_ieee_power_save() {
                error!("failed to enter IEEE power save: {}", e);
            }
        }
        PsFsmAction::SendExitPs => {
            if let Err(e) = ctx.driver.exit_ieee_power_save() {
                error!("failed to exit IEEE power save: {}", e);
            }
        }
        PsFsmAction::SleepConfirmHandshake => host_sleep_and_sleep_confirm(ctx),
        PsFsmAction::PlainSleepConfirm => send_sleep_confirm(ctx),
        PsFsmAction::MarkAwake => ctx.core.ps_state = PsState::Awake,
        PsFsmAction::ClearSleepConfirmRequest => ctx.core.req_sleep_confirm = false,
    }
}

fn apply_deep_sleep_action(ctx: &mut Context<'_>, action: PsFsmAction) {
    match action {
        PsFsmAction::SendEnterPs => {
            if let Err(e) = ctx.driver.enter_deep_sleep() {
                error!("failed to enter deep sleep: {}", e);
            }
        }
        PsFsmAction::SendExitPs => {
            if let Err(e) = ctx.driver.exit_deep_sleep() {
                error!("failed to exit deep sleep: {}", e);
            }
        }
        PsFsmAction::SleepConfirmHandshake => host_sleep_and_sleep_confirm(ctx),
        PsFsmAction::PlainSleepConfirm => send_sleep_confirm(ctx),
        PsFsmAction::MarkAwake => ctx.core.ps_state = PsState::Awake,
        PsFsmAction::ClearSleepConfirmRequest => ctx.core.req_sleep_confirm = false,
    }
}

/// Runs the IEEE power-save machine until it settles, re-entering with
/// `Enter` after every state change to execute entry actions.
pub(crate) fn ieeeps_sm(ctx: &mut Context<'_>, event: PsFsmEvent) {
    let mut event = event;
    loop {
        debug!("IEEE PS event: {:?} in {:?}", event, ctx.core.ieee_state);
        let sta_connected = ctx.core.is_state(ClientState::Connected);
        let (next, actions) =
            ieee_transition(ctx.core.ieee_state, ctx.core.ieee_prev_state, event, sta_connected);
        for action in actions {
            apply_ieee_action(ctx, *action);
        }
        if next == ctx.core.ieee_state {
            return;
        }
        debug!("IEEE PS: {:?} -> {:?}", ctx.core.ieee_state, next);
        ctx.core.ieee_prev_state = ctx.core.ieee_state;
        ctx.core.ieee_state = next;
        event = PsFsmEvent::Enter;
    }
}

/// Runs the deep-sleep machine until it settles.
pub(crate) fn deepsleepps_sm(ctx: &mut Context<'_>, event: PsFsmEvent) {
    let mut event = event;
    loop {
        debug!("deep sleep event: {:?} in {:?}", event, ctx.core.deep_sleep_state);
        let (next, actions) = deep_sleep_transition(ctx.core.deep_sleep_state, event);
        for action in actions {
            apply_deep_sleep_action(ctx, *action);
        }
        if next == ctx.core.deep_sleep_state {
            return;
        }
        debug!("deep sleep: {:?} -> {:?}", ctx.core.deep_sleep_state, next);
        ctx.core.deep_sleep_state = next;
        event = PsFsmEvent::Enter;
    }
}

pub(crate) fn enable_power_save(ctx: &mut Context<'_>, mode: PsMode) {
    match mode {
        PsMode::Ieee => {
            debug!("starting IEEE ps mode");
            ctx.core.ieee_configured = true;
            ieeeps_sm(ctx, PsFsmEvent::Enable);
        }
        PsMode::DeepSleep => {
            debug!("starting deep sleep ps mode");
            ctx.core.deep_sleep_configured = true;
            deepsleepps_sm(ctx, PsFsmEvent::Enable);
        }
    }
}

pub(crate) fn disable_power_save(ctx: &mut Context<'_>, mode: PsMode) {
    match mode {
        PsMode::Ieee => {
            debug!("stopping IEEE ps mode");
            ieeeps_sm(ctx, PsFsmEvent::Disable);
        }
        PsMode::DeepSleep => {
            debug!("stopping deep sleep ps mode");
            deepsleepps_sm(ctx, PsFsmEvent::Disable);
        }
    }
}

/// Firmware replies on the IEEE power-save command path.
pub(crate) fn process_ieee_ps_response(ctx: &mut Context<'_>, success: bool, action: PsAction) {
    if !success {
        warn!("IEEE ps command failed: {:?}", action);
        return;
    }
    match action {
        PsAction::EnableDone => ieeeps_sm(ctx, PsFsmEvent::EnableDone),
        PsAction::SleepConfirm => {
            if !ctx.core.ieee_sleep_cb_sent {
                ctx.notify(WlanEvent::PsEnter(PsMode::Ieee));
                ctx.core.ieee_sleep_cb_sent = true;
            }
            ieeeps_sm(ctx, PsFsmEvent::SleepConfirm);
        }
        PsAction::DisableDone => {
            ctx.core.ieee_configured = false;
            ctx.core.ieee_sleep_cb_sent = false;
            ctx.notify(WlanEvent::PsExit(PsMode::Ieee));
            ieeeps_sm(ctx, PsFsmEvent::DisableDone);
        }
    }
}

/// Firmware replies on the deep-sleep command path.
pub(crate) fn process_deep_sleep_response(ctx: &mut Context<'_>, success: bool, action: PsAction) {
    if !success {
        warn!("deep sleep command failed: {:?}", action);
        return;
    }
    match action {
        PsAction::EnableDone => deepsleepps_sm(ctx, PsFsmEvent::EnableDone),
        PsAction::SleepConfirm => {
            ctx.notify(WlanEvent::PsEnter(PsMode::DeepSleep));
            deepsleepps_sm(ctx, PsFsmEvent::SleepConfirm);
        }
        PsAction::DisableDone => {
            ctx.core.deep_sleep_configured = false;
            // Withhold the first ps-exit after waking from PM4 so it cannot
            // overtake the pending init notification.
            if ctx.core.skip_ds_exit_cb {
                ctx.core.skip_ds_exit_cb = false;
            } else {
                ctx.notify(WlanEvent::PsExit(PsMode::DeepSleep));
            }
            deepsleepps_sm(ctx, PsFsmEvent::DisableDone);
        }
    }
}

pub(crate) fn process_awake_event(ctx: &mut Context<'_>) {
    ctx.core.ps_state = PsState::Awake;
    ieeeps_sm(ctx, PsFsmEvent::Awake);
    deepsleepps_sm(ctx, PsFsmEvent::Awake);
}

pub(crate) fn process_sleep_event(ctx: &mut Context<'_>) {
    ieeeps_sm(ctx, PsFsmEvent::Sleep);
    deepsleepps_sm(ctx, PsFsmEvent::Sleep);
}

pub(crate) fn map_wakeup_conditions(conditions: u32) -> u32 {
    let mut mapped = 0;
    if conditions & WAKE_ON_UNICAST != 0 {
        mapped |= DRV_WAKE_ON_UNICAST;
    }
    if conditions & WAKE_ON_ALL_BROADCAST != 0 {
        mapped |= DRV_WAKE_ON_ALL_BROADCAST;
    }
    if conditions & WAKE_ON_MULTICAST != 0 {
        mapped |= DRV_WAKE_ON_MULTICAST;
    }
    if conditions & WAKE_ON_ARP_BROADCAST != 0 {
        mapped |= DRV_WAKE_ON_ARP_BROADCAST;
    }
    if conditions & WAKE_ON_MAC_EVENT != 0 {
        mapped |= DRV_WAKE_ON_MAC_EVENT;
    }
    if conditions & WAKE_ON_MGMT_FRAME != 0 {
        mapped |= DRV_WAKE_ON_MGMT_FRAME;
    }
    mapped
}

/// The interface the host-sleep configuration applies to: the soft-AP when
/// it is up, the client otherwise.
fn host_sleep_role(ctx: &Context<'_>) -> BssRole {
    if ctx.core.is_ap_up() {
        BssRole::Ap
    } else {
        BssRole::Client
    }
}

/// Applies (or cancels) the host-sleep configuration. Called from the
/// dispatcher on a user host-sleep request.
pub(crate) fn send_host_sleep_config(ctx: &mut Context<'_>, conditions: u32) -> bool {
    if ctx.core.hs_configured {
        if conditions == HOST_SLEEP_CANCEL {
            ctx.core.hs_configured = false;
            ctx.core.hs_wakeup_condition = conditions;
            return true;
        } else if ctx.core.hs_wakeup_condition != map_wakeup_conditions(conditions) {
            debug!("host sleep already configured with a different wakeup mask");
            return false;
        }
    } else {
        ctx.core.hs_configured = true;
        ctx.core.hs_wakeup_condition = map_wakeup_conditions(conditions);
    }

    let address = match ctx.current_ipv4_address() {
        Some(address) => address,
        None => {
            error!("host sleep: cannot determine interface address");
            return false;
        }
    };
    let role = host_sleep_role(ctx);
    ctx.driver
        .send_host_sleep_config(role, address, HsAction::Configure, ctx.core.hs_wakeup_condition)
        .is_ok()
}

/// HS_CONFIG completion: move the configuration to the activate stage.
pub(crate) fn process_hs_config_event(ctx: &mut Context<'_>) {
    if !ctx.core.hs_configured {
        return;
    }
    let address = match ctx.current_ipv4_address() {
        Some(address) => address,
        None => {
            error!("host sleep: cannot determine interface address");
            return;
        }
    };
    let role = host_sleep_role(ctx);
    if let Err(e) = ctx.driver.send_host_sleep_config(role, address, HsAction::Activate, 0) {
        error!("host sleep activation failed: {}", e);
    }
}

/// Sleep-confirm protocol run on entering IEEE PRE_SLEEP. Defers (by
/// arming the 10 ms dispatcher tick) while a bus transfer is outstanding or
/// the host-sleep configuration cannot be applied.
pub(crate) fn host_sleep_and_sleep_confirm(ctx: &mut Context<'_>) {
    if ctx.driver.transfer_pending() {
        ctx.core.req_sleep_confirm = true;
        return;
    }

    if ctx.core.hs_configured {
        let conditions = ctx.core.hs_wakeup_condition;
        let sent = {
            let address = ctx.current_ipv4_address();
            match address {
                Some(address) => {
                    let role = host_sleep_role(ctx);
                    ctx.driver
                        .send_host_sleep_config(role, address, HsAction::Configure, conditions)
                        .is_ok()
                }
                None => false,
            }
        };
        let active = ctx.core.is_ap_up() || ctx.core.is_state(ClientState::Connected);
        if !sent || !active {
            ctx.core.req_sleep_confirm = true;
            return;
        }
    }

    ctx.core.ps_state = PsState::SleepCfm;
    ctx.driver.send_sleep_confirm(BssRole::Client);
    ctx.core.req_sleep_confirm = false;
}

/// Plain sleep confirm used by the deep-sleep machine.
pub(crate) fn send_sleep_confirm(ctx: &mut Context<'_>) {
    let role = host_sleep_role(ctx);
    ctx.core.ps_state = PsState::SleepCfm;
    ctx.driver.send_sleep_confirm(role);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ieee_enable_path() {
        // INIT only leaves on ENABLE_DONE; ENABLE itself sends the command.
        let (next, actions) =
            ieee_transition(PsFsmState::Init, PsFsmState::Init, PsFsmEvent::Enable, false);
        assert_eq!(next, PsFsmState::Init);
        assert_eq!(actions, &[PsFsmAction::SendEnterPs]);

        let (next, _) =
            ieee_transition(PsFsmState::Init, PsFsmState::Init, PsFsmEvent::EnableDone, false);
        assert_eq!(next, PsFsmState::Configuring);
    }

    #[test]
    fn ieee_sleep_entry_runs_handshake() {
        let (next, _) = ieee_transition(
            PsFsmState::Configuring,
            PsFsmState::Init,
            PsFsmEvent::Sleep,
            true,
        );
        assert_eq!(next, PsFsmState::PreSleep);
        let (next, actions) =
            ieee_transition(PsFsmState::PreSleep, PsFsmState::Configuring, PsFsmEvent::Enter, true);
        assert_eq!(next, PsFsmState::PreSleep);
        assert_eq!(actions, &[PsFsmAction::SleepConfirmHandshake]);
    }

    #[test]
    fn ieee_sleep_confirm_completes() {
        let (next, _) = ieee_transition(
            PsFsmState::PreSleep,
            PsFsmState::Awake,
            PsFsmEvent::SleepConfirm,
            true,
        );
        assert_eq!(next, PsFsmState::Sleep);
        let (next, actions) =
            ieee_transition(PsFsmState::Sleep, PsFsmState::PreSleep, PsFsmEvent::Enter, true);
        assert_eq!(next, PsFsmState::Sleep);
        assert_eq!(actions, &[PsFsmAction::ClearSleepConfirmRequest]);
    }

    #[test]
    fn ieee_disable_from_sleep_depends_on_connection() {
        let (next, _) =
            ieee_transition(PsFsmState::Sleep, PsFsmState::PreSleep, PsFsmEvent::Disable, true);
        assert_eq!(next, PsFsmState::PreDisable);
        let (next, _) =
            ieee_transition(PsFsmState::Sleep, PsFsmState::PreSleep, PsFsmEvent::Disable, false);
        assert_eq!(next, PsFsmState::Disabling);
    }

    #[test]
    fn ieee_disabling_entry_sends_exit_for_expected_predecessors() {
        for prev in
            [PsFsmState::Configuring, PsFsmState::Awake, PsFsmState::Sleep, PsFsmState::PreDisable]
        {
            let (_, actions) =
                ieee_transition(PsFsmState::Disabling, prev, PsFsmEvent::Enter, false);
            assert_eq!(actions, &[PsFsmAction::SendExitPs], "prev = {:?}", prev);
        }
        // From PRE_SLEEP the exit command waits for the AWAKE event.
        let (_, actions) =
            ieee_transition(PsFsmState::Disabling, PsFsmState::PreSleep, PsFsmEvent::Enter, false);
        assert!(actions.is_empty());
        let (_, actions) =
            ieee_transition(PsFsmState::Disabling, PsFsmState::PreSleep, PsFsmEvent::Awake, false);
        assert_eq!(actions, &[PsFsmAction::SendExitPs]);
    }

    #[test]
    fn ieee_spurious_sleep_after_confirm_reenters_pre_sleep() {
        let (next, _) =
            ieee_transition(PsFsmState::Sleep, PsFsmState::PreSleep, PsFsmEvent::Sleep, true);
        assert_eq!(next, PsFsmState::PreSleep);
    }

    #[test]
    fn deep_sleep_enable_and_sleep() {
        let (next, actions) = deep_sleep_transition(PsFsmState::Init, PsFsmEvent::Enable);
        assert_eq!(next, PsFsmState::Init);
        assert_eq!(actions, &[PsFsmAction::SendEnterPs]);

        let (next, _) = deep_sleep_transition(PsFsmState::Init, PsFsmEvent::EnableDone);
        assert_eq!(next, PsFsmState::Configuring);

        let (next, _) = deep_sleep_transition(PsFsmState::Configuring, PsFsmEvent::Sleep);
        assert_eq!(next, PsFsmState::PreSleep);

        let (next, actions) = deep_sleep_transition(PsFsmState::PreSleep, PsFsmEvent::Enter);
        assert_eq!(next, PsFsmState::PreSleep);
        assert_eq!(actions, &[PsFsmAction::PlainSleepConfirm]);

        let (next, actions) = deep_sleep_transition(PsFsmState::PreSleep, PsFsmEvent::SleepConfirm);
        assert_eq!(next, PsFsmState::Sleep);
        assert_eq!(actions, &[PsFsmAction::ClearSleepConfirmRequest]);
    }

    #[test]
    fn deep_sleep_disable_path() {
        let (next, _) = deep_sleep_transition(PsFsmState::Sleep, PsFsmEvent::Disable);
        assert_eq!(next, PsFsmState::PreDisable);
        let (next, _) = deep_sleep_transition(PsFsmState::PreDisable, PsFsmEvent::Enter);
        assert_eq!(next, PsFsmState::Disabling);
        let (next, actions) = deep_sleep_transition(PsFsmState::Disabling, PsFsmEvent::Enter);
        assert_eq!(next, PsFsmState::Disabling);
        assert_eq!(actions, &[PsFsmAction::SendExitPs]);
        let (next, _) = deep_sleep_transition(PsFsmState::Disabling, PsFsmEvent::DisableDone);
        assert_eq!(next, PsFsmState::Init);
    }

    #[test]
    fn wakeup_condition_mapping() {
        assert_eq!(
            map_wakeup_conditions(WAKE_ON_UNICAST | WAKE_ON_MAC_EVENT),
            DRV_WAKE_ON_UNICAST | DRV_WAKE_ON_MAC_EVENT
        );
        assert_eq!(map_wakeup_conditions(WAKE_ON_MGMT_FRAME), DRV_WAKE_ON_MGMT_FRAME);
        assert_eq!(map_wakeup_conditions(0), 0);
    }
}
