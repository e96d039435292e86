// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! The update task.
//!
//! [`DfuService`] pops one message per call to `process`, runs it through a
//! small link-level state machine and hands control-point and packet writes
//! to the transfer session. Every way out of DFU mode ends in a call to
//! [`System::reboot`](crate::platform::System::reboot).

use crate::error::AbortCause;
use crate::platform::{BootTarget, ResetReason};
use crate::queue::{DfuMessage, MessageQueue};
use crate::supervisor::TimerId;
use crate::update::{self, SessionState, UpdateContext};
use core::cell::Cell;
use embedded_storage::nor_flash::NorFlash;

/// Link-level states of the update task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ServiceState {
    /// DFU mode entered, no peer yet.
    WaitingForConnection,
    Connected,
    /// Images activated; the reset happens on disconnect.
    ResetPending,
    /// Reset requested. Nothing else is processed.
    Rebooted,
}

/// Shared context passed to the service.
pub struct ServiceContext<'a, E> {
    pub engine: &'a mut E,
    pub messages: &'a MessageQueue,
}

/// A task run from the main loop.
pub trait Service<E> {
    /// Uses interior mutability for state changes.
    fn process(&self, ctx: &mut ServiceContext<'_, E>);
}

/// External event observed by the service-level FSM.
#[derive(Clone, Copy)]
enum FsmEvent {
    Tick,
    Connected,
    Disconnected,
    TimerExpired(TimerId),
    Input,
}

/// Side effect to execute after a state transition.
#[derive(Clone, Copy)]
enum FsmAction {
    None,
    MarkConnected,
    Dispatch,
    Ignore,
    Abort(AbortCause),
    FinishReset,
}

/// Result of one pure FSM transition step.
#[derive(Clone, Copy)]
struct FsmStep {
    next_state: ServiceState,
    action: FsmAction,
}

/// Service driving one DFU attempt from connection to reset.
pub struct DfuService {
    state: Cell<ServiceState>,
    session: Cell<SessionState>,
}

impl DfuService {
    pub fn new() -> Self {
        Self {
            state: Cell::new(ServiceState::WaitingForConnection),
            session: Cell::new(SessionState::Idle),
        }
    }

    pub fn state(&self) -> ServiceState {
        self.state.get()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.get()
    }

    /// Process messages until the queue is empty or the device reset.
    pub fn drain<'p, F: NorFlash>(&self, ctx: &mut ServiceContext<'_, UpdateContext<'p, F>>) {
        loop {
            self.process(ctx);
            if ctx.messages.is_empty() || self.state() == ServiceState::Rebooted {
                break;
            }
        }
    }

    fn transition(state: ServiceState, event: FsmEvent) -> FsmStep {
        let stay = |action| FsmStep {
            next_state: state,
            action,
        };
        match (state, event) {
            (ServiceState::Rebooted, _) | (_, FsmEvent::Tick) => stay(FsmAction::None),
            (ServiceState::WaitingForConnection, FsmEvent::Connected) => FsmStep {
                next_state: ServiceState::Connected,
                action: FsmAction::MarkConnected,
            },
            (_, FsmEvent::Connected) => stay(FsmAction::None),
            (ServiceState::WaitingForConnection, FsmEvent::Disconnected) => stay(FsmAction::None),
            (ServiceState::Connected, FsmEvent::Disconnected) => FsmStep {
                next_state: ServiceState::Rebooted,
                action: FsmAction::Abort(AbortCause::LinkLost),
            },
            (ServiceState::ResetPending, FsmEvent::Disconnected | FsmEvent::TimerExpired(_)) => FsmStep {
                next_state: ServiceState::Rebooted,
                action: FsmAction::FinishReset,
            },
            (_, FsmEvent::TimerExpired(timer)) => FsmStep {
                next_state: ServiceState::Rebooted,
                action: FsmAction::Abort(AbortCause::Timeout(timer)),
            },
            (ServiceState::WaitingForConnection, FsmEvent::Input) => stay(FsmAction::Ignore),
            (ServiceState::Connected | ServiceState::ResetPending, FsmEvent::Input) => {
                stay(FsmAction::Dispatch)
            }
        }
    }

    fn detect_event(message: Option<&DfuMessage>) -> FsmEvent {
        match message {
            None => FsmEvent::Tick,
            Some(DfuMessage::Connected) => FsmEvent::Connected,
            Some(DfuMessage::Disconnected) => FsmEvent::Disconnected,
            Some(DfuMessage::TimerExpired(timer)) => FsmEvent::TimerExpired(*timer),
            Some(_) => FsmEvent::Input,
        }
    }

    fn dispatch<F: NorFlash>(engine: &mut UpdateContext<'_, F>, session: SessionState, message: DfuMessage) -> SessionState {
        match message {
            DfuMessage::ControlPoint(bytes) => update::dispatch_control_point(engine, session, &bytes),
            DfuMessage::Packet(bytes) => update::dispatch_packet(engine, session, &bytes),
            DfuMessage::ConnParamsUpdated { accepted } => {
                update::report_conn_params(engine, accepted);
                session
            }
            DfuMessage::MtuChanged(mtu) => {
                debug!("Dfu: MTU {}", mtu);
                engine.session.mtu_size = mtu;
                session
            }
            _ => session,
        }
    }

    fn reboot<F>(engine: &mut UpdateContext<'_, F>, reason: ResetReason, target: BootTarget) -> ServiceState {
        engine.supervisor.stop_all();
        info!("Dfu: reset ({:?}, {:?})", reason, target);
        engine.peripherals.system.reboot(reason, target);
        ServiceState::Rebooted
    }

    fn run_action<F: NorFlash>(
        &self,
        ctx: &mut ServiceContext<'_, UpdateContext<'_, F>>,
        step: FsmStep,
        message: Option<DfuMessage>,
    ) -> ServiceState {
        let engine = &mut *ctx.engine;
        match step.action {
            FsmAction::None => step.next_state,
            FsmAction::Ignore => {
                warn!("Dfu: input before connection ignored");
                step.next_state
            }
            FsmAction::MarkConnected => {
                engine.supervisor.connected();
                info!("Dfu: peer connected");
                step.next_state
            }
            FsmAction::Dispatch => {
                let Some(message) = message else {
                    return step.next_state;
                };
                let session = Self::dispatch(engine, self.session.get(), message);
                self.session.set(session);
                match session {
                    SessionState::Aborted(cause) => Self::reboot(engine, cause.reset_reason(), BootTarget::Normal),
                    _ if engine.update.active_reset_pending => ServiceState::ResetPending,
                    _ => step.next_state,
                }
            }
            FsmAction::Abort(cause) => {
                warn!("Dfu: session aborted in {:?}", self.session.get());
                self.session.set(SessionState::Aborted(cause));
                Self::reboot(engine, cause.reset_reason(), BootTarget::Normal)
            }
            FsmAction::FinishReset => {
                let target = if engine.update.reset_to_ota_mode {
                    BootTarget::OtaMode
                } else {
                    BootTarget::Normal
                };
                Self::reboot(engine, ResetReason::SuccessReboot, target)
            }
        }
    }

    fn step<F: NorFlash>(&self, ctx: &mut ServiceContext<'_, UpdateContext<'_, F>>, state: ServiceState) -> ServiceState {
        if state == ServiceState::Rebooted {
            return state;
        }

        let now = ctx.engine.peripherals.clock.now_ms();
        if let Some(timer) = ctx.engine.supervisor.poll(now) {
            warn!("Dfu: {:?} timer expired", timer);
            ctx.messages.post(DfuMessage::TimerExpired(timer));
        }

        let message = ctx.messages.pop();
        let event = Self::detect_event(message.as_ref());
        let fsm_step = Self::transition(state, event);
        self.run_action(ctx, fsm_step, message)
    }
}

impl Default for DfuService {
    fn default() -> Self {
        Self::new()
    }
}

impl<'p, F: NorFlash> Service<UpdateContext<'p, F>> for DfuService {
    fn process(&self, ctx: &mut ServiceContext<'_, UpdateContext<'p, F>>) {
        let state = self.state.get();
        let new_state = self.step(ctx, state);

        trace!("Dfu: State: {:?} -> {:?}", state, new_state);
        self.state.set(new_state);
    }
}
