//! # Component lifecycle table.
//!
//! The lifecycle is a tagged [`State`] plus a pure transition table: given the
//! component kind, the current state and a [`Trigger`], [`plan`] returns the
//! [`Command`]s the manager must execute (and the commands undoing a failed
//! activation). The table never performs side effects itself.
//!
//! ```text
//!            enable                 activate (satisfied)
//! Disabled ────────► Unsatisfied ─────────────────────► Registered / Active /
//!    ▲                   ▲  │                            Factory / FactoryInstance
//!    │ disable           │  └───── deactivate ◄──────────────┘
//!    └───────────────────┘
//! any ── dispose ──► Disposed (terminal)
//! ```

use std::fmt;

use crate::component::DeactivationReason;

/// Lifecycle state of a component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    Disabled,
    Unsatisfied,
    /// Service registered, no instance yet (delayed components).
    Registered,
    Active,
    /// Satisfied component factory; its factory service is registered.
    Factory,
    /// Active instance created by a component factory.
    FactoryInstance,
    Disposed,
}

impl State {
    #[inline]
    pub fn is_satisfied(self) -> bool {
        matches!(
            self,
            State::Registered | State::Active | State::Factory | State::FactoryInstance
        )
    }

    #[inline]
    pub fn is_enabled(self) -> bool {
        !matches!(self, State::Disabled | State::Disposed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            State::Disabled => "disabled",
            State::Unsatisfied => "unsatisfied",
            State::Registered => "registered",
            State::Active => "active",
            State::Factory => "factory",
            State::FactoryInstance => "factory_instance",
            State::Disposed => "disposed",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a component turns satisfaction into instances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ComponentKind {
    /// Instance created on first service request.
    Delayed,
    /// Instance created as soon as the component is satisfied.
    Immediate,
    /// Registers a factory service; instances come from `new_instance`.
    Factory,
    /// Created by a factory; deactivation disposes it.
    FactoryInstance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Trigger {
    Enable,
    Activate,
    Deactivate(DeactivationReason),
    Disable,
    Dispose(DeactivationReason),
    /// A delayed component created an instance for a service request.
    InstanceCreated,
    /// The last instance of a delayed component was released.
    InstancesReleased,
}

/// One side effect of a transition, executed in order by the manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Command {
    RegisterComponentId,
    UnregisterComponentId,
    /// Open (or reopen) every dependency tracker with the current targets.
    UpdateTargets,
    /// Stop unless every dependency is satisfied.
    VerifyDependencies,
    Enter(State),
    RegisterService,
    UnregisterService,
    /// Prebind and create the instance; stops on failure.
    CreateInstance,
    DeleteInstances(DeactivationReason),
    DeactivateDependencies,
    DisableDependencies,
    /// Dispose every instance created by this factory.
    DisposeInstances(DeactivationReason),
    Clear,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Transition {
    pub(crate) commands: Vec<Command>,
    /// Run when a command stops the transition.
    pub(crate) rollback: Vec<Command>,
}

impl Transition {
    fn new(commands: Vec<Command>) -> Self {
        Self {
            commands,
            rollback: Vec::new(),
        }
    }

    fn with_rollback(mut self, rollback: Vec<Command>) -> Self {
        self.rollback = rollback;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Plan {
    Run(Transition),
    /// Nothing to do in the current state.
    Noop,
    /// The component is disposed and the trigger is not allowed.
    Disposed,
}

fn teardown(reason: DeactivationReason) -> Vec<Command> {
    vec![
        Command::UnregisterService,
        Command::DeleteInstances(reason),
        Command::DeactivateDependencies,
    ]
}

fn dispose(state: State, reason: DeactivationReason) -> Vec<Command> {
    let mut commands = Vec::new();
    if state.is_satisfied() {
        commands.extend(teardown(reason));
    }
    commands.push(Command::DisposeInstances(reason));
    if state.is_enabled() {
        commands.extend([Command::DisableDependencies, Command::UnregisterComponentId]);
    }
    commands.extend([Command::Enter(State::Disposed), Command::Clear]);
    commands
}

/// Commands for `trigger` in `state`.
pub(crate) fn plan(kind: ComponentKind, state: State, trigger: Trigger) -> Plan {
    use Command::*;

    if state == State::Disposed {
        return match trigger {
            Trigger::Dispose(_) | Trigger::InstanceCreated | Trigger::InstancesReleased => Plan::Noop,
            _ => Plan::Disposed,
        };
    }

    match trigger {
        Trigger::Enable => match state {
            State::Disabled => Plan::Run(Transition::new(vec![
                RegisterComponentId,
                UpdateTargets,
                Enter(State::Unsatisfied),
            ])),
            _ => Plan::Noop,
        },
        Trigger::Activate => {
            if state != State::Unsatisfied {
                return Plan::Noop;
            }
            let commands = match kind {
                ComponentKind::Delayed => vec![VerifyDependencies, Enter(State::Registered), RegisterService],
                ComponentKind::Immediate => vec![
                    VerifyDependencies,
                    Enter(State::Registered),
                    RegisterService,
                    CreateInstance,
                    Enter(State::Active),
                ],
                ComponentKind::Factory => vec![VerifyDependencies, Enter(State::Factory), RegisterService],
                ComponentKind::FactoryInstance => vec![
                    VerifyDependencies,
                    Enter(State::Registered),
                    RegisterService,
                    CreateInstance,
                    Enter(State::FactoryInstance),
                ],
            };
            Plan::Run(Transition::new(commands).with_rollback(vec![
                UnregisterService,
                DeactivateDependencies,
                Enter(State::Unsatisfied),
            ]))
        }
        Trigger::Deactivate(reason) => {
            if !state.is_satisfied() {
                return Plan::Noop;
            }
            if kind == ComponentKind::FactoryInstance {
                return Plan::Run(Transition::new(dispose(state, reason)));
            }
            let mut commands = teardown(reason);
            commands.push(Enter(State::Unsatisfied));
            Plan::Run(Transition::new(commands))
        }
        Trigger::Disable => {
            if !state.is_enabled() {
                return Plan::Noop;
            }
            let mut commands = Vec::new();
            if state.is_satisfied() {
                commands.extend(teardown(DeactivationReason::Disabled));
            }
            commands.extend([
                DisposeInstances(DeactivationReason::Disabled),
                DisableDependencies,
                UnregisterComponentId,
                Enter(State::Disabled),
            ]);
            Plan::Run(Transition::new(commands))
        }
        Trigger::Dispose(reason) => Plan::Run(Transition::new(dispose(state, reason))),
        Trigger::InstanceCreated => match state {
            State::Registered if kind == ComponentKind::Delayed => {
                Plan::Run(Transition::new(vec![Enter(State::Active)]))
            }
            _ => Plan::Noop,
        },
        Trigger::InstancesReleased => match state {
            State::Active if kind == ComponentKind::Delayed => {
                Plan::Run(Transition::new(vec![Enter(State::Registered)]))
            }
            _ => Plan::Noop,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Command::*;

    fn commands(plan: Plan) -> Vec<Command> {
        match plan {
            Plan::Run(t) => t.commands,
            other => panic!("expected a transition, got {other:?}"),
        }
    }

    #[test]
    fn enable_is_idempotent() {
        assert_eq!(
            commands(plan(ComponentKind::Immediate, State::Disabled, Trigger::Enable)),
            vec![RegisterComponentId, UpdateTargets, Enter(State::Unsatisfied)]
        );
        assert_eq!(plan(ComponentKind::Immediate, State::Unsatisfied, Trigger::Enable), Plan::Noop);
        assert_eq!(plan(ComponentKind::Immediate, State::Active, Trigger::Enable), Plan::Noop);
        assert_eq!(plan(ComponentKind::Immediate, State::Disabled, Trigger::Disable), Plan::Noop);
    }

    #[test]
    fn satisfied_state_is_entered_before_service_registration() {
        let delayed = commands(plan(ComponentKind::Delayed, State::Unsatisfied, Trigger::Activate));
        assert_eq!(delayed, vec![VerifyDependencies, Enter(State::Registered), RegisterService]);

        let immediate = commands(plan(ComponentKind::Immediate, State::Unsatisfied, Trigger::Activate));
        let enter = immediate.iter().position(|c| *c == Enter(State::Registered)).unwrap();
        let register = immediate.iter().position(|c| *c == RegisterService).unwrap();
        let create = immediate.iter().position(|c| *c == CreateInstance).unwrap();
        assert!(enter < register && register < create);
        assert_eq!(immediate.last(), Some(&Enter(State::Active)));

        assert_eq!(
            commands(plan(ComponentKind::Factory, State::Unsatisfied, Trigger::Activate)),
            vec![VerifyDependencies, Enter(State::Factory), RegisterService]
        );
    }

    #[test]
    fn failed_activation_unregisters_before_unsatisfied() {
        let Plan::Run(t) = plan(ComponentKind::Immediate, State::Unsatisfied, Trigger::Activate) else {
            panic!("expected a transition");
        };
        assert_eq!(t.rollback.first(), Some(&UnregisterService));
        assert_eq!(t.rollback.last(), Some(&Enter(State::Unsatisfied)));
    }

    #[test]
    fn deactivate_returns_to_unsatisfied() {
        let reason = DeactivationReason::ReferenceBroken;
        assert_eq!(
            commands(plan(ComponentKind::Immediate, State::Active, Trigger::Deactivate(reason))),
            vec![
                UnregisterService,
                DeleteInstances(reason),
                DeactivateDependencies,
                Enter(State::Unsatisfied)
            ]
        );
        assert_eq!(
            plan(ComponentKind::Immediate, State::Unsatisfied, Trigger::Deactivate(reason)),
            Plan::Noop
        );
    }

    #[test]
    fn factory_instance_deactivation_disposes() {
        let c = commands(plan(
            ComponentKind::FactoryInstance,
            State::FactoryInstance,
            Trigger::Deactivate(DeactivationReason::ReferenceBroken),
        ));
        assert_eq!(c.last(), Some(&Clear));
        assert!(c.contains(&Enter(State::Disposed)));
    }

    #[test]
    fn disposed_is_terminal() {
        for trigger in [Trigger::Enable, Trigger::Activate, Trigger::Disable] {
            assert_eq!(plan(ComponentKind::Delayed, State::Disposed, trigger), Plan::Disposed);
        }
        assert_eq!(
            plan(
                ComponentKind::Delayed,
                State::Disposed,
                Trigger::Dispose(DeactivationReason::Disposed)
            ),
            Plan::Noop
        );
    }

    #[test]
    fn delayed_instance_moves_between_registered_and_active() {
        assert_eq!(
            commands(plan(ComponentKind::Delayed, State::Registered, Trigger::InstanceCreated)),
            vec![Enter(State::Active)]
        );
        assert_eq!(
            commands(plan(ComponentKind::Delayed, State::Active, Trigger::InstancesReleased)),
            vec![Enter(State::Registered)]
        );
        assert_eq!(
            plan(ComponentKind::Immediate, State::Active, Trigger::InstancesReleased),
            Plan::Noop
        );
    }

    #[test]
    fn disable_from_satisfied_tears_down_first() {
        let c = commands(plan(ComponentKind::Delayed, State::Active, Trigger::Disable));
        assert_eq!(c.first(), Some(&UnregisterService));
        assert_eq!(c.last(), Some(&Enter(State::Disabled)));
    }
}
