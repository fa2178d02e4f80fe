// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use tokio_util::sync::CancellationToken;

/// What a phase asks the driver to do after one step.
pub enum Transition<S, R> {
    /// Move to phase `S`, carrying the step result.
    Next(S, R),
    /// Run the same phase again.
    Stay(R),
    /// The machine has finished.
    Done(R),
}

/// One phase of a session. A step borrows the context mutably and may
/// await transports.
pub trait StateMachine<Ctx, Resp>: Sized {
    type StepResult<'a>: Future<Output = Resp> + Send + 'a
    where
        Self: 'a,
        Resp: 'a,
        Ctx: 'a;

    fn step<'a>(&'a self, ctx: &'a mut Ctx) -> Self::StepResult<'a>;
}

/// Drives the phases of `Ctx` until one returns [`Transition::Done`].
pub trait StateMachineCtx<Ctx, Out = ()>: Sized {
    fn execute(&mut self, cancel: &CancellationToken) -> impl Future<Output = Result<Out>>;
}
