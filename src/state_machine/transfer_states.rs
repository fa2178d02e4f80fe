// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::pin::Pin;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    session::{TransferSession, counters::TransferReport, exit::SessionError},
    state_machine::common::{StateMachine, StateMachineCtx, Transition},
    transport::Transport,
};

/// Resolve the length and position the endpoints.
#[derive(Debug)]
pub struct Prepare;
/// Keep the pipeline full until the range is done or a stop is requested.
#[derive(Debug)]
pub struct Pump;
/// Only collect what is already in flight.
#[derive(Debug)]
pub struct Drain;
#[derive(Debug)]
pub struct Finish;

#[derive(Debug)]
pub enum SessionStates {
    Prepare(Prepare),
    Pump(Pump),
    Drain(Drain),
    Finish(Finish),
}

impl Default for SessionStates {
    fn default() -> Self {
        SessionStates::Prepare(Prepare)
    }
}

type SessionStepOut = Transition<SessionStates, Result<()>>;

impl<S: Transport, D: Transport> StateMachine<TransferSession<S, D>, SessionStepOut> for Prepare {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = SessionStepOut> + Send + 'a>>
    where
        Self: 'a,
        TransferSession<S, D>: 'a;

    fn step<'a>(&'a self, ctx: &'a mut TransferSession<S, D>) -> Self::StepResult<'a> {
        Box::pin(async move {
            if let Err(e) = ctx.prepare().await {
                return Transition::Done(Err(e.into()));
            }
            if ctx.cfg.dry_run {
                info!("dry run, no data moved");
                return Transition::Next(SessionStates::Finish(Finish), Ok(()));
            }
            Transition::Next(SessionStates::Pump(Pump), Ok(()))
        })
    }
}

impl<S: Transport, D: Transport> StateMachine<TransferSession<S, D>, SessionStepOut> for Pump {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = SessionStepOut> + Send + 'a>>
    where
        Self: 'a,
        TransferSession<S, D>: 'a;

    fn step<'a>(&'a self, ctx: &'a mut TransferSession<S, D>) -> Self::StepResult<'a> {
        Box::pin(async move {
            if !ctx.step().await {
                return Transition::Next(SessionStates::Finish(Finish), Ok(()));
            }
            if ctx.is_stopping() {
                debug!(
                    in_flight = ctx.sched.total_in_flight(),
                    "stopping, draining in-flight commands"
                );
                return Transition::Next(SessionStates::Drain(Drain), Ok(()));
            }
            Transition::Stay(Ok(()))
        })
    }
}

impl<S: Transport, D: Transport> StateMachine<TransferSession<S, D>, SessionStepOut> for Drain {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = SessionStepOut> + Send + 'a>>
    where
        Self: 'a,
        TransferSession<S, D>: 'a;

    fn step<'a>(&'a self, ctx: &'a mut TransferSession<S, D>) -> Self::StepResult<'a> {
        Box::pin(async move {
            if ctx.step().await {
                Transition::Stay(Ok(()))
            } else {
                Transition::Next(SessionStates::Finish(Finish), Ok(()))
            }
        })
    }
}

impl<S: Transport, D: Transport> StateMachine<TransferSession<S, D>, SessionStepOut> for Finish {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = SessionStepOut> + Send + 'a>>
    where
        Self: 'a,
        TransferSession<S, D>: 'a;

    fn step<'a>(&'a self, ctx: &'a mut TransferSession<S, D>) -> Self::StepResult<'a> {
        Box::pin(async move {
            if !ctx.cfg.dry_run && ctx.cfg.sparse {
                ctx.extend_after_sparse().await;
            }
            Transition::Done(Ok(()))
        })
    }
}

impl<S: Transport, D: Transport> StateMachineCtx<TransferSession<S, D>, TransferReport>
    for TransferSession<S, D>
{
    async fn execute(&mut self, cancel: &CancellationToken) -> Result<TransferReport> {
        self.cancel = cancel.clone();
        debug!("Loop transfer");

        loop {
            let state = self
                .state
                .take()
                .context("state must be set TransferSession")?;
            let tr = match &state {
                SessionStates::Prepare(s) => s.step(self).await,
                SessionStates::Pump(s) => s.step(self).await,
                SessionStates::Drain(s) => s.step(self).await,
                SessionStates::Finish(s) => s.step(self).await,
            };

            match tr {
                Transition::Next(next, r) => {
                    r?;
                    self.state = Some(next);
                },
                Transition::Stay(Ok(())) => self.state = Some(state),
                Transition::Stay(Err(e)) => return Err(e),
                Transition::Done(r) => {
                    r?;
                    return Ok(self.finish());
                },
            }
        }
    }
}

impl<S: Transport, D: Transport> TransferSession<S, D> {
    /// Run the session to its end. Cancelling `cancel` stops new work and
    /// drains what is in flight; the report then says so.
    ///
    /// Errors are limited to what happens before the first block moves;
    /// everything later ends up in the report.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<TransferReport, SessionError> {
        self.execute(cancel)
            .await
            .map_err(|e| match e.downcast::<SessionError>() {
                Ok(se) => se,
                Err(other) => SessionError::Io(other),
            })
    }
}
