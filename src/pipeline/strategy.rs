//! Execution strategies
//!
//! The three algorithms that walk or launch a dispatch's handler snapshot:
//! sequential (strict order, fail-fast on blocking errors), parallel (launch
//! all, settle all, then report) and race (first settlement wins). All three
//! resolve concurrent effects with a single deterministic merge in launch
//! order rather than by wall-clock completion time.

use anyhow::anyhow;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use super::context::PipelineContext;
use super::controller::{ControllerEffects, PipelineController};
use super::dispatcher::{BackgroundFailure, DispatchOutcome};
use super::registry::HandlerRegistration;

/// Hook invoked for every isolated (non-blocking) handler failure.
///
/// The default policy collects failures into the outcome's
/// `background_failures` after all work settles; the hook observes them in
/// addition, it never replaces the collection.
pub type BackgroundErrorHook = Arc<dyn Fn(&str, &anyhow::Error) + Send + Sync>;

fn record_background_failure(
    failures: &mut Vec<BackgroundFailure>,
    hook: &Option<BackgroundErrorHook>,
    action: &str,
    handler_id: &str,
    error: anyhow::Error,
) {
    warn!(action, handler_id, error = %error, "non-blocking handler failed");
    if let Some(hook) = hook {
        hook(handler_id, &error);
    }
    failures.push(BackgroundFailure {
        handler_id: handler_id.to_string(),
        error: error.to_string(),
    });
}

fn spawn_handler(
    registration: &HandlerRegistration,
    index: usize,
    payload: Value,
    results: Vec<Value>,
    action: &str,
    cancelled: Arc<AtomicBool>,
) -> JoinHandle<(anyhow::Result<Value>, ControllerEffects)> {
    let controller = PipelineController::new(
        action,
        registration.id.clone(),
        index,
        payload.clone(),
        results,
        cancelled,
    );
    let handler = registration.handler.clone();
    tokio::spawn(async move {
        let outcome = handler.run(payload, controller.clone()).await;
        (outcome, controller.take_effects())
    })
}

/// Drive the snapshot in strict `(priority desc, seq asc)` order.
///
/// Blocking handlers are awaited inline and their failures abort the whole
/// dispatch, skipping the remaining handlers. Non-blocking handlers run as
/// background tasks joined after the loop; their failures are isolated and
/// surfaced in aggregate.
pub(crate) async fn run_sequential(
    mut ctx: PipelineContext,
    hook: Option<BackgroundErrorHook>,
) -> anyhow::Result<DispatchOutcome> {
    let cancelled = Arc::new(AtomicBool::new(false));
    let mut background: Vec<(String, JoinHandle<(anyhow::Result<Value>, ControllerEffects)>)> =
        Vec::new();

    let mut index = 0;
    while index < ctx.handlers.len() {
        // Abort and termination stop the iterator before the handler at the
        // current index executes.
        if ctx.aborted || ctx.terminated {
            break;
        }

        let registration = ctx.handlers[index].clone();
        if !registration.qualifies(&ctx.payload) {
            trace!(
                action = %ctx.action,
                handler_id = %registration.id,
                "skipping handler (condition/validation)"
            );
            index += 1;
            continue;
        }

        if registration.blocking {
            let controller = PipelineController::new(
                ctx.action.clone(),
                registration.id.clone(),
                index,
                ctx.payload.clone(),
                ctx.results.clone(),
                cancelled.clone(),
            );
            let outcome = registration
                .handler
                .run(ctx.payload.clone(), controller.clone())
                .await;
            let effects = controller.take_effects();

            let value = match outcome {
                Ok(value) => value,
                Err(e) => {
                    error!(
                        action = %ctx.action,
                        handler_id = %registration.id,
                        error = %e,
                        "blocking handler failed, aborting dispatch"
                    );
                    return Err(e);
                }
            };

            if let Some(payload) = effects.payload {
                ctx.payload = payload;
            }
            if effects.terminated {
                ctx.terminated = true;
                ctx.termination_result = effects.termination_result;
                break;
            }
            ctx.results.push(value);
            if effects.aborted {
                ctx.aborted = true;
                ctx.abort_reason = effects.abort_reason;
            }
            match effects.jump_to_priority {
                Some(priority) => match ctx.jump_target(priority) {
                    Some(target) => {
                        debug!(
                            action = %ctx.action,
                            handler_id = %registration.id,
                            priority,
                            target,
                            "jumping to priority"
                        );
                        index = target;
                    }
                    // Unmatched jump: clear it and advance normally.
                    None => index += 1,
                },
                None => index += 1,
            }
        } else {
            let handle = spawn_handler(
                &registration,
                index,
                ctx.payload.clone(),
                ctx.results.clone(),
                &ctx.action,
                cancelled.clone(),
            );
            background.push((registration.id.clone(), handle));
            index += 1;
        }
    }

    // Join background handlers in launch order so the merge is deterministic
    // regardless of completion timing.
    let mut background_failures = Vec::new();
    for (handler_id, handle) in background {
        match handle.await {
            Ok((Ok(value), effects)) => {
                if ctx.terminated {
                    continue;
                }
                if effects.terminated {
                    ctx.terminated = true;
                    ctx.termination_result = effects.termination_result;
                } else {
                    ctx.results.push(value);
                }
            }
            Ok((Err(e), _)) => {
                record_background_failure(
                    &mut background_failures,
                    &hook,
                    &ctx.action,
                    &handler_id,
                    e,
                );
            }
            Err(join_error) => {
                record_background_failure(
                    &mut background_failures,
                    &hook,
                    &ctx.action,
                    &handler_id,
                    anyhow!("handler task panicked: {join_error}"),
                );
            }
        }
    }

    Ok(ctx.into_outcome(background_failures))
}

/// Launch every qualifying handler concurrently, wait for all of them to
/// settle, then report.
///
/// Sibling side effects are never abandoned because one blocking handler
/// failed: the dispatch fails only after everything settled, with the first
/// blocking failure in launch order (never by wall-clock completion order).
pub(crate) async fn run_parallel(
    mut ctx: PipelineContext,
    hook: Option<BackgroundErrorHook>,
) -> anyhow::Result<DispatchOutcome> {
    let cancelled = Arc::new(AtomicBool::new(false));

    // Filter once; non-qualifying handlers never run.
    let qualifying: Vec<(usize, HandlerRegistration)> = ctx
        .handlers
        .iter()
        .enumerate()
        .filter(|(_, r)| r.qualifies(&ctx.payload))
        .map(|(i, r)| (i, r.clone()))
        .collect();

    debug!(
        action = %ctx.action,
        launched = qualifying.len(),
        total = ctx.handlers.len(),
        "parallel dispatch"
    );

    let tasks: Vec<_> = qualifying
        .iter()
        .map(|(index, registration)| {
            spawn_handler(
                registration,
                *index,
                ctx.payload.clone(),
                Vec::new(),
                &ctx.action,
                cancelled.clone(),
            )
        })
        .collect();

    let settled = futures::future::join_all(tasks).await;

    // Single deterministic merge over the settlement array (= launch order).
    let mut first_blocking_failure: Option<anyhow::Error> = None;
    let mut background_failures = Vec::new();
    for ((_, registration), joined) in qualifying.iter().zip(settled) {
        let (outcome, effects) = match joined {
            Ok(pair) => pair,
            Err(join_error) => (
                Err(anyhow!("handler task panicked: {join_error}")),
                ControllerEffects::default(),
            ),
        };

        match outcome {
            Ok(value) => {
                if ctx.terminated {
                    continue;
                }
                if effects.terminated {
                    ctx.terminated = true;
                    ctx.termination_result = effects.termination_result;
                } else {
                    ctx.results.push(value);
                }
            }
            Err(e) => {
                if registration.blocking && first_blocking_failure.is_none() {
                    first_blocking_failure = Some(e);
                } else {
                    record_background_failure(
                        &mut background_failures,
                        &hook,
                        &ctx.action,
                        &registration.id,
                        e,
                    );
                }
            }
        }
    }

    if let Some(e) = first_blocking_failure {
        error!(action = %ctx.action, error = %e, "parallel dispatch failed");
        return Err(e);
    }
    Ok(ctx.into_outcome(background_failures))
}

/// Launch every qualifying handler concurrently; the first settlement decides
/// the outcome.
///
/// Losers are not cancelled at the task level: they run to completion and
/// their eventual success or failure is discarded. The shared cancellation
/// flag is set once the race is decided so cooperative handlers can stop
/// early.
pub(crate) async fn run_race(
    mut ctx: PipelineContext,
    hook: Option<BackgroundErrorHook>,
) -> anyhow::Result<DispatchOutcome> {
    let cancelled = Arc::new(AtomicBool::new(false));

    let qualifying: Vec<(usize, HandlerRegistration)> = ctx
        .handlers
        .iter()
        .enumerate()
        .filter(|(_, r)| r.qualifies(&ctx.payload))
        .map(|(i, r)| (i, r.clone()))
        .collect();

    // An empty filtered set resolves trivially with no result and no error.
    if qualifying.is_empty() {
        return Ok(ctx.into_outcome(Vec::new()));
    }

    debug!(action = %ctx.action, racing = qualifying.len(), "race dispatch");

    let (tx, mut rx) = mpsc::unbounded_channel();
    for (index, registration) in &qualifying {
        let controller = PipelineController::new(
            ctx.action.clone(),
            registration.id.clone(),
            *index,
            ctx.payload.clone(),
            Vec::new(),
            cancelled.clone(),
        );
        let handler = registration.handler.clone();
        let payload = ctx.payload.clone();
        let id = registration.id.clone();
        let blocking = registration.blocking;
        let tx = tx.clone();
        tokio::spawn(async move {
            let outcome = handler.run(payload, controller.clone()).await;
            // Losers find the receiver gone; their outcome is discarded.
            let _ = tx.send((id, blocking, outcome, controller.take_effects()));
        });
    }
    drop(tx);

    let Some((handler_id, blocking, outcome, effects)) = rx.recv().await else {
        // Every racer panicked before reporting.
        return Err(anyhow!(
            "all {} racing handlers for '{}' went away without settling",
            qualifying.len(),
            ctx.action
        ));
    };

    // Race decided; let cooperative losers observe it.
    cancelled.store(true, Ordering::Release);

    match outcome {
        Ok(value) => {
            debug!(action = %ctx.action, winner = %handler_id, "race settled");
            if effects.terminated {
                ctx.terminated = true;
                ctx.termination_result = effects.termination_result;
            } else {
                ctx.results.push(value);
            }
            Ok(ctx.into_outcome(Vec::new()))
        }
        Err(e) if blocking => {
            error!(
                action = %ctx.action,
                handler_id = %handler_id,
                error = %e,
                "race settled with blocking failure"
            );
            Err(e)
        }
        Err(e) => {
            let mut background_failures = Vec::new();
            record_background_failure(
                &mut background_failures,
                &hook,
                &ctx.action,
                &handler_id,
                e,
            );
            Ok(ctx.into_outcome(background_failures))
        }
    }
}
