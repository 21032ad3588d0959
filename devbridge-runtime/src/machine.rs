//! Widget phase state machine
//!
//! The machine owns the presentation phase (`loading`, `data`, `empty`,
//! `error`) and the sequence counter that keeps asynchronous loads from
//! corrupting state. Every transition that starts asynchronous work takes a
//! fresh sequence number; a result is committed only if its number is still
//! the latest when it arrives. Superseded loads run to completion but their
//! results are never published.
//!
//! Each transition is split in two. A synchronous `begin_*` takes the
//! sequence number on the caller's thread, so requests are ordered by call
//! order rather than by when a spawned task first runs. An async `finish_*`
//! does the waiting and loading and then commits.
//!
//! Every step that touches the machine's state holds the bridge's dispatch
//! lock first ([`GlobalStateBridge::serialized`]). The sequence check and the
//! publish therefore cannot be split by a newer request, and a listener may
//! read the machine during delivery from any thread.

use crate::bridge::GlobalStateBridge;
use crate::error::RuntimeResult;
use crate::registry::WidgetRegistry;
use devbridge_types::{DataSourceKey, GlobalStateUpdate, Selection, WidgetId, WidgetStatePhase};
use parking_lot::ReentrantMutex;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

/// Message carried by the payload of [`RuntimeStateMachine::show_error`]
pub const SIMULATED_ERROR_MESSAGE: &str = "Simulated error";

/// Token for one load attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub sequence: u64,
    pub widget_id: WidgetId,
    pub data_source_key: Option<DataSourceKey>,
}

impl LoadRequest {
    pub fn selection(&self) -> Selection {
        Selection::new(self.widget_id.clone(), self.data_source_key.clone())
    }
}

/// Current phase plus whether a load is pending
///
/// `is_transitioning` with phase `Data` means stale data is on screen while
/// a newer load runs; with phase `Loading` it means a load is on its way,
/// as opposed to a loading state held indefinitely by `show_loading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeStatus {
    pub phase: WidgetStatePhase,
    pub is_transitioning: bool,
}

/// What became of a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The result was published with this phase
    Committed(WidgetStatePhase),
    /// A newer transition started first; nothing was published
    Superseded,
    /// The data on screen already matched the selection; nothing was loaded
    Reused,
}

#[derive(Debug)]
struct MachineState {
    sequence: u64,
    phase: WidgetStatePhase,
    in_flight: Option<LoadRequest>,
    // Selection whose loader produced the data currently on screen
    data_for: Option<Selection>,
}

pub struct RuntimeStateMachine {
    bridge: Arc<GlobalStateBridge>,
    registry: Arc<WidgetRegistry>,
    // Taken after the bridge's dispatch lock, never before
    state: ReentrantMutex<RefCell<MachineState>>,
}

impl RuntimeStateMachine {
    pub fn new(bridge: Arc<GlobalStateBridge>, registry: Arc<WidgetRegistry>) -> Self {
        Self {
            bridge,
            registry,
            state: ReentrantMutex::new(RefCell::new(MachineState {
                sequence: 0,
                phase: WidgetStatePhase::Loading,
                in_flight: None,
                data_for: None,
            })),
        }
    }

    pub fn status(&self) -> RuntimeStatus {
        let guard = self.state.lock();
        let state = guard.borrow();
        RuntimeStatus {
            phase: state.phase,
            is_transitioning: state.in_flight.is_some(),
        }
    }

    pub fn phase(&self) -> WidgetStatePhase {
        self.status().phase
    }

    /// The outstanding load request, if any
    pub fn in_flight(&self) -> Option<LoadRequest> {
        self.state.lock().borrow().in_flight.clone()
    }

    /// Latest issued sequence number
    pub fn sequence(&self) -> u64 {
        self.state.lock().borrow().sequence
    }

    /// Enter `Loading` with no output and no loader running
    pub fn show_loading(&self) -> RuntimeResult<()> {
        self.settle(WidgetStatePhase::Loading, Value::Null)
    }

    /// Enter `Error` with a fixed synthetic payload
    pub fn show_error(&self) -> RuntimeResult<()> {
        self.settle(
            WidgetStatePhase::Error,
            json!({ "error": SIMULATED_ERROR_MESSAGE }),
        )
    }

    /// Invalidate any pending load without publishing anything
    ///
    /// A commit already publishing on another thread finishes first.
    pub fn supersede(&self) {
        self.bridge.serialized(|| {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            state.sequence += 1;
            state.in_flight = None;
        });
    }

    /// Run the data loader with no artificial delay
    ///
    /// Output already on screen stays visible until the result arrives.
    pub async fn load_instant(&self, selection: &Selection) -> RuntimeResult<TransitionOutcome> {
        let request = self.begin_instant(selection)?;
        self.finish_instant(&request).await
    }

    /// Clear the output, wait `delay`, then run the data loader
    ///
    /// If another transition starts during the wait, the loader is never
    /// called.
    pub async fn load_delayed(
        &self,
        selection: &Selection,
        delay: Duration,
    ) -> RuntimeResult<TransitionOutcome> {
        let request = self.begin_delayed(selection)?;
        self.finish_delayed(&request, delay).await
    }

    /// Enter `Empty`, using the empty-state loader when one resolves
    pub async fn show_empty(&self, selection: &Selection) -> RuntimeResult<TransitionOutcome> {
        let request = self.begin_instant(selection)?;
        self.finish_empty(&request).await
    }

    /// Reload after a selection change, keeping current data when possible
    ///
    /// When the data on screen was produced for `selection` and nothing is
    /// pending, the value is kept instead of fetched again.
    pub async fn auto_reload(
        &self,
        selection: &Selection,
        delay: Duration,
    ) -> RuntimeResult<TransitionOutcome> {
        match self.begin_reload(selection)? {
            Some(request) => self.finish_delayed(&request, delay).await,
            None => Ok(TransitionOutcome::Reused),
        }
    }

    /// Take a sequence number for a load that keeps the current output
    pub fn begin_instant(&self, selection: &Selection) -> RuntimeResult<LoadRequest> {
        self.issue(selection, false)
    }

    /// Take a sequence number and publish `Loading` with no output
    pub fn begin_delayed(&self, selection: &Selection) -> RuntimeResult<LoadRequest> {
        self.issue(selection, true)
    }

    /// Like [`begin_delayed`](Self::begin_delayed), unless the data on screen
    /// already belongs to `selection`
    ///
    /// Returns `None` when the current value is reused. The check and the
    /// issue are one step.
    pub fn begin_reload(&self, selection: &Selection) -> RuntimeResult<Option<LoadRequest>> {
        self.bridge.serialized(|| {
            if self.can_reuse(selection) {
                tracing::debug!(widget = %selection.active_widget_id, "selection unchanged; reusing data");
                return Ok(None);
            }
            self.issue(selection, true).map(Some)
        })
    }

    /// Run the data loader for `request` and commit the result
    pub async fn finish_instant(&self, request: &LoadRequest) -> RuntimeResult<TransitionOutcome> {
        self.run_data_loader(request).await
    }

    /// Wait `delay`, then run the data loader unless `request` was superseded
    pub async fn finish_delayed(
        &self,
        request: &LoadRequest,
        delay: Duration,
    ) -> RuntimeResult<TransitionOutcome> {
        tokio::time::sleep(delay).await;

        if !self.is_current(request) {
            self.release(request);
            tracing::debug!(
                sequence = request.sequence,
                widget = %request.widget_id,
                "delayed load superseded before it started"
            );
            return Ok(TransitionOutcome::Superseded);
        }

        self.run_data_loader(request).await
    }

    /// Commit `Empty` for `request`
    ///
    /// A failing empty-state loader degrades to `{}` rather than `Error`.
    pub async fn finish_empty(&self, request: &LoadRequest) -> RuntimeResult<TransitionOutcome> {
        let pair = self
            .registry
            .resolve_loaders(&request.widget_id, request.data_source_key.as_ref());

        let payload = match pair.empty_loader {
            None => json!({}),
            Some(loader) => match loader.invoke().await {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(
                        widget = %request.widget_id,
                        error = %err,
                        "empty-state loader failed; showing empty payload"
                    );
                    json!({})
                }
            },
        };

        self.commit(request, WidgetStatePhase::Empty, payload)
    }

    fn can_reuse(&self, selection: &Selection) -> bool {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.phase == WidgetStatePhase::Data
            && state.in_flight.is_none()
            && state.data_for.as_ref() == Some(selection)
    }

    /// Supersede everything and commit `phase` immediately
    fn settle(&self, phase: WidgetStatePhase, output: Value) -> RuntimeResult<()> {
        self.bridge.serialized(|| {
            {
                let guard = self.state.lock();
                let mut state = guard.borrow_mut();
                state.sequence += 1;
                state.in_flight = None;
                state.phase = phase;
                state.data_for = None;
            }
            tracing::debug!(phase = %phase, "settled phase");
            self.bridge
                .publish(GlobalStateUpdate::phase_with_output(phase, output))
        })
    }

    /// Take a new sequence number and mark the request in flight
    fn issue(&self, selection: &Selection, clear_output: bool) -> RuntimeResult<LoadRequest> {
        self.bridge.serialized(|| {
            let request = {
                let guard = self.state.lock();
                let mut state = guard.borrow_mut();
                state.sequence += 1;
                let request = LoadRequest {
                    sequence: state.sequence,
                    widget_id: selection.active_widget_id.clone(),
                    data_source_key: selection.active_data_source_key.clone(),
                };
                state.in_flight = Some(request.clone());
                if clear_output {
                    state.phase = WidgetStatePhase::Loading;
                    state.data_for = None;
                }
                request
            };

            tracing::debug!(
                sequence = request.sequence,
                widget = %request.widget_id,
                data_source = ?request.data_source_key,
                "issued load request"
            );

            if clear_output {
                let update =
                    GlobalStateUpdate::phase_with_output(WidgetStatePhase::Loading, Value::Null);
                if let Err(err) = self.bridge.publish(update) {
                    self.release(&request);
                    return Err(err);
                }
            }

            Ok(request)
        })
    }

    async fn run_data_loader(&self, request: &LoadRequest) -> RuntimeResult<TransitionOutcome> {
        let pair = self
            .registry
            .resolve_loaders(&request.widget_id, request.data_source_key.as_ref());

        let Some(loader) = pair.loader else {
            tracing::debug!(widget = %request.widget_id, "no data loader configured");
            return self.commit(request, WidgetStatePhase::Empty, json!({}));
        };

        match loader.invoke().await {
            Ok(value) => self.commit(request, WidgetStatePhase::Data, value),
            Err(err) => {
                tracing::warn!(widget = %request.widget_id, error = %err, "data loader failed");
                self.commit(request, WidgetStatePhase::Error, err.to_payload())
            }
        }
    }

    /// Publish a result if `request` is still the latest
    fn commit(
        &self,
        request: &LoadRequest,
        phase: WidgetStatePhase,
        output: Value,
    ) -> RuntimeResult<TransitionOutcome> {
        self.bridge.serialized(|| {
            {
                let guard = self.state.lock();
                let mut state = guard.borrow_mut();
                if state
                    .in_flight
                    .as_ref()
                    .is_some_and(|pending| pending.sequence == request.sequence)
                {
                    state.in_flight = None;
                }
                if state.sequence != request.sequence {
                    tracing::debug!(
                        sequence = request.sequence,
                        latest = state.sequence,
                        "discarding superseded result"
                    );
                    return Ok(TransitionOutcome::Superseded);
                }
                state.phase = phase;
                state.data_for = (phase == WidgetStatePhase::Data).then(|| request.selection());
            }

            self.bridge
                .publish(GlobalStateUpdate::phase_with_output(phase, output))?;
            Ok(TransitionOutcome::Committed(phase))
        })
    }

    fn is_current(&self, request: &LoadRequest) -> bool {
        self.state.lock().borrow().sequence == request.sequence
    }

    /// Clear the in-flight marker if it still belongs to `request`
    fn release(&self, request: &LoadRequest) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if state
            .in_flight
            .as_ref()
            .is_some_and(|pending| pending.sequence == request.sequence)
        {
            state.in_flight = None;
        }
    }
}
