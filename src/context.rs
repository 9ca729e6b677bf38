//! Diversion context: one filter, one queue and the tasks that serve it.
//!
//! The capture side calls [`DivertContext::classify`] for every packet seen
//! at an installed hook. Matching packets are copied into the diversion
//! queue, and consumers pull them with [`DivertContext::recv`].

use arc_swap::ArcSwapOption;
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use rust_divert_common::config::DivertConfig;
use rust_divert_common::metrics::DivertMetrics;
use rust_divert_common::types::{
    validate_priority, Address, ChecksumFixup, ChecksumOffload, Direction, Flags, InterfaceId,
    Layer, Param,
};
use rust_divert_common::{Error, Result};
use rust_divert_filter::{analyze, compile, matches, Analysis, Program};
use rust_divert_queue::{Delivered, DiversionQueue, QueueTasks, QueuedPacket};
use std::fmt;
use std::sync::Arc;

use crate::hooks::HookPlan;

/// Lifecycle of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Opening,
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContextState::Opening => "opening",
            ContextState::Open => "open",
            ContextState::Closing => "closing",
            ContextState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// What the capture point should do with a classified packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Let the packet continue through the stack.
    Permit,
    /// Consume the packet; the stack must not deliver it.
    Absorb,
}

/// A packet as seen at a capture hook.
#[derive(Debug, Clone, Copy)]
pub struct CapturedPacket<'a> {
    pub data: &'a [u8],
    pub direction: Direction,
    pub if_idx: InterfaceId,
    pub sub_if_idx: InterfaceId,
    /// Checksums the stack deferred to hardware.
    pub offload: ChecksumOffload,
    /// Priority of the context that reinjected this packet, if any.
    pub injected_priority: Option<i16>,
}

impl<'a> CapturedPacket<'a> {
    pub fn new(
        data: &'a [u8],
        direction: Direction,
        if_idx: InterfaceId,
        sub_if_idx: InterfaceId,
    ) -> Self {
        Self {
            data,
            direction,
            if_idx,
            sub_if_idx,
            offload: ChecksumOffload::default(),
            injected_priority: None,
        }
    }

    pub fn with_offload(mut self, offload: ChecksumOffload) -> Self {
        self.offload = offload;
        self
    }

    pub fn injected_by(mut self, priority: i16) -> Self {
        self.injected_priority = Some(priority);
        self
    }
}

/// A packet diversion context.
#[derive(Debug)]
pub struct DivertContext {
    state: Mutex<ContextState>,
    layer: Layer,
    priority: i16,
    flags: Flags,
    program: ArcSwapOption<Program>,
    plan: Mutex<Option<HookPlan>>,
    tasks: Mutex<Option<QueueTasks>>,
    queue: Arc<DiversionQueue>,
    metrics: Arc<DivertMetrics>,
}

impl DivertContext {
    /// Open a context with default queue parameters.
    pub fn new(layer: Layer, priority: i64, flags: Flags) -> Result<Self> {
        let priority = validate_priority(priority)?;
        let metrics = Arc::new(DivertMetrics::new());
        let queue = Arc::new(DiversionQueue::new(Arc::clone(&metrics)));
        queue.set_checksum_repair(!flags.contains(Flags::NO_CHECKSUM));

        let context = Self {
            state: Mutex::new(ContextState::Opening),
            layer,
            priority,
            flags,
            program: ArcSwapOption::empty(),
            plan: Mutex::new(None),
            tasks: Mutex::new(None),
            queue,
            metrics,
        };
        *context.state.lock() = ContextState::Open;
        info!(
            "Opened diversion context: layer={:?} priority={} flags={:#x}",
            layer,
            priority,
            flags.bits()
        );
        Ok(context)
    }

    /// Open a context from loaded settings.
    pub fn from_config(config: &DivertConfig) -> Result<Self> {
        config.validate()?;
        let context = Self::new(config.layer, config.priority, config.flags())?;
        context.set_param(Param::QueueLen, config.queue_len)?;
        context.set_param(Param::QueueTime, config.queue_time_ms)?;
        Ok(context)
    }

    /* ---------------------------------------------------------------- *
     * Accessors
     * ---------------------------------------------------------------- */

    pub fn state(&self) -> ContextState {
        *self.state.lock()
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    pub fn priority(&self) -> i16 {
        self.priority
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Hooks derived from the active filter, if one was started.
    pub fn hook_plan(&self) -> Option<HookPlan> {
        self.plan.lock().clone()
    }

    pub fn metrics(&self) -> Arc<DivertMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Number of packets waiting for a consumer.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn ensure_open(&self) -> Result<()> {
        let state = *self.state.lock();
        if state != ContextState::Open {
            return Err(Error::InvalidState(format!("context is {}", state)));
        }
        Ok(())
    }

    /* ---------------------------------------------------------------- *
     * Parameters
     * ---------------------------------------------------------------- */

    pub fn get_param(&self, param: Param) -> u64 {
        match param {
            Param::QueueLen => self.queue.max_length(),
            Param::QueueTime => self.queue.sweep_interval().as_millis() as u64,
        }
    }

    /// Change a queue parameter. Out-of-range values leave the old value in
    /// force.
    pub fn set_param(&self, param: Param, value: u64) -> Result<()> {
        self.ensure_open()?;
        match param {
            Param::QueueLen => self.queue.set_max_length(value)?,
            Param::QueueTime => self.queue.set_sweep_interval(value)?,
        }
        debug!("Set {:?} = {}", param, value);
        Ok(())
    }

    /* ---------------------------------------------------------------- *
     * Filter control
     * ---------------------------------------------------------------- */

    /// Compile and activate the first filter, then start the queue tasks.
    /// Must be called from within a tokio runtime.
    pub fn start_filter(&self, rules: &[u8]) -> Result<HookPlan> {
        let mut tasks = self.tasks.lock();
        self.ensure_open()?;
        if tasks.is_some() {
            return Err(Error::FilterAlreadyStarted);
        }
        tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Runtime(format!("no tokio runtime for queue tasks: {}", e)))?;

        let program = compile(rules)?;
        let plan = self.install(program);
        *tasks = Some(QueueTasks::spawn(Arc::clone(&self.queue)));

        info!("Filter started: {}", plan);
        Ok(plan)
    }

    /// Atomically swap in a new filter. Packets already being evaluated
    /// finish against the old one. On error the old filter stays active.
    pub fn replace_filter(&self, rules: &[u8]) -> Result<HookPlan> {
        let tasks = self.tasks.lock();
        self.ensure_open()?;
        if tasks.is_none() {
            return Err(Error::InvalidState("no filter has been started".to_string()));
        }

        let program = compile(rules)?;
        let plan = self.install(program);
        info!("Filter replaced: {}", plan);
        Ok(plan)
    }

    fn install(&self, program: Program) -> HookPlan {
        let analysis = if self.flags.contains(Flags::PASSTHRU) {
            Analysis::none()
        } else {
            analyze(&program)
        };
        debug!("Filter of {} nodes: {}", program.len(), analysis);

        let plan = HookPlan::derive(self.layer, analysis, self.priority);
        self.program.store(Some(Arc::new(program)));
        *self.plan.lock() = Some(plan.clone());
        plan
    }

    /* ---------------------------------------------------------------- *
     * Data path
     * ---------------------------------------------------------------- */

    /// Decide the fate of a captured packet, queueing a copy if it matches.
    pub fn classify(&self, packet: &CapturedPacket<'_>) -> Verdict {
        self.metrics.packets_classified.increment();

        if self.state() != ContextState::Open || self.flags.contains(Flags::PASSTHRU) {
            return Verdict::Permit;
        }
        if let Some(injected) = packet.injected_priority {
            if injected <= self.priority {
                trace!("Permitting packet reinjected at priority {}", injected);
                return Verdict::Permit;
            }
        }

        let Some(program) = self.program.load_full() else {
            return Verdict::Permit;
        };
        if !matches(
            &program,
            packet.data,
            packet.direction,
            packet.if_idx,
            packet.sub_if_idx,
        ) {
            return Verdict::Permit;
        }
        self.metrics.packets_matched.increment();

        if self.flags.contains(Flags::DROP) {
            self.metrics.packets_dropped.increment();
        } else {
            self.divert(packet);
        }

        if self.flags.contains(Flags::SNIFF) {
            Verdict::Permit
        } else {
            Verdict::Absorb
        }
    }

    fn divert(&self, packet: &CapturedPacket<'_>) {
        let address = Address::new(packet.direction, packet.if_idx, packet.sub_if_idx);
        let fixup = ChecksumFixup::for_capture(packet.direction, packet.offload);
        match QueuedPacket::copy_from(packet.data, address, fixup) {
            Ok(queued) => {
                if self.queue.enqueue(queued).is_accepted() {
                    self.metrics.packets_diverted.increment();
                }
            }
            Err(e) => warn!("Failed to queue packet ({}): {}", address, e),
        }
    }

    /// Wait for the next diverted packet, truncated to `max_len` bytes.
    pub async fn recv(&self, max_len: usize) -> Result<Delivered> {
        match self.state() {
            ContextState::Open => {}
            ContextState::Closing | ContextState::Closed => return Err(Error::QueueShuttingDown),
            ContextState::Opening => {
                return Err(Error::InvalidState("context is opening".to_string()))
            }
        }
        let started = self.tasks.lock().is_some();
        if !started {
            return Err(Error::InvalidState("no filter has been started".to_string()));
        }
        self.queue.recv(max_len).await
    }

    /* ---------------------------------------------------------------- *
     * Teardown
     * ---------------------------------------------------------------- */

    /// Stop diverting, discard queued packets, fail pending reads and stop
    /// the background tasks.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != ContextState::Open {
                return Err(Error::InvalidState(format!("cannot close, context is {}", state)));
            }
            *state = ContextState::Closing;
        }

        let tasks = self.tasks.lock().take();
        if let Some(tasks) = &tasks {
            tasks.stop_sweeper();
        }
        self.program.store(None);
        let discarded = self.queue.drain_all();
        if let Some(tasks) = tasks {
            tasks.shutdown().await;
        }

        *self.state.lock() = ContextState::Closed;
        info!("Diversion context closed, {} packets discarded", discarded);
        Ok(())
    }
}

impl Drop for DivertContext {
    fn drop(&mut self) {
        // Lets detached tasks observe the teardown and exit.
        if !self.queue.is_shutting_down() {
            self.queue.drain_all();
        }
    }
}
