//! Scenario runner
//!
//! A scenario walks `Init → MaskSet → SignalsRaised → MaskReleased → Observed`
//! and never steps backwards. Any broken expectation ends it with a
//! `ProbeError::Violation` naming the invariant.

use crate::boundary::{self, ExecPlan};
use crate::config::ProbeConfig;
use crate::counter::{install, DeliveryCounter, Disposition, DELIVERIES};
use crate::errors::{ProbeError, Result};
use crate::mask::{MaskController, SignalSet};
use crate::signo::SignalId;
use std::convert::Infallible;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Scenario progress. Ordered: a scenario may only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Init,
    MaskSet,
    SignalsRaised,
    MaskReleased,
    Observed,
}

/// Primitives shared by every scenario
#[derive(Debug)]
pub struct Probe {
    pub mask: MaskController,
    pub counter: &'static DeliveryCounter,
    pub config: ProbeConfig,
}

impl Probe {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            mask: MaskController::new(),
            counter: &DELIVERIES,
            config,
        }
    }

    /// Start a scenario from `Init`
    pub fn scenario(&self, name: &'static str) -> Scenario<'_> {
        Scenario::resume(self, name, Phase::Init)
    }

    /// Leave no ALRM pending and no signal blocked, then zero the counter.
    ///
    /// Relies on the unmask delivering whatever was left pending.
    pub fn drain(&self) -> Result<()> {
        install(SignalId::ALRM, Disposition::Count)?;
        self.mask.unblock_all()?;
        if !self.config.settle.is_zero() {
            std::thread::sleep(self.config.settle);
        }
        let leftover = self.counter.get();
        if leftover > 0 {
            debug!(leftover, "drained pending deliveries");
        }
        self.counter.reset();
        Ok(())
    }
}

/// One pass through the phase sequence
#[derive(Debug)]
pub struct Scenario<'a> {
    probe: &'a Probe,
    name: &'static str,
    phase: Phase,
}

impl<'a> Scenario<'a> {
    /// Pick up a scenario at `phase`, e.g. in an image that inherited state
    pub fn resume(probe: &'a Probe, name: &'static str, phase: Phase) -> Self {
        Self { probe, name, phase }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move to `next`. Going backwards is a protocol error.
    pub fn advance(&mut self, next: Phase) -> Result<()> {
        if next < self.phase {
            return Err(ProbeError::violation(format!(
                "{}: phase {:?} cannot follow {:?}",
                self.name, next, self.phase
            )));
        }
        debug!(scenario = self.name, from = ?self.phase, to = ?next, "phase");
        self.phase = next;
        Ok(())
    }

    /// Block exactly `signals` and return the mask readback
    pub fn block(&mut self, signals: &[SignalId]) -> Result<SignalSet> {
        self.advance(Phase::MaskSet)?;
        self.probe.mask.set_mask_verified(signals)
    }

    /// Send `sig` to this process `times` times
    pub fn raise(&mut self, sig: SignalId, times: u32) -> Result<()> {
        self.advance(Phase::SignalsRaised)?;
        debug!(scenario = self.name, signal = %sig, times, "kill(getpid())");
        sig.raise_to_self(times)
    }

    /// Empty the mask, delivering everything pending
    pub fn release(&mut self) -> Result<()> {
        self.advance(Phase::MaskReleased)?;
        self.probe.mask.unblock_all()
    }

    /// Final delivery check
    pub fn observe(&mut self, expected: u32, violation: &str) -> Result<()> {
        self.advance(Phase::Observed)?;
        self.expect_deliveries(expected, violation)
    }

    pub fn expect_deliveries(&self, expected: u32, violation: &str) -> Result<()> {
        let seen = self
            .probe
            .counter
            .await_count(expected, self.probe.config.settle);
        if seen != expected {
            warn!(scenario = self.name, expected, seen, "delivery count mismatch");
            return Err(ProbeError::violation(violation));
        }
        Ok(())
    }

    pub fn expect_pending(&self, sig: SignalId, pending: bool, violation: &str) -> Result<()> {
        if self.probe.mask.pending()?.contains(sig) != pending {
            return Err(ProbeError::violation(violation));
        }
        Ok(())
    }

    pub fn expect_blocked(&self, sig: SignalId, violation: &str) -> Result<()> {
        if !self.probe.mask.get_mask()?.contains(sig) {
            return Err(ProbeError::violation(violation));
        }
        Ok(())
    }
}

/// Blocking SIGKILL and SIGSTOP must silently do nothing.
pub fn non_maskable(probe: &Probe) -> Result<()> {
    let mut sc = probe.scenario("non-maskable signals");
    // set_mask_verified rejects a readback that reports either one blocked
    sc.block(&SignalId::NON_MASKABLE)?;
    sc.advance(Phase::Observed)
}

/// A standard signal raised repeatedly while blocked is delivered once.
pub fn standard_coalescing(probe: &Probe) -> Result<()> {
    let sig = SignalId::ALRM;
    let mut sc = probe.scenario("standard signal coalescing");

    sc.block(&[sig])?;
    install(sig, Disposition::Count)?;
    sc.raise(sig, probe.config.raises)?;
    sc.expect_deliveries(0, "Handled a blocked standard signal!")?;
    sc.expect_pending(sig, true, "Blocked standard signal is not pending!")?;

    sc.release()?;
    sc.observe(1, "Multiple or none instances of standard signal were queued!")
}

/// Each raise of a blocked real-time signal is delivered separately.
pub fn realtime_queuing(probe: &Probe) -> Result<()> {
    let sig = SignalId::rt_min();
    let raises = probe.config.raises;
    let mut sc = probe.scenario("real-time signal queuing");

    sc.block(&[sig])?;
    sc.raise(sig, raises)?;
    // handler goes in only after the instances are queued
    install(sig, Disposition::Count)?;
    sc.expect_deliveries(0, "Handled a blocked real-time signal!")?;

    sc.release()?;
    sc.observe(raises, "Multiple instances of real-time signal were NOT queued!")
}

/// Outcome of one scenario
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    pub name: &'static str,
    pub passed: bool,
    pub duration: Duration,
    pub message: Option<String>,
}

/// Runs scenarios in order and stops at the first failure
#[derive(Debug)]
pub struct ProbeRunner {
    probe: Probe,
    results: Vec<ScenarioResult>,
}

impl ProbeRunner {
    pub fn new(probe: Probe) -> Self {
        Self {
            probe,
            results: Vec::new(),
        }
    }

    pub fn probe(&self) -> &Probe {
        &self.probe
    }

    pub fn results(&self) -> &[ScenarioResult] {
        &self.results
    }

    /// Run one scenario and record it
    pub fn run<F, T>(&mut self, name: &'static str, scenario: F) -> Result<T>
    where
        F: FnOnce(&Probe) -> Result<T>,
    {
        info!(scenario = name, "running");
        let start = Instant::now();
        let result = scenario(&self.probe);
        let duration = start.elapsed();

        let (passed, message) = match &result {
            Ok(_) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        };
        if passed {
            info!(scenario = name, ?duration, "✅ passed");
        } else {
            warn!(scenario = name, ?duration, "❌ failed");
        }

        self.results.push(ScenarioResult {
            name,
            passed,
            duration,
            message,
        });
        result
    }

    /// Every scenario, ending in the exec hand-off. Only returns on failure.
    pub fn run_full(&mut self, plan: &ExecPlan) -> Result<Infallible> {
        self.probe.config.check_queue_limit()?;

        self.run("non-maskable signals", non_maskable)?;

        self.probe.drain()?;
        self.run("standard signal coalescing", standard_coalescing)?;

        self.probe.drain()?;
        self.run("real-time signal queuing", realtime_queuing)?;

        self.probe.drain()?;
        self.run("fork isolation", boundary::fork_isolation)?;

        self.probe.drain()?;
        info!("{}", self.summary());
        self.run("exec persistence", |probe| {
            boundary::exec_persistence_start(probe, plan)
        })
    }

    /// Second half of the exec persistence scenario, in the new image
    pub fn run_continuation(&mut self) -> Result<()> {
        self.run("exec persistence (continuation)", boundary::exec_persistence_continue)?;
        info!("{}", self.summary());
        Ok(())
    }

    /// One-line tally of recorded results
    pub fn summary(&self) -> String {
        let passed = self.results.iter().filter(|r| r.passed).count();
        let total: Duration = self.results.iter().map(|r| r.duration).sum();
        format!(
            "{}/{} scenarios passed in {:?}",
            passed,
            self.results.len(),
            total
        )
    }
}
