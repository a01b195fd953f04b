//! Startup phase tracking
//!
//! Phases form a tree derived from a stack of open phase names. Completing
//! startup force-ends whatever is still open, freezes the profile and
//! compares it against the configured targets. The report adds post-hoc
//! bottleneck detection and a 0-100 score.
//!
//! Phases are ended by name, not by stack position, so a phase can be closed
//! while its children are still open. The children stay on the stack until
//! they are ended themselves or forced closed by [`StartupPhaseTracker::complete`].

use std::fmt;
use std::time::Instant;

use perfguard_common::time::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use crate::config::{StartupConfig, StartupTargets};
use crate::error::TelemetryResult;
use crate::events::ListenerRegistry;
use crate::metrics::Metadata;
use crate::utils::millis;

/// Root phase compared against `targets.framework_init`
pub const FRAMEWORK_INIT_PHASE: &str = "framework_init";
/// Preferred phase compared against `targets.initial_render`
pub const INITIAL_RENDER_PHASE: &str = "initial_render";
/// Phases longer than this are always reported as bottlenecks
pub const ABSOLUTE_BOTTLENECK_MS: f64 = 20.0;

/// Extra inputs to [`StartupPhaseTracker::start_phase`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseOptions {
    /// Copied onto the phase unchanged
    pub metadata: Option<Metadata>,
}

impl PhaseOptions {
    /// Options carrying `metadata`
    pub fn with_metadata(metadata: Metadata) -> Self {
        Self { metadata: Some(metadata) }
    }
}

/// A named interval. Times are milliseconds since the tracker was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupPhase {
    /// Unique among open phases; may repeat once closed
    pub name: String,
    pub start_time_ms: f64,
    /// Set when the phase ends
    pub end_time_ms: Option<f64>,
    /// `end_time_ms - start_time_ms`, set when the phase ends
    pub duration_ms: Option<f64>,
    /// Innermost phase open when this one started
    pub parent: Option<String>,
    /// Children in start order; empty unless `track_sub_phases`
    pub sub_phases: Vec<String>,
    pub metadata: Option<Metadata>,
}

impl StartupPhase {
    /// Whether the phase has ended
    pub fn is_complete(&self) -> bool {
        self.duration_ms.is_some()
    }
}

/// One budget checked against its measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetResult {
    pub target_ms: f64,
    /// `None` when the measured phase never ran
    pub actual_ms: Option<f64>,
    /// `true` when within budget or never measured
    pub met: bool,
    /// Actual as a percentage of target; `0` when there is no measurement
    pub percentage: f64,
}

impl TargetResult {
    fn evaluate(target_ms: f64, actual_ms: Option<f64>) -> Self {
        match actual_ms {
            Some(actual) => Self {
                target_ms,
                actual_ms,
                met: actual <= target_ms,
                percentage: actual / target_ms * 100.0,
            },
            None => Self { target_ms, actual_ms: None, met: true, percentage: 0.0 },
        }
    }
}

/// Budgets from [`StartupTargets`] checked against a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetAnalysis {
    pub framework_init: TargetResult,
    pub initial_render: TargetResult,
    pub total_startup: TargetResult,
}

impl TargetAnalysis {
    /// Whether every budget was met
    pub fn all_met(&self) -> bool {
        self.framework_init.met && self.initial_render.met && self.total_startup.met
    }
}

/// Frozen result of a completed startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupProfile {
    /// Every phase, in start order
    pub phases: Vec<StartupPhase>,
    /// Milliseconds from tracker creation to `complete`
    pub total_duration_ms: f64,
    pub targets: TargetAnalysis,
}

/// How badly a phase overran; ordered `Low < Medium < High`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BottleneckSeverity {
    Low,
    Medium,
    High,
}

impl BottleneckSeverity {
    /// Points deducted from the performance score
    pub fn penalty(self) -> f64 {
        match self {
            Self::Low => 5.0,
            Self::Medium => 10.0,
            Self::High => 20.0,
        }
    }
}

impl fmt::Display for BottleneckSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Which rule flagged a bottleneck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckReason {
    /// Duration is a multiple of the mean phase duration
    RelativeToMean,
    /// Duration exceeds [`ABSOLUTE_BOTTLENECK_MS`]
    AbsoluteThreshold,
}

/// A phase flagged by [`detect_bottlenecks`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bottleneck {
    pub phase: String,
    pub duration_ms: f64,
    pub severity: BottleneckSeverity,
    pub reason: BottleneckReason,
    /// Human-readable explanation including the duration
    pub message: String,
}

/// Name and duration of one completed phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub name: String,
    pub duration_ms: f64,
}

/// Duration statistics over the completed phases of a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseStatistics {
    /// Every phase, including ones never ended
    pub phase_count: usize,
    /// Phases that ended; the rest of the statistics cover only these
    pub completed_count: usize,
    /// Same as the profile's total
    pub total_duration_ms: f64,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub slowest: Option<PhaseTiming>,
    pub fastest: Option<PhaseTiming>,
}

/// Profile plus the analysis derived from it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupReport {
    pub profile: StartupProfile,
    pub statistics: PhaseStatistics,
    pub bottlenecks: Vec<Bottleneck>,
    /// 0 to 100; see [`performance_score`]
    pub performance_score: f64,
    /// Suggested fixes for missed targets and bottlenecks
    pub recommendations: Vec<String>,
}

/// Records the startup phase tree of one process bring-up
pub struct StartupPhaseTracker<C: Clock = SystemClock> {
    config: StartupConfig,
    clock: C,
    origin: Instant,
    phases: Vec<StartupPhase>,
    /// Indices into `phases`, innermost last
    open: Vec<usize>,
    profile: Option<StartupProfile>,
    listeners: ListenerRegistry,
}

impl StartupPhaseTracker<SystemClock> {
    /// Tracker on the system clock with no listeners
    pub fn new(config: StartupConfig) -> TelemetryResult<Self> {
        Self::with_clock(config, SystemClock, ListenerRegistry::new())
    }
}

impl<C: Clock> StartupPhaseTracker<C> {
    /// Tracker whose phase times are measured from now
    ///
    /// # Errors
    /// `InvalidConfig` when `max_phase_depth` is zero.
    pub fn with_clock(
        config: StartupConfig,
        clock: C,
        listeners: ListenerRegistry,
    ) -> TelemetryResult<Self> {
        config.validate()?;
        let origin = clock.now();
        Ok(Self {
            config,
            clock,
            origin,
            phases: Vec::new(),
            open: Vec::new(),
            profile: None,
            listeners,
        })
    }

    fn elapsed_ms(&self) -> f64 {
        millis(self.clock.now().saturating_duration_since(self.origin))
    }

    /// Open a phase nested under the innermost open phase.
    ///
    /// Returns `false` (and logs) when startup is already complete, when the
    /// stack is at `max_phase_depth`, or when a phase with this name is
    /// already open.
    pub fn start_phase(&mut self, name: impl Into<String>, options: PhaseOptions) -> bool {
        let name = name.into();
        if self.profile.is_some() {
            warn!(phase = %name, "Startup already complete; phase ignored");
            return false;
        }
        if self.open.len() >= self.config.max_phase_depth {
            warn!(
                phase = %name,
                max_depth = self.config.max_phase_depth,
                "Maximum phase depth reached; phase ignored"
            );
            return false;
        }
        if self.open.iter().any(|&index| self.phases[index].name == name) {
            warn!(phase = %name, "Phase already open");
            return false;
        }

        let parent_index = self.open.last().copied();
        if let Some(parent_index) = parent_index {
            if self.config.track_sub_phases {
                self.phases[parent_index].sub_phases.push(name.clone());
            }
        }

        let phase = StartupPhase {
            name,
            start_time_ms: self.elapsed_ms(),
            end_time_ms: None,
            duration_ms: None,
            parent: parent_index.map(|index| self.phases[index].name.clone()),
            sub_phases: Vec::new(),
            metadata: options.metadata,
        };
        debug!(phase = %phase.name, depth = self.open.len() + 1, "Startup phase started");
        self.listeners.emit("phase_started", |listener| listener.on_phase_started(&phase));

        self.open.push(self.phases.len());
        self.phases.push(phase);
        true
    }

    /// Close the open phase called `name`, wherever it sits on the stack.
    ///
    /// Returns `None` (and logs) if no phase with that name is open.
    pub fn end_phase(&mut self, name: &str) -> Option<StartupPhase> {
        let Some(position) = self.open.iter().rposition(|&index| self.phases[index].name == name)
        else {
            warn!(phase = %name, "No open phase with this name");
            return None;
        };
        let index = self.open.remove(position);
        Some(self.close(index))
    }

    fn close(&mut self, index: usize) -> StartupPhase {
        let end = self.elapsed_ms();
        let phase = &mut self.phases[index];
        phase.end_time_ms = Some(end);
        phase.duration_ms = Some((end - phase.start_time_ms).max(0.0));
        let phase = phase.clone();

        debug!(phase = %phase.name, duration_ms = phase.duration_ms, "Startup phase ended");
        self.listeners.emit("phase_ended", |listener| listener.on_phase_ended(&phase));
        phase
    }

    /// Force-end open phases innermost first and freeze the profile.
    ///
    /// Calling it again returns the same profile.
    pub fn complete(&mut self) -> StartupProfile {
        if let Some(profile) = &self.profile {
            return profile.clone();
        }

        while let Some(index) = self.open.pop() {
            debug!(phase = %self.phases[index].name, "Force-ending open phase");
            self.close(index);
        }

        let total_duration_ms = self.elapsed_ms();
        let targets = self.analyze_targets(total_duration_ms);
        let profile = StartupProfile { phases: self.phases.clone(), total_duration_ms, targets };

        info!(
            total_ms = total_duration_ms,
            phases = profile.phases.len(),
            targets_met = profile.targets.all_met(),
            "Startup complete"
        );
        self.listeners.emit("startup_complete", |listener| listener.on_startup_complete(&profile));

        self.profile = Some(profile.clone());
        profile
    }

    fn analyze_targets(&self, total_duration_ms: f64) -> TargetAnalysis {
        let targets = &self.config.targets;

        let framework_init = self
            .phases
            .iter()
            .find(|phase| phase.parent.is_none() && phase.name == FRAMEWORK_INIT_PHASE)
            .and_then(|phase| phase.duration_ms);
        let initial_render = self
            .phases
            .iter()
            .find(|phase| phase.name == INITIAL_RENDER_PHASE)
            .or_else(|| self.phases.iter().find(|phase| phase.name.contains("render")))
            .and_then(|phase| phase.duration_ms);

        TargetAnalysis {
            framework_init: TargetResult::evaluate(targets.framework_init, framework_init),
            initial_render: TargetResult::evaluate(targets.initial_render, initial_render),
            total_startup: TargetResult::evaluate(
                targets.total_startup_time,
                Some(total_duration_ms),
            ),
        }
    }

    /// Build the full report, completing startup first if needed
    pub fn report(&mut self) -> StartupReport {
        let profile = self.complete();
        let bottlenecks = detect_bottlenecks(&profile.phases);
        let performance_score =
            performance_score(&profile, &bottlenecks, self.config.targets.total_startup_time);
        let recommendations = recommendations(&profile, &bottlenecks);

        StartupReport {
            statistics: PhaseStatistics::from_profile(&profile),
            profile,
            bottlenecks,
            performance_score,
            recommendations,
        }
    }

    /// Most recently started phase with this name
    pub fn phase(&self, name: &str) -> Option<&StartupPhase> {
        self.phases.iter().rev().find(|phase| phase.name == name)
    }

    /// Every phase, in start order
    pub fn phases(&self) -> &[StartupPhase] {
        &self.phases
    }

    /// Names of open phases, outermost first
    pub fn open_phases(&self) -> Vec<&str> {
        self.open.iter().map(|&index| self.phases[index].name.as_str()).collect()
    }

    /// Number of open phases
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Whether `complete` has frozen a profile
    pub fn is_complete(&self) -> bool {
        self.profile.is_some()
    }

    /// Profile frozen by `complete`, if any
    pub fn profile(&self) -> Option<&StartupProfile> {
        self.profile.as_ref()
    }

    /// Forget every phase and restart the clock
    pub fn reset(&mut self) {
        self.phases.clear();
        self.open.clear();
        self.profile = None;
        self.origin = self.clock.now();
    }
}

impl PhaseStatistics {
    fn from_profile(profile: &StartupProfile) -> Self {
        let mut timings: Vec<PhaseTiming> = profile
            .phases
            .iter()
            .filter_map(|phase| {
                let name = phase.name.clone();
                phase.duration_ms.map(|duration_ms| PhaseTiming { name, duration_ms })
            })
            .collect();
        timings.sort_by(|a, b| a.duration_ms.total_cmp(&b.duration_ms));

        let count = timings.len();
        let mean_ms = if count == 0 {
            0.0
        } else {
            timings.iter().map(|timing| timing.duration_ms).sum::<f64>() / count as f64
        };
        let median_ms = match count {
            0 => 0.0,
            n if n % 2 == 1 => timings[n / 2].duration_ms,
            n => (timings[n / 2 - 1].duration_ms + timings[n / 2].duration_ms) / 2.0,
        };

        Self {
            phase_count: profile.phases.len(),
            completed_count: count,
            total_duration_ms: profile.total_duration_ms,
            mean_ms,
            median_ms,
            fastest: timings.first().cloned(),
            slowest: timings.last().cloned(),
        }
    }
}

/// Flag slow phases.
///
/// The mean-ratio rule (High above 2x the mean, Medium above 1.5x) and the
/// absolute rule (High above [`ABSOLUTE_BOTTLENECK_MS`]) are applied
/// independently, so one phase can appear twice.
pub fn detect_bottlenecks(phases: &[StartupPhase]) -> Vec<Bottleneck> {
    let durations: Vec<(&str, f64)> = phases
        .iter()
        .filter_map(|phase| phase.duration_ms.map(|duration| (phase.name.as_str(), duration)))
        .collect();
    if durations.is_empty() {
        return Vec::new();
    }
    let mean = durations.iter().map(|(_, duration)| duration).sum::<f64>() / durations.len() as f64;

    let mut bottlenecks = Vec::new();
    for (name, duration) in durations {
        let relative = if duration > mean * 2.0 {
            Some(BottleneckSeverity::High)
        } else if duration > mean * 1.5 {
            Some(BottleneckSeverity::Medium)
        } else {
            None
        };
        if let Some(severity) = relative {
            bottlenecks.push(Bottleneck {
                phase: name.to_string(),
                duration_ms: duration,
                severity,
                reason: BottleneckReason::RelativeToMean,
                message: format!(
                    "Phase '{name}' took {duration:.1}ms, {:.1}x the mean of {mean:.1}ms",
                    duration / mean
                ),
            });
        }

        if duration > ABSOLUTE_BOTTLENECK_MS {
            bottlenecks.push(Bottleneck {
                phase: name.to_string(),
                duration_ms: duration,
                severity: BottleneckSeverity::High,
                reason: BottleneckReason::AbsoluteThreshold,
                message: format!(
                    "Phase '{name}' took {duration:.1}ms, over the {ABSOLUTE_BOTTLENECK_MS}ms limit"
                ),
            });
        }
    }
    bottlenecks
}

/// Score startup from 0 to 100.
///
/// Overrunning `target_ms` costs 50 points per 100% overrun; each
/// bottleneck costs its severity penalty.
pub fn performance_score(
    profile: &StartupProfile,
    bottlenecks: &[Bottleneck],
    target_ms: f64,
) -> f64 {
    let overrun = ((profile.total_duration_ms / target_ms - 1.0) * 50.0).max(0.0);
    let penalties: f64 = bottlenecks.iter().map(|bottleneck| bottleneck.severity.penalty()).sum();
    (100.0 - overrun - penalties).clamp(0.0, 100.0)
}

fn recommendations(profile: &StartupProfile, bottlenecks: &[Bottleneck]) -> Vec<String> {
    let mut out = Vec::new();
    let targets = &profile.targets;

    if !targets.total_startup.met {
        out.push(format!(
            "Total startup took {:.1}ms against a {:.0}ms target; defer non-essential work",
            profile.total_duration_ms, targets.total_startup.target_ms
        ));
    }
    if let (false, Some(actual)) = (targets.framework_init.met, targets.framework_init.actual_ms) {
        out.push(format!(
            "Framework initialization took {actual:.1}ms against a {:.0}ms target; \
             lazy-load optional subsystems",
            targets.framework_init.target_ms
        ));
    }
    if let (false, Some(actual)) = (targets.initial_render.met, targets.initial_render.actual_ms) {
        out.push(format!(
            "Initial render took {actual:.1}ms against a {:.0}ms target; \
             reduce the work done before first paint",
            targets.initial_render.target_ms
        ));
    }

    let mut flagged: Vec<&str> = Vec::new();
    for bottleneck in bottlenecks {
        let phase = bottleneck.phase.as_str();
        if bottleneck.severity == BottleneckSeverity::High && !flagged.contains(&phase) {
            flagged.push(phase);
            out.push(format!(
                "Optimize phase '{}' ({:.1}ms)",
                bottleneck.phase, bottleneck.duration_ms
            ));
        }
    }

    if out.is_empty() {
        out.push("Startup performance is within targets".to_string());
    }
    out
}
