//! Post-command hook dispatch and the diagnosis pipeline.
//!
//! Fires once per completed foreground command. Everything here is defensive:
//! a failure anywhere in the pipeline degrades to a logged no-op, never to an
//! error the interactive shell could see.

use crate::capture::CommandOutcome;
use crate::config::Config;
use crate::dedup::{ErrorSignature, GateDecision};
use crate::output;
use crate::providers::Gateway;
use crate::request::DiagnosisRequest;
use crate::session::SessionState;
use crate::snapshot::SnapshotAssembler;

/// Command prefixes that identify this tool's own machinery. Diagnosing them
/// would recurse.
const INTERNAL_PREFIXES: &[&str] = &["oops", "__oops_", "oops_wrap"];

/// Presentation and gating options for one cycle
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Skip the dedup gate (explicit manual request)
    pub bypass_dedup: bool,
    pub json: bool,
    pub quiet: bool,
}

/// What a diagnosis cycle did, for logging and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Eligibility filter rejected the event
    NotEligible,
    /// Dedup gate suppressed a recently analyzed failure
    Suppressed,
    /// A diagnosis was produced and presented
    Presented,
    /// The provider failed; a one-line notice was shown at most
    Failed,
    /// The session was interrupted while the call was outstanding
    Abandoned,
}

/// True when the command invokes this tool or its hook helpers.
pub fn is_internal_command(command: &str) -> bool {
    let Some(leading) = command.trim().split_whitespace().next() else {
        return true;
    };
    let name = leading.rsplit('/').next().unwrap_or(leading);
    INTERNAL_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// The eligibility filter: all conditions must hold for a cycle to run.
pub fn is_eligible(config: &Config, exit_status: i32, command: &str) -> bool {
    if exit_status == 0 || config.should_skip_exit_code(exit_status) {
        return false;
    }
    if command.trim().is_empty() {
        return false;
    }
    if is_internal_command(command) {
        return false;
    }
    if config.should_ignore_command(command.trim()) {
        return false;
    }
    true
}

/// Entry point for the shell's post-command event. Checks eligibility,
/// resolves capture, clears the channel, and runs the cycle. Absorbs every
/// failure.
pub async fn handle_hook_event(
    config: &Config,
    session: &SessionState,
    exit_status: i32,
    command: &str,
    shipped_output: Option<&str>,
    options: &PipelineOptions,
) -> CycleOutcome {
    if !is_eligible(config, exit_status, command) {
        tracing::debug!(command, exit_status, "not eligible, skipping");
        return CycleOutcome::NotEligible;
    }

    let channel = session.capture_channel();
    let outcome = channel
        .resolve(command, exit_status, shipped_output, &config.limits)
        .await;
    // A stale capture must never leak into the next cycle
    channel.clear();

    let gateway = match Gateway::from_config(&config.provider) {
        Ok(gateway) => gateway,
        Err(err) => {
            output::print_failure_notice(&err, options.quiet);
            return CycleOutcome::Failed;
        }
    };

    run_diagnosis_cycle(config, session, gateway, outcome, options).await
}

/// One complete cycle: gate, snapshot, request, provider call, presentation.
/// The gateway call runs as a detached task and is abandoned on SIGINT.
pub async fn run_diagnosis_cycle(
    config: &Config,
    session: &SessionState,
    gateway: Gateway,
    outcome: CommandOutcome,
    options: &PipelineOptions,
) -> CycleOutcome {
    if !options.bypass_dedup {
        let signature = ErrorSignature::compute(
            &outcome.command,
            &outcome.error_text,
            outcome.exit_status,
        );
        let gate = session.dedup_gate(&config.dedup);
        if gate.check_and_record(signature) == GateDecision::Skip {
            tracing::debug!(command = %outcome.command, "recently analyzed, suppressed");
            return CycleOutcome::Suppressed;
        }
    }

    let snapshot = SnapshotAssembler::new(config).assemble().await;
    let request = DiagnosisRequest::new(&outcome, snapshot, config);

    tracing::debug!(
        provider = gateway.provider_name(),
        model = gateway.model_name(),
        "submitting diagnosis request"
    );

    let call = tokio::spawn(async move { gateway.submit(&request).await });
    let result = tokio::select! {
        joined = call => match joined {
            Ok(result) => result,
            Err(err) => {
                tracing::debug!(?err, "gateway task failed");
                return CycleOutcome::Failed;
            }
        },
        _ = tokio::signal::ctrl_c() => {
            // Session is going away; abandon the outstanding call.
            tracing::debug!("interrupted, abandoning diagnosis");
            return CycleOutcome::Abandoned;
        }
    };

    match result {
        Ok(text) => {
            let diagnosis = output::parse_diagnosis(&outcome.command, &text);
            if options.json {
                if output::print_json(&diagnosis).is_err() {
                    tracing::debug!("failed to serialize diagnosis");
                }
            } else {
                output::print_colored(&diagnosis);
            }
            CycleOutcome::Presented
        }
        Err(err) => {
            tracing::debug!(kind = err.kind(), %err, "diagnosis failed");
            output::print_failure_notice(&err, options.quiet);
            CycleOutcome::Failed
        }
    }
}
