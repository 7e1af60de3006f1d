//! `compile`: bind a template to a context and emit an episode JSONL.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use cortex_core::episode::log;
use cortex_core::layer::LayerPool;
use cortex_core::runner::EpisodeRunner;
use cortex_core::template::{canonical, compile, CompilationContext};
use cortex_core::vocabulary::{LayerId, TemplateId};

use super::skeleton::{lock, shared_state, SkeletonLayer};

/// Options for the compile command.
#[derive(Debug)]
pub struct CompileOptions {
    /// Template identifier (A-H).
    pub template: String,
    /// Correlation id; fresh when absent.
    pub correlation_id: Option<String>,
    /// Declared stakes level.
    pub stakes: String,
    /// Quality tier.
    pub tier: String,
    /// Tools state.
    pub tools_state: String,
    /// Intent summary.
    pub intent: String,
    /// Token budget.
    pub budget_tokens: u64,
    /// Tool call budget.
    pub budget_tool_calls: u64,
    /// Time budget in seconds.
    pub budget_time_seconds: u64,
    /// Output path; stdout when absent.
    pub output: Option<PathBuf>,
}

/// Compiles and executes a template with skeleton layers, emitting the
/// admitted packet stream as JSONL. Returns true on success.
pub fn compile_template(options: &CompileOptions) -> Result<bool> {
    let template_id = TemplateId::parse(&options.template)
        .with_context(|| format!("template {}", options.template))?;
    let stakes = super::parse_stakes(&options.stakes)?;
    let tier = super::parse_tier(&options.tier)?;
    let tools_state = super::parse_tools_state(&options.tools_state)?;

    let mut context = CompilationContext::new(
        options.intent.clone(),
        stakes,
        tier,
        tools_state,
        Utc::now(),
    )
    .with_budgets(
        options.budget_tokens,
        options.budget_tool_calls,
        options.budget_time_seconds,
    );
    if let Some(correlation_id) = &options.correlation_id {
        context = context.with_correlation_id(correlation_id.clone());
    }

    let template = canonical::template(template_id);
    let episode = match compile(&template, &context) {
        Ok(episode) => episode,
        Err(error) => {
            eprintln!("compilation refused: {error}");
            return Ok(false);
        },
    };

    // Drive the real runner with skeleton layers so the emitted log is
    // exactly what the validation engine admits.
    let state = shared_state(context.created_at);
    let mut pool = LayerPool::new();
    pool.register(Box::new(SkeletonLayer::new(
        LayerId::CognitiveControl,
        state.clone(),
    )));
    pool.register(Box::new(SkeletonLayer::new(
        LayerId::TaskProsecution,
        state.clone(),
    )));
    let mut runner = EpisodeRunner::new(pool);
    let result = runner.run(&episode, Vec::new());

    if !result.success {
        eprintln!(
            "episode generation failed at step {:?} (final state {})",
            result.failed_step, result.final_state
        );
        for diagnostic in &result.diagnostics {
            eprintln!("  {diagnostic}");
        }
        return Ok(false);
    }

    let packets = lock(&state).packets();
    match &options.output {
        Some(path) => {
            log::write_packets(path, &packets)
                .with_context(|| format!("writing {}", path.display()))?;
            eprintln!(
                "wrote {} packets for {} to {}",
                packets.len(),
                result.correlation_id,
                path.display()
            );
        },
        None => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            for packet in &packets {
                let json = packet.to_json_string().context("encoding packet")?;
                writeln!(out, "{json}")?;
            }
        },
    }
    Ok(true)
}
