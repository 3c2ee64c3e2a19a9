//! CLI command implementations

use crate::output::{render_records, to_json, OutputFormat};
use crate::scenario::{replay, MediaState, Scenario};
use anyhow::{bail, Context};
use console::style;
use roll_core::config::scale_for_rotation;
use roll_core::heuristic::{judge, Candidate, Incumbent, RealPlayerHeuristic, Verdict};
use roll_core::looper::parse_timestamp;
use roll_core::{Dimensions, MediaId, PlaybackSnapshot};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Replay a scenario file and print the emitted notifications
pub async fn replay_file(path: &Path, format: &str) -> anyhow::Result<()> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let scenario = Scenario::from_json(&json)?;
    let result = replay(&scenario).await?;
    let format = OutputFormat::from(format);

    println!("{}", render_records(&result.records, format));

    if format != OutputFormat::Json {
        for reply in &result.replies {
            println!("{} {}", style("reply").green(), reply.name());
        }
        for error in &result.errors {
            eprintln!("{} {}", style("error").red().bold(), error);
        }
        println!(
            "\n{} notification(s), {} reply(ies), {} error(s)",
            result.records.len(),
            result.replies.len(),
            result.errors.len()
        );
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidateInput {
    id: String,
    width: f64,
    height: f64,
    #[serde(flatten)]
    state: MediaState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClassifyReport {
    verdicts: Vec<(String, String)>,
    real: Option<MediaId>,
}

/// Run the real-player heuristic over a JSON list of candidates
pub fn classify(path: &Path, format: &str) -> anyhow::Result<()> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let inputs: Vec<CandidateInput> = serde_json::from_str(&json).context("invalid candidate list")?;

    let candidates: Vec<Candidate> = inputs
        .iter()
        .map(|input| {
            let mut snapshot = PlaybackSnapshot {
                ready_state: 4,
                rendered: Dimensions::new(input.width, input.height),
                intrinsic: Dimensions::new(input.width, input.height),
                ..Default::default()
            };
            input.state.apply(&mut snapshot);
            Candidate::new(MediaId(input.id.clone()), snapshot)
        })
        .collect();

    let first = candidates.first();
    let verdicts = candidates
        .iter()
        .map(|candidate| {
            let incumbent = first
                .filter(|f| f.id != candidate.id)
                .map(|f| Incumbent {
                    dimensions: f.snapshot.rendered,
                    snapshot: &f.snapshot,
                });
            let verdict = match judge(&candidate.snapshot, incumbent) {
                Verdict::Accept => "accept".to_string(),
                Verdict::Reject(reason) => format!("reject ({:?})", reason),
            };
            (candidate.id.to_string(), verdict)
        })
        .collect();

    let real = RealPlayerHeuristic::new().classify(&candidates, None);
    let report = ClassifyReport { verdicts, real };

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", to_json(&report)),
        _ => {
            for (id, verdict) in &report.verdicts {
                println!("  {:<16} {}", id, verdict);
            }
            match &report.real {
                Some(id) => println!("\nReal player: {}", style(id).green().bold()),
                None => println!("\nReal player: {}", style("none").yellow()),
            }
        }
    }
    Ok(())
}

/// Parse `WIDTHxHEIGHT`
pub fn parse_size(value: &str) -> anyhow::Result<Dimensions> {
    let Some((w, h)) = value.split_once(['x', 'X']) else {
        bail!("expected WIDTHxHEIGHT, got '{}'", value);
    };
    let width: f64 = w.trim().parse().with_context(|| format!("bad width in '{}'", value))?;
    let height: f64 = h.trim().parse().with_context(|| format!("bad height in '{}'", value))?;
    Ok(Dimensions::new(width, height))
}

/// Print the scale that keeps a rotated video inside its container
pub fn scale(container: &str, intrinsic: &str, deg: u16, format: &str) -> anyhow::Result<()> {
    let values = scale_for_rotation(parse_size(container)?, parse_size(intrinsic)?, deg);
    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", to_json(&values)),
        _ => println!("scale at {}°: [{}, {}]", deg, values[0], values[1]),
    }
    Ok(())
}

/// Parse `[H:]M:S` timestamps; returns false when any failed
pub fn timestamps(values: &[String], format: &str) -> bool {
    let parsed: Vec<(String, Result<f64, String>)> = values
        .iter()
        .map(|v| (v.clone(), parse_timestamp(v).map_err(|e| e.to_string())))
        .collect();
    let ok = parsed.iter().all(|(_, r)| r.is_ok());

    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", to_json(&parsed)),
        _ => {
            for (input, result) in &parsed {
                match result {
                    Ok(seconds) => println!("  {:<14} {}s", input, seconds),
                    Err(err) => println!("  {:<14} {}", input, style(err).red()),
                }
            }
        }
    }
    ok
}
