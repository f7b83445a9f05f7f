use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{create_step, PipelineConfig};
use crate::data::DocumentStream;
use crate::io;
use crate::pipeline::{hints, Pipeline, PipelineStats, Stats};

/// What one shard produced.
struct ShardOutcome {
    written: usize,
    stats: Vec<Stats>,
}

/// Run the pipeline over every input file. Each file is one shard, its index
/// in the sorted input list is the shard's rank. Shards run in parallel, each
/// with its own freshly built steps, and write `<output>/<rank:05>.<ext>`.
pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineStats> {
    tracing::info!(pipeline = %config.name, "running pipeline");
    let started = Instant::now();

    let inputs = io::expand_inputs(&config.input.paths)?;
    if inputs.is_empty() {
        anyhow::bail!("No input files matched {:?}", config.input.paths);
    }
    tracing::info!(shards = inputs.len(), steps = config.steps.len(), "resolved inputs");

    std::fs::create_dir_all(&config.output.path).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            config.output.path.display()
        )
    })?;

    let pb = ProgressBar::new(inputs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} shards ({percent}%)",
            )
            .context("Invalid progress bar template")?,
    );

    let outcomes: Vec<ShardOutcome> = inputs
        .par_iter()
        .enumerate()
        .map(|(rank, path)| {
            let outcome = run_shard(config, rank, path)
                .with_context(|| format!("Failed to process shard {} ({})", rank, path.display()))?;
            pb.inc(1);
            Ok(outcome)
        })
        .collect::<Result<_>>()?;

    pb.finish_with_message("All shards processed");

    let mut stats = PipelineStats::new(config.name.clone());
    let mut written = 0;
    for outcome in outcomes {
        written += outcome.written;
        stats.merge_shard(outcome.stats);
    }

    for step in &stats.steps {
        tracing::info!(
            step = %step.name,
            total = step.get(hints::TOTAL),
            forwarded = step.get(hints::FORWARDED),
            dropped = step.get(hints::DROPPED),
            time_ms = step.time_ms(),
            "step finished"
        );
    }

    let stats_path = config.stats_path();
    if let Some(parent) = stats_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    stats
        .write_to_file(&stats_path)
        .with_context(|| format!("Failed to write stats: {}", stats_path.display()))?;

    tracing::info!(
        documents = written,
        elapsed_ms = started.elapsed().as_millis() as u64,
        stats = %stats_path.display(),
        "pipeline completed"
    );
    Ok(stats)
}

fn run_shard(config: &PipelineConfig, rank: usize, path: &Path) -> Result<ShardOutcome> {
    let adapter = &config.input.adapter;
    let reader = io::open_reader(path, config.input.format, adapter)?;
    let source: DocumentStream<'static> = match config.input.limit {
        Some(limit) => Box::new(reader.take(limit)),
        None => Box::new(reader),
    };

    let mut pipeline = Pipeline::new(config.name.clone());
    for step in &config.steps {
        let built = create_step(step, adapter)
            .with_context(|| format!("Failed to create step: {}", step.label()))?;
        pipeline.push(built);
    }

    let output = shard_output_path(&config.output.path, rank, config.output.format);
    let mut writer = io::create_writer(&output, config.output.format, adapter)?;
    let mut written = 0;
    for doc in pipeline.run(source, rank) {
        writer.write_document(doc?)?;
        written += 1;
    }
    writer.close()?;

    tracing::debug!(rank, input = %path.display(), written, "shard finished");
    Ok(ShardOutcome {
        written,
        stats: pipeline.stats(),
    })
}

fn shard_output_path(dir: &Path, rank: usize, format: io::Format) -> PathBuf {
    dir.join(format!("{:05}.{}", rank, format.extension()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Format;

    #[test]
    fn shard_files_are_named_by_rank() {
        assert_eq!(
            shard_output_path(Path::new("out"), 7, Format::Parquet),
            PathBuf::from("out/00007.parquet")
        );
    }
}
