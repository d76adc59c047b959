mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use vn_av::{FfmpegEngine, MediaEngine, ToolRegistry};
use vn_core::config::Config;
use vn_core::Method;
use vn_pipeline::{Analysis, Normalizer, WorkerPool};
use walkdir::WalkDir;

/// Extensions picked up when walking directories.
const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mov", "mkv", "webm", "avi", "ts", "m2ts", "flv", "wmv", "mpg", "mpeg",
];

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults from the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "vidnorm=trace,vn_pipeline=trace,vn_av=debug".to_string()
        } else {
            "vidnorm=info,vn_pipeline=info,vn_av=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Analyze { file, json } => {
            let config = Config::load_or_default(cli.config.as_deref());
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(analyze_file(&config, &file, json))
        }
        Commands::Normalize {
            inputs,
            concurrency,
            timeout,
            output_dir,
        } => {
            let mut config = Config::load_or_default(cli.config.as_deref());
            if let Some(n) = concurrency {
                config.pipeline.concurrency = n;
            }
            if let Some(secs) = timeout {
                config.pipeline.job_timeout_secs = Some(secs);
            }
            if output_dir.is_some() {
                config.pipeline.output_dir = output_dir;
            }
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(normalize_files(config, &inputs))
        }
        Commands::CheckTools => {
            let config = Config::load_or_default(cli.config.as_deref());
            check_tools(&config)
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("vidnorm {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn engine_for(config: &Config) -> Arc<dyn MediaEngine> {
    Arc::new(FfmpegEngine::from_config(&config.tools))
}

async fn analyze_file(config: &Config, file: &Path, json: bool) -> Result<()> {
    let normalizer = Normalizer::new(engine_for(config), config);
    let analysis = normalizer.analyze_video(file).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
    } else {
        print_analysis(&analysis);
    }
    Ok(())
}

fn print_analysis(a: &Analysis) {
    println!("File: {}", a.path().display());
    println!("Container: {}", a.container());
    if let Some(secs) = a.duration_seconds() {
        let secs = secs as u64;
        println!("Duration: {:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60);
    }
    if let Some(res) = a.resolution() {
        println!("Resolution: {res}");
    }
    if let Some(codec) = a.video_codec_name() {
        print!("Video: {codec}");
        if let Some(profile) = a.video_profile() {
            print!(" ({profile})");
        }
        println!();
    }
    if let Some(codec) = a.audio_codec_name() {
        print!("Audio: {codec}");
        if let Some(profile) = a.audio_profile() {
            print!(" ({profile})");
        }
        println!();
    }
    let order: Vec<String> = a.stream_order().iter().map(|k| k.to_string()).collect();
    println!("Stream order: {}", order.join(", "));

    println!("\nIssues: {}", a.issues().len());
    for issue in a.issues() {
        println!("  [{}] {}: {}", issue.severity, issue.kind, issue.description);
    }
    println!("\nMethod: {}", a.method());
}

/// Expand directories into the media files below them, skipping outputs of
/// earlier runs.
fn collect_inputs(inputs: &[PathBuf], suffix: &str) -> Vec<PathBuf> {
    let marker = format!(".{suffix}.");
    let is_media = |p: &Path| {
        p.extension()
            .and_then(|e| e.to_str())
            .map(|e| MEDIA_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    };
    let is_output = |p: &Path| {
        p.file_name()
            .map(|n| n.to_string_lossy().contains(&marker))
            .unwrap_or(false)
    };

    let mut files = Vec::new();
    for input in inputs {
        if !input.is_dir() {
            // Explicit files are taken as given; the prober reports bad ones.
            files.push(input.clone());
            continue;
        }
        for entry in WalkDir::new(input)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if entry.file_type().is_file() && is_media(path) && !is_output(path) {
                files.push(path.to_path_buf());
            }
        }
    }
    files
}

async fn normalize_files(config: Config, inputs: &[PathBuf]) -> Result<()> {
    for warning in config.validate() {
        tracing::warn!("config: {warning}");
    }

    let files = collect_inputs(inputs, &config.pipeline.output_suffix);
    if files.is_empty() {
        anyhow::bail!("No media files found");
    }

    let normalizer = Normalizer::new(engine_for(&config), &config);
    let pool = WorkerPool::from_config(normalizer, &config.pipeline);
    let outcomes = pool.run_batch(files).await;
    pool.shutdown().await;

    let (mut converted, mut unchanged, mut failed) = (0usize, 0usize, 0usize);
    for outcome in &outcomes {
        match &outcome.result {
            Ok(result) if result.method_used == Method::None => {
                unchanged += 1;
                println!("ok    {} (already compatible)", outcome.path.display());
            }
            Ok(result) => {
                converted += 1;
                let fallback = if result.fell_back { ", fell back" } else { "" };
                println!(
                    "fixed {} -> {} ({}{})",
                    outcome.path.display(),
                    result.output_path.display(),
                    result.method_used,
                    fallback
                );
            }
            Err(e) => {
                failed += 1;
                println!("FAIL  {}: {}", outcome.path.display(), e);
            }
        }
    }

    println!("\n{converted} normalized, {unchanged} unchanged, {failed} failed");
    if failed > 0 {
        anyhow::bail!("{failed} file(s) failed");
    }
    Ok(())
}

fn check_tools(config: &Config) -> Result<()> {
    println!("Checking external tools...\n");

    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install ffmpeg to normalize files.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read {}", p.display()))?;
            Config::from_json(&contents)?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("✓ Configuration is valid");
    } else {
        println!("Configuration loaded with {} warning(s):", warnings.len());
        for w in &warnings {
            println!("  - {w}");
        }
    }
    println!("  Target: {} in {}", config.conversion.target_video_codec, config.policy.target_container);
    println!("  Workers: {}", config.pipeline.workers());
    if let Some(secs) = config.pipeline.job_timeout_secs {
        println!("  Job timeout: {secs}s");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_walks_directories_and_skips_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("season1");
        std::fs::create_dir(&nested).unwrap();
        for name in ["a.mkv", "b.MP4", "notes.txt", "a.normalized.mp4"] {
            std::fs::write(nested.join(name), b"x").unwrap();
        }

        let files = collect_inputs(&[dir.path().to_path_buf()], "normalized");
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.mkv", "b.MP4"]);
    }

    #[test]
    fn explicit_files_pass_through() {
        let files = collect_inputs(&[PathBuf::from("/nope/clip.mkv")], "normalized");
        assert_eq!(files, vec![PathBuf::from("/nope/clip.mkv")]);
    }
}
