//! image-upload - send a disk image to an image transfer endpoint
//!
//! Negotiates optional server features, then uploads data ranges with PUT
//! and, when the server can zero ranges, turns holes into PATCH requests.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Instant;

use image_upload::cli::Args;
use image_upload::config::load_config;
use image_upload::logger::{Logger, NoopLogger, TextLogger};
use image_upload::upload_image;

fn main() -> Result<()> {
    // Set up Ctrl-C handler
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
        // Exit immediately with 130 (128 + SIGINT)
        std::process::exit(130);
    })
    .context("Error setting Ctrl-C handler")?;

    let args = Args::parse();
    let file_cfg = load_config(args.config.as_deref())?;
    let opts = args.to_options(&file_cfg);

    // Choose logger once; NoopLogger unless --log-file
    let logger: Arc<dyn Logger> = if let Some(ref p) = args.log_file {
        match TextLogger::new(p) {
            Ok(l) => Arc::new(l),
            Err(e) => {
                eprintln!("Warning: cannot open log file {}: {}", p.display(), e);
                Arc::new(NoopLogger)
            }
        }
    } else {
        Arc::new(NoopLogger)
    };

    if args.verbose {
        eprintln!("image-upload {}", env!("CARGO_PKG_VERSION"));
        eprintln!("Source: {}", opts.source.display());
        eprintln!("Destination: {}", opts.url);
        eprintln!(
            "CA file: {}",
            opts.ca_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".into())
        );
        eprintln!("Block size: {} bytes", opts.block_size);
        eprintln!(
            "Timeouts: connect {}s, read {}s",
            opts.connect_timeout.as_secs(),
            opts.read_timeout.as_secs()
        );
        eprintln!("Unix socket: {}", if opts.use_unix_socket { "allowed" } else { "disabled" });
    }

    let progress = if args.progress {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let start = Instant::now();
    let result = rt.block_on(upload_image(&opts, progress.as_ref(), logger.as_ref()));
    if let Some(pb) = &progress {
        pb.finish_and_clear();
    }

    let stats = match result {
        Ok(s) => s,
        Err(e) => {
            logger.error("upload", &e.to_string());
            return Err(e).with_context(|| format!("upload of {} failed", opts.source.display()));
        }
    };

    let elapsed = start.elapsed().as_secs_f64();
    let total = stats.bytes_sent + stats.bytes_zeroed;
    println!(
        "Uploaded {:.2} MiB ({:.2} MiB sent, {:.2} MiB zeroed) in {} requests, {:.2}s ({:.1} MiB/s)",
        total as f64 / 1_048_576.0,
        stats.bytes_sent as f64 / 1_048_576.0,
        stats.bytes_zeroed as f64 / 1_048_576.0,
        stats.ops,
        elapsed,
        if elapsed > 0.0 { total as f64 / elapsed / 1_048_576.0 } else { 0.0 }
    );
    Ok(())
}
