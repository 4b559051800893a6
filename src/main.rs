mod cli;

use imgbatch::{config, pipeline::BatchResult, ArchiveResponse, PipelineOrchestrator};
use imgbatch_common::{BatchLimits, ConversionRequest, Quality, TargetFormat, UploadedImage};
use imgbatch_convert::ToolRegistry;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag.
    // Logs go to stderr so `convert -o -` can write the archive to stdout.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "imgbatch=debug,imgbatch_convert=debug,imgbatch_archive=debug,imgbatch_common=debug"
                .to_string()
        } else {
            "imgbatch=info,imgbatch_convert=warn,imgbatch_archive=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Convert {
            files,
            format,
            quality,
            output,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(convert(
                files,
                format.as_deref(),
                quality,
                output,
                cli.config.as_deref(),
            ))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("imgbatch {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn convert(
    files: Vec<PathBuf>,
    format: Option<&str>,
    quality: Option<u32>,
    output: Option<PathBuf>,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;

    let request = ConversionRequest::new(
        match format {
            Some(f) => f.parse::<TargetFormat>()?,
            None => config.defaults.format,
        },
        match quality {
            Some(q) => Quality::new(q)?,
            None => config.defaults.quality,
        },
    );

    // Limits are checked from metadata so a rejected batch is never loaded.
    let limits = config.limits.batch_limits();
    limits.check_count(files.len())?;
    let mut images = Vec::with_capacity(files.len());
    for path in &files {
        images.push(read_image(path, &limits).await?);
    }

    let orchestrator = PipelineOrchestrator::from_config(&config)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, aborting batch");
            on_interrupt.cancel();
        }
    });

    let response = ArchiveResponse::start(
        &orchestrator,
        images,
        request,
        config.archive.filename.clone(),
        cancel,
    )?;

    tracing::info!(batch_id = %response.batch_id(), files = files.len(), "Streaming archive");

    let to_stdout = output.as_deref() == Some(Path::new("-"));
    let output_path = output.unwrap_or_else(|| PathBuf::from(response.filename()));
    let (mut body, outcome) = response.into_parts();

    let streamed = async {
        let mut sink: Box<dyn AsyncWrite + Unpin + Send> = if to_stdout {
            Box::new(tokio::io::stdout())
        } else {
            let file = tokio::fs::File::create(&output_path)
                .await
                .with_context(|| format!("Failed to create output file: {:?}", output_path))?;
            Box::new(file)
        };

        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            sink.write_all(&chunk)
                .await
                .context("Failed to write archive")?;
            written += chunk.len() as u64;
        }
        sink.flush().await.context("Failed to write archive")?;
        Ok::<_, anyhow::Error>(written)
    }
    .await;

    // Dropping the body aborts a batch that is still running.
    drop(body);
    let result = outcome.wait().await;
    if let Some(result) = &result {
        print_summary(result);
    }

    match streamed {
        Ok(written) => {
            if !to_stdout {
                eprintln!("Wrote {} ({} bytes)", output_path.display(), written);
            }
            Ok(())
        }
        Err(e) => {
            if !to_stdout {
                match std::fs::remove_file(&output_path) {
                    Ok(()) => tracing::info!("Removed partial archive {:?}", output_path),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => tracing::warn!("Failed to remove partial archive {:?}: {}", output_path, err),
                }
            }
            Err(e)
        }
    }
}

async fn read_image(path: &Path, limits: &BatchLimits) -> Result<UploadedImage> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());

    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Failed to read input file: {:?}", path))?;
    limits.check_size(&filename, metadata.len())?;

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read input file: {:?}", path))?;

    // An unknown extension leaves the type empty; the bytes are sniffed later.
    let content_type = image::ImageFormat::from_path(path)
        .map(|f| f.to_mime_type())
        .unwrap_or_default();

    Ok(UploadedImage::new(bytes, filename, content_type))
}

fn print_summary(result: &BatchResult) {
    eprintln!(
        "Batch {}: {} ({}/{} converted)",
        result.batch_id,
        result.state,
        result.succeeded(),
        result.jobs.len()
    );
    for job in &result.jobs {
        match (job.entry(), job.error()) {
            (Some(entry), _) => eprintln!(
                "  ✓ {} -> {} ({} bytes)",
                job.filename, entry.name, entry.uncompressed_size
            ),
            (None, Some(err)) => eprintln!("  ✗ {}", err),
            (None, None) => eprintln!("  - {}", job.filename),
        }
    }
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let tools = ToolRegistry::discover(&config.converter).check_all();

    for tool in &tools {
        let status = if tool.available { "✓" } else { "✗" };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if imgbatch_convert::resolve_program(&config.converter.program).is_ok() {
        println!("Converter '{}' is available!", config.converter.program);
    } else {
        println!(
            "Converter '{}' is missing. Install ImageMagick or set [converter] program.",
            config.converter.program
        );
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    println!("  Converter: {} {}", config.converter.program, config.converter.args.join(" "));
    println!("  Timeout: {}s", config.converter.timeout.as_secs());
    println!(
        "  Limits: {} files, {} bytes per file, {} concurrent",
        config.limits.max_files, config.limits.max_file_bytes, config.limits.max_concurrent_jobs
    );
    println!(
        "  Archive: {} (compression level {})",
        config.archive.filename, config.archive.compression_level
    );
    println!(
        "  Defaults: format {}, quality {}",
        config.defaults.format, config.defaults.quality
    );
    tracing::debug!("Effective config:\n{}", config::render_config(&config)?);

    Ok(())
}
