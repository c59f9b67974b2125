use anyhow::Result;
use log::LevelFilter;
use std::sync::Arc;

use ladder_dl::cli::{render_outcome, render_progress, Cli, Commands, DownloadArgs};
use ladder_dl::core::diagnostics::SystemDoctor;
use ladder_dl::core::{config, init_logger, log_cookies_configuration};
use ladder_dl::download::{
    layers_for, list_strategies, DownloadQueue, Engine, EngineConfig, Mode, ProgressCallback, ProgressUpdate,
    QualityTier, YtDlpBackend,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    let level = if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    init_logger(&config::LOG_FILE_PATH, level)?;

    match cli.command {
        Commands::Download(args) => run_download(args).await,
        Commands::Strategies => {
            print_strategies();
            Ok(())
        }
        Commands::Ladder { quality, audio } => {
            print_ladder(quality, audio);
            Ok(())
        }
        Commands::Doctor => run_doctor().await,
    }
}

async fn run_download(args: DownloadArgs) -> Result<()> {
    let configuration = args.to_configuration()?;
    log_cookies_configuration();

    let backend = YtDlpBackend::default().with_cookies(args.cookie_source());
    let engine = Engine::new(Arc::new(backend), EngineConfig::default());
    let progress: ProgressCallback = Arc::new(|update: &ProgressUpdate| {
        if let Some(line) = render_progress(update) {
            eprint!("\r{}", line);
            if update.percent.is_some_and(|p| p >= 100.0) {
                eprintln!();
            }
        }
    });

    let queue = Arc::new(DownloadQueue::new(Arc::new(engine), configuration.concurrency).with_progress(progress));
    for url in &args.urls {
        if queue.add_reference(url, configuration.clone()).await.is_empty() {
            log::warn!("Skipping {}", url);
        }
    }

    let cancel = queue.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Ctrl-C received, cancelling downloads");
            cancel.cancel();
        }
    });

    let summary = Arc::clone(&queue).run().await;
    for (reference, outcome) in &summary.outcomes {
        print!("{}", render_outcome(reference, outcome));
    }
    println!(
        "{} completed, {} failed, {} cancelled",
        summary.completed, summary.failed, summary.cancelled
    );

    if summary.failed > 0 {
        anyhow::bail!("{} of {} downloads failed", summary.failed, summary.total());
    }
    Ok(())
}

fn print_strategies() {
    for (i, strategy) in list_strategies().iter().enumerate() {
        println!("{}. {:<16} {}", i + 1, strategy.name, strategy.description);
        for (key, value) in &strategy.options {
            println!("   {} = {}", key, value);
        }
    }
}

fn print_ladder(quality: QualityTier, audio: bool) {
    let mode = if audio { Mode::Audio } else { Mode::Video };
    println!("{} ladder ({}):", mode, quality.as_str());
    for layer in layers_for(mode, quality) {
        println!("{}. {:<28} {}", layer.rank, layer.label, layer.selector);
    }
}

async fn run_doctor() -> Result<()> {
    let report = SystemDoctor::default().run_diagnostics().await;

    let show = |name: &str, value: &Option<String>| match value {
        Some(v) => println!("✅ {:<12} {}", name, v),
        None => println!("❌ {:<12} not found", name),
    };
    show("yt-dlp", &report.ytdlp);
    show("ffmpeg", &report.ffmpeg);
    show("JS runtime", &report.js_runtime);

    if !report.is_healthy() {
        anyhow::bail!("missing: {}", report.missing_criticals().join(", "));
    }
    Ok(())
}
