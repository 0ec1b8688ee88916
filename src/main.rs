use ai_topic_shorts::generator::{run_generation, RunOptions};
use ai_topic_shorts::init;
use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "ai-topic-shorts")]
#[command(about = "Turn a topic title into a narrated short video", long_about = None)]
struct Args {
    /// First title id to process (inclusive)
    #[arg(long, default_value_t = 1)]
    from: u32,

    /// Last title id to process (inclusive); defaults to --from
    #[arg(long)]
    to: Option<u32>,

    /// Skip image generation (use existing images)
    #[arg(long)]
    skip_images: bool,

    /// Ask on stdin which motion effect to use for each scene
    #[arg(long)]
    interactive_effects: bool,

    /// Path to the config file
    #[arg(long, default_value = "config.json")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    init::ensure_directories().await?;

    if !init::check_ffmpeg().await {
        eprintln!("[WARNING] FFmpeg not found in PATH. Please install FFmpeg.");
    }

    let opts = RunOptions {
        from_id: args.from,
        to_id: args.to.unwrap_or(args.from),
        skip_images: args.skip_images,
        interactive_effects: args.interactive_effects,
        config_path: args.config,
    };

    let code = run_generation(opts).await?;
    std::process::exit(code);
}
