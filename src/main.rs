use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "manga-overlay-rust",
    version,
    about = "Translate manga and webtoon pages into positioned overlay regions"
)]
struct Cli {
    /// Page image: file path, data: URL, or http(s) reader URL
    #[arg(short = 'i', long = "image")]
    image: Option<String>,

    /// Target language (overrides settings [engine].target_language)
    #[arg(short = 'l', long = "lang")]
    lang: Option<String>,

    /// Source language hint. Use "auto" to detect.
    #[arg(short = 'L', long = "source-lang")]
    source_lang: Option<String>,

    /// Model name or provider:model (e.g. gemini:gemini-2.5-flash)
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// API key (overrides environment variables)
    #[arg(short = 'k', long = "key")]
    key: Option<String>,

    /// Scroll offset of the capture in page pixels
    #[arg(long = "scroll-offset", default_value_t = 0.0)]
    scroll_offset: f64,

    /// Viewport height of the capture in page pixels
    #[arg(long = "viewport-height")]
    viewport_height: Option<f64>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,

    /// Serve the overlay API on this address instead of scanning once
    #[arg(long = "serve", value_name = "ADDR")]
    serve: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    manga_overlay_rust::logging::init(cli.verbose)?;

    let config = manga_overlay_rust::Config {
        image: cli.image,
        lang: cli.lang,
        source_lang: cli.source_lang,
        model: cli.model,
        key: cli.key,
        scroll_offset: cli.scroll_offset,
        viewport_height: cli.viewport_height,
        settings_path: cli.read_settings,
    };

    if let Some(addr) = cli.serve {
        return manga_overlay_rust::serve(config, addr).await;
    }

    let output = manga_overlay_rust::run(config).await?;
    println!("{}", output);
    Ok(())
}
