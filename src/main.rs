use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use log::{error, info};
use scrapy_lab::config_adapters::create_engine;
use scrapy_lab::pipeline::FeedFormat;
use scrapy_lab::settings::{Settings, SettingsError};
use scrapy_lab::spiders::{create_spider, SPIDER_NAMES};
use serde_json::Value;
use tokio::runtime::Runtime;

/// Settings file picked up from the working directory when `-s` is not given
const DEFAULT_SETTINGS_FILE: &str = "settings.py";

#[derive(Parser)]
#[command(
    name = "scrapy-lab",
    about = "Scrapy-style spiders that fetch pages through the Zyte API",
    version,
    long_about = None
)]
struct Cli {
    /// Settings file (.py, .toml, .json)
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a spider
    #[command(name = "crawl")]
    Crawl {
        /// Name of the spider to run
        name: String,

        /// Output file for scraped items
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Format of the output file (json, jsonlines); guessed from the
        /// file extension when omitted
        #[arg(long)]
        format: Option<String>,

        /// Override a setting, e.g. --set CLOSESPIDER_ITEMCOUNT=10
        #[arg(long = "set", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
    },

    /// List available spiders
    #[command(name = "list")]
    List,

    /// Show one setting, or all of them
    #[command(name = "settings")]
    Settings {
        /// Name of the setting
        name: Option<String>,
    },

    /// Show version information
    #[command(name = "version")]
    Version,
}

fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = load_settings(cli.settings.as_deref());
    init_logger(&settings);

    match cli.command {
        Commands::Crawl {
            name,
            output,
            format,
            overrides,
        } => {
            crawl(settings, &name, output.as_deref(), format.as_deref(), &overrides);
        }
        Commands::List => {
            list_spiders();
        }
        Commands::Settings { name } => {
            show_settings(settings, name.as_deref());
        }
        Commands::Version => {
            show_version();
        }
    }
}

/// `LOG_LEVEL` from the environment or the settings file sets the default
/// filter; `RUST_LOG` still wins
fn init_logger(settings: &Settings) {
    let level = std::env::var("LOG_LEVEL")
        .ok()
        .unwrap_or_else(|| settings.get_or("LOG_LEVEL", "info".to_string()))
        .to_lowercase();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn load_settings(settings_path: Option<&Path>) -> Settings {
    let path = match settings_path {
        Some(path) => path,
        None if Path::new(DEFAULT_SETTINGS_FILE).exists() => Path::new(DEFAULT_SETTINGS_FILE),
        None => return Settings::default(),
    };

    match Settings::from_file(path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error loading settings from {}: {}", path.display(), e);
            process::exit(1);
        }
    }
}

fn parse_overrides(assignments: &[String]) -> HashMap<String, Value> {
    let mut overrides = Settings::new();
    for assignment in assignments {
        if let Err(e) = overrides.set_from_str(assignment) {
            eprintln!("Error in --set {}: {}", assignment, e);
            process::exit(2);
        }
    }
    overrides.all().clone()
}

fn feed_output(output: Option<&Path>, format: Option<&str>) -> Option<(PathBuf, FeedFormat)> {
    let path = output?;
    let format = match format {
        Some(format) => match format.parse::<FeedFormat>() {
            Ok(format) => format,
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(2);
            }
        },
        None => FeedFormat::from_path(path),
    };
    Some((path.to_path_buf(), format))
}

fn crawl(
    mut settings: Settings,
    name: &str,
    output: Option<&Path>,
    format: Option<&str>,
    overrides: &[String],
) {
    let overrides = parse_overrides(overrides);
    settings.merge(&overrides);

    let spider = match create_spider(name, &settings) {
        Ok(Some(spider)) => spider,
        Ok(None) => {
            eprintln!("Error: spider '{}' not found. Run `scrapy-lab list`.", name);
            process::exit(1);
        }
        Err(e) => {
            eprintln!("Error creating spider '{}': {}", name, e);
            process::exit(1);
        }
    };

    // Project settings < spider custom settings < command line
    let mut settings = settings.with_overrides(&spider.settings());
    settings.merge(&overrides);
    settings.load_env();

    let feed = feed_output(output, format);
    let mut engine = match create_engine(
        spider,
        &settings,
        feed.as_ref().map(|(path, format)| (path.as_path(), *format)),
    ) {
        Ok(engine) => engine,
        Err(e @ SettingsError::MissingSetting(_)) => {
            eprintln!("Error: {}", e);
            eprintln!();
            eprintln!("Troubleshooting:");
            eprintln!("  1. Create a .env file next to Cargo.toml containing ZYTE_API_KEY=<your key>");
            eprintln!("  2. Or export ZYTE_API_KEY in your shell");
            eprintln!("  3. Or run without the Zyte API: --set 'ADDONS={{}}'");
            process::exit(1);
        }
        Err(e) => {
            eprintln!("Error configuring the crawl: {}", e);
            process::exit(1);
        }
    };

    info!("Running spider '{}'", name);
    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error starting the runtime: {}", e);
            process::exit(1);
        }
    };

    match runtime.block_on(engine.run()) {
        Ok(stats) => {
            if settings.get_or("LOG_STATS", true) {
                println!("Crawl finished: {}", stats);
            }
            if let Some((path, _)) = feed {
                println!("Items written to {}", path.display());
            }
        }
        Err(e) => {
            error!("Crawl failed: {}", e);
            process::exit(1);
        }
    }
}

fn list_spiders() {
    for (name, description) in SPIDER_NAMES {
        println!("{:<22} {}", name, description);
    }
}

fn show_settings(mut settings: Settings, name: Option<&str>) {
    settings.load_env();

    match name {
        Some(name) => match settings.get::<Value>(name) {
            Ok(value) => println!("{} = {}", name, value),
            Err(e) => {
                eprintln!("Error getting setting: {}", e);
                process::exit(1);
            }
        },
        None => {
            for key in settings.sorted_keys() {
                let value = if key == "ZYTE_API_KEY" {
                    Value::String("********".to_string())
                } else {
                    settings.all()[key].clone()
                };
                println!("{} = {}", key, value);
            }
        }
    }
}

fn show_version() {
    println!("scrapy-lab version {}", env!("CARGO_PKG_VERSION"));
}
