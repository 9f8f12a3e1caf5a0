use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use placeholdr::backend::FileBackend;
use placeholdr::download::FileDispatcher;
use placeholdr::{sanitize_dimension, AddOptions, App, Config, Preset};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "placeholdr", version, about = "Placeholder image downloads with shared size presets")]
struct Cli {
    /// Storage file shared by every instance
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage saved sizes
    #[command(subcommand)]
    Presets(PresetCommand),

    /// Download a placeholder image
    Download {
        width: String,
        height: String,
        /// png, jpg/jpeg or webp (anything else means png)
        #[arg(long, short)]
        format: Option<String>,
        /// Directory to save into
        #[arg(long, short, default_value = ".")]
        out: PathBuf,
    },

    /// Print the preset list whenever any instance changes it
    Watch,
}

#[derive(Subcommand)]
enum PresetCommand {
    List,
    Add { width: String, height: String },
    #[command(allow_negative_numbers = true)]
    Remove { index: i64 },
    /// Replace a preset, e.g. `edit 0 300x200`
    Edit { index: usize, size: String },
    /// Print the size stored at an index
    Apply { index: usize },
}

fn default_store_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("placeholdr").join("storage.json"))
}

fn print_presets(presets: &[Preset]) {
    if presets.is_empty() {
        println!("(no presets)");
    }
    for (i, p) in presets.iter().enumerate() {
        println!("{:>3}: {}", i, p);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    let store_path = cli
        .store
        .clone()
        .or_else(default_store_path)
        .context("no config directory available, pass --store")?;

    let backend = FileBackend::open(&store_path)
        .await
        .with_context(|| format!("opening {}", store_path.display()))?;
    let _watcher = backend.spawn_watcher(config.poll_interval());

    let out_dir = match &cli.command {
        Command::Download { out, .. } => out.clone(),
        _ => PathBuf::from("."),
    };
    let dispatcher = Arc::new(FileDispatcher::new(out_dir, &config)?);
    let app = App::start(config, Arc::new(backend), dispatcher.clone()).await?;
    let store = app.store();

    match cli.command {
        Command::Presets(PresetCommand::List) => print_presets(store.presets().as_slice()),
        Command::Presets(PresetCommand::Add { width, height }) => {
            let (Some(w), Some(h)) = (sanitize_dimension(&width), sanitize_dimension(&height)) else {
                bail!("Enter a width and height first.");
            };
            store.on_duplicate(|p| eprintln!("The {}x{} preset already exists.", p.w, p.h));
            if store.add(w, h, AddOptions::notify_duplicate()).await {
                print_presets(store.presets().as_slice());
            }
        }
        Command::Presets(PresetCommand::Remove { index }) => {
            // Negative or out-of-range indices are ignored
            if let Ok(index) = usize::try_from(index) {
                store.remove(index).await;
            }
            print_presets(store.presets().as_slice());
        }
        Command::Presets(PresetCommand::Edit { index, size }) => {
            let preset: Preset = size
                .parse()
                .map_err(|_| anyhow!("Invalid format. Example: 300x200"))?;
            store.edit(index, preset).await?;
            print_presets(store.presets().as_slice());
        }
        Command::Presets(PresetCommand::Apply { index }) => {
            let p = store.apply(index)?;
            println!("{} {}", p.w, p.h);
            println!("{}", placeholdr::image_url(&app.config().image_service_base, p.w, p.h)?);
        }
        Command::Download {
            width,
            height,
            format,
            ..
        } => {
            let w = sanitize_dimension(&width).unwrap_or(0);
            let h = sanitize_dimension(&height).unwrap_or(0);
            let id = app
                .submit_download(w, h, format.as_deref())
                .await
                .map_err(|notice| anyhow!(notice))?;
            match dispatcher.path_of(id) {
                Some(path) => println!("Saved {}", path.display()),
                None => println!("Download {} started", id),
            }
        }
        Command::Watch => {
            print_presets(store.presets().as_slice());
            store.on_render(|presets| {
                println!("--");
                print_presets(presets);
            });
            tokio::signal::ctrl_c().await?;
        }
    }

    Ok(())
}
