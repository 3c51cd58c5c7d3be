use std::io::{self, Cursor, Read, Write};
use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::{Parser, Subcommand};

use catalog::GameCatalog;

#[derive(Parser, Debug)]
#[command(name = "megasd", version, about = "Terraonion MegaSD management utility")]
struct Cli {
    /// Path to the screenshot catalog
    #[arg(long, env = "MEGASD_DB", default_value = "megasd.db", global = true)]
    db: PathBuf,

    /// Increase verbosity
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Convert a PNG image on stdin to MegaSD tile format on stdout
    Encode,
    /// Convert a MegaSD tile stream on stdin back to PNG on stdout
    Decode,
    /// Build the screenshot catalog from a CSV manifest
    Import { manifest: PathBuf },
    /// Scan a directory tree and write a games.dbs per directory
    Scan {
        dir: PathBuf,
        /// Number of directory workers
        #[arg(long, default_value_t = scanner::DEFAULT_WORKERS)]
        workers: usize,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if let Err(err) = run(cli) {
        eprintln!("megasd: {err:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Encode => {
            let mut input = Vec::new();
            io::stdin().read_to_end(&mut input).context("reading stdin")?;
            let img = image::load_from_memory_with_format(&input, image::ImageFormat::Png)
                .context("decoding PNG")?
                .to_rgba8();

            let mut out = Vec::new();
            tile::encode(&mut out, &img)?;
            io::stdout().write_all(&out).context("writing stdout")?;
        }
        Commands::Decode => {
            let mut input = Vec::new();
            io::stdin().read_to_end(&mut input).context("reading stdin")?;
            let img = tile::decode(input.as_slice())?;

            let mut out = Vec::new();
            img.to_rgba()
                .write_to(&mut Cursor::new(&mut out), image::ImageOutputFormat::Png)
                .context("encoding PNG")?;
            io::stdout().write_all(&out).context("writing stdout")?;
        }
        Commands::Import { manifest } => {
            let mut catalog = GameCatalog::open(&cli.db)
                .with_context(|| format!("opening {}", cli.db.display()))?;
            let stats = catalog
                .import_csv(&manifest)
                .with_context(|| format!("importing {}", manifest.display()))?;
            catalog.save()?;
            println!(
                "imported {} games, {} screenshots, {} checksums",
                stats.games, stats.screenshots, stats.checksums
            );
        }
        Commands::Scan { dir, workers } => {
            let catalog = GameCatalog::open(&cli.db)
                .with_context(|| format!("opening {}", cli.db.display()))?;
            scanner::scan(&dir, &catalog, workers)
                .with_context(|| format!("scanning {}", dir.display()))?;
        }
    }

    Ok(())
}
