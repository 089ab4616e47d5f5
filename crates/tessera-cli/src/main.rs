//! Tessera CLI - git object storage and upload-pack.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tessera_storage::ObjectKind;

mod commands;
mod config;
mod logging;

use commands::CatMode;
use config::Config;
use logging::LogFormat;

/// Tessera - a git object store and upload-pack server
#[derive(Parser, Debug)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (default: ./tessera.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormat>,

    /// Repository directory
    #[arg(long, short = 'C', default_value = ".", global = true)]
    git_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize a new bare repository
    Init {
        /// Path to initialize (default: the repository directory)
        path: Option<PathBuf>,
    },

    /// Compute an object id, optionally writing the object
    HashObject {
        /// Object kind
        #[arg(short = 't', long = "type", default_value = "blob", value_parser = parse_kind)]
        kind: ObjectKind,
        /// Store the object
        #[arg(short, long)]
        write: bool,
        /// File to read (default: stdin)
        file: Option<PathBuf>,
    },

    /// Print an object's type, size or content
    CatFile {
        /// Print the object type
        #[arg(short = 't', conflicts_with_all = ["size", "pretty"])]
        kind: bool,
        /// Print the object size
        #[arg(short = 's', conflicts_with = "pretty")]
        size: bool,
        /// Pretty-print the object content
        #[arg(short = 'p')]
        pretty: bool,
        /// Object id or ref name
        object: String,
    },

    /// List refs
    ShowRef,

    /// Serve a fetch over stdin/stdout
    UploadPack {
        /// Only write the ref advertisement
        #[arg(long)]
        advertise_refs: bool,
        /// Skip the advertisement, as the second smart HTTP request does
        #[arg(long, conflicts_with = "advertise_refs")]
        stateless_rpc: bool,
        /// Never use side-band output
        #[arg(long)]
        no_side_band: bool,
        /// Repository directory (overrides --git-dir)
        directory: Option<PathBuf>,
    },

    /// Store the objects of a pack read from stdin
    UnpackObjects,
}

fn parse_kind(s: &str) -> Result<ObjectKind, String> {
    ObjectKind::parse(s).map_err(|e| e.to_string())
}

fn run(cli: Cli, mut config: Config) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::Init { path } => {
            commands::init(path.as_deref().unwrap_or(&cli.git_dir), &mut out)
        }
        Commands::HashObject { kind, write, file } => {
            match file {
                Some(file) => {
                    let mut input = std::fs::File::open(&file)?;
                    commands::hash_object(&cli.git_dir, kind, &mut input, write, &mut out)?
                }
                None => commands::hash_object(
                    &cli.git_dir,
                    kind,
                    &mut std::io::stdin().lock(),
                    write,
                    &mut out,
                )?,
            };
            Ok(())
        }
        Commands::CatFile {
            kind,
            size,
            pretty,
            object,
        } => {
            let mode = match (kind, size, pretty) {
                (true, _, _) => CatMode::Kind,
                (_, true, _) => CatMode::Size,
                (_, _, true) => CatMode::Pretty,
                _ => anyhow::bail!("one of -t, -s or -p is required"),
            };
            commands::cat_file(&cli.git_dir, &object, mode, &mut out)
        }
        Commands::ShowRef => {
            if commands::show_ref(&cli.git_dir, &mut out)? == 0 {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::UploadPack {
            advertise_refs,
            stateless_rpc,
            no_side_band,
            directory,
        } => {
            if no_side_band {
                config.side_band = false;
            }
            commands::upload_pack(
                directory.as_deref().unwrap_or(&cli.git_dir),
                config.upload_pack_options(),
                advertise_refs,
                stateless_rpc,
                std::io::stdin().lock(),
                out,
            )
        }
        Commands::UnpackObjects => {
            commands::unpack_objects(&cli.git_dir, &mut std::io::stdin().lock(), &mut out)?;
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };

    // Flags win over the file and the environment.
    match cli.verbose {
        0 => {}
        1 => config.log_level = "info".to_string(),
        2 => config.log_level = "debug".to_string(),
        _ => config.log_level = "trace".to_string(),
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    logging::init_logging(&config.log_level, config.log_format);

    if let Err(e) = run(cli, config) {
        tracing::debug!(error = ?e, "Command failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
