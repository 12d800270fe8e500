//! Binary entry point for the syncdb administrative CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use syncdb::{
    admin::{
        export_jsonl, import_jsonl, open_lowlevel, repair, stats, verify, AdminOpenOptions,
        DumpReport, RepairReport, StatsReport, VerifyLevel, VerifyReport,
    },
    cli::{install_tracing_subscriber, CliConfig},
    storage::{schema_info, SchemaInfo},
};

#[derive(Parser, Debug)]
#[command(
    name = "syncdb",
    version,
    about = "Administrative CLI for the syncdb metadata database",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(long, global = true, value_name = "FILE", help = "CLI config file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Print per-folder and per-device counters")]
    Stats {
        #[arg(value_name = "DB")]
        db_path: Option<PathBuf>,
    },

    #[command(about = "Check indexes and counters against the records")]
    Verify {
        #[arg(value_name = "DB")]
        db_path: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = VerifyLevelArg::Full)]
        level: VerifyLevelArg,
    },

    #[command(about = "Migrate, recompute every folder and collect garbage")]
    Repair {
        #[arg(value_name = "DB")]
        db_path: Option<PathBuf>,
    },

    #[command(about = "Write every key as JSON lines")]
    Dump {
        #[arg(value_name = "DB")]
        db_path: Option<PathBuf>,

        #[arg(long, value_name = "FILE", help = "Output file (default stdout)")]
        out: Option<PathBuf>,
    },

    #[command(about = "Write keys from a JSON-lines dump")]
    Load {
        #[arg(value_name = "DB")]
        db_path: Option<PathBuf>,

        #[arg(long, value_name = "FILE", help = "Input file (default stdin)")]
        input: Option<PathBuf>,

        #[arg(long, help = "Create the database if it does not exist")]
        create: bool,
    },

    #[command(about = "Show the stored schema version")]
    Schema {
        #[arg(value_name = "DB")]
        db_path: Option<PathBuf>,

        #[arg(long, help = "Migrate to the supported version first")]
        migrate: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum VerifyLevelArg {
    Fast,
    Full,
}

impl From<VerifyLevelArg> for VerifyLevel {
    fn from(value: VerifyLevelArg) -> Self {
        match value {
            VerifyLevelArg::Fast => VerifyLevel::Fast,
            VerifyLevelArg::Full => VerifyLevel::Full,
        }
    }
}

fn main() {
    install_tracing_subscriber();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32, Box<dyn Error>> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.clone())?;
    let mut open_opts = AdminOpenOptions {
        db: config.db_options().clone(),
        ..AdminOpenOptions::default()
    };
    let resolve = |explicit: Option<PathBuf>| -> Result<PathBuf, Box<dyn Error>> {
        explicit
            .or_else(|| config.default_db_path().cloned())
            .ok_or_else(|| "no database given and no default configured".into())
    };

    match cli.command {
        Command::Stats { db_path } => {
            let report = stats(resolve(db_path)?, &open_opts)?;
            emit(cli.format, &report, || print_stats_text(&report))?;
        }
        Command::Verify { db_path, level } => {
            let report = verify(resolve(db_path)?, &open_opts, level.into())?;
            emit(cli.format, &report, || print_verify_text(&report))?;
            if !report.success {
                return Ok(2);
            }
        }
        Command::Repair { db_path } => {
            let report = repair(resolve(db_path)?, &open_opts)?;
            emit(cli.format, &report, || print_repair_text(&report))?;
        }
        Command::Dump { db_path, out } => {
            let db_path = resolve(db_path)?;
            let report = match out {
                Some(path) => export_jsonl(&db_path, &open_opts, BufWriter::new(File::create(path)?))?,
                None => export_jsonl(&db_path, &open_opts, BufWriter::new(io::stdout().lock()))?,
            };
            print_dump_summary("Dumped", &report);
        }
        Command::Load {
            db_path,
            input,
            create,
        } => {
            open_opts.create_if_missing = create;
            let db_path = resolve(db_path)?;
            let report = match input {
                Some(path) => import_jsonl(&db_path, &open_opts, BufReader::new(File::open(path)?))?,
                None => import_jsonl(&db_path, &open_opts, io::stdin().lock())?,
            };
            print_dump_summary("Loaded", &report);
        }
        Command::Schema { db_path, migrate } => {
            open_opts.db.migrate_on_open = migrate;
            let db = open_lowlevel(&resolve(db_path)?, &open_opts)?;
            let info = schema_info(&db)?;
            emit(cli.format, &info, || print_schema_text(&info))?;
        }
    }
    Ok(0)
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_stats_text(report: &StatsReport) {
    println!(
        "Database: path={} size={} schema={}/{}",
        report.filesystem.db_path,
        report.filesystem.db_size_bytes,
        report.schema.version,
        report.schema.supported
    );
    for folder in &report.folders {
        println!();
        println!(
            "Folder {:?}{}: global files={} dirs={} symlinks={} deleted={} bytes={}",
            folder.folder,
            if folder.recomputed { " (recomputed)" } else { "" },
            folder.global.files,
            folder.global.directories,
            folder.global.symlinks,
            folder.global.deleted,
            folder.global.bytes
        );
        for device in &folder.devices {
            println!(
                "  {} seq={} index_id={}",
                device.device, device.sequence, device.index_id
            );
            for c in &device.counts {
                println!(
                    "    flags=0x{:x} files={} dirs={} symlinks={} deleted={} bytes={}",
                    c.local_flags, c.files, c.directories, c.symlinks, c.deleted, c.bytes
                );
            }
        }
    }
}

fn print_verify_text(report: &VerifyReport) {
    println!(
        "Verify ({:?}) => success={} folders={} records={} global_lists={} sequence_entries={}",
        report.level,
        report.success,
        report.counts.folders,
        report.counts.records,
        report.counts.global_lists,
        report.counts.sequence_entries,
    );
    for finding in &report.findings {
        match &finding.folder {
            Some(folder) => println!("- {:?} [{folder}]: {}", finding.severity, finding.message),
            None => println!("- {:?}: {}", finding.severity, finding.message),
        }
    }
}

fn print_repair_text(report: &RepairReport) {
    for f in &report.folders {
        println!(
            "Folder {:?}: records={} globals(added={} rebuilt={} dropped={} refreshed={} deleted_lists={}) \
             sequences(created={} overwritten={} renumbered={} orphans={})",
            f.folder,
            f.records,
            f.globals.added,
            f.globals.rebuilt,
            f.globals.dropped,
            f.globals.refreshed,
            f.globals.deleted_lists,
            f.sequences.created,
            f.sequences.overwritten,
            f.sequences.renumbered,
            f.sequences.orphans
        );
    }
    println!(
        "Garbage collected {} keys of {} folders; {} fixes in total",
        report.gc.keys_deleted,
        report.gc.folders.len(),
        report.fixes()
    );
}

// Dumps own stdout, so summaries go to stderr.
fn print_dump_summary(verb: &str, report: &DumpReport) {
    eprintln!("{verb} {} pairs", report.pairs);
}

fn print_schema_text(info: &SchemaInfo) {
    println!(
        "Schema version {} (supported {}), minimum software version {}",
        info.version,
        info.supported,
        info.min_version.as_deref().unwrap_or("unset")
    );
}
