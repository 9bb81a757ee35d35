//! rbtask command line.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::Value;

use rbtask::batch::{BatchContext, materialize};
use rbtask::config::ClientConfig;
use rbtask::format::{
    Dataset, ExportOptions, ExportResult, FormatRegistry, ImportOptions, WarningSeverity,
};
use rbtask::model::Task;
use rbtask::segmentation::MaskCodecRegistry;
use rbtask::taxonomy::Taxonomy;
use rbtask::transport::{LocalDirectory, TaskFilter, TaskSource, TaxonomySource};

type CliResult = Result<bool, Box<dyn std::error::Error>>;

/// Command-line arguments
#[derive(Parser)]
#[command(name = "rbtask", version)]
#[command(about = "Validate and convert annotation tasks")]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse task JSON and check it against a taxonomy
    Validate {
        /// Task JSON file (one task or an array)
        tasks: PathBuf,

        /// Taxonomy JSON file
        #[arg(long)]
        taxonomy: PathBuf,
    },

    /// Export the tasks of a local store
    Export {
        /// Store directory (tasks/, taxonomy.json, blobs)
        store: PathBuf,

        /// Output format: native, coco, or png (defaults to the config)
        #[arg(short, long)]
        format: Option<String>,

        /// Output file or directory
        #[arg(short, long)]
        out: PathBuf,

        /// Project whose taxonomy to use (defaults to the profile)
        #[arg(long)]
        project: Option<String>,

        /// Only tasks in this stage
        #[arg(long)]
        stage: Option<String>,

        /// Rasterize shapes of series without segmentation
        #[arg(long)]
        rasterize: bool,
    },

    /// Convert a COCO file to native task JSON
    ImportCoco {
        /// COCO JSON file
        coco: PathBuf,

        /// Taxonomy JSON file
        #[arg(long)]
        taxonomy: PathBuf,

        /// Output task JSON file
        #[arg(short, long)]
        out: PathBuf,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match ClientConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => ClientConfig::load_from_default_path().unwrap_or_default(),
    };

    let mut level = config.preferences.log_level;
    for _ in 0..args.verbose {
        level = level.more_verbose();
    }
    env_logger::Builder::new()
        .filter_level(level.to_level_filter())
        .parse_default_env()
        .init();

    let outcome = match args.command {
        Command::Validate { tasks, taxonomy } => validate(&tasks, &taxonomy),
        Command::Export {
            store,
            format,
            out,
            project,
            stage,
            rasterize,
        } => export(&config, &store, format, &out, project, stage, rasterize),
        Command::ImportCoco {
            coco,
            taxonomy,
            out,
        } => import_coco(&coco, &taxonomy, &out),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn load_taxonomy(path: &Path) -> Result<Taxonomy, Box<dyn std::error::Error>> {
    Ok(Taxonomy::from_json(&std::fs::read_to_string(path)?)?)
}

fn validate(tasks: &Path, taxonomy: &Path) -> CliResult {
    let taxonomy = load_taxonomy(taxonomy)?;
    let value: Value = serde_json::from_str(&std::fs::read_to_string(tasks)?)?;
    let raw = match value {
        Value::Array(tasks) => tasks,
        task => vec![task],
    };

    let mut failed = 0;
    for (index, value) in raw.iter().enumerate() {
        let checked = Task::parse(value)
            .map_err(|e| e.to_string())
            .and_then(|task| {
                taxonomy
                    .validate_task(&task)
                    .map(|warnings| (task, warnings))
                    .map_err(|e| e.to_string())
            });
        match checked {
            Ok((task, warnings)) => {
                for warning in &warnings {
                    println!("{}: warning: {}", task.key(), warning.message);
                }
                println!("{}: ok", task.key());
            }
            Err(message) => {
                failed += 1;
                println!("task #{index}: error: {message}");
            }
        }
    }

    log::info!("Validated {} task(s), {failed} failed", raw.len());
    Ok(failed == 0)
}

fn export(
    config: &ClientConfig,
    store_path: &Path,
    format: Option<String>,
    out: &Path,
    project: Option<String>,
    stage: Option<String>,
    rasterize: bool,
) -> CliResult {
    let registry = FormatRegistry::new();
    let format_id = format.unwrap_or_else(|| config.export.format.clone());
    let Some(format) = registry.get(&format_id) else {
        return Err(format!(
            "unknown format '{format_id}' (available: {})",
            registry.ids().join(", ")
        )
        .into());
    };

    let store = LocalDirectory::new(store_path);
    let project = project
        .or_else(|| config.profile.project_id.clone())
        .unwrap_or_default();
    let taxonomy = store.resolve_taxonomy(&project)?;

    let mut filter = TaskFilter::default();
    if let Some(stage) = stage {
        filter = filter.with_stage(stage);
    }
    let ids: Vec<String> = store
        .list_tasks(&filter)?
        .iter()
        .filter_map(|t| {
            t.get("taskId")
                .or_else(|| t.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .collect();

    let codecs = MaskCodecRegistry::new();
    let context = BatchContext {
        tasks: &store,
        blobs: &store,
        taxonomy: &taxonomy,
        codecs: &codecs,
    };
    let outcomes = materialize(context, &ids, config.preferences.concurrency);
    let (mut data, failures) = Dataset::from_outcomes(outcomes);
    for failure in &failures {
        log::error!("Task {} skipped: {}", failure.task_id, failure.error);
    }
    data.probe_dimensions(&store);

    let mut options = ExportOptions::new()
        .png_masks(config.export.png_mask)
        .rasterize(rasterize);
    if config.export.semantic_mask || config.export.binary_mask {
        options = options.mask_mode(config.export.mask_mode());
    }

    let result = format.export(&data, &taxonomy, out, &options)?;
    if config.export.include_warnings {
        report(&result);
    }
    println!(
        "Exported {} task(s) as {} to {} ({} failed)",
        result.tasks_exported,
        format.display_name(),
        out.display(),
        failures.len()
    );
    Ok(failures.is_empty() && !result.has_errors())
}

fn import_coco(coco: &Path, taxonomy: &Path, out: &Path) -> CliResult {
    let taxonomy = load_taxonomy(taxonomy)?;
    let registry = FormatRegistry::new();
    let (Some(coco_format), Some(native)) = (registry.get("coco"), registry.get("native")) else {
        return Err("built-in formats missing".into());
    };

    let data = coco_format.import(coco, &taxonomy, &ImportOptions::default())?;
    for warning in data.warnings() {
        log::warn!("{warning}");
    }
    let (bytes, result) = native.export_to_bytes(&data, &taxonomy, &ExportOptions::default())?;
    std::fs::write(out, bytes)?;

    println!(
        "Wrote {} task(s) with {} annotation(s) to {}",
        result.tasks_exported,
        result.annotations_exported,
        out.display()
    );
    Ok(true)
}

fn report(result: &ExportResult) {
    for warning in &result.warnings {
        match warning.severity {
            WarningSeverity::Info => log::info!("{warning}"),
            WarningSeverity::Warning => log::warn!("{warning}"),
            WarningSeverity::Error => log::error!("{warning}"),
        }
    }
}
