use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use live_edit::compiler::compile;
use live_edit::config::{self, LiveEditConfig};
use live_edit::diff::{compare_strings_with_limit, DiffChunk};
use live_edit::edit::{EditRequest, LiveEditor, PatchOutcome, PatchReport};
use live_edit::planner::{self, Binding};
use live_edit::runtime::{ContextId, RunOutcome, Runtime};
use live_edit::safety::PatchabilityStatus;
use similar::{ChangeTag, TextDiff};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Upper bound on resumes after an edit, for scripts that pause in a loop.
const MAX_RESUMES: usize = 64;

#[derive(Parser)]
#[command(name = "live-edit")]
#[command(about = "Patch running scripts in place without restarting them", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./live-edit.toml, then ~/live-edit.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script until it completes or reaches `debugger;`
    Run {
        script: PathBuf,
    },

    /// Show the diff chunks between two versions of a script
    Diff {
        old: PathBuf,
        new: PathBuf,

        /// Show a unified line diff instead of chunks
        #[arg(short, long)]
        unified: bool,
    },

    /// Show which functions an edit would replace
    Plan {
        old: PathBuf,
        new: PathBuf,
    },

    /// Run the old script, then patch it to the new one while it is live
    Edit {
        old: PathBuf,
        new: PathBuf,

        /// Drop and restart frames that block the patch
        #[arg(long)]
        drop: bool,

        /// Report what would happen without patching
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Call this global function after the edit
        #[arg(long)]
        call: Option<String>,

        /// Print the patch report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { script } => cmd_run(&config, &script),
        Commands::Diff { old, new, unified } => cmd_diff(&config, &old, &new, unified),
        Commands::Plan { old, new } => cmd_plan(&config, &old, &new),
        Commands::Edit {
            old,
            new,
            drop,
            dry_run,
            call,
            json,
        } => cmd_edit(&config, &old, &new, drop, dry_run, call.as_deref(), json),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<LiveEditConfig> {
    let config = match path {
        Some(path) => config::load_from_path(path)?,
        None => config::discover(std::env::current_dir()?)?,
    };
    Ok(config)
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn script_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_output(runtime: &mut Runtime) {
    for line in runtime.take_output() {
        println!("{line}");
    }
}

fn describe_pause(runtime: &Runtime, context: ContextId) -> String {
    let function = runtime
        .context(context)
        .ok()
        .and_then(|ctx| ctx.frames.iter().rev().find_map(|f| f.function()))
        .and_then(|id| runtime.function(id).ok())
        .map(|record| record.display_name().to_string())
        .unwrap_or_default();
    format!("paused at debugger in {function} ({context})")
}

fn cmd_run(config: &LiveEditConfig, path: &Path) -> Result<()> {
    let source = read_source(path)?;
    let mut runtime = Runtime::new(config.runtime.max_stack_depth);
    let script = runtime.load_script(&script_name(path), &source)?;
    let (context, outcome) = runtime.run_script(script)?;
    print_output(&mut runtime);
    match outcome {
        RunOutcome::Completed(value) => {
            println!("{}", format!("=> {value}").dimmed());
        }
        RunOutcome::Paused(_) => {
            println!("{}", describe_pause(&runtime, context).yellow());
        }
    }
    Ok(())
}

fn cmd_diff(config: &LiveEditConfig, old_path: &Path, new_path: &Path, unified: bool) -> Result<()> {
    let old = read_source(old_path)?;
    let new = read_source(new_path)?;

    if unified {
        display_diff(old_path, &old, &new);
        return Ok(());
    }

    let chunks = compare_strings_with_limit(&old, &new, config.diff.fine_diff_limit);
    if chunks.is_empty() {
        println!("{}", "No changes".green());
        return Ok(());
    }
    let mut previous: Option<&DiffChunk> = None;
    for chunk in &chunks {
        let new_start = chunk.new_start(previous);
        println!(
            "{} {:?} -> {:?}",
            format!("[{}..{}) -> [{}..{})", chunk.old_start, chunk.old_end, new_start, chunk.new_end)
                .cyan(),
            &old[chunk.old_start..chunk.old_end],
            &new[new_start..chunk.new_end],
        );
        previous = Some(chunk);
    }
    Ok(())
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!("{}", format!("--- {} (original)", file.display()).dimmed());
    println!("{}", format!("+++ {} (edited)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => format!(" {}", change).normal(),
        };
        print!("{}", sign);
    }
}

fn cmd_plan(config: &LiveEditConfig, old_path: &Path, new_path: &Path) -> Result<()> {
    let old = read_source(old_path)?;
    let new = read_source(new_path)?;
    let old_tree = compile(&old).with_context(|| format!("in {}", old_path.display()))?;
    let new_tree = compile(&new).with_context(|| format!("in {}", new_path.display()))?;
    let chunks = compare_strings_with_limit(&old, &new, config.diff.fine_diff_limit);
    let plan = planner::plan(&old_tree, &new_tree, &chunks, &BTreeSet::new());

    if plan.is_empty() {
        println!("{}", "No changes".green());
        return Ok(());
    }

    for entry in plan.entries.values() {
        let name = old_tree.functions[entry.old_index].display_name();
        if entry.directly_patchable {
            println!("{} {} ({:?})", "replace".green().bold(), name, entry.reason);
        } else {
            let target = old_tree.functions[entry.target].display_name();
            println!(
                "{} {} -> {} ({:?})",
                "escalate".yellow().bold(),
                name,
                target,
                entry.reason
            );
        }
    }
    for (&new_index, binding) in &plan.bindings {
        let name = new_tree.functions[new_index].display_name();
        match binding {
            Binding::Existing(_) => println!("  {} {}", "keep".dimmed(), name),
            Binding::Fresh => println!("  {} {}", "fresh".cyan(), name),
        }
    }
    Ok(())
}

fn cmd_edit(
    config: &LiveEditConfig,
    old_path: &Path,
    new_path: &Path,
    drop: bool,
    dry_run: bool,
    call: Option<&str>,
    json: bool,
) -> Result<()> {
    let old = read_source(old_path)?;
    let new = read_source(new_path)?;

    let mut editor = LiveEditor::new(config.clone());
    let script = editor
        .runtime_mut()
        .load_script(&script_name(old_path), &old)?;
    let (context, outcome) = editor.runtime_mut().run_script(script)?;
    if !json {
        print_output(editor.runtime_mut());
        if let RunOutcome::Paused(_) = outcome {
            println!("{}", describe_pause(editor.runtime(), context).yellow());
        }
    }

    let request = EditRequest::new(script, editor.current_version(script)?, new);
    let options = editor.default_options().with_drop(drop || config.edit.do_drop).dry_run(dry_run);
    let report = editor.submit_edit(request, &options)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    resume_all(editor.runtime_mut(), json)?;

    if let Some(name) = call {
        let (context, outcome) = editor.runtime_mut().call_global(name, Vec::new())?;
        if !json {
            print_output(editor.runtime_mut());
        }
        match outcome {
            RunOutcome::Completed(value) => println!("{name}() => {value}"),
            RunOutcome::Paused(_) => {
                println!("{}", describe_pause(editor.runtime(), context).yellow())
            }
        }
    }

    if report.outcome == PatchOutcome::CompileError {
        anyhow::bail!("edit rejected: new source does not compile");
    }
    Ok(())
}

fn resume_all(runtime: &mut Runtime, quiet: bool) -> Result<()> {
    for _ in 0..MAX_RESUMES {
        let next = runtime
            .paused_context()
            .or_else(|| runtime.contexts().find(|c| c.is_live()).map(|c| c.id));
        let Some(context) = next else {
            return Ok(());
        };
        runtime.resume(context)?;
        if !quiet {
            print_output(runtime);
        }
    }
    eprintln!(
        "{}",
        format!("Warning: scripts still paused after {MAX_RESUMES} resumes").yellow()
    );
    Ok(())
}

fn print_report(report: &PatchReport) {
    let headline = format!("{}", report.outcome);
    let headline = match report.outcome {
        PatchOutcome::Success => headline.green().bold(),
        PatchOutcome::PartialSuccess => headline.yellow().bold(),
        PatchOutcome::NoChangesDetected => headline.normal(),
        PatchOutcome::Blocked | PatchOutcome::CompileError => headline.red().bold(),
    };
    if report.dry_run {
        println!("{} {}", headline, "[DRY RUN]".cyan());
    } else {
        println!("{headline}");
    }

    if let Some(error) = &report.compile_error {
        println!("  {}", error.to_string().red());
    }

    for function in &report.functions {
        let status = function.status.to_string();
        let status = match function.status {
            PatchabilityStatus::Available | PatchabilityStatus::ReplacedActiveStack => {
                status.green()
            }
            _ => status.red(),
        };
        let mut line = format!("  {} {}", function.name.bold(), status);
        if !function.directly_patchable {
            line.push_str(&format!(" (escalated: {:?})", function.reason).dimmed().to_string());
        }
        if function.replaced {
            line.push_str(&" replaced".green().to_string());
        }
        for issue in &function.issues {
            line.push_str(&format!(" {issue:?}").yellow().to_string());
        }
        println!("{line}");
    }

    for frame in &report.dropped_frames {
        let note = if frame.restarted { "restarted" } else { "dropped" };
        println!(
            "  {} frame {} ({}) in {}",
            note.yellow(),
            frame.depth,
            frame.name,
            frame.context
        );
    }
    if let Some(error) = &report.rerun_error {
        println!("  {}", format!("top-level re-run failed: {error}").red());
    }
}
