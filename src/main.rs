use anyhow::{bail, Context, Result};
use clap::Parser;
use memcard_recovery::cli::{describe, precondition_hint, Args, Command};
use memcard_recovery::config::EngineConfig;
use memcard_recovery::diagnosis::Severity;
use memcard_recovery::model::FileEntry;
use memcard_recovery::recovery::default_export_name;
use memcard_recovery::report::CardReport;
use memcard_recovery::scanner::ScanEvent;
use memcard_recovery::{CardSession, Diagnosis, RecoveryError};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

fn main() {
    let args = Args::parse();

    let default_level = if args.global.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();

    if let Err(e) = run(args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    if let Err(e) = args.validate() {
        bail!("invalid arguments: {}", e);
    }
    let config = args.engine_config().context("loading configuration")?;

    match &args.command {
        Command::Inspect { images, json } => inspect(&config, &args.global.databases, images, *json),
        Command::Scan {
            image,
            output,
            report,
            ..
        } => scan(&config, &args.global.databases, image, output.as_deref(), report.as_deref()),
        Command::Export { image, output, game } => {
            export(&config, &args.global.databases, image, output, game.as_deref())
        }
        Command::Repair { image, output } => repair(&config, image, output),
    }
}

fn open_session(config: &EngineConfig, databases: &[PathBuf], image: &Path) -> Result<(CardSession, Diagnosis)> {
    let mut session = CardSession::new(config.clone());
    let report = session.load_databases(databases);
    for skipped in &report.skipped {
        log::warn!("skipped {}: {}", skipped.path.display(), skipped.reason);
    }
    let diagnosis = session
        .open(image)
        .with_context(|| format!("opening {}", image.display()))?;
    Ok((session, diagnosis))
}

fn print_diagnosis(image: &Path, diagnosis: &Diagnosis) {
    println!("{} ({} card, {} bytes)", image.display(), diagnosis.format, diagnosis.image_size);
    println!("  directory:   {:?}", diagnosis.directory);
    println!("  block table: {:?}", diagnosis.block_table);
    if diagnosis.conditions.is_empty() {
        println!("  no problems found");
    }
    for condition in &diagnosis.conditions {
        let tag = match condition.severity() {
            Severity::Info => "info",
            Severity::Warning => "warn",
            Severity::Error => "ERROR",
        };
        println!("  [{:>5}] {}: {}", tag, condition.code(), describe(condition));
    }
}

fn print_entry(entry: &FileEntry) {
    println!(
        "  {:<6} {:<32} blocks {:>4}..{:<4} {:>7} bytes  {:?}{}",
        entry.game_id,
        entry.filename,
        entry.start_block().unwrap_or(0),
        entry.blocks.last().copied().unwrap_or(0),
        entry.length,
        entry.validity,
        entry
            .metadata
            .title
            .as_deref()
            .map(|t| format!("  \"{t}\""))
            .unwrap_or_default()
    );
}

fn inspect(config: &EngineConfig, databases: &[PathBuf], images: &[PathBuf], json: bool) -> Result<()> {
    let results: Vec<Result<String>> = images
        .par_iter()
        .map(|image| {
            let (session, diagnosis) = open_session(config, databases, image)?;
            let card = session.card().context("card not loaded")?;
            if json {
                let report = CardReport::new(card, diagnosis, session.file_list());
                return Ok(report.to_json()?);
            }
            Ok(render_inspection(image, &diagnosis, &session))
        })
        .collect();

    let mut failed = 0;
    for (image, result) in images.iter().zip(results) {
        match result {
            Ok(text) => println!("{text}"),
            Err(e) => {
                failed += 1;
                eprintln!("{}: {:#}", image.display(), e);
            }
        }
    }
    if failed > 0 {
        bail!("{} of {} images could not be inspected", failed, images.len());
    }
    Ok(())
}

fn render_inspection(image: &Path, diagnosis: &Diagnosis, session: &CardSession) -> String {
    // Rendered into a buffer so parallel inspections print whole
    let mut out = Vec::new();
    out.push(format!(
        "{} ({} card, {} bytes)",
        image.display(),
        diagnosis.format,
        diagnosis.image_size
    ));
    out.push(format!("  directory: {:?}, block table: {:?}", diagnosis.directory, diagnosis.block_table));
    for condition in &diagnosis.conditions {
        out.push(format!("  [{:?}] {}", condition.severity(), describe(condition)));
    }
    let files = session.file_list();
    out.push(format!("  {} files", files.len()));
    for entry in &files {
        out.push(format!(
            "    {} {} ({} blocks, {:?})",
            entry.game_id,
            entry.filename,
            entry.block_count(),
            entry.validity
        ));
    }
    out.join("\n")
}

fn scan(
    config: &EngineConfig,
    databases: &[PathBuf],
    image: &Path,
    output: Option<&Path>,
    report_path: Option<&Path>,
) -> Result<()> {
    let (mut session, diagnosis) = open_session(config, databases, image)?;
    print_diagnosis(image, &diagnosis);
    println!();

    let mut handle = match session.start_scan(config.scan.clone()) {
        Ok(handle) => handle,
        Err(RecoveryError::Precondition(p)) => {
            bail!("cannot scan: {} ({})", p, precondition_hint(p));
        }
        Err(e) => return Err(e.into()),
    };

    while let Some(event) = handle.events().blocking_recv() {
        match event {
            ScanEvent::Progress(progress) => log::debug!(
                "block {} ({:.1}%), {} found",
                progress.current_block,
                progress.completion_percentage(),
                progress.files_found
            ),
            ScanEvent::FileFound(entry) => print_entry(&entry),
        }
    }
    let outcome = handle.wait()?;
    println!(
        "\nscan {:?}: {} blocks in {:.2}s, {} saves recovered",
        outcome.state,
        outcome.progress.blocks_scanned,
        outcome.duration_secs,
        outcome.entries.len()
    );

    if let Some(dir) = output {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        for entry in &outcome.entries {
            let dest = dir.join(format!(
                "block{:04}-{}",
                entry.start_block().unwrap_or(0),
                default_export_name(entry)
            ));
            session.export_file(entry, &dest)?;
        }
    }

    if let Some(path) = report_path {
        let card = session.card().context("card not loaded")?;
        CardReport::new(card, diagnosis, session.file_list())
            .with_scan(&outcome)
            .write_json(path)?;
    }
    Ok(())
}

fn export(
    config: &EngineConfig,
    databases: &[PathBuf],
    image: &Path,
    output: &Path,
    game: Option<&str>,
) -> Result<()> {
    let (session, diagnosis) = open_session(config, databases, image)?;
    if !diagnosis.directory_usable {
        bail!("{} has no usable directory, try `scan` instead", image.display());
    }

    std::fs::create_dir_all(output).with_context(|| format!("creating {}", output.display()))?;
    let mut written = 0;
    for entry in session.file_list().directory_entries() {
        if game.map_or(false, |g| g != entry.game_id) {
            continue;
        }
        let dest = output.join(default_export_name(entry));
        session
            .export_file(entry, &dest)
            .with_context(|| format!("exporting {}", entry.filename))?;
        print_entry(entry);
        written += 1;
    }
    println!("{} files exported to {}", written, output.display());
    Ok(())
}

fn repair(config: &EngineConfig, image: &Path, output: &Path) -> Result<()> {
    let mut session = CardSession::new(config.clone());
    let diagnosis = session
        .open(image)
        .with_context(|| format!("opening {}", image.display()))?;
    print_diagnosis(image, &diagnosis);

    let outcome = session.repair_to(output)?;
    if outcome.actions.is_empty() {
        println!("nothing to repair, wrote an identical copy to {}", output.display());
    }
    for action in &outcome.actions {
        println!("  {:?}", action);
    }
    Ok(())
}
