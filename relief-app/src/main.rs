//! Relief
//!
//! Terrain reconstruction from raycast sample logs. A sample log of HIT and
//! MISS records is folded into a persistent point database; the accumulated
//! hits are triangulated in the XZ plane and triangles contradicted by miss
//! rays are carved away before export.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relief_data::{Database, PointIndex, Ray, Vertex};
use relief_ingest::{ingest_once, run_stream, IngestSummary, RunnerConfig, StreamOutcome};
use relief_mesh::{carve, export_glb, export_obj, triangulate, TriangleQuadtree};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::warn;

/// Relief - terrain reconstruction from raycast sample logs
#[derive(Parser, Debug)]
#[command(name = "relief")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Point database path
    #[arg(long, global = true, default_value = "terrain.bin")]
    db: PathBuf,

    /// Sample log path (defaults to a file under the system temp directory)
    #[arg(long, global = true)]
    log: Option<PathBuf>,

    /// Output mesh path; a .glb extension selects glTF binary, anything
    /// else Wavefront OBJ
    #[arg(long, global = true, default_value = "terrain.obj")]
    out: PathBuf,

    /// Minimum 3D spacing between accepted hit points
    #[arg(long, global = true, default_value = "0.01")]
    merge_distance: f64,

    /// Keep tailing the log (stop with Enter) instead of replaying it once
    #[arg(long, global = true)]
    follow: bool,

    /// Skip log ingestion entirely and rebuild from the database alone
    #[arg(long, global = true, conflicts_with = "follow")]
    no_tail: bool,

    /// Suppress status output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest the log, build and carve the mesh, and export it (default)
    Run,
    /// Ingest the log into the database only; no mesh, no export
    Update,
    /// Merge two databases: points deduplicated by spacing, rays appended
    Merge {
        first: PathBuf,
        second: PathBuf,
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    if !cli.quiet {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let log_path = cli.log.clone().unwrap_or_else(default_log_path);

    match &cli.command {
        None | Some(Commands::Run) => cmd_run(&cli, &log_path),
        Some(Commands::Update) => cmd_update(&cli, &log_path).map(|_| ()),
        Some(Commands::Merge {
            first,
            second,
            output,
        }) => cmd_merge(&cli, first, second, output),
    }
}

fn cmd_run(cli: &Cli, log_path: &Path) -> Result<()> {
    let (points, rays) = if cli.no_tail {
        let database = load_or_fresh(&cli.db);
        println!(
            "Skipping ingestion; database holds {} points / {} rays.",
            database.points.len(),
            database.rays.len()
        );
        (database.points, database.rays)
    } else {
        cmd_update(cli, log_path)?
    };

    let mut mesh = triangulate(&points);
    if mesh.triangles.is_empty() {
        println!("No surface to export ({} points).", points.len());
        return Ok(());
    }

    if !rays.is_empty() {
        let tree = TriangleQuadtree::build(&mesh);
        let removed = carve(&mesh, &tree, &rays);
        println!(
            "Carved {removed} triangles with {} miss rays; {} remain.",
            rays.len(),
            mesh.live_count()
        );
    }

    if cli.out.extension().is_some_and(|ext| ext == "glb") {
        export_glb(&mesh, &cli.out)
            .with_context(|| format!("exporting {}", cli.out.display()))?;
    } else {
        export_obj(&mut mesh, &cli.out)
            .with_context(|| format!("exporting {}", cli.out.display()))?;
    }
    println!("Wrote {}.", cli.out.display());
    Ok(())
}

fn cmd_update(cli: &Cli, log_path: &Path) -> Result<(Vec<Vertex>, Vec<Ray>)> {
    let database = load_or_fresh(&cli.db);

    let (points, rays, summary) = if cli.follow {
        let StreamOutcome {
            points,
            rays,
            summary,
        } = ingest_follow(cli, log_path, database)?;
        (points, rays, summary)
    } else {
        let mut index = PointIndex::from_existing(database.points, cli.merge_distance);
        let mut rays = database.rays;
        let mut summary = IngestSummary::default();
        ingest_once(log_path, &mut index, &mut rays, &mut summary)
            .with_context(|| format!("reading {}", log_path.display()))?;
        Database::save(&cli.db, index.points(), &rays)
            .with_context(|| format!("saving {}", cli.db.display()))?;
        (index.into_points(), rays, summary)
    };

    println!(
        "Ingested {} lines: {} hits accepted, {} merged away, {} misses. \
         Database holds {} points / {} rays.",
        summary.lines_processed,
        summary.hits_accepted,
        summary.hits_rejected,
        summary.misses,
        points.len(),
        rays.len()
    );
    Ok((points, rays))
}

fn ingest_follow(cli: &Cli, log_path: &Path, database: Database) -> Result<StreamOutcome> {
    let config = RunnerConfig {
        db_path: cli.db.clone(),
        log_path: log_path.to_path_buf(),
        min_merge_distance: cli.merge_distance,
        start_at_end: false,
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let stdin_cancel = cancel.clone();
    thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        stdin_cancel.store(true, Ordering::Relaxed);
    });

    println!("Tailing {}; press Enter to stop.", log_path.display());
    run_stream(&config, database, cancel).context("streaming ingestion failed")
}

fn cmd_merge(cli: &Cli, first: &Path, second: &Path, output: &Path) -> Result<()> {
    let a = Database::load(first).with_context(|| format!("loading {}", first.display()))?;
    let b = Database::load(second).with_context(|| format!("loading {}", second.display()))?;

    // The first database's points are trusted as-is; the second's pass
    // through the spacing rule, so earlier samples win ties.
    let a_points = a.points.len();
    let b_points = b.points.len();
    let mut index = PointIndex::from_existing(a.points, cli.merge_distance);
    let accepted = index.add_range(b.points);

    let mut rays = a.rays;
    rays.extend(b.rays);

    Database::save(output, index.points(), &rays)
        .with_context(|| format!("saving {}", output.display()))?;
    println!(
        "Merged {} + {} points into {} ({} of the second database survived), {} rays.",
        a_points,
        b_points,
        index.len(),
        accepted,
        rays.len()
    );
    Ok(())
}

/// Load the database, starting fresh (with a warning) when the file is
/// unreadable or from a different format version.
fn load_or_fresh(path: &Path) -> Database {
    match Database::load(path) {
        Ok(db) => db,
        Err(e) => {
            warn!("Could not load {} ({e}); starting fresh", path.display());
            Database::default()
        }
    }
}

fn default_log_path() -> PathBuf {
    std::env::temp_dir().join("relief").join("samples.log")
}
