//! geoquery - natural-language geospatial queries from the command line
//!
//! Collaborators (extraction model, geocoder, compute backends, fallback)
//! are scripted from a JSON fixture world, so every command runs offline.
//!
//! ## Commands
//!
//! - `run`: answer a query end to end
//! - `plan`: resolve and plan a query without dispatching anything
//! - `tile`: split a polygon under a pixel budget
//! - `config`: print the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use geoquery_collab::fakes::FixtureWorld;
use geoquery_collab::GeoPolygon;
use geoquery_core::telemetry::init_tracing;
use geoquery_core::{
    tile, BackendRegistry, PipelineConfig, PipelineController, PipelineState, Query, RegionId,
    Response, RunOptions, Tile, TileBudget, METRICS,
};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "geoquery")]
#[command(version = geoquery_core::VERSION)]
#[command(about = "Natural-language geospatial query orchestration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Pipeline configuration file (TOML)
    #[arg(short, long, global = true, env = "GEOQUERY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a query against a fixture world
    Run {
        /// Free-text query
        query: String,

        /// Fixture world describing every collaborator (JSON)
        #[arg(short, long)]
        fixtures: PathBuf,

        /// Whole-run deadline in milliseconds (overrides the config)
        #[arg(long)]
        deadline_ms: Option<u64>,

        /// Extra intent signal recorded with the plan (repeatable)
        #[arg(long = "signal")]
        signals: Vec<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Resolve locations and plan tasks without calling any backend
    Plan {
        /// Free-text query
        query: String,

        /// Fixture world describing every collaborator (JSON)
        #[arg(short, long)]
        fixtures: PathBuf,

        /// Extra intent signal recorded with the plan (repeatable)
        #[arg(long = "signal")]
        signals: Vec<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Split a polygon into tiles under the pixel budget
    Tile {
        /// Polygon file (JSON with `outer_ring` and optional `holes`)
        #[arg(short, long)]
        polygon: PathBuf,

        /// Override `tiling.max_pixels`
        #[arg(long)]
        max_pixels: Option<u64>,

        /// Override `tiling.scale_m`
        #[arg(long)]
        scale_m: Option<f64>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Run {
            query,
            fixtures,
            deadline_ms,
            signals,
            format,
        } => cmd_run(config, &fixtures, &query, deadline_ms, signals, format).await,
        Commands::Plan {
            query,
            fixtures,
            signals,
            format,
        } => cmd_plan(config, &fixtures, &query, signals, format).await,
        Commands::Tile {
            polygon,
            max_pixels,
            scale_m,
            format,
        } => cmd_tile(&config, &polygon, max_pixels, scale_m, format),
        Commands::Config => cmd_config(&config),
    };

    METRICS.flush();
    result
}

/// Defaults when no file is given; the file is validated on load.
fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path)),
        None => Ok(PipelineConfig::default()),
    }
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read JSON file: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {:?}", path))
}

/// Wire the fixture fakes into a controller.
fn build_controller(world: &FixtureWorld, config: PipelineConfig) -> Result<PipelineController> {
    let fakes = world.build();
    let mut registry = BackendRegistry::new();
    for (capability, backend) in &fakes.compute {
        registry = registry.with_primary(*capability, backend.clone());
    }
    if let Some(fallback) = &fakes.fallback {
        registry = registry.with_fallback(fallback.clone());
    }
    PipelineController::new(config, fakes.extraction, fakes.geocoder, registry)
        .context("Invalid pipeline configuration")
}

/// A cancellation channel that flips on Ctrl-C.
fn ctrl_c_cancel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });
    rx
}

async fn cmd_run(
    config: PipelineConfig,
    fixtures: &Path,
    query: &str,
    deadline_ms: Option<u64>,
    signals: Vec<String>,
    format: OutputFormat,
) -> Result<()> {
    let world: FixtureWorld = read_json_file(fixtures)?;
    let controller = build_controller(&world, config)?;

    let mut options = RunOptions::default()
        .with_intent_signals(signals)
        .with_cancel(ctrl_c_cancel());
    if let Some(ms) = deadline_ms {
        options = options.with_deadline(Duration::from_millis(ms));
    }

    let response = controller
        .run_with(Query::new(query), options)
        .await
        .context("Query failed")?;
    info!(
        request_id = %response.request_id,
        tasks = response.task_results.len(),
        "query answered"
    );

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
        OutputFormat::Text => print!("{}", render_response_text(&response)),
    }
    Ok(())
}

fn render_response_text(response: &Response) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", response.analysis);
    let _ = writeln!(out);
    let _ = writeln!(out, "request:  {}", response.request_id);
    let _ = writeln!(out, "plan:     {}", response.plan_digest);

    if !response.task_results.is_empty() {
        let _ = writeln!(out, "\nresults:");
        for r in &response.task_results {
            let backend = r.backend_name.as_deref().unwrap_or("-");
            let _ = writeln!(
                out,
                "  {:<12} {:<16} {:?} via {} ({}/{} tiles, {} ms)",
                r.capability.as_str(),
                r.region_name,
                r.status,
                backend,
                r.tiles_succeeded,
                r.tiles_total,
                r.duration_ms
            );
            if let Some(err) = &r.error {
                let _ = writeln!(out, "    error: {}", err);
            }
        }
    }

    let _ = writeln!(out, "\nevidence:");
    for entry in &response.evidence {
        let _ = writeln!(out, "  {:>3}  {}", entry.seq, entry);
    }
    out
}

#[derive(Debug, Serialize)]
struct PlanView {
    query: String,
    digest: String,
    regions: Vec<RegionView>,
    tasks: Vec<TaskView>,
    evidence: Vec<String>,
}

#[derive(Debug, Serialize)]
struct RegionView {
    id: RegionId,
    name: String,
    geometry: &'static str,
    area_km2: f64,
    tiles: usize,
}

#[derive(Debug, Serialize)]
struct TaskView {
    id: usize,
    capability: String,
    region: String,
    tiles: usize,
    parameters: serde_json::Value,
}

fn plan_view(state: &PipelineState) -> PlanView {
    PlanView {
        query: state.query().text().to_string(),
        digest: state.plan().digest(),
        regions: state
            .regions()
            .iter()
            .map(|r| RegionView {
                id: r.id,
                name: r.name.clone(),
                geometry: r.geometry.kind(),
                area_km2: r.area_km2,
                tiles: r.tiles.len(),
            })
            .collect(),
        tasks: state
            .plan()
            .tasks
            .iter()
            .map(|t| TaskView {
                id: t.id.0,
                capability: t.capability.as_str().to_string(),
                region: t.region.name.clone(),
                tiles: t.region.tiles.len(),
                parameters: serde_json::to_value(&t.parameters).unwrap_or_default(),
            })
            .collect(),
        evidence: state
            .evidence()
            .snapshot()
            .iter()
            .map(ToString::to_string)
            .collect(),
    }
}

async fn cmd_plan(
    config: PipelineConfig,
    fixtures: &Path,
    query: &str,
    signals: Vec<String>,
    format: OutputFormat,
) -> Result<()> {
    let world: FixtureWorld = read_json_file(fixtures)?;
    let controller = build_controller(&world, config)?;
    let options = RunOptions::default().with_intent_signals(signals);

    let state = controller
        .plan(Query::new(query), &options)
        .await
        .context("Planning failed")?;
    let view = plan_view(&state);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&view)?),
        OutputFormat::Text => {
            println!("Plan {}", &view.digest[..12.min(view.digest.len())]);
            for r in &view.regions {
                println!(
                    "  region {} {:<16} {:<8} {:>12.1} km²  {} tile(s)",
                    r.id.0, r.name, r.geometry, r.area_km2, r.tiles
                );
            }
            if view.tasks.is_empty() {
                println!("  (no tasks)");
            }
            for t in &view.tasks {
                println!(
                    "  task {} {:<12} on {} {}",
                    t.id, t.capability, t.region, t.parameters
                );
            }
        }
    }
    Ok(())
}

/// Budget from the config with command-line overrides applied.
fn tile_budget(config: &PipelineConfig, max_pixels: Option<u64>, scale_m: Option<f64>) -> TileBudget {
    let mut budget = TileBudget::from(&config.tiling);
    if let Some(max_pixels) = max_pixels {
        budget.max_pixels = max_pixels;
    }
    if let Some(scale_m) = scale_m {
        budget.scale_m = scale_m;
    }
    budget
}

fn tile_polygon(polygon: &GeoPolygon, budget: &TileBudget) -> Result<Vec<Tile>> {
    tile(RegionId(0), polygon, budget).context("Tiling failed")
}

fn cmd_tile(
    config: &PipelineConfig,
    path: &Path,
    max_pixels: Option<u64>,
    scale_m: Option<f64>,
    format: OutputFormat,
) -> Result<()> {
    let polygon: GeoPolygon = read_json_file(path)?;
    let budget = tile_budget(config, max_pixels, scale_m);
    let tiles = tile_polygon(&polygon, &budget)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tiles)?),
        OutputFormat::Text => {
            println!(
                "{} tile(s), budget {} px at {} m/px",
                tiles.len(),
                budget.max_pixels,
                budget.scale_m
            );
            println!("{:>5} {:>4} {:>4} {:>14} {:>12}", "index", "row", "col", "area_km2", "pixels");
            for t in &tiles {
                println!(
                    "{:>5} {:>4} {:>4} {:>14.3} {:>12}",
                    t.index, t.row, t.col, t.area_km2, t.estimated_pixels
                );
            }
        }
    }
    Ok(())
}

fn cmd_config(config: &PipelineConfig) -> Result<()> {
    let text = config
        .to_toml_string()
        .context("Failed to render configuration")?;
    print!("{}", text);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoquery_collab::Capability;
    use geoquery_core::{BackendUsed, TaskStatus};

    const WORLD: &str = include_str!("../fixtures/world.json");
    const CONFIG: &str = include_str!("../fixtures/geoquery.toml");
    const KENYA: &str = include_str!("../fixtures/kenya.json");

    fn fixture_controller() -> PipelineController {
        let world = FixtureWorld::from_json_str(WORLD).unwrap();
        let config = PipelineConfig::from_toml_str(CONFIG).unwrap();
        build_controller(&world, config).unwrap()
    }

    #[test]
    fn test_cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "geoquery",
            "run",
            "--fixtures",
            "world.json",
            "--verbose",
            "--signal",
            "dashboard",
            "How green is Kenya?",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Run {
                query,
                signals,
                format,
                ..
            } => {
                assert_eq!(query, "How green is Kenya?");
                assert_eq!(signals, vec!["dashboard".to_string()]);
                assert_eq!(format, OutputFormat::Json);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_fixture_config_loads_from_disk() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/geoquery.toml");
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.tiling.scale_m, 250.0);
        assert_eq!(config.planner.max_capabilities_per_region, 2);
        assert_eq!(load_config(None).unwrap(), PipelineConfig::default());
    }

    #[test]
    fn test_missing_config_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("nope.toml"));
    }

    #[tokio::test]
    async fn test_vegetation_query_against_fixture_world() {
        let controller = fixture_controller();
        let response = controller.run("How green is Kenya?").await.unwrap();

        assert_eq!(response.regions.len(), 1);
        let kenya = &response.regions[0];
        assert!(kenya.is_tiled());
        assert!(kenya
            .tiles
            .iter()
            .all(|t| t.estimated_pixels <= 2_000_000));

        let result = &response.task_results[0];
        assert_eq!(result.capability, Capability::Vegetation);
        assert_eq!(result.status, TaskStatus::Success);
        assert_eq!(result.tiles_succeeded, kenya.tiles.len());
        let ndvi = result.statistics["mean_ndvi"].as_continuous().unwrap();
        assert!((ndvi - 0.41).abs() < 1e-9);

        let text = render_response_text(&response);
        assert!(text.starts_with(&response.analysis));
        assert!(text.contains("location:resolved:Kenya"));
    }

    #[tokio::test]
    async fn test_unavailable_water_backend_uses_fallback() {
        let controller = fixture_controller();
        let response = controller.run("Are the lakes in Nairobi low?").await.unwrap();

        let result = &response.task_results[0];
        assert_eq!(result.capability, Capability::Water);
        assert_eq!(result.backend_used, BackendUsed::Fallback);
        assert_eq!(result.status, TaskStatus::Success);
        assert!(result.narrative.as_deref().unwrap().contains("lake levels"));
    }

    #[tokio::test]
    async fn test_plan_view_lists_tasks_without_dispatching() {
        let controller = fixture_controller();
        let state = controller
            .plan(
                Query::new("Forest and land cover in Nairobi in 2022"),
                &RunOptions::default(),
            )
            .await
            .unwrap();
        let view = plan_view(&state);

        assert_eq!(view.regions.len(), 1);
        // 0.45 x 0.29 degree box near the equator.
        let area = view.regions[0].area_km2;
        assert!((1550.0..1650.0).contains(&area), "area = {area}");
        assert_eq!(view.regions[0].tiles, 0);
        let caps: Vec<&str> = view.tasks.iter().map(|t| t.capability.as_str()).collect();
        assert_eq!(caps, vec!["vegetation", "land-cover"]);
        assert_eq!(view.tasks[0].parameters["year"], 2022);
        assert_eq!(view.digest.len(), 64);
        assert!(view.evidence.iter().any(|e| e == "pipeline:PLANNED"));
    }

    #[test]
    fn test_tile_overrides_apply_to_budget() {
        let polygon: GeoPolygon = serde_json::from_str(KENYA).unwrap();
        let config = PipelineConfig::default();

        let budget = tile_budget(&config, Some(500_000), Some(500.0));
        assert_eq!(budget.max_pixels, 500_000);
        assert_eq!(budget.scale_m, 500.0);

        let tiles = tile_polygon(&polygon, &budget).unwrap();
        assert!(tiles.len() > 1);
        assert!(tiles.iter().all(|t| t.estimated_pixels <= 500_000));
    }

    #[test]
    fn test_tile_cap_surfaces_as_error() {
        let polygon: GeoPolygon = serde_json::from_str(KENYA).unwrap();
        let mut config = PipelineConfig::default();
        config.tiling.max_tiles = 2;
        let budget = tile_budget(&config, None, None);
        let err = tile_polygon(&polygon, &budget).unwrap_err();
        assert!(format!("{err:#}").contains("exceeds the cap"));
    }
}
