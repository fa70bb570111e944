use anyhow::{bail, Context, Result};
use reqwest::Client;
use surveyscraper::{run_update, ManifestLister, Store, UpdateOptions};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,surveyscraper=info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    std::panic::set_hook(Box::new(|info| {
        eprintln!("panic: {:?}", info);
    }));

    // ─── 2) read arguments ───────────────────────────────────────────
    let mut force = false;
    let mut positional = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--force" => force = true,
            _ => positional.push(arg),
        }
    }
    let [db_path, manifest_path, year_list] = positional.as_slice() else {
        bail!("usage: surveyscraper <db> <manifest.json> <year>[,<year>...] [--force]");
    };
    let years = year_list
        .split(',')
        .map(|y| {
            y.trim()
                .parse::<i32>()
                .with_context(|| format!("invalid year {y}"))
        })
        .collect::<Result<Vec<_>>>()?;

    // ─── 3) open the store and the file manifest ─────────────────────
    let store = Store::open(db_path)?;
    let lister = ManifestLister::from_path(manifest_path)?;
    let client = Client::new();
    let options = UpdateOptions {
        force,
        ..UpdateOptions::default()
    };

    // ─── 4) run the update ───────────────────────────────────────────
    let run = run_update(&store, &client, &lister, &years, &options).await?;

    // ─── 5) summarize ────────────────────────────────────────────────
    for year in &run.years {
        info!(
            year = year.year,
            found = year.files_found,
            downloaded = year.files_downloaded,
            imported = year.files_imported,
            failed = year.errors.len(),
            "year summary"
        );
        for err in &year.errors {
            warn!(year = year.year, "{err}");
        }
    }
    for report in &run.consolidations {
        info!(view = %report.view, sources = report.source_tables.len(), "view rebuilt");
    }
    for err in &run.consolidation_errors {
        warn!("{err}");
    }
    info!(
        imported = run.total_imported(),
        elapsed_secs = (run.finished_at - run.started_at).num_seconds(),
        "run complete"
    );

    if !run.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}
