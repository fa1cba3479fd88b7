use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use conflux_compose::function::FunctionRunner;
use conflux_compose::types::TypeReference;
use conflux_compose::{inline_patch_sets, lint_transforms, validate, CompositeResourceDefinition, Composition};
use conflux_core::event::EventType;
use conflux_core::Document;
use conflux_kubehub::{parse_kind_key, watch_into_queue, KubeEventRecorder, KubeStore, Mapping};
use conflux_reconcile::{ClaimReconciler, CompositeReconciler, Controller, ReconcilerConfig, SelectorChain};
use conflux_store::{ResourceStore, WorkQueue};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod render;

use render::{CannedFunctions, Rendered};

#[derive(Parser, Debug)]
#[command(name = "confluxctl", version, about = "Conflux composition engine CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, default_value_t = Output::Human, global = true)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one composition pass offline and print the composed resources
    Render {
        #[arg(long)]
        composite: PathBuf,
        #[arg(long)]
        composition: PathBuf,
        /// Composed resources observed on earlier passes (multi-document YAML)
        #[arg(long)]
        observed: Option<PathBuf>,
        /// Canned function responses keyed by function name
        #[arg(long)]
        functions: Option<PathBuf>,
    },
    /// Check a composition and report its patch and transform problems
    Validate {
        #[arg(long)]
        composition: PathBuf,
    },
    /// Run the composite and claim controllers against the current kube context
    Run {
        /// Composite kind as group/version/Kind
        #[arg(long)]
        composite_kind: String,
        /// Claim kind as group/version/Kind
        #[arg(long)]
        claim_kind: String,
        /// Kinds the compositions produce; changes to them requeue their composite
        #[arg(long = "composed-kind")]
        composed_kinds: Vec<String>,
        /// CompositeResourceDefinition manifest carrying default and enforced composition refs
        #[arg(long)]
        definition: Option<PathBuf>,
        #[arg(long, env = "CONFLUX_WORKERS")]
        workers: Option<usize>,
        /// Validate composed resources with a server-side dry run before applying
        #[arg(long, env = "CONFLUX_DRY_RUN")]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    match cli.command {
        Commands::Render { composite, composition, observed, functions } => {
            let composite = single(&composite)?;
            let composition = Composition::from_document(&single(&composition)?)?;
            let observed = match observed {
                Some(p) => conflux_apply::parse_manifests(&read(&p)?)?,
                None => Vec::new(),
            };
            let canned = match functions {
                Some(p) => Some(CannedFunctions::from_yaml(&read(&p)?)?),
                None => None,
            };
            let registry = render::registry_for(&composite, &composition, &observed, canned.as_ref());
            let functions = canned.map(|c| Arc::new(c) as Arc<dyn FunctionRunner>);
            let out = render::render(registry, composite, &composition, observed, functions).await?;
            print_rendered(&out, cli.output)?;
        }
        Commands::Validate { composition } => {
            let composition = Composition::from_document(&single(&composition)?)?;
            validate_composition(&composition, cli.output)?;
        }
        Commands::Run { composite_kind, claim_kind, composed_kinds, definition, workers, dry_run } => {
            let mut config = ReconcilerConfig::from_env();
            if let Some(w) = workers.filter(|w| *w > 0) {
                config.workers = w;
            }
            config.dry_run |= dry_run;
            let definition = match definition {
                Some(p) => CompositeResourceDefinition::from_document(&single(&p)?)?,
                None => CompositeResourceDefinition::default(),
            };
            run(&composite_kind, &claim_kind, &composed_kinds, definition, config).await?;
        }
    }
    Ok(())
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

/// The only document of a manifest file.
fn single(path: &Path) -> Result<Document> {
    let mut docs = conflux_apply::parse_manifests(&read(path)?)?;
    match docs.len() {
        1 => Ok(docs.remove(0)),
        n => Err(anyhow!("{}: expected one document, found {}", path.display(), n)),
    }
}

fn print_rendered(out: &Rendered, output: Output) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(out)?),
        Output::Human => {
            for doc in &out.resources {
                print!("---\n{}", serde_yaml::to_string(doc)?);
            }
            for o in &out.outcomes {
                let name = o.resource.as_ref().map(|r| r.to_string()).unwrap_or_else(|| "-".into());
                eprintln!("{}\t{}\tready={}", o.template, name, o.ready);
            }
            for ev in &out.events {
                let level = match ev.type_ {
                    EventType::Normal => "normal",
                    EventType::Warning => "warning",
                };
                eprintln!("{}: {}: {}", level, ev.reason, ev.message);
            }
            if !out.connection_keys.is_empty() {
                eprintln!("connection details: {}", out.connection_keys.join(", "));
            }
        }
    }
    Ok(())
}

fn validate_composition(composition: &Composition, output: Output) -> Result<()> {
    let mut problems: Vec<String> = Vec::new();
    if let Err(e) = validate(composition) {
        problems.push(e.to_string());
    }
    let templates = match inline_patch_sets(composition) {
        Ok(ts) => ts,
        Err(e) => {
            problems.push(e.to_string());
            Vec::new()
        }
    };
    problems.extend(lint_transforms(composition).into_iter().map(|e| e.to_string()));
    problems.dedup();
    let patches: usize = templates.iter().map(|t| t.patches.len()).sum();

    match output {
        Output::Json => {
            let v = serde_json::json!({
                "composition": composition.name(),
                "resources": templates.len(),
                "patches": patches,
                "errors": problems,
            });
            println!("{}", serde_json::to_string_pretty(&v)?);
        }
        Output::Human => {
            println!("composition {}: {} resources, {} patches after inlining patch sets", composition.name(), templates.len(), patches);
            for p in &problems {
                println!("  error: {}", p);
            }
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("composition {:?} has {} problem(s)", composition.name(), problems.len()))
    }
}

async fn run(
    composite_kind: &str,
    claim_kind: &str,
    composed_kinds: &[String],
    definition: CompositeResourceDefinition,
    config: ReconcilerConfig,
) -> Result<()> {
    let (xr_api_version, xr_kind) = parse_kind_key(composite_kind)?;
    let (claim_api_version, claim_kind) = parse_kind_key(claim_kind)?;
    let kube = Arc::new(KubeStore::try_default().await?);
    let store: Arc<dyn ResourceStore> = kube.clone();
    let recorder = Arc::new(KubeEventRecorder::new(kube.client().clone(), "conflux"));

    let selector = Arc::new(SelectorChain::standard(definition, Arc::clone(&store)));
    let composites = CompositeReconciler::new(Arc::clone(&store), recorder.clone(), selector, config.clone());
    let claims = ClaimReconciler::new(
        Arc::clone(&store),
        recorder,
        TypeReference { api_version: xr_api_version.clone(), kind: xr_kind.clone() },
        config.clone(),
    );
    let xr_queue = WorkQueue::with_capacity(config.queue_cap);
    let claim_queue = WorkQueue::with_capacity(config.queue_cap);
    let xr_ctrl = Controller::new(Arc::new(composites), xr_queue.clone(), config.clone());
    let claim_ctrl = Controller::new(Arc::new(claims), claim_queue.clone(), config.clone());

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();
    let mut watch = |api_version: String, kind: String, mapping: Mapping, queue: Arc<WorkQueue>| {
        let kube = Arc::clone(&kube);
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = watch_into_queue(&kube, &api_version, &kind, mapping, queue, cancel.clone()).await {
                error!(kind = %kind, error = %format!("{:#}", e), "watch failed; shutting down");
                cancel.cancel();
            }
        }));
    };
    watch(xr_api_version.clone(), xr_kind.clone(), Mapping::Itself, xr_queue.clone());
    watch(xr_api_version.clone(), xr_kind.clone(), Mapping::Claim, claim_queue.clone());
    watch(claim_api_version, claim_kind, Mapping::Itself, claim_queue);
    for key in composed_kinds {
        let (api_version, kind) = parse_kind_key(key)?;
        let owner = Mapping::ControllerOf { api_version: xr_api_version.clone(), kind: xr_kind.clone() };
        watch(api_version, kind, owner, xr_queue.clone());
    }
    tasks.push(tokio::spawn(xr_ctrl.run(cancel.clone())));
    tasks.push(tokio::spawn(claim_ctrl.run(cancel.clone())));
    info!(composite = composite_kind, workers = config.workers, dry_run = config.dry_run, "controllers started");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupted; shutting down"),
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();
    for t in tasks {
        let _ = t.await;
    }
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = std::env::var("CONFLUX_LOG").unwrap_or_else(|_| "info".to_string());
    let _ = fmt().with_env_filter(EnvFilter::new(filter)).with_writer(std::io::stderr).with_target(true).try_init();
}

fn init_metrics() {
    use metrics_exporter_prometheus::PrometheusBuilder;
    if let Ok(addr) = std::env::var("CONFLUX_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let _ = PrometheusBuilder::new().with_http_listener(sock).install();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_flags() {
        let cli = Cli::try_parse_from([
            "confluxctl", "-o", "json", "run",
            "--composite-kind", "example.org/v1/XBucket",
            "--claim-kind", "example.org/v1/Bucket",
            "--composed-kind", "s3.example.org/v1/S3Bucket",
            "--composed-kind", "v1/ConfigMap",
        ])
        .unwrap();
        assert!(matches!(cli.output, Output::Json));
        match cli.command {
            Commands::Run { composed_kinds, .. } => assert_eq!(composed_kinds.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn validation_reports_undefined_patch_sets() {
        let composition = Composition::from_document(&serde_json::json!({
            "metadata": {"name": "broken"},
            "spec": {
                "compositeTypeRef": {"apiVersion": "example.org/v1", "kind": "XQueue"},
                "resources": [{
                    "name": "queue",
                    "base": {"apiVersion": "sqs.example.org/v1", "kind": "Queue"},
                    "patches": [{"type": "PatchSet", "patchSetName": "missing"}]
                }]
            }
        }))
        .unwrap();
        let err = validate_composition(&composition, Output::Json).unwrap_err();
        assert!(err.to_string().contains("problem"), "{}", err);
    }
}
