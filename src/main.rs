//! Store Lane CLI
//!
//! Entry point for the `store-lane` command-line tool.

use clap::{Parser, Subcommand};
use lane_inspect::{ArtifactFormat, Inspector, InspectorConfig, InspectorInput, SystemToolRunner};
use lane_protocol::{AppRecord, LaneError, Platform};
use std::io::BufRead;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use store_lane::config::LaneConfig;
use store_lane::credentials::encrypt_refresh_token;
use store_lane::pipeline::{pipeline_from_config, BuildPipeline};

/// Exit code for a lock conflict, so wrappers can retry instead of
/// treating it as a hard failure.
const EXIT_CONFLICT: i32 = 3;

#[derive(Parser)]
#[command(name = "store-lane")]
#[command(about = "Build-and-publish lane for store-ready app binaries", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an app configuration (or update an existing one)
    Register {
        /// App identifier
        app_id: String,

        /// Display name
        #[arg(long)]
        name: String,

        /// Reverse-DNS package name expected in built artifacts
        #[arg(long)]
        package: String,

        /// Source website URL
        #[arg(long)]
        url: String,

        /// Theme color (hex)
        #[arg(long)]
        theme_color: Option<String>,

        /// Feature flags as key=value (comma-separated or repeated)
        #[arg(long = "feature", value_delimiter = ',')]
        features: Vec<String>,

        /// Launcher icon glyph
        #[arg(long)]
        icon_glyph: Option<String>,
    },

    /// Run one build for an app
    Build {
        /// App identifier
        app_id: String,

        /// Target platform (android, web)
        #[arg(long, default_value = "android")]
        platform: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Publish the app's current artifact to the configured track
    Publish {
        /// App identifier
        app_id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show the app record and its latest jobs
    Status {
        /// App identifier
        app_id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Store a user-owned publish refresh token for an app (read from stdin)
    Connect {
        /// App identifier
        app_id: String,
    },

    /// Inspect an artifact without touching job state
    Inspect {
        /// Path to the .aab or .apk file
        artifact: PathBuf,

        /// Expected package name
        #[arg(long)]
        package: String,

        /// Previously published version code, if any
        #[arg(long)]
        previous_version_code: Option<i64>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("store_lane=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Register {
            app_id,
            name,
            package,
            url,
            theme_color,
            features,
            icon_glyph,
        } => {
            run_register(&app_id, &name, &package, &url, theme_color, features, icon_glyph);
        }
        Commands::Build {
            app_id,
            platform,
            json,
        } => {
            run_build(&app_id, &platform, json);
        }
        Commands::Publish { app_id, json } => {
            run_publish(&app_id, json);
        }
        Commands::Status { app_id, json } => {
            run_status(&app_id, json);
        }
        Commands::Connect { app_id } => {
            run_connect(&app_id);
        }
        Commands::Inspect {
            artifact,
            package,
            previous_version_code,
            json,
        } => {
            run_inspect(&artifact, &package, previous_version_code, json);
        }
    }
}

fn load_pipeline() -> BuildPipeline {
    let config = match LaneConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e.message);
            process::exit(1);
        }
    };
    match pipeline_from_config(&config) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error opening lane state: {}", e.message);
            process::exit(1);
        }
    }
}

fn exit_for(err: &LaneError) -> ! {
    eprintln!("Error: {}", err.message);
    if err.is_conflict() {
        process::exit(EXIT_CONFLICT);
    }
    process::exit(1);
}

fn run_register(
    app_id: &str,
    name: &str,
    package: &str,
    url: &str,
    theme_color: Option<String>,
    features: Vec<String>,
    icon_glyph: Option<String>,
) {
    let pipeline = load_pipeline();
    let store = pipeline.scheduler().store();

    // Start from the stored record so a re-register keeps the published
    // version code and any connected account.
    let mut app = store
        .get_app(app_id)
        .unwrap_or_else(|_| AppRecord::new(app_id, name, package, url));
    app.name = name.to_string();
    app.package_name = package.to_string();
    app.website_url = url.to_string();
    if let Some(color) = theme_color {
        app.theme_color = color;
    }
    app.icon_glyph = icon_glyph;
    for pair in features {
        match pair.split_once('=') {
            Some((k, v)) if !k.is_empty() => {
                app.features.insert(k.to_string(), v.to_string());
            }
            _ => {
                eprintln!("Error: feature must be key=value, got '{}'", pair);
                process::exit(1);
            }
        }
    }

    if let Err(e) = store.upsert_app(&app) {
        eprintln!("Error storing app: {}", e);
        process::exit(1);
    }
    println!("Registered {} ({})", app.app_id, app.package_name);
}

fn run_build(app_id: &str, platform: &str, json_output: bool) {
    let Some(platform) = Platform::parse(platform) else {
        eprintln!("Error: unknown platform '{}' (android, web)", platform);
        process::exit(1);
    };

    let pipeline = load_pipeline();
    let job = match pipeline.execute_build(app_id, platform) {
        Ok(job) => job,
        Err(e) => exit_for(&e),
    };

    if json_output {
        match serde_json::to_string_pretty(&job) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
    } else {
        println!("Job {}: {}", job.id, job.state.as_str());
        if let Some(ref error) = job.error {
            println!("  Error: {}", error);
        }
    }

    if job.state == lane_protocol::JobState::Succeeded {
        process::exit(0);
    }
    process::exit(1);
}

fn run_publish(app_id: &str, json_output: bool) {
    let pipeline = load_pipeline();
    let receipt = match pipeline.publish(app_id) {
        Ok(receipt) => receipt,
        Err(e) => exit_for(&e),
    };

    if json_output {
        let out = serde_json::json!({
            "package_name": receipt.package_name,
            "version_code": receipt.version_code,
            "track": receipt.track,
            "track_url": receipt.track_url,
        });
        println!("{}", out);
    } else {
        println!(
            "Published {} version {} to {}",
            receipt.package_name, receipt.version_code, receipt.track
        );
        println!("  {}", receipt.track_url);
    }
}

fn run_status(app_id: &str, json_output: bool) {
    let pipeline = load_pipeline();
    let store = pipeline.scheduler().store();

    let app = match store.get_app(app_id) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    let android = store.latest_job(app_id, Platform::Android).ok().flatten();
    let web = store.latest_job(app_id, Platform::Web).ok().flatten();

    if json_output {
        let out = serde_json::json!({
            "app": app,
            "latest": {
                "android": android,
                "web": web,
            }
        });
        match serde_json::to_string_pretty(&out) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    println!("{} ({})", app.name, app.package_name);
    println!("  Published version code: {}", app.version_code);
    if let Some(ref path) = app.artifact_path {
        println!("  Artifact: {}", path);
    }
    if let Some(ref error) = app.build_error {
        println!("  Last build error: {}", error);
    }
    for (label, job) in [("android", android), ("web", web)] {
        if let Some(job) = job {
            println!(
                "  Latest {} job: {} (attempt {})",
                label,
                job.state.as_str(),
                job.attempts
            );
        }
    }
}

fn run_connect(app_id: &str) {
    let pipeline = load_pipeline();
    let store = pipeline.scheduler().store();
    let config = match LaneConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {}", e.message);
            process::exit(1);
        }
    };
    let Some(key) = config.publisher.token_decryption_key else {
        eprintln!("Error: LANE_PUBLISH_TOKEN_KEY is not set");
        process::exit(1);
    };

    // The token arrives on stdin so it never shows up in shell history or
    // the process table.
    let mut token = String::new();
    if let Err(e) = std::io::stdin().lock().read_line(&mut token) {
        eprintln!("Error reading token: {}", e);
        process::exit(1);
    }
    let token = token.trim();
    if token.is_empty() {
        eprintln!("Error: expected the refresh token on stdin");
        process::exit(1);
    }

    let blob = match encrypt_refresh_token(&key, token) {
        Ok(blob) => blob,
        Err(e) => {
            eprintln!("Error encrypting token: {}", e.message);
            process::exit(1);
        }
    };

    let mut app = match store.get_app(app_id) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    app.publish_token_enc = Some(blob);
    if let Err(e) = store.upsert_app(&app) {
        eprintln!("Error storing app: {}", e);
        process::exit(1);
    }
    println!("Connected store account for {}", app_id);
}

fn run_inspect(artifact: &PathBuf, package: &str, previous_version_code: Option<i64>, json_output: bool) {
    let inspector = Inspector::new(InspectorConfig::default(), Arc::new(SystemToolRunner));
    let verdict = inspector.inspect(&InspectorInput {
        artifact: artifact.clone(),
        format: ArtifactFormat::from_path(artifact),
        expected_package: package.to_string(),
        previous_version_code,
    });

    if json_output {
        match serde_json::to_string_pretty(&verdict) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
    } else {
        println!("Valid: {}", verdict.valid);
        if let Some(ref meta) = verdict.metadata {
            if let Some(ref pkg) = meta.package_name {
                println!("  Package: {}", pkg);
            }
            if let Some(code) = meta.version_code {
                println!("  Version code: {}", code);
            }
            if let Some(sdk) = meta.target_sdk {
                println!("  Target SDK: {}", sdk);
            }
        }
        for error in &verdict.errors {
            println!("  Error: {}", error);
        }
        for warning in &verdict.warnings {
            println!("  Warning: {}", warning);
        }
    }

    if verdict.valid {
        process::exit(0);
    }
    process::exit(1);
}
