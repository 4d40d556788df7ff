use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{exit, Command, ExitStatus};

use api_topology_core::topology::TopologyConfig;
use clap::{Parser, Subcommand, ValueEnum};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the API topology workspace",
    long_about = "A unified CLI for synthesizing and deploying the API topology,\n\
                  running the contract-test gate, the delivery pipeline and CI checks."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the CloudFormation template for a stage
    Synth {
        #[arg(long, default_value = "dev")]
        stage: String,
        /// Topology profile (full|reduced)
        #[arg(long, default_value = "full")]
        profile: String,
        /// Output file path
        #[arg(long, default_value = "dist/template.json")]
        output: String,
        /// Render even when function packages are missing
        #[arg(long)]
        skip_package_check: bool,
    },
    /// Upload packages and deploy the service stack
    Deploy {
        #[arg(long, default_value = "dev")]
        stage: String,
        #[arg(long, env = "ARTIFACT_BUCKET")]
        artifact_bucket: String,
    },
    /// Run the contract-test collection against a deployed stage
    QaGate {
        #[arg(long, env = "API_URL_PARAMETER")]
        url_parameter: String,
    },
    /// Run the delivery pipeline locally, or print its plan
    Pipeline {
        #[arg(long)]
        plan_only: bool,
    },
    /// Build function binaries and package them as `dist/functions/<name>.zip`
    PackageFunctions {
        /// Topology descriptor listing the functions to package
        #[arg(long, default_value = "config/topology.json")]
        config: String,
        /// Cargo package providing one binary per function
        #[arg(long)]
        functions_package: Option<String>,
        /// Compilation target triple for function binaries
        #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
        target: String,
        /// Build profile used for binaries
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
    },
    /// Run Criterion benchmarks
    Bench,
    /// Compare benchmarks: stash changes, create baseline, restore, compare
    BenchCompare,
    /// Run CI checks (fmt, clippy, tests, synth, benchmarks)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Synthesize templates for every profile
    Synth,
    /// Run benchmarks
    Bench,
    /// Run check + synth + bench
    All,
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    fn as_cargo_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => None,
            Self::Release => Some("--release"),
        }
    }
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn git(args: &[&str]) -> ExitStatus {
    eprintln!("+ git {}", args.join(" "));
    Command::new("git")
        .args(args)
        .status()
        .expect("failed to execute git")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn run_git(args: &[&str]) {
    let status = git(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn run_deploy_bin(bin: &str, args: &[&str]) {
    let mut cargo_args = vec!["run", "-p", "api_topology_deploy", "--bin", bin, "--"];
    cargo_args.extend_from_slice(args);
    run_cargo(&cargo_args);
}

fn package_functions(
    config_path: &str,
    functions_package: Option<&str>,
    target: &str,
    profile: BuildProfile,
) {
    let text = fs::read_to_string(config_path)
        .unwrap_or_else(|error| panic!("failed to read {config_path}: {error}"));
    let config = TopologyConfig::from_json_str(&text)
        .unwrap_or_else(|error| panic!("invalid topology descriptor {config_path}: {error}"));

    ensure_rust_target_installed(target);

    if let Some(package) = functions_package {
        step("Build function binaries");
        let mut cargo_args = vec!["build", "-p", package, "--target", target, "--bins"];
        if let Some(flag) = profile.as_cargo_flag() {
            cargo_args.push(flag);
        }
        run_cargo(&cargo_args);
    }

    step("Package function zip artifacts");
    let target_dir = Path::new("target").join(target).join(profile.dir_name());
    let dist_dir = Path::new("dist/functions");
    fs::create_dir_all(dist_dir).expect("failed to create function dist directory");

    let mut packaged = Vec::with_capacity(config.functions.len());
    for function in &config.functions {
        let zip_path = dist_dir.join(format!("{}.zip", function.name));
        package_function_zip(&target_dir.join(binary_name(&function.name, target)), &zip_path);
        packaged.push(zip_path);
    }

    eprintln!("\nPackaged artifacts:");
    for path in packaged {
        eprintln!("- {}", path.display());
    }
}

fn ensure_rust_target_installed(target: &str) {
    let output = Command::new("rustup")
        .args(["target", "list", "--installed"])
        .output();

    let output = match output {
        Ok(value) => value,
        Err(error) => {
            eprintln!(
                "warning: failed to run `rustup target list --installed` ({error}); continuing without target preflight"
            );
            return;
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "failed to list installed rust targets; run `rustup target list --installed` manually. details: {}",
            stderr.trim()
        );
    }

    let installed = String::from_utf8_lossy(&output.stdout);
    if !installed.lines().any(|line| line.trim() == target) {
        panic!(
            "required rust target `{target}` is not installed. install it with `rustup target add {target}` and re-run `cargo run -p xtask -- package-functions`"
        );
    }
}

fn binary_name(bin_name: &str, target: &str) -> String {
    if target.contains("windows") {
        format!("{bin_name}.exe")
    } else {
        bin_name.to_string()
    }
}

fn package_function_zip(binary_path: &Path, zip_path: &Path) {
    if !binary_path.exists() {
        panic!("expected function binary at '{}'", binary_path.display());
    }

    let binary = fs::read(binary_path).expect("failed to read function binary");
    let file = fs::File::create(zip_path).expect("failed to create function zip");
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    zip.start_file("bootstrap", options)
        .expect("failed to start bootstrap entry in function zip");
    zip.write_all(&binary)
        .expect("failed to write bootstrap entry");
    zip.finish().expect("failed to finish function zip");
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    step("Test api_topology_core");
    run_cargo(&["test", "-p", "api_topology_core"]);

    step("Test api_topology_deploy");
    run_cargo(&["test", "-p", "api_topology_deploy"]);
}

fn ci_synth() {
    for profile in ["full", "reduced"] {
        step(&format!("Synthesize {profile} profile"));
        let output = format!("dist/template.{profile}.json");
        run_deploy_bin(
            "synth_topology",
            &[
                "--profile",
                profile,
                "--skip-package-check",
                "--output",
                &output,
            ],
        );
    }

    step("Plan delivery pipeline");
    run_deploy_bin("run_pipeline", &["--plan-only"]);
}

fn ci_bench() {
    step("Run benchmarks");
    run_cargo(&["bench", "--package", "api_topology_core", "--bench", "synthesis"]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Synth {
            stage,
            profile,
            output,
            skip_package_check,
        } => {
            let mut args = vec![
                "--stage",
                stage.as_str(),
                "--profile",
                profile.as_str(),
                "--output",
                output.as_str(),
            ];
            if skip_package_check {
                args.push("--skip-package-check");
            }
            run_deploy_bin("synth_topology", &args);
        }
        Commands::Deploy {
            stage,
            artifact_bucket,
        } => {
            run_deploy_bin(
                "deploy_topology",
                &["--stage", &stage, "--artifact-bucket", &artifact_bucket],
            );
        }
        Commands::QaGate { url_parameter } => {
            run_deploy_bin("qa_gate", &["--url-parameter", &url_parameter]);
        }
        Commands::Pipeline { plan_only } => {
            let args: &[&str] = if plan_only { &["--plan-only"] } else { &[] };
            run_deploy_bin("run_pipeline", args);
        }
        Commands::PackageFunctions {
            config,
            functions_package,
            target,
            profile,
        } => {
            package_functions(&config, functions_package.as_deref(), &target, profile);
        }
        Commands::Bench => {
            run_cargo(&["bench", "--package", "api_topology_core", "--bench", "synthesis"]);
        }
        Commands::BenchCompare => {
            let baseline_dir = Path::new("target/criterion");
            if baseline_dir.exists() {
                step("Removing existing benchmark data");
                std::fs::remove_dir_all(baseline_dir).expect("failed to remove target/criterion");
            }

            step("Stashing current changes");
            run_git(&[
                "stash",
                "push",
                "-m",
                "Temporary stash for benchmark comparison",
            ]);

            step("Running benchmark to create baseline");
            run_cargo(&[
                "bench",
                "--package",
                "api_topology_core",
                "--bench",
                "synthesis",
                "--",
                "--save-baseline",
                "main",
            ]);

            step("Reapplying changes");
            run_git(&["stash", "pop"]);

            step("Running benchmark comparing against baseline");
            run_cargo(&[
                "bench",
                "--package",
                "api_topology_core",
                "--bench",
                "synthesis",
                "--",
                "--baseline",
                "main",
            ]);

            eprintln!("\nDone! Check the output above to see performance comparison.");
        }
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Synth => ci_synth(),
                CiJob::Bench => ci_bench(),
                CiJob::All => {
                    ci_check();
                    ci_synth();
                    ci_bench();
                }
            }
            eprintln!("\nCI job passed.");
        }
    }
}
