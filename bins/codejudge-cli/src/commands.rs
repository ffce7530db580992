// CLI commands for running and inspecting submissions
use anyhow::{Context, Result};
use codejudge_common::types::{ExecutionRequest, ExecutionResult};
use codejudge_engine::mode::resolve_mode;
use codejudge_engine::process::ProcessRunner;
use codejudge_engine::{EngineConfig, Executor, ToolchainRegistry};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const VERSION_TIMEOUT: Duration = Duration::from_secs(5);

/// Read a request from a file, or from stdin when the path is `-`
pub fn load_request(path: &Path) -> Result<ExecutionRequest> {
    let content = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read request from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    };

    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse request {}", path.display()))
}

fn engine_config(toolchains: Option<&Path>) -> Result<EngineConfig> {
    let config = EngineConfig::from_env()?;
    match toolchains {
        Some(path) => {
            let registry = ToolchainRegistry::load(path)?.with_env_overrides();
            Ok(config.with_toolchains(registry))
        }
        None => Ok(config),
    }
}

pub fn render_result(result: &ExecutionResult, pretty: bool) -> Result<String> {
    let text = if pretty {
        serde_json::to_string_pretty(result)
    } else {
        serde_json::to_string(result)
    };
    text.context("Failed to serialize execution result")
}

/// Execute a request file and print the result document
pub async fn run_request(
    path: &Path,
    pretty: bool,
    toolchains: Option<&Path>,
    workspace_root: Option<PathBuf>,
) -> Result<()> {
    let request = load_request(path)?;
    let mut config = engine_config(toolchains)?;
    if let Some(root) = workspace_root {
        config = config.with_workspace_root(root);
    }

    let result = Executor::new(config).execute(&request).await;
    if let Some(error) = &result.system_error {
        warn!(error = %error, "Request finished with a system error");
    }

    println!("{}", render_result(&result, pretty)?);
    Ok(())
}

pub fn detect_mode(path: &Path) -> Result<()> {
    let request = load_request(path)?;
    let mode = resolve_mode(
        request.language,
        &request.code,
        &request.test_cases,
        request.mode,
    );
    println!("{}", mode);
    Ok(())
}

/// Print each toolchain and whether its compiler answers `--version`
pub async fn list_toolchains(toolchains: Option<&Path>) -> Result<()> {
    let config = engine_config(toolchains)?;
    let mut entries: Vec<_> = config.toolchains.iter().collect();
    entries.sort_by_key(|t| t.language.to_string());

    println!("📦 Configured toolchains:");
    for toolchain in entries {
        let version_check = ProcessRunner::new(&toolchain.compiler)
            .args(["--version"])
            .timeout(VERSION_TIMEOUT)
            .run()
            .await;

        match version_check {
            Ok(output) if output.success() => {
                let version = output.stdout.lines().next().unwrap_or_default().trim();
                info!(
                    language = %toolchain.language,
                    compiler = %toolchain.compiler,
                    "Compiler available"
                );
                println!(
                    "  ✅ {:<4} {} {} ({})",
                    toolchain.language,
                    toolchain.compiler,
                    toolchain.compile_args().join(" "),
                    version
                );
            }
            Ok(output) => {
                println!(
                    "  ⚠️  {:<4} {} exited with {:?}",
                    toolchain.language, toolchain.compiler, output.exit_code
                );
            }
            Err(e) => {
                println!("  ❌ {:<4} {}: {}", toolchain.language, toolchain.compiler, e);
            }
        }
    }
    println!("  ✅ javascript (embedded sandbox)");

    Ok(())
}
