// evochora-asm (§6 "Assembler CLI (optional)"): `compile <input> <env> ->
// <artifact>`. Exit codes: 0 success, 1 diagnostics with errors, 2 usage
// error. The core never touches the filesystem (§1 non-goals); reading
// source files, reading the environment file, and writing the artifact
// are all this binary's job, not the library's.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use evochora_core::artifact::EnvironmentProperties;
use evochora_core::asm::{self, preprocess::SourceSet};

#[derive(Parser, Debug)]
#[command(name = "evochora-asm", about = "Compile an evochora program into a ProgramArtifact")]
struct Cli {
    /// Entry .asm file.
    input: PathBuf,

    /// `EnvironmentProperties` as JSON (only `shape` is consulted, to
    /// determine world dimensionality).
    env: PathBuf,

    /// Where to write the bincode-encoded `ProgramArtifact`.
    output: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::from(0),
        Err(Failure::Diagnostics(diags)) => {
            for err in &diags.0 {
                eprintln!("{}", err);
            }
            ExitCode::from(1)
        }
        Err(Failure::Usage(e)) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

enum Failure {
    Diagnostics(evochora_core::error::Diagnostics),
    Usage(anyhow::Error),
}

impl From<anyhow::Error> for Failure {
    fn from(e: anyhow::Error) -> Self {
        Failure::Usage(e)
    }
}

fn run(cli: &Cli) -> Result<(), Failure> {
    let env_text = std::fs::read_to_string(&cli.env)
        .with_context(|| format!("reading {}", cli.env.display()))?;
    let env: EnvironmentProperties = serde_json::from_str(&env_text)
        .with_context(|| format!("parsing {} as EnvironmentProperties", cli.env.display()))?;
    let dims = env.shape.len();

    let entry_name = file_key(&cli.input)?;
    let owned_sources = read_sibling_sources(&cli.input)?;
    let sources: SourceSet = owned_sources
        .iter()
        .map(|(name, text)| (name.clone(), text.as_str()))
        .collect::<HashMap<_, _>>();

    let program_id = cli
        .input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("program")
        .to_string();

    tracing::info!(input = %cli.input.display(), dims, "compiling");

    let artifact = asm::compile(&program_id, &entry_name, &sources, dims)
        .map_err(Failure::Diagnostics)?;

    artifact
        .validate()
        .map_err(|e| anyhow::anyhow!("compiled artifact failed validation: {}", e))?;

    let bytes = artifact
        .to_bytes()
        .map_err(|e| anyhow::anyhow!("serializing artifact: {}", e))?;
    std::fs::write(&cli.output, bytes)
        .with_context(|| format!("writing {}", cli.output.display()))?;

    tracing::info!(output = %cli.output.display(), "wrote artifact");
    Ok(())
}

/// The key a `.INCLUDE "..."` in this file would use to name itself:
/// its bare file name, since the core resolves includes against a flat
/// `SourceSet` rather than a directory tree (§4.6 "Preprocess").
fn file_key(path: &Path) -> Result<String, Failure> {
    path.file_name()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("{}: not a valid file name", path.display()).into())
}

/// Reads every file alongside `entry` into a `SourceSet`, so any
/// `.INCLUDE` the entry file names can resolve.
fn read_sibling_sources(entry: &Path) -> Result<HashMap<String, String>, Failure> {
    let dir = entry
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut out = HashMap::new();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("reading directory {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("reading directory {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = file_key(&path)?;
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        out.insert(name, text);
    }
    Ok(out)
}
