//! CLI module - Command-line interface definitions and handlers

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::backends::go::{GoOrigin, OriginMode};
use crate::cache::layout::{ArtifactKind, CacheLayout};
use crate::core::error::ProxyError;
use crate::core::escape;
use crate::core::model::{ItemError, ResultItem, ResultSet};
use crate::core::render::{OutputFormat, RenderConfig, Renderer};
use crate::core::version::ModuleKey;
use crate::proxy::{ArtifactRequest, Proxy};

/// modcache - a caching Go module proxy.
#[derive(Parser, Debug)]
#[command(name = "modcache")]
#[command(
    author,
    version,
    about,
    long_about = r#"modcache answers the Go module proxy protocol from a local module cache.

Requests that are already cached are served straight from disk. Misses run the
go tool once per module at a time, and concurrent requests for the same module
wait for that fetch instead of starting their own.

Cache layout (shared with the go tool):
    <cache>/<module>/@v/list
    <cache>/<module>/@v/<version>.info | .mod | .zip

Examples:
    modcache serve --addr :6633
    modcache get github.com/pkg/errors/@v/v0.9.1.mod
    modcache resolve github.com/pkg/errors 614d223
    modcache escape encode github.com/BurntSushi/toml
    modcache doctor
"#
)]
pub struct Cli {
    /// GOPATH whose module cache is served.
    #[arg(
        long,
        global = true,
        env = "GOPATH",
        value_name = "GOPATH",
        long_help = "GOPATH whose module download cache is served. Only the first entry of a\n\
path list is used. The cache lives at $GOPATH/pkg/mod/cache/download unless\n\
--cache-dir is given. Also exported to the go tool."
    )]
    pub gopath: Option<String>,

    /// Module download cache directory.
    #[arg(
        long,
        global = true,
        env = "MODCACHE_DIR",
        value_name = "DIR",
        long_help = "Module download cache directory. Overrides the location derived from\n\
--gopath. The go tool must write to the same place for fetched artifacts to be\n\
found."
    )]
    pub cache_dir: Option<PathBuf>,

    /// go binary used to fetch modules.
    #[arg(long, global = true, env = "MODCACHE_GO", default_value = "go", value_name = "GO")]
    pub go: String,

    /// How the go tool is invoked (download/get).
    #[arg(
        long,
        global = true,
        default_value = "download",
        value_name = "MODE",
        long_help = "How the go tool is invoked on a cache miss.\n\n\
Supported values:\n\
- download (default): go mod download -json, resolved version read from JSON\n\
- get: go get -d, resolved version scanned from progress output"
    )]
    pub origin_mode: String,

    /// Seconds a single origin fetch may take.
    #[arg(long, global = true, default_value = "300", value_name = "SECS")]
    pub fetch_timeout: u64,

    /// Directory the go tool runs in.
    #[arg(
        long,
        global = true,
        value_name = "DIR",
        long_help = "Directory the go tool runs in. A stub go.mod is written there if missing.\n\n\
Defaults to a modcache-work directory under the system temp dir."
    )]
    pub workdir: Option<PathBuf>,

    /// Output format for inspection commands (jsonl/json/md).
    #[arg(long, global = true, default_value = "jsonl", value_name = "FORMAT")]
    pub format: String,

    /// Pretty-print JSON/JSONL output with indentation.
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Quiet mode (warnings and errors only).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug logging).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP module proxy.
    #[command(long_about = "Serve GET /{module}/@v/list, /{module}/@v/{version}.info, .mod and .zip.\n\n\
Malformed paths and non-GET methods get an empty 404. Resolution failures get a\n\
500 whose body is the error text.\n\n\
Example:\n\
  modcache serve --addr :6633\n")]
    Serve {
        /// Listen address; `:port` binds all interfaces.
        #[arg(long, default_value = ":6633", value_name = "ADDR")]
        addr: String,
    },

    /// Answer one proxy request path and write the body to stdout.
    #[command(long_about = "Run a single request through the proxy without starting a server.\n\
The path is the same as the HTTP path, with or without the leading '/'.\n\n\
Examples:\n\
  modcache get github.com/pkg/errors/@v/list\n\
  modcache get github.com/pkg/errors/@v/v0.9.1.info\n")]
    Get {
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Resolve a version token from the cache only.
    #[command(long_about = "Match a version token against the versions already known for a module.\n\
Exact tokens must be cached verbatim; lowercase hex tokens match the revision\n\
suffix of cached pseudo-versions. Never contacts the origin.\n\n\
Example:\n\
  modcache resolve github.com/pkg/errors 614d223\n")]
    Resolve {
        #[arg(value_name = "MODULE")]
        module: String,

        #[arg(value_name = "TOKEN")]
        token: String,
    },

    /// Convert between module paths and their case-escaped cache form.
    Escape {
        #[command(subcommand)]
        action: EscapeCommands,
    },

    /// Check the go tool and cache directory.
    Doctor,
}

#[derive(Subcommand, Debug)]
pub enum EscapeCommands {
    /// Escape uppercase letters (`Foo` -> `!foo`).
    Encode {
        #[arg(value_name = "PATH")]
        path: String,
    },
    /// Reverse the escaping; rejects malformed input.
    Decode {
        #[arg(value_name = "PATH")]
        path: String,
    },
}

/// Settings shared by every command, resolved from flags and environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache_root: PathBuf,
    pub gopath: Option<PathBuf>,
    pub go: String,
    pub mode: OriginMode,
    pub fetch_timeout: Duration,
    pub workdir: PathBuf,
}

impl Settings {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let gopath = cli
            .gopath
            .as_deref()
            .and_then(|list| std::env::split_paths(list).next())
            .filter(|p| !p.as_os_str().is_empty());

        let cache_root = match (&cli.cache_dir, &gopath) {
            (Some(dir), _) => dir.clone(),
            (None, Some(gopath)) => download_cache(gopath),
            (None, None) => bail!("missing $GOPATH (set GOPATH or pass --cache-dir)"),
        };

        let mode: OriginMode = cli.origin_mode.parse().map_err(anyhow::Error::msg)?;
        if cli.fetch_timeout == 0 {
            bail!("--fetch-timeout must be at least 1 second");
        }

        Ok(Self {
            cache_root,
            gopath,
            go: cli.go.clone(),
            mode,
            fetch_timeout: Duration::from_secs(cli.fetch_timeout),
            workdir: cli
                .workdir
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join("modcache-work")),
        })
    }

    pub fn origin(&self) -> GoOrigin {
        GoOrigin {
            go: self.go.clone(),
            workdir: self.workdir.clone(),
            gopath: self.gopath.clone(),
            mode: self.mode,
        }
    }

    /// Create the cache root and go working directory, then build the proxy.
    pub fn build_proxy(&self) -> Result<Proxy> {
        std::fs::create_dir_all(&self.cache_root).with_context(|| {
            format!("Failed to create cache directory {}", self.cache_root.display())
        })?;
        let origin = self.origin();
        origin
            .prepare_workdir()
            .with_context(|| format!("Failed to prepare {}", self.workdir.display()))?;

        Ok(Proxy::new(
            CacheLayout::new(&self.cache_root),
            Arc::new(origin),
            self.fetch_timeout,
        ))
    }
}

/// `$GOPATH/pkg/mod/cache/download`
pub fn download_cache(gopath: &Path) -> PathBuf {
    gopath.join("pkg").join("mod").join("cache").join("download")
}

/// Run the CLI with parsed arguments
pub fn run(cli: Cli) -> Result<()> {
    let format: OutputFormat = cli.format.parse().unwrap_or_default();
    let render_config = RenderConfig::with_pretty(format, cli.pretty);

    match &cli.command {
        Commands::Escape { action } => run_escape(action, render_config),
        Commands::Doctor => {
            let settings = Settings::from_cli(&cli)?;
            crate::backends::doctor::run_doctor(&settings, render_config)
        }
        Commands::Serve { addr } => {
            let settings = Settings::from_cli(&cli)?;
            let addr = crate::server::parse_addr(addr)?;
            let proxy = Arc::new(settings.build_proxy()?);
            tracing::info!(
                go = %settings.go,
                mode = ?settings.mode,
                timeout_secs = settings.fetch_timeout.as_secs(),
                workdir = %settings.workdir.display(),
                "origin configured"
            );
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(crate::server::serve(proxy, addr))
        }
        Commands::Get { path } => {
            let settings = Settings::from_cli(&cli)?;
            run_get(&settings.build_proxy()?, path)
        }
        Commands::Resolve { module, token } => {
            let settings = Settings::from_cli(&cli)?;
            run_resolve(&settings.build_proxy()?, module, token, render_config)
        }
    }
}

fn run_get(proxy: &Proxy, path: &str) -> Result<()> {
    let raw = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    let request = ArtifactRequest::parse(&raw).map_err(|e| match e {
        ProxyError::BadRequest(_) | ProxyError::Codec(_) => anyhow::anyhow!("not found: {}", e),
        other => other.into(),
    })?;

    let artifact = proxy.serve(&request)?;
    tracing::debug!(path = %artifact.path.display(), bytes = artifact.body.len(), "served");
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&artifact.body)?;
    stdout.flush()?;
    Ok(())
}

fn run_resolve(proxy: &Proxy, module: &str, token: &str, render_config: RenderConfig) -> Result<()> {
    let module = ModuleKey::parse(module)?;
    let resolution = proxy.lookup(&module, token)?;

    let mut item = ResultItem::version(module.as_str(), &resolution.version, resolution.found);
    match proxy
        .layout()
        .locate(&module, &resolution.version, ArtifactKind::Info)
    {
        Ok(path) => item = item.with_path(path.to_string_lossy()),
        Err(e) => item = item.with_error(ItemError::from(&e)),
    }

    let mut result_set = ResultSet::new();
    result_set.push(item);
    println!("{}", Renderer::with_config(render_config).render(&result_set));
    Ok(())
}

fn run_escape(action: &EscapeCommands, render_config: RenderConfig) -> Result<()> {
    let item = match action {
        EscapeCommands::Encode { path } => match escape::encode(path) {
            Ok(encoded) => ResultItem::path(encoded),
            Err(e) => ResultItem::error(ItemError::from(&e)),
        },
        EscapeCommands::Decode { path } => match escape::decode(path) {
            Some(decoded) => ResultItem::path(decoded),
            None => ResultItem::error(ItemError::new(
                "CODEC",
                format!("{:?} is not a valid escaped path", path),
            )),
        },
    };

    let mut result_set = ResultSet::new();
    result_set.push(item);
    println!("{}", Renderer::with_config(render_config).render(&result_set));

    if result_set.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}
