use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::{self, BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chunkbox_core::access::{self, Role};
use chunkbox_core::audit::{AuditSink, JsonlAudit, TracingAudit};
use chunkbox_core::chunk::{existence, ChunkEngine, ChunkStatus, SplitConfig, VerifySummary, DEFAULT_BLOCK_SIZE};
use chunkbox_core::manifest::{self, ChunkManifest};
use chunkbox_core::progress::Progress;
use chunkbox_core::share::{update_sharing, ShareChange};
use chunkbox_core::shell::{Output, Session};
use chunkbox_core::workspace::{PathPolicy, Workspace};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RoleArg { Admin, User }

impl From<RoleArg> for Role {
    fn from(r: RoleArg) -> Self {
        match r { RoleArg::Admin => Role::Admin, RoleArg::User => Role::User }
    }
}

#[derive(Parser)]
#[command(name="chunkbox", version, about="Workspace-confined chunking, CRC-32 integrity checks and a restricted shell")]
struct Cli {
    #[command(flatten)] global: Global,
    #[command(subcommand)] cmd: Cmd,
}

#[derive(Args)]
struct Global {
    /// Directory holding one workspace per user (default: $HOME/workspace)
    #[arg(long, env="CHUNKBOX_HOME", global=true)] home: Option<PathBuf>,
    /// Acting identity (default: $USER)
    #[arg(long, env="CHUNKBOX_USER", global=true)] user: Option<String>,
    #[arg(long, env="CHUNKBOX_ROLE", value_enum, default_value_t=RoleArg::User, global=true)] role: RoleArg,
    /// Append audit events as JSON lines here instead of logging them
    #[arg(long, env="CHUNKBOX_AUDIT_LOG", global=true)] audit_log: Option<PathBuf>,
    #[arg(long, default_value_t=false, global=true)] follow_symlinks: bool,
    /// Storage container id recorded on chunk audit events
    #[arg(long, env="CHUNKBOX_CONTAINER", global=true)] container: Option<String>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Split a file into chunks inside the workspace and write its manifest
    Split {
        source: PathBuf,
        /// Base name for chunks and manifest (default: the source file name)
        #[arg(long)] name: Option<String>,
        #[arg(long, default_value_t=DEFAULT_BLOCK_SIZE)] block_size: usize,
        #[arg(long, default_value_t=false)] progress: bool,
    },
    /// Recompute every chunk checksum against the manifest
    Verify { name: String, #[arg(long, default_value_t=false)] progress: bool },
    /// Report which chunks named in the manifest exist
    Check { name: String },
    /// Rebuild the original file from verified chunks
    Reassemble { name: String, dest: PathBuf },
    /// Show the access decision for the acting user
    Access { name: String },
    /// Grant (or revoke) another user's access
    Share { name: String, grantee: String, #[arg(long, default_value_t=false)] revoke: bool },
    /// Interactive restricted shell over the workspace
    Shell,
}

struct Ctx { ws: Workspace, identity: String, role: Role, container: Option<String>, audit: Arc<dyn AuditSink> }

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .try_init();

    let cli = Cli::parse();
    let ctx = context(&cli.global)?;
    match cli.cmd {
        Cmd::Split { source, name, block_size, progress } => split(&ctx, &source, name, block_size, progress)?,
        Cmd::Verify { name, progress } => verify(&ctx, &name, progress)?,
        Cmd::Check { name } => check(&ctx, &name)?,
        Cmd::Reassemble { name, dest } => reassemble(&ctx, &name, &dest)?,
        Cmd::Access { name } => show_access(&ctx, &name)?,
        Cmd::Share { name, grantee, revoke } => share(&ctx, &name, &grantee, revoke)?,
        Cmd::Shell => shell(ctx)?,
    }
    Ok(())
}

fn context(g: &Global) -> Result<Ctx> {
    let identity = g.user.clone()
        .or_else(|| std::env::var("USER").ok())
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| anyhow!("no identity: pass --user or set CHUNKBOX_USER"))?;
    let home = match &g.home {
        Some(h) => h.clone(),
        None => std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".")).join("workspace"),
    };
    let ws = Workspace::for_identity(&home, &identity)?
        .with_policy(PathPolicy { follow_symlinks: g.follow_symlinks });
    tracing::debug!(%identity, root = %ws.root().display(), "workspace selected");
    let audit: Arc<dyn AuditSink> = match &g.audit_log {
        Some(p) => Arc::new(JsonlAudit::new(p)),
        None => Arc::new(TracingAudit),
    };
    Ok(Ctx { ws, identity, role: g.role.into(), container: g.container.clone(), audit })
}

fn engine(ctx: &Ctx, show_progress: bool) -> ChunkEngine {
    let engine = ChunkEngine::new(&ctx.identity, ctx.audit.clone()).with_progress(Progress::new(show_progress));
    match &ctx.container {
        Some(id) => engine.with_container(id.as_str()),
        None => engine,
    }
}

/// Load `<name>.meta.json` and refuse identities the manifest does not admit.
fn load_authorized(ctx: &Ctx, name: &str) -> Result<ChunkManifest> {
    let path = ctx.ws.resolve_flat(&manifest::manifest_name(name))?;
    let mf = manifest::load(&path)?;
    let decision = access::evaluate(&ctx.identity, ctx.role, &mf);
    if !decision.is_allowed() {
        bail!("{} may not access {}", ctx.identity, name);
    }
    Ok(mf)
}

fn split(ctx: &Ctx, source: &Path, name: Option<String>, block_size: usize, progress: bool) -> Result<()> {
    let base = match name {
        Some(n) => n,
        None => source.file_name().map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("cannot derive a base name from {}", source.display()))?,
    };
    let cfg = SplitConfig { block_size, owner: ctx.identity.clone() };
    let (mf, path) = engine(ctx, progress).ingest(source, &ctx.ws, &base, &cfg)
        .with_context(|| format!("split {}", source.display()))?;
    eprintln!("Wrote {} chunk(s) of up to {} bytes for {} under {}", mf.total_chunks, block_size, base, ctx.ws.root().display());
    eprintln!("Manifest: {}", path.display());
    Ok(())
}

fn verify(ctx: &Ctx, name: &str, progress: bool) -> Result<()> {
    let mf = load_authorized(ctx, name)?;
    let results = engine(ctx, progress).verify(&ctx.ws, &mf)?;
    for r in &results {
        match &r.status {
            ChunkStatus::Match => {}
            ChunkStatus::Mismatch { expected, actual } => eprintln!("{}: MISMATCH expected {} computed {}", r.name, expected, actual),
            ChunkStatus::Missing => eprintln!("{}: MISSING", r.name),
        }
    }
    let s = VerifySummary::of(&results);
    eprintln!("Chunks ok={}, bad={}, missing={}", s.matched, s.mismatched, s.missing);
    if s.is_intact() { println!("OK"); } else { println!("BAD"); }
    Ok(())
}

fn check(ctx: &Ctx, name: &str) -> Result<()> {
    let mf = load_authorized(ctx, name)?;
    let found = existence(&ctx.ws, &mf)?;
    let present = found.iter().filter(|(_, ok)| *ok).count();
    for (chunk, ok) in &found {
        println!("  {} {}", if *ok { "✓" } else { "✗" }, chunk);
    }
    println!("{}/{} chunk(s) present", present, found.len());
    Ok(())
}

fn reassemble(ctx: &Ctx, name: &str, dest: &Path) -> Result<()> {
    let mf = load_authorized(ctx, name)?;
    let n = engine(ctx, false).reassemble(&ctx.ws, &mf, dest)
        .with_context(|| format!("reassemble {} into {}", name, dest.display()))?;
    eprintln!("Wrote {} bytes to {}", n, dest.display());
    Ok(())
}

fn show_access(ctx: &Ctx, name: &str) -> Result<()> {
    let path = ctx.ws.resolve_flat(&manifest::manifest_name(name))?;
    let mf = manifest::load(&path)?;
    println!("{}", access::evaluate(&ctx.identity, ctx.role, &mf));
    Ok(())
}

fn share(ctx: &Ctx, name: &str, grantee: &str, revoke: bool) -> Result<()> {
    let change = if revoke { ShareChange::Revoke } else { ShareChange::Grant };
    let (mf, changed) = update_sharing(&ctx.ws, name, &ctx.identity, ctx.role, grantee, change, &*ctx.audit)?;
    if !changed { eprintln!("No change for {}", grantee); }
    println!("allowedUsers: [{}]", mf.allowed_users.join(", "));
    Ok(())
}

fn shell(ctx: Ctx) -> Result<()> {
    let interactive = io::stdin().is_terminal();
    let mut session = Session::open(&ctx.identity, ctx.role, ctx.ws, ctx.audit)?;
    if interactive {
        for line in session.banner() { println!("{line}"); }
        println!("(Ctrl-D to leave)");
        let mut rl = rustyline::DefaultEditor::new()?;
        loop {
            match rl.readline("> ") {
                Ok(line) => {
                    if !line.trim().is_empty() { let _ = rl.add_history_entry(line.as_str()); }
                    render(&session.execute(&line), true);
                }
                Err(rustyline::error::ReadlineError::Interrupted | rustyline::error::ReadlineError::Eof) => break,
                Err(e) => { session.close(); return Err(e.into()); }
            }
        }
    } else {
        for line in io::stdin().lock().lines() {
            let line = line.context("read command")?;
            render(&session.execute(&line), false);
        }
    }
    session.close();
    Ok(())
}

fn render(out: &Output, interactive: bool) {
    if out.cleared && interactive { print!("\x1B[2J\x1B[H"); }
    for line in &out.lines { println!("{line}"); }
}
