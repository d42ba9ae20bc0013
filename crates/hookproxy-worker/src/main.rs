//! hookproxy worker - runs build backend hooks in an isolated process.
//!
//! Spawned by `hookproxy_core::WorkerPool`. Speaks the hookproxy IPC
//! protocol on stdin/stdout; logs go to stderr.

mod probe;
mod sample;

use clap::Parser;
use hookproxy_core::BackendRegistry;

#[derive(Parser)]
#[command(name = "hookproxy-worker")]
#[command(about = "Worker process that runs build backend hooks in isolation")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print the bundled backends and their hooks, then exit
    #[arg(long)]
    list_backends: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut registry = bundled_backends();

    if cli.list_backends {
        list_backends(&mut registry);
        return Ok(());
    }

    hookproxy_core::ipc::serve(registry)?;
    Ok(())
}

fn bundled_backends() -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry
        .register(sample::backend())
        .register(probe::backend())
        .register_loader(probe::BROKEN_NAME, probe::load_broken);
    registry
}

fn list_backends(registry: &mut BackendRegistry) {
    let names: Vec<String> = registry.names().into_iter().map(str::to_string).collect();
    for name in names {
        match registry.resolve(&name) {
            Ok(backend) => println!("{}: {}", name, backend.hook_names().join(", ")),
            Err(e) => println!("{}: unavailable ({})", name, e),
        }
    }
}
