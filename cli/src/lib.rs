mod branch_cmd;

pub use branch_cmd::BranchArgs;
pub use branch_cmd::BranchCli;
pub use branch_cmd::BranchCommand;
pub use branch_cmd::CreateArgs;
pub use branch_cmd::ListArgs;
pub use branch_cmd::ReconcileArgs;

use tracing_subscriber::EnvFilter;

/// Log to stderr so stdout stays parseable. `RUST_LOG` overrides the default
/// `warn` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if let Err(err) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
    {
        eprintln!("pgdesk: logging disabled, a subscriber is already installed: {err}");
    }
}
