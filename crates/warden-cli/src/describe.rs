//! # Describe — List the selectable paths of a policy.
//!
//! ```bash
//! warden describe aws
//! warden describe ./policies/aws.yml
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;
use warden_core::Policy;
use warden_engine::{describe_paths, nested_example, parse_and_detect};

use crate::config::WardenConfig;
use crate::local_loader;

/// Arguments for `warden describe`.
#[derive(Args, Debug)]
pub struct DescribeArgs {
    /// Policy source to describe. A selector, if given, is ignored.
    pub policy: String,

    /// Directory bare policy names are resolved in.
    #[arg(long)]
    pub policy_dir: Option<PathBuf>,
}

/// Execute the describe subcommand.
pub async fn run_describe(
    args: &DescribeArgs,
    config: &WardenConfig,
    cancel: CancellationToken,
) -> Result<u8> {
    let mut policy = parse_and_detect(&args.policy)?;
    policy.selector = None;
    let directory = args
        .policy_dir
        .clone()
        .unwrap_or_else(|| config.policy_directory.clone());

    let loaded = local_loader().load(&cancel, &directory, policy).await?;
    print!("{}", render_description(&loaded));
    Ok(0)
}

/// Path table followed by a usage hint.
pub fn render_description(policy: &Policy) -> String {
    let paths = describe_paths(policy);
    let width = paths.iter().map(|(p, _)| p.len()).max().unwrap_or(0);

    let mut out = format!("Available policies for {}:\n\n", policy.name);
    for (path, title) in &paths {
        out.push_str(&format!("  {path:<width$}  {title}\n"));
    }
    out.push_str(&format!(
        "\nTo run a subset, pass its path: warden run {}\n",
        nested_example(policy)
    ));
    out
}
