//! `relaytun subsystem`: print the request a peer dial would send.

use std::io::{self, Write};

use relaytun_tunnel::{NetAddr, subsystem_request};

/// Arguments for `relaytun subsystem`.
#[derive(clap::Args, Debug)]
pub struct SubsystemArgs {
    /// Destination inside the peer cluster, e.g. `host:22`.
    pub dest: String,
    /// Name of the peer cluster.
    pub cluster: String,
    /// Network of the destination address.
    #[arg(long, default_value = "tcp")]
    pub network: String,
}

pub fn run(args: &SubsystemArgs) -> anyhow::Result<()> {
    let mut out = io::stdout();
    write_request(&mut out, args)
}

fn write_request(out: &mut impl Write, args: &SubsystemArgs) -> anyhow::Result<()> {
    if args.cluster.is_empty() {
        anyhow::bail!("Cluster name must not be empty");
    }
    let dest = NetAddr::new(args.network.as_str(), args.dest.as_str());
    writeln!(out, "{}", subsystem_request(&dest, &args.cluster))?;
    Ok(())
}
