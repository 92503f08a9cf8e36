use anyhow::Context;
use clap::Parser;
use pgadmin_supervisor::k8s::pod::{pod, pod_security_context, PgAdminInstance};

/// Prints the PodSpec for a supervised pgAdmin instance as JSON.
#[derive(Debug, Parser)]
#[command(name = "render-pod", version)]
struct Args {
    name: String,

    #[arg(long, default_value = "default")]
    namespace: String,

    #[arg(long)]
    image: String,

    #[arg(long)]
    image_pull_policy: Option<String>,

    /// Defaults to `pgadmin-<name>`.
    #[arg(long)]
    config_map: Option<String>,

    /// Defaults to `pgadmin-<name>-data`.
    #[arg(long)]
    pvc: Option<String>,

    #[arg(long)]
    openshift: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let instance = PgAdminInstance {
        name: args.name.clone(),
        namespace: args.namespace,
        image: args.image,
        image_pull_policy: args.image_pull_policy,
        ..Default::default()
    };
    let config_map = args
        .config_map
        .unwrap_or_else(|| format!("pgadmin-{}", args.name));
    let pvc = args
        .pvc
        .unwrap_or_else(|| format!("pgadmin-{}-data", args.name));

    let mut spec = pod(&instance, &config_map, &pvc);
    spec.security_context = Some(pod_security_context(args.openshift));

    let json = serde_json::to_string_pretty(&spec).context("unable to serialize PodSpec")?;
    println!("{}", json);
    Ok(())
}
