mod cgroup;
mod cli;
mod config;
mod container_store;
mod error;
mod image;
mod launcher;
mod linux;
mod logging;
mod network;
mod overlay;
mod pull;
mod teardown;

use std::io::{self, BufRead, Write};

use log::{error, info};
use structopt::StructOpt;

use cli::{Command, Opt};
use config::{PockyConfig, ResourceLimits};
use container_store::ContainerStore;
use error::PockyResult;
use image::ImageStore;

fn main() {
    let opt = Opt::from_args();
    logging::init(opt.verbose);

    let config = PockyConfig::new(opt.pocky_root);

    let exit_code = match run_command(&config, opt.command) {
        Ok(code) => code,
        Err(err) => {
            error!("{}", err);
            1
        }
    };

    std::process::exit(exit_code);
}

fn run_command(config: &PockyConfig, command: Command) -> PockyResult<i32> {
    match command {
        Command::Run { image_id, argv } => cmd_run(config, &image_id, argv),
        Command::Pull { name, tag } => cmd_pull(config, &name, &tag),
        Command::Images => cmd_images(config),
        Command::Ps => cmd_ps(config),
        Command::Rm { container_id } => cmd_rm(config, &container_id),
        Command::Rmi { image_id } => cmd_rmi(config, &image_id),
    }
}

fn cmd_run(config: &PockyConfig, image_id: &str, argv: Vec<String>) -> PockyResult<i32> {
    network::ensure_bridge_exists()?;

    let images = ImageStore::new(config.clone());
    let image = images.resolve(image_id)?;
    let image_config = image.config()?;

    let limits = prompt_resource_limits();

    let containers = ContainerStore::new(config.clone());
    let container = containers.allocate()?;

    container.write_src(&image.src()?)?;
    let command = if argv.is_empty() { image_config.cmd.clone() } else { argv };
    container.write_cmd(&command)?;

    let netns_id = network::allocate_netns_id();
    container.write_netns(netns_id)?;
    network::create_host_network(netns_id)?;

    let spec = launcher::RunSpec::from_image_config(
        image.rootfs().to_owned(),
        container,
        command,
        &image_config,
        limits,
        netns_id,
    );

    info!("running image {} as container {}", image_id, spec.container.id);
    launcher::run(&spec)
}

/// Blank input keeps the default; non-numeric input also keeps the
/// default; an integer is used verbatim.
fn prompt_resource_limits() -> ResourceLimits {
    let defaults = ResourceLimits::default();

    let cpu_shares = prompt_num("CPU shares for container (default 512): ").unwrap_or(defaults.cpu_shares);

    let memory_bytes = prompt_num("Memory for container in MB (default 512MB): ")
        .map(|mb| mb * config::MB_TO_BYTES)
        .unwrap_or(defaults.memory_bytes);

    let pids_max = prompt_num("PIDs for container (default 512): ").unwrap_or(defaults.pids_max);

    ResourceLimits { cpu_shares, memory_bytes, pids_max }
}

fn prompt_num(prompt: &str) -> Option<i64> {
    print!("{}", prompt);
    let _ = io::stdout().flush();

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line).is_err() {
        return None;
    }

    config::parse_num_input(&line)
}

fn cmd_pull(config: &PockyConfig, name: &str, tag: &str) -> PockyResult<i32> {
    pull::pull(&config.root, name, tag)?;
    Ok(0)
}

fn cmd_images(config: &PockyConfig) -> PockyResult<i32> {
    let images = ImageStore::new(config.clone());
    println!("{:<36} {}", "IMAGE ID", "SOURCE");
    for image in images.list()? {
        let src = image.src().unwrap_or_default();
        println!("{:<36} {}", image.id, src);
    }
    Ok(0)
}

fn cmd_ps(config: &PockyConfig) -> PockyResult<i32> {
    let containers = ContainerStore::new(config.clone());
    println!("{:<36} {:<24} {}", "CONTAINER ID", "IMAGE", "CMD");
    for container in containers.list()? {
        if !containers.is_running(&container.id) {
            continue;
        }
        let src = std::fs::read_to_string(container.src_file()).unwrap_or_default();
        let cmd = std::fs::read_to_string(container.cmd_file()).unwrap_or_default();
        println!("{:<36} {:<24} {}", container.id, src, cmd);
    }
    Ok(0)
}

fn cmd_rm(config: &PockyConfig, container_id: &str) -> PockyResult<i32> {
    let containers = ContainerStore::new(config.clone());
    let container = containers.resolve(container_id)?;
    teardown::run_teardown(&container, false)?;
    Ok(0)
}

fn cmd_rmi(config: &PockyConfig, image_id: &str) -> PockyResult<i32> {
    let images = ImageStore::new(config.clone());
    images.remove(image_id)?;
    Ok(0)
}
