mod bitmap;
mod cgroup;
mod cli;
mod config;
mod container;
mod error;
mod ipam;
mod network;
mod overlay;
mod process;

use clap::Parser;

use cli::{Cli, Commands};
use container::LifecycleEngine;

fn main() {
    env_logger::Builder::from_default_env()
        .format_timestamp_micros()
        .format_module_path(false)
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();
    let engine = LifecycleEngine::new(config::root_dir());

    let result = match cli.command {
        Commands::Run { name, image_dir, entrypoint } => engine.run(&name, &image_dir, entrypoint),
        Commands::Start { name } => engine.start(&name),
        Commands::Stop { name } => engine.stop(&name),
        Commands::Rm { name } => engine.remove(&name),
        Commands::Ls => engine.list().map(print_containers),
        Commands::Clear => engine.clear_all(),
        Commands::Child { name } => engine.child_entry(&name),
    };

    if let Err(e) = result {
        eprintln!("ERROR {e}");
        std::process::exit(1);
    }
}

fn print_containers(containers: Vec<(container::ContainerConfig, container::ContainerState)>) {
    for (config, state) in containers {
        println!(
            "{}\t{}\t{:?}\t{}\t{}",
            config.name,
            config.image_dir,
            state.life_cycle,
            state.ip_net.as_deref().unwrap_or("-"),
            if state.child_pid == 0 { "-".to_string() } else { state.child_pid.to_string() },
        );
    }
}
