//! MeetingCam CLI.

use anyhow::Result;
use clap::Parser;
use meetingcam::config::Config;
use meetingcam::device::DeviceFamily;
use meetingcam::plugins::{self, PluginArgs};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

const EXIT_FATAL: u8 = 1;
const EXIT_NOT_READY: u8 = 2;

/// Map physical cameras to v4l2loopback devices and stream a processed feed.
#[derive(Parser, Debug)]
#[command(name = "meetingcam", version)]
#[command(after_help = "Arguments after `--` are handed to the plugin as `--name value` pairs.")]
struct Args {
    /// Physical device to drive: /dev/video<n> for webcams, the serial for accelerators
    device_path: Option<String>,

    /// Drive an accelerator module instead of a webcam
    #[arg(long)]
    accelerator: bool,

    /// Plugin to run (see --list-plugins)
    #[arg(long)]
    plugin: Option<String>,

    /// YAML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Target frames per second, overrides the config file
    #[arg(long)]
    fps: Option<u32>,

    /// Show physical and virtual devices plus setup commands, then exit
    #[arg(long)]
    list_devices: bool,

    /// List the available plugins and exit
    #[arg(long)]
    list_plugins: bool,

    /// Explain how to remove all virtual devices, then exit
    #[arg(long)]
    reset_help: bool,

    /// Plugin arguments
    #[arg(last = true)]
    plugin_args: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("meetingcam=info")))
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    if args.list_plugins {
        print!("{}", plugins::describe());
        return Ok(ExitCode::SUCCESS);
    }

    let family = if args.accelerator {
        DeviceFamily::Accelerator
    } else {
        DeviceFamily::Webcam
    };
    let plugin_args = PluginArgs::parse(&args.plugin_args)?;
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(fps) = args.fps {
        anyhow::ensure!(fps > 0, "--fps must be greater than zero");
        config.fps = fps;
    }

    run_host(args, family, plugin_args, &config)
}

#[cfg(target_os = "linux")]
fn run_host(args: Args, family: DeviceFamily, plugin_args: PluginArgs, config: &Config) -> Result<ExitCode> {
    use meetingcam::runtime::{self, Outcome, RunRequest};

    if args.reset_help {
        println!("{}", runtime::RESET_HELP);
        return Ok(ExitCode::SUCCESS);
    }
    if args.list_devices {
        runtime::list_devices(family, config)?;
        return Ok(ExitCode::SUCCESS);
    }

    let request = RunRequest {
        device_path: args.device_path,
        family,
        plugin: args
            .plugin
            .unwrap_or_else(|| plugins::default_plugin(family).to_string()),
        plugin_args,
    };
    Ok(match runtime::run(request, config)? {
        Outcome::Stopped => ExitCode::SUCCESS,
        Outcome::NotReady => ExitCode::from(EXIT_NOT_READY),
    })
}

#[cfg(not(target_os = "linux"))]
fn run_host(_: Args, _: DeviceFamily, _: PluginArgs, _: &Config) -> Result<ExitCode> {
    anyhow::bail!("v4l2loopback virtual cameras are only available on Linux")
}
