// yami-player command line
// Decodes a media file and dumps or presents every frame

#[cfg(not(target_os = "linux"))]
compile_error!("yami-player presents through EGL on X11 and only builds for Linux");

use anyhow::Context;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use yami_player::renderer::egl::EglPlatform;
use yami_player::{PlayerConfig, RenderMode};

#[derive(Parser, Debug)]
#[command(name = "yami-player", version, about, disable_help_flag = true)]
struct Args {
    /// Media file to decode
    #[arg(short = 'i', long = "input", value_name = "PATH")]
    input: PathBuf,

    /// 0: dump I420 to file, 1: upload luma to a texture, 2: import DRM flink name, 3: import dma_buf
    #[arg(short = 'm', long = "mode", default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=3))]
    mode: u8,

    /// Directory for mode 0 dump files
    #[arg(short = 'o', long = "output-dir", value_name = "DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Print help
    #[arg(short = 'h', short_alias = '?', long = "help", action = ArgAction::Help)]
    help: Option<bool>,
}

impl TryFrom<Args> for PlayerConfig {
    type Error = yami_player::PlayerError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        Ok(PlayerConfig {
            input: args.input,
            mode: RenderMode::try_from(args.mode)?,
            output_dir: args.output_dir,
        })
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = PlayerConfig::try_from(args)?;
    let input = config.input.clone();

    let stats = yami_player::play(config, EglPlatform::new("yami-player"))
        .with_context(|| format!("Failed to play {}", input.display()))?;

    log::debug!("Finished with {:?}", stats);
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["yami-player", "-i", "clip.mp4"]).unwrap();
        assert_eq!(args.input, PathBuf::from("clip.mp4"));
        assert_eq!(args.mode, 0);
        assert_eq!(args.output_dir, PathBuf::from("."));
    }

    #[test]
    fn test_args_mode_range() {
        let args = Args::try_parse_from(["yami-player", "-i", "clip.mp4", "-m", "3"]).unwrap();
        assert_eq!(PlayerConfig::try_from(args).unwrap().mode, RenderMode::DmaBuf);

        assert!(Args::try_parse_from(["yami-player", "-i", "clip.mp4", "-m", "4"]).is_err());
    }

    #[test]
    fn test_args_require_input() {
        assert!(Args::try_parse_from(["yami-player", "-m", "1"]).is_err());
    }

    #[test]
    fn test_help_flags() {
        for flag in ["-h", "-?", "--help"] {
            let err = Args::try_parse_from(["yami-player", flag]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
        }
    }
}
