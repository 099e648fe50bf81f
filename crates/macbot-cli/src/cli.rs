use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "macbot")]
#[command(version, about = "Slack bot for managing macOS image build hosts")]
pub struct Cli {
    /// Use the debugging backend instead of real hosts
    #[arg(long)]
    pub debug: bool,

    /// Config file (defaults to ~/.config/macbot/config.toml)
    #[arg(long, env = "MACBOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["macbot"]);
        assert!(!cli.debug);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from(["macbot", "--debug", "-v", "--config", "/tmp/macbot.toml"]);
        assert!(cli.debug);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/macbot.toml")));
    }
}
