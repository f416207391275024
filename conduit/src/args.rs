use std::path::PathBuf;

use clap::Parser;

/// Conduit LLM gateway
#[derive(Debug, Parser)]
#[command(name = "conduit", about = "Send a prompt to any configured LLM provider")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "conduit.toml", env = "CONDUIT_CONFIG")]
    pub config: PathBuf,

    /// Model as "<provider>/<model-name>"
    #[arg(short, long, env = "CONDUIT_MODEL")]
    pub model: String,

    /// System prompt
    #[arg(short, long)]
    pub system: Option<String>,

    /// Maximum output tokens
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Print text as it streams instead of waiting for the full response
    #[arg(long)]
    pub stream: bool,

    /// Go through the agentic run loop with the configured run defaults
    #[arg(long)]
    pub run: bool,

    /// Log filter directive, overriding the configured one
    #[arg(long, env = "CONDUIT_LOG")]
    pub log_filter: Option<String>,

    /// Prompt text
    #[arg(required = true)]
    pub prompt: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_words_are_collected() {
        let args = Args::try_parse_from(["conduit", "-m", "claude/claude-sonnet-4", "--stream", "hello", "there"]).unwrap();
        assert_eq!(args.model, "claude/claude-sonnet-4");
        assert!(args.stream);
        assert_eq!(args.prompt, ["hello", "there"]);
    }

    #[test]
    fn run_mode_combines_with_streaming() {
        let args = Args::try_parse_from(["conduit", "-m", "gpt/gpt-5", "--run", "--stream", "hi"]).unwrap();
        assert!(args.run);
        assert!(args.stream);

        let args = Args::try_parse_from(["conduit", "-m", "gpt/gpt-5", "hi"]).unwrap();
        assert!(!args.run);
    }

    #[test]
    fn prompt_is_required() {
        assert!(Args::try_parse_from(["conduit", "-m", "claude/claude-sonnet-4"]).is_err());
    }
}
