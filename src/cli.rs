//! Command-line argument parsing.

use anyhow::{Result, anyhow, bail};
use std::path::PathBuf;

pub const DEFAULT_CONFIG_PATH: &str = "conf/config.toml";

pub const USAGE: &str = "\
Usage:
  lingoflow [--config PATH] ingest <file> --from <lang> --to <lang> [--title TITLE]
  lingoflow [--config PATH] list
  lingoflow [--config PATH] remove <id>
  lingoflow [--config PATH] play <id> [--start N] [--headless]
  lingoflow [--config PATH] export <id> <out.wav>";

#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    Ingest {
        path: PathBuf,
        from: String,
        to: String,
        title: Option<String>,
    },
    List,
    Remove {
        id: String,
    },
    Play {
        id: String,
        start: Option<usize>,
        headless: bool,
    },
    Export {
        id: String,
        out: PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CliArgs {
    pub config_path: PathBuf,
    pub command: CliCommand,
}

pub fn parse_args<I>(args: I) -> Result<CliArgs>
where
    I: IntoIterator<Item = String>,
{
    let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    let mut positional = Vec::new();
    let mut from = None;
    let mut to = None;
    let mut title = None;
    let mut start = None;
    let mut headless = false;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = PathBuf::from(flag_value(&mut args, "--config")?),
            "--from" => from = Some(flag_value(&mut args, "--from")?),
            "--to" => to = Some(flag_value(&mut args, "--to")?),
            "--title" => title = Some(flag_value(&mut args, "--title")?),
            "--start" => {
                let raw = flag_value(&mut args, "--start")?;
                let parsed = raw
                    .parse::<usize>()
                    .map_err(|_| anyhow!("--start expects a sentence number, got '{raw}'"))?;
                start = Some(parsed);
            }
            "--headless" => headless = true,
            "-h" | "--help" => bail!("{USAGE}"),
            flag if flag.starts_with("--") => bail!("Unknown option {flag}\n{USAGE}"),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let verb = positional.next().ok_or_else(|| anyhow!("{USAGE}"))?;
    let mut operand = |name: &str| {
        positional
            .next()
            .ok_or_else(|| anyhow!("{verb} needs <{name}>\n{USAGE}"))
    };

    let command = match verb.as_str() {
        "ingest" => CliCommand::Ingest {
            path: PathBuf::from(operand("file")?),
            from: from.ok_or_else(|| anyhow!("ingest needs --from <lang>"))?,
            to: to.ok_or_else(|| anyhow!("ingest needs --to <lang>"))?,
            title,
        },
        "list" => CliCommand::List,
        "remove" => CliCommand::Remove {
            id: operand("id")?,
        },
        "play" => CliCommand::Play {
            id: operand("id")?,
            start,
            headless,
        },
        "export" => CliCommand::Export {
            id: operand("id")?,
            out: PathBuf::from(operand("out.wav")?),
        },
        other => bail!("Unknown command '{other}'\n{USAGE}"),
    };

    Ok(CliArgs {
        config_path,
        command,
    })
}

fn flag_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next()
        .filter(|value| !value.starts_with("--"))
        .ok_or_else(|| anyhow!("{flag} expects a value"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliArgs> {
        parse_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_ingest_with_languages_and_title() {
        let args = parse(&[
            "ingest", "book.txt", "--from", "en", "--to", "fa", "--title", "Tales",
        ])
        .expect("parse");
        assert_eq!(args.config_path, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(
            args.command,
            CliCommand::Ingest {
                path: PathBuf::from("book.txt"),
                from: "en".to_string(),
                to: "fa".to_string(),
                title: Some("Tales".to_string()),
            }
        );
    }

    #[test]
    fn parses_play_flags_in_any_order() {
        let args = parse(&["--headless", "play", "abc", "--start", "4", "--config", "x.toml"])
            .expect("parse");
        assert_eq!(args.config_path, PathBuf::from("x.toml"));
        assert_eq!(
            args.command,
            CliCommand::Play {
                id: "abc".to_string(),
                start: Some(4),
                headless: true,
            }
        );
    }

    #[test]
    fn rejects_missing_operands_and_unknown_verbs() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["export", "abc"]).is_err());
        assert!(parse(&["ingest", "book.txt", "--from", "en"]).is_err());
        assert!(parse(&["dance"]).is_err());
        assert!(parse(&["play", "abc", "--start", "soon"]).is_err());
    }
}
